//! Loaders producing a [`TreeNode`] from text.
//!
//! Three input forms are accepted:
//!
//! - JSON documents: `{"name": "+", "children": [{"name": "1"}, {"name": "2"}]}`
//! - Prefix s-expressions: `(+ (* 3 4) 5)`
//! - Tree files: for every node, a line with its name followed by a line with
//!   its child count, children following depth-first.
//!
//! ```text
//! # (+ (* 3 4) 5)
//! +
//! 2
//! *
//! 2
//! 3
//! 0
//! 4
//! 0
//! 5
//! 0
//! ```

use super::TreeNode;
use crate::error::{EvalError, Result};
use std::path::Path;

/// Nesting limit for both text formats.
const MAX_DEPTH: usize = 512;

fn parse_error(line: usize, message: impl Into<String>) -> EvalError {
    EvalError::Parse {
        line,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Open,
    Close,
    Atom(&'a str),
}

fn tokenize(input: &str) -> Vec<(Token<'_>, usize)> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut atom_start: Option<usize> = None;

    for (idx, ch) in input.char_indices() {
        let is_delimiter = ch.is_whitespace() || ch == '(' || ch == ')';
        if is_delimiter {
            if let Some(start) = atom_start.take() {
                tokens.push((Token::Atom(&input[start..idx]), line));
            }
        } else if atom_start.is_none() {
            atom_start = Some(idx);
        }

        match ch {
            '(' => tokens.push((Token::Open, line)),
            ')' => tokens.push((Token::Close, line)),
            '\n' => line += 1,
            _ => {}
        }
    }
    if let Some(start) = atom_start {
        tokens.push((Token::Atom(&input[start..]), line));
    }
    tokens
}

struct SexprParser<'a> {
    tokens: Vec<(Token<'a>, usize)>,
    pos: usize,
}

impl<'a> SexprParser<'a> {
    fn next(&mut self) -> Option<(Token<'a>, usize)> {
        let token = self.tokens.get(self.pos).copied();
        self.pos += 1;
        token
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map(|(_, line)| *line).unwrap_or(1)
    }

    fn parse_expr(&mut self, depth: usize) -> Result<TreeNode> {
        if depth > MAX_DEPTH {
            return Err(parse_error(self.last_line(), "expression nested too deeply"));
        }
        match self.next() {
            Some((Token::Atom(name), _)) => Ok(TreeNode::leaf(name)),
            Some((Token::Open, line)) => {
                let name = match self.next() {
                    Some((Token::Atom(name), _)) => name,
                    Some((_, line)) => return Err(parse_error(line, "expected operator after '('")),
                    None => return Err(parse_error(line, "unterminated expression")),
                };
                let mut children = Vec::new();
                loop {
                    match self.tokens.get(self.pos) {
                        Some((Token::Close, _)) => {
                            self.pos += 1;
                            return Ok(TreeNode::node(name, children));
                        }
                        Some(_) => children.push(self.parse_expr(depth + 1)?),
                        None => return Err(parse_error(line, "unterminated expression")),
                    }
                }
            }
            Some((Token::Close, line)) => Err(parse_error(line, "unexpected ')'")),
            None => Err(parse_error(self.last_line(), "empty expression")),
        }
    }
}

/// Parse a prefix s-expression such as `(+ (* 3 4) 5)`.
pub fn parse_sexpr(input: &str) -> Result<TreeNode> {
    let mut parser = SexprParser {
        tokens: tokenize(input),
        pos: 0,
    };
    let tree = parser.parse_expr(0)?;
    if let Some((_, line)) = parser.tokens.get(parser.pos) {
        return Err(parse_error(*line, "trailing input after expression"));
    }
    Ok(tree)
}

struct TreeFileParser<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> TreeFileParser<'a> {
    fn new(input: &'a str) -> Self {
        let lines = input
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .collect();
        Self { lines, pos: 0 }
    }

    fn next_line(&mut self, expected: &str) -> Result<(usize, &'a str)> {
        let eof_line = self.lines.last().map(|(line, _)| *line).unwrap_or(1);
        let entry = self
            .lines
            .get(self.pos)
            .copied()
            .ok_or_else(|| parse_error(eof_line, format!("unexpected end of input, expected {}", expected)))?;
        self.pos += 1;
        Ok(entry)
    }

    fn parse_node(&mut self, depth: usize) -> Result<TreeNode> {
        let (line, name) = self.next_line("a node name")?;
        if depth > MAX_DEPTH {
            return Err(parse_error(line, "tree nested too deeply"));
        }
        let (count_line, count) = self.next_line("a child count")?;
        let count: usize = count.parse().map_err(|_| {
            parse_error(count_line, format!("invalid child count '{}'", count))
        })?;

        let mut children = Vec::new();
        for _ in 0..count {
            children.push(self.parse_node(depth + 1)?);
        }
        Ok(TreeNode::node(name, children))
    }
}

/// Parse the line-based tree file format.
pub fn parse_tree_file(input: &str) -> Result<TreeNode> {
    let mut parser = TreeFileParser::new(input);
    let tree = parser.parse_node(0)?;
    if let Some((line, _)) = parser.lines.get(parser.pos) {
        return Err(parse_error(*line, "trailing lines after the root subtree"));
    }
    Ok(tree)
}

/// Parse a JSON tree document.
pub fn from_json(input: &str) -> Result<TreeNode> {
    Ok(serde_json::from_str(input)?)
}

/// Load a tree from `path`, picking the format from the extension or content.
pub fn load_tree(path: &Path) -> Result<TreeNode> {
    let contents = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let head = contents.trim_start();

    if is_json || head.starts_with('{') {
        from_json(&contents)
    } else if head.starts_with('(') {
        parse_sexpr(&contents)
    } else {
        parse_tree_file(&contents)
    }
}

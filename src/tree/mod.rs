//! Expression tree model.
//!
//! [`TreeNode`] is the raw, externally supplied description: a name and an
//! ordered list of children. [`Expr`] is the validated form the evaluator
//! consumes. Converting one into the other is the only place malformed input
//! is rejected, so no worker is ever spawned for an invalid tree.

pub mod parse;

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use parse::{from_json, load_tree, parse_sexpr, parse_tree_file};

/// Identifier of the root node in node paths.
pub const ROOT_PATH: &str = "r";

/// Path of the `index`-th child of `parent` (`r` -> `r.0`).
pub fn child_path(parent: &str, index: usize) -> String {
    format!("{}.{}", parent, index)
}

/// A node of the input tree, as produced by a loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Operator symbol or decimal operand.
    pub name: String,
    /// Ordered children, empty for leaves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn node(name: impl Into<String>, children: Vec<TreeNode>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Total number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::node_count).sum::<usize>()
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{}", "", self.name, indent = depth * 4)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Indented outline, one node per line.
impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Operator of an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Multiply,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Multiply => "*",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(Self::Add),
            "*" => Some(Self::Multiply),
            _ => None,
        }
    }

    /// Apply the operator to two values, `None` on overflow.
    pub fn apply(self, lhs: i32, rhs: i32) -> Option<i32> {
        match self {
            Self::Add => lhs.checked_add(rhs),
            Self::Multiply => lhs.checked_mul(rhs),
        }
    }

    /// Fold the operator left to right over `values`.
    ///
    /// Returns `None` on overflow or when `values` is empty.
    pub fn fold(self, values: &[i32]) -> Option<i32> {
        let (first, rest) = values.split_first()?;
        rest.iter()
            .try_fold(*first, |acc, &value| self.apply(acc, value))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A validated expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Leaf(i32),
    Node { op: Operator, children: Vec<Expr> },
}

impl Expr {
    /// Label used for the worker's process name.
    pub fn label(&self) -> String {
        match self {
            Self::Leaf(value) => value.to_string(),
            Self::Node { op, .. } => op.symbol().to_string(),
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Node { children, .. } => 1 + children.iter().map(Expr::node_count).sum::<usize>(),
        }
    }

    /// Canonical prefix form, e.g. `(+ (* 3 4) 5)`.
    pub fn to_sexpr(&self) -> String {
        match self {
            Self::Leaf(value) => value.to_string(),
            Self::Node { op, children } => {
                let parts: Vec<String> = children.iter().map(Expr::to_sexpr).collect();
                format!("({} {})", op, parts.join(" "))
            }
        }
    }

    /// Evaluate in-process with the same checked, left-to-right semantics the
    /// worker tree uses.
    pub fn evaluate_local(&self) -> Result<i32> {
        self.evaluate_at(ROOT_PATH)
    }

    /// Check structure of an `Expr` built directly rather than through
    /// `TryFrom<&TreeNode>`: every internal node needs at least one child.
    pub fn validate(&self) -> Result<()> {
        self.validate_at(ROOT_PATH)
    }

    fn validate_at(&self, path: &str) -> Result<()> {
        match self {
            Self::Leaf(_) => Ok(()),
            Self::Node { op, children } if children.is_empty() => Err(EvalError::Construction(
                format!("node {}: operator '{}' has no children", path, op),
            )),
            Self::Node { children, .. } => children
                .iter()
                .enumerate()
                .try_for_each(|(i, child)| child.validate_at(&child_path(path, i))),
        }
    }

    fn evaluate_at(&self, path: &str) -> Result<i32> {
        match self {
            Self::Leaf(value) => Ok(*value),
            Self::Node { op, children } => {
                let values = children
                    .iter()
                    .enumerate()
                    .map(|(i, child)| child.evaluate_at(&child_path(path, i)))
                    .collect::<Result<Vec<_>>>()?;
                op.fold(&values)
                    .ok_or_else(|| EvalError::Overflow(path.to_string()))
            }
        }
    }

    fn from_node(node: &TreeNode, path: &str) -> Result<Self> {
        if node.is_leaf() {
            if Operator::from_symbol(&node.name).is_some() {
                return Err(EvalError::Construction(format!(
                    "node {}: operator '{}' has no children",
                    path, node.name
                )));
            }
            return node.name.parse::<i32>().map(Expr::Leaf).map_err(|_| {
                EvalError::Construction(format!(
                    "node {}: leaf operand '{}' is not a 32-bit integer",
                    path, node.name
                ))
            });
        }

        let op = Operator::from_symbol(&node.name).ok_or_else(|| {
            EvalError::Construction(format!(
                "node {}: unknown operator '{}'",
                path, node.name
            ))
        })?;
        let children = node
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| Expr::from_node(child, &child_path(path, i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Expr::Node { op, children })
    }
}

impl TryFrom<&TreeNode> for Expr {
    type Error = EvalError;

    fn try_from(node: &TreeNode) -> Result<Self> {
        Expr::from_node(node, ROOT_PATH)
    }
}

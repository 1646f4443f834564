//! Process-tree snapshots.
//!
//! Reads `/proc/*/stat` to render the descendants of a process the way
//! `pstree` would, with each process's scheduler state. Taken while the worker
//! tree is suspended, every worker shows up as stopped (`T`).

use crate::error::{EvalError, Result};
use nix::unistd::Pid;
use std::collections::HashMap;

/// Scheduler state of a stopped process in `/proc/<pid>/stat`.
pub const STATE_STOPPED: char = 'T';

/// One process in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: i32,
    pub ppid: i32,
    /// Process name (`comm`).
    pub name: String,
    /// Single-letter scheduler state.
    pub state: char,
    /// Distance from the snapshot root.
    pub depth: usize,
}

impl ProcessEntry {
    pub fn is_stopped(&self) -> bool {
        self.state == STATE_STOPPED
    }
}

/// Descendants of one process, in depth-first order starting with the root.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    entries: Vec<ProcessEntry>,
}

impl ProcessSnapshot {
    pub fn root(&self) -> &ProcessEntry {
        &self.entries[0]
    }

    pub fn entries(&self) -> &[ProcessEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, pid: Pid) -> Option<&ProcessEntry> {
        self.entries.iter().find(|e| e.pid == pid.as_raw())
    }

    /// True when every process in the snapshot is stopped.
    pub fn all_stopped(&self) -> bool {
        self.entries.iter().all(ProcessEntry::is_stopped)
    }

    /// Render as an ASCII tree, one process per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        // For each depth, whether the ancestor at that depth has siblings still to come.
        let mut open: Vec<bool> = Vec::new();

        for (i, entry) in self.entries.iter().enumerate() {
            let last = self.entries[i + 1..]
                .iter()
                .take_while(|e| e.depth >= entry.depth)
                .all(|e| e.depth != entry.depth);

            if entry.depth > 0 {
                open.truncate(entry.depth - 1);
                for &more in &open {
                    out.push_str(if more { "│   " } else { "    " });
                }
                out.push_str(if last { "└── " } else { "├── " });
                open.push(!last);
            }
            out.push_str(&format!("{} ({}) {}\n", entry.name, entry.pid, entry.state));
        }
        out
    }
}

impl std::fmt::Display for ProcessSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Parse the contents of `/proc/<pid>/stat`.
///
/// The name is enclosed in parentheses and may itself contain spaces and
/// parentheses, so fields are split after the last `)`.
pub fn parse_stat(contents: &str) -> Option<ProcessEntry> {
    let open = contents.find('(')?;
    let close = contents.rfind(')')?;
    if close < open {
        return None;
    }
    let pid = contents[..open].trim().parse().ok()?;
    let name = contents[open + 1..close].to_string();
    let mut rest = contents[close + 1..].split_whitespace();
    let state = rest.next()?.chars().next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some(ProcessEntry {
        pid,
        ppid,
        name,
        state,
        depth: 0,
    })
}

/// Keep `root` and its descendants from `all`, ordered depth-first with
/// siblings by ascending pid.
pub fn build_snapshot(root: Pid, all: Vec<ProcessEntry>) -> Result<ProcessSnapshot> {
    let mut by_parent: HashMap<i32, Vec<ProcessEntry>> = HashMap::new();
    let mut root_entry = None;
    for entry in all {
        if entry.pid == root.as_raw() {
            root_entry = Some(entry);
        } else {
            by_parent.entry(entry.ppid).or_default().push(entry);
        }
    }
    let mut root_entry = root_entry
        .ok_or_else(|| EvalError::Snapshot(format!("process {} not found", root)))?;
    root_entry.depth = 0;

    for children in by_parent.values_mut() {
        children.sort_by_key(|e| e.pid);
    }

    let mut entries = Vec::new();
    let mut stack = vec![root_entry];
    while let Some(entry) = stack.pop() {
        if let Some(children) = by_parent.remove(&entry.pid) {
            for mut child in children.into_iter().rev() {
                child.depth = entry.depth + 1;
                stack.push(child);
            }
        }
        entries.push(entry);
    }
    Ok(ProcessSnapshot { entries })
}

/// Capture the process tree rooted at `root`.
#[cfg(target_os = "linux")]
pub fn snapshot(root: Pid) -> Result<ProcessSnapshot> {
    let dir = std::fs::read_dir("/proc")
        .map_err(|e| EvalError::Snapshot(format!("cannot read /proc: {}", e)))?;

    let mut all = Vec::new();
    for entry in dir.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !name.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // Processes may exit while we scan.
        if let Ok(contents) = std::fs::read_to_string(entry.path().join("stat"))
            && let Some(parsed) = parse_stat(&contents)
        {
            all.push(parsed);
        }
    }
    build_snapshot(root, all)
}

#[cfg(not(target_os = "linux"))]
pub fn snapshot(root: Pid) -> Result<ProcessSnapshot> {
    Err(EvalError::Snapshot(format!(
        "process snapshots need /proc, unavailable for pid {}",
        root
    )))
}

//! Lock-ancestry collection.
//!
//! When collection is enabled, every tracked acquisition feeds the calling
//! thread's held set, oldest first, into a [`LockTreeCollector`]. Each path
//! from the root of the resulting tree is an acquisition order that actually
//! happened, which is what a developer needs to audit rank assignments.
//!
//! Collection is a development aid: it only switches on when both the
//! developer-build and debug-build flags are set.

use crate::error::LockViolation;
use crate::header::{LockHeader, Rank};
use crate::registry::LockRegistry;
use crate::sync::InternalLock;
use crate::tracing_compat::debug;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Handle to a node created by a [`LockTreeCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockTreeNode(usize);

impl LockTreeNode {
    /// Wraps a collector-specific node index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the node index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Receiver of lock-ancestry data.
///
/// Calls are serialized by the registry's tree lock.
pub trait LockTreeCollector: fmt::Debug + Send + Sync + 'static {
    /// Records a lock acquired while holding the lock at `parent` (or no
    /// lock, for `None`) and returns its node.
    fn add(&self, parent: Option<LockTreeNode>, name: &str, serial: u64, rank: Rank)
        -> LockTreeNode;
}

#[derive(Debug, Clone)]
struct TreeEntry {
    name: String,
    serial: u64,
    rank: Rank,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// In-memory collector; children are de-duplicated by serial number.
#[derive(Debug, Default)]
pub struct MemoryLockTree {
    nodes: Mutex<Vec<TreeEntry>>,
}

impl MemoryLockTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Every root-to-leaf acquisition path, as lock names.
    #[must_use]
    pub fn paths(&self) -> Vec<Vec<String>> {
        let nodes = self.nodes.lock();
        let mut paths = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            if !node.children.is_empty() {
                continue;
            }
            let mut path = Vec::new();
            let mut cursor = Some(index);
            while let Some(at) = cursor {
                path.push(nodes[at].name.clone());
                cursor = nodes[at].parent;
            }
            path.reverse();
            paths.push(path);
        }
        paths
    }

    /// Writes the tree, one indented line per node.
    pub fn render(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let nodes = self.nodes.lock();
        let mut stack: Vec<(usize, usize)> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| (i, 0))
            .rev()
            .collect();
        while let Some((index, depth)) = stack.pop() {
            let node = &nodes[index];
            writeln!(
                out,
                "{:indent$}{} (serial {}, rank {})",
                "",
                node.name,
                node.serial,
                node.rank,
                indent = depth * 2
            )?;
            stack.extend(node.children.iter().rev().map(|&c| (c, depth + 1)));
        }
        Ok(())
    }
}

impl LockTreeCollector for MemoryLockTree {
    fn add(&self, parent: Option<LockTreeNode>, name: &str, serial: u64, rank: Rank) -> LockTreeNode {
        let mut nodes = self.nodes.lock();
        let parent = parent.map(LockTreeNode::index);

        let existing = match parent {
            Some(p) => nodes[p]
                .children
                .iter()
                .copied()
                .find(|&c| nodes[c].serial == serial),
            None => nodes
                .iter()
                .position(|n| n.parent.is_none() && n.serial == serial),
        };
        if let Some(index) = existing {
            return LockTreeNode(index);
        }

        let index = nodes.len();
        nodes.push(TreeEntry {
            name: name.to_owned(),
            serial,
            rank,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            nodes[p].children.push(index);
        }
        LockTreeNode(index)
    }
}

impl LockRegistry {
    /// Enables or disables lock-tree collection.
    ///
    /// Has no effect unless the developer-build and debug-build flags are
    /// both set; collection is forced off otherwise.
    pub fn set_lock_tree_collection(&self, enabled: bool) {
        let effective = self.config.developer_build && self.config.debug_build && enabled;
        self.collect_tree.store(effective, Ordering::Relaxed);
        debug!(requested = enabled, effective, "lock tree collection toggled");
    }

    /// Returns `true` while lock-tree collection is enabled.
    #[must_use]
    pub fn is_lock_tree_available(&self) -> bool {
        self.collect_tree.load(Ordering::Relaxed)
    }

    /// Feeds the held set, oldest first, to the collector under the tree
    /// lock.
    pub(crate) fn feed_lock_tree(&self, held: &[Arc<LockHeader>]) {
        let Some(tree_lock) = self
            .tree_lock
            .get_or_create(|| Ok::<_, Infallible>(InternalLock::new(())))
        else {
            self.fatal(LockViolation::BootstrapFailure { what: "lock tree" });
        };

        tree_lock.with(|_| {
            let mut node = None;
            for header in held {
                node = Some(self.config.lock_tree.add(
                    node,
                    header.name(),
                    header.serial(),
                    header.rank(),
                ));
            }
        });
    }
}

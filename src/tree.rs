use indextree::Arena;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::scanner::{size_order, ScannedNode};

type ArenaId = indextree::NodeId;

static NEXT_TREE: AtomicU64 = AtomicU64::new(1);

/// Whether a directory's children have been read.
///
/// Leaves are always `Scanned`. An `Unscanned` directory has no children and a
/// size of 0 until it is expanded; a `Scanned` directory with no children is
/// genuinely empty (or everything inside it was unreadable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Unscanned,
    Scanned,
}

/// Handle to a node of one particular [`SizeTree`].
///
/// Handles from another tree never resolve, even when the arena slot exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    tree: u64,
    node: ArenaId,
}

/// Payload of one tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub full_path: String,
    pub location: std::path::PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub state: ScanState,
}

/// Size-ranked directory tree stored in an arena.
///
/// A node's [`NodeId`] is its identity. Nodes are never removed, so an id is
/// never handed out twice within one tree, and a splice leaves the ids of all
/// untouched nodes as they were.
#[derive(Debug)]
pub struct SizeTree {
    id: u64,
    arena: Arena<Entry>,
    root: ArenaId,
}

impl SizeTree {
    pub fn from_scan(scanned: ScannedNode) -> Self {
        let mut arena = Arena::new();
        let root = graft(&mut arena, scanned);
        Self {
            id: NEXT_TREE.fetch_add(1, Ordering::Relaxed),
            arena,
            root,
        }
    }

    pub fn root(&self) -> NodeId {
        self.handle(self.root)
    }

    pub fn get(&self, id: NodeId) -> Option<&Entry> {
        self.arena
            .get(self.resolve(id)?)
            .filter(|node| !node.is_removed())
            .map(|node| node.get())
    }

    /// Children of `id`, largest first.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.resolve(id)
            .into_iter()
            .flat_map(move |node| node.children(&self.arena))
            .map(move |child| self.handle(child))
    }

    pub fn has_children(&self, id: NodeId) -> bool {
        self.children(id).next().is_some()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.resolve(id)?.parent(&self.arena)?;
        Some(self.handle(parent))
    }

    /// Number of nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        self.root.descendants(&self.arena).count()
    }

    pub fn total_size(&self) -> u64 {
        self.arena[self.root].get().size
    }

    /// Depth-first search for the node with this `full_path`, descending only
    /// into directories.
    pub fn find_by_path(&self, full_path: &str) -> Option<NodeId> {
        self.find_dir(full_path).map(|node| self.handle(node))
    }

    /// Replace the children of the node at `full_path` with those of
    /// `scanned`, a fresh scan of that same directory.
    ///
    /// With `propagate` the node takes the fresh size and the difference is
    /// applied to every ancestor, re-sorting siblings on the way up. Without
    /// it the node and its ancestors keep their old sizes. Returns the id of
    /// the spliced node, or `None` if no node has that path.
    pub fn splice(&mut self, full_path: &str, scanned: ScannedNode, propagate: bool) -> Option<NodeId> {
        let target = self.find_dir(full_path)?;

        let old_children: Vec<ArenaId> = target.children(&self.arena).collect();
        for child in old_children {
            child.detach(&mut self.arena);
        }

        let new_size = scanned.size;
        for child in scanned.children {
            let child_id = graft(&mut self.arena, child);
            target.append(child_id, &mut self.arena);
        }

        let old_size = {
            let entry = self.arena.get_mut(target)?.get_mut();
            entry.state = ScanState::Scanned;
            entry.size
        };

        if propagate && new_size != old_size {
            let mut node = target;
            self.arena[node].get_mut().size = new_size;
            while let Some(parent) = node.parent(&self.arena) {
                let entry = self.arena[parent].get_mut();
                entry.size = if new_size >= old_size {
                    entry.size.saturating_add(new_size - old_size)
                } else {
                    entry.size.saturating_sub(old_size - new_size)
                };
                self.resort_children(parent);
                node = parent;
            }
        }

        Some(self.handle(target))
    }

    fn handle(&self, node: ArenaId) -> NodeId {
        NodeId { tree: self.id, node }
    }

    fn resolve(&self, id: NodeId) -> Option<ArenaId> {
        (id.tree == self.id).then_some(id.node)
    }

    fn find_dir(&self, full_path: &str) -> Option<ArenaId> {
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            let entry = self.arena[node].get();
            if entry.full_path == full_path {
                return Some(node);
            }
            // Pushed in reverse so the largest child is visited first.
            let mut dirs: Vec<ArenaId> = node
                .children(&self.arena)
                .filter(|&child| self.arena[child].get().is_dir)
                .collect();
            dirs.reverse();
            stack.extend(dirs);
        }
        None
    }

    fn resort_children(&mut self, node: ArenaId) {
        let mut children: Vec<ArenaId> = node.children(&self.arena).collect();
        children.sort_by(|&a, &b| {
            let a = self.arena[a].get();
            let b = self.arena[b].get();
            size_order(a.size, &a.name, b.size, &b.name)
        });
        for &child in &children {
            child.detach(&mut self.arena);
        }
        for child in children {
            node.append(child, &mut self.arena);
        }
    }
}

/// Copy a scanned subtree into the arena, keeping the scanner's child order.
fn graft(arena: &mut Arena<Entry>, scanned: ScannedNode) -> ArenaId {
    let ScannedNode {
        name,
        full_path,
        location,
        size,
        is_dir,
        state,
        children,
    } = scanned;

    let id = arena.new_node(Entry {
        name,
        full_path,
        location,
        size,
        is_dir,
        state,
    });
    for child in children {
        let child_id = graft(arena, child);
        id.append(child_id, arena);
    }
    id
}

//! A red-black tree of byte ranges.
//!
//! Every node records one range `[start, start + len)` of address space and
//! whether the allocation behind it is still live. The tree is ordered by
//! `start`, and starts are unique as long as nodes enter through
//! [`RangeTree::resolve_and_insert()`].
//!
//! Nodes live in a `Vec` arena and point at each other with [`NodeId`]
//! indices, so rotations and splices are just index reassignment. Freed slots
//! go on a free list and get recycled by the next insert.
//!
//! ```plaintext
//!              [0x40, 0x50) B
//!             /              \
//!   [0x10, 0x20) R        [0x60, 0x61) R
//! ```

mod check;
mod iter;
mod overlap;
mod remove;
mod rotate;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::serialize::serde_hex;

pub use check::InvariantViolation;
pub use iter::Iter;
pub use overlap::Collision;

/// Index of a node slot in the arena. Only valid until that node is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) const fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    Red,
    Black,
}

/// Lifecycle state of a tracked range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeState {
    Allocated,
    Free,
}

impl fmt::Display for RangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeState::Allocated => write!(f, "allocated"),
            RangeState::Free => write!(f, "free"),
        }
    }
}

/// A copy of what one node records. Handing these out (rather than
/// references into the arena) keeps the tree the sole owner of its nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedRange {
    /// Where does the range begin?
    #[serde(with = "serde_hex")]
    pub start: usize,
    /// How many bytes does it span?
    pub len: usize,
    pub state: RangeState,
}

impl TrackedRange {
    pub const fn new(start: usize, len: usize, state: RangeState) -> Self {
        Self { start, len, state }
    }

    /// One past the last byte. Saturates rather than wrapping, so a range
    /// that would run off the top of the address space ends at `usize::MAX`.
    pub const fn end(&self) -> usize {
        self.start.saturating_add(self.len)
    }

    /// `true` if `address` is one of the bytes of this range. A zero-length
    /// range contains nothing.
    pub const fn contains(&self, address: usize) -> bool {
        self.start <= address && address < self.end()
    }

    pub const fn is_allocated(&self) -> bool {
        matches!(self.state, RangeState::Allocated)
    }

    /// Non-empty intersection
    pub const fn overlaps(&self, other: &TrackedRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

impl fmt::Display for TrackedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:#x}, {:#x}) {} bytes, {}",
            self.start,
            self.end(),
            self.len,
            self.state
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    start: usize,
    len: usize,
    state: RangeState,
    color: Color,
    parent: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    /// `false` once the slot is back on the free list
    alive: bool,
}

impl Node {
    const fn new(start: usize, len: usize, state: RangeState) -> Self {
        Self {
            start,
            len,
            state,
            color: Color::Red,
            parent: None,
            left: None,
            right: None,
            alive: true,
        }
    }
}

/// See the module-level documentation.
#[derive(Debug, Default)]
pub struct RangeTree {
    nodes: Vec<Node>,
    free_list: Vec<usize>,
    root: Option<NodeId>,
    len: usize,
}

impl RangeTree {
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_list: Vec::new(),
            root: None,
            len: 0,
        }
    }

    /// Number of tracked ranges, live or free
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Copy out what `id` records.
    ///
    /// # Panics
    ///
    /// - If `id` was never handed out by this tree. Stale ids of removed nodes
    ///   are caught by a debug assertion only.
    pub fn range(&self, id: NodeId) -> TrackedRange {
        let node = self.node(id);
        TrackedRange::new(node.start, node.len, node.state)
    }

    pub fn color(&self, id: NodeId) -> Color {
        self.node(id).color
    }

    /// Flip a range between allocated and free. The key is untouched, so this
    /// never needs a rebalance.
    pub fn set_state(&mut self, id: NodeId, state: RangeState) {
        self.node_mut(id).state = state;
    }

    /// Cut a range down to its first `len` bytes.
    pub(crate) fn shrink(&mut self, id: NodeId, len: usize) {
        debug_assert!(len <= self.node(id).len);
        self.node_mut(id).len = len;
    }

    // ===== Arena =====

    fn alloc_node(&mut self, start: usize, len: usize, state: RangeState) -> NodeId {
        match self.free_list.pop() {
            Some(index) => {
                self.nodes[index] = Node::new(start, len, state);
                NodeId(index)
            }
            None => {
                self.nodes.push(Node::new(start, len, state));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn free_node(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        node.alive = false;
        node.parent = None;
        node.left = None;
        node.right = None;
        self.free_list.push(id.0);
    }

    #[inline(always)]
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        debug_assert!(self.nodes[id.index()].alive, "stale {id:?}");
        &self.nodes[id.index()]
    }

    #[inline(always)]
    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        debug_assert!(self.nodes[id.index()].alive, "stale {id:?}");
        &mut self.nodes[id.index()]
    }

    #[inline(always)]
    fn start(&self, id: NodeId) -> usize {
        self.node(id).start
    }

    #[inline(always)]
    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    #[inline(always)]
    fn left(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).left
    }

    #[inline(always)]
    fn right(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).right
    }

    #[inline(always)]
    fn is_red(&self, id: NodeId) -> bool {
        self.node(id).color == Color::Red
    }

    /// Absent children count as black
    #[inline(always)]
    fn is_black_or_nil(&self, id: Option<NodeId>) -> bool {
        id.map_or(true, |id| !self.is_red(id))
    }

    #[inline(always)]
    fn paint(&mut self, id: NodeId, color: Color) {
        self.node_mut(id).color = color;
    }

    fn paint_black(&mut self, id: Option<NodeId>) {
        if let Some(id) = id {
            self.paint(id, Color::Black);
        }
    }

    /// Point whatever pointed at `old` from above (its parent, or the root) at
    /// `new` instead. Does not touch `new`'s own parent link.
    fn relink(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(parent) => {
                if self.left(parent) == Some(old) {
                    self.node_mut(parent).left = new;
                } else {
                    self.node_mut(parent).right = new;
                }
            }
        }
    }

    fn subtree_min(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.left(id) {
            id = left;
        }
        id
    }

    // ===== Search =====

    /// Find the range that begins exactly at `address`.
    pub fn search_by_start(&self, address: usize) -> Option<NodeId> {
        let mut current = self.root;
        while let Some(id) = current {
            let start = self.start(id);
            current = match address.cmp(&start) {
                std::cmp::Ordering::Equal => return Some(id),
                std::cmp::Ordering::Less => self.left(id),
                std::cmp::Ordering::Greater => self.right(id),
            };
        }
        None
    }

    /// Find the range that has `address` as one of its bytes, wherever in the
    /// range it falls.
    pub fn search_by_containment(&self, address: usize) -> Option<NodeId> {
        let mut current = self.root;
        while let Some(id) = current {
            let range = self.range(id);
            current = if address < range.start {
                self.left(id)
            } else if address >= range.end() {
                self.right(id)
            } else {
                return Some(id);
            };
        }
        None
    }

    // ===== Insert =====

    /// Attach a new red node by plain BST descent on `start`, then restore the
    /// red-black invariants.
    ///
    /// This does not look for overlaps: a caller that needs the tree to stay
    /// collision-free goes through [`RangeTree::resolve_and_insert()`].
    pub fn insert(&mut self, start: usize, len: usize, state: RangeState) -> NodeId {
        let id = self.alloc_node(start, len, state);
        self.len += 1;

        let mut parent = None;
        let mut go_left = false;
        let mut current = self.root;
        while let Some(at) = current {
            parent = Some(at);
            go_left = start < self.start(at);
            current = if go_left { self.left(at) } else { self.right(at) };
        }

        self.node_mut(id).parent = parent;
        match parent {
            None => self.root = Some(id),
            Some(parent) if go_left => self.node_mut(parent).left = Some(id),
            Some(parent) => self.node_mut(parent).right = Some(id),
        }

        log::trace!("insert {} as {id:?}", self.range(id));
        self.insert_fixup(id);
        id
    }

    /// Make a lone node the root of an empty tree. A single black node is
    /// already balanced, so no fix-up runs.
    fn attach_root(&mut self, start: usize, len: usize, state: RangeState) -> NodeId {
        debug_assert!(self.root.is_none());
        let id = self.alloc_node(start, len, state);
        self.len += 1;
        self.paint(id, Color::Black);
        self.root = Some(id);
        log::trace!("insert {} as root {id:?}", self.range(id));
        id
    }

    fn insert_fixup(&mut self, mut node: NodeId) {
        while let Some(mut parent) = self.parent(node).filter(|&p| self.is_red(p)) {
            // A red parent is never the root, so there is a grandparent
            let Some(grandparent) = self.parent(parent) else {
                break;
            };

            if self.left(grandparent) == Some(parent) {
                let uncle = self.right(grandparent);
                if let Some(uncle) = uncle.filter(|&u| self.is_red(u)) {
                    self.paint(uncle, Color::Black);
                    self.paint(parent, Color::Black);
                    self.paint(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                if self.right(parent) == Some(node) {
                    self.rotate_left(parent);
                    std::mem::swap(&mut node, &mut parent);
                }
                self.paint(parent, Color::Black);
                self.paint(grandparent, Color::Red);
                self.rotate_right(grandparent);
            } else {
                let uncle = self.left(grandparent);
                if let Some(uncle) = uncle.filter(|&u| self.is_red(u)) {
                    self.paint(uncle, Color::Black);
                    self.paint(parent, Color::Black);
                    self.paint(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                if self.left(parent) == Some(node) {
                    self.rotate_right(parent);
                    std::mem::swap(&mut node, &mut parent);
                }
                self.paint(parent, Color::Black);
                self.paint(grandparent, Color::Red);
                self.rotate_left(grandparent);
            }
        }

        self.paint_black(self.root);
    }

    // ===== Diagnostics =====

    /// Lazy in-order walk over every tracked range
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self)
    }

    /// One line per node, in pre-order: address, color, position relative to
    /// its parent, allocated/free and length.
    pub fn dump(&self) -> String {
        self.to_string()
    }

    fn dump_subtree(
        &self,
        f: &mut fmt::Formatter<'_>,
        id: Option<NodeId>,
        parent: usize,
        side: &str,
    ) -> fmt::Result {
        let Some(id) = id else {
            return Ok(());
        };
        let node = self.node(id);
        let color = if node.color == Color::Red { "R" } else { "B" };
        writeln!(
            f,
            "{:#x}({color}) is {parent:#x}'s {side} child, {}, {} bytes",
            node.start, node.state, node.len
        )?;
        self.dump_subtree(f, node.left, node.start, "left")?;
        self.dump_subtree(f, node.right, node.start, "right")
    }
}

impl fmt::Display for RangeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(root) = self.root else {
            return writeln!(f, "(empty)");
        };
        let node = self.node(root);
        writeln!(
            f,
            "{:#x}(B) is root, {}, {} bytes",
            node.start, node.state, node.len
        )?;
        self.dump_subtree(f, node.left, node.start, "left")?;
        self.dump_subtree(f, node.right, node.start, "right")
    }
}

//! Structural self-check for [`RangeTree`].

use std::fmt;

use hashbrown::HashSet;

use super::{Color, NodeId, RangeTree, TrackedRange};
use crate::util::num::red_black_height_bound;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    RedRoot(NodeId),
    /// The root thinks it has a parent
    RootHasParent(NodeId),
    /// A child does not point back at the node that holds it
    BrokenParentLink { node: NodeId, child: NodeId },
    /// A node is reachable twice
    Cycle(NodeId),
    RedRedEdge { parent: NodeId, child: NodeId },
    BlackHeightMismatch { node: NodeId, left: usize, right: usize },
    /// In-order starts are not strictly increasing
    OutOfOrder { node: NodeId, start: usize },
    LiveOverlap { first: TrackedRange, second: TrackedRange },
    LengthMismatch { counted: usize, recorded: usize },
    TooTall { height: usize, bound: usize },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RedRoot(node) => write!(f, "root {node:?} is red"),
            Self::RootHasParent(node) => write!(f, "root {node:?} has a parent"),
            Self::BrokenParentLink { node, child } => {
                write!(f, "{child:?} does not name {node:?} as its parent")
            }
            Self::Cycle(node) => write!(f, "{node:?} is reachable more than once"),
            Self::RedRedEdge { parent, child } => {
                write!(f, "red {parent:?} has red child {child:?}")
            }
            Self::BlackHeightMismatch { node, left, right } => write!(
                f,
                "black height under {node:?} differs: {left} on the left, {right} on the right"
            ),
            Self::OutOfOrder { node, start } => {
                write!(f, "{node:?} (start {start:#x}) is out of order")
            }
            Self::LiveOverlap { first, second } => {
                write!(f, "live ranges {first} and {second} overlap")
            }
            Self::LengthMismatch { counted, recorded } => write!(
                f,
                "counted {counted} nodes but the tree records {recorded}"
            ),
            Self::TooTall { height, bound } => {
                write!(f, "height {height} exceeds the red-black bound {bound}")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

struct Walk {
    visited: HashSet<NodeId>,
    /// Start of the last node seen in order
    previous_start: Option<usize>,
    /// End of the live range with the highest end seen so far
    last_live: Option<TrackedRange>,
}

impl RangeTree {
    /// Verify the red-black invariants, the ordering of starts, the parent
    /// links, and that no two allocated ranges overlap.
    ///
    /// This walks the whole tree, so it is O(n). Meant for tests and for the
    /// tracker's `check_invariants` option.
    pub fn check(&self) -> Result<(), InvariantViolation> {
        let Some(root) = self.root else {
            return match self.len {
                0 => Ok(()),
                recorded => Err(InvariantViolation::LengthMismatch {
                    counted: 0,
                    recorded,
                }),
            };
        };
        if self.is_red(root) {
            return Err(InvariantViolation::RedRoot(root));
        }
        if self.parent(root).is_some() {
            return Err(InvariantViolation::RootHasParent(root));
        }

        let mut walk = Walk {
            visited: HashSet::with_capacity(self.len),
            previous_start: None,
            last_live: None,
        };
        let (_, height) = self.check_subtree(root, &mut walk)?;

        if walk.visited.len() != self.len {
            return Err(InvariantViolation::LengthMismatch {
                counted: walk.visited.len(),
                recorded: self.len,
            });
        }
        let bound = red_black_height_bound(self.len);
        if height > bound {
            return Err(InvariantViolation::TooTall { height, bound });
        }
        Ok(())
    }

    /// Returns `(black_height, height)` of the subtree at `id`
    fn check_subtree(&self, id: NodeId, walk: &mut Walk) -> Result<(usize, usize), InvariantViolation> {
        if !walk.visited.insert(id) {
            return Err(InvariantViolation::Cycle(id));
        }
        let node = self.node(id);

        for child in [node.left, node.right].into_iter().flatten() {
            if self.parent(child) != Some(id) {
                return Err(InvariantViolation::BrokenParentLink { node: id, child });
            }
            if node.color == Color::Red && self.is_red(child) {
                return Err(InvariantViolation::RedRedEdge { parent: id, child });
            }
        }

        let (left_black, left_height) = match node.left {
            Some(left) => self.check_subtree(left, walk)?,
            None => (0, 0),
        };

        // In-order visit
        let range = self.range(id);
        if walk.previous_start.is_some_and(|previous| previous >= range.start) {
            return Err(InvariantViolation::OutOfOrder {
                node: id,
                start: range.start,
            });
        }
        walk.previous_start = Some(range.start);
        if range.is_allocated() && range.len > 0 {
            if let Some(last) = walk.last_live.filter(|last| last.overlaps(&range)) {
                return Err(InvariantViolation::LiveOverlap {
                    first: last,
                    second: range,
                });
            }
            if walk.last_live.map_or(true, |last| last.end() < range.end()) {
                walk.last_live = Some(range);
            }
        }

        let (right_black, right_height) = match node.right {
            Some(right) => self.check_subtree(right, walk)?,
            None => (0, 0),
        };

        if left_black != right_black {
            return Err(InvariantViolation::BlackHeightMismatch {
                node: id,
                left: left_black,
                right: right_black,
            });
        }
        let own_black = usize::from(node.color == Color::Black);
        Ok((
            left_black + own_black,
            1 + left_height.max(right_height),
        ))
    }
}

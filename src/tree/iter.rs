use std::iter::FusedIterator;

use super::{NodeId, RangeTree, TrackedRange};

/// In-order walk over a [`RangeTree`], lowest start first. Steps with parent
/// links, so it holds no stack and costs nothing until polled.
pub struct Iter<'a> {
    tree: &'a RangeTree,
    next: Option<NodeId>,
}

impl<'a> Iter<'a> {
    pub(super) fn new(tree: &'a RangeTree) -> Self {
        Self {
            tree,
            next: tree.root.map(|root| tree.subtree_min(root)),
        }
    }

    fn successor(&self, id: NodeId) -> Option<NodeId> {
        if let Some(right) = self.tree.right(id) {
            return Some(self.tree.subtree_min(right));
        }
        let mut child = id;
        let mut parent = self.tree.parent(id);
        while let Some(p) = parent {
            if self.tree.left(p) == Some(child) {
                return Some(p);
            }
            child = p;
            parent = self.tree.parent(p);
        }
        None
    }
}

impl Iterator for Iter<'_> {
    type Item = (NodeId, TrackedRange);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.successor(id);
        Some((id, self.tree.range(id)))
    }
}

impl FusedIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a RangeTree {
    type Item = (NodeId, TrackedRange);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

use super::{Color, NodeId, RangeTree, TrackedRange};

impl RangeTree {
    /// Unlink `id` from the tree, rebalance, and recycle its slot. Returns
    /// what the node recorded.
    ///
    /// A node with two children is replaced by its in-order successor (the
    /// leftmost node of its right subtree). The successor node itself moves
    /// into the vacated position, so ids of every other node stay valid.
    pub fn remove(&mut self, id: NodeId) -> TrackedRange {
        let removed = self.range(id);

        // `child` takes the place of whatever was spliced out, `parent` is
        // where it now hangs. `child` may be nil.
        let (child, parent, spliced_color) = match (self.left(id), self.right(id)) {
            (Some(left), Some(right)) => {
                let successor = self.subtree_min(right);
                let id_parent = self.parent(id);
                self.relink(id_parent, id, Some(successor));

                // The successor never has a left child
                let child = self.right(successor);
                let spliced_color = self.node(successor).color;
                let mut parent = self.parent(successor);

                if parent == Some(id) {
                    parent = Some(successor);
                } else {
                    if let Some(child) = child {
                        self.node_mut(child).parent = parent;
                    }
                    if let Some(parent) = parent {
                        self.node_mut(parent).left = child;
                    }
                    self.node_mut(successor).right = Some(right);
                    self.node_mut(right).parent = Some(successor);
                }

                let color = self.node(id).color;
                let successor_node = self.node_mut(successor);
                successor_node.parent = id_parent;
                successor_node.color = color;
                successor_node.left = Some(left);
                self.node_mut(left).parent = Some(successor);

                (child, parent, spliced_color)
            }
            (left, right) => {
                let child = left.or(right);
                let parent = self.parent(id);
                if let Some(child) = child {
                    self.node_mut(child).parent = parent;
                }
                self.relink(parent, id, child);
                (child, parent, self.node(id).color)
            }
        };

        self.free_node(id);
        self.len -= 1;
        log::trace!("remove {removed} ({id:?})");

        if spliced_color == Color::Black {
            self.remove_fixup(child, parent);
        }
        removed
    }

    /// `node` carries an extra black after a black node was spliced out above
    /// it. Push the extra black up, or absorb it with rotations.
    fn remove_fixup(&mut self, mut node: Option<NodeId>, mut parent: Option<NodeId>) {
        while node != self.root && self.is_black_or_nil(node) {
            let Some(p) = parent else {
                break;
            };

            if self.left(p) == node {
                // A black-height deficit on the left means the right side is
                // at least one black node deep
                let Some(mut sibling) = self.right(p) else {
                    break;
                };
                if self.is_red(sibling) {
                    self.paint(sibling, Color::Black);
                    self.paint(p, Color::Red);
                    self.rotate_left(p);
                    let Some(next) = self.right(p) else {
                        break;
                    };
                    sibling = next;
                }

                if self.is_black_or_nil(self.left(sibling))
                    && self.is_black_or_nil(self.right(sibling))
                {
                    self.paint(sibling, Color::Red);
                    node = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.is_black_or_nil(self.right(sibling)) {
                        self.paint_black(self.left(sibling));
                        self.paint(sibling, Color::Red);
                        self.rotate_right(sibling);
                        let Some(next) = self.right(p) else {
                            break;
                        };
                        sibling = next;
                    }
                    let color = self.node(p).color;
                    self.paint(sibling, color);
                    self.paint(p, Color::Black);
                    self.paint_black(self.right(sibling));
                    self.rotate_left(p);
                    node = self.root;
                    break;
                }
            } else {
                let Some(mut sibling) = self.left(p) else {
                    break;
                };
                if self.is_red(sibling) {
                    self.paint(sibling, Color::Black);
                    self.paint(p, Color::Red);
                    self.rotate_right(p);
                    let Some(next) = self.left(p) else {
                        break;
                    };
                    sibling = next;
                }

                if self.is_black_or_nil(self.left(sibling))
                    && self.is_black_or_nil(self.right(sibling))
                {
                    self.paint(sibling, Color::Red);
                    node = Some(p);
                    parent = self.parent(p);
                } else {
                    if self.is_black_or_nil(self.left(sibling)) {
                        self.paint_black(self.right(sibling));
                        self.paint(sibling, Color::Red);
                        self.rotate_left(sibling);
                        let Some(next) = self.left(p) else {
                            break;
                        };
                        sibling = next;
                    }
                    let color = self.node(p).color;
                    self.paint(sibling, color);
                    self.paint(p, Color::Black);
                    self.paint_black(self.left(sibling));
                    self.rotate_right(p);
                    node = self.root;
                    break;
                }
            }
        }

        self.paint_black(node);
    }
}

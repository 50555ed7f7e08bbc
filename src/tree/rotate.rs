use super::{NodeId, RangeTree};

impl RangeTree {
    /// Left rotation about `x`
    ///
    /// ```plaintext
    ///      px                  px
    ///     /                   /
    ///    x                   y
    ///   / \      -->        / \
    ///  lx  y               x   ry
    ///     / \             / \
    ///    ly  ry          lx  ly
    /// ```
    pub(super) fn rotate_left(&mut self, x: NodeId) {
        let Some(y) = self.right(x) else {
            debug_assert!(false, "rotate_left({x:?}) without a right child");
            return;
        };

        let y_left = self.left(y);
        self.node_mut(x).right = y_left;
        if let Some(y_left) = y_left {
            self.node_mut(y_left).parent = Some(x);
        }

        let x_parent = self.parent(x);
        self.node_mut(y).parent = x_parent;
        self.relink(x_parent, x, Some(y));

        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);
    }

    /// Right rotation about `y`, the mirror of [`RangeTree::rotate_left()`]
    pub(super) fn rotate_right(&mut self, y: NodeId) {
        let Some(x) = self.left(y) else {
            debug_assert!(false, "rotate_right({y:?}) without a left child");
            return;
        };

        let x_right = self.right(x);
        self.node_mut(y).left = x_right;
        if let Some(x_right) = x_right {
            self.node_mut(x_right).parent = Some(y);
        }

        let y_parent = self.parent(y);
        self.node_mut(x).parent = y_parent;
        self.relink(y_parent, y, Some(x));

        self.node_mut(x).right = Some(y);
        self.node_mut(y).parent = Some(x);
    }
}

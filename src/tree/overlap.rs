//! Overlap resolution for new ranges.
//!
//! When the raw allocator hands back memory, the tree may still hold free
//! records for the same bytes, left over from earlier releases. Those records
//! are stale: they have to be cut back or dropped before the new range goes
//! in, otherwise a later lookup could land on the old record. A *live* record
//! in the way is a different story. It means two allocations claim the same
//! bytes, and nothing is repaired.
//!
//! For a new range `R = [rs, re)`, a tracked range `T = [ts, te)` is
//!
//! ```plaintext
//! consumed       rs <= ts < re, or ts == rs        R: |------|
//!                                                  T:    |-----|
//!
//! prefix kept    ts < rs < te                      R:    |------|
//!                                                  T: |----|
//!                                                  T: |----------|
//! ```
//!
//! Consumed records are removed. A record that starts before `R` keeps only
//! `[ts, rs)`; whatever it had past `R`'s start is forgotten.
//!
//! A zero-length `R` covers no bytes, but it is not a no-op here. Treating it
//! as one would let a point sit strictly inside another record. Instead it
//! follows the same rules as any other start: a record that strictly contains
//! `rs` is cut back, or refused if live. So no start ever lies strictly inside
//! another record, which is what keeps both containment search and the
//! sweep's pruning exact.

use std::fmt;

use super::{NodeId, RangeState, RangeTree, TrackedRange};

/// Inserting `requested` would make two live ranges overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Collision {
    pub requested: TrackedRange,
    pub live: TrackedRange,
}

impl fmt::Display for Collision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "new range {} overlaps live range {}",
            self.requested, self.live
        )
    }
}

impl std::error::Error for Collision {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reach {
    Consumed,
    PrefixKept,
    Clear,
}

fn reach(tracked: &TrackedRange, requested: &TrackedRange) -> Reach {
    if tracked.start == requested.start || requested.contains(tracked.start) {
        Reach::Consumed
    } else if tracked.contains(requested.start) {
        Reach::PrefixKept
    } else {
        Reach::Clear
    }
}

#[derive(Debug)]
enum Repair {
    Consume(NodeId),
    Shrink(NodeId, usize),
}

impl RangeTree {
    /// Insert `[start, start + len)`, first removing or shrinking every free
    /// record it lands on.
    ///
    /// # Errors
    ///
    /// - [`Collision`] if an allocated record is in the way. The tree is left
    ///   exactly as it was: the sweep only plans repairs, and they are applied
    ///   once the sweep has finished cleanly.
    pub fn resolve_and_insert(
        &mut self,
        start: usize,
        len: usize,
        state: RangeState,
    ) -> Result<NodeId, Collision> {
        let requested = TrackedRange::new(start, len, state);
        let mut repairs = Vec::new();
        self.sweep(self.root, &requested, &mut repairs)?;

        for repair in repairs {
            match repair {
                Repair::Shrink(id, len) => {
                    log::debug!(
                        "shrinking stale {} to {len} bytes under {requested}",
                        self.range(id)
                    );
                    self.shrink(id, len);
                }
                Repair::Consume(id) => {
                    let stale = self.remove(id);
                    log::debug!("dropping stale {stale} under {requested}");
                }
            }
        }

        Ok(if self.root.is_none() {
            self.attach_root(start, len, state)
        } else {
            self.insert(start, len, state)
        })
    }

    /// Visit every record that `requested` could reach, pruning subtrees that
    /// lie wholly to one side of it.
    ///
    /// No record's start lies strictly inside another record, so nothing to
    /// the left of `T` reaches past `ts`. Once `rs` is at or past `T`, the
    /// left subtree can be skipped.
    fn sweep(
        &self,
        at: Option<NodeId>,
        requested: &TrackedRange,
        repairs: &mut Vec<Repair>,
    ) -> Result<(), Collision> {
        let Some(id) = at else {
            return Ok(());
        };
        let tracked = self.range(id);

        match reach(&tracked, requested) {
            Reach::Consumed => {
                self.refuse_live(&tracked, requested)?;
                repairs.push(Repair::Consume(id));
                self.sweep(self.left(id), requested, repairs)?;
                self.sweep(self.right(id), requested, repairs)
            }
            Reach::PrefixKept => {
                self.refuse_live(&tracked, requested)?;
                repairs.push(Repair::Shrink(id, requested.start - tracked.start));
                if tracked.end() < requested.end() {
                    self.sweep(self.right(id), requested, repairs)?;
                }
                Ok(())
            }
            Reach::Clear => {
                if requested.start < tracked.start {
                    self.sweep(self.left(id), requested, repairs)?;
                }
                if requested.start >= tracked.start || requested.end() > tracked.start {
                    self.sweep(self.right(id), requested, repairs)?;
                }
                Ok(())
            }
        }
    }

    fn refuse_live(
        &self,
        tracked: &TrackedRange,
        requested: &TrackedRange,
    ) -> Result<(), Collision> {
        if tracked.is_allocated() {
            return Err(Collision {
                requested: *requested,
                live: *tracked,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::tree::Color;

    const FREE: RangeState = RangeState::Free;
    const LIVE: RangeState = RangeState::Allocated;

    fn ranges(tree: &RangeTree) -> Vec<(usize, usize, RangeState)> {
        tree.iter()
            .map(|(_, range)| (range.start, range.len, range.state))
            .collect()
    }

    fn tree_of(records: &[(usize, usize, RangeState)]) -> RangeTree {
        let mut tree = RangeTree::new();
        for &(start, len, state) in records {
            tree.resolve_and_insert(start, len, state).unwrap();
        }
        tree.check().unwrap();
        tree
    }

    #[test]
    fn same_origin_free_record_is_replaced() {
        let mut tree = tree_of(&[(0x100, 0x20, FREE), (0x200, 0x10, LIVE)]);
        tree.resolve_and_insert(0x100, 0x08, LIVE).unwrap();
        tree.check().unwrap();
        assert_eq!(
            ranges(&tree),
            vec![(0x100, 0x08, LIVE), (0x200, 0x10, LIVE)]
        );
    }

    #[test]
    fn same_origin_live_record_collides() {
        let mut tree = tree_of(&[(0x100, 0x20, LIVE)]);
        let collision = tree.resolve_and_insert(0x100, 0x08, LIVE).unwrap_err();
        assert_eq!(collision.live, TrackedRange::new(0x100, 0x20, LIVE));
        assert_eq!(collision.requested, TrackedRange::new(0x100, 0x08, LIVE));
    }

    #[test]
    fn free_record_containing_new_range_keeps_its_prefix() {
        let mut tree = tree_of(&[(0x100, 0x40, FREE)]);
        tree.resolve_and_insert(0x110, 0x08, LIVE).unwrap();
        tree.check().unwrap();
        assert_eq!(
            ranges(&tree),
            vec![(0x100, 0x10, FREE), (0x110, 0x08, LIVE)]
        );
    }

    #[test]
    fn new_range_spanning_several_free_records_consumes_them() {
        let mut tree = tree_of(&[
            (0x100, 0x10, FREE),
            (0x110, 0x10, FREE),
            (0x120, 0x10, FREE),
            (0x130, 0x10, FREE),
            (0x140, 0x10, LIVE),
        ]);
        tree.resolve_and_insert(0x108, 0x30, LIVE).unwrap();
        tree.check().unwrap();
        assert_eq!(
            ranges(&tree),
            vec![
                (0x100, 0x08, FREE),
                (0x108, 0x30, LIVE),
                (0x140, 0x10, LIVE),
            ]
        );
    }

    #[test]
    fn live_record_anywhere_in_the_sweep_leaves_tree_untouched() {
        let records: Vec<_> = (0..32)
            .map(|i| (0x1000 + i * 0x10, 0x10, if i == 20 { LIVE } else { FREE }))
            .collect();
        let mut tree = tree_of(&records);
        let before = tree.dump();

        let collision = tree.resolve_and_insert(0x1008, 0x200, LIVE).unwrap_err();
        assert_eq!(collision.live.start, 0x1000 + 20 * 0x10);
        assert_eq!(tree.dump(), before);
    }

    #[test]
    fn sweeping_every_record_away_makes_a_black_root() {
        let mut tree = tree_of(&[(0x10, 0x10, FREE), (0x20, 0x10, FREE), (0x30, 0x10, FREE)]);
        let id = tree.resolve_and_insert(0x10, 0x30, LIVE).unwrap();
        assert_eq!(tree.root(), Some(id));
        assert_eq!(tree.color(id), Color::Black);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn zero_length_range_inside_free_record_cuts_it_back() {
        let mut tree = tree_of(&[(0x100, 0x40, FREE)]);
        tree.resolve_and_insert(0x110, 0, LIVE).unwrap();
        tree.check().unwrap();
        assert_eq!(ranges(&tree), vec![(0x100, 0x10, FREE), (0x110, 0, LIVE)]);
    }

    #[test]
    fn zero_length_range_inside_live_record_collides() {
        let mut tree = tree_of(&[(0x100, 0x40, LIVE)]);
        let collision = tree.resolve_and_insert(0x120, 0, LIVE).unwrap_err();
        assert_eq!(collision.live, TrackedRange::new(0x100, 0x40, LIVE));
    }

    #[test]
    fn zero_length_range_at_the_end_of_a_live_record_is_fine() {
        let mut tree = tree_of(&[(0x100, 0x40, LIVE)]);
        assert!(tree.resolve_and_insert(0x140, 0, LIVE).is_ok());
    }

    #[test]
    fn stale_zero_length_record_inside_new_range_is_consumed() {
        let mut tree = tree_of(&[(0x108, 0, FREE), (0x200, 0x10, LIVE)]);
        tree.resolve_and_insert(0x100, 0x10, LIVE).unwrap();
        assert_eq!(
            ranges(&tree),
            vec![(0x100, 0x10, LIVE), (0x200, 0x10, LIVE)]
        );
    }

    #[test]
    fn containment_search_is_not_misled_by_points() {
        let tree = tree_of(&[
            (0x100, 0x40, FREE),
            (0x120, 0, LIVE),
            (0x140, 0x10, LIVE),
            (0x80, 0x10, FREE),
        ]);
        for address in [0x100, 0x108, 0x11f] {
            let id = tree.search_by_containment(address).unwrap();
            assert_eq!(tree.range(id).start, 0x100);
        }
        assert_eq!(tree.search_by_containment(0x120), None);
    }

    /// The same rules applied to a flat list, no pruning
    fn model_insert(
        model: &mut Vec<TrackedRange>,
        requested: TrackedRange,
    ) -> Result<(), TrackedRange> {
        if let Some(live) = model
            .iter()
            .find(|tracked| tracked.is_allocated() && reach(tracked, &requested) != Reach::Clear)
        {
            return Err(*live);
        }
        model.retain(|tracked| reach(tracked, &requested) != Reach::Consumed);
        for tracked in model.iter_mut() {
            if reach(tracked, &requested) == Reach::PrefixKept {
                tracked.len = requested.start - tracked.start;
            }
        }
        model.push(requested);
        model.sort_by_key(|range| range.start);
        Ok(())
    }

    #[test]
    fn one_sweep_clears_every_conflict_on_random_topologies() {
        let mut rng = StdRng::seed_from_u64(0x0a11_0c8e);
        for _ in 0..200 {
            let mut tree = RangeTree::new();
            let mut model = Vec::new();
            for _ in 0..120 {
                let start = rng.gen_range(0..0x400usize);
                let len = if rng.gen_bool(0.1) { 0 } else { rng.gen_range(1..0x60) };
                let state = if rng.gen_bool(0.15) { LIVE } else { FREE };
                let requested = TrackedRange::new(start, len, state);

                let before = tree.dump();
                let expected = model_insert(&mut model, requested);
                let actual = tree.resolve_and_insert(start, len, state);
                match (expected, actual) {
                    (Ok(()), Ok(_)) => {}
                    (Err(_), Err(collision)) => {
                        assert!(collision.live.is_allocated());
                        assert_eq!(tree.dump(), before);
                    }
                    (expected, actual) => {
                        panic!("model said {expected:?}, tree said {actual:?} for {requested}")
                    }
                }

                tree.check().unwrap();
                let actual: Vec<TrackedRange> = tree.iter().map(|(_, range)| range).collect();
                assert_eq!(actual, model);
            }
        }
    }
}

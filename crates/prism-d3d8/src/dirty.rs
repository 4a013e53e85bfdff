//! Per-subresource dirty region accounting for shadowed pools.
//!
//! Shadowed resources accumulate modified boxes between flushes. The set is
//! kept small: boxes that contain or duplicate each other collapse, touching
//! boxes merge into their union bounding box, and once a subresource would
//! track more than [`MAX_DIRTY_BOXES`] it degrades to whole-dirty and stops
//! tracking individual boxes until the next flush.

use tracing::debug;

use crate::error::D3dResult;
use crate::types::Box3;

/// Maximum number of distinct dirty boxes tracked per subresource.
pub const MAX_DIRTY_BOXES: usize = 16;

/// Pending dirty state of one subresource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirtyState {
    Clean,
    Boxes(Vec<Box3>),
    Whole,
}

/// What `mark` did; callers use this for logging and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded,
    /// The box clamped to nothing and was ignored.
    IgnoredEmpty,
    /// The subresource was already (or has now become) whole-dirty.
    Whole,
    /// This mark pushed the subresource over the box limit.
    Degraded,
}

#[derive(Debug)]
struct SubresourceDirty {
    bounds: Box3,
    state: DirtyState,
}

/// Dirty region tracker for every subresource of one resource.
#[derive(Debug)]
pub struct DirtyTracker {
    subresources: Vec<SubresourceDirty>,
}

impl DirtyTracker {
    /// `bounds` gives the full extent of each subresource in order.
    pub fn new(bounds: impl IntoIterator<Item = Box3>) -> Self {
        Self {
            subresources: bounds
                .into_iter()
                .map(|bounds| SubresourceDirty {
                    bounds,
                    state: DirtyState::Clean,
                })
                .collect(),
        }
    }

    pub fn subresource_count(&self) -> usize {
        self.subresources.len()
    }

    /// Mark a region dirty. `None` marks the whole subresource.
    ///
    /// A malformed box fails with `InvalidCall` and leaves no trace. A box
    /// is clamped to the subresource bounds first; clamping to nothing is
    /// not an error, the mark is simply dropped.
    pub fn mark(&mut self, subresource: usize, region: Option<Box3>) -> D3dResult<MarkOutcome> {
        let sub = &mut self.subresources[subresource];
        let Some(region) = region else {
            sub.state = DirtyState::Whole;
            return Ok(MarkOutcome::Whole);
        };
        region.validate()?;
        let clamped = region.clamped_to(&sub.bounds);
        if clamped.is_empty() {
            return Ok(MarkOutcome::IgnoredEmpty);
        }
        if clamped == sub.bounds {
            sub.state = DirtyState::Whole;
            return Ok(MarkOutcome::Whole);
        }

        match &mut sub.state {
            DirtyState::Whole => Ok(MarkOutcome::Whole),
            DirtyState::Clean => {
                sub.state = DirtyState::Boxes(vec![clamped]);
                Ok(MarkOutcome::Recorded)
            }
            DirtyState::Boxes(boxes) => {
                let mut merged = clamped;
                // Fold every box the new region touches into a single union;
                // repeat because the union can reach further boxes.
                loop {
                    let before = boxes.len();
                    boxes.retain(|b| {
                        if b.contains(&merged) {
                            merged = *b;
                            false
                        } else if merged.touches(b) {
                            merged = merged.union(b);
                            false
                        } else {
                            true
                        }
                    });
                    if boxes.len() == before {
                        break;
                    }
                }
                if boxes.len() + 1 > MAX_DIRTY_BOXES {
                    debug!(
                        subresource,
                        boxes = boxes.len() + 1,
                        "dirty box limit exceeded, degrading to whole-dirty"
                    );
                    sub.state = DirtyState::Whole;
                    return Ok(MarkOutcome::Degraded);
                }
                boxes.push(merged);
                Ok(MarkOutcome::Recorded)
            }
        }
    }

    /// Consume the pending state of one subresource for upload.
    ///
    /// The subresource is clean afterwards, which is what makes a flush
    /// idempotent: a second take yields `Clean` and uploads nothing.
    pub fn take(&mut self, subresource: usize) -> DirtyState {
        std::mem::replace(
            &mut self.subresources[subresource].state,
            DirtyState::Clean,
        )
    }

    pub fn peek(&self, subresource: usize) -> &DirtyState {
        &self.subresources[subresource].state
    }

    pub fn is_clean(&self, subresource: usize) -> bool {
        matches!(self.subresources[subresource].state, DirtyState::Clean)
    }

    pub fn any_dirty(&self) -> bool {
        self.subresources
            .iter()
            .any(|s| !matches!(s.state, DirtyState::Clean))
    }

    /// Mark every subresource whole-dirty (used by the reset fast path).
    pub fn mark_all_whole(&mut self) {
        for sub in &mut self.subresources {
            sub.state = DirtyState::Whole;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::D3dError;
    use pretty_assertions::assert_eq;

    fn tracker_64() -> DirtyTracker {
        DirtyTracker::new([Box3::whole(64, 64, 1)])
    }

    #[test]
    fn mark_none_is_whole() {
        let mut t = tracker_64();
        assert_eq!(t.mark(0, None).unwrap(), MarkOutcome::Whole);
        assert_eq!(t.take(0), DirtyState::Whole);
        assert_eq!(t.take(0), DirtyState::Clean);
    }

    #[test]
    fn invalid_box_is_rejected_without_side_effect() {
        let mut t = tracker_64();
        let err = t.mark(0, Some(Box3::new(10, 0, 0, 5, 4, 1))).unwrap_err();
        assert_eq!(err, D3dError::InvalidCall);
        assert!(t.is_clean(0));
    }

    #[test]
    fn out_of_bounds_box_is_clamped_and_empty_ignored() {
        let mut t = tracker_64();
        assert_eq!(
            t.mark(0, Some(Box3::new(-8, -8, 0, 4, 4, 1))).unwrap(),
            MarkOutcome::Recorded
        );
        assert_eq!(
            t.peek(0),
            &DirtyState::Boxes(vec![Box3::new(0, 0, 0, 4, 4, 1)])
        );
        assert_eq!(
            t.mark(0, Some(Box3::new(100, 100, 0, 120, 120, 1))).unwrap(),
            MarkOutcome::IgnoredEmpty
        );
    }

    #[test]
    fn subsumed_boxes_collapse() {
        let mut t = tracker_64();
        t.mark(0, Some(Box3::new(0, 0, 0, 16, 16, 1))).unwrap();
        // Contained by the existing box: no growth.
        t.mark(0, Some(Box3::new(2, 2, 0, 6, 6, 1))).unwrap();
        assert_eq!(
            t.peek(0),
            &DirtyState::Boxes(vec![Box3::new(0, 0, 0, 16, 16, 1)])
        );
        // Contains the existing box: replaced by the larger one.
        t.mark(0, Some(Box3::new(0, 0, 0, 32, 32, 1))).unwrap();
        assert_eq!(
            t.peek(0),
            &DirtyState::Boxes(vec![Box3::new(0, 0, 0, 32, 32, 1)])
        );
    }

    #[test]
    fn touching_boxes_merge_transitively() {
        let mut t = tracker_64();
        t.mark(0, Some(Box3::new(0, 0, 0, 4, 4, 1))).unwrap();
        t.mark(0, Some(Box3::new(8, 0, 0, 12, 4, 1))).unwrap();
        assert_eq!(
            t.peek(0),
            &DirtyState::Boxes(vec![
                Box3::new(0, 0, 0, 4, 4, 1),
                Box3::new(8, 0, 0, 12, 4, 1)
            ])
        );
        // Bridges the gap: all three collapse into one union.
        t.mark(0, Some(Box3::new(4, 0, 0, 8, 4, 1))).unwrap();
        assert_eq!(
            t.peek(0),
            &DirtyState::Boxes(vec![Box3::new(0, 0, 0, 12, 4, 1)])
        );
    }

    #[test]
    fn exceeding_the_limit_degrades_to_whole() {
        let mut t = DirtyTracker::new([Box3::whole(1024, 4, 1)]);
        // Disjoint 1-texel-wide stripes, two texels apart.
        for i in 0..MAX_DIRTY_BOXES {
            let x = (i as i32) * 3;
            assert_eq!(
                t.mark(0, Some(Box3::new(x, 0, 0, x + 1, 1, 1))).unwrap(),
                MarkOutcome::Recorded
            );
        }
        match t.peek(0) {
            DirtyState::Boxes(boxes) => assert_eq!(boxes.len(), MAX_DIRTY_BOXES),
            other => panic!("expected boxes, got {other:?}"),
        }
        let x = (MAX_DIRTY_BOXES as i32) * 3;
        assert_eq!(
            t.mark(0, Some(Box3::new(x, 0, 0, x + 1, 1, 1))).unwrap(),
            MarkOutcome::Degraded
        );
        assert_eq!(t.peek(0), &DirtyState::Whole);
        // Whole-dirty is monotonic until the flush.
        assert_eq!(
            t.mark(0, Some(Box3::new(0, 0, 0, 1, 1, 1))).unwrap(),
            MarkOutcome::Whole
        );
        assert_eq!(t.take(0), DirtyState::Whole);
        assert_eq!(t.take(0), DirtyState::Clean);
    }

    #[test]
    fn covering_the_full_bounds_is_whole() {
        let mut t = tracker_64();
        assert_eq!(
            t.mark(0, Some(Box3::new(-5, -5, 0, 500, 500, 5))).unwrap(),
            MarkOutcome::Whole
        );
        assert_eq!(t.peek(0), &DirtyState::Whole);
    }

    #[test]
    fn subresources_are_independent() {
        let mut t = DirtyTracker::new([Box3::whole(8, 8, 1), Box3::whole(4, 4, 1)]);
        t.mark(0, Some(Box3::new(0, 0, 0, 2, 2, 1))).unwrap();
        assert!(!t.is_clean(0));
        assert!(t.is_clean(1));
        t.mark_all_whole();
        assert_eq!(t.peek(1), &DirtyState::Whole);
    }
}

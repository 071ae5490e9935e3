//! Slice tags.
//!
//! Every node and block carries a tag recording whether it belongs to a slice and how far the
//! instrumentation passes have advanced on it. Stages are ordered: a later stage implies the
//! earlier ones completed.

use serde::{Deserialize, Serialize};

/// Identifier of one marking run.
///
/// Run `r` owns the working id `(r - 1) * 5 + 1` and reserves the four values after it, so
/// numeric ids of distinct runs never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceId(pub u32);

impl SliceId {
    pub const STRIDE: u32 = 5;

    pub fn first() -> Self {
        SliceId(1)
    }

    pub fn working_id(self) -> u32 {
        (self.0.max(1) - 1) * Self::STRIDE + 1
    }

    /// Numeric id of `stage` within this run's reserved range.
    pub fn stage_id(self, stage: Stage) -> u32 {
        self.working_id() + stage.offset()
    }
}

impl std::fmt::Display for SliceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slice#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Discovered,
    AccessSeen,
    ObjectResolved,
    AddressResolved,
    Placed,
}

impl Stage {
    pub fn offset(self) -> u32 {
        match self {
            Stage::Discovered => 0,
            Stage::AccessSeen => 1,
            Stage::ObjectResolved => 2,
            Stage::AddressResolved => 3,
            Stage::Placed => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SliceTag {
    #[default]
    Unmarked,
    /// Pulled in because it sits in a loop whose exit test is secret-dependent.
    LoopForced(SliceId),
    Tainted(SliceId, Stage),
}

impl SliceTag {
    pub fn discovered(slice: SliceId) -> Self {
        SliceTag::Tainted(slice, Stage::Discovered)
    }

    pub fn is_marked(&self) -> bool {
        !matches!(self, SliceTag::Unmarked)
    }

    pub fn slice(&self) -> Option<SliceId> {
        match self {
            SliceTag::Unmarked => None,
            SliceTag::LoopForced(slice) | SliceTag::Tainted(slice, _) => Some(*slice),
        }
    }

    pub fn belongs_to(&self, slice: SliceId) -> bool {
        self.slice() == Some(slice)
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            SliceTag::Unmarked => None,
            SliceTag::LoopForced(_) => Some(Stage::Discovered),
            SliceTag::Tainted(_, stage) => Some(*stage),
        }
    }

    /// Move to `stage` within `slice`; never moves a tag backwards within the same slice.
    pub fn advance(&mut self, slice: SliceId, stage: Stage) {
        let keep = match self {
            SliceTag::Tainted(current, existing) => *current == slice && *existing >= stage,
            _ => false,
        };
        if !keep {
            *self = SliceTag::Tainted(slice, stage);
        }
    }

    /// Numeric form; `0` for unmarked.
    pub fn numeric(&self) -> u32 {
        match self {
            SliceTag::Unmarked => 0,
            SliceTag::LoopForced(slice) => slice.working_id(),
            SliceTag::Tainted(slice, stage) => slice.stage_id(*stage),
        }
    }
}

/// Identifies one `mark` invocation: which slice, which pass.
///
/// A node stamped with the current walk is never enqueued again by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalkStamp {
    pub slice: SliceId,
    pub pass: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_working_ids_do_not_collide() {
        let a = SliceId(1);
        let b = SliceId(2);
        assert_eq!(a.working_id(), 1);
        assert_eq!(b.working_id(), 6);
        assert!(a.stage_id(Stage::Placed) < b.working_id());
    }

    #[test]
    fn test_advance_is_monotonic() {
        let slice = SliceId(1);
        let mut tag = SliceTag::discovered(slice);
        tag.advance(slice, Stage::AddressResolved);
        tag.advance(slice, Stage::AccessSeen);
        assert_eq!(tag.stage(), Some(Stage::AddressResolved));
        assert!(tag.belongs_to(slice));
        assert!(!tag.belongs_to(SliceId(2)));
    }

    #[test]
    fn test_numeric_ordering_follows_stages() {
        let slice = SliceId(3);
        let seen = SliceTag::Tainted(slice, Stage::AccessSeen).numeric();
        let placed = SliceTag::Tainted(slice, Stage::Placed).numeric();
        assert!(seen < placed);
        assert_eq!(SliceTag::Unmarked.numeric(), 0);
        assert_eq!(SliceTag::LoopForced(slice).numeric(), 11);
    }
}

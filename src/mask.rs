//! Slot occupancy as a 128-bit vector split into two words.
//!
//! Every (day, period) pair maps to exactly one bit: `day * 16 + period`.
//! Two courses conflict iff their masks intersect.

use crate::data::{CourseId, CourseTable, Slot};
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bits reserved per day; must cover every period label.
pub const PERIODS_PER_DAY_BITS: u32 = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct TimeMask {
    pub lo: u64,
    pub hi: u64,
}

impl TimeMask {
    pub const EMPTY: TimeMask = TimeMask { lo: 0, hi: 0 };

    pub const fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Bit position of a slot, `None` for periods outside the per-day range.
    pub fn slot_bit(slot: &Slot) -> Option<u32> {
        let period = u32::from(slot.period);
        if period >= PERIODS_PER_DAY_BITS {
            return None;
        }
        Some(slot.day.index() as u32 * PERIODS_PER_DAY_BITS + period)
    }

    pub fn from_bit(bit: u32) -> Self {
        match bit {
            0..=63 => Self::new(1 << bit, 0),
            64..=127 => Self::new(0, 1 << (bit - 64)),
            _ => Self::EMPTY,
        }
    }

    pub fn from_slots<'a>(slots: impl IntoIterator<Item = &'a Slot>) -> Self {
        slots
            .into_iter()
            .filter_map(Self::slot_bit)
            .fold(Self::EMPTY, |acc, bit| acc | Self::from_bit(bit))
    }

    #[inline]
    pub fn intersects(&self, other: &TimeMask) -> bool {
        (self.lo & other.lo) != 0 || (self.hi & other.hi) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lo == 0 && self.hi == 0
    }

    pub fn count(&self) -> u32 {
        self.lo.count_ones() + self.hi.count_ones()
    }
}

impl BitOr for TimeMask {
    type Output = TimeMask;

    #[inline]
    fn bitor(self, rhs: TimeMask) -> TimeMask {
        TimeMask::new(self.lo | rhs.lo, self.hi | rhs.hi)
    }
}

impl BitOrAssign for TimeMask {
    #[inline]
    fn bitor_assign(&mut self, rhs: TimeMask) {
        self.lo |= rhs.lo;
        self.hi |= rhs.hi;
    }
}

impl BitAnd for TimeMask {
    type Output = TimeMask;

    #[inline]
    fn bitand(self, rhs: TimeMask) -> TimeMask {
        TimeMask::new(self.lo & rhs.lo, self.hi & rhs.hi)
    }
}

/// Union of the occupancy of every listed course found in the table.
pub fn occupied_masks<'i>(
    table: &CourseTable,
    ids: impl IntoIterator<Item = &'i CourseId>,
) -> TimeMask {
    ids.into_iter()
        .filter_map(|id| table.get(*id))
        .fold(TimeMask::EMPTY, |acc, course| acc | course.mask)
}

/// Parallel-array variant: `cids` is sorted ascending and indexes `mask_lo`/`mask_hi`.
/// Ids absent from `cids` are ignored.
pub fn occupied_masks_from_arrays(
    mask_lo: &[u64],
    mask_hi: &[u64],
    cids: &[CourseId],
    included: &[CourseId],
) -> TimeMask {
    let mut occupied = TimeMask::EMPTY;
    for id in included {
        if let Ok(i) = cids.binary_search(id) {
            occupied.lo |= mask_lo.get(i).copied().unwrap_or(0);
            occupied.hi |= mask_hi.get(i).copied().unwrap_or(0);
        }
    }
    occupied
}

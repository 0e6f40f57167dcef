use crate::data::{CourseId, CourseTable, Selection};
use crate::mask::TimeMask;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, AddAssign};

/// Priority rank given to ids with no favorite sequence.
pub const UNRANKED: u64 = 1_000_000_000_000;

/// Credit in thousandths, so sums are exact and ordering is total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Credit(pub i64);

impl Credit {
    pub const ZERO: Credit = Credit(0);

    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            Credit((value * 1000.0).round() as i64)
        } else {
            Credit::ZERO
        }
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Add for Credit {
    type Output = Credit;

    fn add(self, rhs: Credit) -> Credit {
        Credit(self.0 + rhs.0)
    }
}

impl AddAssign for Credit {
    fn add_assign(&mut self, rhs: Credit) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// An optional favorite the optimizer may add on top of the locked base.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: CourseId,
    pub credit: Credit,
    pub gened: u32,
    pub mask: TimeMask,
}

/// Favorites split into the forced base and the optional search space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePool {
    /// Sorted by credit descending, then id ascending.
    pub candidates: Vec<Candidate>,
    pub base_credit: Credit,
    pub base_gened: u32,
    /// Sorted ascending.
    pub locked_ids: Vec<CourseId>,
    pub base_mask: TimeMask,
}

impl CandidatePool {
    /// Nothing to optimize: no optional candidates and no locked favorites.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.locked_ids.is_empty()
    }
}

/// Splits `favorites ∩ included` into locked base and optional candidates.
///
/// An absent or empty table, or an empty favorite set, yields an empty pool.
pub fn build_candidates(
    table: Option<&CourseTable>,
    selection: &Selection,
    gened_department: &str,
) -> CandidatePool {
    let mut pool = CandidatePool::default();
    let Some(table) = table.filter(|t| !t.is_empty()) else {
        return pool;
    };
    if selection.favorites.is_empty() {
        return pool;
    }

    let target = selection.favorites.intersection(&selection.included);
    for course in table.fetch(target) {
        let credit = Credit::from_f64(course.credit_value());
        let gened = u32::from(course.department.trim() == gened_department);

        if selection.locked.contains(&course.id) {
            pool.base_credit += credit;
            pool.base_gened += gened;
            pool.base_mask |= course.mask;
            pool.locked_ids.push(course.id);
        } else {
            pool.candidates.push(Candidate {
                id: course.id,
                credit,
                gened,
                mask: course.mask,
            });
        }
    }

    pool.candidates
        .sort_by(|a, b| b.credit.cmp(&a.credit).then(a.id.cmp(&b.id)));
    pool.locked_ids.sort_unstable();

    debug!(
        "candidate pool: {} optional, {} locked, base credit {}",
        pool.candidates.len(),
        pool.locked_ids.len(),
        pool.base_credit
    );
    pool
}

/// Ranks favorites 1.. with locked ids first, then by favorite sequence, then id.
pub fn priority_ranks(selection: &Selection) -> HashMap<CourseId, u64> {
    let mut items: Vec<(bool, u64, CourseId)> = selection
        .favorites
        .iter()
        .map(|id| {
            let seq = selection.favorite_order.get(id).copied().unwrap_or(UNRANKED);
            (!selection.locked.contains(id), seq, *id)
        })
        .collect();
    items.sort_unstable();

    items
        .into_iter()
        .enumerate()
        .map(|(i, (_, _, id))| (id, i as u64 + 1))
        .collect()
}

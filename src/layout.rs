//! Lane layout of a course selection into a per-day, per-lane grid.
//!
//! Lanes come from a greedy colouring of the slot-sharing graph: courses with
//! more slots are coloured first, each takes the lowest lane not already used
//! at any of its slots.

use crate::data::{CourseId, CourseTable, Day, PERIODS, Slot};
use itertools::Itertools;
use log::trace;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Separator between labels of courses sharing one cell.
pub const CONFLICT_SEPARATOR: &str = "\n---\n";

/// Growable set of lane numbers, bit `n - 1` standing for lane `n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LaneBits(Vec<u64>);

impl LaneBits {
    fn union_with(&mut self, other: &LaneBits) {
        if self.0.len() < other.0.len() {
            self.0.resize(other.0.len(), 0);
        }
        for (word, o) in self.0.iter_mut().zip(&other.0) {
            *word |= o;
        }
    }

    fn insert(&mut self, lane: u32) {
        let bit = (lane - 1) as usize;
        let word = bit / 64;
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << (bit % 64);
    }

    fn lowest_free(&self) -> u32 {
        for (i, word) in self.0.iter().enumerate() {
            if *word != u64::MAX {
                return (i * 64) as u32 + word.trailing_ones() + 1;
            }
        }
        (self.0.len() * 64) as u32 + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneAssignment {
    pub lanes: BTreeMap<CourseId, u32>,
    pub max_lane: u32,
}

impl LaneAssignment {
    /// Lane of `id`; unknown ids and lane 0 both read as lane 1.
    pub fn lane_of(&self, id: CourseId) -> u32 {
        self.lanes.get(&id).copied().unwrap_or(1).max(1)
    }
}

/// Assigns every included course present in the table a lane starting at 1.
pub fn assign_lanes<'i>(
    table: &CourseTable,
    included: impl IntoIterator<Item = &'i CourseId>,
) -> LaneAssignment {
    let mut courses = table.fetch(included);
    courses.sort_by(|a, b| b.slots.len().cmp(&a.slots.len()).then(a.id.cmp(&b.id)));

    let mut used_by_slot: HashMap<Slot, LaneBits> = HashMap::new();
    let mut assignment = LaneAssignment {
        lanes: BTreeMap::new(),
        max_lane: 1,
    };

    for course in courses {
        if course.slots.is_empty() {
            assignment.lanes.insert(course.id, 1);
            continue;
        }

        let mut used = LaneBits::default();
        for slot in &course.slots {
            if let Some(bits) = used_by_slot.get(slot) {
                used.union_with(bits);
            }
        }
        let lane = used.lowest_free();
        trace!("course {} -> lane {}", course.id, lane);

        assignment.lanes.insert(course.id, lane);
        assignment.max_lane = assignment.max_lane.max(lane);
        for slot in &course.slots {
            used_by_slot.entry(*slot).or_default().insert(lane);
        }
    }

    assignment
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    /// First course placed into the cell.
    pub primary: Option<CourseId>,
    pub locked: bool,
}

/// The rendered grid: rows are periods, columns are day lanes laid out day by day.
#[derive(Debug, Clone, Default)]
pub struct Timetable {
    pub cells: Vec<Vec<Cell>>,
    pub conflicts: Vec<String>,
    pub day_lanes: Vec<(Day, u32)>,
    /// Index into the displayed days for every column.
    pub column_days: Vec<usize>,
    pub lanes: LaneAssignment,
}

impl Timetable {
    pub fn columns(&self) -> usize {
        self.column_days.len()
    }

    pub fn cell(&self, period: usize, column: usize) -> Option<&Cell> {
        self.cells.get(period).and_then(|row| row.get(column))
    }
}

/// Lays out the included courses over the displayed days.
///
/// Slots on days not shown are skipped. Cells receiving a second distinct
/// label record their slot as a conflict; the returned conflict list keeps
/// first-occurrence order without duplicates.
pub fn build_timetable(
    table: &CourseTable,
    included: &BTreeSet<CourseId>,
    locked: &BTreeSet<CourseId>,
    days: &[Day],
) -> Timetable {
    let lanes = assign_lanes(table, included);
    render_timetable(table, included, locked, days, lanes)
}

/// Renders with a precomputed lane map; courses missing from it use lane 1.
pub fn render_timetable(
    table: &CourseTable,
    included: &BTreeSet<CourseId>,
    locked: &BTreeSet<CourseId>,
    days: &[Day],
    lanes: LaneAssignment,
) -> Timetable {
    let courses = table.fetch(included);

    let mut day_lanes: BTreeMap<Day, u32> = days.iter().map(|d| (*d, 1)).collect();
    for course in &courses {
        let lane = lanes.lane_of(course.id);
        for slot in &course.slots {
            if let Some(max) = day_lanes.get_mut(&slot.day) {
                *max = (*max).max(lane);
            }
        }
    }

    let mut day_offset: HashMap<Day, usize> = HashMap::new();
    let mut column_days = Vec::new();
    for (day_idx, day) in days.iter().enumerate() {
        if day_offset.contains_key(day) {
            continue;
        }
        day_offset.insert(*day, column_days.len());
        column_days.extend(std::iter::repeat_n(day_idx, day_lanes[day] as usize));
    }

    let mut cells = vec![vec![Cell::default(); column_days.len()]; PERIODS.len()];
    let mut conflict_slots = Vec::new();

    for course in &courses {
        let lane = lanes.lane_of(course.id) as usize;
        let is_locked = locked.contains(&course.id);

        for slot in &course.slots {
            let (Some(offset), Some(_)) = (day_offset.get(&slot.day), slot.period_label()) else {
                continue;
            };
            let cell = &mut cells[slot.period as usize][offset + lane - 1];

            if cell.text.is_empty() {
                cell.text = course.label.clone();
            } else if !cell.text.contains(&course.label) {
                conflict_slots.push(slot.to_string());
                cell.text.push_str(CONFLICT_SEPARATOR);
                cell.text.push_str(&course.label);
            }
            if cell.primary.is_none() {
                cell.primary = Some(course.id);
            }
            cell.locked |= is_locked;
        }
    }

    let conflicts = conflict_slots.into_iter().unique().collect();

    Timetable {
        cells,
        conflicts,
        day_lanes: days
            .iter()
            .unique()
            .map(|d| (*d, day_lanes[d]))
            .collect(),
        column_days,
        lanes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Course;

    fn sample_table() -> CourseTable {
        CourseTable::new(vec![
            Course::new(10, "C1", Some(2.0), "", [Slot::new(Day::Mon, 0)]),
            Course::new(20, "C2", Some(2.0), "", [Slot::new(Day::Mon, 1)]),
            Course::new(30, "C3", Some(2.0), "", [Slot::new(Day::Mon, 0)]),
            Course::new(40, "C4", Some(2.0), "", [Slot::new(Day::Mon, 2)]),
        ])
    }

    #[test]
    fn conflicting_courses_get_distinct_lanes() {
        let table = sample_table();
        let lanes = assign_lanes(&table, &[10, 30]);
        assert_eq!(lanes.max_lane, 2);
        assert_eq!(lanes.lanes.len(), 2);
        assert_ne!(lanes.lanes[&10], lanes.lanes[&30]);
    }

    #[test]
    fn disjoint_courses_share_lane_one() {
        let table = sample_table();
        let lanes = assign_lanes(&table, &[10, 20]);
        assert_eq!(lanes.max_lane, 1);
        assert_eq!(lanes.lanes[&10], 1);
        assert_eq!(lanes.lanes[&20], 1);
    }

    #[test]
    fn course_without_slots_gets_lane_one() {
        let table = CourseTable::new(vec![
            Course::new(1, "Online", Some(1.0), "", []),
            Course::new(2, "A", Some(1.0), "", [Slot::new(Day::Tue, 3)]),
            Course::new(3, "B", Some(1.0), "", [Slot::new(Day::Tue, 3)]),
        ]);
        let lanes = assign_lanes(&table, &[1, 2, 3]);
        assert_eq!(lanes.lane_of(1), 1);
        assert_eq!(lanes.max_lane, 2);
    }

    #[test]
    fn more_slots_are_coloured_first() {
        // 2 has three slots and is coloured before 1 even though its id is larger.
        let table = CourseTable::new(vec![
            Course::new(1, "A", Some(1.0), "", [Slot::new(Day::Wed, 1)]),
            Course::new(
                2,
                "B",
                Some(1.0),
                "",
                [Slot::new(Day::Wed, 1), Slot::new(Day::Wed, 2), Slot::new(Day::Thu, 1)],
            ),
        ]);
        let lanes = assign_lanes(&table, &[1, 2]);
        assert_eq!(lanes.lane_of(2), 1);
        assert_eq!(lanes.lane_of(1), 2);
    }

    #[test]
    fn lanes_stay_distinct_across_many_overlaps() {
        let courses = (1..=70)
            .map(|id| Course::new(id, format!("X{id}"), Some(1.0), "", [Slot::new(Day::Fri, 5)]))
            .collect();
        let table = CourseTable::new(courses);
        let ids: Vec<CourseId> = (1..=70).collect();
        let lanes = assign_lanes(&table, &ids);
        let distinct: BTreeSet<u32> = lanes.lanes.values().copied().collect();
        assert_eq!(distinct.len(), 70);
        assert_eq!(lanes.max_lane, 70);
    }

    #[test]
    fn timetable_places_side_by_side_lanes() {
        let table = sample_table();
        let included: BTreeSet<CourseId> = [10, 20, 30].into();
        let locked: BTreeSet<CourseId> = [30].into();
        let tt = build_timetable(&table, &included, &locked, &[Day::Mon, Day::Tue]);

        assert_eq!(tt.day_lanes, vec![(Day::Mon, 2), (Day::Tue, 1)]);
        assert_eq!(tt.column_days, vec![0, 0, 1]);
        assert_eq!(tt.cell(0, 0).unwrap().primary, Some(10));
        assert_eq!(tt.cell(0, 1).unwrap().primary, Some(30));
        assert!(tt.cell(0, 1).unwrap().locked);
        assert!(!tt.cell(0, 0).unwrap().locked);
        assert_eq!(tt.cell(1, 0).unwrap().text, "C2\n0020");
        assert!(tt.conflicts.is_empty());
    }

    #[test]
    fn timetable_hides_days_not_shown() {
        let table = sample_table();
        let included: BTreeSet<CourseId> = [10, 30].into();
        let tt = build_timetable(&table, &included, &BTreeSet::new(), &[Day::Tue]);
        assert_eq!(tt.columns(), 1);
        assert!(tt.cells.iter().flatten().all(|c| c.text.is_empty()));
    }

    #[test]
    fn shared_lane_records_conflicts_once_in_order() {
        let table = CourseTable::new(vec![
            Course::new(1, "A", Some(1.0), "", [Slot::new(Day::Tue, 4), Slot::new(Day::Mon, 2)]),
            Course::new(2, "B", Some(1.0), "", [Slot::new(Day::Mon, 2), Slot::new(Day::Tue, 4)]),
            Course::new(3, "C", Some(1.0), "", [Slot::new(Day::Mon, 2)]),
        ]);
        let included: BTreeSet<CourseId> = [1, 2, 3].into();
        // A stale lane map that puts everything in lane 1.
        let lanes = LaneAssignment::default();
        let tt = render_timetable(&table, &included, &[2].into(), &[Day::Mon, Day::Tue], lanes);

        assert_eq!(tt.conflicts, vec!["Monday period 2", "Tuesday period 4"]);
        let cell = tt.cell(2, 0).unwrap();
        assert_eq!(cell.text, "A\n0001\n---\nB\n0002\n---\nC\n0003");
        assert_eq!(cell.primary, Some(1));
        assert!(cell.locked);
    }

    #[test]
    fn lane_zero_renders_in_the_first_lane() {
        let table = sample_table();
        let included: BTreeSet<CourseId> = [10, 20].into();
        let lanes = LaneAssignment {
            lanes: [(10, 0), (20, 1)].into(),
            max_lane: 1,
        };
        let tt = render_timetable(&table, &included, &BTreeSet::new(), &[Day::Mon], lanes);
        assert_eq!(tt.columns(), 1);
        assert_eq!(tt.cell(0, 0).unwrap().primary, Some(10));
        assert_eq!(tt.cell(1, 0).unwrap().primary, Some(20));
    }
}

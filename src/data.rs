use crate::mask::TimeMask;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

// Type aliases for clarity
pub type CourseId = u32;
pub type PeriodIndex = u8;
pub type FavoriteSeq = u64;

/// Period labels of one day, top to bottom.
pub const PERIODS: [&str; 15] = [
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "A", "B", "C", "D",
];

/// A weekday of the timetable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Day {
    pub const ALL: [Day; 7] = [
        Day::Mon,
        Day::Tue,
        Day::Wed,
        Day::Thu,
        Day::Fri,
        Day::Sat,
        Day::Sun,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Day::Mon => "Monday",
            Day::Tue => "Tuesday",
            Day::Wed => "Wednesday",
            Day::Thu => "Thursday",
            Day::Fri => "Friday",
            Day::Sat => "Saturday",
            Day::Sun => "Sunday",
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One (day, period) cell of the weekly timetable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Slot {
    pub day: Day,
    pub period: PeriodIndex,
}

impl Slot {
    pub fn new(day: Day, period: PeriodIndex) -> Self {
        Self { day, period }
    }

    /// Label of the period, `None` when the index is outside the day.
    pub fn period_label(&self) -> Option<&'static str> {
        PERIODS.get(self.period as usize).copied()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period_label() {
            Some(label) => write!(f, "{} period {}", self.day, label),
            None => write!(f, "{} period #{}", self.day, self.period),
        }
    }
}

/// Course as it arrives from the catalog, before derived fields are computed.
#[derive(Debug, Clone, Deserialize)]
pub struct CourseRecord {
    pub id: CourseId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub credit: Option<f64>,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub slots: Vec<Slot>,
}

/// An immutable catalog course with its derived occupancy mask and label.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(from = "CourseRecord")]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    pub credit: Option<f64>,
    pub department: String,
    pub slots: BTreeSet<Slot>,
    pub mask: TimeMask,
    pub label: String,
}

impl From<CourseRecord> for Course {
    fn from(record: CourseRecord) -> Self {
        let slots: BTreeSet<Slot> = record.slots.into_iter().collect();
        let mask = TimeMask::from_slots(slots.iter());
        let label = timetable_label(&record.name, record.id);
        Course {
            id: record.id,
            name: record.name,
            credit: record.credit,
            department: record.department,
            slots,
            mask,
            label,
        }
    }
}

impl Course {
    pub fn new(
        id: CourseId,
        name: impl Into<String>,
        credit: Option<f64>,
        department: impl Into<String>,
        slots: impl IntoIterator<Item = Slot>,
    ) -> Self {
        CourseRecord {
            id,
            name: name.into(),
            credit,
            department: department.into(),
            slots: slots.into_iter().collect(),
        }
        .into()
    }

    /// Credit value with missing, NaN and negative entries read as zero.
    pub fn credit_value(&self) -> f64 {
        match self.credit {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => 0.0,
        }
    }
}

/// Strips bracketed annotations from a course name and appends the padded id.
fn timetable_label(name: &str, id: CourseId) -> String {
    let mut depth = 0usize;
    let mut shown = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        match ch {
            '(' | '[' | '（' | '【' => depth += 1,
            ')' | ']' | '）' | '】' => depth = depth.saturating_sub(1),
            _ if depth == 0 => shown.push(ch),
            _ => {}
        }
    }
    format!("{}\n{:04}", shown.trim(), id).trim().to_string()
}

/// Read-only course catalog ordered by id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CourseTable {
    courses: Vec<Course>,
}

impl CourseTable {
    /// Builds the table, sorting by id. Later duplicates of an id are dropped.
    pub fn new(mut courses: Vec<Course>) -> Self {
        courses.sort_by_key(|c| c.id);
        courses.dedup_by_key(|c| c.id);
        Self { courses }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let courses: Vec<Course> = serde_json::from_str(json)?;
        Ok(Self::new(courses))
    }

    pub fn len(&self) -> usize {
        self.courses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.is_empty()
    }

    pub fn courses(&self) -> &[Course] {
        &self.courses
    }

    /// Binary search by id.
    pub fn get(&self, id: CourseId) -> Option<&Course> {
        self.courses
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|i| &self.courses[i])
    }

    /// Courses of `ids` present in the table, in table (id) order.
    pub fn fetch<'i, I>(&self, ids: I) -> Vec<&Course>
    where
        I: IntoIterator<Item = &'i CourseId>,
    {
        let wanted: BTreeSet<CourseId> = ids.into_iter().copied().collect();
        wanted.into_iter().filter_map(|id| self.get(id)).collect()
    }
}

/// The caller's current selection, copied into each unit of work.
///
/// `locked` is expected to be a subset of `included`; nothing here enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Selection {
    pub included: BTreeSet<CourseId>,
    pub locked: BTreeSet<CourseId>,
    pub favorites: BTreeSet<CourseId>,
    pub favorite_order: HashMap<CourseId, FavoriteSeq>,
}

impl Selection {
    /// Marks `id` as favorite, giving it the next sequence number if it has none yet.
    pub fn add_favorite(&mut self, id: CourseId) {
        let next = self.favorite_order.values().max().map_or(0, |m| m + 1);
        self.favorites.insert(id);
        self.favorite_order.entry(id).or_insert(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_drops_bracketed_text_and_pads_id() {
        let course = Course::new(42, "Calculus (I) [English]", Some(3.0), "Math", []);
        assert_eq!(course.label, "Calculus\n0042");
    }

    #[test]
    fn invalid_credit_reads_as_zero() {
        let nan = Course::new(1, "A", Some(f64::NAN), "", []);
        let missing = Course::new(2, "B", None, "", []);
        let negative = Course::new(3, "C", Some(-2.0), "", []);
        assert_eq!(nan.credit_value(), 0.0);
        assert_eq!(missing.credit_value(), 0.0);
        assert_eq!(negative.credit_value(), 0.0);
    }

    #[test]
    fn table_is_sorted_and_searchable() {
        let table = CourseTable::new(vec![
            Course::new(30, "C", Some(1.0), "", []),
            Course::new(10, "A", Some(1.0), "", []),
            Course::new(20, "B", Some(1.0), "", []),
        ]);
        let ids: Vec<CourseId> = table.courses().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(table.get(20).map(|c| c.name.as_str()), Some("B"));
        assert!(table.get(99).is_none());
        let fetched: Vec<CourseId> = table.fetch(&[30, 99, 10]).iter().map(|c| c.id).collect();
        assert_eq!(fetched, vec![10, 30]);
    }

    #[test]
    fn course_deserializes_with_derived_mask() {
        let json = r#"[{"id": 7, "name": "Physics", "credit": 2.5, "department": "Science",
                        "slots": [{"day": "Tue", "period": 1}, {"day": "Mon", "period": 0}]}]"#;
        let table = CourseTable::from_json(json).unwrap();
        let course = table.get(7).unwrap();
        assert_eq!(course.slots.len(), 2);
        assert_eq!(course.mask, TimeMask::new(1 | (1 << 17), 0));
    }

    #[test]
    fn add_favorite_keeps_first_sequence() {
        let mut selection = Selection::default();
        selection.add_favorite(5);
        selection.add_favorite(3);
        selection.add_favorite(5);
        assert_eq!(selection.favorite_order[&5], 0);
        assert_eq!(selection.favorite_order[&3], 1);
    }
}

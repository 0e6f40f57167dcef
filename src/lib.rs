//! Conflict-free weekly timetables and best-schedule search over a course catalog.

pub mod cancel;
pub mod candidates;
pub mod config;
pub mod data;
pub mod error;
pub mod layout;
pub mod mask;
pub mod materialize;
pub mod solver;
pub mod worker;

pub use cancel::{CancelToken, Cancelled, Progress};
pub use config::{EngineConfig, SearchConfig, StrategyKind};
pub use data::{Course, CourseId, CourseTable, Day, Selection, Slot};
pub use error::{EngineError, EngineResult};
pub use mask::TimeMask;
pub use solver::{ScheduleResult, find_best_schedules};
pub use worker::{BestScheduleJob, Completion, Notification, SaveJob, TaskHost};

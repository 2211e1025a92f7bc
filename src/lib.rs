pub mod calendar;
pub mod export;
pub mod storage;

pub use calendar::{Agenda, Happening, OccurrenceOverride, RecurrenceRule, build_agenda, build_series_view};
pub use storage::{Config, Feed, Store};

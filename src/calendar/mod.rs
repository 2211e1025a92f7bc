pub mod agenda;
pub mod dedup;
pub mod event;
pub mod occurrence;
pub mod overrides;
pub mod recurrence;
pub mod time_of_day;

pub use agenda::{Agenda, AgendaOptions, SeriesRow, UnscheduledHappening, build_agenda, build_series_view};
pub use dedup::{DedupOutcome, dedupe_by_title, normalize_title};
pub use event::{Happening, HappeningStatus};
pub use occurrence::{
    DateWindow, MAX_WINDOW_DAYS, Occurrence, OccurrenceStatus, ScheduleError, expand, next_active_occurrence,
    next_occurrence,
};
pub use overrides::{OccurrenceOverride, OverrideIndex, OverrideKey, apply_override};
pub use recurrence::{
    Confidence, Nth, RecurrenceParseError, RecurrenceRule, Schedule, parse_recurrence_text, resolve_schedule,
};
pub use time_of_day::{TimeFormat, format_time_of_day, parse_time_of_day};

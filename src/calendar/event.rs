use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::recurrence::{RecurrenceRule, resolve_schedule};
use crate::calendar::time_of_day::parse_time_of_day;

/// A venue listing's event record, one-time or recurring.
///
/// The schedule can be described several ways at once: a structured rule,
/// the free text admins typed, a bare day-of-week column or a single date.
/// [`resolve_schedule`] decides which one wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Happening {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub recurrence_text: Option<String>,
    #[serde(default)]
    pub day_of_week: Option<String>,
    #[serde(default)]
    pub event_date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub series_start: Option<NaiveDate>,
    #[serde(default)]
    pub series_end: Option<NaiveDate>,
    #[serde(default)]
    pub status: HappeningStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HappeningStatus {
    #[default]
    Active,
    Cancelled,
}

impl Happening {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            venue: None,
            recurrence: None,
            recurrence_text: None,
            day_of_week: None,
            event_date: None,
            start_time: None,
            end_time: None,
            series_start: None,
            series_end: None,
            status: HappeningStatus::Active,
            updated_at: DateTime::<Utc>::default(),
        }
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn with_rule(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence = Some(rule);
        self
    }

    pub fn with_recurrence_text(mut self, text: impl Into<String>) -> Self {
        self.recurrence_text = Some(text.into());
        self
    }

    pub fn with_day_of_week(mut self, day: impl Into<String>) -> Self {
        self.day_of_week = Some(day.into());
        self
    }

    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.event_date = Some(date);
        self
    }

    pub fn with_times(mut self, start: &str, end: Option<&str>) -> Self {
        self.start_time = Some(start.to_string());
        self.end_time = end.map(str::to_string);
        self
    }

    pub fn between(mut self, series_start: Option<NaiveDate>, series_end: Option<NaiveDate>) -> Self {
        self.series_start = series_start;
        self.series_end = series_end;
        self
    }

    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    pub fn start_time_of_day(&self) -> Option<NaiveTime> {
        parse_field_time(&self.id, "start_time", self.start_time.as_deref())
    }

    pub fn end_time_of_day(&self) -> Option<NaiveTime> {
        parse_field_time(&self.id, "end_time", self.end_time.as_deref())
    }

    pub fn is_recurring(&self) -> bool {
        match resolve_schedule(self).rule() {
            Some(RecurrenceRule::Once { .. }) => false,
            Some(_) => true,
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == HappeningStatus::Cancelled
    }
}

fn parse_field_time(id: &str, field: &str, raw: Option<&str>) -> Option<NaiveTime> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = parse_time_of_day(raw);
    if parsed.is_none() {
        tracing::warn!("Happening {} has unreadable {} {:?}, treating as unknown", id, field, raw);
    }
    parsed
}

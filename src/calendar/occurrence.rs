use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::dedup::normalize_title;
use crate::calendar::event::Happening;
use crate::calendar::overrides::OverrideIndex;
use crate::calendar::recurrence::{Confidence, RecurrenceRule, Schedule, resolve_schedule};

/// Upper bound on expansion windows and on next-occurrence searches.
pub const MAX_WINDOW_DAYS: i64 = 732;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Window ends ({end}) before it starts ({start})")]
    InvertedWindow { start: NaiveDate, end: NaiveDate },
    #[error("Window of {0} days exceeds the 732 day limit")]
    WindowTooLarge(i64),
    #[error("Date out of range")]
    OutOfRange,
}

/// Inclusive date range used for expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ScheduleError> {
        if end < start {
            return Err(ScheduleError::InvertedWindow { start, end });
        }
        let window = Self { start, end };
        if window.days() > MAX_WINDOW_DAYS {
            return Err(ScheduleError::WindowTooLarge(window.days()));
        }
        Ok(window)
    }

    /// The window from `start` through `days` days later.
    pub fn starting(start: NaiveDate, days: u32) -> Result<Self, ScheduleError> {
        let end = start
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or(ScheduleError::OutOfRange)?;
        Self::new(start, end)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    Scheduled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub happening_id: String,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub venue: Option<String>,
    pub notes: Option<String>,
    pub status: OccurrenceStatus,
    pub confidence: Confidence,
    pub override_id: Option<String>,
}

impl Occurrence {
    /// Date, then start time with untimed occurrences last, then title and id.
    pub fn sort_key(&self) -> (NaiveDate, bool, Option<NaiveTime>, String, &str) {
        (
            self.date,
            self.start_time.is_none(),
            self.start_time,
            normalize_title(&self.title),
            self.happening_id.as_str(),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OccurrenceStatus::Cancelled
    }
}

pub fn sort_occurrences(occurrences: &mut [Occurrence]) {
    occurrences.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Concrete occurrences of `happening` inside `window`, clamped to the
/// series bounds. Overrides are not applied here.
pub fn expand(happening: &Happening, schedule: &Schedule, window: &DateWindow) -> Vec<Occurrence> {
    let Schedule::Known { rule, confidence } = schedule else {
        return Vec::new();
    };

    let start = happening.series_start.map_or(window.start, |s| s.max(window.start));
    let end = happening.series_end.map_or(window.end, |e| e.min(window.end));
    if start > end {
        return Vec::new();
    }

    let status = if happening.is_cancelled() {
        OccurrenceStatus::Cancelled
    } else {
        OccurrenceStatus::Scheduled
    };
    let start_time = happening.start_time_of_day();
    let end_time = happening.end_time_of_day();

    rule.dates_between(start, end)
        .into_iter()
        .map(|date| Occurrence {
            happening_id: happening.id.clone(),
            title: happening.title.clone(),
            date,
            start_time,
            end_time,
            venue: happening.venue.clone(),
            notes: None,
            status,
            confidence: *confidence,
            override_id: None,
        })
        .collect()
}

/// The first date on or after `from` the happening's rule produces, inside
/// its series bounds. Cancelled series have none.
pub fn next_occurrence(happening: &Happening, from: NaiveDate) -> Option<NaiveDate> {
    let schedule = resolve_schedule(happening);
    next_scheduled(happening, schedule.rule()?, from)
}

/// Like [`next_occurrence`], skipping dates an override cancels.
pub fn next_active_occurrence(
    happening: &Happening,
    overrides: &OverrideIndex,
    from: NaiveDate,
) -> Option<NaiveDate> {
    let schedule = resolve_schedule(happening);
    let rule = schedule.rule()?;
    let limit = from.checked_add_days(Days::new(MAX_WINDOW_DAYS as u64))?;
    let mut cursor = from;
    while let Some(date) = next_scheduled(happening, rule, cursor) {
        if date > limit {
            return None;
        }
        let cancelled = overrides
            .get(&happening.id, date)
            .is_some_and(|o| o.cancelled);
        if !cancelled {
            return Some(date);
        }
        tracing::debug!("Skipping cancelled occurrence of {} on {}", happening.id, date);
        cursor = date.succ_opt()?;
    }
    None
}

fn next_scheduled(happening: &Happening, rule: &RecurrenceRule, from: NaiveDate) -> Option<NaiveDate> {
    if happening.is_cancelled() {
        return None;
    }
    let from = happening.series_start.map_or(from, |s| s.max(from));
    let date = rule.next_on_or_after(from)?;
    match happening.series_end {
        Some(end) if date > end => None,
        _ => Some(date),
    }
}

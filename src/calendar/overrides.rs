use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::occurrence::{Occurrence, OccurrenceStatus};
use crate::calendar::time_of_day::parse_time_of_day;

/// An admin-authored exception for one happening on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceOverride {
    pub id: String,
    pub happening_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OverrideKey {
    pub happening_id: String,
    pub date: NaiveDate,
}

impl OccurrenceOverride {
    pub fn new(id: impl Into<String>, happening_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            happening_id: happening_id.into(),
            date,
            cancelled: false,
            start_time: None,
            end_time: None,
            venue: None,
            notes: None,
            updated_at: DateTime::<Utc>::default(),
        }
    }

    pub fn cancel(mut self) -> Self {
        self.cancelled = true;
        self
    }

    pub fn with_times(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start_time = start.map(str::to_string);
        self.end_time = end.map(str::to_string);
        self
    }

    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn updated(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    pub fn key(&self) -> OverrideKey {
        OverrideKey {
            happening_id: self.happening_id.clone(),
            date: self.date,
        }
    }

    /// Newest edit wins; equal timestamps fall back to the larger id.
    fn supersedes(&self, other: &OccurrenceOverride) -> bool {
        (self.updated_at, &self.id) > (other.updated_at, &other.id)
    }
}

/// The effective override per exact (happening, date) key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideIndex {
    by_key: HashMap<OverrideKey, OccurrenceOverride>,
}

impl OverrideIndex {
    pub fn build(overrides: impl IntoIterator<Item = OccurrenceOverride>) -> Self {
        let mut index = Self::default();
        for item in overrides {
            index.insert(item);
        }
        index
    }

    /// Returns true when `item` became the effective override for its key.
    pub fn insert(&mut self, item: OccurrenceOverride) -> bool {
        let key = item.key();
        match self.by_key.get(&key) {
            Some(existing) if !item.supersedes(existing) => {
                tracing::debug!(
                    "Override {} for {} on {} shadowed by {}",
                    item.id,
                    key.happening_id,
                    key.date,
                    existing.id
                );
                false
            }
            _ => {
                self.by_key.insert(key, item);
                true
            }
        }
    }

    pub fn get(&self, happening_id: &str, date: NaiveDate) -> Option<&OccurrenceOverride> {
        self.by_key.get(&OverrideKey {
            happening_id: happening_id.to_string(),
            date,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &OverrideKey> {
        self.by_key.keys()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Moves overrides of merged-away records onto the surviving record.
    pub fn remap(self, aliases: &BTreeMap<String, String>) -> Self {
        if aliases.is_empty() {
            return self;
        }
        Self::build(self.by_key.into_values().map(|mut item| {
            if let Some(target) = aliases.get(&item.happening_id) {
                item.happening_id = target.clone();
            }
            item
        }))
    }
}

/// Layers `item` over `occurrence`. Fields the override sets replace the
/// base values; applying the same override again changes nothing.
pub fn apply_override(occurrence: &Occurrence, item: &OccurrenceOverride) -> Occurrence {
    let mut merged = occurrence.clone();

    if item.cancelled {
        merged.status = OccurrenceStatus::Cancelled;
    }

    if let Some(time) = override_time(item, "start_time", item.start_time.as_deref()) {
        merged.start_time = Some(time);
    }
    if let Some(time) = override_time(item, "end_time", item.end_time.as_deref()) {
        merged.end_time = Some(time);
    }

    if let Some(venue) = non_blank(item.venue.as_deref()) {
        merged.venue = Some(venue.to_string());
    }
    if let Some(notes) = non_blank(item.notes.as_deref()) {
        merged.notes = Some(notes.to_string());
    }

    merged.override_id = Some(item.id.clone());
    merged
}

fn override_time(item: &OccurrenceOverride, field: &str, raw: Option<&str>) -> Option<chrono::NaiveTime> {
    let raw = non_blank(raw)?;
    let parsed = parse_time_of_day(raw);
    if parsed.is_none() {
        tracing::warn!("Override {} has unreadable {} {:?}, keeping base time", item.id, field, raw);
    }
    parsed
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

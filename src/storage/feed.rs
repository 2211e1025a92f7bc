use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::{Happening, OccurrenceOverride};
use crate::storage::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Failed to read feed: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid feed JSON: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Duplicate {kind} id in feed: {id}")]
    DuplicateId { kind: &'static str, id: String },
}

/// Import/export document: every happening and override in one JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub happenings: Vec<Happening>,
    #[serde(default)]
    pub overrides: Vec<OccurrenceOverride>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub happenings: usize,
    pub overrides: usize,
}

impl Feed {
    pub fn from_json(content: &str) -> Result<Self, FeedError> {
        let feed: Feed = serde_json::from_str(content)?;
        feed.check_unique_ids()?;
        Ok(feed)
    }

    pub fn to_json_pretty(&self) -> Result<String, FeedError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, FeedError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), FeedError> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn from_store(store: &Store) -> Result<Self, FeedError> {
        Ok(Self {
            happenings: store.list_happenings()?,
            overrides: store.list_overrides()?,
        })
    }

    /// Upserts every record; existing rows with the same id are replaced.
    pub fn import_into(&self, store: &Store) -> Result<ImportSummary, FeedError> {
        for happening in &self.happenings {
            store.upsert_happening(happening)?;
        }
        for item in &self.overrides {
            store.upsert_override(item)?;
        }
        tracing::info!(
            "Imported {} happenings and {} overrides",
            self.happenings.len(),
            self.overrides.len()
        );
        Ok(ImportSummary {
            happenings: self.happenings.len(),
            overrides: self.overrides.len(),
        })
    }

    fn check_unique_ids(&self) -> Result<(), FeedError> {
        let mut seen = std::collections::HashSet::new();
        for happening in &self.happenings {
            if !seen.insert(happening.id.as_str()) {
                return Err(FeedError::DuplicateId { kind: "happening", id: happening.id.clone() });
            }
        }
        seen.clear();
        for item in &self.overrides {
            if !seen.insert(item.id.as_str()) {
                return Err(FeedError::DuplicateId { kind: "override", id: item.id.clone() });
            }
        }
        Ok(())
    }
}

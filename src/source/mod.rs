//! Pre-parsed character data from outside the image.
//!
//! A [`CharacterDataSource`] is consulted before the image bytes are
//! searched.  Records it returns go through the same normalizer as extracted
//! payloads (see [`crate::normalize::normalize_external`]).

#[cfg(feature = "backyard-db")]
pub mod sqlite;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[cfg(feature = "backyard-db")]
pub use sqlite::BackyardDb;

#[derive(Error, Debug)]
pub enum SourceError {
    #[cfg(feature = "backyard-db")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Data source unavailable: {0}")]
    Unavailable(String),
}

/// Character fields as an external store keeps them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub name:             Option<String>,
    pub display_name:     Option<String>,
    pub persona:          Option<String>,
    pub scenario:         Option<String>,
    pub greeting:         Option<String>,
    pub example_dialogue: Option<String>,
    pub lorebook:         IndexMap<String, String>,
    /// Avatar image, when the store knows one.
    pub image_path:       Option<PathBuf>,
}

impl RawRecord {
    /// The flat BackyardAI JSON shape for this record.  Absent and empty
    /// fields are left out, so an empty name falls through to the display
    /// name.
    pub fn to_backyard_json(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        let fields = [
            ("aiName", &self.name),
            ("aiDisplayName", &self.display_name),
            ("aiPersona", &self.persona),
            ("scenario", &self.scenario),
            ("firstMessage", &self.greeting),
            ("customDialogue", &self.example_dialogue),
        ];
        for (key, value) in fields {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                obj.insert(key.to_owned(), Value::String(value.to_owned()));
            }
        }
        if !self.lorebook.is_empty() {
            let items = self
                .lorebook
                .iter()
                .map(|(key, value)| json!({ "key": key, "value": value }))
                .collect();
            obj.insert("loreItems".to_owned(), Value::Array(items));
        }
        obj
    }
}

/// Lookup capability injected into the converter.
pub trait CharacterDataSource: Send + Sync {
    /// Find a record for an image by its file name (no directory part).
    fn lookup(&self, filename: &str) -> Result<Option<RawRecord>, SourceError>;
}

/// Source that never has anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSource;

impl CharacterDataSource for NoSource {
    fn lookup(&self, _filename: &str) -> Result<Option<RawRecord>, SourceError> {
        Ok(None)
    }
}

/// In-memory source keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: HashMap<String, RawRecord>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, filename: impl Into<String>, record: RawRecord) {
        self.records.insert(filename.into(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CharacterDataSource for MemorySource {
    fn lookup(&self, filename: &str) -> Result<Option<RawRecord>, SourceError> {
        Ok(self.records.get(filename).cloned())
    }
}

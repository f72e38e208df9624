//! Metadata locator: find the character payload in a PNG, however it was
//! embedded.
//!
//! # Strategies
//!
//! Tried in this fixed order; the first one that yields a JSON object wins.
//!
//! | # | Strategy           | Where it looks                                   | Repair |
//! |---|--------------------|--------------------------------------------------|--------|
//! | 1 | `StandardChunk`    | `tEXt` chunk with the reserved keyword           | none   |
//! | 2 | `ExifMarkerScan`   | `eXIf` chunk payload after `ASCII`               | yes    |
//! | 3 | `LegacyMarkerScan` | whole file, `ASCII` .. `IDATx`                   | yes    |
//! | 4 | `RawMarkerScan`    | latin-1 text of the whole file, `ASCII` .. `IDATx`/`Q==` | yes |
//!
//! Strategies 1 and 2 need a parseable chunk stream; 3 and 4 work on the raw
//! bytes and still run when the signature is missing.  Every failure inside a
//! strategy is logged at debug level and only reported back as part of
//! [`LocateError::ExtractionFailed`] once all four are exhausted.

pub mod scan;

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::chunk::{self, Chunk, ChunkError, ChunkType};
use crate::repair::{self, b64, boundary, Base64Error, JsonBoundaryError};

/// Reserved `tEXt` keyword used by Tavern-style cards.
pub const DEFAULT_KEYWORD: &str = "chara";

// ── Strategy ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StandardChunk,
    ExifMarkerScan,
    LegacyMarkerScan,
    RawMarkerScan,
}

impl Strategy {
    /// Priority order.
    pub const ALL: [Strategy; 4] = [
        Strategy::StandardChunk,
        Strategy::ExifMarkerScan,
        Strategy::LegacyMarkerScan,
        Strategy::RawMarkerScan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::StandardChunk    => "standard chunk",
            Strategy::ExifMarkerScan   => "EXIF marker scan",
            Strategy::LegacyMarkerScan => "legacy marker scan",
            Strategy::RawMarkerScan    => "raw marker scan",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Why a single strategy found nothing.  Never fatal on its own.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("container unreadable: {0}")]
    Container(String),
    #[error("no {0} chunk")]
    NoChunk(&'static str),
    #[error("marker not found")]
    NoMarker,
    #[error("{0}")]
    Base64(#[from] Base64Error),
    #[error("payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("{0}")]
    Json(#[from] JsonBoundaryError),
}

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("Extraction failed: {}", summarize(.attempts))]
    ExtractionFailed { attempts: Vec<(Strategy, StrategyError)> },
}

fn summarize(attempts: &[(Strategy, StrategyError)]) -> String {
    attempts
        .iter()
        .map(|(s, e)| format!("{s}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Decoded text produced by one strategy, before JSON parsing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub strategy: Strategy,
    pub text:     String,
}

/// A successfully located payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub strategy: Strategy,
    pub object:   Map<String, Value>,
}

impl Extraction {
    pub fn into_value(self) -> Value {
        Value::Object(self.object)
    }
}

// ── Locator ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MetadataLocator {
    keyword: String,
}

impl Default for MetadataLocator {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORD)
    }
}

impl MetadataLocator {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self { keyword: keyword.into() }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Run every strategy in priority order and return the first object.
    pub fn locate(&self, bytes: &[u8]) -> Result<Extraction, LocateError> {
        let chunks = chunk::parse(bytes);
        let mut attempts = Vec::new();

        for strategy in Strategy::ALL {
            match self.attempt(strategy, bytes, chunks.as_deref()) {
                Ok(object) => {
                    debug!(%strategy, "payload located");
                    return Ok(Extraction { strategy, object });
                }
                Err(e) => {
                    debug!(%strategy, error = %e, "strategy found nothing");
                    attempts.push((strategy, e));
                }
            }
        }
        Err(LocateError::ExtractionFailed { attempts })
    }

    /// Run one strategy in isolation.
    pub fn try_strategy(
        &self,
        strategy: Strategy,
        bytes: &[u8],
    ) -> Result<Map<String, Value>, StrategyError> {
        let chunks = chunk::parse(bytes);
        self.attempt(strategy, bytes, chunks.as_deref())
    }

    /// Decoded text for one strategy, without JSON parsing.
    pub fn candidate(
        &self,
        strategy: Strategy,
        bytes: &[u8],
    ) -> Result<Candidate, StrategyError> {
        let chunks = chunk::parse(bytes);
        let text = self.decode(strategy, bytes, chunks.as_deref())?;
        Ok(Candidate { strategy, text })
    }

    fn attempt(
        &self,
        strategy: Strategy,
        bytes: &[u8],
        chunks: Result<&[Chunk], &ChunkError>,
    ) -> Result<Map<String, Value>, StrategyError> {
        let text = self.decode(strategy, bytes, chunks)?;
        match strategy {
            Strategy::StandardChunk => standard_object(&text),
            _ => Ok(boundary::extract_value(&text)?),
        }
    }

    fn decode(
        &self,
        strategy: Strategy,
        bytes: &[u8],
        chunks: Result<&[Chunk], &ChunkError>,
    ) -> Result<String, StrategyError> {
        match strategy {
            Strategy::StandardChunk => {
                let chunks = chunks.map_err(|e| StrategyError::Container(e.to_string()))?;
                let text = chunks
                    .iter()
                    .filter(|c| c.is_text_keyword(&self.keyword))
                    .find_map(|c| c.text_fields().map(|(_, text)| text))
                    .ok_or(StrategyError::NoChunk("tEXt"))?;
                Ok(String::from_utf8(b64::decode_strict(text)?)?)
            }
            Strategy::ExifMarkerScan => {
                let chunks = chunks.map_err(|e| StrategyError::Container(e.to_string()))?;
                let mut exif = chunks.iter().filter(|c| c.chunk_type == ChunkType::EXIF).peekable();
                if exif.peek().is_none() {
                    return Err(StrategyError::NoChunk("eXIf"));
                }
                // First eXIf chunk carrying a marker wins.
                let run = exif
                    .find_map(|c| scan::exif_run(&c.payload))
                    .ok_or(StrategyError::NoMarker)?;
                let cleaned = scan::clean_exif_run(run);
                Ok(lossy(b64::decode(&b64::pad(&cleaned))?))
            }
            Strategy::LegacyMarkerScan => {
                let run = scan::between_markers(bytes).ok_or(StrategyError::NoMarker)?;
                Ok(lossy(b64::decode_repaired(run)?))
            }
            Strategy::RawMarkerScan => {
                let text = repair::latin1(bytes);
                let run = scan::between_markers_text(&text).ok_or(StrategyError::NoMarker)?;
                let cleaned = b64::clean(run.as_bytes());
                Ok(lossy(b64::decode(b64::trim_to_quantum(&cleaned))?))
            }
        }
    }
}

/// Well-formed producers store exactly one JSON object; no boundary repair.
fn standard_object(text: &str) -> Result<Map<String, Value>, StrategyError> {
    match serde_json::from_str::<Value>(text).map_err(JsonBoundaryError::Parse)? {
        Value::Object(map) => Ok(map),
        _ => Err(StrategyError::Json(JsonBoundaryError::NotFound)),
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Convenience wrapper using the default keyword.
pub fn locate(bytes: &[u8]) -> Result<Extraction, LocateError> {
    MetadataLocator::default().locate(bytes)
}

//! Card writer: re-embed a canonical record into a PNG and render the JSON
//! sidecar.
//!
//! The embedded payload is the compact JSON of [`TavernCard`], base64
//! encoded, in one `tEXt` chunk placed immediately before `IEND`.  Every
//! other chunk is copied through untouched.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::card::{CanonicalCharacterRecord, TavernCard};
use crate::chunk::{self, Chunk, ChunkError, ChunkType};
use crate::locate::DEFAULT_KEYWORD;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Container error: {0}")]
    Container(#[from] ChunkError),
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Compact JSON as embedded in the image.
pub fn to_compact_json(record: &CanonicalCharacterRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(&TavernCard::from(record))
}

/// Pretty JSON for the sidecar file.  Parses to the same value as the
/// embedded payload.
pub fn to_json_text(record: &CanonicalCharacterRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&TavernCard::from(record))
}

/// [`embed_with_keyword`] using the reserved `chara` keyword.
pub fn embed(record: &CanonicalCharacterRecord, image: &[u8]) -> Result<Vec<u8>, WriteError> {
    embed_with_keyword(record, image, DEFAULT_KEYWORD)
}

/// Replace every `tEXt` chunk carrying `keyword` with a single fresh one
/// holding `record`, inserted right before `IEND`.
///
/// A container that ends without `IEND` (truncated download, chunk scan
/// stopped early) gets a new one appended so the output is always
/// terminated exactly once.
pub fn embed_with_keyword(
    record: &CanonicalCharacterRecord,
    image: &[u8],
    keyword: &str,
) -> Result<Vec<u8>, WriteError> {
    let mut chunks = chunk::parse(image)?;
    chunks.retain(|c| !c.is_text_keyword(keyword));

    let payload = STANDARD.encode(to_compact_json(record)?);
    let card = Chunk::text(keyword, payload.as_bytes());

    match chunks.iter().position(Chunk::is_terminal) {
        Some(iend) => chunks.insert(iend, card),
        None => {
            chunks.push(card);
            chunks.push(Chunk::new(ChunkType::IEND, Vec::new()));
        }
    }
    Ok(chunk::serialize(&chunks)?)
}

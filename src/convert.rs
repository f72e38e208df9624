//! High-level [`Converter`]: one input in, canonical record plus output
//! artifacts out.
//!
//! ```no_run
//! use cardlift::convert::{ConvertOptions, Converter};
//!
//! let converter = Converter::new(ConvertOptions::default());
//! let conversion = converter.convert_file("card.png")?;
//! println!("{} via {}", conversion.record.name, conversion.origin);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::card::{CanonicalCharacterRecord, SamplerSettings};
use crate::chunk::{self, ChunkError};
use crate::locate::{LocateError, MetadataLocator, Strategy, DEFAULT_KEYWORD};
use crate::normalize::{normalize, normalize_external, NormalizeOptions};
use crate::source::{CharacterDataSource, RawRecord};
use crate::writer::{self, WriteError};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Container error: {0}")]
    Container(#[from] ChunkError),
    #[error("{0}")]
    Extraction(#[from] LocateError),
    #[error("Write error: {0}")]
    Write(#[from] WriteError),
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Invalid config file {}: {source}", .path.display())]
    Config { path: PathBuf, source: serde_json::Error },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── ConvertOptions ───────────────────────────────────────────────────────────

/// Configuration for [`Converter`].  Loadable from a JSON file; every field
/// is optional there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// `tEXt` keyword searched for and written.
    pub keyword:                  String,
    /// Defaults for sampler settings missing from the source.
    pub samplers:                 SamplerSettings,
    pub tool_name:                String,
    pub tool_version:             String,
    /// Append ` (<display name>)` to output file names when it differs from
    /// the name.
    pub display_name_in_filename: bool,
    /// Clock override for metadata timestamps (ms since the epoch).
    #[serde(skip)]
    pub now_ms:                   Option<i64>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        let normalize = NormalizeOptions::default();
        Self {
            keyword:                  DEFAULT_KEYWORD.to_owned(),
            samplers:                 normalize.samplers,
            tool_name:                normalize.tool_name,
            tool_version:             normalize.tool_version,
            display_name_in_filename: true,
            now_ms:                   None,
        }
    }
}

impl ConvertOptions {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| ConvertError::Config {
            path: path.to_owned(),
            source,
        })
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            samplers:     self.samplers,
            tool_name:    self.tool_name.clone(),
            tool_version: self.tool_version.clone(),
            now_ms:       self.now_ms,
        }
    }
}

// ── RecordOrigin ─────────────────────────────────────────────────────────────

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Extracted(Strategy),
    ExternalStore,
}

impl fmt::Display for RecordOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordOrigin::Extracted(s)  => write!(f, "{s}"),
            RecordOrigin::ExternalStore => f.write_str("external store"),
        }
    }
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Conversion {
    pub record: CanonicalCharacterRecord,
    pub origin: RecordOrigin,
    /// Re-embedded image; `None` for records converted without an image.
    pub png:    Option<Vec<u8>>,
    /// Pretty sidecar JSON.
    pub json:   String,
}

// ── Converter ────────────────────────────────────────────────────────────────

pub struct Converter {
    options:   ConvertOptions,
    normalize: NormalizeOptions,
    locator:   MetadataLocator,
    source:    Option<Arc<dyn CharacterDataSource>>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("options", &self.options)
            .field("source", &self.source.is_some())
            .finish()
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConvertOptions::default())
    }
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            normalize: options.normalize_options(),
            locator:   MetadataLocator::new(options.keyword.clone()),
            options,
            source:    None,
        }
    }

    /// Consult `source` before searching image bytes.
    pub fn with_source(mut self, source: Arc<dyn CharacterDataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Canonical record for an image, without writing anything.
    ///
    /// `filename` is the input's file name; it keys the data-source lookup
    /// and its stem is the fallback character name.
    pub fn extract(
        &self,
        image: &[u8],
        filename: Option<&str>,
    ) -> Result<(CanonicalCharacterRecord, RecordOrigin), ConvertError> {
        let stem = filename.map(file_stem);
        if let Some(raw) = filename.and_then(|name| self.lookup(name)) {
            return Ok((normalize_external(&raw, stem, &self.normalize), RecordOrigin::ExternalStore));
        }

        let found = self.locator.locate(image)?;
        let record = normalize(&found.object, stem, &self.normalize);
        Ok((record, RecordOrigin::Extracted(found.strategy)))
    }

    /// Full per-item transform over in-memory bytes.
    pub fn convert_bytes(
        &self,
        image: &[u8],
        filename: Option<&str>,
    ) -> Result<Conversion, ConvertError> {
        // The output has to be a valid container, so reject a missing
        // signature before doing any work.
        if !chunk::has_signature(image) {
            return Err(ChunkError::ContainerTruncated { len: image.len() }.into());
        }
        let (record, origin) = self.extract(image, filename)?;
        let png = writer::embed_with_keyword(&record, image, &self.options.keyword)?;
        let json = writer::to_json_text(&record)?;
        Ok(Conversion { record, origin, png: Some(png), json })
    }

    pub fn convert_file<P: AsRef<Path>>(&self, path: P) -> Result<Conversion, ConvertError> {
        let path = path.as_ref();
        let image = fs::read(path)?;
        let filename = path.file_name().and_then(|n| n.to_str());
        self.convert_bytes(&image, filename)
    }

    /// Convert a record supplied by an external store.  The image, when
    /// given, only receives the embedded card; its file stem is the
    /// fallback name.
    pub fn convert_record(
        &self,
        raw: &RawRecord,
        image: Option<&[u8]>,
    ) -> Result<Conversion, ConvertError> {
        let stem = raw
            .image_path
            .as_deref()
            .and_then(Path::file_stem)
            .and_then(|s| s.to_str());
        let record = normalize_external(raw, stem, &self.normalize);
        let png = image
            .map(|bytes| writer::embed_with_keyword(&record, bytes, &self.options.keyword))
            .transpose()?;
        let json = writer::to_json_text(&record)?;
        Ok(Conversion { record, origin: RecordOrigin::ExternalStore, png, json })
    }

    fn lookup(&self, filename: &str) -> Option<RawRecord> {
        let source = self.source.as_ref()?;
        match source.lookup(filename) {
            Ok(found) => {
                debug!(filename, found = found.is_some(), "data source lookup");
                found
            }
            Err(e) => {
                warn!(filename, error = %e, "data source lookup failed; falling back to image");
                None
            }
        }
    }
}

fn file_stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{Chunk, ChunkType};
    use crate::source::MemorySource;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    fn png_with(extra: Option<Chunk>) -> Vec<u8> {
        let mut chunks = vec![
            Chunk::new(ChunkType::IHDR, vec![0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]),
            Chunk::new(ChunkType::IDAT, b"x\x9cc\xf8\x0f\x00\x01\x01\x01\x00".to_vec()),
            Chunk::new(ChunkType::IEND, Vec::new()),
        ];
        if let Some(extra) = extra {
            chunks.insert(1, extra);
        }
        chunk::serialize(&chunks).unwrap()
    }

    fn fixed_clock() -> ConvertOptions {
        ConvertOptions { now_ms: Some(7), ..ConvertOptions::default() }
    }

    #[test]
    fn test_convert_standard_card() {
        let encoded = STANDARD.encode(r#"{"name":"Ada","first_mes":"Hi"}"#);
        let png = png_with(Some(Chunk::text("chara", encoded.as_bytes())));

        let out = Converter::new(fixed_clock()).convert_bytes(&png, Some("ada.png")).unwrap();
        assert_eq!(out.record.name, "Ada");
        assert_eq!(out.record.first_message, "Hi");
        assert_eq!(out.origin, RecordOrigin::Extracted(Strategy::StandardChunk));
        assert!(out.png.is_some());
        assert!(out.json.contains("\"first_mes\": \"Hi\""));
    }

    #[test]
    fn test_name_falls_back_to_file_stem() {
        let encoded = STANDARD.encode(r#"{"first_mes":"Hi"}"#);
        let png = png_with(Some(Chunk::text("chara", encoded.as_bytes())));
        let (record, _) = Converter::new(fixed_clock()).extract(&png, Some("mystery.card.png")).unwrap();
        assert_eq!(record.name, "mystery.card");
    }

    #[test]
    fn test_external_source_wins() {
        let encoded = STANDARD.encode(r#"{"name":"FromImage"}"#);
        let png = png_with(Some(Chunk::text("chara", encoded.as_bytes())));
        let mut source = MemorySource::new();
        source.insert("kai.png", RawRecord { name: Some("FromStore".into()), ..RawRecord::default() });

        let converter = Converter::new(fixed_clock()).with_source(Arc::new(source));
        let out = converter.convert_bytes(&png, Some("kai.png")).unwrap();
        assert_eq!(out.record.name, "FromStore");
        assert_eq!(out.origin, RecordOrigin::ExternalStore);

        let out = converter.convert_bytes(&png, Some("other.png")).unwrap();
        assert_eq!(out.record.name, "FromImage");
    }

    #[test]
    fn test_missing_signature_is_fatal() {
        let err = Converter::default().convert_bytes(b"ASCIIeyJh", None).unwrap_err();
        assert!(matches!(err, ConvertError::Container(ChunkError::ContainerTruncated { len: 9 })));
    }

    #[test]
    fn test_extraction_failed() {
        let err = Converter::default().convert_bytes(&png_with(None), None).unwrap_err();
        assert!(matches!(err, ConvertError::Extraction(LocateError::ExtractionFailed { .. })));
    }

    #[test]
    fn test_options_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"keyword": "ccv3", "samplers": {"temperature": 0.5}}"#,
        )
        .unwrap();
        let opts = ConvertOptions::from_json_file(file.path()).unwrap();
        assert_eq!(opts.keyword, "ccv3");
        assert_eq!(opts.samplers.temperature, 0.5);
        assert_eq!(opts.samplers.top_k, crate::card::DEFAULT_TOP_K);
        assert!(opts.display_name_in_filename);

        std::io::Write::write_all(&mut file, b"garbage").unwrap();
        assert!(matches!(
            ConvertOptions::from_json_file(file.path()),
            Err(ConvertError::Config { .. })
        ));
    }

    #[test]
    fn test_store_record_name_fallbacks() {
        let png = png_with(None);
        let mut source = MemorySource::new();
        source.insert("rex.png", RawRecord::default());
        source.insert(
            "kai.png",
            RawRecord { name: Some(String::new()), display_name: Some("Kai".into()), ..RawRecord::default() },
        );
        let converter = Converter::new(fixed_clock()).with_source(Arc::new(source));

        let (record, origin) = converter.extract(&png, Some("rex.png")).unwrap();
        assert_eq!(origin, RecordOrigin::ExternalStore);
        assert_eq!(record.name, "rex");

        let (record, _) = converter.extract(&png, Some("kai.png")).unwrap();
        assert_eq!(record.name, "Kai");

        let raw = RawRecord { image_path: Some(PathBuf::from("/avatars/wren.png")), ..RawRecord::default() };
        let out = Converter::new(fixed_clock()).convert_record(&raw, None).unwrap();
        assert_eq!(out.record.name, "wren");
    }

    #[test]
    fn test_convert_record_without_image() {
        let raw = RawRecord { name: Some("Solo".into()), ..RawRecord::default() };
        let out = Converter::new(fixed_clock()).convert_record(&raw, None).unwrap();
        assert!(out.png.is_none());
        assert_eq!(out.record.name, "Solo");
    }
}

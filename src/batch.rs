//! Batch driver: convert many independent items and aggregate a report.
//!
//! Items never affect each other; a failing item becomes an
//! [`ItemOutcome::Failed`] entry and the batch carries on.  With the
//! `parallel` feature items are converted on the Rayon pool.  Outcomes are
//! always reported in input order.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::convert::{ConvertError, Conversion, Converter, RecordOrigin};
use crate::naming;
use crate::source::RawRecord;

// ── Inputs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BatchItem {
    /// An image file to extract from.
    Image(PathBuf),
    /// A record from an external store, with its image if it has one.
    Record(RawRecord),
}

impl BatchItem {
    /// Label used in logs and the failure list.
    pub fn label(&self) -> String {
        match self {
            BatchItem::Image(path) => path.display().to_string(),
            BatchItem::Record(raw) => [&raw.name, &raw.display_name]
                .into_iter()
                .find_map(|n| n.as_deref().filter(|n| !n.is_empty()))
                .unwrap_or(crate::normalize::UNKNOWN_NAME)
                .to_owned(),
        }
    }
}

// ── Output sink ──────────────────────────────────────────────────────────────

/// Paths written for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFiles {
    pub png:  Option<PathBuf>,
    pub json: PathBuf,
}

/// Persists a finished conversion.
pub trait OutputSink: Sync {
    fn write(&self, conversion: &Conversion) -> io::Result<WrittenFiles>;
}

/// Writes `<base>.tavern.png` / `<base>.tavern.json` pairs into a directory,
/// never overwriting existing files.
#[derive(Debug)]
pub struct DirectorySink {
    dir:          PathBuf,
    with_display: bool,
    // Path choice and file creation must not interleave between workers.
    reserve:      Mutex<()>,
}

impl DirectorySink {
    /// Creates `dir` if needed.
    pub fn new<P: AsRef<Path>>(dir: P, with_display: bool) -> io::Result<Self> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, with_display, reserve: Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputSink for DirectorySink {
    fn write(&self, conversion: &Conversion) -> io::Result<WrittenFiles> {
        let base = naming::base_name(&conversion.record, self.with_display);
        let _guard = self
            .reserve
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "output lock poisoned"))?;
        let (png_path, json_path) = naming::output_paths(&self.dir, &base);

        let png = match &conversion.png {
            Some(bytes) => {
                fs::write(&png_path, bytes)?;
                Some(png_path)
            }
            None => None,
        };
        fs::write(&json_path, &conversion.json)?;
        Ok(WrittenFiles { png, json: json_path })
    }
}

// ── Outcomes & report ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Converted {
        input:  String,
        name:   String,
        origin: RecordOrigin,
        files:  WrittenFiles,
    },
    Failed {
        input: String,
        error: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded:     usize,
    pub failed:        usize,
    /// Successful items written without an image.
    pub json_only:     usize,
    pub by_origin:     BTreeMap<RecordOrigin, usize>,
    pub failed_inputs: Vec<String>,
    pub outcomes:      Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    fn push(&mut self, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::Converted { origin, files, .. } => {
                self.succeeded += 1;
                if files.png.is_none() {
                    self.json_only += 1;
                }
                *self.by_origin.entry(*origin).or_insert(0) += 1;
            }
            ItemOutcome::Failed { input, .. } => {
                self.failed += 1;
                self.failed_inputs.push(input.clone());
            }
        }
        self.outcomes.push(outcome);
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Total: {}", self.total()),
            format!("Successful: {}", self.succeeded),
            format!("Failed: {}", self.failed),
        ];
        if self.json_only > 0 {
            lines.push(format!("JSON only (no image): {}", self.json_only));
        }

        if !self.by_origin.is_empty() {
            lines.push("Sources:".to_owned());
            let mut origins: Vec<_> = self.by_origin.iter().collect();
            origins.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (origin, count) in origins {
                let pct = *count as f64 / self.succeeded as f64 * 100.0;
                lines.push(format!("  {origin}: {count} ({pct:.1}%)"));
            }
        }

        if !self.failed_inputs.is_empty() {
            lines.push(format!("Failed inputs ({}):", self.failed_inputs.len()));
            for input in self.failed_inputs.iter().take(5) {
                lines.push(format!("  - {input}"));
            }
            if self.failed_inputs.len() > 5 {
                lines.push(format!("  ... and {} more", self.failed_inputs.len() - 5));
            }
        }
        lines.join("\n")
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Convert every item and write results through `sink`.
pub fn convert_all(items: &[BatchItem], converter: &Converter, sink: &dyn OutputSink) -> BatchReport {
    #[cfg(feature = "parallel")]
    let outcomes: Vec<ItemOutcome> = {
        use rayon::prelude::*;
        items.par_iter().map(|item| convert_one(item, converter, sink)).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<ItemOutcome> = items
        .iter()
        .map(|item| convert_one(item, converter, sink))
        .collect();

    let mut report = BatchReport::default();
    for outcome in outcomes {
        report.push(outcome);
    }
    report
}

fn convert_one(item: &BatchItem, converter: &Converter, sink: &dyn OutputSink) -> ItemOutcome {
    let input = item.label();
    let result = convert_item(item, converter).and_then(|conversion| {
        let files = sink.write(&conversion)?;
        Ok((conversion, files))
    });

    match result {
        Ok((conversion, files)) => {
            info!(input = %input, name = %conversion.record.name, origin = %conversion.origin, "converted");
            ItemOutcome::Converted {
                input,
                name: conversion.record.name,
                origin: conversion.origin,
                files,
            }
        }
        Err(e) => {
            warn!(input = %input, error = %e, "conversion failed");
            ItemOutcome::Failed { input, error: e.to_string() }
        }
    }
}

fn convert_item(item: &BatchItem, converter: &Converter) -> Result<Conversion, ConvertError> {
    match item {
        BatchItem::Image(path) => converter.convert_file(path),
        BatchItem::Record(raw) => {
            let image = raw.image_path.as_deref().map(fs::read).transpose()?;
            converter.convert_record(raw, image.as_deref())
        }
    }
}

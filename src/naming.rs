//! Output file naming.

use std::path::{Path, PathBuf};

use crate::card::CanonicalCharacterRecord;
use crate::normalize::UNKNOWN_NAME;

pub const NAME_LIMIT:    usize = 100;
pub const DISPLAY_LIMIT: usize = 50;
pub const PNG_SUFFIX:    &str = ".tavern.png";
pub const JSON_SUFFIX:   &str = ".tavern.json";

/// ASCII alphanumerics, `-` and `_` survive; everything else (spaces
/// included) becomes `_`.  Empty input yields `Unknown`.
pub fn sanitize(name: &str) -> String {
    if name.is_empty() {
        return UNKNOWN_NAME.to_owned();
    }
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `<name>` or `<name> (<display>)`, each part sanitized and truncated.
pub fn base_name(record: &CanonicalCharacterRecord, with_display: bool) -> String {
    let name: String = sanitize(&record.name).chars().take(NAME_LIMIT).collect();
    match record.distinct_display_name().filter(|_| with_display) {
        Some(display) => {
            let display: String = sanitize(display).chars().take(DISPLAY_LIMIT).collect();
            format!("{name} ({display})")
        }
        None => name,
    }
}

/// Free `(png, json)` output paths in `dir` for `base`: `<base>` or the
/// first free `<base>_N`, N counting from 1.  Both files share the same
/// counter so they stay paired.
pub fn output_paths(dir: &Path, base: &str) -> (PathBuf, PathBuf) {
    let mut n = 0u32;
    loop {
        let stem = if n == 0 { base.to_owned() } else { format!("{base}_{n}") };
        let png = dir.join(format!("{stem}{PNG_SUFFIX}"));
        let json = dir.join(format!("{stem}{JSON_SUFFIX}"));
        if !png.exists() && !json.exists() {
            return (png, json);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Ada Lovelace"), "Ada_Lovelace");
        assert_eq!(sanitize("Zoë/../x"), "Zo_____x");
        assert_eq!(sanitize("ok-name_1"), "ok-name_1");
        assert_eq!(sanitize(" a "), "_a_");
        assert_eq!(sanitize(""), "Unknown");
    }

    #[test]
    fn test_output_paths_stay_paired() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Ada.tavern.json"), b"{}").unwrap();
        let (png, json) = output_paths(dir.path(), "Ada");
        assert_eq!(png, dir.path().join("Ada_1.tavern.png"));
        assert_eq!(json, dir.path().join("Ada_1.tavern.json"));

        fs::write(&png, b"").unwrap();
        assert_eq!(output_paths(dir.path(), "Ada").0, dir.path().join("Ada_2.tavern.png"));
        assert_eq!(output_paths(dir.path(), "Eve").0, dir.path().join("Eve.tavern.png"));
    }
}

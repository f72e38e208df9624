//! Marker scanning over raw container bytes.
//!
//! Exporters that do not use a proper `tEXt` chunk leave the base64 run after
//! an EXIF `ASCII` type marker.  These helpers cut that run out; they never
//! look at chunk boundaries.

use memchr::memmem;

use crate::repair::b64;

pub const ASCII_MARKER: &[u8] = b"ASCII";
/// Start of the zlib stream in the legacy exporter's fixed layout.
pub const IDAT_MARKER: &[u8] = b"IDATx";
/// Padding tail used as a fallback end marker on latin-1 text.
pub const PAD_MARKER: &str = "Q==";

/// Bytes between the first `ASCII` marker and the next `IDATx` after it.
pub fn between_markers(bytes: &[u8]) -> Option<&[u8]> {
    let start = memmem::find(bytes, ASCII_MARKER)? + ASCII_MARKER.len();
    let len = memmem::find(&bytes[start..], IDAT_MARKER)?;
    Some(&bytes[start..start + len])
}

/// Same marker pair over latin-1 text; ends at `IDATx` or, failing that,
/// just after the first `Q==` following the start marker.
pub fn between_markers_text(text: &str) -> Option<&str> {
    let start = text.find("ASCII")? + ASCII_MARKER.len();
    let rest = &text[start..];
    if let Some(end) = rest.find("IDATx") {
        return Some(&rest[..end]);
    }
    rest.find(PAD_MARKER).map(|end| &rest[..end + PAD_MARKER.len()])
}

/// Payload of an `eXIf` chunk after its `ASCII` marker, with leading
/// whitespace/NUL skipped.
pub fn exif_run(payload: &[u8]) -> Option<&[u8]> {
    let start = memmem::find(payload, ASCII_MARKER)? + ASCII_MARKER.len();
    let skip = payload[start..]
        .iter()
        .take_while(|b| matches!(b, b' ' | b'\0' | b'\n' | b'\r' | b'\t'))
        .count();
    Some(&payload[start + skip..])
}

/// Keep base64 characters of an EXIF run, stopping at the first low control
/// byte (0x00..=0x04) seen after data has started, unless the run has
/// already reached its padding.
pub fn clean_exif_run(run: &[u8]) -> String {
    let mut cleaned = String::with_capacity(run.len());
    for &b in run {
        if b64::is_base64_byte(b) {
            cleaned.push(char::from(b));
        } else if b <= 0x04 && !cleaned.is_empty() && !cleaned.ends_with('=') {
            break;
        }
    }
    cleaned
}

//! Base64 clean-up for payloads cut out of raw image bytes.
//!
//! Exporters that hide the card behind an `ASCII` marker rarely frame it
//! precisely, so the slice handed to us usually carries CRC bytes, chunk
//! headers or compressed pixel data around (and sometimes inside) the real
//! base64 run.  [`clean`] throws away everything outside the alphabet and
//! [`pad`] rebuilds the padding from scratch.

use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use thiserror::Error;

/// Decoder for repaired text: padding optional, non-zero trailing bits
/// accepted (truncated runs rarely end on a clean boundary).
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Error, Debug)]
pub enum Base64Error {
    #[error("No base64 characters left after cleaning")]
    Empty,
    #[error("Base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

#[inline]
pub fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')
}

/// Keep only `A–Z a–z 0–9 + / =`.
pub fn clean(input: impl AsRef<[u8]>) -> String {
    input
        .as_ref()
        .iter()
        .copied()
        .filter(|&b| is_base64_byte(b))
        .map(char::from)
        .collect()
}

/// Strip any trailing `=` and pad back up to a multiple of four.
pub fn pad(cleaned: &str) -> String {
    let body = cleaned.trim_end_matches('=');
    let fill = (4 - body.len() % 4) % 4;
    let mut out = String::with_capacity(body.len() + fill);
    out.push_str(body);
    out.extend(std::iter::repeat('=').take(fill));
    out
}

/// Strip trailing `=` and drop residual characters past the last full
/// four-character quantum.
///
/// Unlike [`pad`], this never produces an undecodable `xxxxx===` tail; the
/// dropped characters carry at most 18 bits, i.e. the final two bytes of a
/// run that was truncated anyway.
pub fn trim_to_quantum(cleaned: &str) -> &str {
    let body = cleaned.trim_end_matches('=');
    &body[..body.len() - body.len() % 4]
}

/// Decode already-cleaned text leniently.
pub fn decode(text: &str) -> Result<Vec<u8>, Base64Error> {
    if text.trim_end_matches('=').is_empty() {
        return Err(Base64Error::Empty);
    }
    Ok(LENIENT.decode(text)?)
}

/// `decode(pad(clean(input)))`.
pub fn decode_repaired(input: impl AsRef<[u8]>) -> Result<Vec<u8>, Base64Error> {
    decode(&pad(&clean(input)))
}

/// Strict decode for well-formed producers; only surrounding whitespace is
/// tolerated.
pub fn decode_strict(input: &[u8]) -> Result<Vec<u8>, Base64Error> {
    let trimmed = input.trim_ascii();
    if trimmed.is_empty() {
        return Err(Base64Error::Empty);
    }
    Ok(STANDARD.decode(trimmed)?)
}

//! Repair helpers for payloads recovered from damaged or loosely framed
//! containers.
//!
//! | Module       | Input                        | Output                  |
//! |--------------|------------------------------|-------------------------|
//! | [`b64`]      | raw bytes around a marker    | decoded bytes           |
//! | [`boundary`] | decoded, possibly noisy text | one parseable JSON object |

pub mod b64;
pub mod boundary;

pub use b64::Base64Error;
pub use boundary::{extract_object, extract_value, JsonBoundaryError};

/// Decode bytes as latin-1: every byte maps to the code point of the same
/// value, so the result never fails and keeps byte offsets 1:1 for ASCII.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

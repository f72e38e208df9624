//! PNG chunk stream codec.
//!
//! A PNG container is the fixed 8-byte signature followed by a sequence of
//! chunks.  Every chunk on disk is:
//!
//! | Field   | Size     | Notes                                  |
//! |---------|----------|----------------------------------------|
//! | length  | 4 B (BE) | payload length only                    |
//! | type    | 4 B      | ASCII tag, e.g. `IHDR`, `tEXt`, `IEND` |
//! | payload | `length` | opaque to this module                  |
//! | crc     | 4 B (BE) | CRC-32 over `type ++ payload`          |
//!
//! The reader is tolerant: stored CRCs are kept for diagnostics but never
//! used to reject a chunk, and a chunk whose declared length runs past the
//! end of the buffer ends the scan instead of failing it.  The writer always
//! recomputes the CRC, so an unmodified chunk with a correct CRC serializes
//! byte-for-byte identically.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = *b"\x89PNG\r\n\x1a\n";
/// Length + type.
pub const CHUNK_HEADER_SIZE: usize = 8;
pub const CHUNK_CRC_SIZE: usize = 4;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ChunkError {
    /// The signature is missing, wrong, or the input is shorter than 8 bytes.
    #[error("Container truncated: missing PNG signature ({len} bytes available)")]
    ContainerTruncated { len: usize },
    /// A chunk declares more payload than the buffer holds.  The parser
    /// recovers from this by ending the scan; it is only surfaced through
    /// [`ParsedContainer::trailing`].
    #[error("Chunk at offset {offset} declares {declared} bytes but only {available} remain")]
    ChunkBounds { offset: usize, declared: u32, available: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── ChunkType ────────────────────────────────────────────────────────────────

/// Four-byte chunk tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    pub const IEND: ChunkType = ChunkType(*b"IEND");
    pub const TEXT: ChunkType = ChunkType(*b"tEXt");
    pub const EXIF: ChunkType = ChunkType(*b"eXIf");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(u8::is_ascii_alphabetic) {
            // All four bytes are ASCII letters, so this cannot fail.
            f.write_str(std::str::from_utf8(&self.0).unwrap_or("????"))
        } else {
            write!(f, "0x{}", hex::encode(self.0))
        }
    }
}

impl fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkType({self})")
    }
}

// ── Chunk ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_type: ChunkType,
    pub payload:    Vec<u8>,
    /// CRC as stored on disk (parsed chunks) or as computed (new chunks).
    pub crc:        u32,
}

impl Chunk {
    /// Build a chunk with a freshly computed CRC.
    pub fn new(chunk_type: ChunkType, payload: Vec<u8>) -> Self {
        let crc = crc32(&chunk_type, &payload);
        Self { chunk_type, payload, crc }
    }

    /// Build a `tEXt` chunk: `keyword NUL text`.
    pub fn text(keyword: &str, text: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(keyword.len() + 1 + text.len());
        payload.extend_from_slice(keyword.as_bytes());
        payload.push(0);
        payload.extend_from_slice(text);
        Self::new(ChunkType::TEXT, payload)
    }

    /// Split a `tEXt` payload into `(keyword, text)` at the first NUL.
    /// Returns `None` for other chunk types or a payload without a NUL.
    pub fn text_fields(&self) -> Option<(&[u8], &[u8])> {
        if self.chunk_type != ChunkType::TEXT {
            return None;
        }
        let nul = memchr::memchr(0, &self.payload)?;
        Some((&self.payload[..nul], &self.payload[nul + 1..]))
    }

    /// True for a `tEXt` chunk whose keyword equals `keyword`.
    pub fn is_text_keyword(&self, keyword: &str) -> bool {
        self.text_fields()
            .map(|(k, _)| k == keyword.as_bytes())
            .unwrap_or(false)
    }

    pub fn is_terminal(&self) -> bool {
        self.chunk_type == ChunkType::IEND
    }

    pub fn computed_crc(&self) -> u32 {
        crc32(&self.chunk_type, &self.payload)
    }

    /// Whether the stored CRC matches the payload.  Diagnostics only.
    pub fn crc_matches(&self) -> bool {
        self.crc == self.computed_crc()
    }

    /// Bytes this chunk occupies on disk.
    pub fn encoded_len(&self) -> usize {
        CHUNK_HEADER_SIZE + self.payload.len() + CHUNK_CRC_SIZE
    }

    /// Write the chunk with a recomputed CRC.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let length = u32::try_from(self.payload.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "chunk payload exceeds 4 GiB")
        })?;
        writer.write_u32::<BigEndian>(length)?;
        writer.write_all(self.chunk_type.as_bytes())?;
        writer.write_all(&self.payload)?;
        writer.write_u32::<BigEndian>(self.computed_crc())?;
        Ok(())
    }
}

/// CRC-32 (ISO-HDLC, as used by PNG) over `type ++ payload`.
pub fn crc32(chunk_type: &ChunkType, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(chunk_type.as_bytes());
    hasher.update(payload);
    hasher.finalize()
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Full parse result, including why the scan stopped.
#[derive(Debug, Default)]
pub struct ParsedContainer {
    pub chunks:     Vec<Chunk>,
    /// True when the scan ended on an `IEND` chunk.
    pub terminated: bool,
    /// Set when a chunk ran past the end of the buffer.
    pub trailing:   Option<ChunkError>,
}

pub fn has_signature(bytes: &[u8]) -> bool {
    bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

/// Parse the chunk stream, dropping malformed trailing data.
pub fn parse(bytes: &[u8]) -> Result<Vec<Chunk>, ChunkError> {
    Ok(parse_detailed(bytes)?.chunks)
}

/// Parse the chunk stream and report how the scan ended.
///
/// Fails only when the signature is absent.  Bytes after `IEND` are
/// ignored.
pub fn parse_detailed(bytes: &[u8]) -> Result<ParsedContainer, ChunkError> {
    if !has_signature(bytes) {
        return Err(ChunkError::ContainerTruncated { len: bytes.len() });
    }

    let mut cursor = Cursor::new(bytes);
    cursor.set_position(PNG_SIGNATURE.len() as u64);
    let mut parsed = ParsedContainer::default();

    loop {
        let offset    = cursor.position() as usize;
        let remaining = bytes.len() - offset;
        if remaining < CHUNK_HEADER_SIZE {
            if remaining > 0 {
                tracing::debug!(offset, remaining, "dropping partial chunk header");
            }
            break;
        }

        let length = cursor.read_u32::<BigEndian>()?;
        let mut tag = [0u8; 4];
        cursor.read_exact(&mut tag)?;

        let available = remaining - CHUNK_HEADER_SIZE;
        if (length as usize).saturating_add(CHUNK_CRC_SIZE) > available {
            let err = ChunkError::ChunkBounds { offset, declared: length, available };
            tracing::debug!(%err, "stopping chunk scan early");
            parsed.trailing = Some(err);
            break;
        }

        let mut payload = vec![0u8; length as usize];
        cursor.read_exact(&mut payload)?;
        let crc = cursor.read_u32::<BigEndian>()?;

        let chunk = Chunk { chunk_type: ChunkType(tag), payload, crc };
        let terminal = chunk.is_terminal();
        parsed.chunks.push(chunk);
        if terminal {
            parsed.terminated = true;
            break;
        }
    }

    Ok(parsed)
}

// ── Serialization ────────────────────────────────────────────────────────────

/// Write the signature followed by every chunk, recomputing CRCs.
pub fn write_container<W: Write>(mut writer: W, chunks: &[Chunk]) -> io::Result<()> {
    writer.write_all(&PNG_SIGNATURE)?;
    for chunk in chunks {
        chunk.write(&mut writer)?;
    }
    Ok(())
}

/// In-memory [`write_container`].
pub fn serialize(chunks: &[Chunk]) -> Result<Vec<u8>, ChunkError> {
    let size = PNG_SIGNATURE.len() + chunks.iter().map(Chunk::encoded_len).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    write_container(&mut out, chunks)?;
    Ok(out)
}

//! Extract, normalize and re-embed AI character cards stored in PNG files.
//!
//! Pipeline for one image:
//!
//! | Stage        | Module          | Output                                  |
//! |--------------|-----------------|-----------------------------------------|
//! | container    | [`chunk`]       | ordered chunk list                      |
//! | locate       | [`locate`]      | JSON object + winning [`Strategy`]      |
//! | normalize    | [`normalize`]   | [`CanonicalCharacterRecord`]            |
//! | write        | [`writer`]      | PNG with one `chara` chunk + sidecar    |
//!
//! [`convert::Converter`] runs the whole pipeline for one input and
//! [`batch::convert_all`] runs it over many.

pub mod chunk;
pub mod repair;
pub mod locate;
pub mod placeholder;
pub mod card;
pub mod normalize;
pub mod writer;
pub mod source;
pub mod convert;
pub mod naming;
pub mod batch;

pub use batch::{convert_all, BatchItem, BatchReport, DirectorySink, ItemOutcome, OutputSink};
pub use card::{CanonicalCharacterRecord, SamplerSettings, TavernCard};
pub use chunk::{Chunk, ChunkError, ChunkType};
pub use convert::{ConvertError, ConvertOptions, Conversion, Converter, RecordOrigin};
pub use locate::{locate, Extraction, LocateError, MetadataLocator, Strategy};
pub use normalize::{normalize, NormalizeOptions};
pub use source::{CharacterDataSource, RawRecord, SourceError};
pub use writer::{embed, WriteError};

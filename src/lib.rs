//! Pure Rust SFNT / WOFF / WOFF2 font container codec.
//!
//! A bidirectional codec between the three container formats that
//! OpenType/TrueType fonts travel in:
//!
//! - raw **SFNT** (`.ttf` / `.otf`, plus read-only `.ttc` collections)
//! - **WOFF 1.0**: zlib-compressed per-table container
//! - **WOFF 2.0**: brotli-compressed single-stream container with the
//!   lossless `glyf`/`loca` table transform
//!
//! The two entry points are [`decode`], which sniffs the flavor from the
//! first four bytes and unwraps the container into a tag → bytes map, and
//! [`encode`], which packs such a map into a requested flavor:
//!
//! ```no_run
//! let data = std::fs::read("font.woff2").unwrap();
//! let font = woffle::decode(&data).unwrap().into_single().unwrap();
//! let ttf = woffle::encode(&font, woffle::Flavor::Sfnt, &Default::default()).unwrap();
//! ```
//!
//! Lower-level access is available through [`FontReader`] (zero-copy table
//! slices where the container allows it) and [`FontWriter`].

pub mod checksum;
pub mod directory;
pub mod error;
pub mod flavor_data;
pub mod font;
pub mod glyf;
pub mod header;
pub mod reader;
pub mod tags;
mod transform;
pub mod varint;
pub mod writer;

pub use error::Error;
pub use flavor_data::FlavorData;
pub use font::{Font, FontCollection, FontFile, decode, decode_with_checksums, encode};
pub use reader::{ChecksumMode, FontReader, TtcReader};
pub use writer::{BrotliMode, EncodeOptions, Flavor, FontWriter, TableOrder};

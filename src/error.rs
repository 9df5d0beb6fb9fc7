use font_types::Tag;
use thiserror::Error;

/// Errors surfaced by the container codec.
///
/// Every failure in `decode`/`encode` maps onto one of these kinds; nothing
/// is silently recovered.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad signature {0:?}: not an SFNT, WOFF, WOFF2 or TTC font")]
    BadSignature([u8; 4]),

    #[error("not enough data")]
    TruncatedInput,

    #[error("not a TrueType or OpenType font (bad sfntVersion {0})")]
    BadSfntVersion(Tag),

    #[error("reported total file size ({declared}) does not match actual size ({actual})")]
    BadFileSize { declared: u32, actual: usize },

    #[error("reserved bits must be 0")]
    ReservedBitsSet,

    #[error("UIntBase128 value exceeds 2**32-1 or spans more than 5 bytes")]
    VarIntOverflow,

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("bad checksum for '{tag}' table: expected {stored:#010x}, found {computed:#010x}")]
    ChecksumMismatch { tag: Tag, stored: u32, computed: u32 },

    #[error("wrong number of tables; expected {expected}, found {found}")]
    WrongTableCount { expected: u16, found: usize },

    #[error("cannot rewrite '{0}' table")]
    RewriteForbidden(Tag),

    #[error("incorrect size of transformed 'glyf' table: expected {expected}, received {found} bytes")]
    TransformedGlyfSizeMismatch { expected: usize, found: usize },

    #[error("no bbox values for composite glyph {0}")]
    MissingCompositeBBox(u16),

    #[error("not enough 'flagStream' data")]
    ShortFlagStream,

    #[error("reconstructed 'loca' table doesn't match original size: expected {expected}, found {found}")]
    LocaSizeMismatch { expected: usize, found: usize },

    #[error("glyph offsets don't fit the short 'loca' index format")]
    InvalidIndexFormat,

    #[error("incorrect size of transformed 'loca' table: expected 0, received {0} bytes")]
    NonEmptyTransformedLoca(u32),

    #[error("font has no '{0}' table")]
    MissingTable(Tag),

    #[error("table '{0}' overlaps a neighbouring table")]
    OverlappingTables(Tag),

    #[error("malformed 'glyf' data: {0}")]
    BadGlyphData(&'static str),

    #[error("font collection; select a font or decode the whole collection")]
    IsCollection,

    #[error("specify a font number between 0 and {last} (inclusive), not {index}")]
    BadFontNumber { index: usize, last: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<bytes::TryGetError> for Error {
    fn from(_value: bytes::TryGetError) -> Self {
        Self::TruncatedInput
    }
}

pub(crate) fn usize_will_overflow(a: usize, b: usize) -> bool {
    a.checked_add(b).is_none()
}

pub(crate) fn u32_will_overflow(a: u32, b: u32) -> bool {
    a.checked_add(b).is_none()
}

macro_rules! bail_if {
    ($cond:expr, $err:expr) => {
        if $cond {
            return Err($err);
        }
    };
}
pub(crate) use bail_if;

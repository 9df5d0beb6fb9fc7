//! Container readers. The entry point inspects the first four bytes of the
//! input and dispatches to one of the flavor-specific readers; the variant
//! set is closed, so they live behind a small enum rather than a trait.

use std::borrow::Cow;
use std::io::Read;

use bytes::Buf;
use font_types::Tag;
use log::warn;

use crate::checksum::{checksum, head_checksum};
use crate::directory::{SfntDirectoryEntry, Woff2DirectoryEntry, WoffDirectoryEntry};
use crate::error::{Error, bail_if, usize_will_overflow};
use crate::flavor_data::FlavorData;
use crate::header::{SfntHeader, TtcHeader, WoffHeader, WoffVersion, is_valid_sfnt_version};
use crate::tags::{GLYF, HEAD, LOCA, SIG_TTC, SIG_WOFF, SIG_WOFF2};
use crate::transform::{GlyfTables, reconstruct_glyf};

/// What to do when a stored per-table checksum disagrees with the data.
///
/// Applies to SFNT and WOFF 1.0 fonts; WOFF2 directories carry no per-table
/// checksums.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ChecksumMode {
    Off,
    #[default]
    Warn,
    Fatal,
}

fn verify_checksum(mode: ChecksumMode, tag: Tag, data: &[u8], stored: u32) -> Result<(), Error> {
    if mode == ChecksumMode::Off {
        return Ok(());
    }
    // The 'head' checksum is always computed with checkSumAdjustment zeroed.
    let computed = if tag == HEAD {
        head_checksum(data)
    } else {
        checksum(data)
    };
    if computed != stored {
        match mode {
            ChecksumMode::Fatal => {
                return Err(Error::ChecksumMismatch {
                    tag,
                    stored,
                    computed,
                });
            }
            _ => warn!("bad checksum for '{tag}' table"),
        }
    }
    Ok(())
}

/// Reader over a single font in any of the three container flavors.
pub struct FontReader<'a> {
    inner: Reader<'a>,
}

enum Reader<'a> {
    Sfnt(SfntReader<'a>),
    Woff(WoffReader<'a>),
    Woff2(Woff2Reader),
}

impl<'a> FontReader<'a> {
    /// Dispatch on the first four bytes of `data`.
    ///
    /// TTC inputs are refused here; use [`TtcReader`] (or [`crate::decode`],
    /// which handles all four flavors).
    pub fn new(data: &'a [u8], checksums: ChecksumMode) -> Result<Self, Error> {
        bail_if!(data.len() < 4, Error::TruncatedInput);
        let signature = Tag::from_be_bytes([data[0], data[1], data[2], data[3]]);

        let inner = if signature == SIG_WOFF {
            Reader::Woff(WoffReader::new(data, checksums)?)
        } else if signature == SIG_WOFF2 {
            Reader::Woff2(Woff2Reader::new(data)?)
        } else if signature == SIG_TTC {
            return Err(Error::IsCollection);
        } else if is_valid_sfnt_version(signature) {
            Reader::Sfnt(SfntReader::new_at(data, 0, checksums)?)
        } else {
            return Err(Error::BadSignature(signature.to_be_bytes()));
        };
        Ok(Self { inner })
    }

    pub(crate) fn from_sfnt(reader: SfntReader<'a>) -> Self {
        Self {
            inner: Reader::Sfnt(reader),
        }
    }

    /// The sfntVersion of the (unwrapped) font.
    pub fn sfnt_version(&self) -> Tag {
        match &self.inner {
            Reader::Sfnt(reader) => reader.sfnt_version,
            Reader::Woff(reader) => reader.header.flavor,
            Reader::Woff2(reader) => reader.header.flavor,
        }
    }

    pub fn num_tables(&self) -> usize {
        match &self.inner {
            Reader::Sfnt(reader) => reader.entries.len(),
            Reader::Woff(reader) => reader.entries.len(),
            Reader::Woff2(reader) => reader.entries.len(),
        }
    }

    /// Table tags, in the order the entries appear in the container
    /// directory (sorted by data offset).
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        let tags: Vec<Tag> = match &self.inner {
            Reader::Sfnt(reader) => reader.entries.iter().map(|entry| entry.tag).collect(),
            Reader::Woff(reader) => reader.entries.iter().map(|entry| entry.tag).collect(),
            Reader::Woff2(reader) => reader.entries.iter().map(|entry| entry.tag).collect(),
        };
        tags.into_iter()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.tags().any(|t| t == tag)
    }

    /// Fetch one table's decoded bytes.
    ///
    /// Non-transformed WOFF2 tables and all SFNT tables are returned as
    /// zero-copy slices; zlib-compressed WOFF tables and reconstructed
    /// 'glyf'/'loca' are owned.
    pub fn table(&mut self, tag: Tag) -> Result<Cow<'_, [u8]>, Error> {
        match &mut self.inner {
            Reader::Sfnt(reader) => reader.table(tag).map(Cow::Borrowed),
            Reader::Woff(reader) => reader.table(tag),
            Reader::Woff2(reader) => reader.table(tag),
        }
    }

    /// Metadata/private-data blocks, for WOFF-family containers.
    pub fn flavor_data(&self) -> Option<&FlavorData> {
        match &self.inner {
            Reader::Sfnt(_) => None,
            Reader::Woff(reader) => Some(&reader.flavor_data),
            Reader::Woff2(reader) => Some(&reader.flavor_data),
        }
    }
}

/// Validate that directory entries stay inside the container and don't
/// overlap each other. `ranges` must be sorted by offset.
fn check_table_ranges(
    ranges: impl Iterator<Item = (Tag, u32, u32)>,
    total_size: usize,
) -> Result<(), Error> {
    let mut prev_end: usize = 0;
    for (tag, offset, length) in ranges {
        let offset = offset as usize;
        bail_if!(
            usize_will_overflow(offset, length as usize),
            Error::TruncatedInput
        );
        let end = offset + length as usize;
        bail_if!(end > total_size, Error::TruncatedInput);
        bail_if!(offset < prev_end, Error::OverlappingTables(tag));
        prev_end = end;
    }
    Ok(())
}

pub(crate) struct SfntReader<'a> {
    data: &'a [u8],
    sfnt_version: Tag,
    /// Directory entries, sorted by table offset.
    entries: Vec<SfntDirectoryEntry>,
    checksums: ChecksumMode,
}

impl<'a> SfntReader<'a> {
    /// Parse an SFNT directory at `offset` into `data`. Table offsets are
    /// absolute, which is what makes TTC member fonts work on the same
    /// underlying bytes.
    fn new_at(data: &'a [u8], offset: usize, checksums: ChecksumMode) -> Result<Self, Error> {
        bail_if!(offset > data.len(), Error::TruncatedInput);
        let mut input = &data[offset..];
        let header = SfntHeader::parse(&mut input)?;
        bail_if!(
            !is_valid_sfnt_version(header.sfnt_version),
            Error::BadSfntVersion(header.sfnt_version)
        );

        let mut entries = Vec::with_capacity(header.num_tables as usize);
        for _ in 0..header.num_tables {
            entries.push(SfntDirectoryEntry::parse(&mut input)?);
        }
        entries.sort_by_key(|entry| entry.offset);
        check_table_ranges(
            entries.iter().map(|e| (e.tag, e.offset, e.length)),
            data.len(),
        )?;

        Ok(Self {
            data,
            sfnt_version: header.sfnt_version,
            entries,
            checksums,
        })
    }

    fn table(&self, tag: Tag) -> Result<&'a [u8], Error> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.tag == tag)
            .ok_or(Error::MissingTable(tag))?;
        let data = entry.data_as_slice(self.data)?;
        verify_checksum(self.checksums, tag, data, entry.checksum)?;
        Ok(data)
    }
}

struct WoffReader<'a> {
    data: &'a [u8],
    header: WoffHeader,
    /// Directory entries, sorted by table offset.
    entries: Vec<WoffDirectoryEntry>,
    flavor_data: FlavorData,
    checksums: ChecksumMode,
}

impl<'a> WoffReader<'a> {
    fn new(data: &'a [u8], checksums: ChecksumMode) -> Result<Self, Error> {
        let mut input = data;
        let header = WoffHeader::parse(&mut input)?;
        debug_assert_eq!(header.woff_version, WoffVersion::Woff1);
        bail_if!(
            !is_valid_sfnt_version(header.flavor),
            Error::BadSfntVersion(header.flavor)
        );

        let mut entries = Vec::with_capacity(header.num_tables as usize);
        for _ in 0..header.num_tables {
            entries.push(WoffDirectoryEntry::parse(&mut input)?);
        }
        entries.sort_by_key(|entry| entry.offset);
        check_table_ranges(
            entries.iter().map(|e| (e.tag, e.offset, e.length)),
            data.len(),
        )?;

        let flavor_data = FlavorData::parse(&header, data)?;

        Ok(Self {
            data,
            header,
            entries,
            flavor_data,
            checksums,
        })
    }

    fn table(&self, tag: Tag) -> Result<Cow<'a, [u8]>, Error> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.tag == tag)
            .ok_or(Error::MissingTable(tag))?;
        // Raw bodies (stored length == origLength) are borrowed straight
        // from the file; compressed bodies are inflated into a fresh buffer.
        let data: Cow<'a, [u8]> = if entry.length == entry.orig_length {
            Cow::Borrowed(entry.data_as_slice(self.data)?)
        } else {
            Cow::Owned(entry.load(self.data)?)
        };
        verify_checksum(self.checksums, tag, &data, entry.orig_checksum)?;
        Ok(data)
    }
}

struct Woff2Reader {
    header: WoffHeader,
    /// Directory entries, in physical (running offset) order.
    entries: Vec<Woff2DirectoryEntry>,
    /// The single brotli stream, decompressed eagerly on open and kept for
    /// the life of the reader; table fetches slice into it.
    decompressed: Vec<u8>,
    flavor_data: FlavorData,
    /// Reconstructed 'glyf' + 'loca', built on first request for either.
    reconstructed: Option<GlyfTables>,
}

impl Woff2Reader {
    fn new(data: &[u8]) -> Result<Self, Error> {
        let mut input = data;
        let header = WoffHeader::parse(&mut input)?;
        debug_assert_eq!(header.woff_version, WoffVersion::Woff2);
        // A collection-flavored ("ttcf") WOFF2 also lands here and is
        // rejected: only single fonts are supported.
        bail_if!(
            !is_valid_sfnt_version(header.flavor),
            Error::BadSfntVersion(header.flavor)
        );

        // WOFF2 doesn't store offsets to individual tables. They are
        // recovered by summing the tables' lengths in directory order; the
        // total is the expected size of the decompressed stream.
        let mut total_uncompressed: usize = 0;
        let mut entries = Vec::with_capacity(header.num_tables as usize);
        for _ in 0..header.num_tables {
            let mut entry = Woff2DirectoryEntry::parse(&mut input)?;
            entry.offset = total_uncompressed as u32;
            bail_if!(
                usize_will_overflow(total_uncompressed, entry.length as usize)
                    || total_uncompressed + entry.length as usize > u32::MAX as usize,
                Error::TruncatedInput
            );
            total_uncompressed += entry.length as usize;
            entries.push(entry);
        }

        // The font data is compressed in a single stream comprising all
        // tables, so it is decompressed once as a whole.
        let compressed_size = header.total_compressed_size as usize;
        bail_if!(input.remaining() < compressed_size, Error::TruncatedInput);
        let compressed = &input[..compressed_size];
        let decompressed = decompress_brotli(compressed, total_uncompressed)?;
        bail_if!(
            decompressed.len() != total_uncompressed,
            Error::Decompression(format!(
                "unexpected size for decompressed font data: expected {}, found {}",
                total_uncompressed,
                decompressed.len()
            ))
        );

        let flavor_data = FlavorData::parse(&header, data)?;

        Ok(Self {
            header,
            entries,
            decompressed,
            flavor_data,
            reconstructed: None,
        })
    }

    fn find(&self, tag: Tag) -> Option<&Woff2DirectoryEntry> {
        self.entries.iter().find(|entry| entry.tag == tag)
    }

    fn table(&mut self, tag: Tag) -> Result<Cow<'_, [u8]>, Error> {
        let entry = self.find(tag).ok_or(Error::MissingTable(tag))?;
        if !entry.transformed {
            return Ok(Cow::Borrowed(entry.data_as_slice(&self.decompressed)?));
        }

        // 'loca' is rebuilt as a side effect of reconstructing 'glyf';
        // either request triggers the (cached) reconstruction.
        self.ensure_reconstructed()?;
        let tables = self.reconstructed.as_ref().unwrap();
        if tag == GLYF {
            Ok(Cow::Borrowed(&tables.glyf))
        } else {
            Ok(Cow::Borrowed(&tables.loca))
        }
    }

    fn ensure_reconstructed(&mut self) -> Result<(), Error> {
        if self.reconstructed.is_some() {
            return Ok(());
        }

        let glyf_entry = self.find(GLYF).ok_or(Error::MissingTable(GLYF))?.clone();
        let raw = glyf_entry.data_as_slice(&self.decompressed)?;
        let tables = reconstruct_glyf(raw)?;

        if let Some(loca_entry) = self.find(LOCA) {
            // https://dev.w3.org/webfonts/WOFF2/spec/#conform-mustRejectLoca
            let entry_size: usize = if tables.index_format != 0 { 4 } else { 2 };
            let expected = loca_entry.orig_length as usize;
            bail_if!(
                tables.loca.len() != expected
                    || expected != entry_size * (usize::from(tables.num_glyphs) + 1),
                Error::LocaSizeMismatch {
                    expected,
                    found: tables.loca.len(),
                }
            );
        }

        self.reconstructed = Some(tables);
        Ok(())
    }
}

/// Decompress a brotli stream, checking nothing but the stream itself;
/// callers compare the result length against the declared size.
pub(crate) fn decompress_brotli(data: &[u8], size_hint: usize) -> Result<Vec<u8>, Error> {
    const BROTLI_DECODER_BUFFER_SIZE: usize = 4096;
    let mut decompressor = brotli_decompressor::Decompressor::new(data, BROTLI_DECODER_BUFFER_SIZE);
    let mut output: Vec<u8> = Vec::with_capacity(size_hint);
    decompressor
        .read_to_end(&mut output)
        .map_err(|err| Error::Decompression(err.to_string()))?;
    Ok(output)
}

/// Reader over a TrueType Collection: the `ttcf` header plus one SFNT
/// directory per font, all sharing the same underlying bytes.
pub struct TtcReader<'a> {
    data: &'a [u8],
    header: TtcHeader,
    checksums: ChecksumMode,
}

impl<'a> TtcReader<'a> {
    pub fn new(data: &'a [u8], checksums: ChecksumMode) -> Result<Self, Error> {
        let mut input = data;
        let header = TtcHeader::parse(&mut input)?;
        Ok(Self {
            data,
            header,
            checksums,
        })
    }

    pub fn num_fonts(&self) -> usize {
        self.header.offsets.len()
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// A reader positioned at the selected font's offset table.
    pub fn font(&self, index: usize) -> Result<FontReader<'a>, Error> {
        let offset = *self
            .header
            .offsets
            .get(index)
            .ok_or(Error::BadFontNumber {
                index,
                last: self.num_fonts() - 1,
            })?;
        let reader = SfntReader::new_at(self.data, offset as usize, self.checksums)?;
        Ok(FontReader::from_sfnt(reader))
    }
}

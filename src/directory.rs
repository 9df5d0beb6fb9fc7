//! Table directory entries for the three container layouts.

use std::io::Write;

use bytes::{Buf, BufMut};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use font_types::Tag;

use crate::error::{Error, bail_if, usize_will_overflow};
use crate::tags::{KNOWN_TAGS, UNKNOWN_TAG_INDEX, is_transformed_tag, known_tag_index};
use crate::varint::{BufVariableExt, pack_base128};

fn bounds_checked_slice(data: &[u8], offset: u32, length: u32) -> Result<&[u8], Error> {
    let start = offset as usize;
    bail_if!(
        usize_will_overflow(start, length as usize),
        Error::TruncatedInput
    );
    data.get(start..start + length as usize)
        .ok_or(Error::TruncatedInput)
}

/// Fixed 16-byte entry of an SFNT table directory.
#[derive(Copy, Clone)]
pub struct SfntDirectoryEntry {
    pub tag: Tag,
    pub checksum: u32,
    pub offset: u32,
    pub length: u32,
}

impl SfntDirectoryEntry {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Error> {
        Ok(Self {
            tag: Tag::from_u32(input.try_get_u32()?),
            checksum: input.try_get_u32()?,
            offset: input.try_get_u32()?,
            length: input.try_get_u32()?,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_u32(u32::from_be_bytes(self.tag.to_be_bytes()));
        out.put_u32(self.checksum);
        out.put_u32(self.offset);
        out.put_u32(self.length);
    }

    /// The table body as a sub-slice of the font file.
    pub fn data_as_slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], Error> {
        bounds_checked_slice(data, self.offset, self.length)
    }
}

/// Fixed 20-byte entry of a WOFF 1.0 table directory.
#[derive(Copy, Clone)]
pub struct WoffDirectoryEntry {
    pub tag: Tag,
    pub offset: u32,
    /// Length of the stored (possibly compressed) body.
    pub length: u32,
    /// Length of the uncompressed original table.
    pub orig_length: u32,
    /// Checksum of the uncompressed original table.
    pub orig_checksum: u32,
}

impl WoffDirectoryEntry {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Error> {
        let entry = Self {
            tag: Tag::from_u32(input.try_get_u32()?),
            offset: input.try_get_u32()?,
            length: input.try_get_u32()?,
            orig_length: input.try_get_u32()?,
            orig_checksum: input.try_get_u32()?,
        };
        // origLength >= length must hold; equality means "stored raw".
        bail_if!(
            entry.length > entry.orig_length,
            Error::OverlappingTables(entry.tag)
        );
        Ok(entry)
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_u32(u32::from_be_bytes(self.tag.to_be_bytes()));
        out.put_u32(self.offset);
        out.put_u32(self.length);
        out.put_u32(self.orig_length);
        out.put_u32(self.orig_checksum);
    }

    /// The stored (possibly compressed) table body as a sub-slice of the
    /// font file.
    pub fn data_as_slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], Error> {
        bounds_checked_slice(data, self.offset, self.length)
    }

    /// Load the original table bytes, inflating the body when it was stored
    /// compressed. A body whose stored length equals `origLength` is raw;
    /// there is no flag for this, the lengths are the signal.
    pub fn load(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let raw = bounds_checked_slice(data, self.offset, self.length)?;
        if self.length == self.orig_length {
            return Ok(raw.to_vec());
        }
        let decompressed = decompress_zlib(raw, self.orig_length as usize)?;
        bail_if!(
            decompressed.len() != self.orig_length as usize,
            Error::Decompression(format!(
                "unexpected size for decompressed '{}' table: expected {}, found {}",
                self.tag,
                self.orig_length,
                decompressed.len()
            ))
        );
        Ok(decompressed)
    }

    /// Produce the stored body for `data`, compressing with zlib when that
    /// shrinks it and the entry is not forced raw ('head' always is).
    /// Updates `length`/`origLength` accordingly.
    pub fn store(
        &mut self,
        data: &[u8],
        level: u32,
        uncompressed: bool,
    ) -> Result<Vec<u8>, Error> {
        self.orig_length = data.len() as u32;
        if !uncompressed {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(data)?;
            let compressed = encoder.finish()?;
            if compressed.len() < data.len() {
                self.length = compressed.len() as u32;
                return Ok(compressed);
            }
        }
        self.length = self.orig_length;
        Ok(data.to_vec())
    }
}

pub(crate) fn decompress_zlib(data: &[u8], size_hint: usize) -> Result<Vec<u8>, Error> {
    use flate2::{Decompress, FlushDecompress, Status};
    let mut output: Vec<u8> = Vec::with_capacity(size_hint);
    let mut decompressor = Decompress::new(true);
    let status = decompressor
        .decompress_vec(data, &mut output, FlushDecompress::Finish)
        .map_err(|err| Error::Decompression(err.to_string()))?;
    bail_if!(
        !matches!(status, Status::StreamEnd),
        Error::Decompression("zlib stream larger than its declared size".to_string())
    );
    Ok(output)
}

/// Variable-length entry of a WOFF2 table directory.
///
/// <https://www.w3.org/TR/WOFF2/#table_dir_format>
#[derive(Clone)]
pub struct Woff2DirectoryEntry {
    pub tag: Tag,
    /// Length of the original (untransformed) table.
    pub orig_length: u32,
    /// Length of the table within the decompressed data stream. Equals
    /// `origLength` for untransformed tables and the transformLength for
    /// 'glyf' and 'loca'.
    pub length: u32,
    /// Offset within the decompressed stream; reconstructed by the directory
    /// parser as a running sum of lengths.
    pub offset: u32,
    /// Whether the stored body went through the glyf/loca transform.
    pub transformed: bool,
}

impl Woff2DirectoryEntry {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Error> {
        let flags = input.try_get_u8()?;
        // Bits 6-7 are reserved and must be 0.
        bail_if!(flags & 0xC0 != 0, Error::ReservedBitsSet);

        // Bits [0..5] index the known-tags table; 63 means an explicit
        // 4-byte tag follows.
        let tag = match KNOWN_TAGS.get((flags & UNKNOWN_TAG_INDEX) as usize) {
            Some(&tag) => tag,
            None => Tag::from_u32(input.try_get_u32()?),
        };

        let orig_length = input.try_get_base128_u32()?;
        let transformed = is_transformed_tag(tag);
        let length = if transformed {
            input.try_get_base128_u32()?
        } else {
            orig_length
        };

        // Transformed loca is reconstructed as part of the glyf decoding
        // process, so its stored length must always be 0.
        bail_if!(
            tag == crate::tags::LOCA && length != 0,
            Error::NonEmptyTransformedLoca(length)
        );

        Ok(Self {
            tag,
            orig_length,
            length,
            offset: 0, // set by the directory parser
            transformed,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        let index = known_tag_index(self.tag);
        out.put_u8(index);
        if index == UNKNOWN_TAG_INDEX {
            out.put_u32(u32::from_be_bytes(self.tag.to_be_bytes()));
        }
        out.put_slice(&pack_base128(self.orig_length));
        if self.transformed {
            out.put_slice(&pack_base128(self.length));
        }
    }

    /// The table body as a sub-slice of the decompressed stream.
    pub fn data_as_slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], Error> {
        bounds_checked_slice(data, self.offset, self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{GLYF, LOCA};
    use crate::varint::base128_size;

    #[test]
    fn sfnt_entry_roundtrip() {
        let entry = SfntDirectoryEntry {
            tag: Tag::new(b"cmap"),
            checksum: 0xDEAD_BEEF,
            offset: 0x1C,
            length: 42,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf);
        assert_eq!(buf.len(), crate::header::SFNT_ENTRY_SIZE);
        let parsed = SfntDirectoryEntry::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.tag, entry.tag);
        assert_eq!(parsed.checksum, entry.checksum);
        assert_eq!(parsed.offset, entry.offset);
        assert_eq!(parsed.length, entry.length);
    }

    #[test]
    fn woff_entry_store_keeps_incompressible_data_raw() {
        let mut entry = WoffDirectoryEntry {
            tag: Tag::new(b"test"),
            offset: 0,
            length: 0,
            orig_length: 0,
            orig_checksum: 0,
        };
        // 4 bytes of noise: the zlib header alone is bigger.
        let body = entry.store(&[1, 2, 3, 4], 6, false).unwrap();
        assert_eq!(body, &[1, 2, 3, 4]);
        assert_eq!(entry.length, entry.orig_length);
    }

    #[test]
    fn woff_entry_store_and_load_compressed() {
        let data = vec![7u8; 4096];
        let mut entry = WoffDirectoryEntry {
            tag: Tag::new(b"test"),
            offset: 0,
            length: 0,
            orig_length: 0,
            orig_checksum: 0,
        };
        let body = entry.store(&data, 6, false).unwrap();
        assert!(entry.length < entry.orig_length);
        assert_eq!(entry.orig_length as usize, data.len());
        entry.offset = 0;
        assert_eq!(entry.load(&body).unwrap(), data);
    }

    #[test]
    fn woff_entry_store_uncompressed_flag() {
        let data = vec![7u8; 4096];
        let mut entry = WoffDirectoryEntry {
            tag: Tag::new(b"head"),
            offset: 0,
            length: 0,
            orig_length: 0,
            orig_checksum: 0,
        };
        let body = entry.store(&data, 6, true).unwrap();
        assert_eq!(body, data);
        assert_eq!(entry.length, entry.orig_length);
    }

    #[test]
    fn woff2_entry_known_tag_size() {
        let entry = Woff2DirectoryEntry {
            tag: Tag::new(b"head"),
            orig_length: 54,
            length: 54,
            offset: 0,
            transformed: false,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf);
        assert_eq!(buf.len(), 1 + base128_size(54));
        let parsed = Woff2DirectoryEntry::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.tag, entry.tag);
        assert_eq!(parsed.orig_length, 54);
        assert!(!parsed.transformed);
    }

    #[test]
    fn woff2_entry_unknown_tag_roundtrip() {
        let entry = Woff2DirectoryEntry {
            tag: Tag::new(b"ZZZZ"),
            orig_length: 123456,
            length: 123456,
            offset: 0,
            transformed: false,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf);
        assert_eq!(buf.len(), 1 + 4 + base128_size(123456));
        let parsed = Woff2DirectoryEntry::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.tag, entry.tag);
        assert_eq!(parsed.orig_length, 123456);
    }

    #[test]
    fn woff2_entry_transformed_glyf_carries_both_lengths() {
        let entry = Woff2DirectoryEntry {
            tag: GLYF,
            orig_length: 123456,
            length: 12345,
            offset: 0,
            transformed: true,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf);
        assert_eq!(buf.len(), 1 + base128_size(123456) + base128_size(12345));
        let parsed = Woff2DirectoryEntry::parse(&mut buf.as_slice()).unwrap();
        assert!(parsed.transformed);
        assert_eq!(parsed.orig_length, 123456);
        assert_eq!(parsed.length, 12345);
    }

    #[test]
    fn woff2_entry_rejects_reserved_bits() {
        assert!(matches!(
            Woff2DirectoryEntry::parse(&mut &[0xC0u8][..]),
            Err(Error::ReservedBitsSet)
        ));
    }

    #[test]
    fn woff2_entry_rejects_nonzero_transformed_loca() {
        let mut buf = Vec::new();
        buf.put_u8(known_tag_index(LOCA));
        buf.put_slice(&pack_base128(127));
        buf.put_slice(&pack_base128(1));
        assert!(matches!(
            Woff2DirectoryEntry::parse(&mut buf.as_slice()),
            Err(Error::NonEmptyTransformedLoca(1))
        ));
    }
}

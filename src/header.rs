//! Fixed-layout container headers: SFNT, WOFF, WOFF2 and TTC.

use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::error::{Error, bail_if};
use crate::tags::{SFNT_VERSION_APPLE, SFNT_VERSION_CFF, SFNT_VERSION_TRUETYPE, SIG_TTC, SIG_WOFF, SIG_WOFF2};

pub(crate) const SFNT_HEADER_SIZE: usize = 12;
pub(crate) const SFNT_ENTRY_SIZE: usize = 16;
pub(crate) const WOFF_HEADER_SIZE: usize = 44;
pub(crate) const WOFF2_HEADER_SIZE: usize = 48;
pub(crate) const WOFF_ENTRY_SIZE: usize = 20;
pub(crate) const TTC_HEADER_SIZE: usize = 12;

/// Whether `version` is an accepted sfntVersion for an unwrapped font.
pub(crate) fn is_valid_sfnt_version(version: Tag) -> bool {
    version == SFNT_VERSION_TRUETYPE || version == SFNT_VERSION_CFF || version == SFNT_VERSION_APPLE
}

/// `searchRange`, `entrySelector` and `rangeShift` for a directory of
/// `num_tables` 16-byte entries.
pub(crate) fn search_range(num_tables: u16) -> (u16, u16, u16) {
    if num_tables == 0 {
        return (0, 0, 0);
    }
    let entry_selector = 15 - num_tables.leading_zeros() as u16;
    let search_range = 16u16 << entry_selector;
    let range_shift = num_tables.wrapping_mul(16).saturating_sub(search_range);
    (search_range, entry_selector, range_shift)
}

/// The 12-byte offset table at the start of an SFNT font.
pub struct SfntHeader {
    pub sfnt_version: Tag,
    pub num_tables: u16,
    pub search_range: u16,
    pub entry_selector: u16,
    pub range_shift: u16,
}

impl SfntHeader {
    pub fn new(sfnt_version: Tag, num_tables: u16) -> Self {
        let (search_range, entry_selector, range_shift) = search_range(num_tables);
        Self {
            sfnt_version,
            num_tables,
            search_range,
            entry_selector,
            range_shift,
        }
    }

    pub fn parse(input: &mut impl Buf) -> Result<Self, Error> {
        Ok(Self {
            sfnt_version: Tag::from_u32(input.try_get_u32()?),
            num_tables: input.try_get_u16()?,
            search_range: input.try_get_u16()?,
            entry_selector: input.try_get_u16()?,
            range_shift: input.try_get_u16()?,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_u32(u32::from_be_bytes(self.sfnt_version.to_be_bytes()));
        out.put_u16(self.num_tables);
        out.put_u16(self.search_range);
        out.put_u16(self.entry_selector);
        out.put_u16(self.range_shift);
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum WoffVersion {
    Woff1 = 1,
    Woff2 = 2,
}

/// Header shared by WOFF 1.0 and WOFF 2.0 containers.
///
/// The layouts are identical except that WOFF2 inserts a
/// `totalCompressedSize` field between `totalSfntSize` and `majorVersion`.
///
/// <https://www.w3.org/TR/WOFF2/#woff20Header>
pub struct WoffHeader {
    pub woff_version: WoffVersion,
    /// The "sfnt version" of the wrapped font.
    pub flavor: Tag,
    /// Total size of the WOFF file.
    pub length: u32,
    /// Number of entries in the table directory.
    pub num_tables: u16,
    /// Reserved; set to 0.
    pub reserved: u16,
    /// Size of the uncompressed SFNT equivalent, including header, directory
    /// and 4-byte-padded table bodies.
    pub total_sfnt_size: u32,
    /// (WOFF2 only) Total length of the compressed data block.
    pub total_compressed_size: u32,
    pub major_version: u16,
    pub minor_version: u16,
    /// Offset to the metadata block, from the beginning of the file.
    pub meta_offset: u32,
    /// Length of the compressed metadata block.
    pub meta_length: u32,
    /// Uncompressed size of the metadata block.
    pub meta_orig_length: u32,
    /// Offset to the private data block, from the beginning of the file.
    pub priv_offset: u32,
    /// Length of the private data block.
    pub priv_length: u32,
}

impl WoffHeader {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Error> {
        let input_len = input.remaining();

        let signature = Tag::from_u32(input.try_get_u32()?);
        let woff_version = if signature == SIG_WOFF {
            WoffVersion::Woff1
        } else if signature == SIG_WOFF2 {
            WoffVersion::Woff2
        } else {
            return Err(Error::BadSignature(signature.to_be_bytes()));
        };

        let header = Self {
            woff_version,
            flavor: Tag::from_u32(input.try_get_u32()?),
            length: input.try_get_u32()?,
            num_tables: input.try_get_u16()?,
            reserved: input.try_get_u16()?,
            total_sfnt_size: input.try_get_u32()?,
            // The totalCompressedSize field only exists in WOFF2 headers.
            total_compressed_size: match woff_version {
                WoffVersion::Woff1 => 0,
                WoffVersion::Woff2 => input.try_get_u32()?,
            },
            major_version: input.try_get_u16()?,
            minor_version: input.try_get_u16()?,
            meta_offset: input.try_get_u32()?,
            meta_length: input.try_get_u32()?,
            meta_orig_length: input.try_get_u32()?,
            priv_offset: input.try_get_u32()?,
            priv_length: input.try_get_u32()?,
        };

        let input_len_u32 = input_len as u32;
        bail_if!(
            header.length as usize != input_len,
            Error::BadFileSize {
                declared: header.length,
                actual: input_len,
            }
        );
        bail_if!(header.num_tables == 0, Error::TruncatedInput);
        bail_if!(header.reserved != 0, Error::ReservedBitsSet);
        if header.meta_offset != 0 {
            bail_if!(
                header.meta_offset >= input_len_u32
                    || input_len_u32 - header.meta_offset < header.meta_length,
                Error::TruncatedInput
            );
        }
        if header.priv_offset != 0 {
            bail_if!(
                header.priv_offset >= input_len_u32
                    || input_len_u32 - header.priv_offset < header.priv_length,
                Error::TruncatedInput
            );
        }

        Ok(header)
    }

    pub fn write(&self, out: &mut impl BufMut) {
        let signature = match self.woff_version {
            WoffVersion::Woff1 => SIG_WOFF,
            WoffVersion::Woff2 => SIG_WOFF2,
        };
        out.put_u32(u32::from_be_bytes(signature.to_be_bytes()));
        out.put_u32(u32::from_be_bytes(self.flavor.to_be_bytes()));
        out.put_u32(self.length);
        out.put_u16(self.num_tables);
        out.put_u16(self.reserved);
        out.put_u32(self.total_sfnt_size);
        if self.woff_version == WoffVersion::Woff2 {
            out.put_u32(self.total_compressed_size);
        }
        out.put_u16(self.major_version);
        out.put_u16(self.minor_version);
        out.put_u32(self.meta_offset);
        out.put_u32(self.meta_length);
        out.put_u32(self.meta_orig_length);
        out.put_u32(self.priv_offset);
        out.put_u32(self.priv_length);
    }
}

/// TrueType Collection header: `"ttcf"`, version, and one offset per font.
///
/// Version 2.0 appends optional DSIG fields after the offset table; they are
/// skipped on read and never written (TTC output is out of scope).
pub struct TtcHeader {
    pub version: u32,
    pub offsets: Vec<u32>,
}

impl TtcHeader {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Error> {
        let tag = Tag::from_u32(input.try_get_u32()?);
        bail_if!(tag != SIG_TTC, Error::BadSignature(tag.to_be_bytes()));

        let version = input.try_get_u32()?;
        bail_if!(
            version != 0x0001_0000 && version != 0x0002_0000,
            Error::BadSfntVersion(SIG_TTC)
        );

        let num_fonts = input.try_get_u32()?;
        bail_if!(num_fonts == 0, Error::TruncatedInput);
        bail_if!(
            input.remaining() < num_fonts as usize * 4,
            Error::TruncatedInput
        );
        let mut offsets = Vec::with_capacity(num_fonts as usize);
        for _ in 0..num_fonts {
            offsets.push(input.try_get_u32()?);
        }

        Ok(Self { version, offsets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_range_values() {
        // numTables = 9: floor(log2 9) = 3, searchRange = 16 * 8 = 128
        assert_eq!(search_range(9), (128, 3, 9 * 16 - 128));
        assert_eq!(search_range(1), (16, 0, 0));
        assert_eq!(search_range(16), (256, 4, 0));
        assert_eq!(search_range(17), (256, 4, 16));
    }

    #[test]
    fn sfnt_header_roundtrip() {
        let header = SfntHeader::new(SFNT_VERSION_TRUETYPE, 11);
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), SFNT_HEADER_SIZE);

        let parsed = SfntHeader::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.sfnt_version, SFNT_VERSION_TRUETYPE);
        assert_eq!(parsed.num_tables, 11);
        assert_eq!(parsed.search_range, 128);
        assert_eq!(parsed.entry_selector, 3);
        assert_eq!(parsed.range_shift, 11 * 16 - 128);
    }

    #[test]
    fn woff_header_rejects_wrong_length() {
        let mut buf = Vec::new();
        let header = WoffHeader {
            woff_version: WoffVersion::Woff1,
            flavor: SFNT_VERSION_TRUETYPE,
            length: 9999,
            num_tables: 1,
            reserved: 0,
            total_sfnt_size: 0,
            total_compressed_size: 0,
            major_version: 0,
            minor_version: 0,
            meta_offset: 0,
            meta_length: 0,
            meta_orig_length: 0,
            priv_offset: 0,
            priv_length: 0,
        };
        header.write(&mut buf);
        assert_eq!(buf.len(), WOFF_HEADER_SIZE);
        assert!(matches!(
            WoffHeader::parse(&mut buf.as_slice()),
            Err(Error::BadFileSize { declared: 9999, .. })
        ));
    }

    #[test]
    fn ttc_header_parse() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"ttcf");
        buf.put_u32(0x0001_0000);
        buf.put_u32(2);
        buf.put_u32(12 + 8);
        buf.put_u32(1000);
        let header = TtcHeader::parse(&mut buf.as_slice()).unwrap();
        assert_eq!(header.version, 0x0001_0000);
        assert_eq!(header.offsets, vec![20, 1000]);
    }
}

//! The font facade: a tag → table-bytes map plus the few decoded views of
//! 'head', 'maxp' and 'loca' that the codec itself needs.

use std::collections::BTreeMap;

use font_types::Tag;

use crate::error::Error;
use crate::flavor_data::FlavorData;
use crate::reader::{ChecksumMode, FontReader, TtcReader};
use crate::tags::SIG_TTC;
use crate::writer::{EncodeOptions, Flavor, FontWriter};

/// A single decoded font: its sfntVersion and one payload per table.
///
/// Table payloads are fully decoded (decompressed and, for WOFF2, with
/// 'glyf'/'loca' reconstructed) and owned by the font.
#[derive(Clone, Debug)]
pub struct Font {
    pub sfnt_version: Tag,
    pub tables: BTreeMap<Tag, Vec<u8>>,
    /// WOFF/WOFF2 metadata carried through a round-trip, if any.
    pub flavor_data: Option<FlavorData>,
}

impl Default for Font {
    fn default() -> Self {
        Self {
            sfnt_version: crate::tags::SFNT_VERSION_TRUETYPE,
            tables: BTreeMap::new(),
            flavor_data: None,
        }
    }
}

impl Font {
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.tables.contains_key(&tag)
    }

    pub fn table(&self, tag: Tag) -> Option<&[u8]> {
        self.tables.get(&tag).map(Vec::as_slice)
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.tables.keys().copied()
    }
}

/// The fonts of a TrueType Collection, decoded individually.
#[derive(Clone, Debug, Default)]
pub struct FontCollection {
    pub fonts: Vec<Font>,
}

/// Result of [`decode`]: a single font, or every font of a collection.
#[derive(Clone, Debug)]
pub enum FontFile {
    Single(Font),
    Collection(FontCollection),
}

impl FontFile {
    /// The decoded font, failing on collections.
    pub fn into_single(self) -> Result<Font, Error> {
        match self {
            FontFile::Single(font) => Ok(font),
            FontFile::Collection(_) => Err(Error::IsCollection),
        }
    }
}

/// Decode a font container of any supported flavor into a tag → bytes map.
///
/// The flavor is inferred from the first four bytes: SFNT, WOFF, WOFF2 or
/// TTC. Per-table checksums are verified in the default [`ChecksumMode::Warn`]
/// mode; use [`decode_with_checksums`] to tighten or disable that.
pub fn decode(data: &[u8]) -> Result<FontFile, Error> {
    decode_with_checksums(data, ChecksumMode::default())
}

pub fn decode_with_checksums(data: &[u8], checksums: ChecksumMode) -> Result<FontFile, Error> {
    if data.len() >= 4 && data[..4] == SIG_TTC.to_be_bytes() {
        let ttc = TtcReader::new(data, checksums)?;
        let mut fonts = Vec::with_capacity(ttc.num_fonts());
        for index in 0..ttc.num_fonts() {
            let mut reader = ttc.font(index)?;
            fonts.push(font_from_reader(&mut reader)?);
        }
        return Ok(FontFile::Collection(FontCollection { fonts }));
    }

    let mut reader = FontReader::new(data, checksums)?;
    Ok(FontFile::Single(font_from_reader(&mut reader)?))
}

fn font_from_reader(reader: &mut FontReader<'_>) -> Result<Font, Error> {
    let tags: Vec<Tag> = reader.tags().collect();
    let mut tables = BTreeMap::new();
    for tag in tags {
        let data = reader.table(tag)?.into_owned();
        tables.insert(tag, data);
    }
    Ok(Font {
        sfnt_version: reader.sfnt_version(),
        tables,
        flavor_data: reader.flavor_data().cloned(),
    })
}

/// Pack a font into the requested container flavor.
pub fn encode(font: &Font, flavor: Flavor, options: &EncodeOptions) -> Result<Vec<u8>, Error> {
    let mut writer = FontWriter::new(
        font.tables.len() as u16,
        font.sfnt_version,
        flavor,
        font.flavor_data.clone(),
        options.clone(),
    );
    for (tag, data) in &font.tables {
        writer.put(*tag, data)?;
    }
    writer.finish()
}

/// Field accessors for the raw 'head' table payload.
pub mod head {
    use crate::error::{Error, bail_if};

    const FONT_REVISION_OFFSET: usize = 4;
    const CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;
    const FLAGS_OFFSET: usize = 16;
    const INDEX_TO_LOC_FORMAT_OFFSET: usize = 50;

    /// Bit 11 of head.flags: "font has undergone a lossless modifying
    /// transform", e.g. the WOFF2 glyf/loca transform.
    pub const FLAG_TRANSFORMED: u16 = 1 << 11;

    fn get_u16(data: &[u8], offset: usize) -> Result<u16, Error> {
        let bytes = data
            .get(offset..offset + 2)
            .ok_or(Error::TruncatedInput)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn flags(data: &[u8]) -> Result<u16, Error> {
        get_u16(data, FLAGS_OFFSET)
    }

    pub fn set_flags(data: &mut [u8], flags: u16) -> Result<(), Error> {
        bail_if!(data.len() < FLAGS_OFFSET + 2, Error::TruncatedInput);
        data[FLAGS_OFFSET..FLAGS_OFFSET + 2].copy_from_slice(&flags.to_be_bytes());
        Ok(())
    }

    pub fn index_to_loc_format(data: &[u8]) -> Result<i16, Error> {
        get_u16(data, INDEX_TO_LOC_FORMAT_OFFSET).map(|value| value as i16)
    }

    pub fn check_sum_adjustment(data: &[u8]) -> Result<u32, Error> {
        let bytes = data
            .get(CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4)
            .ok_or(Error::TruncatedInput)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn set_check_sum_adjustment(data: &mut [u8], value: u32) -> Result<(), Error> {
        bail_if!(
            data.len() < CHECKSUM_ADJUSTMENT_OFFSET + 4,
            Error::TruncatedInput
        );
        data[CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4]
            .copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// The fontRevision field read as two u16s; the WOFF header's
    /// majorVersion/minorVersion default to these when no flavor data says
    /// otherwise.
    pub fn font_revision_halves(data: &[u8]) -> Result<(u16, u16), Error> {
        Ok((
            get_u16(data, FONT_REVISION_OFFSET)?,
            get_u16(data, FONT_REVISION_OFFSET + 2)?,
        ))
    }
}

/// Field accessors for the raw 'maxp' table payload.
pub mod maxp {
    use crate::error::Error;

    const NUM_GLYPHS_OFFSET: usize = 4;

    pub fn num_glyphs(data: &[u8]) -> Result<u16, Error> {
        let bytes = data
            .get(NUM_GLYPHS_OFFSET..NUM_GLYPHS_OFFSET + 2)
            .ok_or(Error::TruncatedInput)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }
}

/// Codec for the 'loca' index table.
pub mod loca {
    use bytes::{Buf, BufMut};

    use crate::error::{Error, bail_if};

    /// Decode a 'loca' payload into byte offsets. Short-format entries store
    /// the offset divided by two.
    pub fn parse(data: &[u8], index_format: i16) -> Result<Vec<u32>, Error> {
        let entry_size = if index_format == 0 { 2 } else { 4 };
        bail_if!(
            data.len() % entry_size != 0,
            Error::BadGlyphData("'loca' size is not a multiple of its entry size")
        );
        let mut input = data;
        let mut offsets = Vec::with_capacity(data.len() / entry_size);
        while input.has_remaining() {
            let offset = if index_format == 0 {
                u32::from(input.try_get_u16()?) * 2
            } else {
                input.try_get_u32()?
            };
            offsets.push(offset);
        }
        Ok(offsets)
    }

    /// Encode offsets as a 'loca' payload. With the short index format every
    /// offset must be even and no larger than `2 * 0xFFFF`.
    pub fn encode(offsets: &[u32], index_format: i16) -> Result<Vec<u8>, Error> {
        let entry_size = if index_format == 0 { 2 } else { 4 };
        let mut data: Vec<u8> = Vec::with_capacity(offsets.len() * entry_size);
        if index_format == 0 {
            for &offset in offsets {
                bail_if!(
                    offset % 2 != 0 || offset > 2 * 0xFFFF,
                    Error::InvalidIndexFormat
                );
                data.put_u16((offset >> 1) as u16);
            }
        } else {
            for &offset in offsets {
                data.put_u32(offset);
            }
        }
        Ok(data)
    }
}

//! Container writer: collects raw tables in any order and assembles a
//! complete SFNT, WOFF or WOFF2 container when finished.
//!
//! Output is built in memory and only handed back on success, so a failed
//! encode never leaks a partial container.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use font_types::Tag;

use crate::checksum::{checksum, checksum_adjustment, head_checksum};
use crate::directory::{SfntDirectoryEntry, Woff2DirectoryEntry, WoffDirectoryEntry};
use crate::error::{Error, bail_if};
use crate::flavor_data::FlavorData;
use crate::font::{head, maxp};
use crate::header::{
    SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE, SfntHeader, WOFF2_HEADER_SIZE, WOFF_ENTRY_SIZE,
    WOFF_HEADER_SIZE, WoffHeader, WoffVersion,
};
use crate::tags::{GLYF, HEAD, LOCA, MAXP, is_transformed_tag};
use crate::transform::transform_glyf;

/// Target container format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flavor {
    Sfnt,
    Woff,
    Woff2,
}

/// Hint passed to the brotli encoder for the WOFF2 data stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BrotliMode {
    Generic,
    Text,
    #[default]
    Font,
}

/// Physical ordering of the table bodies inside a WOFF2 container.
///
/// Alphabetical order is the default for compatibility with OTS; insertion
/// order preserves the order tables were handed to the writer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TableOrder {
    #[default]
    Alphabetical,
    InsertionOrder,
}

/// Compression and layout knobs for [`crate::encode`].
#[derive(Clone, Debug)]
pub struct EncodeOptions {
    /// zlib level for WOFF 1.0 table bodies and metadata, 0..=9.
    pub zlib_level: u32,
    /// brotli quality for the WOFF2 data stream, 0..=11.
    pub brotli_quality: u32,
    pub brotli_mode: BrotliMode,
    pub woff2_table_order: TableOrder,
    /// Set bit 11 of head.flags ("font has undergone a lossless modifying
    /// transform") on WOFF2 encode. Off by default; a round-trip then
    /// reproduces the input tables bit for bit.
    pub set_transformed_flag: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            zlib_level: 6,
            brotli_quality: 11,
            brotli_mode: BrotliMode::default(),
            woff2_table_order: TableOrder::default(),
            set_transformed_flag: false,
        }
    }
}

struct TableRecord {
    data: Vec<u8>,
    /// Checksum of the raw table; computed with the adjustment field zeroed
    /// for 'head'.
    checksum: u32,
}

/// Writer for a single font.
///
/// Feed every table with [`put`](Self::put), then call
/// [`finish`](Self::finish). The number of tables must match the count
/// declared up front, and the order of `put` calls never affects the output
/// (except under [`TableOrder::InsertionOrder`]).
pub struct FontWriter {
    flavor: Flavor,
    sfnt_version: Tag,
    num_tables: u16,
    options: EncodeOptions,
    flavor_data: Option<FlavorData>,
    tables: BTreeMap<Tag, TableRecord>,
    insertion_order: Vec<Tag>,
}

impl FontWriter {
    pub fn new(
        num_tables: u16,
        sfnt_version: Tag,
        flavor: Flavor,
        flavor_data: Option<FlavorData>,
        options: EncodeOptions,
    ) -> Self {
        Self {
            flavor,
            sfnt_version,
            num_tables,
            options,
            flavor_data,
            tables: BTreeMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Record one table's raw (SFNT-layout) bytes.
    pub fn put(&mut self, tag: Tag, data: &[u8]) -> Result<(), Error> {
        bail_if!(self.tables.contains_key(&tag), Error::RewriteForbidden(tag));

        let mut data = data.to_vec();
        if tag == HEAD && self.flavor == Flavor::Woff2 && self.options.set_transformed_flag {
            let flags = head::flags(&data)?;
            head::set_flags(&mut data, flags | head::FLAG_TRANSFORMED)?;
        }

        let checksum = if tag == HEAD {
            head_checksum(&data)
        } else {
            checksum(&data)
        };

        self.tables.insert(tag, TableRecord { data, checksum });
        self.insertion_order.push(tag);
        Ok(())
    }

    /// Assemble and return the container.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        bail_if!(
            self.tables.len() != self.num_tables as usize,
            Error::WrongTableCount {
                expected: self.num_tables,
                found: self.tables.len(),
            }
        );

        match self.flavor {
            Flavor::Sfnt => self.finish_sfnt(),
            Flavor::Woff => self.finish_woff(),
            Flavor::Woff2 => self.finish_woff2(),
        }
    }

    /// Offsets and lengths of the (possibly hypothetical) SFNT layout with
    /// table bodies in `order`, plus its total size. This layout is what
    /// `totalSfntSize` and the checksum adjustment are computed against.
    fn sfnt_layout(&self, order: &[Tag]) -> (BTreeMap<Tag, (u32, u32)>, u32) {
        let mut offset = (SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * self.tables.len()) as u32;
        let mut layout = BTreeMap::new();
        for tag in order {
            let length = self.tables[tag].data.len() as u32;
            layout.insert(*tag, (offset, length));
            offset = offset.wrapping_add(round4(length));
        }
        (layout, offset)
    }

    /// checkSumAdjustment over the SFNT layout in `layout`: the sum of every
    /// table checksum plus the checksum of the directory itself, subtracted
    /// from the magic constant. For the WOFF flavors this directory is never
    /// written anywhere; it exists only for this computation.
    fn master_checksum_adjustment(&self, layout: &BTreeMap<Tag, (u32, u32)>) -> u32 {
        let mut directory =
            Vec::with_capacity(SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * self.tables.len());
        SfntHeader::new(self.sfnt_version, self.num_tables).write(&mut directory);
        for (tag, record) in &self.tables {
            let (offset, length) = layout[tag];
            SfntDirectoryEntry {
                tag: *tag,
                checksum: record.checksum,
                offset,
                length,
            }
            .write(&mut directory);
        }

        let mut total = checksum(&directory);
        for record in self.tables.values() {
            total = total.wrapping_add(record.checksum);
        }
        checksum_adjustment(total)
    }

    fn patch_head_adjustment(&mut self, adjustment: u32) -> Result<(), Error> {
        if let Some(record) = self.tables.get_mut(&HEAD) {
            head::set_check_sum_adjustment(&mut record.data, adjustment)?;
        }
        Ok(())
    }

    /// The WOFF header's majorVersion/minorVersion: explicit flavor data
    /// wins, then the head table's fontRevision, then zero.
    fn woff_version_fields(&self) -> (u16, u16) {
        if let Some(version) = self.flavor_data.as_ref().and_then(|data| data.version) {
            return version;
        }
        if let Some(record) = self.tables.get(&HEAD) {
            if let Ok(halves) = head::font_revision_halves(&record.data) {
                return halves;
            }
        }
        (0, 0)
    }

    fn finish_sfnt(mut self) -> Result<Vec<u8>, Error> {
        let order: Vec<Tag> = self.tables.keys().copied().collect();
        let (layout, total_size) = self.sfnt_layout(&order);

        let adjustment = self.master_checksum_adjustment(&layout);
        self.patch_head_adjustment(adjustment)?;

        let mut out: Vec<u8> = Vec::with_capacity(total_size as usize);
        SfntHeader::new(self.sfnt_version, self.num_tables).write(&mut out);
        for tag in &order {
            let (offset, length) = layout[tag];
            SfntDirectoryEntry {
                tag: *tag,
                checksum: self.tables[tag].checksum,
                offset,
                length,
            }
            .write(&mut out);
        }
        for tag in &order {
            debug_assert_eq!(out.len() as u32, layout[tag].0);
            out.extend_from_slice(&self.tables[tag].data);
            out.resize(round4(out.len() as u32) as usize, 0);
        }
        Ok(out)
    }

    fn finish_woff(mut self) -> Result<Vec<u8>, Error> {
        let order: Vec<Tag> = self.tables.keys().copied().collect();
        let (orig_layout, total_sfnt_size) = self.sfnt_layout(&order);

        // 'head' is stored raw, so the adjustment can be patched into its
        // payload before the bodies are encoded.
        let adjustment = self.master_checksum_adjustment(&orig_layout);
        self.patch_head_adjustment(adjustment)?;

        let zlib_level = self.options.zlib_level.min(9);
        let mut entries: Vec<WoffDirectoryEntry> = Vec::with_capacity(order.len());
        let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(order.len());
        let mut offset = (WOFF_HEADER_SIZE + WOFF_ENTRY_SIZE * order.len()) as u32;
        for tag in &order {
            let record = &self.tables[tag];
            let mut entry = WoffDirectoryEntry {
                tag: *tag,
                offset,
                length: 0,
                orig_length: 0,
                orig_checksum: record.checksum,
            };
            let body = entry.store(&record.data, zlib_level, *tag == HEAD)?;
            offset = offset.wrapping_add(round4(entry.length));
            entries.push(entry);
            bodies.push(body);
        }

        let (major_version, minor_version) = self.woff_version_fields();
        let empty = FlavorData::default();
        let flavor_data = self.flavor_data.as_ref().unwrap_or(&empty);

        // Metadata goes right after the (4-byte aligned) table bodies;
        // private data is aligned separately.
        let mut meta_offset = 0u32;
        let mut meta_length = 0u32;
        let mut meta_orig_length = 0u32;
        let compressed_metadata = match &flavor_data.metadata {
            Some(metadata) => {
                meta_orig_length = metadata.len() as u32;
                meta_offset = offset;
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(zlib_level));
                encoder.write_all(metadata)?;
                let compressed = encoder.finish()?;
                meta_length = compressed.len() as u32;
                offset += meta_length;
                Some(compressed)
            }
            None => None,
        };

        let mut priv_offset = 0u32;
        let mut priv_length = 0u32;
        if let Some(private_data) = &flavor_data.private_data {
            offset = round4(offset);
            priv_offset = offset;
            priv_length = private_data.len() as u32;
            offset += priv_length;
        }

        let header = WoffHeader {
            woff_version: WoffVersion::Woff1,
            flavor: self.sfnt_version,
            length: offset,
            num_tables: self.num_tables,
            reserved: 0,
            total_sfnt_size,
            total_compressed_size: 0,
            major_version,
            minor_version,
            meta_offset,
            meta_length,
            meta_orig_length,
            priv_offset,
            priv_length,
        };

        let mut out: Vec<u8> = Vec::with_capacity(offset as usize);
        header.write(&mut out);
        for entry in &entries {
            entry.write(&mut out);
        }
        for body in &bodies {
            out.extend_from_slice(body);
            out.resize(round4(out.len() as u32) as usize, 0);
        }
        if let Some(metadata) = &compressed_metadata {
            debug_assert_eq!(out.len() as u32, meta_offset);
            out.extend_from_slice(metadata);
        }
        if let Some(private_data) = &flavor_data.private_data {
            out.resize(round4(out.len() as u32) as usize, 0);
            debug_assert_eq!(out.len() as u32, priv_offset);
            out.extend_from_slice(private_data);
        }
        Ok(out)
    }

    fn finish_woff2(mut self) -> Result<Vec<u8>, Error> {
        let order: Vec<Tag> = match self.options.woff2_table_order {
            TableOrder::Alphabetical => self.tables.keys().copied().collect(),
            TableOrder::InsertionOrder => self.insertion_order.clone(),
        };
        let (orig_layout, total_sfnt_size) = self.sfnt_layout(&order);

        // The adjustment is computed against the would-be SFNT layout and
        // patched into the head copy that enters the compressed stream.
        let adjustment = self.master_checksum_adjustment(&orig_layout);
        self.patch_head_adjustment(adjustment)?;

        // The glyf transform needs head.indexToLocFormat, maxp.numGlyphs and
        // the raw loca payload.
        let transform_inputs = if self.tables.contains_key(&GLYF) || self.tables.contains_key(&LOCA)
        {
            let glyf_record = self.tables.get(&GLYF).ok_or(Error::MissingTable(GLYF))?;
            let loca_record = self.tables.get(&LOCA).ok_or(Error::MissingTable(LOCA))?;
            let head_record = self.tables.get(&HEAD).ok_or(Error::MissingTable(HEAD))?;
            let maxp_record = self.tables.get(&MAXP).ok_or(Error::MissingTable(MAXP))?;
            let index_format = head::index_to_loc_format(&head_record.data)?;
            let num_glyphs = maxp::num_glyphs(&maxp_record.data)?;
            Some(transform_glyf(
                &glyf_record.data,
                &loca_record.data,
                index_format,
                num_glyphs,
            )?)
        } else {
            None
        };

        // Concatenate the (possibly transformed) bodies with no padding.
        let mut entries: Vec<Woff2DirectoryEntry> = Vec::with_capacity(order.len());
        let mut buffer: Vec<u8> = Vec::new();
        for tag in &order {
            let record = &self.tables[tag];
            let body: &[u8] = if *tag == LOCA {
                // Transformed loca is rebuilt from glyf on decode; its body
                // is always empty.
                &[]
            } else if *tag == GLYF {
                transform_inputs.as_deref().ok_or(Error::MissingTable(GLYF))?
            } else {
                &record.data
            };
            entries.push(Woff2DirectoryEntry {
                tag: *tag,
                orig_length: record.data.len() as u32,
                length: body.len() as u32,
                offset: buffer.len() as u32,
                transformed: is_transformed_tag(*tag),
            });
            buffer.extend_from_slice(body);
        }

        let compressed = compress_brotli(
            &buffer,
            self.options.brotli_quality.min(11),
            self.options.brotli_mode,
        )?;
        let total_compressed_size = compressed.len() as u32;

        let mut directory: Vec<u8> = Vec::new();
        for entry in &entries {
            entry.write(&mut directory);
        }

        let mut offset = (WOFF2_HEADER_SIZE + directory.len()) as u32 + total_compressed_size;
        // The compressed block is padded before anything that follows (and
        // at the end of the file).
        offset = round4(offset);

        let (major_version, minor_version) = self.woff_version_fields();
        let empty = FlavorData::default();
        let flavor_data = self.flavor_data.as_ref().unwrap_or(&empty);

        let mut meta_offset = 0u32;
        let mut meta_length = 0u32;
        let mut meta_orig_length = 0u32;
        let compressed_metadata = match &flavor_data.metadata {
            Some(metadata) => {
                meta_orig_length = metadata.len() as u32;
                meta_offset = offset;
                let compressed =
                    compress_brotli(metadata, self.options.brotli_quality.min(11), BrotliMode::Generic)?;
                meta_length = compressed.len() as u32;
                offset += meta_length;
                Some(compressed)
            }
            None => None,
        };

        let mut priv_offset = 0u32;
        let mut priv_length = 0u32;
        if let Some(private_data) = &flavor_data.private_data {
            offset = round4(offset);
            priv_offset = offset;
            priv_length = private_data.len() as u32;
            offset += priv_length;
        }

        let header = WoffHeader {
            woff_version: WoffVersion::Woff2,
            flavor: self.sfnt_version,
            length: offset,
            num_tables: self.num_tables,
            reserved: 0,
            total_sfnt_size,
            total_compressed_size,
            major_version,
            minor_version,
            meta_offset,
            meta_length,
            meta_orig_length,
            priv_offset,
            priv_length,
        };

        let mut out: Vec<u8> = Vec::with_capacity(offset as usize);
        header.write(&mut out);
        out.extend_from_slice(&directory);
        out.extend_from_slice(&compressed);
        out.resize(round4(out.len() as u32) as usize, 0);
        if let Some(metadata) = &compressed_metadata {
            debug_assert_eq!(out.len() as u32, meta_offset);
            out.extend_from_slice(metadata);
        }
        if let Some(private_data) = &flavor_data.private_data {
            out.resize(round4(out.len() as u32) as usize, 0);
            debug_assert_eq!(out.len() as u32, priv_offset);
            out.extend_from_slice(private_data);
        }
        Ok(out)
    }
}

/// Round up to the nearest multiple of 4, saturating instead of wrapping on
/// overflow.
fn round4(value: u32) -> u32 {
    match value.checked_add(3) {
        Some(value_plus_3) => value_plus_3 & !3,
        None => value,
    }
}

fn compress_brotli(data: &[u8], quality: u32, mode: BrotliMode) -> Result<Vec<u8>, Error> {
    use brotli::enc::BrotliEncoderParams;
    use brotli::enc::backward_references::BrotliEncoderMode;

    let mut params = BrotliEncoderParams::default();
    params.quality = quality as i32;
    params.mode = match mode {
        BrotliMode::Generic => BrotliEncoderMode::BROTLI_MODE_GENERIC,
        BrotliMode::Text => BrotliEncoderMode::BROTLI_MODE_TEXT,
        BrotliMode::Font => BrotliEncoderMode::BROTLI_MODE_FONT,
    };
    let mut output: Vec<u8> = Vec::new();
    brotli::BrotliCompress(&mut &data[..], &mut output, &params)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::CHECKSUM_MAGIC;

    fn minimal_head() -> Vec<u8> {
        let mut head = vec![0u8; 54];
        head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
        head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
        head[50..52].copy_from_slice(&1u16.to_be_bytes());
        head
    }

    #[test]
    fn rewriting_a_table_is_forbidden() {
        let mut writer = FontWriter::new(
            1,
            crate::tags::SFNT_VERSION_TRUETYPE,
            Flavor::Sfnt,
            None,
            EncodeOptions::default(),
        );
        writer.put(Tag::new(b"cvt "), &[0, 1]).unwrap();
        assert!(matches!(
            writer.put(Tag::new(b"cvt "), &[2, 3]),
            Err(Error::RewriteForbidden(_))
        ));
    }

    #[test]
    fn table_count_must_match() {
        let mut writer = FontWriter::new(
            2,
            crate::tags::SFNT_VERSION_TRUETYPE,
            Flavor::Sfnt,
            None,
            EncodeOptions::default(),
        );
        writer.put(Tag::new(b"cvt "), &[0, 1]).unwrap();
        assert!(matches!(
            writer.finish(),
            Err(Error::WrongTableCount { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn sfnt_output_sums_to_the_magic_constant() {
        let mut writer = FontWriter::new(
            2,
            crate::tags::SFNT_VERSION_TRUETYPE,
            Flavor::Sfnt,
            None,
            EncodeOptions::default(),
        );
        writer.put(HEAD, &minimal_head()).unwrap();
        writer.put(Tag::new(b"cvt "), &[0, 64, 0, 65]).unwrap();
        let data = writer.finish().unwrap();
        assert_eq!(checksum(&data), CHECKSUM_MAGIC);
    }

    #[test]
    fn put_order_does_not_affect_sfnt_output() {
        let make = |first_cvt: bool| {
            let mut writer = FontWriter::new(
                2,
                crate::tags::SFNT_VERSION_TRUETYPE,
                Flavor::Sfnt,
                None,
                EncodeOptions::default(),
            );
            if first_cvt {
                writer.put(Tag::new(b"cvt "), &[0, 64, 0, 65]).unwrap();
                writer.put(HEAD, &minimal_head()).unwrap();
            } else {
                writer.put(HEAD, &minimal_head()).unwrap();
                writer.put(Tag::new(b"cvt "), &[0, 64, 0, 65]).unwrap();
            }
            writer.finish().unwrap()
        };
        assert_eq!(make(true), make(false));
    }
}

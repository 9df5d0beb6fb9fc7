//! Reconstruction of the SFNT 'glyf' and 'loca' tables from a WOFF2
//! transformed 'glyf' table.

use bytes::{Buf, BufMut};

use crate::error::{Error, bail_if, u32_will_overflow};
use crate::font::loca;
use crate::glyf::{compute_bbox, compute_size_of_composite, glyph_padding, write_glyph_points};
use crate::varint::BufVariableExt;

use super::{GlyfTables, NUM_SUB_STREAMS, TRANSFORMED_HEADER_SIZE, bbox_bitmap_size, bitmap_bit, triplet::decode_triplets};

// 98% of Google Fonts have no glyph above 5k bytes. Largest glyph ever
// observed was 72k bytes.
const DEFAULT_GLYPH_BUF_SIZE: usize = 5120;

/// Decode a WOFF2 transformed glyf table into its 'glyf' and 'loca' pair.
pub(crate) fn reconstruct_glyf(data: &[u8]) -> Result<GlyfTables, Error> {
    GlyfReconstructor::new(data)?.reconstruct()
}

struct GlyfReconstructor<'a> {
    n_contour_stream: &'a [u8],
    n_points_stream: &'a [u8],
    flag_stream: &'a [u8],
    glyph_stream: &'a [u8],
    composite_stream: &'a [u8],
    bbox_bitmap: &'a [u8],
    bbox_stream: &'a [u8],
    instruction_stream: &'a [u8],
    /// Scratch buffer the current glyph record is assembled in.
    glyph_buf: Vec<u8>,

    num_glyphs: u16,
    index_format: i16,
}

impl GlyfReconstructor<'_> {
    fn new(data: &[u8]) -> Result<GlyfReconstructor<'_>, Error> {
        let mut input = data;
        let _version: u32 = input.try_get_u32()?;
        let num_glyphs = input.try_get_u16()?;
        let index_format = input.try_get_u16()? as i16;

        let mut offset: usize = TRANSFORMED_HEADER_SIZE;
        bail_if!(offset > data.len(), Error::TruncatedInput);

        // Invariant from here on: data.len() >= offset
        let mut substreams: [&[u8]; NUM_SUB_STREAMS] = [&[]; NUM_SUB_STREAMS];
        for substream in substreams.iter_mut() {
            let substream_size = input.try_get_u32()? as usize;
            bail_if!(substream_size > data.len() - offset, Error::TruncatedInput);
            *substream = &data[offset..offset + substream_size];
            offset += substream_size;
        }
        // The seven streams must account for the entire table.
        bail_if!(
            offset != data.len(),
            Error::TransformedGlyfSizeMismatch {
                expected: offset,
                found: data.len(),
            }
        );

        let bitmap_length = bbox_bitmap_size(num_glyphs);
        bail_if!(bitmap_length > substreams[5].len(), Error::TruncatedInput);

        let [n_contour_stream, n_points_stream, flag_stream, glyph_stream, composite_stream, combined_bbox_stream, instruction_stream] =
            substreams;
        let (bbox_bitmap, bbox_stream) = combined_bbox_stream.split_at(bitmap_length);

        Ok(GlyfReconstructor {
            n_contour_stream,
            n_points_stream,
            flag_stream,
            glyph_stream,
            composite_stream,
            bbox_bitmap,
            bbox_stream,
            instruction_stream,
            glyph_buf: Vec::with_capacity(DEFAULT_GLYPH_BUF_SIZE),
            num_glyphs,
            index_format,
        })
    }

    fn reconstruct(mut self) -> Result<GlyfTables, Error> {
        let padding = glyph_padding(self.index_format);
        let mut glyf_table: Vec<u8> = Vec::with_capacity(self.num_glyphs as usize * 12);
        let mut loca_values: Vec<u32> = Vec::with_capacity(self.num_glyphs as usize + 1);

        for i in 0..self.num_glyphs as usize {
            loca_values.push(glyf_table.len() as u32);

            let n_contours: i16 = self.n_contour_stream.try_get_i16()?;
            let glyph_has_bbox = bitmap_bit(self.bbox_bitmap, i);

            self.glyph_buf.clear();
            if n_contours < 0 {
                // composite glyphs must have an explicit bbox
                bail_if!(!glyph_has_bbox, Error::MissingCompositeBBox(i as u16));
                self.reconstruct_composite_glyph()?;
            } else if n_contours > 0 {
                self.reconstruct_simple_glyph(n_contours as usize, glyph_has_bbox)?;
            } else {
                // n_contours == 0; empty glyph. Must NOT have a bbox.
                bail_if!(glyph_has_bbox, Error::BadGlyphData("empty glyph has a bbox"));
            }

            glyf_table.extend_from_slice(&self.glyph_buf);
            glyf_table.resize(glyf_table.len().next_multiple_of(padding), 0);
        }

        // loca[numGlyphs] equals the total length of the glyph data table.
        loca_values.push(glyf_table.len() as u32);

        let loca_table = loca::encode(&loca_values, self.index_format)?;

        Ok(GlyfTables {
            num_glyphs: self.num_glyphs,
            index_format: self.index_format,
            glyf: glyf_table,
            loca: loca_table,
        })
    }

    fn reconstruct_composite_glyph(&mut self) -> Result<(), Error> {
        // Scan a copy of the composite stream to size the component records,
        // then copy those bytes verbatim below.
        let mut scan = self.composite_stream;
        let (composite_size, have_instructions) = compute_size_of_composite(&mut scan)?;

        let instruction_size: u16 = if have_instructions {
            self.glyph_stream.try_get_255_u16()?
        } else {
            0
        };

        self.glyph_buf.put_i16(-1);
        self.bbox_stream.try_read_bytes_into(8, &mut self.glyph_buf)?;
        self.composite_stream
            .try_read_bytes_into(composite_size, &mut self.glyph_buf)?;

        if have_instructions {
            self.glyph_buf.put_u16(instruction_size);
            self.instruction_stream
                .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;
        }

        Ok(())
    }

    fn reconstruct_simple_glyph(
        &mut self,
        n_contours: usize,
        glyph_has_bbox: bool,
    ) -> Result<(), Error> {
        let mut n_points_vec: Vec<u16> = Vec::with_capacity(n_contours);
        let mut total_n_points: u32 = 0;
        for _ in 0..n_contours {
            let n_points_contour = self.n_points_stream.try_get_255_u16()?;
            bail_if!(
                u32_will_overflow(total_n_points, u32::from(n_points_contour)),
                Error::TruncatedInput
            );
            total_n_points += u32::from(n_points_contour);
            n_points_vec.push(n_points_contour);
        }

        let flag_size = total_n_points as usize;
        bail_if!(flag_size > self.flag_stream.len(), Error::ShortFlagStream);

        let mut points = Vec::with_capacity(flag_size);
        let triplet_bytes_consumed =
            decode_triplets(&self.flag_stream[..flag_size], self.glyph_stream, &mut points)?;

        self.flag_stream.advance(flag_size);
        self.glyph_stream.advance(triplet_bytes_consumed);

        let instruction_size: u16 = self.glyph_stream.try_get_255_u16()?;

        self.glyph_buf.put_i16(n_contours as i16);

        if glyph_has_bbox {
            self.bbox_stream.try_read_bytes_into(8, &mut self.glyph_buf)?;
        } else {
            for value in compute_bbox(&points) {
                self.glyph_buf.put_i16(value);
            }
        }

        let mut end_point: i32 = -1;
        for contour in n_points_vec {
            end_point += i32::from(contour);
            bail_if!(
                end_point >= 65536,
                Error::BadGlyphData("contour end point exceeds 65535")
            );
            self.glyph_buf.put_u16(end_point as u16);
        }

        self.glyph_buf.put_u16(instruction_size);
        self.instruction_stream
            .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;

        write_glyph_points(&points, &mut self.glyph_buf);

        Ok(())
    }
}

//! The encode direction of the WOFF2 'glyf' transform: decompose glyph
//! records into the seven parallel sub-streams.

use bytes::BufMut;

use crate::error::{Error, bail_if};
use crate::font::loca;
use crate::glyf::{GlyfTable, Glyph, compute_bbox};
use crate::varint::pack_255_u16;

use super::{TRANSFORMED_HEADER_SIZE, bbox_bitmap_size, set_bitmap_bit, triplet::encode_triplet};

/// Transform a raw 'glyf' table (indexed by its companion 'loca') into the
/// WOFF2 transformed layout. The transformed 'loca' is always empty; the
/// decoder rebuilds it from the glyph stream lengths.
pub(crate) fn transform_glyf(
    glyf_data: &[u8],
    loca_data: &[u8],
    index_format: i16,
    num_glyphs: u16,
) -> Result<Vec<u8>, Error> {
    let loca_values = loca::parse(loca_data, index_format)?;
    bail_if!(
        loca_values.len() != num_glyphs as usize + 1,
        Error::BadGlyphData("'loca' entry count does not match maxp.numGlyphs")
    );
    let table = GlyfTable::decompile(glyf_data, &loca_values)?;

    let mut n_contour_stream: Vec<u8> = Vec::with_capacity(num_glyphs as usize * 2);
    let mut n_points_stream: Vec<u8> = Vec::new();
    let mut flag_stream: Vec<u8> = Vec::new();
    let mut glyph_stream: Vec<u8> = Vec::new();
    let mut composite_stream: Vec<u8> = Vec::new();
    let mut bbox_bitmap: Vec<u8> = vec![0; bbox_bitmap_size(num_glyphs)];
    let mut bbox_stream: Vec<u8> = Vec::new();
    let mut instruction_stream: Vec<u8> = Vec::new();

    for (index, glyph) in table.glyphs.iter().enumerate() {
        match glyph {
            Glyph::Empty => {
                n_contour_stream.put_i16(0);
            }
            Glyph::Composite(glyph) => {
                n_contour_stream.put_i16(-1);
                composite_stream.extend_from_slice(&glyph.components);

                // Composite glyphs always store their bbox explicitly.
                set_bitmap_bit(&mut bbox_bitmap, index);
                for value in glyph.bbox {
                    bbox_stream.put_i16(value);
                }

                if let Some(instructions) = &glyph.instructions {
                    glyph_stream.extend_from_slice(&pack_255_u16(instructions.len() as u16));
                    instruction_stream.extend_from_slice(instructions);
                }
            }
            Glyph::Simple(glyph) => {
                n_contour_stream.put_i16(glyph.end_pts_of_contours.len() as i16);

                let mut prev_end: i32 = -1;
                for &end_pt in &glyph.end_pts_of_contours {
                    let points_in_contour = i32::from(end_pt) - prev_end;
                    prev_end = i32::from(end_pt);
                    bail_if!(
                        points_in_contour > i32::from(u16::MAX),
                        Error::BadGlyphData("contour has too many points")
                    );
                    n_points_stream.extend_from_slice(&pack_255_u16(points_in_contour as u16));
                }

                let mut last_x: i32 = 0;
                let mut last_y: i32 = 0;
                for point in &glyph.points {
                    encode_triplet(
                        point.x - last_x,
                        point.y - last_y,
                        point.on_curve,
                        &mut flag_stream,
                        &mut glyph_stream,
                    );
                    last_x = point.x;
                    last_y = point.y;
                }

                // Store the bbox only when recomputing it from the points
                // would give a different answer.
                if compute_bbox(&glyph.points) != glyph.bbox {
                    set_bitmap_bit(&mut bbox_bitmap, index);
                    for value in glyph.bbox {
                        bbox_stream.put_i16(value);
                    }
                }

                glyph_stream.extend_from_slice(&pack_255_u16(glyph.instructions.len() as u16));
                instruction_stream.extend_from_slice(&glyph.instructions);
            }
        }
    }

    let bbox_total_size = bbox_bitmap.len() + bbox_stream.len();
    let total_size = TRANSFORMED_HEADER_SIZE
        + n_contour_stream.len()
        + n_points_stream.len()
        + flag_stream.len()
        + glyph_stream.len()
        + composite_stream.len()
        + bbox_total_size
        + instruction_stream.len();

    let mut out: Vec<u8> = Vec::with_capacity(total_size);
    out.put_u32(0); // version
    out.put_u16(num_glyphs);
    out.put_u16(index_format as u16);
    out.put_u32(n_contour_stream.len() as u32);
    out.put_u32(n_points_stream.len() as u32);
    out.put_u32(flag_stream.len() as u32);
    out.put_u32(glyph_stream.len() as u32);
    out.put_u32(composite_stream.len() as u32);
    out.put_u32(bbox_total_size as u32);
    out.put_u32(instruction_stream.len() as u32);
    out.extend_from_slice(&n_contour_stream);
    out.extend_from_slice(&n_points_stream);
    out.extend_from_slice(&flag_stream);
    out.extend_from_slice(&glyph_stream);
    out.extend_from_slice(&composite_stream);
    out.extend_from_slice(&bbox_bitmap);
    out.extend_from_slice(&bbox_stream);
    out.extend_from_slice(&instruction_stream);
    debug_assert_eq!(out.len(), total_size);

    Ok(out)
}

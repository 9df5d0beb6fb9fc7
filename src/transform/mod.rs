//! The WOFF2 'glyf'/'loca' transform: a reversible reorganization of
//! TrueType glyph data into seven parallel sub-streams.
//!
//! <https://www.w3.org/TR/WOFF2/#glyf_table_format>

mod encode;
mod reconstruct;
mod triplet;

pub(crate) use encode::transform_glyf;
pub(crate) use reconstruct::reconstruct_glyf;

pub(crate) const NUM_SUB_STREAMS: usize = 7;

/// version (u32) + numGlyphs (u16) + indexFormat (u16) + seven stream sizes.
pub(crate) const TRANSFORMED_HEADER_SIZE: usize = 4 + 2 + 2 + NUM_SUB_STREAMS * 4;

/// The bbox bitmap holds one bit per glyph, padded to a multiple of 4 bytes.
pub(crate) fn bbox_bitmap_size(num_glyphs: u16) -> usize {
    ((num_glyphs as usize + 31) >> 5) << 2
}

/// Bitmap accessors; bit `i` lives in byte `i >> 3`, MSB first.
pub(crate) fn bitmap_bit(bitmap: &[u8], index: usize) -> bool {
    bitmap[index >> 3] & (0x80 >> (index & 7)) != 0
}

pub(crate) fn set_bitmap_bit(bitmap: &mut [u8], index: usize) {
    bitmap[index >> 3] |= 0x80 >> (index & 7);
}

/// The pair of tables rebuilt from a transformed 'glyf'.
pub(crate) struct GlyfTables {
    pub(crate) num_glyphs: u16,
    pub(crate) index_format: i16,
    pub(crate) glyf: Vec<u8>,
    pub(crate) loca: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::loca;
    use crate::glyf::{CompositeGlyph, GlyfTable, Glyph, Point, SimpleGlyph, compute_bbox};

    #[test]
    fn bitmap_sizing_and_indexing() {
        // 9 glyphs: 2 bytes of bits, padded up to 4.
        assert_eq!(bbox_bitmap_size(9), 4);
        assert_eq!(bbox_bitmap_size(32), 4);
        assert_eq!(bbox_bitmap_size(33), 8);

        let mut bitmap = vec![0u8; bbox_bitmap_size(9)];
        set_bitmap_bit(&mut bitmap, 0);
        set_bitmap_bit(&mut bitmap, 8);
        assert_eq!(bitmap, vec![0x80, 0x80, 0, 0]);
        assert!(bitmap_bit(&bitmap, 0));
        assert!(!bitmap_bit(&bitmap, 1));
        assert!(bitmap_bit(&bitmap, 8));
    }

    fn simple_glyph(points: Vec<Point>, contours: Vec<u16>) -> Glyph {
        Glyph::Simple(SimpleGlyph {
            bbox: compute_bbox(&points),
            end_pts_of_contours: contours,
            instructions: vec![0x40, 0x01, 0x02],
            points,
        })
    }

    fn test_font(index_format: i16) -> (Vec<u8>, Vec<u8>, u16) {
        let mut components = Vec::new();
        // words args + instructions on the last component
        components.extend_from_slice(&0x0101u16.to_be_bytes());
        components.extend_from_slice(&1u16.to_be_bytes());
        components.extend_from_slice(&50i16.to_be_bytes());
        components.extend_from_slice(&(-10i16).to_be_bytes());

        let table = GlyfTable {
            glyphs: vec![
                Glyph::Empty,
                simple_glyph(
                    vec![
                        Point { x: 0, y: 0, on_curve: true },
                        Point { x: 700, y: 20, on_curve: false },
                        Point { x: 350, y: 1400, on_curve: true },
                    ],
                    vec![2],
                ),
                Glyph::Composite(CompositeGlyph {
                    bbox: [-10, -10, 760, 1410],
                    components,
                    instructions: Some(vec![0x4F, 0x00]),
                }),
            ],
        };
        let (glyf, loca_values) = table.compile(index_format).unwrap();
        let loca_data = loca::encode(&loca_values, index_format).unwrap();
        (glyf, loca_data, table.num_glyphs() as u16)
    }

    #[test]
    fn transform_roundtrip_long_loca() {
        let (glyf, loca_data, num_glyphs) = test_font(1);
        let transformed = transform_glyf(&glyf, &loca_data, 1, num_glyphs).unwrap();
        let rebuilt = reconstruct_glyf(&transformed).unwrap();
        assert_eq!(rebuilt.num_glyphs, num_glyphs);
        assert_eq!(rebuilt.index_format, 1);
        assert_eq!(rebuilt.glyf, glyf);
        assert_eq!(rebuilt.loca, loca_data);
    }

    #[test]
    fn transform_roundtrip_short_loca() {
        let (glyf, loca_data, num_glyphs) = test_font(0);
        let transformed = transform_glyf(&glyf, &loca_data, 0, num_glyphs).unwrap();
        let rebuilt = reconstruct_glyf(&transformed).unwrap();
        assert_eq!(rebuilt.index_format, 0);
        assert_eq!(rebuilt.glyf, glyf);
        assert_eq!(rebuilt.loca, loca_data);
    }

    #[test]
    fn bbox_bitmap_set_only_where_needed() {
        // Glyph 1 is simple with a recomputable bbox: its bit must be clear.
        // Glyph 2 is composite: its bit must be set.
        let (glyf, loca_data, num_glyphs) = test_font(1);
        let transformed = transform_glyf(&glyf, &loca_data, 1, num_glyphs).unwrap();

        // Locate the bbox bitmap: header, then the first five stream sizes
        // tell us how far in it starts.
        let size_at = |i: usize| {
            u32::from_be_bytes(transformed[8 + i * 4..12 + i * 4].try_into().unwrap()) as usize
        };
        let bitmap_start = TRANSFORMED_HEADER_SIZE
            + size_at(0) // nContour
            + size_at(1) // nPoints
            + size_at(2) // flags
            + size_at(3) // glyph
            + size_at(4); // composite
        let bitmap = &transformed[bitmap_start..bitmap_start + bbox_bitmap_size(num_glyphs)];
        assert!(!bitmap_bit(bitmap, 0));
        assert!(!bitmap_bit(bitmap, 1));
        assert!(bitmap_bit(bitmap, 2));
    }

    #[test]
    fn explicit_bbox_is_preserved() {
        // A glyph whose stored bbox differs from the computed one must carry
        // it explicitly through the transform.
        let points = vec![
            Point { x: 0, y: 0, on_curve: true },
            Point { x: 100, y: 0, on_curve: true },
            Point { x: 50, y: 80, on_curve: true },
        ];
        let table = GlyfTable {
            glyphs: vec![Glyph::Simple(SimpleGlyph {
                bbox: [-5, -5, 105, 85], // widened on purpose
                end_pts_of_contours: vec![2],
                instructions: Vec::new(),
                points,
            })],
        };
        let (glyf, loca_values) = table.compile(1).unwrap();
        let loca_data = loca::encode(&loca_values, 1).unwrap();

        let transformed = transform_glyf(&glyf, &loca_data, 1, 1).unwrap();
        let rebuilt = reconstruct_glyf(&transformed).unwrap();
        assert_eq!(rebuilt.glyf, glyf);
    }

    #[test]
    fn substream_size_mismatch_is_rejected() {
        let (glyf, loca_data, num_glyphs) = test_font(1);
        let mut transformed = transform_glyf(&glyf, &loca_data, 1, num_glyphs).unwrap();
        transformed.push(0); // stray trailing byte
        assert!(matches!(
            reconstruct_glyf(&transformed),
            Err(crate::error::Error::TransformedGlyfSizeMismatch { .. })
        ));
    }

    #[test]
    fn composite_without_bbox_is_rejected() {
        let (glyf, loca_data, num_glyphs) = test_font(1);
        let mut transformed = transform_glyf(&glyf, &loca_data, 1, num_glyphs).unwrap();
        // Clear the composite glyph's bitmap bit (glyph 2).
        let size_at = |data: &[u8], i: usize| {
            u32::from_be_bytes(data[8 + i * 4..12 + i * 4].try_into().unwrap()) as usize
        };
        let bitmap_start = TRANSFORMED_HEADER_SIZE
            + (0..5).map(|i| size_at(&transformed, i)).sum::<usize>();
        transformed[bitmap_start] &= !(0x80 >> 2);
        assert!(matches!(
            reconstruct_glyf(&transformed),
            Err(crate::error::Error::MissingCompositeBBox(2))
        ));
    }
}

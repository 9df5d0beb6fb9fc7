//! TrueType glyph records: the subset of the 'glyf' table the WOFF2
//! transform needs. Everything a glyph stores beyond contours, bbox and
//! instructions (composite component records in particular) is carried as
//! opaque bytes.

use bytes::{Buf, BufMut};

use crate::error::{Error, bail_if};

// simple glyph flags
const GLYF_ON_CURVE: u8 = 1 << 0;
const GLYF_X_SHORT: u8 = 1 << 1;
const GLYF_Y_SHORT: u8 = 1 << 2;
const GLYF_REPEAT: u8 = 1 << 3;
const GLYF_THIS_X_IS_SAME: u8 = 1 << 4;
const GLYF_THIS_Y_IS_SAME: u8 = 1 << 5;

// composite component flags
const FLAG_ARG_1_AND_2_ARE_WORDS: u16 = 1 << 0;
const FLAG_WE_HAVE_A_SCALE: u16 = 1 << 3;
const FLAG_MORE_COMPONENTS: u16 = 1 << 5;
const FLAG_WE_HAVE_AN_X_AND_Y_SCALE: u16 = 1 << 6;
const FLAG_WE_HAVE_A_TWO_BY_TWO: u16 = 1 << 7;
const FLAG_WE_HAVE_INSTRUCTIONS: u16 = 1 << 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub on_curve: bool,
}

#[derive(Clone, Debug)]
pub enum Glyph {
    /// `numberOfContours == 0`; contributes no bytes to 'glyf'.
    Empty,
    Simple(SimpleGlyph),
    Composite(CompositeGlyph),
}

#[derive(Clone, Debug)]
pub struct SimpleGlyph {
    pub bbox: [i16; 4],
    pub end_pts_of_contours: Vec<u16>,
    pub instructions: Vec<u8>,
    /// Absolute coordinates, one per point.
    pub points: Vec<Point>,
}

#[derive(Clone, Debug)]
pub struct CompositeGlyph {
    pub bbox: [i16; 4],
    /// Raw component records, byte-for-byte as stored in the font.
    pub components: Vec<u8>,
    pub instructions: Option<Vec<u8>>,
}

/// Dummy name for glyph `index`, of the form `glyph0`, `glyph1`, ...
pub fn glyph_name(index: usize) -> String {
    format!("glyph{index}")
}

/// Alignment of glyph records within a compiled 'glyf' table. Short loca
/// offsets are stored divided by two, so they must stay even; long offsets
/// get the usual 4-byte alignment.
pub(crate) fn glyph_padding(index_format: i16) -> usize {
    if index_format == 0 { 2 } else { 4 }
}

/// A decompiled 'glyf' table: one record per glyph, in glyph-index order.
pub struct GlyfTable {
    pub glyphs: Vec<Glyph>,
}

impl GlyfTable {
    /// Split `data` into per-glyph records using the offsets in `loca`.
    pub fn decompile(data: &[u8], loca: &[u32]) -> Result<Self, Error> {
        bail_if!(loca.is_empty(), Error::BadGlyphData("empty 'loca' table"));

        let mut glyphs = Vec::with_capacity(loca.len() - 1);
        let mut last = loca[0] as usize;
        for &next in &loca[1..] {
            let next = next as usize;
            bail_if!(
                next < last,
                Error::BadGlyphData("'loca' offsets are not ascending")
            );
            let record = data
                .get(last..next)
                .ok_or(Error::BadGlyphData("not enough 'glyf' table data"))?;
            glyphs.push(parse_glyph(record)?);
            last = next;
        }
        // Up to 3 bytes of trailing padding are fine; more is suspicious.
        bail_if!(
            data.len() - last >= 4,
            Error::BadGlyphData("too much 'glyf' table data")
        );

        Ok(Self { glyphs })
    }

    /// Concatenate the glyph records, aligned per `index_format`, and return
    /// the table bytes together with the refreshed loca offsets
    /// (`numGlyphs + 1` entries).
    pub fn compile(&self, index_format: i16) -> Result<(Vec<u8>, Vec<u32>), Error> {
        let padding = glyph_padding(index_format);
        let mut data: Vec<u8> = Vec::new();
        let mut loca: Vec<u32> = Vec::with_capacity(self.glyphs.len() + 1);
        for glyph in &self.glyphs {
            loca.push(data.len() as u32);
            glyph.compile_into(&mut data)?;
            data.resize(data.len().next_multiple_of(padding), 0);
        }
        loca.push(data.len() as u32);
        Ok((data, loca))
    }

    pub fn num_glyphs(&self) -> usize {
        self.glyphs.len()
    }

    /// Dummy glyph order, `glyph0`..`glyphN`.
    pub fn glyph_order(&self) -> impl Iterator<Item = String> {
        (0..self.glyphs.len()).map(glyph_name)
    }
}

impl Glyph {
    pub(crate) fn compile_into(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            Glyph::Empty => {}
            Glyph::Simple(glyph) => {
                bail_if!(
                    glyph.end_pts_of_contours.len() > i16::MAX as usize,
                    Error::BadGlyphData("too many contours")
                );
                out.put_i16(glyph.end_pts_of_contours.len() as i16);
                for value in glyph.bbox {
                    out.put_i16(value);
                }
                for &end_pt in &glyph.end_pts_of_contours {
                    out.put_u16(end_pt);
                }
                bail_if!(
                    glyph.instructions.len() > u16::MAX as usize,
                    Error::BadGlyphData("instruction blob too long")
                );
                out.put_u16(glyph.instructions.len() as u16);
                out.put_slice(&glyph.instructions);
                write_glyph_points(&glyph.points, out);
            }
            Glyph::Composite(glyph) => {
                out.put_i16(-1);
                for value in glyph.bbox {
                    out.put_i16(value);
                }
                out.put_slice(&glyph.components);
                if let Some(instructions) = &glyph.instructions {
                    bail_if!(
                        instructions.len() > u16::MAX as usize,
                        Error::BadGlyphData("instruction blob too long")
                    );
                    out.put_u16(instructions.len() as u16);
                    out.put_slice(instructions);
                }
            }
        }
        Ok(())
    }
}

fn parse_glyph(record: &[u8]) -> Result<Glyph, Error> {
    if record.is_empty() {
        return Ok(Glyph::Empty);
    }

    let mut input = record;
    let n_contours = input.try_get_i16()?;
    let bbox = [
        input.try_get_i16()?,
        input.try_get_i16()?,
        input.try_get_i16()?,
        input.try_get_i16()?,
    ];

    if n_contours == 0 {
        // An empty glyph carries no data beyond the count; a 10-byte header
        // normalizes away to a zero-length record.
        Ok(Glyph::Empty)
    } else if n_contours > 0 {
        parse_simple_glyph(input, n_contours as usize, bbox).map(Glyph::Simple)
    } else {
        parse_composite_glyph(input, bbox).map(Glyph::Composite)
    }
}

fn parse_simple_glyph(
    mut input: &[u8],
    n_contours: usize,
    bbox: [i16; 4],
) -> Result<SimpleGlyph, Error> {
    let mut end_pts_of_contours = Vec::with_capacity(n_contours);
    let mut prev: i32 = -1;
    for _ in 0..n_contours {
        let end_pt = input.try_get_u16()?;
        bail_if!(
            i32::from(end_pt) < prev,
            Error::BadGlyphData("endPtsOfContours values are not ascending")
        );
        prev = i32::from(end_pt);
        end_pts_of_contours.push(end_pt);
    }
    let n_points = prev as usize + 1;

    let instruction_length = input.try_get_u16()? as usize;
    bail_if!(input.remaining() < instruction_length, Error::TruncatedInput);
    let instructions = input[..instruction_length].to_vec();
    input.advance(instruction_length);

    // Expand the run-length encoded flag bytes.
    let mut flags: Vec<u8> = Vec::with_capacity(n_points);
    while flags.len() < n_points {
        let flag = input.try_get_u8()?;
        flags.push(flag);
        if flag & GLYF_REPEAT != 0 {
            let count = input.try_get_u8()? as usize;
            bail_if!(
                flags.len() + count > n_points,
                Error::BadGlyphData("flag repeat overruns the point count")
            );
            for _ in 0..count {
                flags.push(flag);
            }
        }
    }

    let mut xs: Vec<i32> = Vec::with_capacity(n_points);
    let mut x: i32 = 0;
    for &flag in &flags {
        let dx: i32 = if flag & GLYF_X_SHORT != 0 {
            let magnitude = i32::from(input.try_get_u8()?);
            if flag & GLYF_THIS_X_IS_SAME != 0 {
                magnitude
            } else {
                -magnitude
            }
        } else if flag & GLYF_THIS_X_IS_SAME != 0 {
            0
        } else {
            i32::from(input.try_get_i16()?)
        };
        x += dx;
        xs.push(x);
    }

    let mut points: Vec<Point> = Vec::with_capacity(n_points);
    let mut y: i32 = 0;
    for (&flag, &x) in flags.iter().zip(&xs) {
        let dy: i32 = if flag & GLYF_Y_SHORT != 0 {
            let magnitude = i32::from(input.try_get_u8()?);
            if flag & GLYF_THIS_Y_IS_SAME != 0 {
                magnitude
            } else {
                -magnitude
            }
        } else if flag & GLYF_THIS_Y_IS_SAME != 0 {
            0
        } else {
            i32::from(input.try_get_i16()?)
        };
        y += dy;
        points.push(Point {
            x,
            y,
            on_curve: flag & GLYF_ON_CURVE != 0,
        });
    }

    Ok(SimpleGlyph {
        bbox,
        end_pts_of_contours,
        instructions,
        points,
    })
}

fn parse_composite_glyph(input: &[u8], bbox: [i16; 4]) -> Result<CompositeGlyph, Error> {
    let mut scan = input;
    let (components_size, have_instructions) = compute_size_of_composite(&mut scan)?;
    let components = input[..components_size].to_vec();

    let instructions = if have_instructions {
        let mut rest = &input[components_size..];
        let instruction_length = rest.try_get_u16()? as usize;
        bail_if!(rest.remaining() < instruction_length, Error::TruncatedInput);
        Some(rest[..instruction_length].to_vec())
    } else {
        None
    };

    Ok(CompositeGlyph {
        bbox,
        components,
        instructions,
    })
}

/// Walk the component records at the head of `composite_stream`, returning
/// their total size and whether an instruction blob follows.
pub(crate) fn compute_size_of_composite(
    composite_stream: &mut impl Buf,
) -> Result<(usize, bool), Error> {
    let mut bytes_read: usize = 0;
    let mut we_have_instructions: bool = false;
    let mut flags: u16 = FLAG_MORE_COMPONENTS;
    while flags & FLAG_MORE_COMPONENTS != 0 {
        flags = composite_stream.try_get_u16()?;
        we_have_instructions |= (flags & FLAG_WE_HAVE_INSTRUCTIONS) != 0;
        let mut arg_size: usize = 2; // glyph index
        if flags & FLAG_ARG_1_AND_2_ARE_WORDS != 0 {
            arg_size += 4;
        } else {
            arg_size += 2;
        }
        if flags & FLAG_WE_HAVE_A_SCALE != 0 {
            arg_size += 2;
        } else if flags & FLAG_WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            arg_size += 4;
        } else if flags & FLAG_WE_HAVE_A_TWO_BY_TWO != 0 {
            arg_size += 8;
        }
        bail_if!(composite_stream.remaining() < arg_size, Error::TruncatedInput);
        composite_stream.advance(arg_size);

        // 2 bytes for the flags + arg_size
        bytes_read += 2 + arg_size;
    }

    Ok((bytes_read, we_have_instructions))
}

/// Compute the bounding box of a set of absolute coordinates.
pub fn compute_bbox(points: &[Point]) -> [i16; 4] {
    let mut x_min: i32 = 0;
    let mut y_min: i32 = 0;
    let mut x_max: i32 = 0;
    let mut y_max: i32 = 0;

    if let Some(first) = points.first() {
        x_min = first.x;
        x_max = first.x;
        y_min = first.y;
        y_max = first.y;
    }
    for &Point { x, y, .. } in points.iter().skip(1) {
        x_min = x.min(x_min);
        x_max = x.max(x_max);
        y_min = y.min(y_min);
        y_max = y.max(y_max);
    }

    [x_min as i16, y_min as i16, x_max as i16, y_max as i16]
}

/// Store the point data of a simple glyph: run-length encoded flags followed
/// by the x and y delta arrays.
pub(crate) fn write_glyph_points(points: &[Point], dst: &mut impl BufMut) {
    fn flush(flag: u8, repeat_count: u8, dst: &mut impl BufMut) {
        if repeat_count > 0 {
            dst.put_u8(flag | GLYF_REPEAT);
            dst.put_u8(repeat_count);
        } else {
            dst.put_u8(flag);
        }
    }

    // Write flags. To keep writes strictly append-only, a flag byte is held
    // back together with its repeat count until the next distinct flag value
    // arrives; only then is GLYF_REPEAT applied.
    let mut last_flag: Option<u8> = None;
    let mut repeat_count: u8 = 0;
    let mut last_x: i32 = 0;
    let mut last_y: i32 = 0;
    for point in points {
        let flag = {
            let mut flag: u8 = 0;
            if point.on_curve {
                flag |= GLYF_ON_CURVE;
            }

            let dx: i32 = point.x - last_x;
            if dx == 0 {
                flag |= GLYF_THIS_X_IS_SAME;
            } else if dx > -256 && dx < 256 {
                flag |= GLYF_X_SHORT | (if dx > 0 { GLYF_THIS_X_IS_SAME } else { 0 });
            }

            let dy: i32 = point.y - last_y;
            if dy == 0 {
                flag |= GLYF_THIS_Y_IS_SAME;
            } else if dy > -256 && dy < 256 {
                flag |= GLYF_Y_SHORT | (if dy > 0 { GLYF_THIS_Y_IS_SAME } else { 0 });
            }

            flag
        };

        match last_flag {
            Some(prev) if prev == flag && repeat_count < 255 => repeat_count += 1,
            Some(prev) => {
                flush(prev, repeat_count, dst);
                repeat_count = 0;
            }
            None => {}
        }
        last_flag = Some(flag);
        last_x = point.x;
        last_y = point.y;
    }
    if let Some(flag) = last_flag {
        flush(flag, repeat_count, dst);
    }

    // Write x coordinates
    let mut last_x: i32 = 0;
    for point in points {
        let dx: i32 = point.x - last_x;
        if dx == 0 {
            // do nothing
        } else if dx > -256 && dx < 256 {
            dst.put_u8(dx.unsigned_abs() as u8);
        } else {
            // will always fit for valid input, but overflow is harmless
            dst.put_i16(dx as i16);
        }
        last_x = point.x;
    }

    // Write y coordinates
    let mut last_y: i32 = 0;
    for point in points {
        let dy: i32 = point.y - last_y;
        if dy == 0 {
            // do nothing
        } else if dy > -256 && dy < 256 {
            dst.put_u8(dy.unsigned_abs() as u8);
        } else {
            dst.put_i16(dy as i16);
        }
        last_y = point.y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> SimpleGlyph {
        let points = vec![
            Point { x: 0, y: 0, on_curve: true },
            Point { x: 500, y: 0, on_curve: true },
            Point { x: 250, y: 400, on_curve: true },
        ];
        SimpleGlyph {
            bbox: compute_bbox(&points),
            end_pts_of_contours: vec![2],
            instructions: vec![0xB0, 0x01],
            points,
        }
    }

    #[test]
    fn simple_glyph_compiles_and_reparses() {
        let glyph = Glyph::Simple(triangle());
        let mut record = Vec::new();
        glyph.compile_into(&mut record).unwrap();

        let reparsed = parse_glyph(&record).unwrap();
        let Glyph::Simple(reparsed) = reparsed else {
            panic!("expected a simple glyph");
        };
        assert_eq!(reparsed.end_pts_of_contours, vec![2]);
        assert_eq!(reparsed.instructions, vec![0xB0, 0x01]);
        assert_eq!(reparsed.points, triangle().points);
        assert_eq!(reparsed.bbox, [0, 0, 500, 400]);
    }

    #[test]
    fn compile_is_a_fixpoint() {
        // Reparsing compiled output and compiling again must not change a
        // byte, otherwise round-trip normalization would never converge.
        let glyph = Glyph::Simple(triangle());
        let mut first = Vec::new();
        glyph.compile_into(&mut first).unwrap();
        let mut second = Vec::new();
        parse_glyph(&first).unwrap().compile_into(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn composite_components_are_passed_through() {
        // One component: words args, no scale, with instructions.
        let mut components = Vec::new();
        components.put_u16(FLAG_ARG_1_AND_2_ARE_WORDS | FLAG_WE_HAVE_INSTRUCTIONS);
        components.put_u16(3); // child glyph index
        components.put_i16(10);
        components.put_i16(-20);

        let glyph = Glyph::Composite(CompositeGlyph {
            bbox: [0, -20, 110, 80],
            components: components.clone(),
            instructions: Some(vec![0x4F]),
        });
        let mut record = Vec::new();
        glyph.compile_into(&mut record).unwrap();

        let Glyph::Composite(reparsed) = parse_glyph(&record).unwrap() else {
            panic!("expected a composite glyph");
        };
        assert_eq!(reparsed.components, components);
        assert_eq!(reparsed.instructions, Some(vec![0x4F]));
        assert_eq!(reparsed.bbox, [0, -20, 110, 80]);
    }

    #[test]
    fn empty_glyphs_compile_to_nothing() {
        let table = GlyfTable {
            glyphs: vec![Glyph::Empty, Glyph::Simple(triangle()), Glyph::Empty],
        };
        let (data, loca) = table.compile(1).unwrap();
        assert_eq!(loca.len(), 4);
        assert_eq!(loca[0], 0);
        assert_eq!(loca[1], 0);
        assert_eq!(loca[2], data.len() as u32);
        assert_eq!(loca[3], data.len() as u32);
        assert_eq!(data.len() % 4, 0);
    }

    #[test]
    fn decompile_splits_on_loca() {
        let table = GlyfTable {
            glyphs: vec![Glyph::Empty, Glyph::Simple(triangle())],
        };
        let (data, loca) = table.compile(0).unwrap();
        assert!(loca.iter().all(|offset| offset % 2 == 0));

        let reparsed = GlyfTable::decompile(&data, &loca).unwrap();
        assert_eq!(reparsed.num_glyphs(), 2);
        assert!(matches!(reparsed.glyphs[0], Glyph::Empty));
        assert!(matches!(reparsed.glyphs[1], Glyph::Simple(_)));
        assert_eq!(
            reparsed.glyph_order().collect::<Vec<_>>(),
            vec!["glyph0", "glyph1"]
        );
    }

    #[test]
    fn flag_runs_are_compressed() {
        // 4 collinear on-curve points with identical deltas after the first:
        // the three repeats collapse into one flag byte + repeat count.
        let points = vec![
            Point { x: 10, y: 0, on_curve: true },
            Point { x: 20, y: 0, on_curve: true },
            Point { x: 30, y: 0, on_curve: true },
            Point { x: 40, y: 0, on_curve: true },
        ];
        let mut out = Vec::new();
        write_glyph_points(&points, &mut out);
        // flags: first flag equals the rest, so one byte + GLYF_REPEAT + count 3,
        // then 4 x-deltas of one byte each, no y bytes.
        assert_eq!(out.len(), 2 + 4);
        assert_eq!(out[0] & GLYF_REPEAT, GLYF_REPEAT);
        assert_eq!(out[1], 3);
    }
}

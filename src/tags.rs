//! Font table tags

use font_types::Tag;

pub const GLYF: Tag = Tag::new(b"glyf");
pub const LOCA: Tag = Tag::new(b"loca");
pub const HEAD: Tag = Tag::new(b"head");
pub const MAXP: Tag = Tag::new(b"maxp");

pub const SIG_WOFF: Tag = Tag::new(b"wOFF");
pub const SIG_WOFF2: Tag = Tag::new(b"wOF2");
pub const SIG_TTC: Tag = Tag::new(b"ttcf");

pub const SFNT_VERSION_TRUETYPE: Tag = Tag::from_be_bytes([0x00, 0x01, 0x00, 0x00]);
pub const SFNT_VERSION_CFF: Tag = Tag::new(b"OTTO");
pub const SFNT_VERSION_APPLE: Tag = Tag::new(b"true");

/// Directory-entry flag value indicating that an explicit 4-byte tag follows.
pub const UNKNOWN_TAG_INDEX: u8 = 0x3F;

/// Tags likely to appear in fonts, indexable by the low 6 bits of a WOFF2
/// directory-entry flag byte.
///
/// <https://www.w3.org/TR/WOFF2/#table_dir_format>
pub static KNOWN_TAGS: [Tag; 63] = [
    Tag::new(b"cmap"), // 0
    Tag::new(b"head"), // 1
    Tag::new(b"hhea"), // 2
    Tag::new(b"hmtx"), // 3
    Tag::new(b"maxp"), // 4
    Tag::new(b"name"), // 5
    Tag::new(b"OS/2"), // 6
    Tag::new(b"post"), // 7
    Tag::new(b"cvt "), // 8
    Tag::new(b"fpgm"), // 9
    Tag::new(b"glyf"), // 10
    Tag::new(b"loca"), // 11
    Tag::new(b"prep"), // 12
    Tag::new(b"CFF "), // 13
    Tag::new(b"VORG"), // 14
    Tag::new(b"EBDT"), // 15
    Tag::new(b"EBLC"), // 16
    Tag::new(b"gasp"), // 17
    Tag::new(b"hdmx"), // 18
    Tag::new(b"kern"), // 19
    Tag::new(b"LTSH"), // 20
    Tag::new(b"PCLT"), // 21
    Tag::new(b"VDMX"), // 22
    Tag::new(b"vhea"), // 23
    Tag::new(b"vmtx"), // 24
    Tag::new(b"BASE"), // 25
    Tag::new(b"GDEF"), // 26
    Tag::new(b"GPOS"), // 27
    Tag::new(b"GSUB"), // 28
    Tag::new(b"EBSC"), // 29
    Tag::new(b"JSTF"), // 30
    Tag::new(b"MATH"), // 31
    Tag::new(b"CBDT"), // 32
    Tag::new(b"CBLC"), // 33
    Tag::new(b"COLR"), // 34
    Tag::new(b"CPAL"), // 35
    Tag::new(b"SVG "), // 36
    Tag::new(b"sbix"), // 37
    Tag::new(b"acnt"), // 38
    Tag::new(b"avar"), // 39
    Tag::new(b"bdat"), // 40
    Tag::new(b"bloc"), // 41
    Tag::new(b"bsln"), // 42
    Tag::new(b"cvar"), // 43
    Tag::new(b"fdsc"), // 44
    Tag::new(b"feat"), // 45
    Tag::new(b"fmtx"), // 46
    Tag::new(b"fvar"), // 47
    Tag::new(b"gvar"), // 48
    Tag::new(b"hsty"), // 49
    Tag::new(b"just"), // 50
    Tag::new(b"lcar"), // 51
    Tag::new(b"mort"), // 52
    Tag::new(b"morx"), // 53
    Tag::new(b"opbd"), // 54
    Tag::new(b"prop"), // 55
    Tag::new(b"trak"), // 56
    Tag::new(b"Zapf"), // 57
    Tag::new(b"Silf"), // 58
    Tag::new(b"Glat"), // 59
    Tag::new(b"Gloc"), // 60
    Tag::new(b"Feat"), // 61
    Tag::new(b"Sill"), // 62
];

/// Index of `tag` in the known-tags table, or [`UNKNOWN_TAG_INDEX`] when the
/// tag must be written explicitly.
pub fn known_tag_index(tag: Tag) -> u8 {
    KNOWN_TAGS
        .iter()
        .position(|&known| known == tag)
        .map(|idx| idx as u8)
        .unwrap_or(UNKNOWN_TAG_INDEX)
}

/// Whether a WOFF2 directory entry for `tag` carries a transformLength field.
pub fn is_transformed_tag(tag: Tag) -> bool {
    tag == GLYF || tag == LOCA
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tag_indices() {
        assert_eq!(known_tag_index(Tag::new(b"cmap")), 0);
        assert_eq!(known_tag_index(GLYF), 10);
        assert_eq!(known_tag_index(LOCA), 11);
        assert_eq!(known_tag_index(Tag::new(b"Sill")), 62);
        assert_eq!(known_tag_index(Tag::new(b"ZZZZ")), UNKNOWN_TAG_INDEX);
    }

    #[test]
    fn padded_tags_are_distinct() {
        assert_eq!(known_tag_index(Tag::new(b"cvt ")), 8);
        assert_eq!(known_tag_index(Tag::new(b"CFF ")), 13);
        assert_eq!(known_tag_index(Tag::new(b"SVG ")), 36);
    }
}

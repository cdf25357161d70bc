use crate::model_service::ClassNames;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    const fn from_hex(hex: u32) -> Self {
        Self::new((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
    }
}

#[rustfmt::skip]
const UI_PALETTE: [Rgb; 66] = [
    Rgb::from_hex(0xFF0000), Rgb::from_hex(0x00FF00), Rgb::from_hex(0x0000FF),
    Rgb::from_hex(0xFFFF00), Rgb::from_hex(0xFF00FF), Rgb::from_hex(0x00FFFF),
    Rgb::from_hex(0x800000), Rgb::from_hex(0x008000), Rgb::from_hex(0x000080),
    Rgb::from_hex(0x808000), Rgb::from_hex(0x800080), Rgb::from_hex(0x008080),
    Rgb::from_hex(0xC00000), Rgb::from_hex(0x00C000), Rgb::from_hex(0x0000C0),
    Rgb::from_hex(0xC0C000), Rgb::from_hex(0xC000C0), Rgb::from_hex(0x00C0C0),
    Rgb::from_hex(0x400000), Rgb::from_hex(0x004000), Rgb::from_hex(0x000040),
    Rgb::from_hex(0x404000), Rgb::from_hex(0x400040), Rgb::from_hex(0x004040),
    Rgb::from_hex(0xFF4500), Rgb::from_hex(0x32CD32), Rgb::from_hex(0x1E90FF),
    Rgb::from_hex(0xFFD700), Rgb::from_hex(0xADFF2F), Rgb::from_hex(0xFF69B4),
    Rgb::from_hex(0x8A2BE2), Rgb::from_hex(0x5F9EA0), Rgb::from_hex(0xDC143C),
    Rgb::from_hex(0x00CED1), Rgb::from_hex(0x228B22), Rgb::from_hex(0xFF1493),
    Rgb::from_hex(0x00BFFF), Rgb::from_hex(0xB8860B), Rgb::from_hex(0x6A5ACD),
    Rgb::from_hex(0x20B2AA), Rgb::from_hex(0xFF8C00), Rgb::from_hex(0x9932CC),
    Rgb::from_hex(0x8B0000), Rgb::from_hex(0x008B8B), Rgb::from_hex(0x2E8B57),
    Rgb::from_hex(0xDA70D6), Rgb::from_hex(0xFF6347), Rgb::from_hex(0x4682B4),
    Rgb::from_hex(0x9ACD32), Rgb::from_hex(0x8FBC8F), Rgb::from_hex(0x00FA9A),
    Rgb::from_hex(0x1E90FF), Rgb::from_hex(0xFF4500), Rgb::from_hex(0xDAA520),
    Rgb::from_hex(0x7FFF00), Rgb::from_hex(0x40E0D0), Rgb::from_hex(0xBA55D3),
    Rgb::from_hex(0xF08080), Rgb::from_hex(0x00FF7F), Rgb::from_hex(0xCD5C5C),
    Rgb::from_hex(0x87CEFA), Rgb::from_hex(0x32CD32), Rgb::from_hex(0x66CDAA),
    Rgb::from_hex(0xEE82EE), Rgb::from_hex(0x4682B4), Rgb::from_hex(0xBDB76B),
];

#[rustfmt::skip]
const MASK_PALETTE: [Rgb; 65] = [
    Rgb::from_hex(0x0A0A0A), Rgb::from_hex(0x141414), Rgb::from_hex(0x1E1E1E),
    Rgb::from_hex(0x282828), Rgb::from_hex(0x323232), Rgb::from_hex(0x3C3C3C),
    Rgb::from_hex(0x464646), Rgb::from_hex(0x505050), Rgb::from_hex(0x5A5A5A),
    Rgb::from_hex(0x646464), Rgb::from_hex(0x6E6E6E), Rgb::from_hex(0x787878),
    Rgb::from_hex(0x828282), Rgb::from_hex(0x8C8C8C), Rgb::from_hex(0x969696),
    Rgb::from_hex(0xA0A0A0), Rgb::from_hex(0xAAAAAA), Rgb::from_hex(0xB4B4B4),
    Rgb::from_hex(0xBEBEBE), Rgb::from_hex(0xC8C8C8), Rgb::from_hex(0xD2D2D2),
    Rgb::from_hex(0xDCDCDC), Rgb::from_hex(0xE6E6E6), Rgb::from_hex(0xF0F0F0),
    Rgb::from_hex(0xFAFAFA), Rgb::from_hex(0x0F0F0F), Rgb::from_hex(0x191919),
    Rgb::from_hex(0x232323), Rgb::from_hex(0x2D2D2D), Rgb::from_hex(0x373737),
    Rgb::from_hex(0x414141), Rgb::from_hex(0x4B4B4B), Rgb::from_hex(0x555555),
    Rgb::from_hex(0x5F5F5F), Rgb::from_hex(0x696969), Rgb::from_hex(0x737373),
    Rgb::from_hex(0x7D7D7D), Rgb::from_hex(0x878787), Rgb::from_hex(0x919191),
    Rgb::from_hex(0x9B9B9B), Rgb::from_hex(0xA5A5A5), Rgb::from_hex(0xAFAFAF),
    Rgb::from_hex(0xB9B9B9), Rgb::from_hex(0xC3C3C3), Rgb::from_hex(0xCDCDCD),
    Rgb::from_hex(0xD7D7D7), Rgb::from_hex(0xE1E1E1), Rgb::from_hex(0xEBEBEB),
    Rgb::from_hex(0xF5F5F5), Rgb::from_hex(0xFFFFFF), Rgb::from_hex(0x121212),
    Rgb::from_hex(0x1C1C1C), Rgb::from_hex(0x262626), Rgb::from_hex(0x303030),
    Rgb::from_hex(0x3A3A3A), Rgb::from_hex(0x444444), Rgb::from_hex(0x4E4E4E),
    Rgb::from_hex(0x585858), Rgb::from_hex(0x626262), Rgb::from_hex(0x6C6C6C),
    Rgb::from_hex(0x767676), Rgb::from_hex(0x808080), Rgb::from_hex(0x8A8A8A),
    Rgb::from_hex(0x949494), Rgb::from_hex(0x9E9E9E),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetadataEntry {
    pub name: String,
    pub class_id: i32,
    pub ui_color: Rgb,
    pub mask_color: Rgb,
}

/// Color identity for every class the loaded model knows.
///
/// Colors are keyed on the class *name* rather than the id, so a retrained
/// model that reorders its classes keeps the same legend. Built once per
/// model load, then shared read-only between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMetadata {
    entries: Vec<ClassMetadataEntry>,
}

impl ClassMetadata {
    pub fn build(class_names: &ClassNames) -> Self {
        let entries = class_names
            .iter()
            .map(|(&class_id, name)| ClassMetadataEntry {
                name: name.clone(),
                class_id,
                ui_color: UI_PALETTE[palette_index(name, UI_PALETTE.len())],
                mask_color: MASK_PALETTE[palette_index(name, MASK_PALETTE.len())],
            })
            .collect();

        Self { entries }
    }

    pub fn from_entries(mut entries: Vec<ClassMetadataEntry>) -> Self {
        entries.sort_by_key(|entry| entry.class_id);
        Self { entries }
    }

    pub fn entries(&self) -> &[ClassMetadataEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn palette_index(name: &str, palette_len: usize) -> usize {
    crc32fast::hash(normalize_name(name).as_bytes()) as usize % palette_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn colors_by_name(metadata: &ClassMetadata) -> BTreeMap<String, (Rgb, Rgb)> {
        metadata
            .entries()
            .iter()
            .map(|entry| {
                (
                    normalize_name(&entry.name),
                    (entry.ui_color, entry.mask_color),
                )
            })
            .collect()
    }

    fn names(list: &[(i32, &str)]) -> ClassNames {
        list.iter()
            .map(|(id, name)| (*id, name.to_string()))
            .collect()
    }

    #[test]
    fn test_palettes_are_large_enough() {
        assert!(UI_PALETTE.len() >= 30);
        assert!(MASK_PALETTE.len() >= 30);
    }

    #[test]
    fn test_colors_ignore_case_and_whitespace() {
        let metadata =
            ClassMetadata::build(&names(&[(0, "scratch"), (1, "Scratch "), (2, "DENT")]));
        let entries = metadata.entries();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].ui_color, entries[1].ui_color);
        assert_eq!(entries[0].mask_color, entries[1].mask_color);
        assert_eq!(entries[1].name, "Scratch ");

        let dent = ClassMetadata::build(&names(&[(9, "dent")]));
        assert_eq!(entries[2].ui_color, dent.entries()[0].ui_color);
        assert_eq!(entries[2].mask_color, dent.entries()[0].mask_color);
    }

    #[test]
    fn test_colors_are_stable_across_processes() {
        let metadata = ClassMetadata::build(&names(&[(0, "scratch"), (1, "dent")]));
        let entries = metadata.entries();

        assert_eq!(entries[0].ui_color, Rgb::new(0x46, 0x82, 0xB4));
        assert_eq!(entries[0].mask_color, Rgb::new(0x55, 0x55, 0x55));
        assert_eq!(entries[1].ui_color, Rgb::new(0x00, 0x40, 0x40));
        assert_eq!(entries[1].mask_color, Rgb::new(0xAA, 0xAA, 0xAA));
    }

    #[test]
    fn test_colors_do_not_depend_on_class_ids() {
        let first = ClassMetadata::build(&names(&[(0, "scratch"), (1, "dent"), (2, "crack")]));
        let retrained = ClassMetadata::build(&names(&[(0, "crack"), (5, "dent"), (7, "scratch")]));

        assert_eq!(colors_by_name(&first), colors_by_name(&retrained));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let class_names = names(&[(0, "person"), (1, "bicycle"), (2, "car")]);
        assert_eq!(
            ClassMetadata::build(&class_names),
            ClassMetadata::build(&class_names)
        );
    }

    #[test]
    fn test_entries_follow_class_id_order() {
        let metadata = ClassMetadata::build(&names(&[(3, "c"), (-1, "unknown"), (1, "a")]));
        let ids: Vec<i32> = metadata.entries().iter().map(|e| e.class_id).collect();
        assert_eq!(ids, vec![-1, 1, 3]);
    }

    #[test]
    fn test_empty_names_yield_empty_table() {
        let metadata = ClassMetadata::build(&ClassNames::new());
        assert!(metadata.is_empty());
    }
}

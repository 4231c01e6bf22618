//! Synthetic font for unit tests

use std::collections::HashMap;

use super::{Advance, FontData, FontMetrics, GlyphBounds, GlyphId, TypesettingFeatures};

/// Font with a fixed advance per covered character.
/// Glyph IDs are the code point value.
#[derive(Debug, Clone)]
pub(crate) struct TestFont {
    advances: HashMap<char, f32>,
    kerning: HashMap<(u32, u32), f32>,
    fixed_pitch: bool,
}

impl TestFont {
    pub(crate) fn new() -> Self {
        Self {
            advances: HashMap::new(),
            kerning: HashMap::new(),
            fixed_pitch: false,
        }
    }

    /// ASCII printable characters, each `5.0 + (c % 4)` wide; space is 4.0
    pub(crate) fn latin() -> Self {
        let mut font = Self::new();
        for c in ' '..='~' {
            font.advances.insert(c, 5.0 + (c as u32 % 4) as f32);
        }
        font.advances.insert(' ', 4.0);
        font.advances.insert('\u{A0}', 4.0);
        font
    }

    pub(crate) fn with_char(mut self, c: char, advance: f32) -> Self {
        self.advances.insert(c, advance);
        self
    }

    pub(crate) fn with_kerning(mut self, left: char, right: char, adjust: f32) -> Self {
        self.kerning.insert((left as u32, right as u32), adjust);
        self
    }

    pub(crate) fn fixed_pitch(mut self) -> Self {
        self.fixed_pitch = true;
        self
    }

    pub(crate) fn width_of(&self, c: char) -> f32 {
        self.advances.get(&c).copied().unwrap_or(0.0)
    }
}

impl FontData for TestFont {
    fn glyph_for_character(&self, c: char) -> Option<GlyphId> {
        self.advances.contains_key(&c).then_some(GlyphId(c as u32))
    }

    fn advance_for_glyph(&self, glyph: GlyphId) -> f32 {
        char::from_u32(glyph.0).map(|c| self.width_of(c)).unwrap_or(0.0)
    }

    fn bounds_for_glyph(&self, glyph: GlyphId) -> GlyphBounds {
        GlyphBounds {
            x: -1.0,
            y: -12.0,
            width: self.advance_for_glyph(glyph) + 2.0,
            height: 15.0,
        }
    }

    fn metrics(&self) -> FontMetrics {
        FontMetrics {
            ascent: 10.0,
            descent: 2.0,
            line_gap: 0.0,
        }
    }

    fn space_glyph(&self) -> GlyphId {
        GlyphId(' ' as u32)
    }

    fn is_fixed_pitch(&self) -> bool {
        self.fixed_pitch
    }

    fn apply_transforms(&self, glyphs: &mut [GlyphId], advances: &mut [Advance], features: TypesettingFeatures) {
        if !features.contains(TypesettingFeatures::KERNING) {
            return;
        }
        for i in 1..glyphs.len() {
            if let Some(adjust) = self.kerning.get(&(glyphs[i - 1].0, glyphs[i].0)) {
                advances[i - 1].dx += adjust;
            }
        }
    }
}

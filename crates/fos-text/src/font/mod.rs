//! Font query interfaces and backends
//!
//! Shaping talks to fonts only through [`FontData`]. Platform backends
//! ([`TtfFont`] here) implement it; a [`FontCascade`] groups a primary font
//! with its fallback chain and owns the width cache for that group.

mod cascade;
mod database;
mod face;
#[cfg(test)]
pub(crate) mod test_font;

use std::fmt;
use std::ops::BitOr;

pub use cascade::{FallbackFonts, FontCascade, GlyphData, GlyphOverflow};
pub use database::{FontDatabase, FontQuery};
pub use face::TtfFont;

/// Glyph identifier within one font
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct GlyphId(pub u32);

impl GlyphId {
    /// The missing-glyph placeholder, usually drawn as a box
    pub const NOTDEF: GlyphId = GlyphId(0);
}

/// Advance or offset vector in device units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Advance {
    pub dx: f32,
    pub dy: f32,
}

impl Advance {
    /// Purely horizontal advance
    pub fn horizontal(dx: f32) -> Self {
        Self { dx, dy: 0.0 }
    }
}

/// Ink bounds of a glyph relative to its origin, y growing downward
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlyphBounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl GlyphBounds {
    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }
}

/// Vertical font metrics in device units (descent is positive below the baseline)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FontMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub line_gap: f32,
}

impl FontMetrics {
    /// Line height (ascent + descent + line gap)
    pub fn line_spacing(&self) -> f32 {
        self.ascent + self.descent + self.line_gap
    }
}

/// Typesetting features requested for a font group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypesettingFeatures(u8);

impl TypesettingFeatures {
    pub const NONE: Self = Self(0);
    pub const KERNING: Self = Self(1 << 0);
    pub const LIGATURES: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Kerning or ligatures are on, so glyphs need a font transform pass
    pub fn has_kerning_or_ligatures(self) -> bool {
        self.0 & (Self::KERNING.0 | Self::LIGATURES.0) != 0
    }
}

impl BitOr for TypesettingFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Which shaping implementation handles a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodePath {
    /// Pick per run from its characters
    #[default]
    Auto,
    /// Per-character width iteration
    Simple,
    /// Full script shaping through a [`ComplexShaper`](crate::shaping::ComplexShaper)
    Complex,
}

/// Raw font bytes for backends that shape from the font file
#[derive(Debug, Clone, Copy)]
pub struct ShapingData<'a> {
    pub data: &'a [u8],
    pub index: u32,
    /// Pixel size the advances should be scaled to
    pub size: f32,
}

/// Font query capability used by the shaping engine
pub trait FontData: fmt::Debug {
    /// Glyph for a character, or `None` if this font does not cover it
    fn glyph_for_character(&self, c: char) -> Option<GlyphId>;

    /// Horizontal advance of a glyph
    fn advance_for_glyph(&self, glyph: GlyphId) -> f32;

    /// Ink bounds of a glyph
    fn bounds_for_glyph(&self, glyph: GlyphId) -> GlyphBounds;

    fn metrics(&self) -> FontMetrics;

    fn space_glyph(&self) -> GlyphId;

    fn space_width(&self) -> f32 {
        self.advance_for_glyph(self.space_glyph())
    }

    fn is_fixed_pitch(&self) -> bool {
        false
    }

    /// Space width used when word rounding is on
    fn adjusted_space_width(&self) -> f32 {
        if self.is_fixed_pitch() {
            self.space_width().ceil()
        } else {
            self.space_width().round()
        }
    }

    /// Apply kerning and ligature substitution to a batch of glyphs that all
    /// belong to this font. The glyph count never changes.
    fn apply_transforms(&self, _glyphs: &mut [GlyphId], _advances: &mut [Advance], _features: TypesettingFeatures) {}

    /// Font file bytes for complex shaping, if this backend has them
    fn shaping_data(&self) -> Option<ShapingData<'_>> {
        None
    }
}

/// Identity comparison of two font handles
pub(crate) fn same_font(a: &dyn FontData, b: &dyn FontData) -> bool {
    std::ptr::addr_eq(a, b)
}

/// Font weight (100-900)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontWeight(pub u16);

impl FontWeight {
    pub const NORMAL: FontWeight = FontWeight(400);
    pub const BOLD: FontWeight = FontWeight(700);
}

impl Default for FontWeight {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u16> for FontWeight {
    fn from(value: u16) -> Self {
        FontWeight(value.clamp(100, 900))
    }
}

/// Font style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
    Oblique,
}

impl From<FontStyle> for fontdb::Style {
    fn from(style: FontStyle) -> Self {
        match style {
            FontStyle::Normal => fontdb::Style::Normal,
            FontStyle::Italic => fontdb::Style::Italic,
            FontStyle::Oblique => fontdb::Style::Oblique,
        }
    }
}

/// Size and spacing settings shared by every font of a cascade
#[derive(Debug, Clone, PartialEq)]
pub struct FontDescription {
    /// Pixel size
    pub size: f32,
    /// Extra width added after every non-zero-width glyph
    pub letter_spacing: f32,
    /// Extra width added to word separators
    pub word_spacing: f32,
    pub features: TypesettingFeatures,
    /// Tab stop distance in space widths
    pub tab_size: u32,
    pub code_path: CodePath,
}

impl Default for FontDescription {
    fn default() -> Self {
        Self {
            size: 16.0,
            letter_spacing: 0.0,
            word_spacing: 0.0,
            features: TypesettingFeatures::NONE,
            tab_size: 8,
            code_path: CodePath::Auto,
        }
    }
}

impl FontDescription {
    pub fn with_size(mut self, size: f32) -> Self {
        self.size = size;
        self
    }

    pub fn with_letter_spacing(mut self, spacing: f32) -> Self {
        self.letter_spacing = spacing;
        self
    }

    pub fn with_word_spacing(mut self, spacing: f32) -> Self {
        self.word_spacing = spacing;
        self
    }

    pub fn with_features(mut self, features: TypesettingFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_tab_size(mut self, tab_size: u32) -> Self {
        self.tab_size = tab_size;
        self
    }

    pub fn with_code_path(mut self, code_path: CodePath) -> Self {
        self.code_path = code_path;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features() {
        let features = TypesettingFeatures::KERNING | TypesettingFeatures::LIGATURES;
        assert!(features.contains(TypesettingFeatures::KERNING));
        assert!(features.has_kerning_or_ligatures());
        assert!(!TypesettingFeatures::NONE.has_kerning_or_ligatures());
        assert!(TypesettingFeatures::NONE.is_empty());
    }

    #[test]
    fn test_weight_clamped() {
        assert_eq!(FontWeight::from(1000), FontWeight(900));
        assert_eq!(FontWeight::from(50), FontWeight(100));
    }
}

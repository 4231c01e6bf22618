//! Font face backed by ttf-parser

use std::fmt;
use std::sync::Arc;

use ttf_parser::Face;

use super::{Advance, FontData, FontMetrics, GlyphBounds, GlyphId, ShapingData, TypesettingFeatures};
use crate::{Result, TextError};

/// A parsed font file at one pixel size
///
/// Owns the font bytes; tables are re-parsed on access, which only reads
/// the table directory.
#[derive(Clone)]
pub struct TtfFont {
    data: Arc<Vec<u8>>,
    index: u32,
    size: f32,
    scale: f32,
    metrics: FontMetrics,
    space_glyph: GlyphId,
    fixed_pitch: bool,
}

impl fmt::Debug for TtfFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtfFont")
            .field("index", &self.index)
            .field("size", &self.size)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl TtfFont {
    /// Parse face `index` of `data` for rendering at `size` pixels
    pub fn from_data(data: Arc<Vec<u8>>, index: u32, size: f32) -> Result<Self> {
        let face = Face::parse(&data, index).map_err(|e| TextError::FontParsing(e.to_string()))?;
        let scale = size / f32::from(face.units_per_em());
        let metrics = FontMetrics {
            ascent: f32::from(face.ascender()) * scale,
            descent: -f32::from(face.descender()) * scale,
            line_gap: f32::from(face.line_gap()) * scale,
        };
        let space_glyph = face.glyph_index(' ').map_or(GlyphId::NOTDEF, |g| GlyphId(u32::from(g.0)));
        let fixed_pitch = face.is_monospaced();
        drop(face);

        Ok(Self {
            data,
            index,
            size,
            scale,
            metrics,
            space_glyph,
            fixed_pitch,
        })
    }

    /// Pixel size
    pub fn size(&self) -> f32 {
        self.size
    }

    /// Same face at another pixel size
    pub fn with_size(&self, size: f32) -> Result<Self> {
        Self::from_data(Arc::clone(&self.data), self.index, size)
    }

    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, self.index).ok()
    }

    fn ttf_glyph(glyph: GlyphId) -> ttf_parser::GlyphId {
        ttf_parser::GlyphId(u16::try_from(glyph.0).unwrap_or(0))
    }

    /// Horizontal kerning adjustment for a glyph pair, in font units
    fn pair_kerning(face: &Face<'_>, left: ttf_parser::GlyphId, right: ttf_parser::GlyphId) -> Option<i16> {
        let kern = face.tables().kern?;
        kern.subtables
            .into_iter()
            .filter(|st| st.horizontal && !st.variable)
            .find_map(|st| st.glyphs_kerning(left, right))
    }
}

impl FontData for TtfFont {
    fn glyph_for_character(&self, c: char) -> Option<GlyphId> {
        self.face()?.glyph_index(c).map(|g| GlyphId(u32::from(g.0)))
    }

    fn advance_for_glyph(&self, glyph: GlyphId) -> f32 {
        self.face()
            .and_then(|face| face.glyph_hor_advance(Self::ttf_glyph(glyph)))
            .map_or(0.0, |advance| f32::from(advance) * self.scale)
    }

    fn bounds_for_glyph(&self, glyph: GlyphId) -> GlyphBounds {
        let Some(rect) = self.face().and_then(|face| face.glyph_bounding_box(Self::ttf_glyph(glyph))) else {
            return GlyphBounds::default();
        };
        // Font units grow upward; bounds grow downward
        GlyphBounds {
            x: f32::from(rect.x_min) * self.scale,
            y: -f32::from(rect.y_max) * self.scale,
            width: f32::from(rect.width()) * self.scale,
            height: f32::from(rect.height()) * self.scale,
        }
    }

    fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    fn space_glyph(&self) -> GlyphId {
        self.space_glyph
    }

    fn is_fixed_pitch(&self) -> bool {
        self.fixed_pitch
    }

    /// Pair kerning from the `kern` table. Ligature substitution needs the
    /// complex path.
    fn apply_transforms(&self, glyphs: &mut [GlyphId], advances: &mut [Advance], features: TypesettingFeatures) {
        if !features.contains(TypesettingFeatures::KERNING) || glyphs.len() < 2 {
            return;
        }
        let Some(face) = self.face() else {
            return;
        };
        for i in 1..glyphs.len() {
            let left = Self::ttf_glyph(glyphs[i - 1]);
            let right = Self::ttf_glyph(glyphs[i]);
            if let Some(adjust) = Self::pair_kerning(&face, left, right) {
                advances[i - 1].dx += f32::from(adjust) * self.scale;
            }
        }
    }

    fn shaping_data(&self) -> Option<ShapingData<'_>> {
        Some(ShapingData {
            data: &self.data,
            index: self.index,
            size: self.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_rejected() {
        let result = TtfFont::from_data(Arc::new(vec![0u8; 16]), 0, 16.0);
        assert!(matches!(result, Err(TextError::FontParsing(_))));
    }
}

//! Complex shaper using rustybuzz

use std::ops::Range;
use std::str::FromStr;

use rustybuzz::{Face, Feature, UnicodeBuffer, shape};

use super::characters;
use super::complex::{ComplexShaper, ShapedGlyph};
use super::TextDirection;
use crate::font::{Advance, FontData, GlyphId, TypesettingFeatures};
use crate::{Result, TextError};

/// Complex shaper backed by HarfBuzz (via rustybuzz)
///
/// Shapes from the font file bytes exposed by
/// [`FontData::shaping_data`]; fonts without them cannot be shaped.
#[derive(Debug, Clone, Default)]
pub struct RustybuzzShaper {
    language: Option<rustybuzz::Language>,
}

impl RustybuzzShaper {
    /// Create a new shaper
    pub fn new() -> Self {
        Self { language: None }
    }

    /// Set language (for automatic feature selection)
    pub fn language(mut self, language: &str) -> Self {
        self.language = rustybuzz::Language::from_str(language).ok();
        self
    }

    /// Features switched off for this feature set
    fn disabled_features(features: TypesettingFeatures) -> Vec<Feature> {
        let mut disabled = Vec::new();
        if !features.contains(TypesettingFeatures::KERNING) {
            disabled.push("kern=0");
        }
        if !features.contains(TypesettingFeatures::LIGATURES) {
            disabled.extend(["liga=0", "clig=0"]);
        }
        disabled.into_iter().filter_map(|f| Feature::from_str(f).ok()).collect()
    }
}

impl ComplexShaper for RustybuzzShaper {
    fn shape(
        &self,
        font: &dyn FontData,
        text: &[u16],
        range: Range<usize>,
        direction: TextDirection,
        features: TypesettingFeatures,
    ) -> Result<Vec<ShapedGlyph>> {
        let data = font
            .shaping_data()
            .ok_or_else(|| TextError::ShapingFailed("font has no shaping data".into()))?;
        let face = Face::from_slice(data.data, data.index)
            .ok_or_else(|| TextError::FontParsing("Failed to parse font".into()))?;

        // Clusters are code unit indices into the whole run
        let mut buffer = UnicodeBuffer::new();
        let mut index = range.start;
        while index < range.end {
            let (c, length) = characters::decode_at(&text[..range.end], index);
            buffer.add(c, index as u32);
            index += length;
        }
        buffer.set_direction(direction.into());
        if let Some(ref language) = self.language {
            buffer.set_language(language.clone());
        }
        buffer.guess_segment_properties();

        let output = shape(&face, &Self::disabled_features(features), buffer);

        let scale = design_units_scale(data.size, face.units_per_em() as u16);
        let mut glyphs: Vec<ShapedGlyph> = output
            .glyph_infos()
            .iter()
            .zip(output.glyph_positions())
            .map(|(info, pos)| ShapedGlyph {
                glyph: GlyphId(info.glyph_id),
                advance: Advance {
                    dx: pos.x_advance as f32 * scale,
                    dy: -(pos.y_advance as f32) * scale,
                },
                offset: Advance {
                    dx: pos.x_offset as f32 * scale,
                    dy: -(pos.y_offset as f32) * scale,
                },
                cluster: info.cluster,
            })
            .collect();

        // HarfBuzz emits right-to-left runs in visual order
        if direction == TextDirection::RightToLeft {
            glyphs.reverse();
        }
        if glyphs.is_empty() && !range.is_empty() {
            return Err(TextError::ShapingFailed(format!("no glyphs for {} code units", range.len())));
        }
        Ok(glyphs)
    }
}

/// Pixels per font design unit
fn design_units_scale(size: f32, units_per_em: u16) -> f32 {
    size / f32::from(units_per_em)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::test_font::TestFont;

    #[test]
    fn test_disabled_features() {
        assert_eq!(RustybuzzShaper::disabled_features(TypesettingFeatures::NONE).len(), 3);
        let all = TypesettingFeatures::KERNING | TypesettingFeatures::LIGATURES;
        assert!(RustybuzzShaper::disabled_features(all).is_empty());
    }

    #[test]
    fn test_design_units_scale() {
        assert_eq!(design_units_scale(16.0, 1000), 0.016);
        assert_eq!(design_units_scale(16.0, 2048), 16.0 / 2048.0);
    }

    #[test]
    fn test_font_without_data_fails() {
        let font = TestFont::latin();
        let text: Vec<u16> = "ab".encode_utf16().collect();
        let result = RustybuzzShaper::new().shape(
            &font,
            &text,
            0..2,
            TextDirection::LeftToRight,
            TypesettingFeatures::NONE,
        );
        assert!(matches!(result, Err(TextError::ShapingFailed(_))));
    }
}

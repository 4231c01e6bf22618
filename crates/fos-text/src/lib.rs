//! fOS Text - Text Shaping and Measurement
//!
//! This crate turns runs of UTF-16 text into positioned glyphs and widths:
//! - Per-character width iteration with kerning, spacing, justification
//!   and word rounding (the simple path)
//! - Script shaping through rustybuzz (the complex path)
//! - An adaptively sampled width cache per font group
//! - Font loading and matching (fontdb, ttf-parser)

pub mod font;
pub mod glyph_run;
pub mod shaping;
pub mod width_cache;

pub use font::{
    Advance, CodePath, FallbackFonts, FontCascade, FontData, FontDatabase, FontDescription, FontMetrics, FontQuery,
    FontStyle, FontWeight, GlyphBounds, GlyphData, GlyphId, GlyphOverflow, ShapingData, TtfFont, TypesettingFeatures,
};
pub use glyph_run::{GlyphEntry, GlyphRun};
pub use shaping::{ComplexShaper, RustybuzzShaper, ShapedGlyph, TextDirection, TextRun, WidthIterator};
pub use width_cache::{WidthCache, WidthCacheStats};

/// Text shaping error types
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("Font not found: {0}")]
    FontNotFound(String),

    #[error("Failed to parse font: {0}")]
    FontParsing(String),

    #[error("Shaping failed: {0}")]
    ShapingFailed(String),
}

pub type Result<T> = std::result::Result<T, TextError>;

//! Font cascade
//!
//! A primary font plus its fallback chain, the description shared by all of
//! them, and the width cache for the group. This is the entry point for
//! measuring and shaping runs.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use crate::glyph_run::GlyphRun;
use crate::shaping::characters::{self, mirrored};
use crate::shaping::{ComplexShaper, ComplexTextController, RustybuzzShaper, TextRun, WidthIterator};
use crate::width_cache::{WidthCache, WidthCacheStats};

use super::{same_font, CodePath, FontData, FontDescription, FontMetrics, GlyphId};

/// A glyph and the font that owns it
#[derive(Debug, Clone, Copy)]
pub struct GlyphData<'f> {
    pub glyph: GlyphId,
    pub font: &'f dyn FontData,
}

/// Set of non-primary fonts used while measuring a run
#[derive(Debug, Default)]
pub struct FallbackFonts<'f> {
    fonts: Vec<&'f dyn FontData>,
}

impl<'f> FallbackFonts<'f> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a font unless already present
    pub fn insert(&mut self, font: &'f dyn FontData) -> bool {
        if self.contains(font) {
            return false;
        }
        self.fonts.push(font);
        true
    }

    pub fn contains(&self, font: &dyn FontData) -> bool {
        self.fonts.iter().any(|f| same_font(*f, font))
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'f dyn FontData> + '_ {
        self.fonts.iter().copied()
    }
}

/// Ink extents of a measured run beyond its advance box
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlyphOverflow {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
    /// Report raw glyph extents instead of the overflow past ascent/descent
    pub compute_bounds: bool,
}

impl GlyphOverflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overflow that reports raw glyph extents
    pub fn computing_bounds() -> Self {
        Self {
            compute_bounds: true,
            ..Self::default()
        }
    }

    pub(crate) fn update(
        &mut self,
        metrics: FontMetrics,
        min_y: f32,
        max_y: f32,
        first_glyph_overflow: f32,
        last_glyph_overflow: f32,
    ) {
        let (ascent, descent) = if self.compute_bounds {
            (0.0, 0.0)
        } else {
            (metrics.ascent, metrics.descent)
        };
        self.top = self.top.max((-min_y).ceil() - ascent);
        self.bottom = self.bottom.max(max_y.ceil() - descent);
        self.left = first_glyph_overflow.ceil();
        self.right = last_glyph_overflow.ceil();
    }
}

/// Primary font, fallback chain and width cache for one font group
pub struct FontCascade {
    fonts: Vec<Arc<dyn FontData>>,
    description: FontDescription,
    width_cache: RefCell<WidthCache>,
    shaper: Arc<dyn ComplexShaper>,
    expand_around_ideographs: bool,
}

impl fmt::Debug for FontCascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontCascade")
            .field("fonts", &self.fonts.len())
            .field("description", &self.description)
            .field("shaper", &self.shaper)
            .finish()
    }
}

impl FontCascade {
    /// Create a cascade with a single font
    pub fn new(primary: Arc<dyn FontData>, description: FontDescription) -> Self {
        Self {
            fonts: vec![primary],
            description,
            width_cache: RefCell::new(WidthCache::new()),
            shaper: Arc::new(RustybuzzShaper::new()),
            expand_around_ideographs: false,
        }
    }

    /// Append a font to the fallback chain
    pub fn with_fallback(mut self, font: Arc<dyn FontData>) -> Self {
        self.fonts.push(font);
        self.invalidate();
        self
    }

    /// Replace the complex-path shaper
    pub fn with_shaper(mut self, shaper: Arc<dyn ComplexShaper>) -> Self {
        self.shaper = shaper;
        self
    }

    /// Give ideograph boundaries justification opportunities
    pub fn with_expand_around_ideographs(mut self, enabled: bool) -> Self {
        self.expand_around_ideographs = enabled;
        self
    }

    pub fn primary_font(&self) -> &dyn FontData {
        self.fonts[0].as_ref()
    }

    /// Primary font followed by the fallback chain
    pub fn fonts(&self) -> impl Iterator<Item = &dyn FontData> {
        self.fonts.iter().map(|f| f.as_ref())
    }

    pub fn description(&self) -> &FontDescription {
        &self.description
    }

    /// Change size or spacing; cached widths are dropped
    pub fn set_description(&mut self, description: FontDescription) {
        self.description = description;
        self.invalidate();
    }

    pub fn letter_spacing(&self) -> f32 {
        self.description.letter_spacing
    }

    pub fn word_spacing(&self) -> f32 {
        self.description.word_spacing
    }

    pub fn expand_around_ideographs(&self) -> bool {
        self.expand_around_ideographs
    }

    pub fn shaper(&self) -> &dyn ComplexShaper {
        self.shaper.as_ref()
    }

    pub fn metrics(&self) -> FontMetrics {
        self.primary_font().metrics()
    }

    /// Drop every cached width
    pub fn invalidate(&self) {
        self.width_cache.borrow_mut().clear();
    }

    pub fn width_cache_stats(&self) -> WidthCacheStats {
        self.width_cache.borrow().stats()
    }

    /// True if any font in the chain has a glyph for `c`
    pub fn covers(&self, c: char) -> bool {
        self.fonts.iter().any(|f| f.glyph_for_character(c).is_some())
    }

    /// Resolve a character to a glyph, walking the fallback chain. Mirrored
    /// forms are tried first when `mirror` is set. Uncovered characters map
    /// to the primary font's missing glyph.
    pub fn glyph_data_for_character(&self, c: char, mirror: bool) -> GlyphData<'_> {
        if mirror {
            let m = mirrored(c);
            if m != c {
                if let Some(data) = self.find_glyph(m) {
                    return data;
                }
            }
        }
        self.find_glyph(c).unwrap_or(GlyphData {
            glyph: GlyphId::NOTDEF,
            font: self.primary_font(),
        })
    }

    fn find_glyph(&self, c: char) -> Option<GlyphData<'_>> {
        self.fonts.iter().find_map(|font| {
            font.glyph_for_character(c).map(|glyph| GlyphData {
                glyph,
                font: font.as_ref(),
            })
        })
    }

    /// Distance from `position` to the next tab stop
    pub fn tab_width(&self, font: &dyn FontData, position: f32) -> f32 {
        let tab_size = self.description.tab_size;
        if tab_size == 0 {
            return self.description.letter_spacing;
        }
        let tab_width = tab_size as f32 * font.space_width();
        if tab_width <= 0.0 {
            return self.description.letter_spacing;
        }
        tab_width - position.rem_euclid(tab_width)
    }

    /// Which path measures `run`
    pub fn code_path(&self, run: &TextRun<'_>) -> CodePath {
        match self.description.code_path {
            CodePath::Auto => {}
            forced => return forced,
        }
        if !run.character_scan_for_code_path() {
            return CodePath::Simple;
        }
        characters::code_path_for(run.chars())
    }

    /// Width of `run`
    pub fn measure(&self, run: &TextRun<'_>) -> f32 {
        self.width(run, None, None)
    }

    /// Width of `run`, reporting fallback fonts used and ink overflow when asked
    pub fn width<'f>(
        &'f self,
        run: &TextRun<'_>,
        fallback_fonts: Option<&mut FallbackFonts<'f>>,
        mut glyph_overflow: Option<&mut GlyphOverflow>,
    ) -> f32 {
        let code_path = self.code_path(run);
        let expensive = self.description.features.has_kerning_or_ligatures() || code_path == CodePath::Complex;
        let has_spacing = self.letter_spacing() != 0.0 || self.word_spacing() != 0.0;

        let mut local_fallbacks = FallbackFonts::new();
        let fallback_fonts = fallback_fonts.unwrap_or(&mut local_fallbacks);
        let fallbacks_before = fallback_fonts.len();

        let mut cache = self.width_cache.borrow_mut();
        let slot = cache.lookup_or_reserve(run, f32::NAN, expensive, has_spacing, glyph_overflow.is_some());
        if let Some(cached) = slot.as_deref().copied().filter(|w| !w.is_nan()) {
            return cached;
        }

        let width = if code_path == CodePath::Complex {
            self.width_for_complex_text(run, Some(&mut *fallback_fonts), glyph_overflow.as_deref_mut())
        } else {
            self.width_for_simple_text(run, Some(&mut *fallback_fonts), glyph_overflow.as_deref_mut())
        };

        // A width that needed fallback fonts depends on more than this group
        if let Some(slot) = slot {
            if fallback_fonts.len() == fallbacks_before {
                *slot = width;
            }
        }
        width
    }

    fn width_for_simple_text<'f>(
        &'f self,
        run: &TextRun<'_>,
        fallback_fonts: Option<&mut FallbackFonts<'f>>,
        glyph_overflow: Option<&mut GlyphOverflow>,
    ) -> f32 {
        let mut it = WidthIterator::new(self, *run, fallback_fonts, glyph_overflow.is_some());
        if self.description.features.has_kerning_or_ligatures() {
            // Font transforms need the glyphs
            let mut glyphs = GlyphRun::with_capacity(run.len());
            it.advance(run.len(), Some(&mut glyphs));
        } else {
            it.advance(run.len(), None);
        }

        if let Some(overflow) = glyph_overflow {
            overflow.update(
                self.metrics(),
                it.min_glyph_bounding_box_y(),
                it.max_glyph_bounding_box_y(),
                it.first_glyph_overflow(),
                it.last_glyph_overflow(),
            );
        }
        it.run_width_so_far() as f32
    }

    fn width_for_complex_text<'f>(
        &'f self,
        run: &TextRun<'_>,
        fallback_fonts: Option<&mut FallbackFonts<'f>>,
        glyph_overflow: Option<&mut GlyphOverflow>,
    ) -> f32 {
        let controller = ComplexTextController::new(self, *run, fallback_fonts, glyph_overflow.is_some());
        if let Some(overflow) = glyph_overflow {
            overflow.update(
                self.metrics(),
                controller.min_glyph_bounding_box_y(),
                controller.max_glyph_bounding_box_y(),
                controller.first_glyph_overflow(),
                controller.last_glyph_overflow(),
            );
        }
        controller.total_width()
    }

    /// Visually ordered glyphs for code units `[from, to)` of `run`. The
    /// returned run's initial advance is the pen offset of its first glyph
    /// relative to the start of the whole run.
    pub fn shape(&self, run: &TextRun<'_>, from: usize, to: usize) -> GlyphRun<'_> {
        let to = to.min(run.len());
        let from = from.min(to);
        if self.code_path(run) == CodePath::Complex {
            ComplexTextController::new(self, *run, None, false).glyph_run(from, to)
        } else {
            self.glyphs_for_simple_text(run, from, to)
        }
    }

    fn glyphs_for_simple_text(&self, run: &TextRun<'_>, from: usize, to: usize) -> GlyphRun<'_> {
        let mut it = WidthIterator::new(self, *run, None, false);
        let mut glyphs = GlyphRun::new();
        // Glyphs outside the window are measured into a scratch buffer
        let mut scratch = GlyphRun::new();

        it.advance(from, Some(&mut scratch));
        let before_width = it.run_width_so_far();
        it.advance(to, Some(&mut glyphs));
        if glyphs.is_empty() {
            return glyphs;
        }
        let after_width = it.run_width_so_far();

        if run.is_rtl() {
            it.advance(run.len(), Some(&mut scratch));
            let initial_advance =
                f64::from(it.final_rounding_width()) + it.run_width_so_far() - after_width;
            glyphs.set_initial_advance(initial_advance as f32);
            let len = glyphs.len();
            glyphs.reverse(0, len);
        } else {
            glyphs.set_initial_advance(before_width as f32);
        }
        glyphs
    }
}

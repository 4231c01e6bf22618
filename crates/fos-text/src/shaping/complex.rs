//! Complex-path shaping
//!
//! Runs that need script shaping are split into sub-runs by covering font,
//! each sub-run is handed to a [`ComplexShaper`], and the resulting glyphs
//! get the same spacing and justification treatment as the simple path.

use std::fmt;
use std::ops::Range;

use crate::font::{same_font, Advance, FallbackFonts, FontCascade, FontData, GlyphId, TypesettingFeatures};
use crate::glyph_run::GlyphRun;
use crate::Result;

use super::characters::{self, NO_BREAK_SPACE};
use super::{TextDirection, TextRun};

/// A glyph produced by a complex shaper
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapedGlyph {
    /// Glyph ID in the shaping font
    pub glyph: GlyphId,
    /// Advance in pixels
    pub advance: Advance,
    /// Offset from the pen position in pixels, y growing downward
    pub offset: Advance,
    /// Code unit index of the first character of the glyph's cluster
    pub cluster: u32,
}

/// Script shaping backend
pub trait ComplexShaper: fmt::Debug {
    /// Shape `text[range]` with `font`.
    ///
    /// Glyphs come back in logical order; clusters index into `text`.
    fn shape(
        &self,
        font: &dyn FontData,
        text: &[u16],
        range: Range<usize>,
        direction: TextDirection,
        features: TypesettingFeatures,
    ) -> Result<Vec<ShapedGlyph>>;
}

/// Shaped glyphs for a whole complex run, kept in logical order
pub struct ComplexTextController<'f, 'a> {
    run: TextRun<'a>,
    glyphs: GlyphRun<'f>,
    total_width: f32,
    max_glyph_bounding_box_y: f32,
    min_glyph_bounding_box_y: f32,
    first_glyph_overflow: f32,
    last_glyph_overflow: f32,
}

impl<'f, 'a> ComplexTextController<'f, 'a> {
    /// Shape `run`. A shaper failure yields an empty controller.
    pub fn new(
        font: &'f FontCascade,
        run: TextRun<'a>,
        mut fallback_fonts: Option<&mut FallbackFonts<'f>>,
        account_for_glyph_bounds: bool,
    ) -> Self {
        let mut controller = Self {
            run,
            glyphs: GlyphRun::with_capacity(run.len()),
            total_width: 0.0,
            max_glyph_bounding_box_y: f32::MIN,
            min_glyph_bounding_box_y: f32::MAX,
            first_glyph_overflow: 0.0,
            last_glyph_overflow: 0.0,
        };

        let features = font.description().features;
        for (range, sub_font) in itemize(font, run) {
            if let Some(fallback_fonts) = fallback_fonts.as_deref_mut() {
                if !same_font(sub_font, font.primary_font()) {
                    fallback_fonts.insert(sub_font);
                }
            }
            match font.shaper().shape(sub_font, run.chars(), range.clone(), run.direction(), features) {
                Ok(shaped) => {
                    for g in shaped {
                        controller.glyphs.append_with_offset(g.glyph, sub_font, g.advance, g.offset, g.cluster);
                    }
                }
                Err(e) => {
                    tracing::warn!("complex shaping of {} code units failed: {}", range.len(), e);
                    controller.glyphs.clear();
                    return controller;
                }
            }
        }

        controller.adjust_glyphs_and_advances(font);
        if account_for_glyph_bounds {
            controller.compute_bounds();
        }
        controller
    }

    /// Apply tabs, letter and word spacing, and justification expansion
    fn adjust_glyphs_and_advances(&mut self, font: &FontCascade) {
        let run = self.run;
        let chars = run.chars();
        let letter_spacing = font.letter_spacing();
        let word_spacing = font.word_spacing();
        let expansion = run.expansion();
        let has_extra_spacing =
            (letter_spacing != 0.0 || word_spacing != 0.0 || expansion != 0.0) && !run.spacing_disabled();

        let mut is_after_expansion = !run.allows_leading_expansion();
        let expansion_per_opportunity = if expansion == 0.0 {
            0.0
        } else {
            let mut after = is_after_expansion;
            let mut count = characters::expansion_opportunity_count(
                chars,
                run.direction(),
                &mut after,
                font.expand_around_ideographs(),
            );
            if after && !run.allows_trailing_expansion() {
                count = count.saturating_sub(1);
            }
            if count == 0 { 0.0 } else { expansion / count as f32 }
        };

        let mut width = 0.0f32;
        let mut previous_cluster = None;
        for i in 0..self.glyphs.len() {
            let cluster = self.glyphs.cluster_at(i) as usize;
            let first_in_cluster = previous_cluster != Some(cluster);
            previous_cluster = Some(cluster);
            let character = characters::decode_at(chars, cluster).0;
            let mut advance = self.glyphs.advance_at(i).dx;

            if first_in_cluster && character == '\t' && run.allow_tabs() {
                advance = font.tab_width(self.glyphs.font_at(i), run.x_pos() + width);
            }

            if has_extra_spacing {
                if advance != 0.0 && letter_spacing != 0.0 {
                    advance += letter_spacing;
                }
                let treat_as_space = characters::treat_as_space(character);
                if first_in_cluster
                    && (treat_as_space
                        || (font.expand_around_ideographs() && characters::is_cjk_ideograph_or_symbol(character)))
                {
                    if expansion_per_opportunity != 0.0 {
                        if !treat_as_space && !is_after_expansion {
                            // Opportunity before this ideograph
                            if i > 0 {
                                let previous = self.glyphs.advance_at(i - 1).dx;
                                self.glyphs.set_advance_width(i - 1, previous + expansion_per_opportunity);
                            } else {
                                advance += expansion_per_opportunity;
                            }
                            width += expansion_per_opportunity;
                        }
                        let cluster_end = next_cluster_start(&self.glyphs, i, chars.len());
                        if run.allows_trailing_expansion()
                            || (run.is_ltr() && cluster_end < chars.len())
                            || (run.is_rtl() && cluster != 0)
                        {
                            advance += expansion_per_opportunity;
                            is_after_expansion = true;
                        }
                    } else {
                        is_after_expansion = false;
                    }
                    if treat_as_space
                        && (character != '\t' || !run.allow_tabs())
                        && (cluster != 0 || character == NO_BREAK_SPACE)
                        && word_spacing != 0.0
                    {
                        advance += word_spacing;
                    }
                } else if first_in_cluster {
                    is_after_expansion = false;
                }
            }

            self.glyphs.set_advance_width(i, advance);
            width += advance;
        }
        self.total_width = self.glyphs.total_advance();
    }

    fn compute_bounds(&mut self) {
        let len = self.glyphs.len();
        if len == 0 {
            return;
        }
        for entry in self.glyphs.iter() {
            let bounds = entry.font.bounds_for_glyph(entry.glyph);
            self.max_glyph_bounding_box_y = self.max_glyph_bounding_box_y.max(bounds.max_y() + entry.offset.dy);
            self.min_glyph_bounding_box_y = self.min_glyph_bounding_box_y.min(bounds.y + entry.offset.dy);
        }
        // Overflow is measured at the visual ends of the run
        let (first, last) = if self.run.is_rtl() { (len - 1, 0) } else { (0, len - 1) };
        let first_bounds = self.glyphs.font_at(first).bounds_for_glyph(self.glyphs.glyph_at(first));
        self.first_glyph_overflow = (-(first_bounds.x + self.glyphs.offset_at(first).dx)).max(0.0);
        let last_bounds = self.glyphs.font_at(last).bounds_for_glyph(self.glyphs.glyph_at(last));
        self.last_glyph_overflow =
            (last_bounds.max_x() + self.glyphs.offset_at(last).dx - self.glyphs.advance_at(last).dx).max(0.0);
    }

    pub fn total_width(&self) -> f32 {
        self.total_width
    }

    pub fn max_glyph_bounding_box_y(&self) -> f32 {
        self.max_glyph_bounding_box_y
    }

    pub fn min_glyph_bounding_box_y(&self) -> f32 {
        self.min_glyph_bounding_box_y
    }

    pub fn first_glyph_overflow(&self) -> f32 {
        self.first_glyph_overflow
    }

    pub fn last_glyph_overflow(&self) -> f32 {
        self.last_glyph_overflow
    }

    /// Visually ordered glyphs whose clusters fall in `[from, to)`, with the
    /// pen offset of the window as the initial advance.
    pub fn glyph_run(&self, from: usize, to: usize) -> GlyphRun<'f> {
        let mut out = GlyphRun::new();
        let clusters = self.glyphs.clusters();
        let start = clusters.partition_point(|&c| (c as usize) < from);
        let end = clusters.partition_point(|&c| (c as usize) < to);
        if start >= end {
            return out;
        }
        out.append_range(&self.glyphs, start, end - start);

        let advances = self.glyphs.advances();
        let initial_advance: f32 = if self.run.is_rtl() {
            // Logically later glyphs sit to the left
            advances[end..].iter().map(|a| a.dx).sum()
        } else {
            advances[..start].iter().map(|a| a.dx).sum()
        };
        out.set_initial_advance(initial_advance);
        if self.run.is_rtl() {
            let len = out.len();
            out.reverse(0, len);
        }
        out
    }
}

/// Code unit index where the cluster after glyph `i` starts
fn next_cluster_start(glyphs: &GlyphRun<'_>, i: usize, run_len: usize) -> usize {
    let cluster = glyphs.cluster_at(i);
    glyphs.clusters()[i + 1..]
        .iter()
        .find(|&&c| c != cluster)
        .map_or(run_len, |&c| c as usize)
}

/// Split `run` into logical sub-runs that share one covering font. A base
/// character and its combining marks stay together, preferring a font that
/// covers the whole cluster.
fn itemize<'f>(font: &'f FontCascade, run: TextRun<'_>) -> Vec<(Range<usize>, &'f dyn FontData)> {
    let chars = run.chars();
    let mut items: Vec<(Range<usize>, &'f dyn FontData)> = Vec::new();
    let mut index = 0;
    while index < chars.len() {
        let (base, length) = characters::decode_at(chars, index);
        let mut cluster: Vec<char> = vec![base];
        let mut end = index + length;
        while end < chars.len() {
            let (mark, mark_length) = characters::decode_at(chars, end);
            if !characters::is_combining_mark(mark) {
                break;
            }
            cluster.push(mark);
            end += mark_length;
        }

        let cluster_font = font
            .fonts()
            .find(|f| cluster.iter().all(|&c| f.glyph_for_character(c).is_some()))
            .unwrap_or_else(|| font.glyph_data_for_character(base, run.is_rtl()).font);

        match items.last_mut() {
            Some((range, last)) if same_font(*last, cluster_font) => range.end = end,
            _ => items.push((index..end, cluster_font)),
        }
        index = end;
    }
    items
}

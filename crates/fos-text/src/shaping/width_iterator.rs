//! Simple-path width iterator
//!
//! Walks a run cluster by cluster, resolving each character to a glyph in
//! the font cascade and accumulating advances with letter/word spacing,
//! justification and word rounding applied. Iteration is resumable: each
//! [`WidthIterator::advance`] call continues where the previous one stopped,
//! carrying the rounding state across the chunk boundary.

use unicode_normalization::UnicodeNormalization;

use crate::font::{same_font, Advance, FallbackFonts, FontCascade, FontData, GlyphBounds, TypesettingFeatures};
use crate::glyph_run::GlyphRun;

use super::characters::{self, NO_BREAK_SPACE};
use super::TextRun;

/// Advances of a space-like character recorded before font transforms, so
/// kerning never changes the width of word separators.
#[derive(Debug, Clone, Copy)]
struct SpaceAdvances {
    /// Index of the space glyph in the output buffer
    index: usize,
    is_space: bool,
    /// Advance of the glyph before the space
    before: f32,
    /// Advance of the space itself
    at: f32,
}

/// Per-character width iterator for runs that need no script shaping
pub struct WidthIterator<'f, 'a, 'b> {
    font: &'f FontCascade,
    run: TextRun<'a>,
    fallback_fonts: Option<&'b mut FallbackFonts<'f>>,
    features: TypesettingFeatures,
    current_character: usize,
    run_width_so_far: f64,
    expansion: f32,
    expansion_per_opportunity: f32,
    is_after_expansion: bool,
    final_rounding_width: f32,
    account_for_glyph_bounds: bool,
    max_glyph_bounding_box_y: f32,
    min_glyph_bounding_box_y: f32,
    first_glyph_overflow: f32,
    last_glyph_overflow: f32,
}

impl<'f, 'a, 'b> WidthIterator<'f, 'a, 'b> {
    pub fn new(
        font: &'f FontCascade,
        run: TextRun<'a>,
        fallback_fonts: Option<&'b mut FallbackFonts<'f>>,
        account_for_glyph_bounds: bool,
    ) -> Self {
        let is_after_expansion = !run.allows_leading_expansion();
        let expansion = run.expansion();
        let expansion_per_opportunity = if expansion == 0.0 {
            0.0
        } else {
            let mut after = is_after_expansion;
            let mut count = characters::expansion_opportunity_count(
                run.chars(),
                run.direction(),
                &mut after,
                font.expand_around_ideographs(),
            );
            if after && !run.allows_trailing_expansion() {
                count = count.saturating_sub(1);
            }
            if count == 0 { 0.0 } else { expansion / count as f32 }
        };

        Self {
            font,
            run,
            fallback_fonts,
            features: font.description().features,
            current_character: 0,
            run_width_so_far: 0.0,
            expansion,
            expansion_per_opportunity,
            is_after_expansion,
            final_rounding_width: 0.0,
            account_for_glyph_bounds,
            max_glyph_bounding_box_y: f32::MIN,
            min_glyph_bounding_box_y: f32::MAX,
            first_glyph_overflow: 0.0,
            last_glyph_overflow: 0.0,
        }
    }

    /// Code unit index where the next `advance` starts
    pub fn current_character(&self) -> usize {
        self.current_character
    }

    /// Width accumulated so far
    pub fn run_width_so_far(&self) -> f64 {
        self.run_width_so_far
    }

    /// Rounding adjustment folded into the last glyph
    pub fn final_rounding_width(&self) -> f32 {
        self.final_rounding_width
    }

    pub fn max_glyph_bounding_box_y(&self) -> f32 {
        self.max_glyph_bounding_box_y
    }

    pub fn min_glyph_bounding_box_y(&self) -> f32 {
        self.min_glyph_bounding_box_y
    }

    /// Ink overhang left of the first glyph
    pub fn first_glyph_overflow(&self) -> f32 {
        self.first_glyph_overflow
    }

    /// Ink overhang right of the last glyph
    pub fn last_glyph_overflow(&self) -> f32 {
        self.last_glyph_overflow
    }

    fn should_apply_font_transforms(&self) -> bool {
        self.run.len() > 1 && self.features.has_kerning_or_ligatures()
    }

    /// Advance up to code unit `offset`, appending glyphs to `glyphs` when
    /// given. Returns the number of code units consumed.
    pub fn advance(&mut self, offset: usize, mut glyphs: Option<&mut GlyphRun<'f>>) -> usize {
        let offset = offset.min(self.run.len());
        if self.current_character >= offset {
            return 0;
        }

        let cascade: &'f FontCascade = self.font;
        let run = self.run;
        let chars = run.chars();
        let rtl = run.is_rtl();
        let letter_spacing = cascade.letter_spacing();
        let word_spacing = cascade.word_spacing();
        let has_extra_spacing =
            (letter_spacing != 0.0 || word_spacing != 0.0 || self.expansion != 0.0) && !run.spacing_disabled();
        let apply_transforms = self.should_apply_font_transforms();

        let mut width_since_last_rounding = self.run_width_so_far;
        self.run_width_so_far = self.run_width_so_far.floor();
        width_since_last_rounding -= self.run_width_so_far;

        let mut last_rounding_width = self.final_rounding_width;
        let mut bounds = GlyphBounds::default();

        let primary = cascade.primary_font();
        let mut last_font: &'f dyn FontData = primary;
        let mut last_glyph_count = glyphs.as_deref().map_or(0, GlyphRun::len);
        let mut spaces: Vec<SpaceAdvances> = Vec::new();

        let mut index = self.current_character;
        while index < offset {
            let (character, cluster_length) = self.consume(index, offset);
            let glyph_data = cascade.glyph_data_for_character(character, rtl);
            let glyph = glyph_data.glyph;
            let font = glyph_data.font;

            let mut width = if character == '\t' && run.allow_tabs() {
                let position = run.x_pos() + (self.run_width_so_far + width_since_last_rounding) as f32;
                cascade.tab_width(font, position)
            } else {
                let width = font.advance_for_glyph(glyph);
                // Spaces snap to the adjusted space width, and in fixed-pitch
                // fonts so does anything exactly as wide as a space
                if run.apply_word_rounding()
                    && width == font.space_width()
                    && (font.is_fixed_pitch() || glyph == font.space_glyph())
                {
                    font.adjusted_space_width()
                } else {
                    width
                }
            };

            if !same_font(font, last_font) && width != 0.0 {
                if apply_transforms {
                    if let Some(buffer) = glyphs.as_deref_mut() {
                        let delta = apply_font_transforms(
                            buffer,
                            run.is_ltr(),
                            &mut last_glyph_count,
                            last_font,
                            self.features,
                            &mut spaces,
                        );
                        self.run_width_so_far += f64::from(delta);
                    }
                }
                last_font = font;
                if !same_font(font, primary) {
                    if let Some(fallback_fonts) = self.fallback_fonts.as_deref_mut() {
                        fallback_fonts.insert(font);
                    }
                }
            }

            if has_extra_spacing {
                if width != 0.0 && letter_spacing != 0.0 {
                    width += letter_spacing;
                }

                let treat_as_space = characters::treat_as_space(character);
                if treat_as_space
                    || (cascade.expand_around_ideographs() && characters::is_cjk_ideograph_or_symbol(character))
                {
                    if self.expansion != 0.0 {
                        let mut previous_expansion = self.expansion;
                        if !treat_as_space && !self.is_after_expansion {
                            // Opportunity before this ideograph
                            self.expansion -= self.expansion_per_opportunity;
                            let at_opportunity = if run.apply_word_rounding() {
                                previous_expansion.round() - self.expansion.round()
                            } else {
                                self.expansion_per_opportunity
                            };
                            self.run_width_so_far += f64::from(at_opportunity);
                            if let Some(buffer) = glyphs.as_deref_mut() {
                                if buffer.is_empty() {
                                    buffer.append(
                                        font.space_glyph(),
                                        font,
                                        Advance::horizontal(at_opportunity),
                                        index as u32,
                                    );
                                } else {
                                    buffer.expand_last_advance(at_opportunity);
                                }
                            }
                            previous_expansion = self.expansion;
                        }
                        if run.allows_trailing_expansion()
                            || (run.is_ltr() && index + cluster_length < run.len())
                            || (rtl && index != 0)
                        {
                            self.expansion -= self.expansion_per_opportunity;
                            width += if run.apply_word_rounding() {
                                previous_expansion.round() - self.expansion.round()
                            } else {
                                self.expansion_per_opportunity
                            };
                            self.is_after_expansion = true;
                        }
                    } else {
                        self.is_after_expansion = false;
                    }

                    // Word spacing widens the separator glyph
                    if treat_as_space
                        && (character != '\t' || !run.allow_tabs())
                        && (index != 0 || character == NO_BREAK_SPACE)
                        && word_spacing != 0.0
                    {
                        width += word_spacing;
                    }
                } else {
                    self.is_after_expansion = false;
                }
            }

            if apply_transforms && characters::treat_as_space(character) {
                if let Some(buffer) = glyphs.as_deref() {
                    let len = buffer.len();
                    spaces.push(SpaceAdvances {
                        index: len,
                        is_space: character == ' ',
                        before: if len > 0 { buffer.advance_at(len - 1).dx } else { 0.0 },
                        at: width,
                    });
                }
            }

            if self.account_for_glyph_bounds {
                bounds = font.bounds_for_glyph(glyph);
                if index == 0 {
                    self.first_glyph_overflow = (-bounds.x).max(0.0);
                }
            }

            let cluster = index;
            index += cluster_length;

            let old_width = width;

            // Word boundaries land on integer pixels so following words do too
            if run.apply_word_rounding() && characters::is_rounding_hack_character(character) {
                width = width.ceil();
                self.run_width_so_far += f64::from(width);
            } else {
                let next_is_rounding_hack = run.apply_word_rounding()
                    && index < run.len()
                    && characters::is_rounding_hack_character(characters::decode_at(chars, index).0);
                if next_is_rounding_hack || (run.apply_run_rounding() && index >= run.len()) {
                    let total_width = width_since_last_rounding + f64::from(width);
                    width_since_last_rounding = total_width.ceil();
                    width += (width_since_last_rounding - total_width) as f32;
                    self.run_width_so_far += width_since_last_rounding;
                    width_since_last_rounding = 0.0;
                } else {
                    width_since_last_rounding += f64::from(width);
                }
            }

            if let Some(buffer) = glyphs.as_deref_mut() {
                let advance = if rtl { old_width + last_rounding_width } else { width };
                buffer.append(glyph, font, Advance::horizontal(advance), cluster as u32);
            }

            last_rounding_width = width - old_width;

            if self.account_for_glyph_bounds {
                self.max_glyph_bounding_box_y = self.max_glyph_bounding_box_y.max(bounds.max_y());
                self.min_glyph_bounding_box_y = self.min_glyph_bounding_box_y.min(bounds.y);
                self.last_glyph_overflow = (bounds.max_x() - width).max(0.0);
            }
        }

        if apply_transforms {
            if let Some(buffer) = glyphs.as_deref_mut() {
                let delta = apply_font_transforms(
                    buffer,
                    run.is_ltr(),
                    &mut last_glyph_count,
                    last_font,
                    self.features,
                    &mut spaces,
                );
                self.run_width_so_far += f64::from(delta);
            }
        }

        let consumed = index - self.current_character;
        self.current_character = index;
        self.run_width_so_far += width_since_last_rounding;
        self.final_rounding_width = last_rounding_width;
        consumed
    }

    /// Advance by exactly one cluster, returning the width of the glyphs it
    /// produced, or `None` at the end of the run or if no glyph was emitted.
    pub fn advance_one_character(&mut self, glyphs: &mut GlyphRun<'f>) -> Option<f32> {
        if self.current_character >= self.run.len() {
            return None;
        }
        let (_, cluster_length) = self.consume(self.current_character, self.run.len());
        let old_len = glyphs.len();
        self.advance(self.current_character + cluster_length, Some(glyphs));
        if glyphs.len() == old_len {
            return None;
        }
        Some(glyphs.advances()[old_len..].iter().map(|a| a.dx).sum())
    }

    /// Next cluster at `index`: a code point, or a base plus combining marks
    /// composed to a single character when some font covers the composition.
    fn consume(&self, index: usize, end: usize) -> (char, usize) {
        let chars = &self.run.chars()[..end];
        let (character, length) = characters::decode_at(chars, index);

        let mut cluster_end = index + length;
        while cluster_end < end {
            let (mark, mark_length) = characters::decode_at(chars, cluster_end);
            if !characters::is_combining_mark(mark) {
                break;
            }
            cluster_end += mark_length;
        }
        if cluster_end == index + length {
            return (character, length);
        }

        let composed: String = String::from_utf16_lossy(&chars[index..cluster_end]).nfc().collect();
        let mut composed_chars = composed.chars();
        match (composed_chars.next(), composed_chars.next()) {
            (Some(single), None) if self.font.covers(single) => (single, cluster_end - index),
            _ => (character, length),
        }
    }
}

/// Run the font's kerning/ligature transform over the glyphs appended since
/// `last_glyph_count`, restoring space advances afterwards. Returns the
/// change in total advance.
fn apply_font_transforms(
    buffer: &mut GlyphRun<'_>,
    ltr: bool,
    last_glyph_count: &mut usize,
    font: &dyn FontData,
    features: TypesettingFeatures,
    spaces: &mut Vec<SpaceAdvances>,
) -> f32 {
    let size = buffer.len();
    let from = *last_glyph_count;
    if size <= from + 1 {
        // Nothing to pair with
        spaces.clear();
        *last_glyph_count = size;
        return 0.0;
    }

    let before: f32 = buffer.advances()[from..].iter().map(|a| a.dx).sum();

    // Transforms see glyphs in visual order
    if !ltr {
        buffer.reverse(from, size - from);
    }
    let (glyph_slice, advance_slice) = buffer.transform_slices(from);
    font.apply_transforms(glyph_slice, advance_slice, features);
    if !ltr {
        buffer.reverse(from, size - from);
    }

    for space in spaces.drain(..) {
        if space.index > 0 && !space.is_space {
            buffer.set_advance_width(space.index - 1, space.before);
        }
        buffer.set_advance_width(space.index, space.at);
    }

    let after: f32 = buffer.advances()[from..].iter().map(|a| a.dx).sum();
    *last_glyph_count = size;
    after - before
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::font::test_font::TestFont;
    use crate::font::FontDescription;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn cascade(font: TestFont, description: FontDescription) -> FontCascade {
        FontCascade::new(Arc::new(font), description)
    }

    #[test]
    fn test_plain_width() {
        let font = TestFont::latin();
        let expected: f32 = "abc".chars().map(|c| font.width_of(c)).sum();
        let cascade = cascade(font, FontDescription::default());
        let text = utf16("abc");
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        assert_eq!(it.advance(text.len(), None), 3);
        assert_eq!(it.run_width_so_far() as f32, expected);
    }

    #[test]
    fn test_resume_matches_single_pass() {
        let cascade = cascade(TestFont::latin(), FontDescription::default());
        let text = utf16("hello world");
        let run = TextRun::new(&text).with_word_rounding(true);

        let mut whole = WidthIterator::new(&cascade, run, None, false);
        whole.advance(text.len(), None);

        let mut chunked = WidthIterator::new(&cascade, run, None, false);
        chunked.advance(3, None);
        chunked.advance(7, None);
        chunked.advance(text.len(), None);

        assert_eq!(whole.run_width_so_far(), chunked.run_width_so_far());
        assert_eq!(chunked.current_character(), text.len());
        assert_eq!(chunked.advance(text.len(), None), 0);
    }

    #[test]
    fn test_letter_spacing_skips_zero_width() {
        let font = TestFont::latin().with_char('\u{200B}', 0.0);
        let base = font.width_of('a') * 2.0;
        let cascade = cascade(font, FontDescription::default().with_letter_spacing(1.5));
        let text = utf16("a\u{200B}a");
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        it.advance(text.len(), None);
        assert_eq!(it.run_width_so_far() as f32, base + 3.0);
    }

    #[test]
    fn test_word_spacing_not_on_leading_space() {
        let font = TestFont::latin();
        let base: f32 = " a b".chars().map(|c| font.width_of(c)).sum();
        let cascade = cascade(font, FontDescription::default().with_word_spacing(2.0));
        let text = utf16(" a b");
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        it.advance(text.len(), None);
        // Only the second space is between words
        assert_eq!(it.run_width_so_far() as f32, base + 2.0);
    }

    #[test]
    fn test_expansion_distributed_over_spaces() {
        let font = TestFont::latin();
        let base: f32 = "a b c".chars().map(|c| font.width_of(c)).sum();
        let cascade = cascade(font, FontDescription::default());
        let text = utf16("a b c");
        let run = TextRun::new(&text).with_expansion(10.0);
        let mut glyphs = GlyphRun::new();
        let mut it = WidthIterator::new(&cascade, run, None, false);
        it.advance(text.len(), Some(&mut glyphs));
        assert!((it.run_width_so_far() as f32 - (base + 10.0)).abs() < 1e-4);
        assert_eq!(glyphs.advance_at(1).dx, cascade.primary_font().space_width() + 5.0);
    }

    #[test]
    fn test_word_rounding_snaps_word_boundaries() {
        let font = TestFont::latin().with_char('a', 5.3).with_char(' ', 4.2);
        let cascade = cascade(font, FontDescription::default());
        let text = utf16("aa a");
        let run = TextRun::new(&text).with_word_rounding(true);
        let mut glyphs = GlyphRun::new();
        let mut it = WidthIterator::new(&cascade, run, None, false);
        it.advance(2, Some(&mut glyphs));
        // "aa" is rounded up to 11 because a space follows
        assert_eq!(it.run_width_so_far(), 11.0);
        it.advance(text.len(), Some(&mut glyphs));
        // The space itself is a rounding character: round(4.2) = 4
        assert!((it.run_width_so_far() - (11.0 + 4.0 + 5.3)).abs() < 1e-4);
    }

    #[test]
    fn test_fixed_pitch_space_snaps_up() {
        fn measure(font: TestFont, word_rounding: bool) -> (f64, f32) {
            let cascade = cascade(font, FontDescription::default());
            let text = utf16("x x");
            let run = TextRun::new(&text).with_word_rounding(word_rounding);
            let mut glyphs = GlyphRun::new();
            let mut it = WidthIterator::new(&cascade, run, None, false);
            it.advance(text.len(), Some(&mut glyphs));
            (it.run_width_so_far(), glyphs.advance_at(1).dx)
        }
        let font = || TestFont::latin().with_char(' ', 4.2).with_char('x', 4.2);

        // ceil(4.2) for the space and for 'x', which is exactly space-wide
        let (width, space) = measure(font().fixed_pitch(), true);
        assert_eq!(space, 5.0);
        assert!((width - 15.0).abs() < 1e-4);

        // Proportional fonts round the space and leave 'x' alone
        let (width, space) = measure(font(), true);
        assert_eq!(space, 4.0);
        assert!((width - (5.0 + 4.0 + 4.2)).abs() < 1e-4);

        // No snapping without word rounding
        let (width, space) = measure(font().fixed_pitch(), false);
        assert_eq!(space, 4.2);
        assert!((width - 12.6).abs() < 1e-4);
    }

    #[test]
    fn test_tab_stops() {
        let font = TestFont::latin();
        let space = font.width_of(' ');
        let a = font.width_of('a');
        let cascade = cascade(font, FontDescription::default().with_tab_size(2));
        let text = utf16("a\t");
        let run = TextRun::new(&text).with_tabs(true);
        let mut it = WidthIterator::new(&cascade, run, None, false);
        it.advance(text.len(), None);
        assert_eq!(it.run_width_so_far() as f32, 2.0 * space);
        assert!(a < 2.0 * space);
    }

    #[test]
    fn test_fallback_fonts_recorded() {
        let primary = Arc::new(TestFont::latin());
        let fallback = Arc::new(TestFont::new().with_char('\u{3042}', 16.0));
        let cascade = FontCascade::new(primary, FontDescription::default()).with_fallback(fallback);
        let text = utf16("a\u{3042}b");
        let mut fallbacks = FallbackFonts::new();
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), Some(&mut fallbacks), false);
        it.advance(text.len(), None);
        assert_eq!(fallbacks.len(), 1);
    }

    #[test]
    fn test_kerning_applied_per_font_batch() {
        let font = TestFont::latin().with_kerning('A', 'V', -2.0);
        let base = font.width_of('A') + font.width_of('V');
        let description =
            FontDescription::default().with_features(TypesettingFeatures::KERNING);
        let cascade = cascade(font, description);
        let text = utf16("AV");
        let mut glyphs = GlyphRun::new();
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        it.advance(text.len(), Some(&mut glyphs));
        assert_eq!(it.run_width_so_far() as f32, base - 2.0);
        assert_eq!(glyphs.total_advance(), base - 2.0);
    }

    #[test]
    fn test_kerning_leaves_spaces_alone() {
        let font = TestFont::latin().with_kerning(' ', 'b', -1.0);
        let base = font.width_of('a') + font.width_of(' ') + font.width_of('b');
        let cascade = cascade(font, FontDescription::default().with_features(TypesettingFeatures::KERNING));
        let text = utf16("a b");
        let mut glyphs = GlyphRun::new();
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        it.advance(text.len(), Some(&mut glyphs));
        assert_eq!(glyphs.total_advance(), base);
    }

    #[test]
    fn test_glyph_bounds_tracked() {
        let cascade = cascade(TestFont::latin(), FontDescription::default());
        let text = utf16("ab");
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, true);
        it.advance(text.len(), None);
        assert_eq!(it.first_glyph_overflow(), 1.0);
        assert_eq!(it.last_glyph_overflow(), 1.0);
        assert_eq!(it.min_glyph_bounding_box_y(), -12.0);
        assert_eq!(it.max_glyph_bounding_box_y(), 3.0);
    }

    #[test]
    fn test_advance_one_character() {
        let font = TestFont::latin();
        let a = font.width_of('a');
        let cascade = cascade(font, FontDescription::default());
        let text = utf16("ab");
        let mut glyphs = GlyphRun::new();
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        assert_eq!(it.advance_one_character(&mut glyphs), Some(a));
        assert_eq!(it.current_character(), 1);
        assert!(it.advance_one_character(&mut glyphs).is_some());
        assert_eq!(it.advance_one_character(&mut glyphs), None);
    }

    #[test]
    fn test_combining_sequence_composed() {
        // Hiragana KA + voiced sound mark composes to GA
        let font = TestFont::latin().with_char('\u{304B}', 12.0).with_char('\u{304C}', 13.0);
        let cascade = cascade(font, FontDescription::default());
        let text = utf16("\u{304B}\u{3099}");
        let mut glyphs = GlyphRun::new();
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        assert_eq!(it.advance(text.len(), Some(&mut glyphs)), 2);
        assert_eq!(glyphs.len(), 1);
        assert_eq!(glyphs.cluster_at(0), 0);
        assert_eq!(glyphs.advance_at(0).dx, 13.0);
    }

    #[test]
    fn test_empty_run() {
        let cascade = cascade(TestFont::latin(), FontDescription::default());
        let text: Vec<u16> = Vec::new();
        let mut glyphs = GlyphRun::new();
        let mut it = WidthIterator::new(&cascade, TextRun::new(&text), None, false);
        assert_eq!(it.advance(0, Some(&mut glyphs)), 0);
        assert!(glyphs.is_empty());
        assert_eq!(it.run_width_so_far(), 0.0);
    }
}

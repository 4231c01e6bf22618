//! Glyph run buffer
//!
//! Ordered, append-only storage for positioned glyphs produced by shaping.
//! Entries are kept in parallel vectors so font transforms can operate on
//! contiguous glyph and advance slices.

use crate::font::{Advance, FontData, GlyphId};

/// A run of shaped glyphs
///
/// Within a left-to-right sub-run cluster indices increase; within a
/// reversed (right-to-left) sub-run they decrease. All parallel vectors
/// always have the same length.
#[derive(Debug, Clone, Default)]
pub struct GlyphRun<'f> {
    glyphs: Vec<GlyphId>,
    fonts: Vec<&'f dyn FontData>,
    advances: Vec<Advance>,
    offsets: Vec<Advance>,
    clusters: Vec<u32>,
    /// Pen offset of the first glyph when this run is a window of a longer run
    initial_advance: f32,
}

/// Borrowed view of one glyph entry
#[derive(Debug, Clone, Copy)]
pub struct GlyphEntry<'f> {
    /// Glyph ID in `font`
    pub glyph: GlyphId,
    /// Font owning the glyph
    pub font: &'f dyn FontData,
    /// Advance to the next glyph origin
    pub advance: Advance,
    /// Offset of the glyph from its pen position
    pub offset: Advance,
    /// Index of the first code unit of the glyph's cluster
    pub cluster: u32,
}

impl<'f> GlyphRun<'f> {
    /// Create an empty run
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty run with room for `capacity` glyphs
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            glyphs: Vec::with_capacity(capacity),
            fonts: Vec::with_capacity(capacity),
            advances: Vec::with_capacity(capacity),
            offsets: Vec::with_capacity(capacity),
            clusters: Vec::with_capacity(capacity),
            initial_advance: 0.0,
        }
    }

    /// Number of glyphs
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// Append a glyph
    pub fn append(&mut self, glyph: GlyphId, font: &'f dyn FontData, advance: Advance, cluster: u32) {
        self.append_with_offset(glyph, font, advance, Advance::default(), cluster);
    }

    /// Append a glyph that is drawn displaced from its pen position
    pub fn append_with_offset(
        &mut self,
        glyph: GlyphId,
        font: &'f dyn FontData,
        advance: Advance,
        offset: Advance,
        cluster: u32,
    ) {
        self.glyphs.push(glyph);
        self.fonts.push(font);
        self.advances.push(advance);
        self.offsets.push(offset);
        self.clusters.push(cluster);
    }

    /// Copy `len` entries of `other` starting at `from`
    pub fn append_range(&mut self, other: &GlyphRun<'f>, from: usize, len: usize) {
        let to = from + len;
        assert!(to <= other.len(), "glyph range {from}..{to} out of bounds for run of {}", other.len());
        self.glyphs.extend_from_slice(&other.glyphs[from..to]);
        self.fonts.extend_from_slice(&other.fonts[from..to]);
        self.advances.extend_from_slice(&other.advances[from..to]);
        self.offsets.extend_from_slice(&other.offsets[from..to]);
        self.clusters.extend_from_slice(&other.clusters[from..to]);
    }

    /// Reverse `len` entries starting at `from` in place
    pub fn reverse(&mut self, from: usize, len: usize) {
        let to = from + len;
        assert!(to <= self.len(), "glyph range {from}..{to} out of bounds for run of {}", self.len());
        self.glyphs[from..to].reverse();
        self.fonts[from..to].reverse();
        self.advances[from..to].reverse();
        self.offsets[from..to].reverse();
        self.clusters[from..to].reverse();
    }

    /// Widen the last glyph's advance by `extra_width`
    pub fn expand_last_advance(&mut self, extra_width: f32) {
        assert!(!self.is_empty(), "expand_last_advance on an empty glyph run");
        let last = self.advances.len() - 1;
        self.advances[last].dx += extra_width;
    }

    /// Glyph at `index`
    pub fn glyph_at(&self, index: usize) -> GlyphId {
        self.glyphs[index]
    }

    /// Font of the glyph at `index`
    pub fn font_at(&self, index: usize) -> &'f dyn FontData {
        self.fonts[index]
    }

    /// Advance of the glyph at `index`
    pub fn advance_at(&self, index: usize) -> Advance {
        self.advances[index]
    }

    /// Offset of the glyph at `index`
    pub fn offset_at(&self, index: usize) -> Advance {
        self.offsets[index]
    }

    /// Cluster index of the glyph at `index`
    pub fn cluster_at(&self, index: usize) -> u32 {
        self.clusters[index]
    }

    /// Overwrite the horizontal advance of the glyph at `index`
    pub fn set_advance_width(&mut self, index: usize, width: f32) {
        self.advances[index].dx = width;
    }

    /// All glyph IDs
    pub fn glyphs(&self) -> &[GlyphId] {
        &self.glyphs
    }

    /// All advances
    pub fn advances(&self) -> &[Advance] {
        &self.advances
    }

    /// All cluster indices
    pub fn clusters(&self) -> &[u32] {
        &self.clusters
    }

    /// Glyphs and advances from `from` to the end, for font transforms
    pub(crate) fn transform_slices(&mut self, from: usize) -> (&mut [GlyphId], &mut [Advance]) {
        (&mut self.glyphs[from..], &mut self.advances[from..])
    }

    /// Sum of horizontal advances
    pub fn total_advance(&self) -> f32 {
        self.advances.iter().map(|a| a.dx).sum()
    }

    /// Pen offset of the first glyph
    pub fn initial_advance(&self) -> f32 {
        self.initial_advance
    }

    pub(crate) fn set_initial_advance(&mut self, advance: f32) {
        self.initial_advance = advance;
    }

    /// Iterate over glyph entries
    pub fn iter(&self) -> impl Iterator<Item = GlyphEntry<'f>> + '_ {
        (0..self.len()).map(move |i| GlyphEntry {
            glyph: self.glyphs[i],
            font: self.fonts[i],
            advance: self.advances[i],
            offset: self.offsets[i],
            cluster: self.clusters[i],
        })
    }

    /// Iterate over glyphs with their pen x position, starting at the initial advance
    pub fn positioned(&self) -> impl Iterator<Item = (f32, GlyphEntry<'f>)> + '_ {
        let mut x = self.initial_advance;
        self.iter().map(move |entry| {
            let pos = x + entry.offset.dx;
            x += entry.advance.dx;
            (pos, entry)
        })
    }

    /// Remove all glyphs
    pub fn clear(&mut self) {
        self.glyphs.clear();
        self.fonts.clear();
        self.advances.clear();
        self.offsets.clear();
        self.clusters.clear();
        self.initial_advance = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::test_font::TestFont;

    fn run_of<'f>(font: &'f TestFont, count: u32) -> GlyphRun<'f> {
        let mut run = GlyphRun::new();
        for i in 0..count {
            run.append(GlyphId(i + 1), font, Advance::horizontal(10.0 + i as f32), i);
        }
        run
    }

    #[test]
    fn test_append_keeps_vectors_parallel() {
        let font = TestFont::latin();
        let run = run_of(&font, 3);
        assert_eq!(run.len(), 3);
        assert_eq!(run.glyphs().len(), run.advances().len());
        assert_eq!(run.advances().len(), run.clusters().len());
        assert_eq!(run.clusters(), &[0, 1, 2]);
    }

    #[test]
    fn test_reverse_sub_range() {
        let font = TestFont::latin();
        let mut run = run_of(&font, 5);
        run.reverse(1, 3);
        assert_eq!(run.clusters(), &[0, 3, 2, 1, 4]);
        assert_eq!(run.glyph_at(1), GlyphId(4));
        assert_eq!(run.advance_at(3).dx, 11.0);
    }

    #[test]
    fn test_expand_last_advance() {
        let font = TestFont::latin();
        let mut run = run_of(&font, 2);
        run.expand_last_advance(2.5);
        assert_eq!(run.advance_at(1).dx, 13.5);
        assert_eq!(run.advance_at(0).dx, 10.0);
    }

    #[test]
    #[should_panic(expected = "empty glyph run")]
    fn test_expand_last_advance_on_empty_run_panics() {
        let mut run = GlyphRun::new();
        run.expand_last_advance(1.0);
    }

    #[test]
    fn test_append_range() {
        let font = TestFont::latin();
        let source = run_of(&font, 4);
        let mut run = GlyphRun::new();
        run.append_range(&source, 1, 2);
        assert_eq!(run.clusters(), &[1, 2]);
        assert_eq!(run.total_advance(), 23.0);
    }

    #[test]
    fn test_positioned_starts_at_initial_advance() {
        let font = TestFont::latin();
        let mut run = run_of(&font, 2);
        run.set_initial_advance(5.0);
        let xs: Vec<f32> = run.positioned().map(|(x, _)| x).collect();
        assert_eq!(xs, vec![5.0, 15.0]);
    }
}

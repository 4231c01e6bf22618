//! Width Cache
//!
//! Memoizes measured widths of short runs (single words, mostly). Insertion
//! is sampled: after a miss the cache skips a growing number of runs before
//! sampling again, and a hit drops straight back to sampling every run.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::shaping::TextRun;

/// A hit pays for about three misses
const MIN_INTERVAL: i32 = -3;
/// Sampling at this interval has almost no overhead
const MAX_INTERVAL: i32 = 20;
/// Guard against pathological growth
const MAX_SIZE: usize = 500_000;

/// Longest run, in code units, that the cache accepts
pub const SMALL_STRING_CAPACITY: usize = 15;

/// Word rounding bit of [`RoundingFlags`]
const WORD_ROUNDING: u8 = 1;
/// Run rounding bit of [`RoundingFlags`]
const RUN_ROUNDING: u8 = 2;

/// Rounding modes a run was measured with; part of every key
type RoundingFlags = u8;

fn rounding_flags(run: &TextRun<'_>) -> RoundingFlags {
    let mut flags = 0;
    if run.apply_word_rounding() {
        flags |= WORD_ROUNDING;
    }
    if run.apply_run_rounding() {
        flags |= RUN_ROUNDING;
    }
    flags
}

/// Inline key for runs of 2..=15 code units with a precomputed hash
#[derive(Clone, Copy)]
struct SmallStringKey {
    chars: [u16; SMALL_STRING_CAPACITY],
    len: u8,
    flags: RoundingFlags,
    hash: u64,
}

impl SmallStringKey {
    fn new(text: &[u16], flags: RoundingFlags) -> Self {
        debug_assert!(text.len() <= SMALL_STRING_CAPACITY);
        let mut chars = [0u16; SMALL_STRING_CAPACITY];
        chars[..text.len()].copy_from_slice(text);
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        flags.hash(&mut hasher);
        Self {
            chars,
            len: text.len() as u8,
            flags,
            hash: hasher.finish(),
        }
    }

    fn as_slice(&self) -> &[u16] {
        &self.chars[..usize::from(self.len)]
    }
}

impl PartialEq for SmallStringKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.flags == other.flags && self.as_slice() == other.as_slice()
    }
}

impl Eq for SmallStringKey {}

impl Hash for SmallStringKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Width cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WidthCacheStats {
    /// Lookups that found an existing entry
    pub hits: u64,
    /// New entries inserted
    pub insertions: u64,
    /// Cacheable runs skipped by the sampling countdown
    pub skipped: u64,
    /// Wholesale clears after reaching the size cap
    pub resets: u64,
}

/// Width cache for one font group
///
/// Not thread-safe; owned by the [`FontCascade`](crate::FontCascade) that
/// measures with it.
#[derive(Debug)]
pub struct WidthCache {
    interval: i32,
    countdown: i32,
    single_char_map: HashMap<(u16, RoundingFlags), f32>,
    map: HashMap<SmallStringKey, f32>,
    stats: WidthCacheStats,
}

impl std::fmt::Debug for SmallStringKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SmallStringKey({:?})", String::from_utf16_lossy(self.as_slice()))
    }
}

impl Default for WidthCache {
    fn default() -> Self {
        Self::new()
    }
}

impl WidthCache {
    pub fn new() -> Self {
        Self {
            interval: MAX_INTERVAL,
            countdown: MAX_INTERVAL,
            single_char_map: HashMap::new(),
            map: HashMap::new(),
            stats: WidthCacheStats::default(),
        }
    }

    /// Look up `run`, reserving a slot when it is cacheable and sampled.
    ///
    /// Returns the slot for the run: on a hit it holds the cached width, on
    /// a fresh insert it holds `width` (callers pass NaN and fill it in after
    /// measuring). Returns `None` when the run is not cacheable, when the
    /// sampling countdown skips it, or when the cache was just reset.
    pub fn lookup_or_reserve(
        &mut self,
        run: &TextRun<'_>,
        width: f32,
        has_kerning_or_ligatures: bool,
        has_extra_spacing: bool,
        wants_glyph_bounds: bool,
    ) -> Option<&mut f32> {
        // Only profitable when measuring runs through font transforms
        if !has_kerning_or_ligatures {
            return None;
        }
        // Spacing makes a word's width depend on where it sits
        if has_extra_spacing {
            return None;
        }
        // Only widths are stored
        if wants_glyph_bounds {
            return None;
        }
        // Tab widths depend on the run position
        if run.allow_tabs() && run.contains_tab() {
            return None;
        }
        // Justification depends on the line the run sits in
        if run.expansion() != 0.0 {
            return None;
        }
        if run.len() > SMALL_STRING_CAPACITY || run.is_empty() {
            return None;
        }

        if self.countdown > 0 {
            self.countdown -= 1;
            self.stats.skipped += 1;
            return None;
        }

        self.add_slow_case(run.chars(), rounding_flags(run), width)
    }

    fn add_slow_case(&mut self, text: &[u16], flags: RoundingFlags, width: f32) -> Option<&mut f32> {
        let is_new_entry = if text.len() == 1 {
            !self.single_char_map.contains_key(&(text[0], flags))
        } else {
            !self.map.contains_key(&SmallStringKey::new(text, flags))
        };

        if !is_new_entry {
            // Repetition observed: sample the next few runs
            self.interval = MIN_INTERVAL;
            self.stats.hits += 1;
            return self.slot(text, flags, width);
        }

        // Miss: back off sampling
        if self.interval < MAX_INTERVAL {
            self.interval += 1;
        }
        self.countdown = self.interval;

        if self.len() + 1 > MAX_SIZE {
            tracing::debug!("width cache reached {} entries, clearing", self.len());
            self.clear();
            self.stats.resets += 1;
            return None;
        }

        self.stats.insertions += 1;
        self.slot(text, flags, width)
    }

    fn slot(&mut self, text: &[u16], flags: RoundingFlags, width: f32) -> Option<&mut f32> {
        if text.len() == 1 {
            Some(self.single_char_map.entry((text[0], flags)).or_insert(width))
        } else {
            Some(self.map.entry(SmallStringKey::new(text, flags)).or_insert(width))
        }
    }

    /// Total entries in both maps
    pub fn len(&self) -> usize {
        self.single_char_map.len() + self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current sampling interval
    pub fn interval(&self) -> i32 {
        self.interval
    }

    pub fn stats(&self) -> WidthCacheStats {
        self.stats
    }

    /// Drop every entry; sampling state is kept
    pub fn clear(&mut self) {
        self.single_char_map.clear();
        self.map.clear();
    }
}

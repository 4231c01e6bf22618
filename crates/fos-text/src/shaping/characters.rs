//! Character classification used by width iteration

use crate::font::CodePath;

use super::TextDirection;

pub const NO_BREAK_SPACE: char = '\u{A0}';

/// Decode the code point starting at `index`, returning it and its length in
/// code units. Unpaired surrogates decode to U+FFFD with length 1.
pub fn decode_at(chars: &[u16], index: usize) -> (char, usize) {
    let unit = chars[index];
    if (0xD800..0xDC00).contains(&unit) {
        if let Some(&low) = chars.get(index + 1) {
            if (0xDC00..0xE000).contains(&low) {
                let c = 0x10000 + ((u32::from(unit) - 0xD800) << 10) + (u32::from(low) - 0xDC00);
                return (char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER), 2);
            }
        }
        return (char::REPLACEMENT_CHARACTER, 1);
    }
    (char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER), 1)
}

/// Characters that separate words for spacing and justification
pub fn treat_as_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | NO_BREAK_SPACE)
}

/// Characters forced to integer widths when word rounding is on
pub fn is_rounding_hack_character(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '-' | '?' | NO_BREAK_SPACE)
}

/// Unicode combining marks (Mn, Mc, Me)
pub fn is_combining_mark(c: char) -> bool {
    unicode_normalization::char::is_combining_mark(c)
}

pub fn is_cjk_ideograph(c: char) -> bool {
    let c = c as u32;
    matches!(c,
        0x2E80..=0x2FDF |   // CJK radicals, Kangxi radicals
        0x2FF0..=0x2FFF |   // Ideographic description characters
        0x3005..=0x3007 |
        0x3021..=0x3029 |
        0x3038..=0x303B |
        0x3400..=0x4DBF |   // Extension A
        0x4E00..=0x9FFF |   // Unified ideographs
        0xF900..=0xFAFF |   // Compatibility ideographs
        0x20000..=0x2A6DF | // Extension B
        0x2A700..=0x2B81F |
        0x2F800..=0x2FA1F)
}

/// Ideographs plus the punctuation and kana that justify like ideographs
pub fn is_cjk_ideograph_or_symbol(c: char) -> bool {
    if is_cjk_ideograph(c) {
        return true;
    }
    let c = c as u32;
    matches!(c,
        0x2C7 | 0x2CA | 0x2CB | 0x2D9 |
        0x2020 | 0x2021 | 0x2030 | 0x203B | 0x203C |
        0x2042 | 0x2047..=0x2049 | 0x2051 |
        0x20DD | 0x20DE | 0x2100 | 0x2103 | 0x2105 |
        0x2109 | 0x210A | 0x2113 | 0x2116 | 0x2121 |
        0x212B | 0x213B | 0x2150..=0x2152 |
        0x2160..=0x217F |
        0x2460..=0x24FF |
        0x3000..=0x303F |   // CJK symbols and punctuation
        0x3040..=0x30FF |   // Hiragana, Katakana
        0x3100..=0x312F |   // Bopomofo
        0x3190..=0x31FF |
        0x3200..=0x33FF |   // Enclosed CJK, compatibility
        0xFE30..=0xFE4F |
        0xFF00..=0xFFEF |   // Halfwidth and fullwidth forms
        0x1F200..=0x1F6FF)
}

/// Number of justification opportunities in `chars`, scanning in visual
/// order for `direction`. `is_after_expansion` carries whether the scan
/// position follows an opportunity and is updated to the end state.
pub fn expansion_opportunity_count(
    chars: &[u16],
    direction: TextDirection,
    is_after_expansion: &mut bool,
    expand_around_ideographs: bool,
) -> u32 {
    let mut count = 0;
    let mut visit = |c: char, count: &mut u32| {
        if treat_as_space(c) {
            *count += 1;
            *is_after_expansion = true;
            return;
        }
        if expand_around_ideographs && is_cjk_ideograph_or_symbol(c) {
            if !*is_after_expansion {
                *count += 1;
            }
            *count += 1;
            *is_after_expansion = true;
            return;
        }
        *is_after_expansion = false;
    };

    match direction {
        TextDirection::LeftToRight => {
            let mut i = 0;
            while i < chars.len() {
                let (c, len) = decode_at(chars, i);
                visit(c, &mut count);
                i += len;
            }
        }
        TextDirection::RightToLeft => {
            let decoded: Vec<char> = char::decode_utf16(chars.iter().copied())
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect();
            for &c in decoded.iter().rev() {
                visit(c, &mut count);
            }
        }
    }
    count
}

/// Characters that need full script shaping
fn is_complex_character(c: u32) -> bool {
    matches!(c,
        0x02E5..=0x02E9 |   // Modifier tone letters
        0x0300..=0x036F |   // Combining diacritical marks
        0x0591..=0x05BD |   // Hebrew points
        0x05BF..=0x05CF |
        0x0600..=0x109F |   // Arabic through Myanmar
        0x1100..=0x11FF |   // Hangul Jamo
        0x135D..=0x135F |   // Ethiopic combining marks
        0x1700..=0x18AF |   // Tagalog through Mongolian
        0x1900..=0x194F |   // Limbu
        0x1980..=0x19DF |   // New Tai Lue
        0x1A00..=0x1CFF |   // Buginese through Vedic extensions
        0x1DC0..=0x1DFF |   // Combining diacritical marks supplement
        0x20D0..=0x20FF |   // Combining marks for symbols
        0x2CEF..=0x2CF1 |   // Coptic combining marks
        0x302A..=0x302F |   // Ideographic tone marks
        0xA67C..=0xA67D |
        0xA6F0..=0xA6F1 |
        0xA800..=0xABFF |   // Syloti Nagri through Meetei Mayek
        0xD7B0..=0xD7FF |   // Hangul Jamo extended B
        0xFE00..=0xFE0F |   // Variation selectors
        0xFE20..=0xFE2F |   // Combining half marks
        0x10A00..=0x10A5F | // Kharoshthi
        0x11000..=0x110CF | // Brahmi, Kaithi
        0x1D165..=0x1D1AD | // Musical symbol combining marks
        0xE0100..=0xE01EF)  // Variation selectors supplement
}

/// Simple or complex, from the characters of a run
pub fn code_path_for(chars: &[u16]) -> CodePath {
    let mut i = 0;
    while i < chars.len() {
        let unit = chars[i];
        // Fast skip below the first complex range
        if unit < 0x02E5 {
            i += 1;
            continue;
        }
        let (c, len) = decode_at(chars, i);
        if is_complex_character(c as u32) {
            return CodePath::Complex;
        }
        i += len;
    }
    CodePath::Simple
}

/// Mirrored form of paired punctuation for right-to-left runs
pub fn mirrored(c: char) -> char {
    match c {
        '(' => ')',
        ')' => '(',
        '<' => '>',
        '>' => '<',
        '[' => ']',
        ']' => '[',
        '{' => '}',
        '}' => '{',
        '«' => '»',
        '»' => '«',
        '\u{2039}' => '\u{203A}',
        '\u{203A}' => '\u{2039}',
        '\u{2045}' => '\u{2046}',
        '\u{2046}' => '\u{2045}',
        '\u{2264}' => '\u{2265}',
        '\u{2265}' => '\u{2264}',
        '\u{3008}' => '\u{3009}',
        '\u{3009}' => '\u{3008}',
        '\u{300A}' => '\u{300B}',
        '\u{300B}' => '\u{300A}',
        '\u{300C}' => '\u{300D}',
        '\u{300D}' => '\u{300C}',
        '\u{3010}' => '\u{3011}',
        '\u{3011}' => '\u{3010}',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn test_decode_surrogate_pair() {
        let text = utf16("a\u{1F600}b");
        assert_eq!(decode_at(&text, 0), ('a', 1));
        assert_eq!(decode_at(&text, 1), ('\u{1F600}', 2));
        assert_eq!(decode_at(&text, 3), ('b', 1));
    }

    #[test]
    fn test_decode_unpaired_surrogate() {
        let text = [0xD800u16, 0x0041];
        assert_eq!(decode_at(&text, 0), (char::REPLACEMENT_CHARACTER, 1));
    }

    #[test]
    fn test_rounding_hack_table() {
        for c in [' ', '\t', '\n', '-', '?', NO_BREAK_SPACE] {
            assert!(is_rounding_hack_character(c), "{c:?}");
        }
        assert!(!is_rounding_hack_character('a'));
        assert!(!is_rounding_hack_character('.'));
    }

    #[test]
    fn test_expansion_opportunities() {
        let text = utf16("a b c");
        let mut after = false;
        assert_eq!(expansion_opportunity_count(&text, TextDirection::LeftToRight, &mut after, false), 2);
        assert!(!after);

        let text = utf16("ab ");
        let mut after = false;
        assert_eq!(expansion_opportunity_count(&text, TextDirection::LeftToRight, &mut after, false), 1);
        assert!(after);
    }

    #[test]
    fn test_expansion_around_ideographs() {
        let text = utf16("\u{4E00}\u{4E8C}");
        let mut after = false;
        // Before and after the first ideograph, after the second
        assert_eq!(expansion_opportunity_count(&text, TextDirection::LeftToRight, &mut after, true), 3);
        let mut after = false;
        assert_eq!(expansion_opportunity_count(&text, TextDirection::LeftToRight, &mut after, false), 0);
    }

    #[test]
    fn test_code_path() {
        assert_eq!(code_path_for(&utf16("hello world")), CodePath::Simple);
        assert_eq!(code_path_for(&utf16("caf\u{0065}\u{0301}")), CodePath::Complex);
        assert_eq!(code_path_for(&utf16("\u{0645}\u{0631}")), CodePath::Complex);
        assert_eq!(code_path_for(&utf16("\u{4E00}")), CodePath::Simple);
    }

    #[test]
    fn test_mirrored() {
        assert_eq!(mirrored('('), ')');
        assert_eq!(mirrored('a'), 'a');
    }
}

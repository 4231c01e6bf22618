//! Text run

/// Inline base direction of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl From<TextDirection> for rustybuzz::Direction {
    fn from(d: TextDirection) -> Self {
        match d {
            TextDirection::LeftToRight => rustybuzz::Direction::LeftToRight,
            TextDirection::RightToLeft => rustybuzz::Direction::RightToLeft,
        }
    }
}

/// An immutable run of UTF-16 code units plus the layout flags that affect
/// how it is measured. The shaping engine never mutates a run.
#[derive(Debug, Clone, Copy)]
pub struct TextRun<'a> {
    chars: &'a [u16],
    direction: TextDirection,
    /// Pixels to distribute across justification opportunities
    expansion: f32,
    allows_leading_expansion: bool,
    allows_trailing_expansion: bool,
    allow_tabs: bool,
    /// Position of the run on the line, for tab stops
    x_pos: f32,
    apply_word_rounding: bool,
    apply_run_rounding: bool,
    spacing_disabled: bool,
    character_scan_for_code_path: bool,
}

impl<'a> TextRun<'a> {
    /// Left-to-right run with no expansion, tabs or rounding
    pub fn new(chars: &'a [u16]) -> Self {
        Self {
            chars,
            direction: TextDirection::LeftToRight,
            expansion: 0.0,
            allows_leading_expansion: false,
            allows_trailing_expansion: true,
            allow_tabs: false,
            x_pos: 0.0,
            apply_word_rounding: false,
            apply_run_rounding: false,
            spacing_disabled: false,
            character_scan_for_code_path: true,
        }
    }

    pub fn with_direction(mut self, direction: TextDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_expansion(mut self, expansion: f32) -> Self {
        self.expansion = expansion;
        self
    }

    pub fn with_leading_expansion(mut self, allowed: bool) -> Self {
        self.allows_leading_expansion = allowed;
        self
    }

    pub fn with_trailing_expansion(mut self, allowed: bool) -> Self {
        self.allows_trailing_expansion = allowed;
        self
    }

    pub fn with_tabs(mut self, allowed: bool) -> Self {
        self.allow_tabs = allowed;
        self
    }

    pub fn with_x_pos(mut self, x_pos: f32) -> Self {
        self.x_pos = x_pos;
        self
    }

    /// Snap word boundaries to integer pixels
    pub fn with_word_rounding(mut self, enabled: bool) -> Self {
        self.apply_word_rounding = enabled;
        self
    }

    /// Snap the end of the run to an integer pixel
    pub fn with_run_rounding(mut self, enabled: bool) -> Self {
        self.apply_run_rounding = enabled;
        self
    }

    pub fn with_spacing_disabled(mut self, disabled: bool) -> Self {
        self.spacing_disabled = disabled;
        self
    }

    /// When false the run is always measured on the simple path
    pub fn with_code_path_scan(mut self, enabled: bool) -> Self {
        self.character_scan_for_code_path = enabled;
        self
    }

    pub fn chars(&self) -> &'a [u16] {
        self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn direction(&self) -> TextDirection {
        self.direction
    }

    pub fn is_rtl(&self) -> bool {
        self.direction == TextDirection::RightToLeft
    }

    pub fn is_ltr(&self) -> bool {
        !self.is_rtl()
    }

    pub fn expansion(&self) -> f32 {
        self.expansion
    }

    pub fn allows_leading_expansion(&self) -> bool {
        self.allows_leading_expansion
    }

    pub fn allows_trailing_expansion(&self) -> bool {
        self.allows_trailing_expansion
    }

    pub fn allow_tabs(&self) -> bool {
        self.allow_tabs
    }

    pub fn x_pos(&self) -> f32 {
        self.x_pos
    }

    pub fn apply_word_rounding(&self) -> bool {
        self.apply_word_rounding
    }

    pub fn apply_run_rounding(&self) -> bool {
        self.apply_run_rounding
    }

    pub fn spacing_disabled(&self) -> bool {
        self.spacing_disabled
    }

    pub fn character_scan_for_code_path(&self) -> bool {
        self.character_scan_for_code_path
    }

    /// True if any code unit is a tab
    pub fn contains_tab(&self) -> bool {
        self.chars.contains(&u16::from(b'\t'))
    }
}

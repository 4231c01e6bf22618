//! Text shaping module
//!
//! Runs take the simple path ([`WidthIterator`]) unless they contain
//! characters that need script shaping, in which case they go through a
//! [`ComplexShaper`].

pub(crate) mod characters;
mod complex;
mod run;
mod shaper;
mod width_iterator;

pub use characters::{code_path_for, expansion_opportunity_count};
pub use complex::{ComplexShaper, ComplexTextController, ShapedGlyph};
pub use run::{TextDirection, TextRun};
pub use shaper::RustybuzzShaper;
pub use width_iterator::WidthIterator;

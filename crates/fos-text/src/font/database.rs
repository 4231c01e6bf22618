//! Font database for loading fonts and building cascades

use std::sync::Arc;

use fontdb::{Database, Source};

use super::{FontCascade, FontData, FontDescription, FontStyle, FontWeight, TtfFont};
use crate::{Result, TextError};

/// Font query for matching
#[derive(Debug, Clone)]
pub struct FontQuery {
    /// Font families to try (in order)
    pub families: Vec<String>,
    pub weight: FontWeight,
    pub style: FontStyle,
}

impl FontQuery {
    pub fn new(families: &[&str]) -> Self {
        Self {
            families: families.iter().map(|s| s.to_string()).collect(),
            weight: FontWeight::NORMAL,
            style: FontStyle::Normal,
        }
    }

    pub fn weight(mut self, weight: FontWeight) -> Self {
        self.weight = weight;
        self
    }

    pub fn style(mut self, style: FontStyle) -> Self {
        self.style = style;
        self
    }

    pub fn bold(self) -> Self {
        self.weight(FontWeight::BOLD)
    }

    pub fn italic(self) -> Self {
        self.style(FontStyle::Italic)
    }
}

impl Default for FontQuery {
    fn default() -> Self {
        Self::new(&["sans-serif"])
    }
}

/// Map CSS generic names to fontdb families
fn family(name: &str) -> fontdb::Family<'_> {
    match name {
        "serif" => fontdb::Family::Serif,
        "sans-serif" => fontdb::Family::SansSerif,
        "monospace" => fontdb::Family::Monospace,
        "cursive" => fontdb::Family::Cursive,
        "fantasy" => fontdb::Family::Fantasy,
        other => fontdb::Family::Name(other),
    }
}

/// Font database for loading and matching fonts
pub struct FontDatabase {
    db: Database,
}

impl FontDatabase {
    /// Create a new empty font database
    pub fn new() -> Self {
        Self { db: Database::new() }
    }

    /// Create a font database with system fonts loaded
    #[cfg(feature = "system-fonts")]
    pub fn with_system_fonts() -> Self {
        let mut db = Database::new();
        db.load_system_fonts();
        tracing::debug!("loaded {} system font faces", db.len());
        Self { db }
    }

    /// Load a font from file
    pub fn load_font_file(&mut self, path: &std::path::Path) -> Result<()> {
        self.db.load_font_file(path).map_err(|e| TextError::FontParsing(e.to_string()))
    }

    /// Load a font from memory
    pub fn load_font_data(&mut self, data: Vec<u8>) {
        self.db.load_font_source(Source::Binary(Arc::new(data)));
    }

    /// First face matching the query
    pub fn query(&self, query: &FontQuery) -> Option<fontdb::ID> {
        let families: Vec<fontdb::Family<'_>> = query.families.iter().map(|f| family(f)).collect();
        self.db.query(&fontdb::Query {
            families: &families,
            weight: fontdb::Weight(query.weight.0),
            stretch: fontdb::Stretch::Normal,
            style: query.style.into(),
        })
    }

    /// Load a matched face at `size` pixels
    pub fn load(&self, id: fontdb::ID, size: f32) -> Result<TtfFont> {
        self.db
            .with_face_data(id, |data, index| TtfFont::from_data(Arc::new(data.to_vec()), index, size))
            .ok_or_else(|| TextError::FontNotFound("Font not found in database".into()))?
    }

    /// Build a cascade from a primary query and fallback queries. Queries
    /// that match nothing are skipped; the primary must match.
    pub fn cascade(
        &self,
        primary: &FontQuery,
        fallbacks: &[FontQuery],
        description: FontDescription,
    ) -> Result<FontCascade> {
        let id = self
            .query(primary)
            .ok_or_else(|| TextError::FontNotFound(primary.families.join(", ")))?;
        let size = description.size;
        let primary_font: Arc<dyn FontData> = Arc::new(self.load(id, size)?);
        let mut cascade = FontCascade::new(primary_font, description);

        for query in fallbacks {
            let Some(id) = self.query(query) else {
                tracing::debug!("no face for fallback {:?}", query.families);
                continue;
            };
            cascade = cascade.with_fallback(Arc::new(self.load(id, size)?));
        }
        Ok(cascade)
    }

    /// Number of loaded fonts
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// Check if database is empty
    pub fn is_empty(&self) -> bool {
        self.db.len() == 0
    }
}

impl Default for FontDatabase {
    fn default() -> Self {
        Self::new()
    }
}

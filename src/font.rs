use owned_ttf_parser::{AsFaceRef as _, Face, OwnedFace};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use unicode_normalization::UnicodeNormalization as _;

use crate::error::ContextError;

/// The (insofar) relevant vertical metrics of a font.
#[derive(Clone, Copy, Debug, Default)]
pub struct FontMetrics {
    /// The ascent of the font.
    pub ascent: i16,
    /// The descent of the font.
    pub descent: i16,
    /// The number of units per em of the font.
    pub units_per_em: u16,
}

/// The (insofar) relevant metrics associated to a single glyph of a font.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlyphMetrics {
    /// The width of the glyph.
    pub width: u32,
    /// The height of the glyph.
    pub height: u32,
}

/// A font face loaded from a TTF font, together with its measure of units per em.
#[derive(Clone, Debug)]
pub(crate) struct TtfFontFace {
    /// The underlying font face which is represented through the `ttf_parser` crate.
    inner: std::sync::Arc<OwnedFace>,
    /// The number of units per em of the font face.
    units_per_em: u16,
}

impl TtfFontFace {
    /// Retrieve the font metrics from the associated font face.
    pub(crate) fn font_metrics(&self) -> FontMetrics {
        FontMetrics {
            ascent: self.face().ascender(),
            descent: self.face().descender(),
            units_per_em: self.units_per_em,
        }
    }

    /// Retrieve the glyph ID of a specific codepoint, which in our case is just a `char`.
    pub(crate) fn glyph_id(&self, codepoint: char) -> Option<u16> {
        self.face()
            .glyph_index(codepoint)
            .map(|glyph_id| glyph_id.0)
    }

    /// Retrieve the mapping between the glyph IDs and the characters (codepoints), that specifically
    /// contains exactly the number of unicode glyphs present in the font.
    pub(crate) fn glyph_ids(&self) -> HashMap<u16, char> {
        // Retrieve all the unicode subtables of the font face
        let font_subtables = self.face().tables().cmap.map(|cmap| {
            cmap.subtables
                .into_iter()
                .filter(|font_subtable| font_subtable.is_unicode())
        });
        // If no suitable subtables have been found, then return an empty association between
        // glyph IDs and characters
        let Some(font_subtables) = font_subtables else {
            return HashMap::new();
        };

        // Once the subtables have been fetched, creates an association between the glyph IDs
        // and the characters (codepoints) that contains the number of glyphs of the font face
        let mut gid_to_codepoint_map =
            HashMap::with_capacity(self.face().number_of_glyphs().into());
        for font_subtable in font_subtables {
            font_subtable.codepoints(|codepoint| {
                use std::convert::TryFrom as _;

                if let Ok(character) = char::try_from(codepoint) {
                    // For each character in each subtable, if it is a valid UTF-8 codepoint, then
                    // retrieve its glyph index only if it is positive and insert it in to the
                    // association between glyph IDs and characters
                    if let Some(glyph_index) = font_subtable
                        .glyph_index(codepoint)
                        .filter(|index| index.0 > 0)
                    {
                        gid_to_codepoint_map
                            .entry(glyph_index.0)
                            .or_insert(character);
                    }
                }
            })
        }

        gid_to_codepoint_map
    }

    /// Retrieve the total number of glyphs present in the font face.
    pub(crate) fn glyph_count(&self) -> u16 {
        self.face().number_of_glyphs()
    }

    /// Attempt to calculate the metrics of a glyph from the associated glyph ID, taken as input.
    pub(crate) fn glyph_metrics(&self, glyph_id: u16) -> Option<GlyphMetrics> {
        // Wrap an integer into a `GlyphId` for enabling the associated traits
        let glyph_id = owned_ttf_parser::GlyphId(glyph_id);

        if let Some(width) = self.face().glyph_hor_advance(glyph_id) {
            let width = width as u32;
            // The height of the glyph is corrected by employing the descender vertical metric
            // of the font face (this is supposedly valid only for horizontally-laid fonts).
            let height = self
                .face()
                .glyph_bounding_box(glyph_id)
                .map(|bounding_box| {
                    bounding_box.y_max - bounding_box.y_min - self.face().descender()
                })
                .unwrap_or(1000) as u32;

            Some(GlyphMetrics { width, height })
        } else {
            // If it cannot find the horizontal glyph advance, return accordingly nothing
            None
        }
    }

    /// Constructs a font face from the underlying raw data extracted from the TTF font file.
    pub(crate) fn from_bytes(data: &[u8]) -> Result<Self, ContextError> {
        let face = OwnedFace::from_vec(data.to_vec(), 0)
            .map_err(|error| ContextError::with_error("Failed to parse font", &error))?;
        let units_per_em = face.as_face_ref().units_per_em();

        Ok(Self {
            inner: std::sync::Arc::new(face),
            units_per_em,
        })
    }

    /// Retrieve the underlying font face as a reference.
    fn face(&self) -> &Face<'_> {
        self.inner.as_face_ref()
    }
}

/// A unicode-capable font loaded from a TTF file, together with the byte data it was
/// loaded from and the identifier it is registered under inside the PDF document.
#[derive(Debug, Clone)]
pub struct EmbeddedFont {
    /// The byte data the font was loaded from.
    pub(crate) bytes: Vec<u8>,
    /// The actual font face, together with its measure of units per em.
    pub(crate) ttf_face: TtfFontFace,
    /// The identifier of the font face.
    pub(crate) face_identifier: String,
}

impl EmbeddedFont {
    /// Loads the font from the given TTF/OTF file path.
    pub fn from_path(font_path: &Path) -> Result<Self, ContextError> {
        let font_bytes = std::fs::read(font_path).map_err(|error| {
            ContextError::with_error(
                format!("Failed to read the font file {:?}", font_path),
                &error,
            )
        })?;
        let ttf_face = TtfFontFace::from_bytes(&font_bytes)?;

        Ok(EmbeddedFont {
            bytes: font_bytes,
            ttf_face,
            face_identifier: "F0".into(),
        })
    }
}

/// The base font used when no unicode-capable TTF font could be loaded from the host.
pub const BUILTIN_BASE_FONT: &str = "Helvetica";

/// The widths of the printable ASCII characters (codepoints 32 through 126) of the built-in
/// Helvetica base font, expressed in 1/1000 em as listed in the Adobe font metrics.
const BUILTIN_CHARACTER_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722, 722,
    667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944,
    667, 667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222,
    500, 222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334,
    584,
];

/// The width assigned to a character the built-in base font has no specific metric for.
const BUILTIN_DEFAULT_WIDTH: u16 = 556;

/// The font a document is rendered with. Loading walks a chain of candidate TTF paths and
/// embeds the first face that parses; when none of them does, the built-in Helvetica base
/// font is used instead so that a missing font asset never fails a build. Text rendered
/// through the base font is restricted to the WinAnsi byte range.
#[derive(Debug, Clone)]
pub enum DocumentFont {
    /// A TTF face embedded into the document, able to address every glyph the face carries.
    Embedded(EmbeddedFont),
    /// The built-in Helvetica base font, always available but latin-only.
    Builtin,
}

impl DocumentFont {
    /// Walks the candidate font paths and embeds the first face that loads and parses.
    /// Candidates that fail are logged and skipped, an empty or exhausted chain silently
    /// selects the built-in base font.
    pub fn resolve(candidate_paths: &[PathBuf]) -> DocumentFont {
        for candidate_path in candidate_paths {
            match EmbeddedFont::from_path(candidate_path) {
                Ok(font) => {
                    log::info!("Embedding the font {:?}", candidate_path);
                    return DocumentFont::Embedded(font);
                }
                Err(error) => {
                    log::debug!("Skipping the font candidate {:?}: {}", candidate_path, error);
                }
            }
        }
        log::info!(
            "No unicode font could be loaded, falling back to the built-in {} base font",
            BUILTIN_BASE_FONT
        );

        DocumentFont::Builtin
    }

    /// Measures the horizontal advance of the text at the given font size. Characters the
    /// selected font cannot represent contribute the same width the renderer will give them,
    /// so that centering stays consistent with the drawn output.
    pub fn text_width(&self, text: &str, font_size: f32) -> f32 {
        match self {
            DocumentFont::Embedded(font) => {
                let units_per_em = font.ttf_face.font_metrics().units_per_em as f32;
                let mut advance_in_font_units = 0u32;
                for character in text.nfc() {
                    // Characters without a glyph are skipped here just like the renderer
                    // skips them when emitting the glyph IDs
                    if let Some(glyph_id) = font.ttf_face.glyph_id(character) {
                        if let Some(glyph_metrics) = font.ttf_face.glyph_metrics(glyph_id) {
                            advance_in_font_units += glyph_metrics.width;
                        }
                    }
                }

                advance_in_font_units as f32 * font_size / units_per_em
            }
            DocumentFont::Builtin => {
                let advance_in_millis: u32 = text
                    .nfc()
                    .map(|character| {
                        let codepoint = character as u32;
                        match codepoint {
                            32..=126 => BUILTIN_CHARACTER_WIDTHS[(codepoint - 32) as usize] as u32,
                            _ => BUILTIN_DEFAULT_WIDTH as u32,
                        }
                    })
                    .sum();

                advance_in_millis as f32 * font_size / 1000.0
            }
        }
    }

    /// Whether a TTF face was embedded or the built-in base font is in use.
    pub fn is_embedded(&self) -> bool {
        matches!(self, DocumentFont::Embedded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_font_measures_ascii_text() {
        let font = DocumentFont::Builtin;
        // "HI" at 12pt: (722 + 278) / 1000 * 12
        let width = font.text_width("HI", 12.0);
        assert!((width - 12.0).abs() < 1e-4, "unexpected width {}", width);
    }

    #[test]
    fn builtin_font_assigns_default_width_to_unknown_characters() {
        let font = DocumentFont::Builtin;
        let width = font.text_width("я", 10.0);
        assert!((width - 5.56).abs() < 1e-4, "unexpected width {}", width);
    }

    #[test]
    fn resolving_an_exhausted_chain_falls_back_to_the_builtin_font() {
        let font = DocumentFont::resolve(&[PathBuf::from("definitely/not/a/font.ttf")]);
        assert!(!font.is_embedded());
    }
}

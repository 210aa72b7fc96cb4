// this_file: crates/sabre-core/src/font.rs

//! Font access: the `Face` abstraction, the skrifa-backed production
//! implementation, and font selection through a provider.
//!
//! Font discovery and file loading are collaborator concerns: the
//! renderer only asks a [`FontProvider`] for a face matching a family
//! and attributes, and talks to the result through [`Face`].

use std::fmt;
use std::sync::Arc;

use skrifa::instance::{LocationRef, Size};
use skrifa::outline::{DrawSettings, OutlinePen};
use skrifa::{GlyphId, MetadataProvider};

use sabre_raster::geom::Vector;
use sabre_raster::{Outline, OutlineBuilder};

/// Key identifying a selected font.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontDesc {
    pub family: String,
    pub bold: bool,
    pub italic: bool,
}

/// Glyph outline plus horizontal advance, both in 26.6 units, y-down.
#[derive(Debug, Clone)]
pub struct FaceGlyph {
    pub outline: Outline,
    pub advance: i32,
}

/// One glyph out of a complex-shaped run. Coordinates in 26.6 units;
/// `cluster` is a byte index into the run text.
#[derive(Debug, Clone, Copy)]
pub struct RawShapedGlyph {
    pub glyph: u32,
    pub cluster: u32,
    pub x_advance: i32,
    pub y_advance: i32,
    pub x_offset: i32,
    pub y_offset: i32,
}

/// Renderer-side view of a loaded font face.
pub trait Face {
    fn family(&self) -> &str;

    /// Vertical-layout face (`@`-prefixed family in scripts).
    fn is_vertical(&self) -> bool {
        false
    }

    fn glyph_index(&self, ch: char) -> Option<u32>;

    /// Load a glyph outline at `size` pixels per em.
    fn glyph_outline(&self, glyph: u32, size: f64) -> Option<FaceGlyph>;

    /// `(ascender, descender)` at `size`, both positive, in 26.6 units.
    fn metrics(&self, size: f64) -> (i32, i32);

    /// Underline `(offset, thickness)` in y-down 26.6 units.
    fn underline_metrics(&self, size: f64) -> Option<(i32, i32)> {
        let (asc, _) = self.metrics(size);
        Some((asc / 10, (asc / 14).max(32)))
    }

    fn strikeout_metrics(&self, size: f64) -> Option<(i32, i32)> {
        let (asc, _) = self.metrics(size);
        Some((-asc / 3, (asc / 14).max(32)))
    }

    /// Complex-shape a run of text; `None` means the face cannot shape
    /// and the caller falls back to character mapping.
    fn shape_run(&self, _text: &str, _size: f64, _rtl: bool) -> Option<Vec<RawShapedGlyph>> {
        None
    }
}

impl fmt::Debug for dyn Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Face({})", self.family())
    }
}

/// Pointer-identity wrapper so faces can participate in cache keys and
/// style-run comparisons.
#[derive(Clone)]
pub struct FaceRef(pub Arc<dyn Face>);

impl FaceRef {
    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for FaceRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for FaceRef {}

impl std::hash::Hash for FaceRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for FaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaceRef({})", self.0.family())
    }
}

/// Pen adapter: skrifa outlines (pixels, y-up) into the 26.6 y-down
/// outline container.
struct RecordingPen {
    builder: OutlineBuilder,
}

impl RecordingPen {
    fn point(x: f32, y: f32) -> Vector {
        Vector::new((x * 64.0).round() as i32, (-y * 64.0).round() as i32)
    }
}

impl OutlinePen for RecordingPen {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(Self::point(x, y));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(Self::point(x, y));
    }

    fn quad_to(&mut self, cx0: f32, cy0: f32, x: f32, y: f32) {
        self.builder.quad_to(Self::point(cx0, cy0), Self::point(x, y));
    }

    fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
        self.builder.curve_to(
            Self::point(cx0, cy0),
            Self::point(cx1, cy1),
            Self::point(x, y),
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

/// Production face backed by skrifa for metrics/outlines and rustybuzz
/// for the complex-shaping hook.
pub struct SkrifaFace {
    data: Arc<Vec<u8>>,
    family: String,
    vertical: bool,
}

impl SkrifaFace {
    /// Validate the font bytes and wrap them. Vertical layout is flagged
    /// by the `@` family prefix, script convention.
    pub fn new(family: &str, data: Arc<Vec<u8>>) -> Option<Self> {
        skrifa::FontRef::new(&data).ok()?;
        let vertical = family.starts_with('@');
        Some(Self {
            data,
            family: family.trim_start_matches('@').to_string(),
            vertical,
        })
    }

    fn font(&self) -> Option<skrifa::FontRef<'_>> {
        skrifa::FontRef::new(&self.data).ok()
    }
}

impl Face for SkrifaFace {
    fn family(&self) -> &str {
        &self.family
    }

    fn is_vertical(&self) -> bool {
        self.vertical
    }

    fn glyph_index(&self, ch: char) -> Option<u32> {
        Some(self.font()?.charmap().map(ch)?.to_u32())
    }

    fn glyph_outline(&self, glyph: u32, size: f64) -> Option<FaceGlyph> {
        let font = self.font()?;
        let gid = GlyphId::new(glyph);
        let size = Size::new(size as f32);
        let location = LocationRef::default();

        let outline_glyph = font.outline_glyphs().get(gid)?;
        let mut pen = RecordingPen {
            builder: OutlineBuilder::new(),
        };
        outline_glyph
            .draw(DrawSettings::unhinted(size, location), &mut pen)
            .ok()?;

        let advance = font
            .glyph_metrics(size, location)
            .advance_width(gid)
            .unwrap_or(0.0);
        Some(FaceGlyph {
            outline: pen.builder.finish(),
            advance: (advance * 64.0).round() as i32,
        })
    }

    fn metrics(&self, size: f64) -> (i32, i32) {
        let Some(font) = self.font() else {
            return (0, 0);
        };
        let m = font.metrics(Size::new(size as f32), LocationRef::default());
        let asc = (m.ascent * 64.0).round() as i32;
        let desc = (-m.descent * 64.0).round() as i32;
        (asc.max(0), desc.max(0))
    }

    fn underline_metrics(&self, size: f64) -> Option<(i32, i32)> {
        let font = self.font()?;
        let m = font.metrics(Size::new(size as f32), LocationRef::default());
        let deco = m.underline?;
        Some((
            (-deco.offset * 64.0).round() as i32,
            (deco.thickness * 64.0).round().max(32.0) as i32,
        ))
    }

    fn strikeout_metrics(&self, size: f64) -> Option<(i32, i32)> {
        let font = self.font()?;
        let m = font.metrics(Size::new(size as f32), LocationRef::default());
        let deco = m.strikeout?;
        Some((
            (-deco.offset * 64.0).round() as i32,
            (deco.thickness * 64.0).round().max(32.0) as i32,
        ))
    }

    fn shape_run(&self, text: &str, size: f64, rtl: bool) -> Option<Vec<RawShapedGlyph>> {
        let face = rustybuzz::Face::from_slice(&self.data, 0)?;
        let upem = face.units_per_em() as f64;
        let scale = size * 64.0 / upem;

        let mut buffer = rustybuzz::UnicodeBuffer::new();
        buffer.push_str(text);
        buffer.set_direction(if rtl {
            rustybuzz::Direction::RightToLeft
        } else {
            rustybuzz::Direction::LeftToRight
        });
        let shaped = rustybuzz::shape(&face, &[], buffer);

        let out = shaped
            .glyph_infos()
            .iter()
            .zip(shaped.glyph_positions())
            .map(|(info, pos)| RawShapedGlyph {
                glyph: info.glyph_id,
                cluster: info.cluster,
                x_advance: (pos.x_advance as f64 * scale).round() as i32,
                y_advance: (pos.y_advance as f64 * scale).round() as i32,
                x_offset: (pos.x_offset as f64 * scale).round() as i32,
                y_offset: (-pos.y_offset as f64 * scale).round() as i32,
            })
            .collect();
        Some(out)
    }
}

/// Resolves (family, bold, italic) requests to faces.
pub trait FontProvider {
    fn select(&self, family: &str, bold: bool, italic: bool) -> Option<Arc<dyn Face>>;
}

struct RegisteredFont {
    family: String,
    bold: bool,
    italic: bool,
    face: Arc<dyn Face>,
}

/// In-memory font store: fonts registered as raw bytes, matched by
/// family name (case-insensitive) with a nearest-attribute tie break.
#[derive(Default)]
pub struct MemoryFontProvider {
    fonts: Vec<RegisteredFont>,
}

impl MemoryFontProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_font_bytes(&mut self, family: &str, bold: bool, italic: bool, data: Vec<u8>) -> bool {
        match SkrifaFace::new(family, Arc::new(data)) {
            Some(face) => {
                self.add_face(family, bold, italic, Arc::new(face));
                true
            }
            None => {
                log::warn!("rejecting unparsable font for family {family:?}");
                false
            }
        }
    }

    /// Register a pre-built face (synthetic faces included).
    pub fn add_face(&mut self, family: &str, bold: bool, italic: bool, face: Arc<dyn Face>) {
        self.fonts.push(RegisteredFont {
            family: family.trim_start_matches('@').to_string(),
            bold,
            italic,
            face,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }
}

impl FontProvider for MemoryFontProvider {
    fn select(&self, family: &str, bold: bool, italic: bool) -> Option<Arc<dyn Face>> {
        let family = family.trim_start_matches('@');
        let mut best: Option<(&RegisteredFont, u32)> = None;
        for font in &self.fonts {
            if !font.family.eq_ignore_ascii_case(family) {
                continue;
            }
            let score = (font.bold != bold) as u32 + (font.italic != italic) as u32;
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((font, score));
            }
        }
        best.map(|(f, _)| f.face.clone())
    }
}

/// Shared handle owning the font store; renderers hold an `Arc` to it.
pub struct Library {
    provider: Box<dyn FontProvider>,
}

impl Library {
    pub fn new() -> Self {
        Self {
            provider: Box::new(MemoryFontProvider::new()),
        }
    }

    pub fn with_provider(provider: Box<dyn FontProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &dyn FontProvider {
        self.provider.as_ref()
    }

    /// Select a face, falling back to the default family.
    pub fn select(
        &self,
        family: &str,
        bold: bool,
        italic: bool,
        default_family: Option<&str>,
    ) -> Option<Arc<dyn Face>> {
        self.provider
            .select(family, bold, italic)
            .or_else(|| default_family.and_then(|f| self.provider.select(f, bold, italic)))
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic face where every glyph is a solid square sitting on the
/// baseline. Used by tests and available as a debugging stand-in; it
/// deliberately exercises the same code paths as a real face.
pub struct SquareFace {
    family: String,
    vertical: bool,
}

impl SquareFace {
    pub fn new(family: &str) -> Self {
        Self {
            family: family.trim_start_matches('@').to_string(),
            vertical: family.starts_with('@'),
        }
    }
}

impl Face for SquareFace {
    fn family(&self) -> &str {
        &self.family
    }

    fn is_vertical(&self) -> bool {
        self.vertical
    }

    fn glyph_index(&self, ch: char) -> Option<u32> {
        if ch == '\n' {
            return None;
        }
        Some(ch as u32)
    }

    fn glyph_outline(&self, glyph: u32, size: f64) -> Option<FaceGlyph> {
        let advance = (size * 0.5 * 64.0).round() as i32;
        if glyph == ' ' as u32 || glyph == '\u{a0}' as u32 {
            return Some(FaceGlyph {
                outline: Outline::new(),
                advance,
            });
        }
        // Square from the baseline up to 70% of the em, 80% advance wide.
        let h = (size * 0.7 * 64.0).round() as i32;
        let w = advance * 4 / 5;
        let mut b = OutlineBuilder::new();
        b.move_to(Vector::new(0, -h));
        b.line_to(Vector::new(w, -h));
        b.line_to(Vector::new(w, 0));
        b.line_to(Vector::new(0, 0));
        Some(FaceGlyph {
            outline: b.finish(),
            advance,
        })
    }

    fn metrics(&self, size: f64) -> (i32, i32) {
        (
            (size * 0.8 * 64.0).round() as i32,
            (size * 0.2 * 64.0).round() as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_prefers_exact_attribute_match() {
        let mut provider = MemoryFontProvider::new();
        let regular: Arc<dyn Face> = Arc::new(SquareFace::new("Body"));
        let bold: Arc<dyn Face> = Arc::new(SquareFace::new("Body"));
        provider.add_face("Body", false, false, regular.clone());
        provider.add_face("Body", true, false, bold.clone());

        let picked = provider.select("body", true, false).unwrap();
        assert!(Arc::ptr_eq(&picked, &bold));
        let picked = provider.select("BODY", false, false).unwrap();
        assert!(Arc::ptr_eq(&picked, &regular));
        assert!(provider.select("Other", false, false).is_none());
    }

    #[test]
    fn library_falls_back_to_default_family() {
        let mut provider = MemoryFontProvider::new();
        provider.add_face("Fallback", false, false, Arc::new(SquareFace::new("Fallback")));
        let library = Library::with_provider(Box::new(provider));

        assert!(library.select("Missing", false, false, None).is_none());
        assert!(library
            .select("Missing", false, false, Some("Fallback"))
            .is_some());
    }

    #[test]
    fn square_face_produces_outline_and_metrics() {
        let face = SquareFace::new("Test");
        let g = face.glyph_outline('A' as u32, 20.0).unwrap();
        assert!(!g.outline.is_empty());
        assert_eq!(g.advance, 640);
        let cbox = g.outline.cbox();
        assert!(cbox.y_min < 0 && cbox.y_max == 0);
        let (asc, desc) = face.metrics(20.0);
        assert!(asc > 0 && desc > 0);
    }

    #[test]
    fn space_has_advance_but_no_outline() {
        let face = SquareFace::new("Test");
        let g = face.glyph_outline(' ' as u32, 20.0).unwrap();
        assert!(g.outline.is_empty());
        assert!(g.advance > 0);
    }

    #[test]
    fn face_ref_identity() {
        let a: Arc<dyn Face> = Arc::new(SquareFace::new("A"));
        let b: Arc<dyn Face> = Arc::new(SquareFace::new("A"));
        assert_eq!(FaceRef(a.clone()), FaceRef(a.clone()));
        assert_ne!(FaceRef(a), FaceRef(b));
    }
}

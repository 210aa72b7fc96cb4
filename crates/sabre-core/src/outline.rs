// this_file: crates/sabre-core/src/outline.rs

//! Outline cache keys, values and construction.
//!
//! Four outline variants exist: glyphs loaded from a font face, inline
//! drawings, stroked borders derived from another cached outline, and
//! the unit box used for opaque-box backgrounds. A value carries two
//! polylines (fill, border); the cbox is their union.

use std::sync::Arc;

use sabre_raster::geom::{Rect, Vector};
use sabre_raster::outline::{unit_box, CONTOUR_END, SEGMENT_LINE};
use sabre_raster::{stroke_outline, Outline, STROKER_PRECISION};

use crate::cache::CacheValue;
use crate::drawing::parse_drawing;
use crate::font::FaceRef;
use crate::text::DecoFlags;

/// Key for a glyph outline: the face identity plus everything that
/// changes the loaded shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlyphKey {
    pub face: FaceRef,
    /// Font size after scale normalization, as raw bits.
    pub size: u64,
    pub glyph_index: u32,
    pub bold: bool,
    pub italic: bool,
    pub flags: DecoFlags,
}

/// Key for a stroked border outline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BorderKey {
    pub outline: OutlineRef,
    pub scale_ord_x: i32,
    pub scale_ord_y: i32,
    /// Border widths quantized to the stroker grid.
    pub border_x: i32,
    pub border_y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutlineKey {
    Glyph(GlyphKey),
    Drawing(Arc<str>),
    Border(BorderKey),
    Box,
}

/// Cached outline: two polylines plus the metrics the pipeline needs.
#[derive(Debug, Default)]
pub struct OutlineValue {
    pub fill: Outline,
    pub border: Outline,
    /// Horizontal advance, 26.6.
    pub advance: i32,
    /// Face ascender/descender at the keyed size, 26.6, both positive.
    pub asc: i32,
    pub desc: i32,
    /// Union bounding box over both polylines.
    pub cbox: Rect,
    pub valid: bool,
}

impl CacheValue for OutlineValue {
    fn size(&self) -> usize {
        // The outline cache is bounded by count; this is bookkeeping only.
        std::mem::size_of::<Self>()
            + (self.fill.points.len() + self.border.points.len()) * std::mem::size_of::<Vector>()
            + self.fill.segments.len()
            + self.border.segments.len()
    }
}

/// Pointer-identity handle to a cached outline, usable inside other
/// cache keys.
#[derive(Clone)]
pub struct OutlineRef(pub Arc<OutlineValue>);

impl PartialEq for OutlineRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for OutlineRef {}

impl std::hash::Hash for OutlineRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl std::fmt::Debug for OutlineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutlineRef({:p})", Arc::as_ptr(&self.0))
    }
}

/// Append an axis-aligned rectangle contour (decoration stroke).
fn add_rect(outline: &mut Outline, x0: i32, y0: i32, x1: i32, y1: i32) {
    outline.points.push(Vector::new(x0, y0));
    outline.points.push(Vector::new(x1, y0));
    outline.points.push(Vector::new(x1, y1));
    outline.points.push(Vector::new(x0, y1));
    outline.segments.extend_from_slice(&[
        SEGMENT_LINE,
        SEGMENT_LINE,
        SEGMENT_LINE,
        SEGMENT_LINE | CONTOUR_END,
    ]);
}

fn construct_glyph(k: &GlyphKey) -> OutlineValue {
    let size = f64::from_bits(k.size);
    let face = &k.face.0;
    let Some(glyph) = face.glyph_outline(k.glyph_index, size) else {
        // A missing glyph is a valid empty outline, not a failure.
        return OutlineValue {
            valid: true,
            ..OutlineValue::default()
        };
    };
    let (asc, desc) = face.metrics(size);

    let mut fill = glyph.outline;
    let mut advance = glyph.advance;

    if k.flags.contains(DecoFlags::UNDERLINE) {
        if let Some((offset, thickness)) = face.underline_metrics(size) {
            add_rect(
                &mut fill,
                0,
                offset - thickness / 2,
                advance,
                offset + thickness / 2,
            );
        }
    }
    if k.flags.contains(DecoFlags::STRIKETHROUGH) {
        if let Some((offset, thickness)) = face.strikeout_metrics(size) {
            add_rect(
                &mut fill,
                0,
                offset - thickness / 2,
                advance,
                offset + thickness / 2,
            );
        }
    }
    if k.flags.contains(DecoFlags::ROTATE) {
        // Vertical layout: rotate the glyph a quarter turn so it reads
        // top-to-bottom, keeping the pen on the baseline.
        for p in &mut fill.points {
            *p = Vector::new(desc - p.y, p.x - advance);
        }
        advance = asc + desc;
    }

    let mut v = OutlineValue {
        fill,
        border: Outline::new(),
        advance,
        asc,
        desc,
        cbox: Rect::zero(),
        valid: true,
    };
    v.cbox = v.fill.cbox();
    v
}

fn construct_drawing(text: &str) -> OutlineValue {
    let Some((outline, bbox)) = parse_drawing(text) else {
        log::warn!("cannot parse drawing");
        return OutlineValue::default();
    };
    OutlineValue {
        advance: bbox.x_max - bbox.x_min,
        asc: bbox.y_max - bbox.y_min,
        desc: 0,
        cbox: bbox,
        fill: outline,
        border: Outline::new(),
        valid: true,
    }
}

fn construct_border(k: &BorderKey) -> OutlineValue {
    let mut v = OutlineValue {
        valid: true,
        ..OutlineValue::default()
    };
    if (k.border_x == 0 && k.border_y == 0) || k.outline.0.fill.is_empty() {
        return v;
    }

    let Some(scaled) = k.outline.0.fill.scale_pow2(k.scale_ord_x, k.scale_ord_y) else {
        log::warn!("outline overflow while scaling for stroke");
        v.valid = false;
        return v;
    };
    let Some(ring) = stroke_outline(
        &scaled,
        k.border_x as f64 * STROKER_PRECISION,
        k.border_y as f64 * STROKER_PRECISION,
    ) else {
        log::warn!("cannot stroke outline");
        v.valid = false;
        return v;
    };

    v.fill = scaled;
    v.border = ring;
    let mut cbox = Rect::reset();
    v.fill.update_cbox(&mut cbox);
    v.border.update_cbox(&mut cbox);
    v.cbox = if cbox.is_empty() { Rect::zero() } else { cbox };
    v
}

/// Construct callback for the outline cache.
pub fn construct_outline(key: &OutlineKey) -> OutlineValue {
    match key {
        OutlineKey::Glyph(k) => construct_glyph(k),
        OutlineKey::Drawing(text) => construct_drawing(text),
        OutlineKey::Border(k) => construct_border(k),
        OutlineKey::Box => OutlineValue {
            fill: unit_box(),
            cbox: Rect {
                x_min: 0,
                y_min: 0,
                x_max: 64,
                y_max: 64,
            },
            valid: true,
            ..OutlineValue::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::{Face, SquareFace};

    fn face_ref() -> FaceRef {
        FaceRef(Arc::new(SquareFace::new("Test")))
    }

    fn glyph_key(flags: DecoFlags) -> GlyphKey {
        GlyphKey {
            face: face_ref(),
            size: 20.0f64.to_bits(),
            glyph_index: 'A' as u32,
            bold: false,
            italic: false,
            flags,
        }
    }

    #[test]
    fn glyph_outline_carries_metrics() {
        let v = construct_outline(&OutlineKey::Glyph(glyph_key(DecoFlags::empty())));
        assert!(v.valid);
        assert!(!v.fill.is_empty());
        assert!(v.advance > 0);
        assert!(v.asc > 0 && v.desc > 0);
        assert_eq!(v.cbox, v.fill.cbox());
    }

    #[test]
    fn underline_adds_a_contour() {
        let plain = construct_outline(&OutlineKey::Glyph(glyph_key(DecoFlags::empty())));
        let deco = construct_outline(&OutlineKey::Glyph(glyph_key(DecoFlags::UNDERLINE)));
        assert_eq!(deco.fill.segments.len(), plain.fill.segments.len() + 4);
        // Decoration sits below the baseline.
        assert!(deco.cbox.y_max > plain.cbox.y_max);
    }

    #[test]
    fn box_outline_is_unit_square() {
        let v = construct_outline(&OutlineKey::Box);
        assert!(v.valid);
        assert_eq!(v.cbox.x_max, 64);
        assert_eq!(v.fill.points.len(), 4);
    }

    #[test]
    fn drawing_outline_metrics_follow_bbox() {
        let v = construct_outline(&OutlineKey::Drawing("m 0 0 l 100 0 100 50 0 50".into()));
        assert!(v.valid);
        assert_eq!(v.advance, 6400);
        assert_eq!(v.asc, 3200);
        assert_eq!(v.desc, 0);
    }

    #[test]
    fn invalid_drawing_is_marked() {
        let v = construct_outline(&OutlineKey::Drawing("nonsense".into()));
        assert!(!v.valid);
    }

    #[test]
    fn border_strokes_around_source() {
        let src = Arc::new(construct_outline(&OutlineKey::Glyph(glyph_key(
            DecoFlags::empty(),
        ))));
        let key = OutlineKey::Border(BorderKey {
            outline: OutlineRef(src.clone()),
            scale_ord_x: 0,
            scale_ord_y: 0,
            border_x: 8,
            border_y: 8,
        });
        let v = construct_outline(&key);
        assert!(v.valid);
        assert!(!v.border.is_empty());
        assert!(v.cbox.x_min < src.cbox.x_min);
        assert!(v.cbox.x_max > src.cbox.x_max);
    }

    #[test]
    fn zero_border_is_empty_but_valid() {
        let src = Arc::new(construct_outline(&OutlineKey::Box));
        let key = OutlineKey::Border(BorderKey {
            outline: OutlineRef(src),
            scale_ord_x: 0,
            scale_ord_y: 0,
            border_x: 0,
            border_y: 0,
        });
        let v = construct_outline(&key);
        assert!(v.valid);
        assert!(v.fill.is_empty() && v.border.is_empty());
    }

    #[test]
    fn outline_ref_identity_semantics() {
        let a = Arc::new(OutlineValue::default());
        let b = Arc::new(OutlineValue::default());
        assert_eq!(OutlineRef(a.clone()), OutlineRef(a.clone()));
        assert_ne!(OutlineRef(a), OutlineRef(b));
    }

    #[test]
    fn rotated_glyph_swaps_extent() {
        let plain = construct_outline(&OutlineKey::Glyph(glyph_key(DecoFlags::empty())));
        let rot = construct_outline(&OutlineKey::Glyph(glyph_key(DecoFlags::ROTATE)));
        // The rotated glyph extends above the baseline by its width.
        assert!(rot.cbox.y_min < 0);
        assert_eq!(rot.cbox.height(), plain.cbox.width());
    }
}

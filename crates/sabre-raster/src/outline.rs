// this_file: crates/sabre-raster/src/outline.rs

//! Polyline outline container.
//!
//! An outline is a point array plus one tag byte per segment. A segment
//! consumes its start point and any control points; its end point is the
//! next segment's start, or the contour's first point for the segment
//! carrying [`CONTOUR_END`]. A unit box is therefore 4 points + 4 line
//! segments.

use crate::geom::{Rect, Vector};

/// Straight segment: consumes 1 point (start).
pub const SEGMENT_LINE: u8 = 1;
/// Quadratic segment: consumes 2 points (start, control).
pub const SEGMENT_QUAD: u8 = 2;
/// Cubic segment: consumes 3 points (start, control, control).
pub const SEGMENT_CUBIC: u8 = 3;
/// Mask selecting the segment kind bits.
pub const SEGMENT_KIND_MASK: u8 = 3;
/// Set on the last segment of a contour; its end wraps to the contour start.
pub const CONTOUR_END: u8 = 4;

/// Coordinate magnitude cap in 26.6 units. Transforms producing larger
/// values are rejected and the affected cluster renders empty.
pub const OUTLINE_MAX: i32 = (1 << 28) - 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outline {
    pub points: Vec<Vector>,
    pub segments: Vec<u8>,
}

impl Outline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points a segment with the given tag consumes.
    #[inline]
    pub fn segment_points(tag: u8) -> usize {
        (tag & SEGMENT_KIND_MASK) as usize
    }

    /// Grow `cbox` to cover every point of this outline.
    pub fn update_cbox(&self, cbox: &mut Rect) {
        for p in &self.points {
            cbox.update_point(*p);
        }
    }

    pub fn cbox(&self) -> Rect {
        let mut r = Rect::reset();
        self.update_cbox(&mut r);
        if r.is_empty() {
            Rect::zero()
        } else {
            r
        }
    }

    /// Scale each axis by a power of two. Fails when a coordinate leaves
    /// the representable range.
    pub fn scale_pow2(&self, ord_x: i32, ord_y: i32) -> Option<Outline> {
        let mut points = Vec::with_capacity(self.points.len());
        for p in &self.points {
            let x = libm::ldexp(p.x as f64, ord_x);
            let y = libm::ldexp(p.y as f64, ord_y);
            if !(x.abs() < OUTLINE_MAX as f64 && y.abs() < OUTLINE_MAX as f64) {
                return None;
            }
            points.push(Vector::new(x.round() as i32, y.round() as i32));
        }
        Some(Outline {
            points,
            segments: self.segments.clone(),
        })
    }

    /// Apply an affine matrix (`m[2]` is `(0, 0, w)`); output in 26.6.
    pub fn transform_2d(&self, m: &[[f64; 3]; 3]) -> Option<Outline> {
        let w = 1.0 / m[2][2];
        self.map_points(|x, y| {
            let ox = (m[0][0] * x + m[0][1] * y + m[0][2]) * w;
            let oy = (m[1][0] * x + m[1][1] * y + m[1][2]) * w;
            (ox, oy)
        })
    }

    /// Apply a full perspective matrix; output in 26.6.
    pub fn transform_3d(&self, m: &[[f64; 3]; 3]) -> Option<Outline> {
        self.map_points(|x, y| {
            let z = m[2][0] * x + m[2][1] * y + m[2][2];
            let w = 1.0 / z.max(0.1);
            let ox = (m[0][0] * x + m[0][1] * y + m[0][2]) * w;
            let oy = (m[1][0] * x + m[1][1] * y + m[1][2]) * w;
            (ox, oy)
        })
    }

    fn map_points(&self, f: impl Fn(f64, f64) -> (f64, f64)) -> Option<Outline> {
        let mut points = Vec::with_capacity(self.points.len());
        for p in &self.points {
            let (x, y) = f(p.x as f64, p.y as f64);
            if !(x.abs() < OUTLINE_MAX as f64 && y.abs() < OUTLINE_MAX as f64) {
                return None;
            }
            points.push(Vector::new(x.round() as i32, y.round() as i32));
        }
        Some(Outline {
            points,
            segments: self.segments.clone(),
        })
    }

    /// Track the minimum projected x over all points; used by the KF
    /// karaoke sweep to find a run's leftmost device coordinate.
    pub fn update_min_transformed_x(&self, m: &[[f64; 3]; 3], leftmost: &mut i32) {
        for p in &self.points {
            let x = p.x as f64;
            let y = p.y as f64;
            let z = m[2][0] * x + m[2][1] * y + m[2][2];
            let ox = (m[0][0] * x + m[0][1] * y + m[0][2]) / z.max(0.1);
            let q = ox.round().clamp(-(OUTLINE_MAX as f64), OUTLINE_MAX as f64) as i32;
            *leftmost = (*leftmost).min(q);
        }
    }
}

/// Incremental outline assembly from pen-style callbacks.
///
/// Handles the wrap-around closing convention: an unclosed contour gets a
/// final line segment back to its start.
#[derive(Debug, Default)]
pub struct OutlineBuilder {
    outline: Outline,
    start: Vector,
    cur: Vector,
    open: bool,
    contour_segments: usize,
}

impl OutlineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, p: Vector) {
        self.close_contour();
        self.start = p;
        self.cur = p;
        self.open = true;
    }

    pub fn line_to(&mut self, p: Vector) {
        if !self.open {
            return;
        }
        self.outline.points.push(self.cur);
        self.outline.segments.push(SEGMENT_LINE);
        self.contour_segments += 1;
        self.cur = p;
    }

    pub fn quad_to(&mut self, c: Vector, p: Vector) {
        if !self.open {
            return;
        }
        self.outline.points.push(self.cur);
        self.outline.points.push(c);
        self.outline.segments.push(SEGMENT_QUAD);
        self.contour_segments += 1;
        self.cur = p;
    }

    pub fn curve_to(&mut self, c1: Vector, c2: Vector, p: Vector) {
        if !self.open {
            return;
        }
        self.outline.points.push(self.cur);
        self.outline.points.push(c1);
        self.outline.points.push(c2);
        self.outline.segments.push(SEGMENT_CUBIC);
        self.contour_segments += 1;
        self.cur = p;
    }

    pub fn close(&mut self) {
        self.close_contour();
    }

    pub fn finish(mut self) -> Outline {
        self.close_contour();
        self.outline
    }

    fn close_contour(&mut self) {
        if self.contour_segments > 0 {
            if self.cur != self.start {
                self.outline.points.push(self.cur);
                self.outline.segments.push(SEGMENT_LINE);
            }
            if let Some(last) = self.outline.segments.last_mut() {
                *last |= CONTOUR_END;
            }
        }
        self.open = false;
        self.contour_segments = 0;
    }
}

/// Build the canonical unit box (0,0)–(64,64) used for BorderStyle 3
/// opaque backgrounds.
pub fn unit_box() -> Outline {
    Outline {
        points: vec![
            Vector::new(0, 0),
            Vector::new(64, 0),
            Vector::new(64, 64),
            Vector::new(0, 64),
        ],
        segments: vec![
            SEGMENT_LINE,
            SEGMENT_LINE,
            SEGMENT_LINE,
            SEGMENT_LINE | CONTOUR_END,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: i32) -> Outline {
        let mut b = OutlineBuilder::new();
        b.move_to(Vector::new(0, 0));
        b.line_to(Vector::new(size, 0));
        b.line_to(Vector::new(size, size));
        b.line_to(Vector::new(0, size));
        b.finish()
    }

    #[test]
    fn builder_closes_contour_with_wraparound() {
        let o = square(64);
        assert_eq!(o.points.len(), 4);
        assert_eq!(o.segments.len(), 4);
        assert_eq!(o.segments[3], SEGMENT_LINE | CONTOUR_END);
        assert_eq!(o, unit_box());
    }

    #[test]
    fn builder_adds_closing_edge_when_pen_is_away_from_start() {
        let mut b = OutlineBuilder::new();
        b.move_to(Vector::new(0, 0));
        b.line_to(Vector::new(64, 0));
        b.line_to(Vector::new(64, 64));
        let o = b.finish();
        // Third segment is the synthesized close back to (0,0).
        assert_eq!(o.segments.len(), 3);
        assert_eq!(o.points[2], Vector::new(64, 64));
        assert_eq!(o.segments[2], SEGMENT_LINE | CONTOUR_END);
    }

    #[test]
    fn cbox_covers_all_points() {
        let o = square(128);
        let c = o.cbox();
        assert_eq!((c.x_min, c.y_min, c.x_max, c.y_max), (0, 0, 128, 128));
    }

    #[test]
    fn scale_pow2_shifts_coordinates() {
        let o = square(64);
        let s = o.scale_pow2(1, -1).unwrap();
        assert_eq!(s.cbox().x_max, 128);
        assert_eq!(s.cbox().y_max, 32);
    }

    #[test]
    fn scale_pow2_rejects_overflow() {
        let o = square(1 << 20);
        assert!(o.scale_pow2(20, 0).is_none());
    }

    #[test]
    fn transform_2d_identity() {
        let o = square(64);
        let m = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(o.transform_2d(&m).unwrap(), o);
    }

    #[test]
    fn transform_3d_rejects_huge_output() {
        let o = square(64);
        let m = [[1e9, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(o.transform_3d(&m).is_none());
    }

    #[test]
    fn min_transformed_x_tracks_leftmost_point() {
        let o = square(64);
        let m = [[1.0, 0.0, -640.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let mut leftmost = i32::MAX;
        o.update_min_transformed_x(&m, &mut leftmost);
        assert_eq!(leftmost, -640);
    }
}

// this_file: crates/sabre-core/src/drawing.rs

//! Inline drawing command parser.
//!
//! Drawing text is a sequence of `m n l b s p c` operations with
//! coordinate arguments in drawing units; coordinates scale to 26.6 on
//! parse. B-splines (`s`, extended by `p`, closed by `c`) are converted
//! to their Bézier equivalents.

use sabre_raster::geom::{f64_to_d6, Rect, Vector};
use sabre_raster::{Outline, OutlineBuilder};

struct DrawingParser<'a> {
    tokens: std::iter::Peekable<std::str::SplitAsciiWhitespace<'a>>,
    builder: OutlineBuilder,
    pen: Vector,
    spline: Vec<Vector>,
}

impl<'a> DrawingParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            tokens: text.split_ascii_whitespace().peekable(),
            builder: OutlineBuilder::new(),
            pen: Vector::default(),
            spline: Vec::new(),
        }
    }

    fn next_point(&mut self) -> Option<Vector> {
        let x: f64 = self.tokens.next()?.parse().ok()?;
        let y: f64 = self.tokens.next()?.parse().ok()?;
        Some(Vector::new(f64_to_d6(x), f64_to_d6(y)))
    }

    /// Peek: is the next token a coordinate rather than a command?
    fn at_number(&mut self) -> bool {
        self.tokens
            .peek()
            .map_or(false, |t| t.parse::<f64>().is_ok())
    }

    fn flush_spline(&mut self) {
        if self.spline.len() < 3 {
            self.spline.clear();
            return;
        }
        // Uniform cubic B-spline over the collected control points,
        // emitted as Béziers.
        let pts = std::mem::take(&mut self.spline);
        let mix = |a: i32, b: i32, c: i32, wa: i32, wb: i32, wc: i32| (wa * a + wb * b + wc * c) / 6;
        for win in pts.windows(4) {
            let (d0, d1, d2, d3) = (win[0], win[1], win[2], win[3]);
            let b0 = Vector::new(
                mix(d0.x, d1.x, d2.x, 1, 4, 1),
                mix(d0.y, d1.y, d2.y, 1, 4, 1),
            );
            let b1 = Vector::new(mix(d1.x, d2.x, 0, 4, 2, 0), mix(d1.y, d2.y, 0, 4, 2, 0));
            let b2 = Vector::new(mix(d1.x, d2.x, 0, 2, 4, 0), mix(d1.y, d2.y, 0, 2, 4, 0));
            let b3 = Vector::new(
                mix(d1.x, d2.x, d3.x, 1, 4, 1),
                mix(d1.y, d2.y, d3.y, 1, 4, 1),
            );
            if self.pen != b0 {
                self.builder.line_to(b0);
                self.pen = b0;
            }
            self.builder.curve_to(b1, b2, b3);
            self.pen = b3;
        }
    }

    fn parse(mut self) -> Option<(Outline, Rect)> {
        let mut spline_open = false;
        while let Some(tok) = self.tokens.next() {
            let cmd = tok.chars().next()?.to_ascii_lowercase();
            match cmd {
                'm' | 'n' => {
                    if spline_open {
                        self.flush_spline();
                        spline_open = false;
                    }
                    while self.at_number() {
                        let p = self.next_point()?;
                        self.builder.move_to(p);
                        self.pen = p;
                    }
                }
                'l' => {
                    while self.at_number() {
                        let p = self.next_point()?;
                        self.builder.line_to(p);
                        self.pen = p;
                    }
                }
                'b' => {
                    while self.at_number() {
                        let c1 = self.next_point()?;
                        let c2 = self.next_point()?;
                        let p = self.next_point()?;
                        self.builder.curve_to(c1, c2, p);
                        self.pen = p;
                    }
                }
                's' => {
                    self.spline.clear();
                    while self.at_number() {
                        let p = self.next_point()?;
                        self.spline.push(p);
                    }
                    spline_open = true;
                }
                'p' => {
                    while self.at_number() {
                        let p = self.next_point()?;
                        self.spline.push(p);
                    }
                }
                'c' => {
                    if spline_open && self.spline.len() >= 3 {
                        // Close the spline by wrapping the first three
                        // control points.
                        let head: Vec<Vector> = self.spline[..3].to_vec();
                        self.spline.extend(head);
                        self.flush_spline();
                        spline_open = false;
                    }
                }
                _ => return None,
            }
        }
        if spline_open {
            self.flush_spline();
        }

        let outline = self.builder.finish();
        if outline.is_empty() {
            return None;
        }
        let bbox = outline.cbox();
        Some((outline, bbox))
    }
}

/// Parse drawing text into an outline plus its bounding box. `None` on
/// malformed input; the caller treats that as an invalid cache value.
pub fn parse_drawing(text: &str) -> Option<(Outline, Rect)> {
    DrawingParser::new(text).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_drawing() {
        let (outline, bbox) = parse_drawing("m 0 0 l 100 0 100 50 0 50").unwrap();
        assert_eq!(outline.segments.len(), 4);
        assert_eq!((bbox.width(), bbox.height()), (6400, 3200));
    }

    #[test]
    fn bezier_drawing() {
        let (outline, _) = parse_drawing("m 0 0 b 10 0 20 10 20 20 l 0 20").unwrap();
        assert!(outline
            .segments
            .iter()
            .any(|&s| s & sabre_raster::outline::SEGMENT_KIND_MASK
                == sabre_raster::outline::SEGMENT_CUBIC));
    }

    #[test]
    fn spline_converts_to_cubics() {
        let (outline, _) = parse_drawing("m 0 0 s 10 0 20 10 30 0 p 40 10 c").unwrap();
        let cubics = outline
            .segments
            .iter()
            .filter(|&&s| {
                s & sabre_raster::outline::SEGMENT_KIND_MASK == sabre_raster::outline::SEGMENT_CUBIC
            })
            .count();
        assert!(cubics >= 3);
    }

    #[test]
    fn fractional_coordinates_scale_to_d6() {
        let (_, bbox) = parse_drawing("m 0 0 l 1.5 0 1.5 1.5 0 1.5").unwrap();
        assert_eq!(bbox.x_max, 96);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_drawing("q 1 2").is_none());
        assert!(parse_drawing("").is_none());
        assert!(parse_drawing("m 5").is_none());
    }
}

// this_file: crates/sabre-raster/src/raster.rs

//! Glue to the external rasterizer (zeno) and stroker (kurbo).
//!
//! Outlines arrive here already transformed to device space in 26.6
//! units; zeno does the scan conversion, kurbo does border expansion.

use kurbo::{Affine, BezPath, Point, Stroke, StrokeOpts};
use zeno::{Command, Mask};

use crate::bitmap::Bitmap;
use crate::engine::BitmapEngine;
use crate::geom::Vector;
use crate::outline::{
    Outline, OutlineBuilder, CONTOUR_END, SEGMENT_CUBIC, SEGMENT_KIND_MASK, SEGMENT_LINE,
    SEGMENT_QUAD,
};

/// Stroker step size in outline units; border widths are quantized to
/// this grid before they enter the cache key.
pub const STROKER_PRECISION: f64 = 16.0;

#[inline]
fn zv(p: Vector) -> zeno::Vector {
    zeno::Vector::new(p.x as f32 / 64.0, p.y as f32 / 64.0)
}

/// One step of a contour walk; the wrap-around closing convention is
/// already resolved into explicit end points.
enum WalkEvent<'a> {
    Move(Vector),
    Segment(u8, &'a [Vector], Vector),
    Close,
}

/// Walk an outline's contours, reporting each segment with its resolved
/// end point.
fn walk_outline(o: &Outline, mut f: impl FnMut(WalkEvent<'_>)) {
    let mut pt = 0usize;
    let mut seg = 0usize;
    while seg < o.segments.len() && pt < o.points.len() {
        let contour_start = pt;
        f(WalkEvent::Move(o.points[contour_start]));
        while seg < o.segments.len() {
            let tag = o.segments[seg];
            let n = Outline::segment_points(tag);
            if n == 0 || pt + n > o.points.len() {
                return; // malformed; drop the rest
            }
            let ends_contour = tag & CONTOUR_END != 0;
            let end = if ends_contour || pt + n >= o.points.len() {
                o.points[contour_start]
            } else {
                o.points[pt + n]
            };
            f(WalkEvent::Segment(
                tag & SEGMENT_KIND_MASK,
                &o.points[pt..pt + n],
                end,
            ));
            pt += n;
            seg += 1;
            if ends_contour {
                break;
            }
        }
        f(WalkEvent::Close);
    }
}

fn outline_to_commands(o: &Outline) -> Vec<Command> {
    let mut cmds = Vec::with_capacity(o.segments.len() + 8);
    walk_outline(o, |ev| match ev {
        WalkEvent::Move(p) => cmds.push(Command::MoveTo(zv(p))),
        WalkEvent::Segment(SEGMENT_LINE, _, end) => cmds.push(Command::LineTo(zv(end))),
        WalkEvent::Segment(SEGMENT_QUAD, pts, end) => {
            cmds.push(Command::QuadTo(zv(pts[1]), zv(end)));
        }
        WalkEvent::Segment(SEGMENT_CUBIC, pts, end) => {
            cmds.push(Command::CurveTo(zv(pts[1]), zv(pts[2]), zv(end)));
        }
        WalkEvent::Segment(..) => {}
        WalkEvent::Close => cmds.push(Command::Close),
    });
    cmds
}

fn outline_to_bez(o: &Outline) -> BezPath {
    let kp = |p: Vector| Point::new(p.x as f64, p.y as f64);
    let mut path = BezPath::new();
    walk_outline(o, |ev| match ev {
        WalkEvent::Move(p) => path.move_to(kp(p)),
        WalkEvent::Segment(SEGMENT_LINE, _, end) => path.line_to(kp(end)),
        WalkEvent::Segment(SEGMENT_QUAD, pts, end) => path.quad_to(kp(pts[1]), kp(end)),
        WalkEvent::Segment(SEGMENT_CUBIC, pts, end) => {
            path.curve_to(kp(pts[1]), kp(pts[2]), kp(end));
        }
        WalkEvent::Segment(..) => {}
        WalkEvent::Close => path.close_path(),
    });
    path
}

fn bez_to_outline(path: &BezPath) -> Option<Outline> {
    let vp = |p: Point| -> Option<Vector> {
        let x = p.x.round();
        let y = p.y.round();
        if !(x.abs() < crate::outline::OUTLINE_MAX as f64
            && y.abs() < crate::outline::OUTLINE_MAX as f64)
        {
            return None;
        }
        Some(Vector::new(x as i32, y as i32))
    };
    let mut b = OutlineBuilder::new();
    for el in path.elements() {
        match *el {
            kurbo::PathEl::MoveTo(p) => b.move_to(vp(p)?),
            kurbo::PathEl::LineTo(p) => b.line_to(vp(p)?),
            kurbo::PathEl::QuadTo(c, p) => b.quad_to(vp(c)?, vp(p)?),
            kurbo::PathEl::CurveTo(c1, c2, p) => b.curve_to(vp(c1)?, vp(c2)?, vp(p)?),
            kurbo::PathEl::ClosePath => b.close(),
        }
    }
    Some(b.finish())
}

/// Render a mask for one outline, producing a placed bitmap view.
fn render_mask(o: &Outline) -> Option<(Vec<u8>, zeno::Placement)> {
    if o.is_empty() {
        return None;
    }
    let cmds = outline_to_commands(o);
    if cmds.is_empty() {
        return None;
    }
    let (data, placement) = Mask::new(cmds.as_slice()).render();
    if placement.width == 0 || placement.height == 0 {
        return None;
    }
    Some((data, placement))
}

/// Rasterize both polylines of an outline value into a single 8-bit
/// alpha bitmap with left/top placement. Degenerate input yields an
/// empty (all-zero, zero-sized) bitmap rather than a failure.
pub fn outlines_to_bitmap(engine: &dyn BitmapEngine, fill: &Outline, border: &Outline) -> Bitmap {
    let masks: Vec<_> = [fill, border]
        .iter()
        .filter_map(|o| render_mask(o))
        .collect();
    if masks.is_empty() {
        return engine.alloc(0, 0);
    }

    let left = masks.iter().map(|(_, p)| p.left).min().unwrap();
    let top = masks.iter().map(|(_, p)| p.top).min().unwrap();
    let right = masks
        .iter()
        .map(|(_, p)| p.left + p.width as i32)
        .max()
        .unwrap();
    let bottom = masks
        .iter()
        .map(|(_, p)| p.top + p.height as i32)
        .max()
        .unwrap();

    let mut bm = engine.alloc((right - left) as usize, (bottom - top) as usize);
    bm.left = left;
    bm.top = top;
    for (data, p) in &masks {
        let x0 = (p.left - left) as usize;
        let y0 = (p.top - top) as usize;
        for y in 0..p.height as usize {
            let src = &data[y * p.width as usize..(y + 1) * p.width as usize];
            let dst = bm.row_mut(y0 + y);
            for (x, &v) in src.iter().enumerate() {
                let d = &mut dst[x0 + x];
                *d = (*d).max(v);
            }
        }
    }
    bm
}

/// Expand `src` by the given border widths (26.6 units per axis),
/// returning the stroke ring to be rasterized together with the source.
///
/// Anisotropy is handled by scaling Y so a uniform stroke of `2·bord_x`
/// offsets by `bord_x` horizontally and `bord_y` vertically.
pub fn stroke_outline(src: &Outline, bord_x: f64, bord_y: f64) -> Option<Outline> {
    if src.is_empty() {
        return Some(Outline::new());
    }
    let bx = bord_x.max(1.0);
    let by = bord_y.max(1.0);

    let mut path = outline_to_bez(src);
    path.apply_affine(Affine::scale_non_uniform(1.0, bx / by));

    let style = Stroke::new(2.0 * bx)
        .with_join(kurbo::Join::Round)
        .with_caps(kurbo::Cap::Round);
    let mut ring = kurbo::stroke(
        path.elements().iter().copied(),
        &style,
        &StrokeOpts::default(),
        STROKER_PRECISION,
    );
    ring.apply_affine(Affine::scale_non_uniform(1.0, by / bx));

    bez_to_outline(&ring)
}

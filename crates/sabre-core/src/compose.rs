// this_file: crates/sabre-core/src/compose.rs

//! Composition: per-glyph transforms and bitmap lookups, run grouping,
//! composite-cache construction (union, blur, outline/shadow fixes) and
//! image emission.

use std::sync::Arc;

use bitflags::bitflags;
use smallvec::SmallVec;

use sabre_raster::geom::{d6_to_f64, f64_to_d6, DVector, Vector};
use sabre_raster::{
    be_padding, fix_outline, shift_bitmap, synth_blur, Bitmap, BitmapEngine, STROKER_PRECISION,
};

use crate::cache::{BitmapValue, CacheValue};
use crate::image::Image;
use crate::karaoke::KF_PROGRESS_ONE;
use crate::outline::{BorderKey, OutlineKey, OutlineRef, OutlineValue};
use crate::quant::{
    quantize_transform, recenter, restore_blur, restore_transform, BitmapKey, MAX_PERSP_SCALE,
    POSITION_PRECISION, SUBPIXEL_MASK,
};
use crate::text::{Effect, GlyphInfo, GlyphShape};
use crate::track::alpha_of;
use crate::Renderer;

bitflags! {
    /// Filter decisions shared by a composition run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FilterFlags: u32 {
        const NONZERO_BORDER = 1;
        const NONZERO_SHADOW = 2;
        const FILL_IN_BORDER = 4;
        const FILL_IN_SHADOW = 8;
        const BORDER_STYLE_3 = 16;
    }
}

/// Filter descriptor: part of the composite cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FilterDesc {
    pub flags: FilterFlags,
    pub be: i32,
    /// Quantized blur index.
    pub blur: i32,
    /// Quantized shadow offset, 26.6.
    pub shadow: (i32, i32),
}

/// Pointer-identity handle to a cached bitmap for composite keys.
#[derive(Clone)]
pub struct BitmapHandle(pub Option<Arc<BitmapValue>>);

impl BitmapHandle {
    fn key(&self) -> usize {
        self.0
            .as_ref()
            .map_or(0, |b| Arc::as_ptr(b) as *const () as usize)
    }

    fn raster(&self) -> Option<&Bitmap> {
        self.0.as_ref().and_then(|v| v.bitmap.as_ref())
    }
}

impl PartialEq for BitmapHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for BitmapHandle {}

impl std::hash::Hash for BitmapHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Debug for BitmapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitmapHandle({:#x})", self.key())
    }
}

/// One glyph's contribution to a run: fill and border bitmaps with
/// their run-relative pixel positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitmapRef {
    pub bm: BitmapHandle,
    pub pos: Vector,
    pub bm_o: BitmapHandle,
    pub pos_o: Vector,
}

/// Composite cache key: the run's filter plus its bitmap list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub filter: FilterDesc,
    pub bitmaps: Vec<BitmapRef>,
}

/// Combined fill/border/shadow rasters for one run.
#[derive(Debug, Default)]
pub struct CompositeValue {
    pub bm: Option<Arc<Bitmap>>,
    pub bm_o: Option<Arc<Bitmap>>,
    pub bm_s: Option<Arc<Bitmap>>,
}

impl CacheValue for CompositeValue {
    fn size(&self) -> usize {
        let raster = |b: &Option<Arc<Bitmap>>| b.as_ref().map_or(0, |b| b.size());
        std::mem::size_of::<CompositeKey>()
            + std::mem::size_of::<Self>()
            + raster(&self.bm)
            + raster(&self.bm_o)
            + raster(&self.bm_s)
    }
}

/// One style run within an event, ready for composite lookup.
#[derive(Debug)]
pub struct CombinedBitmapInfo {
    pub c: [u32; 4],
    pub effect_type: Effect,
    pub effect_timing: i64,
    /// Leftmost transformed x over the run, 26.6; KF sweep reference.
    pub leftmost_x: i32,
    pub filter: FilterDesc,
    /// Run origin in pixels (min over member positions).
    pub x: i32,
    pub y: i32,
    pub bitmaps: SmallVec<[BitmapRef; 8]>,
}

const OUTLINE_LEFTMOST_UNSET: i32 = i32::MAX;

impl Renderer {
    /// Build the per-glyph 3×3 transform: shear, then X/Y/Z rotations,
    /// then the pinhole projection at `20000·blur_scale`, positioned at
    /// the glyph pen minus the rotation-origin shift.
    pub(crate) fn calc_transform_matrix(
        &self,
        info: &GlyphInfo,
        part: &GlyphShape,
    ) -> [[f64; 3]; 3] {
        let frx = std::f64::consts::PI / 180.0 * info.frx;
        let fry = std::f64::consts::PI / 180.0 * info.fry;
        let frz = std::f64::consts::PI / 180.0 * info.frz;

        let (sx, cx) = (-frx.sin(), frx.cos());
        let (sy, cy) = (fry.sin(), fry.cos());
        let (sz, cz) = (-frz.sin(), frz.cos());

        let fax = info.fax * info.scale_x / info.scale_y;
        let fay = info.fay * info.scale_y / info.scale_x;
        let x1 = [1.0, fax, part.shift.x as f64 + info.asc as f64 * fax];
        let y1 = [fay, 1.0, part.shift.y as f64];

        let mut x2 = [0.0; 3];
        let mut y2 = [0.0; 3];
        for i in 0..3 {
            x2[i] = x1[i] * cz - y1[i] * sz;
            y2[i] = x1[i] * sz + y1[i] * cz;
        }

        let mut y3 = [0.0; 3];
        let mut z3 = [0.0; 3];
        for i in 0..3 {
            y3[i] = y2[i] * cx;
            z3[i] = y2[i] * sx;
        }

        let mut x4 = [0.0; 3];
        let mut z4 = [0.0; 3];
        for i in 0..3 {
            x4[i] = x2[i] * cy - z3[i] * sy;
            z4[i] = x2[i] * sy + z3[i] * cy;
        }

        let dist = 20000.0 * self.blur_scale;
        z4[2] += dist;

        let scale_x = dist * self.font_scale_x;
        let offs_x = part.pos.x as f64 - part.shift.x as f64 * self.font_scale_x;
        let offs_y = part.pos.y as f64 - part.shift.y as f64;

        let mut m = [[0.0f64; 3]; 3];
        for i in 0..3 {
            m[0][i] = z4[i] * offs_x + x4[i] * scale_x;
            m[1][i] = z4[i] * offs_y + y3[i] * dist;
            m[2][i] = z4[i];
        }
        m
    }

    fn bitmap_lookup(&mut self, key: &BitmapKey) -> Option<Arc<BitmapValue>> {
        let engine = self.engine;
        let value = self
            .caches
            .bitmap
            .get_or_insert_with(key, || construct_bitmap(engine, key));
        if value.bitmap.is_some() {
            Some(value)
        } else {
            None
        }
    }

    /// Fetch fill and border bitmaps for one cluster part via the
    /// quantized-transform caches.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn get_bitmap_glyph(
        &mut self,
        info: &GlyphInfo,
        part: &GlyphShape,
        leftmost_x: &mut i32,
        offset: &mut DVector,
        first: bool,
        flags: FilterFlags,
    ) -> Option<(Option<Arc<BitmapValue>>, Vector, Option<Arc<BitmapValue>>, Vector)> {
        let outline = part.outline.clone()?;
        if info.symbol == '\n' || info.symbol == '\0' || info.skip {
            return None;
        }

        let m1 = self.calc_transform_matrix(info, part);
        let mut m2 = [[0.0f64; 3]; 3];
        for i in 0..3 {
            m2[i][0] = m1[i][0] * part.scale.x;
            m2[i][1] = m1[i][1] * part.scale.y;
            m2[i][2] =
                m1[i][0] * part.scale_offset.x + m1[i][1] * part.scale_offset.y + m1[i][2];
        }
        let mut m = m2;

        if info.effect_type == Effect::KaraokeKF {
            outline.fill.update_min_transformed_x(&m, leftmost_x);
        }

        let (pos, qm) = quantize_transform(m, &outline.cbox, offset, first)?;
        let key = BitmapKey {
            outline: OutlineRef(outline.clone()),
            matrix: qm,
        };
        let bm = self.bitmap_lookup(&key);
        let mut pos_o = pos;
        let mut pos = pos;

        // Border layer.
        let border_outline: Arc<OutlineValue>;
        let border_m: [[f64; 3]; 3];

        if flags.contains(FilterFlags::BORDER_STYLE_3) {
            if !flags
                .intersects(FilterFlags::NONZERO_BORDER | FilterFlags::NONZERO_SHADOW)
            {
                return Some((bm, pos, None, pos_o));
            }

            let w = 64.0 * self.border_scale;
            let mut bord = DVector::new(info.border_x * w, info.border_y * w);
            let mut width = info.hspacing_scaled as f64 + part.advance.x as f64;
            let mut height = info.asc as f64 + info.desc as f64;

            // Double-scaled opaque box, as VSFilter draws it.
            let orig_scale = DVector::new(
                info.scale_x * info.scale_fix,
                info.scale_y * info.scale_fix,
            );
            bord.x *= orig_scale.x;
            bord.y *= orig_scale.y;
            width *= orig_scale.x;
            height *= orig_scale.y;

            // Avoid gaps between adjacent boxes.
            bord.x = bord.x.max(64.0);
            bord.y = bord.y.max(64.0);

            border_outline = self
                .caches
                .outline
                .get_or_insert_with(&OutlineKey::Box, || {
                    crate::outline::construct_outline(&OutlineKey::Box)
                });

            let scale = DVector::new((width + 2.0 * bord.x) / 64.0, (height + 2.0 * bord.y) / 64.0);
            let off = DVector::new(-bord.x, -bord.y - info.asc as f64);
            let mut bm = [[0.0f64; 3]; 3];
            for i in 0..3 {
                bm[i][0] = m1[i][0] * scale.x;
                bm[i][1] = m1[i][1] * scale.y;
                bm[i][2] = m1[i][0] * off.x + m1[i][1] * off.y + m1[i][2];
            }
            border_m = bm;
        } else {
            if !flags.contains(FilterFlags::NONZERO_BORDER) {
                return Some((bm, pos, None, pos_o));
            }

            let w = 64.0 * self.border_scale;
            let mut bord_x = w * info.border_x / part.scale.x;
            let mut bord_y = w * info.border_y / part.scale.y;

            let bbox = &outline.cbox;
            // Estimated bounding box half size after stroking.
            let dx = (bbox.x_max - bbox.x_min) as f64 / 2.0 + (bord_x + 64.0);
            let dy = (bbox.y_max - bbox.y_min) as f64 / 2.0 + (bord_y + 64.0);

            // Recentre like the quantizer does, then derive the stroker
            // scale orders from the projection derivative so stroking
            // error matches the positional precision under perspective.
            let mut center = [0.0f64; 2];
            if !recenter(&mut m, &outline.cbox, &mut center) {
                return Some((bm, pos, None, pos_o));
            }

            let (mxx, mxy) = (m[0][0].abs(), m[0][1].abs());
            let (myx, myy) = (m[1][0].abs(), m[1][1].abs());
            let (mzx, mzy) = (m[2][0].abs(), m[2][1].abs());

            let z0 = m[2][2] - mzx * dx - mzy * dy;
            let w = 1.0 / z0.max(m[2][2] / MAX_PERSP_SCALE);

            let x_lim = mxx * dx + mxy * dy;
            let y_lim = myx * dx + myy * dy;
            let rz = x_lim.max(y_lim) * w;

            let w = w * STROKER_PRECISION / POSITION_PRECISION;
            let (_, ord_x) = libm::frexp(w * (mxx.max(myx) + mzx * rz));
            let (_, ord_y) = libm::frexp(w * (mxy.max(myy) + mzy * rz));
            bord_x = libm::ldexp(bord_x, ord_x);
            bord_y = libm::ldexp(bord_y, ord_y);
            let max = sabre_raster::outline::OUTLINE_MAX as f64;
            if !(bord_x < max && bord_y < max) {
                return Some((bm, pos, None, pos_o));
            }
            let qx = (bord_x / STROKER_PRECISION).round() as i32;
            let qy = (bord_y / STROKER_PRECISION).round() as i32;
            if qx == 0 && qy == 0 {
                // Border thinner than the stroker grid: reuse the fill.
                let bm_o = bm.clone();
                return Some((bm, pos, bm_o, pos_o));
            }

            let border_key = OutlineKey::Border(BorderKey {
                outline: OutlineRef(outline.clone()),
                scale_ord_x: ord_x,
                scale_ord_y: ord_y,
                border_x: qx,
                border_y: qy,
            });
            border_outline = self
                .caches
                .outline
                .get_or_insert_with(&border_key, || {
                    crate::outline::construct_outline(&border_key)
                });

            let mut bmx = [[0.0f64; 3]; 3];
            for i in 0..3 {
                bmx[i][0] = libm::ldexp(m2[i][0], -ord_x);
                bmx[i][1] = libm::ldexp(m2[i][1], -ord_y);
                bmx[i][2] = m2[i][2];
            }
            border_m = bmx;
        }

        if !border_outline.valid {
            return Some((bm, pos, None, pos_o));
        }
        let Some((pos_o2, qm_o)) =
            quantize_transform(border_m, &border_outline.cbox, offset, false)
        else {
            return Some((bm, pos, None, pos_o));
        };
        pos_o = pos_o2;
        let key_o = BitmapKey {
            outline: OutlineRef(border_outline),
            matrix: qm_o,
        };
        let bm_o = self.bitmap_lookup(&key_o);
        if bm_o.is_none() {
            pos_o = pos;
        } else if bm.is_none() {
            pos = pos_o;
        }
        Some((bm, pos, bm_o, pos_o))
    }

    /// Walk the glyphs, derive filter flags, open runs, collect bitmap
    /// references and resolve each run through the composite cache.
    pub(crate) fn render_and_combine_glyphs(
        &mut self,
        device_x: f64,
        device_y: f64,
    ) -> Vec<(CombinedBitmapInfo, Arc<CompositeValue>)> {
        let left = self.settings.left_margin as f64;
        let device_x = (device_x - left) * self.font_scale_x + left;

        let mut combined: Vec<CombinedBitmapInfo> = Vec::new();
        let mut new_run = true;
        let mut offset = DVector::default();

        for i in 0..self.text_info.len() {
            if self.text_info.glyphs[i].starts_new_run {
                new_run = true;
            }
            if self.text_info.glyphs[i].skip {
                continue;
            }

            let info = self.text_info.glyphs[i].clone();
            let mut flags = FilterFlags::empty();
            if info.border_style == 3 {
                flags |= FilterFlags::BORDER_STYLE_3;
            }
            if info.border_x != 0.0 || info.border_y != 0.0 {
                flags |= FilterFlags::NONZERO_BORDER;
            }
            if info.shadow_x != 0.0 || info.shadow_y != 0.0 {
                flags |= FilterFlags::NONZERO_SHADOW;
            }
            if flags.contains(FilterFlags::NONZERO_SHADOW)
                && (info.effect_type == Effect::KaraokeKF
                    || info.effect_type == Effect::KaraokeKO
                    || info.a_pre_fade[0] != 0xFF
                    || info.border_style == 3)
            {
                flags |= FilterFlags::FILL_IN_SHADOW;
            }
            if !flags.contains(FilterFlags::NONZERO_BORDER)
                && !flags.contains(FilterFlags::FILL_IN_SHADOW)
            {
                flags &= !FilterFlags::NONZERO_SHADOW;
            }
            if (flags.contains(FilterFlags::NONZERO_BORDER)
                && info.a_pre_fade[0] == 0
                && info.a_pre_fade[1] == 0
                && alpha_of(info.c[2]) == 0)
                || info.border_style == 3
            {
                flags |= FilterFlags::FILL_IN_BORDER;
            }

            if new_run {
                let mut filter = FilterDesc {
                    flags,
                    be: info.be,
                    blur: 0,
                    shadow: (0, 0),
                };
                let blur_scale = self.blur_scale * (2.0 / (256.0f64).ln().sqrt());
                let (qblur, shadow_mask) = crate::quant::quantize_blur(info.blur * blur_scale);
                filter.blur = qblur;
                if flags.contains(FilterFlags::NONZERO_SHADOW) {
                    let x = f64_to_d6(info.shadow_x * self.border_scale);
                    let y = f64_to_d6(info.shadow_y * self.border_scale);
                    filter.shadow = (
                        (x + (shadow_mask >> 1)) & !shadow_mask,
                        (y + (shadow_mask >> 1)) & !shadow_mask,
                    );
                }

                combined.push(CombinedBitmapInfo {
                    c: info.c,
                    effect_type: info.effect_type,
                    effect_timing: info.effect_timing,
                    leftmost_x: OUTLINE_LEFTMOST_UNSET,
                    filter,
                    x: i32::MAX,
                    y: i32::MAX,
                    bitmaps: SmallVec::new(),
                });
                new_run = false;
            }

            // Device-space cluster position (auxiliary output keeps the
            // unquantized value).
            {
                let g = &mut self.text_info.glyphs[i];
                g.real_pos.x = device_x + d6_to_f64(g.pos.x) * self.font_scale_x;
                for part in &mut g.parts {
                    part.pos.x = f64_to_d6(device_x + d6_to_f64(part.pos.x) * self.font_scale_x);
                    part.pos.y = f64_to_d6(device_y) + part.pos.y;
                }
                g.pos.x = f64_to_d6(device_x + d6_to_f64(g.pos.x) * self.font_scale_x);
                g.pos.y = f64_to_d6(device_y) + g.pos.y;
            }

            let mut leftmost = combined.last().expect("run opened above").leftmost_x;
            let parts: SmallVec<[GlyphShape; 1]> = self.text_info.glyphs[i].parts.clone();
            let info = self.text_info.glyphs[i].clone();

            for part in &parts {
                let first = current_is_empty(&combined);
                let Some((bm, pos, bm_o, pos_o)) = self.get_bitmap_glyph(
                    &info,
                    part,
                    &mut leftmost,
                    &mut offset,
                    first,
                    flags,
                ) else {
                    continue;
                };
                if bm.is_none() && bm_o.is_none() {
                    continue;
                }
                let current = combined.last_mut().expect("run opened above");
                current.x = current.x.min(pos.x);
                current.y = current.y.min(pos.y);
                if bm_o.is_some() {
                    current.x = current.x.min(pos_o.x);
                    current.y = current.y.min(pos_o.y);
                }
                current.bitmaps.push(BitmapRef {
                    bm: BitmapHandle(bm),
                    pos,
                    bm_o: BitmapHandle(bm_o),
                    pos_o,
                });
            }
            let current = combined.last_mut().expect("run opened above");
            current.leftmost_x = leftmost;
        }

        // Normalize member positions to the run origin so composite
        // keys are position-independent, then resolve the composites.
        let engine = self.engine;
        let mut out = Vec::with_capacity(combined.len());
        for mut run in combined {
            if run.bitmaps.is_empty() {
                continue;
            }
            for r in &mut run.bitmaps {
                r.pos.x -= run.x;
                r.pos.y -= run.y;
                r.pos_o.x -= run.x;
                r.pos_o.y -= run.y;
            }
            let key = CompositeKey {
                filter: run.filter,
                bitmaps: run.bitmaps.to_vec(),
            };
            let value = self
                .caches
                .composite
                .get_or_insert_with(&key, || construct_composite(engine, &key));
            out.push((run, value));
        }
        out
    }

    /// Emit positioned images for the combined runs: shadow, then
    /// border, then fill layers, each cropped to the clip rectangle.
    pub(crate) fn emit_images(
        &self,
        runs: &[(CombinedBitmapInfo, Arc<CompositeValue>)],
        clip: &ClipRect,
        images: &mut Vec<Image>,
    ) {
        for (run, value) in runs {
            if let Some(bm_s) = &value.bm_s {
                emit_layer(images, bm_s, run.x, run.y, run.c[3], clip);
            }
        }
        for (run, value) in runs {
            if run.effect_type == Effect::KaraokeKO && run.effect_timing <= 0 {
                continue;
            }
            if let Some(bm_o) = &value.bm_o {
                emit_layer(images, bm_o, run.x, run.y, run.c[2], clip);
            }
        }
        for (run, value) in runs {
            let Some(bm) = &value.bm else { continue };
            match run.effect_type {
                Effect::KaraokeKF => {
                    let image = Image::new(
                        bm.clone(),
                        run.c[0],
                        run.x + bm.left,
                        run.y + bm.top,
                    );
                    let w = bm.w as i32;
                    // Sweep position within the bitmap, anchored at the
                    // run's leftmost transformed x.
                    let anchor = if run.leftmost_x == OUTLINE_LEFTMOST_UNSET {
                        0
                    } else {
                        (run.leftmost_x >> 6) - (run.x + bm.left)
                    };
                    let span = (w - anchor).max(0) as i64;
                    let split = (anchor as i64 + span * run.effect_timing / KF_PROGRESS_ONE)
                        .clamp(0, w as i64) as i32;
                    if let Some(sung) = image.crop(0, 0, split, bm.h as i32) {
                        emit_clipped(images, sung.clone_with_color(run.c[0]), clip);
                    }
                    if let Some(rest) = image.crop(split, 0, w - split, bm.h as i32) {
                        emit_clipped(images, rest.clone_with_color(run.c[1]), clip);
                    }
                }
                Effect::Karaoke => {
                    let colour = if run.effect_timing > 0 {
                        run.c[0]
                    } else {
                        run.c[1]
                    };
                    emit_layer(images, bm, run.x, run.y, colour, clip);
                }
                _ => emit_layer(images, bm, run.x, run.y, run.c[0], clip),
            }
        }
    }
}

fn current_is_empty(combined: &[CombinedBitmapInfo]) -> bool {
    combined.last().map_or(true, |c| c.bitmaps.is_empty())
}

/// Device-space clip rectangle in pixels.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClipRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
    pub inverse: bool,
}

fn emit_layer(
    images: &mut Vec<Image>,
    bm: &Arc<Bitmap>,
    x: i32,
    y: i32,
    colour: u32,
    clip: &ClipRect,
) {
    if bm.is_empty() {
        return;
    }
    let image = Image::new(bm.clone(), colour, x + bm.left, y + bm.top);
    emit_clipped(images, image, clip);
}

fn emit_clipped(images: &mut Vec<Image>, image: Image, clip: &ClipRect) {
    let (ix0, iy0) = (image.dst_x, image.dst_y);
    let (ix1, iy1) = (image.dst_x + image.w, image.dst_y + image.h);

    if !clip.inverse {
        let x0 = ix0.max(clip.x0);
        let y0 = iy0.max(clip.y0);
        let x1 = ix1.min(clip.x1);
        let y1 = iy1.min(clip.y1);
        if let Some(cropped) = image.crop(x0 - ix0, y0 - iy0, x1 - x0, y1 - y0) {
            images.push(cropped);
        }
        return;
    }

    // Inverse clip: up to four complementary windows.
    let strips = [
        (ix0, iy0, ix1, clip.y0.min(iy1)),               // above
        (ix0, clip.y1.max(iy0), ix1, iy1),               // below
        (ix0, clip.y0.max(iy0), clip.x0.min(ix1), clip.y1.min(iy1)), // left
        (clip.x1.max(ix0), clip.y0.max(iy0), ix1, clip.y1.min(iy1)), // right
    ];
    for (x0, y0, x1, y1) in strips {
        if let Some(cropped) = image.crop(x0 - ix0, y0 - iy0, x1 - x0, y1 - y0) {
            images.push(cropped);
        }
    }
}

impl Image {
    fn clone_with_color(&self, colour: u32) -> Image {
        let mut out = self.clone();
        out.color = colour;
        out
    }
}

/// Construct callback for the bitmap cache: restore the matrix, apply
/// it to both polylines (2D fast path when the perspective row is zero)
/// and rasterize.
pub fn construct_bitmap(engine: &dyn BitmapEngine, key: &BitmapKey) -> BitmapValue {
    let outline = &key.outline.0;
    let m = restore_transform(&key.matrix, &outline.cbox);

    let has_persp = key.matrix.z != (0, 0);
    let apply = |o: &sabre_raster::Outline| {
        if o.is_empty() {
            Some(sabre_raster::Outline::new())
        } else if has_persp {
            o.transform_3d(&m)
        } else {
            o.transform_2d(&m)
        }
    };

    let (Some(fill), Some(border)) = (apply(&outline.fill), apply(&outline.border)) else {
        return BitmapValue { bitmap: None };
    };
    let bitmap = sabre_raster::outlines_to_bitmap(engine, &fill, &border);
    BitmapValue {
        bitmap: Some(bitmap),
    }
}

fn rect_union(rect: &mut (i32, i32, i32, i32), bm: &Bitmap, pos: Vector) {
    let x = pos.x + bm.left;
    let y = pos.y + bm.top;
    rect.0 = rect.0.min(x);
    rect.1 = rect.1.min(y);
    rect.2 = rect.2.max(x + bm.w as i32);
    rect.3 = rect.3.max(y + bm.h as i32);
}

/// Construct callback for the composite cache: union the member
/// bitmaps per layer, apply BE and Gaussian blur, fix the outline
/// overlap, derive the shadow layer.
pub fn construct_composite(engine: &dyn BitmapEngine, key: &CompositeKey) -> CompositeValue {
    let mut rect = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    let mut rect_o = rect;
    let mut n_bm = 0usize;
    let mut n_bm_o = 0usize;
    let mut last: Option<(&Bitmap, Vector)> = None;
    let mut last_o: Option<(&Bitmap, Vector)> = None;

    for r in &key.bitmaps {
        if let Some(bm) = r.bm.raster() {
            if !bm.is_empty() {
                rect_union(&mut rect, bm, r.pos);
                last = Some((bm, r.pos));
                n_bm += 1;
            }
        }
        if let Some(bm) = r.bm_o.raster() {
            if !bm.is_empty() {
                rect_union(&mut rect_o, bm, r.pos_o);
                last_o = Some((bm, r.pos_o));
                n_bm_o += 1;
            }
        }
    }

    let bord = be_padding(key.filter.be);
    let combine = |rect: (i32, i32, i32, i32),
                   n: usize,
                   last: Option<(&Bitmap, Vector)>,
                   select: &dyn Fn(&BitmapRef) -> (Option<&Bitmap>, Vector)|
     -> Option<Bitmap> {
        if n == 0 {
            return None;
        }
        if bord == 0 && n == 1 {
            let (bm, pos) = last.unwrap();
            let mut out = engine.copy(bm);
            out.left += pos.x;
            out.top += pos.y;
            return Some(out);
        }
        let w = (rect.2 - rect.0 + 2 * bord) as usize;
        let h = (rect.3 - rect.1 + 2 * bord) as usize;
        let mut dst = engine.alloc(w, h);
        dst.left = rect.0 - bord;
        dst.top = rect.1 - bord;
        for r in &key.bitmaps {
            let (src, pos) = select(r);
            let Some(src) = src else { continue };
            if src.is_empty() {
                continue;
            }
            let x = (pos.x + src.left - dst.left) as usize;
            let y = (pos.y + src.top - dst.top) as usize;
            let stride = dst.stride;
            engine.add_bitmaps(
                &mut dst.buffer[y * stride + x..],
                stride,
                &src.buffer,
                src.stride,
                src.w,
                src.h,
            );
        }
        Some(dst)
    };

    let mut bm = combine(rect, n_bm, last, &|r| (r.bm.raster(), r.pos));
    let mut bm_o = combine(rect_o, n_bm_o, last_o, &|r| (r.bm_o.raster(), r.pos_o));

    let flags = key.filter.flags;
    let r2 = restore_blur(key.filter.blur);
    if !flags.contains(FilterFlags::NONZERO_BORDER) || flags.contains(FilterFlags::BORDER_STYLE_3)
    {
        if let Some(bm) = &mut bm {
            synth_blur(bm, key.filter.be, r2);
        }
    }
    if let Some(bm_o) = &mut bm_o {
        synth_blur(bm_o, key.filter.be, r2);
    }

    if !flags.contains(FilterFlags::FILL_IN_BORDER) && !flags.contains(FilterFlags::FILL_IN_SHADOW)
    {
        if let (Some(fill), Some(border)) = (&bm, &mut bm_o) {
            fix_outline(fill, border);
        }
    }

    let mut bm_s: Option<Bitmap> = None;
    if flags.contains(FilterFlags::NONZERO_SHADOW) {
        if flags.contains(FilterFlags::NONZERO_BORDER) {
            bm_s = bm_o.clone();
            if flags.contains(FilterFlags::FILL_IN_BORDER)
                && !flags.contains(FilterFlags::FILL_IN_SHADOW)
            {
                if let (Some(fill), Some(shadow)) = (&bm, &mut bm_s) {
                    fix_outline(fill, shadow);
                }
            }
        } else if flags.contains(FilterFlags::BORDER_STYLE_3) {
            bm_s = bm_o.take();
        } else {
            bm_s = bm.clone();
        }

        if let Some(shadow) = &mut bm_s {
            // '>>' rounds toward negative infinity and '&' keeps the
            // matching remainder, so negative offsets work out.
            shadow.left += key.filter.shadow.0 >> 6;
            shadow.top += key.filter.shadow.1 >> 6;
            shift_bitmap(
                shadow,
                key.filter.shadow.0 & SUBPIXEL_MASK,
                key.filter.shadow.1 & SUBPIXEL_MASK,
            );
        }
    }

    if flags.contains(FilterFlags::FILL_IN_SHADOW) && !flags.contains(FilterFlags::FILL_IN_BORDER)
    {
        if let (Some(fill), Some(border)) = (&bm, &mut bm_o) {
            fix_outline(fill, border);
        }
    }

    CompositeValue {
        bm: bm.map(Arc::new),
        bm_o: bm_o.map(Arc::new),
        bm_s: bm_s.map(Arc::new),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::construct_outline;
    use sabre_raster::engine::ScalarEngine;

    fn box_outline() -> Arc<OutlineValue> {
        Arc::new(construct_outline(&OutlineKey::Box))
    }

    fn identity_key(outline: Arc<OutlineValue>, shift_px: f64) -> BitmapKey {
        let m = [
            [1.0, 0.0, shift_px * 64.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ];
        let mut off = DVector::default();
        let (_, qm) = quantize_transform(m, &outline.cbox, &mut off, true).unwrap();
        BitmapKey {
            outline: OutlineRef(outline),
            matrix: qm,
        }
    }

    #[test]
    fn bitmap_construct_rasterizes_box() {
        let key = identity_key(box_outline(), 0.0);
        let v = construct_bitmap(&ScalarEngine, &key);
        let bm = v.bitmap.unwrap();
        assert_eq!((bm.w, bm.h), (1, 1));
        assert_eq!(bm.buffer[0], 255);
    }

    #[test]
    fn repeated_construction_is_equivalent() {
        let outline = box_outline();
        let k1 = identity_key(outline.clone(), 0.0);
        let k2 = identity_key(outline, 0.0);
        assert_eq!(k1, k2);
        let b1 = construct_bitmap(&ScalarEngine, &k1).bitmap.unwrap();
        let b2 = construct_bitmap(&ScalarEngine, &k2).bitmap.unwrap();
        assert_eq!(b1.buffer, b2.buffer);
    }

    fn handle(engine: &dyn BitmapEngine, key: &BitmapKey) -> BitmapHandle {
        BitmapHandle(Some(Arc::new(construct_bitmap(engine, key))))
    }

    #[test]
    fn composite_single_bitmap_is_copied_with_position() {
        let key = identity_key(box_outline(), 0.0);
        let bm = handle(&ScalarEngine, &key);
        let ck = CompositeKey {
            filter: FilterDesc::default(),
            bitmaps: vec![BitmapRef {
                bm,
                pos: Vector::new(5, 7),
                bm_o: BitmapHandle(None),
                pos_o: Vector::default(),
            }],
        };
        let v = construct_composite(&ScalarEngine, &ck);
        let out = v.bm.unwrap();
        assert_eq!((out.left, out.top), (5, 7));
        assert!(v.bm_o.is_none() && v.bm_s.is_none());
    }

    #[test]
    fn composite_unions_two_bitmaps() {
        let key = identity_key(box_outline(), 0.0);
        let a = handle(&ScalarEngine, &key);
        let b = handle(&ScalarEngine, &key);
        let ck = CompositeKey {
            filter: FilterDesc::default(),
            bitmaps: vec![
                BitmapRef {
                    bm: a,
                    pos: Vector::new(0, 0),
                    bm_o: BitmapHandle(None),
                    pos_o: Vector::default(),
                },
                BitmapRef {
                    bm: b,
                    pos: Vector::new(3, 0),
                    bm_o: BitmapHandle(None),
                    pos_o: Vector::default(),
                },
            ],
        };
        let v = construct_composite(&ScalarEngine, &ck);
        let out = v.bm.unwrap();
        assert_eq!(out.w, 4);
        assert_eq!(out.row(0)[0], 255);
        assert_eq!(out.row(0)[3], 255);
        assert_eq!(out.row(0)[1], 0);
    }

    #[test]
    fn composite_shadow_follows_offset() {
        let key = identity_key(box_outline(), 0.0);
        let bm = handle(&ScalarEngine, &key);
        let ck = CompositeKey {
            filter: FilterDesc {
                flags: FilterFlags::NONZERO_SHADOW | FilterFlags::FILL_IN_SHADOW,
                be: 0,
                blur: 0,
                shadow: (3 * 64, 2 * 64),
            },
            bitmaps: vec![BitmapRef {
                bm,
                pos: Vector::new(0, 0),
                bm_o: BitmapHandle(None),
                pos_o: Vector::default(),
            }],
        };
        let v = construct_composite(&ScalarEngine, &ck);
        let shadow = v.bm_s.unwrap();
        assert_eq!((shadow.left, shadow.top), (3, 2));
    }

    #[test]
    fn fix_outline_runs_without_fill_flags() {
        let key = identity_key(box_outline(), 0.0);
        let fill = handle(&ScalarEngine, &key);
        let border = handle(&ScalarEngine, &key);
        let ck = CompositeKey {
            filter: FilterDesc {
                flags: FilterFlags::NONZERO_BORDER,
                ..FilterDesc::default()
            },
            bitmaps: vec![BitmapRef {
                bm: fill,
                pos: Vector::default(),
                bm_o: border,
                pos_o: Vector::default(),
            }],
        };
        let v = construct_composite(&ScalarEngine, &ck);
        // Border completely covered by fill collapses to nothing.
        assert_eq!(v.bm_o.unwrap().buffer[0], 0);
        assert_eq!(v.bm.unwrap().buffer[0], 255);
    }
}

// this_file: crates/sabre-core/src/pipeline.rs

//! The per-event pipeline: validate, parse, shape, lay out, position,
//! render, combine. Each phase runs to completion; a failure releases
//! the per-event state and skips the event.

use std::sync::Arc;

use sabre_raster::geom::{f64_to_d6, Rect, Vector};

use crate::compose::ClipRect;
use crate::frame::EventImages;
use crate::layout::get_base_point;
use crate::outline::{OutlineKey, OutlineValue};
use crate::shape::{resolve_base_direction, split_style_runs, ComplexShaper, Shaper, SimpleShaper};
use crate::state::{EvtType, ScrollDir, VALIGN_CENTER, VALIGN_SUB, VALIGN_TOP};
use crate::text::{DecoFlags, GlyphInfo, MAX_GLYPHS};
use crate::track::{alpha_of, mult_alpha, with_alpha, Event, Track};
use crate::{Renderer, RenderError, Result, ShapingLevel};

/// First codepoint that rotates in vertical layout.
const VERTICAL_LOWER_BOUND: u32 = 0x2e80;

impl Renderer {
    /// Normalize the font size against the scale factors so animated
    /// sizes stay smooth and extreme scale/size combinations keep their
    /// product. Without hinting an arbitrary fixed face size is used.
    fn fix_glyph_scaling(&self, glyph: &mut GlyphInfo) {
        let ft_size = if self.settings.hinting == crate::Hinting::None {
            256.0
        } else {
            glyph.scale_y * glyph.font_size
        };
        let mul = glyph.font_size / ft_size;
        glyph.scale_fix = 1.0 / mul;
        glyph.scale_x *= mul;
        glyph.scale_y *= mul;
        glyph.font_size = ft_size;
    }

    /// Walk the event text: tag blocks mutate the render state, drawing
    /// runs collapse into one object-replacement cluster, every other
    /// character snapshots the state into a fresh glyph.
    fn parse_events(&mut self, track: &Track, event: &Event) -> Result<()> {
        let text = &event.text;
        let mut p = 0usize;

        loop {
            let mut drawing_text: Option<Arc<str>> = None;
            let mut code: Option<char> = None;

            while p < text.len() {
                let rest = &text[p..];
                if rest.starts_with('{') {
                    if let Some(end) = rest.find('}') {
                        let block = rest[1..end].to_string();
                        self.parse_tags(track, event, &block);
                        p += end + 1;
                        continue;
                    }
                }
                if self.state.drawing_scale > 0 {
                    let mut q = p;
                    if text[p..].starts_with('{') {
                        q += 1;
                    }
                    let stop = text[q..].find('{').map_or(text.len(), |i| q + i);
                    drawing_text = Some(text[p..stop].into());
                    code = Some('\u{fffc}');
                    p = stop;
                    break;
                }
                let (c, n) = self
                    .next_char(rest)
                    .expect("non-empty rest yields a char");
                p += n;
                code = Some(c);
                break;
            }

            let Some(code) = code else { break };

            let Some(face) = self.current_font() else {
                self.free_render_context();
                return Err(RenderError::NoFont(self.state.family.clone()));
            };

            if self.text_info.len() >= MAX_GLYPHS {
                self.free_render_context();
                return Err(RenderError::TooManyGlyphs);
            }

            let state = &self.state;
            let mut info = GlyphInfo {
                symbol: code,
                face: Some(face.clone()),
                ..GlyphInfo::default()
            };

            if let Some(d) = drawing_text {
                info.drawing_text = Some(d);
                info.drawing_scale = state.drawing_scale;
                info.drawing_pbo = state.pbo;
            }

            for i in 0..4 {
                let mut clr = state.c[i];
                info.a_pre_fade[i] = alpha_of(clr);
                // Fade only applies when positive, matching VSFilter.
                if state.fade > 0 {
                    clr = with_alpha(clr, mult_alpha(alpha_of(clr), state.fade as u8));
                }
                info.c[i] = clr;
            }

            info.effect_type = state.effect_type;
            info.effect_timing = state.effect_timing;
            info.effect_skip_timing = state.effect_skip_timing;
            info.karaoke_origin = state.karaoke_time_origin;
            info.font_size = state.font_size * self.font_scale;
            info.be = state.be;
            info.blur = state.blur;
            info.shadow_x = state.shadow_x;
            info.shadow_y = state.shadow_y;
            info.scale_x = state.scale_x;
            info.scale_y = state.scale_y;
            info.border_style = state.border_style;
            info.border_x = state.border_x;
            info.border_y = state.border_y;
            info.hspacing = state.hspacing;
            info.bold = state.bold;
            info.italic = state.italic;
            info.flags = state.flags;
            if face.is_vertical() && code as u32 >= VERTICAL_LOWER_BOUND {
                info.flags |= DecoFlags::ROTATE;
            }
            info.frx = state.frx;
            info.fry = state.fry;
            info.frz = state.frz;
            info.fax = state.fax;
            info.fay = state.fay;

            info.hspacing_scaled =
                f64_to_d6(info.hspacing * self.font_scale * info.scale_x);
            info.scale_fix = 1.0;

            if info.drawing_text.is_none() {
                self.fix_glyph_scaling(&mut info);
            }

            self.text_info.glyphs.push(info);

            self.state.effect_type = crate::text::Effect::None;
            self.state.effect_timing = 0;
            self.state.effect_skip_timing = 0;
            self.state.karaoke_time_origin = None;
        }

        Ok(())
    }

    /// Fetch an outline for one cluster part from the outline cache and
    /// fill the derived metrics on the cluster head.
    fn retrieve_part_outline(&mut self, head_idx: usize, part_idx: usize) {
        let info = self.text_info.glyphs[head_idx].clone();
        let part = info.parts[part_idx].clone();
        let simple = self.settings.shaper == ShapingLevel::Simple;

        let looked_up: Option<(Arc<OutlineValue>, (f64, f64), f64, i32, i32)> =
            if let Some(text) = &info.drawing_text {
                let key = OutlineKey::Drawing(text.clone());
                let v = self
                    .caches
                    .outline
                    .get_or_insert_with(&key, || crate::outline::construct_outline(&key));
                v.valid.then(|| {
                    let w = self.font_scale / (1u64 << (info.drawing_scale.max(1) - 1)) as f64;
                    let sc = (info.scale_x * w, info.scale_y * w);
                    let d = (64.0 * info.drawing_pbo) as i32;
                    let a = v.asc - d;
                    let offset_y = -(a as f64) * sc.1;
                    (v, sc, offset_y, a, d)
                })
            } else {
                let key = OutlineKey::Glyph(crate::outline::GlyphKey {
                    face: crate::font::FaceRef(info.face.clone().expect("validated in parse")),
                    size: info.font_size.to_bits(),
                    glyph_index: part.glyph_index,
                    bold: info.bold,
                    italic: info.italic,
                    flags: info.flags,
                });
                let v = self
                    .caches
                    .outline
                    .get_or_insert_with(&key, || crate::outline::construct_outline(&key));
                v.valid.then(|| {
                    let (a, d) = (v.asc, v.desc);
                    (v, (info.scale_x, info.scale_y), 0.0, a, d)
                })
            };
        let Some((value, scale, offset_y, asc, desc)) = looked_up else {
            return;
        };

        let g = &mut self.text_info.glyphs[head_idx];
        let advance = value.advance;
        let cbox = value.cbox;
        {
            let part = &mut g.parts[part_idx];
            part.outline = Some(value);
            part.scale = sabre_raster::geom::DVector::new(scale.0, scale.1);
            part.scale_offset = sabre_raster::geom::DVector::new(0.0, offset_y);
        }

        if part_idx == 0 {
            g.bbox = Rect {
                x_min: (cbox.x_min as f64 * scale.0).round() as i32,
                y_min: (cbox.y_min as f64 * scale.1 + offset_y).round() as i32,
                x_max: (cbox.x_max as f64 * scale.0).round() as i32,
                y_max: (cbox.y_max as f64 * scale.1 + offset_y).round() as i32,
            };
            g.asc = (asc as f64 * scale.1).round() as i32;
            g.desc = (desc as f64 * scale.1).round() as i32;
        }

        if g.drawing_text.is_some() || simple {
            let adv = (advance as f64 * scale.0).round() as i32;
            g.parts[part_idx].advance = Vector::new(adv, 0);
            if part_idx == 0 {
                g.cluster_advance = Vector::new(adv, 0);
            }
        }
    }

    /// Load outlines for every cluster, then apply the spacing fixes:
    /// italic-to-upright protrusion, letter spacing and shear-induced
    /// vertical advance.
    fn retrieve_glyphs(&mut self) {
        for i in 0..self.text_info.len() {
            for part_idx in 0..self.text_info.glyphs[i].parts.len() {
                self.retrieve_part_outline(i, part_idx);
            }

            let glyphs = &mut self.text_info.glyphs;
            if i > 0 && glyphs[i - 1].italic && !glyphs[i].italic {
                // Extend the last italic cluster over its protruding top.
                let mut back = i - 1;
                while back > 0
                    && glyphs[back].bbox.x_max - glyphs[back].bbox.x_min == 0
                    && glyphs[back].italic
                {
                    back -= 1;
                }
                let og = &mut glyphs[back];
                if og.bbox.x_max > og.cluster_advance.x {
                    og.cluster_advance.x = og.bbox.x_max;
                }
            }

            let info = &mut glyphs[i];
            info.cluster_advance.x += info.hspacing_scaled;
            if info.scale_x != 0.0 {
                info.cluster_advance.y +=
                    ((info.fay / info.scale_x * info.scale_y) * info.cluster_advance.x as f64)
                        as i32;
            }
        }
    }

    /// Place clusters at a running pen, 26.6.
    fn preliminary_layout(&mut self) {
        let mut pen = Vector::default();
        for info in &mut self.text_info.glyphs {
            info.pos = pen;
            let mut cluster_pen = pen;
            for part in &mut info.parts {
                part.pos = cluster_pen;
                cluster_pen.x += part.advance.x;
                cluster_pen.y += part.advance.y;
            }
            pen.x += info.cluster_advance.x;
            pen.y += info.cluster_advance.y;
        }
    }

    /// Re-lay clusters in visual order, re-stepping the pen at line
    /// breaks and resetting the shear accumulator on fay changes.
    fn reorder_text(&mut self, cmap: &[usize]) {
        let line_spacing = self.settings.line_spacing;
        let ti = &mut self.text_info;
        let mut pen = Vector::default();
        let mut lineno = 1usize;
        let mut last_pen_x = 0i32;
        let mut last_fay = 0.0f64;

        for i in 0..ti.glyphs.len() {
            let idx = cmap[i];
            let (scale_x, scale_y, fay) = {
                let g = &ti.glyphs[idx];
                (g.scale_x.max(1e-9), g.scale_y, g.fay)
            };
            if ti.glyphs[i].linebreak != 0 {
                pen.y -=
                    ((last_fay / scale_x * scale_y) * (pen.x - last_pen_x) as f64) as i32;
                pen.x = 0;
                last_pen_x = 0;
                pen.y += f64_to_d6(ti.lines[lineno - 1].desc);
                pen.y += f64_to_d6(ti.lines[lineno].asc);
                pen.y += f64_to_d6(line_spacing);
                lineno += 1;
            } else if last_fay != fay {
                pen.y -=
                    ((last_fay / scale_x * scale_y) * (pen.x - last_pen_x) as f64) as i32;
                last_pen_x = pen.x;
            }
            last_fay = fay;
            if ti.glyphs[idx].skip {
                continue;
            }
            let g = &mut ti.glyphs[idx];
            let mut cluster_pen = pen;
            for part in &mut g.parts {
                part.pos.x = part.offset.x + cluster_pen.x;
                part.pos.y = part.offset.y + cluster_pen.y;
                cluster_pen.x += part.advance.x;
                cluster_pen.y += part.advance.y;
            }
            g.pos.x = g.parts[0].offset.x + pen.x;
            g.pos.y = g.parts[0].offset.y + pen.y;
            pen.x += g.cluster_advance.x;
            pen.y += g.cluster_advance.y;
        }
    }

    /// Rotation origin: `\org` if given, else the alignment base point;
    /// every part's shift becomes its position relative to it.
    fn calculate_rotation_params(
        &mut self,
        bbox: &sabre_raster::geom::DRect,
        device_x: f64,
        device_y: f64,
    ) {
        let center = if self.state.have_origin {
            (
                self.x2scr_pos(self.state.org_x),
                self.y2scr_pos(self.state.org_y),
            )
        } else {
            let (bx, by) = get_base_point(bbox, self.state.alignment);
            (device_x + bx, device_y + by)
        };

        let border_scale = self.border_scale;
        let font_scale_x = self.font_scale_x;
        for info in &mut self.text_info.glyphs {
            let dx = device_x - center.0 + info.shadow_x * border_scale / font_scale_x;
            let dy = device_y - center.1 + info.shadow_y * border_scale;
            for part in &mut info.parts {
                part.shift.x = part.pos.x + f64_to_d6(dx);
                part.shift.y = part.pos.y + f64_to_d6(dy);
            }
        }
    }

    /// Render one event into positioned images.
    pub(crate) fn render_event(&mut self, track: &Track, event: &Event) -> Result<EventImages> {
        if event.style >= track.styles.len() {
            return Err(RenderError::BadStyleIndex(event.style));
        }
        if event.text.is_empty() {
            return Err(RenderError::EmptyEvent);
        }

        self.free_render_context();
        self.init_render_context(track, event);

        self.parse_events(track, event)?;

        if self.text_info.is_empty() {
            // Nothing but comments or tags.
            self.free_render_context();
            return Err(RenderError::EmptyEvent);
        }

        split_style_runs(&mut self.text_info.glyphs);

        // Shape.
        let base_rtl = resolve_base_direction(self.state.font_encoding);
        let shaper: &dyn Shaper = match self.settings.shaper {
            ShapingLevel::Simple => &SimpleShaper,
            ShapingLevel::Complex => &ComplexShaper,
        };
        if let Err(err) = shaper.shape(&mut self.text_info.glyphs, base_rtl) {
            log::warn!("failed to shape text: {err}");
            self.free_render_context();
            return Err(RenderError::ShapingFailed);
        }

        self.retrieve_glyphs();
        self.preliminary_layout();

        let valign = self.state.alignment & 12;

        let margin_l = if event.margin_l != 0 {
            event.margin_l
        } else {
            self.state.style.margin_l
        };
        let margin_r = if event.margin_r != 0 {
            event.margin_r
        } else {
            self.state.style.margin_r
        };
        let margin_v = if event.margin_v != 0 {
            event.margin_v
        } else {
            self.state.style.margin_v
        };

        let max_text_width = self.x2scr_right(self.play_res_x - margin_r as f64)
            - self.x2scr_left(margin_l as f64);

        self.wrap_lines_smart(max_text_width);

        // Karaoke depends on glyph x being monotonic within runs, so it
        // runs before reorder.
        self.process_karaoke_effects(event);

        let cmap = shaper.reorder(&self.text_info.glyphs, base_rtl);
        self.reorder_text(&cmap);

        self.align_lines(max_text_width);

        let bbox = self.compute_string_bbox();

        // Device origin. A positioned event may still scroll; the
        // scroll overrides the position on its axis.
        let mut device_x = 0.0;
        let mut device_y = 0.0;

        if self.state.evt_type.contains(EvtType::POSITIONED) {
            let (base_x, base_y) = get_base_point(&bbox, self.state.alignment);
            device_x = self.x2scr_pos(self.state.pos_x) - base_x;
            device_y = self.y2scr_pos(self.state.pos_y) - base_y;
        }

        if self.state.evt_type.contains(EvtType::HSCROLL) {
            match self.state.scroll_direction {
                ScrollDir::RightToLeft => {
                    device_x = self.x2scr_pos(self.play_res_x - self.state.scroll_shift);
                }
                ScrollDir::LeftToRight => {
                    device_x =
                        self.x2scr_pos(self.state.scroll_shift) - (bbox.x_max - bbox.x_min);
                }
                _ => {}
            }
        } else if !self.state.evt_type.contains(EvtType::POSITIONED) {
            device_x = self.x2scr_left(margin_l as f64);
        }

        if self.state.evt_type.contains(EvtType::VSCROLL) {
            match self.state.scroll_direction {
                ScrollDir::TopToBottom => {
                    device_y = self
                        .y2scr(self.state.scroll_y0 + self.state.scroll_shift)
                        - bbox.y_max;
                }
                ScrollDir::BottomToTop => {
                    device_y = self
                        .y2scr(self.state.scroll_y1 - self.state.scroll_shift)
                        - bbox.y_min;
                }
                _ => {}
            }
        } else if !self.state.evt_type.contains(EvtType::POSITIONED) {
            if valign == VALIGN_TOP {
                device_y = self.y2scr_top(margin_v as f64) + self.text_info.lines[0].asc;
            } else if valign == VALIGN_CENTER {
                let scr_y = self.y2scr(self.play_res_y / 2.0);
                device_y = scr_y - (bbox.y_max + bbox.y_min) / 2.0;
            } else {
                if valign != VALIGN_SUB {
                    log::debug!("invalid valign, assuming subtitle");
                }
                let line_pos = if self.state.explicit {
                    0.0
                } else {
                    self.settings.line_position
                };
                let scr_bottom = self.y2scr_sub(self.play_res_y - margin_v as f64);
                let scr_top = self.y2scr_top(0.0);
                device_y = scr_bottom + (scr_top - scr_bottom) * line_pos / 100.0;
                device_y -= self.text_info.height;
                device_y += self.text_info.lines[0].asc;
                // Keep a very high line position from flipping the
                // subtitle into a toptitle.
                let scr_y0 = scr_top + self.text_info.lines[0].asc;
                if device_y < scr_y0 && line_pos > 0.0 {
                    device_y = scr_y0;
                }
            }
        }

        // Clip rectangle in device pixels.
        let clip = self.resolve_clip();

        self.calculate_rotation_params(&bbox, device_x, device_y);

        let runs = self.render_and_combine_glyphs(device_x, device_y);

        let mut images = Vec::new();
        self.emit_images(&runs, &clip, &mut images);

        // Propagate the final combined origin into the auxiliary
        // per-glyph output. With no runs the y stays untouched.
        if let Some((last_run, _)) = runs.last() {
            let y = last_run.y as f64;
            for g in &mut self.text_info.glyphs {
                g.real_pos.y = y;
            }
        }

        let ti = &self.text_info;
        Ok(EventImages {
            images,
            top: (device_y - ti.lines[0].asc - ti.border_top as f64).round() as i32,
            height: (ti.height + ti.border_top as f64 + ti.border_bottom as f64).round() as i32,
            left: ((device_x + bbox.x_min) * self.font_scale_x - ti.border_x as f64).round()
                as i32,
            width: ((bbox.x_max - bbox.x_min) * self.font_scale_x + 2.0 * ti.border_x as f64)
                .round() as i32,
            detect_collisions: self.state.detect_collisions,
            shift_direction: if valign == VALIGN_TOP { 1 } else { -1 },
            layer: event.layer,
            read_order: event.read_order,
        })
    }

    fn resolve_clip(&mut self) -> ClipRect {
        let (x0, y0, x1, y1);
        if self.state.explicit || !self.settings.use_margins {
            let mut cx0 = self.x2scr_pos_scaled(self.state.clip_x0);
            let mut cx1 = self.x2scr_pos_scaled(self.state.clip_x1);
            let mut cy0 = self.y2scr_pos(self.state.clip_y0);
            let mut cy1 = self.y2scr_pos(self.state.clip_y1);

            if self.state.explicit {
                // Still clip against the screen boundary.
                let zx = self.x2scr_pos_scaled(0.0);
                let zy = self.y2scr_pos(0.0);
                let sx = self.x2scr_pos_scaled(self.play_res_x);
                let sy = self.y2scr_pos(self.play_res_y);
                cx0 = cx0.max(zx);
                cy0 = cy0.max(zy);
                cx1 = cx1.min(sx);
                cy1 = cy1.min(sy);
            }
            (x0, y0, x1, y1) = (cx0, cy0, cx1, cy1);
        } else {
            (x0, y0, x1, y1) = (
                0.0,
                0.0,
                self.settings.frame_width as f64,
                self.settings.frame_height as f64,
            );
        }

        let (mut y0, mut y1) = (y0, y1);
        if self.state.evt_type.contains(EvtType::VSCROLL) {
            y0 = y0.max(self.y2scr_pos(self.state.scroll_y0));
            y1 = y1.min(self.y2scr_pos(self.state.scroll_y1));
        }

        ClipRect {
            x0: x0.round() as i32,
            y0: y0.round() as i32,
            x1: x1.round() as i32,
            y1: y1.round() as i32,
            inverse: self.state.clip_mode != 0,
        }
    }

    /// Playback-resolution values used by the device mapping.
    pub(crate) fn start_track(&mut self, track: &Track, now: i64) {
        self.time = now;
        self.play_res_x = track.play_res_x as f64;
        self.play_res_y = track.play_res_y as f64;
    }
}

// this_file: crates/sabre-core/src/frame.rs

//! Frame assembly: active-event selection, layer ordering, collision
//! resolution and change detection.

use std::sync::Arc;

use crate::image::{ChangeLevel, Frame, GlyphData};
use crate::track::Track;
use crate::{Image, Renderer};

/// One rendered event with its collision box.
#[derive(Debug)]
pub(crate) struct EventImages {
    pub images: Vec<Image>,
    pub top: i32,
    pub height: i32,
    pub left: i32,
    pub width: i32,
    pub detect_collisions: bool,
    /// +1 moves down (toptitles), −1 moves up (subtitles).
    pub shift_direction: i32,
    pub layer: i32,
    pub read_order: i32,
}

/// Persistent per-event placement from an earlier frame; valid only
/// within one render generation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FixedRect {
    pub render_id: u64,
    pub top: i32,
    pub height: i32,
    pub left: i32,
    pub width: i32,
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
}

fn overlap(a: &Rect, b: &Rect) -> bool {
    !(a.y0 >= b.y1 || b.y0 >= a.y1 || a.x0 >= b.x1 || b.x0 >= a.x1)
}

/// Find a vertical shift making `s` disjoint from every fixed
/// rectangle, scanning in the event's shift direction, then register
/// the shifted rectangle as fixed.
fn fit_rect(s: &Rect, fixed: &mut Vec<Rect>, dir: i32) -> i32 {
    let mut shift = 0;
    if dir == 1 {
        for f in fixed.iter() {
            if s.y1 + shift <= f.y0 || s.y0 + shift >= f.y1 || s.x1 <= f.x0 || s.x0 >= f.x1 {
                continue;
            }
            shift = f.y1 - s.y0;
        }
    } else {
        for f in fixed.iter().rev() {
            if s.y1 + shift <= f.y0 || s.y0 + shift >= f.y1 || s.x1 <= f.x0 || s.x0 >= f.x1 {
                continue;
            }
            shift = f.y0 - s.y1;
        }
    }
    fixed.push(Rect {
        x0: s.x0,
        y0: s.y0 + shift,
        x1: s.x1,
        y1: s.y1 + shift,
    });
    fixed.sort_by_key(|r| r.y0);
    shift
}

impl Renderer {
    fn shift_event(&self, ei: &mut EventImages, shift: i32) {
        let frame_height = self.settings.frame_height;
        for img in &mut ei.images {
            img.shift_y(shift, frame_height);
        }
        ei.top += shift;
    }

    /// Resolve collisions within one layer: previously placed events
    /// keep their rectangles (when still valid), new ones are shifted
    /// into free space and remembered.
    pub(crate) fn fix_collisions(&mut self, imgs: &mut [EventImages]) {
        let mut used: Vec<Rect> = Vec::with_capacity(imgs.len());

        // Zero-area events collide with nothing and are effectively
        // fixed already.
        for ei in imgs.iter_mut() {
            if !ei.detect_collisions || ei.height <= 0 || ei.width <= 0 {
                continue;
            }
            let Some(prev) = self.collisions.get(&ei.read_order).copied() else {
                continue;
            };
            if prev.render_id != self.render_id || prev.height <= 0 {
                self.collisions.remove(&ei.read_order);
                continue;
            }
            let s = Rect {
                x0: prev.left,
                y0: prev.top,
                x1: prev.left + prev.width,
                y1: prev.top + prev.height,
            };
            let mut valid = prev.height == ei.height;
            if !valid {
                log::warn!("event height has changed");
            }
            if valid && used.iter().any(|u| overlap(&s, u)) {
                valid = false;
            }
            if valid {
                used.push(s);
                let shift = prev.top - ei.top;
                self.shift_event(ei, shift);
            } else {
                self.collisions.remove(&ei.read_order);
            }
        }
        used.sort_by_key(|r| r.y0);

        for ei in imgs.iter_mut() {
            if !ei.detect_collisions || ei.height <= 0 || ei.width <= 0 {
                continue;
            }
            if self.collisions.contains_key(&ei.read_order) {
                continue; // placed in the first pass
            }
            let s = Rect {
                x0: ei.left,
                y0: ei.top,
                x1: ei.left + ei.width,
                y1: ei.top + ei.height,
            };
            let shift = fit_rect(&s, &mut used, ei.shift_direction);
            if shift != 0 {
                self.shift_event(ei, shift);
            }
            self.collisions.insert(
                ei.read_order,
                FixedRect {
                    render_id: self.render_id,
                    top: ei.top,
                    height: ei.height,
                    left: ei.left,
                    width: ei.width,
                },
            );
        }
    }

    fn start_frame(&mut self, track: &Track, now: i64) -> bool {
        if self.settings.frame_width == 0 && self.settings.frame_height == 0 {
            return false;
        }
        if track.styles.is_empty() || track.events.is_empty() {
            return false;
        }

        self.start_track(track, now);

        // PAR correction; 0 derives it from frame vs storage aspect.
        let mut par = self.settings.par;
        if par == 0.0 {
            if self.settings.frame_width != 0
                && self.settings.frame_height != 0
                && self.settings.storage_width != 0
                && self.settings.storage_height != 0
            {
                let dar = self.settings.frame_width as f64 / self.settings.frame_height as f64;
                let sar =
                    self.settings.storage_width as f64 / self.settings.storage_height as f64;
                par = dar / sar;
            } else {
                par = 1.0;
            }
        }
        self.font_scale_x = par;

        self.prev_images_root = self.images_root.take();
        self.caches.trim();
        true
    }

    /// Render all events active at `now` into one ordered image list.
    pub fn render_frame(&mut self, track: &Track, now: i64) -> (Option<Arc<Frame>>, ChangeLevel) {
        if !self.start_frame(track, now) {
            return (None, ChangeLevel::ContentChanged);
        }

        let mut eimgs: Vec<EventImages> = Vec::new();
        for event in track.events.iter().filter(|e| e.is_active(now)) {
            match self.render_event(track, event) {
                Ok(ei) => eimgs.push(ei),
                Err(err) => log::warn!("skipping event: {err}"),
            }
        }

        eimgs.sort_by_key(|e| (e.layer, e.read_order));

        // Collision resolution per maximal same-layer run.
        let mut start = 0;
        for i in 1..=eimgs.len() {
            if i == eimgs.len() || eimgs[i].layer != eimgs[start].layer {
                self.fix_collisions(&mut eimgs[start..i]);
                start = i;
            }
        }

        let mut frame = Frame::default();
        for ei in eimgs {
            frame.images.extend(ei.images);
        }
        let frame = Arc::new(frame);
        self.images_root = Some(frame.clone());

        let change = Frame::detect_change(
            self.prev_images_root.as_deref(),
            Some(frame.as_ref()),
        );
        self.prev_images_root = None;

        (Some(frame), change)
    }

    /// Auxiliary output: per-glyph positions, boxes and raw outlines of
    /// the events active at `now` (the last rendered event's glyphs, as
    /// the working storage is shared).
    pub fn glyph_info(&mut self, track: &Track, now: i64) -> Vec<GlyphData> {
        if !self.start_frame(track, now) {
            return Vec::new();
        }

        let mut rendered = false;
        for event in track.events.iter().filter(|e| e.is_active(now)) {
            match self.render_event(track, event) {
                Ok(_) => rendered = true,
                Err(err) => log::warn!("skipping event: {err}"),
            }
        }
        if !rendered {
            return Vec::new();
        }

        let out = self
            .text_info
            .glyphs
            .iter()
            .map(|g| {
                let outline = g.parts[0].outline.as_ref();
                GlyphData {
                    pos_x: g.real_pos.x,
                    pos_y: g.real_pos.y,
                    bbox: g.bbox,
                    ascender: g.asc,
                    descender: g.desc,
                    points: outline.map_or_else(Vec::new, |o| o.fill.points.clone()),
                    segments: outline.map_or_else(Vec::new, |o| o.fill.segments.clone()),
                }
            })
            .collect();

        self.free_render_context();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::{Library, MemoryFontProvider, SquareFace};
    use crate::track::{Event, Style};

    fn renderer() -> Renderer {
        let mut provider = MemoryFontProvider::new();
        provider.add_face("Arial", false, false, Arc::new(SquareFace::new("Arial")));
        let library = Arc::new(Library::with_provider(Box::new(provider)));
        let mut r = Renderer::new(library).unwrap();
        r.set_frame_size(640, 480);
        r
    }

    fn track_with(events: Vec<Event>) -> Track {
        Track {
            play_res_x: 640,
            play_res_y: 480,
            styles: vec![Style::default()],
            events,
            ..Track::default()
        }
    }

    fn event(text: &str, start: i64, layer: i32, read_order: i32) -> Event {
        Event {
            start,
            duration: 1000,
            layer,
            read_order,
            text: text.into(),
            ..Event::default()
        }
    }

    #[test]
    fn inactive_events_render_nothing() {
        let mut r = renderer();
        let track = track_with(vec![event("Hi", 5000, 0, 0)]);
        let (frame, change) = r.render_frame(&track, 0);
        assert!(frame.unwrap().images.is_empty());
        // Empty frame following an empty history is no change at all.
        assert_eq!(change, ChangeLevel::Identical);
    }

    #[test]
    fn unconfigured_renderer_returns_nothing() {
        let mut provider = MemoryFontProvider::new();
        provider.add_face("Arial", false, false, Arc::new(SquareFace::new("Arial")));
        let library = Arc::new(Library::with_provider(Box::new(provider)));
        let mut r = Renderer::new(library).unwrap();
        let track = track_with(vec![event("Hi", 0, 0, 0)]);
        let (frame, change) = r.render_frame(&track, 0);
        assert!(frame.is_none());
        assert_eq!(change, ChangeLevel::ContentChanged);
    }

    #[test]
    fn layer_order_is_preserved() {
        let mut r = renderer();
        // Declared out of order: the layer-1 event must still come
        // first in the output list. One fill image each, colours made
        // distinct so the order is observable.
        let track = track_with(vec![
            event("{\\pos(100,100)\\bord0\\shad0\\1c&HFF0000&}a", 0, 5, 1),
            event("{\\pos(300,300)\\bord0\\shad0\\1c&H0000FF&}a", 0, 1, 2),
        ]);
        let (frame, _) = r.render_frame(&track, 500);
        let frame = frame.unwrap();
        assert_eq!(frame.images.len(), 2);
        // &H0000FF& is red in BGR, &HFF0000& is blue.
        assert_eq!(frame.images[0].color & !0xFF, 0xFF000000);
        assert_eq!(frame.images[1].color & !0xFF, 0x0000FF00);
    }

    #[test]
    fn identical_frames_report_no_change() {
        let mut r = renderer();
        let track = track_with(vec![event("Hello", 0, 0, 0)]);
        let (f1, c1) = r.render_frame(&track, 100);
        assert_eq!(c1, ChangeLevel::ContentChanged);
        let (f2, c2) = r.render_frame(&track, 200);
        assert_eq!(c2, ChangeLevel::Identical);
        let (a, b) = (f1.unwrap(), f2.unwrap());
        assert_eq!(a.images.len(), b.images.len());
    }

    #[test]
    fn move_changes_only_position() {
        let mut r = renderer();
        let track = track_with(vec![event("{\\move(0,0,100,0)}X", 0, 0, 0)]);
        let (_, c1) = r.render_frame(&track, 100);
        assert_eq!(c1, ChangeLevel::ContentChanged);
        let (_, c2) = r.render_frame(&track, 101);
        // One millisecond later the text moved but did not change.
        assert!(c2 <= ChangeLevel::PositionChanged);
        let (_, c3) = r.render_frame(&track, 500);
        assert_eq!(c3, ChangeLevel::PositionChanged);
    }

    #[test]
    fn colliding_events_are_separated() {
        let mut r = renderer();
        let track = track_with(vec![
            event("First line", 0, 0, 1),
            event("Second line", 0, 0, 2),
        ]);
        let (frame, _) = r.render_frame(&track, 100);
        let frame = frame.unwrap();
        assert!(!frame.images.is_empty());

        // Recompute boxes per event through the collision memory.
        let a = r.collisions.get(&1).copied().unwrap();
        let b = r.collisions.get(&2).copied().unwrap();
        let y_disjoint = a.top + a.height <= b.top || b.top + b.height <= a.top;
        let x_disjoint = a.left + a.width <= b.left || b.left + b.width <= a.left;
        assert!(y_disjoint || x_disjoint, "{a:?} vs {b:?}");
        // Subtitles shift up: the second event sits above the first.
        assert!(b.top + b.height <= a.top);
    }

    #[test]
    fn collision_placement_is_stable_across_frames() {
        let mut r = renderer();
        let track = track_with(vec![
            event("First line", 0, 0, 1),
            event("Second line", 0, 0, 2),
        ]);
        let (_, _) = r.render_frame(&track, 100);
        let before = r.collisions.get(&2).copied().unwrap();
        let (_, change) = r.render_frame(&track, 200);
        assert_eq!(change, ChangeLevel::Identical);
        let after = r.collisions.get(&2).copied().unwrap();
        assert_eq!(before.top, after.top);
    }

    #[test]
    fn frame_size_change_invalidates_collision_memory() {
        let mut r = renderer();
        let track = track_with(vec![
            event("First line", 0, 0, 1),
            event("Second line", 0, 0, 2),
        ]);
        let _ = r.render_frame(&track, 100);
        assert!(!r.collisions.is_empty());
        r.set_frame_size(1280, 720);
        let _ = r.render_frame(&track, 200);
        // Old-generation rectangles were dropped and re-created.
        assert!(r
            .collisions
            .values()
            .all(|f| f.render_id == r.render_id));
    }

    #[test]
    fn glyph_info_exposes_outline_data() {
        let mut r = renderer();
        let track = track_with(vec![event("Hi", 0, 0, 0)]);
        let glyphs = r.glyph_info(&track, 100);
        assert_eq!(glyphs.len(), 2);
        assert!(glyphs[0].pos_x < glyphs[1].pos_x);
        assert!(!glyphs[0].points.is_empty());
        assert!(glyphs[0].ascender > 0);
    }
}

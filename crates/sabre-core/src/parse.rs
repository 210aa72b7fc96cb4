// this_file: crates/sabre-core/src/parse.rs

//! Override-tag interpretation, escapes and transition effects.
//!
//! `{...}` blocks mutate the render state between characters. Tag
//! arguments follow VSFilter conventions: a missing numeric argument
//! resets the field to its style value.

use crate::state::{EvtType, ScrollDir};
use crate::text::Effect;
use crate::track::{alpha_of, with_alpha, Event, Style, Track};
use crate::Renderer;

/// Does the text carry an override that forces explicit positioning?
pub(crate) fn event_has_hard_overrides(text: &str) -> bool {
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            return false;
        };
        let block = &rest[start + 1..start + end];
        if block.contains("\\pos") || block.contains("\\move") {
            return true;
        }
        rest = &rest[start + end + 1..];
    }
    false
}

/// Piecewise-linear alpha envelope used by `\fade`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn interpolate_alpha(
    now: i64,
    t1: i64,
    t2: i64,
    t3: i64,
    t4: i64,
    a1: i64,
    a2: i64,
    a3: i64,
) -> i32 {
    let a = if now < t1 {
        a1
    } else if now < t2 && t2 > t1 {
        a1 + (a2 - a1) * (now - t1) / (t2 - t1)
    } else if now < t3 {
        a2
    } else if now < t4 && t4 > t3 {
        a2 + (a3 - a2) * (now - t3) / (t4 - t3)
    } else {
        a3
    };
    a.clamp(0, 255) as i32
}

/// Parse `&HBBGGRR&` (or bare hex) into the RGB part of a packed RGBA
/// colour.
fn parse_colour_arg(arg: &str) -> Option<u32> {
    let hex: String = arg
        .trim()
        .trim_start_matches('&')
        .trim_start_matches(['H', 'h'])
        .trim_end_matches('&')
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    let bgr = u32::from_str_radix(&hex, 16).ok()?;
    let (b, g, r) = ((bgr >> 16) & 0xFF, (bgr >> 8) & 0xFF, bgr & 0xFF);
    Some((r << 24) | (g << 16) | (b << 8))
}

fn parse_alpha_arg(arg: &str) -> Option<u8> {
    let hex: String = arg
        .trim()
        .trim_start_matches('&')
        .trim_start_matches(['H', 'h'])
        .trim_end_matches('&')
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u32::from_str_radix(&hex, 16).ok().map(|v| v.min(255) as u8)
}

/// One `\tag` with its raw argument text.
struct Tag<'a> {
    name: &'a str,
    args: &'a str,
}

impl<'a> Tag<'a> {
    fn num(&self) -> Option<f64> {
        let s = self.args.trim();
        let end = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
            .unwrap_or(s.len());
        s[..end].parse().ok()
    }

    fn int(&self) -> Option<i64> {
        self.num().map(|v| v as i64)
    }

    /// Comma-separated parenthesized arguments.
    fn list(&self) -> Vec<&'a str> {
        let s = self.args.trim();
        let Some(inner) = s.strip_prefix('(') else {
            return Vec::new();
        };
        let inner = inner.strip_suffix(')').unwrap_or(inner);
        inner.split(',').map(str::trim).collect()
    }

    fn floats(&self) -> Vec<f64> {
        self.list()
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect()
    }
}

/// Split a tag block into `\`-separated tags, respecting parentheses so
/// `\t(...)` arguments survive intact.
fn split_tags(block: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = block.as_bytes();
    let mut depth = 0usize;
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'\\' if depth == 0 => {
                if let Some(s) = start {
                    out.push(&block[s..i]);
                }
                start = Some(i + 1);
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push(&block[s..]);
    }
    out
}

const TAG_NAMES: &[&str] = &[
    "alpha", "iclip", "xbord", "ybord", "xshad", "yshad", "blur", "bord", "clip", "fade", "move",
    "fscx", "fscy", "shad", "fad", "fax", "fay", "frx", "fry", "frz", "fsc", "fsp", "org", "pbo",
    "pos", "an", "be", "fe", "fn", "fr", "fs", "kf", "ko", "kt", "1a", "2a", "3a", "4a", "1c",
    "2c", "3c", "4c", "a", "b", "c", "i", "k", "K", "p", "q", "r", "s", "t", "u",
];

fn match_tag(text: &str) -> Option<Tag<'_>> {
    for name in TAG_NAMES {
        if let Some(args) = text.strip_prefix(name) {
            // Case-sensitive where it matters (\K vs \k); tag names are
            // matched longest-first.
            return Some(Tag { name, args });
        }
    }
    None
}

impl Renderer {
    /// Interpret one `{...}` block.
    pub(crate) fn parse_tags(&mut self, track: &Track, event: &Event, block: &str) {
        for raw in split_tags(block) {
            let Some(tag) = match_tag(raw) else {
                continue; // comments and unknown tags
            };
            self.apply_tag(track, event, &tag);
        }
    }

    fn apply_tag(&mut self, track: &Track, event: &Event, tag: &Tag<'_>) {
        let style = self.state.style.clone();
        match tag.name {
            "xbord" => {
                self.state.border_x = tag.num().unwrap_or(style.outline).max(0.0);
            }
            "ybord" => {
                self.state.border_y = tag.num().unwrap_or(style.outline).max(0.0);
            }
            "bord" => {
                let v = tag.num().unwrap_or(style.outline).max(0.0);
                self.state.border_x = v;
                self.state.border_y = v;
            }
            "xshad" => {
                self.state.shadow_x = tag.num().unwrap_or(style.shadow);
            }
            "yshad" => {
                self.state.shadow_y = tag.num().unwrap_or(style.shadow);
            }
            "shad" => {
                let v = tag.num().unwrap_or(style.shadow);
                self.state.shadow_x = v;
                self.state.shadow_y = v;
            }
            "be" => {
                self.state.be = tag.int().unwrap_or(0).clamp(0, 127) as i32;
            }
            "blur" => {
                self.state.blur = tag.num().unwrap_or(style.blur).max(0.0);
            }
            "fn" => {
                let name = tag.args.trim();
                self.state.family = if name.is_empty() {
                    style.font_name.clone()
                } else {
                    name.to_string()
                };
                self.update_font();
            }
            "fs" => {
                let arg = tag.args.trim();
                self.state.font_size = if let Some(rel) = arg.strip_prefix('+') {
                    rel.parse::<f64>()
                        .map_or(style.font_size, |d| self.state.font_size * (1.0 + d / 10.0))
                } else if arg.starts_with('-') {
                    arg.parse::<f64>()
                        .map_or(style.font_size, |d| self.state.font_size * (1.0 + d / 10.0))
                        .max(1.0)
                } else {
                    tag.num().unwrap_or(style.font_size)
                };
                if self.state.font_size <= 0.0 {
                    self.state.font_size = style.font_size;
                }
            }
            "fscx" => {
                self.state.scale_x = tag.num().unwrap_or(style.scale_x * 100.0).max(0.0) / 100.0;
            }
            "fscy" => {
                self.state.scale_y = tag.num().unwrap_or(style.scale_y * 100.0).max(0.0) / 100.0;
            }
            "fsc" => {
                self.state.scale_x = style.scale_x;
                self.state.scale_y = style.scale_y;
            }
            "fsp" => {
                self.state.hspacing = tag.num().unwrap_or(style.spacing);
            }
            "fr" | "frz" => {
                self.state.frz = tag.num().unwrap_or(style.angle);
            }
            "frx" => {
                self.state.frx = tag.num().unwrap_or(0.0);
            }
            "fry" => {
                self.state.fry = tag.num().unwrap_or(0.0);
            }
            "fax" => {
                self.state.fax = tag.num().unwrap_or(0.0);
            }
            "fay" => {
                self.state.fay = tag.num().unwrap_or(0.0);
            }
            "fe" => {
                self.state.font_encoding = tag.int().unwrap_or(style.encoding as i64) as i32;
            }
            "b" => {
                let v = tag.int().unwrap_or(-1);
                self.state.bold = match v {
                    0 => false,
                    1 => true,
                    v if v >= 400 => v >= 700,
                    _ => style.bold,
                };
                self.update_font();
            }
            "i" => {
                self.state.italic = match tag.int() {
                    Some(0) => false,
                    Some(1) => true,
                    _ => style.italic,
                };
                self.update_font();
            }
            "u" => {
                let on = matches!(tag.int(), Some(1)) || (tag.int().is_none() && style.underline);
                self.state.flags.set(crate::text::DecoFlags::UNDERLINE, on);
            }
            "s" => {
                let on = matches!(tag.int(), Some(1)) || (tag.int().is_none() && style.strike_out);
                self.state
                    .flags
                    .set(crate::text::DecoFlags::STRIKETHROUGH, on);
            }
            "c" | "1c" => self.change_colour(0, tag, style.primary_colour),
            "2c" => self.change_colour(1, tag, style.secondary_colour),
            "3c" => self.change_colour(2, tag, style.outline_colour),
            "4c" => self.change_colour(3, tag, style.back_colour),
            "alpha" => match parse_alpha_arg(tag.args) {
                Some(a) => {
                    for c in &mut self.state.c {
                        *c = with_alpha(*c, a);
                    }
                }
                None => {
                    let defaults = [
                        style.primary_colour,
                        style.secondary_colour,
                        style.outline_colour,
                        style.back_colour,
                    ];
                    for (c, d) in self.state.c.iter_mut().zip(defaults) {
                        *c = with_alpha(*c, alpha_of(d));
                    }
                }
            },
            "1a" => self.change_alpha_component(0, tag, style.primary_colour),
            "2a" => self.change_alpha_component(1, tag, style.secondary_colour),
            "3a" => self.change_alpha_component(2, tag, style.outline_colour),
            "4a" => self.change_alpha_component(3, tag, style.back_colour),
            "an" => {
                let v = tag.int().unwrap_or(0);
                if (1..=9).contains(&v) && !self.state.alignment_set {
                    self.state.alignment = crate::state::numpad2align(v as i32);
                    self.state.alignment_set = true;
                }
            }
            "a" => {
                // Legacy alignment values are the internal encoding.
                let v = tag.int().unwrap_or(0);
                if (1..=11).contains(&v) && !self.state.alignment_set {
                    self.state.alignment = v as i32;
                    self.state.alignment_set = true;
                }
            }
            "pos" => {
                let v = tag.floats();
                if v.len() == 2 && !self.state.evt_type.contains(EvtType::POSITIONED) {
                    self.state.evt_type |= EvtType::POSITIONED;
                    self.state.detect_collisions = false;
                    self.state.pos_x = v[0];
                    self.state.pos_y = v[1];
                }
            }
            "move" => {
                let v = tag.floats();
                if (v.len() == 4 || v.len() == 6)
                    && !self.state.evt_type.contains(EvtType::POSITIONED)
                {
                    let (mut t1, mut t2) = (0.0, 0.0);
                    if v.len() == 6 {
                        t1 = v[4];
                        t2 = v[5];
                    }
                    if t1 <= 0.0 && t2 <= 0.0 {
                        t1 = 0.0;
                        t2 = event.duration as f64;
                    }
                    let now = (self.time - event.start) as f64;
                    let k = if now < t1 {
                        0.0
                    } else if now >= t2 {
                        1.0
                    } else {
                        (now - t1) / (t2 - t1)
                    };
                    self.state.evt_type |= EvtType::POSITIONED;
                    self.state.detect_collisions = false;
                    self.state.pos_x = v[0] + k * (v[2] - v[0]);
                    self.state.pos_y = v[1] + k * (v[3] - v[1]);
                }
            }
            "org" => {
                let v = tag.floats();
                if v.len() == 2 && !self.state.have_origin {
                    self.state.org_x = v[0];
                    self.state.org_y = v[1];
                    self.state.have_origin = true;
                }
            }
            "fad" | "fade" => {
                let v = tag.floats();
                let now = self.time - event.start;
                let dur = event.duration;
                self.state.fade = if tag.name == "fad" && v.len() == 2 {
                    interpolate_alpha(
                        now,
                        0,
                        v[0] as i64,
                        dur - v[1] as i64,
                        dur,
                        255,
                        0,
                        255,
                    )
                } else if v.len() == 7 {
                    interpolate_alpha(
                        now,
                        v[3] as i64,
                        v[4] as i64,
                        v[5] as i64,
                        v[6] as i64,
                        v[0] as i64,
                        v[1] as i64,
                        v[2] as i64,
                    )
                } else {
                    self.state.fade
                };
            }
            "k" => self.set_karaoke(Effect::Karaoke, tag),
            "K" | "kf" => self.set_karaoke(Effect::KaraokeKF, tag),
            "ko" => self.set_karaoke(Effect::KaraokeKO, tag),
            "kt" => {
                if let Some(v) = tag.int() {
                    self.state.karaoke_time_origin = Some(v * 10);
                }
            }
            "q" => {
                let v = tag.int().unwrap_or(-1);
                self.state.wrap_style = if (0..=3).contains(&v) {
                    v as i32
                } else {
                    track.wrap_style
                };
            }
            "r" => {
                let name = tag.args.trim();
                let rstyle = if name.is_empty() {
                    None
                } else {
                    match track.style_by_name(name) {
                        Some(idx) => Some(track.styles[idx].clone()),
                        None => {
                            log::warn!("no style named {name:?} for \\r");
                            None
                        }
                    }
                };
                self.reset_render_context(track, event, rstyle.as_ref());
            }
            "p" => {
                self.state.drawing_scale = tag.int().unwrap_or(0).clamp(0, 30) as i32;
            }
            "pbo" => {
                self.state.pbo = tag.num().unwrap_or(0.0);
            }
            "clip" | "iclip" => {
                let v = tag.floats();
                if v.len() == 4 {
                    self.state.clip_x0 = v[0].min(v[2]);
                    self.state.clip_y0 = v[1].min(v[3]);
                    self.state.clip_x1 = v[0].max(v[2]);
                    self.state.clip_y1 = v[1].max(v[3]);
                    self.state.clip_mode = i32::from(tag.name == "iclip");
                } else {
                    // Vector clip drawings are not supported; the block
                    // is ignored rather than mis-clipped.
                    log::debug!("ignoring vector \\{} argument", tag.name);
                }
            }
            "t" => {
                // Animated transforms are not part of this renderer.
                log::trace!("ignoring \\t block");
            }
            _ => {}
        }
    }

    fn change_colour(&mut self, idx: usize, tag: &Tag<'_>, style_default: u32) {
        let alpha = alpha_of(self.state.c[idx]);
        let rgb = parse_colour_arg(tag.args).unwrap_or(style_default & !0xFF);
        self.state.c[idx] = with_alpha(rgb, alpha);
    }

    fn change_alpha_component(&mut self, idx: usize, tag: &Tag<'_>, style_default: u32) {
        let a = parse_alpha_arg(tag.args).unwrap_or(alpha_of(style_default));
        self.state.c[idx] = with_alpha(self.state.c[idx], a);
    }

    fn set_karaoke(&mut self, effect: Effect, tag: &Tag<'_>) {
        let v = tag.int().unwrap_or(100);
        if self.state.effect_timing != 0 {
            self.state.effect_skip_timing += self.state.effect_timing;
        }
        self.state.effect_type = effect;
        self.state.effect_timing = v * 10;
    }

    /// Interpret the event `Effect` field (banner/scroll transitions).
    pub(crate) fn apply_transition_effects(&mut self, _track: &Track, event: &Event) {
        let effect = event.effect.trim();
        if effect.is_empty() {
            return;
        }
        let args: Vec<i64> = effect
            .split(';')
            .skip(1)
            .map(|a| a.trim().parse().unwrap_or(0))
            .collect();
        let lower = effect.to_ascii_lowercase();

        if lower.starts_with("banner;") {
            if args.is_empty() {
                log::warn!("ignoring malformed Banner effect");
                return;
            }
            let delay = args[0].max(1);
            self.state.scroll_direction = if args.get(1) == Some(&1) {
                ScrollDir::LeftToRight
            } else {
                ScrollDir::RightToLeft
            };
            self.state.scroll_shift = (self.time - event.start) as f64 / delay as f64;
            self.state.evt_type |= EvtType::HSCROLL;
            self.state.detect_collisions = false;
            self.state.wrap_style = 2;
        } else if lower.starts_with("scroll up;") || lower.starts_with("scroll down;") {
            if args.len() < 3 {
                log::warn!("ignoring malformed Scroll effect");
                return;
            }
            self.state.scroll_direction = if lower.starts_with("scroll up;") {
                ScrollDir::BottomToTop
            } else {
                ScrollDir::TopToBottom
            };
            let delay = args[2].max(1);
            self.state.scroll_shift = (self.time - event.start) as f64 / delay as f64;
            self.state.scroll_y0 = args[0].min(args[1]) as f64;
            self.state.scroll_y1 = args[0].max(args[1]) as f64;
            self.state.evt_type |= EvtType::VSCROLL;
            self.state.detect_collisions = false;
        }
    }

    /// Next character of the event text outside tag blocks, handling
    /// `\N`, `\n` and `\h` escapes. Returns the char and bytes consumed.
    pub(crate) fn next_char(&self, text: &str) -> Option<(char, usize)> {
        let mut chars = text.chars();
        let first = chars.next()?;
        if first == '\\' {
            match chars.next() {
                Some('N') => return Some(('\n', 2)),
                Some('n') => {
                    let c = if self.state.wrap_style == 2 { '\n' } else { ' ' };
                    return Some((c, 2));
                }
                Some('h') => return Some(('\u{a0}', 2)),
                _ => {}
            }
        }
        Some((first, first.len_utf8()))
    }
}

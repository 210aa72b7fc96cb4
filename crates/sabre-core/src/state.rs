// this_file: crates/sabre-core/src/state.rs

//! Mutable per-event render state, selective style overrides and the
//! font/border/blur scale derivation.

use bitflags::bitflags;

use std::sync::Arc;

use crate::font::Face;
use crate::text::{DecoFlags, Effect};
use crate::track::{Event, Style, Track};
use crate::Renderer;

bitflags! {
    /// Selective style override requests (`set_selective_style_override_enabled`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OverrideBits: u32 {
        const STYLE = 1 << 1;
        const SELECTIVE_FONT_SCALE = 1 << 2;
        const FONT_SIZE_FIELDS = 1 << 3;
        const FONT_NAME = 1 << 4;
        const COLORS = 1 << 5;
        const ATTRIBUTES = 1 << 6;
        const BORDER = 1 << 7;
        const ALIGNMENT = 1 << 8;
        const MARGINS = 1 << 9;
        const FULL_STYLE = 1 << 10;
        const JUSTIFY = 1 << 11;
    }
}

bitflags! {
    /// Event placement category; scroll effects may combine with an
    /// explicit position.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EvtType: u32 {
        const POSITIONED = 1;
        const HSCROLL = 2;
        const VSCROLL = 4;
    }
}

// Internal alignment encoding (legacy SSA): low two bits horizontal,
// bits 2/3 vertical.
pub(crate) const HALIGN_LEFT: i32 = 1;
pub(crate) const HALIGN_CENTER: i32 = 2;
pub(crate) const HALIGN_RIGHT: i32 = 3;
pub(crate) const VALIGN_SUB: i32 = 0;
pub(crate) const VALIGN_TOP: i32 = 4;
pub(crate) const VALIGN_CENTER: i32 = 8;

/// Convert numpad alignment (1–9, as scripts carry it) to the internal
/// legacy encoding.
pub(crate) fn numpad2align(val: i32) -> i32 {
    let val = val.clamp(1, 9);
    let h = ((val - 1) % 3) + 1;
    let v = match (val - 1) / 3 {
        0 => VALIGN_SUB,
        1 => VALIGN_CENTER,
        _ => VALIGN_TOP,
    };
    v + h
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollDir {
    #[default]
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

/// Working state of the per-event pipeline; reset per event, mutated by
/// override tags as characters are consumed.
#[derive(Debug, Clone, Default)]
pub struct RenderState {
    pub style: Style,
    pub evt_type: EvtType,
    pub wrap_style: i32,

    pub pos_x: f64,
    pub pos_y: f64,
    pub org_x: f64,
    pub org_y: f64,
    pub have_origin: bool,

    pub clip_x0: f64,
    pub clip_y0: f64,
    pub clip_x1: f64,
    pub clip_y1: f64,
    /// 0 = normal clip, 1 = inverse clip.
    pub clip_mode: i32,

    pub detect_collisions: bool,
    pub fade: i32,

    pub drawing_scale: i32,
    pub pbo: f64,

    pub effect_type: Effect,
    pub effect_timing: i64,
    pub effect_skip_timing: i64,
    /// Absolute-time karaoke (`\kt`) origin override, ms.
    pub karaoke_time_origin: Option<i64>,

    pub c: [u32; 4],
    pub flags: DecoFlags,
    pub font_size: f64,
    pub family: String,
    pub bold: bool,
    pub italic: bool,
    pub font: Option<Arc<dyn Face>>,

    pub border_style: i32,
    pub border_x: f64,
    pub border_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub hspacing: f64,
    pub be: i32,
    pub blur: f64,
    pub shadow_x: f64,
    pub shadow_y: f64,
    pub frx: f64,
    pub fry: f64,
    pub frz: f64,
    pub fax: f64,
    pub fay: f64,
    pub font_encoding: i32,

    pub alignment: i32,
    /// An alignment tag already fired; later ones are ignored.
    pub alignment_set: bool,
    pub justify: i32,

    /// Positioned or hard-overridden event; suppresses margin handling
    /// and most selective overrides.
    pub explicit: bool,
    pub apply_font_scale: bool,
    pub overrides: OverrideBits,

    pub scroll_direction: ScrollDir,
    pub scroll_shift: f64,
    pub scroll_y0: f64,
    pub scroll_y1: f64,
}

impl Renderer {
    /// Produce the merged effective style from the script style, the
    /// user override style and the requested override bits. User values
    /// are specified against PlayResY=288 and rescaled. Explicit events
    /// suppress everything except the selective font scale.
    pub(crate) fn handle_selective_style_overrides(
        &mut self,
        track: &Track,
        event: &Event,
        rstyle: Option<&Style>,
    ) -> Style {
        let script = &track.styles[event.style.min(track.styles.len() - 1)];
        let rstyle = rstyle.unwrap_or(script);
        let user = &self.settings.user_override_style;
        let mut requested = self.settings.selective_style_overrides;
        let explicit = self.state.explicit;

        let mut merged = rstyle.clone();

        self.state.apply_font_scale =
            !explicit || !requested.contains(OverrideBits::SELECTIVE_FONT_SCALE);

        if explicit {
            requested = OverrideBits::empty();
        }

        if requested.contains(OverrideBits::STYLE) {
            requested |= OverrideBits::FONT_NAME
                | OverrideBits::FONT_SIZE_FIELDS
                | OverrideBits::COLORS
                | OverrideBits::BORDER
                | OverrideBits::ATTRIBUTES;
        }

        if requested.contains(OverrideBits::FULL_STYLE) {
            merged = user.clone();
        }

        // User values are against PlayResY=288.
        let scale = track.play_res_y as f64 / 288.0;

        if requested.contains(OverrideBits::FONT_SIZE_FIELDS) {
            merged.font_size = user.font_size * scale;
            merged.spacing = user.spacing * scale;
            merged.scale_x = user.scale_x;
            merged.scale_y = user.scale_y;
        }

        if requested.contains(OverrideBits::FONT_NAME) {
            merged.font_name = user.font_name.clone();
        }

        if requested.contains(OverrideBits::COLORS) {
            merged.primary_colour = user.primary_colour;
            merged.secondary_colour = user.secondary_colour;
            merged.outline_colour = user.outline_colour;
            merged.back_colour = user.back_colour;
        }

        if requested.contains(OverrideBits::ATTRIBUTES) {
            merged.bold = user.bold;
            merged.italic = user.italic;
            merged.underline = user.underline;
            merged.strike_out = user.strike_out;
        }

        if requested.contains(OverrideBits::BORDER) {
            merged.border_style = user.border_style;
            merged.outline = user.outline * scale;
            merged.shadow = user.shadow * scale;
        }

        if requested.contains(OverrideBits::ALIGNMENT) {
            merged.alignment = user.alignment;
        }

        if requested.contains(OverrideBits::JUSTIFY) {
            merged.justify = user.justify;
        }

        if requested.contains(OverrideBits::MARGINS) {
            merged.margin_l = user.margin_l;
            merged.margin_r = user.margin_r;
            merged.margin_v = user.margin_v;
        }

        if merged.font_name.is_empty() {
            merged.font_name = rstyle.font_name.clone();
        }

        self.state.overrides = requested;
        merged
    }

    /// Derive font, border and blur scales for the current event.
    pub(crate) fn init_font_scale(&mut self, track: &Track) {
        let font_scr_h = if !self.state.explicit && self.settings.use_margins {
            self.fit_height()
        } else {
            self.orig_height()
        };

        self.font_scale = font_scr_h / track.play_res_y as f64;
        self.blur_scale = if self.settings.storage_height != 0 {
            font_scr_h / self.settings.storage_height as f64
        } else {
            font_scr_h / track.play_res_y as f64
        };
        self.border_scale = if track.scaled_border_and_shadow {
            font_scr_h / track.play_res_y as f64
        } else {
            self.blur_scale
        };

        if self.state.apply_font_scale {
            self.font_scale *= self.settings.font_size_coeff;
            self.border_scale *= self.settings.font_size_coeff;
            self.blur_scale *= self.settings.font_size_coeff;
        }
    }

    /// Partially reset the render state to style values; `\r` behavior.
    pub(crate) fn reset_render_context(
        &mut self,
        track: &Track,
        event: &Event,
        rstyle: Option<&Style>,
    ) {
        let style = self.handle_selective_style_overrides(track, event, rstyle);
        self.state.style = style;
        self.init_font_scale(track);

        let style = &self.state.style;
        self.state.c = [
            style.primary_colour,
            style.secondary_colour,
            style.outline_colour,
            style.back_colour,
        ];
        self.state.flags = DecoFlags::empty();
        if style.underline {
            self.state.flags |= DecoFlags::UNDERLINE;
        }
        if style.strike_out {
            self.state.flags |= DecoFlags::STRIKETHROUGH;
        }
        self.state.font_size = style.font_size;
        self.state.family = style.font_name.clone();
        self.state.bold = style.bold;
        self.state.italic = style.italic;
        self.update_font();

        let style = &self.state.style;
        self.state.border_style = style.border_style;
        self.state.border_x = style.outline;
        self.state.border_y = style.outline;
        self.state.scale_x = style.scale_x;
        self.state.scale_y = style.scale_y;
        self.state.hspacing = style.spacing;
        self.state.be = 0;
        self.state.blur = style.blur;
        self.state.shadow_x = style.shadow;
        self.state.shadow_y = style.shadow;
        self.state.frx = 0.0;
        self.state.fry = 0.0;
        self.state.frz = style.angle;
        self.state.fax = 0.0;
        self.state.fay = 0.0;
        self.state.font_encoding = style.encoding;
    }

    /// Start a new event: reset everything, apply transition effects,
    /// decide whether the event is explicit.
    pub(crate) fn init_render_context(&mut self, track: &Track, event: &Event) {
        self.state.evt_type = EvtType::empty();
        self.state.wrap_style = track.wrap_style;

        self.state.pos_x = 0.0;
        self.state.pos_y = 0.0;
        self.state.org_x = 0.0;
        self.state.org_y = 0.0;
        self.state.have_origin = false;
        self.state.clip_x0 = 0.0;
        self.state.clip_y0 = 0.0;
        self.state.clip_x1 = track.play_res_x as f64;
        self.state.clip_y1 = track.play_res_y as f64;
        self.state.clip_mode = 0;
        self.state.detect_collisions = true;
        self.state.fade = 0;
        self.state.drawing_scale = 0;
        self.state.pbo = 0.0;
        self.state.effect_type = Effect::None;
        self.state.effect_timing = 0;
        self.state.effect_skip_timing = 0;
        self.state.karaoke_time_origin = None;

        self.apply_transition_effects(track, event);
        self.state.explicit =
            self.state.evt_type != EvtType::empty() || crate::parse::event_has_hard_overrides(&event.text);

        self.reset_render_context(track, event, None);
        self.state.alignment = numpad2align(self.state.style.alignment);
        self.state.alignment_set = false;
        self.state.justify = self.state.style.justify;
    }

    /// Release per-event state.
    pub(crate) fn free_render_context(&mut self) {
        self.state.font = None;
        self.state.family.clear();
        self.text_info.clear();
    }
}

// this_file: crates/sabre-core/src/renderer.rs

//! The renderer object: configuration, shared caches, and the mapping
//! between script and screen coordinates.

use std::collections::HashMap;
use std::sync::Arc;

use sabre_raster::{select_engine, BitmapEngine};

use crate::cache::Caches;
use crate::font::{Face, FontDesc, Library};
use crate::frame::FixedRect;
use crate::image::Frame;
use crate::state::{OverrideBits, RenderState};
use crate::text::TextInfo;
use crate::track::Style;
use crate::InitError;

/// Outline hinting request. Outlines are loaded unhinted; the setting
/// still decides how font sizes are normalized for scaling stability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hinting {
    #[default]
    None,
    Light,
    Normal,
    Native,
}

/// Shaper selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShapingLevel {
    /// Character-mapping only, left to right.
    Simple,
    /// Bidi analysis plus full shaping.
    #[default]
    Complex,
}

/// Renderer configuration. All dimensions are output pixels.
#[derive(Debug, Clone)]
pub struct Settings {
    pub frame_width: i32,
    pub frame_height: i32,
    pub storage_width: i32,
    pub storage_height: i32,
    /// Pixel aspect ratio; 0 derives it from frame/storage dimensions.
    pub par: f64,
    pub left_margin: i32,
    pub top_margin: i32,
    pub use_margins: bool,
    pub font_size_coeff: f64,
    pub line_spacing: f64,
    /// Subtitle baseline position as a percentage of the frame, 0–100.
    pub line_position: f64,
    pub hinting: Hinting,
    pub shaper: ShapingLevel,
    pub default_font: Option<String>,
    pub default_family: Option<String>,
    pub selective_style_overrides: OverrideBits,
    pub user_override_style: Style,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frame_width: 0,
            frame_height: 0,
            storage_width: 0,
            storage_height: 0,
            par: 0.0,
            left_margin: 0,
            top_margin: 0,
            use_margins: false,
            font_size_coeff: 1.0,
            line_spacing: 0.0,
            line_position: 0.0,
            hinting: Hinting::None,
            shaper: ShapingLevel::Complex,
            default_font: None,
            default_family: None,
            selective_style_overrides: OverrideBits::SELECTIVE_FONT_SCALE,
            user_override_style: Style::default(),
        }
    }
}

impl Settings {
    fn validate(&self) -> Result<(), InitError> {
        if self.frame_width < 0 || self.frame_height < 0 {
            return Err(InitError::Config("negative frame dimensions"));
        }
        if self.par < 0.0 {
            return Err(InitError::Config("negative pixel aspect ratio"));
        }
        if !(0.0..=100.0).contains(&self.line_position) {
            return Err(InitError::Config("line position outside 0..=100"));
        }
        if self.font_size_coeff <= 0.0 {
            return Err(InitError::Config("font size coefficient must be positive"));
        }
        Ok(())
    }
}

pub struct Renderer {
    pub(crate) library: Arc<Library>,
    pub(crate) settings: Settings,
    pub(crate) engine: &'static dyn BitmapEngine,
    pub(crate) caches: Caches,
    pub(crate) state: RenderState,
    pub(crate) text_info: TextInfo,

    // Frame scope, refreshed by each render_frame call.
    pub(crate) time: i64,
    pub(crate) play_res_x: f64,
    pub(crate) play_res_y: f64,
    pub(crate) font_scale_x: f64,
    pub(crate) font_scale: f64,
    pub(crate) border_scale: f64,
    pub(crate) blur_scale: f64,

    pub(crate) images_root: Option<Arc<Frame>>,
    pub(crate) prev_images_root: Option<Arc<Frame>>,

    /// Per-event fixed rectangles from previous collision resolution,
    /// keyed by event read order.
    pub(crate) collisions: HashMap<i32, FixedRect>,
    /// Bumped when output geometry changes; invalidates `collisions`.
    pub(crate) render_id: u64,
}

impl Renderer {
    pub fn new(library: Arc<Library>) -> Result<Self, InitError> {
        Self::with_settings(library, Settings::default())
    }

    pub fn with_settings(library: Arc<Library>, settings: Settings) -> Result<Self, InitError> {
        settings.validate()?;
        let engine = select_engine();
        log::debug!("renderer initialized with {} blit engine", engine.name());
        Ok(Self {
            library,
            settings,
            engine,
            caches: Caches::new(),
            state: RenderState::default(),
            text_info: TextInfo::default(),
            time: 0,
            play_res_x: 384.0,
            play_res_y: 288.0,
            font_scale_x: 1.0,
            font_scale: 1.0,
            border_scale: 1.0,
            blur_scale: 1.0,
            images_root: None,
            prev_images_root: None,
            collisions: HashMap::new(),
            render_id: 0,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_frame_size(&mut self, width: i32, height: i32) {
        if (width, height) != (self.settings.frame_width, self.settings.frame_height) {
            self.settings.frame_width = width;
            self.settings.frame_height = height;
            self.render_id += 1;
        }
    }

    pub fn set_storage_size(&mut self, width: i32, height: i32) {
        self.settings.storage_width = width;
        self.settings.storage_height = height;
    }

    pub fn set_margins(&mut self, left: i32, top: i32) {
        if (left, top) != (self.settings.left_margin, self.settings.top_margin) {
            self.settings.left_margin = left;
            self.settings.top_margin = top;
            self.render_id += 1;
        }
    }

    pub fn set_use_margins(&mut self, use_margins: bool) {
        self.settings.use_margins = use_margins;
    }

    pub fn set_par(&mut self, par: f64) {
        self.settings.par = par.max(0.0);
    }

    pub fn set_font_scale_coeff(&mut self, coeff: f64) {
        if coeff > 0.0 {
            self.settings.font_size_coeff = coeff;
        }
    }

    pub fn set_line_spacing(&mut self, spacing: f64) {
        self.settings.line_spacing = spacing;
    }

    pub fn set_line_position(&mut self, position: f64) {
        self.settings.line_position = position.clamp(0.0, 100.0);
    }

    pub fn set_hinting(&mut self, hinting: Hinting) {
        self.settings.hinting = hinting;
    }

    pub fn set_shaper(&mut self, shaper: ShapingLevel) {
        self.settings.shaper = shaper;
    }

    pub fn set_fonts(&mut self, default_font: Option<&str>, default_family: Option<&str>) {
        self.settings.default_font = default_font.map(str::to_owned);
        self.settings.default_family = default_family.map(str::to_owned);
    }

    pub fn set_selective_style_override_enabled(&mut self, bits: OverrideBits) {
        self.settings.selective_style_overrides = bits;
    }

    pub fn set_selective_style_override(&mut self, style: Style) {
        self.settings.user_override_style = style;
    }

    /// Resolve the active font from the render state, through the font
    /// cache and the library's provider.
    pub(crate) fn update_font(&mut self) {
        let desc = FontDesc {
            family: self.state.family.clone(),
            bold: self.state.bold,
            italic: self.state.italic,
        };
        let library = self.library.clone();
        let default_family = self
            .settings
            .default_family
            .clone()
            .or_else(|| self.settings.default_font.clone());
        let entry = self.caches.font.get_or_insert_with(&desc, || {
            let face = library.select(
                &desc.family,
                desc.bold,
                desc.italic,
                default_family.as_deref(),
            );
            if face.is_none() {
                log::warn!("no usable font for family {:?}", desc.family);
            }
            crate::cache::FontEntry { face }
        });
        self.state.font = entry.face.clone();
    }

    // Script↔screen coordinate mapping. The variants differ in whether
    // margins are added, the anchoring edge, and whether the horizontal
    // scale carries the PAR correction.

    pub(crate) fn frame_w(&self) -> f64 {
        self.settings.frame_width as f64
    }

    pub(crate) fn frame_h(&self) -> f64 {
        self.settings.frame_height as f64
    }

    pub(crate) fn orig_width(&self) -> f64 {
        (self.settings.frame_width - 2 * self.settings.left_margin) as f64
    }

    pub(crate) fn orig_height(&self) -> f64 {
        (self.settings.frame_height - 2 * self.settings.top_margin) as f64
    }

    pub(crate) fn fit_width(&self) -> f64 {
        self.frame_w()
    }

    pub(crate) fn fit_height(&self) -> f64 {
        self.frame_h()
    }

    pub(crate) fn x2scr_pos(&self, x: f64) -> f64 {
        x * self.orig_width() / self.font_scale_x / self.play_res_x
            + self.settings.left_margin as f64
    }

    pub(crate) fn x2scr_left(&self, x: f64) -> f64 {
        if self.state.explicit || !self.settings.use_margins {
            return self.x2scr_pos(x);
        }
        x * self.fit_width() / self.font_scale_x / self.play_res_x
    }

    pub(crate) fn x2scr_right(&self, x: f64) -> f64 {
        if self.state.explicit || !self.settings.use_margins {
            return self.x2scr_pos(x);
        }
        x * self.fit_width() / self.font_scale_x / self.play_res_x
            + (self.frame_w() - self.fit_width())
    }

    pub(crate) fn x2scr_pos_scaled(&self, x: f64) -> f64 {
        x * self.orig_width() / self.play_res_x + self.settings.left_margin as f64
    }

    pub(crate) fn y2scr_pos(&self, y: f64) -> f64 {
        y * self.orig_height() / self.play_res_y + self.settings.top_margin as f64
    }

    pub(crate) fn y2scr(&self, y: f64) -> f64 {
        if self.state.explicit || !self.settings.use_margins {
            return self.y2scr_pos(y);
        }
        y * self.fit_height() / self.play_res_y + (self.frame_h() - self.fit_height()) * 0.5
    }

    pub(crate) fn y2scr_top(&self, y: f64) -> f64 {
        if self.state.explicit || !self.settings.use_margins {
            return self.y2scr_pos(y);
        }
        y * self.fit_height() / self.play_res_y
    }

    pub(crate) fn y2scr_sub(&self, y: f64) -> f64 {
        if self.state.explicit || !self.settings.use_margins {
            return self.y2scr_pos(y);
        }
        y * self.fit_height() / self.play_res_y + (self.frame_h() - self.fit_height())
    }

    /// Active face, or a no-font event failure.
    pub(crate) fn current_font(&self) -> Option<Arc<dyn Face>> {
        self.state.font.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::{MemoryFontProvider, SquareFace};

    fn renderer() -> Renderer {
        let mut provider = MemoryFontProvider::new();
        provider.add_face("Body", false, false, Arc::new(SquareFace::new("Body")));
        let library = Arc::new(Library::with_provider(Box::new(provider)));
        let mut r = Renderer::new(library).unwrap();
        r.set_frame_size(640, 480);
        r
    }

    #[test]
    fn settings_validation() {
        let library = Arc::new(Library::new());
        let bad = Settings {
            line_position: 150.0,
            ..Settings::default()
        };
        assert!(Renderer::with_settings(library.clone(), bad).is_err());
        assert!(Renderer::new(library).is_ok());
    }

    #[test]
    fn frame_size_change_bumps_render_id() {
        let mut r = renderer();
        let id = r.render_id;
        r.set_frame_size(640, 480);
        assert_eq!(r.render_id, id);
        r.set_frame_size(1280, 720);
        assert_eq!(r.render_id, id + 1);
    }

    #[test]
    fn coordinate_mapping_scales_playres_to_frame() {
        let mut r = renderer();
        r.play_res_x = 320.0;
        r.play_res_y = 240.0;
        assert_eq!(r.x2scr_pos(160.0), 320.0);
        assert_eq!(r.y2scr_pos(120.0), 240.0);
        // Margins shift and shrink the mapping.
        r.set_margins(20, 10);
        assert_eq!(r.x2scr_pos(160.0), 320.0);
        assert_eq!(r.y2scr_pos(0.0), 10.0);
    }

    #[test]
    fn font_lookup_is_cached_and_negative_cached(){
        let mut r = renderer();
        r.state.family = "Body".into();
        r.update_font();
        assert!(r.state.font.is_some());
        assert_eq!(r.caches.font.len(), 1);
        r.state.family = "Nope".into();
        r.update_font();
        assert!(r.state.font.is_none());
        r.update_font();
        assert_eq!(r.caches.font.len(), 2);
    }
}

// this_file: crates/sabre-core/src/text.rs

//! Per-event working data: glyph clusters and line records.

use std::sync::Arc;

use bitflags::bitflags;
use smallvec::SmallVec;

use sabre_raster::geom::{DVector, Rect, Vector};

use crate::font::Face;
use crate::outline::OutlineValue;

bitflags! {
    /// Decoration and orientation flags snapshotted per glyph.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DecoFlags: u32 {
        const UNDERLINE = 1;
        const STRIKETHROUGH = 2;
        /// Vertical-layout quarter turn; ignored by style-run splitting.
        const ROTATE = 4;
    }
}

/// Karaoke effect kind attached to a glyph run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    #[default]
    None,
    /// `\k` — colour switches per syllable.
    Karaoke,
    /// `\kf`/`\K` — sweeping fill with leftmost-x tracking.
    KaraokeKF,
    /// `\ko` — outline appears per syllable.
    KaraokeKO,
}

/// One physical glyph of a cluster. The cluster head owns these; a
/// simple-shaped cluster has exactly one.
#[derive(Debug, Clone, Default)]
pub struct GlyphShape {
    pub glyph_index: u32,
    /// Within-cluster shaping offset, 26.6.
    pub offset: Vector,
    pub advance: Vector,
    /// Final pen position, 26.6.
    pub pos: Vector,
    /// Position relative to the rotation origin, 26.6.
    pub shift: Vector,
    pub outline: Option<Arc<OutlineValue>>,
    /// Pre-matrix scale and offset applied to the cached outline.
    pub scale: DVector,
    pub scale_offset: DVector,
}

/// One cluster with its full style snapshot.
#[derive(Debug, Clone, Default)]
pub struct GlyphInfo {
    pub symbol: char,
    pub face: Option<Arc<dyn Face>>,
    pub drawing_text: Option<Arc<str>>,
    pub drawing_scale: i32,
    pub drawing_pbo: f64,

    /// Primary/secondary/outline/back colours after fade.
    pub c: [u32; 4],
    /// Transparency bytes before fade, for filter decisions.
    pub a_pre_fade: [u8; 4],

    pub effect_type: Effect,
    pub effect_timing: i64,
    pub effect_skip_timing: i64,
    /// `\kt` absolute syllable start, ms.
    pub karaoke_origin: Option<i64>,

    pub font_size: f64,
    pub be: i32,
    pub blur: f64,
    pub shadow_x: f64,
    pub shadow_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub scale_fix: f64,
    pub border_style: i32,
    pub border_x: f64,
    pub border_y: f64,
    pub hspacing: f64,
    pub hspacing_scaled: i32,
    pub bold: bool,
    pub italic: bool,
    pub flags: DecoFlags,
    pub frx: f64,
    pub fry: f64,
    pub frz: f64,
    pub fax: f64,
    pub fay: f64,

    pub parts: SmallVec<[GlyphShape; 1]>,
    pub cluster_advance: Vector,
    pub asc: i32,
    pub desc: i32,
    /// Integer bbox after the pre-transform scale, 26.6.
    pub bbox: Rect,
    /// Cluster pen position, 26.6.
    pub pos: Vector,

    /// 0 none, 1 soft break, 2 forced break before this glyph.
    pub linebreak: i32,
    pub skip: bool,
    pub is_trimmed_whitespace: bool,
    pub starts_new_run: bool,

    /// Device-space glyph position exposed by the auxiliary API.
    pub real_pos: DVector,
}

impl GlyphInfo {
    pub fn is_whitespace(&self) -> bool {
        (self.symbol == ' ' || self.symbol == '\n') && self.linebreak == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LineInfo {
    pub offset: usize,
    pub len: usize,
    pub asc: f64,
    pub desc: f64,
}

/// Growth ceiling for the glyph array.
pub const MAX_GLYPHS: usize = (i32::MAX / 2) as usize;

/// Reusable per-event text storage.
#[derive(Debug, Default)]
pub struct TextInfo {
    pub glyphs: Vec<GlyphInfo>,
    pub lines: Vec<LineInfo>,
    pub height: f64,
    pub border_top: i32,
    pub border_bottom: i32,
    pub border_x: i32,
}

impl TextInfo {
    pub fn clear(&mut self) {
        self.glyphs.clear();
        self.lines.clear();
        self.height = 0.0;
        self.border_top = 0;
        self.border_bottom = 0;
        self.border_x = 0;
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    /// 1 + the number of in-range glyphs carrying a linebreak.
    pub fn n_lines(&self) -> usize {
        1 + self.glyphs.iter().filter(|g| g.linebreak != 0).count()
    }
}

// this_file: crates/sabre-core/src/lib.rs

//! SABRE core: events in, positioned alpha bitmaps out.
//!
//! The crate implements the per-event rendering pipeline of a subtitle
//! renderer together with the machinery that makes it fast enough to run
//! per frame: content-addressed caches for fonts, outlines, bitmaps and
//! composites, and the transform quantization that maps continuous 3×3
//! matrices onto discrete cache keys with bounded positional error.
//!
//! Data flows through one event as: tag-laden text → glyph sequence →
//! shaped clusters → pen positions → line breaks → visual order →
//! aligned positions → per-glyph 3D transform → quantized bitmap keys →
//! cache lookups → combined run bitmaps → positioned images. Frame
//! assembly selects active events, renders each, resolves collisions and
//! concatenates the results in (layer, read order).

pub mod cache;
pub mod compose;
pub mod drawing;
pub mod font;
pub mod frame;
pub mod image;
pub mod karaoke;
pub mod layout;
pub mod outline;
pub mod parse;
pub mod pipeline;
pub mod quant;
pub mod renderer;
pub mod shape;
pub mod state;
pub mod text;
pub mod track;

use thiserror::Error;

/// Renderer construction failure.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid renderer configuration: {0}")]
    Config(&'static str),
}

/// Event-level failure. These are logged and the event is skipped; a
/// frame never aborts because of one bad event.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("style index {0} out of range")]
    BadStyleIndex(usize),

    #[error("event has no text")]
    EmptyEvent,

    #[error("no usable font for family {0:?}")]
    NoFont(String),

    #[error("shaping failed")]
    ShapingFailed,

    #[error("glyph limit exceeded")]
    TooManyGlyphs,
}

pub type Result<T> = std::result::Result<T, RenderError>;

pub use font::{Face, FontProvider, Library, MemoryFontProvider, SkrifaFace, SquareFace};
pub use image::{ChangeLevel, Frame, GlyphData, Image};
pub use renderer::{Hinting, Renderer, Settings, ShapingLevel};
pub use state::OverrideBits;
pub use track::{Event, Style, Track};

// this_file: crates/sabre/src/lib.rs

//! SABRE: timestamped styled subtitle events in, positioned alpha
//! bitmaps out.
//!
//! The renderer takes a pre-parsed [`Track`] (styles + events) and, for
//! any timestamp, produces a layered list of 8-bit alpha images with
//! packed RGBA colours and integer destination coordinates, ready to
//! composite onto a video frame.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sabre::{Event, Library, Renderer, Track};
//!
//! let mut library = Library::new();
//! // library.add_font_bytes(...) or a custom FontProvider
//! let mut renderer = Renderer::new(Arc::new(library))?;
//! renderer.set_frame_size(1920, 1080);
//!
//! let mut track = Track::default();
//! track.events.push(Event {
//!     start: 0,
//!     duration: 5_000,
//!     text: "{\\an2}Hello".to_string(),
//!     ..Event::default()
//! });
//!
//! let (frame, change) = renderer.render_frame(&track, 1_000);
//! for image in &frame.unwrap().images {
//!     // blend image.data() at (image.dst_x, image.dst_y)
//! }
//! # Ok::<(), sabre::InitError>(())
//! ```
//!
//! The heavy lifting lives in [`sabre_core`]: the per-event pipeline
//! (tag interpretation, shaping, wrapping, alignment), the four
//! content-addressed caches keyed by quantized transforms, and frame
//! assembly with collision resolution. [`sabre_raster`] supplies the
//! raster substrate.

pub use sabre_core::{
    ChangeLevel, Event, Face, FontProvider, Frame, GlyphData, Hinting, Image, InitError, Library,
    MemoryFontProvider, OverrideBits, RenderError, Renderer, Settings, ShapingLevel, SkrifaFace,
    SquareFace, Style, Track,
};

pub use sabre_raster::Bitmap;

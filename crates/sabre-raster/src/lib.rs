// this_file: crates/sabre-raster/src/lib.rs

//! Raster substrate for SABRE.
//!
//! Everything below the caches lives here: 26.6 fixed-point geometry, the
//! polyline outline container with its 2D/3D transforms, 8-bit alpha
//! bitmaps, the pluggable blit engine, blur synthesis, and the glue to the
//! external rasterizer (zeno) and stroker (kurbo).

pub mod bitmap;
pub mod blur;
pub mod engine;
pub mod geom;
pub mod outline;
pub mod raster;

pub use bitmap::{fix_outline, shift_bitmap, Bitmap};
pub use blur::synth_blur;
pub use engine::{be_padding, select_engine, BitmapEngine};
pub use geom::{DRect, DVector, Rect, Vector};
pub use outline::{Outline, OutlineBuilder};
pub use raster::{outlines_to_bitmap, stroke_outline, STROKER_PRECISION};

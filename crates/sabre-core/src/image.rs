// this_file: crates/sabre-core/src/image.rs

//! Public output types: positioned images, frames and change levels.

use std::sync::Arc;

use sabre_raster::geom::Rect;
use sabre_raster::{Bitmap, Outline, Vector};

/// One positioned alpha image. The raster is a window into a shared
/// bitmap (composite cache value or a split of one), so cloning frames
/// is cheap and identical frames share pixels.
#[derive(Debug, Clone)]
pub struct Image {
    bitmap: Arc<Bitmap>,
    /// Byte offset of the window's top-left pixel inside `bitmap`.
    offset: usize,
    pub w: i32,
    pub h: i32,
    /// Packed RGBA colour; the low byte is transparency.
    pub color: u32,
    pub dst_x: i32,
    pub dst_y: i32,
}

impl Image {
    pub fn new(bitmap: Arc<Bitmap>, color: u32, dst_x: i32, dst_y: i32) -> Self {
        let (w, h) = (bitmap.w as i32, bitmap.h as i32);
        Self {
            bitmap,
            offset: 0,
            w,
            h,
            color,
            dst_x,
            dst_y,
        }
    }

    /// Restrict the image to a window `x..x+w, y..y+h` of its raster
    /// (coordinates relative to the current window).
    pub fn crop(&self, x: i32, y: i32, w: i32, h: i32) -> Option<Self> {
        if x < 0 || y < 0 || w <= 0 || h <= 0 || x + w > self.w || y + h > self.h {
            return None;
        }
        let mut out = self.clone();
        out.offset = self.offset + y as usize * self.bitmap.stride + x as usize;
        out.w = w;
        out.h = h;
        out.dst_x = self.dst_x + x;
        out.dst_y = self.dst_y + y;
        Some(out)
    }

    pub fn stride(&self) -> usize {
        self.bitmap.stride
    }

    /// Raster bytes starting at the window origin; rows are `stride()`
    /// apart, only the first `w` bytes of each row belong to the image.
    pub fn data(&self) -> &[u8] {
        &self.bitmap.buffer[self.offset..]
    }

    pub fn row(&self, y: i32) -> &[u8] {
        let start = self.offset + y as usize * self.bitmap.stride;
        &self.bitmap.buffer[start..start + self.w as usize]
    }

    /// Compare images: 0 identical, 1 only the
    /// destination moved, 2 different content.
    pub fn compare(&self, other: &Image) -> u8 {
        if self.w != other.w
            || self.h != other.h
            || self.bitmap.stride != other.bitmap.stride
            || self.color != other.color
            || !Arc::ptr_eq(&self.bitmap, &other.bitmap)
            || self.offset != other.offset
        {
            return 2;
        }
        if self.dst_x != other.dst_x || self.dst_y != other.dst_y {
            return 1;
        }
        0
    }

    pub(crate) fn shift_y(&mut self, shift: i32, frame_height: i32) {
        self.dst_y += shift;
        // Clip to the frame top and bottom.
        if self.dst_y < 0 {
            let clip = -self.dst_y;
            if clip >= self.h {
                self.h = 0;
                self.dst_y = 0;
                return;
            }
            self.h -= clip;
            self.offset += clip as usize * self.bitmap.stride;
            self.dst_y = 0;
        }
        if self.dst_y + self.h >= frame_height {
            self.h = (frame_height - self.dst_y).max(0);
        }
    }
}

/// How a frame differs from the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeLevel {
    Identical = 0,
    PositionChanged = 1,
    ContentChanged = 2,
}

/// One rendered frame: images in (layer, read order), shadow → border →
/// fill within each event. Callers hold the `Arc` as long as they need
/// the pixels.
#[derive(Debug, Default)]
pub struct Frame {
    pub images: Vec<Image>,
}

impl Frame {
    /// Compare two frames per the change-level contract.
    pub fn detect_change(prev: Option<&Frame>, cur: Option<&Frame>) -> ChangeLevel {
        let empty = Frame::default();
        let prev = prev.unwrap_or(&empty);
        let cur = cur.unwrap_or(&empty);
        if prev.images.len() != cur.images.len() {
            return ChangeLevel::ContentChanged;
        }
        let mut level = ChangeLevel::Identical;
        for (a, b) in prev.images.iter().zip(&cur.images) {
            match a.compare(b) {
                2 => return ChangeLevel::ContentChanged,
                1 => level = ChangeLevel::PositionChanged,
                _ => {}
            }
        }
        level
    }
}

/// Auxiliary per-glyph output: positions, boxes and the raw first
/// outline, exposed for effect generators.
#[derive(Debug, Clone)]
pub struct GlyphData {
    pub pos_x: f64,
    pub pos_y: f64,
    pub bbox: Rect,
    pub ascender: i32,
    pub descender: i32,
    pub points: Vec<Vector>,
    pub segments: Vec<u8>,
}

impl GlyphData {
    pub fn outline(&self) -> Outline {
        Outline {
            points: self.points.clone(),
            segments: self.segments.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap() -> Arc<Bitmap> {
        let mut bm = Bitmap::new(4, 4, 1);
        for (i, v) in bm.buffer.iter_mut().enumerate() {
            *v = i as u8;
        }
        Arc::new(bm)
    }

    #[test]
    fn crop_windows_into_shared_raster() {
        let img = Image::new(bitmap(), 0xFF000000, 10, 20);
        let sub = img.crop(1, 2, 2, 2).unwrap();
        assert_eq!((sub.dst_x, sub.dst_y), (11, 22));
        assert_eq!(sub.row(0), &[9, 10]);
        assert!(img.crop(0, 0, 0, 2).is_none());
    }

    #[test]
    fn compare_levels() {
        let bm = bitmap();
        let a = Image::new(bm.clone(), 1, 0, 0);
        let b = Image::new(bm.clone(), 1, 0, 0);
        assert_eq!(a.compare(&b), 0);
        let c = Image::new(bm.clone(), 1, 5, 0);
        assert_eq!(a.compare(&c), 1);
        let d = Image::new(bm, 2, 0, 0);
        assert_eq!(a.compare(&d), 2);
        let e = Image::new(bitmap(), 1, 0, 0);
        assert_eq!(a.compare(&e), 2);
    }

    #[test]
    fn frame_change_detection() {
        let bm = bitmap();
        let f1 = Frame {
            images: vec![Image::new(bm.clone(), 1, 0, 0)],
        };
        let f2 = Frame {
            images: vec![Image::new(bm.clone(), 1, 0, 0)],
        };
        assert_eq!(
            Frame::detect_change(Some(&f1), Some(&f2)),
            ChangeLevel::Identical
        );
        let f3 = Frame {
            images: vec![Image::new(bm.clone(), 1, 3, 4)],
        };
        assert_eq!(
            Frame::detect_change(Some(&f1), Some(&f3)),
            ChangeLevel::PositionChanged
        );
        let f4 = Frame { images: vec![] };
        assert_eq!(
            Frame::detect_change(Some(&f1), Some(&f4)),
            ChangeLevel::ContentChanged
        );
        assert_eq!(Frame::detect_change(None, None), ChangeLevel::Identical);
    }

    #[test]
    fn shift_clips_to_frame() {
        let mut img = Image::new(bitmap(), 1, 0, 2);
        img.shift_y(-4, 100);
        assert_eq!(img.dst_y, 0);
        assert_eq!(img.h, 2);
        assert_eq!(img.row(0)[0], 8);

        let mut img = Image::new(bitmap(), 1, 0, 90);
        img.shift_y(8, 100);
        assert_eq!(img.h, 2);
    }
}

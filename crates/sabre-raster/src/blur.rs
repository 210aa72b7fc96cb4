// this_file: crates/sabre-raster/src/blur.rs

//! Blur synthesis: classic "blur edges" box passes and Gaussian blur.

use crate::bitmap::Bitmap;

/// Apply `passes` rounds of the 3×3 box filter in place. The caller is
/// expected to have padded the raster (see [`crate::engine::be_padding`]);
/// content reaching the edge is clipped, VSFilter style.
pub fn be_blur(bm: &mut Bitmap, passes: i32) {
    if bm.is_empty() || passes <= 0 {
        return;
    }
    let (w, h, s) = (bm.w, bm.h, bm.stride);
    let mut tmp = vec![0u16; w * h];

    for _ in 0..passes {
        // Horizontal [1 2 1]
        for y in 0..h {
            let row = &bm.buffer[y * s..y * s + w];
            let out = &mut tmp[y * w..(y + 1) * w];
            for x in 0..w {
                let a = if x > 0 { row[x - 1] as u16 } else { 0 };
                let b = row[x] as u16;
                let c = if x + 1 < w { row[x + 1] as u16 } else { 0 };
                out[x] = a + 2 * b + c;
            }
        }
        // Vertical [1 2 1], renormalized
        for y in 0..h {
            for x in 0..w {
                let a = if y > 0 { tmp[(y - 1) * w + x] } else { 0 };
                let b = tmp[y * w + x];
                let c = if y + 1 < h { tmp[(y + 1) * w + x] } else { 0 };
                bm.buffer[y * s + x] = ((a + 2 * b + c) >> 4) as u8;
            }
        }
    }
}

/// Separable Gaussian blur with variance `r2` (pixels²). The raster is
/// re-allocated with enough apron for the kernel support and its
/// placement adjusted accordingly.
pub fn gaussian_blur(bm: &mut Bitmap, r2: f64) {
    if bm.is_empty() || r2 <= 0.001 {
        return;
    }
    let sigma = r2.sqrt();
    let half = ((3.0 * sigma).ceil() as usize).clamp(1, 128);

    let mut kernel = vec![0.0f32; 2 * half + 1];
    let mut sum = 0.0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let d = i as f64 - half as f64;
        *k = (-d * d / (2.0 * r2)).exp() as f32;
        sum += *k;
    }
    for k in &mut kernel {
        *k /= sum;
    }

    let (w, h) = (bm.w, bm.h);
    let new_w = w + 2 * half;
    let new_h = h + 2 * half;

    // Horizontal pass into a float scratch at expanded width.
    let mut horiz = vec![0.0f32; new_w * h];
    for y in 0..h {
        let row = bm.row(y);
        let out = &mut horiz[y * new_w..(y + 1) * new_w];
        for (x, &v) in row.iter().enumerate() {
            if v == 0 {
                continue;
            }
            let v = v as f32;
            for (j, &k) in kernel.iter().enumerate() {
                out[x + j] += v * k;
            }
        }
    }

    // Vertical pass, accumulated in float to keep rounding out of the taps.
    let mut acc = vec![0.0f32; new_w * new_h];
    for y in 0..h {
        for x in 0..new_w {
            let v = horiz[y * new_w + x];
            if v == 0.0 {
                continue;
            }
            for (j, &k) in kernel.iter().enumerate() {
                acc[(y + j) * new_w + x] += v * k;
            }
        }
    }

    let mut out = Bitmap::new(new_w, new_h, 32);
    out.left = bm.left - half as i32;
    out.top = bm.top - half as i32;
    for y in 0..new_h {
        let row = out.row_mut(y);
        for x in 0..new_w {
            row[x] = acc[y * new_w + x].round().clamp(0.0, 255.0) as u8;
        }
    }

    *bm = out;
}

/// Box passes followed by Gaussian blur, the combined filter applied to
/// composite layers.
pub fn synth_blur(bm: &mut Bitmap, be: i32, r2: f64) {
    if bm.is_empty() {
        return;
    }
    be_blur(bm, be);
    gaussian_blur(bm, r2);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be_blur_spreads_impulse() {
        let mut bm = Bitmap::new(5, 5, 1);
        bm.buffer[2 * bm.stride + 2] = 255;
        be_blur(&mut bm, 1);
        // Center keeps the largest share, direct neighbours half of it.
        let c = bm.buffer[2 * bm.stride + 2];
        let n = bm.buffer[2 * bm.stride + 1];
        let d = bm.buffer[1 * bm.stride + 1];
        assert!(c > n && n > d && d > 0);
        assert_eq!(c, 63);
    }

    #[test]
    fn be_blur_zero_passes_is_noop() {
        let mut bm = Bitmap::new(3, 3, 1);
        bm.buffer[4] = 100;
        let before = bm.clone();
        be_blur(&mut bm, 0);
        assert_eq!(bm, before);
    }

    #[test]
    fn gaussian_blur_expands_and_preserves_mass() {
        let mut bm = Bitmap::new(3, 3, 1);
        bm.buffer[1 * bm.stride + 1] = 255;
        let (w0, h0) = (bm.w, bm.h);
        gaussian_blur(&mut bm, 2.0);
        assert!(bm.w > w0 && bm.h > h0);
        assert!(bm.left < 0 && bm.top < 0);
        let total: u32 = bm.buffer.iter().map(|&v| v as u32).sum();
        // Mass within quantization error of the impulse.
        assert!((total as i64 - 255).abs() < 32, "total = {total}");
    }

    #[test]
    fn gaussian_blur_tiny_variance_is_noop() {
        let mut bm = Bitmap::new(3, 3, 1);
        bm.buffer[4] = 200;
        let before = bm.clone();
        gaussian_blur(&mut bm, 0.0);
        assert_eq!(bm, before);
    }
}

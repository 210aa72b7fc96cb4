// this_file: crates/sabre-core/tests/quantization.rs

//! Property tests for transform quantization and the cache contract.

use proptest::prelude::*;

use sabre_core::outline::{construct_outline, OutlineKey};
use sabre_core::quant::{
    quantize_transform, restore_transform, POSITION_PRECISION,
};
use sabre_raster::engine::ScalarEngine;
use sabre_raster::geom::{DVector, Rect};

fn cbox() -> Rect {
    Rect {
        x_min: -320,
        y_min: -640,
        x_max: 960,
        y_max: 64,
    }
}

/// Well-conditioned affine transform parameters.
fn affine() -> impl Strategy<Value = [[f64; 3]; 3]> {
    (
        0.1f64..4.0,   // scale x
        0.1f64..4.0,   // scale y
        -3.1f64..3.1,  // rotation
        -500.0f64..500.0,
        -500.0f64..500.0,
    )
        .prop_map(|(sx, sy, angle, tx, ty)| {
            let (s, c) = angle.sin_cos();
            [
                [c * sx, -s * sy, tx * 64.0],
                [s * sx, c * sy, ty * 64.0],
                [0.0, 0.0, 1.0],
            ]
        })
}

fn apply(m: &[[f64; 3]; 3], x: f64, y: f64) -> (f64, f64) {
    let z = m[2][0] * x + m[2][1] * y + m[2][2];
    (
        (m[0][0] * x + m[0][1] * y + m[0][2]) / z,
        (m[1][0] * x + m[1][1] * y + m[1][2]) / z,
    )
}

proptest! {
    /// Round trip: the restored transform moves every cbox corner by at
    /// most 2·POSITION_PRECISION per axis (in 1/64 px).
    #[test]
    fn quantize_restore_round_trip(m in affine()) {
        let cb = cbox();
        let mut off = DVector::default();
        let Some((pos, qm)) = quantize_transform(m, &cb, &mut off, true) else {
            // Rejection is allowed for ill-conditioned inputs only; the
            // strategy avoids those.
            return Err(TestCaseError::fail("unexpected rejection"));
        };
        let r = restore_transform(&qm, &cb);

        for &(x, y) in &[
            (cb.x_min as f64, cb.y_min as f64),
            (cb.x_max as f64, cb.y_min as f64),
            (cb.x_min as f64, cb.y_max as f64),
            (cb.x_max as f64, cb.y_max as f64),
        ] {
            let (ex, ey) = apply(&m, x, y);
            let (gx, gy) = apply(&r, x, y);
            let gx = gx + (pos.x * 64) as f64;
            let gy = gy + (pos.y * 64) as f64;
            prop_assert!((ex - gx).abs() <= 2.0 * POSITION_PRECISION);
            prop_assert!((ey - gy).abs() <= 2.0 * POSITION_PRECISION);
        }
    }

    /// Stability: perturbations well below the quantization step land
    /// on the same key.
    #[test]
    fn tiny_perturbations_share_keys(m in affine(), eps in -0.01f64..0.01) {
        let cb = cbox();
        let mut off1 = DVector::default();
        let mut off2 = DVector::default();
        let mut m2 = m;
        m2[0][2] += eps; // sub-1/64-px translation wiggle
        m2[1][2] += eps;

        let a = quantize_transform(m, &cb, &mut off1, true);
        let b = quantize_transform(m2, &cb, &mut off2, true);
        if let (Some((p1, q1)), Some((p2, q2))) = (a, b) {
            // Matrix coefficients must agree; the centre may only move
            // if it sat exactly on a rounding boundary.
            prop_assert_eq!(q1.x, q2.x);
            prop_assert_eq!(q1.y, q2.y);
            prop_assert_eq!(q1.z, q2.z);
            let d1 = (p1.x * 8 + q1.offset.0) - (p2.x * 8 + q2.offset.0);
            let d2 = (p1.y * 8 + q1.offset.1) - (p2.y * 8 + q2.offset.1);
            prop_assert!(d1.abs() <= 1 && d2.abs() <= 1);
        }
    }

    /// Quantization is idempotent through restore: re-quantizing the
    /// restored matrix yields the same coefficients.
    #[test]
    fn requantization_is_stable(m in affine()) {
        let cb = cbox();
        let mut off = DVector::default();
        let Some((_, q1)) = quantize_transform(m, &cb, &mut off, true) else {
            return Err(TestCaseError::fail("unexpected rejection"));
        };
        let r = restore_transform(&q1, &cb);
        let mut off2 = DVector::default();
        let Some((_, q2)) = quantize_transform(r, &cb, &mut off2, true) else {
            return Err(TestCaseError::fail("restored matrix rejected"));
        };
        prop_assert_eq!(q1.x, q2.x);
        prop_assert_eq!(q1.y, q2.y);
    }
}

/// Cache functional property: repeated construction for one key yields
/// equivalent raster content.
#[test]
fn repeated_bitmap_construction_is_equivalent() {
    use sabre_core::compose::construct_bitmap;
    use sabre_core::outline::OutlineRef;
    use sabre_core::quant::BitmapKey;
    use std::sync::Arc;

    let outline = Arc::new(construct_outline(&OutlineKey::Drawing(
        "m 0 0 l 50 10 40 60 b 10 70 5 40 0 60".into(),
    )));
    assert!(outline.valid);

    let m = [
        [1.3, 0.2, 700.0],
        [-0.1, 0.9, -300.0],
        [0.0, 0.0, 1.0],
    ];
    let mut off = DVector::default();
    let (_, qm) = quantize_transform(m, &outline.cbox, &mut off, true).unwrap();
    let key = BitmapKey {
        outline: OutlineRef(outline),
        matrix: qm,
    };

    let a = construct_bitmap(&ScalarEngine, &key).bitmap.unwrap();
    let b = construct_bitmap(&ScalarEngine, &key).bitmap.unwrap();
    assert_eq!(a.w, b.w);
    assert_eq!(a.h, b.h);
    assert_eq!(a.buffer, b.buffer);
    assert!(!a.is_empty());
}

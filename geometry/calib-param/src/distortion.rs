//! Lens distortion model for [crate::DIST_FUNCTION_VERSION] 4.
//!
//! Normalized coordinates `(x, y)` are distorted as
//!
//! ```text
//! r2 = x^2 + y^2
//! xd = x (1 + k1 r2 + k2 r2^2) + 2 p1 x y + p2 (r2 + 2 x^2)
//! yd = y (1 + k1 r2 + k2 r2^2) + p1 (r2 + 2 y^2) + 2 p2 x y
//! ```
//!
//! Ideal pixel coordinates are additionally divided by the scale factor
//! `dist_factor[8]` around the distortion center.

use crate::DistFactor;

/// Fixed number of refinement steps when inverting the model.
const INVERSE_ITERATIONS: usize = 20;

fn distort(dist_factor: &DistFactor, x: f64, y: f64) -> (f64, f64) {
    let [k1, k2, p1, p2, ..] = *dist_factor;
    let x2 = x * x;
    let y2 = y * y;
    let r2 = x2 + y2;
    let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
    (
        x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x2),
        y * radial + p1 * (r2 + 2.0 * y2) + 2.0 * p2 * x * y,
    )
}

/// Map an observed (distorted) pixel location to its ideal location.
pub fn observed_to_ideal(dist_factor: &DistFactor, ox: f64, oy: f64) -> (f64, f64) {
    let [k1, k2, p1, p2, fx, fy, x0, y0, s] = *dist_factor;

    let xd = (ox - x0) / fx;
    let yd = (oy - y0) / fy;

    let mut px = xd;
    let mut py = yd;
    for _ in 0..INVERSE_ITERATIONS {
        let x2 = px * px;
        let y2 = py * py;
        if x2 == 0.0 && y2 == 0.0 {
            break;
        }
        let (ex, ey) = distort(dist_factor, px, py);
        // Diagonal of the Jacobian of `distort`.
        let dx = 1.0
            + k1 * (3.0 * x2 + y2)
            + k2 * (5.0 * x2 * x2 + 6.0 * x2 * y2 + y2 * y2)
            + 2.0 * p1 * py
            + 6.0 * p2 * px;
        let dy = 1.0
            + k1 * (x2 + 3.0 * y2)
            + k2 * (x2 * x2 + 6.0 * x2 * y2 + 5.0 * y2 * y2)
            + 6.0 * p1 * py
            + 2.0 * p2 * px;
        if dx == 0.0 || dy == 0.0 {
            break;
        }
        px -= (ex - xd) / dx;
        py -= (ey - yd) / dy;
    }

    (px * fx / s + x0, py * fy / s + y0)
}

/// Map an ideal pixel location to the observed (distorted) location.
pub fn ideal_to_observed(dist_factor: &DistFactor, ix: f64, iy: f64) -> (f64, f64) {
    let [_, _, _, _, fx, fy, x0, y0, s] = *dist_factor;
    let x = (ix - x0) * s / fx;
    let y = (iy - y0) * s / fy;
    let (xd, yd) = distort(dist_factor, x, y);
    (xd * fx + x0, yd * fy + y0)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    const DF: DistFactor = [-0.12, 0.03, 0.0008, -0.0005, 512.0, 508.0, 322.0, 236.0, 1.0];

    #[test]
    fn inverse_matches_forward_model() {
        for &(ox, oy) in &[
            (0.0, 0.0),
            (640.0, 0.0),
            (0.0, 480.0),
            (640.0, 480.0),
            (100.0, 400.0),
            (322.0, 236.0),
        ] {
            let (ix, iy) = observed_to_ideal(&DF, ox, oy);
            let (rx, ry) = ideal_to_observed(&DF, ix, iy);
            assert_abs_diff_eq!(rx, ox, epsilon = 1e-6);
            assert_abs_diff_eq!(ry, oy, epsilon = 1e-6);
        }
    }

    #[test]
    fn center_is_fixed_point() {
        let (ix, iy) = observed_to_ideal(&DF, 322.0, 236.0);
        assert_eq!((ix, iy), (322.0, 236.0));
    }

    #[test]
    fn scale_shrinks_ideal_offsets() {
        let mut df = DF;
        df[8] = 0.5;
        let (ix1, _) = observed_to_ideal(&DF, 600.0, 236.0);
        let (ix2, _) = observed_to_ideal(&df, 600.0, 236.0);
        assert_abs_diff_eq!(ix2 - 322.0, 2.0 * (ix1 - 322.0), epsilon = 1e-9);
    }
}

//! Algebraic ellipse fitting.
//!
//! Points are centred and scaled to a mean distance of √2, the smallest
//! eigenvector of the 6×6 scatter matrix gives the conic, and the conic is
//! mapped back to pixel space and converted to centre/axes/rotation.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, SQRT_2};

use nalgebra::{Matrix3, Matrix6, SymmetricEigen, Vector6};

use crate::types::Ellipse;

/// Coefficients of `A x² + B xy + C y² + D x + E y + F = 0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conic(pub [f64; 6]);

impl Conic {
    #[inline]
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// First-order approximation of the geometric distance to the curve
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, _] = self.0;
        let alg = self.algebraic_distance(x, y);
        let gx = 2.0 * a * x + b * y + d;
        let gy = b * x + 2.0 * c * y + e;
        let grad_sq = gx * gx + gy * gy;
        if grad_sq < 1e-30 {
            return alg.abs();
        }
        alg.abs() / grad_sq.sqrt()
    }

    pub fn rms_sampson(&self, points: &[[f64; 2]]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum: f64 = points
            .iter()
            .map(|&[x, y]| self.sampson_distance(x, y).powi(2))
            .sum();
        (sum / points.len() as f64).sqrt()
    }

    /// Centre, semi-axes and rotation, or `None` for anything but a real ellipse
    pub fn to_ellipse(&self) -> Option<Ellipse> {
        let [a, b, c, d, e, f] = self.0;

        if b * b - 4.0 * a * c >= 0.0 {
            return None;
        }

        let m = Matrix3::new(
            a,
            b / 2.0,
            d / 2.0,
            b / 2.0,
            c,
            e / 2.0,
            d / 2.0,
            e / 2.0,
            f,
        );
        if m.determinant().abs() < 1e-15 {
            return None;
        }

        let denom = 4.0 * a * c - b * b;
        let cx = (b * e - 2.0 * c * d) / denom;
        let cy = (b * d - 2.0 * a * e) / denom;

        let angle = if (a - c).abs() < 1e-15 {
            match b.partial_cmp(&0.0) {
                Some(std::cmp::Ordering::Greater) => FRAC_PI_4,
                Some(std::cmp::Ordering::Less) => -FRAC_PI_4,
                _ => 0.0,
            }
        } else {
            0.5 * b.atan2(a - c)
        };

        // Eigenvalues of the quadratic part; the larger one belongs to `angle`
        let sum = a + c;
        let diff = ((a - c).powi(2) + b * b).sqrt();
        let lambda1 = (sum + diff) / 2.0;
        let lambda2 = (sum - diff) / 2.0;

        let f_centre = self.algebraic_distance(cx, cy);
        if f_centre.abs() < 1e-15 {
            return None;
        }

        let r1_sq = -f_centre / lambda1;
        let r2_sq = -f_centre / lambda2;
        if r1_sq <= 0.0 || r2_sq <= 0.0 {
            return None;
        }

        let (rx, ry, angle) = if r1_sq >= r2_sq {
            (r1_sq.sqrt(), r2_sq.sqrt(), angle)
        } else {
            (r2_sq.sqrt(), r1_sq.sqrt(), angle + FRAC_PI_2)
        };

        let ellipse = Ellipse {
            center: [cx, cy],
            rx,
            ry,
            angle_deg: normalize_angle(angle).to_degrees(),
        };
        ellipse.is_valid().then_some(ellipse)
    }
}

/// Fitted ellipse together with the conic it came from
#[derive(Debug, Clone, Copy)]
pub struct EllipseFit {
    pub ellipse: Ellipse,
    pub conic: Conic,
}

/// Least-squares algebraic fit. Needs at least five points.
pub fn fit_ellipse(points: &[[f64; 2]]) -> Option<EllipseFit> {
    if points.len() < 5 {
        return None;
    }

    let (mx, my, s) = normalization_params(points);
    if is_collinear(points, mx, my, s) {
        return None;
    }

    let mut scatter = Matrix6::<f64>::zeros();
    for &[px, py] in points {
        let x = (px - mx) * s;
        let y = (py - my) * s;
        let row = Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        scatter += row * row.transpose();
    }

    let eigen = SymmetricEigen::new(scatter);
    let (smallest, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let v = eigen.eigenvectors.column(smallest);
    let normalized = [v[0], v[1], v[2], v[3], v[4], v[5]];
    if normalized.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let conic = denormalize(normalized, mx, my, s);
    let ellipse = conic.to_ellipse()?;
    Some(EllipseFit { ellipse, conic })
}

/// Centroid and the scale that brings the mean distance to √2
fn normalization_params(points: &[[f64; 2]]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| (p[0] - mx).hypot(p[1] - my))
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 1e-15 { SQRT_2 / mean_dist } else { 1.0 };
    (mx, my, scale)
}

/// Second moments of the normalized points have (near) zero determinant
fn is_collinear(points: &[[f64; 2]], mx: f64, my: f64, s: f64) -> bool {
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for &[px, py] in points {
        let x = (px - mx) * s;
        let y = (py - my) * s;
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
    }
    let trace = sxx + syy;
    trace <= f64::EPSILON || sxx * syy - sxy * sxy <= 1e-10 * trace * trace
}

/// Substitute `x' = s(x - mx)`, `y' = s(y - my)` back into the conic
fn denormalize(c: [f64; 6], mx: f64, my: f64, s: f64) -> Conic {
    let [a_, b_, c_, d_, e_, f_] = c;
    let s2 = s * s;
    Conic([
        a_ * s2,
        b_ * s2,
        c_ * s2,
        -2.0 * a_ * s2 * mx - b_ * s2 * my + d_ * s,
        -b_ * s2 * mx - 2.0 * c_ * s2 * my + e_ * s,
        a_ * s2 * mx * mx + b_ * s2 * mx * my + c_ * s2 * my * my - d_ * s * mx - e_ * s * my
            + f_,
    ])
}

/// Into (-π/2, π/2]
fn normalize_angle(mut angle: f64) -> f64 {
    while angle > FRAC_PI_2 {
        angle -= PI;
    }
    while angle <= -FRAC_PI_2 {
        angle += PI;
    }
    angle
}

use std::f64::consts::PI;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::debug;

use crate::{
    config::{HoughConfig, HoughTier},
    error::{Result, TraceError},
    traits::SegmentDetector,
    types::{BinaryMask, Segment},
};

/// Progressive probabilistic Hough transform over a one-pixel skeleton.
///
/// Every tier runs on a fresh copy of the mask and the results are
/// concatenated, so a run found by the coarse tier may be found again in
/// pieces by the fine tier. The merger downstream collapses those.
#[derive(Debug, Clone)]
pub struct ProbabilisticHough {
    /// Fixed tiers; `None` derives them from the mask size
    pub tiers: Option<Vec<HoughTier>>,
    pub seed: u64,
    pub max_segments: usize,
    pub max_accumulator_bytes: u64,
}

impl Default for ProbabilisticHough {
    fn default() -> Self {
        Self::from_config(&HoughConfig::default())
    }
}

impl ProbabilisticHough {
    pub fn from_config(config: &HoughConfig) -> Self {
        Self {
            tiers: config.tiers.clone(),
            seed: config.seed,
            max_segments: config.max_segments,
            max_accumulator_bytes: config.max_accumulator_bytes,
        }
    }

    pub fn with_tiers(mut self, tiers: Vec<HoughTier>) -> Self {
        self.tiers = Some(tiers);
        self
    }

    /// Run a single tier.
    ///
    /// Fails when the tier resolution is not a positive finite number or its
    /// accumulator would exceed `max_accumulator_bytes`.
    pub fn detect_tier(&self, mask: &BinaryMask, tier: &HoughTier) -> Result<Vec<Segment>> {
        let run = TierRun::new(mask, tier, self.max_accumulator_bytes)?;
        Ok(run.run(self.seed, self.max_segments))
    }
}

impl SegmentDetector for ProbabilisticHough {
    fn detect_segments(&self, mask: &BinaryMask) -> Result<Vec<Segment>> {
        let tiers = self
            .tiers
            .clone()
            .unwrap_or_else(|| HoughTier::auto_tiers(mask.width(), mask.height()));

        let mut segments = Vec::new();
        for (i, tier) in tiers.iter().enumerate() {
            let found = self.detect_tier(mask, tier)?;
            debug!(
                "Hough tier {} (threshold {}, min length {:.1}, gap {:.1}) found {} segments",
                i,
                tier.threshold,
                tier.min_length,
                tier.max_gap,
                found.len()
            );
            segments.extend(found);
        }
        Ok(segments)
    }
}

struct TierRun<'a> {
    mask: &'a BinaryMask,
    width: i64,
    height: i64,
    num_rho: usize,
    rho_offset: i64,
    /// cos θ / ρ and sin θ / ρ per angle bin
    trig: Vec<(f64, f64)>,
    theta_step: f64,
    threshold: i32,
    min_length: f64,
    max_gap: f64,
}

impl<'a> TierRun<'a> {
    fn new(mask: &'a BinaryMask, tier: &HoughTier, max_bytes: u64) -> Result<Self> {
        let (width, height) = (mask.width() as i64, mask.height() as i64);
        let (rho, theta_deg) = (tier.rho, tier.theta_deg);
        if !(rho.is_finite() && rho > 0.0 && theta_deg.is_finite() && theta_deg > 0.0) {
            return Err(TraceError::ImageProcessing(format!(
                "Hough tier resolution rho={rho}, theta={theta_deg}° must be positive"
            )));
        }
        let theta_step = theta_deg.to_radians();

        // Sized in floating point so absurd resolutions cannot overflow
        let num_theta = (PI / theta_step).round().max(1.0);
        let num_rho = (((width + height) * 2 + 1) as f64 / rho).round();
        let bytes = num_theta * num_rho * std::mem::size_of::<i32>() as f64;
        if bytes > max_bytes as f64 {
            return Err(TraceError::AccumulatorTooLarge {
                bytes: bytes.min(u64::MAX as f64) as u64,
                limit: max_bytes,
            });
        }
        let (num_theta, num_rho) = (num_theta as usize, num_rho as usize);
        let trig = (0..num_theta)
            .map(|n| {
                let (sin_t, cos_t) = (n as f64 * theta_step).sin_cos();
                (cos_t / rho, sin_t / rho)
            })
            .collect();

        Ok(Self {
            mask,
            width,
            height,
            num_rho,
            rho_offset: (num_rho as i64 - 1) / 2,
            trig,
            theta_step,
            threshold: tier.threshold as i32,
            min_length: tier.min_length,
            max_gap: tier.max_gap,
        })
    }

    #[inline]
    fn rho_bin(&self, n: usize, x: i64, y: i64) -> Option<usize> {
        let (c, s) = self.trig[n];
        let r = (x as f64 * c + y as f64 * s).round() as i64 + self.rho_offset;
        (r >= 0 && (r as usize) < self.num_rho).then_some(r as usize)
    }

    #[inline]
    fn index(&self, x: i64, y: i64) -> usize {
        (y * self.width + x) as usize
    }

    fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn run(&self, seed: u64, max_segments: usize) -> Vec<Segment> {
        let mut segments = Vec::new();
        if self.width == 0 || self.height == 0 {
            return segments;
        }

        let num_theta = self.trig.len();
        let mut accumulator = vec![0i32; num_theta * self.num_rho];
        let mut available = self.mask.data().to_vec();
        let mut voted = vec![false; available.len()];

        let mut points: Vec<(i64, i64)> = self
            .mask
            .foreground()
            .map(|(x, y)| (x as i64, y as i64))
            .collect();
        let mut rng = StdRng::seed_from_u64(seed);
        points.shuffle(&mut rng);

        for &(x0, y0) in &points {
            let idx0 = self.index(x0, y0);
            if available[idx0] == 0 {
                continue;
            }

            // Vote and remember the strongest bin
            let mut best_votes = self.threshold - 1;
            let mut best_theta = None;
            for n in 0..num_theta {
                if let Some(r) = self.rho_bin(n, x0, y0) {
                    let cell = &mut accumulator[n * self.num_rho + r];
                    *cell += 1;
                    if *cell > best_votes {
                        best_votes = *cell;
                        best_theta = Some(n);
                    }
                }
            }
            voted[idx0] = true;

            let Some(theta_bin) = best_theta else {
                continue;
            };

            let (dx, dy) = self.walk_step(theta_bin);
            let ends = [
                self.extend(&available, (x0, y0), (dx, dy)),
                self.extend(&available, (x0, y0), (-dx, -dy)),
            ];

            let good = (ends[1].0 - ends[0].0).abs() as f64 >= self.min_length
                || (ends[1].1 - ends[0].1).abs() as f64 >= self.min_length;

            // Clear the walked run; withdraw votes only if it becomes a segment
            for (k, &end) in ends.iter().enumerate() {
                let (sx, sy) = if k == 0 { (dx, dy) } else { (-dx, -dy) };
                let (mut fx, mut fy) = (x0 as f64, y0 as f64);
                loop {
                    let (px, py) = (fx.round() as i64, fy.round() as i64);
                    if !self.in_bounds(px, py) {
                        break;
                    }
                    let idx = self.index(px, py);
                    if available[idx] != 0 {
                        if good && voted[idx] {
                            for n in 0..num_theta {
                                if let Some(r) = self.rho_bin(n, px, py) {
                                    accumulator[n * self.num_rho + r] -= 1;
                                }
                            }
                            voted[idx] = false;
                        }
                        available[idx] = 0;
                    }
                    if (px, py) == end {
                        break;
                    }
                    fx += sx;
                    fy += sy;
                }
            }

            if good {
                segments.push(Segment::new(
                    ends[0].0 as f64,
                    ends[0].1 as f64,
                    ends[1].0 as f64,
                    ends[1].1 as f64,
                ));
                if segments.len() >= max_segments {
                    break;
                }
            }
        }

        segments
    }

    /// Unit step along the major axis of the line whose normal is bin `theta_bin`
    fn walk_step(&self, theta_bin: usize) -> (f64, f64) {
        let theta = theta_bin as f64 * self.theta_step;
        let (a, b) = (-theta.sin(), theta.cos());
        if a.abs() > b.abs() {
            (a.signum(), b / a.abs())
        } else {
            (a / b.abs(), b.signum())
        }
    }

    /// Furthest still-available pixel reachable without exceeding the gap
    fn extend(&self, available: &[u8], from: (i64, i64), step: (f64, f64)) -> (i64, i64) {
        let mut end = from;
        let mut gap = 0usize;
        let (mut fx, mut fy) = (from.0 as f64, from.1 as f64);
        loop {
            fx += step.0;
            fy += step.1;
            let (px, py) = (fx.round() as i64, fy.round() as i64);
            if !self.in_bounds(px, py) {
                break;
            }
            if available[self.index(px, py)] != 0 {
                gap = 0;
                end = (px, py);
            } else {
                gap += 1;
                if gap as f64 > self.max_gap {
                    break;
                }
            }
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(threshold: u32, min_length: f64, max_gap: f64) -> HoughTier {
        HoughTier {
            rho: 1.0,
            theta_deg: 1.0,
            threshold,
            min_length,
            max_gap,
        }
    }

    fn horizontal(mask: &mut BinaryMask, y: u32, xs: std::ops::Range<u32>) {
        for x in xs {
            mask.set(x, y, true);
        }
    }

    #[test]
    fn test_single_horizontal_line() {
        let mut mask = BinaryMask::new(100, 100);
        horizontal(&mut mask, 50, 10..90);

        let detector = ProbabilisticHough::default().with_tiers(vec![tier(20, 30.0, 3.0)]);
        let segments = detector.detect_segments(&mask).unwrap();

        assert_eq!(segments.len(), 1);
        assert!(segments[0].approx_eq(&Segment::new(10.0, 50.0, 89.0, 50.0), 1e-9));
    }

    #[test]
    fn test_horizontal_and_vertical_lines() {
        let mut mask = BinaryMask::new(100, 100);
        horizontal(&mut mask, 20, 10..90);
        for y in 30..95 {
            mask.set(60, y, true);
        }

        let detector = ProbabilisticHough::default().with_tiers(vec![tier(20, 30.0, 3.0)]);
        let segments = detector.detect_segments(&mask).unwrap();

        assert_eq!(segments.len(), 2);
        assert!(segments
            .iter()
            .any(|s| s.approx_eq(&Segment::new(10.0, 20.0, 89.0, 20.0), 1e-9)));
        assert!(segments
            .iter()
            .any(|s| s.approx_eq(&Segment::new(60.0, 30.0, 60.0, 94.0), 1e-9)));
    }

    #[test]
    fn test_gap_tolerance_bridges_dashes() {
        // 8 on, 2 off
        let mut mask = BinaryMask::new(120, 60);
        for x in 0..100u32 {
            if x % 10 < 8 {
                mask.set(x + 10, 30, true);
            }
        }

        let bridged = ProbabilisticHough::default()
            .with_tiers(vec![tier(20, 30.0, 3.0)])
            .detect_segments(&mask)
            .unwrap();
        assert_eq!(bridged.len(), 1);
        assert!(bridged[0].length() > 90.0);

        let broken = ProbabilisticHough::default()
            .with_tiers(vec![tier(20, 30.0, 1.0)])
            .detect_segments(&mask)
            .unwrap();
        assert!(broken.is_empty());
    }

    #[test]
    fn test_tiers_are_concatenated() {
        let mut mask = BinaryMask::new(100, 100);
        horizontal(&mut mask, 50, 10..90);

        let detector = ProbabilisticHough::default()
            .with_tiers(vec![tier(20, 30.0, 3.0), tier(10, 10.0, 3.0)]);
        let segments = detector.detect_segments(&mask).unwrap();

        assert_eq!(segments.len(), 2);
        assert!(segments[0].approx_eq(&segments[1], 1e-9));
    }

    #[test]
    fn test_same_seed_same_output() {
        let mut mask = BinaryMask::new(80, 80);
        horizontal(&mut mask, 10, 5..75);
        for i in 0..60 {
            mask.set(10 + i, 15 + i, true);
        }
        let detector = ProbabilisticHough::default().with_tiers(vec![tier(15, 20.0, 3.0)]);
        let a = detector.detect_segments(&mask).unwrap();
        let b = detector.detect_segments(&mask).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_empty_mask_yields_nothing() {
        let mask = BinaryMask::new(50, 50);
        let segments = ProbabilisticHough::default().detect_segments(&mask).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn test_degenerate_tier_resolution_is_an_error() {
        let mut mask = BinaryMask::new(40, 40);
        horizontal(&mut mask, 20, 5..35);
        for (rho, theta_deg) in [(0.0, 1.0), (-1.0, 1.0), (1.0, 0.0), (f64::NAN, 1.0), (1.0, f64::INFINITY)] {
            let tier = HoughTier {
                rho,
                theta_deg,
                ..tier(10, 10.0, 3.0)
            };
            let result = ProbabilisticHough::default().detect_tier(&mask, &tier);
            assert!(
                matches!(result, Err(TraceError::ImageProcessing(_))),
                "rho {rho}, theta {theta_deg}"
            );
        }
    }

    #[test]
    fn test_fine_rho_on_large_mask_is_refused_before_allocating() {
        // About 1e10 bytes at 4 bytes per cell
        let mut mask = BinaryMask::new(4000, 3000);
        horizontal(&mut mask, 1500, 100..3900);
        let tier = HoughTier {
            rho: 0.001,
            ..tier(20, 30.0, 3.0)
        };
        let err = ProbabilisticHough::default()
            .with_tiers(vec![tier])
            .detect_segments(&mask)
            .unwrap_err();
        assert!(matches!(
            err,
            TraceError::AccumulatorTooLarge { limit, .. } if limit == HoughConfig::default().max_accumulator_bytes
        ));
    }

    #[test]
    fn test_short_runs_are_rejected() {
        let mut mask = BinaryMask::new(100, 100);
        horizontal(&mut mask, 50, 10..30);
        let segments = ProbabilisticHough::default()
            .with_tiers(vec![tier(10, 30.0, 3.0)])
            .detect_segments(&mask)
            .unwrap();
        assert!(segments.is_empty());
    }
}

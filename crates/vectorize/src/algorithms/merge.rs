use std::collections::VecDeque;

use tracing::debug;

use crate::{
    config::MergeConfig,
    error::Result,
    traits::SegmentPostProcessor,
    types::Segment,
};

/// Collapses chains of near-collinear, near-touching segments into single
/// CAD lines.
///
/// Two segments are compatible when their undirected angles differ by at
/// most the (length-adjusted) angle tolerance and some pair of endpoints is
/// within the gap tolerance. Groups are the connected components of that
/// relation, so merging is transitive. Each group of two or more becomes the
/// segment spanning the extreme endpoints projected onto the group's mean
/// direction; singletons pass through untouched.
#[derive(Debug, Clone)]
pub struct SegmentMerger {
    pub angle_tolerance_deg: f64,
    pub gap_tolerance_px: f64,
    /// Endpoint quantization allowance, see [`MergeConfig::endpoint_jitter_px`]
    pub endpoint_jitter_px: f64,
    /// Scale the gap with the raster in [`SegmentPostProcessor::process`]
    pub scale_gap_with_image: bool,
}

impl Default for SegmentMerger {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

impl SegmentMerger {
    /// Fixed tolerances, default endpoint jitter
    pub fn new(angle_tolerance_deg: f64, gap_tolerance_px: f64) -> Self {
        Self {
            angle_tolerance_deg,
            gap_tolerance_px,
            endpoint_jitter_px: MergeConfig::default().endpoint_jitter_px,
            scale_gap_with_image: false,
        }
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            angle_tolerance_deg: config.angle_tolerance_deg,
            gap_tolerance_px: config.gap_tolerance_px,
            endpoint_jitter_px: config.endpoint_jitter_px,
            scale_gap_with_image: config.scale_gap_with_image,
        }
    }

    pub fn with_endpoint_jitter(mut self, jitter_px: f64) -> Self {
        self.endpoint_jitter_px = jitter_px;
        self
    }

    /// Angle tolerance for a pair, widened for short segments whose
    /// direction is dominated by endpoint rounding
    fn angle_tolerance_for(&self, a: &Segment, b: &Segment) -> f64 {
        let base = self.angle_tolerance_deg;
        if self.endpoint_jitter_px <= 0.0 {
            return base;
        }
        let shortest = a.length().min(b.length());
        let slack = (2.0 * self.endpoint_jitter_px / shortest).atan().to_degrees();
        base + slack.min(base)
    }

    fn compatible(&self, a: &Segment, b: &Segment, gap: f64) -> bool {
        angle_between(a.angle_deg(), b.angle_deg()) <= self.angle_tolerance_for(a, b)
            && a.endpoint_gap(b) <= gap
    }

    /// Merge with an explicit gap tolerance
    pub fn merge_with_gap(&self, segments: &[Segment], gap: f64) -> Vec<Segment> {
        let live: Vec<&Segment> = segments.iter().filter(|s| !s.is_degenerate()).collect();
        let mut grouped = vec![false; live.len()];
        let mut merged = Vec::new();

        for seed in 0..live.len() {
            if grouped[seed] {
                continue;
            }
            grouped[seed] = true;
            let mut members = vec![seed];
            let mut frontier = VecDeque::from([seed]);

            while let Some(current) = frontier.pop_front() {
                for candidate in 0..live.len() {
                    if !grouped[candidate] && self.compatible(live[current], live[candidate], gap) {
                        grouped[candidate] = true;
                        members.push(candidate);
                        frontier.push_back(candidate);
                    }
                }
            }

            let group: Vec<&Segment> = members.iter().map(|&i| live[i]).collect();
            if let Some(segment) = collapse(&group) {
                if !segment.is_degenerate() {
                    merged.push(segment);
                }
            }
        }

        merged
    }

    /// Merge with the configured, unscaled gap tolerance
    pub fn merge(&self, segments: &[Segment]) -> Vec<Segment> {
        self.merge_with_gap(segments, self.gap_tolerance_px)
    }
}

impl SegmentPostProcessor for SegmentMerger {
    fn process(&self, segments: Vec<Segment>, width: u32, height: u32) -> Result<Vec<Segment>> {
        let gap = MergeConfig {
            angle_tolerance_deg: self.angle_tolerance_deg,
            gap_tolerance_px: self.gap_tolerance_px,
            scale_gap_with_image: self.scale_gap_with_image,
            endpoint_jitter_px: self.endpoint_jitter_px,
        }
        .gap_for(width, height);

        let merged = self.merge_with_gap(&segments, gap);
        debug!(
            "Merged {} segments into {} (gap {:.1}px, angle {:.1}°)",
            segments.len(),
            merged.len(),
            gap,
            self.angle_tolerance_deg
        );
        Ok(merged)
    }
}

/// Smallest difference between two undirected angles in degrees
pub fn angle_between(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(180.0);
    d.min(180.0 - d)
}

fn collapse(group: &[&Segment]) -> Option<Segment> {
    match group {
        [] => None,
        [only] => Some(**only),
        _ => {
            // Mean of doubled angles, so opposite orientations agree
            let (mut sx, mut sy) = (0.0, 0.0);
            for s in group {
                let theta = (s.end[1] - s.start[1]).atan2(s.end[0] - s.start[0]);
                sx += (2.0 * theta).cos();
                sy += (2.0 * theta).sin();
            }
            let theta = if sx.hypot(sy) > 1e-12 {
                0.5 * sy.atan2(sx)
            } else {
                let longest = group
                    .iter()
                    .max_by(|a, b| a.length().total_cmp(&b.length()))?;
                (longest.end[1] - longest.start[1]).atan2(longest.end[0] - longest.start[0])
            };
            let (uy, ux) = theta.sin_cos();

            let mut lo = (f64::INFINITY, group[0].start);
            let mut hi = (f64::NEG_INFINITY, group[0].start);
            for p in group.iter().flat_map(|s| [s.start, s.end]) {
                let t = p[0] * ux + p[1] * uy;
                if t < lo.0 {
                    lo = (t, p);
                }
                if t > hi.0 {
                    hi = (t, p);
                }
            }
            Some(Segment {
                start: lo.1,
                end: hi.1,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_nearly_collinear_touching_segments_merge() {
        let input = vec![
            Segment::new(0.0, 0.0, 10.0, 0.0),
            Segment::new(10.0, 1.0, 20.0, 0.0),
            Segment::new(100.0, 100.0, 110.0, 100.0),
        ];

        let merged = SegmentMerger::new(5.0, 3.0).merge(&input);

        assert_eq!(merged.len(), 2);
        assert!(merged[0].approx_eq(&Segment::new(0.0, 0.0, 20.0, 0.0), 1e-9));
        assert!(merged[1].approx_eq(&input[2], 1e-12));
    }

    #[test]
    fn test_without_jitter_allowance_angle_is_strict() {
        let input = vec![
            Segment::new(0.0, 0.0, 10.0, 0.0),
            Segment::new(10.0, 1.0, 20.0, 0.0),
        ];
        let merged = SegmentMerger::new(5.0, 3.0)
            .with_endpoint_jitter(0.0)
            .merge(&input);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let input = vec![
            Segment::new(0.0, 0.0, 30.0, 0.5),
            Segment::new(32.0, 0.5, 60.0, 1.0),
            Segment::new(61.0, 1.0, 90.0, 1.0),
            Segment::new(10.0, 40.0, 10.0, 90.0),
            Segment::new(10.5, 93.0, 10.5, 120.0),
            Segment::new(50.0, 50.0, 80.0, 80.0),
        ];
        let merger = SegmentMerger::new(3.0, 6.0);

        let once = merger.merge(&input);
        let twice = merger.merge(&once);

        assert_eq!(once.len(), 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_grouping_is_transitive() {
        // First and last are far apart but chained through the middle one
        let input = vec![
            Segment::new(0.0, 0.0, 20.0, 0.0),
            Segment::new(50.0, 0.0, 70.0, 0.0),
            Segment::new(22.0, 0.0, 48.0, 0.0),
        ];
        let merged = SegmentMerger::new(3.0, 5.0).merge(&input);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].approx_eq(&Segment::new(0.0, 0.0, 70.0, 0.0), 1e-9));
    }

    #[test]
    fn test_angles_wrap_at_180() {
        let input = vec![
            Segment::new(0.0, 0.0, 10.0, -0.17),
            Segment::new(10.0, 0.0, 20.0, 0.17),
        ];
        let merged = SegmentMerger::new(3.0, 1.0).merge(&input);
        assert_eq!(merged.len(), 1);
        assert_relative_eq!(merged[0].length(), 20.0, epsilon = 0.1);
    }

    #[test]
    fn test_parallel_but_distant_segments_stay_apart() {
        let input = vec![
            Segment::new(0.0, 0.0, 40.0, 0.0),
            Segment::new(0.0, 20.0, 40.0, 20.0),
        ];
        assert_eq!(SegmentMerger::new(3.0, 6.0).merge(&input).len(), 2);
    }

    #[test]
    fn test_degenerate_segments_are_dropped() {
        let input = vec![
            Segment::new(5.0, 5.0, 5.0, 5.0),
            Segment::new(0.0, 0.0, 10.0, 0.0),
        ];
        let merged = SegmentMerger::new(3.0, 6.0).merge(&input);
        assert_eq!(merged, vec![input[1]]);
    }

    #[test]
    fn test_overlapping_duplicates_collapse() {
        let a = Segment::new(10.0, 50.0, 89.0, 50.0);
        let b = Segment::new(89.0, 50.0, 10.0, 50.0);
        let merged = SegmentMerger::new(3.0, 6.0).merge(&[a, b]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].approx_eq(&a, 1e-9));
    }

    #[test]
    fn test_post_processor_scales_gap_for_large_rasters() {
        let input = vec![
            Segment::new(0.0, 0.0, 100.0, 0.0),
            Segment::new(110.0, 0.0, 200.0, 0.0),
        ];
        let merger = SegmentMerger::default();
        assert_eq!(merger.process(input.clone(), 800, 600).unwrap().len(), 2);
        assert_eq!(merger.process(input, 4000, 3000).unwrap().len(), 1);
    }

    #[test]
    fn test_angle_between() {
        assert_relative_eq!(angle_between(179.0, 1.0), 2.0);
        assert_relative_eq!(angle_between(10.0, 40.0), 30.0);
        assert_relative_eq!(angle_between(0.0, 90.0), 90.0);
    }
}

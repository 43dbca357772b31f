use rayon::prelude::*;
use tracing::debug;

use crate::{config::SkeletonConfig, types::BinaryMask};

/// Zhang–Suen thinning.
///
/// Each cycle runs two sub-steps; every sub-step first collects all deletable
/// pixels and only then clears them, so deletions never influence neighbour
/// lookups within the same pass. The outermost pixel ring is left untouched.
#[derive(Debug, Clone, Default)]
pub struct ZhangSuenThinner {
    /// Cycle cap. `None` uses [`ZhangSuenThinner::iteration_cap`].
    pub max_iterations: Option<u32>,
    pub parallel: bool,
}

/// Result of thinning a mask
#[derive(Debug, Clone)]
pub struct ThinningOutcome {
    pub mask: BinaryMask,
    /// Full cycles executed, including the final cycle that removed nothing
    pub iterations: u32,
    /// False when the cycle cap stopped the loop before a fixed point
    pub converged: bool,
}

impl ZhangSuenThinner {
    pub fn from_config(config: &SkeletonConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Each cycle peels at least one layer from every side, so half the
    /// diagonal plus one confirming cycle bounds any mask.
    pub fn iteration_cap(width: u32, height: u32) -> u32 {
        let diagonal = (width as f64).hypot(height as f64);
        (diagonal / 2.0).ceil() as u32 + 1
    }

    pub fn thin(&self, mask: &BinaryMask) -> ThinningOutcome {
        let (width, height) = (mask.width(), mask.height());
        let mut mask = mask.clone();

        if width < 3 || height < 3 {
            return ThinningOutcome {
                mask,
                iterations: 0,
                converged: true,
            };
        }

        let cap = self
            .max_iterations
            .unwrap_or_else(|| Self::iteration_cap(width, height));
        let mut iterations = 0;
        let mut converged = false;

        while iterations < cap {
            iterations += 1;
            let mut removed = 0;
            for step in [SubStep::First, SubStep::Second] {
                let doomed = self.candidates(&mask, step);
                removed += doomed.len();
                let data = mask.data_mut();
                for idx in doomed {
                    data[idx] = 0;
                }
            }
            if removed == 0 {
                converged = true;
                break;
            }
        }

        debug!(
            "Thinning finished after {} cycles (converged: {})",
            iterations, converged
        );

        ThinningOutcome {
            mask,
            iterations,
            converged,
        }
    }

    fn candidates(&self, mask: &BinaryMask, step: SubStep) -> Vec<usize> {
        let width = mask.width() as usize;
        let height = mask.height() as usize;
        let data = mask.data();

        let scan_row = |y: usize| -> Vec<usize> {
            (1..width - 1)
                .filter_map(|x| {
                    let idx = y * width + x;
                    if data[idx] == 0 {
                        return None;
                    }
                    let n = neighbours(data, width, x, y);
                    step.deletable(&n).then_some(idx)
                })
                .collect()
        };

        if self.parallel {
            (1..height - 1)
                .into_par_iter()
                .flat_map_iter(scan_row)
                .collect()
        } else {
            (1..height - 1).flat_map(scan_row).collect()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SubStep {
    First,
    Second,
}

impl SubStep {
    /// `n` holds P2..P9: N, NE, E, SE, S, SW, W, NW
    fn deletable(self, n: &[u8; 8]) -> bool {
        let b = foreground_count(n);
        if !(2..=6).contains(&b) || transitions(n) != 1 {
            return false;
        }
        let [p2, _, p4, _, p6, _, p8, _] = *n;
        match self {
            Self::First => p2 * p4 * p6 == 0 && p4 * p6 * p8 == 0,
            Self::Second => p2 * p4 * p8 == 0 && p2 * p6 * p8 == 0,
        }
    }
}

/// Clockwise 8-neighbourhood starting at North. Caller keeps (x, y) off the border.
#[inline]
fn neighbours(data: &[u8], width: usize, x: usize, y: usize) -> [u8; 8] {
    let up = (y - 1) * width;
    let mid = y * width;
    let down = (y + 1) * width;
    [
        data[up + x],
        data[up + x + 1],
        data[mid + x + 1],
        data[down + x + 1],
        data[down + x],
        data[down + x - 1],
        data[mid + x - 1],
        data[up + x - 1],
    ]
}

#[inline]
pub(crate) fn foreground_count(n: &[u8; 8]) -> u32 {
    n.iter().map(|&v| v as u32).sum()
}

/// Number of 0→1 transitions walking once around the ordered neighbourhood
#[inline]
pub(crate) fn transitions(n: &[u8; 8]) -> u32 {
    (0..8)
        .filter(|&i| n[i] == 0 && n[(i + 1) % 8] != 0)
        .count() as u32
}

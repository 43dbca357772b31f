use std::f64::consts::TAU;

use image::GrayImage;
use imageproc::{
    edges::canny,
    filter::gaussian_blur_f32,
    gradients::{horizontal_sobel, vertical_sobel},
};
use tracing::debug;

use crate::{
    config::CircleConfig,
    error::{Result, TraceError},
    traits::CircleDetector,
    types::{distance, Circle},
};

/// Gradient-directed circle Hough transform over a (x, y, r) accumulator.
///
/// Every edge pixel votes along its gradient, in both directions, once per
/// radius bin. Peaks are scored by their 3×3×3 neighbourhood sum, must be
/// local maxima, must clear `max(vote_threshold, min_coverage · 2πr)`, and
/// are accepted strongest first subject to the minimum centre distance.
///
/// Only [`WINDOW`] radius slabs are alive at once: a layer is scored as soon
/// as the two slabs above it are voted, and its slab is reused afterwards.
#[derive(Debug, Clone, Default)]
pub struct HoughCircleDetector {
    pub config: CircleConfig,
}

/// Radius slabs held in memory: the scored layer plus two on either side
const WINDOW: usize = 5;

/// Rolling window over the radius axis of the accumulator
struct RadiusWindow {
    cols: usize,
    rows: usize,
    radii: usize,
    slabs: Vec<Vec<u16>>,
    /// Cells of each slab that hold at least one vote
    touched: Vec<Vec<usize>>,
}

impl RadiusWindow {
    fn new(cols: usize, rows: usize, radii: usize) -> Self {
        Self {
            cols,
            rows,
            radii,
            slabs: vec![vec![0u16; cols * rows]; WINDOW],
            touched: vec![Vec::new(); WINDOW],
        }
    }

    fn bytes(cols: usize, rows: usize) -> u64 {
        (cols as u64)
            .saturating_mul(rows as u64)
            .saturating_mul(WINDOW as u64)
            .saturating_mul(std::mem::size_of::<u16>() as u64)
    }

    /// Empty the slab that layer `k` will occupy
    fn reset(&mut self, k: usize) {
        let slot = k % WINDOW;
        let slab = &mut self.slabs[slot];
        for &cell in &self.touched[slot] {
            slab[cell] = 0;
        }
        self.touched[slot].clear();
    }

    fn vote(&mut self, col: usize, row: usize, k: usize) {
        let slot = k % WINDOW;
        let cell = row * self.cols + col;
        let votes = &mut self.slabs[slot][cell];
        if *votes == 0 {
            self.touched[slot].push(cell);
        }
        *votes = votes.saturating_add(1);
    }

    /// Position of a cell in the full accumulator, used to break score ties
    #[inline]
    fn global_index(&self, col: i64, row: i64, r: i64) -> u64 {
        (r as u64 * self.rows as u64 + row as u64) * self.cols as u64 + col as u64
    }

    #[inline]
    fn get(&self, col: i64, row: i64, r: i64) -> u32 {
        if col < 0
            || row < 0
            || r < 0
            || col as usize >= self.cols
            || row as usize >= self.rows
            || r as usize >= self.radii
        {
            return 0;
        }
        self.slabs[r as usize % WINDOW][row as usize * self.cols + col as usize] as u32
    }

    fn neighbourhood(col: i64, row: i64, r: i64) -> impl Iterator<Item = (i64, i64, i64)> {
        (-1..=1).flat_map(move |dr| {
            (-1..=1).flat_map(move |dy| (-1..=1).map(move |dx| (col + dx, row + dy, r + dr)))
        })
    }

    fn score(&self, col: i64, row: i64, r: i64) -> u32 {
        Self::neighbourhood(col, row, r)
            .map(|(c, w, k)| self.get(c, w, k))
            .sum()
    }

    /// Score-weighted centre and radius bin over the neighbourhood
    fn refine(&self, col: i64, row: i64, r: i64) -> (f64, f64, f64) {
        let (mut sx, mut sy, mut sr, mut total) = (0.0, 0.0, 0.0, 0.0);
        for (c, w, k) in Self::neighbourhood(col, row, r) {
            let v = self.get(c, w, k) as f64;
            sx += v * c as f64;
            sy += v * w as f64;
            sr += v * k as f64;
            total += v;
        }
        if total == 0.0 {
            return (col as f64, row as f64, r as f64);
        }
        (sx / total, sy / total, sr / total)
    }

    /// Local maxima of layer `layer` scoring at least `required`.
    ///
    /// Layers `layer - 2 ..= layer + 2` must be voted. A neighbourhood that
    /// sums to `required` holds some cell with `required / 27` votes, so only
    /// cells next to such a cell are scored.
    fn peaks_in_layer(&self, layer: usize, required: f64) -> Vec<Peak> {
        let floor = ((required / 27.0).ceil() as u32).max(1);
        let (cols, rows) = (self.cols as i64, self.rows as i64);

        let mut candidates = Vec::new();
        for k in layer.saturating_sub(1)..=(layer + 1).min(self.radii - 1) {
            let slab = &self.slabs[k % WINDOW];
            for &cell in &self.touched[k % WINDOW] {
                if (slab[cell] as u32) < floor {
                    continue;
                }
                let (col, row) = ((cell % self.cols) as i64, (cell / self.cols) as i64);
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (c, w) = (col + dx, row + dy);
                        if c >= 0 && w >= 0 && c < cols && w < rows {
                            candidates.push((w * cols + c) as usize);
                        }
                    }
                }
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        let r = layer as i64;
        let mut peaks = Vec::new();
        for cell in candidates {
            let (col, row) = ((cell % self.cols) as i64, (cell / self.cols) as i64);
            let score = self.score(col, row, r);
            if (score as f64) < required {
                continue;
            }
            // Plateaus go to the lowest accumulator index
            let index = self.global_index(col, row, r);
            let is_max = Self::neighbourhood(col, row, r)
                .filter(|&(c, w, k)| (c, w, k) != (col, row, r))
                .all(|(c, w, k)| {
                    if c < 0 || w < 0 || k < 0 || c >= cols || w >= rows || k as usize >= self.radii {
                        return true;
                    }
                    let other = self.score(c, w, k);
                    other < score || (other == score && self.global_index(c, w, k) > index)
                });
            if !is_max {
                continue;
            }
            let (col, row, bin) = self.refine(col, row, r);
            peaks.push(Peak {
                index,
                score,
                col,
                row,
                bin,
            });
        }
        peaks
    }
}

/// A scored local maximum, refined to sub-cell accumulator coordinates
struct Peak {
    index: u64,
    score: u32,
    col: f64,
    row: f64,
    bin: f64,
}

/// Edge pixel with its unit gradient direction
struct EdgePoint {
    x: f64,
    y: f64,
    ux: f64,
    uy: f64,
}

impl HoughCircleDetector {
    pub fn new(config: CircleConfig) -> Self {
        Self { config }
    }

    fn required_score(&self, radius: f64) -> f64 {
        (self.config.vote_threshold as f64).max(self.config.min_coverage * TAU * radius)
    }

    fn edge_points(&self, gray: &GrayImage) -> Vec<EdgePoint> {
        let cfg = &self.config;
        let blurred = if cfg.blur_sigma > 0.0 {
            gaussian_blur_f32(gray, cfg.blur_sigma)
        } else {
            gray.clone()
        };
        let edges = canny(&blurred, cfg.canny_low, cfg.canny_high);
        let gx = horizontal_sobel(&blurred);
        let gy = vertical_sobel(&blurred);

        edges
            .enumerate_pixels()
            .filter(|(_, _, px)| px[0] != 0)
            .filter_map(|(x, y, _)| {
                let dx = gx.get_pixel(x, y)[0] as f64;
                let dy = gy.get_pixel(x, y)[0] as f64;
                let magnitude = dx.hypot(dy);
                (magnitude >= 1e-6).then(|| EdgePoint {
                    x: x as f64,
                    y: y as f64,
                    ux: dx / magnitude,
                    uy: dy / magnitude,
                })
            })
            .collect()
    }
}

impl CircleDetector for HoughCircleDetector {
    fn detect_circles(&self, gray: &GrayImage) -> Result<Vec<Circle>> {
        let (width, height) = gray.dimensions();
        if width < 3 || height < 3 {
            return Err(TraceError::ImageProcessing(format!(
                "{width}x{height} image is too small for circle detection"
            )));
        }

        let cfg = &self.config;
        let dp = if cfg.dp.is_finite() && cfg.dp >= 1.0 { cfg.dp } else { 1.0 };
        let min_radius = cfg.min_radius.max(1.0);
        let max_radius = cfg.max_radius_for(width, height);
        if !(max_radius >= min_radius) {
            debug!(
                "Radius range [{:.1}, {:.1}] is empty, skipping circle detection",
                min_radius, max_radius
            );
            return Ok(Vec::new());
        }

        let cols = (width as f64 / dp).ceil() as usize + 1;
        let rows = (height as f64 / dp).ceil() as usize + 1;
        let radii = ((max_radius - min_radius) / dp).floor() as usize + 1;
        let bytes = RadiusWindow::bytes(cols, rows);
        if bytes > cfg.max_accumulator_bytes {
            return Err(TraceError::AccumulatorTooLarge {
                bytes,
                limit: cfg.max_accumulator_bytes,
            });
        }

        let points = self.edge_points(gray);
        let mut window = RadiusWindow::new(cols, rows, radii);
        let mut peaks = Vec::new();

        // Layer `k - 2` is scored once slab `k` is voted
        for k in 0..radii + 2 {
            if k < radii {
                window.reset(k);
                let radius = min_radius + k as f64 * dp;
                for p in &points {
                    for sign in [-1.0, 1.0] {
                        let col = ((p.x + sign * radius * p.ux) / dp).round();
                        let row = ((p.y + sign * radius * p.uy) / dp).round();
                        if col < 0.0 || row < 0.0 || col as usize >= cols || row as usize >= rows {
                            continue;
                        }
                        window.vote(col as usize, row as usize, k);
                    }
                }
            }
            if k >= 2 {
                let layer = k - 2;
                let required = self.required_score(min_radius + layer as f64 * dp);
                peaks.extend(window.peaks_in_layer(layer, required));
            }
        }
        peaks.sort_by(|a, b| b.score.cmp(&a.score).then(a.index.cmp(&b.index)));

        let mut circles: Vec<Circle> = Vec::new();
        for peak in &peaks {
            let center = [peak.col * dp, peak.row * dp];
            if circles
                .iter()
                .any(|c| distance(c.center, center) < cfg.min_distance)
            {
                continue;
            }
            circles.push(Circle {
                center,
                radius: min_radius + peak.bin * dp,
            });
        }

        debug!(
            "Circle Hough: {} edge points, {} candidate peaks, {} circles accepted",
            points.len(),
            peaks.len(),
            circles.len()
        );
        Ok(circles)
    }
}

use geo::Area;
use geo_types::{Coord, LineString, Polygon};
use imageproc::contours::{find_contours, Contour};
use rayon::prelude::*;
use tracing::debug;

use crate::{
    algorithms::{conic::fit_ellipse, simplification::simplify_path},
    config::ContourConfig,
    error::Result,
    traits::ShapeDetector,
    types::{ArcShape, BinaryMask, Ellipse, Polyline},
};

/// Classifies every mask contour as an ellipse or a simplified closed polyline
#[derive(Debug, Clone)]
pub struct ContourArcDetector {
    pub config: ContourConfig,
    pub parallel: bool,
}

impl Default for ContourArcDetector {
    fn default() -> Self {
        Self::new(ContourConfig::default())
    }
}

/// Ellipses whose minor/major ratio is not strictly above `cutoff` are too
/// elongated to keep as ellipses
pub fn is_round_enough(ellipse: &Ellipse, cutoff: f64) -> bool {
    ellipse.axis_ratio() > cutoff
}

impl ContourArcDetector {
    pub fn new(config: ContourConfig) -> Self {
        Self {
            config,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Decide what one contour becomes; `None` drops it
    pub fn classify(&self, points: &[[f64; 2]]) -> Option<ArcShape> {
        if points.len() < 3 || enclosed_area(points) < self.config.min_area {
            return None;
        }

        let enough_points = points.len() >= self.config.min_fit_points;
        if enough_points {
            if let Some(fit) = fit_ellipse(points) {
                let residual = fit.conic.rms_sampson(points);
                if residual <= self.config.max_fit_residual
                    && is_round_enough(&fit.ellipse, self.config.axis_ratio_cutoff)
                {
                    return Some(ArcShape::Ellipse(fit.ellipse));
                }
            }
        }

        let epsilon = if enough_points {
            self.config.epsilon
        } else {
            self.config.small_epsilon
        };
        let vertices = simplify_path(points, epsilon, true);
        (vertices.len() >= 3).then(|| {
            ArcShape::Polyline(Polyline {
                points: vertices,
                closed: true,
            })
        })
    }
}

impl ShapeDetector for ContourArcDetector {
    fn detect_shapes(&self, mask: &BinaryMask) -> Result<Vec<ArcShape>> {
        let contours = find_contours::<i32>(&mask.to_gray());
        let to_points = |contour: &Contour<i32>| -> Vec<[f64; 2]> {
            contour.points.iter().map(|p| [p.x as f64, p.y as f64]).collect()
        };

        let shapes: Vec<ArcShape> = if self.parallel {
            contours
                .par_iter()
                .filter_map(|c| self.classify(&to_points(c)))
                .collect()
        } else {
            contours
                .iter()
                .filter_map(|c| self.classify(&to_points(c)))
                .collect()
        };

        debug!(
            "Classified {} of {} contours",
            shapes.len(),
            contours.len()
        );
        Ok(shapes)
    }
}

fn enclosed_area(points: &[[f64; 2]]) -> f64 {
    let ring: Vec<Coord<f64>> = points.iter().map(|&[x, y]| Coord { x, y }).collect();
    Polygon::new(LineString::new(ring), vec![]).unsigned_area()
}

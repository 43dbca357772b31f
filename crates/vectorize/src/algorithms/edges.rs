use image::GrayImage;
use imageproc::{distance_transform::Norm, edges::canny, filter::gaussian_blur_f32, morphology};
use rayon::prelude::*;
use tracing::debug;

use crate::{
    config::EdgeConfig,
    error::{Result, TraceError},
    traits::EdgeExtractor,
    types::BinaryMask,
};

/// Canny at several blur scales, each pass dilated, OR-combined.
///
/// A sigma of zero runs Canny on the unblurred image.
#[derive(Debug, Clone)]
pub struct MultiScaleEdgeExtractor {
    pub sigmas: Vec<f32>,
    pub low_threshold: f32,
    pub high_threshold: f32,
    pub dilation_radius: u8,
    pub parallel: bool,
}

impl Default for MultiScaleEdgeExtractor {
    fn default() -> Self {
        Self::from_config(&EdgeConfig::default())
    }
}

impl MultiScaleEdgeExtractor {
    pub fn from_config(config: &EdgeConfig) -> Self {
        Self {
            sigmas: config.sigmas.clone(),
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
            dilation_radius: config.dilation_radius,
            parallel: false,
        }
    }

    /// One unblurred, undilated Canny pass
    pub fn single(low_threshold: f32, high_threshold: f32) -> Self {
        Self {
            sigmas: vec![0.0],
            low_threshold,
            high_threshold,
            dilation_radius: 0,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    fn edges_at(&self, gray: &GrayImage, sigma: f32) -> BinaryMask {
        let blurred;
        let source = if sigma > 0.0 {
            blurred = gaussian_blur_f32(gray, sigma);
            &blurred
        } else {
            gray
        };

        let edges = canny(source, self.low_threshold, self.high_threshold);
        let edges = if self.dilation_radius > 0 {
            morphology::dilate(&edges, Norm::LInf, self.dilation_radius)
        } else {
            edges
        };
        BinaryMask::from_gray(&edges)
    }
}

impl EdgeExtractor for MultiScaleEdgeExtractor {
    fn extract_edges(&self, gray: &GrayImage) -> Result<BinaryMask> {
        if self.sigmas.is_empty() {
            return Err(TraceError::ImageProcessing("no edge scales configured".into()));
        }
        if self.low_threshold > self.high_threshold {
            return Err(TraceError::ImageProcessing(format!(
                "canny low threshold {} exceeds high threshold {}",
                self.low_threshold, self.high_threshold
            )));
        }
        if self.sigmas.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(TraceError::ImageProcessing("edge sigmas must be finite and non-negative".into()));
        }

        let per_scale: Vec<BinaryMask> = if self.parallel {
            self.sigmas.par_iter().map(|&s| self.edges_at(gray, s)).collect()
        } else {
            self.sigmas.iter().map(|&s| self.edges_at(gray, s)).collect()
        };

        let (width, height) = gray.dimensions();
        let mut combined = BinaryMask::new(width, height);
        for mask in &per_scale {
            combined.union_with(mask)?;
        }

        debug!(
            "Edge extraction over {} scales marked {} pixels",
            self.sigmas.len(),
            combined.count()
        );
        Ok(combined)
    }
}

/// Morphological closing (dilate then erode) with a square structuring element
pub fn close_mask(mask: &BinaryMask, radius: u8) -> BinaryMask {
    if radius == 0 {
        return mask.clone();
    }
    BinaryMask::from_gray(&morphology::close(&mask.to_gray(), Norm::LInf, radius))
}

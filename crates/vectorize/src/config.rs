//! Tunable parameters for every stage, serializable so hosts can keep them in
//! job files.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

/// Which family of detectors a run uses
#[derive(
    Debug, Clone, Copy, Default,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq, Eq
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetectionStrategy {
    /// Trace closed contours of the thresholded drawing only
    ContourOnly,

    /// Hough lines on the skeleton, Hough circles, and contour arcs
    #[default]
    MultiPrimitive,

    /// Follow skeleton centerlines into segments and open polylines
    Centerline,
}

impl DetectionStrategy {
    /// JSON schema for the strategy enum
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DetectionStrategy)
    }

    pub fn strategy_names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ContourOnly => "Threshold, close, edge-detect and keep every contour as an ellipse or polyline",
            Self::MultiPrimitive => "Skeleton Hough lines merged into CAD segments, plus Hough circles and contour arcs",
            Self::Centerline => "Trace one-pixel centerlines into merged segments and open polylines",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BinarizeConfig {
    /// Half-size of the mean window (7 gives a 15×15 window)
    pub block_radius: u32,
    /// A pixel is foreground when darker than `local_mean * contrast_factor`
    #[schemars(range(min = 0.0, max = 1.0))]
    pub contrast_factor: f32,
}

impl Default for BinarizeConfig {
    fn default() -> Self {
        Self {
            block_radius: 7,
            contrast_factor: 0.95,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SkeletonConfig {
    /// Cycle cap. `None` derives it from the image diagonal.
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EdgeConfig {
    /// Gaussian sigmas, one edge pass per entry
    pub sigmas: Vec<f32>,
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Chebyshev radius of the gap-bridging dilation (0 disables it)
    pub dilation_radius: u8,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            sigmas: vec![1.0, 2.0, 3.5],
            low_threshold: 50.0,
            high_threshold: 150.0,
            dilation_radius: 1,
        }
    }
}

/// One pass of the probabilistic Hough transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HoughTier {
    /// Distance resolution in pixels
    pub rho: f64,
    /// Angle resolution in degrees
    pub theta_deg: f64,
    /// Minimum accumulator votes for a line candidate
    pub threshold: u32,
    /// Shortest run kept, in pixels
    pub min_length: f64,
    /// Longest gap bridged along a run, in pixels
    pub max_gap: f64,
}

impl HoughTier {
    /// Coarse-then-fine tiers scaled by the smaller image dimension
    pub fn auto_tiers(width: u32, height: u32) -> Vec<HoughTier> {
        let min_dim = width.min(height) as f64;
        vec![
            HoughTier {
                rho: 1.0,
                theta_deg: 1.0,
                threshold: (min_dim / 25.0).max(40.0) as u32,
                min_length: (min_dim / 20.0).max(30.0),
                max_gap: (min_dim / 200.0).max(6.0),
            },
            HoughTier {
                rho: 1.0,
                theta_deg: 1.0,
                threshold: (min_dim / 60.0).max(15.0) as u32,
                min_length: (min_dim / 60.0).max(10.0),
                max_gap: 3.0,
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HoughConfig {
    /// Fixed tiers; `None` derives them from the image size
    pub tiers: Option<Vec<HoughTier>>,
    /// Seed for the point visiting order
    pub seed: u64,
    /// Upper bound on segments emitted per tier
    pub max_segments: usize,
    /// Largest (θ, ρ) accumulator a tier may allocate
    pub max_accumulator_bytes: u64,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            tiers: None,
            seed: 0x5eed_1e55,
            max_segments: 20_000,
            max_accumulator_bytes: 256 * 1024 * 1024,
        }
    }
}

impl HoughConfig {
    pub fn tiers_for(&self, width: u32, height: u32) -> Vec<HoughTier> {
        self.tiers
            .clone()
            .unwrap_or_else(|| HoughTier::auto_tiers(width, height))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CircleConfig {
    pub enabled: bool,
    /// Inverse accumulator resolution
    pub dp: f64,
    /// Minimum distance between accepted centers
    pub min_distance: f64,
    /// Blur applied before edge detection
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Absolute floor on the smoothed accumulator score
    pub vote_threshold: u32,
    /// Required score as a fraction of the expected circumference
    pub min_coverage: f64,
    pub min_radius: f64,
    /// `None` uses a tenth of the smaller image dimension
    pub max_radius: Option<f64>,
    pub max_accumulator_bytes: u64,
}

impl Default for CircleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dp: 1.5,
            min_distance: 20.0,
            blur_sigma: 1.5,
            canny_low: 50.0,
            canny_high: 100.0,
            vote_threshold: 30,
            min_coverage: 0.35,
            min_radius: 6.0,
            max_radius: None,
            max_accumulator_bytes: 512 * 1024 * 1024,
        }
    }
}

impl CircleConfig {
    pub fn max_radius_for(&self, width: u32, height: u32) -> f64 {
        self.max_radius
            .unwrap_or_else(|| width.min(height) as f64 / 10.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContourConfig {
    /// Contours enclosing less area than this (px²) are noise
    pub min_area: f64,
    /// Ellipse fits must have `min/max` axis ratio strictly above this
    #[schemars(range(min = 0.0, max = 1.0))]
    pub axis_ratio_cutoff: f64,
    /// Douglas–Peucker tolerance for contours with enough points to fit
    pub epsilon: f64,
    /// Douglas–Peucker tolerance for very short contours
    pub small_epsilon: f64,
    /// Fewest contour points an ellipse fit is attempted on
    pub min_fit_points: usize,
    /// RMS Sampson distance (px) above which an ellipse fit counts as failed
    pub max_fit_residual: f64,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            min_area: 18.0,
            axis_ratio_cutoff: 0.5,
            epsilon: 2.0,
            small_epsilon: 1.0,
            min_fit_points: 6,
            max_fit_residual: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct MergeConfig {
    pub angle_tolerance_deg: f64,
    pub gap_tolerance_px: f64,
    /// Grow the gap tolerance for rasters larger than 1000 px
    pub scale_gap_with_image: bool,
    /// Assumed endpoint quantization error; widens the angle tolerance for
    /// short segments by `atan(2 * jitter / length)`, never past twice the base
    pub endpoint_jitter_px: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            angle_tolerance_deg: 3.0,
            gap_tolerance_px: 6.0,
            scale_gap_with_image: true,
            endpoint_jitter_px: 0.5,
        }
    }
}

impl MergeConfig {
    pub fn gap_for(&self, width: u32, height: u32) -> f64 {
        if !self.scale_gap_with_image {
            return self.gap_tolerance_px;
        }
        let factor = (width.min(height) as f64 / 1000.0).max(1.0);
        self.gap_tolerance_px * factor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CenterlineConfig {
    /// Douglas–Peucker tolerance applied to traced chains
    pub simplify_epsilon: f64,
    /// Chains with fewer pixels are discarded as specks
    pub min_chain_pixels: usize,
}

impl Default for CenterlineConfig {
    fn default() -> Self {
        Self {
            simplify_epsilon: 1.5,
            min_chain_pixels: 5,
        }
    }
}

/// Complete detection configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TraceConfig {
    pub strategy: DetectionStrategy,
    pub binarize: BinarizeConfig,
    pub skeleton: SkeletonConfig,
    pub edges: EdgeConfig,
    pub hough: HoughConfig,
    pub circles: CircleConfig,
    pub contours: ContourConfig,
    pub merge: MergeConfig,
    pub centerline: CenterlineConfig,
}

impl TraceConfig {
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(TraceConfig)
    }

    pub fn with_strategy(mut self, strategy: DetectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ExportConfig {
    /// Drawing units per pixel. Non-positive values fall back to 1.0.
    pub scale: f64,
    pub layer: String,
    /// Vertices used when an ellipse is written as a closed polyline
    pub ellipse_segments: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            layer: "TRACED".to_string(),
            ellipse_segments: 60,
        }
    }
}

impl ExportConfig {
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// The scale actually applied: invalid input becomes 1.0
    pub fn effective_scale(&self) -> f64 {
        if self.scale.is_finite() && self.scale > 0.0 {
            self.scale
        } else {
            1.0
        }
    }
}

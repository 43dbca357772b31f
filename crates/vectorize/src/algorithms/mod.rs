pub mod binarize;
pub mod centerline;
pub mod conic;
pub mod contours;
pub mod edges;
pub mod hough_circles;
pub mod hough_lines;
pub mod merge;
pub mod simplification;
pub mod skeleton;

pub use binarize::AdaptiveMeanBinarizer;
pub use centerline::{CenterlineOutput, CenterlineTracer, PixelChain};
pub use conic::{fit_ellipse, Conic, EllipseFit};
pub use contours::{is_round_enough, ContourArcDetector};
pub use edges::{close_mask, MultiScaleEdgeExtractor};
pub use hough_circles::HoughCircleDetector;
pub use hough_lines::ProbabilisticHough;
pub use merge::{angle_between, SegmentMerger};
pub use simplification::simplify_path;
pub use skeleton::{ThinningOutcome, ZhangSuenThinner};

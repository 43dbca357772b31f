use image::GrayImage;
use crate::{
    error::Result,
    types::{ArcShape, BinaryMask, Circle, Segment},
};

/// Trait for turning a grayscale plane into a foreground mask
pub trait Binarizer: Send + Sync {
    fn binarize(&self, gray: &GrayImage) -> Result<BinaryMask>;
}

/// Trait for producing a binary edge mask from a grayscale plane
pub trait EdgeExtractor: Send + Sync {
    fn extract_edges(&self, gray: &GrayImage) -> Result<BinaryMask>;
}

/// Trait for straight-segment detectors
pub trait SegmentDetector: Send + Sync {
    fn detect_segments(&self, mask: &BinaryMask) -> Result<Vec<Segment>>;
}

/// Trait for circle detectors working on the grayscale plane
pub trait CircleDetector: Send + Sync {
    fn detect_circles(&self, gray: &GrayImage) -> Result<Vec<Circle>>;
}

/// Trait for detectors that classify mask contours into curved primitives
pub trait ShapeDetector: Send + Sync {
    fn detect_shapes(&self, mask: &BinaryMask) -> Result<Vec<ArcShape>>;
}

/// Trait for consolidating raw segment detections from a `width`×`height` raster
pub trait SegmentPostProcessor: Send + Sync {
    fn process(&self, segments: Vec<Segment>, width: u32, height: u32) -> Result<Vec<Segment>>;
}

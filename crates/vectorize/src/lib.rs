//! # Raster Plan Vectorizer
//!
//! Turns scanned or rendered line drawings (floor plans, technical sheets)
//! into CAD primitives and writes them out as DXF.
//!
//! ## Core Features
//!
//! - **Trait-based Architecture**: every detector sits behind a trait and can be swapped
//! - **Three Strategies**: contour-only, multi-primitive (Hough lines, circles, contour arcs) and centerline tracing
//! - **Fault Isolation**: a failing detector leaves a diagnostic instead of aborting the run
//! - **DXF Export**: Y-flipped, scaled output on a single layer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vectorize::{Capabilities, DxfExporter, ExportConfig, PixelBuffer, Pipeline, TraceConfig};
//!
//! let buffer = PixelBuffer::from_path("plan.png")?;
//! let pipeline = Pipeline::new(TraceConfig::default(), Capabilities::probe());
//!
//! let result = pipeline.detect(&buffer)?;
//! println!("{}", result.summary());
//!
//! DxfExporter::new(ExportConfig::default().with_scale(0.5)).save(&result, "plan.dxf")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Custom Pipeline
//!
//! ```rust,no_run
//! use vectorize::{algorithms::*, DetectionStrategy, Pipeline};
//!
//! let pipeline = Pipeline::builder()
//!     .strategy(DetectionStrategy::Centerline)
//!     .set_merger(SegmentMerger::new(2.0, 4.0))
//!     .without_circles()
//!     .build();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core modules
pub mod error;
pub mod types;
pub mod config;
pub mod runtime;
pub mod traits;
pub mod algorithms;
pub mod pipeline;
pub mod io;
pub mod session;

// Re-exports for convenience
pub use error::{Result, TraceError};
pub use types::{
    ArcShape, BinaryMask, Circle, DetectionResult, Diagnostic, Ellipse, PixelBuffer, PixelFormat,
    Polyline, Segment,
};
pub use config::{DetectionStrategy, ExportConfig, HoughTier, TraceConfig};
pub use runtime::{CancelToken, Capabilities};
pub use traits::*;
pub use pipeline::{Pipeline, builder::PipelineBuilder};
pub use io::*;
pub use session::TraceSession;

/// Detect with a default-component pipeline for `config`
pub fn detect(buffer: &PixelBuffer, config: TraceConfig) -> Result<DetectionResult> {
    Pipeline::new(config, Capabilities::probe()).detect(buffer)
}

/// DXF text for `result` at `scale` drawing units per pixel
pub fn export_dxf(result: &DetectionResult, scale: f64) -> Result<String> {
    DxfExporter::new(ExportConfig::default().with_scale(scale)).export(result)
}

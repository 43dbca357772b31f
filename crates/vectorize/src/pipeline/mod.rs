pub mod builder;

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use image::GrayImage;
use tracing::{info, warn};

use crate::{
    algorithms::{close_mask, CenterlineTracer, MultiScaleEdgeExtractor, ZhangSuenThinner},
    config::{DetectionStrategy, TraceConfig},
    error::{Result, TraceError},
    runtime::{CancelToken, Capabilities},
    traits::{
        Binarizer, CircleDetector, EdgeExtractor, SegmentDetector, SegmentPostProcessor,
        ShapeDetector,
    },
    types::{ArcShape, BinaryMask, DetectionResult, Diagnostic, PixelBuffer},
};

/// Raster-to-vector detection pipeline.
///
/// Stages run strictly in sequence. Binarization, thinning and edge
/// extraction are mandatory and their errors propagate; the segment, circle,
/// contour and merge stages are isolated, so an error or panic there leaves
/// that stage's output empty and records a [`Diagnostic`].
pub struct Pipeline {
    strategy: DetectionStrategy,
    capabilities: Capabilities,
    binarizer: Box<dyn Binarizer>,
    thinner: ZhangSuenThinner,
    edge_extractor: Box<dyn EdgeExtractor>,
    outline_edges: MultiScaleEdgeExtractor,
    segment_detector: Box<dyn SegmentDetector>,
    circle_detector: Option<Box<dyn CircleDetector>>,
    shape_detector: Box<dyn ShapeDetector>,
    merger: Box<dyn SegmentPostProcessor>,
    centerline: CenterlineTracer,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    /// Pipeline with the default components for `config`
    pub fn new(config: TraceConfig, capabilities: Capabilities) -> Self {
        Self::builder()
            .with_config(config)
            .capabilities(capabilities)
            .build()
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn detect(&self, buffer: &PixelBuffer) -> Result<DetectionResult> {
        self.detect_with_cancel(buffer, &CancelToken::new())
    }

    /// Run detection, checking `cancel` before every stage
    pub fn detect_with_cancel(
        &self,
        buffer: &PixelBuffer,
        cancel: &CancelToken,
    ) -> Result<DetectionResult> {
        let (width, height) = (buffer.width(), buffer.height());
        info!(
            "Detecting {}x{} image with {} strategy ({} workers)",
            width, height, self.strategy, self.capabilities.worker_threads
        );

        let mut result = DetectionResult::new(width, height);

        checkpoint(cancel, "binarize")?;
        let gray = buffer.luminance();
        let mask = self.binarizer.binarize(&gray)?;
        info!("Binarized: {} foreground pixels", mask.count());

        match self.strategy {
            DetectionStrategy::ContourOnly => self.run_contour_only(&mask, cancel, &mut result)?,
            DetectionStrategy::MultiPrimitive => {
                self.run_multi_primitive(&gray, &mask, cancel, &mut result)?
            }
            DetectionStrategy::Centerline => self.run_centerline(&mask, cancel, &mut result)?,
        }

        info!("Detection finished: {}", result.summary());
        Ok(result)
    }

    fn run_contour_only(
        &self,
        mask: &BinaryMask,
        cancel: &CancelToken,
        result: &mut DetectionResult,
    ) -> Result<()> {
        checkpoint(cancel, "edges")?;
        let closed = close_mask(mask, 1);
        let edges = self.outline_edges.extract_edges(&closed.to_gray())?;
        info!("Outline edges: {} pixels", edges.count());

        checkpoint(cancel, "contours")?;
        result.arcs = isolate("contours", &mut result.diagnostics, || {
            self.shape_detector.detect_shapes(&edges)
        });
        info!("Contours: {} shapes", result.arcs.len());
        Ok(())
    }

    fn run_multi_primitive(
        &self,
        gray: &GrayImage,
        mask: &BinaryMask,
        cancel: &CancelToken,
        result: &mut DetectionResult,
    ) -> Result<()> {
        let (width, height) = gray.dimensions();

        checkpoint(cancel, "skeleton")?;
        let skeleton = self.thinner.thin(mask);
        info!(
            "Skeleton: {} pixels after {} cycles{}",
            skeleton.mask.count(),
            skeleton.iterations,
            if skeleton.converged { "" } else { " (cycle cap reached)" }
        );

        checkpoint(cancel, "segments")?;
        let raw = isolate("segments", &mut result.diagnostics, || {
            self.segment_detector.detect_segments(&skeleton.mask)
        });
        info!("Hough: {} raw segments", raw.len());

        checkpoint(cancel, "merge")?;
        result.lines = isolate("merge", &mut result.diagnostics, || {
            self.merger.process(raw, width, height)
        });
        info!("Merged into {} lines", result.lines.len());

        if let Some(detector) = &self.circle_detector {
            checkpoint(cancel, "circles")?;
            result.circles = isolate("circles", &mut result.diagnostics, || {
                detector.detect_circles(gray)
            });
            info!("Circles: {}", result.circles.len());
        }

        checkpoint(cancel, "edges")?;
        let edges = self.edge_extractor.extract_edges(gray)?;
        info!("Multi-scale edges: {} pixels", edges.count());

        checkpoint(cancel, "contours")?;
        result.arcs = isolate("contours", &mut result.diagnostics, || {
            self.shape_detector.detect_shapes(&edges)
        });
        info!("Contours: {} shapes", result.arcs.len());
        Ok(())
    }

    fn run_centerline(
        &self,
        mask: &BinaryMask,
        cancel: &CancelToken,
        result: &mut DetectionResult,
    ) -> Result<()> {
        let (width, height) = (mask.width(), mask.height());

        checkpoint(cancel, "skeleton")?;
        let skeleton = self.thinner.thin(mask);
        info!(
            "Skeleton: {} pixels after {} cycles",
            skeleton.mask.count(),
            skeleton.iterations
        );

        checkpoint(cancel, "centerline")?;
        let traced = self.centerline.trace(&skeleton.mask);
        info!(
            "Centerlines: {} straight chains, {} polylines",
            traced.segments.len(),
            traced.polylines.len()
        );

        checkpoint(cancel, "merge")?;
        result.lines = isolate("merge", &mut result.diagnostics, || {
            self.merger.process(traced.segments, width, height)
        });
        result.arcs = traced.polylines.into_iter().map(ArcShape::Polyline).collect();
        Ok(())
    }

    /// Get information about the pipeline configuration
    pub fn info(&self) -> String {
        format!(
            "Pipeline: {} strategy, circles {}, {} worker threads",
            self.strategy,
            if self.circle_detector.is_some() { "on" } else { "off" },
            self.capabilities.worker_threads
        )
    }
}

fn checkpoint(cancel: &CancelToken, stage: &'static str) -> Result<()> {
    if cancel.is_cancelled() {
        info!("Cancelled before {} stage", stage);
        return Err(TraceError::Cancelled { stage });
    }
    Ok(())
}

/// Run a detector, turning errors and panics into an empty output plus a diagnostic
fn isolate<T: Default>(
    stage: &'static str,
    diagnostics: &mut Vec<Diagnostic>,
    run: impl FnOnce() -> Result<T>,
) -> T {
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!("{} stage failed: {}", stage, err);
            diagnostics.push(Diagnostic::new(stage, err.to_string()));
            T::default()
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("{} stage panicked: {}", stage, message);
            diagnostics.push(Diagnostic::new(stage, format!("panic: {message}")));
            T::default()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{algorithms::angle_between, config::CircleConfig, types::Segment};
    use image::{Rgba, RgbaImage};
    use imageproc::{
        drawing::{draw_filled_rect_mut, draw_hollow_circle_mut},
        rect::Rect,
    };

    const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    /// White sheet with a 3 px rectangle outline, a ring and a free-standing rule
    pub(crate) fn create_test_drawing() -> PixelBuffer {
        let mut img = RgbaImage::from_pixel(200, 160, Rgba([255, 255, 255, 255]));
        for (x, y, w, h) in [(30, 30, 141, 3), (30, 128, 141, 3), (30, 30, 3, 101), (168, 30, 3, 101)] {
            draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(w, h), INK);
        }
        for r in 20..22 {
            draw_hollow_circle_mut(&mut img, (100, 80), r, INK);
        }
        draw_filled_rect_mut(&mut img, Rect::at(20, 144).of_size(161, 3), INK);

        let (width, height) = img.dimensions();
        PixelBuffer::from_rgba(width, height, img.into_raw()).expect("Should build buffer")
    }

    pub(crate) fn test_config(strategy: DetectionStrategy) -> TraceConfig {
        TraceConfig {
            strategy,
            circles: CircleConfig {
                max_radius: Some(40.0),
                ..CircleConfig::default()
            },
            ..TraceConfig::default()
        }
    }

    fn has_long_horizontal(lines: &[Segment]) -> bool {
        lines
            .iter()
            .any(|l| l.length() > 120.0 && angle_between(l.angle_deg(), 0.0) < 2.0)
    }

    struct FailingCircles;

    impl CircleDetector for FailingCircles {
        fn detect_circles(&self, _gray: &GrayImage) -> Result<Vec<crate::types::Circle>> {
            Err(TraceError::ImageProcessing("accumulator exploded".into()))
        }
    }

    struct PanickingSegments;

    impl SegmentDetector for PanickingSegments {
        fn detect_segments(&self, _mask: &BinaryMask) -> Result<Vec<Segment>> {
            panic!("segment detector bug")
        }
    }

    #[test]
    fn test_multi_primitive_finds_lines_and_circle() {
        let pipeline = Pipeline::new(
            test_config(DetectionStrategy::MultiPrimitive),
            Capabilities::sequential(),
        );
        let result = pipeline.detect(&create_test_drawing()).expect("Should detect");

        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        assert!(has_long_horizontal(&result.lines));
        assert!(
            result
                .circles
                .iter()
                .any(|c| (c.center[0] - 100.0).abs() < 3.0 && (c.center[1] - 80.0).abs() < 3.0),
            "circles: {:?}",
            result.circles
        );
        assert!(!result.arcs.is_empty());
        assert_eq!((result.image_width, result.image_height), (200, 160));
    }

    #[test]
    fn test_merged_lines_have_no_zero_length_segments() {
        let result = Pipeline::new(TraceConfig::default(), Capabilities::sequential())
            .detect(&create_test_drawing())
            .unwrap();
        assert!(result.lines.iter().all(|l| !l.is_degenerate()));
    }

    #[test]
    fn test_contour_only_produces_only_arcs() {
        let pipeline = Pipeline::new(
            test_config(DetectionStrategy::ContourOnly),
            Capabilities::sequential(),
        );
        let result = pipeline.detect(&create_test_drawing()).unwrap();

        assert!(result.lines.is_empty());
        assert!(result.circles.is_empty());
        assert!(!result.arcs.is_empty());
    }

    #[test]
    fn test_centerline_traces_rule_and_loops() {
        let pipeline = Pipeline::new(
            test_config(DetectionStrategy::Centerline),
            Capabilities::sequential(),
        );
        let result = pipeline.detect(&create_test_drawing()).unwrap();

        assert!(has_long_horizontal(&result.lines));
        assert!(!result.arcs.is_empty());
        assert!(result.circles.is_empty());
    }

    #[test]
    fn test_blank_page_is_a_valid_empty_result() {
        let buffer = PixelBuffer::from_gray(64, 48, vec![255; 64 * 48]).unwrap();
        let result = Pipeline::new(TraceConfig::default(), Capabilities::sequential())
            .detect(&buffer)
            .unwrap();
        assert!(result.is_empty());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_detector_faults_are_isolated() {
        let pipeline = Pipeline::builder()
            .with_config(test_config(DetectionStrategy::MultiPrimitive))
            .capabilities(Capabilities::sequential())
            .set_circle_detector(FailingCircles)
            .set_segment_detector(PanickingSegments)
            .build();

        let result = pipeline
            .detect(&create_test_drawing())
            .expect("Faults inside detectors should not fail the run");

        assert!(result.lines.is_empty());
        assert!(result.circles.is_empty());
        assert!(!result.arcs.is_empty());
        let stages: Vec<&str> = result.diagnostics.iter().map(|d| d.stage.as_str()).collect();
        assert_eq!(stages, vec!["segments", "circles"]);
        assert!(result.diagnostics[0].message.contains("segment detector bug"));
    }

    #[test]
    fn test_cancelled_run_stops_before_first_stage() {
        let token = CancelToken::new();
        token.cancel();
        let err = Pipeline::new(TraceConfig::default(), Capabilities::sequential())
            .detect_with_cancel(&create_test_drawing(), &token)
            .unwrap_err();
        assert!(matches!(err, TraceError::Cancelled { stage: "binarize" }));
    }

    #[test]
    fn test_parallel_run_matches_sequential() {
        let buffer = create_test_drawing();
        let config = test_config(DetectionStrategy::MultiPrimitive);
        let sequential = Pipeline::new(config.clone(), Capabilities::sequential())
            .detect(&buffer)
            .unwrap();
        let parallel = Pipeline::new(config, Capabilities { worker_threads: 4 })
            .detect(&buffer)
            .unwrap();
        assert_eq!(sequential, parallel);
    }
}

use crate::{
    algorithms::{
        AdaptiveMeanBinarizer, CenterlineTracer, ContourArcDetector, HoughCircleDetector,
        MultiScaleEdgeExtractor, ProbabilisticHough, SegmentMerger, ZhangSuenThinner,
    },
    config::{DetectionStrategy, HoughTier, TraceConfig},
    pipeline::Pipeline,
    runtime::Capabilities,
    traits::{
        Binarizer, CircleDetector, EdgeExtractor, SegmentDetector, SegmentPostProcessor,
        ShapeDetector,
    },
};

/// Outline edges used by the contour-only strategy
const OUTLINE_LOW_THRESHOLD: f32 = 50.0;
const OUTLINE_HIGH_THRESHOLD: f32 = 200.0;

/// Builder for creating detection pipelines with a fluent API
pub struct PipelineBuilder {
    config: TraceConfig,
    capabilities: Capabilities,
    binarizer: Option<Box<dyn Binarizer>>,
    edge_extractor: Option<Box<dyn EdgeExtractor>>,
    segment_detector: Option<Box<dyn SegmentDetector>>,
    circle_detector: Option<Box<dyn CircleDetector>>,
    circles_disabled: bool,
    shape_detector: Option<Box<dyn ShapeDetector>>,
    merger: Option<Box<dyn SegmentPostProcessor>>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            config: TraceConfig::default(),
            capabilities: Capabilities::probe(),
            binarizer: None,
            edge_extractor: None,
            segment_detector: None,
            circle_detector: None,
            circles_disabled: false,
            shape_detector: None,
            merger: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: TraceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn strategy(mut self, strategy: DetectionStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the binarizer (replaces the adaptive-mean default)
    pub fn set_binarizer<B>(mut self, binarizer: B) -> Self
    where
        B: Binarizer + 'static,
    {
        self.binarizer = Some(Box::new(binarizer));
        self
    }

    /// Set the edge extractor used before contour classification
    pub fn set_edge_extractor<E>(mut self, extractor: E) -> Self
    where
        E: EdgeExtractor + 'static,
    {
        self.edge_extractor = Some(Box::new(extractor));
        self
    }

    pub fn set_segment_detector<D>(mut self, detector: D) -> Self
    where
        D: SegmentDetector + 'static,
    {
        self.segment_detector = Some(Box::new(detector));
        self
    }

    pub fn set_circle_detector<D>(mut self, detector: D) -> Self
    where
        D: CircleDetector + 'static,
    {
        self.circle_detector = Some(Box::new(detector));
        self.circles_disabled = false;
        self
    }

    /// Skip circle detection entirely
    pub fn without_circles(mut self) -> Self {
        self.circle_detector = None;
        self.circles_disabled = true;
        self
    }

    pub fn set_shape_detector<D>(mut self, detector: D) -> Self
    where
        D: ShapeDetector + 'static,
    {
        self.shape_detector = Some(Box::new(detector));
        self
    }

    pub fn set_merger<M>(mut self, merger: M) -> Self
    where
        M: SegmentPostProcessor + 'static,
    {
        self.merger = Some(Box::new(merger));
        self
    }

    /// Use fixed Hough tiers instead of size-derived ones
    pub fn with_hough_tiers(mut self, tiers: Vec<HoughTier>) -> Self {
        self.config.hough.tiers = Some(tiers);
        self
    }

    pub fn with_merge_tolerances(mut self, angle_deg: f64, gap_px: f64) -> Self {
        self.config.merge.angle_tolerance_deg = angle_deg;
        self.config.merge.gap_tolerance_px = gap_px;
        self
    }

    /// Build the pipeline with default components if not specified
    pub fn build(self) -> Pipeline {
        let config = self.config;
        let parallel = self.capabilities.parallel();

        let binarizer = self.binarizer.unwrap_or_else(|| {
            Box::new(AdaptiveMeanBinarizer::from_config(&config.binarize).with_parallel(parallel))
        });
        let edge_extractor = self.edge_extractor.unwrap_or_else(|| {
            Box::new(MultiScaleEdgeExtractor::from_config(&config.edges).with_parallel(parallel))
        });
        let segment_detector = self
            .segment_detector
            .unwrap_or_else(|| Box::new(ProbabilisticHough::from_config(&config.hough)));
        let circle_detector = match self.circle_detector {
            Some(detector) => Some(detector),
            None if self.circles_disabled || !config.circles.enabled => None,
            None => Some(Box::new(HoughCircleDetector::new(config.circles.clone())) as Box<dyn CircleDetector>),
        };
        let shape_detector = self.shape_detector.unwrap_or_else(|| {
            Box::new(ContourArcDetector::new(config.contours.clone()).with_parallel(parallel))
        });
        let merger = self
            .merger
            .unwrap_or_else(|| Box::new(SegmentMerger::from_config(&config.merge)));

        Pipeline {
            strategy: config.strategy,
            capabilities: self.capabilities,
            binarizer,
            thinner: ZhangSuenThinner::from_config(&config.skeleton).with_parallel(parallel),
            edge_extractor,
            outline_edges: MultiScaleEdgeExtractor::single(OUTLINE_LOW_THRESHOLD, OUTLINE_HIGH_THRESHOLD)
                .with_parallel(parallel),
            segment_detector,
            circle_detector,
            shape_detector,
            merger,
            centerline: CenterlineTracer::from_config(&config.centerline),
        }
    }

    /// Default pipeline for one strategy
    pub fn for_strategy(strategy: DetectionStrategy) -> Pipeline {
        Self::new().strategy(strategy).build()
    }

    /// Lines and contours only, on a single thread
    pub fn build_sequential_without_circles() -> Pipeline {
        Self::new()
            .capabilities(Capabilities::sequential())
            .without_circles()
            .build()
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{create_test_drawing, test_config};

    #[test]
    fn test_builder_respects_strategy_and_circle_switch() {
        let pipeline = PipelineBuilder::new()
            .strategy(DetectionStrategy::Centerline)
            .capabilities(Capabilities::sequential())
            .build();
        assert_eq!(pipeline.strategy(), DetectionStrategy::Centerline);
        assert!(pipeline.info().contains("circles on"));

        let pipeline = PipelineBuilder::build_sequential_without_circles();
        assert!(pipeline.info().contains("circles off"));
        assert_eq!(pipeline.capabilities(), Capabilities::sequential());
    }

    #[test]
    fn test_disabled_circles_yield_no_circles() {
        let mut config = test_config(DetectionStrategy::MultiPrimitive);
        config.circles.enabled = false;
        let result = PipelineBuilder::new()
            .with_config(config)
            .capabilities(Capabilities::sequential())
            .build()
            .detect(&create_test_drawing())
            .unwrap();
        assert!(result.circles.is_empty());
        assert!(!result.lines.is_empty());
    }

    #[test]
    fn test_custom_merger_is_used() {
        let pipeline = PipelineBuilder::new()
            .with_config(test_config(DetectionStrategy::MultiPrimitive))
            .capabilities(Capabilities::sequential())
            .without_circles()
            .set_merger(SegmentMerger::new(0.0, 0.0).with_endpoint_jitter(0.0))
            .build();
        let strict = pipeline.detect(&create_test_drawing()).unwrap();

        let default = PipelineBuilder::new()
            .with_config(test_config(DetectionStrategy::MultiPrimitive))
            .capabilities(Capabilities::sequential())
            .without_circles()
            .build()
            .detect(&create_test_drawing())
            .unwrap();

        assert!(strict.lines.len() >= default.lines.len());
    }
}

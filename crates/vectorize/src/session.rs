use std::{path::Path, sync::Arc};

use tracing::info;

use crate::{
    config::{ExportConfig, TraceConfig},
    error::{Result, TraceError},
    io::DxfExporter,
    pipeline::Pipeline,
    runtime::{CancelToken, Capabilities},
    types::{DetectionResult, PixelBuffer},
};

/// Working state of one tracing job: the loaded raster and the last result.
///
/// Loading a new raster discards the previous result, so an export always
/// describes the image currently loaded.
#[derive(Clone)]
pub struct TraceSession {
    buffer: Option<PixelBuffer>,
    result: Option<DetectionResult>,
    pipeline: Arc<Pipeline>,
    export: ExportConfig,
}

impl TraceSession {
    pub fn new(config: TraceConfig) -> Self {
        Self::with_pipeline(Pipeline::new(config, Capabilities::probe()))
    }

    /// Create a session around a custom pipeline
    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        Self {
            buffer: None,
            result: None,
            pipeline: Arc::new(pipeline),
            export: ExportConfig::default(),
        }
    }

    pub fn with_export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Load a raster image from file
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let buffer = PixelBuffer::from_path(path.as_ref())?;
        info!(
            "Loaded {} ({}x{})",
            path.as_ref().display(),
            buffer.width(),
            buffer.height()
        );
        self.set_buffer(buffer);
        Ok(())
    }

    /// Load a raster image from memory
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let buffer = PixelBuffer::from_bytes(bytes)?;
        self.set_buffer(buffer);
        Ok(())
    }

    /// Set the raster directly
    pub fn set_buffer(&mut self, buffer: PixelBuffer) {
        self.buffer = Some(buffer);
        self.result = None;
    }

    pub fn buffer(&self) -> Option<&PixelBuffer> {
        self.buffer.as_ref()
    }

    pub fn detect(&mut self) -> Result<&DetectionResult> {
        self.detect_with_cancel(&CancelToken::new())
    }

    pub fn detect_with_cancel(&mut self, cancel: &CancelToken) -> Result<&DetectionResult> {
        let buffer = self.buffer.as_ref().ok_or(TraceError::NoImageLoaded)?;
        let result = self.pipeline.detect_with_cancel(buffer, cancel)?;
        Ok(self.result.insert(result))
    }

    /// Result of the last successful detection on the loaded raster
    pub fn result(&self) -> Option<&DetectionResult> {
        self.result.as_ref()
    }

    pub fn export_dxf(&self) -> Result<String> {
        let result = self.result.as_ref().ok_or(TraceError::NothingToExport)?;
        DxfExporter::new(self.export.clone()).export(result)
    }

    pub fn save_dxf(&self, path: impl AsRef<Path>) -> Result<()> {
        let result = self.result.as_ref().ok_or(TraceError::NothingToExport)?;
        DxfExporter::new(self.export.clone()).save(result, path)
    }
}

impl Default for TraceSession {
    fn default() -> Self {
        Self::new(TraceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{create_test_drawing, test_config};
    use crate::config::DetectionStrategy;

    fn session() -> TraceSession {
        TraceSession::with_pipeline(Pipeline::new(
            test_config(DetectionStrategy::MultiPrimitive),
            Capabilities::sequential(),
        ))
    }

    #[test]
    fn test_detect_without_image() {
        let err = session().detect().unwrap_err();
        assert!(matches!(err, TraceError::NoImageLoaded));
    }

    #[test]
    fn test_export_before_detect_is_rejected() {
        let mut session = session();
        session.set_buffer(create_test_drawing());
        assert!(matches!(session.export_dxf(), Err(TraceError::NothingToExport)));
    }

    #[test]
    fn test_detect_then_export() {
        let mut session = session().with_export(ExportConfig::default().with_scale(0.5));
        session.set_buffer(create_test_drawing());

        let count = session.detect().expect("Should detect").primitive_count();
        assert!(count > 0);

        let dxf = session.export_dxf().unwrap();
        assert!(dxf.contains("ENTITIES"));
        assert!(dxf.contains("0\nLINE\n"));
    }

    #[test]
    fn test_new_image_clears_result() {
        let mut session = session();
        session.set_buffer(create_test_drawing());
        session.detect().unwrap();
        assert!(session.result().is_some());

        session.set_buffer(PixelBuffer::from_gray(10, 10, vec![255; 100]).unwrap());
        assert!(session.result().is_none());
    }

    #[test]
    fn test_load_bytes_decodes_png() {
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(image::GrayImage::new(12, 9))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let mut session = session();
        session.load_bytes(&png).unwrap();
        let buffer = session.buffer().unwrap();
        assert_eq!((buffer.width(), buffer.height()), (12, 9));
    }

    #[test]
    fn test_unreadable_bytes_are_an_input_error() {
        let err = session().load_bytes(b"not an image").unwrap_err();
        assert!(matches!(err, TraceError::ImageLoad(_)));
    }
}

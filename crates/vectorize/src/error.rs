use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("No image loaded")]
    NoImageLoaded,

    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, actual: usize },

    #[error("Unsupported image dimensions {width}x{height}")]
    UnsupportedDimensions { width: u32, height: u32 },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Accumulator of {bytes} bytes exceeds the {limit} byte limit")]
    AccumulatorTooLarge { bytes: u64, limit: u64 },

    #[error("Nothing to export")]
    NothingToExport,

    #[error("Detection cancelled before stage '{stage}'")]
    Cancelled { stage: &'static str },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failure() {
        let err = TraceError::AccumulatorTooLarge {
            bytes: 2048,
            limit: 1024,
        };
        assert_eq!(err.to_string(), "Accumulator of 2048 bytes exceeds the 1024 byte limit");
        assert_eq!(
            TraceError::Cancelled { stage: "edges" }.to_string(),
            "Detection cancelled before stage 'edges'"
        );
    }

    #[test]
    fn test_io_errors_convert() {
        let err: TraceError = std::io::Error::new(std::io::ErrorKind::NotFound, "plan.png").into();
        assert!(matches!(err, TraceError::Io(_)));
    }
}

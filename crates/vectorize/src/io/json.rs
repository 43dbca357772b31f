use std::{fs, path::Path};

use crate::{error::Result, types::DetectionResult};

impl DetectionResult {
    /// Pretty-printed JSON, primitives in pixel coordinates
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArcShape, Diagnostic, Polyline, Segment};

    #[test]
    fn test_result_json_layout() {
        let result = DetectionResult {
            lines: vec![Segment::new(0.0, 0.0, 10.0, 0.0)],
            arcs: vec![ArcShape::Polyline(Polyline {
                points: vec![[0.0, 0.0], [5.0, 5.0]],
                closed: false,
            })],
            diagnostics: vec![Diagnostic::new("circles", "boom")],
            ..DetectionResult::new(20, 10)
        };

        let value: serde_json::Value =
            serde_json::from_str(&result.to_json_string().unwrap()).unwrap();
        assert_eq!(value["image_width"], 20);
        assert_eq!(value["lines"][0]["end"][0], 10.0);
        assert_eq!(value["arcs"][0]["type"], "polyline");
        assert_eq!(value["diagnostics"][0]["stage"], "circles");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let result = DetectionResult {
            lines: vec![Segment::new(1.0, 2.0, 3.0, 4.0)],
            ..DetectionResult::new(8, 8)
        };
        result.save_json(&path).unwrap();
        assert_eq!(DetectionResult::load_json(&path).unwrap(), result);
    }

    #[test]
    fn test_malformed_json_is_a_serialization_error() {
        let err = DetectionResult::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::error::TraceError::Serialization(_)));
    }
}

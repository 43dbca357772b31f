use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use vectorize::{ExportConfig, TraceConfig};

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Missing input image path")]
    MissingInput,
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// One raster-to-DXF conversion: where to read, where to write, how to detect
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TraceJob {
    /// Raster image to trace (PNG, JPEG, TIFF)
    #[serde(default)]
    pub input: String,
    /// DXF destination; defaults to the input path with a `.dxf` extension
    pub output: Option<String>,
    /// Optional PNG with the detections drawn over the source
    pub preview: Option<String>,
    /// Optional JSON dump of the detection result
    pub json: Option<String>,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub detection: TraceConfig,
}

impl TraceJob {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: None,
            preview: None,
            json: None,
            export: ExportConfig::default(),
            detection: TraceConfig::default(),
        }
    }

    /// JSON schema for job files
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(TraceJob)
    }

    /// Fail early on jobs that cannot run
    pub fn validate(&self) -> Result<(), JobError> {
        if self.input.trim().is_empty() {
            return Err(JobError::MissingInput);
        }
        Ok(())
    }

    /// Explicit output path, or the input with its extension swapped for `.dxf`
    pub fn output_path(&self) -> String {
        match &self.output {
            Some(output) => output.clone(),
            None => Path::new(&self.input)
                .with_extension("dxf")
                .to_string_lossy()
                .into_owned(),
        }
    }

    /// Load a job from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, JobError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a job from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, JobError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Auto-detect file format and load the job
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(JobError::UnsupportedFileFormat),
        }
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), JobError> {
        let content = self.to_toml()?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, JobError> {
        Ok(toml::to_string_pretty(&self)?)
    }

    pub fn to_json(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }
}

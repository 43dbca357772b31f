use std::path::Path;

use geo_types::{Coord, LineString, Polygon};
use image::{DynamicImage, GrayImage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Largest accepted width or height of an input raster.
pub const MAX_DIMENSION: u32 = 32_768;

/// Sample layout of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Gray,
    Rgba,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgba => 4,
        }
    }
}

/// Decoded raster handed over by the rendering layer.
///
/// Immutable once built; the detection pipeline only ever borrows it.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw row-major samples, validating dimensions and length.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(TraceError::UnsupportedDimensions { width, height });
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.channels()))
            .ok_or(TraceError::UnsupportedDimensions { width, height })?;

        if data.len() != expected {
            return Err(TraceError::InvalidBuffer {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelFormat::Rgba, data)
    }

    pub fn from_gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, PixelFormat::Gray, data)
    }

    /// Convert any decoded image into an RGBA buffer
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self> {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba(width, height, rgba.into_raw())
    }

    /// Decode a raster image file (PNG, JPEG, TIFF)
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let image = image::open(path)?;
        Self::from_dynamic(&image)
    }

    /// Decode a raster image held in memory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?;
        Self::from_dynamic(&image)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Luminosity grayscale (0.299 R + 0.587 G + 0.114 B). Alpha is ignored.
    pub fn luminance(&self) -> GrayImage {
        let samples = match self.format {
            PixelFormat::Gray => self.data.clone(),
            PixelFormat::Rgba => self
                .data
                .chunks_exact(4)
                .map(|px| {
                    let l = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                    l.round().clamp(0.0, 255.0) as u8
                })
                .collect(),
        };

        GrayImage::from_raw(self.width, self.height, samples)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// W×H foreground/background mask. Samples are 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BinaryMask {
    /// All-background mask
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize],
        }
    }

    /// Build from a grayscale image, treating any non-zero sample as foreground
    pub fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let data = image.as_raw().iter().map(|&v| u8::from(v != 0)).collect();
        Self { width, height, data }
    }

    /// Foreground as 255, background as 0, the convention imageproc expects
    pub fn to_gray(&self) -> GrayImage {
        let samples = self.data.iter().map(|&v| v * 255).collect();
        GrayImage::from_raw(self.width, self.height, samples)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[y as usize * self.width as usize + x as usize] != 0
    }

    /// Bounds-checked lookup; anything outside the mask is background
    #[inline]
    pub fn get_signed(&self, x: i64, y: i64) -> bool {
        x >= 0
            && y >= 0
            && (x as u64) < self.width as u64
            && (y as u64) < self.height as u64
            && self.get(x as u32, y as u32)
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        self.data[y as usize * self.width as usize + x as usize] = u8::from(value);
    }

    /// Number of foreground pixels
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    /// OR another mask of equal size into this one
    pub fn union_with(&mut self, other: &BinaryMask) -> Result<()> {
        if other.width != self.width || other.height != self.height {
            return Err(TraceError::ImageProcessing(format!(
                "cannot combine {}x{} mask with {}x{} mask",
                self.width, self.height, other.width, other.height
            )));
        }
        for (dst, &src) in self.data.iter_mut().zip(&other.data) {
            *dst |= src;
        }
        Ok(())
    }

    /// Foreground pixel coordinates in row-major order
    pub fn foreground(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width as usize;
        self.data
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0)
            .map(move |(i, _)| ((i % width) as u32, (i / width) as u32))
    }
}

/// Straight segment in pixel space. Endpoint order carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    pub start: [f64; 2],
    pub end: [f64; 2],
}

impl Segment {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            start: [x1, y1],
            end: [x2, y2],
        }
    }

    pub fn length(&self) -> f64 {
        distance(self.start, self.end)
    }

    pub fn is_degenerate(&self) -> bool {
        self.length() <= f64::EPSILON
    }

    /// Direction angle in degrees folded into [0, 180)
    pub fn angle_deg(&self) -> f64 {
        let dx = self.end[0] - self.start[0];
        let dy = self.end[1] - self.start[1];
        dy.atan2(dx).to_degrees().rem_euclid(180.0)
    }

    /// Shortest distance between any endpoint of `self` and any endpoint of `other`
    pub fn endpoint_gap(&self, other: &Segment) -> f64 {
        [
            distance(self.start, other.start),
            distance(self.start, other.end),
            distance(self.end, other.start),
            distance(self.end, other.end),
        ]
        .into_iter()
        .fold(f64::INFINITY, f64::min)
    }

    /// Equality up to `tolerance`, ignoring endpoint order
    pub fn approx_eq(&self, other: &Segment, tolerance: f64) -> bool {
        let forward = distance(self.start, other.start) <= tolerance
            && distance(self.end, other.end) <= tolerance;
        let reversed = distance(self.start, other.end) <= tolerance
            && distance(self.end, other.start) <= tolerance;
        forward || reversed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Circle {
    pub center: [f64; 2],
    pub radius: f64,
}

/// Rotated ellipse. `angle_deg` is the rotation of the `rx` axis from +X.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Ellipse {
    pub center: [f64; 2],
    pub rx: f64,
    pub ry: f64,
    pub angle_deg: f64,
}

impl Ellipse {
    /// min(axis) / max(axis), in (0, 1] for valid ellipses
    pub fn axis_ratio(&self) -> f64 {
        let major = self.rx.max(self.ry);
        if major <= 0.0 {
            return 0.0;
        }
        self.rx.min(self.ry) / major
    }

    pub fn is_valid(&self) -> bool {
        self.rx > 0.0
            && self.ry > 0.0
            && self.rx.is_finite()
            && self.ry.is_finite()
            && self.center.iter().all(|v| v.is_finite())
            && self.angle_deg.is_finite()
    }

    /// `n` points on the boundary, parametric angle starting at 0
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let (sin_a, cos_a) = self.angle_deg.to_radians().sin_cos();
        (0..n)
            .map(|i| {
                let t = std::f64::consts::TAU * i as f64 / n as f64;
                let px = self.rx * t.cos();
                let py = self.ry * t.sin();
                [
                    self.center[0] + cos_a * px - sin_a * py,
                    self.center[1] + sin_a * px + cos_a * py,
                ]
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Polyline {
    pub points: Vec<[f64; 2]>,
    pub closed: bool,
}

impl Polyline {
    pub fn to_geo_linestring(&self) -> LineString<f64> {
        let coords: Vec<Coord<f64>> = self.points.iter().map(|&[x, y]| Coord { x, y }).collect();
        LineString::new(coords)
    }

    /// Enclosed area for closed polylines, zero otherwise
    pub fn area(&self) -> f64 {
        use geo::Area;
        if !self.closed {
            return 0.0;
        }
        Polygon::new(self.to_geo_linestring(), vec![]).unsigned_area()
    }

    pub fn perimeter(&self) -> f64 {
        let open: f64 = self.points.windows(2).map(|w| distance(w[0], w[1])).sum();
        match (self.closed, self.points.first(), self.points.last()) {
            (true, Some(&first), Some(&last)) => open + distance(last, first),
            _ => open,
        }
    }
}

/// Curved primitive recovered from a contour or skeleton chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArcShape {
    Ellipse(Ellipse),
    Polyline(Polyline),
}

/// A detector fault recorded instead of aborting the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostic {
    pub stage: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Everything one detection run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionResult {
    pub lines: Vec<Segment>,
    pub circles: Vec<Circle>,
    pub arcs: Vec<ArcShape>,
    /// Faults caught at detector boundaries during the run
    pub diagnostics: Vec<Diagnostic>,
    /// Original image dimensions
    pub image_width: u32,
    pub image_height: u32,
}

impl DetectionResult {
    pub fn new(image_width: u32, image_height: u32) -> Self {
        Self {
            image_width,
            image_height,
            ..Self::default()
        }
    }

    /// True when no primitive of any kind was detected
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.circles.is_empty() && self.arcs.is_empty()
    }

    pub fn primitive_count(&self) -> usize {
        self.lines.len() + self.circles.len() + self.arcs.len()
    }

    pub fn summary(&self) -> String {
        let ellipses = self
            .arcs
            .iter()
            .filter(|a| matches!(a, ArcShape::Ellipse(_)))
            .count();
        format!(
            "{} lines, {} circles, {} ellipses, {} polylines, {} diagnostics",
            self.lines.len(),
            self.circles.len(),
            ellipses,
            self.arcs.len() - ellipses,
            self.diagnostics.len()
        )
    }
}

#[inline]
pub(crate) fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}

use image::GrayImage;
use rayon::prelude::*;

use crate::{
    config::BinarizeConfig,
    error::Result,
    traits::Binarizer,
    types::BinaryMask,
};

/// Local-mean adaptive threshold backed by a summed-area table.
///
/// A pixel is foreground when it is darker than `contrast_factor` times the
/// mean of the `(2r+1)²` window around it. Windows are clipped at the image
/// border rather than wrapped or padded.
#[derive(Debug, Clone)]
pub struct AdaptiveMeanBinarizer {
    pub block_radius: u32,
    pub contrast_factor: f32,
    pub parallel: bool,
}

impl Default for AdaptiveMeanBinarizer {
    fn default() -> Self {
        Self::from_config(&BinarizeConfig::default())
    }
}

impl AdaptiveMeanBinarizer {
    pub fn from_config(config: &BinarizeConfig) -> Self {
        Self {
            block_radius: config.block_radius,
            contrast_factor: config.contrast_factor,
            parallel: false,
        }
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Summed-area table with a zero first row and column: `(w + 1) × (h + 1)`
pub(crate) struct IntegralImage {
    stride: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let stride = width as usize + 1;
        let mut sums = vec![0u64; stride * (height as usize + 1)];

        for y in 0..height as usize {
            let mut row_sum = 0u64;
            for x in 0..width as usize {
                row_sum += gray.as_raw()[y * width as usize + x] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }

        Self { stride, sums }
    }

    /// Sum over the inclusive rectangle `[x0, x1] × [y0, y1]`
    #[inline]
    pub(crate) fn window_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.stride;
        self.sums[(y1 + 1) * s + x1 + 1] + self.sums[y0 * s + x0]
            - self.sums[y0 * s + x1 + 1]
            - self.sums[(y1 + 1) * s + x0]
    }
}

impl Binarizer for AdaptiveMeanBinarizer {
    fn binarize(&self, gray: &GrayImage) -> Result<BinaryMask> {
        let (width, height) = gray.dimensions();
        let mut mask = BinaryMask::new(width, height);
        if width == 0 || height == 0 {
            return Ok(mask);
        }

        let integral = IntegralImage::new(gray);
        let r = self.block_radius as usize;
        let k = self.contrast_factor as f64;
        let (w, h) = (width as usize, height as usize);
        let pixels = gray.as_raw();

        let fill_row = |y: usize, row: &mut [u8]| {
            let y0 = y.saturating_sub(r);
            let y1 = (y + r).min(h - 1);
            for (x, out) in row.iter_mut().enumerate() {
                let x0 = x.saturating_sub(r);
                let x1 = (x + r).min(w - 1);
                let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
                let sum = integral.window_sum(x0, y0, x1, y1) as f64;
                let value = pixels[y * w + x] as f64;
                // value < mean * k, without the division
                *out = u8::from(value * count < sum * k);
            }
        };

        if self.parallel {
            mask.data_mut()
                .par_chunks_mut(w)
                .enumerate()
                .for_each(|(y, row)| fill_row(y, row));
        } else {
            mask.data_mut()
                .chunks_mut(w)
                .enumerate()
                .for_each(|(y, row)| fill_row(y, row));
        }

        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stroke_image(background: impl Fn(u32, u32) -> u8) -> GrayImage {
        let mut img = GrayImage::from_fn(60, 40, |x, y| Luma([background(x, y)]));
        for x in 10..50 {
            for y in 19..21 {
                img.put_pixel(x, y, Luma([20u8]));
            }
        }
        img
    }

    #[test]
    fn test_uniform_images_have_no_foreground() {
        let binarizer = AdaptiveMeanBinarizer::default();
        for level in [0u8, 37, 128, 255] {
            let img = GrayImage::from_pixel(32, 24, Luma([level]));
            let mask = binarizer.binarize(&img).expect("Should binarize");
            assert_eq!(mask.count(), 0, "level {level} produced foreground");
        }
    }

    #[test]
    fn test_dark_stroke_is_foreground() {
        let img = stroke_image(|_, _| 230);
        let mask = AdaptiveMeanBinarizer::default().binarize(&img).unwrap();

        assert!(mask.get(30, 19));
        assert!(mask.get(30, 20));
        assert!(!mask.get(30, 5));
        assert!(!mask.get(2, 2));
        assert_eq!(mask.count(), 80);
    }

    #[test]
    fn test_tolerates_uneven_lighting() {
        // Background brightens from left to right
        let img = stroke_image(|x, _| (120 + 2 * x).min(255) as u8);
        let mask = AdaptiveMeanBinarizer::default().binarize(&img).unwrap();

        assert!(mask.get(12, 20));
        assert!(mask.get(48, 20));
        assert!(!mask.get(5, 5));
        assert!(!mask.get(55, 35));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let img = stroke_image(|x, y| ((x * 7 + y * 3) % 200 + 40) as u8);
        let sequential = AdaptiveMeanBinarizer::default().binarize(&img).unwrap();
        let parallel = AdaptiveMeanBinarizer::default()
            .with_parallel(true)
            .binarize(&img)
            .unwrap();
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_integral_window_sum() {
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x + 4 * y) as u8]));
        let integral = IntegralImage::new(&img);
        assert_eq!(integral.window_sum(0, 0, 3, 2), (0..12).sum::<u64>());
        assert_eq!(integral.window_sum(1, 1, 2, 2), 5 + 6 + 9 + 10);
    }
}

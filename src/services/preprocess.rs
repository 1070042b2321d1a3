use std::io::Cursor;
use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat};
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PreprocessOptions {
    pub(crate) max_dimension: u32,
    pub(crate) enhance_contrast: bool,
}

#[derive(Debug, Error)]
pub(crate) enum DecodeError {
    #[error("file is empty")]
    Empty,
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Grayscale image ready for recognition. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub(crate) struct PreparedImage {
    pixels: Arc<GrayImage>,
    source_width: u32,
    source_height: u32,
}

impl PreparedImage {
    pub(crate) fn pixels(&self) -> &GrayImage {
        &self.pixels
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub(crate) fn source_dimensions(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    /// PNG encoding for engines that take encoded images.
    pub(crate) fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        self.pixels.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

/// Decodes, downsizes and normalizes an uploaded image.
///
/// The longest side is clamped to `max_dimension` with the aspect ratio kept.
/// Contrast enhancement stretches the luma histogram between the 1st and 99th
/// percentiles.
pub(crate) fn preprocess(
    bytes: &[u8],
    options: PreprocessOptions,
) -> Result<PreparedImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoded = image::load_from_memory(bytes)?;
    let (source_width, source_height) = (decoded.width(), decoded.height());
    let mut gray = decoded.into_luma8();

    if let Some((width, height)) =
        clamped_dimensions(source_width, source_height, options.max_dimension)
    {
        gray = imageops::resize(&gray, width, height, FilterType::Triangle);
        tracing::debug!(
            from_width = source_width,
            from_height = source_height,
            to_width = width,
            to_height = height,
            "Resized image"
        );
    }

    if options.enhance_contrast {
        stretch_contrast(&mut gray);
    }

    Ok(PreparedImage { pixels: Arc::new(gray), source_width, source_height })
}

fn clamped_dimensions(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_dimension {
        return None;
    }

    let scale = max_dimension as f64 / longest as f64;
    let scaled = |value: u32| ((value as f64 * scale).round() as u32).clamp(1, max_dimension);
    Some((scaled(width), scaled(height)))
}

fn stretch_contrast(gray: &mut GrayImage) {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return;
    }
    let clip = total / 100;

    let low = percentile_bound(histogram.iter().enumerate(), clip);
    let high = percentile_bound(histogram.iter().enumerate().rev(), clip);
    if high <= low {
        return;
    }

    let range = (high - low) as f32;
    for pixel in gray.pixels_mut() {
        let value = pixel.0[0].clamp(low, high);
        pixel.0[0] = (((value - low) as f32 / range) * 255.0).round() as u8;
    }
}

fn percentile_bound<'a>(bins: impl Iterator<Item = (usize, &'a u64)>, clip: u64) -> u8 {
    let mut seen = 0u64;
    let mut last = 0usize;
    for (value, count) in bins {
        last = value;
        seen += count;
        if seen > clip {
            break;
        }
    }
    last as u8
}

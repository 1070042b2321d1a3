//! Degraded capability used when no recognizer handles the requested
//! languages. It locates likely text regions but cannot read them.

use async_trait::async_trait;
use image::GrayImage;

use super::{EngineError, EngineKind, Language, LanguageSet, OcrEngine, Recognition};
use crate::services::preprocess::PreparedImage;

const MIN_REGION_SIDE: u32 = 10;
const MIN_ASPECT: f64 = 0.2;
const MAX_ASPECT: f64 = 5.0;

#[derive(Debug, Clone, Default)]
pub(crate) struct RegionDetector;

#[async_trait]
impl OcrEngine for RegionDetector {
    fn name(&self) -> &'static str {
        "regions"
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Fallback
    }

    async fn probe(&self) -> Result<Vec<Language>, EngineError> {
        Ok(Language::ALL.to_vec())
    }

    async fn recognize(
        &self,
        image: &PreparedImage,
        languages: &LanguageSet,
    ) -> Result<Recognition, EngineError> {
        let image = image.clone();
        let regions = tokio::task::spawn_blocking(move || count_text_regions(image.pixels()))
            .await
            .map_err(|err| EngineError::RecognitionFailure(err.to_string()))?;

        let note = if regions > 0 {
            format!(
                "Detected {regions} potential text regions; \
                 no recognizer is available for {languages}"
            )
        } else {
            format!("No clear text regions detected; no recognizer is available for {languages}")
        };

        Ok(Recognition { text: String::new(), note: Some(note) })
    }
}

/// Counts dark connected components whose bounding box looks like a glyph
/// cluster. Foreground is everything at or below the Otsu threshold.
pub(crate) fn count_text_regions(gray: &GrayImage) -> usize {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }

    let threshold = otsu_threshold(gray);
    let foreground: Vec<bool> = gray.pixels().map(|pixel| pixel.0[0] <= threshold).collect();
    let mut visited = vec![false; foreground.len()];
    let mut stack = Vec::new();
    let mut regions = 0;

    for start in 0..foreground.len() {
        if !foreground[start] || visited[start] {
            continue;
        }

        visited[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);

        while let Some(index) = stack.pop() {
            let x = (index % width as usize) as u32;
            let y = (index / width as usize) as u32;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            let neighbours = [
                (x > 0).then(|| index - 1),
                (x + 1 < width).then(|| index + 1),
                (y > 0).then(|| index - width as usize),
                (y + 1 < height).then(|| index + width as usize),
            ];
            for next in neighbours.into_iter().flatten() {
                if foreground[next] && !visited[next] {
                    visited[next] = true;
                    stack.push(next);
                }
            }
        }

        let box_width = max_x - min_x + 1;
        let box_height = max_y - min_y + 1;
        let aspect = box_width as f64 / box_height as f64;
        if box_width > MIN_REGION_SIDE
            && box_height > MIN_REGION_SIDE
            && aspect > MIN_ASPECT
            && aspect < MAX_ASPECT
        {
            regions += 1;
        }
    }

    regions
}

fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 =
        histogram.iter().enumerate().map(|(value, count)| value as f64 * *count as f64).sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best = (0u8, 0f64);

    for (value, count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += value as f64 * *count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight as f64;
        let variance = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);

        if variance > best.1 {
            best = (value as u8, variance);
        }
    }

    best.0
}

//! Technical image quality scoring.
//!
//! Every factor is computed on the 8-bit grayscale image and mapped onto
//! [0, 1] with the normalisers from [`QualityStandards`]. The weighted sum of
//! the factors is the quality score.

use async_trait::async_trait;
use image::{GrayImage, ImageFormat};
use std::sync::Arc;

use crate::config::standards::{FactorNormalisers, QualityStandards};
use crate::models::image::{ImageMetadata, QualityFactors, QualityReport, ResolutionBand};

/// Pixel counts separating the resolution bands (640x750 and 1920x1080).
const MEDIUM_RESOLUTION_PIXELS: u64 = 480_000;
const HIGH_RESOLUTION_PIXELS: u64 = 2_073_600;

#[derive(Debug, thiserror::Error)]
pub enum QualityError {
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported or corrupt image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Image has no pixels")]
    Empty,

    #[error("Quality worker failed: {0}")]
    Worker(String),
}

/// Scores image bytes. The workflow only sees this seam.
#[async_trait]
pub trait QualityScorer: Send + Sync {
    async fn score(
        &self,
        bytes: Arc<[u8]>,
        standards: &QualityStandards,
    ) -> Result<QualityReport, QualityError>;
}

/// Deterministic analyzer backed by the `image` crate. Decoding and the
/// factor passes run on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct QualityAnalyzer;

#[async_trait]
impl QualityScorer for QualityAnalyzer {
    async fn score(
        &self,
        bytes: Arc<[u8]>,
        standards: &QualityStandards,
    ) -> Result<QualityReport, QualityError> {
        let standards = standards.clone();
        tokio::task::spawn_blocking(move || analyze(&bytes, &standards))
            .await
            .map_err(|e| QualityError::Worker(e.to_string()))?
    }
}

/// Score one encoded image.
pub fn analyze(bytes: &[u8], standards: &QualityStandards) -> Result<QualityReport, QualityError> {
    let format = image::guess_format(bytes).ok();
    let decoded = image::load_from_memory(bytes)?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(QualityError::Empty);
    }

    let gray = decoded.to_luma8();
    let stats = GrayStats::measure(&gray, &standards.normalisers);
    let factors = stats.factors(&standards.normalisers);

    let weights = &standards.weights;
    let quality_score = (weights.sharpness * factors.sharpness
        + weights.brightness * factors.brightness
        + weights.contrast * factors.contrast
        + weights.noise * factors.noise)
        .clamp(0.0, 1.0);

    let metadata = ImageMetadata {
        format: format.map(format_name),
        width,
        height,
        resolution: resolution_band(width, height),
    };
    let recommendations = recommendations(&factors, &stats, &metadata, standards);

    Ok(QualityReport {
        quality_score,
        quality_grade: standards.grades.grade(quality_score),
        factors,
        metadata,
        recommendations,
    })
}

pub fn resolution_band(width: u32, height: u32) -> ResolutionBand {
    let pixels = u64::from(width) * u64::from(height);
    if pixels < MEDIUM_RESOLUTION_PIXELS {
        ResolutionBand::Low
    } else if pixels < HIGH_RESOLUTION_PIXELS {
        ResolutionBand::Medium
    } else {
        ResolutionBand::High
    }
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!("{format:?}").to_lowercase())
}

/// Raw statistics of a grayscale image.
struct GrayStats {
    mean: f64,
    stddev: f64,
    laplacian_variance: f64,
    mean_residual: f64,
}

impl GrayStats {
    fn measure(gray: &GrayImage, normalisers: &FactorNormalisers) -> Self {
        let pixels = gray.as_raw();
        let n = pixels.len() as f64;
        let mean = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
        let variance = pixels
            .iter()
            .map(|&p| (f64::from(p) - mean).powi(2))
            .sum::<f64>()
            / n;

        let blurred = image::imageops::blur(gray, normalisers.noise_blur_sigma);
        let mean_residual = pixels
            .iter()
            .zip(blurred.as_raw())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).abs())
            .sum::<f64>()
            / n;

        Self {
            mean,
            stddev: variance.sqrt(),
            laplacian_variance: laplacian_variance(gray),
            mean_residual,
        }
    }

    fn factors(&self, normalisers: &FactorNormalisers) -> QualityFactors {
        let midpoint = normalisers.brightness_midpoint;
        QualityFactors {
            sharpness: (self.laplacian_variance / normalisers.laplacian_variance).min(1.0),
            brightness: (1.0 - (self.mean - midpoint).abs() / midpoint).clamp(0.0, 1.0),
            contrast: (self.stddev / normalisers.contrast_stddev).min(1.0),
            noise: 1.0 - (self.mean_residual / 255.0).min(1.0),
        }
    }
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let at = |x: u32, y: u32| f64::from(gray.get_pixel(x, y).0[0]);
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let value = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += value;
            sum_sq += value * value;
        }
    }

    let n = f64::from((width - 2) * (height - 2));
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

fn recommendations(
    factors: &QualityFactors,
    stats: &GrayStats,
    metadata: &ImageMetadata,
    standards: &QualityStandards,
) -> Vec<String> {
    let weak = standards.weak_factor;
    let mut out = Vec::new();

    if factors.sharpness < weak {
        out.push("Image appears blurry - hold the camera steady and tap to focus".to_string());
    }
    if factors.brightness < weak {
        if stats.mean < standards.normalisers.brightness_midpoint {
            out.push("Image is too dark - add lighting or use the flash".to_string());
        } else {
            out.push("Image is overexposed - avoid pointing at strong light".to_string());
        }
    }
    if factors.contrast < weak {
        out.push("Low contrast - make sure the subject stands out from the background".to_string());
    }
    if factors.noise < weak {
        out.push("Image is noisy - shoot in better light".to_string());
    }
    if metadata.resolution == ResolutionBand::Low {
        out.push("Resolution is low - move closer or use a higher camera resolution".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::image::QualityGrade;
    use image::{DynamicImage, Luma};
    use std::io::Cursor;

    fn png(img: GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn checkerboard(size: u32, block: u32) -> Vec<u8> {
        png(GrayImage::from_fn(size, size, |x, y| {
            if (x / block + y / block) % 2 == 0 {
                Luma([20])
            } else {
                Luma([235])
            }
        }))
    }

    fn flat(size: u32, value: u8) -> Vec<u8> {
        png(GrayImage::from_pixel(size, size, Luma([value])))
    }

    #[test]
    fn test_score_is_deterministic() {
        let bytes = checkerboard(64, 8);
        let standards = QualityStandards::default();
        let first = analyze(&bytes, &standards).unwrap();
        let second = analyze(&bytes, &standards).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sharp_checkerboard_scores_excellent() {
        let report = analyze(&checkerboard(64, 8), &QualityStandards::default()).unwrap();
        assert_eq!(report.factors.sharpness, 1.0);
        assert_eq!(report.factors.contrast, 1.0);
        assert!(report.quality_score >= 0.8, "score {}", report.quality_score);
        assert_eq!(report.quality_grade, QualityGrade::Excellent);
        assert_eq!(report.metadata.format.as_deref(), Some("png"));
    }

    #[test]
    fn test_black_frame_scores_poor() {
        let report = analyze(&flat(32, 0), &QualityStandards::default()).unwrap();
        assert_eq!(report.factors.sharpness, 0.0);
        assert_eq!(report.factors.brightness, 0.0);
        assert_eq!(report.factors.contrast, 0.0);
        assert!(report.quality_score < 0.4);
        assert_eq!(report.quality_grade, QualityGrade::Poor);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("too dark")));
    }

    #[test]
    fn test_weights_come_from_standards() {
        let mut standards = QualityStandards::default();
        standards.weights.sharpness = 0.0;
        standards.weights.brightness = 0.0;
        standards.weights.contrast = 0.0;
        standards.weights.noise = 1.0;
        let report = analyze(&flat(32, 0), &standards).unwrap();
        assert!(report.quality_score > 0.99);
    }

    #[test]
    fn test_corrupt_bytes_fail_to_decode() {
        let err = analyze(b"definitely not an image", &QualityStandards::default()).unwrap_err();
        assert!(matches!(err, QualityError::Decode(_)));
    }

    #[test]
    fn test_resolution_bands() {
        assert_eq!(resolution_band(640, 480), ResolutionBand::Low);
        assert_eq!(resolution_band(1280, 720), ResolutionBand::Medium);
        assert_eq!(resolution_band(1920, 1080), ResolutionBand::High);
    }

    #[tokio::test]
    async fn test_analyzer_runs_on_blocking_pool() {
        let bytes: Arc<[u8]> = checkerboard(32, 4).into();
        let report = QualityAnalyzer
            .score(bytes, &QualityStandards::default())
            .await
            .unwrap();
        assert!(report.quality_score > 0.0);
    }
}

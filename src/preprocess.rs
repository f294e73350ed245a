use image::{
    DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use serde::Serialize;
use std::{io::Cursor, sync::Arc};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_MAX_MB: f64 = 20.0;
const DEFAULT_MAX_MEGAPIXELS: f64 = 20.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const PIXELS_PER_MEGAPIXEL: f64 = 1_000_000.0;
const SAFETY_MARGIN: f64 = 0.95;
const QUALITY_SWEEP: [u8; 6] = [95, 90, 85, 80, 75, 70];
const FALLBACK_QUALITY: u8 = 85;
// Tenths: 0.7 down to 0.3.
const FALLBACK_SCALES: [u8; 5] = [7, 6, 5, 4, 3];

/// Size and resolution ceilings imposed by the generation provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderLimits {
    pub max_bytes: usize,
    pub max_megapixels: f64,
}

impl ProviderLimits {
    /// Zero, negative and non-finite ceilings fall back to the provider
    /// defaults; no image could ever satisfy them.
    pub fn from_megabytes(max_mb: f64, max_megapixels: f64) -> Self {
        let max_mb = positive_or(max_mb, DEFAULT_MAX_MB);
        let max_megapixels = positive_or(max_megapixels, DEFAULT_MAX_MEGAPIXELS);
        Self {
            max_bytes: (max_mb * BYTES_PER_MB) as usize,
            max_megapixels,
        }
    }

    fn byte_budget(&self) -> f64 {
        self.max_bytes as f64 * SAFETY_MARGIN
    }

    fn fits(&self, size_bytes: usize, dimensions: (u32, u32)) -> bool {
        size_bytes <= self.max_bytes && megapixels(dimensions) <= self.max_megapixels
    }
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self::from_megabytes(DEFAULT_MAX_MB, DEFAULT_MAX_MEGAPIXELS)
    }
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        warn!(target = "snapsell.preprocess", value, default, "ignoring unusable provider limit");
        default
    }
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid image: {0}")]
    Decode(String),
    #[error("image encoding failed: {0}")]
    Encode(String),
    #[error("unable to compress image under {max_bytes} bytes and {max_megapixels}MP")]
    CompressionExhausted { max_bytes: usize, max_megapixels: f64 },
}

/// Record of what was done to an image before submission.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompressionPlan {
    pub format: String,
    pub original_dimensions: (u32, u32),
    pub original_size_bytes: usize,
    pub final_dimensions: (u32, u32),
    pub final_size_bytes: usize,
    pub applied_scale: f64,
    pub applied_quality: Option<u8>,
    pub color_space_normalized: bool,
    pub modified: bool,
}

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Arc<[u8]>,
    pub plan: CompressionPlan,
}

#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    limits: ProviderLimits,
}

impl ImagePreprocessor {
    pub fn new(limits: ProviderLimits) -> Self {
        Self { limits }
    }

    /// Bring `image` within the provider limits. Inputs that already fit are
    /// returned as-is (same buffer) without a full decode.
    pub fn prepare(&self, image: Arc<[u8]>) -> Result<PreparedImage, PreprocessError> {
        let format = sniff_format(&image)?;
        let dimensions = ImageReader::with_format(Cursor::new(&image[..]), format)
            .into_dimensions()
            .map_err(|err| PreprocessError::Decode(err.to_string()))?;
        let original_size = image.len();
        debug!(
            target = "snapsell.preprocess",
            width = dimensions.0,
            height = dimensions.1,
            megapixels = megapixels(dimensions),
            size_bytes = original_size,
            "inspecting source image"
        );

        if self.limits.fits(original_size, dimensions) {
            let plan = CompressionPlan {
                format: format_label(format),
                original_dimensions: dimensions,
                original_size_bytes: original_size,
                final_dimensions: dimensions,
                final_size_bytes: original_size,
                applied_scale: 1.0,
                applied_quality: None,
                color_space_normalized: false,
                modified: false,
            };
            return Ok(PreparedImage { bytes: image, plan });
        }

        let mut decoded = image::load_from_memory_with_format(&image, format)
            .map_err(|err| PreprocessError::Decode(err.to_string()))?;

        let mut scale = 1.0;
        let current_mp = megapixels(dimensions);
        if current_mp > self.limits.max_megapixels {
            scale = (self.limits.max_megapixels / current_mp).sqrt() * SAFETY_MARGIN;
            let target = scaled(dimensions, scale);
            decoded = decoded.resize_exact(target.0, target.1, FilterType::Lanczos3);
            debug!(
                target = "snapsell.preprocess",
                width = target.0,
                height = target.1,
                "downscaled to megapixel ceiling"
            );
        }

        let (normalized, color_space_normalized) = normalize_color(decoded);
        let budget = self.limits.byte_budget();
        let source = SourceFacts {
            format,
            dimensions,
            size_bytes: original_size,
            color_space_normalized,
        };

        for quality in QUALITY_SWEEP {
            let encoded = encode_jpeg(&normalized, quality)?;
            if encoded.len() as f64 <= budget {
                debug!(
                    target = "snapsell.preprocess",
                    quality,
                    size_bytes = encoded.len(),
                    "re-encoded within budget"
                );
                return Ok(source.finish(encoded, &normalized, scale, quality));
            }
        }

        let base = (normalized.width(), normalized.height());
        for tenths in FALLBACK_SCALES {
            let step = f64::from(tenths) / 10.0;
            let target = scaled(base, step);
            let resized = normalized.resize_exact(target.0, target.1, FilterType::Lanczos3);
            let encoded = encode_jpeg(&resized, FALLBACK_QUALITY)?;
            if encoded.len() as f64 <= budget {
                debug!(
                    target = "snapsell.preprocess",
                    width = target.0,
                    height = target.1,
                    size_bytes = encoded.len(),
                    "fallback downscale within budget"
                );
                return Ok(source.finish(encoded, &resized, scale * step, FALLBACK_QUALITY));
            }
        }

        Err(PreprocessError::CompressionExhausted {
            max_bytes: self.limits.max_bytes,
            max_megapixels: self.limits.max_megapixels,
        })
    }
}

/// What is known about the input once it has been decoded and normalized.
struct SourceFacts {
    format: ImageFormat,
    dimensions: (u32, u32),
    size_bytes: usize,
    color_space_normalized: bool,
}

impl SourceFacts {
    fn finish(&self, encoded: Vec<u8>, image: &DynamicImage, scale: f64, quality: u8) -> PreparedImage {
        let plan = CompressionPlan {
            format: format_label(self.format),
            original_dimensions: self.dimensions,
            original_size_bytes: self.size_bytes,
            final_dimensions: (image.width(), image.height()),
            final_size_bytes: encoded.len(),
            applied_scale: scale,
            applied_quality: Some(quality),
            color_space_normalized: self.color_space_normalized,
            modified: true,
        };
        PreparedImage {
            bytes: Arc::from(encoded),
            plan,
        }
    }
}

fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, PreprocessError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| PreprocessError::Decode(err.to_string()))?;
    match reader.format() {
        Some(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => Ok(format),
        Some(other) => Err(PreprocessError::UnsupportedFormat(format_label(other))),
        None => Err(PreprocessError::UnsupportedFormat("unknown".into())),
    }
}

fn format_label(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .copied()
        .unwrap_or("unknown")
        .to_string()
}

fn megapixels((width, height): (u32, u32)) -> f64 {
    (f64::from(width) * f64::from(height)) / PIXELS_PER_MEGAPIXEL
}

fn scaled((width, height): (u32, u32), factor: f64) -> (u32, u32) {
    let w = ((f64::from(width) * factor) as u32).max(1);
    let h = ((f64::from(height) * factor) as u32).max(1);
    (w, h)
}

/// JPEG carries neither alpha nor exotic colour types: flatten transparency
/// onto white and fold everything else into RGB. Luma passes through.
fn normalize_color(image: DynamicImage) -> (DynamicImage, bool) {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => (image, false),
        other if other.color().has_alpha() => {
            (DynamicImage::ImageRgb8(flatten_on_white(&other)), true)
        }
        other => (DynamicImage::ImageRgb8(other.to_rgb8()), true),
    }
}

fn flatten_on_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u32::from(a);
        let blend =
            |channel: u8| ((u32::from(channel) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, PreprocessError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|err| PreprocessError::Encode(err.to_string()))?;
    Ok(buffer)
}

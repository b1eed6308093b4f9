// Weight-free preview backend
// Approximates an "enhance" pass with classic filters so the bot can run without a GPU.

use crate::{ImageGenError, ImageTransformer, Result, TransformParams};
use image::{imageops, RgbImage};

/// Sharpening radius used by the preview pass
const UNSHARP_SIGMA: f32 = 1.2;

/// Minimum brightness difference that gets sharpened
const UNSHARP_THRESHOLD: i32 = 2;

/// Contrast boost per unit of guidance scale, in percent
const CONTRAST_PER_GUIDANCE: f32 = 2.0;

/// Deterministic transformer: contrast boost plus unsharp mask, blended by strength.
///
/// Output has the same dimensions as the input.
#[derive(Debug, Default)]
pub struct PreviewTransformer;

impl PreviewTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl ImageTransformer for PreviewTransformer {
    fn name(&self) -> &'static str {
        "preview"
    }

    fn transform(&mut self, image: &RgbImage, params: &TransformParams) -> Result<RgbImage> {
        params.validate()?;

        if image.width() == 0 || image.height() == 0 {
            return Err(ImageGenError::ImageProcessing("Input image is empty".into()));
        }

        tracing::debug!(
            "Preview pass on {}x{} (strength {}, guidance {})",
            image.width(),
            image.height(),
            params.strength,
            params.guidance_scale
        );

        let contrast = params.guidance_scale as f32 * CONTRAST_PER_GUIDANCE;
        let enhanced = imageops::contrast(image, contrast);
        let enhanced = imageops::unsharpen(&enhanced, UNSHARP_SIGMA, UNSHARP_THRESHOLD);

        let strength = params.strength as f32;
        let mut output = image.clone();
        for (out, target) in output.pixels_mut().zip(enhanced.pixels()) {
            for (channel, &t) in out.0.iter_mut().zip(target.0.iter()) {
                let blended = *channel as f32 + (t as f32 - *channel as f32) * strength;
                *channel = blended.round().clamp(0.0, 255.0) as u8;
            }
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
        })
    }

    #[test]
    fn test_output_keeps_dimensions() {
        let mut preview = PreviewTransformer::new();
        let input = gradient(64, 32);
        let output = preview.transform(&input, &TransformParams::default()).unwrap();
        assert_eq!(output.dimensions(), (64, 32));
    }

    #[test]
    fn test_zero_strength_is_identity() {
        let mut preview = PreviewTransformer::new();
        let input = gradient(16, 16);
        let params = TransformParams {
            strength: 0.0,
            ..Default::default()
        };
        let output = preview.transform(&input, &params).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut preview = PreviewTransformer::new();
        let params = TransformParams {
            strength: 2.0,
            ..Default::default()
        };
        assert!(preview.transform(&gradient(8, 8), &params).is_err());
    }
}

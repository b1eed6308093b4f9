// imagent - AI image-to-image transformation library
// Provides an interface for transforming photos with diffusion models via Candle

mod preview;
mod stable_diffusion;

pub mod error;

pub use error::{ImageGenError, Result};
pub use image::RgbImage;
pub use preview::PreviewTransformer;
pub use stable_diffusion::{ModelSource, StableDiffusionImg2Img, StableDiffusionVersion};

/// Default share of the denoising schedule applied to the input image
pub const DEFAULT_STRENGTH: f64 = 0.75;

/// Default classifier-free guidance scale
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;

/// Default number of scheduler steps (before strength is applied)
pub const DEFAULT_STEPS: usize = 50;

/// Parameters for a single image-to-image transformation
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParams {
    /// How far the output may drift from the input, in [0, 1].
    /// 0 keeps the input, 1 ignores it entirely.
    pub strength: f64,

    /// Classifier-free guidance scale (>= 0, guidance is applied above 1.0)
    pub guidance_scale: f64,

    /// Number of scheduler steps; only the last `steps * strength` are run
    pub num_steps: usize,

    /// Text prompt conditioning the transformation (may be empty)
    pub prompt: String,

    /// Random seed for reproducibility (None for random)
    pub seed: Option<u64>,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            num_steps: DEFAULT_STEPS,
            prompt: String::new(),
            seed: None,
        }
    }
}

impl TransformParams {
    /// Check ranges before any model work is done
    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || !(0.0..=1.0).contains(&self.strength) {
            return Err(ImageGenError::InvalidConfig(format!(
                "strength must be within [0, 1], got {}",
                self.strength
            )));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(ImageGenError::InvalidConfig(format!(
                "guidance scale must be >= 0, got {}",
                self.guidance_scale
            )));
        }
        if self.num_steps == 0 {
            return Err(ImageGenError::InvalidConfig(
                "number of steps must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Index of the first scheduler step that is actually run.
    ///
    /// Low strength skips most of the schedule, so the input image survives largely
    /// intact; strength 1.0 runs every step from pure noise.
    pub fn start_step(&self) -> usize {
        let denoise_steps = ((self.num_steps as f64) * self.strength) as usize;
        self.num_steps - denoise_steps.min(self.num_steps)
    }
}

/// Trait for image-to-image backends
pub trait ImageTransformer {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Transform `image` and return exactly one output image
    fn transform(&mut self, image: &RgbImage, params: &TransformParams) -> Result<RgbImage>;
}

/// Which backend to load at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Stable Diffusion img2img (needs model weights)
    StableDiffusion,
    /// Deterministic contrast/sharpen pass, no weights needed
    Preview,
}

/// Load a transformer once; the returned handle is meant to live for the whole process.
pub fn load_transformer(
    backend: Backend,
    version: StableDiffusionVersion,
    source: ModelSource,
    use_cpu: bool,
) -> Result<Box<dyn ImageTransformer + Send>> {
    match backend {
        Backend::StableDiffusion => Ok(Box::new(StableDiffusionImg2Img::load(
            version, source, use_cpu,
        )?)),
        Backend::Preview => Ok(Box::new(PreviewTransformer::new())),
    }
}

/// The hf-hub crate looks for HUGGING_FACE_HUB_TOKEN, not HF_TOKEN.
///
/// Copies `HF_TOKEN` over when only that one is set. Call before any other thread starts.
pub fn bridge_hf_token() {
    let hub_token_set = std::env::var_os("HUGGING_FACE_HUB_TOKEN").is_some();
    if let Some(token) = token_to_bridge(std::env::var("HF_TOKEN").ok(), hub_token_set) {
        std::env::set_var("HUGGING_FACE_HUB_TOKEN", token);
        eprintln!("→ Set HUGGING_FACE_HUB_TOKEN from HF_TOKEN");
    }
}

fn token_to_bridge(hf_token: Option<String>, hub_token_set: bool) -> Option<String> {
    if hub_token_set {
        return None;
    }
    hf_token.filter(|t| !t.is_empty())
}

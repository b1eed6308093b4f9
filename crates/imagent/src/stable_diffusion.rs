// Stable Diffusion img2img implementation using Candle

use crate::{ImageGenError, ImageTransformer, Result, TransformParams};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

/// VAE latent scale factor for SD 1.x / 2.x
const VAE_SCALE: f64 = 0.18215;

/// Stable Diffusion model variants usable for img2img
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StableDiffusionVersion {
    /// Stable Diffusion v1.4
    #[value(name = "v1-4")]
    V1_4,
    /// Stable Diffusion v1.5
    #[value(name = "v1-5")]
    V1_5,
    /// Stable Diffusion v2.1
    #[value(name = "v2-1")]
    V2_1,
}

impl StableDiffusionVersion {
    pub fn repo(&self) -> &str {
        match self {
            Self::V1_4 => "CompVis/stable-diffusion-v1-4",
            Self::V1_5 => "runwayml/stable-diffusion-v1-5",
            Self::V2_1 => "stabilityai/stable-diffusion-2-1",
        }
    }

    fn tokenizer_repo(&self) -> &str {
        "openai/clip-vit-base-patch32"
    }

    fn sd_config(&self) -> StableDiffusionConfig {
        match self {
            // v1.4 and v1.5 share the same architecture
            Self::V1_4 | Self::V1_5 => StableDiffusionConfig::v1_5(None, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, None, None),
        }
    }
}

/// Where model weights come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// HuggingFace Hub repository id, e.g. `CompVis/stable-diffusion-v1-4`
    Hub(String),
    /// Local directory in diffusers layout (`unet/`, `vae/`, `text_encoder/`)
    Local(PathBuf),
}

impl ModelSource {
    /// Existing directories are treated as local checkouts, anything else as a hub id
    pub fn parse(value: &str) -> Self {
        let path = Path::new(value);
        if path.is_dir() {
            Self::Local(path.to_path_buf())
        } else {
            Self::Hub(value.to_string())
        }
    }

    fn fetch(&self, filename: &str) -> Result<PathBuf> {
        match self {
            Self::Hub(repo) => fetch_from_hub(repo, filename),
            Self::Local(dir) => {
                let path = dir.join(filename);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(ImageGenError::ModelLoading(format!(
                        "{} not found",
                        path.display()
                    )))
                }
            }
        }
    }

    /// Fetch `{stem}.fp16.safetensors` when running in half precision, falling back to fp32
    fn fetch_weights(&self, stem: &str, dtype: DType) -> Result<PathBuf> {
        if dtype == DType::F16 {
            tracing::info!("Attempting to load fp16 weights for {}", stem);
            match self.fetch(&format!("{stem}.fp16.safetensors")) {
                Ok(path) => return Ok(path),
                Err(_) => tracing::warn!("fp16 weights for {} not found, falling back to fp32", stem),
            }
        }
        self.fetch(&format!("{stem}.safetensors"))
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hub(repo) => write!(f, "hf://{repo}"),
            Self::Local(dir) => write!(f, "{}", dir.display()),
        }
    }
}

fn fetch_from_hub(repo: &str, filename: &str) -> Result<PathBuf> {
    let api = hf_hub::api::sync::Api::new().map_err(|e| ImageGenError::HfHub(e.to_string()))?;
    api.model(repo.to_string())
        .get(filename)
        .map_err(|e| ImageGenError::HfHub(format!("Failed to download {filename}: {e}")))
}

/// Stable Diffusion image-to-image pipeline.
///
/// All weights are loaded once in [`StableDiffusionImg2Img::load`]; `transform` only
/// reads them, so one instance serves every request for the lifetime of the process.
pub struct StableDiffusionImg2Img {
    version: StableDiffusionVersion,
    device: Device,
    dtype: DType,
    sd_config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
}

impl StableDiffusionImg2Img {
    /// Select the device and load tokenizer, CLIP, VAE and UNet weights
    pub fn load(
        version: StableDiffusionVersion,
        source: ModelSource,
        use_cpu: bool,
    ) -> Result<Self> {
        let device = if use_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available(0)?
        };

        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };

        tracing::info!(
            "Loading Stable Diffusion {:?} from {} on {:?} ({:?})",
            version,
            source,
            device,
            dtype
        );

        let sd_config = version.sd_config();

        tracing::info!("Loading CLIP tokenizer");
        let tokenizer_path = match source.fetch("tokenizer.json") {
            Ok(path) => path,
            Err(_) => {
                tracing::debug!("Downloading tokenizer from: {}", version.tokenizer_repo());
                fetch_from_hub(version.tokenizer_repo(), "tokenizer.json")?
            }
        };
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| ImageGenError::Tokenization(e.to_string()))?;

        let pad_token = sd_config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .ok_or_else(|| ImageGenError::Tokenization(format!("Pad token {pad_token} not found")))?;

        tracing::info!("Loading CLIP text encoder");
        let clip_weights = source.fetch_weights("text_encoder/model", dtype)?;
        let text_model =
            stable_diffusion::build_clip_transformer(&sd_config.clip, clip_weights, &device, dtype)?;

        tracing::info!("Loading VAE");
        let vae_weights = source.fetch_weights("vae/diffusion_pytorch_model", dtype)?;
        let vae = sd_config.build_vae(vae_weights, &device, dtype)?;

        tracing::info!("Loading UNet");
        let unet_weights = source.fetch_weights("unet/diffusion_pytorch_model", dtype)?;
        let unet = sd_config.build_unet(
            unet_weights,
            &device,
            4,     // standard latent channels
            false, // no flash attention
            dtype,
        )?;

        tracing::info!("Stable Diffusion pipeline ready");

        Ok(Self {
            version,
            device,
            dtype,
            sd_config,
            tokenizer,
            pad_id,
            text_model,
            vae,
            unet,
        })
    }

    fn text_embeddings(&self, prompt: &str) -> Result<Tensor> {
        let max_len = self.sd_config.clip.max_position_embeddings;

        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| ImageGenError::Tokenization(e.to_string()))?
            .get_ids()
            .to_vec();

        tokens.truncate(max_len);
        tokens.resize(max_len, self.pad_id);

        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }

    /// RGB u8 HWC -> 1x3xHxW in [-1, 1]
    fn image_to_tensor(&self, image: &RgbImage) -> Result<Tensor> {
        let (width, height) = image.dimensions();
        let tensor = Tensor::from_vec(
            image.as_raw().clone(),
            (height as usize, width as usize, 3),
            &Device::Cpu,
        )?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2. / 255., -1.)?
        .unsqueeze(0)?
        .to_device(&self.device)?
        .to_dtype(self.dtype)?;
        Ok(tensor)
    }

    /// 1x3xHxW in [-1, 1] -> RGB u8
    fn tensor_to_image(&self, image: &Tensor) -> Result<RgbImage> {
        let image = ((image / 2.)? + 0.5)?
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?;
        let image = (image.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?;

        let (_, _, height, width) = image.dims4()?;
        let data = image.i(0)?.permute((1, 2, 0))?.to_vec3::<u8>()?;
        let data: Vec<u8> = data.into_iter().flatten().flatten().collect();

        RgbImage::from_raw(width as u32, height as u32, data)
            .ok_or_else(|| ImageGenError::ImageProcessing("Failed to create image buffer".into()))
    }
}

impl ImageTransformer for StableDiffusionImg2Img {
    fn name(&self) -> &'static str {
        "stable-diffusion"
    }

    fn transform(&mut self, image: &RgbImage, params: &TransformParams) -> Result<RgbImage> {
        params.validate()?;

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
            return Err(ImageGenError::InvalidConfig(format!(
                "Width and height must be non-zero multiples of 8, got {width}x{height}"
            )));
        }

        tracing::info!(
            "img2img with Stable Diffusion {:?}: {}x{}, strength {}, guidance {}",
            self.version,
            width,
            height,
            params.strength,
            params.guidance_scale
        );

        if let Some(seed) = params.seed {
            tracing::info!("Using seed: {}", seed);
            // the CPU backend has no seedable rng
            if let Err(e) = self.device.set_seed(seed) {
                tracing::warn!("Seed ignored on {:?}: {}", self.device, e);
            }
        }

        let use_guidance = params.guidance_scale > 1.0;

        // 1. Encode prompt, with unconditional embeddings for guidance
        let text_embeddings = self.text_embeddings(&params.prompt)?;
        let text_embeddings = if use_guidance {
            let uncond_embeddings = self.text_embeddings("")?;
            Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?
        } else {
            text_embeddings
        };

        // 2. Encode the input image into latent space
        let init = self.image_to_tensor(image)?;
        let init_latents = (self.vae.encode(&init)?.sample()? * VAE_SCALE)?;

        // 3. Noise the latents up to the starting timestep
        let mut scheduler = self.sd_config.build_scheduler(params.num_steps)?;
        let timesteps = scheduler.timesteps().to_vec();
        let t_start = params.start_step();

        let mut latents = if t_start < timesteps.len() {
            let noise = init_latents.randn_like(0f64, 1f64)?;
            scheduler.add_noise(&init_latents, noise, timesteps[t_start])?
        } else {
            init_latents
        };

        // 4. Diffusion loop over the remaining steps
        tracing::info!(
            "Running diffusion for {} of {} steps",
            timesteps.len().saturating_sub(t_start),
            params.num_steps
        );
        for (step_idx, &timestep) in timesteps.iter().enumerate().skip(t_start) {
            tracing::debug!("Step {}/{}", step_idx + 1, params.num_steps);

            let latent_model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };

            let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;

            let noise_pred =
                self.unet
                    .forward(&latent_model_input, timestep as f64, &text_embeddings)?;

            let noise_pred = if use_guidance {
                let noise_pred = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&noise_pred[0], &noise_pred[1]);
                (uncond + ((text - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };

            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        // 5. Decode latents
        tracing::info!("Decoding latents to image");
        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        self.tensor_to_image(&decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_repo_matches_v1_4() {
        assert_eq!(
            StableDiffusionVersion::V1_4.repo(),
            "CompVis/stable-diffusion-v1-4"
        );
    }

    #[test]
    fn test_model_source_parse() {
        assert_eq!(
            ModelSource::parse("CompVis/stable-diffusion-v1-4"),
            ModelSource::Hub("CompVis/stable-diffusion-v1-4".into())
        );

        let dir = std::env::temp_dir();
        assert_eq!(
            ModelSource::parse(dir.to_str().unwrap()),
            ModelSource::Local(dir.clone())
        );
    }

    #[test]
    fn test_local_source_missing_file() {
        let source = ModelSource::Local(std::env::temp_dir().join("imagent-missing-model"));
        let err = source.fetch("unet/diffusion_pytorch_model.safetensors");
        assert!(matches!(err, Err(ImageGenError::ModelLoading(_))));
    }
}

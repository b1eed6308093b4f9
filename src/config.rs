//! Startup configuration: command-line flags backed by environment variables

use crate::error::{Error, Result};
use crate::handler::EnhanceSettings;
use clap::Parser;
use imagent::{
    Backend, DEFAULT_GUIDANCE_SCALE, DEFAULT_STEPS, DEFAULT_STRENGTH, ModelSource,
    StableDiffusionVersion, TransformParams,
};
use std::net::SocketAddr;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Telegram bot that enhances photos with Stable Diffusion img2img", long_about = None)]
pub struct Config {
    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Transformation backend
    #[arg(long, env = "ENHANCE_BACKEND", value_enum, default_value = "stable-diffusion")]
    pub backend: Backend,

    /// Stable Diffusion version
    #[arg(long, env = "MODEL_VERSION", value_enum, default_value = "v1-4")]
    pub model_version: StableDiffusionVersion,

    /// HuggingFace repo id or local diffusers directory (defaults to the version's repo)
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<String>,

    /// Share of the schedule applied to the photo, 0.0 - 1.0
    #[arg(long, env = "ENHANCE_STRENGTH", default_value_t = DEFAULT_STRENGTH)]
    pub strength: f64,

    /// Classifier-free guidance scale
    #[arg(long, env = "ENHANCE_GUIDANCE_SCALE", default_value_t = DEFAULT_GUIDANCE_SCALE)]
    pub guidance_scale: f64,

    /// Number of scheduler steps
    #[arg(long, env = "ENHANCE_STEPS", default_value_t = DEFAULT_STEPS)]
    pub steps: usize,

    /// Text prompt guiding the enhancement
    #[arg(long, env = "ENHANCE_PROMPT", default_value = "")]
    pub prompt: String,

    /// Fixed seed for reproducible output
    #[arg(long, env = "ENHANCE_SEED")]
    pub seed: Option<u64>,

    /// Force CPU usage (default: use GPU if available)
    #[arg(long, env = "FORCE_CPU")]
    pub cpu: bool,

    /// Bind address of the health endpoint
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8000")]
    pub health_addr: SocketAddr,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(Error::InvalidConfig("TELEGRAM_BOT_TOKEN is empty".into()));
        }
        self.transform_params()
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn model_source(&self) -> ModelSource {
        ModelSource::parse(
            self.model_path
                .as_deref()
                .unwrap_or_else(|| self.model_version.repo()),
        )
    }

    pub fn transform_params(&self) -> TransformParams {
        TransformParams {
            strength: self.strength,
            guidance_scale: self.guidance_scale,
            num_steps: self.steps,
            prompt: self.prompt.clone(),
            seed: self.seed,
        }
    }

    pub fn enhance_settings(&self) -> EnhanceSettings {
        EnhanceSettings {
            strength: self.strength,
            guidance_scale: self.guidance_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["retoucher"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--token", "123:abc"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, Backend::StableDiffusion);
        assert_eq!(
            config.model_source(),
            ModelSource::Hub("CompVis/stable-diffusion-v1-4".into())
        );
        assert_eq!(config.enhance_settings(), EnhanceSettings::default());
        assert_eq!(config.transform_params().num_steps, 50);
        assert_eq!(config.health_addr.port(), 8000);
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--token",
            "123:abc",
            "--backend",
            "preview",
            "--model-path",
            "runwayml/stable-diffusion-v1-5",
            "--strength",
            "0.4",
            "--guidance-scale",
            "5",
        ]);
        assert_eq!(config.backend, Backend::Preview);
        assert_eq!(
            config.model_source(),
            ModelSource::Hub("runwayml/stable-diffusion-v1-5".into())
        );
        assert_eq!(config.enhance_settings().strength, 0.4);
        assert_eq!(config.enhance_settings().guidance_scale, 5.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = parse(&["--token", "123:abc", "--strength", "1.2"]);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = parse(&["--token", "  "]);
        assert!(config.validate().is_err());

        let config = parse(&["--token", "123:abc", "--steps", "0"]);
        assert!(config.validate().is_err());
    }
}

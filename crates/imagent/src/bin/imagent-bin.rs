// imagent-bin - CLI for transforming a photo with an image-to-image backend

use clap::Parser;
use image::imageops::FilterType;
use imagent::{
    load_transformer, Backend, ModelSource, Result, StableDiffusionVersion, TransformParams,
    DEFAULT_GUIDANCE_SCALE, DEFAULT_STEPS, DEFAULT_STRENGTH,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Transform images using AI models (Stable Diffusion img2img)", long_about = None)]
struct Args {
    /// Input image (any format the image crate can decode)
    #[arg(short, long)]
    input: PathBuf,

    /// Output file path (PNG format)
    #[arg(short, long, default_value = "output.png")]
    output: PathBuf,

    /// Optional text prompt guiding the transformation
    #[arg(short, long, default_value = "")]
    prompt: String,

    /// Square working resolution (must be multiple of 8, 512 recommended for SD v1.x)
    #[arg(long, default_value = "512")]
    size: u32,

    /// How strongly the input is re-imagined, 0.0 - 1.0
    #[arg(long, default_value_t = DEFAULT_STRENGTH)]
    strength: f64,

    /// Classifier-free guidance scale
    #[arg(short, long, default_value_t = DEFAULT_GUIDANCE_SCALE)]
    guidance_scale: f64,

    /// Number of scheduler steps
    #[arg(short, long, default_value_t = DEFAULT_STEPS)]
    num_steps: usize,

    /// Random seed for reproducibility
    #[arg(short, long)]
    seed: Option<u64>,

    /// Backend to run
    #[arg(short, long, value_enum, default_value = "stable-diffusion")]
    backend: Backend,

    /// Stable Diffusion version
    #[arg(short, long, value_enum, default_value = "v1-4")]
    model: StableDiffusionVersion,

    /// HuggingFace repo id or local diffusers directory (defaults to the version's repo)
    #[arg(long)]
    model_path: Option<String>,

    /// Force CPU usage (default: use GPU if available)
    #[arg(long)]
    cpu: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // Load .env file if it exists (for HF_TOKEN and other environment variables)
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("✓ Loaded .env file from: {}", path.display());
    }

    imagent::bridge_hf_token();

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("imagent={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting imagent-bin");
    tracing::info!("Input: {}", args.input.display());
    tracing::info!("Output: {}", args.output.display());
    tracing::info!("Backend: {:?}", args.backend);

    let params = TransformParams {
        strength: args.strength,
        guidance_scale: args.guidance_scale,
        num_steps: args.num_steps,
        prompt: args.prompt,
        seed: args.seed,
    };
    params.validate()?;

    let source = ModelSource::parse(
        args.model_path
            .as_deref()
            .unwrap_or_else(|| args.model.repo()),
    );
    let mut transformer = load_transformer(args.backend, args.model, source, args.cpu)?;

    let input = image::open(&args.input)?.to_rgb8();
    let input = image::imageops::resize(&input, args.size, args.size, FilterType::CatmullRom);

    tracing::info!("Transforming image with {}...", transformer.name());
    let output = transformer.transform(&input, &params)?;

    tracing::info!("Saving image to: {}", args.output.display());
    output.save(&args.output)?;

    tracing::info!("Image transformed successfully!");
    println!("Image saved to: {}", args.output.display());

    Ok(())
}

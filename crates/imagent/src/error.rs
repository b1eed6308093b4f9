// Error types for imagent

use thiserror::Error;

/// Result type for imagent operations
pub type Result<T> = std::result::Result<T, ImageGenError>;

/// Errors that can occur while loading a model or transforming an image
#[derive(Error, Debug)]
pub enum ImageGenError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Model loading error: {0}")]
    ModelLoading(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HuggingFace Hub error: {0}")]
    HfHub(String),
}

impl From<image::ImageError> for ImageGenError {
    fn from(err: image::ImageError) -> Self {
        ImageGenError::ImageProcessing(err.to_string())
    }
}

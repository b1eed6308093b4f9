//! retoucher - Telegram bot that enhances photos with an image-to-image model
//!
//! A photo sent to the bot is decoded, normalized to 512x512 RGB, passed through the
//! model loaded at startup, and returned as a PNG. `/health` reports liveness.

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod invoker;
pub mod telegram;

pub use config::Config;
pub use error::{Error, Result};
pub use handler::{ChatTransport, EnhanceSettings, MessageHandler, PhotoOutcome, ReplyTarget};
pub use invoker::InferenceInvoker;

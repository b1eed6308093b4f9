//! Chat message handler: the command reply and the photo pipeline
//!
//! The handler knows nothing about Telegram. It talks to the chat platform through
//! [`ChatTransport`], which the `telegram` module implements for teloxide.

use crate::codec;
use crate::error::Result;
use crate::invoker::InferenceInvoker;
use async_trait::async_trait;
use imagent::{DEFAULT_GUIDANCE_SCALE, DEFAULT_STRENGTH};

/// Reply to `/start` and `/help`
pub const INSTRUCTION: &str = "\u{1F44B} Привет! Я бот для улучшения фотографий. Вот как я работаю:\n\n\
     1. Отправьте мне фотографию, которую хотите улучшить.\n\
     2. Я обработаю изображение и отправлю вам улучшенный результат!";

/// Caption on the enhanced photo
pub const SUCCESS_CAPTION: &str = "Ваше улучшенное изображение!";

/// Sent when decoding, transforming or encoding fails
pub const APOLOGY: &str =
    "Произошла ошибка при обработке изображения. Пожалуйста, попробуйте снова.";

/// File name attached to the outgoing PNG
pub const REPLY_FILE_NAME: &str = "enhanced.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Markdown,
}

/// One size variant of an attached photo
pub trait PhotoVariant {
    fn pixel_count(&self) -> u64;
}

/// The user message a text reply is threaded under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub chat_id: i64,
    pub message_id: i32,
}

/// A photo message as delivered by the transport
#[derive(Debug, Clone)]
pub struct IncomingPhotoEvent<P> {
    pub target: ReplyTarget,
    pub variants: Vec<P>,
}

/// What the chat platform must provide to the handler
#[async_trait]
pub trait ChatTransport: Send + Sync {
    type Photo: PhotoVariant + Send + Sync;

    /// Download the raw bytes of one photo variant
    async fn fetch_photo(&self, photo: &Self::Photo) -> Result<Vec<u8>>;

    /// Reply to `target` with text
    async fn send_text(&self, target: ReplyTarget, text: &str, format: TextFormat) -> Result<()>;

    async fn send_photo(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<()>;
}

/// Result of handling one photo message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoOutcome {
    /// The transformed image was sent back
    Enhanced,
    /// Processing failed and the apology was sent
    Apologized,
    /// The message carried no photo variants
    Ignored,
}

/// Model parameters applied to every photo
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhanceSettings {
    pub strength: f64,
    pub guidance_scale: f64,
}

impl Default for EnhanceSettings {
    fn default() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
        }
    }
}

pub struct MessageHandler {
    invoker: InferenceInvoker,
    settings: EnhanceSettings,
}

impl MessageHandler {
    pub fn new(invoker: InferenceInvoker, settings: EnhanceSettings) -> Self {
        Self { invoker, settings }
    }

    /// `/start` and `/help`: one static Markdown reply
    pub async fn on_command<T: ChatTransport>(
        &self,
        transport: &T,
        target: ReplyTarget,
    ) -> Result<()> {
        transport
            .send_text(target, INSTRUCTION, TextFormat::Markdown)
            .await
    }

    /// Photo messages: fetch, enhance, reply.
    ///
    /// Failures while decoding, transforming or encoding are answered with [`APOLOGY`]
    /// and swallowed. Transport failures (download, upload, sending either reply) are
    /// returned to the caller untouched.
    pub async fn on_photo<T: ChatTransport>(
        &self,
        transport: &T,
        event: IncomingPhotoEvent<T::Photo>,
    ) -> Result<PhotoOutcome> {
        let chat_id = event.target.chat_id;
        let Some(photo) = event.variants.iter().max_by_key(|p| p.pixel_count()) else {
            tracing::warn!(chat_id, "photo message without variants");
            return Ok(PhotoOutcome::Ignored);
        };

        tracing::info!(chat_id, pixels = photo.pixel_count(), "processing photo");

        let bytes = transport.fetch_photo(photo).await?;

        match self.enhance(&bytes).await {
            Ok(png) => {
                transport
                    .send_photo(chat_id, png, REPLY_FILE_NAME, SUCCESS_CAPTION)
                    .await?;
                Ok(PhotoOutcome::Enhanced)
            }
            Err(e) => {
                tracing::error!(chat_id, "Error processing image: {}", e);
                transport
                    .send_text(event.target, APOLOGY, TextFormat::Plain)
                    .await?;
                Ok(PhotoOutcome::Apologized)
            }
        }
    }

    /// decode -> normalize -> transform -> encode
    async fn enhance(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let input = codec::normalize(codec::decode(bytes)?);
        let output = self
            .invoker
            .transform(input, self.settings.strength, self.settings.guidance_scale)
            .await?;
        codec::encode(&output, codec::REPLY_FORMAT)
    }
}

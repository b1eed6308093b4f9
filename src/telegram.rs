//! Telegram binding: teloxide dispatcher and the `ChatTransport` implementation

use crate::error::{Error, Result};
use crate::handler::{
    ChatTransport, IncomingPhotoEvent, MessageHandler, PhotoVariant, ReplyTarget, TextFormat,
};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId, ParseMode, PhotoSize, ReplyParameters};
use teloxide::utils::command::BotCommands;

type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "начать работу")]
    Start,
    #[command(description = "как пользоваться ботом")]
    Help,
}

impl PhotoVariant for PhotoSize {
    fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Sends and downloads through the Bot API
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    type Photo = PhotoSize;

    async fn fetch_photo(&self, photo: &PhotoSize) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(photo.file.id.clone())
            .await
            .map_err(|e| Error::Transport(format!("get_file failed: {e}")))?;

        let mut bytes = Vec::new();
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| Error::Transport(format!("download failed: {e}")))?;

        tracing::debug!(path = %file.path, bytes = bytes.len(), "photo downloaded");
        Ok(bytes)
    }

    async fn send_text(&self, target: ReplyTarget, text: &str, format: TextFormat) -> Result<()> {
        let request = self
            .bot
            .send_message(ChatId(target.chat_id), text)
            .reply_parameters(ReplyParameters::new(MessageId(target.message_id)));
        let request = match format {
            // legacy Markdown: the instruction text relies on its escaping rules
            #[allow(deprecated)]
            TextFormat::Markdown => request.parse_mode(ParseMode::Markdown),
            TextFormat::Plain => request,
        };
        request
            .await
            .map_err(|e| Error::Transport(format!("send_message failed: {e}")))?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        image: Vec<u8>,
        file_name: &str,
        caption: &str,
    ) -> Result<()> {
        self.bot
            .send_photo(
                ChatId(chat_id),
                InputFile::memory(image).file_name(file_name.to_string()),
            )
            .caption(caption)
            .await
            .map_err(|e| Error::Transport(format!("send_photo failed: {e}")))?;
        Ok(())
    }
}

fn reply_target(msg: &Message) -> ReplyTarget {
    ReplyTarget {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

async fn on_command(
    bot: Bot,
    msg: Message,
    _cmd: Command,
    handler: Arc<MessageHandler>,
) -> HandlerResult {
    let transport = TelegramTransport::new(bot);
    handler.on_command(&transport, reply_target(&msg)).await?;
    Ok(())
}

async fn on_photo(
    bot: Bot,
    msg: Message,
    photos: Vec<PhotoSize>,
    handler: Arc<MessageHandler>,
) -> HandlerResult {
    let transport = TelegramTransport::new(bot);
    let event = IncomingPhotoEvent {
        target: reply_target(&msg),
        variants: photos,
    };
    let outcome = handler.on_photo(&transport, event).await?;
    tracing::debug!(chat_id = msg.chat.id.0, ?outcome, "photo handled");
    Ok(())
}

/// Poll for updates until Ctrl-C.
///
/// Errors returned by the endpoints (transport failures) end up in teloxide's logging
/// error handler; the user gets no reply for those.
pub async fn run(bot: Bot, handler: Arc<MessageHandler>) {
    let schema = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(on_command),
        )
        .branch(
            dptree::filter_map(|msg: Message| msg.photo().map(<[PhotoSize]>::to_vec))
                .endpoint(on_photo),
        );

    Dispatcher::builder(bot, schema)
        .dependencies(dptree::deps![handler])
        // other message types are ignored without a warning
        .default_handler(|_| async {})
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error from the update handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("/start", "retoucher_bot").unwrap(), Command::Start);
        assert_eq!(Command::parse("/help", "retoucher_bot").unwrap(), Command::Help);
        assert!(Command::parse("/enhance", "retoucher_bot").is_err());
    }
}

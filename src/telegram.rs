//! Telegram client using teloxide.

use std::path::Path;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, MessageId, ParseMode, ReplyParameters};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::BotError;

/// Outbound side of the bot. Every text is sent with HTML parse mode.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a message, optionally as a reply. Returns the new message id.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, BotError>;

    /// Replace the text of a message we sent earlier.
    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), BotError>;

    /// Send a PNG as a photo with a caption.
    async fn send_image(
        &self,
        chat_id: i64,
        image_data: Vec<u8>,
        caption: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, BotError>;

    /// Download a file by id into `dest`.
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), BotError>;
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn delivery_error(context: &str, e: impl std::fmt::Display) -> BotError {
    let msg = format!("{context}: {e}");
    warn!("{}", msg);
    BotError::DeliveryFailure(msg)
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, BotError> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        request
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| delivery_error("Failed to send", e))
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), BotError> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| delivery_error("Failed to edit", e))
    }

    async fn send_image(
        &self,
        chat_id: i64,
        image_data: Vec<u8>,
        caption: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<i64, BotError> {
        info!("📷 Sending image to chat {} ({} bytes)", chat_id, image_data.len());

        let input_file = InputFile::memory(image_data).file_name("chart.png");
        let mut request = self
            .bot
            .send_photo(ChatId(chat_id), input_file)
            .caption(caption)
            .parse_mode(ParseMode::Html);

        if let Some(msg_id) = reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(msg_id as i32)));
        }

        request
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| delivery_error("Failed to send image", e))
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), BotError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| BotError::DeliveryFailure(format!("Failed to get file info: {e}")))?;

        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(|e| BotError::DeliveryFailure(format!("Failed to create {}: {e}", dest.display())))?;

        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| BotError::DeliveryFailure(format!("Failed to download file: {e}")))?;
        out.flush()
            .await
            .map_err(|e| BotError::DeliveryFailure(format!("Failed to flush {}: {e}", dest.display())))?;

        info!("📥 Downloaded {} ({} bytes)", dest.display(), file.size);
        Ok(())
    }
}

//! Telegram transport using teloxide.

use std::path::Path;

use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode, ThreadId};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

use crate::onboarding::transport::{Keyboard, MessageRef, SendError, Transport};

/// Telegram API client.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.data.clone()))
            .collect::<Vec<_>>()
    }))
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef { chat_id: msg.chat.id.0, message_id: msg.id.0 }
}

/// Map a teloxide error onto the failure classes the flow cares about.
pub fn classify(err: RequestError) -> SendError {
    match &err {
        RequestError::Api(ApiError::BotBlocked) => SendError::Blocked,
        RequestError::Api(api) if api.to_string().to_lowercase().contains("thread not found") => {
            SendError::ThreadNotFound
        }
        RequestError::Network(e) if e.is_timeout() => SendError::Timeout,
        _ => SendError::Other(err.to_string()),
    }
}

impl Transport for TelegramTransport {
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<MessageRef, SendError> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }

        request.await.map(|msg| message_ref(&msg)).map_err(|e| {
            warn!("Failed to send to {}: {e}", chat_id);
            classify(e)
        })
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        photo: &Path,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        info!("📷 Sending photo {:?} to {}", photo, chat_id);

        let mut request = self
            .bot
            .send_photo(ChatId(chat_id), InputFile::file(photo.to_path_buf()))
            .caption(caption)
            .parse_mode(ParseMode::Html);

        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }

        request.await.map(|msg| message_ref(&msg)).map_err(|e| {
            warn!("Failed to send photo to {}: {e}", chat_id);
            classify(e)
        })
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), SendError> {
        let chat_id = ChatId(message.chat_id);
        let message_id = MessageId(message.message_id);

        match self
            .bot
            .edit_message_text(chat_id, message_id, text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                // Media messages carry a caption instead of text
                debug!("edit_message_text failed ({e}), editing caption");
                self.bot
                    .edit_message_caption(chat_id, message_id)
                    .caption(text)
                    .parse_mode(ParseMode::Html)
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        warn!("Failed to edit message {}: {e}", message.message_id);
                        classify(e)
                    })
            }
        }
    }

    async fn edit_keyboard(&self, message: MessageRef, keyboard: &Keyboard) -> Result<(), SendError> {
        self.bot
            .edit_message_reply_markup(ChatId(message.chat_id), MessageId(message.message_id))
            .reply_markup(to_markup(keyboard))
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!("Failed to edit keyboard of {}: {e}", message.message_id);
                classify(e)
            })
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError> {
        debug!("🗑️ Deleting message {} in chat {}", message.message_id, message.chat_id);

        self.bot
            .delete_message(ChatId(message.chat_id), MessageId(message.message_id))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn forward(&self, to_chat_id: i64, thread_id: i32, message: MessageRef) -> Result<(), SendError> {
        self.bot
            .forward_message(ChatId(to_chat_id), ChatId(message.chat_id), MessageId(message.message_id))
            .message_thread_id(ThreadId(MessageId(thread_id)))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn create_thread(&self, chat_id: i64, name: &str) -> Result<i32, SendError> {
        info!("🧵 Creating forum topic \"{}\" in chat {}", name, chat_id);

        let topic = self
            .bot
            .create_forum_topic(ChatId(chat_id), name)
            .await
            .map_err(|e| {
                warn!("Failed to create forum topic: {e}");
                classify(e)
            })?;

        Ok(topic.thread_id.0.0)
    }
}

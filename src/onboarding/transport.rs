//! Message transport abstraction.

use std::fmt;
use std::future::Future;
use std::path::Path;

/// A message the bot has sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

/// One inline button: visible label plus machine-readable callback data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self { label: label.into(), data: data.into() }
    }
}

/// Inline keyboard, row by row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }
}

/// Failure classes the onboarding flow reacts to differently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The forum thread no longer exists.
    ThreadNotFound,
    /// The recipient blocked the bot.
    Blocked,
    /// The request did not finish within its timeout.
    Timeout,
    Other(String),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadNotFound => write!(f, "message thread not found"),
            Self::Blocked => write!(f, "bot was blocked by the user"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SendError {}

/// Outbound messaging used by the onboarding flow.
///
/// Futures are `Send` so notification chains can run on spawned tasks.
pub trait Transport: Send + Sync + 'static {
    fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> impl Future<Output = Result<MessageRef, SendError>> + Send;

    fn send_photo(
        &self,
        chat_id: i64,
        photo: &Path,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> impl Future<Output = Result<MessageRef, SendError>> + Send;

    /// Replace the text (or caption, for media messages) of a sent message.
    fn edit_text(&self, message: MessageRef, text: &str) -> impl Future<Output = Result<(), SendError>> + Send;

    fn edit_keyboard(
        &self,
        message: MessageRef,
        keyboard: &Keyboard,
    ) -> impl Future<Output = Result<(), SendError>> + Send;

    fn delete_message(&self, message: MessageRef) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Forward `message` into thread `thread_id` of chat `to_chat_id`.
    fn forward(
        &self,
        to_chat_id: i64,
        thread_id: i32,
        message: MessageRef,
    ) -> impl Future<Output = Result<(), SendError>> + Send;

    /// Create a forum thread and return its id.
    fn create_thread(&self, chat_id: i64, name: &str) -> impl Future<Output = Result<i32, SendError>> + Send;
}

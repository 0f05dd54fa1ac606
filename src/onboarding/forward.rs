//! Mirroring of bot messages into per-user forum threads.
//!
//! Forwarding is a side channel for operators. Nothing here may fail the
//! user-facing flow: every error ends as a log line and an outcome value.
//! The only recovery is for a deleted thread, which is recreated once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::onboarding::store::ConversationStore;
use crate::onboarding::transport::{MessageRef, SendError, Transport};

/// Telegram's limit on forum topic names.
const MAX_TOPIC_NAME_CHARS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded { thread_id: i32 },
    /// The thread was missing; a new one was created and the retry succeeded.
    Recovered { thread_id: i32 },
    /// The user has no discussion thread.
    NoThread,
    Failed,
}

pub struct TopicForwarder<T> {
    transport: Arc<T>,
    store: Arc<ConversationStore>,
    group_chat_id: i64,
    timeout: Duration,
    /// Per-user guard so only one caller creates a thread at a time.
    creating: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl<T: Transport> TopicForwarder<T> {
    pub fn new(transport: Arc<T>, store: Arc<ConversationStore>, group_chat_id: i64, timeout: Duration) -> Self {
        Self { transport, store, group_chat_id, timeout, creating: Mutex::new(HashMap::new()) }
    }

    /// Forward into whatever thread the user's record currently names.
    pub async fn mirror(&self, user_id: i64, message: MessageRef) -> ForwardOutcome {
        let thread_id = match self.store.get(user_id) {
            Ok(record) => record.and_then(|r| r.discussion_thread_id),
            Err(e) => {
                error!("Failed to load record for user {}: {e}", user_id);
                return ForwardOutcome::Failed;
            }
        };

        match thread_id {
            Some(thread_id) => self.forward(user_id, message, thread_id).await,
            None => {
                debug!("No discussion thread for user {}, not mirroring", user_id);
                ForwardOutcome::NoThread
            }
        }
    }

    /// Forward `message` into `thread_id`, recreating the thread once if it
    /// was deleted.
    pub async fn forward(&self, user_id: i64, message: MessageRef, thread_id: i32) -> ForwardOutcome {
        match self.try_forward(thread_id, message).await {
            Ok(()) => ForwardOutcome::Forwarded { thread_id },
            Err(SendError::ThreadNotFound) => {
                info!("Topic {} not found for user {}, recreating", thread_id, user_id);
                self.recover(user_id, message, thread_id).await
            }
            Err(e) => {
                warn!("Error forwarding message to group for user {}: {e}", user_id);
                ForwardOutcome::Failed
            }
        }
    }

    /// Retry into a replacement for `failed`. A concurrent caller may have
    /// recreated it already, in which case its thread is reused.
    async fn recover(&self, user_id: i64, message: MessageRef, failed: i32) -> ForwardOutcome {
        let lock = self.creation_lock(user_id);
        let _guard = lock.lock().await;

        let thread_id = match self.stored_thread(user_id) {
            Err(()) => return ForwardOutcome::Failed,
            Ok(Some(current)) if current != failed => {
                debug!("Topic for user {} already recreated as {}", user_id, current);
                current
            }
            Ok(current) => match self.create_thread(user_id, current).await {
                Some(thread_id) => thread_id,
                None => return ForwardOutcome::Failed,
            },
        };

        match self.try_forward(thread_id, message).await {
            Ok(()) => ForwardOutcome::Recovered { thread_id },
            Err(e) => {
                warn!("Retry into new topic {} failed for user {}: {e}", thread_id, user_id);
                ForwardOutcome::Failed
            }
        }
    }

    /// The user's thread, created if none is recorded yet.
    pub async fn ensure_thread(&self, user_id: i64) -> Option<i32> {
        if let Ok(Some(thread_id)) = self.stored_thread(user_id) {
            return Some(thread_id);
        }

        let lock = self.creation_lock(user_id);
        let _guard = lock.lock().await;
        match self.stored_thread(user_id) {
            Ok(Some(thread_id)) => Some(thread_id),
            Ok(None) => self.create_thread(user_id, None).await,
            Err(()) => None,
        }
    }

    fn creation_lock(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.creating.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(user_id).or_default().clone()
    }

    fn stored_thread(&self, user_id: i64) -> Result<Option<i32>, ()> {
        match self.store.get(user_id) {
            Ok(record) => Ok(record.and_then(|r| r.discussion_thread_id)),
            Err(e) => {
                error!("Failed to load record for user {}: {e}", user_id);
                Err(())
            }
        }
    }

    /// Create a topic and store it in place of `replacing`. Callers hold the
    /// user's creation lock.
    async fn create_thread(&self, user_id: i64, replacing: Option<i32>) -> Option<i32> {
        let full_name = match self.store.get(user_id) {
            Ok(record) => record.map(|r| r.full_name).unwrap_or_default(),
            Err(e) => {
                error!("Failed to load record for user {}: {e}", user_id);
                return None;
            }
        };

        let name = topic_name(&full_name, user_id);
        let thread_id = match self.bounded(self.transport.create_thread(self.group_chat_id, &name)).await {
            Ok(thread_id) => thread_id,
            Err(e) => {
                warn!("Failed to create topic for user {}: {e}", user_id);
                return None;
            }
        };

        match self.store.replace_thread(user_id, replacing, thread_id) {
            Ok(true) => {}
            Ok(false) => warn!("Topic for user {} changed while creating {}", user_id, thread_id),
            Err(e) => error!("Failed to save topic {} for user {}: {e}", thread_id, user_id),
        }
        Some(thread_id)
    }

    async fn try_forward(&self, thread_id: i32, message: MessageRef) -> Result<(), SendError> {
        self.bounded(self.transport.forward(self.group_chat_id, thread_id, message)).await
    }

    async fn bounded<R>(&self, call: impl Future<Output = Result<R, SendError>>) -> Result<R, SendError> {
        tokio::time::timeout(self.timeout, call).await.unwrap_or(Err(SendError::Timeout))
    }
}

fn topic_name(full_name: &str, user_id: i64) -> String {
    let name = if full_name.trim().is_empty() {
        user_id.to_string()
    } else {
        format!("{} ({})", full_name.trim(), user_id)
    };
    name.chars().take(MAX_TOPIC_NAME_CHARS).collect()
}

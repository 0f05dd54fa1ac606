//! Per-user conversation record.

use chrono::{DateTime, Utc};

/// Durable state for one user's onboarding conversation.
///
/// Absent and explicitly-false flags are treated the same: every field has a
/// defined default and there is no "never set" state to check for.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationRecord {
    pub user_id: i64,
    /// Display name, used to title the discussion thread.
    pub full_name: String,
    /// Selected language code; empty until the first selection.
    pub language_code: String,
    /// Assigned once per user lifetime.
    pub request_id: Option<i64>,
    /// True once the terminal source-selection response has been rendered.
    pub source_selected: bool,
    pub last_menu_shown_at: Option<DateTime<Utc>>,
    /// Id of the outstanding notification chain, if any.
    pub active_chain_id: Option<String>,
    /// Forum thread mirroring this user's conversation. May be stale.
    pub discussion_thread_id: Option<i32>,
}

impl ConversationRecord {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            full_name: String::new(),
            language_code: String::new(),
            request_id: None,
            source_selected: false,
            last_menu_shown_at: None,
            active_chain_id: None,
            discussion_thread_id: None,
        }
    }

    /// Request id as shown to the user, zero-padded to seven digits.
    pub fn display_request_id(&self) -> String {
        format!("{:07}", self.request_id.unwrap_or(0))
    }
}

/// The Telegram user an event came from.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: i64,
    pub full_name: String,
}

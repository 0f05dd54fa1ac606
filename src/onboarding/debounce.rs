//! Menu re-entry debounce.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::onboarding::record::ConversationRecord;

/// Whether the main menu may be rendered again at `now`.
///
/// Returns false while less than `cooldown` has passed since the last render.
/// A timestamp in the future (clock skew) also suppresses. The caller must
/// persist the new timestamp before any further menu side effects; see
/// `ConversationStore::claim_menu`, which does both under one lock.
pub fn should_render_menu(record: &ConversationRecord, now: DateTime<Utc>, cooldown: Duration) -> bool {
    match record.last_menu_shown_at {
        None => true,
        Some(last) => {
            let elapsed_ms = now.signed_duration_since(last).num_milliseconds();
            let cooldown_ms = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
            elapsed_ms >= cooldown_ms
        }
    }
}

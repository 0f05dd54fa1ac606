//! At-most-once terminal response to the source question.

use std::sync::Arc;

use tracing::info;

use crate::onboarding::store::ConversationStore;

/// Whether this caller gets to render the terminal "thanks" response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    First,
    AlreadyRecorded,
}

/// Shared by the online-source and offline callback paths. The flag is
/// only ever reset by a fresh `/start`, never here.
pub struct SourceSelectionGate {
    store: Arc<ConversationStore>,
}

impl SourceSelectionGate {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self { store }
    }

    pub fn try_finalize(&self, user_id: i64) -> rusqlite::Result<Finalize> {
        if self.store.try_mark_source_selected(user_id)? {
            Ok(Finalize::First)
        } else {
            info!("Source already recorded for user {}", user_id);
            Ok(Finalize::AlreadyRecorded)
        }
    }
}

//! Delayed notification chains.
//!
//! After the main menu is shown, each user gets one chain: a time-of-day
//! greeting after `greeting_delay`, then a follow-up after a further
//! `follow_up_delay`. Starting a new chain for a user cancels the old one.
//!
//! Cancellation is cooperative. It is observed at each suspension point and
//! before each send; a send already in flight finishes, but the chain never
//! proceeds to the next step afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::onboarding::forward::TopicForwarder;
use crate::onboarding::greeting::{Clock, DayPart};
use crate::onboarding::registry::{ChainId, TaskRegistry};
use crate::onboarding::store::ConversationStore;
use crate::onboarding::texts::{self, Language, TextKey};
use crate::onboarding::transport::{SendError, Transport};

#[derive(Debug, Clone, Copy)]
pub struct ChainTiming {
    pub greeting_delay: Duration,
    pub follow_up_delay: Duration,
}

impl Default for ChainTiming {
    fn default() -> Self {
        Self {
            greeting_delay: Duration::from_secs(35),
            follow_up_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    Created,
    WaitingGreeting,
    GreetingSent,
    WaitingFollowUp,
    FollowUpSent,
    Cancelled,
    Failed(SendError),
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::WaitingGreeting => write!(f, "waiting for greeting"),
            Self::GreetingSent => write!(f, "greeting sent"),
            Self::WaitingFollowUp => write!(f, "waiting for follow-up"),
            Self::FollowUpSent => write!(f, "follow-up sent"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// One scheduled greeting + follow-up sequence.
#[derive(Debug, Clone)]
pub struct NotificationChain {
    pub chain_id: ChainId,
    pub user_id: i64,
    /// Language at creation time; later changes do not affect this chain.
    pub language: Language,
}

/// A chain that has been registered and spawned.
pub struct ScheduledChain {
    pub chain_id: ChainId,
    pub task: JoinHandle<ChainState>,
}

pub struct NotificationScheduler<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    transport: Arc<T>,
    store: Arc<ConversationStore>,
    registry: TaskRegistry,
    forwarder: Arc<TopicForwarder<T>>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    timing: ChainTiming,
}

impl<T: Transport> NotificationScheduler<T> {
    pub fn new(
        transport: Arc<T>,
        store: Arc<ConversationStore>,
        forwarder: Arc<TopicForwarder<T>>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
        timing: ChainTiming,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                registry: TaskRegistry::new(),
                forwarder,
                clock,
                timezone,
                timing,
            }),
        }
    }

    /// Start a new chain for the user, superseding any live one.
    ///
    /// The store is pointed at the new chain before the old chain is
    /// cancelled, so readers of `active_chain_id` never see a gap.
    pub fn start(&self, user_id: i64, language: Language) -> rusqlite::Result<ScheduledChain> {
        let inner = &self.inner;
        let chain_id = inner.registry.next_id(user_id, inner.clock.now());
        let token = CancellationToken::new();

        let previous = inner.registry.supersede(chain_id.clone(), user_id, token.clone(), || {
            inner
                .store
                .replace_active_chain(user_id, chain_id.as_str())
                .map(|previous| previous.map(ChainId::from))
        })?;
        if let Some(previous) = previous {
            info!("⏱️ Chain {} supersedes {} for user {}", chain_id, previous, user_id);
        } else {
            info!("⏱️ Chain {} scheduled for user {}", chain_id, user_id);
        }

        let chain = NotificationChain { chain_id: chain_id.clone(), user_id, language };
        let task = tokio::spawn(self.inner.clone().run(chain, token));
        Ok(ScheduledChain { chain_id, task })
    }

    /// Cancel whatever chain the user has and clear `active_chain_id`.
    pub fn cancel_for_user(&self, user_id: i64) -> rusqlite::Result<usize> {
        let store = &self.inner.store;
        let cancelled = self
            .inner
            .registry
            .evict_user(user_id, || store.take_active_chain(user_id).map(|_| ()))?;
        if cancelled > 0 {
            info!("Cancelled {} pending chain(s) for user {}", cancelled, user_id);
        }
        Ok(cancelled)
    }

    /// Number of chains currently registered across all users.
    pub fn pending(&self) -> usize {
        self.inner.registry.len()
    }

    #[cfg(test)]
    pub fn live_for_user(&self, user_id: i64) -> usize {
        self.inner.registry.live_for_user(user_id)
    }
}

/// Removes the chain from the registry and clears its durable pointer.
/// Runs on every exit path, including panics.
struct Teardown<'a, T> {
    inner: &'a Inner<T>,
    chain: &'a NotificationChain,
}

impl<T> Drop for Teardown<'_, T> {
    fn drop(&mut self) {
        let chain = self.chain;
        self.inner.registry.forget(&chain.chain_id);
        if let Err(e) = self.inner.store.clear_active_chain_if(chain.user_id, chain.chain_id.as_str()) {
            error!("Failed to clear chain {} for user {}: {e}", chain.chain_id, chain.user_id);
        }
    }
}

impl<T: Transport> Inner<T> {
    async fn run(self: Arc<Self>, chain: NotificationChain, token: CancellationToken) -> ChainState {
        let _teardown = Teardown { inner: &self, chain: &chain };

        let outcome = self.drive(&chain, &token).await;
        match &outcome {
            ChainState::FollowUpSent => debug!("Chain {} completed", chain.chain_id),
            ChainState::Cancelled => info!("Delayed messages cancelled for user {}", chain.user_id),
            ChainState::Failed(e) => warn!("Error sending delayed messages to user {}: {e}", chain.user_id),
            other => error!("Chain {} stopped in non-terminal state {other}", chain.chain_id),
        }
        outcome
    }

    async fn drive(&self, chain: &NotificationChain, token: &CancellationToken) -> ChainState {
        let mut state = ChainState::Created;

        enter(chain, &mut state, ChainState::WaitingGreeting);
        if !pause(token, self.timing.greeting_delay).await {
            debug!("Chain {} cancelled while {state}", chain.chain_id);
            return ChainState::Cancelled;
        }
        let part = DayPart::at(self.clock.now(), self.timezone);
        if let Err(e) = self.deliver(chain, part.text_key()).await {
            return ChainState::Failed(e);
        }
        enter(chain, &mut state, ChainState::GreetingSent);

        enter(chain, &mut state, ChainState::WaitingFollowUp);
        if !pause(token, self.timing.follow_up_delay).await {
            debug!("Chain {} cancelled while {state}", chain.chain_id);
            return ChainState::Cancelled;
        }
        if let Err(e) = self.deliver(chain, TextKey::ReadyToHelp).await {
            return ChainState::Failed(e);
        }
        ChainState::FollowUpSent
    }

    async fn deliver(&self, chain: &NotificationChain, key: TextKey) -> Result<(), SendError> {
        let text = texts::text(chain.language, key);
        let message = self.transport.send_text(chain.user_id, text, None).await?;
        self.forwarder.mirror(chain.user_id, message).await;
        Ok(())
    }
}

fn enter(chain: &NotificationChain, state: &mut ChainState, next: ChainState) {
    debug!("Chain {}: {} → {}", chain.chain_id, state, next);
    *state = next;
}

/// Sleep for `delay` unless cancelled first. True if the chain may go on.
async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;

        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => !token.is_cancelled(),
    }
}

//! Onboarding flow: language → main menu → acquisition source.
//!
//! Entry points never return errors. Expected races (duplicate menu
//! requests, duplicate source answers) produce a defined alternate
//! response; delivery and storage failures are logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use teloxide::utils::html;
use tracing::{debug, error, info, warn};

use crate::onboarding::forward::TopicForwarder;
use crate::onboarding::gate::{Finalize, SourceSelectionGate};
use crate::onboarding::greeting::Clock;
use crate::onboarding::record::{ConversationRecord, UserProfile};
use crate::onboarding::scheduler::{ChainTiming, NotificationScheduler};
use crate::onboarding::store::ConversationStore;
use crate::onboarding::texts::{self, Choice, Language, OnlineSource, SOURCE_OFFLINE, TextKey};
use crate::onboarding::transport::{Keyboard, MessageRef, SendError, Transport};
use crate::tracking::TrackingClient;

/// Onboarding settings.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Forum supergroup that hosts per-user discussion threads.
    pub group_chat_id: i64,
    pub menu_cooldown: Duration,
    /// Pause between the main menu text and the source question.
    pub menu_pause: Duration,
    /// Picture sent with the source question; text only when absent.
    pub menu_photo: Option<PathBuf>,
    /// Bound on each forwarding/thread call.
    pub request_timeout: Duration,
    /// Reference timezone for the time-of-day greeting.
    pub timezone: Tz,
    pub timing: ChainTiming,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            group_chat_id: 0,
            menu_cooldown: Duration::from_secs(3),
            menu_pause: Duration::from_secs(3),
            menu_photo: None,
            request_timeout: Duration::from_secs(5),
            timezone: chrono_tz::Europe::Moscow,
            timing: ChainTiming::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOutcome {
    Rendered,
    /// Debounced: requested again within the cooldown.
    Suppressed,
    Failed,
}

pub struct Onboarding<T> {
    config: OnboardingConfig,
    transport: Arc<T>,
    store: Arc<ConversationStore>,
    forwarder: Arc<TopicForwarder<T>>,
    scheduler: NotificationScheduler<T>,
    gate: SourceSelectionGate,
    tracker: Option<Arc<TrackingClient>>,
    clock: Arc<dyn Clock>,
}

impl<T: Transport> Onboarding<T> {
    pub fn new(
        config: OnboardingConfig,
        transport: Arc<T>,
        store: Arc<ConversationStore>,
        clock: Arc<dyn Clock>,
        tracker: Option<Arc<TrackingClient>>,
    ) -> Self {
        let forwarder = Arc::new(TopicForwarder::new(
            transport.clone(),
            store.clone(),
            config.group_chat_id,
            config.request_timeout,
        ));
        let scheduler = NotificationScheduler::new(
            transport.clone(),
            store.clone(),
            forwarder.clone(),
            clock.clone(),
            config.timezone,
            config.timing,
        );
        let gate = SourceSelectionGate::new(store.clone());

        Self { config, transport, store, forwarder, scheduler, gate, tracker, clock }
    }

    /// Chains still scheduled; they are abandoned on shutdown.
    pub fn pending_chains(&self) -> usize {
        self.scheduler.pending()
    }

    /// `/start`: reset the conversation and show the main menu.
    ///
    /// A duplicate `/start` inside the menu cooldown still resets the
    /// conversation but leaves the menu and chain of the first one alone.
    /// Otherwise any chain left from an earlier conversation is cancelled
    /// before the reset.
    pub async fn on_conversation_start(&self, user: &UserProfile, command_message: Option<MessageRef>) {
        let claimed = self.claim_menu(user.id);
        if claimed {
            if let Err(e) = self.scheduler.cancel_for_user(user.id) {
                error!("Failed to cancel chains for user {}: {e}", user.id);
            }
        }

        let record = match self.store.start_conversation(user.id, &user.full_name, Language::default().code()) {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to start conversation for user {}: {e}", user.id);
                return;
            }
        };
        info!("▶️ Conversation started for {} ({}), request {}", user.full_name, user.id, record.display_request_id());

        self.forwarder.ensure_thread(user.id).await;
        if let Some(message) = command_message {
            self.delete(message).await;
        }

        if claimed {
            self.render_menu(user, &record).await;
        } else {
            info!("Skipping main menu for user {} - called too soon", user.id);
        }
    }

    /// `/language`: offer the language picker.
    pub async fn on_language_command(&self, user: &UserProfile, command_message: Option<MessageRef>) {
        let record = self.record(user.id);
        let chosen = record.as_ref().is_some_and(|r| !r.language_code.is_empty());
        let language = record.map(|r| Language::from_stored(&r.language_code)).unwrap_or_default();

        let text = if chosen {
            texts::text(language, TextKey::ChangeLanguage).to_string()
        } else {
            texts::text(language, TextKey::SelectLanguage).replace("{full_name}", &display_name(user))
        };
        if let Err(e) = self.send(user.id, &text, Some(&texts::language_keyboard())).await {
            warn!("Failed to send language picker to user {}: {e}", user.id);
        }
        if let Some(message) = command_message {
            self.delete(message).await;
        }
    }

    /// `/source`: informational text.
    pub async fn on_source_command(&self, user: &UserProfile, command_message: Option<MessageRef>) {
        let text = texts::text(self.language_of(user.id), TextKey::Source);
        if let Err(e) = self.send(user.id, text, None).await {
            warn!("Failed to send source info to user {}: {e}", user.id);
        }
        if let Some(message) = command_message {
            self.delete(message).await;
        }
    }

    pub async fn on_language_selected(&self, user: &UserProfile, language: Language) -> MenuOutcome {
        if let Err(e) = self.store.set_language(user.id, language.code()) {
            error!("Failed to save language for user {}: {e}", user.id);
        }
        self.on_menu_requested(user).await
    }

    pub async fn on_menu_requested(&self, user: &UserProfile) -> MenuOutcome {
        if !self.claim_menu(user.id) {
            info!("Skipping main menu for user {} - called too soon", user.id);
            return MenuOutcome::Suppressed;
        }
        match self.store.get(user.id) {
            Ok(Some(record)) => self.render_menu(user, &record).await,
            Ok(None) => MenuOutcome::Failed,
            Err(e) => {
                error!("Failed to load record for user {}: {e}", user.id);
                MenuOutcome::Failed
            }
        }
    }

    /// "Online": swap the keyboard for the list of online sources.
    pub async fn on_online_requested(&self, user: &UserProfile, message: Option<MessageRef>) {
        let Some(message) = message else {
            debug!("Online sources requested without a message for user {}", user.id);
            return;
        };
        let keyboard = texts::online_sources_keyboard(self.language_of(user.id));
        if let Err(e) = self.transport.edit_keyboard(message, &keyboard).await {
            warn!("Failed to show online sources to user {}: {e}", user.id);
        }
    }

    pub async fn on_source_selected(
        &self,
        user: &UserProfile,
        source: OnlineSource,
        message: Option<MessageRef>,
    ) -> Option<Finalize> {
        self.finalize(user, source.callback_data(), message).await
    }

    pub async fn on_offline_selected(&self, user: &UserProfile, message: Option<MessageRef>) -> Option<Finalize> {
        self.finalize(user, SOURCE_OFFLINE, message).await
    }

    /// Route an inline button press. Returns a short notice for the
    /// callback answer, if any.
    pub async fn handle_callback(&self, user: &UserProfile, data: &str, message: Option<MessageRef>) -> Option<String> {
        let Some(choice) = Choice::parse(data) else {
            debug!("Ignoring unknown callback data {:?} from user {}", data, user.id);
            return None;
        };

        let outcome = match choice {
            Choice::Language(language) => {
                self.on_language_selected(user, language).await;
                None
            }
            Choice::SourceOnline => {
                self.on_online_requested(user, message).await;
                None
            }
            Choice::SourceOffline => self.on_offline_selected(user, message).await,
            Choice::Source(source) => self.on_source_selected(user, source, message).await,
        };

        match outcome {
            Some(Finalize::AlreadyRecorded) => {
                Some(texts::text(self.language_of(user.id), TextKey::AlreadyRecorded).to_string())
            }
            _ => None,
        }
    }

    /// Thanks the user on the first answer only; later answers get the
    /// "already recorded" notice from `handle_callback`.
    async fn finalize(&self, user: &UserProfile, goal: &str, message: Option<MessageRef>) -> Option<Finalize> {
        let outcome = match self.gate.try_finalize(user.id) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to record source for user {}: {e}", user.id);
                return None;
            }
        };
        if outcome == Finalize::AlreadyRecorded {
            return Some(outcome);
        }

        info!("✅ User {} answered {}", user.id, goal);
        let thanks = texts::text(self.language_of(user.id), TextKey::ThanksFeedback);
        let delivered = match message {
            Some(message) => self.transport.edit_text(message, thanks).await,
            None => self.send(user.id, thanks, None).await.map(|_| ()),
        };
        if let Err(e) = delivered {
            warn!("Failed to thank user {}: {e}", user.id);
        }

        if let Some(tracker) = &self.tracker {
            tracker.spawn_goal(user.id, goal);
        }
        Some(outcome)
    }

    async fn render_menu(&self, user: &UserProfile, record: &ConversationRecord) -> MenuOutcome {
        let language = Language::from_stored(&record.language_code);
        let text = texts::text(language, TextKey::MainMenu)
            .replace("{full_name}", &display_name(user))
            .replace("{request_id}", &record.display_request_id());

        if let Err(e) = self.send(user.id, &text, None).await {
            warn!("Failed to send main menu to user {}: {e}", user.id);
            return MenuOutcome::Failed;
        }

        if !self.config.menu_pause.is_zero() {
            tokio::time::sleep(self.config.menu_pause).await;
        }
        self.send_source_question(user.id, language).await;

        if let Err(e) = self.scheduler.start(user.id, language) {
            error!("Failed to schedule delayed messages for user {}: {e}", user.id);
        }
        MenuOutcome::Rendered
    }

    /// Picture with caption and the online/offline keyboard, or plain text
    /// when the picture is missing or fails to send.
    async fn send_source_question(&self, user_id: i64, language: Language) {
        let caption = texts::text(language, TextKey::GetToKnowUs);
        let keyboard = texts::source_type_keyboard(language);

        match &self.config.menu_photo {
            Some(path) if path.exists() => match self.transport.send_photo(user_id, path, caption, Some(&keyboard)).await {
                Ok(message) => {
                    self.forwarder.mirror(user_id, message).await;
                    return;
                }
                Err(e) => warn!("Error sending photo to user {}: {e}, falling back to text", user_id),
            },
            Some(path) => warn!("Photo not found at {:?}, sending text only", path),
            None => {}
        }

        if let Err(e) = self.send(user_id, caption, Some(&keyboard)).await {
            warn!("Failed to send source question to user {}: {e}", user_id);
        }
    }

    /// Send a message and mirror it to the user's discussion thread.
    async fn send(&self, user_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<MessageRef, SendError> {
        let message = self.transport.send_text(user_id, text, keyboard).await?;
        self.forwarder.mirror(user_id, message).await;
        Ok(message)
    }

    async fn delete(&self, message: MessageRef) {
        if let Err(e) = self.transport.delete_message(message).await {
            debug!("Failed to delete message {}: {e}", message.message_id);
        }
    }

    fn claim_menu(&self, user_id: i64) -> bool {
        match self.store.claim_menu(user_id, self.clock.now(), self.config.menu_cooldown) {
            Ok(claimed) => claimed.is_some(),
            Err(e) => {
                error!("Failed to check menu cooldown for user {}: {e}", user_id);
                false
            }
        }
    }

    fn record(&self, user_id: i64) -> Option<ConversationRecord> {
        self.store.get(user_id).unwrap_or_else(|e| {
            error!("Failed to load record for user {}: {e}", user_id);
            None
        })
    }

    fn language_of(&self, user_id: i64) -> Language {
        self.record(user_id)
            .map(|r| Language::from_stored(&r.language_code))
            .unwrap_or_default()
    }
}

fn display_name(user: &UserProfile) -> String {
    html::bold(&html::escape(&user.full_name))
}

mod config;
mod onboarding;
mod tracking;

use std::sync::Arc;

use teloxide::dispatching::HandlerExt;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberUpdated, User};
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use onboarding::{ConversationStore, MessageRef, Onboarding, SystemClock, TelegramTransport, UserProfile};
use tracking::TrackingClient;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "Start over")]
    Start(String),
    #[command(description = "Show the main menu")]
    Menu,
    #[command(description = "Change language")]
    Language,
    #[command(description = "Where to find us")]
    Source,
}

struct BotState {
    onboarding: Onboarding<TelegramTransport>,
    tracker: Option<Arc<TrackingClient>>,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "onboardbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("onboardbot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting onboardbot...");
    info!("Loaded config from {config_path}");
    info!("Discussion group: {}, timezone: {}", config.group_id, config.timezone);

    let store = match ConversationStore::open(&config.database_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open conversation store: {e}");
            std::process::exit(1);
        }
    };

    let tracker = match &config.tgtrack_api_key {
        Some(key) => match TrackingClient::new(key, config.request_timeout) {
            Ok(client) => {
                info!("TGTrack enabled");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!("TGTrack disabled: {e}");
                None
            }
        },
        None => {
            info!("TGTrack disabled");
            None
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);
    let onboarding = Onboarding::new(
        config.onboarding(),
        Arc::new(TelegramTransport::new(bot.clone())),
        store,
        Arc::new(SystemClock),
        tracker.clone(),
    );
    let state = Arc::new(BotState { onboarding, tracker });

    let handler = dptree::entry()
        .inspect(|update: Update, state: Arc<BotState>| {
            if let Some(tracker) = &state.tracker {
                tracker.spawn_update(&update);
            }
        })
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.chat.is_private())
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery| from_private_chat(&q))
                .endpoint(handle_callback),
        )
        .branch(Update::filter_my_chat_member().endpoint(handle_my_chat_member));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state.clone()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    let pending = state.onboarding.pending_chains();
    if pending > 0 {
        info!("Shutting down with {pending} delayed message chain(s) abandoned");
    }
}

/// Buttons pressed under a message in a private chat. Presses in the
/// operator forum, or without a message, are ignored.
fn from_private_chat(q: &CallbackQuery) -> bool {
    q.message.as_ref().is_some_and(|m| m.chat().is_private())
}

fn profile(user: &User) -> UserProfile {
    UserProfile { id: user.id.0 as i64, full_name: user.full_name() }
}

async fn handle_command(msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let user = profile(user);
    let command_message = Some(MessageRef { chat_id: msg.chat.id.0, message_id: msg.id.0 });

    match cmd {
        Command::Start(payload) => {
            if !payload.trim().is_empty() {
                info!("📨 /start from {} ({}) with payload {:?}", user.full_name, user.id, payload.trim());
            }
            state.onboarding.on_conversation_start(&user, command_message).await;
        }
        Command::Menu => {
            state.onboarding.on_menu_requested(&user).await;
        }
        Command::Language => state.onboarding.on_language_command(&user, command_message).await,
        Command::Source => state.onboarding.on_source_command(&user, command_message).await,
    }

    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    let user = profile(&q.from);
    let message = q
        .message
        .as_ref()
        .map(|m| MessageRef { chat_id: m.chat().id.0, message_id: m.id().0 });

    let notice = match q.data.as_deref() {
        Some(data) => state.onboarding.handle_callback(&user, data, message).await,
        None => None,
    };

    let answer = bot.answer_callback_query(q.id);
    let answered = match notice {
        Some(text) => answer.text(text).await,
        None => answer.await,
    };
    if let Err(e) = answered {
        debug!("Failed to answer callback from user {}: {e}", user.id);
    }

    Ok(())
}

async fn handle_my_chat_member(update: ChatMemberUpdated) -> ResponseResult<()> {
    let user = &update.from;
    info!(
        "👤 Bot membership for {} ({}) changed: {:?} → {:?}",
        user.full_name(),
        user.id,
        update.old_chat_member.status(),
        update.new_chat_member.status()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback_in(chat: serde_json::Value) -> CallbackQuery {
        serde_json::from_value(serde_json::json!({
            "id": "4382bfdwdsb323b2d9",
            "from": { "id": 42, "is_bot": false, "first_name": "Alice" },
            "message": {
                "message_id": 17,
                "date": 1746352800,
                "chat": chat,
                "text": "Давайте познакомимся поближе"
            },
            "chat_instance": "-5849316201839",
            "data": "source_offline"
        }))
        .unwrap()
    }

    #[test]
    fn test_private_callback_accepted() {
        let q = callback_in(serde_json::json!({ "id": 42, "type": "private", "first_name": "Alice" }));
        assert!(from_private_chat(&q));
    }

    #[test]
    fn test_group_callback_ignored() {
        let q = callback_in(serde_json::json!({
            "id": -1001234567890i64,
            "type": "supergroup",
            "title": "Operators",
            "is_forum": true
        }));
        assert!(!from_private_chat(&q));
    }

    #[test]
    fn test_callback_without_message_ignored() {
        let mut q = callback_in(serde_json::json!({ "id": 42, "type": "private", "first_name": "Alice" }));
        q.message = None;
        assert!(!from_private_chat(&q));
    }
}

//! TGTrack traffic-attribution webhook client.
//!
//! Every call is fire-and-forget: it runs on a detached task with its own
//! timeout, and failures only reach the log.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use teloxide::types::{Update, UpdateKind};
use tracing::{debug, warn};

const TGTRACK_API_URL: &str = "https://bot-api.tgtrack.ru/v1";

pub struct TrackingClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize, Debug)]
struct ApiResponse {
    error: Option<ApiStatus>,
}

#[derive(Deserialize, Debug)]
struct ApiStatus {
    code: i64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct ReachGoal<'a> {
    user_id: String,
    target: &'a str,
}

impl TrackingClient {
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            base_url: format!("{}/{}", TGTRACK_API_URL, api_key),
            client,
        })
    }

    /// Relay a raw Telegram update, as the webhook integration would.
    pub async fn on_telegram_webhook(&self, update: &serde_json::Value) -> Result<(), String> {
        self.post("on_telegram_webhook", update).await
    }

    /// Report that a user reached an ad-campaign goal.
    pub async fn send_reach_goal(&self, user_id: i64, target: &str) -> Result<(), String> {
        let body = ReachGoal { user_id: user_id.to_string(), target };
        self.post("send_reach_goal", &body).await
    }

    async fn post<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<(), String> {
        let url = format!("{}/{}", self.base_url, method);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("network error: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response: {e}"))?;

        interpret(status.as_u16(), &body)
    }

    /// Relay `update` in the background if it is one the tracker cares about.
    pub fn spawn_update(self: &Arc<Self>, update: &Update) {
        if !should_track(update) {
            return;
        }
        let payload = match serde_json::to_value(update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("TGTrack: failed to serialize update {}: {e}", update.id.0);
                return;
            }
        };

        let client = self.clone();
        tokio::spawn(async move {
            match client.on_telegram_webhook(&payload).await {
                Ok(()) => debug!("TGTrack: on_telegram_webhook ok"),
                Err(e) => warn!("TGTrack: on_telegram_webhook failed: {e}"),
            }
        });
    }

    pub fn spawn_goal(self: &Arc<Self>, user_id: i64, target: &str) {
        let client = self.clone();
        let target = target.to_string();
        tokio::spawn(async move {
            match client.send_reach_goal(user_id, &target).await {
                Ok(()) => debug!("TGTrack: send_reach_goal ({}) ok", target),
                Err(e) => warn!("TGTrack: send_reach_goal ({}) failed: {e}", target),
            }
        });
    }
}

/// Success is HTTP 200 with `error.code == 0` in the body.
fn interpret(status: u16, body: &str) -> Result<(), String> {
    if status != 200 {
        debug!("TGTrack response body: {body}");
        return Err(format!("HTTP {status}"));
    }

    let parsed: ApiResponse = serde_json::from_str(body).map_err(|e| format!("invalid response: {e}"))?;
    match parsed.error {
        Some(ApiStatus { code: 0, .. }) => Ok(()),
        Some(status) => Err(format!(
            "error {}: {}",
            status.code,
            status.description.unwrap_or_default()
        )),
        None => Err("response has no status".to_string()),
    }
}

/// `/start` messages (bot start, possibly with a deep-link payload) and
/// `my_chat_member` changes (bot blocked or unblocked).
pub fn should_track(update: &Update) -> bool {
    match &update.kind {
        UpdateKind::Message(msg) => msg.text().is_some_and(is_start_command),
        UpdateKind::MyChatMember(_) => true,
        _ => false,
    }
}

fn is_start_command(text: &str) -> bool {
    text.starts_with("/start")
}

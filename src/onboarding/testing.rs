//! Test doubles: a recording transport and a settable clock.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::onboarding::greeting::Clock;
use crate::onboarding::transport::{Keyboard, MessageRef, SendError, Transport};

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub message: MessageRef,
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub photo: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    Text(String),
    Keyboard(Keyboard),
}

#[derive(Default)]
struct State {
    next_message_id: i32,
    next_thread_id: i32,
    sent: Vec<Sent>,
    edits: Vec<(MessageRef, Edit)>,
    deleted: Vec<MessageRef>,
    forwards: Vec<(i64, i32, MessageRef)>,
    created_threads: Vec<String>,
    deleted_threads: HashSet<i32>,
    blocked: HashSet<i64>,
    forward_failure: Option<SendError>,
    forward_delay: Option<Duration>,
    photo_failure: bool,
}

pub struct FakeTransport {
    state: Mutex<State>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State { next_message_id: 1, next_thread_id: 1000, ..State::default() }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn block(&self, chat_id: i64) {
        self.with(|s| s.blocked.insert(chat_id));
    }

    pub fn delete_thread(&self, thread_id: i32) {
        self.with(|s| s.deleted_threads.insert(thread_id));
    }

    pub fn fail_forwards_with(&self, err: SendError) {
        self.with(|s| s.forward_failure = Some(err));
    }

    pub fn set_forward_delay(&self, delay: Duration) {
        self.with(|s| s.forward_delay = Some(delay));
    }

    pub fn fail_photos(&self) {
        self.with(|s| s.photo_failure = true);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.with(|s| s.sent.clone())
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.with(|s| {
            s.sent
                .iter()
                .filter(|sent| sent.message.chat_id == chat_id)
                .map(|sent| sent.text.clone())
                .collect()
        })
    }

    pub fn edits(&self) -> Vec<(MessageRef, Edit)> {
        self.with(|s| s.edits.clone())
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.with(|s| s.deleted.clone())
    }

    pub fn forwards(&self) -> Vec<(i64, i32, MessageRef)> {
        self.with(|s| s.forwards.clone())
    }

    pub fn created_threads(&self) -> Vec<String> {
        self.with(|s| s.created_threads.clone())
    }

    fn record_send(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>, photo: bool) -> Result<MessageRef, SendError> {
        self.with(|s| {
            if s.blocked.contains(&chat_id) {
                return Err(SendError::Blocked);
            }
            if photo && s.photo_failure {
                return Err(SendError::Other("wrong file identifier".into()));
            }
            let message = MessageRef { chat_id, message_id: s.next_message_id };
            s.next_message_id += 1;
            s.sent.push(Sent { message, text: text.to_string(), keyboard: keyboard.cloned(), photo });
            Ok(message)
        })
    }
}

impl Transport for FakeTransport {
    async fn send_text(&self, chat_id: i64, text: &str, keyboard: Option<&Keyboard>) -> Result<MessageRef, SendError> {
        self.record_send(chat_id, text, keyboard, false)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        _photo: &Path,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        self.record_send(chat_id, caption, keyboard, true)
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), SendError> {
        self.with(|s| s.edits.push((message, Edit::Text(text.to_string()))));
        Ok(())
    }

    async fn edit_keyboard(&self, message: MessageRef, keyboard: &Keyboard) -> Result<(), SendError> {
        self.with(|s| s.edits.push((message, Edit::Keyboard(keyboard.clone()))));
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError> {
        self.with(|s| s.deleted.push(message));
        Ok(())
    }

    async fn forward(&self, to_chat_id: i64, thread_id: i32, message: MessageRef) -> Result<(), SendError> {
        if let Some(delay) = self.with(|s| s.forward_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            if let Some(err) = &s.forward_failure {
                return Err(err.clone());
            }
            if s.deleted_threads.contains(&thread_id) {
                return Err(SendError::ThreadNotFound);
            }
            s.forwards.push((to_chat_id, thread_id, message));
            Ok(())
        })
    }

    async fn create_thread(&self, _chat_id: i64, name: &str) -> Result<i32, SendError> {
        Ok(self.with(|s| {
            let id = s.next_thread_id;
            s.next_thread_id += 1;
            s.created_threads.push(name.to_string());
            id
        }))
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

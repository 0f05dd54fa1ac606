//! Onboarding module - guides private-chat users through the intake flow
//! and follows up with delayed notifications.

pub mod debounce;
pub mod engine;
pub mod forward;
pub mod gate;
pub mod greeting;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod telegram;
pub mod texts;
pub mod transport;

#[cfg(test)]
mod testing;

pub use engine::{Onboarding, OnboardingConfig};
pub use greeting::SystemClock;
pub use record::UserProfile;
pub use scheduler::ChainTiming;
pub use store::ConversationStore;
pub use telegram::TelegramTransport;
pub use transport::MessageRef;

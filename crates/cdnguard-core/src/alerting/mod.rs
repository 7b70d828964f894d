//! Alert deduplication, rendering and delivery

pub mod channel;
pub mod dedup;
pub mod dispatcher;
pub mod template;

pub use channel::{build_channel, MessageChannel, TelegramChannel, WebhookChannel};
pub use dedup::{AlertDedupStore, SentAlert};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use template::{render, MessageTemplate};

//! Telegram event source: Bot API update listener and chat directory.
//!
//! The relay core only sees [`crate::relay::event::InboundEvent`] values on
//! an `mpsc` channel. This module owns everything teloxide-specific: turning
//! updates into events and listing chats for the `discover` command.

pub mod directory;
pub mod events;

/// Errors from the Telegram adapter.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    /// Bot API request failed.
    #[error("Telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

//! Inbound chat events as produced by an event source adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin type of the chat an event was received in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One-to-one conversation with a user.
    Private,
    /// Basic group chat.
    Group,
    /// Supergroup (large group).
    Supergroup,
    /// Broadcast channel.
    Channel,
}

impl ChatKind {
    /// Whether the chat counts as a group for delivery purposes.
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }

    /// Whether the chat is a broadcast channel.
    pub fn is_channel(self) -> bool {
        matches!(self, Self::Channel)
    }
}

/// A single inbound chat event.
///
/// Immutable once received. Fields the adapter could not extract are `None`;
/// the normalizer substitutes defaults for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Originating chat identifier.
    pub chat_id: i64,
    /// Sending user or chat, if known.
    pub sender_id: Option<i64>,
    /// Platform-assigned message identifier.
    pub message_id: i32,
    /// Raw text content (or media caption).
    pub text: Option<String>,
    /// When the platform says the message was sent.
    pub date: Option<DateTime<Utc>>,
    /// Origin chat type.
    pub kind: Option<ChatKind>,
    /// Identifier of the message this one replies to.
    pub reply_to: Option<i32>,
}

impl InboundEvent {
    /// Create an event with only the chat and message identifiers set.
    pub fn new(chat_id: i64, message_id: i32) -> Self {
        Self {
            chat_id,
            sender_id: None,
            message_id,
            text: None,
            date: None,
            kind: None,
            reply_to: None,
        }
    }

    /// Set the sender identifier.
    #[must_use]
    pub fn with_sender(mut self, sender_id: i64) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    /// Set the text content.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the send timestamp.
    #[must_use]
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the chat origin type.
    #[must_use]
    pub fn with_kind(mut self, kind: ChatKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the replied-to message identifier.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: i32) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

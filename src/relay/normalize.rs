//! Normalization of inbound events into the canonical delivery record.
//!
//! [`normalize`] is total: every event that passed the whitelist produces
//! exactly one [`DeliveryRecord`]. Missing fields are replaced by defaults and
//! logged at `debug`, never dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::event::InboundEvent;

/// Characters of message text shown in log previews.
const PREVIEW_CHARS: usize = 50;

/// Destination-agnostic payload delivered to the webhook.
///
/// The field set and types are fixed regardless of the origin chat type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Message text; empty when the event had none.
    pub message: String,
    /// Originating chat identifier.
    pub chat_id: i64,
    /// Sending user or chat identifier.
    pub sender_id: i64,
    /// ISO-8601 send timestamp.
    pub date: DateTime<Utc>,
    /// True for groups and supergroups.
    pub is_group: bool,
    /// True for broadcast channels.
    pub is_channel: bool,
    /// Platform message identifier.
    pub message_id: i32,
    /// Replied-to message id; serialized as `null` when absent.
    #[serde(default)]
    pub reply_to_msg_id: Option<i32>,
}

impl DeliveryRecord {
    /// Log label for the origin chat type.
    pub fn chat_label(&self) -> &'static str {
        if self.is_group {
            "group"
        } else if self.is_channel {
            "channel"
        } else {
            "DM"
        }
    }

    /// Short preview of the message text for log lines.
    pub fn preview(&self) -> String {
        preview(&self.message, PREVIEW_CHARS)
    }
}

/// Map an inbound event to its delivery record.
pub fn normalize(event: &InboundEvent) -> DeliveryRecord {
    let message = match &event.text {
        Some(text) => text.clone(),
        None => {
            debug!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                "no text, using empty message"
            );
            String::new()
        }
    };

    let sender_id = match event.sender_id {
        Some(id) => id,
        None => {
            debug!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                "no sender, attributing to chat"
            );
            event.chat_id
        }
    };

    let date = match event.date {
        Some(date) => date,
        None => {
            debug!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                "no date, using receive time"
            );
            Utc::now()
        }
    };

    let (is_group, is_channel) = match event.kind {
        Some(kind) => (kind.is_group(), kind.is_channel()),
        None => {
            debug!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                "unknown chat type, flags default to false"
            );
            (false, false)
        }
    };

    // Message id 0 never refers to a real message.
    let reply_to_msg_id = event.reply_to.filter(|id| *id != 0);

    DeliveryRecord {
        message,
        chat_id: event.chat_id,
        sender_id,
        date,
        is_group,
        is_channel,
        message_id: event.message_id,
        reply_to_msg_id,
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

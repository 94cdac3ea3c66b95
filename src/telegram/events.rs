//! Event listener for incoming Telegram messages.
//!
//! Runs a teloxide dispatcher over the Bot API and forwards every message and
//! channel post into the relay as an [`InboundEvent`] via an mpsc channel.
//! teloxide processes updates of one chat sequentially, so per-chat arrival
//! order is kept on the channel.

use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::Chat;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::relay::event::{ChatKind, InboundEvent};

/// Spawn the update listener that forwards events to the given channel.
///
/// Returns immediately. The listener runs as a background Tokio task until
/// it is aborted or teloxide stops polling.
pub fn spawn_event_listener(
    bot: Bot,
    event_tx: mpsc::Sender<InboundEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(forward_message))
            .branch(Update::filter_channel_post().endpoint(forward_message));

        info!("telegram listener starting");

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![event_tx])
            .default_handler(|upd| async move {
                debug!(update_id = ?upd.id, "ignoring non-message update");
            })
            .error_handler(LoggingErrorHandler::with_custom_text("telegram listener"))
            .build()
            .dispatch()
            .await;

        info!("telegram listener stopped");
    })
}

async fn forward_message(msg: Message, event_tx: mpsc::Sender<InboundEvent>) -> ResponseResult<()> {
    let event = inbound_from_message(&msg);
    if event_tx.send(event).await.is_err() {
        // Receiver dropped: the dispatcher is shutting down.
        debug!(chat_id = msg.chat.id.0, "relay closed, dropping update");
    }
    Ok(())
}

/// Convert a Bot API message into an inbound event.
///
/// Text falls back to the media caption. The sender is the user when known,
/// otherwise the chat the message was sent on behalf of.
pub fn inbound_from_message(msg: &Message) -> InboundEvent {
    let sender_id = msg
        .from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
        .or_else(|| msg.sender_chat.as_ref().map(|chat| chat.id.0));

    InboundEvent {
        chat_id: msg.chat.id.0,
        sender_id,
        message_id: msg.id.0,
        text: msg.text().or_else(|| msg.caption()).map(str::to_owned),
        date: Some(msg.date),
        kind: chat_kind(&msg.chat),
        reply_to: msg.reply_to_message().map(|replied| replied.id.0),
    }
}

/// Classify a Bot API chat.
pub fn chat_kind(chat: &Chat) -> Option<ChatKind> {
    if chat.is_private() {
        Some(ChatKind::Private)
    } else if chat.is_group() {
        Some(ChatKind::Group)
    } else if chat.is_supergroup() {
        Some(ChatKind::Supergroup)
    } else if chat.is_channel() {
        Some(ChatKind::Channel)
    } else {
        None
    }
}

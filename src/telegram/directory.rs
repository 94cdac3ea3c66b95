//! Chat directory lookup for whitelist configuration.
//!
//! Purely informational: lists chats with their ids and types so an operator
//! can fill in `TELEGRAM_WHITELIST_CHATS`. The Bot API cannot enumerate
//! dialogs, so [`BotDirectory`] reports the chats present in the bot's pending
//! updates without confirming them.

use std::collections::HashSet;
use std::fmt::Write as _;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::Chat;

use super::events::chat_kind;
use super::TelegramError;
use crate::config::WHITELIST_VAR;
use crate::relay::event::ChatKind;

/// Groups and channels shown in the report.
const MAX_LISTED: usize = 10;

/// Direct-message chats shown in the report.
const MAX_LISTED_DIRECT: usize = 5;

/// Column width for chat names.
const NAME_WIDTH: usize = 40;

/// A known chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Chat identifier as used in the whitelist.
    pub id: i64,
    /// Title or user display name.
    pub name: String,
    /// Chat type.
    pub kind: ChatKind,
}

/// Source of known chats.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// List known chats in first-seen order, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError`] when the platform lookup fails.
    async fn list_chats(&self) -> Result<Vec<ChatEntry>, TelegramError>;
}

/// Directory backed by the bot's pending updates.
#[derive(Debug, Clone)]
pub struct BotDirectory {
    bot: Bot,
}

impl BotDirectory {
    /// Create a directory for the given bot.
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatDirectory for BotDirectory {
    async fn list_chats(&self) -> Result<Vec<ChatEntry>, TelegramError> {
        let updates = self.bot.get_updates().await?;
        let mut seen = HashSet::new();
        let chats = updates
            .iter()
            .filter_map(|update| update.chat())
            .filter_map(chat_entry)
            .filter(|entry| seen.insert(entry.id))
            .collect();
        Ok(chats)
    }
}

fn chat_entry(chat: &Chat) -> Option<ChatEntry> {
    let kind = chat_kind(chat)?;
    Some(ChatEntry {
        id: chat.id.0,
        name: chat_name(chat),
        kind,
    })
}

fn chat_name(chat: &Chat) -> String {
    if let Some(title) = chat.title() {
        return title.to_owned();
    }
    let full_name = [chat.first_name(), chat.last_name()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    if !full_name.is_empty() {
        return full_name;
    }
    chat.username()
        .map(|u| format!("@{u}"))
        .unwrap_or_else(|| "(unnamed)".to_owned())
}

/// Build the example whitelist line: first two groups, first channel, first DM.
pub fn example_whitelist(chats: &[ChatEntry]) -> Option<String> {
    let groups = chats.iter().filter(|c| c.kind.is_group()).take(2);
    let channels = chats.iter().filter(|c| c.kind.is_channel()).take(1);
    let direct = chats
        .iter()
        .filter(|c| c.kind == ChatKind::Private)
        .take(1);

    let ids = groups
        .chain(channels)
        .chain(direct)
        .map(|c| c.id.to_string())
        .collect::<Vec<_>>();

    if ids.is_empty() {
        None
    } else {
        Some(format!("{WHITELIST_VAR}={}", ids.join(",")))
    }
}

/// Render the discovery report printed by `telehook discover`.
pub fn render_report(chats: &[ChatEntry]) -> String {
    let rule = "=".repeat(60);
    let groups: Vec<_> = chats.iter().filter(|c| c.kind.is_group()).collect();
    let channels: Vec<_> = chats.iter().filter(|c| c.kind.is_channel()).collect();
    let direct: Vec<_> = chats
        .iter()
        .filter(|c| c.kind == ChatKind::Private)
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "Discovered chats and their IDs:");
    let _ = writeln!(out, "{rule}");

    if !groups.is_empty() {
        let _ = writeln!(out, "\nGROUPS:");
        for chat in groups.iter().take(MAX_LISTED) {
            write_row(&mut out, chat);
        }
    }

    if !channels.is_empty() {
        let _ = writeln!(out, "\nCHANNELS:");
        for chat in channels.iter().take(MAX_LISTED) {
            write_row(&mut out, chat);
        }
    }

    if !direct.is_empty() {
        let _ = writeln!(
            out,
            "\nDIRECT MESSAGES: {} total (showing first {MAX_LISTED_DIRECT})",
            direct.len()
        );
        for chat in direct.iter().take(MAX_LISTED_DIRECT) {
            write_row(&mut out, chat);
        }
    }

    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "Example whitelist configuration:");
    match example_whitelist(chats) {
        Some(line) => {
            let _ = writeln!(out, "{line}");
        }
        None => {
            let _ = writeln!(
                out,
                "No chats found. Send a message in the chats you want to monitor, then run discover again."
            );
        }
    }
    out
}

fn write_row(out: &mut String, chat: &ChatEntry) {
    let name: String = chat.name.chars().take(NAME_WIDTH).collect();
    let _ = writeln!(out, "  {name:<NAME_WIDTH$} | ID: {}", chat.id);
}

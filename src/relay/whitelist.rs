//! Chat whitelist filter.
//!
//! An empty whitelist allows every chat. That default is permissive on
//! purpose and is reported as a security warning at startup.

use std::collections::BTreeSet;
use std::fmt;

/// Decision for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The event may be delivered.
    Allow,
    /// The event must be discarded.
    Deny,
}

/// Immutable set of chat identifiers eligible for forwarding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    chats: BTreeSet<i64>,
}

/// A whitelist entry that is not an integer chat id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid chat id {entry:?} in whitelist")]
pub struct WhitelistParseError {
    /// The offending entry, trimmed.
    pub entry: String,
}

impl Whitelist {
    /// Build a whitelist from chat identifiers.
    pub fn new(chats: impl IntoIterator<Item = i64>) -> Self {
        Self {
            chats: chats.into_iter().collect(),
        }
    }

    /// A whitelist that allows every chat.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of chat ids, e.g. `-1001234567890,123456789`.
    ///
    /// Blank entries are skipped, so an empty string yields an allow-all list.
    ///
    /// # Errors
    ///
    /// Returns [`WhitelistParseError`] for the first entry that is not an integer.
    pub fn parse(raw: &str) -> Result<Self, WhitelistParseError> {
        let mut chats = BTreeSet::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let id = entry.parse::<i64>().map_err(|_| WhitelistParseError {
                entry: entry.to_owned(),
            })?;
            chats.insert(id);
        }
        Ok(Self { chats })
    }

    /// Decide whether events from `chat_id` may be delivered.
    pub fn check(&self, chat_id: i64) -> Verdict {
        if self.chats.is_empty() || self.chats.contains(&chat_id) {
            Verdict::Allow
        } else {
            Verdict::Deny
        }
    }

    /// Shorthand for `check(chat_id) == Verdict::Allow`.
    pub fn allows(&self, chat_id: i64) -> bool {
        self.check(chat_id) == Verdict::Allow
    }

    /// True when no chat ids are configured (allow-all mode).
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    /// Number of whitelisted chats.
    pub fn len(&self) -> usize {
        self.chats.len()
    }

    /// Whitelisted chat ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.chats.iter().copied()
    }
}

impl fmt::Display for Whitelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .chats
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

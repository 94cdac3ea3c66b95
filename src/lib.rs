//! Telehook relays Telegram chat messages to an HTTP webhook.
//!
//! Listens to a Telegram session, drops events from chats that are not
//! whitelisted, normalizes the rest into a fixed JSON record, and POSTs that
//! record to a single downstream endpoint (typically an n8n workflow).
//!
//! The crate holds no business logic about what happens to a message after
//! delivery: listen, filter, transform, deliver.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod relay;
pub mod telegram;
pub mod webhook;

//! Relay core: event model, whitelist filter, normalizer, and dispatcher.
//!
//! Data flows one way: [`event::InboundEvent`] → [`whitelist::Whitelist`]
//! (pass/drop) → [`normalize::normalize`] → [`crate::webhook::client::DeliveryClient`]
//! → log. The [`dispatcher::Dispatcher`] wires the stages together.

pub mod dispatcher;
pub mod event;
pub mod normalize;
pub mod whitelist;

pub use dispatcher::{DispatchSummary, Dispatcher, DispatcherSettings, DispatcherState};
pub use event::{ChatKind, InboundEvent};
pub use normalize::{normalize, DeliveryRecord};
pub use whitelist::{Verdict, Whitelist};

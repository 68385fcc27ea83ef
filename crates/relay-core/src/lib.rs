//! Core logic for the channel relay.
//!
//! Framework-agnostic: Telegram and the HTTP surface live in adapter crates and
//! reach this crate through ports (traits) and the [`relay::Relay`] facade.

pub mod channels;
pub mod config;
pub mod copier;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod keepalive;
pub mod logging;
pub mod messaging;
pub mod notify;
pub mod progress;
pub mod recovery;
pub mod relay;
pub mod security;
pub mod settings;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};

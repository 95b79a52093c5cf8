//! Content moderation and escalation engine.
//!
//! A [`Moderation`] service lists posts that crossed the report threshold,
//! loads the reports filed against them and executes the moderator's
//! decision. Every entry point takes the verified [`Caller`] and runs it
//! through [`gate::authorize`] before touching the store.
//!
//! [`Caller`]: agora_common::model::auth::Caller

pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod investigation;
pub mod scanner;

#[cfg(test)]
mod fixtures;

pub use config::ModerationConfig;
pub use error::{ModerationError, Result};

#[derive(Debug)]
pub struct Moderation<S> {
    store: S,
    config: ModerationConfig,
}

impl<S> Moderation<S> {
    #[must_use]
    pub fn new(store: S, config: ModerationConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }
}

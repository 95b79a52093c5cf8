use agora_common::model::moderation::{FLAG_THRESHOLD, WARN_THRESHOLD};
use serde::Deserialize;

pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 5;

/// Tunables of the escalation policy, read from `MODERATION_*` variables.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub flag_threshold: u32,
    pub warn_threshold: u32,
    /// How often a warning is retried after losing a race on the author's warning count.
    pub max_commit_attempts: u32,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            flag_threshold: FLAG_THRESHOLD,
            warn_threshold: WARN_THRESHOLD,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
        }
    }
}

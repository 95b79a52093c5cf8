use crate::model::{
    Id,
    post::{Post, PostMarker},
    report::Report,
    user::UserMarker,
};
use serde::{Deserialize, Deserializer, Serialize, de::Error, de::Unexpected};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;
use time::OffsetDateTime;

/// Report count at which a post enters the moderation queue.
pub const FLAG_THRESHOLD: u32 = 3;
/// Warning count at which an account is terminated.
pub const WARN_THRESHOLD: u32 = 3;

pub const REQUEST_KEY_MAX_LEN: usize = 128;

/// Entry in the moderation queue: a flagged post joined with its author.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedPostSummary {
    #[serde(flatten)]
    pub post: Post,
    pub author_name: String,
    pub warning_count: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentReport {
    #[serde(flatten)]
    pub report: Report,
    pub reporter_name: String,
}

/// Everything a moderator looks at before deciding on a flagged post.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Investigation {
    pub post: Post,
    pub author_warnings: u32,
    pub reports: Vec<IncidentReport>,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningOutcome {
    pub warnings_issued: u32,
    pub user_terminated: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    TerminatePost,
    IssueWarning,
    MarkReviewed,
}

impl ModerationAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::TerminatePost => "terminate_post",
            ModerationAction::IssueWarning => "issue_warning",
            ModerationAction::MarkReviewed => "mark_reviewed",
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The moderation action is invalid: {0}")]
pub struct InvalidModerationActionError(String);

impl FromStr for ModerationAction {
    type Err = InvalidModerationActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terminate_post" => Ok(ModerationAction::TerminatePost),
            "issue_warning" => Ok(ModerationAction::IssueWarning),
            "mark_reviewed" => Ok(ModerationAction::MarkReviewed),
            other => Err(InvalidModerationActionError(other.to_owned())),
        }
    }
}

impl Display for ModerationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry of the moderation action log, written in the same batch as the action itself.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRecord {
    pub action: ModerationAction,
    pub post: Id<PostMarker>,
    pub author: Option<Id<UserMarker>>,
    pub moderator: Id<UserMarker>,
    pub outcome: Option<WarningOutcome>,
    pub request_key: Option<RequestKey>,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Client-chosen key that makes a retried request apply at most once.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestKey(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The request key is invalid: {0:?}")]
pub struct InvalidRequestKeyError(String);

impl RequestKey {
    pub fn new(key: String) -> Result<Self, InvalidRequestKeyError> {
        let valid = !key.is_empty()
            && key.len() <= REQUEST_KEY_MAX_LEN
            && key.bytes().all(|byte| byte.is_ascii_graphic());

        if valid {
            Ok(Self(key))
        } else {
            Err(InvalidRequestKeyError(key))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RequestKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        RequestKey::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"RequestKey"))
    }
}

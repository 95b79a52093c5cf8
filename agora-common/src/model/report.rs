use crate::model::{Id, post::PostMarker, user::UserMarker};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ReportMarker;

/// A single abuse report filed against a post.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Id<ReportMarker>,
    pub post_id: Id<PostMarker>,
    pub reason: ReportReason,
    pub additional_info: Option<String>,
    pub reported_by: Id<UserMarker>,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportReason {
    Spam,
    Hate,
    Harassment,
    /// False or misleading information.
    False,
    Other,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The report reason is invalid: {0}")]
pub struct InvalidReportReasonError(String);

impl ReportReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReportReason::Spam => "spam",
            ReportReason::Hate => "hate",
            ReportReason::Harassment => "harassment",
            ReportReason::False => "false",
            ReportReason::Other => "other",
        }
    }
}

impl FromStr for ReportReason {
    type Err = InvalidReportReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spam" => Ok(ReportReason::Spam),
            "hate" => Ok(ReportReason::Hate),
            "harassment" => Ok(ReportReason::Harassment),
            "false" => Ok(ReportReason::False),
            "other" => Ok(ReportReason::Other),
            other => Err(InvalidReportReasonError(other.to_owned())),
        }
    }
}

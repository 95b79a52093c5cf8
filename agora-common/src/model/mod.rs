pub mod auth;
pub mod moderation;
pub mod post;
pub mod report;
pub mod user;

use crate::model::{
    auth::{InvalidAuthTokenHashError, NonPositiveLifetimeError},
    moderation::{InvalidModerationActionError, InvalidRequestKeyError},
    report::InvalidReportReasonError,
    user::InvalidRoleError,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, marker::PhantomData, num::ParseIntError, str::FromStr};
use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ModelValidationError {
    #[error(transparent)]
    Role(#[from] InvalidRoleError),
    #[error(transparent)]
    ReportReason(#[from] InvalidReportReasonError),
    #[error(transparent)]
    NonPositiveLifetime(#[from] NonPositiveLifetimeError),
    #[error(transparent)]
    TokenHash(#[from] InvalidAuthTokenHashError),
    #[error(transparent)]
    RequestKey(#[from] InvalidRequestKeyError),
    #[error(transparent)]
    ModerationAction(#[from] InvalidModerationActionError),
    #[error("Counter value out of range: {0}")]
    CounterOutOfRange(i64),
    #[error("Warning outcome is only partially recorded")]
    IncompleteOutcome,
}

/// Database-wide identifier, tagged with the kind of record it points to.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id<Marker>(u64, #[serde(skip)] PhantomData<Marker>);

impl<Marker> Id<Marker> {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value, PhantomData)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Cast for storage in signed `BIGINT` columns.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        self.0.cast_signed()
    }
}

impl<Marker> Display for Id<Marker> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<Marker> FromStr for Id<Marker> {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(Self::new)
    }
}

impl<Marker> From<u64> for Id<Marker> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<Marker> From<i64> for Id<Marker> {
    fn from(value: i64) -> Self {
        Self::new(value.cast_unsigned())
    }
}

impl<Marker> From<Id<Marker>> for u64 {
    fn from(value: Id<Marker>) -> Self {
        value.0
    }
}

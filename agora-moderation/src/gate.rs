//! Authorization gate: identity verification and the moderator role check.

use crate::{Moderation, ModerationError, Result};
use agora_common::model::{
    Id,
    auth::{AuthToken, AuthTokenHashError, Caller},
    user::UserMarker,
};
use agora_db::{Store, StoreError};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Proof that the gate accepted a caller. Only [`authorize`] creates one.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Moderator {
    id: Id<UserMarker>,
}

impl Moderator {
    #[must_use]
    pub fn user_id(self) -> Id<UserMarker> {
        self.id
    }
}

/// Checks the caller's role. Performs no store access.
pub fn authorize(caller: &Caller) -> Result<Moderator> {
    if caller.role.can_moderate() {
        Ok(Moderator {
            id: caller.user_id,
        })
    } else {
        warn!(user = %caller.user_id, role = %caller.role, "Rejected moderation request");
        Err(ModerationError::PermissionDenied {
            user: caller.user_id,
            role: caller.role,
        })
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Hash(#[from] AuthTokenHashError),
    #[error("Provided token was invalid")]
    InvalidToken,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<S: Store> Moderation<S> {
    /// Resolves a bearer token to the identity and current role of its owner.
    ///
    /// Unknown, expired and orphaned tokens are all reported as
    /// [`IdentityError::InvalidToken`].
    pub async fn identify(&self, token: &AuthToken) -> Result<Caller, IdentityError> {
        let token_hash = token.hash()?;

        let credential = self
            .store()
            .fetch_credential(&token_hash)
            .await?
            .ok_or(IdentityError::InvalidToken)?;

        if !credential.accepts(token, OffsetDateTime::now_utc()) {
            debug!(user = %token.user_id, "Token expired or mismatched");
            return Err(IdentityError::InvalidToken);
        }

        let user = self
            .store()
            .fetch_user(credential.user)
            .await?
            .ok_or(IdentityError::InvalidToken)?;

        Ok(Caller::from(&user))
    }
}

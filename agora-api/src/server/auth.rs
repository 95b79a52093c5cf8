use crate::server::{ServerError, ServerState};
use agora_common::model::{auth::AuthToken, auth::Caller, moderation::RequestKey};
use agora_db::Store;
use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Caller whose bearer token matched a live credential. Says nothing about
/// the caller's role; the moderation gate checks that.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AuthenticatedUser {
    caller: Caller,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn caller(&self) -> &Caller {
        &self.caller
    }
}

impl<S: Store> FromRequestParts<ServerState<S>> for AuthenticatedUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState<S>,
    ) -> Result<Self, Self::Rejection> {
        let request_token: AuthToken = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let caller = state.moderation.identify(&request_token).await?;

        Ok(Self { caller })
    }
}

/// Optional `Idempotency-Key` header.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct IdempotencyKey(pub Option<RequestKey>);

impl<St: Send + Sync> FromRequestParts<St> for IdempotencyKey {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };

        let key = value
            .to_str()
            .map_err(|_| ServerError::NonUtf8IdempotencyKey)?;

        Ok(Self(Some(RequestKey::new(key.to_owned())?)))
    }
}

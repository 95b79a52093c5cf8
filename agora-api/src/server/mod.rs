use agora_common::model::{auth::AuthTokenDecodeError, moderation::InvalidRequestKeyError};
use agora_db::Store;
use agora_moderation::{Moderation, ModerationError, gate::IdentityError};
use axum::{
    Json, Router,
    extract::{Request, rejection::PathRejection},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::typed_header::TypedHeaderRejection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

mod auth;
mod routes;

pub type ServerRouter<S> = Router<ServerState<S>>;

#[derive(Debug)]
pub struct ServerState<S> {
    pub moderation: Arc<Moderation<S>>,
}

impl<S> ServerState<S> {
    #[must_use]
    pub fn new(moderation: Moderation<S>) -> Self {
        Self {
            moderation: Arc::new(moderation),
        }
    }
}

impl<S> Clone for ServerState<S> {
    fn clone(&self) -> Self {
        Self {
            moderation: Arc::clone(&self.moderation),
        }
    }
}

pub fn routes<S: Store>() -> ServerRouter<S> {
    routes::routes().fallback(fallback)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Authorization header was missing or invalid: {0}")]
    InvalidAuthorizationHeader(TypedHeaderRejection),
    #[error("The provided auth token could not be decoded: {0}")]
    InvalidAuthToken(#[from] AuthTokenDecodeError),
    #[error("The Idempotency-Key header is not valid UTF-8")]
    NonUtf8IdempotencyKey,
    #[error(transparent)]
    InvalidIdempotencyKey(#[from] InvalidRequestKeyError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Moderation(#[from] ModerationError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_) | ServerError::PathRejection(_) => StatusCode::NOT_FOUND,
            // Anonymous callers are refused like callers without the moderator role.
            ServerError::InvalidAuthorizationHeader(rejection) if rejection.is_missing() => {
                StatusCode::FORBIDDEN
            }
            ServerError::Identity(IdentityError::InvalidToken) => StatusCode::UNAUTHORIZED,
            ServerError::InvalidAuthorizationHeader(_)
            | ServerError::InvalidAuthToken(_)
            | ServerError::NonUtf8IdempotencyKey
            | ServerError::InvalidIdempotencyKey(_) => StatusCode::BAD_REQUEST,
            ServerError::Identity(IdentityError::Store(err)) if err.is_transient() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Identity(IdentityError::Hash(_) | IdentityError::Store(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::Moderation(err) => match err {
                ModerationError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                ModerationError::PostNotFound(_) | ModerationError::AuthorNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                ModerationError::Conflict(_) => StatusCode::CONFLICT,
                ModerationError::RequestKeyReused(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ModerationError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ModerationError::PartialFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
struct ErrorResponse {
    status: u16,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        // Internal details stay in the log.
        let message = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal error")
                .to_owned()
        } else {
            self.to_string()
        };

        let error_response = ErrorResponse {
            status: status.as_u16(),
            message,
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::ServerError;
    use agora_common::model::{Id, user::Role};
    use agora_db::{StoreError, Target};
    use agora_moderation::{ModerationError, gate::IdentityError};
    use axum::http::StatusCode;

    #[test]
    fn moderation_errors_map_to_statuses() {
        let cases = [
            (
                ModerationError::PermissionDenied {
                    user: Id::new(1),
                    role: Role::Student,
                },
                StatusCode::FORBIDDEN,
            ),
            (ModerationError::PostNotFound(Id::new(2)), StatusCode::NOT_FOUND),
            (
                ModerationError::AuthorNotFound {
                    post: Id::new(2),
                    author: Id::new(3),
                },
                StatusCode::NOT_FOUND,
            ),
            (ModerationError::Conflict(Id::new(2)), StatusCode::CONFLICT),
            (
                ModerationError::StoreUnavailable(StoreError::Conflict(Target::User(Id::new(3)))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ModerationError::PartialFailure("broken".to_owned()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }

    #[test]
    fn invalid_tokens_are_unauthorized() {
        assert_eq!(
            ServerError::from(IdentityError::InvalidToken).status(),
            StatusCode::UNAUTHORIZED
        );
    }
}

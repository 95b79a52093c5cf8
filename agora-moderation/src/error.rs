use agora_common::model::{
    Id,
    moderation::RequestKey,
    post::PostMarker,
    user::{Role, UserMarker},
};
use agora_db::{StoreError, Target};
use thiserror::Error;

pub type Result<T, E = ModerationError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("User {user} with role {role} may not moderate content")]
    PermissionDenied { user: Id<UserMarker>, role: Role },
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("Warning could not be attributed: author {author} of post {post} was not found.")]
    AuthorNotFound {
        post: Id<PostMarker>,
        author: Id<UserMarker>,
    },
    #[error("Post {0} was modified by another moderator, try again.")]
    Conflict(Id<PostMarker>),
    #[error("Request key {0} was already used for a different action.")]
    RequestKeyReused(RequestKey),
    #[error("The store is unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("Moderation state is inconsistent: {0}")]
    PartialFailure(String),
}

impl From<StoreError> for ModerationError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            ModerationError::StoreUnavailable(err)
        } else {
            ModerationError::PartialFailure(err.to_string())
        }
    }
}

impl ModerationError {
    /// Maps a rejected batch acting on `post` back into the engine's vocabulary.
    pub(crate) fn from_commit(err: StoreError, post: Id<PostMarker>) -> Self {
        match err {
            StoreError::Missing(Target::Post(_)) => ModerationError::PostNotFound(post),
            StoreError::Missing(Target::User(author)) => {
                ModerationError::AuthorNotFound { post, author }
            }
            StoreError::Conflict(_) => ModerationError::Conflict(post),
            err => err.into(),
        }
    }

    /// Whether the action can be treated as already done by someone else.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ModerationError::PostNotFound(_) | ModerationError::AuthorNotFound { .. }
        )
    }
}

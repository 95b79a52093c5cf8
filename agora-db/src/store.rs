use agora_common::model::{
    Id, ModelValidationError,
    auth::{AuthTokenHash, Credential},
    moderation::{ModerationRecord, RequestKey},
    post::{Post, PostMarker},
    report::Report,
    user::{User, UserMarker},
};
use std::{fmt::Display, future::Future};
use thiserror::Error;
use tokio::sync::broadcast;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Capacity of the change feed; slow subscribers observe a lag error instead of blocking writers.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} does not exist")]
    Missing(Target),
    #[error("Concurrent modification of {0}")]
    Conflict(Target),
    #[error("A moderation action with request key {0} was already recorded")]
    DuplicateRequest(RequestKey),
    #[error("An object in the store was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlx(err) => !matches!(
                err,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            StoreError::Conflict(_) => true,
            StoreError::Missing(_)
            | StoreError::DuplicateRequest(_)
            | StoreError::Data(_)
            | StoreError::Migrate(_) => false,
        }
    }
}

/// Record addressed by a batch operation.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Target {
    Post(Id<PostMarker>),
    User(Id<UserMarker>),
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Post(id) => write!(f, "Post {id}"),
            Target::User(id) => write!(f, "User {id}"),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum BatchOp {
    /// Guard on the post as it was read. Fails the batch with
    /// [`StoreError::Missing`] if the post is gone, or with
    /// [`StoreError::Conflict`] if its report count changed.
    ExpectReportCount {
        post: Id<PostMarker>,
        report_count: u32,
    },
    /// Fails the batch with [`StoreError::Missing`] if the post is gone.
    DeletePost(Id<PostMarker>),
    /// Deletes whatever reports exist for the post at commit time.
    DeleteReports(Id<PostMarker>),
    /// Fails the batch with [`StoreError::Missing`] if the post is gone.
    ResetReportCount(Id<PostMarker>),
    /// Compare-and-set. Fails with [`StoreError::Conflict`] if the stored
    /// count is no longer `expected`.
    SetWarnings {
        user: Id<UserMarker>,
        expected: u32,
        warnings: u32,
    },
    /// Fails the batch with [`StoreError::Missing`] if the user is gone.
    DeleteUser(Id<UserMarker>),
    /// Fails with [`StoreError::DuplicateRequest`] if the request key was seen before.
    RecordAction(ModerationRecord),
}

/// Ordered set of mutations applied all-or-nothing by [`Store::commit`].
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, op: BatchOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    /// Events describing this batch once it has been committed.
    #[must_use]
    pub fn events(&self) -> Vec<StoreEvent> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                BatchOp::DeletePost(post) => Some(StoreEvent::PostDeleted(*post)),
                BatchOp::DeleteReports(post) => Some(StoreEvent::ReportsCleared(*post)),
                BatchOp::ResetReportCount(post) => Some(StoreEvent::ReportCountReset(*post)),
                BatchOp::SetWarnings { user, warnings, .. } => Some(StoreEvent::WarningsChanged {
                    user: *user,
                    warnings: *warnings,
                }),
                BatchOp::DeleteUser(user) => Some(StoreEvent::UserDeleted(*user)),
                BatchOp::ExpectReportCount { .. } | BatchOp::RecordAction(_) => None,
            })
            .collect()
    }
}

impl IntoIterator for WriteBatch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Change notification published after a batch commits.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum StoreEvent {
    PostDeleted(Id<PostMarker>),
    ReportsCleared(Id<PostMarker>),
    ReportCountReset(Id<PostMarker>),
    WarningsChanged { user: Id<UserMarker>, warnings: u32 },
    UserDeleted(Id<UserMarker>),
}

/// Live feed of [`StoreEvent`]s. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<StoreEvent>,
}

impl Subscription {
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<StoreEvent>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event. Returns `None` once the store is gone.
    ///
    /// Events missed because this subscriber fell behind are skipped.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Store subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Document-store contract the moderation engine runs against.
///
/// Reads never observe a partially applied [`WriteBatch`].
pub trait Store: Send + Sync + 'static {
    fn fetch_post(
        &self,
        post_id: Id<PostMarker>,
    ) -> impl Future<Output = Result<Option<Post>>> + Send;

    /// Posts whose report count is at least `min_reports`, oldest first.
    fn fetch_posts_reported_at_least(
        &self,
        min_reports: u32,
    ) -> impl Future<Output = Result<Vec<Post>>> + Send;

    fn fetch_user(
        &self,
        user_id: Id<UserMarker>,
    ) -> impl Future<Output = Result<Option<User>>> + Send;

    /// All reports filed against the post, in no particular order.
    fn fetch_reports(
        &self,
        post_id: Id<PostMarker>,
    ) -> impl Future<Output = Result<Vec<Report>>> + Send;

    fn fetch_action(
        &self,
        request_key: &RequestKey,
    ) -> impl Future<Output = Result<Option<ModerationRecord>>> + Send;

    fn fetch_credential(
        &self,
        token_hash: &AuthTokenHash,
    ) -> impl Future<Output = Result<Option<Credential>>> + Send;

    /// Applies every operation of `batch` or none of them.
    fn commit(&self, batch: WriteBatch) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&self) -> Subscription;
}

#[cfg(test)]
mod tests {
    use crate::store::{BatchOp, StoreEvent, WriteBatch};
    use agora_common::model::Id;

    #[test]
    fn batch_events_follow_op_order() {
        let batch = WriteBatch::new()
            .with(BatchOp::SetWarnings {
                user: Id::new(9),
                expected: 2,
                warnings: 3,
            })
            .with(BatchOp::DeleteReports(Id::new(1)))
            .with(BatchOp::DeletePost(Id::new(1)))
            .with(BatchOp::DeleteUser(Id::new(9)));

        assert_eq!(
            batch.events(),
            vec![
                StoreEvent::WarningsChanged {
                    user: Id::new(9),
                    warnings: 3
                },
                StoreEvent::ReportsCleared(Id::new(1)),
                StoreEvent::PostDeleted(Id::new(1)),
                StoreEvent::UserDeleted(Id::new(9)),
            ]
        );
    }
}

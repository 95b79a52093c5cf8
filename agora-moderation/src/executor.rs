//! Moderation action executor.
//!
//! Each action is a single [`WriteBatch`]: the cascade it performs and the
//! action-log entry describing it are committed together or not at all.

use crate::{
    Moderation, ModerationError, Result,
    gate::{Moderator, authorize},
};
use agora_common::model::{
    Id,
    auth::Caller,
    moderation::{ModerationAction, ModerationRecord, RequestKey, WarningOutcome},
    post::{Post, PostMarker},
    user::{User, UserMarker},
};
use agora_db::{BatchOp, Store, StoreError, WriteBatch};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

fn record(
    action: ModerationAction,
    moderator: Moderator,
    post: Id<PostMarker>,
    author: Id<UserMarker>,
) -> ModerationRecord {
    ModerationRecord {
        action,
        post,
        author: Some(author),
        moderator: moderator.user_id(),
        outcome: None,
        request_key: None,
        at: OffsetDateTime::now_utc(),
    }
}

/// Fails the batch if another action touched the post since it was read.
fn expect_unchanged(post: &Post) -> BatchOp {
    BatchOp::ExpectReportCount {
        post: post.id,
        report_count: post.report_count,
    }
}

/// Removes a post together with every report filed against it.
fn cascade_delete(batch: &mut WriteBatch, post_id: Id<PostMarker>) {
    batch.push(BatchOp::DeleteReports(post_id));
    batch.push(BatchOp::DeletePost(post_id));
}

impl<S: Store> Moderation<S> {
    /// Deletes the post and all of its reports.
    ///
    /// A post that is already gone yields [`ModerationError::PostNotFound`].
    /// If another action changed the post after it was read, the call fails
    /// with [`ModerationError::Conflict`] and changes nothing.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn terminate_post(&self, caller: &Caller, post_id: Id<PostMarker>) -> Result<()> {
        let moderator = authorize(caller)?;

        let post = self
            .store()
            .fetch_post(post_id)
            .await?
            .ok_or(ModerationError::PostNotFound(post_id))?;

        let mut batch = WriteBatch::new().with(expect_unchanged(&post));
        cascade_delete(&mut batch, post_id);
        batch.push(BatchOp::RecordAction(record(
            ModerationAction::TerminatePost,
            moderator,
            post_id,
            post.author_id,
        )));

        self.store()
            .commit(batch)
            .await
            .map_err(|err| ModerationError::from_commit(err, post_id))?;

        info!(post = %post_id, author = %post.author_id, "Terminated post");
        Ok(())
    }

    /// Clears all reports of a post and resets its report count, keeping the post.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn mark_reviewed(&self, caller: &Caller, post_id: Id<PostMarker>) -> Result<()> {
        let moderator = authorize(caller)?;

        let post = self
            .store()
            .fetch_post(post_id)
            .await?
            .ok_or(ModerationError::PostNotFound(post_id))?;

        let batch = WriteBatch::new()
            .with(expect_unchanged(&post))
            .with(BatchOp::ResetReportCount(post_id))
            .with(BatchOp::DeleteReports(post_id))
            .with(BatchOp::RecordAction(record(
                ModerationAction::MarkReviewed,
                moderator,
                post_id,
                post.author_id,
            )));

        self.store()
            .commit(batch)
            .await
            .map_err(|err| ModerationError::from_commit(err, post_id))?;

        info!(post = %post_id, "Marked post as reviewed");
        Ok(())
    }

    /// Warns the author of a post, deletes the post and terminates the
    /// author's account once the warning threshold is reached.
    ///
    /// The warning count is updated with compare-and-set; losing a race
    /// against another moderator re-reads the post and author and tries
    /// again, up to `max_commit_attempts` times. With a `request_key`, a
    /// repeated request returns the first outcome instead of warning twice.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn issue_warning(
        &self,
        caller: &Caller,
        post_id: Id<PostMarker>,
        request_key: Option<RequestKey>,
    ) -> Result<WarningOutcome> {
        let moderator = authorize(caller)?;

        let max_attempts = self.config().max_commit_attempts.max(1);
        let mut attempt = 1;
        loop {
            // A concurrent request with the same key may have won since the last attempt.
            if let Some(outcome) = self.recorded_outcome(request_key.as_ref(), post_id).await? {
                return Ok(outcome);
            }

            match self
                .try_issue_warning(moderator, post_id, request_key.as_ref())
                .await
            {
                Err(ModerationError::Conflict(_)) if attempt < max_attempts => {
                    debug!(attempt, "Warning count changed concurrently, retrying");
                    attempt += 1;
                }
                Err(err @ ModerationError::PostNotFound(_)) => {
                    return match self.recorded_outcome(request_key.as_ref(), post_id).await? {
                        Some(outcome) => Ok(outcome),
                        None => Err(err),
                    };
                }
                result => return result,
            }
        }
    }

    async fn recorded_outcome(
        &self,
        request_key: Option<&RequestKey>,
        post_id: Id<PostMarker>,
    ) -> Result<Option<WarningOutcome>> {
        let Some(key) = request_key else {
            return Ok(None);
        };

        let outcome = self.replay_warning(key, post_id).await?;
        if outcome.is_some() {
            debug!(%key, "Replaying recorded warning");
        }
        Ok(outcome)
    }

    async fn try_issue_warning(
        &self,
        moderator: Moderator,
        post_id: Id<PostMarker>,
        request_key: Option<&RequestKey>,
    ) -> Result<WarningOutcome> {
        let post = self
            .store()
            .fetch_post(post_id)
            .await?
            .ok_or(ModerationError::PostNotFound(post_id))?;

        let author = self
            .store()
            .fetch_user(post.author_id)
            .await?
            .ok_or(ModerationError::AuthorNotFound {
                post: post_id,
                author: post.author_id,
            })?;

        let warnings_issued = author.warnings.saturating_add(1);
        let outcome = WarningOutcome {
            warnings_issued,
            user_terminated: warnings_issued >= self.config().warn_threshold,
        };

        let mut entry = record(ModerationAction::IssueWarning, moderator, post_id, author.id);
        entry.outcome = Some(outcome);
        entry.request_key = request_key.cloned();

        // The log entry goes first so a duplicate request key fails the batch
        // before the warning count is compared.
        let mut batch = WriteBatch::new()
            .with(BatchOp::RecordAction(entry))
            .with(BatchOp::SetWarnings {
                user: author.id,
                expected: author.warnings,
                warnings: warnings_issued,
            });
        cascade_delete(&mut batch, post_id);
        if outcome.user_terminated {
            batch.push(Self::execute_user_termination(&author));
        }

        match self.store().commit(batch).await {
            Ok(()) => {
                info!(
                    post = %post_id,
                    author = %author.id,
                    warnings = warnings_issued,
                    terminated = outcome.user_terminated,
                    "Issued warning"
                );
                Ok(outcome)
            }
            // A concurrent retry with the same key won; report its outcome.
            Err(StoreError::DuplicateRequest(key)) => self
                .replay_warning(&key, post_id)
                .await?
                .ok_or(ModerationError::Conflict(post_id)),
            Err(err) => Err(ModerationError::from_commit(err, post_id)),
        }
    }

    fn execute_user_termination(author: &User) -> BatchOp {
        info!(user = %author.id, warnings = author.warnings, "Terminating account");
        BatchOp::DeleteUser(author.id)
    }

    async fn replay_warning(
        &self,
        key: &RequestKey,
        post_id: Id<PostMarker>,
    ) -> Result<Option<WarningOutcome>> {
        let Some(recorded) = self.store().fetch_action(key).await? else {
            return Ok(None);
        };

        if recorded.action != ModerationAction::IssueWarning || recorded.post != post_id {
            return Err(ModerationError::RequestKeyReused(key.clone()));
        }

        recorded.outcome.map(Some).ok_or_else(|| {
            ModerationError::PartialFailure(format!("warning {key} was recorded without outcome"))
        })
    }
}

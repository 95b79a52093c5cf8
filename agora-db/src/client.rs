use crate::{
    record::{
        ActionRecord, CredentialRecord, PostRecord, ReportRecord, UserRecord, column_counter,
    },
    store::{
        BatchOp, EVENT_CHANNEL_CAPACITY, Result, Store, StoreError, StoreEvent, Subscription,
        Target, WriteBatch,
    },
};
use agora_common::model::{
    Id,
    auth::{AuthTokenHash, Credential},
    moderation::{ModerationRecord, RequestKey},
    post::{Post, PostMarker},
    report::Report,
    user::{User, UserMarker},
};
use sqlx::{PgConnection, PgPool, postgres::PgPoolOptions, query, query_as, query_scalar};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// [`Store`] backed by PostgreSQL. Every [`WriteBatch`] runs in one transaction.
#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
    events: broadcast::Sender<StoreEvent>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self { pool, events }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    async fn apply(conn: &mut PgConnection, op: BatchOp) -> Result<()> {
        trace!(?op, "Applying batch operation");

        match op {
            BatchOp::ExpectReportCount { post, report_count } => {
                let stored: Option<i32> = query_scalar(
                    "SELECT report_count FROM posts.posts WHERE post_snowflake = $1 FOR UPDATE",
                )
                .bind(post.as_i64())
                .fetch_optional(&mut *conn)
                .await?;

                match stored {
                    None => return Err(StoreError::Missing(Target::Post(post))),
                    Some(stored) if stored != column_counter(report_count)? => {
                        return Err(StoreError::Conflict(Target::Post(post)));
                    }
                    Some(_) => {}
                }
            }
            BatchOp::DeletePost(post_id) => {
                let deleted = query("DELETE FROM posts.posts WHERE post_snowflake = $1")
                    .bind(post_id.as_i64())
                    .execute(&mut *conn)
                    .await?
                    .rows_affected();
                if deleted == 0 {
                    return Err(StoreError::Missing(Target::Post(post_id)));
                }
            }
            BatchOp::DeleteReports(post_id) => {
                query("DELETE FROM posts.reports WHERE post_snowflake = $1")
                    .bind(post_id.as_i64())
                    .execute(&mut *conn)
                    .await?;
            }
            BatchOp::ResetReportCount(post_id) => {
                let updated =
                    query("UPDATE posts.posts SET report_count = 0 WHERE post_snowflake = $1")
                        .bind(post_id.as_i64())
                        .execute(&mut *conn)
                        .await?
                        .rows_affected();
                if updated == 0 {
                    return Err(StoreError::Missing(Target::Post(post_id)));
                }
            }
            BatchOp::SetWarnings {
                user,
                expected,
                warnings,
            } => {
                let updated = query(
                    "
                    UPDATE users.users
                    SET warnings = $3
                    WHERE user_snowflake = $1 AND warnings = $2
                    ",
                )
                .bind(user.as_i64())
                .bind(column_counter(expected)?)
                .bind(column_counter(warnings)?)
                .execute(&mut *conn)
                .await?
                .rows_affected();

                if updated == 0 {
                    let exists: bool = query_scalar(
                        "SELECT EXISTS (SELECT 1 FROM users.users WHERE user_snowflake = $1)",
                    )
                    .bind(user.as_i64())
                    .fetch_one(&mut *conn)
                    .await?;

                    return Err(if exists {
                        StoreError::Conflict(Target::User(user))
                    } else {
                        StoreError::Missing(Target::User(user))
                    });
                }
            }
            BatchOp::DeleteUser(user_id) => {
                let deleted = query("DELETE FROM users.users WHERE user_snowflake = $1")
                    .bind(user_id.as_i64())
                    .execute(&mut *conn)
                    .await?
                    .rows_affected();
                if deleted == 0 {
                    return Err(StoreError::Missing(Target::User(user_id)));
                }
            }
            BatchOp::RecordAction(record) => {
                let (warnings_issued, user_terminated) = match record.outcome {
                    Some(outcome) => (
                        Some(column_counter(outcome.warnings_issued)?),
                        Some(outcome.user_terminated),
                    ),
                    None => (None, None),
                };

                let inserted = query(
                    "
                    INSERT INTO moderation.actions (
                        action, post_snowflake, author_snowflake, moderator_snowflake,
                        warnings_issued, user_terminated, request_key, recorded_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ",
                )
                .bind(record.action.as_str())
                .bind(record.post.as_i64())
                .bind(record.author.map(Id::as_i64))
                .bind(record.moderator.as_i64())
                .bind(warnings_issued)
                .bind(user_terminated)
                .bind(record.request_key.as_ref().map(RequestKey::get))
                .bind(record.at)
                .execute(&mut *conn)
                .await;

                match inserted {
                    Ok(_) => {}
                    Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                        if let Some(key) = record.request_key {
                            return Err(StoreError::DuplicateRequest(key));
                        }
                        return Err(sqlx::Error::Database(err).into());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(())
    }
}

impl Store for DbClient {
    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.author_snowflake,
                posts.username,
                posts.content,
                posts.report_count,
                posts.created_at
            FROM
                posts.posts
            WHERE
                posts.post_snowflake = $1
            ",
        )
        .bind(post_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn fetch_posts_reported_at_least(&self, min_reports: u32) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.author_snowflake,
                posts.username,
                posts.content,
                posts.report_count,
                posts.created_at
            FROM
                posts.posts
            WHERE
                posts.report_count >= $1
            ORDER BY
                posts.created_at, posts.post_snowflake
            ",
        )
        .bind(column_counter(min_reports)?)
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.name,
                users.email,
                users.role,
                users.warnings
            FROM
                users.users
            WHERE
                users.user_snowflake = $1
            ",
        )
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn fetch_reports(&self, post_id: Id<PostMarker>) -> Result<Vec<Report>> {
        let records = query_as::<_, ReportRecord>(
            "
            SELECT
                reports.report_snowflake,
                reports.post_snowflake,
                reports.reason,
                reports.additional_info,
                reports.reported_by,
                reports.reported_at
            FROM
                posts.reports
            WHERE
                reports.post_snowflake = $1
            ",
        )
        .bind(post_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        let reports = records
            .into_iter()
            .map(Report::try_from)
            .collect::<Result<_, _>>()?;
        Ok(reports)
    }

    async fn fetch_action(&self, request_key: &RequestKey) -> Result<Option<ModerationRecord>> {
        let record = query_as::<_, ActionRecord>(
            "
            SELECT
                actions.action,
                actions.post_snowflake,
                actions.author_snowflake,
                actions.moderator_snowflake,
                actions.warnings_issued,
                actions.user_terminated,
                actions.request_key,
                actions.recorded_at
            FROM
                moderation.actions
            WHERE
                actions.request_key = $1
            ",
        )
        .bind(request_key.get())
        .fetch_optional(&self.pool)
        .await?;

        let action = record.map(ModerationRecord::try_from).transpose()?;
        Ok(action)
    }

    async fn fetch_credential(&self, token_hash: &AuthTokenHash) -> Result<Option<Credential>> {
        let record = query_as::<_, CredentialRecord>(
            "
            SELECT
                authentications.user_snowflake,
                authentications.token_hash,
                authentications.created_at,
                authentications.expires_after_seconds
            FROM
                auth.authentications
            WHERE
                authentications.token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let credential = record.map(Credential::try_from).transpose()?;
        Ok(credential)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let events = batch.events();
        let mut tx = self.pool.begin().await?;

        for op in batch {
            // Dropping the transaction on error rolls it back.
            Self::apply(&mut tx, op).await?;
        }

        tx.commit().await?;
        debug!(events = events.len(), "Committed write batch");

        for event in events {
            self.events.send(event).ok();
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }
}

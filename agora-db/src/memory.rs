use crate::store::{
    BatchOp, EVENT_CHANNEL_CAPACITY, Result, Store, StoreError, StoreEvent, Subscription, Target,
    WriteBatch,
};
use agora_common::model::{
    Id,
    auth::{AuthTokenHash, Credential},
    moderation::{ModerationRecord, RequestKey},
    post::{Post, PostMarker},
    report::{Report, ReportMarker},
    user::{User, UserMarker},
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, broadcast};
use tracing::trace;

#[derive(Clone, Debug, Default)]
struct Collections {
    posts: BTreeMap<Id<PostMarker>, Post>,
    reports: BTreeMap<Id<PostMarker>, BTreeMap<Id<ReportMarker>, Report>>,
    users: BTreeMap<Id<UserMarker>, User>,
    credentials: HashMap<AuthTokenHash, Credential>,
    actions: Vec<ModerationRecord>,
}

impl Collections {
    fn apply(&mut self, op: BatchOp) -> Result<()> {
        match op {
            BatchOp::ExpectReportCount { post, report_count } => {
                let stored = self
                    .posts
                    .get(&post)
                    .ok_or(StoreError::Missing(Target::Post(post)))?;
                if stored.report_count != report_count {
                    return Err(StoreError::Conflict(Target::Post(post)));
                }
            }
            BatchOp::DeletePost(post_id) => {
                self.posts
                    .remove(&post_id)
                    .ok_or(StoreError::Missing(Target::Post(post_id)))?;
            }
            BatchOp::DeleteReports(post_id) => {
                self.reports.remove(&post_id);
            }
            BatchOp::ResetReportCount(post_id) => {
                self.posts
                    .get_mut(&post_id)
                    .ok_or(StoreError::Missing(Target::Post(post_id)))?
                    .report_count = 0;
            }
            BatchOp::SetWarnings {
                user,
                expected,
                warnings,
            } => {
                let stored = self
                    .users
                    .get_mut(&user)
                    .ok_or(StoreError::Missing(Target::User(user)))?;
                if stored.warnings != expected {
                    return Err(StoreError::Conflict(Target::User(user)));
                }
                stored.warnings = warnings;
            }
            BatchOp::DeleteUser(user_id) => {
                self.users
                    .remove(&user_id)
                    .ok_or(StoreError::Missing(Target::User(user_id)))?;
            }
            BatchOp::RecordAction(record) => {
                if let Some(key) = &record.request_key
                    && self.action_by_key(key).is_some()
                {
                    return Err(StoreError::DuplicateRequest(key.clone()));
                }
                self.actions.push(record);
            }
        }

        Ok(())
    }

    fn action_by_key(&self, key: &RequestKey) -> Option<&ModerationRecord> {
        self.actions
            .iter()
            .find(|record| record.request_key.as_ref() == Some(key))
    }
}

/// [`Store`] kept entirely in process memory.
///
/// Batches are applied to a staged copy that replaces the live collections
/// only when every operation succeeded.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<Collections>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            state: Mutex::new(Collections::default()),
            events,
        }
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_post(&self, post: Post) {
        self.state.lock().await.posts.insert(post.id, post);
    }

    /// Stores a report and bumps the post's report count, the way the
    /// report-submission flow does.
    pub async fn file_report(&self, report: Report) -> Result<()> {
        let mut state = self.state.lock().await;

        state
            .posts
            .get_mut(&report.post_id)
            .ok_or(StoreError::Missing(Target::Post(report.post_id)))?
            .report_count += 1;
        state
            .reports
            .entry(report.post_id)
            .or_default()
            .insert(report.id, report);

        Ok(())
    }

    pub async fn insert_credential(&self, credential: Credential) {
        self.state
            .lock()
            .await
            .credentials
            .insert(credential.token_hash.clone(), credential);
    }

    /// Snapshot of the moderation action log in commit order.
    pub async fn actions(&self) -> Vec<ModerationRecord> {
        self.state.lock().await.actions.clone()
    }
}

impl Store for MemoryStore {
    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        Ok(self.state.lock().await.posts.get(&post_id).cloned())
    }

    async fn fetch_posts_reported_at_least(&self, min_reports: u32) -> Result<Vec<Post>> {
        let state = self.state.lock().await;

        let mut posts: Vec<Post> = state
            .posts
            .values()
            .filter(|post| post.is_flagged(min_reports))
            .cloned()
            .collect();
        posts.sort_by_key(|post| (post.created_at, post.id));

        Ok(posts)
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn fetch_reports(&self, post_id: Id<PostMarker>) -> Result<Vec<Report>> {
        let state = self.state.lock().await;

        Ok(state
            .reports
            .get(&post_id)
            .map(|reports| reports.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_action(&self, request_key: &RequestKey) -> Result<Option<ModerationRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .action_by_key(request_key)
            .cloned())
    }

    async fn fetch_credential(&self, token_hash: &AuthTokenHash) -> Result<Option<Credential>> {
        Ok(self.state.lock().await.credentials.get(token_hash).cloned())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let events = batch.events();

        {
            let mut state = self.state.lock().await;
            let mut staged = state.clone();
            for op in batch {
                staged.apply(op)?;
            }
            *state = staged;
        }

        for event in events {
            trace!(?event, "Publishing store event");
            // No receivers is not an error.
            self.events.send(event).ok();
        }

        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::MemoryStore,
        store::{BatchOp, Store, StoreError, StoreEvent, Target, WriteBatch},
    };
    use agora_common::model::{
        Id,
        moderation::{ModerationAction, ModerationRecord, RequestKey},
        post::Post,
        report::{Report, ReportReason},
        user::{Role, User},
    };
    use time::{Duration, macros::datetime};

    fn user(id: u64, warnings: u32) -> User {
        User {
            id: Id::new(id),
            name: format!("user {id}"),
            email: format!("user{id}@example.org"),
            role: Role::Student,
            warnings,
        }
    }

    fn post(id: u64, author: u64, report_count: u32) -> Post {
        Post {
            id: Id::new(id),
            author_id: Id::new(author),
            username: format!("user{author}"),
            content: format!("post {id}"),
            report_count,
            created_at: datetime!(2026-05-01 09:00 UTC) + Duration::minutes(id.cast_signed()),
        }
    }

    fn report(id: u64, post: u64, by: u64) -> Report {
        Report {
            id: Id::new(id),
            post_id: Id::new(post),
            reason: ReportReason::Spam,
            additional_info: None,
            reported_by: Id::new(by),
            time: datetime!(2026-05-02 10:00 UTC),
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_user(user(1, 0)).await;
        store.insert_post(post(10, 1, 0)).await;
        for id in 100..103 {
            store.file_report(report(id, 10, 2)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn file_report_mirrors_count() {
        let store = seeded().await;
        let post = store.fetch_post(Id::new(10)).await.unwrap().unwrap();
        assert_eq!(post.report_count, 3);
        assert_eq!(store.fetch_reports(Id::new(10)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn threshold_query_is_inclusive() {
        let store = seeded().await;
        store.insert_post(post(11, 1, 2)).await;
        store.insert_post(post(12, 1, 7)).await;

        let ids: Vec<_> = store
            .fetch_posts_reported_at_least(3)
            .await
            .unwrap()
            .into_iter()
            .map(|post| post.id)
            .collect();
        assert_eq!(ids, vec![Id::new(10), Id::new(12)]);
    }

    #[tokio::test]
    async fn failed_batch_leaves_state_untouched() {
        let store = seeded().await;
        let mut subscription = store.subscribe();

        let batch = WriteBatch::new()
            .with(BatchOp::DeleteReports(Id::new(10)))
            .with(BatchOp::DeletePost(Id::new(10)))
            .with(BatchOp::DeleteUser(Id::new(404)));

        assert!(matches!(
            store.commit(batch).await,
            Err(StoreError::Missing(Target::User(id))) if id == Id::new(404)
        ));
        assert!(store.fetch_post(Id::new(10)).await.unwrap().is_some());
        assert_eq!(store.fetch_reports(Id::new(10)).await.unwrap().len(), 3);

        store
            .commit(WriteBatch::new().with(BatchOp::ResetReportCount(Id::new(10))))
            .await
            .unwrap();
        assert_eq!(
            subscription.next().await,
            Some(StoreEvent::ReportCountReset(Id::new(10)))
        );
    }

    #[tokio::test]
    async fn set_warnings_is_compare_and_set() {
        let store = seeded().await;
        let bump = |expected| {
            WriteBatch::new().with(BatchOp::SetWarnings {
                user: Id::new(1),
                expected,
                warnings: expected + 1,
            })
        };

        store.commit(bump(0)).await.unwrap();
        assert!(matches!(
            store.commit(bump(0)).await,
            Err(StoreError::Conflict(Target::User(_)))
        ));
        assert_eq!(
            store.fetch_user(Id::new(1)).await.unwrap().unwrap().warnings,
            1
        );
    }

    #[tokio::test]
    async fn request_keys_are_unique() {
        let store = seeded().await;
        let key = RequestKey::new("warn-10".to_owned()).unwrap();
        let record = ModerationRecord {
            action: ModerationAction::IssueWarning,
            post: Id::new(10),
            author: Some(Id::new(1)),
            moderator: Id::new(7),
            outcome: None,
            request_key: Some(key.clone()),
            at: datetime!(2026-05-03 00:00 UTC),
        };

        store
            .commit(WriteBatch::new().with(BatchOp::RecordAction(record.clone())))
            .await
            .unwrap();
        assert!(matches!(
            store
                .commit(WriteBatch::new().with(BatchOp::RecordAction(record.clone())))
                .await,
            Err(StoreError::DuplicateRequest(_))
        ));
        assert_eq!(store.fetch_action(&key).await.unwrap(), Some(record));
        assert_eq!(store.actions().await.len(), 1);
    }
}

//! Investigation loader: the reports behind a flagged post.

use crate::{Moderation, ModerationError, Result, gate::authorize};
use agora_common::model::{
    Id,
    auth::Caller,
    moderation::{IncidentReport, Investigation},
    post::PostMarker,
    report::Report,
    user::{ANONYMOUS_USER_NAME, UserMarker},
};
use agora_db::Store;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use tracing::{instrument, warn};

impl<S: Store> Moderation<S> {
    /// Reports filed against the post, oldest first, with reporter names resolved.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn load_reports(
        &self,
        caller: &Caller,
        post_id: Id<PostMarker>,
    ) -> Result<Vec<IncidentReport>> {
        authorize(caller)?;

        let reports = self.store().fetch_reports(post_id).await?;
        Ok(self.resolve_reporters(reports).await)
    }

    /// The post, its author's current warning count and its reports.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn load_investigation(
        &self,
        caller: &Caller,
        post_id: Id<PostMarker>,
    ) -> Result<Investigation> {
        authorize(caller)?;

        let post = self
            .store()
            .fetch_post(post_id)
            .await?
            .ok_or(ModerationError::PostNotFound(post_id))?;

        let (author, reports) = futures::try_join!(
            self.store().fetch_user(post.author_id),
            self.store().fetch_reports(post_id),
        )?;
        let reports = self.resolve_reporters(reports).await;

        Ok(Investigation {
            author_warnings: author.map_or(0, |author| author.warnings),
            post,
            reports,
        })
    }

    /// Never fails: a reporter that cannot be loaded shows up as anonymous.
    async fn resolve_reporters(&self, mut reports: Vec<Report>) -> Vec<IncidentReport> {
        let reporter_ids: BTreeSet<Id<UserMarker>> =
            reports.iter().map(|report| report.reported_by).collect();

        let lookups = reporter_ids.into_iter().map(|reporter_id| async move {
            let name = match self.store().fetch_user(reporter_id).await {
                Ok(Some(user)) if !user.name.is_empty() => user.name,
                Ok(_) => ANONYMOUS_USER_NAME.to_owned(),
                Err(err) => {
                    warn!(reporter = %reporter_id, error = %err, "Could not resolve reporter");
                    ANONYMOUS_USER_NAME.to_owned()
                }
            };
            (reporter_id, name)
        });
        let names: HashMap<Id<UserMarker>, String> = join_all(lookups).await.into_iter().collect();

        reports.sort_by_key(|report| (report.time, report.id));
        reports
            .into_iter()
            .map(|report| IncidentReport {
                reporter_name: names
                    .get(&report.reported_by)
                    .cloned()
                    .unwrap_or_else(|| ANONYMOUS_USER_NAME.to_owned()),
                report,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Moderation, ModerationConfig, ModerationError,
        fixtures::{moderator, post, report, service, student, user},
    };
    use agora_common::model::{
        Id,
        auth::{AuthTokenHash, Credential},
        moderation::{ModerationRecord, RequestKey},
        post::{Post, PostMarker},
        report::Report,
        user::{ANONYMOUS_USER_NAME, User, UserMarker},
    };
    use agora_db::{
        MemoryStore, Store, StoreError, Subscription, Target, WriteBatch, store::Result as StoreResult,
    };

    /// Fails every user lookup for one id.
    struct FlakyUsers {
        inner: MemoryStore,
        broken: Id<UserMarker>,
    }

    impl Store for FlakyUsers {
        async fn fetch_post(&self, post_id: Id<PostMarker>) -> StoreResult<Option<Post>> {
            self.inner.fetch_post(post_id).await
        }

        async fn fetch_posts_reported_at_least(
            &self,
            min_reports: u32,
        ) -> StoreResult<Vec<Post>> {
            self.inner.fetch_posts_reported_at_least(min_reports).await
        }

        async fn fetch_user(&self, user_id: Id<UserMarker>) -> StoreResult<Option<User>> {
            if user_id == self.broken {
                return Err(StoreError::Conflict(Target::User(user_id)));
            }
            self.inner.fetch_user(user_id).await
        }

        async fn fetch_reports(&self, post_id: Id<PostMarker>) -> StoreResult<Vec<Report>> {
            self.inner.fetch_reports(post_id).await
        }

        async fn fetch_action(
            &self,
            request_key: &RequestKey,
        ) -> StoreResult<Option<ModerationRecord>> {
            self.inner.fetch_action(request_key).await
        }

        async fn fetch_credential(
            &self,
            token_hash: &AuthTokenHash,
        ) -> StoreResult<Option<Credential>> {
            self.inner.fetch_credential(token_hash).await
        }

        async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
            self.inner.commit(batch).await
        }

        fn subscribe(&self) -> Subscription {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn reports_are_ordered_by_time() {
        let store = MemoryStore::new();
        store.insert_user(user(1, 0)).await;
        store.insert_user(user(501, 0)).await;
        store.insert_post(post(10, 1)).await;
        store.file_report(report(3, 10, 501, 30)).await.unwrap();
        store.file_report(report(1, 10, 502, 10)).await.unwrap();
        store.file_report(report(2, 10, 501, 20)).await.unwrap();
        let service = service(store);

        let reports = service.load_reports(&moderator(), Id::new(10)).await.unwrap();
        let order: Vec<_> = reports.iter().map(|incident| incident.report.id).collect();
        assert_eq!(order, vec![Id::new(1), Id::new(2), Id::new(3)]);

        let names: Vec<_> = reports
            .iter()
            .map(|incident| incident.reporter_name.as_str())
            .collect();
        assert_eq!(names, vec![ANONYMOUS_USER_NAME, "User 501", "User 501"]);
    }

    #[tokio::test]
    async fn failed_reporter_lookup_degrades_to_anonymous() {
        let inner = MemoryStore::new();
        inner.insert_user(user(501, 0)).await;
        inner.insert_user(user(502, 0)).await;
        inner.insert_post(post(10, 1)).await;
        inner.file_report(report(1, 10, 501, 0)).await.unwrap();
        inner.file_report(report(2, 10, 502, 1)).await.unwrap();
        let service = Moderation::new(
            FlakyUsers {
                inner,
                broken: Id::new(502),
            },
            ModerationConfig::default(),
        );

        let reports = service.load_reports(&moderator(), Id::new(10)).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].reporter_name, "User 501");
        assert_eq!(reports[1].reporter_name, ANONYMOUS_USER_NAME);
    }

    #[tokio::test]
    async fn investigation_includes_author_warnings() {
        let store = MemoryStore::new();
        store.insert_user(user(1, 2)).await;
        store.insert_post(post(10, 1)).await;
        store.file_report(report(1, 10, 501, 0)).await.unwrap();
        let service = service(store);

        let investigation = service
            .load_investigation(&moderator(), Id::new(10))
            .await
            .unwrap();
        assert_eq!(investigation.post.id, Id::new(10));
        assert_eq!(investigation.author_warnings, 2);
        assert_eq!(investigation.reports.len(), 1);

        assert!(matches!(
            service.load_investigation(&moderator(), Id::new(11)).await,
            Err(ModerationError::PostNotFound(id)) if id == Id::new(11)
        ));
    }

    #[tokio::test]
    async fn non_moderators_cannot_investigate() {
        let service = service(MemoryStore::new());
        assert!(matches!(
            service.load_reports(&student(), Id::new(10)).await,
            Err(ModerationError::PermissionDenied { .. })
        ));
    }
}

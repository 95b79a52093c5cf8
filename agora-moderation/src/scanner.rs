//! Flagged content scanner.

use crate::{Moderation, Result, gate::authorize};
use agora_common::model::{
    Id,
    auth::Caller,
    moderation::FlaggedPostSummary,
    post::PostMarker,
    user::{UNKNOWN_USER_NAME, User, UserMarker},
};
use agora_db::{Store, StoreEvent, Subscription};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, instrument};

/// Author columns joined into every summary.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
struct AuthorInfo {
    name: String,
    warnings: u32,
}

impl AuthorInfo {
    fn unknown() -> Self {
        Self {
            name: UNKNOWN_USER_NAME.to_owned(),
            warnings: 0,
        }
    }
}

impl From<User> for AuthorInfo {
    fn from(user: User) -> Self {
        let name = if user.name.is_empty() {
            UNKNOWN_USER_NAME.to_owned()
        } else {
            user.name
        };

        Self {
            name,
            warnings: user.warnings,
        }
    }
}

/// Change that takes a post out of the moderation queue.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum FlaggedChange {
    Removed(Id<PostMarker>),
    Cleared(Id<PostMarker>),
}

/// Subscription narrowed to changes of the flagged set.
#[derive(Debug)]
pub struct FlaggedFeed {
    subscription: Subscription,
}

impl FlaggedFeed {
    pub async fn next(&mut self) -> Option<FlaggedChange> {
        loop {
            match self.subscription.next().await? {
                StoreEvent::PostDeleted(post) => return Some(FlaggedChange::Removed(post)),
                StoreEvent::ReportCountReset(post) => return Some(FlaggedChange::Cleared(post)),
                StoreEvent::ReportsCleared(_)
                | StoreEvent::WarningsChanged { .. }
                | StoreEvent::UserDeleted(_) => {}
            }
        }
    }
}

impl<S: Store> Moderation<S> {
    /// Posts at or above the flag threshold, each joined with its author's
    /// name and warning count.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn list_flagged(&self, caller: &Caller) -> Result<Vec<FlaggedPostSummary>> {
        authorize(caller)?;

        let posts = self
            .store()
            .fetch_posts_reported_at_least(self.config().flag_threshold)
            .await?;
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let author_ids: BTreeSet<Id<UserMarker>> = posts.iter().map(|post| post.author_id).collect();
        let authors = self.fetch_authors(author_ids).await?;
        debug!(posts = posts.len(), authors = authors.len(), "Loaded flagged posts");

        let summaries = posts
            .into_iter()
            .map(|post| {
                let author = authors
                    .get(&post.author_id)
                    .cloned()
                    .unwrap_or_else(AuthorInfo::unknown);

                FlaggedPostSummary {
                    post,
                    author_name: author.name,
                    warning_count: author.warnings,
                }
            })
            .collect();

        Ok(summaries)
    }

    /// Live feed of posts leaving the moderation queue.
    pub fn watch_flagged(&self, caller: &Caller) -> Result<FlaggedFeed> {
        authorize(caller)?;

        Ok(FlaggedFeed {
            subscription: self.store().subscribe(),
        })
    }

    async fn fetch_authors(
        &self,
        author_ids: BTreeSet<Id<UserMarker>>,
    ) -> Result<HashMap<Id<UserMarker>, AuthorInfo>> {
        let lookups = author_ids.into_iter().map(|author_id| async move {
            let user = self.store().fetch_user(author_id).await?;
            let info = user.map_or_else(AuthorInfo::unknown, AuthorInfo::from);
            Ok::<_, agora_db::StoreError>((author_id, info))
        });

        Ok(try_join_all(lookups).await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ModerationError,
        fixtures::{moderator, post, seed_flagged, service, student, user},
        scanner::FlaggedChange,
    };
    use agora_common::model::{Id, user::UNKNOWN_USER_NAME};
    use agora_db::MemoryStore;

    #[tokio::test]
    async fn lists_exactly_the_posts_at_threshold() {
        let store = MemoryStore::new();
        store.insert_user(user(1, 1)).await;
        seed_flagged(&store, post(10, 1), 2).await;
        seed_flagged(&store, post(11, 1), 3).await;
        seed_flagged(&store, post(12, 1), 6).await;
        seed_flagged(&store, post(13, 1), 0).await;
        let service = service(store);

        let flagged = service.list_flagged(&moderator()).await.unwrap();
        let ids: Vec<_> = flagged.iter().map(|summary| summary.post.id).collect();
        assert_eq!(ids, vec![Id::new(11), Id::new(12)]);
        assert!(flagged.iter().all(|summary| summary.post.report_count >= 3));
    }

    #[tokio::test]
    async fn joins_author_metadata() {
        let store = MemoryStore::new();
        store.insert_user(user(1, 2)).await;
        store.insert_user(user(2, 0)).await;
        seed_flagged(&store, post(10, 1), 3).await;
        seed_flagged(&store, post(11, 2), 4).await;
        seed_flagged(&store, post(12, 1), 5).await;
        seed_flagged(&store, post(13, 3), 3).await;
        let service = service(store);

        let flagged = service.list_flagged(&moderator()).await.unwrap();
        let joined: Vec<_> = flagged
            .iter()
            .map(|summary| (summary.author_name.as_str(), summary.warning_count))
            .collect();

        assert_eq!(
            joined,
            vec![
                ("User 1", 2),
                ("User 2", 0),
                ("User 1", 2),
                (UNKNOWN_USER_NAME, 0)
            ]
        );
    }

    #[tokio::test]
    async fn empty_queue_is_not_an_error() {
        let service = service(MemoryStore::new());
        assert!(service.list_flagged(&moderator()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_moderators_cannot_scan() {
        let service = service(MemoryStore::new());
        assert!(matches!(
            service.list_flagged(&student()).await,
            Err(ModerationError::PermissionDenied { .. })
        ));
        assert!(service.watch_flagged(&student()).is_err());
    }

    #[tokio::test]
    async fn feed_reports_posts_leaving_the_queue() {
        let store = MemoryStore::new();
        store.insert_user(user(1, 0)).await;
        seed_flagged(&store, post(10, 1), 3).await;
        seed_flagged(&store, post(11, 1), 3).await;
        let service = service(store);
        let mut feed = service.watch_flagged(&moderator()).unwrap();

        service.mark_reviewed(&moderator(), Id::new(10)).await.unwrap();
        service.terminate_post(&moderator(), Id::new(11)).await.unwrap();

        assert_eq!(feed.next().await, Some(FlaggedChange::Cleared(Id::new(10))));
        assert_eq!(feed.next().await, Some(FlaggedChange::Removed(Id::new(11))));
    }
}

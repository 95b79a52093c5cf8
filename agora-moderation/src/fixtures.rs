use crate::{Moderation, ModerationConfig};
use agora_common::model::{
    Id,
    auth::Caller,
    post::Post,
    report::{Report, ReportReason},
    user::{Role, User, UserMarker},
};
use agora_db::MemoryStore;
use time::{Duration, macros::datetime};

pub(crate) const MODERATOR_ID: Id<UserMarker> = Id::new(900);

pub(crate) fn moderator() -> Caller {
    Caller::new(MODERATOR_ID, Role::Moderator)
}

pub(crate) fn student() -> Caller {
    Caller::new(Id::new(901), Role::Student)
}

pub(crate) fn user(id: u64, warnings: u32) -> User {
    User {
        id: Id::new(id),
        name: format!("User {id}"),
        email: format!("user{id}@example.org"),
        role: Role::Student,
        warnings,
    }
}

pub(crate) fn post(id: u64, author: u64) -> Post {
    Post {
        id: Id::new(id),
        author_id: Id::new(author),
        username: format!("user{author}"),
        content: format!("Content of post {id}"),
        report_count: 0,
        created_at: datetime!(2026-04-01 08:00 UTC) + Duration::minutes(id.cast_signed()),
    }
}

/// Report filed `minute` minutes after a fixed base time.
pub(crate) fn report(id: u64, post: u64, reporter: u64, minute: i64) -> Report {
    Report {
        id: Id::new(id),
        post_id: Id::new(post),
        reason: ReportReason::Harassment,
        additional_info: Some(format!("report {id}")),
        reported_by: Id::new(reporter),
        time: datetime!(2026-04-02 12:00 UTC) + Duration::minutes(minute),
    }
}

/// Stores `post` and files `reports` reports against it from distinct reporters.
pub(crate) async fn seed_flagged(store: &MemoryStore, post: Post, reports: u64) {
    let post_id = post.id.get();
    store.insert_post(post).await;
    for n in 0..reports {
        let id = post_id * 100 + n;
        store
            .file_report(report(id, post_id, 500 + n, n.cast_signed()))
            .await
            .unwrap();
    }
}

pub(crate) fn service(store: MemoryStore) -> Moderation<MemoryStore> {
    Moderation::new(store, ModerationConfig::default())
}

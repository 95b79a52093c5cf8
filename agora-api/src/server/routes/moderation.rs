use crate::server::{
    Result, ServerError, ServerRouter, ServerState,
    auth::{AuthenticatedUser, IdempotencyKey},
};
use agora_common::model::{
    Id,
    moderation::{FlaggedPostSummary, IncidentReport, Investigation, ModerationAction, WarningOutcome},
    post::PostMarker,
};
use agora_db::Store;
use axum::{Json, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};

pub fn routes<S: Store>() -> ServerRouter<S> {
    ServerRouter::new()
        .typed_get(list_flagged::<S>)
        .typed_get(get_investigation::<S>)
        .typed_get(get_reports::<S>)
        .typed_post(terminate_post::<S>)
        .typed_post(issue_warning::<S>)
        .typed_post(mark_reviewed::<S>)
}

/// Acknowledges an action that has nothing to report beyond having happened.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAck {
    pub post_id: Id<PostMarker>,
    pub action: ModerationAction,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/moderation/flagged", rejection(ServerError))]
struct FlaggedPath();

async fn list_flagged<S: Store>(
    FlaggedPath(): FlaggedPath,
    State(state): State<ServerState<S>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<FlaggedPostSummary>>> {
    let flagged = state.moderation.list_flagged(user.caller()).await?;

    Ok(Json(flagged))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/moderation/posts/{id}", rejection(ServerError))]
struct InvestigationPath {
    id: Id<PostMarker>,
}

async fn get_investigation<S: Store>(
    InvestigationPath { id }: InvestigationPath,
    State(state): State<ServerState<S>>,
    user: AuthenticatedUser,
) -> Result<Json<Investigation>> {
    let investigation = state
        .moderation
        .load_investigation(user.caller(), id)
        .await?;

    Ok(Json(investigation))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/moderation/posts/{id}/reports", rejection(ServerError))]
struct ReportsPath {
    id: Id<PostMarker>,
}

async fn get_reports<S: Store>(
    ReportsPath { id }: ReportsPath,
    State(state): State<ServerState<S>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<IncidentReport>>> {
    let reports = state.moderation.load_reports(user.caller(), id).await?;

    Ok(Json(reports))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/moderation/posts/{id}/terminate", rejection(ServerError))]
struct TerminatePath {
    id: Id<PostMarker>,
}

async fn terminate_post<S: Store>(
    TerminatePath { id }: TerminatePath,
    State(state): State<ServerState<S>>,
    user: AuthenticatedUser,
) -> Result<Json<ActionAck>> {
    state.moderation.terminate_post(user.caller(), id).await?;

    Ok(Json(ActionAck {
        post_id: id,
        action: ModerationAction::TerminatePost,
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/moderation/posts/{id}/warn", rejection(ServerError))]
struct WarnPath {
    id: Id<PostMarker>,
}

async fn issue_warning<S: Store>(
    WarnPath { id }: WarnPath,
    State(state): State<ServerState<S>>,
    user: AuthenticatedUser,
    IdempotencyKey(request_key): IdempotencyKey,
) -> Result<Json<WarningOutcome>> {
    let outcome = state
        .moderation
        .issue_warning(user.caller(), id, request_key)
        .await?;

    Ok(Json(outcome))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/moderation/posts/{id}/review", rejection(ServerError))]
struct ReviewPath {
    id: Id<PostMarker>,
}

async fn mark_reviewed<S: Store>(
    ReviewPath { id }: ReviewPath,
    State(state): State<ServerState<S>>,
    user: AuthenticatedUser,
) -> Result<Json<ActionAck>> {
    state.moderation.mark_reviewed(user.caller(), id).await?;

    Ok(Json(ActionAck {
        post_id: id,
        action: ModerationAction::MarkReviewed,
    }))
}

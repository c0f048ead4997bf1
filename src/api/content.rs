/// Moderation status, screening and visibility endpoints for content items
use crate::{
    api::extract::{ContentTarget, PageQuery, Params, Payload},
    auth::{CallerContext, OptionalCaller},
    context::AppContext,
    db::Page,
    error::{ModResult, ModerationError},
    moderation::{
        moderators::Capability,
        service::{ScreeningOutcome, Submission},
        status::{ContentStatus, ModerationStatus, Visibility},
    },
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Build content routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/api/moderation/content/:content_type/:content_id/status",
            get(get_status).put(upsert_status),
        )
        .route(
            "/api/moderation/content/:content_type/:content_id/status/notified",
            post(mark_user_notified),
        )
        .route(
            "/api/moderation/content/:content_type/:content_id/visibility",
            get(get_visibility),
        )
        .route(
            "/api/moderation/content/:content_type/:content_id/screen",
            post(screen_content),
        )
        .route("/api/moderation/usernames/screen", post(screen_username))
        .route("/api/moderation/status", get(list_statuses))
        .route("/api/moderation/status/pending-count", get(pending_count))
}

async fn get_status(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    ContentTarget(target): ContentTarget,
) -> ModResult<Json<ModerationStatus>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let status = ctx
        .run(ctx.moderation.status.get(target))
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("No moderation status for {}", target)))?;
    Ok(Json(status))
}

#[derive(Deserialize)]
struct UpsertStatusRequest {
    status: ContentStatus,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    notes: String,
}

async fn upsert_status(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    ContentTarget(target): ContentTarget,
    Payload(req): Payload<UpsertStatusRequest>,
) -> ModResult<Json<ModerationStatus>> {
    let status = ctx
        .run(ctx.moderation.status.upsert(
            caller.user_id,
            target,
            req.status,
            &req.reason,
            &req.notes,
        ))
        .await?;
    Ok(Json(status))
}

async fn mark_user_notified(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    ContentTarget(target): ContentTarget,
) -> ModResult<StatusCode> {
    ctx.run(ctx.moderation.status.mark_user_notified(caller.user_id, target))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_visibility(
    State(ctx): State<AppContext>,
    viewer: OptionalCaller,
    ContentTarget(target): ContentTarget,
) -> ModResult<Json<Visibility>> {
    let viewer = viewer.caller.map(|c| c.user_id);
    let visibility = ctx.run(ctx.moderation.visibility_for(viewer, target)).await?;
    Ok(Json(visibility))
}

#[derive(Deserialize)]
struct ScreenRequest {
    text: String,
}

async fn screen_content(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    ContentTarget(target): ContentTarget,
    Payload(req): Payload<ScreenRequest>,
) -> ModResult<Json<ScreeningOutcome>> {
    let outcome = ctx
        .run(ctx.moderation.screen_submission(
            caller.user_id,
            Submission::Content { target },
            &req.text,
        ))
        .await?;
    Ok(Json(outcome))
}

async fn screen_username(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<ScreenRequest>,
) -> ModResult<Json<ScreeningOutcome>> {
    let outcome = ctx
        .run(ctx.moderation.screen_submission(caller.user_id, Submission::Username, &req.text))
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct ListStatusQuery {
    status: Option<String>,
}

async fn list_statuses(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ListStatusQuery>,
    Params(page): Params<PageQuery>,
) -> ModResult<Json<Page<ModerationStatus>>> {
    ctx.run(
        ctx.moderation
            .registry
            .require_capability(caller.user_id, Capability::AccessDashboard),
    )
    .await?;
    let status = match query.status.as_deref() {
        Some(s) => ContentStatus::from_str(s)?,
        None => ContentStatus::Pending,
    };
    let statuses = ctx
        .run(ctx.moderation.status.list_by_status(status, page.request()))
        .await?;
    Ok(Json(statuses))
}

async fn pending_count(
    State(ctx): State<AppContext>,
    caller: CallerContext,
) -> ModResult<Json<serde_json::Value>> {
    ctx.run(
        ctx.moderation
            .registry
            .require_capability(caller.user_id, Capability::AccessDashboard),
    )
    .await?;
    let count = ctx.run(ctx.moderation.status.pending_count()).await?;
    Ok(Json(json!({ "count": count })))
}

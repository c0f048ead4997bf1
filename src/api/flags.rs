/// Content flag endpoints
use crate::{
    api::extract::{AssignRequest, ContentTarget, PageQuery, Params, Payload},
    auth::CallerContext,
    context::AppContext,
    db::Page,
    error::ModResult,
    moderation::{
        flags::{Flag, FlagReview, FlagStatus, FlagType},
        types::ContentRef,
    },
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build flag routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/moderation/flags", post(create_flag).get(list_flags))
        .route("/api/moderation/flags/:id", get(get_flag))
        .route("/api/moderation/flags/:id/assign", post(assign_flag))
        .route("/api/moderation/flags/:id/review", post(review_flag))
        .route(
            "/api/moderation/content/:content_type/:content_id/flags",
            get(list_content_flags),
        )
}

#[derive(Deserialize)]
struct CreateFlagRequest {
    target: ContentRef,
    flag_type: FlagType,
    #[serde(default)]
    description: String,
}

async fn create_flag(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<CreateFlagRequest>,
) -> ModResult<Json<Flag>> {
    let flag = ctx
        .run(ctx.moderation.file_flag(caller.user_id, req.target, req.flag_type, &req.description))
        .await?;
    Ok(Json(flag))
}

#[derive(Deserialize)]
struct ListFlagsQuery {
    status: Option<String>,
}

async fn list_flags(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ListFlagsQuery>,
    Params(page): Params<PageQuery>,
) -> ModResult<Json<Page<Flag>>> {
    let status = match query.status.as_deref() {
        Some(s) => FlagStatus::from_str(s)?,
        None => FlagStatus::Pending,
    };
    let flags = ctx
        .run(ctx.moderation.flags.list_by_status(caller.user_id, status, page.request()))
        .await?;
    Ok(Json(flags))
}

async fn get_flag(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<Flag>> {
    let flag = ctx.run(ctx.moderation.flags.get(caller.user_id, id)).await?;
    Ok(Json(flag))
}

async fn assign_flag(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<AssignRequest>,
) -> ModResult<Json<Flag>> {
    let flag = ctx
        .run(ctx.moderation.flags.assign(caller.user_id, id, req.assignee_id))
        .await?;
    Ok(Json(flag))
}

async fn review_flag(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(review): Payload<FlagReview>,
) -> ModResult<Json<Flag>> {
    let flag = ctx
        .run(ctx.moderation.flags.review(caller.user_id, id, review))
        .await?;
    Ok(Json(flag))
}

async fn list_content_flags(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    ContentTarget(target): ContentTarget,
) -> ModResult<Json<Vec<Flag>>> {
    let flags = ctx
        .run(ctx.moderation.flags.list_by_content(caller.user_id, target))
        .await?;
    Ok(Json(flags))
}

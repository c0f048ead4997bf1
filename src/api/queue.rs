/// Review queue endpoints
use crate::{
    api::extract::{AssignRequest, PageQuery, Params, Payload},
    auth::CallerContext,
    context::AppContext,
    db::Page,
    error::ModResult,
    moderation::queue::{NewQueueItem, QueueDecision, QueueItem, QueueStats, QueueStatus},
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build review queue routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/moderation/queue", post(add_item).get(list_items))
        .route("/api/moderation/queue/stats", get(queue_stats))
        .route("/api/moderation/queue/:id", get(get_item))
        .route("/api/moderation/queue/:id/assign", post(assign_item))
        .route("/api/moderation/queue/:id/resolve", post(resolve_item))
}

async fn add_item(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<NewQueueItem>,
) -> ModResult<Json<QueueItem>> {
    let item = ctx.run(ctx.moderation.queue.add(caller.user_id, req)).await?;
    Ok(Json(item))
}

#[derive(Deserialize)]
struct ListQueueQuery {
    status: Option<String>,
}

/// Items by status; `status=all` lists every item, the default is pending
async fn list_items(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ListQueueQuery>,
    Params(page): Params<PageQuery>,
) -> ModResult<Json<Page<QueueItem>>> {
    let status = match query.status.as_deref() {
        Some(s) => QueueStatus::parse_filter(s)?,
        None => Some(QueueStatus::Pending),
    };
    let items = ctx
        .run(ctx.moderation.queue.list(caller.user_id, status, page.request()))
        .await?;
    Ok(Json(items))
}

async fn queue_stats(
    State(ctx): State<AppContext>,
    caller: CallerContext,
) -> ModResult<Json<QueueStats>> {
    let stats = ctx.run(ctx.moderation.queue.stats(caller.user_id)).await?;
    Ok(Json(stats))
}

async fn get_item(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<QueueItem>> {
    let item = ctx.run(ctx.moderation.queue.get(caller.user_id, id)).await?;
    Ok(Json(item))
}

async fn assign_item(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<AssignRequest>,
) -> ModResult<Json<QueueItem>> {
    let item = ctx
        .run(ctx.moderation.queue.assign(caller.user_id, id, req.assignee_id))
        .await?;
    Ok(Json(item))
}

#[derive(Deserialize)]
struct ResolveItemRequest {
    decision: QueueDecision,
    #[serde(default)]
    notes: String,
}

async fn resolve_item(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<ResolveItemRequest>,
) -> ModResult<Json<QueueItem>> {
    let item = ctx
        .run(ctx.moderation.queue.resolve(caller.user_id, id, req.decision, &req.notes))
        .await?;
    Ok(Json(item))
}

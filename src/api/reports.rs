/// Content report endpoints
use crate::{
    api::extract::{AssignRequest, PageQuery, Params, Payload},
    auth::CallerContext,
    context::AppContext,
    db::Page,
    error::ModResult,
    moderation::reports::{
        ActionLog, Evidence, NewEvidence, NewReport, Report, ReportCategory, ReportComment,
        ReportStats, ReportStatus, Resolution,
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build report routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/moderation/reports", post(create_report).get(list_reports))
        .route("/api/moderation/reports/mine", get(list_my_reports))
        .route("/api/moderation/reports/stats", get(report_stats))
        .route("/api/moderation/reports/:id", get(get_report))
        .route("/api/moderation/reports/:id/assign", post(assign_report))
        .route("/api/moderation/reports/:id/status", post(update_report_status))
        .route("/api/moderation/reports/:id/resolve", post(resolve_report))
        .route("/api/moderation/reports/:id/notified", post(mark_reporter_notified))
        .route(
            "/api/moderation/reports/:id/evidence",
            post(add_evidence).get(list_evidence),
        )
        .route(
            "/api/moderation/reports/:id/evidence/:evidence_id",
            delete(delete_evidence),
        )
        .route(
            "/api/moderation/reports/:id/comments",
            post(add_comment).get(list_comments),
        )
        .route(
            "/api/moderation/reports/:id/comments/:comment_id",
            delete(delete_comment),
        )
        .route("/api/moderation/reports/:id/logs", get(action_logs))
}

async fn create_report(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<NewReport>,
) -> ModResult<Json<Report>> {
    let report = ctx.run(ctx.moderation.file_report(caller.user_id, req)).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ListReportsQuery {
    status: Option<String>,
    category: Option<String>,
}

/// Reports by status, optionally narrowed to a category; status defaults to pending
async fn list_reports(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ListReportsQuery>,
    Params(page): Params<PageQuery>,
) -> ModResult<Json<Page<Report>>> {
    let status = match query.status.as_deref() {
        Some(s) => ReportStatus::from_str(s)?,
        None => ReportStatus::Pending,
    };

    let reports = match query.category.as_deref() {
        Some(c) => {
            let category = ReportCategory::from_str(c)?;
            ctx.run(ctx.moderation.reports.list_by_category(
                caller.user_id,
                category,
                status,
                page.request(),
            ))
            .await?
        }
        None => {
            ctx.run(ctx.moderation.reports.list_by_status(caller.user_id, status, page.request()))
                .await?
        }
    };
    Ok(Json(reports))
}

async fn list_my_reports(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(page): Params<PageQuery>,
) -> ModResult<Json<Page<Report>>> {
    let reports = ctx
        .run(ctx.moderation.reports.list_mine(caller.user_id, page.request()))
        .await?;
    Ok(Json(reports))
}

async fn report_stats(
    State(ctx): State<AppContext>,
    caller: CallerContext,
) -> ModResult<Json<ReportStats>> {
    let stats = ctx.run(ctx.moderation.reports.stats(caller.user_id)).await?;
    Ok(Json(stats))
}

async fn get_report(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<Report>> {
    let report = ctx.run(ctx.moderation.reports.get(caller.user_id, id)).await?;
    Ok(Json(report))
}

async fn assign_report(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<AssignRequest>,
) -> ModResult<Json<Report>> {
    let report = ctx
        .run(ctx.moderation.reports.assign(caller.user_id, id, req.assignee_id))
        .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct UpdateStatusRequest {
    status: ReportStatus,
}

async fn update_report_status(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<UpdateStatusRequest>,
) -> ModResult<Json<Report>> {
    let report = ctx
        .run(ctx.moderation.reports.update_status(caller.user_id, id, req.status))
        .await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ResolveRequest {
    resolution: Resolution,
    #[serde(default)]
    notes: String,
}

async fn resolve_report(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<ResolveRequest>,
) -> ModResult<Json<Report>> {
    let report = ctx
        .run(ctx.moderation.resolve_report(caller.user_id, id, req.resolution, &req.notes))
        .await?;
    Ok(Json(report))
}

async fn mark_reporter_notified(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<Report>> {
    let report = ctx
        .run(ctx.moderation.reports.mark_reporter_notified(caller.user_id, id))
        .await?;
    Ok(Json(report))
}

async fn add_evidence(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<NewEvidence>,
) -> ModResult<Json<Evidence>> {
    let evidence = ctx
        .run(ctx.moderation.reports.add_evidence(caller.user_id, id, req))
        .await?;
    Ok(Json(evidence))
}

async fn list_evidence(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<Vec<Evidence>>> {
    let evidence = ctx
        .run(ctx.moderation.reports.list_evidence(caller.user_id, id))
        .await?;
    Ok(Json(evidence))
}

async fn delete_evidence(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path((id, evidence_id)): Path<(i64, i64)>,
) -> ModResult<StatusCode> {
    ctx.run(ctx.moderation.reports.delete_evidence(caller.user_id, id, evidence_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AddCommentRequest {
    body: String,
    #[serde(default)]
    is_internal: bool,
}

async fn add_comment(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<AddCommentRequest>,
) -> ModResult<Json<ReportComment>> {
    let comment = ctx
        .run(ctx.moderation.reports.add_comment(caller.user_id, id, &req.body, req.is_internal))
        .await?;
    Ok(Json(comment))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCommentsQuery {
    #[serde(default)]
    include_internal: bool,
}

async fn list_comments(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Params(query): Params<ListCommentsQuery>,
) -> ModResult<Json<Vec<ReportComment>>> {
    let comments = ctx
        .run(ctx.moderation.reports.list_comments(caller.user_id, id, query.include_internal))
        .await?;
    Ok(Json(comments))
}

async fn delete_comment(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path((id, comment_id)): Path<(i64, i64)>,
) -> ModResult<StatusCode> {
    ctx.run(ctx.moderation.reports.delete_comment(caller.user_id, id, comment_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn action_logs(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<Vec<ActionLog>>> {
    let logs = ctx.run(ctx.moderation.reports.action_logs(caller.user_id, id)).await?;
    Ok(Json(logs))
}

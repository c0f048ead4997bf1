/// Trust, moderator privilege, penalty and user action endpoints
use crate::{
    api::extract::{PageQuery, Params, Payload},
    auth::CallerContext,
    context::AppContext,
    db::Page,
    error::{ModResult, ModerationError},
    moderation::{
        moderators::{CapabilityUpdate, ModeratorCapabilities, ModeratorPrivilege},
        penalties::{NewPenalty, Penalty, Restriction, UserActionKind},
        trust::{ComponentScores, TrustLevel, TrustScore},
        types::UserId,
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Build user-facing moderation routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Trust
        .route(
            "/api/moderation/users/:user_id/trust",
            get(get_trust).put(update_trust),
        )
        .route("/api/moderation/trust", get(list_trust_by_level))
        // Moderators
        .route("/api/moderation/moderators", post(grant_moderator).get(list_moderators))
        .route(
            "/api/moderation/moderators/:user_id",
            get(get_moderator).put(update_moderator).delete(revoke_moderator),
        )
        // Penalties
        .route("/api/moderation/penalties", post(apply_penalty))
        .route("/api/moderation/penalties/active", get(list_active_penalties))
        .route("/api/moderation/penalties/:id/remove", post(remove_penalty))
        .route("/api/moderation/users/:user_id/penalties", get(list_user_penalties))
        .route("/api/moderation/users/:user_id/penalties/history", get(penalty_history))
        .route("/api/moderation/users/:user_id/restriction", get(restriction))
        // User moderation actions
        .route(
            "/api/moderation/users/:user_id/actions",
            post(create_user_action).get(list_user_penalties),
        )
        .route("/api/moderation/users/:user_id/banned", get(is_banned))
}

// ============================================================================
// Trust
// ============================================================================

async fn get_trust(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
) -> ModResult<Json<TrustScore>> {
    if user_id != caller.user_id {
        ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
            .await?;
    }
    let score = ctx.run(ctx.moderation.trust.get(user_id)).await?;
    Ok(Json(score))
}

async fn update_trust(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
    Payload(req): Payload<ComponentScores>,
) -> ModResult<Json<TrustScore>> {
    let score = ctx
        .run(ctx.moderation.update_trust_scores(caller.user_id, user_id, req))
        .await?;
    Ok(Json(score))
}

#[derive(Deserialize)]
struct TrustLevelQuery {
    level: String,
}

async fn list_trust_by_level(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<TrustLevelQuery>,
    Params(page): Params<PageQuery>,
) -> ModResult<Json<Page<TrustScore>>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let level = TrustLevel::from_str(&query.level)?;
    let scores = ctx
        .run(ctx.moderation.trust.list_by_level(level, page.request()))
        .await?;
    Ok(Json(scores))
}

// ============================================================================
// Moderators
// ============================================================================

#[derive(Deserialize)]
struct GrantRequest {
    user_id: UserId,
    #[serde(default)]
    capabilities: ModeratorCapabilities,
}

async fn grant_moderator(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<GrantRequest>,
) -> ModResult<Json<ModeratorPrivilege>> {
    let privilege = ctx
        .run(ctx.moderation.registry.grant(caller.user_id, req.user_id, req.capabilities))
        .await?;
    Ok(Json(privilege))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModeratorsQuery {
    #[serde(default)]
    active_only: bool,
}

async fn list_moderators(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ListModeratorsQuery>,
) -> ModResult<Json<Vec<ModeratorPrivilege>>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let moderators = if query.active_only {
        ctx.run(ctx.moderation.registry.list_active()).await?
    } else {
        ctx.run(ctx.moderation.registry.list_all()).await?
    };
    Ok(Json(moderators))
}

async fn get_moderator(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
) -> ModResult<Json<ModeratorPrivilege>> {
    if user_id != caller.user_id {
        ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
            .await?;
    }
    let privilege = ctx
        .run(ctx.moderation.registry.get(user_id))
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("No moderator privileges for user {}", user_id)))?;
    Ok(Json(privilege))
}

async fn update_moderator(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
    Payload(req): Payload<CapabilityUpdate>,
) -> ModResult<Json<ModeratorPrivilege>> {
    let privilege = ctx
        .run(ctx.moderation.registry.update(caller.user_id, user_id, req))
        .await?;
    Ok(Json(privilege))
}

async fn revoke_moderator(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
) -> ModResult<StatusCode> {
    ctx.run(ctx.moderation.registry.revoke(caller.user_id, user_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Penalties
// ============================================================================

async fn apply_penalty(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<NewPenalty>,
) -> ModResult<Json<Penalty>> {
    let penalty = ctx.run(ctx.moderation.penalties.apply(caller.user_id, req)).await?;
    Ok(Json(penalty))
}

async fn list_active_penalties(
    State(ctx): State<AppContext>,
    caller: CallerContext,
) -> ModResult<Json<Vec<Penalty>>> {
    let penalties = ctx.run(ctx.moderation.penalties.list_active(caller.user_id)).await?;
    Ok(Json(penalties))
}

#[derive(Deserialize)]
struct RemovePenaltyRequest {
    reason: String,
}

async fn remove_penalty(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<RemovePenaltyRequest>,
) -> ModResult<Json<Penalty>> {
    let penalty = ctx
        .run(ctx.moderation.penalties.remove(caller.user_id, id, &req.reason))
        .await?;
    Ok(Json(penalty))
}

async fn list_user_penalties(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
) -> ModResult<Json<Vec<Penalty>>> {
    let penalties = ctx
        .run(ctx.moderation.penalties.list_by_user(caller.user_id, user_id))
        .await?;
    Ok(Json(penalties))
}

async fn penalty_history(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
) -> ModResult<Json<Vec<Penalty>>> {
    let penalties = ctx
        .run(ctx.moderation.penalties.history(caller.user_id, user_id))
        .await?;
    Ok(Json(penalties))
}

async fn restriction(
    State(ctx): State<AppContext>,
    _caller: CallerContext,
    Path(user_id): Path<UserId>,
) -> ModResult<Json<Restriction>> {
    let restriction = ctx.run(ctx.moderation.penalties.is_restricted(user_id)).await?;
    Ok(Json(restriction))
}

// ============================================================================
// User moderation actions
// ============================================================================

#[derive(Deserialize)]
struct UserActionRequest {
    action: UserActionKind,
    reason: String,
    #[serde(default)]
    duration_days: Option<i64>,
}

async fn create_user_action(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
    Payload(req): Payload<UserActionRequest>,
) -> ModResult<Json<Penalty>> {
    let penalty = ctx
        .run(ctx.moderation.penalties.create_user_action(
            caller.user_id,
            user_id,
            req.action,
            &req.reason,
            req.duration_days,
        ))
        .await?;
    Ok(Json(penalty))
}

async fn is_banned(
    State(ctx): State<AppContext>,
    _caller: CallerContext,
    Path(user_id): Path<UserId>,
) -> ModResult<Json<serde_json::Value>> {
    let banned = ctx.run(ctx.moderation.penalties.is_banned(user_id)).await?;
    Ok(Json(json!({ "userId": user_id, "banned": banned })))
}

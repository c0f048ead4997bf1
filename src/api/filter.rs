/// Filter rule, prohibited word and filter verdict endpoints
use crate::{
    api::extract::{PageQuery, Params, Payload},
    auth::CallerContext,
    context::AppContext,
    db::Page,
    error::{ModResult, ModerationError},
    moderation::{
        rules::{NewRule, Rule, RuleScope, RuleUpdate},
        types::{ModerationAction, UserId},
        verdicts::FilterVerdict,
        words::{FilterOutcome, NewProhibitedWord, ProhibitedWord, WordUpdate},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build filter routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        // Rules
        .route("/api/moderation/rules", post(create_rule).get(list_rules))
        .route(
            "/api/moderation/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/api/moderation/filter", post(filter_content))
        // Verdicts
        .route("/api/moderation/filter-results", get(list_content_verdicts))
        .route("/api/moderation/filter-results/:id", get(get_verdict))
        .route("/api/moderation/filter-results/:id/review", post(review_verdict))
        .route("/api/moderation/users/:user_id/filter-results", get(list_user_verdicts))
        // Prohibited words
        .route("/api/moderation/words", post(add_word).get(list_words))
        .route(
            "/api/moderation/words/:id",
            get(get_word).put(update_word).delete(delete_word),
        )
        .route("/api/moderation/words/filter", post(filter_text))
}

// ============================================================================
// Rules
// ============================================================================

async fn create_rule(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<NewRule>,
) -> ModResult<Json<Rule>> {
    let rule = ctx.run(ctx.moderation.rules.create(caller.user_id, req)).await?;
    Ok(Json(rule))
}

#[derive(Deserialize)]
struct ListRulesQuery {
    applies_to: Option<String>,
    #[serde(default)]
    active_only: bool,
}

async fn list_rules(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ListRulesQuery>,
) -> ModResult<Json<Vec<Rule>>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let scope = query.applies_to.as_deref().map(RuleScope::from_str).transpose()?;
    let rules = ctx
        .run(ctx.moderation.rules.list(scope, query.active_only))
        .await?;
    Ok(Json(rules))
}

async fn get_rule(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<Rule>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let rule = ctx.run(ctx.moderation.rules.get(id)).await?;
    Ok(Json(rule))
}

async fn update_rule(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<RuleUpdate>,
) -> ModResult<Json<Rule>> {
    let rule = ctx.run(ctx.moderation.rules.update(caller.user_id, id, req)).await?;
    Ok(Json(rule))
}

async fn delete_rule(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<StatusCode> {
    ctx.run(ctx.moderation.rules.delete(caller.user_id, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct FilterContentRequest {
    content_type: RuleScope,
    content_id: Option<i64>,
    text: String,
}

/// Evaluate text against the active rules; `null` when nothing triggers
async fn filter_content(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<FilterContentRequest>,
) -> ModResult<Json<Option<FilterVerdict>>> {
    let evaluation = ctx
        .run(ctx.moderation.rules.evaluate(
            caller.user_id,
            &req.text,
            req.content_type,
            req.content_id,
        ))
        .await?;
    Ok(Json(evaluation.map(|e| e.verdict)))
}

// ============================================================================
// Verdicts
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentVerdictsQuery {
    content_type: String,
    content_id: i64,
}

async fn list_content_verdicts(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ContentVerdictsQuery>,
) -> ModResult<Json<Vec<FilterVerdict>>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let scope = RuleScope::from_str(&query.content_type)?;
    let verdicts = ctx
        .run(ctx.moderation.verdicts.list_for_content(scope, query.content_id))
        .await?;
    Ok(Json(verdicts))
}

async fn get_verdict(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<FilterVerdict>> {
    let verdict = ctx.run(ctx.moderation.verdicts.get(id)).await?;
    if verdict.user_id != caller.user_id
        && !ctx.run(ctx.moderation.registry.is_moderator(caller.user_id)).await?
    {
        return Err(ModerationError::Forbidden(format!(
            "Not allowed to view filter result {}",
            id
        )));
    }
    Ok(Json(verdict))
}

#[derive(Deserialize)]
struct ReviewVerdictRequest {
    action: ModerationAction,
}

async fn review_verdict(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<ReviewVerdictRequest>,
) -> ModResult<Json<FilterVerdict>> {
    let verdict = ctx
        .run(ctx.moderation.verdicts.review(caller.user_id, id, req.action))
        .await?;
    Ok(Json(verdict))
}

async fn list_user_verdicts(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(user_id): Path<UserId>,
    Params(page): Params<PageQuery>,
) -> ModResult<Json<Page<FilterVerdict>>> {
    if user_id != caller.user_id {
        ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
            .await?;
    }
    let verdicts = ctx
        .run(ctx.moderation.verdicts.list_for_user(user_id, page.request()))
        .await?;
    Ok(Json(verdicts))
}

// ============================================================================
// Prohibited words
// ============================================================================

async fn add_word(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Payload(req): Payload<NewProhibitedWord>,
) -> ModResult<Json<ProhibitedWord>> {
    let word = ctx.run(ctx.moderation.words.add(caller.user_id, req)).await?;
    Ok(Json(word))
}

#[derive(Deserialize)]
struct ListWordsQuery {
    #[serde(default)]
    active_only: bool,
}

async fn list_words(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Params(query): Params<ListWordsQuery>,
) -> ModResult<Json<Vec<ProhibitedWord>>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let words = ctx.run(ctx.moderation.words.list(query.active_only)).await?;
    Ok(Json(words))
}

async fn get_word(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<Json<ProhibitedWord>> {
    ctx.run(ctx.moderation.registry.require_moderator(caller.user_id))
        .await?;
    let word = ctx.run(ctx.moderation.words.get(id)).await?;
    Ok(Json(word))
}

async fn update_word(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
    Payload(req): Payload<WordUpdate>,
) -> ModResult<Json<ProhibitedWord>> {
    let word = ctx.run(ctx.moderation.words.update(caller.user_id, id, req)).await?;
    Ok(Json(word))
}

async fn delete_word(
    State(ctx): State<AppContext>,
    caller: CallerContext,
    Path(id): Path<i64>,
) -> ModResult<StatusCode> {
    ctx.run(ctx.moderation.words.delete(caller.user_id, id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct FilterTextRequest {
    text: String,
}

async fn filter_text(
    State(ctx): State<AppContext>,
    _caller: CallerContext,
    Payload(req): Payload<FilterTextRequest>,
) -> ModResult<Json<FilterOutcome>> {
    let outcome = ctx.run(ctx.moderation.words.filter_text(&req.text)).await?;
    Ok(Json(outcome))
}

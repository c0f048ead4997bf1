/// Persisted filter verdicts and moderator review of them
use crate::{
    db::{parse_optional_timestamp, parse_timestamp, Page, PageRequest},
    error::{ModResult, ModerationError},
    moderation::{
        moderators::ModeratorRegistry,
        rules::RuleScope,
        types::{ModerationAction, UserId},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tracing::info;

/// Outcome of evaluating the rule catalog against one piece of text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterVerdict {
    pub id: i64,
    pub content_type: RuleScope,
    pub content_id: Option<i64>,
    pub user_id: UserId,
    pub content: String,
    pub triggered_rule_ids: Vec<i64>,
    pub action: ModerationAction,
    /// Fragments of the text that triggered rules, comma separated
    pub filtered_content: String,
    pub cleaned_content: String,
    pub automatically_processed: bool,
    pub moderator_id: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub(crate) struct NewVerdict<'a> {
    pub scope: RuleScope,
    pub content_id: Option<i64>,
    pub user_id: UserId,
    pub content: &'a str,
    pub triggered_rule_ids: Vec<i64>,
    pub action: ModerationAction,
    pub filtered_content: String,
    pub cleaned_content: String,
}

const VERDICT_COLUMNS: &str = "id, content_type, content_id, user_id, content, triggered_rules, action, \
     filtered_content, cleaned_content, automatically_processed, moderator_id, reviewed_at, created_at";

/// Filter verdict manager
#[derive(Clone)]
pub struct VerdictManager {
    db: SqlitePool,
    registry: ModeratorRegistry,
}

impl VerdictManager {
    pub fn new(db: SqlitePool, registry: ModeratorRegistry) -> Self {
        Self { db, registry }
    }

    /// Get a verdict by id
    pub async fn get(&self, id: i64) -> ModResult<FilterVerdict> {
        let mut conn = self.db.acquire().await?;
        get_in(&mut conn, id).await
    }

    /// All verdicts recorded for a content item, newest first
    pub async fn list_for_content(
        &self,
        scope: RuleScope,
        content_id: i64,
    ) -> ModResult<Vec<FilterVerdict>> {
        let sql = format!(
            "SELECT {} FROM filter_results WHERE content_type = ? AND content_id = ? \
             ORDER BY created_at DESC, id DESC",
            VERDICT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(scope.as_str())
            .bind(content_id)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(parse_verdict).collect()
    }

    /// Verdicts against a user's submissions, newest first
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        request: PageRequest,
    ) -> ModResult<Page<FilterVerdict>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM filter_results WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT {} FROM filter_results WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            VERDICT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_verdict).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }

    /// Moderator review: override the action and mark the verdict as manually processed
    pub async fn review(
        &self,
        caller: UserId,
        id: i64,
        action: ModerationAction,
    ) -> ModResult<FilterVerdict> {
        self.registry.require_moderator(caller).await?;

        let mut conn = self.db.acquire().await?;
        sync_action_in(&mut conn, id, action, caller).await?;
        let verdict = get_in(&mut conn, id).await?;

        info!("Filter verdict {} reviewed by {}: {}", id, caller, action);
        Ok(verdict)
    }
}

pub(crate) async fn insert_in(conn: &mut SqliteConnection, new: NewVerdict<'_>) -> ModResult<FilterVerdict> {
    let now = Utc::now();
    let triggered = serde_json::to_string(&new.triggered_rule_ids)
        .map_err(|e| ModerationError::Internal(format!("Failed to encode triggered rules: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO filter_results
        (content_type, content_id, user_id, content, triggered_rules, action,
         filtered_content, cleaned_content, automatically_processed, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(new.scope.as_str())
    .bind(new.content_id)
    .bind(new.user_id)
    .bind(new.content)
    .bind(&triggered)
    .bind(new.action.as_str())
    .bind(&new.filtered_content)
    .bind(&new.cleaned_content)
    .bind(now.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(FilterVerdict {
        id: result.last_insert_rowid(),
        content_type: new.scope,
        content_id: new.content_id,
        user_id: new.user_id,
        content: new.content.to_string(),
        triggered_rule_ids: new.triggered_rule_ids,
        action: new.action,
        filtered_content: new.filtered_content,
        cleaned_content: new.cleaned_content,
        automatically_processed: true,
        moderator_id: None,
        reviewed_at: None,
        created_at: now,
    })
}

/// Overwrite a verdict's action with a moderator decision
pub(crate) async fn sync_action_in(
    conn: &mut SqliteConnection,
    id: i64,
    action: ModerationAction,
    moderator: UserId,
) -> ModResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE filter_results
        SET action = ?, moderator_id = ?, reviewed_at = ?, automatically_processed = 0
        WHERE id = ?
        "#,
    )
    .bind(action.as_str())
    .bind(moderator)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ModerationError::NotFound(format!("Filter result {} not found", id)));
    }
    Ok(())
}

pub(crate) async fn get_in(conn: &mut SqliteConnection, id: i64) -> ModResult<FilterVerdict> {
    let sql = format!("SELECT {} FROM filter_results WHERE id = ?", VERDICT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("Filter result {} not found", id)))?;
    parse_verdict(row)
}

fn parse_verdict(row: SqliteRow) -> ModResult<FilterVerdict> {
    let scope: String = row.try_get("content_type")?;
    let action: String = row.try_get("action")?;
    let triggered: String = row.try_get("triggered_rules")?;

    Ok(FilterVerdict {
        id: row.try_get("id")?,
        content_type: RuleScope::from_str(&scope)?,
        content_id: row.try_get("content_id")?,
        user_id: row.try_get("user_id")?,
        content: row.try_get("content")?,
        triggered_rule_ids: serde_json::from_str(&triggered).map_err(|e| {
            ModerationError::Internal(format!("Corrupt triggered rule list: {}", e))
        })?,
        action: ModerationAction::from_str(&action)?,
        filtered_content: row.try_get("filtered_content")?,
        cleaned_content: row.try_get("cleaned_content")?,
        automatically_processed: row.try_get("automatically_processed")?,
        moderator_id: row.try_get("moderator_id")?,
        reviewed_at: parse_optional_timestamp(row.try_get("reviewed_at")?)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

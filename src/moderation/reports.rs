/// Content reports: intake, review workflow, evidence, comments and audit log
///
/// Every state-changing operation appends exactly one action log entry in
/// the same transaction as the change itself.
use crate::{
    db::{parse_optional_timestamp, parse_timestamp, settle_savepoint, Page, PageRequest},
    error::{ModResult, ModerationError},
    metrics,
    moderation::{
        content::ContentDirectory,
        moderators::{Capability, ModeratorRegistry},
        status,
        types::{require_text, ContentKind, ContentRef, UserId},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Connection, Row, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::info;

string_enum! {
    pub enum ReportCategory ("report category") {
        Spam => "spam",
        Harassment => "harassment",
        HateSpeech => "hate_speech",
        Violence => "violence",
        IllegalContent => "illegal_content",
        PrivacyViolation => "privacy_violation",
        Copyright => "copyright",
        Misinformation => "misinformation",
        Other => "other",
    }
}

string_enum! {
    /// Report workflow state
    pub enum ReportStatus ("report status") {
        Pending => "pending",
        InReview => "in_review",
        Resolved => "resolved",
        Rejected => "rejected",
    }
}

impl ReportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Resolved | ReportStatus::Rejected)
    }
}

string_enum! {
    /// Outcome recorded when a report is resolved
    pub enum Resolution ("resolution") {
        NoAction => "no_action",
        Warning => "warning",
        ContentRemoved => "content_removed",
        ContentEdited => "content_edited",
        UserSuspended => "user_suspended",
        UserBanned => "user_banned",
    }
}

impl Resolution {
    /// Capability needed beyond moderator status to record this outcome
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Resolution::NoAction | Resolution::Warning => None,
            Resolution::ContentRemoved => Some(Capability::DeleteContent),
            Resolution::ContentEdited => Some(Capability::EditContent),
            Resolution::UserSuspended | Resolution::UserBanned => Some(Capability::BanUsers),
        }
    }
}

string_enum! {
    /// Audit log action names
    pub enum ReportLogAction ("report log action") {
        Create => "create",
        Assign => "assign",
        UpdateStatus => "update_status",
        Resolve => "resolve",
        AddEvidence => "add_evidence",
        DeleteEvidence => "delete_evidence",
        AddComment => "add_comment",
        DeleteComment => "delete_comment",
        NotifyReporter => "notify_reporter",
    }
}

/// A content report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub reporter_id: UserId,
    pub target: ContentRef,
    pub category: ReportCategory,
    pub reason: String,
    pub additional_info: String,
    pub status: ReportStatus,
    pub assigned_to: Option<UserId>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolution: Option<Resolution>,
    pub resolution_notes: String,
    pub reporter_notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to file a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub target: ContentRef,
    pub category: ReportCategory,
    pub reason: String,
    #[serde(default)]
    pub additional_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: i64,
    pub report_id: i64,
    pub evidence_type: String,
    pub content: String,
    pub file_path: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvidence {
    pub evidence_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportComment {
    pub id: i64,
    pub report_id: i64,
    pub author_id: UserId,
    pub body: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry for a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub id: i64,
    pub report_id: i64,
    pub actor_id: UserId,
    pub action: ReportLogAction,
    pub old_value: String,
    pub new_value: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total: i64,
    pub pending: i64,
    pub in_review: i64,
    pub resolved: i64,
    pub rejected: i64,
}

const REPORT_COLUMNS: &str = "id, reporter_id, content_type, content_id, category, reason, additional_info, \
     status, assigned_to, reviewed_by, reviewed_at, resolution, resolution_notes, reporter_notified, \
     created_at, updated_at";

/// Report manager
#[derive(Clone)]
pub struct ReportManager {
    db: SqlitePool,
    registry: ModeratorRegistry,
    content: Arc<dyn ContentDirectory>,
}

impl ReportManager {
    pub fn new(db: SqlitePool, registry: ModeratorRegistry, content: Arc<dyn ContentDirectory>) -> Self {
        Self {
            db,
            registry,
            content,
        }
    }

    /// File a report against existing content
    pub async fn create(&self, reporter: UserId, new: NewReport) -> ModResult<Report> {
        require_text("reason", &new.reason)?;
        if !self.content.content_exists(new.target).await? {
            return Err(ModerationError::NotFound(format!("Content {} not found", new.target)));
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO content_reports
            (reporter_id, content_type, content_id, category, reason, additional_info,
             status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(reporter)
        .bind(new.target.kind.as_str())
        .bind(new.target.id)
        .bind(new.category.as_str())
        .bind(&new.reason)
        .bind(&new.additional_info)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        log_action(&mut tx, id, reporter, ReportLogAction::Create, "", ReportStatus::Pending.as_str()).await?;
        let mut savepoint = tx.begin().await?;
        let outcome = status::ensure_pending_in(&mut savepoint, new.target, "Content reported by user").await;
        settle_savepoint(savepoint, outcome, "Marking reported content pending").await?;
        let report = get_in(&mut tx, id).await?;
        tx.commit().await?;

        metrics::REPORTS_TOTAL.with_label_values(&[new.category.as_str()]).inc();
        info!("Report {} filed on {} by user {}: {}", id, new.target, reporter, new.category);
        Ok(report)
    }

    /// Reports filed by the caller, newest first
    pub async fn list_mine(&self, caller: UserId, request: PageRequest) -> ModResult<Page<Report>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_reports WHERE reporter_id = ?")
            .bind(caller)
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT {} FROM content_reports WHERE reporter_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            REPORT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(caller)
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_report).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }

    /// Get a report; readable by its reporter, its assignee and any moderator
    pub async fn get(&self, caller: UserId, id: i64) -> ModResult<Report> {
        let report = self.fetch(id).await?;
        self.check_access(caller, &report).await?;
        Ok(report)
    }

    /// Reports in a status, oldest first
    pub async fn list_by_status(
        &self,
        caller: UserId,
        status: ReportStatus,
        request: PageRequest,
    ) -> ModResult<Page<Report>> {
        self.registry.require_capability(caller, Capability::AccessDashboard).await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_reports WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT {} FROM content_reports WHERE status = ? \
             ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            REPORT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_report).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }

    /// Reports in a category and status, oldest first
    pub async fn list_by_category(
        &self,
        caller: UserId,
        category: ReportCategory,
        status: ReportStatus,
        request: PageRequest,
    ) -> ModResult<Page<Report>> {
        self.registry.require_capability(caller, Capability::AccessDashboard).await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM content_reports WHERE category = ? AND status = ?",
        )
        .bind(category.as_str())
        .bind(status.as_str())
        .fetch_one(&self.db)
        .await?;

        let sql = format!(
            "SELECT {} FROM content_reports WHERE category = ? AND status = ? \
             ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            REPORT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(category.as_str())
            .bind(status.as_str())
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_report).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }

    /// Report counts by status
    pub async fn stats(&self, caller: UserId) -> ModResult<ReportStats> {
        self.registry.require_capability(caller, Capability::AccessDashboard).await?;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'in_review' THEN 1 ELSE 0 END), 0) AS in_review,
                COALESCE(SUM(CASE WHEN status = 'resolved' THEN 1 ELSE 0 END), 0) AS resolved,
                COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected
            FROM content_reports
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        Ok(ReportStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            in_review: row.try_get("in_review")?,
            resolved: row.try_get("resolved")?,
            rejected: row.try_get("rejected")?,
        })
    }

    /// Assign a moderator; a pending report moves to in_review
    pub async fn assign(&self, caller: UserId, id: i64, assignee: UserId) -> ModResult<Report> {
        self.registry.require_moderator(caller).await?;
        if !self.registry.is_moderator(assignee).await? {
            return Err(ModerationError::InvalidArgument(format!(
                "User {} is not a moderator",
                assignee
            )));
        }

        let mut tx = self.db.begin().await?;
        let report = get_in(&mut tx, id).await?;
        if report.status.is_terminal() {
            return Err(ModerationError::Conflict(format!(
                "Report {} is already {}",
                id, report.status
            )));
        }

        sqlx::query(
            r#"
            UPDATE content_reports
            SET assigned_to = ?, status = 'in_review', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(assignee)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let old = report.assigned_to.map(|a| a.to_string()).unwrap_or_default();
        log_action(&mut tx, id, caller, ReportLogAction::Assign, &old, &assignee.to_string()).await?;
        let updated = get_in(&mut tx, id).await?;
        tx.commit().await?;

        info!("Report {} assigned to {} by {}", id, assignee, caller);
        Ok(updated)
    }

    /// Move a report forward without resolving it.
    ///
    /// Legal moves are pending to in_review, and pending or in_review to
    /// rejected. Resolution goes through `resolve`.
    pub async fn update_status(&self, caller: UserId, id: i64, next: ReportStatus) -> ModResult<Report> {
        self.registry.require_moderator(caller).await?;
        if next == ReportStatus::Resolved {
            return Err(ModerationError::InvalidArgument(
                "Use resolve to record a resolution".to_string(),
            ));
        }

        let mut tx = self.db.begin().await?;
        let report = get_in(&mut tx, id).await?;

        let legal = matches!(
            (report.status, next),
            (ReportStatus::Pending, ReportStatus::InReview)
                | (ReportStatus::Pending, ReportStatus::Rejected)
                | (ReportStatus::InReview, ReportStatus::Rejected)
        );
        if !legal {
            return Err(ModerationError::Conflict(format!(
                "Report {} cannot move from {} to {}",
                id, report.status, next
            )));
        }

        let now = Utc::now().to_rfc3339();
        let assignee = report.assigned_to.unwrap_or(caller);

        if next == ReportStatus::Rejected {
            sqlx::query(
                r#"
                UPDATE content_reports
                SET status = 'rejected', assigned_to = ?, reviewed_by = ?, reviewed_at = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(assignee)
            .bind(caller)
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE content_reports SET status = 'in_review', assigned_to = ?, updated_at = ? WHERE id = ?",
            )
            .bind(assignee)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        log_action(
            &mut tx,
            id,
            caller,
            ReportLogAction::UpdateStatus,
            report.status.as_str(),
            next.as_str(),
        )
        .await?;
        let updated = get_in(&mut tx, id).await?;
        tx.commit().await?;

        info!("Report {} moved to {} by {}", id, next, caller);
        Ok(updated)
    }

    /// Resolve a report under review
    pub async fn resolve(
        &self,
        caller: UserId,
        id: i64,
        resolution: Resolution,
        notes: &str,
    ) -> ModResult<Report> {
        match resolution.required_capability() {
            Some(capability) => self.registry.require_capability(caller, capability).await?,
            None => self.registry.require_moderator(caller).await?,
        }

        let mut tx = self.db.begin().await?;
        let report = get_in(&mut tx, id).await?;
        if report.status != ReportStatus::InReview {
            return Err(ModerationError::Conflict(format!(
                "Report {} must be in review to resolve, it is {}",
                id, report.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE content_reports
            SET status = 'resolved', resolution = ?, resolution_notes = ?,
                reviewed_by = ?, reviewed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(resolution.as_str())
        .bind(notes)
        .bind(caller)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        log_action(
            &mut tx,
            id,
            caller,
            ReportLogAction::Resolve,
            report.status.as_str(),
            &format!("{}:{}", ReportStatus::Resolved, resolution),
        )
        .await?;
        let updated = get_in(&mut tx, id).await?;
        tx.commit().await?;

        info!("Report {} resolved by {}: {}", id, caller, resolution);
        Ok(updated)
    }

    /// Record that the reporter has been told the outcome
    pub async fn mark_reporter_notified(&self, caller: UserId, id: i64) -> ModResult<Report> {
        self.registry.require_moderator(caller).await?;

        let mut tx = self.db.begin().await?;
        let report = get_in(&mut tx, id).await?;
        if report.reporter_notified {
            return Ok(report);
        }

        sqlx::query("UPDATE content_reports SET reporter_notified = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        log_action(&mut tx, id, caller, ReportLogAction::NotifyReporter, "false", "true").await?;
        let updated = get_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Attach evidence to a report
    pub async fn add_evidence(&self, caller: UserId, id: i64, new: NewEvidence) -> ModResult<Evidence> {
        require_text("evidence_type", &new.evidence_type)?;
        let report = self.fetch(id).await?;
        self.check_access(caller, &report).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO report_evidence (report_id, evidence_type, content, file_path, url, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&new.evidence_type)
        .bind(&new.content)
        .bind(&new.file_path)
        .bind(&new.url)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        let evidence_id = result.last_insert_rowid();

        log_action(&mut tx, id, caller, ReportLogAction::AddEvidence, "", &evidence_id.to_string()).await?;
        tx.commit().await?;

        Ok(Evidence {
            id: evidence_id,
            report_id: id,
            evidence_type: new.evidence_type,
            content: new.content,
            file_path: new.file_path,
            url: new.url,
            created_at: now,
        })
    }

    /// Evidence attached to a report, oldest first
    pub async fn list_evidence(&self, caller: UserId, id: i64) -> ModResult<Vec<Evidence>> {
        let report = self.fetch(id).await?;
        self.check_access(caller, &report).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, report_id, evidence_type, content, file_path, url, created_at
            FROM report_evidence
            WHERE report_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_evidence).collect()
    }

    /// Remove evidence from a report (moderators only)
    pub async fn delete_evidence(&self, caller: UserId, id: i64, evidence_id: i64) -> ModResult<()> {
        self.registry.require_moderator(caller).await?;

        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM report_evidence WHERE id = ? AND report_id = ?")
            .bind(evidence_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!(
                "Evidence {} not found on report {}",
                evidence_id, id
            )));
        }

        log_action(&mut tx, id, caller, ReportLogAction::DeleteEvidence, &evidence_id.to_string(), "").await?;
        tx.commit().await?;
        Ok(())
    }

    /// Comment on a report; only moderators may post internal comments
    pub async fn add_comment(
        &self,
        caller: UserId,
        id: i64,
        body: &str,
        is_internal: bool,
    ) -> ModResult<ReportComment> {
        require_text("body", body)?;
        let report = self.fetch(id).await?;
        self.check_access(caller, &report).await?;

        if is_internal && !self.registry.is_moderator(caller).await? {
            return Err(ModerationError::Unauthorized(
                "Only moderators can post internal comments".to_string(),
            ));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO report_comments (report_id, author_id, body, is_internal, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(caller)
        .bind(body)
        .bind(is_internal)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        let comment_id = result.last_insert_rowid();

        log_action(&mut tx, id, caller, ReportLogAction::AddComment, "", &comment_id.to_string()).await?;
        tx.commit().await?;

        Ok(ReportComment {
            id: comment_id,
            report_id: id,
            author_id: caller,
            body: body.to_string(),
            is_internal,
            created_at: now,
        })
    }

    /// Comments on a report, oldest first.
    ///
    /// Internal comments are included only when asked for and the caller is
    /// a moderator or the report's reviewer.
    pub async fn list_comments(
        &self,
        caller: UserId,
        id: i64,
        include_internal: bool,
    ) -> ModResult<Vec<ReportComment>> {
        let report = self.fetch(id).await?;
        self.check_access(caller, &report).await?;

        let show_internal = include_internal
            && (report.reviewed_by == Some(caller) || self.registry.is_moderator(caller).await?);

        let sql = if show_internal {
            "SELECT id, report_id, author_id, body, is_internal, created_at \
             FROM report_comments WHERE report_id = ? ORDER BY id ASC"
        } else {
            "SELECT id, report_id, author_id, body, is_internal, created_at \
             FROM report_comments WHERE report_id = ? AND is_internal = 0 ORDER BY id ASC"
        };
        let rows = sqlx::query(sql).bind(id).fetch_all(&self.db).await?;

        rows.into_iter().map(parse_comment).collect()
    }

    /// Delete a comment; its author or a moderator may do so
    pub async fn delete_comment(&self, caller: UserId, id: i64, comment_id: i64) -> ModResult<()> {
        let author: Option<i64> =
            sqlx::query_scalar("SELECT author_id FROM report_comments WHERE id = ? AND report_id = ?")
                .bind(comment_id)
                .bind(id)
                .fetch_optional(&self.db)
                .await?;

        let Some(author) = author else {
            return Err(ModerationError::NotFound(format!(
                "Comment {} not found on report {}",
                comment_id, id
            )));
        };

        if author != caller && !self.registry.is_moderator(caller).await? {
            return Err(ModerationError::Forbidden(format!(
                "Not allowed to delete comment {}",
                comment_id
            )));
        }

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM report_comments WHERE id = ?")
            .bind(comment_id)
            .execute(&mut *tx)
            .await?;
        log_action(&mut tx, id, caller, ReportLogAction::DeleteComment, &comment_id.to_string(), "").await?;
        tx.commit().await?;
        Ok(())
    }

    /// Audit log of a report, oldest first (moderators only)
    pub async fn action_logs(&self, caller: UserId, id: i64) -> ModResult<Vec<ActionLog>> {
        self.registry.require_moderator(caller).await?;
        self.fetch(id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, report_id, actor_id, action, old_value, new_value, created_at
            FROM report_action_logs
            WHERE report_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(parse_action_log).collect()
    }

    async fn fetch(&self, id: i64) -> ModResult<Report> {
        let mut conn = self.db.acquire().await?;
        get_in(&mut conn, id).await
    }

    async fn check_access(&self, caller: UserId, report: &Report) -> ModResult<()> {
        if report.reporter_id == caller
            || report.assigned_to == Some(caller)
            || self.registry.is_moderator(caller).await?
        {
            return Ok(());
        }
        Err(ModerationError::Forbidden(format!(
            "Not allowed to access report {}",
            report.id
        )))
    }
}

async fn log_action(
    conn: &mut SqliteConnection,
    report_id: i64,
    actor: UserId,
    action: ReportLogAction,
    old_value: &str,
    new_value: &str,
) -> ModResult<()> {
    sqlx::query(
        r#"
        INSERT INTO report_action_logs (report_id, actor_id, action, old_value, new_value, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(report_id)
    .bind(actor)
    .bind(action.as_str())
    .bind(old_value)
    .bind(new_value)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn get_in(conn: &mut SqliteConnection, id: i64) -> ModResult<Report> {
    let sql = format!("SELECT {} FROM content_reports WHERE id = ?", REPORT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("Report {} not found", id)))?;
    parse_report(row)
}

fn parse_report(row: SqliteRow) -> ModResult<Report> {
    let kind: String = row.try_get("content_type")?;
    let category: String = row.try_get("category")?;
    let status: String = row.try_get("status")?;
    let resolution: Option<String> = row.try_get("resolution")?;

    Ok(Report {
        id: row.try_get("id")?,
        reporter_id: row.try_get("reporter_id")?,
        target: ContentRef {
            kind: ContentKind::from_str(&kind)?,
            id: row.try_get("content_id")?,
        },
        category: ReportCategory::from_str(&category)?,
        reason: row.try_get("reason")?,
        additional_info: row.try_get("additional_info")?,
        status: ReportStatus::from_str(&status)?,
        assigned_to: row.try_get("assigned_to")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: parse_optional_timestamp(row.try_get("reviewed_at")?)?,
        resolution: resolution.as_deref().map(Resolution::from_str).transpose()?,
        resolution_notes: row.try_get("resolution_notes")?,
        reporter_notified: row.try_get("reporter_notified")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn parse_evidence(row: SqliteRow) -> ModResult<Evidence> {
    Ok(Evidence {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        evidence_type: row.try_get("evidence_type")?,
        content: row.try_get("content")?,
        file_path: row.try_get("file_path")?,
        url: row.try_get("url")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn parse_comment(row: SqliteRow) -> ModResult<ReportComment> {
    Ok(ReportComment {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        author_id: row.try_get("author_id")?,
        body: row.try_get("body")?,
        is_internal: row.try_get("is_internal")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn parse_action_log(row: SqliteRow) -> ModResult<ActionLog> {
    let action: String = row.try_get("action")?;
    Ok(ActionLog {
        id: row.try_get("id")?,
        report_id: row.try_get("report_id")?,
        actor_id: row.try_get("actor_id")?,
        action: ReportLogAction::from_str(&action)?,
        old_value: row.try_get("old_value")?,
        new_value: row.try_get("new_value")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::connect_in_memory,
        moderation::{content::SqliteContentDirectory, moderators::ModeratorCapabilities},
    };

    const MODERATOR: UserId = 1;
    const REPORTER: UserId = 20;
    const STRANGER: UserId = 30;

    async fn setup() -> ReportManager {
        let db = connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO comments (id, user_id, body) VALUES (101, 9, 'buy now')")
            .execute(&db)
            .await
            .unwrap();

        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins([MODERATOR]);
        let content = Arc::new(SqliteContentDirectory::new(db.clone()));
        ReportManager::new(db, registry, content)
    }

    fn spam_report() -> NewReport {
        NewReport {
            target: ContentRef::comment(101).unwrap(),
            category: ReportCategory::Spam,
            reason: "link farm".to_string(),
            additional_info: String::new(),
        }
    }

    #[tokio::test]
    async fn test_report_lifecycle_logs_every_step() {
        let manager = setup().await;
        let report = manager.create(REPORTER, spam_report()).await.unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert!(report.assigned_to.is_none());

        let assigned = manager.assign(MODERATOR, report.id, MODERATOR).await.unwrap();
        assert_eq!(assigned.status, ReportStatus::InReview);
        assert_eq!(assigned.assigned_to, Some(MODERATOR));

        let resolved = manager
            .resolve(MODERATOR, report.id, Resolution::ContentRemoved, "removed")
            .await
            .unwrap();
        assert_eq!(resolved.status, ReportStatus::Resolved);
        assert_eq!(resolved.resolution, Some(Resolution::ContentRemoved));
        assert_eq!(resolved.reviewed_by, Some(MODERATOR));
        assert!(resolved.reviewed_at.is_some());

        let logs = manager.action_logs(MODERATOR, report.id).await.unwrap();
        let actions: Vec<_> = logs.iter().map(|l| l.action).collect();
        assert_eq!(
            actions,
            vec![
                ReportLogAction::Create,
                ReportLogAction::Assign,
                ReportLogAction::Resolve
            ]
        );
        assert_eq!(logs[1].new_value, MODERATOR.to_string());
        assert_eq!(logs[2].old_value, "in_review");
        assert_eq!(logs[2].new_value, "resolved:content_removed");
    }

    #[tokio::test]
    async fn test_terminal_reports_do_not_move() {
        let manager = setup().await;
        let report = manager.create(REPORTER, spam_report()).await.unwrap();

        let rejected = manager
            .update_status(MODERATOR, report.id, ReportStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(rejected.status, ReportStatus::Rejected);
        assert_eq!(rejected.assigned_to, Some(MODERATOR));
        assert_eq!(rejected.reviewed_by, Some(MODERATOR));
        assert!(rejected.resolution.is_none());

        for next in [ReportStatus::InReview, ReportStatus::Pending, ReportStatus::Rejected] {
            let result = manager.update_status(MODERATOR, report.id, next).await;
            assert!(matches!(result, Err(ModerationError::Conflict(_))));
        }
        assert!(matches!(
            manager.assign(MODERATOR, report.id, MODERATOR).await,
            Err(ModerationError::Conflict(_))
        ));
        assert!(matches!(
            manager.resolve(MODERATOR, report.id, Resolution::NoAction, "").await,
            Err(ModerationError::Conflict(_))
        ));
        assert!(matches!(
            manager.update_status(MODERATOR, report.id, ReportStatus::Resolved).await,
            Err(ModerationError::InvalidArgument(_))
        ));

        // Failed transitions leave no log entries
        assert_eq!(manager.action_logs(MODERATOR, report.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_requires_review() {
        let manager = setup().await;
        let report = manager.create(REPORTER, spam_report()).await.unwrap();
        let result = manager.resolve(MODERATOR, report.id, Resolution::Warning, "").await;
        assert!(matches!(result, Err(ModerationError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_access_control() {
        let manager = setup().await;
        let report = manager.create(REPORTER, spam_report()).await.unwrap();

        assert!(manager.get(REPORTER, report.id).await.is_ok());
        assert!(manager.get(MODERATOR, report.id).await.is_ok());
        assert!(matches!(
            manager.get(STRANGER, report.id).await,
            Err(ModerationError::Forbidden(_))
        ));
        assert!(matches!(
            manager.list_evidence(STRANGER, report.id).await,
            Err(ModerationError::Forbidden(_))
        ));
        assert!(matches!(
            manager.stats(REPORTER).await,
            Err(ModerationError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_internal_comments_hidden_from_reporter() {
        let manager = setup().await;
        let report = manager.create(REPORTER, spam_report()).await.unwrap();

        manager.add_comment(REPORTER, report.id, "please look", false).await.unwrap();
        manager.add_comment(MODERATOR, report.id, "repeat offender", true).await.unwrap();

        assert!(matches!(
            manager.add_comment(REPORTER, report.id, "sneaky", true).await,
            Err(ModerationError::Unauthorized(_))
        ));

        let reporter_view = manager.list_comments(REPORTER, report.id, true).await.unwrap();
        assert_eq!(reporter_view.len(), 1);
        assert!(reporter_view.iter().all(|c| !c.is_internal));

        let moderator_view = manager.list_comments(MODERATOR, report.id, true).await.unwrap();
        assert_eq!(moderator_view.len(), 2);

        let moderator_public = manager.list_comments(MODERATOR, report.id, false).await.unwrap();
        assert_eq!(moderator_public.len(), 1);
    }

    #[tokio::test]
    async fn test_evidence_and_stats() {
        let manager = setup().await;
        let report = manager.create(REPORTER, spam_report()).await.unwrap();
        manager.create(REPORTER, spam_report()).await.unwrap();

        let evidence = manager
            .add_evidence(
                REPORTER,
                report.id,
                NewEvidence {
                    evidence_type: "screenshot".to_string(),
                    content: String::new(),
                    file_path: String::new(),
                    url: "https://example.org/shot.png".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(manager.list_evidence(REPORTER, report.id).await.unwrap().len(), 1);

        manager.delete_evidence(MODERATOR, report.id, evidence.id).await.unwrap();
        assert!(manager.list_evidence(REPORTER, report.id).await.unwrap().is_empty());

        manager.assign(MODERATOR, report.id, MODERATOR).await.unwrap();
        let stats = manager.stats(MODERATOR).await.unwrap();
        assert_eq!(
            stats,
            ReportStats {
                total: 2,
                pending: 1,
                in_review: 1,
                resolved: 0,
                rejected: 0,
            }
        );

        let mine = manager.list_mine(REPORTER, PageRequest::default()).await.unwrap();
        assert_eq!(mine.total, 2);

        let spam_pending = manager
            .list_by_category(MODERATOR, ReportCategory::Spam, ReportStatus::Pending, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(spam_pending.total, 1);
    }

    #[tokio::test]
    async fn test_mark_reporter_notified() {
        let manager = setup().await;
        let report = manager.create(REPORTER, spam_report()).await.unwrap();

        let notified = manager.mark_reporter_notified(MODERATOR, report.id).await.unwrap();
        assert!(notified.reporter_notified);
        manager.mark_reporter_notified(MODERATOR, report.id).await.unwrap();

        let logs = manager.action_logs(MODERATOR, report.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].action, ReportLogAction::NotifyReporter);
    }

    #[tokio::test]
    async fn test_resolution_requires_matching_capability() {
        let manager = setup().await;
        manager
            .registry
            .grant(
                MODERATOR,
                40,
                ModeratorCapabilities::from_granted(&[Capability::EditContent]),
            )
            .await
            .unwrap();
        let report = manager.create(REPORTER, spam_report()).await.unwrap();
        manager.assign(40, report.id, 40).await.unwrap();

        for resolution in [Resolution::UserBanned, Resolution::UserSuspended, Resolution::ContentRemoved] {
            let denied = manager.resolve(40, report.id, resolution, "").await;
            assert!(matches!(denied, Err(ModerationError::Unauthorized(_))));
        }
        let unchanged = manager.get(MODERATOR, report.id).await.unwrap();
        assert_eq!(unchanged.status, ReportStatus::InReview);
        assert!(unchanged.resolution.is_none());

        let edited = manager
            .resolve(40, report.id, Resolution::ContentEdited, "trimmed the links")
            .await
            .unwrap();
        assert_eq!(edited.resolution, Some(Resolution::ContentEdited));

        // Stats and backlog lists are dashboard views
        assert!(matches!(manager.stats(40).await, Err(ModerationError::Unauthorized(_))));
        assert!(matches!(
            manager
                .list_by_status(40, ReportStatus::Pending, PageRequest::default())
                .await,
            Err(ModerationError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_report_survives_failed_status_update() {
        let manager = setup().await;
        sqlx::query("DROP TABLE moderation_status")
            .execute(&manager.db)
            .await
            .unwrap();

        let report = manager.create(REPORTER, spam_report()).await.unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        let logs = manager.action_logs(MODERATOR, report.id).await.unwrap();
        assert_eq!(logs.len(), 1);
    }
}

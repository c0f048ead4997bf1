/// Prioritized human review queue
use crate::{
    db::{parse_optional_timestamp, parse_timestamp, settle_savepoint, Page, PageRequest},
    error::{ModResult, ModerationError},
    metrics,
    moderation::{
        moderators::{Capability, ModeratorRegistry},
        status::{self, ContentStatus},
        trust::{self, TrustCounter},
        types::{ContentKind, ContentRef, ModerationAction, UserId},
        verdicts,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Connection, Row, SqliteConnection, SqlitePool};
use tracing::info;

string_enum! {
    pub enum QueueStatus ("queue status") {
        Pending => "pending",
        InReview => "in_review",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Approved | QueueStatus::Rejected)
    }

    /// Parse a list filter where `all` means no filter
    pub fn parse_filter(s: &str) -> ModResult<Option<QueueStatus>> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(None);
        }
        QueueStatus::from_str(s).map(Some)
    }
}

string_enum! {
    /// Moderator decision on a queue item
    pub enum QueueDecision ("queue decision") {
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl QueueDecision {
    pub fn status(&self) -> QueueStatus {
        match self {
            QueueDecision::Approved => QueueStatus::Approved,
            QueueDecision::Rejected => QueueStatus::Rejected,
        }
    }

    pub fn content_status(&self) -> ContentStatus {
        match self {
            QueueDecision::Approved => ContentStatus::Approved,
            QueueDecision::Rejected => ContentStatus::Rejected,
        }
    }

    pub fn action(&self) -> ModerationAction {
        match self {
            QueueDecision::Approved => ModerationAction::Approve,
            QueueDecision::Rejected => ModerationAction::Reject,
        }
    }

    pub fn required_capability(&self) -> Capability {
        match self {
            QueueDecision::Approved => Capability::ApproveContent,
            QueueDecision::Rejected => Capability::RejectContent,
        }
    }
}

/// Queue priority, 1 (lowest) to 5 (highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(i64);

impl Priority {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 5;
    pub const DEFAULT: Priority = Priority(3);

    /// Validate an explicit priority
    pub fn new(value: i64) -> ModResult<Self> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(ModerationError::InvalidArgument(format!(
                "Priority must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )));
        }
        Ok(Self(value))
    }

    /// Clamp a derived priority into range
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    /// Priority for a verdict of the given rule severity: ceil(severity / 2)
    pub fn from_severity(severity: i64) -> Self {
        Self::clamped((severity + 1).div_euclid(2))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<i64> for Priority {
    type Error = ModerationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> i64 {
        priority.0
    }
}

/// A unit of human moderation work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub target: ContentRef,
    pub submitter_id: UserId,
    pub reason: String,
    pub filter_result_id: Option<i64>,
    pub status: QueueStatus,
    pub priority: Priority,
    pub assigned_to: Option<UserId>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub decision: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to enqueue a content item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub target: ContentRef,
    pub submitter_id: UserId,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub filter_result_id: Option<i64>,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub in_review: i64,
    pub approved: i64,
    pub rejected: i64,
}

const QUEUE_COLUMNS: &str = "id, content_type, content_id, submitter_id, reason, filter_result_id, status, \
     priority, assigned_to, reviewed_by, reviewed_at, decision, notes, created_at, updated_at";

/// Review queue manager
#[derive(Clone)]
pub struct ReviewQueue {
    db: SqlitePool,
    registry: ModeratorRegistry,
}

impl ReviewQueue {
    pub fn new(db: SqlitePool, registry: ModeratorRegistry) -> Self {
        Self { db, registry }
    }

    /// Enqueue content for review; returns the existing pending item if there is one
    pub async fn add(&self, caller: UserId, new: NewQueueItem) -> ModResult<QueueItem> {
        self.registry.require_moderator(caller).await?;

        let mut conn = self.db.acquire().await?;
        let (item, created) = add_in(&mut conn, &new).await?;
        if created {
            info!("Queued {} for review by {}", item.target, caller);
        }
        Ok(item)
    }

    /// Get a queue item
    pub async fn get(&self, caller: UserId, id: i64) -> ModResult<QueueItem> {
        self.registry.require_moderator(caller).await?;
        let mut conn = self.db.acquire().await?;
        get_in(&mut conn, id).await
    }

    /// List items by status (`None` for all), highest priority first, then oldest first
    pub async fn list(
        &self,
        caller: UserId,
        status: Option<QueueStatus>,
        request: PageRequest,
    ) -> ModResult<Page<QueueItem>> {
        self.registry.require_capability(caller, Capability::AccessDashboard).await?;

        let filter = if status.is_some() { "WHERE status = ?" } else { "" };

        let count_sql = format!("SELECT COUNT(*) FROM review_queue {}", filter);
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(status) = status {
            count = count.bind(status.as_str());
        }
        let total = count.fetch_one(&self.db).await?;

        let sql = format!(
            "SELECT {} FROM review_queue {} \
             ORDER BY priority DESC, created_at ASC, id ASC LIMIT ? OFFSET ?",
            QUEUE_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_item).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }

    /// Assign an item to a moderator; a pending item moves to in_review
    pub async fn assign(&self, caller: UserId, id: i64, assignee: UserId) -> ModResult<QueueItem> {
        self.registry.require_moderator(caller).await?;
        if !self.registry.is_moderator(assignee).await? {
            return Err(ModerationError::InvalidArgument(format!(
                "User {} is not a moderator",
                assignee
            )));
        }

        let mut tx = self.db.begin().await?;
        let item = get_in(&mut tx, id).await?;
        if item.status.is_terminal() {
            return Err(ModerationError::Conflict(format!(
                "Queue item {} is already {}",
                id, item.status
            )));
        }

        sqlx::query(
            r#"
            UPDATE review_queue
            SET assigned_to = ?, status = 'in_review', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(assignee)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let updated = get_in(&mut tx, id).await?;
        tx.commit().await?;

        info!("Queue item {} assigned to {} by {}", id, assignee, caller);
        Ok(updated)
    }

    /// Resolve an open item.
    ///
    /// The item and its filter verdict are updated atomically. The trust
    /// penalty for a rejection and the content status sync run as
    /// savepoints whose failure is logged without undoing the decision.
    pub async fn resolve(
        &self,
        caller: UserId,
        id: i64,
        decision: QueueDecision,
        notes: &str,
    ) -> ModResult<QueueItem> {
        self.registry
            .require_capability(caller, decision.required_capability())
            .await?;

        let mut tx = self.db.begin().await?;
        let item = get_in(&mut tx, id).await?;
        if item.status.is_terminal() {
            return Err(ModerationError::Conflict(format!(
                "Queue item {} is already {}",
                id, item.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE review_queue
            SET status = ?, reviewed_by = ?, reviewed_at = ?, decision = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(decision.status().as_str())
        .bind(caller)
        .bind(&now)
        .bind(decision.as_str())
        .bind(notes)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if let Some(verdict_id) = item.filter_result_id {
            verdicts::sync_action_in(&mut tx, verdict_id, decision.action(), caller).await?;
        }

        if decision == QueueDecision::Rejected {
            let mut savepoint = tx.begin().await?;
            let outcome = trust::record_in(&mut savepoint, item.submitter_id, TrustCounter::ContentRejection).await;
            settle_savepoint(savepoint, outcome, "Trust update after rejection").await?;
        }

        let mut savepoint = tx.begin().await?;
        let reason = format!("Review queue decision: {}", decision);
        let outcome = status::upsert_in(
            &mut savepoint,
            item.target,
            decision.content_status(),
            Some(caller),
            &reason,
            notes,
        )
        .await;
        settle_savepoint(savepoint, outcome, "Content status sync after queue decision").await?;

        let updated = get_in(&mut tx, id).await?;
        tx.commit().await?;

        metrics::QUEUE_RESOLUTIONS_TOTAL
            .with_label_values(&[decision.as_str()])
            .inc();
        info!("Queue item {} resolved by {}: {}", id, caller, decision);
        Ok(updated)
    }

    /// Item counts by status in one aggregate read
    pub async fn stats(&self, caller: UserId) -> ModResult<QueueStats> {
        self.registry.require_capability(caller, Capability::AccessDashboard).await?;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN status = 'in_review' THEN 1 ELSE 0 END), 0) AS in_review,
                COALESCE(SUM(CASE WHEN status = 'approved' THEN 1 ELSE 0 END), 0) AS approved,
                COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected
            FROM review_queue
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        Ok(QueueStats {
            total: row.try_get("total")?,
            pending: row.try_get("pending")?,
            in_review: row.try_get("in_review")?,
            approved: row.try_get("approved")?,
            rejected: row.try_get("rejected")?,
        })
    }
}

/// Insert a pending item unless the target already has one.
///
/// The partial unique index on pending targets makes concurrent adds
/// collapse to a single row. Returns the pending item and whether it was
/// created by this call.
pub(crate) async fn add_in(conn: &mut SqliteConnection, new: &NewQueueItem) -> ModResult<(QueueItem, bool)> {
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO review_queue
        (content_type, content_id, submitter_id, reason, filter_result_id, status, priority, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(new.target.kind.as_str())
    .bind(new.target.id)
    .bind(new.submitter_id)
    .bind(&new.reason)
    .bind(new.filter_result_id)
    .bind(new.priority.value())
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let sql = format!(
        "SELECT {} FROM review_queue WHERE content_type = ? AND content_id = ? AND status = 'pending'",
        QUEUE_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(new.target.kind.as_str())
        .bind(new.target.id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            ModerationError::Internal(format!("Pending queue item for {} vanished", new.target))
        })?;

    Ok((parse_item(row)?, result.rows_affected() > 0))
}

async fn get_in(conn: &mut SqliteConnection, id: i64) -> ModResult<QueueItem> {
    let sql = format!("SELECT {} FROM review_queue WHERE id = ?", QUEUE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("Queue item {} not found", id)))?;
    parse_item(row)
}

fn parse_item(row: SqliteRow) -> ModResult<QueueItem> {
    let kind: String = row.try_get("content_type")?;
    let status: String = row.try_get("status")?;

    Ok(QueueItem {
        id: row.try_get("id")?,
        target: ContentRef {
            kind: ContentKind::from_str(&kind)?,
            id: row.try_get("content_id")?,
        },
        submitter_id: row.try_get("submitter_id")?,
        reason: row.try_get("reason")?,
        filter_result_id: row.try_get("filter_result_id")?,
        status: QueueStatus::from_str(&status)?,
        priority: Priority::clamped(row.try_get("priority")?),
        assigned_to: row.try_get("assigned_to")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: parse_optional_timestamp(row.try_get("reviewed_at")?)?,
        decision: row.try_get("decision")?,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::connect_in_memory,
        moderation::{
            moderators::{CapabilityUpdate, ModeratorCapabilities},
            status::StatusManager,
            trust::TrustEngine,
        },
    };

    const MODERATOR: UserId = 1;

    async fn setup() -> (SqlitePool, ReviewQueue) {
        let db = connect_in_memory().await.unwrap();
        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins([MODERATOR]);
        (db.clone(), ReviewQueue::new(db, registry))
    }

    fn item(id: i64, priority: i64) -> NewQueueItem {
        NewQueueItem {
            target: ContentRef::comment(id).unwrap(),
            submitter_id: 9,
            reason: "filter".to_string(),
            filter_result_id: None,
            priority: Priority::new(priority).unwrap(),
        }
    }

    #[test]
    fn test_priority_bounds() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(6).is_err());
        assert_eq!(Priority::clamped(9).value(), 5);
        assert_eq!(Priority::clamped(-2).value(), 1);
        assert_eq!(Priority::from_severity(1).value(), 1);
        assert_eq!(Priority::from_severity(5).value(), 3);
        assert_eq!(Priority::from_severity(10).value(), 5);
        assert!(serde_json::from_str::<Priority>("7").is_err());
        assert_eq!(serde_json::from_str::<Priority>("4").unwrap().value(), 4);
    }

    #[tokio::test]
    async fn test_add_is_idempotent_per_pending_target() {
        let (_db, queue) = setup().await;

        let first = queue.add(MODERATOR, item(101, 3)).await.unwrap();
        let second = queue.add(MODERATOR, item(101, 5)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.priority.value(), 3);

        let stats = queue.stats(MODERATOR).await.unwrap();
        assert_eq!(stats.pending, 1);

        // A resolved target can be queued again
        queue.resolve(MODERATOR, first.id, QueueDecision::Approved, "").await.unwrap();
        let third = queue.add(MODERATOR, item(101, 3)).await.unwrap();
        assert_ne!(third.id, first.id);
    }

    #[tokio::test]
    async fn test_list_orders_by_priority_then_age() {
        let (_db, queue) = setup().await;
        let low = queue.add(MODERATOR, item(1, 2)).await.unwrap();
        let high = queue.add(MODERATOR, item(2, 5)).await.unwrap();
        let low_later = queue.add(MODERATOR, item(3, 2)).await.unwrap();

        let page = queue.list(MODERATOR, None, PageRequest::default()).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![high.id, low.id, low_later.id]);

        queue.assign(MODERATOR, low.id, MODERATOR).await.unwrap();
        let pending = queue
            .list(MODERATOR, Some(QueueStatus::Pending), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(pending.total, 2);
    }

    #[tokio::test]
    async fn test_assign_then_reject_updates_trust_and_status() {
        let (db, queue) = setup().await;
        let added = queue.add(MODERATOR, item(101, 3)).await.unwrap();

        let assigned = queue.assign(MODERATOR, added.id, MODERATOR).await.unwrap();
        assert_eq!(assigned.status, QueueStatus::InReview);
        assert_eq!(assigned.assigned_to, Some(MODERATOR));

        let resolved = queue
            .resolve(MODERATOR, added.id, QueueDecision::Rejected, "off-platform ads")
            .await
            .unwrap();
        assert_eq!(resolved.status, QueueStatus::Rejected);
        assert_eq!(resolved.reviewed_by, Some(MODERATOR));
        assert!(resolved.reviewed_at.is_some());
        assert_eq!(resolved.decision, "rejected");

        let trust = TrustEngine::new(db.clone()).get(9).await.unwrap();
        assert_eq!(trust.content_rejections, 1);

        let status = StatusManager::new(db.clone(), ModeratorRegistry::new(db))
            .get(ContentRef::comment(101).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.status, ContentStatus::Rejected);

        let again = queue.resolve(MODERATOR, added.id, QueueDecision::Approved, "").await;
        assert!(matches!(again, Err(ModerationError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_resolve_requires_moderator() {
        let (_db, queue) = setup().await;
        let added = queue.add(MODERATOR, item(101, 3)).await.unwrap();
        let result = queue.resolve(9, added.id, QueueDecision::Approved, "").await;
        assert!(matches!(result, Err(ModerationError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_resolve_requires_decision_capability() {
        let (_db, queue) = setup().await;
        queue
            .registry
            .grant(MODERATOR, 20, ModeratorCapabilities::from_granted(&[Capability::ApproveContent]))
            .await
            .unwrap();
        let first = queue.add(MODERATOR, item(201, 3)).await.unwrap();
        let second = queue.add(MODERATOR, item(202, 3)).await.unwrap();

        let denied = queue.resolve(20, first.id, QueueDecision::Rejected, "").await;
        assert!(matches!(denied, Err(ModerationError::Unauthorized(_))));
        assert_eq!(queue.get(MODERATOR, first.id).await.unwrap().status, QueueStatus::Pending);

        let approved = queue.resolve(20, second.id, QueueDecision::Approved, "").await.unwrap();
        assert_eq!(approved.status, QueueStatus::Approved);
    }

    #[tokio::test]
    async fn test_dashboard_views_require_access_dashboard() {
        let (_db, queue) = setup().await;
        queue
            .registry
            .grant(MODERATOR, 21, ModeratorCapabilities::from_granted(&[Capability::RejectContent]))
            .await
            .unwrap();

        assert!(matches!(queue.stats(21).await, Err(ModerationError::Unauthorized(_))));
        assert!(matches!(
            queue.list(21, None, PageRequest::default()).await,
            Err(ModerationError::Unauthorized(_))
        ));

        queue
            .registry
            .update(
                MODERATOR,
                21,
                CapabilityUpdate {
                    access_dashboard: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(queue.stats(21).await.unwrap().total, 0);
    }
}

/// Per-content moderation status tracking
use crate::{
    db::{parse_timestamp, Page, PageRequest},
    error::{ModResult, ModerationError},
    moderation::{
        moderators::{Capability, ModeratorRegistry},
        types::{ContentKind, ContentRef, UserId},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tracing::info;

string_enum! {
    /// Visibility state of a content item
    pub enum ContentStatus ("moderation status") {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Hidden => "hidden",
    }
}

impl ContentStatus {
    /// Capability a moderator needs to move content into this status
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            ContentStatus::Pending => None,
            ContentStatus::Approved => Some(Capability::ApproveContent),
            ContentStatus::Rejected => Some(Capability::RejectContent),
            ContentStatus::Hidden => Some(Capability::DeleteContent),
        }
    }
}

/// Authoritative moderation state of one content item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationStatus {
    pub id: i64,
    pub target: ContentRef,
    pub status: ContentStatus,
    pub moderator_id: Option<UserId>,
    pub reason: String,
    pub notes: String,
    pub user_notified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who is looking at the content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Public,
    Author,
    Moderator,
}

/// What a reader gets to see
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "visibility", content = "reason", rename_all = "snake_case")]
pub enum Visibility {
    Show,
    ShowWithCaveat(String),
    Hidden,
}

/// Apply the visibility policy for a status and viewer
pub fn visibility(status: Option<&ModerationStatus>, viewer: Viewer) -> Visibility {
    let Some(status) = status else {
        return Visibility::Show;
    };

    match (status.status, viewer) {
        (_, Viewer::Moderator) => Visibility::Show,
        (ContentStatus::Approved, _) => Visibility::Show,
        (ContentStatus::Pending, Viewer::Author) => {
            Visibility::ShowWithCaveat("Awaiting moderation".to_string())
        }
        (ContentStatus::Pending, Viewer::Public) => Visibility::Show,
        (ContentStatus::Rejected, Viewer::Author) => {
            Visibility::ShowWithCaveat(format!("Rejected: {}", status.reason))
        }
        (ContentStatus::Rejected, Viewer::Public) => Visibility::Hidden,
        (ContentStatus::Hidden, _) => Visibility::Hidden,
    }
}

const STATUS_COLUMNS: &str = "id, content_type, content_id, status, moderator_id, reason, notes, \
     user_notified, created_at, updated_at";

/// Moderation status manager
#[derive(Clone)]
pub struct StatusManager {
    db: SqlitePool,
    registry: ModeratorRegistry,
}

impl StatusManager {
    pub fn new(db: SqlitePool, registry: ModeratorRegistry) -> Self {
        Self { db, registry }
    }

    /// Create or update the status of a content item
    pub async fn upsert(
        &self,
        caller: UserId,
        target: ContentRef,
        status: ContentStatus,
        reason: &str,
        notes: &str,
    ) -> ModResult<ModerationStatus> {
        match status.required_capability() {
            Some(capability) => self.registry.require_capability(caller, capability).await?,
            None => self.registry.require_moderator(caller).await?,
        }

        let mut conn = self.db.acquire().await?;
        let record = upsert_in(&mut conn, target, status, Some(caller), reason, notes).await?;

        info!("Moderation status of {} set to {} by {}", target, status, caller);
        Ok(record)
    }

    /// Get the status of a content item
    pub async fn get(&self, target: ContentRef) -> ModResult<Option<ModerationStatus>> {
        let mut conn = self.db.acquire().await?;
        get_in(&mut conn, target).await
    }

    /// Record that the author has been told about the current status
    pub async fn mark_user_notified(&self, caller: UserId, target: ContentRef) -> ModResult<()> {
        self.registry.require_moderator(caller).await?;

        let result = sqlx::query(
            r#"
            UPDATE moderation_status
            SET user_notified = 1, updated_at = ?
            WHERE content_type = ? AND content_id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(target.kind.as_str())
        .bind(target.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!(
                "No moderation status for {}",
                target
            )));
        }
        Ok(())
    }

    /// Number of content items awaiting moderation
    pub async fn pending_count(&self) -> ModResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM moderation_status WHERE status = 'pending'")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    /// List content in a given status, most recently updated first
    pub async fn list_by_status(
        &self,
        status: ContentStatus,
        request: PageRequest,
    ) -> ModResult<Page<ModerationStatus>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM moderation_status WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT {} FROM moderation_status WHERE status = ? \
             ORDER BY updated_at DESC, id DESC LIMIT ? OFFSET ?",
            STATUS_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_status).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }
}

/// Insert a pending status unless one exists; returns the current row either way
pub(crate) async fn ensure_pending_in(
    conn: &mut SqliteConnection,
    target: ContentRef,
    reason: &str,
) -> ModResult<ModerationStatus> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO moderation_status (content_type, content_id, status, reason, created_at, updated_at)
        VALUES (?, ?, 'pending', ?, ?, ?)
        ON CONFLICT(content_type, content_id) DO NOTHING
        "#,
    )
    .bind(target.kind.as_str())
    .bind(target.id)
    .bind(reason)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    get_in(conn, target)
        .await?
        .ok_or_else(|| ModerationError::Internal(format!("Status row for {} vanished", target)))
}

/// Upsert the single status row for a target
pub(crate) async fn upsert_in(
    conn: &mut SqliteConnection,
    target: ContentRef,
    status: ContentStatus,
    moderator: Option<UserId>,
    reason: &str,
    notes: &str,
) -> ModResult<ModerationStatus> {
    let now = Utc::now().to_rfc3339();

    // A status change means the author has not heard about it yet
    sqlx::query(
        r#"
        INSERT INTO moderation_status
        (content_type, content_id, status, moderator_id, reason, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(content_type, content_id) DO UPDATE SET
            user_notified = CASE
                WHEN moderation_status.status = excluded.status THEN moderation_status.user_notified
                ELSE 0
            END,
            status = excluded.status,
            moderator_id = excluded.moderator_id,
            reason = excluded.reason,
            notes = excluded.notes,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(target.kind.as_str())
    .bind(target.id)
    .bind(status.as_str())
    .bind(moderator)
    .bind(reason)
    .bind(notes)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    get_in(conn, target)
        .await?
        .ok_or_else(|| ModerationError::Internal(format!("Status row for {} vanished", target)))
}

pub(crate) async fn get_in(
    conn: &mut SqliteConnection,
    target: ContentRef,
) -> ModResult<Option<ModerationStatus>> {
    let sql = format!(
        "SELECT {} FROM moderation_status WHERE content_type = ? AND content_id = ?",
        STATUS_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(target.kind.as_str())
        .bind(target.id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(parse_status).transpose()
}

fn parse_status(row: SqliteRow) -> ModResult<ModerationStatus> {
    let kind: String = row.try_get("content_type")?;
    let status: String = row.try_get("status")?;

    Ok(ModerationStatus {
        id: row.try_get("id")?,
        target: ContentRef {
            kind: ContentKind::from_str(&kind)?,
            id: row.try_get("content_id")?,
        },
        status: ContentStatus::from_str(&status)?,
        moderator_id: row.try_get("moderator_id")?,
        reason: row.try_get("reason")?,
        notes: row.try_get("notes")?,
        user_notified: row.try_get("user_notified")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::moderation::moderators::ModeratorCapabilities;

    const ADMIN: UserId = 1;

    async fn manager() -> StatusManager {
        let db = connect_in_memory().await.unwrap();
        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins([ADMIN]);
        StatusManager::new(db, registry)
    }

    fn status(value: ContentStatus) -> ModerationStatus {
        ModerationStatus {
            id: 1,
            target: ContentRef::topic(1).unwrap(),
            status: value,
            moderator_id: None,
            reason: "off topic".to_string(),
            notes: String::new(),
            user_notified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_visibility_policy() {
        let pending = status(ContentStatus::Pending);
        let rejected = status(ContentStatus::Rejected);
        let hidden = status(ContentStatus::Hidden);

        assert_eq!(visibility(None, Viewer::Public), Visibility::Show);
        assert_eq!(visibility(Some(&pending), Viewer::Public), Visibility::Show);
        assert!(matches!(
            visibility(Some(&pending), Viewer::Author),
            Visibility::ShowWithCaveat(_)
        ));
        assert_eq!(visibility(Some(&rejected), Viewer::Public), Visibility::Hidden);
        assert_eq!(
            visibility(Some(&rejected), Viewer::Author),
            Visibility::ShowWithCaveat("Rejected: off topic".to_string())
        );
        assert_eq!(visibility(Some(&hidden), Viewer::Author), Visibility::Hidden);
        assert_eq!(visibility(Some(&hidden), Viewer::Moderator), Visibility::Show);
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_target() {
        let manager = manager().await;
        let target = ContentRef::comment(101).unwrap();

        let first = manager
            .upsert(ADMIN, target, ContentStatus::Pending, "queued", "")
            .await
            .unwrap();
        let second = manager
            .upsert(ADMIN, target, ContentStatus::Hidden, "spam", "clear spam")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, ContentStatus::Hidden);
        assert_eq!(second.moderator_id, Some(ADMIN));
        assert_eq!(manager.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_requires_moderator() {
        let manager = manager().await;
        let err = manager
            .upsert(42, ContentRef::topic(3).unwrap(), ContentStatus::Approved, "", "")
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_ensure_pending_is_idempotent() {
        let manager = manager().await;
        let target = ContentRef::topic(7).unwrap();
        let mut conn = manager.db.acquire().await.unwrap();

        let created = ensure_pending_in(&mut conn, target, "Content flagged by user").await.unwrap();
        upsert_in(&mut conn, target, ContentStatus::Hidden, Some(ADMIN), "spam", "").await.unwrap();
        let existing = ensure_pending_in(&mut conn, target, "Content flagged by user").await.unwrap();

        assert_eq!(created.id, existing.id);
        assert_eq!(existing.status, ContentStatus::Hidden);
    }

    #[tokio::test]
    async fn test_user_notified_resets_on_status_change() {
        let manager = manager().await;
        let target = ContentRef::topic(8).unwrap();

        manager
            .upsert(ADMIN, target, ContentStatus::Rejected, "rude", "")
            .await
            .unwrap();
        manager.mark_user_notified(ADMIN, target).await.unwrap();
        assert!(manager.get(target).await.unwrap().unwrap().user_notified);

        manager
            .upsert(ADMIN, target, ContentStatus::Approved, "appeal upheld", "")
            .await
            .unwrap();
        assert!(!manager.get(target).await.unwrap().unwrap().user_notified);

        let missing = manager
            .mark_user_notified(ADMIN, ContentRef::topic(9).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(missing, ModerationError::NotFound(_)));

        // Granted moderators count as well as bootstrap admins
        manager
            .registry
            .grant(ADMIN, 50, ModeratorCapabilities::from_granted(&[Capability::DeleteContent]))
            .await
            .unwrap();
        manager
            .upsert(50, target, ContentStatus::Hidden, "", "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_upsert_requires_matching_capability() {
        let manager = manager().await;
        let target = ContentRef::comment(8).unwrap();
        manager
            .registry
            .grant(ADMIN, 51, ModeratorCapabilities::from_granted(&[Capability::ApproveContent]))
            .await
            .unwrap();

        manager
            .upsert(51, target, ContentStatus::Approved, "", "")
            .await
            .unwrap();
        manager
            .upsert(51, target, ContentStatus::Pending, "re-check", "")
            .await
            .unwrap();

        for status in [ContentStatus::Rejected, ContentStatus::Hidden] {
            let denied = manager.upsert(51, target, status, "", "").await.unwrap_err();
            assert!(matches!(denied, ModerationError::Unauthorized(_)));
        }
        assert_eq!(
            manager.get(target).await.unwrap().unwrap().status,
            ContentStatus::Pending
        );
    }
}

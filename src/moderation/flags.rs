/// User-filed content flags
use crate::{
    db::{parse_optional_timestamp, parse_timestamp, settle_savepoint, Page, PageRequest},
    error::{ModResult, ModerationError},
    metrics,
    moderation::{
        content::ContentDirectory,
        moderators::{Capability, ModeratorRegistry},
        status::{self, ContentStatus},
        types::{ContentKind, ContentRef, UserId},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Connection, Row, SqlitePool};
use std::sync::Arc;
use tracing::info;

string_enum! {
    /// Why a user flagged content
    pub enum FlagType ("flag type") {
        Harassment => "harassment",
        HateSpeech => "hate_speech",
        Spam => "spam",
        OffTopic => "off_topic",
        Misleading => "misleading",
        Inappropriate => "inappropriate",
        ViolentContent => "violent_content",
        IllegalContent => "illegal_content",
        Other => "other",
    }
}

string_enum! {
    /// Flag review state
    pub enum FlagStatus ("flag status") {
        Pending => "pending",
        Reviewed => "reviewed",
        Approved => "approved",
        Rejected => "rejected",
    }
}

impl FlagStatus {
    /// Capability needed to close a flag with this outcome; approval hides the content
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            FlagStatus::Approved => Some(Capability::DeleteContent),
            FlagStatus::Rejected => Some(Capability::ApproveContent),
            FlagStatus::Pending | FlagStatus::Reviewed => None,
        }
    }
}

/// A user-filed content flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub id: i64,
    pub target: ContentRef,
    pub reporter_id: UserId,
    pub flag_type: FlagType,
    pub description: String,
    pub status: FlagStatus,
    pub assigned_to: Option<UserId>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub action_taken: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Moderator decision on a flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagReview {
    pub status: FlagStatus,
    #[serde(default)]
    pub action_taken: String,
    #[serde(default)]
    pub notes: String,
}

const FLAG_COLUMNS: &str = "id, content_type, content_id, reporter_id, flag_type, description, status, \
     assigned_to, reviewed_by, reviewed_at, action_taken, notes, created_at, updated_at";

/// Flag manager
#[derive(Clone)]
pub struct FlagManager {
    db: SqlitePool,
    registry: ModeratorRegistry,
    content: Arc<dyn ContentDirectory>,
}

impl FlagManager {
    pub fn new(db: SqlitePool, registry: ModeratorRegistry, content: Arc<dyn ContentDirectory>) -> Self {
        Self {
            db,
            registry,
            content,
        }
    }

    /// File a flag against existing content; marks the content pending if it has no status yet
    pub async fn create(
        &self,
        reporter: UserId,
        target: ContentRef,
        flag_type: FlagType,
        description: &str,
    ) -> ModResult<Flag> {
        if !self.content.content_exists(target).await? {
            return Err(ModerationError::NotFound(format!("Content {} not found", target)));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO content_flags
            (content_type, content_id, reporter_id, flag_type, description, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(target.kind.as_str())
        .bind(target.id)
        .bind(reporter)
        .bind(flag_type.as_str())
        .bind(description)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let mut savepoint = tx.begin().await?;
        let outcome = status::ensure_pending_in(&mut savepoint, target, "Content flagged by user").await;
        settle_savepoint(savepoint, outcome, "Marking flagged content pending").await?;
        tx.commit().await?;

        metrics::FLAGS_TOTAL.with_label_values(&[flag_type.as_str()]).inc();
        info!("Flag filed on {} by user {}: {}", target, reporter, flag_type);

        Ok(Flag {
            id: result.last_insert_rowid(),
            target,
            reporter_id: reporter,
            flag_type,
            description: description.to_string(),
            status: FlagStatus::Pending,
            assigned_to: None,
            reviewed_by: None,
            reviewed_at: None,
            action_taken: String::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a flag; visible to its reporter, its assignee and moderators
    pub async fn get(&self, caller: UserId, id: i64) -> ModResult<Flag> {
        let flag = self.fetch(id).await?;

        if flag.reporter_id != caller
            && flag.assigned_to != Some(caller)
            && !self.registry.is_moderator(caller).await?
        {
            return Err(ModerationError::Forbidden(format!(
                "Not allowed to view flag {}",
                id
            )));
        }
        Ok(flag)
    }

    /// All flags on a content item, newest first
    pub async fn list_by_content(&self, caller: UserId, target: ContentRef) -> ModResult<Vec<Flag>> {
        self.registry.require_moderator(caller).await?;

        let sql = format!(
            "SELECT {} FROM content_flags WHERE content_type = ? AND content_id = ? \
             ORDER BY created_at DESC, id DESC",
            FLAG_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(target.kind.as_str())
            .bind(target.id)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(parse_flag).collect()
    }

    /// Flags in a given status, oldest first
    pub async fn list_by_status(
        &self,
        caller: UserId,
        status: FlagStatus,
        request: PageRequest,
    ) -> ModResult<Page<Flag>> {
        self.registry.require_capability(caller, Capability::AccessDashboard).await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_flags WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT {} FROM content_flags WHERE status = ? \
             ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            FLAG_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_flag).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }

    /// Assign a flag to a moderator; the status is left as it is
    pub async fn assign(&self, caller: UserId, id: i64, assignee: UserId) -> ModResult<Flag> {
        self.registry.require_moderator(caller).await?;
        if !self.registry.is_moderator(assignee).await? {
            return Err(ModerationError::InvalidArgument(format!(
                "User {} is not a moderator",
                assignee
            )));
        }

        let result = sqlx::query("UPDATE content_flags SET assigned_to = ?, updated_at = ? WHERE id = ?")
            .bind(assignee)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("Flag {} not found", id)));
        }

        info!("Flag {} assigned to {} by {}", id, assignee, caller);
        self.fetch(id).await
    }

    /// Review a pending flag. Approval hides the flagged content.
    pub async fn review(&self, caller: UserId, id: i64, review: FlagReview) -> ModResult<Flag> {
        match review.status.required_capability() {
            Some(capability) => self.registry.require_capability(caller, capability).await?,
            None => self.registry.require_moderator(caller).await?,
        }
        if review.status == FlagStatus::Pending {
            return Err(ModerationError::InvalidArgument(
                "A flag review must move the flag out of pending".to_string(),
            ));
        }

        let flag = self.fetch(id).await?;
        if flag.status != FlagStatus::Pending {
            return Err(ModerationError::Conflict(format!(
                "Flag {} was already {}",
                id, flag.status
            )));
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE content_flags
            SET status = ?, reviewed_by = ?, reviewed_at = ?, action_taken = ?, notes = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(review.status.as_str())
        .bind(caller)
        .bind(&now)
        .bind(&review.action_taken)
        .bind(&review.notes)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::Conflict(format!("Flag {} was reviewed concurrently", id)));
        }

        if review.status == FlagStatus::Approved {
            let mut savepoint = tx.begin().await?;
            let reason = format!("Flag approved: {}", flag.flag_type);
            let outcome = status::upsert_in(
                &mut savepoint,
                flag.target,
                ContentStatus::Hidden,
                Some(caller),
                &reason,
                &review.notes,
            )
            .await;
            settle_savepoint(savepoint, outcome, "Hiding flagged content").await?;
        }

        tx.commit().await?;
        info!("Flag {} reviewed by {}: {}", id, caller, review.status);

        self.fetch(id).await
    }

    async fn fetch(&self, id: i64) -> ModResult<Flag> {
        let sql = format!("SELECT {} FROM content_flags WHERE id = ?", FLAG_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("Flag {} not found", id)))?;
        parse_flag(row)
    }
}

fn parse_flag(row: SqliteRow) -> ModResult<Flag> {
    let kind: String = row.try_get("content_type")?;
    let flag_type: String = row.try_get("flag_type")?;
    let status: String = row.try_get("status")?;

    Ok(Flag {
        id: row.try_get("id")?,
        target: ContentRef {
            kind: ContentKind::from_str(&kind)?,
            id: row.try_get("content_id")?,
        },
        reporter_id: row.try_get("reporter_id")?,
        flag_type: FlagType::from_str(&flag_type)?,
        description: row.try_get("description")?,
        status: FlagStatus::from_str(&status)?,
        assigned_to: row.try_get("assigned_to")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: parse_optional_timestamp(row.try_get("reviewed_at")?)?,
        action_taken: row.try_get("action_taken")?,
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
            content::SqliteContentDirectory,
            moderators::ModeratorCapabilities,
            status::StatusManager,
        },
    };

    const MODERATOR: UserId = 1;
    const REPORTER: UserId = 20;

    async fn setup() -> (SqlitePool, FlagManager) {
        let db = connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO topics (id, user_id, title) VALUES (77, 5, 'Elections')")
            .execute(&db)
            .await
            .unwrap();

        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins([MODERATOR]);
        let content = Arc::new(SqliteContentDirectory::new(db.clone()));
        (db.clone(), FlagManager::new(db, registry, content))
    }

    #[tokio::test]
    async fn test_flag_unknown_content() {
        let (_db, manager) = setup().await;
        let result = manager
            .create(REPORTER, ContentRef::topic(999).unwrap(), FlagType::Spam, "")
            .await;
        assert!(matches!(result, Err(ModerationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_approved_flag_hides_content() {
        let (db, manager) = setup().await;
        let target = ContentRef::topic(77).unwrap();

        let flag = manager.create(REPORTER, target, FlagType::Spam, "ads").await.unwrap();
        let statuses = StatusManager::new(db.clone(), ModeratorRegistry::new(db.clone()));
        let pending = statuses.get(target).await.unwrap().unwrap();
        assert_eq!(pending.status, ContentStatus::Pending);
        assert_eq!(pending.reason, "Content flagged by user");

        let reviewed = manager
            .review(
                MODERATOR,
                flag.id,
                FlagReview {
                    status: FlagStatus::Approved,
                    action_taken: "hidden".to_string(),
                    notes: "clear spam".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reviewed.status, FlagStatus::Approved);
        assert_eq!(reviewed.reviewed_by, Some(MODERATOR));
        assert!(reviewed.reviewed_at.is_some());

        let hidden = statuses.get(target).await.unwrap().unwrap();
        assert_eq!(hidden.status, ContentStatus::Hidden);
        assert_eq!(hidden.moderator_id, Some(MODERATOR));
        assert_eq!(hidden.reason, "Flag approved: spam");
        assert_eq!(hidden.notes, "clear spam");
    }

    #[tokio::test]
    async fn test_review_only_from_pending() {
        let (_db, manager) = setup().await;
        let flag = manager
            .create(REPORTER, ContentRef::topic(77).unwrap(), FlagType::OffTopic, "")
            .await
            .unwrap();

        let review = FlagReview {
            status: FlagStatus::Rejected,
            action_taken: String::new(),
            notes: String::new(),
        };
        manager.review(MODERATOR, flag.id, review.clone()).await.unwrap();

        let again = manager.review(MODERATOR, flag.id, review).await;
        assert!(matches!(again, Err(ModerationError::Conflict(_))));

        let not_moderator = manager
            .review(
                REPORTER,
                flag.id,
                FlagReview {
                    status: FlagStatus::Approved,
                    action_taken: String::new(),
                    notes: String::new(),
                },
            )
            .await;
        assert!(matches!(not_moderator, Err(ModerationError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_assign_keeps_status_and_get_access() {
        let (_db, manager) = setup().await;
        let flag = manager
            .create(REPORTER, ContentRef::topic(77).unwrap(), FlagType::Harassment, "")
            .await
            .unwrap();

        let assigned = manager.assign(MODERATOR, flag.id, MODERATOR).await.unwrap();
        assert_eq!(assigned.assigned_to, Some(MODERATOR));
        assert_eq!(assigned.status, FlagStatus::Pending);

        assert!(manager.get(REPORTER, flag.id).await.is_ok());
        assert!(matches!(
            manager.get(999, flag.id).await,
            Err(ModerationError::Forbidden(_))
        ));

        let page = manager
            .list_by_status(MODERATOR, FlagStatus::Pending, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_review_requires_outcome_capability() {
        let (_db, manager) = setup().await;
        let target = ContentRef::topic(77).unwrap();
        manager
            .registry
            .grant(MODERATOR, 30, ModeratorCapabilities::from_granted(&[Capability::ApproveContent]))
            .await
            .unwrap();
        let flag = manager.create(REPORTER, target, FlagType::Spam, "").await.unwrap();

        let hide = FlagReview {
            status: FlagStatus::Approved,
            action_taken: "hidden".to_string(),
            notes: String::new(),
        };
        let denied = manager.review(30, flag.id, hide).await;
        assert!(matches!(denied, Err(ModerationError::Unauthorized(_))));
        assert_eq!(manager.get(MODERATOR, flag.id).await.unwrap().status, FlagStatus::Pending);

        let dismiss = FlagReview {
            status: FlagStatus::Rejected,
            action_taken: String::new(),
            notes: "not spam".to_string(),
        };
        let dismissed = manager.review(30, flag.id, dismiss).await.unwrap();
        assert_eq!(dismissed.status, FlagStatus::Rejected);

        // Listing the backlog is a dashboard view
        assert!(matches!(
            manager.list_by_status(30, FlagStatus::Pending, PageRequest::default()).await,
            Err(ModerationError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_flag_survives_failed_status_update() {
        let (db, manager) = setup().await;
        sqlx::query("DROP TABLE moderation_status")
            .execute(&db)
            .await
            .unwrap();

        let flag = manager
            .create(REPORTER, ContentRef::topic(77).unwrap(), FlagType::Spam, "ads")
            .await
            .unwrap();
        assert_eq!(manager.get(REPORTER, flag.id).await.unwrap().flag_type, FlagType::Spam);
    }
}

/// Moderator privilege registry
use crate::{
    error::{ModResult, ModerationError},
    db::parse_timestamp,
    moderation::types::UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

string_enum! {
    /// A single moderator capability
    pub enum Capability ("capability") {
        ApproveContent => "approve_content",
        RejectContent => "reject_content",
        EditContent => "edit_content",
        DeleteContent => "delete_content",
        BanUsers => "ban_users",
        ManageRules => "manage_rules",
        AssignModerators => "assign_moderators",
        AccessDashboard => "access_dashboard",
    }
}

/// Fixed record of capability flags; everything defaults to false
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeratorCapabilities {
    pub approve_content: bool,
    pub reject_content: bool,
    pub edit_content: bool,
    pub delete_content: bool,
    pub ban_users: bool,
    pub manage_rules: bool,
    pub assign_moderators: bool,
    pub access_dashboard: bool,
}

impl ModeratorCapabilities {
    /// Every capability granted
    pub fn all() -> Self {
        Self {
            approve_content: true,
            reject_content: true,
            edit_content: true,
            delete_content: true,
            ban_users: true,
            manage_rules: true,
            assign_moderators: true,
            access_dashboard: true,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::ApproveContent => self.approve_content,
            Capability::RejectContent => self.reject_content,
            Capability::EditContent => self.edit_content,
            Capability::DeleteContent => self.delete_content,
            Capability::BanUsers => self.ban_users,
            Capability::ManageRules => self.manage_rules,
            Capability::AssignModerators => self.assign_moderators,
            Capability::AccessDashboard => self.access_dashboard,
        }
    }

    /// Build from a list of granted capabilities
    pub fn from_granted(granted: &[Capability]) -> Self {
        let mut caps = Self::default();
        for capability in granted {
            caps.set(*capability, true);
        }
        caps
    }

    fn set(&mut self, capability: Capability, value: bool) {
        match capability {
            Capability::ApproveContent => self.approve_content = value,
            Capability::RejectContent => self.reject_content = value,
            Capability::EditContent => self.edit_content = value,
            Capability::DeleteContent => self.delete_content = value,
            Capability::BanUsers => self.ban_users = value,
            Capability::ManageRules => self.manage_rules = value,
            Capability::AssignModerators => self.assign_moderators = value,
            Capability::AccessDashboard => self.access_dashboard = value,
        }
    }

    /// Merge a partial update; absent fields keep their prior value
    pub fn merge(mut self, update: &CapabilityUpdate) -> Self {
        let fields = [
            (Capability::ApproveContent, update.approve_content),
            (Capability::RejectContent, update.reject_content),
            (Capability::EditContent, update.edit_content),
            (Capability::DeleteContent, update.delete_content),
            (Capability::BanUsers, update.ban_users),
            (Capability::ManageRules, update.manage_rules),
            (Capability::AssignModerators, update.assign_moderators),
            (Capability::AccessDashboard, update.access_dashboard),
        ];
        for (capability, value) in fields {
            if let Some(value) = value {
                self.set(capability, value);
            }
        }
        self
    }
}

/// Partial capability update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityUpdate {
    pub approve_content: Option<bool>,
    pub reject_content: Option<bool>,
    pub edit_content: Option<bool>,
    pub delete_content: Option<bool>,
    pub ban_users: Option<bool>,
    pub manage_rules: Option<bool>,
    pub assign_moderators: Option<bool>,
    pub access_dashboard: Option<bool>,
}

/// Moderator privilege record (one per user)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratorPrivilege {
    pub id: i64,
    pub user_id: UserId,
    pub capabilities: ModeratorCapabilities,
    pub is_active: bool,
    pub assigned_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PRIVILEGE_COLUMNS: &str = "id, user_id, approve_content, reject_content, edit_content, \
     delete_content, ban_users, manage_rules, assign_moderators, access_dashboard, \
     is_active, assigned_by, created_at, updated_at";

/// Moderator registry
#[derive(Clone)]
pub struct ModeratorRegistry {
    db: SqlitePool,
    bootstrap_admins: Arc<HashSet<UserId>>,
}

impl ModeratorRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            bootstrap_admins: Arc::new(HashSet::new()),
        }
    }

    /// Treat the given users as holding every capability without a privilege row
    pub fn with_bootstrap_admins(mut self, admins: impl IntoIterator<Item = UserId>) -> Self {
        self.bootstrap_admins = Arc::new(admins.into_iter().collect());
        self
    }

    /// Grant moderator privileges to a user
    pub async fn grant(
        &self,
        caller: UserId,
        user_id: UserId,
        capabilities: ModeratorCapabilities,
    ) -> ModResult<ModeratorPrivilege> {
        self.require_capability(caller, Capability::AssignModerators).await?;
        let now = Utc::now().to_rfc3339();

        // Reactivate an inactive row in place; an active row is left untouched
        let result = sqlx::query(
            r#"
            INSERT INTO moderator_privileges
            (user_id, approve_content, reject_content, edit_content, delete_content,
             ban_users, manage_rules, assign_moderators, access_dashboard,
             is_active, assigned_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                approve_content = excluded.approve_content,
                reject_content = excluded.reject_content,
                edit_content = excluded.edit_content,
                delete_content = excluded.delete_content,
                ban_users = excluded.ban_users,
                manage_rules = excluded.manage_rules,
                assign_moderators = excluded.assign_moderators,
                access_dashboard = excluded.access_dashboard,
                is_active = 1,
                assigned_by = excluded.assigned_by,
                updated_at = excluded.updated_at
            WHERE moderator_privileges.is_active = 0
            "#,
        )
        .bind(user_id)
        .bind(capabilities.approve_content)
        .bind(capabilities.reject_content)
        .bind(capabilities.edit_content)
        .bind(capabilities.delete_content)
        .bind(capabilities.ban_users)
        .bind(capabilities.manage_rules)
        .bind(capabilities.assign_moderators)
        .bind(capabilities.access_dashboard)
        .bind(caller)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::Conflict(format!(
                "User {} is already an active moderator",
                user_id
            )));
        }

        info!("Moderator privileges granted to user {} by {}", user_id, caller);

        self.get(user_id)
            .await?
            .ok_or_else(|| ModerationError::Internal("Granted privilege row missing".to_string()))
    }

    /// Merge a partial capability update into an active privilege row
    pub async fn update(
        &self,
        caller: UserId,
        user_id: UserId,
        update: CapabilityUpdate,
    ) -> ModResult<ModeratorPrivilege> {
        self.require_capability(caller, Capability::AssignModerators).await?;

        let existing = self
            .get(user_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| ModerationError::NotFound(format!("No active moderator {}", user_id)))?;

        let merged = existing.capabilities.merge(&update);
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE moderator_privileges
            SET approve_content = ?, reject_content = ?, edit_content = ?, delete_content = ?,
                ban_users = ?, manage_rules = ?, assign_moderators = ?, access_dashboard = ?,
                updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(merged.approve_content)
        .bind(merged.reject_content)
        .bind(merged.edit_content)
        .bind(merged.delete_content)
        .bind(merged.ban_users)
        .bind(merged.manage_rules)
        .bind(merged.assign_moderators)
        .bind(merged.access_dashboard)
        .bind(now.to_rfc3339())
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(ModeratorPrivilege {
            capabilities: merged,
            updated_at: now,
            ..existing
        })
    }

    /// Revoke moderator privileges; the row is kept for history
    pub async fn revoke(&self, caller: UserId, user_id: UserId) -> ModResult<()> {
        self.require_capability(caller, Capability::AssignModerators).await?;

        let result = sqlx::query(
            r#"
            UPDATE moderator_privileges
            SET is_active = 0, updated_at = ?
            WHERE user_id = ? AND is_active = 1
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!(
                "No active moderator privileges for user {}",
                user_id
            )));
        }

        info!("Moderator privileges revoked from user {} by {}", user_id, caller);
        Ok(())
    }

    /// Get the privilege row for a user, active or not
    pub async fn get(&self, user_id: UserId) -> ModResult<Option<ModeratorPrivilege>> {
        let sql = format!(
            "SELECT {} FROM moderator_privileges WHERE user_id = ?",
            PRIVILEGE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        row.map(parse_privilege).transpose()
    }

    /// List every privilege row, including revoked ones
    pub async fn list_all(&self) -> ModResult<Vec<ModeratorPrivilege>> {
        let sql = format!(
            "SELECT {} FROM moderator_privileges ORDER BY created_at ASC, id ASC",
            PRIVILEGE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.db).await?;
        rows.into_iter().map(parse_privilege).collect()
    }

    /// List active moderators
    pub async fn list_active(&self) -> ModResult<Vec<ModeratorPrivilege>> {
        let sql = format!(
            "SELECT {} FROM moderator_privileges WHERE is_active = 1 ORDER BY created_at ASC, id ASC",
            PRIVILEGE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.db).await?;
        rows.into_iter().map(parse_privilege).collect()
    }

    /// Effective capabilities of a user, if they hold any authority
    pub async fn capabilities_of(&self, user_id: UserId) -> ModResult<Option<ModeratorCapabilities>> {
        if self.bootstrap_admins.contains(&user_id) {
            return Ok(Some(ModeratorCapabilities::all()));
        }
        Ok(self
            .get(user_id)
            .await?
            .filter(|p| p.is_active)
            .map(|p| p.capabilities))
    }

    /// Whether an active privilege row (or bootstrap admin entry) exists
    pub async fn is_moderator(&self, user_id: UserId) -> ModResult<bool> {
        Ok(self.capabilities_of(user_id).await?.is_some())
    }

    pub async fn has_capability(&self, user_id: UserId, capability: Capability) -> ModResult<bool> {
        Ok(self
            .capabilities_of(user_id)
            .await?
            .map_or(false, |caps| caps.has(capability)))
    }

    /// Fail with `Unauthorized` unless the user is a moderator
    pub async fn require_moderator(&self, user_id: UserId) -> ModResult<()> {
        if !self.is_moderator(user_id).await? {
            return Err(ModerationError::Unauthorized("Moderator role required".to_string()));
        }
        Ok(())
    }

    /// Fail with `Unauthorized` unless the user holds the capability
    pub async fn require_capability(&self, user_id: UserId, capability: Capability) -> ModResult<()> {
        if !self.has_capability(user_id, capability).await? {
            return Err(ModerationError::Unauthorized(format!(
                "Requires {} capability",
                capability.as_str()
            )));
        }
        Ok(())
    }
}

fn parse_privilege(row: SqliteRow) -> ModResult<ModeratorPrivilege> {
    Ok(ModeratorPrivilege {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        capabilities: ModeratorCapabilities {
            approve_content: row.try_get("approve_content")?,
            reject_content: row.try_get("reject_content")?,
            edit_content: row.try_get("edit_content")?,
            delete_content: row.try_get("delete_content")?,
            ban_users: row.try_get("ban_users")?,
            manage_rules: row.try_get("manage_rules")?,
            assign_moderators: row.try_get("assign_moderators")?,
            access_dashboard: row.try_get("access_dashboard")?,
        },
        is_active: row.try_get("is_active")?,
        assigned_by: row.try_get("assigned_by")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    const ADMIN: UserId = 1;

    async fn registry() -> ModeratorRegistry {
        let db = connect_in_memory().await.unwrap();
        ModeratorRegistry::new(db).with_bootstrap_admins([ADMIN])
    }

    #[test]
    fn test_capability_merge_keeps_missing_keys() {
        let caps = ModeratorCapabilities::from_granted(&[
            Capability::ApproveContent,
            Capability::BanUsers,
        ]);
        let merged = caps.merge(&CapabilityUpdate {
            ban_users: Some(false),
            manage_rules: Some(true),
            ..Default::default()
        });

        assert!(merged.approve_content);
        assert!(!merged.ban_users);
        assert!(merged.manage_rules);
        assert!(!merged.delete_content);
    }

    #[tokio::test]
    async fn test_grant_and_check() {
        let registry = registry().await;

        let privilege = registry
            .grant(ADMIN, 10, ModeratorCapabilities::from_granted(&[Capability::ApproveContent]))
            .await
            .unwrap();
        assert!(privilege.is_active);
        assert_eq!(privilege.assigned_by, ADMIN);

        assert!(registry.is_moderator(10).await.unwrap());
        assert!(registry.has_capability(10, Capability::ApproveContent).await.unwrap());
        assert!(!registry.has_capability(10, Capability::BanUsers).await.unwrap());
        assert!(!registry.is_moderator(11).await.unwrap());

        // Granting twice conflicts while the row is active
        let err = registry
            .grant(ADMIN, 10, ModeratorCapabilities::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_grant_requires_assign_capability() {
        let registry = registry().await;
        registry
            .grant(ADMIN, 10, ModeratorCapabilities::from_granted(&[Capability::ApproveContent]))
            .await
            .unwrap();

        let err = registry
            .grant(10, 11, ModeratorCapabilities::all())
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_revoke_then_regrant_reactivates() {
        let registry = registry().await;
        let first = registry
            .grant(ADMIN, 20, ModeratorCapabilities::all())
            .await
            .unwrap();

        registry.revoke(ADMIN, 20).await.unwrap();
        assert!(!registry.is_moderator(20).await.unwrap());
        assert!(!registry.get(20).await.unwrap().unwrap().is_active);

        let again = registry
            .grant(ADMIN, 20, ModeratorCapabilities::from_granted(&[Capability::RejectContent]))
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.capabilities.reject_content);
        assert!(!again.capabilities.ban_users);

        assert!(matches!(
            registry.revoke(ADMIN, 99).await.unwrap_err(),
            ModerationError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_partial_update() {
        let registry = registry().await;
        registry
            .grant(ADMIN, 30, ModeratorCapabilities::from_granted(&[Capability::ApproveContent]))
            .await
            .unwrap();

        let updated = registry
            .update(
                ADMIN,
                30,
                CapabilityUpdate {
                    ban_users: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.capabilities.approve_content);
        assert!(updated.capabilities.ban_users);

        let stored = registry.get(30).await.unwrap().unwrap();
        assert_eq!(stored.capabilities, updated.capabilities);
        assert_eq!(registry.list_active().await.unwrap().len(), 1);
    }
}

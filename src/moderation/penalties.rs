/// User penalties: warnings, suspensions, bans and posting restrictions
///
/// Expiry is evaluated at query time. A suspension past its `expires_at`
/// stops restricting the user without any write.
use crate::{
    db::{parse_optional_timestamp, parse_timestamp, settle_savepoint},
    error::{ModResult, ModerationError},
    metrics,
    moderation::{
        moderators::{Capability, ModeratorRegistry},
        trust::{self, TrustCounter},
        types::{require_text, ContentKind, ContentRef, UserId},
    },
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Connection, Row, SqliteConnection, SqlitePool};
use tracing::info;

string_enum! {
    pub enum PenaltyType ("penalty type") {
        Warning => "warning",
        Suspension => "suspension",
        Ban => "ban",
        Restriction => "restriction",
    }
}

string_enum! {
    /// Actions taken against a user from the review flow
    pub enum UserActionKind ("user action") {
        Warning => "warning",
        TemporaryBan => "temporary_ban",
        PermanentBan => "permanent_ban",
    }
}

impl UserActionKind {
    pub fn penalty_type(&self) -> PenaltyType {
        match self {
            UserActionKind::Warning => PenaltyType::Warning,
            UserActionKind::TemporaryBan => PenaltyType::Suspension,
            UserActionKind::PermanentBan => PenaltyType::Ban,
        }
    }
}

/// A penalty record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Penalty {
    pub id: i64,
    pub user_id: UserId,
    pub penalty_type: PenaltyType,
    pub reason: String,
    pub description: String,
    /// `None` for penalties applied by the automated filter
    pub moderator_id: Option<UserId>,
    pub duration_days: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub related_content: Option<ContentRef>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Penalty {
    /// Active and not yet expired at `now`
    pub fn in_force_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Request to penalize a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPenalty {
    pub user_id: UserId,
    pub penalty_type: PenaltyType,
    pub reason: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration_days: Option<i64>,
    #[serde(default)]
    pub related_content: Option<ContentRef>,
    #[serde(default)]
    pub notes: String,
}

impl NewPenalty {
    pub fn new(user_id: UserId, penalty_type: PenaltyType, reason: impl Into<String>) -> Self {
        Self {
            user_id,
            penalty_type,
            reason: reason.into(),
            description: String::new(),
            duration_days: None,
            related_content: None,
            notes: String::new(),
        }
    }

    pub fn with_duration(mut self, days: i64) -> Self {
        self.duration_days = Some(days);
        self
    }

    pub fn with_related_content(mut self, target: ContentRef) -> Self {
        self.related_content = Some(target);
        self
    }

    /// Check type/duration consistency
    pub fn validate(&self) -> ModResult<()> {
        require_text("reason", &self.reason)?;

        match (self.penalty_type, self.duration_days) {
            (PenaltyType::Suspension, None) => Err(ModerationError::InvalidArgument(
                "A suspension requires duration_days".to_string(),
            )),
            (PenaltyType::Ban, Some(_)) => Err(ModerationError::InvalidArgument(
                "A ban is permanent and takes no duration".to_string(),
            )),
            (_, Some(days)) if days <= 0 => Err(ModerationError::InvalidArgument(format!(
                "duration_days must be positive, got {}",
                days
            ))),
            _ => Ok(()),
        }
    }
}

/// Result of a restriction check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub restricted: bool,
    pub reason: String,
}

impl Restriction {
    fn none() -> Self {
        Self {
            restricted: false,
            reason: String::new(),
        }
    }

    fn because(reason: impl Into<String>) -> Self {
        Self {
            restricted: true,
            reason: reason.into(),
        }
    }
}

/// Strongest restriction among a user's penalties at `now`
pub fn restriction_at(penalties: &[Penalty], now: DateTime<Utc>) -> Restriction {
    let in_force: Vec<&Penalty> = penalties.iter().filter(|p| p.in_force_at(now)).collect();

    if in_force.iter().any(|p| p.penalty_type == PenaltyType::Ban) {
        return Restriction::because("permanently banned");
    }

    let suspended_until = in_force
        .iter()
        .filter(|p| p.penalty_type == PenaltyType::Suspension)
        .filter_map(|p| p.expires_at)
        .max();
    if let Some(until) = suspended_until {
        return Restriction::because(format!("suspended until {}", until.format("%Y-%m-%d")));
    }

    if in_force.iter().any(|p| p.penalty_type == PenaltyType::Restriction) {
        return Restriction::because("posting restrictions");
    }

    Restriction::none()
}

const PENALTY_COLUMNS: &str = "id, user_id, penalty_type, reason, description, moderator_id, duration_days, \
     expires_at, is_active, related_content_type, related_content_id, notes, created_at, updated_at";

/// Penalty manager
#[derive(Clone)]
pub struct PenaltyManager {
    db: SqlitePool,
    registry: ModeratorRegistry,
}

impl PenaltyManager {
    pub fn new(db: SqlitePool, registry: ModeratorRegistry) -> Self {
        Self { db, registry }
    }

    /// Apply a penalty as a moderator.
    ///
    /// Any moderator may warn; other penalty types need the ban_users capability.
    pub async fn apply(&self, caller: UserId, new: NewPenalty) -> ModResult<Penalty> {
        match new.penalty_type {
            PenaltyType::Warning => self.registry.require_moderator(caller).await?,
            _ => self.registry.require_capability(caller, Capability::BanUsers).await?,
        }
        new.validate()?;

        let mut tx = self.db.begin().await?;
        let penalty = apply_in(&mut tx, Some(caller), &new).await?;
        tx.commit().await?;

        info!(
            "{} applied to user {} by moderator {}",
            penalty.penalty_type, penalty.user_id, caller
        );
        Ok(penalty)
    }

    /// Apply a penalty on behalf of the automated filter
    pub async fn apply_automatic(&self, new: NewPenalty) -> ModResult<Penalty> {
        let mut conn = self.db.acquire().await?;
        apply_automatic_in(&mut conn, new).await
    }

    /// Take an action against a user from the review flow
    pub async fn create_user_action(
        &self,
        caller: UserId,
        user_id: UserId,
        kind: UserActionKind,
        reason: &str,
        duration_days: Option<i64>,
    ) -> ModResult<Penalty> {
        let mut new = NewPenalty::new(user_id, kind.penalty_type(), reason);
        new.duration_days = duration_days;
        self.apply(caller, new).await
    }

    /// Penalties currently in force for a user; visible to the user and to moderators
    pub async fn list_by_user(&self, caller: UserId, user_id: UserId) -> ModResult<Vec<Penalty>> {
        self.require_self_or_moderator(caller, user_id).await?;
        let now = Utc::now();
        Ok(self
            .fetch_for_user(user_id, true)
            .await?
            .into_iter()
            .filter(|p| p.in_force_at(now))
            .collect())
    }

    /// Every penalty ever applied to a user, newest first
    pub async fn history(&self, caller: UserId, user_id: UserId) -> ModResult<Vec<Penalty>> {
        self.require_self_or_moderator(caller, user_id).await?;
        self.fetch_for_user(user_id, false).await
    }

    /// All penalties currently in force
    pub async fn list_active(&self, caller: UserId) -> ModResult<Vec<Penalty>> {
        self.registry.require_moderator(caller).await?;

        let sql = format!(
            "SELECT {} FROM user_penalties WHERE is_active = 1 ORDER BY created_at DESC, id DESC",
            PENALTY_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.db).await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(parse_penalty)
            .collect::<ModResult<Vec<_>>>()?
            .into_iter()
            .filter(|p| p.in_force_at(now))
            .collect())
    }

    /// Deactivate a penalty, appending a revocation note
    pub async fn remove(&self, caller: UserId, id: i64, reason: &str) -> ModResult<Penalty> {
        self.registry.require_moderator(caller).await?;
        require_text("reason", reason)?;

        let mut tx = self.db.begin().await?;
        let penalty = get_in(&mut tx, id).await?;
        if !penalty.is_active {
            return Err(ModerationError::Conflict(format!("Penalty {} is already inactive", id)));
        }

        let now = Utc::now();
        let note = format!(
            "Revoked by moderator {} on {} with reason: {}",
            caller,
            now.to_rfc3339(),
            reason
        );
        let notes = if penalty.notes.is_empty() {
            note
        } else {
            format!("{}\n{}", penalty.notes, note)
        };

        sqlx::query("UPDATE user_penalties SET is_active = 0, notes = ?, updated_at = ? WHERE id = ?")
            .bind(&notes)
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let updated = get_in(&mut tx, id).await?;
        tx.commit().await?;

        info!("Penalty {} on user {} revoked by {}", id, updated.user_id, caller);
        Ok(updated)
    }

    /// Whether the user is currently restricted from posting, and why
    pub async fn is_restricted(&self, user_id: UserId) -> ModResult<Restriction> {
        self.is_restricted_at(user_id, Utc::now()).await
    }

    /// Restriction check against an explicit clock
    pub async fn is_restricted_at(&self, user_id: UserId, now: DateTime<Utc>) -> ModResult<Restriction> {
        let penalties = self.fetch_for_user(user_id, true).await?;
        Ok(restriction_at(&penalties, now))
    }

    /// Whether the user is under a ban or an unexpired suspension
    pub async fn is_banned(&self, user_id: UserId) -> ModResult<bool> {
        let now = Utc::now();
        Ok(self.fetch_for_user(user_id, true).await?.iter().any(|p| {
            matches!(p.penalty_type, PenaltyType::Ban | PenaltyType::Suspension) && p.in_force_at(now)
        }))
    }

    async fn fetch_for_user(&self, user_id: UserId, active_only: bool) -> ModResult<Vec<Penalty>> {
        let filter = if active_only { " AND is_active = 1" } else { "" };
        let sql = format!(
            "SELECT {} FROM user_penalties WHERE user_id = ?{} ORDER BY created_at DESC, id DESC",
            PENALTY_COLUMNS, filter
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.db).await?;
        rows.into_iter().map(parse_penalty).collect()
    }

    async fn require_self_or_moderator(&self, caller: UserId, user_id: UserId) -> ModResult<()> {
        if caller == user_id || self.registry.is_moderator(caller).await? {
            return Ok(());
        }
        Err(ModerationError::Forbidden(format!(
            "Not allowed to view penalties of user {}",
            user_id
        )))
    }
}

/// Insert a penalty; a warning also bumps the user's warning count in a savepoint
pub(crate) async fn apply_in(
    conn: &mut SqliteConnection,
    moderator: Option<UserId>,
    new: &NewPenalty,
) -> ModResult<Penalty> {
    new.validate()?;

    let now = Utc::now();
    let duration_days = match new.penalty_type {
        PenaltyType::Ban => None,
        _ => new.duration_days,
    };
    let expires_at = duration_days.map(|days| now + Duration::days(days));

    let result = sqlx::query(
        r#"
        INSERT INTO user_penalties
        (user_id, penalty_type, reason, description, moderator_id, duration_days, expires_at,
         is_active, related_content_type, related_content_id, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.user_id)
    .bind(new.penalty_type.as_str())
    .bind(&new.reason)
    .bind(&new.description)
    .bind(moderator)
    .bind(duration_days)
    .bind(expires_at.map(|t| t.to_rfc3339()))
    .bind(new.related_content.map(|c| c.kind.as_str()))
    .bind(new.related_content.map(|c| c.id))
    .bind(&new.notes)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    if new.penalty_type == PenaltyType::Warning {
        let mut savepoint = conn.begin().await?;
        let outcome = trust::record_in(&mut savepoint, new.user_id, TrustCounter::Warning).await;
        settle_savepoint(savepoint, outcome, "Trust update after warning").await?;
    }

    metrics::PENALTIES_TOTAL
        .with_label_values(&[new.penalty_type.as_str()])
        .inc();

    Ok(Penalty {
        id: result.last_insert_rowid(),
        user_id: new.user_id,
        penalty_type: new.penalty_type,
        reason: new.reason.clone(),
        description: new.description.clone(),
        moderator_id: moderator,
        duration_days,
        expires_at,
        is_active: true,
        related_content: new.related_content,
        notes: new.notes.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Moderator-less penalty with an `Automatic:` reason prefix
pub(crate) async fn apply_automatic_in(conn: &mut SqliteConnection, mut new: NewPenalty) -> ModResult<Penalty> {
    if !new.reason.starts_with("Automatic:") {
        new.reason = format!("Automatic: {}", new.reason);
    }
    let penalty = apply_in(conn, None, &new).await?;
    info!("Automatic {} applied to user {}", penalty.penalty_type, penalty.user_id);
    Ok(penalty)
}

async fn get_in(conn: &mut SqliteConnection, id: i64) -> ModResult<Penalty> {
    let sql = format!("SELECT {} FROM user_penalties WHERE id = ?", PENALTY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ModerationError::NotFound(format!("Penalty {} not found", id)))?;
    parse_penalty(row)
}

fn parse_penalty(row: SqliteRow) -> ModResult<Penalty> {
    let penalty_type: String = row.try_get("penalty_type")?;
    let related_kind: Option<String> = row.try_get("related_content_type")?;
    let related_id: Option<i64> = row.try_get("related_content_id")?;

    let related_content = match (related_kind, related_id) {
        (Some(kind), Some(id)) => Some(ContentRef {
            kind: ContentKind::from_str(&kind)?,
            id,
        }),
        _ => None,
    };

    Ok(Penalty {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        penalty_type: PenaltyType::from_str(&penalty_type)?,
        reason: row.try_get("reason")?,
        description: row.try_get("description")?,
        moderator_id: row.try_get("moderator_id")?,
        duration_days: row.try_get("duration_days")?,
        expires_at: parse_optional_timestamp(row.try_get("expires_at")?)?,
        is_active: row.try_get("is_active")?,
        related_content,
        notes: row.try_get("notes")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::connect_in_memory, moderation::trust::TrustEngine};

    const MODERATOR: UserId = 1;
    const USER: UserId = 9;

    async fn setup() -> (SqlitePool, PenaltyManager) {
        let db = connect_in_memory().await.unwrap();
        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins([MODERATOR]);
        (db.clone(), PenaltyManager::new(db, registry))
    }

    #[test]
    fn test_validation() {
        assert!(NewPenalty::new(USER, PenaltyType::Suspension, "spam").validate().is_err());
        assert!(NewPenalty::new(USER, PenaltyType::Suspension, "spam")
            .with_duration(0)
            .validate()
            .is_err());
        assert!(NewPenalty::new(USER, PenaltyType::Ban, "spam")
            .with_duration(3)
            .validate()
            .is_err());
        assert!(NewPenalty::new(USER, PenaltyType::Ban, " ").validate().is_err());
        assert!(NewPenalty::new(USER, PenaltyType::Restriction, "spam").validate().is_ok());
    }

    #[tokio::test]
    async fn test_suspension_expires_at_query_time() {
        let (_db, manager) = setup().await;
        let penalty = manager
            .apply(
                MODERATOR,
                NewPenalty::new(USER, PenaltyType::Suspension, "flooding").with_duration(7),
            )
            .await
            .unwrap();

        let expires = penalty.expires_at.unwrap();
        assert_eq!(expires - penalty.created_at, Duration::days(7));

        let day_six = manager
            .is_restricted_at(USER, penalty.created_at + Duration::days(6))
            .await
            .unwrap();
        assert!(day_six.restricted);
        assert_eq!(
            day_six.reason,
            format!("suspended until {}", expires.format("%Y-%m-%d"))
        );

        let day_eight = manager
            .is_restricted_at(USER, penalty.created_at + Duration::days(8))
            .await
            .unwrap();
        assert_eq!(day_eight, Restriction::none());
    }

    #[tokio::test]
    async fn test_ban_outranks_restriction() {
        let (_db, manager) = setup().await;
        manager
            .apply(MODERATOR, NewPenalty::new(USER, PenaltyType::Restriction, "links"))
            .await
            .unwrap();
        assert_eq!(
            manager.is_restricted(USER).await.unwrap().reason,
            "posting restrictions"
        );

        let ban = manager
            .create_user_action(MODERATOR, USER, UserActionKind::PermanentBan, "scam ring", None)
            .await
            .unwrap();
        assert!(ban.expires_at.is_none());
        assert!(manager.is_banned(USER).await.unwrap());
        assert_eq!(
            manager.is_restricted(USER).await.unwrap().reason,
            "permanently banned"
        );

        let removed = manager.remove(MODERATOR, ban.id, "appeal upheld").await.unwrap();
        assert!(!removed.is_active);
        assert!(removed
            .notes
            .starts_with(&format!("Revoked by moderator {} on ", MODERATOR)));
        assert!(removed.notes.ends_with("with reason: appeal upheld"));
        assert!(!manager.is_banned(USER).await.unwrap());

        assert!(matches!(
            manager.remove(MODERATOR, ban.id, "again").await,
            Err(ModerationError::Conflict(_))
        ));
        assert_eq!(manager.history(USER, USER).await.unwrap().len(), 2);
        assert_eq!(manager.list_by_user(USER, USER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_warning_bumps_trust_counter() {
        let (db, manager) = setup().await;
        manager
            .create_user_action(MODERATOR, USER, UserActionKind::Warning, "rude", None)
            .await
            .unwrap();

        let trust = TrustEngine::new(db).get(USER).await.unwrap();
        assert_eq!(trust.warning_count, 1);
    }

    #[tokio::test]
    async fn test_automatic_penalty_has_no_moderator() {
        let (_db, manager) = setup().await;
        let penalty = manager
            .apply_automatic(NewPenalty::new(USER, PenaltyType::Ban, "rule 4"))
            .await
            .unwrap();
        assert_eq!(penalty.moderator_id, None);
        assert_eq!(penalty.reason, "Automatic: rule 4");
    }

    #[tokio::test]
    async fn test_permissions() {
        let (_db, manager) = setup().await;
        let result = manager
            .apply(USER, NewPenalty::new(2, PenaltyType::Warning, "rude"))
            .await;
        assert!(matches!(result, Err(ModerationError::Unauthorized(_))));

        assert!(matches!(
            manager.history(2, USER).await,
            Err(ModerationError::Forbidden(_))
        ));
    }
}

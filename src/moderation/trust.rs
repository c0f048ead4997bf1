/// User trust scoring
///
/// A user's trust score is a weighted blend of three component scores.
/// The discrete trust level is derived from that score after deductions for
/// reports, warnings and rejected content.
use crate::{
    db::{parse_timestamp, Page, PageRequest},
    error::{ModResult, ModerationError},
    moderation::types::UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};

pub const CONTENT_WEIGHT: f64 = 0.4;
pub const COMMUNITY_WEIGHT: f64 = 0.4;
pub const MODERATOR_WEIGHT: f64 = 0.2;

pub const REPORT_PENALTY: f64 = 5.0;
pub const WARNING_PENALTY: f64 = 10.0;
pub const REJECTION_PENALTY: f64 = 2.0;

pub const DEFAULT_COMPONENT_SCORE: f64 = 50.0;

string_enum! {
    /// Discrete trust levels, lowest first
    pub enum TrustLevel ("trust level") {
        NewUser => "new_user",
        Basic => "basic",
        Member => "member",
        Regular => "regular",
        Leader => "leader",
    }
}

/// Per-user trust record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScore {
    pub user_id: UserId,
    pub content_score: f64,
    pub community_score: f64,
    pub moderator_score: f64,
    pub trust_score: f64,
    pub trust_level: TrustLevel,
    pub report_count: i64,
    pub warning_count: i64,
    pub content_rejections: i64,
    pub last_score_update: DateTime<Utc>,
}

impl TrustScore {
    /// Score after report/warning/rejection deductions
    pub fn adjusted_score(&self) -> f64 {
        adjusted_score(
            self.trust_score,
            self.report_count,
            self.warning_count,
            self.content_rejections,
        )
    }
}

/// Partial component score update; inputs are clamped to 0..=100
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentScores {
    pub content_score: Option<f64>,
    pub community_score: Option<f64>,
    pub moderator_score: Option<f64>,
}

/// Counters that feed the trust deductions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustCounter {
    Report,
    Warning,
    ContentRejection,
}

impl TrustCounter {
    fn column(&self) -> &'static str {
        match self {
            TrustCounter::Report => "report_count",
            TrustCounter::Warning => "warning_count",
            TrustCounter::ContentRejection => "content_rejections",
        }
    }
}

fn clamp_component(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// `0.4·content + 0.4·community + 0.2·moderator`, components clamped to 0..=100
pub fn weighted_score(content: f64, community: f64, moderator: f64) -> f64 {
    CONTENT_WEIGHT * clamp_component(content)
        + COMMUNITY_WEIGHT * clamp_component(community)
        + MODERATOR_WEIGHT * clamp_component(moderator)
}

pub fn adjusted_score(trust_score: f64, reports: i64, warnings: i64, rejections: i64) -> f64 {
    trust_score
        - REPORT_PENALTY * reports as f64
        - WARNING_PENALTY * warnings as f64
        - REJECTION_PENALTY * rejections as f64
}

/// Derive the trust level from the pre-penalty score and the penalty counters
pub fn derive_level(trust_score: f64, reports: i64, warnings: i64, rejections: i64) -> TrustLevel {
    let adjusted = adjusted_score(trust_score, reports, warnings, rejections);

    if adjusted >= 90.0 && rejections == 0 && warnings == 0 {
        TrustLevel::Leader
    } else if adjusted >= 75.0 {
        TrustLevel::Regular
    } else if adjusted >= 50.0 {
        TrustLevel::Member
    } else if adjusted >= 20.0 {
        TrustLevel::Basic
    } else {
        TrustLevel::NewUser
    }
}

const TRUST_COLUMNS: &str = "user_id, content_score, community_score, moderator_score, \
     trust_score, trust_level, report_count, warning_count, content_rejections, last_score_update";

/// Trust engine
#[derive(Clone)]
pub struct TrustEngine {
    db: SqlitePool,
}

impl TrustEngine {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Get a user's trust record, creating the default one on first access
    pub async fn get(&self, user_id: UserId) -> ModResult<TrustScore> {
        let mut conn = self.db.acquire().await?;
        load_or_create(&mut conn, user_id).await
    }

    /// Update component scores (moderator authority is checked by the caller)
    pub async fn update_component_scores(
        &self,
        user_id: UserId,
        scores: ComponentScores,
    ) -> ModResult<TrustScore> {
        let mut tx = self.db.begin().await?;
        let current = load_or_create(&mut tx, user_id).await?;

        let content = clamp_component(scores.content_score.unwrap_or(current.content_score));
        let community = clamp_component(scores.community_score.unwrap_or(current.community_score));
        let moderator = clamp_component(scores.moderator_score.unwrap_or(current.moderator_score));

        sqlx::query(
            r#"
            UPDATE trust_scores
            SET content_score = ?, community_score = ?, moderator_score = ?
            WHERE user_id = ?
            "#,
        )
        .bind(content)
        .bind(community)
        .bind(moderator)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let updated = recompute(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    /// Increment a penalty counter and recompute the level
    pub async fn record(&self, user_id: UserId, counter: TrustCounter) -> ModResult<TrustScore> {
        let mut tx = self.db.begin().await?;
        let score = record_in(&mut tx, user_id, counter).await?;
        tx.commit().await?;
        Ok(score)
    }

    /// List users at a trust level, highest score first
    pub async fn list_by_level(
        &self,
        level: TrustLevel,
        request: PageRequest,
    ) -> ModResult<Page<TrustScore>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trust_scores WHERE trust_level = ?")
            .bind(level.as_str())
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            "SELECT {} FROM trust_scores WHERE trust_level = ? \
             ORDER BY trust_score DESC, user_id ASC LIMIT ? OFFSET ?",
            TRUST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(level.as_str())
            .bind(request.limit())
            .bind(request.offset())
            .fetch_all(&self.db)
            .await?;

        let items = rows.into_iter().map(parse_trust).collect::<ModResult<Vec<_>>>()?;
        Ok(Page::new(items, total, request))
    }
}

/// Load a trust row inside an existing connection or transaction, creating defaults
pub(crate) async fn load_or_create(conn: &mut SqliteConnection, user_id: UserId) -> ModResult<TrustScore> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO trust_scores
        (user_id, content_score, community_score, moderator_score, trust_score,
         trust_level, last_score_update, created_at)
        VALUES (?, ?, ?, ?, ?, 'new_user', ?, ?)
        ON CONFLICT(user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(DEFAULT_COMPONENT_SCORE)
    .bind(DEFAULT_COMPONENT_SCORE)
    .bind(DEFAULT_COMPONENT_SCORE)
    .bind(DEFAULT_COMPONENT_SCORE)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let sql = format!("SELECT {} FROM trust_scores WHERE user_id = ?", TRUST_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ModerationError::Internal(format!("Trust row for {} vanished", user_id)))?;

    parse_trust(row)
}

/// Increment one counter and recompute, inside the caller's transaction
pub(crate) async fn record_in(
    conn: &mut SqliteConnection,
    user_id: UserId,
    counter: TrustCounter,
) -> ModResult<TrustScore> {
    load_or_create(conn, user_id).await?;

    let sql = format!(
        "UPDATE trust_scores SET {col} = {col} + 1 WHERE user_id = ?",
        col = counter.column()
    );
    sqlx::query(&sql).bind(user_id).execute(&mut *conn).await?;

    recompute(conn, user_id).await
}

/// Recompute the weighted score and level; stamps `last_score_update` when either changes
pub(crate) async fn recompute(conn: &mut SqliteConnection, user_id: UserId) -> ModResult<TrustScore> {
    let current = load_or_create(conn, user_id).await?;

    let score = weighted_score(
        current.content_score,
        current.community_score,
        current.moderator_score,
    );
    let level = derive_level(
        score,
        current.report_count,
        current.warning_count,
        current.content_rejections,
    );

    if (score - current.trust_score).abs() < f64::EPSILON && level == current.trust_level {
        return Ok(current);
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE trust_scores
        SET trust_score = ?, trust_level = ?, last_score_update = ?
        WHERE user_id = ?
        "#,
    )
    .bind(score)
    .bind(level.as_str())
    .bind(now.to_rfc3339())
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    if level != current.trust_level {
        info!(
            "Trust level for user {} changed from {} to {}",
            user_id, current.trust_level, level
        );
    } else {
        debug!("Trust score for user {} is now {:.2}", user_id, score);
    }

    Ok(TrustScore {
        trust_score: score,
        trust_level: level,
        last_score_update: now,
        ..current
    })
}

fn parse_trust(row: SqliteRow) -> ModResult<TrustScore> {
    let level: String = row.try_get("trust_level")?;
    Ok(TrustScore {
        user_id: row.try_get("user_id")?,
        content_score: row.try_get("content_score")?,
        community_score: row.try_get("community_score")?,
        moderator_score: row.try_get("moderator_score")?,
        trust_score: row.try_get("trust_score")?,
        trust_level: TrustLevel::from_str(&level)?,
        report_count: row.try_get("report_count")?,
        warning_count: row.try_get("warning_count")?,
        content_rejections: row.try_get("content_rejections")?,
        last_score_update: parse_timestamp(&row.try_get::<String, _>("last_score_update")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[test]
    fn test_weighted_score() {
        assert_eq!(weighted_score(80.0, 70.0, 60.0), 72.0);
        assert_eq!(weighted_score(150.0, -10.0, 100.0), 60.0);
        assert_eq!(weighted_score(50.0, 50.0, 50.0), 50.0);
    }

    #[test]
    fn test_fractional_score_below_threshold_keeps_level() {
        let score = weighted_score(89.999, 90.0, 90.0);
        assert!(score < 90.0);
        assert!((score - 89.9996).abs() < 1e-9);
        assert_eq!(derive_level(score, 0, 0, 0), TrustLevel::Regular);

        let member = weighted_score(74.99, 75.0, 75.0);
        assert_eq!(derive_level(member, 0, 0, 0), TrustLevel::Member);
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(derive_level(95.0, 0, 0, 0), TrustLevel::Leader);
        // Any rejection blocks leader even with a high score
        assert_eq!(derive_level(100.0, 0, 0, 1), TrustLevel::Regular);
        assert_eq!(derive_level(75.0, 0, 0, 0), TrustLevel::Regular);
        assert_eq!(derive_level(72.0, 0, 0, 0), TrustLevel::Member);
        assert_eq!(derive_level(72.0, 0, 0, 13), TrustLevel::Basic);
        assert_eq!(derive_level(72.0, 5, 3, 0), TrustLevel::NewUser);
        assert_eq!(derive_level(19.99, 0, 0, 0), TrustLevel::NewUser);
    }

    #[tokio::test]
    async fn test_lazy_default_record() {
        let engine = TrustEngine::new(connect_in_memory().await.unwrap());

        let score = engine.get(5).await.unwrap();
        assert_eq!(score.trust_score, 50.0);
        assert_eq!(score.trust_level, TrustLevel::NewUser);
        assert_eq!(score.content_rejections, 0);

        // Second access returns the same row
        let again = engine.get(5).await.unwrap();
        assert_eq!(again.last_score_update, score.last_score_update);
    }

    #[tokio::test]
    async fn test_component_update_and_rejections() {
        let engine = TrustEngine::new(connect_in_memory().await.unwrap());

        let score = engine
            .update_component_scores(
                9,
                ComponentScores {
                    content_score: Some(80.0),
                    community_score: Some(70.0),
                    moderator_score: Some(60.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(score.trust_score, 72.0);
        assert_eq!(score.trust_level, TrustLevel::Member);

        let after = engine.record(9, TrustCounter::ContentRejection).await.unwrap();
        assert_eq!(after.content_rejections, 1);
        assert_eq!(after.adjusted_score(), 70.0);
        assert_eq!(after.trust_level, TrustLevel::Member);

        let mut latest = after;
        for _ in 0..12 {
            latest = engine.record(9, TrustCounter::ContentRejection).await.unwrap();
        }
        assert_eq!(latest.content_rejections, 13);
        assert_eq!(latest.trust_level, TrustLevel::Basic);

        let page = engine
            .list_by_level(TrustLevel::Basic, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user_id, 9);
    }

    #[tokio::test]
    async fn test_partial_component_update_keeps_others() {
        let engine = TrustEngine::new(connect_in_memory().await.unwrap());

        let score = engine
            .update_component_scores(
                3,
                ComponentScores {
                    moderator_score: Some(100.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(score.content_score, 50.0);
        assert_eq!(score.trust_score, 60.0);
        assert_eq!(score.trust_level, TrustLevel::Member);
    }
}

/// Content filter rules and the rule evaluator
///
/// Evaluation works on one catalog snapshot: the triggered set, the chosen
/// action and the cleaned text all come from the same generation of rules
/// and prohibited words.
use crate::{
    db::parse_timestamp,
    error::{ModResult, ModerationError},
    metrics,
    moderation::{
        catalog::FilterCatalog,
        moderators::{Capability, ModeratorRegistry},
        types::{require_text, validate_severity, ModerationAction, UserId},
        verdicts::{self, FilterVerdict, NewVerdict},
        words::WordFilter,
    },
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

string_enum! {
    /// How a rule pattern is interpreted
    pub enum PatternType ("pattern type") {
        Regex => "regex",
        Keywords => "keywords",
    }
}

string_enum! {
    /// Kind of text a rule screens
    pub enum RuleScope ("rule scope") {
        Topic => "topic",
        Comment => "comment",
        Username => "username",
    }
}

/// Stored filter rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub action: ModerationAction,
    pub severity: i64,
    pub is_active: bool,
    pub applies_to: RuleScope,
    pub created_by: UserId,
    pub last_updated_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub action: ModerationAction,
    pub severity: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub applies_to: RuleScope,
}

fn default_active() -> bool {
    true
}

/// Partial update of a rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub pattern: Option<String>,
    pub pattern_type: Option<PatternType>,
    pub action: Option<ModerationAction>,
    pub severity: Option<i64>,
    pub is_active: Option<bool>,
    pub applies_to: Option<RuleScope>,
}

/// Split a keyword pattern into its trimmed, non-empty tokens
pub fn parse_keywords(pattern: &str) -> Vec<String> {
    pattern
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Validate a rule pattern at ingest
pub fn validate_pattern(pattern: &str, pattern_type: PatternType) -> ModResult<()> {
    require_text("pattern", pattern)?;
    match pattern_type {
        PatternType::Regex => {
            Regex::new(pattern).map_err(|e| {
                ModerationError::InvalidArgument(format!("Invalid regex '{}': {}", pattern, e))
            })?;
        }
        PatternType::Keywords => {
            if parse_keywords(pattern).is_empty() {
                return Err(ModerationError::InvalidArgument(
                    "Keyword pattern must list at least one keyword".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn validate_rule(name: &str, pattern: &str, pattern_type: PatternType, severity: i64) -> ModResult<()> {
    require_text("name", name)?;
    validate_pattern(pattern, pattern_type)?;
    validate_severity(severity)?;
    Ok(())
}

#[derive(Debug)]
enum Matcher {
    Regex(Regex),
    Keywords(Vec<String>),
}

/// A rule with its pattern compiled for evaluation
#[derive(Debug)]
pub struct CompiledRule {
    pub rule: Rule,
    matcher: Matcher,
}

impl CompiledRule {
    /// Compile a stored rule; rules whose pattern no longer compiles are skipped
    pub fn compile(rule: Rule) -> Option<Self> {
        let matcher = match rule.pattern_type {
            PatternType::Regex => match Regex::new(&rule.pattern) {
                Ok(regex) => Matcher::Regex(regex),
                Err(e) => {
                    warn!("Skipping rule {} with invalid pattern: {}", rule.id, e);
                    return None;
                }
            },
            PatternType::Keywords => {
                let keywords = parse_keywords(&rule.pattern);
                if keywords.is_empty() {
                    warn!("Skipping rule {} with empty keyword list", rule.id);
                    return None;
                }
                Matcher::Keywords(keywords)
            }
        };
        Some(Self { rule, matcher })
    }

    /// The matched fragment of `text`, if the rule triggers
    pub fn find(&self, text: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Regex(regex) => regex.find(text).map(|m| m.as_str().to_string()),
            Matcher::Keywords(keywords) => {
                let lowered = text.to_lowercase();
                keywords.iter().find(|k| lowered.contains(k.as_str())).cloned()
            }
        }
    }
}

/// Verdict action among triggered rules: highest severity, then most restrictive action
pub fn select_action<'a>(triggered: impl IntoIterator<Item = &'a Rule>) -> Option<ModerationAction> {
    triggered
        .into_iter()
        .max_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.action.cmp(&b.action))
        })
        .map(|rule| rule.action)
}

/// Result of matching text against a rule set, before word filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub triggered_rule_ids: Vec<i64>,
    pub triggered_rule_names: Vec<String>,
    pub action: ModerationAction,
    pub top_severity: i64,
    pub fragments: Vec<String>,
}

/// Match text against the active rules for a scope
pub fn match_rules(rules: &[CompiledRule], text: &str, scope: RuleScope) -> Option<RuleMatch> {
    let mut hits: Vec<(&Rule, String)> = rules
        .iter()
        .filter(|r| r.rule.is_active && r.rule.applies_to == scope)
        .filter_map(|r| r.find(text).map(|fragment| (&r.rule, fragment)))
        .collect();

    if hits.is_empty() {
        return None;
    }

    hits.sort_by_key(|(rule, _)| rule.id);

    let action = select_action(hits.iter().map(|(rule, _)| *rule))?;
    let top_severity = hits.iter().map(|(rule, _)| rule.severity).max().unwrap_or(1);

    let mut fragments: Vec<String> = Vec::new();
    for (_, fragment) in &hits {
        if !fragments.contains(fragment) {
            fragments.push(fragment.clone());
        }
    }

    Some(RuleMatch {
        triggered_rule_ids: hits.iter().map(|(rule, _)| rule.id).collect(),
        triggered_rule_names: hits.iter().map(|(rule, _)| rule.name.clone()).collect(),
        action,
        top_severity,
        fragments,
    })
}

/// Evaluated verdict together with the rule details the pipelines need
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: FilterVerdict,
    pub triggered_rule_names: Vec<String>,
    pub top_severity: i64,
}

pub(crate) const RULE_COLUMNS: &str = "id, name, description, pattern, pattern_type, action, severity, \
     is_active, applies_to, created_by, last_updated_by, created_at, updated_at";

/// Rule manager and evaluator
#[derive(Clone)]
pub struct RuleManager {
    db: SqlitePool,
    catalog: Arc<FilterCatalog>,
    registry: ModeratorRegistry,
}

impl RuleManager {
    pub fn new(db: SqlitePool, catalog: Arc<FilterCatalog>, registry: ModeratorRegistry) -> Self {
        Self {
            db,
            catalog,
            registry,
        }
    }

    /// Create a rule
    pub async fn create(&self, caller: UserId, new: NewRule) -> ModResult<Rule> {
        self.registry.require_capability(caller, Capability::ManageRules).await?;
        validate_rule(&new.name, &new.pattern, new.pattern_type, new.severity)?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO filter_rules
            (name, description, pattern, pattern_type, action, severity, is_active,
             applies_to, created_by, last_updated_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.pattern)
        .bind(new.pattern_type.as_str())
        .bind(new.action.as_str())
        .bind(new.severity)
        .bind(new.is_active)
        .bind(new.applies_to.as_str())
        .bind(caller)
        .bind(caller)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        self.catalog.bump();
        info!("Filter rule '{}' created by {}", new.name, caller);

        Ok(Rule {
            id: result.last_insert_rowid(),
            name: new.name,
            description: new.description,
            pattern: new.pattern,
            pattern_type: new.pattern_type,
            action: new.action,
            severity: new.severity,
            is_active: new.is_active,
            applies_to: new.applies_to,
            created_by: caller,
            last_updated_by: caller,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a rule by id
    pub async fn get(&self, id: i64) -> ModResult<Rule> {
        let sql = format!("SELECT {} FROM filter_rules WHERE id = ?", RULE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("Filter rule {} not found", id)))?;
        parse_rule(row)
    }

    /// List rules, optionally restricted to a scope and to active rules
    pub async fn list(&self, applies_to: Option<RuleScope>, active_only: bool) -> ModResult<Vec<Rule>> {
        let mut sql = format!("SELECT {} FROM filter_rules WHERE 1 = 1", RULE_COLUMNS);
        if applies_to.is_some() {
            sql.push_str(" AND applies_to = ?");
        }
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY severity DESC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(scope) = applies_to {
            query = query.bind(scope.as_str());
        }
        let rows = query.fetch_all(&self.db).await?;

        rows.into_iter().map(parse_rule).collect()
    }

    /// Update a rule; the merged rule is validated before writing
    pub async fn update(&self, caller: UserId, id: i64, update: RuleUpdate) -> ModResult<Rule> {
        self.registry.require_capability(caller, Capability::ManageRules).await?;
        let existing = self.get(id).await?;

        let merged = Rule {
            name: update.name.unwrap_or(existing.name),
            description: update.description.unwrap_or(existing.description),
            pattern: update.pattern.unwrap_or(existing.pattern),
            pattern_type: update.pattern_type.unwrap_or(existing.pattern_type),
            action: update.action.unwrap_or(existing.action),
            severity: update.severity.unwrap_or(existing.severity),
            is_active: update.is_active.unwrap_or(existing.is_active),
            applies_to: update.applies_to.unwrap_or(existing.applies_to),
            last_updated_by: caller,
            updated_at: Utc::now(),
            ..existing
        };
        validate_rule(&merged.name, &merged.pattern, merged.pattern_type, merged.severity)?;

        sqlx::query(
            r#"
            UPDATE filter_rules
            SET name = ?, description = ?, pattern = ?, pattern_type = ?, action = ?,
                severity = ?, is_active = ?, applies_to = ?, last_updated_by = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&merged.name)
        .bind(&merged.description)
        .bind(&merged.pattern)
        .bind(merged.pattern_type.as_str())
        .bind(merged.action.as_str())
        .bind(merged.severity)
        .bind(merged.is_active)
        .bind(merged.applies_to.as_str())
        .bind(caller)
        .bind(merged.updated_at.to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        self.catalog.bump();
        info!("Filter rule {} updated by {}", id, caller);
        Ok(merged)
    }

    /// Delete a rule
    pub async fn delete(&self, caller: UserId, id: i64) -> ModResult<()> {
        self.registry.require_capability(caller, Capability::ManageRules).await?;

        let result = sqlx::query("DELETE FROM filter_rules WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("Filter rule {} not found", id)));
        }

        self.catalog.bump();
        info!("Filter rule {} deleted by {}", id, caller);
        Ok(())
    }

    /// Evaluate text against the active rules; `None` when nothing triggers
    ///
    /// A triggered evaluation is persisted as a filter verdict.
    pub async fn evaluate(
        &self,
        user_id: UserId,
        text: &str,
        scope: RuleScope,
        content_id: Option<i64>,
    ) -> ModResult<Option<Evaluation>> {
        let snapshot = self.catalog.snapshot().await?;

        let Some(matched) = match_rules(&snapshot.rules, text, scope) else {
            debug!("No rules triggered for {} by user {}", scope, user_id);
            return Ok(None);
        };

        let cleaned = clean_text(&snapshot.words, text);

        let mut conn = self.db.acquire().await?;
        let verdict = verdicts::insert_in(
            &mut conn,
            NewVerdict {
                scope,
                content_id,
                user_id,
                content: text,
                triggered_rule_ids: matched.triggered_rule_ids,
                action: matched.action,
                filtered_content: matched.fragments.join(","),
                cleaned_content: cleaned,
            },
        )
        .await?;

        metrics::FILTER_VERDICTS_TOTAL
            .with_label_values(&[verdict.action.as_str()])
            .inc();
        info!(
            "Filter verdict {} for user {}: {} via rules {:?}",
            verdict.id, user_id, verdict.action, verdict.triggered_rule_ids
        );

        Ok(Some(Evaluation {
            verdict,
            triggered_rule_names: matched.triggered_rule_names,
            top_severity: matched.top_severity,
        }))
    }
}

fn clean_text(words: &WordFilter, text: &str) -> String {
    words.apply(text).cleaned
}

pub(crate) fn parse_rule(row: SqliteRow) -> ModResult<Rule> {
    let pattern_type: String = row.try_get("pattern_type")?;
    let action: String = row.try_get("action")?;
    let applies_to: String = row.try_get("applies_to")?;

    Ok(Rule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        pattern: row.try_get("pattern")?,
        pattern_type: PatternType::from_str(&pattern_type)?,
        action: ModerationAction::from_str(&action)?,
        severity: row.try_get("severity")?,
        is_active: row.try_get("is_active")?,
        applies_to: RuleScope::from_str(&applies_to)?,
        created_by: row.try_get("created_by")?,
        last_updated_by: row.try_get("last_updated_by")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn rule(id: i64, pattern: &str, pattern_type: PatternType, action: ModerationAction, severity: i64) -> Rule {
        Rule {
            id,
            name: format!("rule-{}", id),
            description: String::new(),
            pattern: pattern.to_string(),
            pattern_type,
            action,
            severity,
            is_active: true,
            applies_to: RuleScope::Comment,
            created_by: 1,
            last_updated_by: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn compiled(rules: Vec<Rule>) -> Vec<CompiledRule> {
        rules.into_iter().filter_map(CompiledRule::compile).collect()
    }

    #[test]
    fn test_highest_severity_wins() {
        let rules = compiled(vec![
            rule(1, "spam", PatternType::Keywords, ModerationAction::PermanentBan, 3),
            rule(2, "spam", PatternType::Keywords, ModerationAction::SendToQueue, 8),
        ]);
        let matched = match_rules(&rules, "buy spam", RuleScope::Comment).unwrap();
        assert_eq!(matched.action, ModerationAction::SendToQueue);
        assert_eq!(matched.top_severity, 8);
        assert_eq!(matched.triggered_rule_ids, vec![1, 2]);
    }

    #[test]
    fn test_severity_tie_takes_more_restrictive() {
        let forward = compiled(vec![
            rule(1, "spam", PatternType::Keywords, ModerationAction::Reject, 5),
            rule(2, r"sp[a@]m", PatternType::Regex, ModerationAction::Warning, 5),
        ]);
        let reversed = compiled(vec![
            rule(2, r"sp[a@]m", PatternType::Regex, ModerationAction::Warning, 5),
            rule(1, "spam", PatternType::Keywords, ModerationAction::Reject, 5),
        ]);

        let a = match_rules(&forward, "spam here", RuleScope::Comment).unwrap();
        let b = match_rules(&reversed, "spam here", RuleScope::Comment).unwrap();
        assert_eq!(a.action, ModerationAction::Warning);
        assert_eq!(a, b);
    }

    #[test]
    fn test_scope_and_inactive_rules_are_ignored() {
        let mut topic_rule = rule(1, "spam", PatternType::Keywords, ModerationAction::Reject, 5);
        topic_rule.applies_to = RuleScope::Topic;
        let mut inactive = rule(2, "spam", PatternType::Keywords, ModerationAction::Reject, 5);
        inactive.is_active = false;

        let rules = compiled(vec![topic_rule, inactive]);
        assert!(match_rules(&rules, "spam", RuleScope::Comment).is_none());
    }

    #[test]
    fn test_keyword_matching() {
        let rules = compiled(vec![rule(
            1,
            " cheap pills , ,Casino",
            PatternType::Keywords,
            ModerationAction::Reject,
            4,
        )]);
        let matched = match_rules(&rules, "Visit our CASINO tonight", RuleScope::Comment).unwrap();
        assert_eq!(matched.fragments, vec!["casino".to_string()]);
        assert!(match_rules(&rules, "cheap flights", RuleScope::Comment).is_none());
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("(unclosed", PatternType::Regex).is_err());
        assert!(validate_pattern(" , ,", PatternType::Keywords).is_err());
        assert!(validate_pattern("a,b", PatternType::Keywords).is_ok());
        assert!(validate_pattern(r"\bspam\b", PatternType::Regex).is_ok());
    }

    #[test]
    fn test_invalid_stored_rule_is_skipped() {
        assert!(CompiledRule::compile(rule(1, "(bad", PatternType::Regex, ModerationAction::Reject, 2)).is_none());
    }

    fn new_rule(pattern: &str, severity: i64) -> NewRule {
        NewRule {
            name: "profanity".to_string(),
            description: String::new(),
            pattern: pattern.to_string(),
            pattern_type: PatternType::Keywords,
            action: ModerationAction::SendToQueue,
            severity,
            is_active: true,
            applies_to: RuleScope::Comment,
        }
    }

    #[tokio::test]
    async fn test_rule_crud_requires_manage_rules() {
        let db = connect_in_memory().await.unwrap();
        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins([1]);
        let catalog = Arc::new(FilterCatalog::new(db.clone()));
        let manager = RuleManager::new(db, catalog.clone(), registry);

        let denied = manager.create(2, new_rule("badword", 5)).await;
        assert!(matches!(denied, Err(ModerationError::Unauthorized(_))));

        let invalid = manager.create(1, new_rule("badword", 11)).await;
        assert!(matches!(invalid, Err(ModerationError::InvalidArgument(_))));

        let before = catalog.generation();
        let created = manager.create(1, new_rule("badword", 5)).await.unwrap();
        assert!(catalog.generation() > before);

        let updated = manager
            .update(
                1,
                created.id,
                RuleUpdate {
                    severity: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.severity, 7);
        assert_eq!(updated.pattern, "badword");

        let bad_update = manager
            .update(
                1,
                created.id,
                RuleUpdate {
                    pattern_type: Some(PatternType::Regex),
                    pattern: Some("(oops".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(bad_update, Err(ModerationError::InvalidArgument(_))));

        assert_eq!(manager.list(Some(RuleScope::Comment), true).await.unwrap().len(), 1);
        assert!(manager.list(Some(RuleScope::Topic), false).await.unwrap().is_empty());

        manager.delete(1, created.id).await.unwrap();
        assert!(matches!(
            manager.get(created.id).await,
            Err(ModerationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_evaluate_sees_rule_writes() {
        let db = connect_in_memory().await.unwrap();
        let registry = ModeratorRegistry::new(db.clone()).with_bootstrap_admins([1]);
        let catalog = Arc::new(FilterCatalog::new(db.clone()));
        let manager = RuleManager::new(db, catalog, registry);

        assert!(manager
            .evaluate(42, "this has BadWord in it", RuleScope::Comment, None)
            .await
            .unwrap()
            .is_none());

        let created = manager.create(1, new_rule("badword", 5)).await.unwrap();
        let evaluation = manager
            .evaluate(42, "this has BadWord in it", RuleScope::Comment, Some(101))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(evaluation.verdict.action, ModerationAction::SendToQueue);
        assert_eq!(evaluation.verdict.triggered_rule_ids, vec![created.id]);
        assert_eq!(evaluation.verdict.cleaned_content, "this has BadWord in it");
        assert!(evaluation.verdict.automatically_processed);
        assert_eq!(evaluation.triggered_rule_names, vec!["profanity".to_string()]);
    }
}

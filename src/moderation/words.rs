/// Prohibited word catalog and text filter
///
/// Literal words match case-insensitively anywhere in the text. Regex words
/// are used as written. Auto-replace words are substituted in the cleaned
/// output; the others are only reported as matched.
use crate::{
    db::parse_timestamp,
    error::{ModResult, ModerationError},
    moderation::{
        catalog::FilterCatalog,
        moderators::{Capability, ModeratorRegistry},
        types::{require_text, validate_severity, UserId},
    },
};
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::sync::Arc;
use tracing::{info, warn};

/// Stored prohibited word
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProhibitedWord {
    pub id: i64,
    pub word: String,
    pub replacement: String,
    pub is_regex: bool,
    pub is_auto_replace: bool,
    pub severity: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to add a prohibited word
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProhibitedWord {
    pub word: String,
    #[serde(default)]
    pub replacement: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_true")]
    pub is_auto_replace: bool,
    #[serde(default = "default_severity")]
    pub severity: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

fn default_severity() -> i64 {
    1
}

/// Partial update of a prohibited word
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WordUpdate {
    pub word: Option<String>,
    pub replacement: Option<String>,
    pub is_regex: Option<bool>,
    pub is_auto_replace: Option<bool>,
    pub severity: Option<i64>,
    pub is_active: Option<bool>,
}

/// Result of running text through the word filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub cleaned: String,
    pub was_filtered: bool,
    pub matched_terms: Vec<String>,
}

fn compile_word(word: &str, is_regex: bool) -> Result<Regex, regex::Error> {
    if is_regex {
        Regex::new(word)
    } else {
        Regex::new(&format!("(?i){}", regex::escape(word)))
    }
}

/// Validate a word at ingest: non-empty, and regex words must compile
pub fn validate_word(word: &str, is_regex: bool) -> ModResult<()> {
    require_text("word", word)?;
    compile_word(word, is_regex).map_err(|e| {
        ModerationError::InvalidArgument(format!("Invalid regex '{}': {}", word, e))
    })?;
    Ok(())
}

#[derive(Debug)]
struct CompiledWord {
    word: String,
    replacement: String,
    auto_replace: bool,
    regex: Regex,
}

impl CompiledWord {
    fn from_word(word: &ProhibitedWord) -> Option<Self> {
        match compile_word(&word.word, word.is_regex) {
            Ok(regex) => Some(Self {
                word: word.word.clone(),
                replacement: word.replacement.clone(),
                auto_replace: word.is_auto_replace,
                regex,
            }),
            Err(e) => {
                warn!("Skipping prohibited word {} with invalid pattern: {}", word.id, e);
                None
            }
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.regex.find_iter(text).any(|m| !m.as_str().is_empty())
    }

    fn replace(&self, text: &str) -> String {
        self.regex
            .replace_all(text, |caps: &Captures| {
                let matched = &caps[0];
                if matched.is_empty() {
                    String::new()
                } else {
                    self.replacement.clone()
                }
            })
            .into_owned()
    }
}

/// Compiled, immutable view of the active prohibited words
#[derive(Debug, Default)]
pub struct WordFilter {
    words: Vec<CompiledWord>,
}

impl WordFilter {
    /// Compile the active words, skipping invalid stored patterns
    pub fn compile(words: &[ProhibitedWord]) -> Self {
        Self {
            words: words
                .iter()
                .filter(|w| w.is_active)
                .filter_map(CompiledWord::from_word)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Filter text: returns the cleaned text, whether anything matched, and the matched words
    pub fn apply(&self, text: &str) -> FilterOutcome {
        let mut cleaned = text.to_string();
        let mut matched_terms: Vec<String> = Vec::new();

        for word in &self.words {
            if !word.matches(&cleaned) {
                continue;
            }

            if !matched_terms.contains(&word.word) {
                matched_terms.push(word.word.clone());
            }

            if word.auto_replace {
                cleaned = word.replace(&cleaned);
            }
        }

        FilterOutcome {
            was_filtered: !matched_terms.is_empty(),
            cleaned,
            matched_terms,
        }
    }
}

const WORD_COLUMNS: &str =
    "id, word, replacement, is_regex, is_auto_replace, severity, is_active, created_at, updated_at";

/// Prohibited word manager
#[derive(Clone)]
pub struct ProhibitedWordManager {
    db: SqlitePool,
    catalog: Arc<FilterCatalog>,
    registry: ModeratorRegistry,
}

impl ProhibitedWordManager {
    pub fn new(db: SqlitePool, catalog: Arc<FilterCatalog>, registry: ModeratorRegistry) -> Self {
        Self {
            db,
            catalog,
            registry,
        }
    }

    /// Add a prohibited word
    pub async fn add(&self, caller: UserId, new: NewProhibitedWord) -> ModResult<ProhibitedWord> {
        self.registry.require_capability(caller, Capability::ManageRules).await?;
        validate_word(&new.word, new.is_regex)?;
        validate_severity(new.severity)?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO prohibited_words
            (word, replacement, is_regex, is_auto_replace, severity, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.word)
        .bind(&new.replacement)
        .bind(new.is_regex)
        .bind(new.is_auto_replace)
        .bind(new.severity)
        .bind(new.is_active)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        self.catalog.bump();
        info!("Prohibited word added by {}", caller);

        Ok(ProhibitedWord {
            id: result.last_insert_rowid(),
            word: new.word,
            replacement: new.replacement,
            is_regex: new.is_regex,
            is_auto_replace: new.is_auto_replace,
            severity: new.severity,
            is_active: new.is_active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a prohibited word by id
    pub async fn get(&self, id: i64) -> ModResult<ProhibitedWord> {
        let sql = format!("SELECT {} FROM prohibited_words WHERE id = ?", WORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| ModerationError::NotFound(format!("Prohibited word {} not found", id)))?;
        parse_word(row)
    }

    /// List prohibited words
    pub async fn list(&self, active_only: bool) -> ModResult<Vec<ProhibitedWord>> {
        let sql = if active_only {
            format!(
                "SELECT {} FROM prohibited_words WHERE is_active = 1 ORDER BY id ASC",
                WORD_COLUMNS
            )
        } else {
            format!("SELECT {} FROM prohibited_words ORDER BY id ASC", WORD_COLUMNS)
        };
        let rows = sqlx::query(&sql).fetch_all(&self.db).await?;
        rows.into_iter().map(parse_word).collect()
    }

    /// Update a prohibited word; the merged result is validated before writing
    pub async fn update(&self, caller: UserId, id: i64, update: WordUpdate) -> ModResult<ProhibitedWord> {
        self.registry.require_capability(caller, Capability::ManageRules).await?;
        let existing = self.get(id).await?;

        let merged = ProhibitedWord {
            word: update.word.unwrap_or(existing.word),
            replacement: update.replacement.unwrap_or(existing.replacement),
            is_regex: update.is_regex.unwrap_or(existing.is_regex),
            is_auto_replace: update.is_auto_replace.unwrap_or(existing.is_auto_replace),
            severity: update.severity.unwrap_or(existing.severity),
            is_active: update.is_active.unwrap_or(existing.is_active),
            updated_at: Utc::now(),
            ..existing
        };
        validate_word(&merged.word, merged.is_regex)?;
        validate_severity(merged.severity)?;

        sqlx::query(
            r#"
            UPDATE prohibited_words
            SET word = ?, replacement = ?, is_regex = ?, is_auto_replace = ?,
                severity = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&merged.word)
        .bind(&merged.replacement)
        .bind(merged.is_regex)
        .bind(merged.is_auto_replace)
        .bind(merged.severity)
        .bind(merged.is_active)
        .bind(merged.updated_at.to_rfc3339())
        .bind(id)
        .execute(&self.db)
        .await?;

        self.catalog.bump();
        Ok(merged)
    }

    /// Delete a prohibited word
    pub async fn delete(&self, caller: UserId, id: i64) -> ModResult<()> {
        self.registry.require_capability(caller, Capability::ManageRules).await?;

        let result = sqlx::query("DELETE FROM prohibited_words WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::NotFound(format!("Prohibited word {} not found", id)));
        }

        self.catalog.bump();
        info!("Prohibited word {} deleted by {}", id, caller);
        Ok(())
    }

    /// Filter text against the current catalog snapshot
    pub async fn filter_text(&self, text: &str) -> ModResult<FilterOutcome> {
        let snapshot = self.catalog.snapshot().await?;
        Ok(snapshot.words.apply(text))
    }
}

pub(crate) fn parse_word(row: SqliteRow) -> ModResult<ProhibitedWord> {
    Ok(ProhibitedWord {
        id: row.try_get("id")?,
        word: row.try_get("word")?,
        replacement: row.try_get("replacement")?,
        is_regex: row.try_get("is_regex")?,
        is_auto_replace: row.try_get("is_auto_replace")?,
        severity: row.try_get("severity")?,
        is_active: row.try_get("is_active")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

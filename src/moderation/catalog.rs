/// Generation-tracked cache of the rule and prohibited-word catalog
///
/// Writers bump the generation after their write lands. Readers take an
/// `Arc` snapshot; a stale snapshot is reloaded from the store inside one
/// read transaction, so rules and words always come from the same state.
use crate::{
    error::ModResult,
    metrics,
    moderation::{
        rules::{parse_rule, CompiledRule, RULE_COLUMNS},
        words::{parse_word, WordFilter},
    },
};
use sqlx::SqlitePool;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::RwLock;
use tracing::debug;

/// Immutable view of the active rules and words at one generation
#[derive(Debug)]
pub struct CatalogSnapshot {
    pub generation: u64,
    pub rules: Vec<CompiledRule>,
    pub words: WordFilter,
}

pub struct FilterCatalog {
    db: SqlitePool,
    generation: AtomicU64,
    snapshot: RwLock<Option<Arc<CatalogSnapshot>>>,
}

impl FilterCatalog {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            generation: AtomicU64::new(1),
            snapshot: RwLock::new(None),
        }
    }

    /// Current catalog generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate cached snapshots after a catalog write
    pub fn bump(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::RULE_CACHE_GENERATION.set(next as i64);
        next
    }

    /// Snapshot for the current generation, loading it if needed
    pub async fn snapshot(&self) -> ModResult<Arc<CatalogSnapshot>> {
        let generation = self.generation();

        {
            let cached = self.snapshot.read().await;
            if let Some(snapshot) = cached.as_ref() {
                if snapshot.generation == generation {
                    return Ok(snapshot.clone());
                }
            }
        }

        let loaded = Arc::new(self.load(generation).await?);

        let mut cached = self.snapshot.write().await;
        if let Some(existing) = cached.as_ref() {
            if existing.generation > loaded.generation {
                return Ok(existing.clone());
            }
        }
        *cached = Some(loaded.clone());
        Ok(loaded)
    }

    async fn load(&self, generation: u64) -> ModResult<CatalogSnapshot> {
        let mut tx = self.db.begin().await?;

        let sql = format!(
            "SELECT {} FROM filter_rules WHERE is_active = 1 ORDER BY id ASC",
            RULE_COLUMNS
        );
        let rule_rows = sqlx::query(&sql).fetch_all(&mut *tx).await?;

        let word_rows = sqlx::query(
            r#"
            SELECT id, word, replacement, is_regex, is_auto_replace, severity, is_active, created_at, updated_at
            FROM prohibited_words
            WHERE is_active = 1
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let rules = rule_rows
            .into_iter()
            .map(parse_rule)
            .collect::<ModResult<Vec<_>>>()?
            .into_iter()
            .filter_map(CompiledRule::compile)
            .collect::<Vec<_>>();

        let words = word_rows.into_iter().map(parse_word).collect::<ModResult<Vec<_>>>()?;
        let words = WordFilter::compile(&words);

        debug!(
            "Loaded filter catalog generation {}: {} rules, {} words",
            generation,
            rules.len(),
            words.len()
        );

        Ok(CatalogSnapshot {
            generation,
            rules,
            words,
        })
    }
}

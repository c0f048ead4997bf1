/// Port to the forum service that owns topics and comments
use crate::{
    error::ModResult,
    moderation::types::{ContentKind, ContentRef, UserId},
};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// Existence and authorship lookups for moderated content
#[async_trait]
pub trait ContentDirectory: Send + Sync {
    /// Whether the referenced content item exists
    async fn content_exists(&self, target: ContentRef) -> ModResult<bool>;

    /// Author of the referenced content item, if it exists
    async fn author_of(&self, target: ContentRef) -> ModResult<Option<UserId>>;
}

/// Directory backed by the forum's `topics` and `comments` tables in the shared database
#[derive(Clone)]
pub struct SqliteContentDirectory {
    db: SqlitePool,
}

impl SqliteContentDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    fn table(kind: ContentKind) -> &'static str {
        match kind {
            ContentKind::Topic => "topics",
            ContentKind::Comment => "comments",
        }
    }
}

#[async_trait]
impl ContentDirectory for SqliteContentDirectory {
    async fn content_exists(&self, target: ContentRef) -> ModResult<bool> {
        Ok(self.author_of(target).await?.is_some())
    }

    async fn author_of(&self, target: ContentRef) -> ModResult<Option<UserId>> {
        let sql = format!("SELECT user_id FROM {} WHERE id = ?", Self::table(target.kind));
        let author = sqlx::query_scalar::<_, i64>(&sql)
            .bind(target.id)
            .fetch_optional(&self.db)
            .await?;
        Ok(author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[tokio::test]
    async fn test_lookup_forum_content() {
        let db = connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO topics (id, user_id, title) VALUES (77, 5, 'Elections')")
            .execute(&db)
            .await
            .unwrap();

        let directory = SqliteContentDirectory::new(db);
        let topic = ContentRef::topic(77).unwrap();

        assert!(directory.content_exists(topic).await.unwrap());
        assert_eq!(directory.author_of(topic).await.unwrap(), Some(5));
        assert!(!directory
            .content_exists(ContentRef::comment(77).unwrap())
            .await
            .unwrap());
    }
}

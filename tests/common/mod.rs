//! Shared harness for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use gn_moderation::{
    db::connect_in_memory,
    error::ModResult,
    moderation::{
        moderators::ModeratorCapabilities,
        service::{ModerationService, ServiceOptions},
        types::{ContentRef, UserId},
        ContentDirectory,
    },
};
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Bootstrap admin configured on every harness
pub const ADMIN: UserId = 1;
/// Moderator granted every capability by the admin
pub const MODERATOR: UserId = 2;

/// Content directory backed by a map of content to author
#[derive(Default)]
pub struct InMemoryContent {
    authors: RwLock<HashMap<ContentRef, UserId>>,
}

impl InMemoryContent {
    pub fn insert(&self, target: ContentRef, author: UserId) {
        if let Ok(mut authors) = self.authors.write() {
            authors.insert(target, author);
        }
    }
}

#[async_trait]
impl ContentDirectory for InMemoryContent {
    async fn content_exists(&self, target: ContentRef) -> ModResult<bool> {
        Ok(self
            .authors
            .read()
            .map(|authors| authors.contains_key(&target))
            .unwrap_or(false))
    }

    async fn author_of(&self, target: ContentRef) -> ModResult<Option<UserId>> {
        Ok(self
            .authors
            .read()
            .ok()
            .and_then(|authors| authors.get(&target).copied()))
    }
}

pub struct Harness {
    pub db: SqlitePool,
    pub content: Arc<InMemoryContent>,
    pub service: ModerationService,
}

impl Harness {
    pub fn topic(&self, id: i64, author: UserId) -> ContentRef {
        let target = ContentRef::topic(id).unwrap();
        self.content.insert(target, author);
        target
    }

    pub fn comment(&self, id: i64, author: UserId) -> ContentRef {
        let target = ContentRef::comment(id).unwrap();
        self.content.insert(target, author);
        target
    }
}

/// Migrated in-memory database with an admin and a full-capability moderator
pub async fn harness() -> Harness {
    let db = connect_in_memory().await.unwrap();
    let content = Arc::new(InMemoryContent::default());
    let service = ModerationService::new(
        db.clone(),
        content.clone(),
        ServiceOptions {
            bootstrap_admins: vec![ADMIN],
            default_suspension_days: 7,
        },
    );

    service
        .registry
        .grant(ADMIN, MODERATOR, ModeratorCapabilities::all())
        .await
        .unwrap();

    Harness { db, content, service }
}

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use database::Database;
use embedding_engine::EmbeddingProvider;
use matching_service::Subscription;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thoughtmates_core::{
    BroadcastEvent, ContentStore, CoreError, DatabaseConfig, EmbeddingError, User, UserStore,
    Vector,
};

pub async fn setup_test_db() -> Arc<Database> {
    let db_path = env::temp_dir().join(format!("test_matching_{}.db", uuid::Uuid::new_v4()));
    let config = DatabaseConfig {
        url: format!("sqlite://{}", db_path.display()),
        ..Default::default()
    };

    let db = Database::connect(&config)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    Arc::new(db)
}

pub async fn user(db: &Database, name: &str) -> User {
    db.create_user(name, None, "")
        .await
        .expect("Failed to create user")
}

pub async fn thought(db: &Database, user: &User, vector: Vector) -> i64 {
    db.insert_content(user.id, "a thought", &vector, Utc::now())
        .await
        .expect("Failed to insert thought")
        .id
}

/// Unit vector whose cosine against `[1, 0]` is `cos`.
pub fn unit_at(cos: f32) -> Vector {
    vec![cos, (1.0 - cos * cos).sqrt()]
}

/// Embeds known phrases to fixed vectors; anything else is rejected.
pub struct FixedProvider {
    vectors: HashMap<String, Vector>,
}

impl FixedProvider {
    pub fn new(entries: &[(&str, Vector)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    async fn embed(&self, text: &str) -> Result<Vector, CoreError> {
        self.vectors.get(text).cloned().ok_or_else(|| {
            EmbeddingError::InvalidResponse {
                details: format!("no vector for {text:?}"),
            }
            .into()
        })
    }
}

/// Waits for the first event matching `predicate`, skipping others.
pub async fn wait_for<F>(subscription: &mut Subscription, mut predicate: F) -> BroadcastEvent
where
    F: FnMut(&BroadcastEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match subscription.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("Subscription closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}

//! The `membership` module answers the only question the fan-out core asks
//! of the relational database: which rooms may a given user join?
//!
//! The query runs once per connection, at upgrade time. The schema itself
//! belongs to the REST subsystem; this module only depends on the
//! `chats_users` contract.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;

use crate::utils::FanoutError;

/// The membership oracle.
#[async_trait]
pub trait Membership: Send + Sync {
    /// Room ids the user is authorized to subscribe to.
    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<String>, FanoutError>;
}

/// Membership oracle backed by the chat backend's Postgres database.
pub struct PostgresMembership {
    pool: PgPool,
}

impl PostgresMembership {
    pub async fn connect(url: &str) -> Result<Self, FanoutError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| FanoutError::DbAccess(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Connect with up to five retries and a growing pause, so the server
    /// survives the database coming up after it in orchestrated deployments.
    pub async fn connect_with_retry(url: &str) -> Result<Self, FanoutError> {
        let mut pause = Duration::from_secs(5);
        let mut attempts = 0;
        loop {
            match Self::connect(url).await {
                Ok(store) => return Ok(store),
                Err(e) if attempts < 5 => {
                    attempts += 1;
                    warn!(
                        "Failed to connect to database, retrying in {}s (attempt {}): {}",
                        pause.as_secs(),
                        attempts,
                        e
                    );
                    tokio::time::sleep(pause).await;
                    pause += Duration::from_secs(5);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Membership for PostgresMembership {
    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<String>, FanoutError> {
        sqlx::query_scalar::<_, String>("SELECT chat_id FROM chats_users WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FanoutError::DbAccess(e.to_string()))
    }
}

/// Membership oracle over a fixed in-memory map. Used by tests and by the
/// smoke-test client flow, where no database is available.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    rooms: HashMap<String, Vec<String>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user_id: &str, rooms: &[&str]) -> Self {
        self.rooms.insert(
            user_id.to_string(),
            rooms.iter().map(|r| r.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl Membership for StaticMembership {
    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<String>, FanoutError> {
        Ok(self.rooms.get(user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::{Membership, StaticMembership};

    #[tokio::test]
    async fn static_membership_returns_granted_rooms() {
        let store = StaticMembership::new().grant("alice", &["r1", "r2"]);
        let rooms = store.rooms_for_user("alice").await.unwrap();
        assert_eq!(rooms, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[tokio::test]
    async fn static_membership_unknown_user_has_no_rooms() {
        let store = StaticMembership::new();
        assert!(store.rooms_for_user("nobody").await.unwrap().is_empty());
    }
}

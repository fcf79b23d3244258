use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use linkup_types::events::ConnectionId;

/// Which connection currently speaks for which user.
///
/// A user has at most one live mapping. A newer registration replaces the
/// old one without closing the old connection, so the old connection's
/// eventual disconnect must not remove the newer mapping.
#[derive(Default)]
pub struct PresenceRegistry {
    users: RwLock<HashMap<String, ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `user_id` to `conn_id`. Returns false (and does nothing) for an empty user id.
    pub async fn register(&self, user_id: &str, conn_id: ConnectionId) -> bool {
        if user_id.is_empty() {
            return false;
        }

        let mut users = self.users.write().await;

        // One identity per connection
        users.retain(|uid, cid| *cid != conn_id || uid == user_id);

        if let Some(previous) = users.insert(user_id.to_string(), conn_id) {
            if previous != conn_id {
                debug!("{} superseded stale connection {} with {}", user_id, previous, conn_id);
            }
        }
        true
    }

    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionId> {
        self.users.read().await.get(user_id).copied()
    }

    /// Remove the mapping owned by `conn_id`, if it still owns one.
    /// Returns the user that went offline.
    pub async fn unregister(&self, conn_id: ConnectionId) -> Option<String> {
        let mut users = self.users.write().await;
        let user_id = users
            .iter()
            .find(|(_, cid)| **cid == conn_id)
            .map(|(uid, _)| uid.clone())?;
        users.remove(&user_id);
        Some(user_id)
    }

    pub async fn online_users(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn register_then_lookup() {
        let registry = PresenceRegistry::new();
        let conn = Uuid::new_v4();
        assert!(registry.register("alice", conn).await);
        assert_eq!(registry.lookup("alice").await, Some(conn));
        assert_eq!(registry.lookup("bob").await, None);
    }

    #[tokio::test]
    async fn empty_user_id_is_ignored() {
        let registry = PresenceRegistry::new();
        assert!(!registry.register("", Uuid::new_v4()).await);
        assert!(registry.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = PresenceRegistry::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        registry.register("alice", old).await;
        registry.register("alice", new).await;
        assert_eq!(registry.lookup("alice").await, Some(new));
    }

    #[tokio::test]
    async fn stale_connection_cannot_unregister_newer_mapping() {
        let registry = PresenceRegistry::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        registry.register("alice", old).await;
        registry.register("alice", new).await;

        assert_eq!(registry.unregister(old).await, None);
        assert_eq!(registry.lookup("alice").await, Some(new));

        assert_eq!(registry.unregister(new).await.as_deref(), Some("alice"));
        assert_eq!(registry.lookup("alice").await, None);
    }

    #[tokio::test]
    async fn reregistering_a_connection_drops_its_previous_identity() {
        let registry = PresenceRegistry::new();
        let conn = Uuid::new_v4();
        registry.register("alice", conn).await;
        registry.register("bob", conn).await;
        assert_eq!(registry.lookup("alice").await, None);
        assert_eq!(registry.lookup("bob").await, Some(conn));
    }
}

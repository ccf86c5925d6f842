use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub owner_id: String,
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    Leader,
    Follower,
}

#[derive(Debug)]
struct ChannelState {
    leader: u64,
    followers: Vec<u64>,
}

/// First-class registry of live push connections, per process (a connection
/// is pinned to the process that accepted it). The first connection for a
/// key is the leader; followers are tracked so a leader disconnect promotes
/// the oldest one. The cross-process ceiling lives in Redis, not here.
#[derive(Default)]
pub struct StreamHub {
    next_conn_id: AtomicU64,
    channels: Mutex<HashMap<StreamKey, ChannelState>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn join(&self, key: StreamKey) -> (u64, StreamRole) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let mut channels = self.channels.lock().await;
        match channels.get_mut(&key) {
            Some(state) => {
                state.followers.push(conn_id);
                (conn_id, StreamRole::Follower)
            }
            None => {
                channels.insert(
                    key,
                    ChannelState {
                        leader: conn_id,
                        followers: Vec::new(),
                    },
                );
                (conn_id, StreamRole::Leader)
            }
        }
    }

    /// Returns the promoted connection id when the departing leader handed
    /// the channel over.
    pub async fn leave(&self, key: &StreamKey, conn_id: u64) -> Option<u64> {
        let mut channels = self.channels.lock().await;
        let state = channels.get_mut(key)?;

        if state.leader == conn_id {
            if state.followers.is_empty() {
                channels.remove(key);
                return None;
            }
            let promoted = state.followers.remove(0);
            state.leader = promoted;
            return Some(promoted);
        }

        state.followers.retain(|id| *id != conn_id);
        None
    }

    pub async fn role_of(&self, key: &StreamKey, conn_id: u64) -> Option<StreamRole> {
        let channels = self.channels.lock().await;
        let state = channels.get(key)?;
        if state.leader == conn_id {
            Some(StreamRole::Leader)
        } else if state.followers.contains(&conn_id) {
            Some(StreamRole::Follower)
        } else {
            None
        }
    }

    pub async fn connection_count(&self, key: &StreamKey) -> usize {
        let channels = self.channels.lock().await;
        channels
            .get(key)
            .map(|state| 1 + state.followers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StreamKey {
        StreamKey {
            owner_id: "user123".to_string(),
            project_id: Uuid::now_v7(),
        }
    }

    #[tokio::test]
    async fn first_connection_leads_followers_relay() {
        let hub = StreamHub::new();
        let key = key();

        let (first, role_first) = hub.join(key.clone()).await;
        let (second, role_second) = hub.join(key.clone()).await;
        let (_third, role_third) = hub.join(key.clone()).await;

        assert_eq!(role_first, StreamRole::Leader);
        assert_eq!(role_second, StreamRole::Follower);
        assert_eq!(role_third, StreamRole::Follower);
        assert_eq!(hub.connection_count(&key).await, 3);
        assert_eq!(hub.role_of(&key, first).await, Some(StreamRole::Leader));
        assert_eq!(hub.role_of(&key, second).await, Some(StreamRole::Follower));
    }

    #[tokio::test]
    async fn leader_disconnect_promotes_a_follower() {
        let hub = StreamHub::new();
        let key = key();

        let (leader, _) = hub.join(key.clone()).await;
        let (follower, _) = hub.join(key.clone()).await;

        let promoted = hub.leave(&key, leader).await;
        assert_eq!(promoted, Some(follower));
        assert_eq!(hub.role_of(&key, follower).await, Some(StreamRole::Leader));
        assert_eq!(hub.connection_count(&key).await, 1);
    }

    #[tokio::test]
    async fn follower_disconnect_keeps_the_leader() {
        let hub = StreamHub::new();
        let key = key();

        let (leader, _) = hub.join(key.clone()).await;
        let (follower, _) = hub.join(key.clone()).await;

        assert_eq!(hub.leave(&key, follower).await, None);
        assert_eq!(hub.role_of(&key, leader).await, Some(StreamRole::Leader));
    }

    #[tokio::test]
    async fn last_connection_clears_the_channel() {
        let hub = StreamHub::new();
        let key = key();

        let (leader, _) = hub.join(key.clone()).await;
        hub.leave(&key, leader).await;
        assert_eq!(hub.connection_count(&key).await, 0);

        // and the next joiner becomes leader again
        let (_, role) = hub.join(key.clone()).await;
        assert_eq!(role, StreamRole::Leader);
    }

    #[tokio::test]
    async fn channels_are_isolated_per_key() {
        let hub = StreamHub::new();
        let key_a = key();
        let key_b = key();

        let (_, role_a) = hub.join(key_a.clone()).await;
        let (_, role_b) = hub.join(key_b.clone()).await;

        assert_eq!(role_a, StreamRole::Leader);
        assert_eq!(role_b, StreamRole::Leader);
    }
}

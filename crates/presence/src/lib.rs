//! Volatile presence index.
//!
//! A fast, advisory map of conversation → (sender id → last-heartbeat unix
//! seconds). Containers expire as a whole (set to twice the heartbeat TTL on
//! every write) so an abandoned room cannot leak memory, and reads sweep out
//! members whose last heartbeat is older than the fixed recently-seen
//! window. The authoritative `last_seen_at` lives in the participant store.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::Duration,
};

/// Fixed recently-seen window applied on reads, independent of the TTL used
/// on writes.
pub const ONLINE_WINDOW: Duration = Duration::from_secs(30);

struct Room {
    /// Unix seconds after which the whole container is gone.
    expires_at: i64,
    /// sender id → unix seconds of last heartbeat.
    members: HashMap<String, i64>,
}

pub struct PresenceIndex {
    rooms: RwLock<HashMap<String, Room>>,
    clock: fn() -> i64,
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Default for PresenceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            clock: unix_now,
        }
    }

    #[cfg(test)]
    fn with_clock(clock: fn() -> i64) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn lock_rooms(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Room>> {
        match self.rooms.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Upsert the sender's heartbeat score and refresh the container expiry
    /// to `2·ttl`.
    pub fn update_online(&self, conversation_id: &str, sender_id: &str, ttl: Duration) {
        let now = (self.clock)();
        let mut rooms = self.lock_rooms();
        let room = rooms
            .entry(conversation_id.to_string())
            .or_insert_with(|| Room {
                expires_at: now,
                members: HashMap::new(),
            });
        room.expires_at = now + 2 * ttl.as_secs() as i64;
        room.members.insert(sender_id.to_string(), now);
    }

    /// Sweep out stale members, then return the remaining online sender ids
    /// ordered by heartbeat age (oldest first).
    pub fn get_online(&self, conversation_id: &str) -> Vec<String> {
        let now = (self.clock)();
        let threshold = now - ONLINE_WINDOW.as_secs() as i64;
        let mut rooms = self.lock_rooms();

        let Some(room) = rooms.get_mut(conversation_id) else {
            return Vec::new();
        };
        if now >= room.expires_at {
            rooms.remove(conversation_id);
            return Vec::new();
        }
        room.members.retain(|_, score| *score >= threshold);
        if room.members.is_empty() {
            rooms.remove(conversation_id);
            return Vec::new();
        }
        let mut members: Vec<(&String, &i64)> = room.members.iter().collect();
        members.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        members.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Remove one sender from a conversation's container.
    pub fn remove(&self, conversation_id: &str, sender_id: &str) {
        let mut rooms = self.lock_rooms();
        if let Some(room) = rooms.get_mut(conversation_id) {
            room.members.remove(sender_id);
            if room.members.is_empty() {
                rooms.remove(conversation_id);
            }
        }
    }

    /// Drop the whole container for a conversation.
    pub fn clear(&self, conversation_id: &str) {
        self.lock_rooms().remove(conversation_id);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // Each test thread gets its own clock so tests stay independent.
    thread_local! {
        static NOW: std::cell::Cell<i64> = const { std::cell::Cell::new(0) };
    }

    fn test_clock() -> i64 {
        NOW.with(|now| now.get())
    }

    fn set_now(secs: i64) {
        NOW.with(|now| now.set(secs));
    }

    fn index_at(start: i64) -> PresenceIndex {
        set_now(start);
        PresenceIndex::with_clock(test_clock)
    }

    const TTL: Duration = Duration::from_secs(45);

    #[test]
    fn heartbeats_appear_online() {
        let index = index_at(1_000);
        index.update_online("c1", "alice", TTL);
        index.update_online("c1", "bob", TTL);
        assert_eq!(index.get_online("c1"), vec!["alice", "bob"]);
        assert!(index.get_online("c2").is_empty());
    }

    #[test]
    fn members_idle_past_the_window_are_swept() {
        let index = index_at(1_000);
        index.update_online("c1", "alice", TTL);

        set_now(1_029);
        index.update_online("c1", "bob", TTL);
        assert_eq!(index.get_online("c1"), vec!["alice", "bob"]);

        // 31s after alice's last heartbeat she is no longer recently seen.
        set_now(1_031);
        assert_eq!(index.get_online("c1"), vec!["bob"]);
    }

    #[test]
    fn container_expires_as_a_whole() {
        let index = index_at(1_000);
        index.update_online("c1", "alice", TTL);
        // Past 2·ttl the container itself is gone.
        set_now(1_000 + 91);
        assert!(index.get_online("c1").is_empty());
    }

    #[test]
    fn remove_evicts_one_member() {
        let index = index_at(1_000);
        index.update_online("c1", "alice", TTL);
        index.update_online("c1", "bob", TTL);
        index.remove("c1", "alice");
        assert_eq!(index.get_online("c1"), vec!["bob"]);
        index.remove("c1", "bob");
        assert!(index.get_online("c1").is_empty());
    }

    #[test]
    fn clear_drops_the_room() {
        let index = index_at(1_000);
        index.update_online("c1", "alice", TTL);
        index.clear("c1");
        assert!(index.get_online("c1").is_empty());
    }

    #[test]
    fn refresh_extends_both_score_and_container() {
        let index = index_at(1_000);
        index.update_online("c1", "alice", TTL);
        set_now(1_025);
        index.update_online("c1", "alice", TTL);
        set_now(1_050);
        assert_eq!(index.get_online("c1"), vec!["alice"]);
    }
}

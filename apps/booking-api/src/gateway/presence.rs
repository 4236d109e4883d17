//! In-memory per-user presence records.
//!
//! One record per user. Records are never shared across instances and are
//! rebuilt from live connections after a restart.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parkspot_common::models::PresenceRecord;

pub struct PresenceTracker {
    records: DashMap<String, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn set_online(&self, user_id: &str, username: &str) -> PresenceRecord {
        let record = PresenceRecord {
            user_id: user_id.to_string(),
            online: true,
            last_seen: Utc::now(),
            username: username.to_string(),
        };
        self.records.insert(user_id.to_string(), record.clone());
        record
    }

    /// Mark the user offline unless `reconnected` reports a live connection.
    /// Returns the updated record, or `None` if nothing changed or the user
    /// was never seen.
    /// The check runs while the user's record is locked, so a concurrent
    /// [`set_online`](Self::set_online) lands either before it (and is seen)
    /// or after the offline write (and wins).
    pub fn set_offline_unless(
        &self,
        user_id: &str,
        reconnected: impl FnOnce() -> bool,
    ) -> Option<PresenceRecord> {
        let mut record = self.records.get_mut(user_id)?;
        if reconnected() {
            return None;
        }
        record.online = false;
        record.last_seen = Utc::now();
        Some(record.clone())
    }

    /// Refresh `last_seen` for an online user.
    pub fn touch(&self, user_id: &str) {
        if let Some(mut record) = self.records.get_mut(user_id) {
            if record.online {
                record.last_seen = Utc::now();
            }
        }
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceRecord> {
        self.records.get(user_id).map(|r| r.clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.records.get(user_id).is_some_and(|r| r.online)
    }

    pub fn online_users(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.online)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Forget users that have been offline since before `now - max_age`.
    /// Returns how many records were dropped.
    pub fn prune_offline(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, r| r.online || now - r.last_seen < max_age);
        before - self.records.len()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_then_offline() {
        let tracker = PresenceTracker::new();
        let record = tracker.set_online("u1", "ada");
        assert!(record.online);
        assert!(tracker.is_online("u1"));
        assert_eq!(tracker.online_users(), vec!["u1".to_string()]);

        let record = tracker.set_offline_unless("u1", || false).unwrap();
        assert!(!record.online);
        assert!(!tracker.is_online("u1"));
        assert!(tracker.get("u1").is_some());
    }

    #[test]
    fn one_record_per_user() {
        let tracker = PresenceTracker::new();
        tracker.set_online("u1", "ada");
        tracker.set_online("u1", "ada");
        tracker.set_online("u2", "bob");
        let mut online = tracker.online_users();
        online.sort();
        assert_eq!(online, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[test]
    fn set_offline_unless_keeps_a_reconnected_user_online() {
        let tracker = PresenceTracker::new();
        tracker.set_online("u1", "ada");

        assert!(tracker.set_offline_unless("u1", || true).is_none());
        assert!(tracker.is_online("u1"));

        let record = tracker.set_offline_unless("u1", || false).unwrap();
        assert!(!record.online);
        assert!(tracker.set_offline_unless("ghost", || false).is_none());
    }

    #[test]
    fn set_offline_unknown_user() {
        let tracker = PresenceTracker::new();
        assert!(tracker.set_offline_unless("ghost", || false).is_none());
    }

    #[test]
    fn touch_refreshes_last_seen() {
        let tracker = PresenceTracker::new();
        let first = tracker.set_online("u1", "ada").last_seen;
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.touch("u1");
        assert!(tracker.get("u1").unwrap().last_seen > first);
    }

    #[test]
    fn prune_drops_only_stale_offline_records() {
        let tracker = PresenceTracker::new();
        tracker.set_online("online", "a");
        tracker.set_online("stale", "b");
        tracker.set_offline_unless("stale", || false);

        assert_eq!(tracker.prune_offline(Duration::hours(1), Utc::now()), 0);

        let later = Utc::now() + Duration::hours(2);
        assert_eq!(tracker.prune_offline(Duration::hours(1), later), 1);
        assert!(tracker.get("online").is_some());
        assert!(tracker.get("stale").is_none());
    }
}

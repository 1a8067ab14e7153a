//! Typing indicator tracking
//!
//! A typing state is a (conversation, user) pair with the instant it was
//! last refreshed. States expire after a timeout so an abandoned composer
//! never shows as typing forever; the periodic sweep collects expired
//! pairs so stop events can be fanned out.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Active typing states with automatic expiry
pub struct TypingTracker {
    entries: DashMap<(String, String), Instant>,
    timeout: Duration,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Mark a user as typing in a conversation
    ///
    /// Returns true when this starts a new typing state; a refresh of an
    /// active state returns false so no duplicate start event is sent.
    pub fn start(&self, conversation_id: &str, user_id: &str) -> bool {
        self.entries
            .insert(
                (conversation_id.to_string(), user_id.to_string()),
                Instant::now(),
            )
            .is_none()
    }

    /// Clear a user's typing state (sent a message or explicitly stopped)
    ///
    /// Returns true when a state was actually cleared.
    pub fn stop(&self, conversation_id: &str, user_id: &str) -> bool {
        self.entries
            .remove(&(conversation_id.to_string(), user_id.to_string()))
            .is_some()
    }

    /// Users currently typing in a conversation
    pub fn active_in(&self, conversation_id: &str) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.key().0 == conversation_id && now.duration_since(*e.value()) < self.timeout)
            .map(|e| e.key().1.clone())
            .collect()
    }

    /// Remove and return every expired (conversation, user) pair
    pub fn collect_expired(&self) -> Vec<(String, String)> {
        let now = Instant::now();
        let expired: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| now.duration_since(*e.value()) >= self.timeout)
            .map(|e| e.key().clone())
            .collect();

        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_new_only_once() {
        let tracker = TypingTracker::new(Duration::from_secs(6));
        assert!(tracker.start("c1", "alice"));
        assert!(!tracker.start("c1", "alice"));
        assert!(tracker.start("c2", "alice"));
    }

    #[test]
    fn test_stop_clears_state() {
        let tracker = TypingTracker::new(Duration::from_secs(6));
        tracker.start("c1", "alice");
        assert!(tracker.stop("c1", "alice"));
        assert!(!tracker.stop("c1", "alice"));
        assert!(tracker.active_in("c1").is_empty());
    }

    #[test]
    fn test_expired_states_are_collected() {
        let tracker = TypingTracker::new(Duration::from_millis(0));
        tracker.start("c1", "alice");
        tracker.start("c1", "bob");

        let mut expired = tracker.collect_expired();
        expired.sort();
        assert_eq!(
            expired,
            vec![
                ("c1".to_string(), "alice".to_string()),
                ("c1".to_string(), "bob".to_string()),
            ]
        );
        assert!(tracker.collect_expired().is_empty());
    }

    #[test]
    fn test_active_in_scopes_by_conversation() {
        let tracker = TypingTracker::new(Duration::from_secs(6));
        tracker.start("c1", "alice");
        tracker.start("c2", "bob");
        assert_eq!(tracker.active_in("c1"), vec!["alice".to_string()]);
    }
}

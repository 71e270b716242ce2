//! Subscribed Key Reference Counting
//!
//! Tracks which keys each subscription holds and how many subscriptions want
//! each key. Adding or removing keys reports only the keys whose count
//! crossed zero, which is exactly what an adapter needs to keep a single
//! upstream subscription per key.

use std::collections::{HashMap, HashSet};

use super::SubscriptionId;

// =============================================================================
// Key Changes
// =============================================================================

/// Keys whose registry-wide subscriber count crossed zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyChanges {
    /// Keys that gained their first subscriber.
    pub subscribed: HashSet<String>,
    /// Keys that lost their last subscriber.
    pub unsubscribed: HashSet<String>,
}

impl KeyChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty() && self.unsubscribed.is_empty()
    }

    /// Create changes with only newly subscribed keys.
    #[must_use]
    pub fn subscribe_only(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            subscribed: keys.into_iter().collect(),
            unsubscribed: HashSet::new(),
        }
    }

    /// Create changes with only unsubscribed keys.
    #[must_use]
    pub fn unsubscribe_only(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            subscribed: HashSet::new(),
            unsubscribed: keys.into_iter().collect(),
        }
    }
}

// =============================================================================
// Reference Counts
// =============================================================================

/// Per-subscription key sets plus a refcount per key.
#[derive(Debug, Default)]
pub struct KeyRefCounts {
    subscription_keys: HashMap<SubscriptionId, HashSet<String>>,
    key_refcount: HashMap<String, usize>,
}

impl KeyRefCounts {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add keys for a subscription.
    ///
    /// Returns the keys whose refcount went 0→1.
    pub fn add(&mut self, subscription: SubscriptionId, keys: &[String]) -> KeyChanges {
        let held = self.subscription_keys.entry(subscription).or_default();
        let mut first = Vec::new();

        for key in keys {
            if !held.insert(key.clone()) {
                continue;
            }

            let refcount = self.key_refcount.entry(key.clone()).or_insert(0);
            *refcount += 1;
            if *refcount == 1 {
                first.push(key.clone());
            }
        }

        if held.is_empty() {
            self.subscription_keys.remove(&subscription);
        }

        KeyChanges::subscribe_only(first)
    }

    /// Remove keys for a subscription.
    ///
    /// Returns the keys whose refcount went 1→0.
    pub fn remove(&mut self, subscription: SubscriptionId, keys: &[String]) -> KeyChanges {
        let Some(held) = self.subscription_keys.get_mut(&subscription) else {
            return KeyChanges::default();
        };

        let mut last = Vec::new();
        for key in keys {
            if !held.remove(key) {
                continue;
            }
            if Self::release(&mut self.key_refcount, key) {
                last.push(key.clone());
            }
        }

        if held.is_empty() {
            self.subscription_keys.remove(&subscription);
        }

        KeyChanges::unsubscribe_only(last)
    }

    /// Drop every key held by a subscription.
    pub fn remove_subscription(&mut self, subscription: SubscriptionId) -> KeyChanges {
        let Some(held) = self.subscription_keys.remove(&subscription) else {
            return KeyChanges::default();
        };

        let last: Vec<String> = held
            .into_iter()
            .filter(|key| Self::release(&mut self.key_refcount, key))
            .collect();

        KeyChanges::unsubscribe_only(last)
    }

    /// All keys with at least one subscriber.
    #[must_use]
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.key_refcount.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of subscriptions holding `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.key_refcount.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct subscribed keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.key_refcount.len()
    }

    /// Number of subscriptions holding at least one key.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscription_keys.len()
    }

    /// Decrement a key's refcount; true when it reached zero.
    fn release(key_refcount: &mut HashMap<String, usize>, key: &str) -> bool {
        let Some(refcount) = key_refcount.get_mut(key) else {
            return false;
        };
        *refcount = refcount.saturating_sub(1);
        if *refcount == 0 {
            key_refcount.remove(key);
            return true;
        }
        false
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    const A: SubscriptionId = SubscriptionId(1);
    const B: SubscriptionId = SubscriptionId(2);

    #[test]
    fn first_subscriber_reports_key() {
        let mut refs = KeyRefCounts::new();
        let changes = refs.add(A, &keys(&["T1"]));
        assert!(changes.subscribed.contains("T1"));
        assert!(changes.unsubscribed.is_empty());
    }

    #[test]
    fn second_subscriber_reports_nothing() {
        let mut refs = KeyRefCounts::new();
        refs.add(A, &keys(&["T1"]));
        assert!(refs.add(B, &keys(&["T1"])).is_empty());
        assert_eq!(refs.subscriber_count("T1"), 2);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let mut refs = KeyRefCounts::new();
        refs.add(A, &keys(&["T1"]));
        assert!(refs.add(A, &keys(&["T1"])).is_empty());
        assert_eq!(refs.subscriber_count("T1"), 1);
    }

    #[test]
    fn last_unsubscribe_reports_key() {
        let mut refs = KeyRefCounts::new();
        refs.add(A, &keys(&["T1"]));
        refs.add(B, &keys(&["T1"]));

        assert!(refs.remove(A, &keys(&["T1"])).is_empty());
        let changes = refs.remove(B, &keys(&["T1"]));
        assert!(changes.unsubscribed.contains("T1"));
        assert_eq!(refs.key_count(), 0);
    }

    #[test]
    fn remove_unknown_subscription_no_changes() {
        let mut refs = KeyRefCounts::new();
        refs.add(A, &keys(&["T1"]));
        assert!(refs.remove(B, &keys(&["T1"])).is_empty());
        assert!(refs.remove_subscription(B).is_empty());
        assert_eq!(refs.active_keys(), keys(&["T1"]));
    }

    #[test]
    fn remove_subscription_preserves_shared_keys() {
        let mut refs = KeyRefCounts::new();
        refs.add(A, &keys(&["T1", "T2"]));
        refs.add(B, &keys(&["T2"]));

        let changes = refs.remove_subscription(A);
        assert_eq!(changes.unsubscribed, ["T1".to_string()].into_iter().collect());
        assert_eq!(refs.active_keys(), keys(&["T2"]));
        assert_eq!(refs.subscription_count(), 1);
    }

    #[test]
    fn empty_add_does_not_track_subscription() {
        let mut refs = KeyRefCounts::new();
        refs.add(A, &[]);
        assert_eq!(refs.subscription_count(), 0);
    }

    #[test]
    fn key_changes_helpers() {
        assert!(KeyChanges::default().is_empty());
        assert!(!KeyChanges::subscribe_only(keys(&["a"])).is_empty());
        assert!(!KeyChanges::unsubscribe_only(keys(&["a"])).is_empty());
    }

    proptest! {
        #[test]
        fn removing_every_subscription_clears_all_keys(
            plan in proptest::collection::vec((0u64..5, "[a-d]"), 0..40),
        ) {
            let mut refs = KeyRefCounts::new();
            for (sub, key) in &plan {
                refs.add(SubscriptionId(*sub), std::slice::from_ref(key));
            }
            for sub in 0..5 {
                refs.remove_subscription(SubscriptionId(sub));
            }
            prop_assert_eq!(refs.key_count(), 0);
            prop_assert_eq!(refs.subscription_count(), 0);
        }
    }
}

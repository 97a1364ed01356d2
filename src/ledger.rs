/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

use crate::error::{StreamError, StreamResult};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct TopicEntries {
    active: HashMap<String, Vec<String>>,
    pending: HashSet<(String, String)>,
}

/// Record of `(topic, key)` subscriptions for the session-token venue.
///
/// Entries become active only when the venue acknowledges them; until then
/// they sit in the pending set so a second `subscribe` for the same pair is
/// recognised and skipped. Caller tasks and the receive task both touch the
/// ledger, hence the mutex.
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    inner: Mutex<TopicEntries>,
}

impl SubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TopicEntries> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True when the pair is active or awaiting acknowledgement.
    pub fn is_known(&self, topic: &str, key: &str) -> bool {
        let entries = self.lock();
        entries
            .active
            .get(topic)
            .is_some_and(|keys| keys.iter().any(|k| k == key))
            || entries
                .pending
                .contains(&(topic.to_string(), key.to_string()))
    }

    pub fn is_active(&self, topic: &str, key: &str) -> bool {
        self.lock()
            .active
            .get(topic)
            .is_some_and(|keys| keys.iter().any(|k| k == key))
    }

    pub fn mark_pending(&self, topic: &str, key: &str) {
        self.lock()
            .pending
            .insert((topic.to_string(), key.to_string()));
    }

    /// Moves an acknowledged pair into the active set. Duplicate acks leave a
    /// single entry.
    pub fn confirm(&self, topic: &str, key: &str) {
        let mut entries = self.lock();
        entries.pending.remove(&(topic.to_string(), key.to_string()));
        let keys = entries.active.entry(topic.to_string()).or_default();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    /// Removes an active pair.
    ///
    /// Fails when the topic has no tracked subscriptions or the key is absent
    /// from it; the ledger is left untouched then. On success a matching
    /// pending entry is dropped as well.
    pub fn remove(&self, topic: &str, key: &str) -> StreamResult<()> {
        let mut entries = self.lock();
        let keys = entries.active.get_mut(topic).ok_or_else(|| {
            StreamError::Subscription(format!("subscription type {} absent", topic))
        })?;
        let position = keys.iter().position(|k| k == key).ok_or_else(|| {
            StreamError::Subscription(format!("subscription {} {} absent", topic, key))
        })?;
        keys.remove(position);
        if keys.is_empty() {
            entries.active.remove(topic);
        }
        entries.pending.remove(&(topic.to_string(), key.to_string()));
        Ok(())
    }

    /// Active and pending pairs, sorted; what a fresh session has to replay.
    pub fn entries(&self) -> Vec<(String, String)> {
        let entries = self.lock();
        let mut all: BTreeSet<(String, String)> = entries.pending.iter().cloned().collect();
        for (topic, keys) in &entries.active {
            all.extend(keys.iter().map(|key| (topic.clone(), key.clone())));
        }
        all.into_iter().collect()
    }

    /// Active keys per topic, in acknowledgement order.
    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.lock().active.clone()
    }

    /// Number of active pairs.
    pub fn len(&self) -> usize {
        self.lock().active.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct KeyEntries {
    active: BTreeSet<String>,
    pending: BTreeSet<String>,
}

/// Key-only counterpart of [`SubscriptionLedger`] for the key-based venue.
#[derive(Debug, Default)]
pub struct KeyLedger {
    inner: Mutex<KeyEntries>,
}

impl KeyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, KeyEntries> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_known(&self, key: &str) -> bool {
        let entries = self.lock();
        entries.active.contains(key) || entries.pending.contains(key)
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.lock().active.contains(key)
    }

    pub fn mark_pending(&self, key: &str) {
        self.lock().pending.insert(key.to_string());
    }

    pub fn confirm(&self, key: &str) {
        let mut entries = self.lock();
        entries.pending.remove(key);
        entries.active.insert(key.to_string());
    }

    /// Returns whether the key was active. A key that was not active is left
    /// as it was.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.lock();
        if !entries.active.remove(key) {
            return false;
        }
        entries.pending.remove(key);
        true
    }

    /// Active and pending keys, sorted.
    pub fn entries(&self) -> Vec<String> {
        let entries = self.lock();
        entries
            .active
            .union(&entries.pending)
            .cloned()
            .collect()
    }

    pub fn active(&self) -> Vec<String> {
        self.lock().active.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

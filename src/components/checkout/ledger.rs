use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;

/// Record of dedup keys that already triggered a device action.
///
/// Keys are never removed: once handled, a reservation stays handled for the
/// lifetime of the store.
pub trait LedgerStore: Send + Sync {
    fn is_handled(&self, key: &str) -> bool;

    fn mark_handled(&mut self, key: &str);

    /// When the key was marked, if it was
    fn handled_at(&self, key: &str) -> Option<DateTime<Utc>>;

    /// All handled keys, oldest first
    fn entries(&self) -> Vec<(String, DateTime<Utc>)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-lifetime ledger; nothing survives a restart
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    handled: HashMap<String, DateTime<Utc>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedger {
    fn is_handled(&self, key: &str) -> bool {
        self.handled.contains_key(key)
    }

    fn mark_handled(&mut self, key: &str) {
        if !self.handled.contains_key(key) {
            self.handled.insert(key.to_string(), Utc::now());
            info!("Marked checkout {} as handled", key);
        }
    }

    fn handled_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.handled.get(key).copied()
    }

    fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .handled
            .iter()
            .map(|(key, at)| (key.clone(), *at))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    fn len(&self) -> usize {
        self.handled.len()
    }
}

//! Registry of statistics extenders, collected into one JSON tree on demand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::{Map, Value};

/// Which part of the statistics tree to collect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatisticsRequest {
    /// Dotted prefix; empty collects everything.
    pub prefix: String,
}

impl StatisticsRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// An extender registered under `extender_prefix` contributes to this request.
    fn selects(&self, extender_prefix: &str) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        match extender_prefix.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('.'),
            None => false,
        }
    }
}

type ExtenderFn = dyn Fn(&StatisticsRequest) -> Value + Send + Sync;

struct Extender {
    prefix: String,
    func: Arc<ExtenderFn>,
}

#[derive(Default)]
struct Inner {
    extenders: DashMap<u64, Extender>,
    next_id: AtomicU64,
}

/// Shared storage of statistics extenders. Cheap to clone.
#[derive(Clone, Default)]
pub struct Storage {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("extenders", &self.inner.extenders.len())
            .finish()
    }
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` to produce the subtree at `prefix`.
    ///
    /// The extender stays registered until the returned entry is dropped.
    pub fn register_extender<F>(&self, prefix: impl Into<String>, func: F) -> StatisticsEntry
    where
        F: Fn(&StatisticsRequest) -> Value + Send + Sync + 'static,
    {
        let prefix = prefix.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(prefix = %prefix, id, "Registering statistics extender");
        self.inner.extenders.insert(
            id,
            Extender {
                prefix,
                func: Arc::new(func),
            },
        );
        StatisticsEntry {
            id,
            storage: Arc::downgrade(&self.inner),
        }
    }

    pub fn extender_count(&self) -> usize {
        self.inner.extenders.len()
    }

    /// Collect every matching extender into one tree.
    ///
    /// Extender output is placed at its dotted prefix; two extenders under
    /// the same path have their objects merged, later registrations winning
    /// on key conflicts.
    pub fn get_as_json(&self, request: &StatisticsRequest) -> Value {
        // Snapshot the callbacks first; extenders may touch the storage themselves.
        let mut selected: Vec<(u64, String, Arc<ExtenderFn>)> = self
            .inner
            .extenders
            .iter()
            .filter(|e| request.selects(&e.value().prefix))
            .map(|e| (*e.key(), e.value().prefix.clone(), Arc::clone(&e.value().func)))
            .collect();
        selected.sort_by_key(|(id, _, _)| *id);

        let mut root = Value::Object(Map::new());
        for (_, prefix, func) in selected {
            let value = func(request);
            let path: Vec<&str> = prefix.split('.').filter(|s| !s.is_empty()).collect();
            insert_at(&mut root, &path, value);
        }
        root
    }

    fn unregister(inner: &Inner, id: u64) {
        if let Some((_, extender)) = inner.extenders.remove(&id) {
            tracing::debug!(prefix = %extender.prefix, id, "Unregistered statistics extender");
        }
    }
}

/// Registration handle; dropping it removes the extender.
#[must_use = "the extender is unregistered when the entry is dropped"]
pub struct StatisticsEntry {
    id: u64,
    storage: Weak<Inner>,
}

impl StatisticsEntry {
    /// Remove the extender now.
    pub fn unregister(self) {}
}

impl std::fmt::Debug for StatisticsEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsEntry").field("id", &self.id).finish()
    }
}

impl Drop for StatisticsEntry {
    fn drop(&mut self) {
        if let Some(inner) = self.storage.upgrade() {
            Storage::unregister(&inner, self.id);
        }
    }
}

fn insert_at(node: &mut Value, path: &[&str], value: Value) {
    match path.split_first() {
        None => merge(node, value),
        Some((head, rest)) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                insert_at(child, rest, value);
            }
        }
    }
}

fn merge(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, v) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge(slot, v),
                    None => {
                        existing.insert(key, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

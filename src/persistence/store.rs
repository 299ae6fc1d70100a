//! Keyed Store
//!
//! The minimal key-value surface the repositories are written against:
//! string values with optional TTL, atomic counters, member sets and
//! score-ordered sets. Multi-key transactions are deliberately absent;
//! callers sequence their writes instead.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("wrong value type at {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key-value store primitives. Implementations must be safe for concurrent
/// use from many tasks without external locking.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a string value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Delete a key of any type. Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically increment an integer value; a missing key becomes 1.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn sorted_add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Members ordered by descending score, windowed by offset/limit.
    async fn sorted_range_desc(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Bulk read of string values, one slot per requested key. The whole
    /// batch is served in a single round trip so large listings do not pay
    /// N sequential reads.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;
}

enum Value {
    Str(String),
    Set(HashSet<String>),
    Sorted(HashMap<String, f64>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Set(_) => "set",
            Value::Sorted(_) => "sorted set",
        }
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local [`KeyedStore`] backed by a single `RwLock`ed map.
/// Expired entries are treated as absent on read and reaped on write.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str, expected: &'static str) -> StoreError {
        StoreError::WrongType {
            key: key.to_string(),
            expected,
        }
    }
}

fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    entries.get(key).filter(|e| !e.expired())
}

/// Drop an expired entry so writers see the key as absent.
fn reap(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).is_some_and(|e| e.expired()) {
        entries.remove(key);
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Str(s) => Ok(Some(s.clone())),
                _ => Err(Self::wrong_type(key, "string")),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let existed = entries.remove(key).map(|e| !e.expired()).unwrap_or(false);
        Ok(existed)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.write().await;
        reap(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str("0".to_string()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Str(s) => {
                let next = s
                    .parse::<i64>()
                    .map_err(|_| Self::wrong_type(key, "integer"))?
                    + 1;
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(Self::wrong_type(key, "integer")),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        reap(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            _ => Err(Self::wrong_type(key, "set")),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        reap(&mut entries, key);
        match entries.get_mut(key) {
            None => Ok(()),
            Some(entry) => match &mut entry.value {
                Value::Set(set) => {
                    set.remove(member);
                    Ok(())
                }
                _ => Err(Self::wrong_type(key, "set")),
            },
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                _ => Err(Self::wrong_type(key, "set")),
            },
        }
    }

    async fn sorted_add(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        reap(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Sorted(sorted) => {
                sorted.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(Self::wrong_type(key, "sorted set")),
        }
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        reap(&mut entries, key);
        match entries.get_mut(key) {
            None => Ok(()),
            Some(entry) => match &mut entry.value {
                Value::Sorted(sorted) => {
                    sorted.remove(member);
                    Ok(())
                }
                _ => Err(Self::wrong_type(key, "sorted set")),
            },
        }
    }

    async fn sorted_range_desc(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        match live(&entries, key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::Sorted(sorted) => {
                    let mut members: Vec<(&String, f64)> =
                        sorted.iter().map(|(m, s)| (m, *s)).collect();
                    members.sort_by(|a, b| {
                        b.1.partial_cmp(&a.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| b.0.cmp(a.0))
                    });
                    Ok(members
                        .into_iter()
                        .skip(offset)
                        .take(limit)
                        .map(|(m, _)| m.clone())
                        .collect())
                }
                _ => Err(Self::wrong_type(key, "sorted set")),
            },
        }
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let entries = self.entries.read().await;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match live(&entries, key) {
                None => out.push(None),
                Some(entry) => match &entry.value {
                    Value::Str(s) => out.push(Some(s.clone())),
                    _ => return Err(Self::wrong_type(key, "string")),
                },
            }
        }
        Ok(out)
    }
}

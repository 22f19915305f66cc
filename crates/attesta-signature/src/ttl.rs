// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-process `TtlStore`.  Suitable for a single node; a shared deployment
// plugs a networked store in behind the same trait.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use attesta_core::error::{AttestaError, Result};
use attesta_core::store::TtlStore;

#[derive(Default)]
pub struct MemoryTtlStore {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, (Vec<u8>, Instant)>>> {
        self.entries
            .lock()
            .map_err(|_| AttestaError::Database("ttl store mutex poisoned".into()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TtlStore for MemoryTtlStore {
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.lock()?.insert(key.to_owned(), (value, expires_at));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some((_, expires_at)) => Instant::now() >= *expires_at,
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .remove(key)
            .filter(|(_, expires_at)| now < *expires_at)
            .map(|(value, _)| value))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| now < *expires_at);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_expire() {
        let store = MemoryTtlStore::new();
        store.put("live", b"a".to_vec(), Duration::from_secs(60)).unwrap();
        store.put("dead", b"b".to_vec(), Duration::ZERO).unwrap();

        assert_eq!(store.get("live").unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.get("dead").unwrap(), None);
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn take_is_single_use() {
        let store = MemoryTtlStore::new();
        store.put("code", b"123456".to_vec(), Duration::from_secs(60)).unwrap();
        assert_eq!(store.take("code").unwrap(), Some(b"123456".to_vec()));
        assert_eq!(store.take("code").unwrap(), None);
    }

    #[test]
    fn purge_drops_only_expired() {
        let store = MemoryTtlStore::new();
        store.put("a", vec![], Duration::ZERO).unwrap();
        store.put("b", vec![], Duration::ZERO).unwrap();
        store.put("c", vec![], Duration::from_secs(60)).unwrap();

        assert_eq!(store.purge_expired().unwrap(), 2);
        assert_eq!(store.purge_expired().unwrap(), 0);
        assert_eq!(store.len(), 1);
        store.remove("c").unwrap();
        assert!(store.is_empty());
    }
}

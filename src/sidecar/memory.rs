//! In-process state store
//!
//! Used in local mode and by tests. `create_if_absent` goes through the
//! `DashMap` entry API, so the check and the insert happen under one shard lock.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use super::{SidecarError, StateStore};

#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    entries: Arc<DashMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys starting with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, SidecarError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), SidecarError> {
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn create_if_absent(&self, key: &str, value: &Value) -> Result<bool, SidecarError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(value.clone());
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SidecarError> {
        self.entries.remove(key);
        Ok(())
    }
}

//! Registry data model.
//!
//! The registry is a flat map of string keys to scalar values. Nothing in the
//! model knows about instances; the typed view lives in [`crate::codec`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single persisted scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl StoreValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StoreValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StoreValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoreValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// How hard a write tries to reach disk before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Queued and coalesced; may be lost if the process is killed soon after.
    Deferred,
    /// Written to disk before the call returns.
    Immediate,
}

/// A pending key-level change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put(StoreValue),
    Remove,
}

/// Complete registry snapshot persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, StoreValue>,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            entries: BTreeMap::new(),
        }
    }
}

impl RegistrySnapshot {
    /// Applies key-level operations in order.
    pub fn apply<'a>(&mut self, ops: impl IntoIterator<Item = (&'a String, &'a WriteOp)>) {
        for (key, op) in ops {
            match op {
                WriteOp::Put(value) => {
                    self.entries.insert(key.clone(), value.clone());
                }
                WriteOp::Remove => {
                    self.entries.remove(key);
                }
            }
        }
    }
}

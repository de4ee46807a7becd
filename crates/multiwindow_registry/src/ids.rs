use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

/// Identity of a logical window, stable across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "instance:{}", self.0)
    }
}

/// OS-level task currently hosting a window. Changes across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "task:{}", self.0)
    }
}

/// Browsing context a window's documents belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProfileKind {
    #[default]
    Regular,
    OffTheRecord,
}

impl ProfileKind {
    pub fn as_stored(self) -> i64 {
        match self {
            ProfileKind::Regular => 0,
            ProfileKind::OffTheRecord => 1,
        }
    }

    /// Unknown stored values read as `Regular`.
    pub fn from_stored(value: i64) -> Self {
        match value {
            1 => ProfileKind::OffTheRecord,
            _ => ProfileKind::Regular,
        }
    }
}

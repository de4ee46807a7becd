use serde::Serialize;
use std::fmt;

/// Error types for registry storage operations.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum RegistryError {
    ReadError(String),
    WriteError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::ReadError(msg) => write!(f, "failed to read registry: {}", msg),
            RegistryError::WriteError(msg) => write!(f, "failed to write registry: {}", msg),
            RegistryError::ParseError(msg) => write!(f, "failed to parse registry: {}", msg),
            RegistryError::SerializeError(msg) => {
                write!(f, "failed to serialize registry: {}", msg)
            }
            RegistryError::InvalidValue(msg) => write!(f, "invalid registry value: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<std::io::Error> for RegistryError {
    fn from(e: std::io::Error) -> Self {
        RegistryError::ReadError(e.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::ParseError(e.to_string())
    }
}

impl From<RegistryError> for String {
    fn from(e: RegistryError) -> Self {
        e.to_string()
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use serde_json::Error as JsonError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum LatticeError {
    #[error("Unresolved reference '{path}' (stopped at step {depth}): {reason}")]
    UnresolvedReference {
        path: String,
        depth: usize,
        reason: String,
    },
    #[error("Cyclic reference '{path}', chain: {}", chain.join(" -> "))]
    CyclicReference { path: String, chain: Vec<String> },
    #[error("Failed to dereference '{path}': {source}")]
    DerefFailure {
        path: String,
        #[source]
        source: Box<LatticeError>,
    },
    #[error("Unknown field '{field}' on {node}")]
    UnknownField { node: String, field: String },
    #[error("Schema conflict in {schema} for field '{field}': {reason}")]
    SchemaConflict {
        schema: String,
        field: String,
        reason: String,
    },
    #[error("Invalid reference path '{path}': {reason}")]
    InvalidReference { path: String, reason: String },
    #[error("Invalid override for {node}.{field}: {reason}")]
    InvalidOverride {
        node: String,
        field: String,
        reason: String,
    },
    #[error("Field {node}.{field} is declared but was never assigned")]
    UndefinedField { node: String, field: String },
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl LatticeError {
    /// True for the error kinds produced while walking a reference path.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            LatticeError::UnresolvedReference { .. }
                | LatticeError::CyclicReference { .. }
                | LatticeError::DerefFailure { .. }
        )
    }

    /// Strip any `DerefFailure` wrappers and return the innermost error.
    pub fn root_cause(&self) -> &LatticeError {
        match self {
            LatticeError::DerefFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<toml::de::Error> for LatticeError {
    fn from(src: toml::de::Error) -> LatticeError {
        LatticeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for LatticeError {
    fn from(src: toml::ser::Error) -> LatticeError {
        LatticeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for LatticeError {
    fn from(src: JsonError) -> LatticeError {
        LatticeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for LatticeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => LatticeError::Io(format!("not found: {x}")),
            _ => LatticeError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for LatticeError {
    fn from(x: fmt::Error) -> Self {
        LatticeError::Custom(format!("{x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_deref_failure_keeps_source() {
        let inner = LatticeError::Custom("division by zero".to_string());
        let err = LatticeError::DerefFailure {
            path: "..ratio".to_string(),
            source: Box::new(inner.clone()),
        };
        assert_eq!(err.root_cause(), &inner);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("..ratio"));
        assert!(err.is_resolution_error());
    }

    #[test]
    fn test_cycle_message_lists_chain() {
        let err = LatticeError::CyclicReference {
            path: ".a".to_string(),
            chain: vec!["Root.a".to_string(), "Root.b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic reference '.a', chain: Root.a -> Root.b"
        );
    }
}

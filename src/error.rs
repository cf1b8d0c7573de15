use anyhow::anyhow;
use serde::Serialize;

use crate::document::DocumentViolation;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    Forbidden,
    InvalidInput,
    NotFound,
    Conflict,
    DuplicateVersion,
    Unknown,
}

/// Structured payload attached to errors the caller can act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetails {
    DocumentViolations {
        violations: Vec<DocumentViolation>,
    },
    #[serde(rename_all = "camelCase")]
    VersionConflict { expected_version: i64 },
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub details: Option<ErrorDetails>,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Database,
            code: "database_error",
            public,
            details: None,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            details: None,
            source,
        }
    }

    pub fn invalid_document(violations: Vec<DocumentViolation>) -> Self {
        let source = anyhow!(
            "flow document rejected with {} violation(s): {}",
            violations.len(),
            violations
                .iter()
                .map(DocumentViolation::path)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_flow_document",
            public: "Flow document is malformed",
            details: Some(ErrorDetails::DocumentViolations { violations }),
            source,
        }
    }

    pub fn forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Forbidden,
            code: "forbidden",
            public,
            details: None,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            details: None,
            source,
        }
    }

    /// A concurrent write moved the flow past `expected_version`; retry from fresh state.
    pub fn conflict(expected_version: i64, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Conflict,
            code: "flow_version_conflict",
            public: "Flow was modified concurrently, reload and retry",
            details: Some(ErrorDetails::VersionConflict { expected_version }),
            source,
        }
    }

    pub fn duplicate_version(source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::DuplicateVersion,
            code: "duplicate_flow_version",
            public: "Flow version history is inconsistent",
            details: None,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            details: None,
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Conflict
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.source)
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::database("Database request failed", anyhow!(value))
    }
}

//! Error types for the verification pipeline
//!
//! Provides error handling for:
//! - Per-person portal verification failures
//! - Automation session failures
//! - Artifact consolidation
//! - Batch sizing and orchestration
//! - Report export

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-person verification error
///
/// Everything a single person's run through the portal can raise. These are
/// caught at the person boundary and recorded as a [`crate::FailureRecord`].
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Identity lookup yielded no matching record
    #[error("person not found: {id}: {detail}")]
    PersonNotFound {
        /// Identifier that was searched
        id: String,
        /// Portal message or timeout description
        detail: String,
    },

    /// Birth date rejected twice, once as given and once inverted
    #[error("birth date format rejected for {id} (tried {attempted:?}): {message}")]
    DateFormat {
        /// Identifier being verified
        id: String,
        /// Every date string submitted, in order
        attempted: Vec<String>,
        /// Last portal message
        message: String,
    },

    /// Portal reported an error while generating the certificate
    #[error("certificate generation failed for {id}: {title}")]
    CertificateGeneration {
        /// Identifier being verified
        id: String,
        /// Dialog title as shown by the portal
        title: String,
    },

    /// Portal rejected the verification with a dialog
    #[error("verification rejected for {id}: {title}: {message}")]
    Verification {
        /// Identifier being verified
        id: String,
        /// Dialog title
        title: String,
        /// Dialog message
        message: String,
    },

    /// Artifact never stabilized inside the download directory
    #[error("download did not complete in {dir} within {waited_ms}ms")]
    DownloadTimeout {
        /// Directory being watched
        dir: PathBuf,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// Automation session failure
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Captcha text recognition failed
    #[error("ocr failed: {0}")]
    Ocr(String),

    /// Filesystem failure around the temp directory
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Downloaded artifact could not be moved into final storage
    #[error("consolidation failed: {0}")]
    Consolidation(#[from] ConsolidateError),
}

impl VerifyError {
    /// Create an I/O error bound to a path
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable classification tag
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PersonNotFound { .. } => ErrorKind::PersonNotFound,
            Self::DateFormat { .. } => ErrorKind::DateFormat,
            Self::CertificateGeneration { .. } => ErrorKind::CertificateGeneration,
            Self::Verification { .. } => ErrorKind::Verification,
            Self::DownloadTimeout { .. } => ErrorKind::DownloadTimeout,
            Self::Session(_) => ErrorKind::Session,
            Self::Ocr(_) => ErrorKind::Ocr,
            Self::Io { .. } => ErrorKind::Io,
            Self::Consolidation(_) => ErrorKind::Consolidation,
        }
    }

    /// Snapshot into a cloneable descriptor
    #[must_use]
    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Error classification carried by failure records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No record for the identifier
    PersonNotFound,
    /// Birth date rejected after inversion
    DateFormat,
    /// Certificate generation dialog reported an error
    CertificateGeneration,
    /// Verification dialog reported an error
    Verification,
    /// Download never stabilized
    DownloadTimeout,
    /// Automation session failed
    Session,
    /// OCR failed
    Ocr,
    /// Local filesystem failure
    Io,
    /// Artifact could not be consolidated
    Consolidation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PersonNotFound => "PersonNotFound",
            Self::DateFormat => "DateFormatError",
            Self::CertificateGeneration => "CertificateGenerationError",
            Self::Verification => "VerificationError",
            Self::DownloadTimeout => "DownloadTimeout",
            Self::Session => "SessionError",
            Self::Ocr => "OcrError",
            Self::Io => "IoError",
            Self::Consolidation => "ConsolidationError",
        };
        f.write_str(name)
    }
}

/// Cloneable, serializable projection of a [`VerifyError`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Classification
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl std::fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Automation session errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Session could not be started
    #[error("session launch failed: {0}")]
    Launch(String),

    /// Wait condition not met in time
    #[error("timed out after {timeout_ms}ms waiting for {what}")]
    Timeout {
        /// Description of the awaited condition
        what: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Element lookup failed
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Remote end reported an error
    #[error("protocol error {error}: {message}")]
    Protocol {
        /// Error code
        error: String,
        /// Error message
        message: String,
    },

    /// Transport failure talking to the automation backend
    #[error("transport error: {0}")]
    Transport(String),

    /// Session or page already closed
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Check if this is a wait timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Consolidation errors
#[derive(Debug, thiserror::Error)]
pub enum ConsolidateError {
    /// Temp directory owned by the result is gone
    #[error("temp directory missing for {id}: {dir}")]
    MissingTempDir {
        /// Person identifier
        id: String,
        /// Expected temp directory
        dir: PathBuf,
    },

    /// Moving the artifact failed
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        /// Source path
        from: PathBuf,
        /// Destination path
        to: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Other filesystem failure
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Batch-level errors (abort the run)
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Invalid worker count
    #[error("invalid worker count: {0}")]
    InvalidWorkerCount(usize),

    /// Sizing failed
    #[error("sizing failed: {0}")]
    Sizing(#[from] SizingError),

    /// Consolidation could not proceed
    #[error("consolidation failed: {0}")]
    Consolidate(#[from] ConsolidateError),

    /// Report export failed
    #[error("report failed: {0}")]
    Report(#[from] ReportError),
}

/// Resource sizing errors
#[derive(Debug, thiserror::Error)]
pub enum SizingError {
    /// Budget must be positive
    #[error("per-session budget must be positive: {0}")]
    InvalidBudget(String),

    /// Probe failed
    #[error("system probe failed: {0}")]
    Probe(String),
}

/// Report export errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Sheet encoding failed
    #[error("sheet encoding failed: {0}")]
    Encode(#[from] csv::Error),

    /// Write failed
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_error_display() {
        let err = VerifyError::Verification {
            id: "0102030405".to_string(),
            title: "ERROR".to_string(),
            message: "Datos incorrectos".to_string(),
        };
        assert!(err.to_string().contains("verification rejected"));
        assert!(err.to_string().contains("Datos incorrectos"));
    }

    #[test]
    fn descriptor_keeps_kind_and_message() {
        let err = VerifyError::DownloadTimeout {
            dir: PathBuf::from("/tmp/x"),
            waited_ms: 500,
        };
        let desc = err.descriptor();
        assert_eq!(desc.kind, ErrorKind::DownloadTimeout);
        assert!(desc.message.contains("500ms"));
        assert!(desc.to_string().starts_with("DownloadTimeout"));
    }

    #[test]
    fn session_error_converts() {
        let err: VerifyError = SessionError::Closed.into();
        assert_eq!(err.kind(), ErrorKind::Session);
    }

    #[test]
    fn timeout_detection() {
        let err = SessionError::Timeout {
            what: "#x".to_string(),
            timeout_ms: 10,
        };
        assert!(err.is_timeout());
        assert!(!SessionError::Closed.is_timeout());
    }
}

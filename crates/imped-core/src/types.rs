//! Core types for the verification pipeline
//!
//! Defines the data that flows through a run:
//! - Roster input records
//! - Per-person verification results and failures
//! - Progress events emitted while a batch runs
//! - Certificate path ledgers merged across rounds

use crate::error::{ErrorDescriptor, VerifyError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One roster entry
///
/// `birth_date` is kept exactly as provided; its day/month order is
/// ambiguous until the portal accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRecord {
    /// Fiscal identifier, unique within a roster
    pub id: String,
    /// Name as listed in the roster
    pub name: String,
    /// Birth date, nominally `month/day/year`
    pub birth_date: String,
}

impl PersonRecord {
    /// Create new record
    #[inline]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        birth_date: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            birth_date: birth_date.into(),
        }
    }
}

/// Successful verification of one person
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Fiscal identifier
    pub id: String,
    /// Display name as confirmed by the portal
    pub name: String,
    /// Birth date string the portal accepted
    pub birth_date: String,
    /// Portal-reported impediment status
    pub has_impediment: Option<String>,
    /// Temp directory holding the downloaded artifact, until consolidated
    pub temp_dir: Option<PathBuf>,
}

/// A person whose attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Input record, unchanged, so it can be re-fed into a retry
    pub person: PersonRecord,
    /// What went wrong
    pub error: ErrorDescriptor,
}

impl FailureRecord {
    /// Record a failure for a person
    #[inline]
    #[must_use]
    pub fn new(person: PersonRecord, error: &VerifyError) -> Self {
        Self {
            person,
            error: error.descriptor(),
        }
    }
}

/// Options for a single verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Generate and download the certificate artifact
    pub download_artifact: bool,
}

impl VerifyOptions {
    /// Options that also download the certificate
    #[inline]
    #[must_use]
    pub fn with_download() -> Self {
        Self {
            download_artifact: true,
        }
    }
}

/// Live progress notification for one finished person
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Fiscal identifier
    pub id: String,
    /// Confirmed name on success, roster name on failure
    pub name: String,
    /// Impediment status on success
    pub has_impediment: Option<String>,
    /// Whether the person succeeded
    pub success: bool,
    /// Failure description
    pub error: Option<ErrorDescriptor>,
}

impl ProgressEvent {
    /// Event for a successful result
    #[must_use]
    pub fn succeeded(result: &VerificationResult) -> Self {
        Self {
            id: result.id.clone(),
            name: result.name.clone(),
            has_impediment: result.has_impediment.clone(),
            success: true,
            error: None,
        }
    }

    /// Event for a failure
    #[must_use]
    pub fn failed(failure: &FailureRecord) -> Self {
        Self {
            id: failure.person.id.clone(),
            name: failure.person.name.clone(),
            has_impediment: None,
            success: false,
            error: Some(failure.error.clone()),
        }
    }
}

/// Results and failures of one orchestrated batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Successful verifications, in roster order per chunk
    pub results: Vec<VerificationResult>,
    /// Failed people
    pub failures: Vec<FailureRecord>,
}

impl BatchOutcome {
    /// Total people accounted for
    #[inline]
    #[must_use]
    pub fn processed(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    /// Append another outcome
    pub fn merge(&mut self, other: BatchOutcome) {
        self.results.extend(other.results);
        self.failures.extend(other.failures);
    }
}

/// Person id to final certificate path (relative to the output root)
///
/// Insertion-ordered. Later inserts for the same id replace earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePaths(IndexMap<String, PathBuf>);

impl CertificatePaths {
    /// Create empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a path for an id
    #[inline]
    pub fn insert(&mut self, id: impl Into<String>, path: impl Into<PathBuf>) {
        self.0.insert(id.into(), path.into());
    }

    /// Merge a later round into this one
    pub fn merge(&mut self, later: CertificatePaths) {
        for (id, path) in later.0 {
            self.0.insert(id, path);
        }
    }

    /// Look up a path
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PathBuf> {
        self.0.get(id)
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PathBuf)> {
        self.0.iter()
    }
}

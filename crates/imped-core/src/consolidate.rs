//! Artifact consolidation
//!
//! Moves each result's downloaded artifact out of its per-person temp
//! directory into the output root, named after the portal-confirmed display
//! name, and removes the temp directory.
//!
//! Final names are not deduplicated: two people whose names sanitize to the
//! same string overwrite each other.

use crate::download::{list_finished, DownloadWatch};
use crate::error::{ConsolidateError, VerifyError};
use crate::types::{CertificatePaths, VerificationResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\-]").expect("valid regex"));

/// Extension used when the downloaded file has none
pub const DEFAULT_EXTENSION: &str = "pdf";

/// Derive a filesystem-safe file stem from a display name
///
/// Whitespace runs become `_`; anything that is not a word character or `-`
/// is dropped.
#[must_use]
pub fn safe_name(name: &str) -> String {
    let underscored = WHITESPACE.replace_all(name.trim(), "_");
    UNSAFE_CHARS.replace_all(&underscored, "").into_owned()
}

/// Outcome of consolidating a set of results
#[derive(Debug, Default)]
pub struct Consolidation {
    /// Final paths, relative to the output root
    pub paths: CertificatePaths,
    /// Ids whose temp directory held no finished file
    pub skipped: Vec<String>,
    /// Ids whose artifact could not be moved
    pub failures: Vec<(String, ConsolidateError)>,
}

/// Moves artifacts into final storage
#[derive(Debug, Clone)]
pub struct Consolidator {
    output_root: PathBuf,
    watch: DownloadWatch,
}

impl Consolidator {
    /// Create consolidator writing under `output_root`
    #[inline]
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            watch: DownloadWatch::default(),
        }
    }

    /// With the partial-file rules of a download watch
    #[inline]
    #[must_use]
    pub fn with_download_watch(mut self, watch: DownloadWatch) -> Self {
        self.watch = watch;
        self
    }

    /// Final storage root
    #[inline]
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Consolidate every result that owns a temp directory
    pub async fn consolidate(&self, results: &[VerificationResult]) -> Consolidation {
        let mut consolidation = Consolidation::default();

        for result in results {
            let Some(dir) = &result.temp_dir else {
                continue;
            };

            match self.consolidate_one(result, dir).await {
                Ok(Some(path)) => consolidation.paths.insert(result.id.clone(), path),
                Ok(None) => consolidation.skipped.push(result.id.clone()),
                Err(e) => {
                    tracing::error!("consolidation failed [{}]: {}", result.id, e);
                    consolidation.failures.push((result.id.clone(), e));
                }
            }
        }

        tracing::info!(
            "consolidated {} certificate(s), {} skipped, {} failed",
            consolidation.paths.len(),
            consolidation.skipped.len(),
            consolidation.failures.len()
        );
        consolidation
    }

    async fn consolidate_one(
        &self,
        result: &VerificationResult,
        dir: &Path,
    ) -> Result<Option<PathBuf>, ConsolidateError> {
        match tokio::fs::metadata(dir).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ConsolidateError::MissingTempDir {
                    id: result.id.clone(),
                    dir: dir.to_path_buf(),
                })
            }
            Err(e) => return Err(ConsolidateError::Io { path: dir.to_path_buf(), source: e }),
        }

        let files = list_finished(dir, &self.watch)
            .await
            .map_err(|e| match e {
                VerifyError::Io { path, source } => ConsolidateError::Io { path, source },
                other => ConsolidateError::Io {
                    path: dir.to_path_buf(),
                    source: std::io::Error::other(other.to_string()),
                },
            })?;

        let Some(file) = files.first() else {
            tracing::warn!("no file found in {}, skipping", dir.display());
            return Ok(None);
        };
        if files.len() > 1 {
            tracing::warn!(
                "{} files in {}, keeping {}",
                files.len(),
                dir.display(),
                file
            );
        }

        let source = dir.join(file);
        let extension = Path::new(file)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(DEFAULT_EXTENSION);
        let mut stem = safe_name(&result.name);
        if stem.is_empty() {
            stem = safe_name(&result.id);
        }
        let relative = PathBuf::from(format!("{stem}.{extension}"));
        let target = self.output_root.join(&relative);

        tokio::fs::create_dir_all(&self.output_root)
            .await
            .map_err(|e| ConsolidateError::Io {
                path: self.output_root.clone(),
                source: e,
            })?;
        move_file(&source, &target).await?;

        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|e| ConsolidateError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;

        tracing::debug!("[{}] {} -> {}", result.id, source.display(), target.display());
        Ok(Some(relative))
    }
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<(), ConsolidateError> {
    let Err(rename_err) = tokio::fs::rename(from, to).await else {
        return Ok(());
    };
    if rename_err.kind() == ErrorKind::NotFound {
        return Err(ConsolidateError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: rename_err,
        });
    }

    tokio::fs::copy(from, to)
        .await
        .map_err(|_| ConsolidateError::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: rename_err,
        })?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| ConsolidateError::Io {
            path: from.to_path_buf(),
            source: e,
        })
}

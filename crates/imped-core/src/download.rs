//! Download completion detection
//!
//! The portal never signals that a generated artifact has finished writing.
//! Completion is inferred by polling the download directory until a
//! non-partial file keeps the same non-zero size across several samples.

use crate::error::VerifyError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Polling parameters for [`wait_for_download`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadWatch {
    /// Delay between samples
    pub poll_interval_ms: u64,
    /// Consecutive unchanged samples required
    pub stable_samples: u32,
    /// Give up after this long
    pub timeout_ms: u64,
    /// Suffix marking in-progress files
    pub partial_suffix: String,
}

impl Default for DownloadWatch {
    fn default() -> Self {
        Self {
            poll_interval_ms: 300,
            stable_samples: 3,
            timeout_ms: 120_000,
            partial_suffix: ".crdownload".to_string(),
        }
    }
}

impl DownloadWatch {
    /// Delay between samples
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Overall timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check whether a file name is an in-progress download
    #[inline]
    #[must_use]
    pub fn is_partial(&self, name: &str) -> bool {
        !self.partial_suffix.is_empty() && name.ends_with(&self.partial_suffix)
    }
}

/// Wait until a finished file appears in `dir` and return its name
///
/// The directory is listed afresh on every poll. The candidate is the first
/// non-partial regular file by name. It is accepted once its size has been
/// non-zero and unchanged for `stable_samples` consecutive samples; a
/// different candidate name, a size change or a vanished file resets the
/// count.
///
/// # Errors
/// - `VerifyError::DownloadTimeout` if no file stabilizes in time
/// - `VerifyError::Io` if the directory cannot be read
pub async fn wait_for_download(dir: &Path, watch: &DownloadWatch) -> Result<String, VerifyError> {
    let start = Instant::now();
    let mut tracked: Option<(String, u64)> = None;
    let mut stable = 0u32;

    loop {
        match sample(dir, watch).await? {
            Some((name, size)) => {
                let unchanged = matches!(&tracked, Some((n, s)) if *n == name && *s == size);
                if unchanged && size > 0 {
                    stable += 1;
                } else {
                    tracked = Some((name, size));
                    stable = 0;
                }

                if stable >= watch.stable_samples {
                    if let Some((name, size)) = tracked {
                        tracing::debug!("download stable: {} ({} bytes)", name, size);
                        return Ok(name);
                    }
                }
            }
            None => {
                tracked = None;
                stable = 0;
            }
        }

        if start.elapsed() >= watch.timeout() {
            return Err(VerifyError::DownloadTimeout {
                dir: dir.to_path_buf(),
                waited_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
        }

        sleep(watch.poll_interval()).await;
    }
}

/// List non-partial files in a directory, sorted by name
///
/// A missing directory lists as empty.
///
/// # Errors
/// - `VerifyError::Io` if the directory exists but cannot be read
pub async fn list_finished(dir: &Path, watch: &DownloadWatch) -> Result<Vec<String>, VerifyError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(VerifyError::io(dir, e)),
    };

    let mut names = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => return Err(VerifyError::io(dir, e)),
        };

        // Entries can vanish between listing and inspection
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if !watch.is_partial(&name) {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

async fn sample(dir: &Path, watch: &DownloadWatch) -> Result<Option<(String, u64)>, VerifyError> {
    let Some(name) = list_finished(dir, watch).await?.into_iter().next() else {
        return Ok(None);
    };

    match tokio::fs::metadata(dir.join(&name)).await {
        Ok(meta) => Ok(Some((name, meta.len()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(VerifyError::io(dir.join(&name), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_watch(timeout_ms: u64) -> DownloadWatch {
        DownloadWatch {
            poll_interval_ms: 10,
            stable_samples: 3,
            timeout_ms,
            ..DownloadWatch::default()
        }
    }

    #[test]
    fn default_matches_portal_behaviour() {
        let watch = DownloadWatch::default();
        assert_eq!(watch.poll_interval(), Duration::from_millis(300));
        assert_eq!(watch.stable_samples, 3);
        assert_eq!(watch.timeout(), Duration::from_secs(120));
        assert!(watch.is_partial("file.pdf.crdownload"));
        assert!(!watch.is_partial("file.pdf"));
    }

    #[tokio::test]
    async fn returns_stable_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cert.pdf"), b"%PDF-1.4 body").unwrap();

        let name = wait_for_download(dir.path(), &fast_watch(2_000)).await.unwrap();
        assert_eq!(name, "cert.pdf");
    }

    #[tokio::test]
    async fn ignores_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cert.pdf.crdownload"), b"partial").unwrap();

        let err = wait_for_download(dir.path(), &fast_watch(150)).await.unwrap_err();
        assert!(matches!(err, VerifyError::DownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn zero_byte_file_never_stabilizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cert.pdf"), b"").unwrap();

        let err = wait_for_download(dir.path(), &fast_watch(150)).await.unwrap_err();
        assert!(matches!(err, VerifyError::DownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn missing_directory_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-created");

        let err = wait_for_download(&missing, &fast_watch(100)).await.unwrap_err();
        assert!(matches!(err, VerifyError::DownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn list_finished_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"b").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"a").unwrap();
        std::fs::write(dir.path().join("c.pdf.crdownload"), b"c").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let names = list_finished(dir.path(), &DownloadWatch::default()).await.unwrap();
        assert_eq!(names, vec!["a.pdf".to_string(), "b.pdf".to_string()]);
    }
}

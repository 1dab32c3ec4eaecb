//! Per-person interaction state machine
//!
//! Drives one person through the portal form:
//!
//! ```text
//! Start → IdentitySubmitted → AwaitingOutcome → ResultObtained → [GenerateRequested →] Done
//!                                   ↑      ↘
//!                                   └── ErrorDialog (single day/month inversion)
//! ```
//!
//! Any stage may fall into `Failed`. The scoped page is closed on every exit
//! path, and a failed attempt removes its own temp directory.

use crate::date;
use crate::download::{wait_for_download, DownloadWatch};
use crate::error::{SessionError, VerifyError};
use crate::ocr::{NoRecognizer, TextRecognizer};
use crate::portal::{CaptchaProfile, PortalProfile, Timeouts};
use crate::session::{race_visible, AutomationSession, Locator, Page};
use crate::types::{PersonRecord, VerificationResult, VerifyOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Interaction stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Page opened, nothing submitted
    Start,
    /// Identity searched, waiting for the birth date field
    IdentitySubmitted,
    /// Birth date submitted, racing result panel against dialog
    AwaitingOutcome,
    /// Result panel shown
    ResultObtained,
    /// Modal dialog shown instead of the result
    ErrorDialog,
    /// Certificate generation clicked
    GenerateRequested,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

/// Stages reachable from `from`
#[must_use]
pub fn allowed_transitions(from: Stage) -> &'static [Stage] {
    use Stage::*;
    match from {
        Start => &[IdentitySubmitted, Failed],
        IdentitySubmitted => &[AwaitingOutcome, Failed],
        AwaitingOutcome => &[ResultObtained, ErrorDialog, Failed],
        ResultObtained => &[GenerateRequested, Done, Failed],
        ErrorDialog => &[AwaitingOutcome, Failed],
        GenerateRequested => &[Done, Failed],
        Done | Failed => &[],
    }
}

/// Check a transition against [`allowed_transitions`]
#[inline]
#[must_use]
pub fn is_allowed(from: Stage, to: Stage) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Records the stages one verification passes through
#[derive(Debug, Clone)]
pub struct StageTracker {
    id: String,
    history: Vec<Stage>,
}

impl StageTracker {
    /// Start tracking at `Start`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: vec![Stage::Start],
        }
    }

    /// Current stage
    #[inline]
    #[must_use]
    pub fn current(&self) -> Stage {
        self.history.last().copied().unwrap_or(Stage::Start)
    }

    /// Every stage visited, in order
    #[inline]
    #[must_use]
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Move to `to`
    pub fn advance(&mut self, to: Stage) {
        let from = self.current();
        debug_assert!(is_allowed(from, to), "illegal transition {from:?} -> {to:?}");
        tracing::debug!("[{}] {:?} -> {:?}", self.id, from, to);
        self.history.push(to);
    }

    /// Count visits to a stage
    #[must_use]
    pub fn visits(&self, stage: Stage) -> usize {
        self.history.iter().filter(|s| **s == stage).count()
    }
}

#[derive(Debug, Clone, Copy)]
enum IdentityOutcome {
    Matched,
    Dialog,
    NoResults,
}

#[derive(Debug, Clone, Copy)]
enum SubmitOutcome {
    Result,
    Dialog,
}

/// Runs the portal interaction for one person at a time
#[derive(Clone)]
pub struct Verifier {
    profile: Arc<PortalProfile>,
    timeouts: Timeouts,
    download: DownloadWatch,
    temp_root: PathBuf,
    recognizer: Arc<dyn TextRecognizer>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("url", &self.profile.url)
            .field("timeouts", &self.timeouts)
            .field("download", &self.download)
            .field("temp_root", &self.temp_root)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Create a verifier writing temp artifacts under `temp_root`
    #[must_use]
    pub fn new(profile: PortalProfile, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            profile: Arc::new(profile),
            timeouts: Timeouts::default(),
            download: DownloadWatch::default(),
            temp_root: temp_root.into(),
            recognizer: Arc::new(NoRecognizer),
        }
    }

    /// With per-operation timeouts
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// With download polling parameters
    #[inline]
    #[must_use]
    pub fn with_download_watch(mut self, download: DownloadWatch) -> Self {
        self.download = download;
        self
    }

    /// With a captcha recognizer
    #[inline]
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Portal profile in use
    #[inline]
    #[must_use]
    pub fn profile(&self) -> &PortalProfile {
        &self.profile
    }

    /// Download polling parameters in use
    #[inline]
    #[must_use]
    pub fn download_watch(&self) -> &DownloadWatch {
        &self.download
    }

    /// Temp directory owned by an attempt for `id`
    #[must_use]
    pub fn temp_dir_for(&self, id: &str) -> PathBuf {
        self.temp_root.join(id)
    }

    /// Verify a roster entry, normalizing its birth date first
    ///
    /// # Errors
    /// See [`Verifier::verify`]
    pub async fn verify_person(
        &self,
        session: &dyn AutomationSession,
        person: &PersonRecord,
        options: VerifyOptions,
    ) -> Result<VerificationResult, VerifyError> {
        let birth_date = date::normalize(&person.birth_date);
        self.verify(session, &person.id, &birth_date, options).await
    }

    /// Verify one identity on a fresh page of `session`
    ///
    /// # Errors
    /// - `VerifyError::PersonNotFound` if the identity lookup does not match
    /// - `VerifyError::DateFormat` if the date is rejected in both orders
    /// - `VerifyError::Verification` for any other dialog after submission
    /// - `VerifyError::CertificateGeneration` if generation reports an error
    /// - `VerifyError::DownloadTimeout` if the artifact never stabilizes
    /// - `VerifyError::Session` for automation failures
    pub async fn verify(
        &self,
        session: &dyn AutomationSession,
        id: &str,
        birth_date: &str,
        options: VerifyOptions,
    ) -> Result<VerificationResult, VerifyError> {
        let temp_dir = options.download_artifact.then(|| self.temp_dir_for(id));
        if let Some(dir) = &temp_dir {
            prepare_temp_dir(dir).await?;
        }

        let mut tracker = StageTracker::new(id);
        let outcome = match session.open_page().await {
            Ok(page) => {
                let outcome = self
                    .drive(page.as_ref(), id, birth_date, temp_dir.as_deref(), &mut tracker)
                    .await;
                if let Err(e) = page.close().await {
                    tracing::warn!("[{}] failed to close page: {}", id, e);
                }
                outcome
            }
            Err(e) => Err(VerifyError::from(e)),
        };

        match outcome {
            Ok(result) => {
                tracker.advance(Stage::Done);
                Ok(result)
            }
            Err(e) => {
                tracker.advance(Stage::Failed);
                tracing::error!("verification failed [{}]: {}", id, e);
                if let Some(dir) = &temp_dir {
                    remove_temp_dir(dir).await;
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        page: &dyn Page,
        id: &str,
        birth_date: &str,
        temp_dir: Option<&Path>,
        tracker: &mut StageTracker,
    ) -> Result<VerificationResult, VerifyError> {
        let profile = &*self.profile;
        let wait = self.timeouts.general();

        if let Some(dir) = temp_dir {
            page.set_download_directory(dir).await?;
        }
        page.navigate(&profile.url, self.timeouts.navigation()).await?;

        if let Some(captcha) = &profile.captcha {
            self.solve_captcha(page, captcha).await?;
        }

        page.fill(&profile.id_input, id).await?;
        page.click(&profile.search_button).await?;
        tracker.advance(Stage::IdentitySubmitted);

        self.await_identity(page, id).await?;
        let name = page.read_text(&profile.display_name).await?;
        tracing::debug!("[{}] portal name: {}", id, name);

        let mut current = birth_date.to_string();
        let mut attempted = Vec::new();
        let mut inverted = false;

        loop {
            page.fill(&profile.birth_date_input, &current).await?;
            attempted.push(current.clone());
            page.click(&profile.verify_button).await?;
            tracker.advance(Stage::AwaitingOutcome);

            let conditions = [
                (SubmitOutcome::Result, &profile.result_panel),
                (SubmitOutcome::Dialog, &profile.dialog_title),
            ];
            match race_visible(page, &conditions, wait).await? {
                SubmitOutcome::Result => {
                    tracker.advance(Stage::ResultObtained);
                    break;
                }
                SubmitOutcome::Dialog => {
                    tracker.advance(Stage::ErrorDialog);
                    let title = page.read_text(&profile.dialog_title).await?;
                    let message = page.read_text(&profile.dialog_message).await?;

                    if !profile.is_date_format_error(&title, &message) {
                        return Err(VerifyError::Verification {
                            id: id.to_string(),
                            title,
                            message,
                        });
                    }
                    if inverted {
                        return Err(VerifyError::DateFormat {
                            id: id.to_string(),
                            attempted,
                            message,
                        });
                    }

                    inverted = true;
                    current = date::invert(&current);
                    tracing::warn!(
                        "date rejected for {}, retrying with inverted format: {}",
                        id,
                        current
                    );
                    page.click(&profile.dialog_confirm).await?;
                }
            }
        }

        let has_impediment = read_optional(page, &profile.impediment_status).await?;

        if let Some(dir) = temp_dir {
            page.click(&profile.generate_button).await?;
            tracker.advance(Stage::GenerateRequested);

            page.wait_for_visible(&profile.dialog_title, wait).await?;
            let title = page.read_text(&profile.dialog_title).await?;
            if profile.is_error_title(&title) {
                return Err(VerifyError::CertificateGeneration {
                    id: id.to_string(),
                    title,
                });
            }
            page.click(&profile.dialog_confirm).await?;

            let file = wait_for_download(dir, &self.download).await?;
            tracing::debug!("[{}] artifact ready: {}", id, file);
        }

        Ok(VerificationResult {
            id: id.to_string(),
            name,
            birth_date: current,
            has_impediment,
            temp_dir: temp_dir.map(Path::to_path_buf),
        })
    }

    async fn await_identity(&self, page: &dyn Page, id: &str) -> Result<(), VerifyError> {
        let profile = &*self.profile;
        let wait = self.timeouts.general();

        let mut conditions = vec![
            (IdentityOutcome::Matched, &profile.birth_date_input),
            (IdentityOutcome::Dialog, &profile.dialog_title),
        ];
        if let Some(not_found) = &profile.not_found {
            conditions.push((IdentityOutcome::NoResults, not_found));
        }

        match race_visible(page, &conditions, wait).await {
            Ok(IdentityOutcome::Matched) => Ok(()),
            Ok(IdentityOutcome::Dialog) => {
                let detail = page.read_text(&profile.dialog_message).await?;
                Err(VerifyError::PersonNotFound {
                    id: id.to_string(),
                    detail,
                })
            }
            Ok(IdentityOutcome::NoResults) => Err(VerifyError::PersonNotFound {
                id: id.to_string(),
                detail: "portal reported no results".to_string(),
            }),
            Err(SessionError::Timeout { timeout_ms, .. }) => Err(VerifyError::PersonNotFound {
                id: id.to_string(),
                detail: format!("birth date field not shown within {timeout_ms}ms"),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn solve_captcha(
        &self,
        page: &dyn Page,
        captcha: &CaptchaProfile,
    ) -> Result<(), VerifyError> {
        page.wait_for_visible(&captcha.image, self.timeouts.general()).await?;
        let image = page.screenshot_region(&captcha.image).await?;
        let text = self
            .recognizer
            .recognize_text(&image, &captcha.lang)
            .await
            .map_err(|e| VerifyError::Ocr(e.to_string()))?;

        let code: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if code.is_empty() {
            return Err(VerifyError::Ocr("captcha recognized as empty".to_string()));
        }
        page.fill(&captcha.input, &code).await?;
        Ok(())
    }
}

async fn read_optional(page: &dyn Page, locator: &Locator) -> Result<Option<String>, VerifyError> {
    match page.read_text(locator).await {
        Ok(text) => Ok(Some(text)),
        Err(SessionError::ElementNotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn prepare_temp_dir(dir: &Path) -> Result<(), VerifyError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!("cleared stale temp dir {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(VerifyError::io(dir, e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| VerifyError::io(dir, e))
}

async fn remove_temp_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove temp dir {}: {}", dir.display(), e);
        }
    }
}

//! Testing utilities for the imped workspace
//!
//! A scripted in-memory portal implementing the automation session traits,
//! plus roster and filesystem fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use imped_core::{
    AutomationSession, CaptchaProfile, Locator, Page, PersonRecord, PortalProfile, SessionError,
    SessionFactory, TextRecognizer, Timeouts, Verifier,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DATE_FORMAT_MESSAGE: &str = "El formato de la fecha es incorrecto";
pub const NOT_FOUND_MESSAGE: &str = "No se encontraron datos";

/// What happens after the identity search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Birth date field appears
    Found,
    /// An error dialog with this message appears
    Dialog(String),
    /// The "no results" element appears
    NoResults,
    /// Nothing appears
    Silent,
}

/// What happens when the certificate is generated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// Success dialog; confirming it writes the file into the download dir
    Download { file_name: String, bytes: Vec<u8> },
    /// Error dialog
    Error,
    /// Success dialog but no file ever arrives
    NoFile,
}

impl Default for Generation {
    fn default() -> Self {
        Self::Download {
            file_name: "certificado.pdf".to_string(),
            bytes: b"%PDF-1.4 certificado".to_vec(),
        }
    }
}

/// Portal behaviour for one identity
#[derive(Debug, Clone)]
pub struct PersonScript {
    pub name: String,
    pub lookup: Lookup,
    pub impediment: Option<String>,
    /// Only this exact date string is accepted; any other gets the format dialog
    pub accepted_date: Option<String>,
    /// Dialog shown after any date submission
    pub rejection: Option<(String, String)>,
    pub generation: Generation,
}

impl PersonScript {
    pub fn found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lookup: Lookup::Found,
            impediment: Some("NO".to_string()),
            accepted_date: None,
            rejection: None,
            generation: Generation::default(),
        }
    }

    pub fn with_lookup(mut self, lookup: Lookup) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_impediment(mut self, impediment: Option<&str>) -> Self {
        self.impediment = impediment.map(str::to_string);
        self
    }

    pub fn accepting(mut self, date: impl Into<String>) -> Self {
        self.accepted_date = Some(date.into());
        self
    }

    pub fn rejecting(mut self, title: impl Into<String>, message: impl Into<String>) -> Self {
        self.rejection = Some((title.into(), message.into()));
        self
    }

    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = generation;
        self
    }
}

/// Counters observed across every session of a portal
#[derive(Debug, Clone, Default)]
pub struct PortalStats {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub active_sessions: usize,
    pub peak_sessions: usize,
    pub pages_opened: usize,
    pub pages_closed: usize,
    pub launch_failures: usize,
    /// `(id, date)` for every birth date submission
    pub date_submissions: Vec<(String, String)>,
    /// Ids in the order their search was submitted
    pub searches: Vec<String>,
}

impl PortalStats {
    pub fn submissions_for(&self, id: &str) -> Vec<&str> {
        self.date_submissions
            .iter()
            .filter(|(i, _)| i == id)
            .map(|(_, d)| d.as_str())
            .collect()
    }
}

struct Inner {
    profile: PortalProfile,
    scripts: Mutex<HashMap<String, PersonScript>>,
    captcha_code: Option<String>,
    fail_launches: Mutex<usize>,
    stats: Mutex<PortalStats>,
}

/// In-memory portal; also the session factory
#[derive(Clone)]
pub struct ScriptedPortal {
    inner: Arc<Inner>,
}

impl Default for ScriptedPortal {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPortal {
    pub fn new() -> Self {
        Self::build(PortalProfile::default(), None)
    }

    /// Portal that shows a captcha whose image reads `code`
    pub fn with_captcha(code: impl Into<String>) -> Self {
        let profile = PortalProfile {
            captcha: Some(CaptchaProfile {
                image: Locator::css("#imgCaptcha"),
                input: Locator::css("#txtCaptcha"),
                lang: "spa".to_string(),
            }),
            ..PortalProfile::default()
        };
        Self::build(profile, Some(code.into()))
    }

    /// Portal with a "no results" element in its profile
    pub fn with_not_found_marker() -> Self {
        let profile = PortalProfile {
            not_found: Some(Locator::css("#sinResultados")),
            ..PortalProfile::default()
        };
        Self::build(profile, None)
    }

    fn build(profile: PortalProfile, captcha_code: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                profile,
                scripts: Mutex::new(HashMap::new()),
                captcha_code,
                fail_launches: Mutex::new(0),
                stats: Mutex::new(PortalStats::default()),
            }),
        }
    }

    /// Register every roster entry as found under its roster name
    pub fn with_roster(self, roster: &[PersonRecord]) -> Self {
        for person in roster {
            self.script(&person.id, PersonScript::found(person.name.clone()));
        }
        self
    }

    pub fn script(&self, id: &str, script: PersonScript) {
        self.inner.scripts.lock().insert(id.to_string(), script);
    }

    /// The next `n` session launches fail
    pub fn fail_next_launches(&self, n: usize) {
        *self.inner.fail_launches.lock() = n;
    }

    pub fn profile(&self) -> PortalProfile {
        self.inner.profile.clone()
    }

    pub fn stats(&self) -> PortalStats {
        self.inner.stats.lock().clone()
    }

    /// Verifier for this portal with short timeouts and fast download polling
    pub fn verifier(&self, temp_root: impl Into<PathBuf>) -> Verifier {
        Verifier::new(self.profile(), temp_root)
            .with_timeouts(Timeouts {
                navigation_ms: 200,
                general_ms: 200,
            })
            .with_download_watch(fast_download_watch())
    }
}

pub fn fast_download_watch() -> imped_core::DownloadWatch {
    imped_core::DownloadWatch {
        poll_interval_ms: 10,
        stable_samples: 3,
        timeout_ms: 300,
        ..imped_core::DownloadWatch::default()
    }
}

#[async_trait]
impl SessionFactory for ScriptedPortal {
    async fn new_session(&self) -> Result<Box<dyn AutomationSession>, SessionError> {
        {
            let mut remaining = self.inner.fail_launches.lock();
            if *remaining > 0 {
                *remaining -= 1;
                self.inner.stats.lock().launch_failures += 1;
                return Err(SessionError::Launch("browser crashed on start".to_string()));
            }
        }

        let mut stats = self.inner.stats.lock();
        stats.sessions_opened += 1;
        stats.active_sessions += 1;
        stats.peak_sessions = stats.peak_sessions.max(stats.active_sessions);
        Ok(Box::new(ScriptedSession {
            inner: Arc::clone(&self.inner),
            closed: Mutex::new(false),
        }))
    }
}

struct ScriptedSession {
    inner: Arc<Inner>,
    closed: Mutex<bool>,
}

#[async_trait]
impl AutomationSession for ScriptedSession {
    async fn open_page(&self) -> Result<Box<dyn Page>, SessionError> {
        if *self.closed.lock() {
            return Err(SessionError::Closed);
        }
        self.inner.stats.lock().pages_opened += 1;
        Ok(Box::new(ScriptedPage {
            inner: Arc::clone(&self.inner),
            state: Mutex::new(PageState::default()),
        }))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut closed = self.closed.lock();
        if *closed {
            return Err(SessionError::Closed);
        }
        *closed = true;
        let mut stats = self.inner.stats.lock();
        stats.sessions_closed += 1;
        stats.active_sessions -= 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConfirm {
    Dismiss,
    Download,
}

#[derive(Debug, Clone)]
struct Dialog {
    title: String,
    message: String,
    on_confirm: OnConfirm,
}

#[derive(Default)]
struct PageState {
    loaded: bool,
    closed: bool,
    fields: HashMap<Locator, String>,
    person: Option<(String, PersonScript)>,
    result: bool,
    no_results: bool,
    dialog: Option<Dialog>,
    download_dir: Option<PathBuf>,
}

struct ScriptedPage {
    inner: Arc<Inner>,
    state: Mutex<PageState>,
}

impl ScriptedPage {
    fn is_visible(&self, locator: &Locator) -> bool {
        let profile = &self.inner.profile;
        let state = self.state.lock();
        if !state.loaded || state.closed {
            return false;
        }

        if *locator == profile.dialog_title
            || *locator == profile.dialog_message
            || *locator == profile.dialog_confirm
        {
            return state.dialog.is_some();
        }
        if *locator == profile.result_panel {
            return state.result && state.dialog.is_none();
        }
        if *locator == profile.birth_date_input {
            return state.person.is_some();
        }
        if profile.not_found.as_ref() == Some(locator) {
            return state.no_results;
        }
        if let Some(captcha) = &profile.captcha {
            if *locator == captcha.image || *locator == captcha.input {
                return true;
            }
        }
        *locator == profile.id_input || *locator == profile.search_button
    }

    fn search(&self) {
        let profile = &self.inner.profile;
        let mut state = self.state.lock();
        let id = state.fields.get(&profile.id_input).cloned().unwrap_or_default();
        self.inner.stats.lock().searches.push(id.clone());

        if let (Some(captcha), Some(code)) = (&profile.captcha, &self.inner.captcha_code) {
            if state.fields.get(&captcha.input) != Some(code) {
                state.dialog = Some(error_dialog("Captcha incorrecto"));
                return;
            }
        }

        let script = self.inner.scripts.lock().get(&id).cloned();
        match script {
            None => state.dialog = Some(error_dialog(NOT_FOUND_MESSAGE)),
            Some(script) => match script.lookup.clone() {
                Lookup::Found => state.person = Some((id, script)),
                Lookup::Dialog(message) => state.dialog = Some(error_dialog(&message)),
                Lookup::NoResults => state.no_results = true,
                Lookup::Silent => {}
            },
        }
    }

    fn verify(&self) -> Result<(), SessionError> {
        let profile = &self.inner.profile;
        let mut state = self.state.lock();
        let Some((id, script)) = state.person.clone() else {
            return Err(SessionError::ElementNotFound(profile.verify_button.to_string()));
        };
        let date = state
            .fields
            .get(&profile.birth_date_input)
            .cloned()
            .unwrap_or_default();
        self.inner.stats.lock().date_submissions.push((id, date.clone()));

        if let Some((title, message)) = &script.rejection {
            state.dialog = Some(Dialog {
                title: title.clone(),
                message: message.clone(),
                on_confirm: OnConfirm::Dismiss,
            });
        } else if script.accepted_date.as_ref().is_some_and(|d| *d != date) {
            state.dialog = Some(error_dialog(&format!(
                "{DATE_FORMAT_MESSAGE}, verifique la fecha de nacimiento"
            )));
        } else {
            state.result = true;
        }
        Ok(())
    }

    fn generate(&self) -> Result<(), SessionError> {
        let profile = &self.inner.profile;
        let mut state = self.state.lock();
        let Some((_, script)) = state.person.clone().filter(|_| state.result) else {
            return Err(SessionError::ElementNotFound(profile.generate_button.to_string()));
        };
        state.dialog = Some(match script.generation {
            Generation::Download { .. } => Dialog {
                title: "Certificado generado".to_string(),
                message: "Su certificado se descargará".to_string(),
                on_confirm: OnConfirm::Download,
            },
            Generation::Error => Dialog {
                title: "ERROR".to_string(),
                message: "No se pudo generar el certificado".to_string(),
                on_confirm: OnConfirm::Dismiss,
            },
            Generation::NoFile => Dialog {
                title: "Certificado generado".to_string(),
                message: "Su certificado se descargará".to_string(),
                on_confirm: OnConfirm::Dismiss,
            },
        });
        Ok(())
    }

    /// Confirm the dialog; returns a file to write if a download starts
    fn confirm(&self) -> Option<(PathBuf, Vec<u8>)> {
        let mut state = self.state.lock();
        let dialog = state.dialog.take()?;
        if dialog.on_confirm != OnConfirm::Download {
            return None;
        }
        let (_, script) = state.person.as_ref()?;
        let Generation::Download { file_name, bytes } = &script.generation else {
            return None;
        };
        let dir = state.download_dir.as_ref()?;
        Some((dir.join(file_name), bytes.clone()))
    }
}

fn error_dialog(message: &str) -> Dialog {
    Dialog {
        title: "ERROR".to_string(),
        message: message.to_string(),
        on_confirm: OnConfirm::Dismiss,
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), SessionError> {
        if url != self.inner.profile.url {
            return Err(SessionError::Protocol {
                error: "unknown url".to_string(),
                message: url.to_string(),
            });
        }
        let mut state = self.state.lock();
        let download_dir = state.download_dir.take();
        *state = PageState {
            loaded: true,
            download_dir,
            ..PageState::default()
        };
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> Result<(), SessionError> {
        if !self.is_visible(locator) {
            return Err(SessionError::ElementNotFound(locator.to_string()));
        }
        self.state.lock().fields.insert(locator.clone(), value.to_string());
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> Result<(), SessionError> {
        let profile = &self.inner.profile;
        if !self.is_visible(locator) && *locator != profile.verify_button {
            return Err(SessionError::ElementNotFound(locator.to_string()));
        }

        if *locator == profile.search_button {
            self.search();
        } else if *locator == profile.verify_button {
            self.verify()?;
        } else if *locator == profile.generate_button {
            self.generate()?;
        } else if *locator == profile.dialog_confirm {
            if let Some((path, bytes)) = self.confirm() {
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| SessionError::Transport(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn wait_for_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        if self.is_visible(locator) {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        Err(SessionError::Timeout {
            what: locator.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    async fn read_text(&self, locator: &Locator) -> Result<String, SessionError> {
        let profile = &self.inner.profile;
        let state = self.state.lock();
        let not_found = || SessionError::ElementNotFound(locator.to_string());

        if let Some(dialog) = &state.dialog {
            if *locator == profile.dialog_title {
                return Ok(dialog.title.clone());
            }
            if *locator == profile.dialog_message {
                return Ok(dialog.message.clone());
            }
        }
        let (_, script) = state.person.as_ref().ok_or_else(not_found)?;
        if *locator == profile.display_name {
            return Ok(script.name.clone());
        }
        if *locator == profile.impediment_status && state.result {
            return script.impediment.clone().ok_or_else(not_found);
        }
        Err(not_found())
    }

    async fn screenshot_region(&self, locator: &Locator) -> Result<Vec<u8>, SessionError> {
        let profile = &self.inner.profile;
        match (&profile.captcha, &self.inner.captcha_code) {
            (Some(captcha), Some(code)) if captcha.image == *locator => {
                Ok(format!("captcha:{code}").into_bytes())
            }
            _ => Err(SessionError::ElementNotFound(locator.to_string())),
        }
    }

    async fn set_download_directory(&self, dir: &Path) -> Result<(), SessionError> {
        self.state.lock().download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SessionError::Closed);
        }
        state.closed = true;
        self.inner.stats.lock().pages_closed += 1;
        Ok(())
    }
}

/// Recognizer that reads the scripted captcha image
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    calls: Mutex<usize>,
}

impl ScriptedRecognizer {
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl TextRecognizer for ScriptedRecognizer {
    async fn recognize_text(&self, image: &[u8], _lang: &str) -> anyhow::Result<String> {
        *self.calls.lock() += 1;
        let text = String::from_utf8_lossy(image);
        let code = text
            .strip_prefix("captcha:")
            .ok_or_else(|| anyhow::anyhow!("unreadable image"))?;
        // OCR output usually carries stray whitespace
        Ok(format!(" {code}\n"))
    }
}

/// Roster of `n` people with distinct ids and names
pub fn roster(n: usize) -> Vec<PersonRecord> {
    (1..=n).map(person).collect()
}

/// The `i`-th fixture person
pub fn person(i: usize) -> PersonRecord {
    PersonRecord::new(
        format!("17{i:08}"),
        format!("PERSONA NUMERO {i}"),
        format!("{}/{}/9{}", (i % 12) + 1, (i % 27) + 1, i % 10),
    )
}

/// Temp root and output root inside one disposable directory
pub struct TestDirs {
    _root: tempfile::TempDir,
    pub temp: PathBuf,
    pub output: PathBuf,
}

impl TestDirs {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let temp = root.path().join("temp");
        let output = root.path().join("certificados");
        Self {
            _root: root,
            temp,
            output,
        }
    }
}

impl Default for TestDirs {
    fn default() -> Self {
        Self::new()
    }
}

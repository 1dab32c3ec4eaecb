//! Portal profile
//!
//! Everything the state machine needs to know about the remote form: where
//! it lives, which elements to drive, and which texts mean what.

use crate::session::Locator;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default impediment portal
pub const DEFAULT_PORTAL_URL: &str = "https://calculadoras.trabajo.gob.ec/impedimento";

/// Locators and marker texts of the remote form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalProfile {
    /// Form URL
    pub url: String,
    /// Identity input
    pub id_input: Locator,
    /// Identity search button
    pub search_button: Locator,
    /// Birth date input, visible once the identity matched
    pub birth_date_input: Locator,
    /// Confirmed display name
    pub display_name: Locator,
    /// Verify button
    pub verify_button: Locator,
    /// Element whose visibility marks the result panel
    pub result_panel: Locator,
    /// Impediment status text inside the result panel
    pub impediment_status: Locator,
    /// Certificate generation button
    pub generate_button: Locator,
    /// Modal dialog title
    pub dialog_title: Locator,
    /// Modal dialog message
    pub dialog_message: Locator,
    /// Modal dialog confirm button
    pub dialog_confirm: Locator,
    /// Optional "no results" element raced against the birth date input
    pub not_found: Option<Locator>,
    /// Dialog title (case-insensitive) that marks an error
    pub error_title: String,
    /// Dialog message fragment that marks a day/month order mismatch
    pub date_format_marker: String,
    /// Optional captcha to solve before submitting the identity
    pub captcha: Option<CaptchaProfile>,
}

impl Default for PortalProfile {
    fn default() -> Self {
        let generate = Locator::xpath(
            r#"//button[contains(normalize-space(.), "GENERAR CERTIFICADO")]"#,
        );
        Self {
            url: DEFAULT_PORTAL_URL.to_string(),
            id_input: Locator::css("#txtNumeroDocumento"),
            search_button: Locator::xpath(r#"//button[normalize-space(text())="Buscar"]"#),
            birth_date_input: Locator::css("#txtFechaI"),
            display_name: Locator::css("label.control-label + .input-group span.form-control"),
            verify_button: Locator::xpath(
                r#"//button[contains(normalize-space(.), "VERIFICAR IMPEDIMENTO")]"#,
            ),
            result_panel: generate.clone(),
            impediment_status: Locator::xpath(
                r#"//label[contains(normalize-space(.), "Registra Impedimento")]/following::span[1]"#,
            ),
            generate_button: generate,
            dialog_title: Locator::css("#swal2-title"),
            dialog_message: Locator::css("#swal2-html-container"),
            dialog_confirm: Locator::css("button.swal2-confirm"),
            not_found: None,
            error_title: "ERROR".to_string(),
            date_format_marker: "El formato de la fecha es incorrecto".to_string(),
            captcha: None,
        }
    }
}

impl PortalProfile {
    /// Check whether a dialog title marks an error
    #[inline]
    #[must_use]
    pub fn is_error_title(&self, title: &str) -> bool {
        title.trim().eq_ignore_ascii_case(self.error_title.trim())
    }

    /// Check whether a dialog reports a day/month order mismatch
    #[inline]
    #[must_use]
    pub fn is_date_format_error(&self, title: &str, message: &str) -> bool {
        self.is_error_title(title) && message.contains(&self.date_format_marker)
    }
}

/// Captcha image and input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaProfile {
    /// Captcha image element
    pub image: Locator,
    /// Input receiving the recognized text
    pub input: Locator,
    /// OCR language
    #[serde(default = "default_ocr_lang")]
    pub lang: String,
}

fn default_ocr_lang() -> String {
    "eng".to_string()
}

/// Per-operation timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Navigation timeout
    pub navigation_ms: u64,
    /// Element wait timeout
    pub general_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation_ms: 120_000,
            general_ms: 120_000,
        }
    }
}

impl Timeouts {
    /// Navigation timeout
    #[inline]
    #[must_use]
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    /// Element wait timeout
    #[inline]
    #[must_use]
    pub fn general(&self) -> Duration {
        Duration::from_millis(self.general_ms)
    }
}

//! Imped Driver - concrete collaborators for the verification pipeline
//!
//! - [`WebDriverFactory`]: automation sessions over the W3C WebDriver protocol
//! - [`TesseractRecognizer`]: captcha text recognition via `tesseract`

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod ocr;
pub mod protocol;
pub mod webdriver;

pub use ocr::TesseractRecognizer;
pub use webdriver::{DriverError, WebDriverConfig, WebDriverFactory, WebDriverPage, WebDriverSession};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

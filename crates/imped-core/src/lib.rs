//! Imped Core - impediment certificate verification pipeline
//!
//! Drives a roster of people through a remote verification portal:
//! - Per-person interaction state machine with a single date-format inversion
//! - Download completion detection by size-stability polling
//! - Resource-bounded worker sizing and order-preserving partitioning
//! - A pool of independent automation sessions with live progress
//! - Artifact consolidation and a retry loop over failures
//!
//! The browser and OCR capabilities are traits ([`SessionFactory`],
//! [`TextRecognizer`]); concrete adapters live in other crates.
//!
//! # Example
//!
//! ```rust,ignore
//! use imped_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(factory: Arc<dyn SessionFactory>, roster: Vec<PersonRecord>) -> Result<(), BatchError> {
//! let verifier = Arc::new(Verifier::new(PortalProfile::default(), "/tmp/imped"));
//! let pipeline = Pipeline::new(SessionPool::new(factory, verifier), 4)
//!     .with_downloads(Consolidator::new("certificados"));
//!
//! let ledger = RetryLoop::new()
//!     .run(roster, &pipeline, &NeverRetry, &NoObserver)
//!     .await?;
//! println!("{} succeeded", ledger.succeeded());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod consolidate;
pub mod date;
pub mod download;
pub mod error;
pub mod ocr;
pub mod partition;
pub mod pipeline;
pub mod pool;
pub mod portal;
pub mod report;
pub mod retry;
pub mod session;
pub mod sizing;
pub mod types;
pub mod verifier;

// Re-exports for convenience
pub use consolidate::{safe_name, Consolidation, Consolidator};
pub use download::{wait_for_download, DownloadWatch};
pub use error::{
    BatchError, ConsolidateError, ErrorDescriptor, ErrorKind, ReportError, SessionError,
    SizingError, VerifyError,
};
pub use ocr::{NoRecognizer, TextRecognizer};
pub use partition::partition;
pub use pipeline::Pipeline;
pub use pool::{NoProgress, ProgressSink, SessionPool};
pub use portal::{CaptchaProfile, PortalProfile, Timeouts};
pub use report::{BatchRunReport, ReportExporter, ReportRow, RunClock};
pub use retry::{
    AlwaysRetry, NeverRetry, NoObserver, RetryDecision, RetryLoop, RoundObserver, RoundOutcome,
    RoundRunner, RunLedger,
};
pub use session::{race_visible, AutomationSession, Locator, Page, SessionFactory};
pub use sizing::{
    probe_system, MemoryPolicy, ResourceAdvisor, Sizing, SizingConfig, SystemSnapshot,
};
pub use types::{
    BatchOutcome, CertificatePaths, FailureRecord, PersonRecord, ProgressEvent,
    VerificationResult, VerifyOptions,
};
pub use verifier::{Stage, StageTracker, Verifier};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Imped Core
    pub use crate::{
        AlwaysRetry, AutomationSession, BatchError, Consolidator, NeverRetry, NoObserver,
        PersonRecord, Pipeline, PortalProfile, ProgressEvent, ProgressSink, RetryLoop,
        SessionFactory, SessionPool, VerificationResult, Verifier, VerifyError, VerifyOptions,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

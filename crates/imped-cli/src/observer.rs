//! End-of-round reporting

use async_trait::async_trait;
use imped_core::{BatchError, ReportExporter, RoundObserver, RoundOutcome, RunLedger};

/// Prints the run report and failures, and re-exports the tabular report
pub struct RoundReporter {
    exporter: Option<ReportExporter>,
    with_certificates: bool,
}

impl RoundReporter {
    /// `exporter` is `None` when the operator declined the report
    #[must_use]
    pub fn new(exporter: Option<ReportExporter>, with_certificates: bool) -> Self {
        Self {
            exporter,
            with_certificates,
        }
    }
}

#[async_trait]
impl RoundObserver for RoundReporter {
    async fn round_completed(
        &self,
        round: &RoundOutcome,
        ledger: &RunLedger,
    ) -> Result<(), BatchError> {
        if let Some(exporter) = &self.exporter {
            if !round.batch.results.is_empty() {
                let rows = ledger.report_rows(self.with_certificates);
                let path = exporter.export(&rows).await?;
                println!("Report saved to {}", path.display());
            }
        }

        for failure in &round.batch.failures {
            tracing::error!(
                "{} {}: {}",
                failure.person.id,
                failure.person.name,
                failure.error
            );
        }

        for id in &round.skipped {
            tracing::warn!("{}: no certificate file was found to consolidate", id);
        }

        println!("\n{}\n", round.report);
        Ok(())
    }
}

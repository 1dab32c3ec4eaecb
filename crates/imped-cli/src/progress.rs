//! Live progress display

use imped_core::{ProgressEvent, ProgressSink};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::time::Duration;

/// One progress line for a finished person
///
/// `position` is `(processed, total)` within the round, when known.
#[must_use]
pub fn progress_line(event: &ProgressEvent, position: Option<(u64, u64)>) -> String {
    let prefix = position.map_or_else(String::new, |(done, total)| format!("[{done}/{total}] "));
    if event.success {
        format!(
            "{prefix}SUCCESS: {} - {} - impediment: {}",
            event.id,
            event.name,
            event.has_impediment.as_deref().unwrap_or("-")
        )
    } else {
        let error = event
            .error
            .as_ref()
            .map_or_else(|| "unknown error".to_string(), ToString::to_string);
        format!("{prefix}ERROR: {} - {} - {}", event.id, event.name, error)
    }
}

/// Progress bar per round with a line per person above it
pub struct ProgressReporter {
    multi: MultiProgress,
    bar: Mutex<Option<ProgressBar>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bar: Mutex::new(None),
        }
    }
}

impl ProgressSink for ProgressReporter {
    fn on_progress(&self, event: &ProgressEvent) -> anyhow::Result<()> {
        match self.bar.lock().as_ref() {
            Some(bar) => {
                bar.inc(1);
                let position = (bar.position(), bar.length().unwrap_or_default());
                bar.println(progress_line(event, Some(position)));
            }
            None => println!("{}", progress_line(event, None)),
        }
        Ok(())
    }

    fn round_started(&self, round: u32, people: usize, workers: usize) {
        let bar = self.multi.add(ProgressBar::new(people as u64));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message(format!("round {round}, {workers} session(s)"));
        *self.bar.lock() = Some(bar);
    }

    fn round_finished(&self, _round: u32) {
        if let Some(bar) = self.bar.lock().take() {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }
}

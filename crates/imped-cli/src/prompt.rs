//! Operator prompts
//!
//! Free-text questions on stdin: yes/no toggles, the worker count and the
//! retry confirmation.

use async_trait::async_trait;
use imped_core::{FailureRecord, RetryDecision};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Interpret a yes/no answer; anything unrecognized is "no"
#[must_use]
pub fn parse_yes_no(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "s" | "si" | "sí"
    )
}

/// Interpret a typed worker count; anything but a positive integer is 1
#[must_use]
pub fn parse_count(answer: &str) -> usize {
    match answer.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => 1,
    }
}

/// Line-oriented question and answer over any async reader
pub struct Console<R> {
    input: Mutex<R>,
}

impl Console<BufReader<Stdin>> {
    /// Console reading from stdin
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> Console<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }

    /// Print `question` and read one line; `None` at end of input
    ///
    /// # Errors
    /// Propagates stdin/stdout failures.
    pub async fn ask(&self, question: &str) -> std::io::Result<Option<String>> {
        {
            let mut stdout = std::io::stdout().lock();
            write!(stdout, "{question} ")?;
            stdout.flush()?;
        }

        let mut line = String::new();
        let read = self.input.lock().await.read_line(&mut line).await?;
        Ok((read > 0).then_some(line))
    }

    /// Ask a yes/no question; end of input is "no"
    ///
    /// # Errors
    /// Propagates stdin/stdout failures.
    pub async fn ask_yes_no(&self, question: &str) -> std::io::Result<bool> {
        let answer = self.ask(&format!("{question} (y/n)")).await?;
        Ok(answer.as_deref().is_some_and(parse_yes_no))
    }

    /// Confirm the recommended worker count or ask for another one
    ///
    /// # Errors
    /// Propagates stdin/stdout failures.
    pub async fn ask_count(&self, recommended: usize) -> std::io::Result<usize> {
        let confirm = format!("Use {recommended} browser session(s)?");
        if self.ask_yes_no(&confirm).await? {
            return Ok(recommended);
        }
        let answer = self.ask("Enter number of browser sessions:").await?;
        Ok(answer.map_or(1, |a| parse_count(&a)))
    }
}

/// Lists outstanding failures and asks whether to retry them
pub struct InteractiveRetry<R> {
    console: std::sync::Arc<Console<R>>,
}

impl<R> InteractiveRetry<R> {
    pub fn new(console: std::sync::Arc<Console<R>>) -> Self {
        Self { console }
    }
}

/// One line per outstanding failure
#[must_use]
pub fn failure_listing(failures: &[FailureRecord]) -> String {
    failures
        .iter()
        .map(|f| format!("  {} {}: {}", f.person.id, f.person.name, f.error))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> RetryDecision for InteractiveRetry<R> {
    async fn should_retry(&self, outstanding: &[FailureRecord], round: u32) -> bool {
        println!("\nFailed after round {round}:\n{}", failure_listing(outstanding));
        let question = format!("Retry {} failed people?", outstanding.len());
        match self.console.ask_yes_no(&question).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("cannot read retry answer: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imped_core::{PersonRecord, VerifyError};
    use std::sync::Arc;

    #[test]
    fn yes_no_answers() {
        assert!(parse_yes_no("y\n"));
        assert!(parse_yes_no(" YES "));
        assert!(parse_yes_no("si"));
        assert!(!parse_yes_no("n"));
        assert!(!parse_yes_no(""));
        assert!(!parse_yes_no("maybe"));
    }

    #[test]
    fn count_answers() {
        assert_eq!(parse_count("3\n"), 3);
        assert_eq!(parse_count(""), 1);
        assert_eq!(parse_count("0"), 1);
        assert_eq!(parse_count("lots"), 1);
        assert_eq!(parse_count("-2"), 1);
    }

    #[tokio::test]
    async fn console_confirms_or_overrides_worker_count() {
        let console = Console::new(&b"y\nn\n2\nn\nmany\ny\nn\n"[..]);
        assert_eq!(console.ask_count(5).await.unwrap(), 5);
        assert_eq!(console.ask_count(5).await.unwrap(), 2);
        assert_eq!(console.ask_count(5).await.unwrap(), 1);
        assert!(console.ask_yes_no("Export report?").await.unwrap());
        assert!(!console.ask_yes_no("Download certificates?").await.unwrap());
        // end of input
        assert!(!console.ask_yes_no("Again?").await.unwrap());
        assert_eq!(console.ask_count(5).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn interactive_retry_uses_answers() {
        let console = Arc::new(Console::new(&b"y\nno\n"[..]));
        let decision = InteractiveRetry::new(console);
        let failures = vec![FailureRecord::new(
            PersonRecord::new("1", "ANA", "1/1/90"),
            &VerifyError::Ocr("blank".to_string()),
        )];

        assert!(decision.should_retry(&failures, 1).await);
        assert!(!decision.should_retry(&failures, 2).await);
        assert!(failure_listing(&failures).contains("1 ANA: OcrError"));
    }
}

//! `imped` - batch retrieval of impediment certificates
//!
//! ```text
//! imped [--config FILE] ROSTER.json
//! ```

mod config;
mod observer;
mod progress;
mod prompt;
mod roster;

use anyhow::Context;
use clap::{value_parser, Arg, Command};
use config::AppConfig;
use imped_core::{
    probe_system, Consolidator, Pipeline, ReportExporter, ResourceAdvisor, RetryLoop,
    SessionPool, Sizing, Verifier,
};
use imped_driver::{TesseractRecognizer, WebDriverFactory};
use observer::RoundReporter;
use progress::ProgressReporter;
use prompt::{Console, InteractiveRetry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("imped")
        .version(imped_core::VERSION)
        .about("Retrieve impediment certificates for a roster of people")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("roster")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("JSON array of {id, name, birthDate}"),
        )
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_sizing(sizing: &Sizing) {
    println!("--- System ---");
    println!("CPUs:             {}", sizing.cpu_count);
    println!("Total memory:     {:.2} GiB", sizing.total_memory_gb);
    println!(
        "Available memory: {:.2} GiB ({})",
        sizing.available_memory_gb, sizing.policy
    );
    println!(
        "Sessions by memory / cpu: {} / {}",
        sizing.by_memory, sizing.by_cpu
    );
    println!("Recommended sessions: {}", sizing.recommended);
}

async fn run(config_path: Option<PathBuf>, roster_path: PathBuf) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let roster = roster::load_roster(&roster_path)?;
    if roster.is_empty() {
        println!("Roster is empty, nothing to do");
        return Ok(());
    }

    let snapshot = probe_system().context("probing system resources")?;
    let sizing = ResourceAdvisor::new(config.sizing).advise(&snapshot, roster.len())?;
    print_sizing(&sizing);

    let console = Arc::new(Console::stdin());
    let workers = console.ask_count(sizing.recommended).await?;
    let export = console.ask_yes_no("Export report?").await?;
    let download = console.ask_yes_no("Download certificates?").await?;

    let factory = WebDriverFactory::new(config.webdriver.clone())?;
    let mut verifier = Verifier::new(config.portal.clone(), &config.paths.temp_root)
        .with_timeouts(config.timeouts)
        .with_download_watch(config.download.clone());
    if config.portal.captcha.is_some() {
        verifier = verifier.with_recognizer(Arc::new(TesseractRecognizer::default()));
    }

    let pool = SessionPool::new(Arc::new(factory), Arc::new(verifier));
    let mut pipeline =
        Pipeline::new(pool, workers).with_progress(Arc::new(ProgressReporter::new()));
    if download {
        pipeline = pipeline.with_downloads(
            Consolidator::new(&config.paths.output_root)
                .with_download_watch(config.download.clone()),
        );
    }

    let exporter = export.then(|| ReportExporter::new(config.paths.report_path()));
    let reporter = RoundReporter::new(exporter, download);
    let decision = InteractiveRetry::new(Arc::clone(&console));

    tracing::info!(
        "processing {} people with up to {} session(s)",
        roster.len(),
        workers
    );
    let ledger = RetryLoop::new()
        .run(roster, &pipeline, &decision, &reporter)
        .await?;

    println!(
        "Done after {} round(s): {} succeeded, {} outstanding",
        ledger.rounds(),
        ledger.succeeded(),
        ledger.outstanding().len()
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let matches = cli().get_matches();
    let config_path = matches.get_one::<PathBuf>("config").cloned();
    let Some(roster_path) = matches.get_one::<PathBuf>("roster").cloned() else {
        eprintln!("missing roster file");
        std::process::exit(2);
    };

    if let Err(e) = run(config_path, roster_path).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_config_and_roster() {
        let matches = cli()
            .try_get_matches_from(["imped", "--config", "imped.toml", "people.json"])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("imped.toml"))
        );
        assert_eq!(
            matches.get_one::<PathBuf>("roster"),
            Some(&PathBuf::from("people.json"))
        );
    }

    #[test]
    fn cli_requires_roster() {
        assert!(cli().try_get_matches_from(["imped"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }
}

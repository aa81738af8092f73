use anyhow::Result;
use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt};

use crate::config::AppConfig;
use crate::dongchedi_api::{DongchediClient, RankingSource};
use crate::error::{AppError, AppResult, ErrorChain};
use crate::month::MonthRange;
use crate::notifier::{Notification, Notifier};
use crate::report::RunSummary;

// Declare modules
mod config;
mod dongchedi_api;
mod error;
mod export;
mod models;
mod month;
mod notifier;
mod report;
mod scraper;
#[cfg(test)]
mod test_support;

/// What a successful run produced.
#[derive(Debug)]
struct RunOutcome {
    artifact: std::path::PathBuf,
    rows: usize,
}

/// Fetch, write and mail. Configuration and transports are validated before
/// the first request goes out.
async fn run(config: &AppConfig) -> AppResult<RunOutcome> {
    let range = config.range.resolve(Utc::now(), config.timezone)?;
    tracing::info!(
        start = %range.start(),
        end = %range.end(),
        category = ?config.fetch.category,
        "Fetch range resolved"
    );

    let notifier = notifier::from_config(&config.mail.transport, config.request_timeout)
        .map_err(AppError::TransportSetup)?;

    let http = dongchedi_api::build_client(&config.user_agent, config.request_timeout)
        .map_err(AppError::HttpClient)?;
    let source = DongchediClient::new(http);

    run_with(config, range, &source, notifier.as_ref()).await
}

/// The pipeline proper. A fetch failure returns before anything is written;
/// a delivery failure leaves the CSV in place and names it.
async fn run_with(
    config: &AppConfig,
    range: MonthRange,
    source: &dyn RankingSource,
    notifier: &dyn Notifier,
) -> AppResult<RunOutcome> {
    let mut rows = scraper::fetch_range(source, range, &config.fetch).await?;

    let artifact = config
        .output_dir
        .join(export::artifact_file_name(range, config.fetch.category));
    let written = export::write_csv(&mut rows, &artifact)?;

    let summary = RunSummary {
        range,
        rows: written,
        category: config.fetch.category,
        page_size: config.fetch.page_size,
        timezone: config.timezone,
    };
    let notification = Notification {
        subject: summary.subject(),
        body: summary.body(),
        attachments: vec![artifact.clone()],
        from: config.mail.from.clone(),
        to: config.mail.to.clone(),
    };

    notifier
        .send(&notification)
        .await
        .map_err(|source| AppError::Delivery {
            artifact: artifact.clone(),
            source,
        })?;
    tracing::info!(transport = notifier.transport_name(), recipients = notification.to.len(), "Email sent.");

    Ok(RunOutcome { artifact, rows: written })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file first. Ignore errors (e.g., file not found)
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "dongchedi_sales=info".into())) // Default to info if RUST_LOG not set
        .with(fmt::layer())
        .init();

    tracing::info!("Starting Dongchedi monthly sales job...");

    // Load configuration
    let config = match AppConfig::load() {
        Ok(c) => {
            tracing::info!("Configuration loaded successfully.");
            c
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", ErrorChain(&e));
            return Err(e.into());
        }
    };

    match run(&config).await {
        Ok(outcome) => {
            tracing::info!(artifact = %outcome.artifact.display(), rows = outcome.rows, "Run complete");
            Ok(())
        }
        Err(e) => {
            match &e {
                AppError::Delivery { artifact, .. } => {
                    tracing::error!(artifact = %artifact.display(), "CSV kept on disk for a manual resend: {}", ErrorChain(&e))
                }
                _ => tracing::error!("Run failed: {}", ErrorChain(&e)),
            }
            Err(e.into())
        }
    }
}

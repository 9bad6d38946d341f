//! TaxiiForge
//!
//! Polls a TAXII collection and keeps the Falcon indicator store in sync with it.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::Instrument;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;
use uuid::Uuid;

mod auth;
mod collectors;
mod error;
mod extractor;
mod models;
mod pacing;
mod storage;
mod sync;

use auth::FalconAuth;
use collectors::TaxiiClient;
use collectors::taxii::TaxiiCredentials;
use error::{CallError, SyncError};
use extractor::IndicatorExtractor;
use models::{IndicatorAction, IocType};
use pacing::{Backoff, RateLimiter, RetryPolicy};
use storage::FalconStore;
use sync::{ExpirationPolicy, SyncReport, SyncSettings, run_sync};

/// Exit status of a run that finished but could not push every indicator
const EXIT_PARTIAL_FAILURE: u8 = 2;

/// TaxiiForge
#[derive(Parser, Debug)]
#[command(name = "taxiiforge")]
#[command(about = "Sync TAXII threat intelligence into the Falcon indicator store")]
struct Args {
    /// Falcon API client id
    #[arg(long, env = "CLIENT_ID")]
    client_id: String,

    /// Falcon API client secret
    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Falcon API base URL
    #[arg(long, env = "FALCON_BASE_URL", default_value = "https://api.crowdstrike.com")]
    falcon_base_url: String,

    /// TAXII server URL
    #[arg(long, env = "TAXII_SERVER_URL")]
    taxii_server_url: String,

    /// TAXII username
    #[arg(long, env = "TAXII_USERNAME")]
    taxii_username: String,

    /// TAXII password
    #[arg(long, env = "TAXII_PASSWORD", hide_env_values = true)]
    taxii_password: String,

    /// TAXII collection to poll
    #[arg(long, env = "TAXII_COLLECTION")]
    taxii_collection: String,

    /// Minimum seconds between outbound requests
    #[arg(long, env = "RATE_LIMIT_DELAY", default_value = "2")]
    rate_limit_delay: u64,

    /// Attempts per token fetch, lookup and upsert
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    max_retries: u32,

    /// Seconds between attempts
    #[arg(long, env = "RETRY_DELAY", default_value = "5")]
    retry_delay: u64,

    /// Delay growth between attempts
    #[arg(long, env = "RETRY_BACKOFF", value_enum, default_value_t = Backoff::Fixed)]
    retry_backoff: Backoff,

    /// Consecutive failed polls of one feed page before giving up
    #[arg(long, env = "FEED_MAX_RETRIES", default_value = "5")]
    feed_max_retries: u32,

    /// Indicator types to import
    #[arg(
        long,
        env = "IOC_TYPES",
        value_enum,
        value_delimiter = ',',
        default_values_t = IocType::ALL.to_vec()
    )]
    ioc_types: Vec<IocType>,

    /// Source label attached to every pushed indicator
    #[arg(
        long,
        env = "IOC_SOURCE",
        default_value = "TAXII Import",
        value_parser = clap::builder::NonEmptyStringValueParser::new()
    )]
    ioc_source: String,

    /// Action the platform takes on a match
    #[arg(long, env = "IOC_ACTION", value_enum, default_value_t = IndicatorAction::Detect)]
    ioc_action: IndicatorAction,

    /// Days until a pushed indicator expires
    #[arg(
        long,
        env = "EXPIRATION_DAYS",
        default_value = "90",
        value_parser = clap::value_parser!(i64).range(1..=3650)
    )]
    expiration_days: i64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT", default_value = "30")]
    http_timeout: u64,

    /// Also append logs to this file
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Cron expression; run continuously on this schedule instead of once
    #[arg(long, env = "SYNC_SCHEDULE")]
    schedule: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Args {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_delay),
            self.retry_backoff,
        )
    }

    fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            extractor: IndicatorExtractor::new(self.ioc_types.iter().copied(), self.ioc_source.clone()),
            expiration: ExpirationPolicy::from_days(self.expiration_days),
            action: self.ioc_action,
            retry: self.retry_policy(),
            feed_max_attempts: self.feed_max_retries,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Parse arguments
    let args = Args::parse();

    init_tracing(&args)?;

    if let Some(addr) = args.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to start Prometheus exporter")?;
        tracing::info!("Serving metrics on http://{}/metrics", addr);
    }

    tracing::info!("TAXII to Falcon IOC ingestion started");

    match args.schedule.clone() {
        Some(schedule) => {
            run_scheduled(Arc::new(args), &schedule).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let report = run_once(&args).await?;
            Ok(exit_code(&report))
        }
    }
}

fn init_tracing(args: &Args) -> Result<()> {
    let console = if args.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let file = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taxiiforge=info".into()),
        )
        .init();

    Ok(())
}

/// One full sync: token, feed walk, reconciliation
async fn run_once(args: &Args) -> Result<SyncReport> {
    let run_id = Uuid::new_v4();

    async {
        let result = sync_with_fresh_token(args).await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "IOC ingestion aborted");
        }
        result
    }
    .instrument(tracing::info_span!("sync", %run_id))
    .await
}

async fn sync_with_fresh_token(args: &Args) -> Result<SyncReport> {
    let falcon_url = base_url(&args.falcon_base_url)?;
    let taxii_url = base_url(&args.taxii_server_url)?;
    let retry = args.retry_policy();

    let auth = FalconAuth::new(
        &falcon_url,
        args.client_id.clone(),
        args.client_secret.clone(),
        args.timeout(),
    )?;
    let token = retry
        .run("token fetch", CallError::is_retryable, || auth.fetch_token())
        .await
        .map_err(SyncError::TokenUnavailable)?
        .into_inner();

    let feed = TaxiiClient::new(
        &taxii_url,
        args.taxii_collection.clone(),
        TaxiiCredentials {
            username: args.taxii_username.clone(),
            password: args.taxii_password.clone(),
        },
        args.timeout(),
    )?;
    let store = FalconStore::new(&falcon_url, token, args.timeout())?;
    let limiter = RateLimiter::new(Duration::from_secs(args.rate_limit_delay));

    tracing::info!(
        server = %feed.poll_url(),
        collection = %args.taxii_collection,
        rate_limit_secs = args.rate_limit_delay,
        "Polling TAXII server"
    );

    let report = run_sync(&feed, &store, &limiter, &args.sync_settings()).await?;
    Ok(report)
}

async fn run_scheduled(args: Arc<Args>, schedule: &str) -> Result<()> {
    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create scheduler: {:?}", e))?;

    // Runs never overlap; a tick during a run is skipped
    let running = Arc::new(tokio::sync::Mutex::new(()));
    let job_args = args.clone();
    let job = Job::new_async(schedule, move |_id, _scheduler| {
        let args = job_args.clone();
        let running = running.clone();
        Box::pin(async move {
            let Ok(_guard) = running.try_lock() else {
                tracing::warn!("Previous sync still running, skipping this tick");
                return;
            };
            if let Ok(report) = run_once(&args).await {
                if report.has_failures() {
                    tracing::warn!(failed = report.failed(), "Sync finished with failed indicators");
                }
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("Invalid sync schedule '{}': {:?}", schedule, e))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to add sync job: {:?}", e))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start scheduler: {:?}", e))?;
    tracing::info!(schedule, "Scheduled sync started");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down scheduler");
    scheduler
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to stop scheduler: {:?}", e))?;

    Ok(())
}

/// Parse a base URL so relative paths join below it
fn base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn exit_code(report: &SyncReport) -> ExitCode {
    if report.has_failures() {
        ExitCode::from(EXIT_PARTIAL_FAILURE)
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    use crate::models::{Indicator, UpsertAction, UpsertOutcome};

    const REQUIRED: [&str; 13] = [
        "taxiiforge",
        "--client-id",
        "id",
        "--client-secret",
        "secret",
        "--taxii-server-url",
        "https://taxii.example.net",
        "--taxii-username",
        "user",
        "--taxii-password",
        "pass",
        "--taxii-collection",
        "feed",
    ];

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_follow_ingestion_script() {
        let args = Args::try_parse_from(REQUIRED).unwrap();
        assert_eq!(args.rate_limit_delay, 2);
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.expiration_days, 90);
        assert_eq!(args.ioc_types, IocType::ALL.to_vec());
        assert_eq!(args.ioc_action, IndicatorAction::Detect);
        assert_eq!(args.retry_backoff, Backoff::Fixed);
        assert!(args.schedule.is_none());
    }

    #[test]
    fn empty_ioc_source_is_rejected() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--ioc-source", ""]);
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn ioc_types_accept_a_comma_list() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--ioc-types", "domain,sha256"]);
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.ioc_types, vec![IocType::Domain, IocType::Sha256]);

        let settings = args.sync_settings();
        assert!(settings.extractor.supports(IocType::Domain));
        assert!(!settings.extractor.supports(IocType::Ipv4));
    }

    #[test]
    fn expiration_must_be_positive() {
        let mut argv = REQUIRED.to_vec();
        argv.extend(["--expiration-days", "0"]);
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        assert_eq!(
            base_url("https://api.example.com/falcon").unwrap().as_str(),
            "https://api.example.com/falcon/"
        );
        assert_eq!(
            base_url("https://api.example.com").unwrap().as_str(),
            "https://api.example.com/"
        );
        assert!(base_url("not a url").is_err());
    }

    #[test]
    fn any_failed_outcome_makes_exit_code_nonzero() {
        let mut report = SyncReport::default();
        assert_eq!(exit_code(&report), ExitCode::SUCCESS);

        report.outcomes.push(UpsertOutcome {
            indicator: Indicator {
                ioc_type: IocType::Domain,
                value: "flaky.example.com".into(),
                source_label: "TAXII Import".into(),
            },
            action: UpsertAction::Failed,
            http_status: Some(500),
            attempts: 3,
        });
        assert_eq!(exit_code(&report), ExitCode::from(EXIT_PARTIAL_FAILURE));
    }
}

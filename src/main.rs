//! Backfill CLI.
//!
//! Universe selection, year range, source priority and mode come from the
//! command line; provider credentials come from `<PROVIDER>_API_KEY`
//! environment variables and the store connection from `STORE_URL`.
//!
//! Exit codes: 0 success, 2 partial (some units failed), 3 fatal store
//! error, 4 auth failed on every source, 130 interrupted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{ArgGroup, Parser};

use fundfill::adapter::SourceAdapter;
use fundfill::adapter::dart::DartAdapter;
use fundfill::adapter::krx::KrxAdapter;
use fundfill::adapter::yahoo::YahooAdapter;
use fundfill::backfill::{BackfillConfig, BackfillOrchestrator, Mode, UniverseSelection};
use fundfill::core::{PeriodType, Region, SourceId};
use fundfill::governor::RateGovernor;
use fundfill::store::{FundamentalsStore, MemStore, PgStore};

#[derive(Parser, Debug)]
#[command(
    name = "fundfill",
    version,
    about = "Multi-source historical fundamentals backfill",
    group(ArgGroup::new("universe").required(true).args(["tickers", "top", "all"]))
)]
struct Cli {
    /// Explicit ticker symbols (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tickers: Option<Vec<String>>,

    /// The N largest tickers by market cap
    #[arg(long)]
    top: Option<usize>,

    /// Every active ticker of the region
    #[arg(long)]
    all: bool,

    /// Region code: KR, US, CN, HK, JP, VN
    #[arg(long)]
    region: String,

    /// First fiscal year, inclusive
    #[arg(long)]
    start: i32,

    /// Last fiscal year, inclusive
    #[arg(long)]
    end: i32,

    /// Source priority list (comma-separated: dart,krx,yahoo);
    /// defaults to the region's native order
    #[arg(long, value_delimiter = ',')]
    sources: Option<Vec<String>>,

    /// full | incremental | force-refresh
    #[arg(long, default_value = "incremental")]
    mode: String,

    /// Statement periods to plan (annual,semi,q1,q2,q3)
    #[arg(long, value_delimiter = ',', default_value = "annual")]
    periods: Vec<String>,

    /// Global concurrency cap
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    /// Override every source's minimum request spacing, in seconds
    #[arg(long)]
    rate_limit: Option<f64>,

    /// Max attempts per unit on retryable failures
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Re-dispatch not-found units through the next source in priority
    #[arg(long)]
    fallback: bool,

    /// Checkpoint file location
    #[arg(long, default_value = "backfill_checkpoint.json")]
    checkpoint: PathBuf,

    /// Directory for run reports
    #[arg(long, default_value = "reports")]
    report_dir: PathBuf,

    /// Ticker → corp_code mapping file for the regulator adapter (JSON)
    #[arg(long)]
    corp_codes: Option<PathBuf>,

    /// Seconds granted to in-flight units on interrupt
    #[arg(long, default_value_t = 10)]
    grace: u64,

    /// Plan only: no network calls, no writes
    #[arg(long)]
    dry_run: bool,

    /// Store connection URI
    #[arg(long, env = "STORE_URL")]
    store_url: Option<String>,
}

fn parse_periods(specs: &[String]) -> anyhow::Result<Vec<PeriodType>> {
    let mut periods = Vec::new();
    for spec in specs {
        let period = match spec.to_ascii_lowercase().as_str() {
            "annual" => PeriodType::Annual,
            "semi" | "semi-annual" => PeriodType::SemiAnnual,
            "q1" => PeriodType::Q1,
            "q2" => PeriodType::Q2,
            "q3" => PeriodType::Q3,
            other => bail!("unknown period: {other}"),
        };
        if !periods.contains(&period) {
            periods.push(period);
        }
    }
    Ok(periods)
}

async fn load_corp_codes(path: &PathBuf) -> anyhow::Result<HashMap<String, String>> {
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading corp codes from {}", path.display()))?;
    serde_json::from_str(&body).context("corp code file must be a JSON object of ticker: corp_code")
}

async fn build(cli: Cli) -> anyhow::Result<(BackfillOrchestrator, tokio::sync::watch::Receiver<bool>)> {
    let region = Region::parse(&cli.region)?;
    let mode = Mode::parse(&cli.mode)?;
    let periods = parse_periods(&cli.periods)?;

    let universe = if let Some(symbols) = cli.tickers {
        UniverseSelection::Explicit(symbols)
    } else if let Some(n) = cli.top {
        UniverseSelection::Top(n)
    } else {
        UniverseSelection::All
    };

    let sources = match &cli.sources {
        Some(names) => names
            .iter()
            .map(|n| SourceId::parse(n))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let store: Arc<dyn FundamentalsStore> = match (&cli.store_url, cli.dry_run) {
        (Some(url), _) => {
            let pool_size = u32::try_from(cli.concurrency).unwrap_or(8).clamp(2, 16);
            Arc::new(PgStore::connect(url, pool_size).await?)
        }
        (None, true) => Arc::new(MemStore::new()),
        (None, false) => bail!("STORE_URL is required unless --dry-run"),
    };

    let mut governor = RateGovernor::with_defaults();
    if let Some(seconds) = cli.rate_limit {
        governor = governor.with_min_interval(Duration::from_secs_f64(seconds));
    }

    let mut dart = DartAdapter::builder().api_key_from_env();
    if let Some(path) = &cli.corp_codes {
        dart = dart.corp_codes(load_corp_codes(path).await?);
    }
    let mut adapters: HashMap<SourceId, Arc<dyn SourceAdapter>> = HashMap::new();
    adapters.insert(SourceId::Dart, Arc::new(dart.build()?));
    adapters.insert(SourceId::Krx, Arc::new(KrxAdapter::builder().build()?));
    adapters.insert(SourceId::Yahoo, Arc::new(YahooAdapter::builder().build()?));

    let mut config = BackfillConfig::new(region, cli.start, cli.end);
    config.universe = universe;
    config.periods = periods;
    config.sources = sources;
    config.mode = mode;
    config.global_concurrency = cli.concurrency;
    config.max_attempts = cli.max_attempts;
    config.fallback = cli.fallback;
    config.checkpoint_path = cli.checkpoint;
    config.report_dir = cli.report_dir;
    config.dry_run = cli.dry_run;
    config.shutdown_grace = Duration::from_secs(cli.grace);

    let orchestrator = BackfillOrchestrator::new(
        config,
        adapters,
        Arc::new(governor),
        store,
    );

    // SIGINT flips the shutdown flag; the orchestrator drains and exits 130
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received");
            let _ = stop_tx.send(true);
        }
    });

    Ok((orchestrator, stop_rx))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fundfill=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.start > cli.end {
        bail!("--start must not exceed --end");
    }

    let (orchestrator, stop_rx) = build(cli).await?;
    let summary = orchestrator.run(stop_rx).await?;

    let code = summary.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod models;
mod report;
mod resolve;
mod stats;

use client::{AppIds, FetchError, RecordClient, Source};
use models::{DashboardState, DerivedStatistics, StatsConfig};
use resolve::ResolveStrategy;

#[derive(Parser)]
#[command(name = "course-dashboard")]
#[command(about = "Statistics dashboard for a course-management record service", long_about = None)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,
    #[command(flatten)]
    tuning: TuningArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Base URL of the record service
    #[arg(long, env = "RECORDS_API_URL", global = true)]
    api_url: Option<String>,
    /// Bearer token sent with every request
    #[arg(long, env = "RECORDS_API_TOKEN", global = true, hide_env_values = true)]
    api_token: Option<String>,
    /// Read the five collections from JSON files instead of the API
    #[arg(long, env = "RECORDS_SNAPSHOT_DIR", global = true)]
    snapshot_dir: Option<PathBuf>,
    #[arg(long, env = "RECORDS_TIMEOUT_SECS", global = true, default_value_t = 30)]
    timeout_secs: u64,
    #[arg(long, env = "RECORDS_INSTRUCTORS_APP", global = true, default_value = "6996f4f24f9ee0c08fa67b5f")]
    instructors_app: String,
    #[arg(long, env = "RECORDS_ROOMS_APP", global = true, default_value = "6996f4f29d5dc5124ed65432")]
    rooms_app: String,
    #[arg(long, env = "RECORDS_PARTICIPANTS_APP", global = true, default_value = "6996f4f2e9de9012fa96b0e6")]
    participants_app: String,
    #[arg(long, env = "RECORDS_COURSES_APP", global = true, default_value = "6996f4f3466f18ebe99ec905")]
    courses_app: String,
    #[arg(long, env = "RECORDS_REGISTRATIONS_APP", global = true, default_value = "6996f4f3afbdaf0969403241")]
    registrations_app: String,
}

#[derive(Args)]
struct TuningArgs {
    /// Days ahead that count as upcoming
    #[arg(long, global = true, default_value_t = 30)]
    upcoming_days: i64,
    /// Entries shown in upcoming and recent lists
    #[arg(long, global = true, default_value_t = 5)]
    limit: usize,
    #[arg(long, global = true, default_value_t = 6)]
    trend_months: u32,
    /// How reference fields are matched to record ids
    #[arg(long = "resolve", global = true, value_enum, default_value_t = ResolveStrategy::HexToken)]
    strategy: ResolveStrategy,
}

impl TuningArgs {
    fn stats_config(&self) -> StatsConfig {
        StatsConfig {
            upcoming_window_days: self.upcoming_days,
            upcoming_limit: self.limit,
            recent_limit: self.limit,
            trend_months: self.trend_months,
            strategy: self.strategy,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print headline numbers
    Summary,
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "dashboard.md")]
        out: PathBuf,
    },
    /// Emit the derived statistics as JSON
    Json {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export the monthly trend and status distribution as CSV
    Export {
        #[arg(long, default_value = "registrations_per_month.csv")]
        trend: PathBuf,
        #[arg(long)]
        status: Option<PathBuf>,
    },
    /// Re-render the summary periodically until interrupted
    Watch {
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
}

fn build_source(args: &SourceArgs) -> Result<Source, FetchError> {
    if let Some(dir) = &args.snapshot_dir {
        return Ok(Source::Snapshot(dir.clone()));
    }

    let base_url = args.api_url.as_deref().ok_or(FetchError::MissingSource)?;
    let apps = AppIds {
        instructors: args.instructors_app.clone(),
        rooms: args.rooms_app.clone(),
        participants: args.participants_app.clone(),
        courses: args.courses_app.clone(),
        registrations: args.registrations_app.clone(),
    };

    let client = RecordClient::new(
        base_url,
        args.api_token.clone(),
        apps,
        Duration::from_secs(args.timeout_secs.max(1)),
    )?;
    Ok(Source::Api(client))
}

fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

async fn load_stats(source: &Source, config: &StatsConfig) -> anyhow::Result<DerivedStatistics> {
    let snapshot = source
        .fetch()
        .await
        .inspect_err(|err| tracing::error!(error = %err, "failed to load stats"))
        .context("statistics unavailable: failed to fetch records")?;
    Ok(stats::derive(&snapshot, now(), config))
}

async fn load_state(source: &Source, config: &StatsConfig) -> DashboardState {
    match source.fetch().await {
        Ok(snapshot) => DashboardState::Ready(Box::new(stats::derive(&snapshot, now(), config))),
        Err(err) => {
            tracing::error!(error = %err, "failed to load stats");
            DashboardState::Unavailable
        }
    }
}

async fn watch(source: &Source, config: &StatsConfig, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    println!("{}", report::render_summary(&DashboardState::Loading));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        // A refresh still in flight at shutdown is dropped without rendering.
        let state = tokio::select! {
            _ = &mut shutdown => break,
            state = load_state(source, config) => state,
        };
        println!("{}", report::render_summary(&state));
    }

    tracing::info!("watch stopped");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("course_dashboard=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = build_source(&cli.source).context("failed to configure record source")?;
    let config = cli.tuning.stats_config();

    match cli.command {
        Commands::Summary => {
            let stats = load_stats(&source, &config).await?;
            print!("{}", report::render_summary(&DashboardState::Ready(Box::new(stats))));
        }
        Commands::Report { out } => {
            let stats = load_stats(&source, &config).await?;
            let report = report::build_report(&DashboardState::Ready(Box::new(stats)));
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Json { out } => {
            let stats = load_stats(&source, &config).await?;
            let json = serde_json::to_string_pretty(&stats)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Statistics written to {}.", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Export { trend, status } => {
            let stats = load_stats(&source, &config).await?;
            let file = std::fs::File::create(&trend)
                .with_context(|| format!("failed to create {}", trend.display()))?;
            report::write_trend_csv(file, &stats.monthly_trend)?;
            println!("Monthly trend written to {}.", trend.display());

            if let Some(path) = status {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                report::write_status_csv(file, &stats.status_distribution)?;
                println!("Status distribution written to {}.", path.display());
            }
        }
        Commands::Watch { interval_secs } => {
            watch(&source, &config, interval_secs).await;
        }
    }

    Ok(())
}

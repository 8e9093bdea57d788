use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::{Duration, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand};
use release_tracker_core::chat::SlackClient;
use release_tracker_core::config::{
    DEFAULT_CONFIG_FILENAME, TrackerConfig, load_config, parse_as_of,
};
use release_tracker_core::extract::RecordExtractor;
use release_tracker_core::model::RawMessage;
use release_tracker_core::pipeline::{RunOptions, RunReport, run_pipeline};
use release_tracker_core::wiki::ConfluenceClient;
use tracing::error;

#[derive(Debug, Parser)]
#[command(
    name = "release-tracker",
    version,
    about = "Mine chat release announcements into a managed wiki table"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved settings before running")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Fetch history, rebuild the release table and sync the page")]
    Run(RunArgs),
    #[command(about = "Extract a release record from a single message text")]
    Extract(ExtractArgs),
    #[command(about = "Print resolved configuration with secrets redacted")]
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, value_name = "DAYS", help = "Lookback window in days (default 7)")]
    window_days: Option<i64>,
    #[arg(long, value_name = "RFC3339", help = "Evaluate the window as of this instant")]
    as_of: Option<String>,
    #[arg(long, help = "Compute the page update without writing it")]
    dry_run: bool,
    #[arg(long, requires = "dry_run", help = "Print a unified diff of the page (dry run only)")]
    diff: bool,
    #[arg(long, help = "Print the run report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    text: String,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(args)) => run_sync(cli.config.as_deref(), cli.diagnostics, args),
        Some(Commands::Extract(args)) => run_extract(cli.config.as_deref(), args),
        Some(Commands::Config) => run_config(cli.config.as_deref()),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_sync(config_path: Option<&Path>, diagnostics: bool, args: RunArgs) -> Result<()> {
    let config = resolve_config(config_path)?;
    let window = match args.window_days {
        Some(days) if days > 0 => Duration::try_days(days)
            .ok_or_else(|| anyhow::anyhow!("--window-days too large: {days}"))?,
        Some(days) => bail!("--window-days must be positive, got {days}"),
        None => config.lookback_window()?,
    };
    let as_of = match &args.as_of {
        Some(value) => parse_as_of(value)?,
        None => config.as_of()?,
    };
    let channel_id = config
        .channel_id()
        .ok_or_else(|| anyhow::anyhow!("Slack channel id is required (SLACK_CHANNEL_ID or [slack].channel_id)"))?;
    let page_id = config
        .page_id()
        .ok_or_else(|| anyhow::anyhow!("Confluence page id is required (CONFLUENCE_PAGE_ID or [confluence].page_id)"))?;

    let options = RunOptions {
        channel_id,
        page_id,
        window,
        as_of,
        merge_policy: config.merge_policy(),
        table_format: config.table_format(),
        markers: config.markers()?,
        dry_run: args.dry_run,
    };
    if diagnostics {
        print_settings(&config);
    }

    let mut chat = SlackClient::new(config.slack_client_config()?)?;
    let mut wiki = ConfluenceClient::new(config.confluence_client_config()?)?;
    let extractor = RecordExtractor::new(&config.tracker.known_applications);

    let report = match run_pipeline(&mut chat, &mut wiki, &extractor, &options) {
        Ok(report) => report,
        Err(err) => {
            error!(transient = err.is_transient(), "run aborted: {err}");
            return Err(err.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&options, &report, chat.request_count());
    }
    if args.diff
        && let Some(preview) = &report.preview
    {
        if preview.has_changes() {
            println!("\n{}", preview.unified_diff());
        } else {
            println!("\ndiff: <none>");
        }
    }
    Ok(())
}

fn run_extract(config_path: Option<&Path>, args: ExtractArgs) -> Result<()> {
    let config = resolve_config(config_path)?;
    let extractor = RecordExtractor::new(&config.tracker.known_applications);
    let message = RawMessage::new("cli", Utc::now(), &args.text);
    match extractor.extract(&message) {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("not a release message"),
    }
    Ok(())
}

fn run_config(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    print_settings(&config);
    Ok(())
}

fn print_report(options: &RunOptions, report: &RunReport, slack_requests: usize) {
    println!("release sync");
    println!("channel_id: {}", options.channel_id);
    println!("page_id: {}", options.page_id);
    println!("as_of: {}", options.as_of.to_rfc3339());
    println!("window_days: {}", options.window.num_days());
    println!("slack_requests: {slack_requests}");
    println!("messages.fetched: {}", report.fetched_messages);
    println!("messages.in_window: {}", report.window_messages);
    println!("records.extracted: {}", report.extracted_records);
    println!("records.canonical: {}", report.records.len());
    for record in &report.records {
        println!(
            "  - {} {} ({}, {}, {})",
            record.application,
            record.version,
            record.publish_date,
            record
                .rollout_percent
                .map(|percent| format!("{percent}%"))
                .unwrap_or_else(|| "n/a".to_string()),
            record.status
        );
    }
    println!("fragment_hash: {}", report.fragment_hash);
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("updated: {}", format_flag(report.updated));
    println!(
        "revision: {}",
        report
            .revision
            .map(|revision| revision.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
}

fn print_settings(config: &TrackerConfig) {
    println!("[settings]");
    match config.lookback_window() {
        Ok(window) => println!("lookback_days: {}", window.num_days()),
        Err(err) => println!("lookback_days: <invalid: {err}>"),
    }
    println!("merge_policy: {}", config.merge_policy().as_str());
    println!("table_format: {}", config.table_format().as_str());
    println!(
        "known_applications: {}",
        if config.tracker.known_applications.is_empty() {
            "<none>".to_string()
        } else {
            config.tracker.known_applications.join(", ")
        }
    );
    println!("channel_id: {}", config.channel_id().as_deref().unwrap_or("<unset>"));
    println!("slack_api_url: {}", config.slack_api_url());
    println!("slack_token: {}", redacted("SLACK_TOKEN"));
    println!("page_id: {}", config.page_id().as_deref().unwrap_or("<unset>"));
    println!(
        "confluence_base_url: {}",
        config.confluence_base_url().as_deref().unwrap_or("<unset>")
    );
    println!(
        "confluence_email: {}",
        config.confluence_email().as_deref().unwrap_or("<unset>")
    );
    println!("confluence_token: {}", redacted("ATLASSIAN_API_TOKEN"));
}

fn resolve_config(config_path: Option<&Path>) -> Result<TrackerConfig> {
    dotenvy::dotenv().ok();
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    if config_path.is_some() && !path.exists() {
        bail!("config file not found: {}", normalize_path(&path));
    }
    load_config(&path)
}

fn redacted(key: &str) -> &'static str {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => "<set>",
        _ => "<unset>",
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

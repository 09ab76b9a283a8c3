use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use yt_live_notify::app::App;
use yt_live_notify::config::AppConfig;
use yt_live_notify::domain::{Lifecycle, VideoRecord};
use yt_live_notify::logging;
use yt_live_notify::notification::{DeliveryReport, NotificationPermission};
use yt_live_notify::scheduler::ChannelOutcome;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true, env = "YT_LIVE_NOTIFY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll on the configured interval until interrupted
    Run,
    /// Poll once: every channel, or only the given one
    Check { channel_id: Option<String> },
    /// Manage subscribed channels
    Channel {
        #[command(subcommand)]
        action: ChannelCommand,
    },
    /// Print the tracked streams
    Streams {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Expire old notification records
    Sweep,
    /// Send a sample notification through the enabled channels
    TestNotify {
        /// Event type: upcoming, live or completed
        #[arg(long, default_value = "live", value_parser = parse_event)]
        event: Lifecycle,
    },
}

#[derive(Subcommand, Debug)]
enum ChannelCommand {
    /// Subscribe to a channel
    Add {
        channel_id: String,
        /// Comma-separated keywords matched against title and description
        #[arg(short, long)]
        keywords: Option<String>,
    },
    /// Unsubscribe from a channel
    Remove { channel_id: String },
    /// List subscribed channels
    List,
}

fn parse_event(s: &str) -> Result<Lifecycle, String> {
    Lifecycle::parse(&s.to_ascii_lowercase())
        .ok_or_else(|| format!("unknown event type {s:?}; expected upcoming, live or completed"))
}

impl Cli {
    fn log_directive(&self) -> Option<&'static str> {
        if self.quiet {
            return Some("yt_live_notify=warn,reqwest=warn");
        }
        match self.verbose {
            0 => None,
            1 => Some("yt_live_notify=debug,reqwest=info"),
            _ => Some("yt_live_notify=trace,reqwest=debug"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }

    let _log_guard = logging::init_logging(&config.logging, &config.log_dir(), cli.log_directive())?;
    let app = App::open(config).context("Failed to open data directory")?;

    match cli.command {
        Command::Run => run(app).await,
        Command::Check { channel_id } => check(app, channel_id).await,
        Command::Channel { action } => channel(&app, action),
        Command::Streams { json } => streams(&app, json),
        Command::Sweep => {
            let report = app.notifications.sweep();
            println!(
                "Expired {} notification records, trimmed {} completed ids",
                report.expired_records, report.trimmed_seen
            );
            Ok(())
        }
        Command::TestNotify { event } => test_notify(&app, event).await,
    }
}

async fn run(app: App) -> anyhow::Result<()> {
    if app.ensure_desktop_permission().await != NotificationPermission::Granted {
        warn!("Desktop notifications are unavailable");
    }
    let provider = app.provider().map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let orchestrator = Arc::new(app.orchestrator(provider));
    let cancel = CancellationToken::new();

    let sweeper = app
        .notifications
        .spawn_sweeper(app.config.retention.sweep_interval(), cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    orchestrator.run(cancel.clone()).await;
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper).await;
    Ok(())
}

async fn check(app: App, channel_id: Option<String>) -> anyhow::Result<()> {
    app.ensure_desktop_permission().await;
    let provider = app.provider().map_err(|e| anyhow::anyhow!(e.user_message()))?;
    let orchestrator = app.orchestrator(provider);

    match channel_id {
        Some(channel_id) => {
            let (summary, delivery) = orchestrator
                .check_channel(&channel_id)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!(
                "{channel_id}: {} live, {} upcoming, {} completed, {} just ended",
                summary.live, summary.upcoming, summary.completed, summary.ended
            );
            print_delivery(&delivery);
        }
        None => {
            if app.subscriptions.is_empty() {
                bail!("No channels subscribed; add one with `channel add <CHANNEL_ID>`");
            }
            let report = orchestrator
                .check_all()
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            for channel in &report.channels {
                match &channel.outcome {
                    ChannelOutcome::Checked(s) => println!(
                        "{}: {} live, {} upcoming, {} completed, {} just ended",
                        channel.channel_id, s.live, s.upcoming, s.completed, s.ended
                    ),
                    ChannelOutcome::Failed(e) => {
                        println!("{}: {}", channel.channel_id, e.user_message())
                    }
                    ChannelOutcome::Skipped => {
                        println!("{}: skipped (API quota exhausted)", channel.channel_id)
                    }
                }
            }
            print_delivery(&report.delivery);
        }
    }
    Ok(())
}

fn print_delivery(report: &DeliveryReport) {
    println!(
        "Notifications: {} sent, {} already sent, {} failed",
        report.sent,
        report.duplicates,
        report.failures.len()
    );
    for failure in &report.failures {
        println!(
            "  {} {} via {}: {}",
            failure.video_id,
            failure.event,
            failure.channel,
            failure.error.user_message()
        );
    }
}

fn channel(app: &App, action: ChannelCommand) -> anyhow::Result<()> {
    match action {
        ChannelCommand::Add {
            channel_id,
            keywords,
        } => {
            if app.subscriptions.add(&channel_id, keywords)? {
                println!("Subscribed to {}", channel_id.trim());
            } else {
                println!("{} is already subscribed", channel_id.trim());
            }
        }
        ChannelCommand::Remove { channel_id } => {
            if app.subscriptions.remove(&channel_id)? {
                app.state.forget_channel(channel_id.trim());
                println!("Unsubscribed from {}", channel_id.trim());
            } else {
                println!("{} is not subscribed", channel_id.trim());
            }
        }
        ChannelCommand::List => {
            let channels = app.subscriptions.list();
            if channels.is_empty() {
                println!("No channels subscribed");
            }
            for channel in channels {
                match channel.keywords {
                    Some(keywords) => println!("{}  [{}]", channel.channel_id, keywords),
                    None => println!("{}", channel.channel_id),
                }
            }
        }
    }
    Ok(())
}

fn streams(app: &App, json: bool) -> anyhow::Result<()> {
    let snapshot = app.state.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    for bucket in Lifecycle::ALL {
        let records = snapshot.bucket(bucket);
        println!("{} ({})", bucket, records.len());
        for record in records {
            let at = record
                .retention_timestamp(bucket)
                .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {at}  {}  {}  {}", record.channel_title, record.title, record.watch_url());
        }
    }
    Ok(())
}

async fn test_notify(app: &App, event: Lifecycle) -> anyhow::Result<()> {
    app.ensure_desktop_permission().await;

    let now = Utc::now();
    let mut record = VideoRecord::new(format!("test-{}", now.timestamp()), "Test notification");
    record.channel_title = "YouTube Live Notifier".to_string();
    record.description = "This is a test notification.".to_string();
    match event {
        Lifecycle::Upcoming => record.scheduled_start_time = Some(now + chrono::Duration::hours(1)),
        Lifecycle::Live => record.actual_start_time = Some(now),
        Lifecycle::Completed => {
            record.actual_start_time = Some(now - chrono::Duration::hours(1));
            record.actual_end_time = Some(now - chrono::Duration::minutes(5));
        }
    }

    let report = app.notifications.send_test(&record, event).await;
    if report.sent == 0 && report.failures.is_empty() {
        println!("No channel is enabled for {event} notifications");
    }
    print_delivery(&report);
    Ok(())
}

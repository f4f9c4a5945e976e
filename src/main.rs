//! # DispatchPulse CLI
//!
//! Usage:
//!   pulse run                        # Scheduled mode, one report per slot
//!   pulse send                       # Deliver a report right now
//!   pulse preview --date 2026-10-16  # Print a report without delivering
//!   pulse status                     # Window, next slot, last delivery
//!   pulse history --limit 20         # Recent delivery attempts

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use pulse_core::config::PulseConfig;
use pulse_scheduler::pipeline::build_report;
use pulse_scheduler::{
    DispatchGuard, DispatchMode, Pipeline, ReportBuilder, SchedulerEngine, SlotCalendar, StateDb,
    SyncService, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pulse",
    version,
    about = "📊 DispatchPulse — scheduled dispatch report digests"
)]
struct Cli {
    /// Config file (default: ~/.dispatchpulse/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Run {
        /// Build reports from cached data only
        #[arg(long)]
        skip_sync: bool,
    },
    /// Build and deliver one report now, ignoring the schedule
    Send {
        #[arg(long)]
        skip_sync: bool,
    },
    /// Print the report for a date without delivering it
    Preview {
        /// Report date, YYYY-MM-DD (default: today in the operating timezone)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        skip_sync: bool,
    },
    /// Show the operating window and the last delivery
    Status,
    /// Show recent delivery attempts
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "dispatchpulse=debug,pulse_core=debug,pulse_providers=debug,pulse_channels=debug,pulse_scheduler=debug"
    } else {
        "dispatchpulse=info,pulse_core=info,pulse_providers=info,pulse_channels=info,pulse_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => PulseConfig::load_from(&PathBuf::from(shellexpand::tilde(path).to_string()))?,
        None => PulseConfig::load()?,
    };
    config.validate()?;

    match cli.command {
        Command::Run { skip_sync } => run(config, skip_sync).await,
        Command::Send { skip_sync } => send(config, skip_sync).await,
        Command::Preview { date, skip_sync } => preview(config, date, skip_sync).await,
        Command::Status => status(&config),
        Command::History { limit } => history(&config, limit),
    }
}

fn open_state(config: &PulseConfig) -> Result<Arc<StateDb>> {
    Ok(Arc::new(StateDb::open(&config.state_path())?))
}

fn sync_service(config: &PulseConfig, state: Arc<StateDb>) -> SyncService {
    SyncService::new(
        pulse_providers::create_source(config),
        state,
        Duration::from_secs(config.source.freshness_secs),
        Duration::from_secs(config.source.timeout_secs),
    )
}

fn pipeline(config: &PulseConfig, state: Arc<StateDb>, skip_sync: bool) -> Result<Pipeline> {
    if !skip_sync {
        config.validate_source()?;
    }
    config.validate_delivery()?;

    let sync = sync_service(config, state.clone());
    let channel = pulse_channels::create_channel(&config.delivery);
    Ok(Pipeline::new(sync, channel, state, config.window.offset())
        .with_send_timeout(config.delivery.send_timeout())
        .with_retry_backoff(Duration::from_secs(config.delivery.retry_backoff_secs))
        .with_skip_sync(skip_sync))
}

async fn run(config: PulseConfig, skip_sync: bool) -> Result<()> {
    let state = open_state(&config)?;
    let pipeline = pipeline(&config, state.clone(), skip_sync)?;
    let mut engine = SchedulerEngine::new(
        SlotCalendar::new(config.window),
        config.schedule.clone(),
        pipeline,
        DispatchGuard::new(state),
        Arc::new(SystemClock),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(shutdown_rx).await;
    Ok(())
}

async fn send(config: PulseConfig, skip_sync: bool) -> Result<()> {
    let state = open_state(&config)?;
    let mut pipeline = pipeline(&config, state, skip_sync)?;

    let cycle = pipeline.run_cycle(None, Utc::now(), DispatchMode::Forced).await;
    match cycle.result {
        Ok(()) => {
            println!(
                "✅ Report delivered via {} (sync: {})",
                pipeline.channel_name(),
                cycle.sync.status
            );
            Ok(())
        }
        Err(e) => anyhow::bail!(
            "{} delivery failure via {} after {} attempt(s): {}",
            e.kind,
            pipeline.channel_name(),
            cycle.attempts,
            e.message
        ),
    }
}

async fn preview(config: PulseConfig, date: Option<NaiveDate>, skip_sync: bool) -> Result<()> {
    if !skip_sync {
        config.validate_source()?;
    }
    let state = open_state(&config)?;
    let mut sync = sync_service(&config, state);
    let builder = ReportBuilder::new(config.window.offset());

    let now = Utc::now();
    let date = date.unwrap_or_else(|| now.with_timezone(&config.window.offset()).date_naive());
    let (_, report) = build_report(&mut sync, &builder, date, now, skip_sync).await;
    println!("{}", report.text);
    Ok(())
}

fn status(config: &PulseConfig) -> Result<()> {
    let state = open_state(config)?;
    let calendar = SlotCalendar::new(config.window);
    let offset = config.window.offset();
    let now = Utc::now().with_timezone(&offset);
    let local = now.naive_local();

    println!("📊 DispatchPulse v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "   Window:      {:02}:00-{:02}:00 every {} min (UTC{})",
        config.window.start_hour, config.window.end_hour, config.window.interval_minutes, offset
    );
    println!(
        "   Now:         {} ({})",
        now.format("%Y-%m-%d %H:%M"),
        if calendar.contains(local) { "inside window" } else { "outside window" }
    );
    if let Some(next) = calendar.next_after(local) {
        println!("   Next slot:   {next}");
    }
    match state.last_served()? {
        Some((slot, at)) => println!(
            "   Last served: {slot} (at {})",
            at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("   Last served: never"),
    }
    match state.last_sync()? {
        Some(at) => println!(
            "   Last sync:   {}",
            at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("   Last sync:   never"),
    }
    println!("   Channel:     {:?}", config.delivery.kind);
    println!("   State:       {}", config.state_path().display());
    Ok(())
}

fn history(config: &PulseConfig, limit: usize) -> Result<()> {
    let state = open_state(config)?;
    let offset = config.window.offset();
    let records = state.recent_deliveries(limit)?;
    if records.is_empty() {
        println!("No deliveries recorded yet.");
        return Ok(());
    }
    for r in records {
        let icon = if r.status == "sent" { "✅" } else { "❌" };
        let slot = r.slot.as_deref().unwrap_or("-");
        print!(
            "{icon} {} {:<9} {:<16} {:<9} x{}",
            r.created_at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S"),
            r.mode,
            slot,
            r.channel,
            r.attempts
        );
        match (&r.error_kind, &r.message) {
            (Some(kind), Some(msg)) => println!("  {kind}: {msg}"),
            _ => println!(),
        }
    }
    Ok(())
}

// region:    --- Imports
use auction_engine::ads::MemoryAdDirectory;
use auction_engine::clock::SystemClock;
use auction_engine::handlers::{self, AppState};
use auction_engine::scheduler::{AutoCloseScheduler, SweepOutcome, SweepSummary};
use auction_engine::store::MemoryStore;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tracing::{error, info, warn};

// endregion: --- Imports

// region:    --- Cli

#[derive(Parser)]
#[command(name = "auction-engine", about = "Marketplace auction engine")]
struct Cli {
    /// Address the HTTP server binds to
    #[arg(long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// Seconds between auto-close sweeps
    #[arg(long, default_value_t = 60)]
    sweep_interval_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one auto-close batch against a running server and exit.
    /// Exits non-zero when any auction failed to close.
    Sweep {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,

        /// Report intended closures without mutating anything
        #[arg(long)]
        dry_run: bool,
    },
}

// endregion: --- Cli

// region:    --- Main

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .without_time()
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Sweep { server, dry_run }) => run_sweep(&server, dry_run).await,
        None => serve(&cli.listen, cli.sweep_interval_secs).await,
    }
}

async fn serve(listen: &str, sweep_interval_secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState {
        store: Arc::new(MemoryStore::new()),
        ads: Arc::new(MemoryAdDirectory::new()),
        clock: Arc::new(SystemClock),
    };

    // background auto-close loop; the HTTP trigger shares the same sweep
    let scheduler = AutoCloseScheduler::new(
        Arc::clone(&state.store),
        state.ads.clone(),
        Arc::clone(&state.clock),
        Duration::from_secs(sweep_interval_secs),
    );
    scheduler.start().await;
    info!(
        "{:<12} --> auto-close sweep every {}s",
        "Main", sweep_interval_secs
    );

    let routes_all = handlers::app(state);

    let listener = TcpListener::bind(listen).await?;
    info!(
        "{:<12} --> Web Server: Listening on {}",
        "Main",
        listener.local_addr()?
    );

    if let Err(err) = axum::serve(listener, routes_all.into_make_service()).await {
        error!("{:<12} --> Server error: {}", "Main", err);
    }
    Ok(())
}

async fn run_sweep(server: &str, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("{}/auctions/actions/auto-close?dry_run={}", server, dry_run);
    let summary: SweepSummary = reqwest::Client::new()
        .post(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    info!(
        "{:<12} --> sweep done: {} closed, {} failed (dry_run: {})",
        "Sweep", summary.closed_count, summary.failed_count, summary.dry_run
    );
    for outcome in &summary.outcomes {
        match outcome {
            SweepOutcome::Closed {
                auction_id,
                winner_id,
                reserve_met,
            } => info!(
                "{:<12} --> auction {} closed (winner: {:?}, reserve met: {})",
                "Sweep", auction_id, winner_id, reserve_met
            ),
            SweepOutcome::WouldClose { auction_id } => {
                info!("{:<12} --> auction {} would close", "Sweep", auction_id)
            }
            SweepOutcome::Failed { auction_id, reason } => {
                warn!("{:<12} --> auction {} failed: {}", "Sweep", auction_id, reason)
            }
        }
    }

    if summary.has_failures() {
        // non-zero exit drives operational alerting
        std::process::exit(1);
    }
    Ok(())
}

// endregion: --- Main

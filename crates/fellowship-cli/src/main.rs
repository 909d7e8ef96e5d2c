//! Fellowship - command-line host for the offline sync engine.
//!
//! Wires a `Portal` from the saved configuration and exposes its
//! diagnostics and background lifecycle as subcommands.

use std::io;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fellowship_core::utils::truncate_string;
use fellowship_core::{Config, MutationKind, Portal};

// ============================================================================
// Constants
// ============================================================================

/// Directory for an optional daily-rotated log file
const ENV_LOG_DIR: &str = "FELLOWSHIP_LOG_DIR";

/// Characters of payload shown per pending write
const PAYLOAD_PREVIEW_LEN: usize = 60;

const USAGE: &str = "\
Usage: fellowship <command>

Commands:
  status             Background tasks, session and pending writes
  pending [kind]     List queued writes (profile_update, content_create, comment_create)
  sync               Send queued writes now
  profile            Show the signed-in profile
  login <identity>   Start a session
  logout             End the session and drop the cached profile
  run                Run background sync until Ctrl-C";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fellowship.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = Config::load()?.with_env_overrides();
    let last_identity = config.last_identity.clone();
    let portal = Portal::from_config(config)?;

    // First run with an identity from the environment
    if portal.current_identity().is_none() {
        if let Some(identity) = last_identity {
            portal.sign_in(&identity)?;
        }
    }

    match command {
        "status" => print_status(&portal),
        "pending" => print_pending(&portal, args.get(2).map(String::as_str))?,
        "sync" => run_sync(&portal).await,
        "profile" => print_profile(&portal).await?,
        "login" => {
            let identity = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Usage: fellowship login <identity>"))?;
            portal.sign_in(identity)?;
            remember_identity(Some(identity.clone()))?;
            println!("Signed in as {}", identity);
        }
        "logout" => {
            portal.sign_out()?;
            remember_identity(None)?;
            println!("Signed out");
        }
        "run" => run_background(&portal).await?,
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

fn remember_identity(identity: Option<String>) -> Result<()> {
    let mut config = Config::load()?;
    config.last_identity = identity;
    config.save()
}

// ============================================================================
// Commands
// ============================================================================

fn print_status(portal: &Portal) {
    let background = portal.background_status();
    println!(
        "Background: {}",
        if background.running { "running" } else { "stopped" }
    );
    for task in &background.tasks {
        println!("  {}", task);
    }

    match portal.current_identity() {
        Some(identity) => {
            let cached = portal
                .cache()
                .peek(&identity)
                .map(|entry| {
                    format!("{} cached {}", entry.value.label(), entry.age_display())
                })
                .unwrap_or_else(|| "not cached".to_string());
            let state = if portal.is_session_active() { "active" } else { "stale" };
            println!("Session: {} ({}, profile {})", identity, state, cached);
        }
        None => println!("Session: signed out"),
    }

    println!("Pending writes:");
    for (kind, count) in portal.pending_counts() {
        println!("  {:<16} {}", kind.label(), count);
    }

    let sync = portal.sync_status();
    if let Some(report) = sync.last_report {
        println!(
            "Last sync: {} applied, {} discarded, {} remaining",
            report.applied(),
            report.discarded(),
            report.remaining()
        );
    }
}

fn print_pending(portal: &Portal, kind: Option<&str>) -> Result<()> {
    let kinds: Vec<MutationKind> = match kind {
        Some(label) => vec![MutationKind::from_label(label)
            .ok_or_else(|| anyhow::anyhow!("Unknown mutation kind: {}", label))?],
        None => MutationKind::ALL.to_vec(),
    };

    for kind in kinds {
        let pending = portal.list_pending(kind)?;
        if pending.is_empty() {
            continue;
        }
        println!("{} ({})", kind.label(), pending.len());
        for mutation in pending {
            println!(
                "  {}  {}  {}  {}",
                mutation.id,
                mutation.created_at.format("%Y-%m-%d %H:%M"),
                mutation.age_display(),
                truncate_string(&mutation.payload.to_string(), PAYLOAD_PREVIEW_LEN)
            );
        }
    }
    Ok(())
}

async fn run_sync(portal: &Portal) {
    match portal.sync_now().await {
        Some(report) => {
            let elapsed = report.finished_at - report.started_at;
            println!(
                "Sync finished in {}ms: {} applied, {} discarded, {} remaining",
                elapsed.num_milliseconds(),
                report.applied(),
                report.discarded(),
                report.remaining()
            );
        }
        None => println!("Sync skipped (offline or already running)"),
    }
}

async fn print_profile(portal: &Portal) -> Result<()> {
    if portal.current_identity().is_none() {
        anyhow::bail!("Not signed in. Run `fellowship login <identity>` first.");
    }
    match portal.current_profile().await {
        Some(profile) => println!("{}", serde_json::to_string_pretty(&profile)?),
        None => println!("Profile unavailable"),
    }
    Ok(())
}

async fn run_background(portal: &Portal) -> Result<()> {
    info!("Fellowship background sync starting");
    portal.mount();
    println!("Running background sync, press Ctrl-C to stop");

    let mut events = portal.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    info!(skipped, "Event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    portal.unmount();
    info!("Fellowship background sync shutting down");
    Ok(())
}

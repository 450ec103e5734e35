//! # Tasklane Sync CLI
//!
//! Drives the sync core against the configured service and local store.
//!
//! ## Usage
//! ```bash
//! tasklane login <access> <refresh> <expires_in_secs>
//! tasklane sync
//! tasklane watch
//! tasklane export ./backup.json
//! tasklane import ./backup.json
//! tasklane purge
//! tasklane status
//! ```
//!
//! Configuration comes from `sync.toml` and `TASKLANE_*` variables.

use std::env;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use tasklane_core::{ResourceKind, TokenPair};
use tasklane_db::{Database, DbConfig};
use tasklane_sync::{
    AutoSync, PassOutcome, SyncConfig, SyncError, SyncOrchestrator, SyncOrchestratorBuilder,
    SyncTrigger, UserNotice,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("Tasklane Sync");
    println!();
    println!("Usage: tasklane <COMMAND>");
    println!();
    println!("Commands:");
    println!("  sync                                   Run one sync pass");
    println!("  watch                                  Run scheduled passes until Ctrl-C");
    println!("  export <path>                          Write the local store to a file");
    println!("  import <path>                          Add a backup file as local rows");
    println!("  purge                                  Delete removed tasks permanently");
    println!("  login <access> <refresh> <expires_in>  Install a token pair");
    println!("  logout                                 Forget the token pair");
    println!("  status                                 Show cursors and row counts");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tasklane_sync=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        print_usage();
        return Ok(());
    };
    if matches!(command, "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }

    let config = SyncConfig::load_or_default(None);
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path.display(), "Opened local store");

    let sync = SyncOrchestratorBuilder::new(config.clone())
        .with_database(db.clone())
        .build()?;

    match command {
        "sync" => run_once(&sync).await,
        "watch" => {
            if !config.sync.auto_sync {
                warn!("auto_sync is disabled in the configuration");
                return Ok(());
            }
            let handle = AutoSync::spawn(sync.clone(), &config.sync);
            sync.trigger_sync(SyncTrigger::AppForeground).await;
            tokio::signal::ctrl_c().await?;
            match handle.shutdown().await {
                Ok(()) => {}
                Err(SyncError::ShuttingDown) => info!("Auto-sync had already stopped"),
                Err(err) => return Err(err.into()),
            }
            sync.cancel_current_pass().await;
        }
        "export" => {
            let path = path_arg(&args)?;
            let written = sync.export_snapshot(&path).await?;
            println!("Exported to {}", written.display());
        }
        "import" => {
            let path = path_arg(&args)?;
            let summary = sync.import_snapshot(&path).await?;
            println!(
                "Imported {} tasks and {} items ({} items skipped)",
                summary.tasks, summary.items, summary.skipped_items
            );
        }
        "purge" => {
            let purged = sync.purge_removed().await?;
            println!("Purged {purged} removed tasks");
        }
        "login" => {
            let [access, refresh, expires_in] = match &args[1..] {
                [a, r, e] => [a, r, e],
                _ => return Err("usage: tasklane login <access> <refresh> <expires_in_secs>".into()),
            };
            let secs: i64 = expires_in.parse()?;
            sync.tokens()
                .set_session(TokenPair {
                    access_token: access.clone(),
                    refresh_token: refresh.clone(),
                    expires_at: Utc::now() + Duration::seconds(secs),
                })
                .await?;
            println!("Session stored");
            run_once(&sync).await;
        }
        "logout" => {
            sync.tokens().sign_out().await?;
            db.sync_state().clear_cursors().await?;
            println!("Signed out");
        }
        "status" => print_status(&sync, &db).await?,
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
        }
    }

    db.close().await;
    Ok(())
}

fn path_arg(args: &[String]) -> Result<PathBuf, Box<dyn std::error::Error>> {
    args.get(1)
        .map(PathBuf::from)
        .ok_or_else(|| "missing <path> argument".into())
}

async fn run_once(sync: &SyncOrchestrator) {
    let report = sync.trigger_sync(SyncTrigger::Manual).await;
    let took = report.finished_at - report.started_at;
    println!(
        "Pass {} {:?} in {} ms",
        report.pass_id,
        report.outcome,
        took.num_milliseconds()
    );
    for kind in &report.succeeded {
        println!("  ok      {kind}");
    }
    for failure in &report.failed {
        let scope = failure.kind.map_or("session".to_string(), |k| k.to_string());
        println!("  failed  {scope}: {} ({:?})", failure.message, failure.failure);
    }
    match report.notice() {
        Some(UserNotice::Reauthenticate) => println!("Session expired, run `tasklane login` again"),
        Some(UserNotice::Dismissible(message)) => println!("{message}"),
        None if report.outcome != PassOutcome::Succeeded => {
            println!("Will retry on the next pass")
        }
        None => {}
    }
}

async fn print_status(sync: &SyncOrchestrator, db: &Database) -> Result<(), Box<dyn std::error::Error>> {
    println!("Session:   {}", if sync.tokens().has_session().await { "present" } else { "none" });

    let cursors = db.sync_state().load_cursors().await?;
    println!("Cursors:");
    for kind in ResourceKind::SYNC_ORDER {
        let cursor = cursors.get(&kind).map_or("-", String::as_str);
        println!("  {:<13} {cursor}", kind.as_str());
    }

    println!("Rows:");
    println!("  folders       {}", db.folders().count().await?);
    println!(
        "  tasks         {} ({} unsynced)",
        db.tasks().count().await?,
        db.tasks().count_unsynced().await?
    );
    println!("  items         {}", db.items().count().await?);
    println!("  notifications {}", db.notifications().count().await?);
    println!("  shares        {}", db.shares().count().await?);
    println!("  deferred      {}", db.sync_state().deferred_count().await?);
    Ok(())
}

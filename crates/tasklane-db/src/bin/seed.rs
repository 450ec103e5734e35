//! # Seed Data Generator
//!
//! Fills a local store with unsynced demo folders, tasks and checklist items
//! so the sync CLI has something to export or reconcile against.
//!
//! ## Usage
//! ```bash
//! cargo run -p tasklane-db --bin seed
//! cargo run -p tasklane-db --bin seed -- --tasks 50 --db ./data/tasklane.db
//! ```

use std::env;

use chrono::{Duration, Utc};
use tasklane_core::{Completion, NewChecklistItem, NewFolder, NewTask, Rgba};
use tasklane_db::{Database, DbConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const FOLDERS: &[(&str, Rgba)] = &[
    ("Personal", Rgba::new(0x4A, 0x90, 0xE2, 0xFF)),
    ("Work", Rgba::new(0xE2, 0x4A, 0x4A, 0xFF)),
    ("Errands", Rgba::new(0x7E, 0xD3, 0x21, 0xFF)),
];

const TASK_NAMES: &[&str] = &[
    "Buy milk",
    "Call the dentist",
    "Prepare slides",
    "Renew passport",
    "Water the plants",
    "Book flights",
    "Review pull request",
    "Pay electricity bill",
];

const CHECKLIST: &[&str] = &["Draft", "Check", "Send"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    let mut task_count: usize = 24;
    let mut db_path = String::from("./tasklane_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--tasks" | "-t" => {
                if i + 1 < args.len() {
                    task_count = args[i + 1].parse().unwrap_or(task_count);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tasklane Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -t, --tasks <N>    Number of tasks to generate (default: 24)");
                println!("  -d, --db <PATH>    Database file path (default: ./tasklane_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let db = Database::new(DbConfig::new(&db_path)).await?;
    info!(path = %db_path, "Connected to database");

    let existing = db.tasks().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has tasks, skipping seed");
        return Ok(());
    }

    let mut folder_ids = Vec::with_capacity(FOLDERS.len());
    for (name, color) in FOLDERS {
        let folder = db
            .folders()
            .create_local(NewFolder {
                name: (*name).to_string(),
                color: *color,
                is_visible: true,
            })
            .await?;
        folder_ids.push(folder.id);
    }

    let now = Utc::now();
    let mut items = 0usize;
    for n in 0..task_count {
        let name = format!("{} #{}", TASK_NAMES[n % TASK_NAMES.len()], n + 1);
        let task = db
            .tasks()
            .create_local(NewTask {
                folder_id: Some(folder_ids[n % folder_ids.len()].clone()),
                name,
                completion: if n % 4 == 0 {
                    Completion::Checked
                } else {
                    Completion::Unchecked
                },
                is_important: n % 5 == 0,
                target_date: (n % 3 == 0).then(|| now + Duration::days(n as i64)),
                ..Default::default()
            })
            .await?;

        if n % 2 == 0 {
            for step in CHECKLIST {
                db.items()
                    .create_local(NewChecklistItem {
                        task_id: task.id.clone(),
                        name: (*step).to_string(),
                    })
                    .await?;
                items += 1;
            }
        }
    }

    info!(
        folders = folder_ids.len(),
        tasks = task_count,
        items,
        "Seed complete"
    );
    Ok(())
}

//! sentry_events - inspect the recorded event log.
//!
//! Lists events from the sentryd SQLite database, most recent first, as a
//! readable table or as JSON for scripting.

use anyhow::Result;
use clap::Parser;

use sentrycam::{EventStore, SqliteEventStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "List recorded sentry events")]
struct Args {
    /// Event log database path.
    #[arg(long, env = "SENTRY_DB_PATH", default_value = "sentry.db")]
    db: String,

    /// Maximum number of events to show.
    #[arg(long, default_value_t = 50)]
    limit: usize,

    /// Only show events for this label.
    #[arg(long)]
    label: Option<String>,

    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut store = SqliteEventStore::open(&args.db)?;
    let mut events = store.list_events(args.limit)?;
    if let Some(label) = &args.label {
        events.retain(|ev| &ev.label == label);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("no events recorded");
        return Ok(());
    }

    println!(
        "{:<18} {:<14} {:>13} {:>13} {:>6} {:>11}",
        "EVENT", "LABEL", "STARTED", "ENDED", "CONF", "FRAMES"
    );
    for ev in &events {
        let ended = ev
            .ended_at_ms
            .map(|ms| (ms / 1000).to_string())
            .unwrap_or_else(|| "open".to_string());
        println!(
            "{:<18} {:<14} {:>13} {:>13} {:>6.2} {:>11}",
            ev.id.as_str(),
            ev.label,
            ev.started_at_ms / 1000,
            ended,
            ev.peak_confidence,
            format!("{}..{}", ev.first_seq, ev.last_seq)
        );
    }
    Ok(())
}

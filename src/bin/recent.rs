//! Prints the most recent rounds as JSON lines, newest first.

use anyhow::Result;
use clap::Parser;
use roundtap_lib::{config::CollectorConfig, db::Database};

#[derive(Parser, Debug)]
#[command(name = "roundtap-recent", about = "Print the most recent stored rounds")]
struct Args {
    /// Number of rounds to print
    #[arg(default_value_t = 20)]
    limit: usize,

    /// Only rounds collected for this room
    #[arg(long)]
    room: Option<String>,

    /// Database file (defaults to ROUNDTAP_DB_PATH or ./data/roundtap.sqlite3)
    #[arg(long)]
    db: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    roundtap_lib::utils::logging::init();
    let args = Args::parse();

    let db_path = args
        .db
        .unwrap_or_else(|| CollectorConfig::from_env().db_path);
    let database = Database::new(db_path)?;

    let rounds = match &args.room {
        Some(room) => database.recent_rounds_for_room(room, args.limit).await?,
        None => database.recent_rounds(args.limit).await?,
    };

    for round in rounds {
        println!("{}", serde_json::to_string(&round)?);
    }
    Ok(())
}

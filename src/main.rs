use std::process::ExitCode;

use tracing::{error, info, warn};

use timetable::config::Config;
use timetable::engine::audit;
use timetable::model::Weekday;
use timetable::store::{MemoryRepository, SessionFilter, SessionRepository};

/// Replay the session log, re-check every scheduling invariant and compact the log.
#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    timetable::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    info!("timetable audit");
    info!("  wal: {}", wal_path.display());
    info!("  compact_threshold: {}", config.compact_threshold);

    let repo = MemoryRepository::open(&wal_path)?;
    let sessions = repo.query(&SessionFilter::all()).await?;

    for day in Weekday::ALL {
        let today: Vec<_> = sessions.iter().filter(|s| s.weekday == day).collect();
        if today.is_empty() {
            continue;
        }
        let minutes: u32 = today.iter().map(|s| u32::from(s.range().duration_minutes())).sum();
        let rooms = {
            let mut rooms: Vec<&str> = today.iter().map(|s| s.room.as_str()).collect();
            rooms.sort_unstable();
            rooms.dedup();
            rooms.len()
        };
        info!("{day}: {} sessions, {rooms} rooms, {minutes} minutes booked", today.len());
    }

    let appended = repo.appends_since_compact().await;
    if appended >= config.compact_threshold {
        repo.compact().await?;
        info!("compacted log: {appended} records -> {}", sessions.len());
    }

    let violations = audit(&sessions);
    if violations.is_empty() {
        info!("{} sessions, no violations", sessions.len());
        return Ok(ExitCode::SUCCESS);
    }
    for v in &violations {
        warn!("{v}");
    }
    error!("{} violations in {} sessions", violations.len(), sessions.len());
    Ok(ExitCode::FAILURE)
}

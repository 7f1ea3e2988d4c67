//! Example: run a station against the simulated device
//!
//! Run with: cargo run -p pmoonair --example simulated_station
//! Or go live on a track right away: cargo run -p pmoonair --example simulated_station -- b
//!
//! The log level comes from `host.logger.min_level` unless `RUST_LOG` is set.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use pmoonair::{OnAirConfig, OnAirEngine, SimulatedOutput};
use pmorotation::{Catalog, ScheduleTable, Track};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = pmoconfig::get_config();
    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "INFO".to_string());
    if config.get_log_enable_console().unwrap_or(true) {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase())),
            )
            .init();
    }

    let catalog = Catalog::from_tracks(vec![
        Track::new("a", "Night Drive", "Kassette", 12.0).with_url("http://radio.local/a.mp3"),
        Track::new("b", "Morning Call", "Die Hörer", 8.0).with_url("http://radio.local/b.mp3"),
        Track::new("c", "Studio Talk", "Broadcast Special", 10.0)
            .with_url("http://radio.local/c.mp3")
            .live_show(true),
    ]);

    let output = SimulatedOutput::new().with_ready_delay(Duration::from_millis(300));
    let onair = OnAirConfig {
        start_muted: false,
        ..OnAirConfig::from_config(&config)
    };

    let engine = OnAirEngine::builder(Arc::new(output.clone()))
        .config(onair)
        .catalog(catalog)
        .schedule(ScheduleTable::new())
        .spawn();

    if let Some(track_id) = env::args().nth(1) {
        println!("Going live with {track_id}");
        engine.direct_play(track_id).await?;
    }

    let mut updates = engine.subscribe();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let mut last_line = String::new();

    while tokio::time::timeout_at(deadline, updates.changed())
        .await
        .is_ok_and(|changed| changed.is_ok())
    {
        let snapshot = updates.borrow_and_update().clone();
        let np = snapshot.now_playing();
        let line = format!(
            "[{:>7}] {} - {}  {}/{}  ({:.0}%)  device at {:.1}s",
            snapshot.state.as_str(),
            np.artist,
            np.title,
            np.elapsed,
            np.duration,
            np.progress_percent,
            output.current_position(),
        );
        if line != last_line {
            println!("{line}");
            last_line = line;
        }
    }

    engine.shutdown().await?;
    println!("Station stopped");
    Ok(())
}

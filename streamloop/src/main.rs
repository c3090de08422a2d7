use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use streamloop::config::DEFAULT_CONFIG_FILE;
use streamloop::remux::FfmpegRemuxer;
use streamloop::util::{format_bytes, format_elapsed};
use streamloop::{Config, LooperEvent, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("STREAMLOOP_LOG_DIR").ok().map(PathBuf::from);
    let _guard = streamloop::logging::init_logging(log_dir.as_deref())?;

    let config_path = std::env::var("STREAMLOOP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = Config::load(&config_path)?;
    std::fs::create_dir_all(&config.output_dir)?;

    let ffmpeg =
        std::env::var("STREAMLOOP_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_string());
    let probe = Arc::new(stream_probe::HttpProbe::new());
    let remuxer = Arc::new(FfmpegRemuxer::with_program(ffmpeg));

    let scheduler = Scheduler::new(config.scheduler_config(), probe, remuxer);
    for channel in config.channels() {
        if let Err(e) = scheduler.add_channel(channel) {
            warn!(error = %e, "skipping channel from configuration");
        }
    }

    let mut events = scheduler.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LooperEvent::CaptureProgress {
                    name,
                    elapsed_secs,
                    bytes_total,
                    bytes_per_sec,
                }) => {
                    info!(
                        channel = %name,
                        elapsed = %format_elapsed(elapsed_secs),
                        total = %format_bytes(bytes_total),
                        rate = %format!("{}/s", format_bytes(bytes_per_sec)),
                        "capturing"
                    );
                }
                Ok(event) => info!("{}", event.description()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if config.start_on_launch {
        scheduler.start();
    } else {
        info!("start_on_launch is off; polling stays paused until started via the API");
    }

    info!(
        config = %config_path.display(),
        output = %config.output_dir.display(),
        "streamloop running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!("shutting down, finalizing active captures");
    scheduler.shutdown().await;

    // Persist snooze state picked up during the run. The full roster, not
    // just the queues: a probe can still be in flight at this point.
    let mut config = config;
    config.set_channels(&scheduler.channels());
    if let Err(e) = config.save(&config_path) {
        warn!(error = %e, "failed to save configuration");
    }

    Ok(())
}

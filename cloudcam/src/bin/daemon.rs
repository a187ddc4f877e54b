//! Cloud Cam operations daemon
//!
//! Runs the night/day capture loop until interrupted.
//!
//! # Usage
//!
//! ```bash
//! CLOUDCAM_CONFIG=/etc/cloudcam.toml cargo run --bin cloudcam-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `CLOUDCAM_CONFIG`: configuration file (default: search for `cloudcam.toml`)
//! - `CLOUDCAM_DEVICE_HOST` / `CLOUDCAM_DEVICE_PORT`: camera server address
//! - `CLOUDCAM_WORK_DIR`: root for images, timelapses and calibration files
//! - `RUST_LOG`: Log level (default: info)

use std::env;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cloudcam::collaborators::{
    AstrometryNetSolver, CommandStatusSink, CommandSunTimeSource, FfmpegTimelapse,
    PlotConstellationsRenderer,
};
use cloudcam::device::{ShutterDevice, TcpCameraChannel, TcpShutterChannel};
use cloudcam::scheduler::{Collaborators, StatusReporter, SystemClock};
use cloudcam::{CloudcamConfig, SessionScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting Cloud Cam daemon");

    let config = CloudcamConfig::load()?;
    info!(
        device = %config.device.address(),
        work_dir = %config.paths.work_dir.display(),
        "Configuration loaded"
    );

    let solver = AstrometryNetSolver::new(config.solver.clone(), config.solver_output_dir());
    let renderer = PlotConstellationsRenderer::new(
        config.renderer.clone(),
        solver.wcs_path(),
        config.solver_output_dir(),
    );
    let shutter: Option<Arc<dyn ShutterDevice>> = if config.schedule.shutter_control {
        Some(Arc::new(TcpShutterChannel::from_settings(&config.device)))
    } else {
        None
    };
    let status_sink = Arc::new(CommandStatusSink::from_settings(&config.status));
    let collaborators = Collaborators {
        camera: Arc::new(TcpCameraChannel::from_settings(&config.device)),
        shutter,
        sun_times: Arc::new(CommandSunTimeSource::new(config.sun_times.clone())),
        status: status_sink.clone(),
        solver: Arc::new(solver),
        renderer: Arc::new(renderer),
        timelapse: Arc::new(FfmpegTimelapse::new(config.timelapse.clone())),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let final_attempts = config.schedule.final_status_attempts;
    let status_settings = config.status.clone();
    let mut scheduler = SessionScheduler::new(
        config,
        collaborators,
        Arc::new(SystemClock),
        shutdown.clone(),
    )?;

    let handle = tokio::spawn(async move { scheduler.run().await });
    if let Err(e) = handle.await {
        // the scheduler's own cleanup never ran
        error!(error = %e, "Scheduler task terminated abnormally");
        shutdown.cancel();
        StatusReporter::new(status_sink, status_settings, shutdown)
            .final_off(final_attempts)
            .await;
        anyhow::bail!("scheduler task terminated abnormally: {}", e);
    }

    info!("Cloud Cam daemon stopped");
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
    shutdown.cancel();
}

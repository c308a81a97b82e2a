//! palmbeach-scanner - room presence scanner for a fixed BLE receiver.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use palmbeach_core::{
    CaptureSource, HciDumpCapture, LineCapture, PalmbeachError, ScanLoop, ScannerConfig,
};
use tracing::{error, info, warn};

use crate::cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config_path();
    let mut config = ScannerConfig::load(config_path.as_deref())
        .with_context(|| format!("Failed to load configuration from {config_path:?}"))?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    logging::init(args.production, config.verbose)?;

    info!(
        device = %config.device,
        room = %config.room,
        collector = config.collector_url.as_ref().map_or("none", url::Url::as_str),
        "Starting palmbeach-scanner"
    );

    if args.stdin {
        info!("Replaying capture from stdin");
        let outcome = scan(LineCapture::stdin(), &config).await;
        return match outcome {
            Err(e) if e.is_end_of_stream() => {
                info!("Replay finished");
                Ok(())
            }
            other => other.map_err(Into::into),
        };
    }

    let capture = HciDumpCapture::spawn(&config.device)
        .await
        .with_context(|| format!("Failed to start capture on {}", config.device))?;
    scan(capture, &config).await?;
    Ok(())
}

/// Runs the scan loop until a shutdown signal or a capture failure.
async fn scan<C: CaptureSource>(
    capture: C,
    config: &ScannerConfig,
) -> std::result::Result<(), PalmbeachError> {
    let stats = ScanLoop::from_config(capture, config)?
        .run(shutdown_signal())
        .await
        .map_err(|e| {
            if !e.is_end_of_stream() {
                error!(code = e.error_code(), error = %e, "Scanner stopped");
            }
            e
        })?;

    info!(
        frames = stats.frames,
        readings = stats.readings,
        appeared = stats.appeared,
        disappeared = stats.disappeared,
        "Scanner shut down"
    );
    Ok(())
}

/// Completes on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown..."),
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return std::future::pending().await;
        }
        info!("Received Ctrl+C, initiating shutdown...");
    }
}

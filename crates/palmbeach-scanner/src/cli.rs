//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use palmbeach_core::ScannerConfig;
use url::Url;

/// Room presence scanner: tracks BLE beacons near this receiver.
#[derive(Debug, Parser)]
#[command(name = "palmbeach-scanner", version, about)]
pub struct Args {
    /// Configuration file (TOML).
    #[arg(short, long, env = "PALMBEACH_CONFIG")]
    pub config: Option<PathBuf>,

    /// HCI adapter to scan with, e.g. hci0.
    #[arg(short = 'i', long)]
    pub device: Option<String>,

    /// Largest signal strength (weakest signal) to accept.
    #[arg(short, long)]
    pub sensitivity: Option<u16>,

    /// Sightings required before a beacon is reported present.
    #[arg(long)]
    pub timeout_in: Option<u32>,

    /// Seconds without a sighting before a beacon is reported gone.
    #[arg(long)]
    pub timeout_out: Option<u64>,

    /// Collector endpoint to report events to.
    #[arg(long)]
    pub collector: Option<Url>,

    /// Room or location identifier sent to the collector.
    #[arg(short, long)]
    pub room: Option<String>,

    /// Log every frame and reading.
    #[arg(short = 'V', long)]
    pub verbose: bool,

    /// Read capture lines from stdin instead of running hcidump.
    #[arg(long)]
    pub stdin: bool,

    /// Log JSON to rolling files as well as stdout.
    #[arg(long)]
    pub production: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    pub print_config: bool,
}

impl Args {
    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut ScannerConfig) {
        if let Some(device) = &self.device {
            config.device.clone_from(device);
        }
        if let Some(sensitivity) = self.sensitivity {
            config.sensitivity = sensitivity;
        }
        if let Some(timeout_in) = self.timeout_in {
            config.timeout_in = timeout_in;
        }
        if let Some(timeout_out) = self.timeout_out {
            config.timeout_out_secs = timeout_out;
        }
        if let Some(collector) = &self.collector {
            config.collector_url = Some(collector.clone());
        }
        if let Some(room) = &self.room {
            config.room.clone_from(room);
        }
        if self.verbose {
            config.verbose = true;
        }
    }

    /// The configuration file to load, falling back to the platform default.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(ScannerConfig::default_path)
    }
}

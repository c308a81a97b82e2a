//! # palmbeach-core
//!
//! Core logic for the palmbeach room presence system.
//!
//! A fixed receiver captures BLE advertisements; this crate turns that noisy,
//! duplicate-laden feed into one "appeared" and one "disappeared" event per
//! visit of a beacon, and reports those events to a collector.
//!
//! ## Architecture
//!
//! Data flows through the modules in this order:
//!
//! - [`capture`] - line-oriented capture sources (`hcidump --raw`, replays)
//! - [`assembler`] - reassembles capture lines into whole frames
//! - [`decoder`] - recognizes iBeacon and Trackr frames, classifies Eddystone and UriBeacon
//! - [`registry`] - per-beacon presence state machine with arrival/departure debounce
//! - [`notifier`] - best-effort HTTP reporting to the collector
//! - [`scan_loop`] - the polling task that drives all of the above
//!
//! Supporting modules:
//!
//! - [`distance`] - signal strength to distance estimate
//! - [`config`] - layered configuration and validation
//! - [`feedback`] - audible feedback hook
//! - [`clock`] - injectable time source
//! - [`error`] - unified error type
//! - [`types`] - shared beacon types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod assembler;
pub mod capture;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod distance;
pub mod error;
pub mod feedback;
pub mod notifier;
pub mod registry;
pub mod scan_loop;
pub mod types;

// Re-export primary types for convenience
pub use assembler::PacketAssembler;
pub use capture::{CaptureError, CaptureResult, CaptureSource, HciDumpCapture, LineCapture};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{is_valid_hci_device, ConfigError, ConfigResult, ScannerConfig};
pub use decoder::{decode, parse_hex_frame, DecodeError, DecodeResult, MIN_FRAME_LEN};
pub use distance::{estimate, DistanceError, DEFAULT_REFERENCE_POWER};
pub use error::{PalmbeachError, Result};
pub use feedback::{Feedback, SilentFeedback, SoundFeedback};
pub use notifier::{CollectorClient, CollectorNotifier, Notifier, NotifyError, NotifyResult};
pub use registry::{
    BeaconRecord, PresenceEvent, PresenceRegistry, PresenceSettings, RecordSnapshot,
    SIGNAL_WINDOW_LEN,
};
pub use scan_loop::{ScanLoop, ScanSettings, ScanStats};
pub use types::{BeaconKind, BeaconReading, Decoded};

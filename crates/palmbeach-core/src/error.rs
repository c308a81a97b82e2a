//! Unified error type for the palmbeach core library.
//!
//! Each module keeps its own error enum ([`DecodeError`], [`CaptureError`],
//! [`NotifyError`], [`ConfigError`], [`DistanceError`]) for the failures it
//! contains locally. [`PalmbeachError`] is what crosses the library boundary.
//!
//! Only capture failures are fatal to a running scanner. Decode and notify
//! failures are handled where they occur and never reach the caller of
//! [`crate::ScanLoop::run`].
//!
//! [`DecodeError`]: crate::decoder::DecodeError
//! [`CaptureError`]: crate::capture::CaptureError
//! [`NotifyError`]: crate::notifier::NotifyError
//! [`ConfigError`]: crate::config::ConfigError
//! [`DistanceError`]: crate::distance::DistanceError

use thiserror::Error;

use crate::capture::CaptureError;
use crate::config::ConfigError;
use crate::decoder::DecodeError;
use crate::distance::DistanceError;
use crate::notifier::NotifyError;

/// The unified error type for all palmbeach operations.
#[derive(Debug, Error)]
pub enum PalmbeachError {
    // =========================================================================
    // CAPTURE ERRORS
    // =========================================================================
    /// The capture tooling could not be started. Is BlueZ installed?
    #[error("Capture could not start: {0}")]
    CaptureStartFailed(String),

    /// Reading from the capture stream failed.
    #[error("Capture stream failed: {0}")]
    CaptureFailed(String),

    /// The capture stream ended.
    #[error("Capture stream closed")]
    CaptureClosed,

    // =========================================================================
    // FRAME ERRORS
    // =========================================================================
    /// A single frame could not be decoded.
    #[error("Frame rejected: {0}")]
    Decode(#[from] DecodeError),

    /// No distance can be estimated for a reading.
    #[error("Distance estimate failed: {0}")]
    Distance(#[from] DistanceError),

    // =========================================================================
    // REPORTING ERRORS
    // =========================================================================
    /// A collector request failed.
    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A specialized [`Result`] type for palmbeach operations.
pub type Result<T> = std::result::Result<T, PalmbeachError>;

impl PalmbeachError {
    /// Returns `true` if this error came from the capture source.
    #[inline]
    #[must_use]
    pub const fn is_capture_error(&self) -> bool {
        matches!(
            self,
            Self::CaptureStartFailed(_) | Self::CaptureFailed(_) | Self::CaptureClosed
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns `true` if this error must stop the scanner.
    ///
    /// Frame and notification errors only ever affect one frame or one
    /// request.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.is_capture_error() || self.is_config_error()
    }

    /// Returns `true` if the capture stream simply ended.
    #[inline]
    #[must_use]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::CaptureClosed)
    }

    /// Returns a machine-readable error code.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::CaptureStartFailed(_) => "CAPTURE_START_FAILED",
            Self::CaptureFailed(_) => "CAPTURE_FAILED",
            Self::CaptureClosed => "CAPTURE_CLOSED",
            Self::Decode(_) => "FRAME_REJECTED",
            Self::Distance(_) => "INVALID_SIGNAL",
            Self::Notify(_) => "NOTIFY_FAILED",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<CaptureError> for PalmbeachError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Spawn { .. } | CaptureError::MissingStdout { .. } => {
                Self::CaptureStartFailed(err.to_string())
            }
            CaptureError::Read(_) | CaptureError::Shutdown { .. } => {
                Self::CaptureFailed(err.to_string())
            }
            CaptureError::Closed => Self::CaptureClosed,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

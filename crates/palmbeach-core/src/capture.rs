//! Sources of capture lines.
//!
//! The scan loop only needs a stream of text lines in the hcidump marker
//! protocol. [`HciDumpCapture`] produces it from the local adapter;
//! [`LineCapture`] wraps any async reader (stdin replays, files, tests).

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long a child gets to exit after SIGINT before it is killed.
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// Errors from a capture source. Any of these ends the scan loop.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A capture helper process could not be started.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A helper was started without the expected stdout pipe.
    #[error("{program} has no stdout pipe")]
    MissingStdout {
        /// Program whose stdout was missing.
        program: &'static str,
    },

    /// Reading the next line failed.
    #[error("Failed to read capture stream: {0}")]
    Read(#[source] std::io::Error),

    /// The capture stream ended.
    #[error("Capture stream closed")]
    Closed,

    /// A helper process could not be stopped.
    #[error("Failed to stop {program}: {source}")]
    Shutdown {
        /// Program that failed to stop.
        program: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    /// Whether the stream simply ran out of lines.
    #[must_use]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Result type for capture operations.
pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

/// A line-oriented capture stream.
#[allow(async_fn_in_trait)]
pub trait CaptureSource {
    /// Waits for the next line. `None` means the stream has ended.
    ///
    /// Implementations must be cancel safe: the scan loop polls this under
    /// a timeout and drops the future when the timeout fires.
    async fn next_line(&mut self) -> CaptureResult<Option<String>>;

    /// Releases whatever the source holds.
    async fn shutdown(&mut self) -> CaptureResult<()>;
}

/// Capture lines read from any buffered async reader.
#[derive(Debug)]
pub struct LineCapture<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> LineCapture<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl LineCapture<BufReader<tokio::io::Stdin>> {
    /// Reads capture lines from standard input.
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> CaptureSource for LineCapture<R> {
    async fn next_line(&mut self) -> CaptureResult<Option<String>> {
        self.lines.next_line().await.map_err(CaptureError::Read)
    }

    async fn shutdown(&mut self) -> CaptureResult<()> {
        Ok(())
    }
}

/// Live capture from a local HCI adapter via BlueZ's `hcitool` and `hcidump`.
///
/// `hcitool lescan --duplicates` keeps the controller scanning and reporting
/// every advertisement; `hcidump --raw` prints the resulting HCI traffic.
#[derive(Debug)]
pub struct HciDumpCapture {
    device: String,
    lescan: Child,
    dump: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl HciDumpCapture {
    /// Resets `device` and starts scanning it.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Spawn`] if `hcitool` or `hcidump` cannot be
    /// started. A failed adapter reset is only logged.
    pub async fn spawn(device: &str) -> CaptureResult<Self> {
        info!(device, "Resetting HCI adapter");
        match Command::new("hciconfig")
            .args([device, "reset"])
            .stdout(Stdio::null())
            .status()
            .await
        {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(device, %status, "hciconfig reset failed"),
            Err(e) => warn!(device, error = %e, "Could not run hciconfig"),
        }

        let lescan = Command::new("hcitool")
            .args(["-i", device, "lescan", "--duplicates"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: "hcitool",
                source,
            })?;

        let mut dump = Command::new("hcidump")
            .args(["-i", device, "--raw"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CaptureError::Spawn {
                program: "hcidump",
                source,
            })?;

        let stdout = dump
            .stdout
            .take()
            .ok_or(CaptureError::MissingStdout { program: "hcidump" })?;

        info!(device, "Capture started");

        Ok(Self {
            device: device.to_string(),
            lescan,
            dump,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// The adapter being captured.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl CaptureSource for HciDumpCapture {
    async fn next_line(&mut self) -> CaptureResult<Option<String>> {
        self.lines.next_line().await.map_err(CaptureError::Read)
    }

    async fn shutdown(&mut self) -> CaptureResult<()> {
        info!(device = %self.device, "Stopping capture");
        let dump = interrupt(&mut self.dump, "hcidump").await;
        let lescan = interrupt(&mut self.lescan, "hcitool").await;
        dump.and(lescan)
    }
}

/// Sends SIGINT so the tool can restore adapter state, then kills it if it
/// lingers.
async fn interrupt(child: &mut Child, program: &'static str) -> CaptureResult<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };

    let signalled = Command::new("kill")
        .args(["-s", "INT", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|status| status.success());

    if signalled {
        if let Ok(waited) = timeout(INTERRUPT_GRACE, child.wait()).await {
            debug!(program, pid, "Exited after SIGINT");
            return waited
                .map(|_| ())
                .map_err(|source| CaptureError::Shutdown { program, source });
        }
        warn!(program, pid, "Did not exit after SIGINT, killing");
    }

    child
        .kill()
        .await
        .map_err(|source| CaptureError::Shutdown { program, source })
}

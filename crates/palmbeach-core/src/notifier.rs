//! Best-effort reporting of presence events to a collector.
//!
//! The collector is a plain HTTP endpoint identified by query parameters:
//!
//! ```text
//! POST <collector>?action=ping&room=<room>
//! POST <collector>?action=change&room=<room>   body: RecordSnapshot as JSON
//! ```
//!
//! Reporting never blocks the scan loop and never fails it. Each notification
//! is one request with a short timeout, spawned onto the runtime; failures are
//! logged and dropped. There is no retry and no ordering between requests.

use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::registry::{PresenceEvent, RecordSnapshot};

/// Default per-request timeout.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors from a single collector request.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The request did not complete (connect error, timeout, ...).
    #[error("Collector request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("Collector responded with HTTP {0}")]
    Status(u16),
}

/// Result type for notifier operations.
pub type NotifyResult<T> = std::result::Result<T, NotifyError>;

/// Receiver of presence transitions and liveness pings.
///
/// Implementations must return immediately and swallow their own failures.
pub trait Notifier: Send + Sync {
    /// A beacon became present.
    fn notify_appear(&self, record: &RecordSnapshot);

    /// A beacon left.
    fn notify_disappear(&self, record: &RecordSnapshot);

    /// The scanner is alive.
    fn notify_ping(&self);

    /// Routes an event to the matching method.
    fn dispatch(&self, event: &PresenceEvent) {
        match event {
            PresenceEvent::Appeared(record) => self.notify_appear(record),
            PresenceEvent::Disappeared(record) => self.notify_disappear(record),
            PresenceEvent::Ping => self.notify_ping(),
        }
    }
}

/// HTTP client for one collector endpoint and room.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    client: reqwest::Client,
    endpoint: Url,
    room: String,
}

impl CollectorClient {
    /// Creates a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::ClientBuild`] if the TLS backend cannot be
    /// initialized.
    pub fn new(endpoint: Url, room: impl Into<String>, timeout: Duration) -> NotifyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifyError::ClientBuild)?;

        Ok(Self {
            client,
            endpoint,
            room: room.into(),
        })
    }

    /// The room this client reports for.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    fn url_for(&self, action: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("action", action)
            .append_pair("room", &self.room);
        url
    }

    /// Sends one liveness ping.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn ping(&self) -> NotifyResult<()> {
        let response = self.client.post(self.url_for("ping")).send().await?;
        check_status(response.status())
    }

    /// Sends one state change.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn change(&self, record: &RecordSnapshot) -> NotifyResult<()> {
        let response = self
            .client
            .post(self.url_for("change"))
            .json(record)
            .send()
            .await?;
        check_status(response.status())
    }

    /// Sends the request matching `event` and waits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn deliver(&self, event: &PresenceEvent) -> NotifyResult<()> {
        match event {
            PresenceEvent::Appeared(record) | PresenceEvent::Disappeared(record) => {
                self.change(record).await
            }
            PresenceEvent::Ping => self.ping().await,
        }
    }
}

fn check_status(status: reqwest::StatusCode) -> NotifyResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Status(status.as_u16()))
    }
}

/// Fire-and-forget notifier backed by an optional [`CollectorClient`].
///
/// Without a collector every call is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CollectorNotifier {
    client: Option<CollectorClient>,
}

impl CollectorNotifier {
    /// Reports to `client`, or nowhere when `None`.
    #[must_use]
    pub const fn new(client: Option<CollectorClient>) -> Self {
        Self { client }
    }

    /// A notifier that reports nowhere.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { client: None }
    }

    /// Whether a collector is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn spawn(&self, event: PresenceEvent) -> Option<JoinHandle<()>> {
        let client = self.client.clone()?;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, dropping collector notification");
            return None;
        };

        Some(runtime.spawn(async move {
            match client.deliver(&event).await {
                Ok(()) => debug!(room = %client.room, event = event_name(&event), "Collector notified"),
                Err(e) => warn!(
                    room = %client.room,
                    event = event_name(&event),
                    error = %e,
                    "Collector notification failed"
                ),
            }
        }))
    }
}

impl Notifier for CollectorNotifier {
    fn notify_appear(&self, record: &RecordSnapshot) {
        self.spawn(PresenceEvent::Appeared(record.clone()));
    }

    fn notify_disappear(&self, record: &RecordSnapshot) {
        self.spawn(PresenceEvent::Disappeared(record.clone()));
    }

    fn notify_ping(&self) {
        self.spawn(PresenceEvent::Ping);
    }
}

const fn event_name(event: &PresenceEvent) -> &'static str {
    match event {
        PresenceEvent::Appeared(_) => "appear",
        PresenceEvent::Disappeared(_) => "disappear",
        PresenceEvent::Ping => "ping",
    }
}

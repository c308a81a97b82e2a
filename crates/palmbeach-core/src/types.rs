//! Shared beacon types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The beacon encodings the decoder can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BeaconKind {
    /// Apple iBeacon (manufacturer data, `02 15` marker).
    IBeacon,
    /// Eddystone URL frame.
    EddystoneUrl,
    /// Eddystone UID frame.
    EddystoneUid,
    /// Eddystone telemetry frame.
    EddystoneTlm,
    /// UriBeacon (service UUID `FED8`).
    UriBeacon,
    /// Trackr tag (`03 19` marker).
    Trackr,
    /// Recognized beacon service without a known frame type.
    Unknown,
}

impl BeaconKind {
    /// Namespace prefix used for identifiers of this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::IBeacon => "ibeacon",
            Self::EddystoneUrl => "eddystone-url",
            Self::EddystoneUid => "eddystone-uid",
            Self::EddystoneTlm => "eddystone-tlm",
            Self::UriBeacon => "uribeacon",
            Self::Trackr => "trackr",
            Self::Unknown => "unknown",
        }
    }

    /// Builds a namespaced identifier (`<prefix>-<suffix>`).
    #[must_use]
    pub fn identifier(self, suffix: &str) -> String {
        format!("{}-{suffix}", self.prefix())
    }
}

impl fmt::Display for BeaconKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One decoded sighting of a presence-trackable beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconReading {
    /// Encoding the frame was recognized as.
    pub kind: BeaconKind,

    /// Identifier namespaced by `kind`, e.g. `ibeacon-<32 hex chars>`.
    pub identifier: String,

    /// Calibrated signal strength, `256 - raw_byte`. Smaller is closer.
    pub signal_strength: u16,
}

/// Outcome of decoding one advertisement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A beacon the presence registry can track.
    Reading(BeaconReading),

    /// A beacon service that is only classified, never tracked.
    Classified(BeaconKind),

    /// Anything else the radio picked up.
    NotABeacon,
}

impl Decoded {
    /// Returns the reading, if this frame produced one.
    #[must_use]
    pub const fn reading(&self) -> Option<&BeaconReading> {
        match self {
            Self::Reading(reading) => Some(reading),
            Self::Classified(_) | Self::NotABeacon => None,
        }
    }
}

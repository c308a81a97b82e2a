//! Advertisement frame decoding.
//!
//! Frames are raw HCI LE advertising reports as dumped by `hcidump --raw`:
//!
//! ```text
//! 04 3E <len> 02 01 <evt> <addr type> <addr x6> <data len> <AD structures...> <rssi>
//! ```
//!
//! Decoding is a priority-ordered series of fixed-offset matches. The first
//! match wins:
//!
//! 1. fewer than [`MIN_FRAME_LEN`] bytes: not a beacon
//! 2. iBeacon: 24-byte tail starting with `02 15`
//! 3. Trackr: 22-byte tail starting with `03 19`
//! 4. Eddystone: service UUID `AA FE` at offset 19 (classified only)
//! 5. UriBeacon: service UUID `D8 FE` at offset 19 (classified only)

use thiserror::Error;

use crate::types::{BeaconKind, BeaconReading, Decoded};

/// Frames shorter than this are never inspected.
pub const MIN_FRAME_LEN: usize = 30;

const IBEACON_TAIL_LEN: usize = 24;
const IBEACON_MARKER: [u8; 2] = [0x02, 0x15];

const TRACKR_TAIL_LEN: usize = 22;
const TRACKR_MARKER: [u8; 2] = [0x03, 0x19];

const IDENTIFIER_LEN: usize = 16;

const SERVICE_UUID_OFFSET: usize = 19;
const EDDYSTONE_UUID: [u8; 2] = [0xAA, 0xFE];
const URIBEACON_UUID: [u8; 2] = [0xD8, 0xFE];
const EDDYSTONE_FRAME_TYPE_OFFSET: usize = 25;

/// Errors produced while turning captured text into a decoded frame.
///
/// None of these are fatal: the scan loop logs them and drops the frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The captured text was not a sequence of hex byte pairs.
    #[error("Frame is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A fixed offset pointed past the end of the frame.
    #[error("Frame truncated: needed byte {offset} but frame has {len} bytes")]
    Truncated {
        /// Offset that was read.
        offset: usize,
        /// Actual frame length.
        len: usize,
    },
}

/// Result type for decoding.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Parses an assembled capture frame (`"04 3E 2A ..."`) into raw bytes.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidHex`] if the text contains anything other
/// than whitespace-separated hex digits, or an odd number of digits.
pub fn parse_hex_frame(text: &str) -> DecodeResult<Vec<u8>> {
    let digits: String = text.split_whitespace().collect();
    Ok(hex::decode(digits)?)
}

/// Decodes one raw advertisement frame.
///
/// Returns [`Decoded::NotABeacon`] for anything that does not match one of
/// the known beacon shapes; that is the common case and not an error.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] if a structural check reads past the
/// end of the frame. Callers treat this exactly like `NotABeacon`.
pub fn decode(frame: &[u8]) -> DecodeResult<Decoded> {
    if frame.len() < MIN_FRAME_LEN {
        return Ok(Decoded::NotABeacon);
    }

    if has_report_length(frame)? {
        if let Some(reading) = match_tail(
            frame,
            BeaconKind::IBeacon,
            IBEACON_TAIL_LEN,
            IBEACON_MARKER,
        )? {
            return Ok(Decoded::Reading(reading));
        }
        if let Some(reading) = match_tail(
            frame,
            BeaconKind::Trackr,
            TRACKR_TAIL_LEN,
            TRACKR_MARKER,
        )? {
            return Ok(Decoded::Reading(reading));
        }
    }

    let service = [
        byte_at(frame, SERVICE_UUID_OFFSET)?,
        byte_at(frame, SERVICE_UUID_OFFSET + 1)?,
    ];
    if service == EDDYSTONE_UUID {
        let kind = match byte_at(frame, EDDYSTONE_FRAME_TYPE_OFFSET)? {
            0x00 => BeaconKind::EddystoneUid,
            0x10 => BeaconKind::EddystoneUrl,
            0x20 => BeaconKind::EddystoneTlm,
            _ => BeaconKind::Unknown,
        };
        return Ok(Decoded::Classified(kind));
    }
    if service == URIBEACON_UUID {
        return Ok(Decoded::Classified(BeaconKind::UriBeacon));
    }

    Ok(Decoded::NotABeacon)
}

/// The HCI parameter length at byte 2 must account for the whole frame.
fn has_report_length(frame: &[u8]) -> DecodeResult<bool> {
    Ok(frame.len() == usize::from(byte_at(frame, 2)?) + 3)
}

/// Matches a marker-prefixed tail carrying a 16-byte identifier and a
/// trailing calibration byte.
fn match_tail(
    frame: &[u8],
    kind: BeaconKind,
    tail_len: usize,
    marker: [u8; 2],
) -> DecodeResult<Option<BeaconReading>> {
    let start = frame
        .len()
        .checked_sub(tail_len)
        .ok_or(DecodeError::Truncated {
            offset: tail_len,
            len: frame.len(),
        })?;
    let tail = &frame[start..];

    if tail[..2] != marker {
        return Ok(None);
    }

    let id_bytes = tail
        .get(2..2 + IDENTIFIER_LEN)
        .ok_or(DecodeError::Truncated {
            offset: start + 2 + IDENTIFIER_LEN,
            len: frame.len(),
        })?;
    let calibration = byte_at(tail, tail_len - 1)?;

    Ok(Some(BeaconReading {
        kind,
        identifier: kind.identifier(&hex::encode(id_bytes)),
        signal_strength: 256 - u16::from(calibration),
    }))
}

fn byte_at(frame: &[u8], offset: usize) -> DecodeResult<u8> {
    frame.get(offset).copied().ok_or(DecodeError::Truncated {
        offset,
        len: frame.len(),
    })
}

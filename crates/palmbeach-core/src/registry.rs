//! Per-beacon presence tracking with arrival and departure debounce.
//!
//! Every identifier ever sighted gets one [`BeaconRecord`], which is either
//! dormant or active. Two independent thresholds drive the transitions:
//!
//! - `timeout_in`: number of qualifying sightings (at most one per second)
//!   before a dormant beacon becomes active
//! - `timeout_out`: time without a sighting after which an active beacon
//!   becomes dormant again
//!
//! Arrivals are detected by [`PresenceRegistry::register`]. Departures can
//! only be detected by [`PresenceRegistry::cleanup`], which the scan loop
//! calls on a timer whether or not frames arrive.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Number of signal samples kept per beacon.
pub const SIGNAL_WINDOW_LEN: usize = 10;

const RATE_LIMIT_SECS: i64 = 1;
const CLEANUP_INTERVAL_SECS: i64 = 1;
const PING_INTERVAL_SECS: i64 = 60;

/// Debounce thresholds for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    /// Sightings required before a beacon is reported present.
    pub timeout_in: u32,

    /// Silence after which a present beacon is reported gone.
    pub timeout_out: Duration,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            timeout_in: 10,
            timeout_out: Duration::seconds(60),
        }
    }
}

/// Presence state of one beacon identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconRecord {
    identifier: String,
    sighting_counter: u32,
    active: bool,
    first_seen_at: Option<DateTime<Utc>>,
    last_seen_at: Option<DateTime<Utc>>,
    active_duration: Option<Duration>,
    signal_window: VecDeque<u16>,
}

impl BeaconRecord {
    fn new(identifier: String) -> Self {
        Self {
            identifier,
            sighting_counter: 0,
            active: false,
            first_seen_at: None,
            last_seen_at: None,
            active_duration: None,
            signal_window: VecDeque::with_capacity(SIGNAL_WINDOW_LEN),
        }
    }

    /// The namespaced beacon identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Qualifying sightings since the last reset.
    #[must_use]
    pub const fn sighting_counter(&self) -> u32 {
        self.sighting_counter
    }

    /// Whether the beacon is currently reported present.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// When the beacon last became active.
    #[must_use]
    pub const fn first_seen_at(&self) -> Option<DateTime<Utc>> {
        self.first_seen_at
    }

    /// Time of the last accepted sighting.
    #[must_use]
    pub const fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    /// How long the last completed visit lasted.
    #[must_use]
    pub const fn active_duration(&self) -> Option<Duration> {
        self.active_duration
    }

    /// Recent signal samples, oldest first.
    #[must_use]
    pub const fn signal_window(&self) -> &VecDeque<u16> {
        &self.signal_window
    }

    /// Mean of the signal window, if it holds any samples.
    #[must_use]
    pub fn mean_signal(&self) -> Option<f64> {
        if self.signal_window.is_empty() {
            return None;
        }
        let sum: u32 = self.signal_window.iter().map(|&s| u32::from(s)).sum();
        #[allow(clippy::cast_precision_loss)]
        let len = self.signal_window.len() as f64;
        Some(f64::from(sum) / len)
    }

    /// Serializable copy of the record for reporting.
    #[must_use]
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            identifier: self.identifier.clone(),
            active: self.active,
            sighting_counter: self.sighting_counter,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
            active_duration_secs: self.active_duration.map(|d| d.num_seconds()),
            signal_window: self.signal_window.iter().copied().collect(),
        }
    }

    fn push_signal(&mut self, signal_strength: u16) {
        if self.signal_window.len() == SIGNAL_WINDOW_LEN {
            self.signal_window.pop_front();
        }
        self.signal_window.push_back(signal_strength);
    }
}

/// Point-in-time view of a [`BeaconRecord`], as sent to the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Namespaced beacon identifier.
    pub identifier: String,

    /// Presence state at the time of the snapshot.
    pub active: bool,

    /// Qualifying sightings since the last reset.
    pub sighting_counter: u32,

    /// When the beacon became active.
    pub first_seen_at: Option<DateTime<Utc>>,

    /// Last accepted sighting.
    pub last_seen_at: Option<DateTime<Utc>>,

    /// Length of the visit, set on departure.
    pub active_duration_secs: Option<i64>,

    /// Recent signal samples, oldest first.
    pub signal_window: Vec<u16>,
}

/// A state transition or liveness tick produced by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A dormant beacon crossed `timeout_in`.
    Appeared(RecordSnapshot),

    /// An active beacon was silent for longer than `timeout_out`.
    Disappeared(RecordSnapshot),

    /// Periodic liveness tick, at most once per minute.
    Ping,
}

/// Owner of every [`BeaconRecord`].
#[derive(Debug)]
pub struct PresenceRegistry {
    settings: PresenceSettings,
    records: HashMap<String, BeaconRecord>,
    last_cleanup_at: Option<DateTime<Utc>>,
    last_ping_at: Option<DateTime<Utc>>,
}

impl PresenceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(settings: PresenceSettings) -> Self {
        Self {
            settings,
            records: HashMap::new(),
            last_cleanup_at: None,
            last_ping_at: None,
        }
    }

    /// The thresholds this registry was built with.
    #[must_use]
    pub const fn settings(&self) -> PresenceSettings {
        self.settings
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&BeaconRecord> {
        self.records.get(identifier)
    }

    /// Number of identifiers ever sighted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no beacon has been sighted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over records that are currently active.
    pub fn active(&self) -> impl Iterator<Item = &BeaconRecord> {
        self.records.values().filter(|r| r.active)
    }

    /// Records one sighting. Returns an appear event on the transition to
    /// active.
    ///
    /// Sightings less than a second after the previous accepted one are
    /// discarded without touching the record.
    pub fn register(
        &mut self,
        identifier: &str,
        signal_strength: u16,
        now: DateTime<Utc>,
    ) -> Option<PresenceEvent> {
        let timeout_in = self.settings.timeout_in;
        let record = self
            .records
            .entry(identifier.to_string())
            .or_insert_with(|| BeaconRecord::new(identifier.to_string()));

        if record
            .last_seen_at
            .is_some_and(|last_seen| within(last_seen, now, RATE_LIMIT_SECS))
        {
            return None;
        }

        record.last_seen_at = Some(now);
        record.sighting_counter = record.sighting_counter.saturating_add(1);
        record.push_signal(signal_strength);

        debug!(
            identifier,
            signal_strength,
            sightings = record.sighting_counter,
            "Sighting registered"
        );

        if !record.active && record.sighting_counter >= timeout_in {
            record.active = true;
            record.first_seen_at = Some(now);
            record.active_duration = None;
            info!(identifier, sightings = record.sighting_counter, "Beacon appeared");
            return Some(PresenceEvent::Appeared(record.snapshot()));
        }

        None
    }

    /// Sweeps for departures and emits the liveness ping.
    ///
    /// Self-throttled to one sweep per second; extra calls return nothing.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> Vec<PresenceEvent> {
        if self
            .last_cleanup_at
            .is_some_and(|last| within(last, now, CLEANUP_INTERVAL_SECS))
        {
            return Vec::new();
        }
        self.last_cleanup_at = Some(now);

        let timeout_out = self.settings.timeout_out;
        let mut events = Vec::new();

        for record in self.records.values_mut() {
            if record.sighting_counter == 0 {
                continue;
            }
            let Some(last_seen) = record.last_seen_at else {
                continue;
            };
            if last_seen > now {
                // The wall clock stepped back; restart the silence timer.
                record.last_seen_at = Some(now);
                record.first_seen_at = record.first_seen_at.map(|first| first.min(now));
                continue;
            }
            if now - last_seen <= timeout_out {
                continue;
            }

            record.sighting_counter = 0;
            if !record.active {
                continue;
            }

            record.active = false;
            record.active_duration = record.first_seen_at.map(|first| last_seen - first);
            info!(
                identifier = %record.identifier,
                seen_for_secs = record.active_duration.map(|d| d.num_seconds()),
                "Beacon disappeared"
            );
            events.push(PresenceEvent::Disappeared(record.snapshot()));

            record.first_seen_at = None;
            record.signal_window.clear();
        }

        let ping_due = self
            .last_ping_at
            .map_or(true, |last| !within(last, now, PING_INTERVAL_SECS));
        if ping_due {
            self.last_ping_at = Some(now);
            events.push(PresenceEvent::Ping);
        }

        events
    }
}

/// Whether `now` is less than `secs` after `last`. A `now` before `last`
/// means the clock stepped back and counts as elapsed.
fn within(last: DateTime<Utc>, now: DateTime<Utc>, secs: i64) -> bool {
    now >= last && now - last < Duration::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const ID: &str = "ibeacon-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn at_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + millis).unwrap()
    }

    fn registry(timeout_in: u32, timeout_out_secs: i64) -> PresenceRegistry {
        PresenceRegistry::new(PresenceSettings {
            timeout_in,
            timeout_out: Duration::seconds(timeout_out_secs),
        })
    }

    fn departures(events: &[PresenceEvent]) -> Vec<&RecordSnapshot> {
        events
            .iter()
            .filter_map(|e| match e {
                PresenceEvent::Disappeared(snapshot) => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_sighting_creates_dormant_record() {
        let mut registry = registry(3, 5);
        assert!(registry.register(ID, 60, at(0)).is_none());

        let record = registry.get(ID).unwrap();
        assert_eq!(record.sighting_counter(), 1);
        assert!(!record.is_active());
        assert_eq!(record.last_seen_at(), Some(at(0)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_appears_after_timeout_in_sightings() {
        let mut registry = registry(3, 5);
        assert!(registry.register(ID, 60, at(0)).is_none());
        assert!(registry.register(ID, 60, at(1)).is_none());
        assert!(!registry.get(ID).unwrap().is_active());

        let event = registry.register(ID, 60, at(2)).unwrap();
        let PresenceEvent::Appeared(snapshot) = event else {
            panic!("expected appear event, got {event:?}");
        };
        assert_eq!(snapshot.identifier, ID);
        assert_eq!(snapshot.first_seen_at, Some(at(2)));
        assert!(snapshot.active);

        // Further sightings while active emit nothing.
        assert!(registry.register(ID, 60, at(3)).is_none());
        assert!(registry.register(ID, 60, at(4)).is_none());
        assert_eq!(registry.active().count(), 1);
    }

    #[test]
    fn test_sightings_within_a_second_count_once() {
        let mut registry = registry(3, 5);
        registry.register(ID, 60, at_millis(0));
        registry.register(ID, 61, at_millis(300));
        registry.register(ID, 62, at_millis(999));

        let record = registry.get(ID).unwrap();
        assert_eq!(record.sighting_counter(), 1);
        assert_eq!(record.signal_window().len(), 1);
        assert_eq!(record.last_seen_at(), Some(at_millis(0)));

        registry.register(ID, 63, at_millis(1000));
        assert_eq!(registry.get(ID).unwrap().sighting_counter(), 2);
    }

    #[test]
    fn test_signal_window_keeps_last_ten() {
        let mut registry = registry(100, 60);
        for i in 0..15u16 {
            registry.register(ID, 50 + i, at(i64::from(i)));
        }
        let window: Vec<u16> = registry.get(ID).unwrap().signal_window().iter().copied().collect();
        assert_eq!(window, (55..65).collect::<Vec<u16>>());
    }

    #[test]
    fn test_mean_signal() {
        let mut registry = registry(100, 60);
        assert!(BeaconRecord::new(ID.into()).mean_signal().is_none());
        registry.register(ID, 50, at(0));
        registry.register(ID, 70, at(1));
        assert_eq!(registry.get(ID).unwrap().mean_signal(), Some(60.0));
    }

    #[test]
    fn test_disappears_once_after_timeout_out() {
        let mut registry = registry(1, 5);
        registry.register(ID, 60, at(0));
        registry.register(ID, 60, at(3));

        // Exactly at the timeout the beacon is still present.
        assert!(departures(&registry.cleanup(at(8))).is_empty());

        let events = registry.cleanup(at(9));
        let gone = departures(&events);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].active_duration_secs, Some(3));
        assert!(!gone[0].active);
        assert_eq!(gone[0].signal_window, vec![60, 60]);

        let record = registry.get(ID).unwrap();
        assert!(!record.is_active());
        assert_eq!(record.sighting_counter(), 0);
        assert_eq!(record.active_duration(), Some(Duration::seconds(3)));
        assert!(record.first_seen_at().is_none());
        assert!(record.signal_window().is_empty());

        assert!(departures(&registry.cleanup(at(10))).is_empty());
        assert!(departures(&registry.cleanup(at(20))).is_empty());
    }

    #[test]
    fn test_stale_dormant_record_resets_silently() {
        let mut registry = registry(3, 5);
        registry.register(ID, 60, at(0));
        registry.register(ID, 60, at(1));

        let events = registry.cleanup(at(10));
        assert!(departures(&events).is_empty());
        assert_eq!(registry.get(ID).unwrap().sighting_counter(), 0);

        // Starts cold: needs the full three sightings again.
        assert!(registry.register(ID, 60, at(11)).is_none());
        assert!(registry.register(ID, 60, at(12)).is_none());
        assert!(registry.register(ID, 60, at(13)).is_some());
    }

    #[test]
    fn test_cleanup_is_throttled_to_once_per_second() {
        let mut registry = registry(1, 1);
        registry.register(ID, 60, at(0));

        assert_eq!(registry.cleanup(at(1)), vec![PresenceEvent::Ping]);
        // Within the same second nothing runs, not even the sweep.
        assert!(registry.cleanup(at_millis(1_500)).is_empty());
        assert!(registry.get(ID).unwrap().is_active());

        let events = registry.cleanup(at_millis(6_000));
        assert_eq!(departures(&events).len(), 1);
    }

    #[test]
    fn test_backward_clock_step_keeps_sweeping() {
        let stale = "trackr-bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let mut registry = registry(1, 5);
        registry.register(stale, 60, at(99));
        registry.cleanup(at(100));
        assert!(registry.get(stale).unwrap().is_active());

        // Wall clock jumps back 30 s.
        let mut gone = Vec::new();
        let mut pings = 0;
        for secs in 70..90 {
            registry.register(ID, 60, at(secs));
            let events = registry.cleanup(at(secs));
            pings += events
                .iter()
                .filter(|e| matches!(e, PresenceEvent::Ping))
                .count();
            gone.extend(departures(&events).into_iter().map(|s| s.identifier.clone()));
        }

        assert_eq!(registry.get(ID).unwrap().sighting_counter(), 20);
        assert_eq!(gone, vec![stale.to_string()]);
        assert!(!registry.get(stale).unwrap().is_active());
        assert_eq!(pings, 1);
    }

    #[test]
    fn test_within_treats_backward_step_as_elapsed() {
        assert!(within(at(10), at(10), 1));
        assert!(!within(at(10), at(11), 1));
        assert!(!within(at(10), at(9), 1));
    }

    #[test]
    fn test_ping_at_most_once_per_minute() {
        let mut registry = registry(1, 60);
        let mut pings = 0;
        for secs in 0..180 {
            registry.register(ID, 60, at(secs));
            pings += registry
                .cleanup(at(secs))
                .iter()
                .filter(|e| matches!(e, PresenceEvent::Ping))
                .count();
        }
        // t = 0, 60, 120
        assert_eq!(pings, 3);
    }

    #[test]
    fn test_departure_of_one_beacon_leaves_others_untouched() {
        let other = "trackr-bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let mut registry = registry(1, 5);
        registry.register(ID, 60, at(0));
        registry.register(other, 40, at(0));
        registry.register(other, 40, at(5));

        let events = registry.cleanup(at(7));
        let gone = departures(&events);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].identifier, ID);
        assert!(registry.get(other).unwrap().is_active());
    }

    #[test]
    fn test_end_to_end_debounce_scenario() {
        let mut registry = registry(3, 5);
        let mut appeared = 0;

        for (i, secs) in [0, 2, 4].into_iter().enumerate() {
            let event = registry.register(ID, 60, at(secs));
            registry.cleanup(at(secs));
            if event.is_some() {
                appeared += 1;
                assert_eq!(i, 2, "appeared before the third sighting");
            }
        }
        assert_eq!(appeared, 1);

        let mut disappeared = 0;
        for secs in 5..=10 {
            disappeared += departures(&registry.cleanup(at(secs))).len();
        }
        assert_eq!(disappeared, 1);
        assert!(!registry.get(ID).unwrap().is_active());
    }

    #[test]
    fn test_snapshot_serializes_timestamps_as_rfc3339() {
        let mut registry = registry(1, 5);
        let Some(PresenceEvent::Appeared(snapshot)) = registry.register(ID, 60, at(0)) else {
            panic!("expected appear event");
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["identifier"], ID);
        assert_eq!(json["sighting_counter"], 1);
        assert_eq!(json["first_seen_at"], "2023-11-14T22:13:20Z");
        assert!(json["active_duration_secs"].is_null());
    }
}

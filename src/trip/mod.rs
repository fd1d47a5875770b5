//! Trip aggregate: segments, charging events and the snapshot the
//! estimators read. One mutable snapshot exists per active trip; the
//! engine task is its sole writer and a reset replaces it wholesale.

pub mod lifecycle;

use crate::telemetry::BatterySample;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    NormalRiding,
    ConnectionGap,
    Charging,
    Parked,
}

/// A contiguous run of samples of one kind. Timestamps within a segment are
/// strictly increasing; segments never overlap.
#[derive(Debug, Clone)]
pub struct TripSegment {
    pub kind: SegmentKind,
    pub samples: Vec<BatterySample>,
    /// Baseline segments are the zero-reference for energy accounting;
    /// the first riding segment of a trip and every post-charge segment.
    pub is_baseline: bool,
    pub baseline_reason: Option<String>,
}

impl TripSegment {
    fn new(kind: SegmentKind, is_baseline: bool, baseline_reason: Option<String>) -> Self {
        Self {
            kind,
            samples: Vec::new(),
            is_baseline,
            baseline_reason,
        }
    }

    pub fn first(&self) -> Option<&BatterySample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&BatterySample> {
        self.samples.last()
    }

    pub fn duration(&self) -> Duration {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => last
                .timestamp()
                .duration_since(first.timestamp())
                .unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }
}

/// One charging stop within a trip. Open until the charging indicators
/// cease, at which point the after-values are recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingEvent {
    pub started_at: SystemTime,
    pub voltage_before: f64,
    pub percent_before: f64,
    pub ended_at: Option<SystemTime>,
    pub voltage_after: Option<f64>,
    pub percent_after: Option<f64>,
}

impl ChargingEvent {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Aggregate root for the active trip.
#[derive(Debug, Clone, Default)]
pub struct TripSnapshot {
    segments: Vec<TripSegment>,
    charging_events: Vec<ChargingEvent>,
}

impl TripSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[TripSegment] {
        &self.segments
    }

    pub fn charging_events(&self) -> &[ChargingEvent] {
        &self.charging_events
    }

    pub fn last_sample(&self) -> Option<&BatterySample> {
        self.segments.iter().rev().find_map(|s| s.last())
    }

    pub fn sample_count(&self) -> usize {
        self.segments.iter().map(|s| s.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Opens a new segment. The previous segment is left as-is; appends go
    /// to the newly opened one.
    pub fn start_segment(
        &mut self,
        kind: SegmentKind,
        is_baseline: bool,
        baseline_reason: Option<&str>,
    ) {
        self.segments.push(TripSegment::new(
            kind,
            is_baseline,
            baseline_reason.map(str::to_owned),
        ));
    }

    /// Appends a sample to the current segment, opening a first baseline
    /// riding segment if the trip is empty. Returns false (and drops the
    /// sample) when its timestamp does not advance past the trip's last
    /// sample; duplicate and out-of-order input is anomalous, not fatal.
    pub fn append(&mut self, sample: BatterySample) -> bool {
        if let Some(last) = self.last_sample() {
            if sample.timestamp() <= last.timestamp() {
                return false;
            }
        }
        if self.segments.is_empty() {
            self.start_segment(SegmentKind::NormalRiding, true, Some("trip-start"));
        }
        // start_segment guarantees a tail segment exists.
        if let Some(current) = self.segments.last_mut() {
            current.samples.push(sample);
        }
        true
    }

    /// Index of the most recent baseline segment, if any.
    fn baseline_index(&self) -> Option<usize> {
        self.segments.iter().rposition(|s| s.is_baseline)
    }

    /// First sample of the current baseline segment: the zero-reference for
    /// energy and distance accounting.
    pub fn baseline_start(&self) -> Option<&BatterySample> {
        let index = self.baseline_index()?;
        self.segments[index..].iter().find_map(|s| s.first())
    }

    /// All samples from the current baseline start onward, in order.
    pub fn samples_since_baseline(&self) -> impl Iterator<Item = &BatterySample> {
        let start = self.baseline_index().unwrap_or(0);
        self.segments[start.min(self.segments.len())..]
            .iter()
            .flat_map(|s| s.samples.iter())
    }

    /// Odometer distance covered since the baseline start, km.
    pub fn distance_since_baseline(&self) -> f64 {
        match (self.baseline_start(), self.last_sample()) {
            (Some(start), Some(last)) => (last.raw.distance_km - start.raw.distance_km).max(0.0),
            _ => 0.0,
        }
    }

    /// Cumulative riding time since the baseline start: the summed spans of
    /// riding and gap segments, excluding time spent charging or parked.
    pub fn riding_time_since_baseline(&self) -> Duration {
        let start = match self.baseline_index() {
            Some(index) => index,
            None => return Duration::ZERO,
        };
        self.segments[start..]
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    SegmentKind::NormalRiding | SegmentKind::ConnectionGap
                )
            })
            .map(TripSegment::duration)
            .sum()
    }

    /// Cumulative riding time across the whole trip, all baselines
    /// included. Charging and parked spans are excluded, the same as in
    /// [`riding_time_since_baseline`](Self::riding_time_since_baseline).
    pub fn total_riding_time(&self) -> Duration {
        self.segments
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    SegmentKind::NormalRiding | SegmentKind::ConnectionGap
                )
            })
            .map(TripSegment::duration)
            .sum()
    }

    /// Total odometer distance across the whole trip, km.
    pub fn total_distance_km(&self) -> f64 {
        let first = self.segments.iter().find_map(|s| s.first());
        match (first, self.last_sample()) {
            (Some(first), Some(last)) => (last.raw.distance_km - first.raw.distance_km).max(0.0),
            _ => 0.0,
        }
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.segments
            .iter()
            .find_map(|s| s.first())
            .map(|s| s.timestamp())
    }

    pub fn open_charging_event(&mut self, event: ChargingEvent) {
        self.charging_events.push(event);
    }

    /// Closes the most recent charging event, recording the after-values.
    /// Ignored when no event is open.
    pub fn close_charging_event(
        &mut self,
        ended_at: SystemTime,
        voltage_after: f64,
        percent_after: f64,
    ) {
        if let Some(event) = self.charging_events.last_mut().filter(|e| e.is_open()) {
            event.ended_at = Some(ended_at);
            event.voltage_after = Some(voltage_after);
            event.percent_after = Some(percent_after);
        }
    }
}

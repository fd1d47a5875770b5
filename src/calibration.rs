//! Historical calibration: battery milestones, the bounded segment store
//! and the calibration factor that nudges estimator output toward observed
//! real-world efficiency.

use crate::trip::TripSnapshot;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Most recent valid historical segments retained.
pub const HISTORY_CAPACITY: usize = 100;

/// Battery percentages at which milestones are recorded.
pub const STANDARD_MILESTONES: [f64; 19] = [
    95.0, 90.0, 85.0, 80.0, 75.0, 70.0, 65.0, 60.0, 55.0, 50.0, 45.0, 40.0, 35.0, 30.0, 25.0,
    20.0, 15.0, 10.0, 5.0,
];

const MIN_SEGMENT_DISTANCE_KM: f64 = 2.0;
const MIN_SEGMENT_PERCENT_DELTA: f64 = 5.0;
const MIN_SEGMENT_EFFICIENCY: f64 = 5.0;
const MAX_SEGMENT_EFFICIENCY: f64 = 200.0;

const MIN_CALIBRATION_FACTOR: f64 = 0.8;
const MAX_CALIBRATION_FACTOR: f64 = 1.2;
/// Battery-percent span below the current level considered when averaging
/// historical efficiency.
const OVERLAP_SPAN_PERCENT: f64 = 10.0;

/// A battery-percent crossing, with trip progress measured from the
/// current baseline start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryMilestone {
    pub percent: f64,
    pub timestamp: SystemTime,
    pub distance_km: f64,
    pub riding_time: Duration,
    pub efficiency_wh_per_km: Option<f64>,
}

/// Real-world efficiency observed between two consecutive milestones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSegment {
    pub start_percent: f64,
    pub end_percent: f64,
    pub distance_km: f64,
    pub duration_secs: f64,
    pub efficiency_wh_per_km: f64,
    pub recorded_at: SystemTime,
}

impl HistoricalSegment {
    /// Validity gate for persisting into the history ring.
    pub fn is_valid(&self) -> bool {
        self.start_percent > self.end_percent
            && self.distance_km >= MIN_SEGMENT_DISTANCE_KM
            && self.start_percent - self.end_percent >= MIN_SEGMENT_PERCENT_DELTA
            && (MIN_SEGMENT_EFFICIENCY..=MAX_SEGMENT_EFFICIENCY)
                .contains(&self.efficiency_wh_per_km)
    }
}

/// Tracks milestone crossings within the current baseline span. Cleared on
/// every baseline reset: milestone distances are measured from the baseline
/// start, so pairs across a reset would mix reference frames.
#[derive(Debug, Clone, Default)]
pub struct MilestoneTracker {
    milestones: Vec<BatteryMilestone>,
    last_percent: Option<f64>,
}

impl MilestoneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn milestones(&self) -> &[BatteryMilestone] {
        &self.milestones
    }

    /// Feeds the battery percent of a newly appended sample. Returns the
    /// candidate historical segments produced by any crossings (one per
    /// milestone stepped over; a fast drop may cross several).
    pub fn observe(
        &mut self,
        percent: f64,
        timestamp: SystemTime,
        trip: &TripSnapshot,
        capacity_wh: f64,
    ) -> Vec<HistoricalSegment> {
        let previous = match self.last_percent.replace(percent) {
            Some(previous) => previous,
            None => return Vec::new(),
        };
        if percent >= previous {
            return Vec::new();
        }

        let mut produced = Vec::new();
        for &milestone in STANDARD_MILESTONES.iter() {
            if previous > milestone && percent <= milestone {
                let distance_km = trip.distance_since_baseline();
                let riding_time = trip.riding_time_since_baseline();
                let baseline_percent = trip
                    .baseline_start()
                    .map(|s| s.raw.battery_percent)
                    .unwrap_or(percent);
                let efficiency = span_efficiency(
                    baseline_percent,
                    milestone,
                    distance_km,
                    capacity_wh,
                );

                let record = BatteryMilestone {
                    percent: milestone,
                    timestamp,
                    distance_km,
                    riding_time,
                    efficiency_wh_per_km: efficiency,
                };
                if let Some(previous_milestone) = self.milestones.last().copied() {
                    if let Some(segment) =
                        segment_between(&previous_milestone, &record, capacity_wh)
                    {
                        produced.push(segment);
                    }
                }
                debug!(
                    percent = milestone,
                    distance_km, "Battery milestone crossed"
                );
                self.milestones.push(record);
            }
        }
        produced
    }

    /// Discards accumulated milestones; called on baseline resets.
    pub fn reset(&mut self) {
        self.milestones.clear();
        self.last_percent = None;
    }
}

fn span_efficiency(
    from_percent: f64,
    to_percent: f64,
    distance_km: f64,
    capacity_wh: f64,
) -> Option<f64> {
    if distance_km <= 0.0 || from_percent <= to_percent {
        return None;
    }
    let consumed_wh = (from_percent - to_percent) / 100.0 * capacity_wh;
    let efficiency = consumed_wh / distance_km;
    efficiency.is_finite().then_some(efficiency)
}

fn segment_between(
    from: &BatteryMilestone,
    to: &BatteryMilestone,
    capacity_wh: f64,
) -> Option<HistoricalSegment> {
    let distance_km = to.distance_km - from.distance_km;
    let efficiency = span_efficiency(from.percent, to.percent, distance_km, capacity_wh)?;
    Some(HistoricalSegment {
        start_percent: from.percent,
        end_percent: to.percent,
        distance_km,
        duration_secs: to
            .timestamp
            .duration_since(from.timestamp)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64(),
        efficiency_wh_per_km: efficiency,
        recorded_at: to.timestamp,
    })
}

/// Bounded ring of the most recent valid historical segments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentHistory {
    segments: Vec<HistoricalSegment>,
}

impl SegmentHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<HistoricalSegment>) -> Self {
        let mut history = Self { segments };
        history.trim();
        history
    }

    pub fn segments(&self) -> &[HistoricalSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Appends a candidate if it passes validation, evicting the oldest
    /// entry beyond capacity. Returns whether it was retained.
    pub fn push(&mut self, candidate: HistoricalSegment) -> bool {
        if !candidate.is_valid() {
            return false;
        }
        self.segments.push(candidate);
        self.trim();
        true
    }

    fn trim(&mut self) {
        if self.segments.len() > HISTORY_CAPACITY {
            let excess = self.segments.len() - HISTORY_CAPACITY;
            self.segments.drain(..excess);
        }
    }

    /// Historical efficiency averaged over segments overlapping the band
    /// just below `battery_percent`, weighted by overlap width. `None`
    /// when no history overlaps.
    pub fn efficiency_near(&self, battery_percent: f64) -> Option<f64> {
        let band_top = battery_percent;
        let band_bottom = battery_percent - OVERLAP_SPAN_PERCENT;

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for segment in &self.segments {
            let overlap = segment.start_percent.min(band_top)
                - segment.end_percent.max(band_bottom);
            if overlap > 0.0 {
                weighted_sum += overlap * segment.efficiency_wh_per_km;
                total_weight += overlap;
            }
        }
        (total_weight > 0.0).then(|| weighted_sum / total_weight)
    }
}

/// Ratio of predicted to historically observed efficiency at the current
/// battery level, clamped to [0.8, 1.2]. Identity when disabled or when no
/// overlapping history exists. Applied multiplicatively to the estimated
/// range.
pub fn calibration_factor(
    history: &SegmentHistory,
    battery_percent: f64,
    predicted_efficiency: f64,
    enabled: bool,
) -> f64 {
    if !enabled || !predicted_efficiency.is_finite() || predicted_efficiency <= 0.0 {
        return 1.0;
    }
    match history.efficiency_near(battery_percent) {
        Some(historical) if historical > 0.0 => {
            (predicted_efficiency / historical).clamp(MIN_CALIBRATION_FACTOR, MAX_CALIBRATION_FACTOR)
        }
        _ => 1.0,
    }
}

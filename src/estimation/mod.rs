//! Range estimation strategies behind a common contract.
//!
//! Strategies are selected via configuration and loaded at startup. The
//! minimum-data gate is enforced once here, not per strategy: estimators
//! may assume the trip has accumulated enough riding evidence.

use crate::trip::TripSnapshot;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::warn;

pub mod simple_linear;
pub mod weighted_window;

use simple_linear::SimpleLinearEstimator;
use weighted_window::{WeightedWindowEstimator, WeightedWindowParams};

/// Minimum cumulative riding time since the baseline before any estimate.
pub const MIN_RIDING_TIME: Duration = Duration::from_secs(10 * 60);
/// Minimum distance since the baseline before any estimate, km.
pub const MIN_DISTANCE_KM: f64 = 10.0;

/// Confidence score below which a valid estimate is demoted.
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Pack parameters the estimators convert energy with.
#[derive(Debug, Clone, Copy)]
pub struct PackParams {
    pub cell_count: u32,
    pub capacity_wh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateStatus {
    InsufficientData,
    Collecting,
    Valid,
    Charging,
    LowConfidence,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub lower_km: f64,
    pub upper_km: f64,
}

impl ConfidenceBand {
    pub fn contains(&self, range_km: f64) -> bool {
        range_km >= self.lower_km && range_km <= self.upper_km
    }
}

/// Progress toward the minimum-data gate, reported while insufficient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataProgress {
    pub riding_minutes: f64,
    pub required_minutes: f64,
    pub distance_km: f64,
    pub required_distance_km: f64,
}

/// The engine's published output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEstimate {
    pub range_km: Option<f64>,
    pub status: EstimateStatus,
    /// Overall confidence score in [0, 1].
    pub confidence: f64,
    pub efficiency_wh_per_km: Option<f64>,
    pub sample_count: usize,
    pub band_85: Option<ConfidenceBand>,
    pub band_95: Option<ConfidenceBand>,
    pub progress: Option<DataProgress>,
    pub timestamp: SystemTime,
}

impl RangeEstimate {
    pub fn insufficient(progress: DataProgress, timestamp: SystemTime) -> Self {
        Self {
            range_km: None,
            status: EstimateStatus::InsufficientData,
            confidence: 0.0,
            efficiency_wh_per_km: None,
            sample_count: 0,
            band_85: None,
            band_95: None,
            progress: Some(progress),
            timestamp,
        }
    }

    /// Same estimate with a different status, used when the engine demotes
    /// a published value (stale, charging) without recomputing.
    pub fn with_status(mut self, status: EstimateStatus) -> Self {
        self.status = status;
        self
    }
}

/// Contract all estimation strategies implement. Returning `None` means
/// the numbers degenerated (zero distance, non-finite efficiency); the
/// engine then keeps the previously published estimate.
pub trait RangeEstimator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn estimate(
        &self,
        trip: &TripSnapshot,
        pack: PackParams,
        now: SystemTime,
    ) -> Option<RangeEstimate>;
}

/// Checks the 10 min + 10 km gate. `Err` carries the progress made so far.
pub fn minimum_data_gate(trip: &TripSnapshot) -> Result<(), DataProgress> {
    let riding = trip.riding_time_since_baseline();
    let distance = trip.distance_since_baseline();
    if riding >= MIN_RIDING_TIME && distance >= MIN_DISTANCE_KM {
        return Ok(());
    }
    Err(DataProgress {
        riding_minutes: riding.as_secs_f64() / 60.0,
        required_minutes: MIN_RIDING_TIME.as_secs_f64() / 60.0,
        distance_km: distance,
        required_distance_km: MIN_DISTANCE_KM,
    })
}

/// Runs an estimator behind the shared gate and applies the low-confidence
/// demotion. `None` still means "keep the previous estimate".
pub fn estimate_with_gate(
    estimator: &dyn RangeEstimator,
    trip: &TripSnapshot,
    pack: PackParams,
    now: SystemTime,
) -> Option<RangeEstimate> {
    if let Err(progress) = minimum_data_gate(trip) {
        return Some(RangeEstimate::insufficient(progress, now));
    }

    let mut estimate = estimator.estimate(trip, pack, now)?;
    if estimate.status == EstimateStatus::Valid && estimate.confidence < LOW_CONFIDENCE_THRESHOLD {
        estimate.status = EstimateStatus::LowConfidence;
    }
    Some(estimate)
}

/// Builds the configured estimation strategy, defaulting to the weighted
/// window on an unknown name.
pub fn create_estimator(config: &crate::config::Config) -> Box<dyn RangeEstimator> {
    match config.estimator_model() {
        "simple_linear" => Box::new(SimpleLinearEstimator::new()),
        "weighted_window" => Box::new(WeightedWindowEstimator::new(WeightedWindowParams {
            window: config.estimator_window(),
            decay_per_minute: config.estimator_decay_per_minute(),
            ..WeightedWindowParams::default()
        })),
        other => {
            warn!(model = other, "Unknown estimator model, using weighted_window");
            Box::new(WeightedWindowEstimator::with_defaults())
        }
    }
}

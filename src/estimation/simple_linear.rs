//! Simple linear estimator: one average efficiency over the whole baseline
//! span, fixed-width confidence bands.

use crate::battery::discharge;
use crate::estimation::{
    ConfidenceBand, EstimateStatus, PackParams, RangeEstimate, RangeEstimator,
};
use crate::trip::TripSnapshot;
use crate::validator;
use std::time::SystemTime;

/// Half-width of the 85% band as a fraction of the point estimate.
const BAND_85_FRACTION: f64 = 0.20;
/// Half-width of the 95% band as a fraction of the point estimate.
const BAND_95_FRACTION: f64 = 0.30;

/// Distance over which the confidence score saturates, km.
const FULL_CONFIDENCE_DISTANCE_KM: f64 = 30.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleLinearEstimator;

impl SimpleLinearEstimator {
    pub fn new() -> Self {
        Self
    }
}

impl RangeEstimator for SimpleLinearEstimator {
    fn name(&self) -> &'static str {
        "simple_linear"
    }

    fn estimate(
        &self,
        trip: &TripSnapshot,
        pack: PackParams,
        now: SystemTime,
    ) -> Option<RangeEstimate> {
        let baseline = trip.baseline_start()?;
        let latest = trip.last_sample()?;

        let distance_km = trip.distance_since_baseline();
        if distance_km <= 0.0 {
            return None;
        }

        let consumed_wh = discharge::consumed_energy_wh(
            baseline.compensated_voltage,
            latest.compensated_voltage,
            pack.cell_count,
            pack.capacity_wh,
        );
        let efficiency = consumed_wh / distance_km;
        if !efficiency.is_finite() || efficiency <= 0.0 {
            return None;
        }

        let remaining_wh = discharge::remaining_energy_wh(
            latest.compensated_voltage,
            pack.cell_count,
            pack.capacity_wh,
        );
        let range_km = remaining_wh / efficiency;
        if !range_km.is_finite() {
            return None;
        }

        let sample_count = trip
            .samples_since_baseline()
            .filter(|s| validator::is_valid_for_estimation(s))
            .count();

        Some(RangeEstimate {
            range_km: Some(range_km),
            status: EstimateStatus::Valid,
            confidence: (distance_km / FULL_CONFIDENCE_DISTANCE_KM).min(1.0),
            efficiency_wh_per_km: Some(efficiency),
            sample_count,
            band_85: Some(ConfidenceBand {
                lower_km: range_km * (1.0 - BAND_85_FRACTION),
                upper_km: range_km * (1.0 + BAND_85_FRACTION),
            }),
            band_95: Some(ConfidenceBand {
                lower_km: range_km * (1.0 - BAND_95_FRACTION),
                upper_km: range_km * (1.0 + BAND_95_FRACTION),
            }),
            progress: None,
            timestamp: now,
        })
    }
}

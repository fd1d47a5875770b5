//! Weighted-window estimator: recency-weighted efficiency statistics over
//! a trailing window, with variance-derived confidence bands.

use crate::battery::discharge;
use crate::estimation::{
    ConfidenceBand, EstimateStatus, PackParams, RangeEstimate, RangeEstimator,
};
use crate::trip::TripSnapshot;
use crate::validator::{self, instantaneous_efficiency};
use std::time::{Duration, SystemTime};

/// Fewest efficiency observations inside the window before a range is
/// published; below this the estimate reports Collecting.
const MIN_WINDOW_SAMPLES: usize = 20;

/// Sample count at which the count term of the confidence score saturates.
const FULL_CONFIDENCE_SAMPLES: f64 = 120.0;

const VARIANCE_WEIGHT: f64 = 0.6;
const COUNT_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy)]
pub struct WeightedWindowParams {
    /// Trailing window the statistics are computed over.
    pub window: Duration,
    /// Exponential decay rate of sample weight, per minute of age.
    pub decay_per_minute: f64,
    pub z_85: f64,
    pub z_95: f64,
}

impl Default for WeightedWindowParams {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30 * 60),
            decay_per_minute: 0.5,
            z_85: 1.28,
            z_95: 1.96,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedWindowEstimator {
    params: WeightedWindowParams,
}

impl WeightedWindowEstimator {
    pub fn new(params: WeightedWindowParams) -> Self {
        Self { params }
    }

    pub fn with_defaults() -> Self {
        Self::new(WeightedWindowParams::default())
    }
}

/// Weighted mean and standard deviation of (efficiency, weight) pairs.
fn weighted_stats(observations: &[(f64, f64)]) -> Option<(f64, f64)> {
    let total_weight: f64 = observations.iter().map(|(_, w)| w).sum();
    if total_weight <= 0.0 {
        return None;
    }
    let mean = observations
        .iter()
        .map(|(e, w)| e * w)
        .sum::<f64>()
        / total_weight;
    let variance = observations
        .iter()
        .map(|(e, w)| w * (e - mean).powi(2))
        .sum::<f64>()
        / total_weight;
    Some((mean, variance.sqrt()))
}

impl RangeEstimator for WeightedWindowEstimator {
    fn name(&self) -> &'static str {
        "weighted_window"
    }

    fn estimate(
        &self,
        trip: &TripSnapshot,
        pack: PackParams,
        now: SystemTime,
    ) -> Option<RangeEstimate> {
        let latest = trip.last_sample()?;
        let reference = latest.timestamp();

        let observations: Vec<(f64, f64)> = trip
            .samples_since_baseline()
            .filter(|s| validator::is_valid_for_estimation(s))
            .filter_map(|s| {
                let age = reference.duration_since(s.timestamp()).ok()?;
                if age > self.params.window {
                    return None;
                }
                let efficiency = instantaneous_efficiency(s.raw.power_w, s.raw.speed_kmh)?;
                let age_minutes = age.as_secs_f64() / 60.0;
                let weight = (-self.params.decay_per_minute * age_minutes).exp();
                Some((efficiency, weight))
            })
            .collect();

        if observations.len() < MIN_WINDOW_SAMPLES {
            return Some(RangeEstimate {
                range_km: None,
                status: EstimateStatus::Collecting,
                confidence: 0.0,
                efficiency_wh_per_km: None,
                sample_count: observations.len(),
                band_85: None,
                band_95: None,
                progress: None,
                timestamp: now,
            });
        }

        let (mean, stddev) = weighted_stats(&observations)?;
        if !mean.is_finite() || mean <= 0.0 || !stddev.is_finite() {
            return None;
        }

        let remaining_wh = discharge::remaining_energy_wh(
            latest.compensated_voltage,
            pack.cell_count,
            pack.capacity_wh,
        );
        let range_km = remaining_wh / mean;
        if !range_km.is_finite() {
            return None;
        }

        // Efficiency spread propagated to range units.
        let relative_spread = stddev / mean;
        let band = |z: f64| {
            let half_width = range_km * z * relative_spread;
            ConfidenceBand {
                lower_km: (range_km - half_width).max(0.0),
                upper_km: range_km + half_width,
            }
        };

        let variance_term = 1.0 / (1.0 + relative_spread);
        let count_term = (observations.len() as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);
        let confidence = VARIANCE_WEIGHT * variance_term + COUNT_WEIGHT * count_term;

        Some(RangeEstimate {
            range_km: Some(range_km),
            status: EstimateStatus::Valid,
            confidence,
            efficiency_wh_per_km: Some(mean),
            sample_count: observations.len(),
            band_85: Some(band(self.params.z_85)),
            band_95: Some(band(self.params.z_95)),
            progress: None,
            timestamp: now,
        })
    }
}

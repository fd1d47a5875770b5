//! Sample validation: anomaly flagging and the validity predicate used by
//! everything downstream. Anomalies are never fatal; a flagged sample is
//! retained and simply excluded from estimation where it would distort it.

use crate::telemetry::{BatterySample, SampleFlag, SampleFlags, TelemetrySample};
use std::time::Duration;

/// Inter-sample delta above which a TIME_GAP flag is raised (and the
/// lifecycle considers interpolation).
pub const TIME_GAP_THRESHOLD: Duration = Duration::from_secs(2);

/// Largest plausible forward distance jump between consecutive samples.
const MAX_DISTANCE_JUMP_KM: f64 = 1.0;
/// Odometer regressions beyond this are anomalous (small jitter tolerated).
const MAX_DISTANCE_REGRESSION_KM: f64 = 0.01;
/// Largest plausible pack-voltage swing between consecutive samples.
const MAX_VOLTAGE_SWING_V: f64 = 5.0;
const MAX_SPEED_KMH: f64 = 150.0;
/// Instantaneous efficiencies above this are treated as sensor noise.
const MAX_EFFICIENCY_WH_PER_KM: f64 = 500.0;
/// Below this speed power/speed blows up; efficiency is not computed.
pub const MIN_SPEED_FOR_EFFICIENCY_KMH: f64 = 1.0;

/// Instantaneous efficiency in Wh/km, `None` when speed is too low for the
/// ratio to mean anything.
pub fn instantaneous_efficiency(power_w: f64, speed_kmh: f64) -> Option<f64> {
    if speed_kmh < MIN_SPEED_FOR_EFFICIENCY_KMH {
        return None;
    }
    Some(power_w / speed_kmh)
}

/// Computes the anomaly flags for a new raw sample against the previously
/// accepted one. Charging and interpolation flags are owned by the trip
/// lifecycle, not computed here.
pub fn compute_flags(sample: &TelemetrySample, previous: Option<&TelemetrySample>) -> SampleFlags {
    let mut flags = SampleFlags::empty();

    if sample.voltage <= 0.0 {
        flags.insert(SampleFlag::VoltageAnomaly);
    }
    if sample.speed_kmh < 0.0 || sample.speed_kmh > MAX_SPEED_KMH {
        flags.insert(SampleFlag::SpeedAnomaly);
    }
    if let Some(efficiency) = instantaneous_efficiency(sample.power_w, sample.speed_kmh) {
        if !efficiency.is_finite()
            || efficiency < 0.0
            || efficiency > MAX_EFFICIENCY_WH_PER_KM
        {
            flags.insert(SampleFlag::EfficiencyOutlier);
        }
    }

    if let Some(previous) = previous {
        // Duplicate or out-of-order timestamps are flagged as gaps too; the
        // trip snapshot refuses non-increasing appends separately.
        match sample.timestamp.duration_since(previous.timestamp) {
            Ok(delta) if delta > TIME_GAP_THRESHOLD => flags.insert(SampleFlag::TimeGap),
            Ok(delta) if delta.is_zero() => flags.insert(SampleFlag::TimeGap),
            Err(_) => flags.insert(SampleFlag::TimeGap),
            Ok(_) => {}
        }

        let distance_delta = sample.distance_km - previous.distance_km;
        if distance_delta < -MAX_DISTANCE_REGRESSION_KM || distance_delta > MAX_DISTANCE_JUMP_KM {
            flags.insert(SampleFlag::DistanceAnomaly);
        }

        if (sample.voltage - previous.voltage).abs() > MAX_VOLTAGE_SWING_V {
            flags.insert(SampleFlag::VoltageAnomaly);
        }
    }

    flags
}

/// True when a flag disqualifies a sample from estimation. TIME_GAP and
/// INTERPOLATED do not: gap edges and synthetic fill-in samples are real
/// evidence of the trip's progress.
fn is_disqualifying(flag: SampleFlag) -> bool {
    matches!(
        flag,
        SampleFlag::DistanceAnomaly
            | SampleFlag::VoltageAnomaly
            | SampleFlag::EfficiencyOutlier
            | SampleFlag::SpeedAnomaly
            | SampleFlag::ChargingDetected
    )
}

/// The validity predicate shared by the estimators and calibration.
pub fn is_valid_for_estimation(sample: &BatterySample) -> bool {
    if sample.flags.iter().any(is_disqualifying) {
        return false;
    }
    if sample.raw.voltage <= 0.0 {
        return false;
    }
    if !(0.0..=100.0).contains(&sample.raw.battery_percent) {
        return false;
    }
    match instantaneous_efficiency(sample.raw.power_w, sample.raw.speed_kmh) {
        Some(efficiency) => efficiency.is_finite() && efficiency >= 0.0,
        // Standing still: no efficiency evidence, but the sample is sound.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample(offset_secs: u64) -> TelemetrySample {
        TelemetrySample {
            timestamp: UNIX_EPOCH + Duration::from_secs(offset_secs),
            voltage: 80.0,
            battery_percent: 70.0,
            distance_km: 5.0,
            speed_kmh: 25.0,
            power_w: 450.0,
            current_a: 5.6,
            temperature_c: 21.0,
            connected: true,
            charging: false,
        }
    }

    #[test]
    fn clean_consecutive_samples_carry_no_flags() {
        let previous = sample(0);
        let mut next = sample(1);
        next.distance_km = 5.006;

        let flags = compute_flags(&next, Some(&previous));
        assert!(flags.is_empty(), "unexpected flags: {flags:?}");
    }

    #[test]
    fn long_delta_flags_time_gap() {
        let previous = sample(0);
        let next = sample(12);
        let flags = compute_flags(&next, Some(&previous));
        assert!(flags.contains(SampleFlag::TimeGap));
    }

    #[test]
    fn out_of_order_timestamp_flags_time_gap() {
        let previous = sample(10);
        let next = sample(5);
        let flags = compute_flags(&next, Some(&previous));
        assert!(flags.contains(SampleFlag::TimeGap));
    }

    #[test]
    fn odometer_regression_flags_distance_anomaly() {
        let previous = sample(0);
        let mut next = sample(1);
        next.distance_km = 4.5;
        let flags = compute_flags(&next, Some(&previous));
        assert!(flags.contains(SampleFlag::DistanceAnomaly));
    }

    #[test]
    fn voltage_swing_flags_voltage_anomaly() {
        let previous = sample(0);
        let mut next = sample(1);
        next.voltage = 86.0;
        let flags = compute_flags(&next, Some(&previous));
        assert!(flags.contains(SampleFlag::VoltageAnomaly));
    }

    #[test]
    fn absurd_efficiency_flags_outlier() {
        let mut next = sample(1);
        next.power_w = 3000.0;
        next.speed_kmh = 2.0; // 1500 Wh/km
        let flags = compute_flags(&next, None);
        assert!(flags.contains(SampleFlag::EfficiencyOutlier));
    }

    #[test]
    fn interpolated_samples_are_valid() {
        let battery = BatterySample::new(
            sample(1),
            80.0,
            SampleFlags::empty()
                .with(SampleFlag::Interpolated)
                .with(SampleFlag::TimeGap),
        );
        assert!(is_valid_for_estimation(&battery));
    }

    #[test]
    fn charging_detected_samples_are_excluded() {
        let battery = BatterySample::new(
            sample(1),
            80.0,
            SampleFlags::empty().with(SampleFlag::ChargingDetected),
        );
        assert!(!is_valid_for_estimation(&battery));
    }

    #[test]
    fn battery_percent_out_of_range_is_invalid() {
        let mut raw = sample(1);
        raw.battery_percent = 104.0;
        let battery = BatterySample::new(raw, 80.0, SampleFlags::empty());
        assert!(!is_valid_for_estimation(&battery));
    }

    #[test]
    fn standing_still_is_valid_without_efficiency() {
        let mut raw = sample(1);
        raw.speed_kmh = 0.0;
        raw.power_w = 40.0;
        let battery = BatterySample::new(raw, 80.0, SampleFlags::empty());
        assert!(is_valid_for_estimation(&battery));
        assert!(instantaneous_efficiency(raw.power_w, raw.speed_kmh).is_none());
    }
}

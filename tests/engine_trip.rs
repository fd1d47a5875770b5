use std::time::{Duration, SystemTime};

use wheelrange::battery::discharge::{energy_percent_to_voltage, remaining_energy_wh};
use wheelrange::engine::{Engine, EngineSettings};
use wheelrange::error::EngineError;
use wheelrange::estimation::weighted_window::WeightedWindowEstimator;
use wheelrange::estimation::EstimateStatus;
use wheelrange::store::MemoryStore;
use wheelrange::telemetry::TelemetrySample;

const CELL_COUNT: u32 = 20;
const CAPACITY_WH: f64 = 2000.0;

fn settings() -> EngineSettings {
    EngineSettings {
        enabled: true,
        cell_count: CELL_COUNT,
        capacity_wh: CAPACITY_WH,
        auto_detect_cells: false,
        calibration_enabled: false,
    }
}

fn engine() -> Engine {
    Engine::new(
        settings(),
        Box::new(WeightedWindowEstimator::with_defaults()),
        Box::new(MemoryStore::new()),
    )
}

/// Pack voltage after consuming `consumed_wh` from a full pack, following the
/// discharge curve.
fn pack_voltage_after(consumed_wh: f64) -> f64 {
    let energy_percent = 100.0 - consumed_wh / CAPACITY_WH * 100.0;
    energy_percent_to_voltage(energy_percent) * CELL_COUNT as f64
}

fn riding_sample(
    start: SystemTime,
    elapsed_secs: u64,
    speed_kmh: f64,
    power_w: f64,
    efficiency_wh_per_km: f64,
) -> TelemetrySample {
    let distance_km = elapsed_secs as f64 * speed_kmh / 3600.0;
    let consumed_wh = efficiency_wh_per_km * distance_km;
    let voltage = pack_voltage_after(consumed_wh);
    TelemetrySample {
        timestamp: start + Duration::from_secs(elapsed_secs),
        voltage,
        battery_percent: 100.0 - consumed_wh / CAPACITY_WH * 100.0,
        distance_km,
        speed_kmh,
        power_w,
        current_a: power_w / voltage,
        temperature_c: 25.0,
        connected: true,
        charging: false,
    }
}

/// A 10.5 km ride at 30 km/h with power alternating around 540 W (18 Wh/km)
/// produces a ranging estimate whose declared 85% band covers the range
/// expected analytically from the remaining pack energy.
#[test]
fn steady_trip_estimate_covers_analytic_range() -> Result<(), EngineError> {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let mut engine = engine();

    let mut last_voltage = 0.0;
    for t in 0..=1260u64 {
        // 510/570 W alternation keeps the weighted window variance non-zero.
        let power = if t % 2 == 0 { 510.0 } else { 570.0 };
        let sample = riding_sample(start, t, 30.0, power, 18.0);
        last_voltage = sample.voltage;
        engine.process_sample(sample)?;
    }

    let estimate = engine.state().estimate().expect("estimate published");
    assert_eq!(estimate.status, EstimateStatus::Valid);

    let efficiency = estimate.efficiency_wh_per_km.expect("efficiency");
    assert!(
        (efficiency - 18.0).abs() < 0.5,
        "efficiency {efficiency} far from 18 Wh/km"
    );

    let expected_range = remaining_energy_wh(last_voltage, CELL_COUNT, CAPACITY_WH) / 18.0;
    let band = estimate.band_85.expect("85% band");
    assert!(
        band.contains(expected_range),
        "band [{:.1}, {:.1}] should cover expected {:.1} km",
        band.lower_km,
        band.upper_km,
        expected_range
    );
    let range = estimate.range_km.expect("range");
    assert!(
        (range - expected_range).abs() / expected_range < 0.05,
        "range {range:.1} far from expected {expected_range:.1}"
    );
    Ok(())
}

/// 12 km in under ten minutes is still insufficient data; passing the ten
/// minute mark upgrades the estimate to a real range.
#[test]
fn fast_ride_stays_insufficient_until_time_gate() -> Result<(), EngineError> {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_100_000);
    let mut engine = engine();

    // 72.7 km/h covers 12 km in about 9.9 minutes.
    for t in 0..=594u64 {
        engine.process_sample(riding_sample(start, t, 72.7, 1310.0, 18.0))?;
    }
    let estimate = engine.state().estimate().expect("estimate published");
    assert_eq!(estimate.status, EstimateStatus::InsufficientData);
    let progress = estimate.progress.expect("progress");
    assert!(progress.distance_km >= progress.required_distance_km);
    assert!(progress.riding_minutes < progress.required_minutes);

    for t in 595..=636u64 {
        engine.process_sample(riding_sample(start, t, 72.7, 1310.0, 18.0))?;
    }
    let estimate = engine.state().estimate().expect("estimate published");
    assert_eq!(estimate.status, EstimateStatus::Valid);
    assert!(estimate.range_km.is_some());
    Ok(())
}

/// A mid-trip charge is recorded as one charging event, suppresses range
/// output while it lasts, and restarts data collection afterwards.
#[test]
fn mid_trip_charge_records_event_and_rebaselines() -> Result<(), EngineError> {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_200_000);
    let mut engine = engine();

    let flat = |t: u64, voltage: f64, speed: f64, power: f64, distance: f64| TelemetrySample {
        timestamp: start + Duration::from_secs(t),
        voltage,
        battery_percent: 75.0,
        distance_km: distance,
        speed_kmh: speed,
        power_w: power,
        current_a: 0.0,
        temperature_c: 25.0,
        connected: true,
        charging: false,
    };

    for t in 0..=600u64 {
        let distance = t as f64 * 30.0 / 3600.0;
        engine.process_sample(flat(t, 80.0, 30.0, 500.0, distance))?;
    }

    // Parked at 5 km, voltage climbing fast enough to confirm a charge.
    engine.process_sample(flat(601, 80.6, 0.0, 0.0, 5.0))?;
    engine.process_sample(flat(602, 81.2, 0.0, 0.0, 5.0))?;
    engine.process_sample(flat(603, 82.0, 0.0, 0.0, 5.0))?;
    engine.process_sample(flat(604, 83.0, 0.0, 0.0, 5.0))?;
    let estimate = engine.state().estimate().expect("estimate published");
    assert_eq!(estimate.status, EstimateStatus::Charging);

    // Voltage settles, the charge ends and riding resumes.
    engine.process_sample(flat(605, 83.0, 0.0, 0.0, 5.0))?;
    for t in 606..=640u64 {
        let distance = 5.0 + (t - 605) as f64 * 30.0 / 3600.0;
        engine.process_sample(flat(t, 83.0, 30.0, 500.0, distance))?;
    }

    let stats = engine.state().stats();
    assert_eq!(stats.charging_event_count, 1);
    assert!(!stats.charging);

    let estimate = engine.state().estimate().expect("estimate published");
    assert_eq!(estimate.status, EstimateStatus::InsufficientData);
    let progress = estimate.progress.expect("progress");
    assert!(progress.distance_km < 1.0, "baseline should restart after charging");
    Ok(())
}

#[tokio::test]
async fn reset_through_handle_clears_published_state() {
    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_300_000);
    let (handle, task) = wheelrange::engine::spawn(engine());

    for t in 0..=30u64 {
        handle
            .submit(riding_sample(start, t, 30.0, 540.0, 18.0))
            .await
            .expect("engine running");
    }
    // Reset is acked only after the queued samples have been consumed.
    handle.reset().await.expect("reset acked");

    assert!(handle.latest_estimate().is_none());
    let stats = handle.latest_stats();
    assert_eq!(stats.sample_count, 0);
    assert_eq!(stats.total_distance_km, 0.0);

    handle.shutdown().await.expect("shutdown sent");
    task.await.expect("engine task exits");
}

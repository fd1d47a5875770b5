//! Trip lifecycle: connectivity tracking, gap interpolation and charging
//! detection. All three are explicit state machines with pure transition
//! functions so they can be tested apart from the engine.

use crate::telemetry::TelemetrySample;
use std::time::{Duration, SystemTime};

/// Spacing of synthetic samples when filling a gap.
pub const INTERPOLATION_SPACING: Duration = Duration::from_secs(5);
/// Gaps longer than this are not interpolated; the data is too unreliable.
pub const MAX_INTERPOLATED_GAP: Duration = Duration::from_secs(3600);
/// Disconnections longer than this mark the published estimate stale.
pub const STALE_AFTER: Duration = Duration::from_secs(60);

const CHARGE_VOLTAGE_RISE_V: f64 = 0.5;
const CHARGE_PERCENT_RISE: f64 = 1.0;
const CHARGE_MAX_DISTANCE_KM: f64 = 0.01;

/// Below this speed the vehicle counts as stationary.
const PARKED_MAX_SPEED_KMH: f64 = 1.0;
/// Stillness must last this long before a parked segment opens.
pub const PARKED_AFTER: Duration = Duration::from_secs(60);

// Connectivity

/// Tracks the telemetry source's connection state. While disconnected no
/// real sample is appended but the trip itself is preserved.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityTracker {
    disconnected_since: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Unchanged,
    Disconnected,
    Reconnected { offline_for: Duration },
}

impl ConnectivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, connected: bool, now: SystemTime) -> ConnectivityEvent {
        match (connected, self.disconnected_since) {
            (false, None) => {
                self.disconnected_since = Some(now);
                ConnectivityEvent::Disconnected
            }
            (true, Some(since)) => {
                self.disconnected_since = None;
                let offline_for = now.duration_since(since).unwrap_or(Duration::ZERO);
                ConnectivityEvent::Reconnected { offline_for }
            }
            _ => ConnectivityEvent::Unchanged,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected_since.is_some()
    }

    /// True once the source has been gone long enough that the published
    /// estimate no longer reflects the vehicle.
    pub fn is_stale(&self, now: SystemTime) -> bool {
        self.disconnected_since
            .and_then(|since| now.duration_since(since).ok())
            .is_some_and(|offline| offline > STALE_AFTER)
    }
}

// Parked detection

/// What the engine must do after feeding one sample to the parked detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkedTransition {
    None,
    /// Stillness sustained past [`PARKED_AFTER`]: open a parked segment.
    Parked,
    /// Motion resumed while parked: open a riding segment.
    Resumed,
}

/// Debounced stationary detection. A stop at a light never opens a parked
/// segment; only stillness sustained past [`PARKED_AFTER`] does, so short
/// pauses keep accruing as riding time while true parking does not.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParkedDetector {
    stationary_since: Option<SystemTime>,
    parked: bool,
}

impl ParkedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_parked(&self) -> bool {
        self.parked
    }

    pub fn observe(&mut self, sample: &TelemetrySample) -> ParkedTransition {
        if sample.speed_kmh >= PARKED_MAX_SPEED_KMH {
            self.stationary_since = None;
            if self.parked {
                self.parked = false;
                return ParkedTransition::Resumed;
            }
            return ParkedTransition::None;
        }
        if self.parked {
            return ParkedTransition::None;
        }
        let since = *self.stationary_since.get_or_insert(sample.timestamp);
        let still_for = sample
            .timestamp
            .duration_since(since)
            .unwrap_or(Duration::ZERO);
        if still_for >= PARKED_AFTER {
            self.parked = true;
            return ParkedTransition::Parked;
        }
        ParkedTransition::None
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// Gap interpolation

/// Fills the gap between two real samples with synthetic ones spaced
/// [`INTERPOLATION_SPACING`] apart, each field linearly interpolated.
/// Returns an empty vec for gaps longer than [`MAX_INTERPOLATED_GAP`] or
/// non-positive gaps.
pub fn interpolate_gap(last: &TelemetrySample, next: &TelemetrySample) -> Vec<TelemetrySample> {
    let gap = match next.timestamp.duration_since(last.timestamp) {
        Ok(gap) if !gap.is_zero() => gap,
        _ => return Vec::new(),
    };
    if gap > MAX_INTERPOLATED_GAP {
        return Vec::new();
    }

    let gap_secs = gap.as_secs_f64();
    let step_secs = INTERPOLATION_SPACING.as_secs_f64();
    let mut synthetic = Vec::new();
    let mut offset = step_secs;
    while offset < gap_secs {
        let t = offset / gap_secs;
        synthetic.push(TelemetrySample {
            timestamp: last.timestamp + Duration::from_secs_f64(offset),
            voltage: lerp(last.voltage, next.voltage, t),
            battery_percent: lerp(last.battery_percent, next.battery_percent, t),
            distance_km: lerp(last.distance_km, next.distance_km, t),
            speed_kmh: lerp(last.speed_kmh, next.speed_kmh, t),
            power_w: lerp(last.power_w, next.power_w, t),
            current_a: lerp(last.current_a, next.current_a, t),
            temperature_c: lerp(last.temperature_c, next.temperature_c, t),
            connected: true,
            charging: false,
        });
        offset += step_secs;
    }
    synthetic
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

// Charging detection

/// Debounced charging detector. One matching sample only raises suspicion;
/// a second consecutive one confirms, so single noisy readings never open
/// a charging event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargingState {
    #[default]
    NotCharging,
    Suspected,
    Confirmed,
}

/// What the engine must do after feeding one sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingTransition {
    None,
    /// Second consecutive matching sample: open the charging event using
    /// the pre-suspicion sample as the before-reference.
    Started,
    /// Indicators ceased while confirmed: close the event and start a new
    /// baseline riding segment.
    Ended,
}

/// True when a consecutive sample pair shows charging indicators: voltage
/// or battery percent rising while the vehicle is not moving.
pub fn charging_indicated(previous: &TelemetrySample, current: &TelemetrySample) -> bool {
    let voltage_rise = current.voltage - previous.voltage > CHARGE_VOLTAGE_RISE_V;
    let percent_rise = current.battery_percent - previous.battery_percent > CHARGE_PERCENT_RISE;
    let stationary = (current.distance_km - previous.distance_km).abs() < CHARGE_MAX_DISTANCE_KM;
    (voltage_rise || percent_rise) && stationary
}

/// Pure transition function of the charging state machine.
pub fn charging_step(state: ChargingState, indicated: bool) -> (ChargingState, ChargingTransition) {
    match (state, indicated) {
        (ChargingState::NotCharging, true) => (ChargingState::Suspected, ChargingTransition::None),
        (ChargingState::NotCharging, false) => {
            (ChargingState::NotCharging, ChargingTransition::None)
        }
        (ChargingState::Suspected, true) => (ChargingState::Confirmed, ChargingTransition::Started),
        (ChargingState::Suspected, false) => {
            (ChargingState::NotCharging, ChargingTransition::None)
        }
        (ChargingState::Confirmed, true) => (ChargingState::Confirmed, ChargingTransition::None),
        (ChargingState::Confirmed, false) => {
            (ChargingState::NotCharging, ChargingTransition::Ended)
        }
    }
}

/// Stateful wrapper owned by the engine. Remembers the sample seen before
/// suspicion was first raised so the charging event records true resting
/// before-values.
#[derive(Debug, Clone, Default)]
pub struct ChargingDetector {
    state: ChargingState,
    before: Option<TelemetrySample>,
}

impl ChargingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ChargingState {
        self.state
    }

    pub fn is_charging(&self) -> bool {
        self.state == ChargingState::Confirmed
    }

    /// The sample preceding the first suspicious one, available once
    /// charging is confirmed.
    pub fn before_sample(&self) -> Option<&TelemetrySample> {
        self.before.as_ref()
    }

    pub fn observe(
        &mut self,
        previous: Option<&TelemetrySample>,
        current: &TelemetrySample,
    ) -> ChargingTransition {
        let previous = match previous {
            Some(previous) => previous,
            None => return ChargingTransition::None,
        };
        let indicated = charging_indicated(previous, current);
        if self.state == ChargingState::NotCharging && indicated {
            self.before = Some(*previous);
        }
        let (next, transition) = charging_step(self.state, indicated);
        if next == ChargingState::NotCharging && transition == ChargingTransition::None {
            self.before = None;
        }
        self.state = next;
        transition
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn sample(offset_secs: u64, voltage: f64, percent: f64, distance_km: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: UNIX_EPOCH + Duration::from_secs(offset_secs),
            voltage,
            battery_percent: percent,
            distance_km,
            speed_kmh: 0.0,
            power_w: 0.0,
            current_a: 0.0,
            temperature_c: 21.0,
            connected: true,
            charging: false,
        }
    }

    #[test]
    fn twelve_second_gap_yields_two_interpolated_samples() {
        let last = sample(0, 80.0, 70.0, 5.0);
        let next = sample(12, 79.4, 69.4, 5.12);

        let synthetic = interpolate_gap(&last, &next);

        assert_eq!(synthetic.len(), 2);
        assert_eq!(synthetic[0].timestamp, UNIX_EPOCH + Duration::from_secs(5));
        assert_eq!(synthetic[1].timestamp, UNIX_EPOCH + Duration::from_secs(10));
        // Monotone between the endpoints.
        assert!(synthetic[0].voltage < last.voltage);
        assert!(synthetic[1].voltage > next.voltage);
        assert!(synthetic[0].distance_km < synthetic[1].distance_km);
        assert!(synthetic[1].distance_km < next.distance_km);
    }

    #[test]
    fn exact_multiple_gap_excludes_endpoint() {
        let last = sample(0, 80.0, 70.0, 5.0);
        let next = sample(10, 79.8, 69.8, 5.1);
        // 10 s gap: only +5 s; +10 s would collide with the real sample.
        assert_eq!(interpolate_gap(&last, &next).len(), 1);
    }

    #[test]
    fn hour_long_gap_is_not_interpolated() {
        let last = sample(0, 80.0, 70.0, 5.0);
        let next = sample(3601, 79.0, 68.0, 6.0);
        assert!(interpolate_gap(&last, &next).is_empty());
    }

    #[test]
    fn reversed_gap_is_not_interpolated() {
        let last = sample(100, 80.0, 70.0, 5.0);
        let next = sample(50, 80.0, 70.0, 5.0);
        assert!(interpolate_gap(&last, &next).is_empty());
    }

    #[test]
    fn one_suspicious_sample_does_not_confirm() {
        let mut detector = ChargingDetector::new();
        let resting = sample(0, 76.0, 40.0, 5.0);
        let rising = sample(1, 76.7, 40.5, 5.0);
        let normal = sample(2, 76.0, 40.0, 5.0);

        assert_eq!(
            detector.observe(Some(&resting), &rising),
            ChargingTransition::None
        );
        assert_eq!(detector.state(), ChargingState::Suspected);

        // Indicator gone: noise, back to not charging.
        assert_eq!(
            detector.observe(Some(&rising), &normal),
            ChargingTransition::None
        );
        assert_eq!(detector.state(), ChargingState::NotCharging);
    }

    #[test]
    fn second_consecutive_sample_confirms_and_records_before() {
        let mut detector = ChargingDetector::new();
        let resting = sample(0, 76.0, 40.0, 5.0);
        let first = sample(1, 76.6, 40.2, 5.0);
        let second = sample(2, 77.2, 40.4, 5.0);

        detector.observe(Some(&resting), &first);
        assert_eq!(
            detector.observe(Some(&first), &second),
            ChargingTransition::Started
        );
        assert!(detector.is_charging());
        assert_eq!(detector.before_sample(), Some(&resting));
    }

    #[test]
    fn indicators_ceasing_while_confirmed_ends_charging() {
        let mut detector = ChargingDetector::new();
        let samples = [
            sample(0, 76.0, 40.0, 5.0),
            sample(1, 76.6, 40.2, 5.0),
            sample(2, 77.2, 40.4, 5.0),
            sample(3, 77.2, 40.4, 5.0),
        ];
        detector.observe(Some(&samples[0]), &samples[1]);
        detector.observe(Some(&samples[1]), &samples[2]);
        assert_eq!(
            detector.observe(Some(&samples[2]), &samples[3]),
            ChargingTransition::Ended
        );
        assert_eq!(detector.state(), ChargingState::NotCharging);
    }

    #[test]
    fn voltage_rise_while_moving_is_not_charging() {
        let mut detector = ChargingDetector::new();
        // Regenerative braking: voltage rises but distance advances.
        let previous = sample(0, 76.0, 40.0, 5.0);
        let current = sample(1, 76.8, 40.0, 5.02);
        assert!(!charging_indicated(&previous, &current));
        assert_eq!(
            detector.observe(Some(&previous), &current),
            ChargingTransition::None
        );
        assert_eq!(detector.state(), ChargingState::NotCharging);
    }

    #[test]
    fn brief_stop_never_parks() {
        let mut detector = ParkedDetector::new();
        for offset in [0, 10, 30, 59] {
            assert_eq!(
                detector.observe(&sample(offset, 80.0, 70.0, 5.0)),
                ParkedTransition::None
            );
        }
        let mut rolling = sample(60, 80.0, 70.0, 5.01);
        rolling.speed_kmh = 12.0;
        // Moving again before the threshold: no transitions at all.
        assert_eq!(detector.observe(&rolling), ParkedTransition::None);
        assert!(!detector.is_parked());
    }

    #[test]
    fn sustained_stillness_parks_and_motion_resumes() {
        let mut detector = ParkedDetector::new();
        assert_eq!(
            detector.observe(&sample(0, 80.0, 70.0, 5.0)),
            ParkedTransition::None
        );
        assert_eq!(
            detector.observe(&sample(30, 80.0, 70.0, 5.0)),
            ParkedTransition::None
        );
        assert_eq!(
            detector.observe(&sample(60, 80.0, 70.0, 5.0)),
            ParkedTransition::Parked
        );
        assert!(detector.is_parked());
        assert_eq!(
            detector.observe(&sample(120, 80.0, 70.0, 5.0)),
            ParkedTransition::None
        );

        let mut rolling = sample(180, 80.0, 70.0, 5.02);
        rolling.speed_kmh = 20.0;
        assert_eq!(detector.observe(&rolling), ParkedTransition::Resumed);
        assert!(!detector.is_parked());
    }

    #[test]
    fn stale_after_one_minute_disconnected() {
        let mut tracker = ConnectivityTracker::new();
        let t0 = UNIX_EPOCH + Duration::from_secs(100);

        assert_eq!(tracker.observe(false, t0), ConnectivityEvent::Disconnected);
        assert!(!tracker.is_stale(t0 + Duration::from_secs(30)));
        assert!(tracker.is_stale(t0 + Duration::from_secs(61)));

        let event = tracker.observe(true, t0 + Duration::from_secs(90));
        assert_eq!(
            event,
            ConnectivityEvent::Reconnected {
                offline_for: Duration::from_secs(90)
            }
        );
        assert!(!tracker.is_disconnected());
    }
}

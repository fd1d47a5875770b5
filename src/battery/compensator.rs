//! Load-aware voltage smoothing.
//!
//! Pack voltage sags under instantaneous load, so the raw reading
//! underestimates the true state of charge while riding hard. The
//! compensator is an exponential filter whose gain shrinks as power draw
//! grows: at high load the raw reading is trusted less and the filtered
//! value dominates. This replaces an earlier approach of excluding sagging
//! samples from energy accounting entirely.

const BASE_ALPHA: f64 = 0.3;

const LOW_POWER_W: f64 = 500.0;
const MID_POWER_W: f64 = 1500.0;
const HIGH_POWER_W: f64 = 2500.0;

const LOW_TRUST: f64 = 0.8;
const MID_TRUST: f64 = 0.5;
const HIGH_TRUST: f64 = 0.2;

/// How much the raw reading is trusted at a given power draw, in [0.2, 0.8].
pub fn trust_factor(power_w: f64) -> f64 {
    if power_w < LOW_POWER_W {
        LOW_TRUST
    } else if power_w < MID_POWER_W {
        let t = (power_w - LOW_POWER_W) / (MID_POWER_W - LOW_POWER_W);
        LOW_TRUST + t * (MID_TRUST - LOW_TRUST)
    } else if power_w < HIGH_POWER_W {
        let t = (power_w - MID_POWER_W) / (HIGH_POWER_W - MID_POWER_W);
        MID_TRUST + t * (HIGH_TRUST - MID_TRUST)
    } else {
        HIGH_TRUST
    }
}

/// Stateful voltage compensation filter. One instance per trip; the
/// lifecycle reinitializes it after every charging event.
#[derive(Debug, Clone, Default)]
pub struct VoltageCompensator {
    previous: Option<f64>,
}

impl VoltageCompensator {
    pub fn new() -> Self {
        Self { previous: None }
    }

    /// Feeds one raw reading and returns the new compensated voltage.
    /// The first sample initializes the filter to the raw value.
    pub fn compensate(&mut self, raw_voltage: f64, power_w: f64) -> f64 {
        let compensated = match self.previous {
            None => raw_voltage,
            Some(previous) => {
                let alpha = BASE_ALPHA * trust_factor(power_w);
                alpha * raw_voltage + (1.0 - alpha) * previous
            }
        };
        self.previous = Some(compensated);
        compensated
    }

    /// Resets the filter to a known voltage, discarding history. Used after
    /// a charging event where the previous filtered value is meaningless.
    pub fn reinitialize(&mut self, voltage: f64) {
        self.previous = Some(voltage);
    }

    pub fn current(&self) -> Option<f64> {
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_bands_interpolate() {
        assert_eq!(trust_factor(0.0), 0.8);
        assert_eq!(trust_factor(499.0), 0.8);
        assert!((trust_factor(1000.0) - 0.65).abs() < 1e-12);
        assert_eq!(trust_factor(1500.0), 0.5);
        assert!((trust_factor(2000.0) - 0.35).abs() < 1e-12);
        assert_eq!(trust_factor(2500.0), 0.2);
        assert_eq!(trust_factor(9000.0), 0.2);
    }

    #[test]
    fn first_sample_initializes_to_raw() {
        let mut filter = VoltageCompensator::new();
        assert_eq!(filter.compensate(82.4, 3000.0), 82.4);
    }

    #[test]
    fn high_load_sag_is_damped() {
        let mut filter = VoltageCompensator::new();
        filter.compensate(82.0, 100.0);
        // Sudden 3 V sag under 2.5 kW: alpha = 0.3 * 0.2 = 0.06.
        let compensated = filter.compensate(79.0, 2500.0);
        assert!((compensated - 81.82).abs() < 1e-9);
    }

    #[test]
    fn recovers_after_load_step_within_bounded_samples() {
        let mut filter = VoltageCompensator::new();
        filter.compensate(82.0, 100.0);

        // Several samples sagged under >1.5 kW load.
        for _ in 0..5 {
            filter.compensate(79.0, 2000.0);
        }

        // Back to light load at the true resting voltage; alpha = 0.24
        // per sample, so convergence to within 0.2 V is quick.
        let mut compensated = 0.0;
        for _ in 0..20 {
            compensated = filter.compensate(81.8, 200.0);
        }
        assert!(
            (compensated - 81.8).abs() < 0.2,
            "did not converge: {compensated}"
        );
    }

    #[test]
    fn reinitialize_discards_history() {
        let mut filter = VoltageCompensator::new();
        filter.compensate(78.0, 100.0);
        filter.reinitialize(83.9);
        assert_eq!(filter.current(), Some(83.9));

        // Next sample filters from the post-charge voltage, not the old one.
        let next = filter.compensate(83.9, 0.0);
        assert!((next - 83.9).abs() < 1e-9);
    }
}

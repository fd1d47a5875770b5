use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// One raw telemetry sample as pushed by the vehicle's telemetry source.
///
/// Cadence is nominally ~500 ms but not guaranteed; gaps, duplicates and
/// out-of-order timestamps all occur in practice and are handled downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: SystemTime,
    /// Pack voltage in volts.
    pub voltage: f64,
    /// Reported state of charge, percent.
    pub battery_percent: f64,
    /// Trip odometer, kilometres.
    pub distance_km: f64,
    pub speed_kmh: f64,
    pub power_w: f64,
    pub current_a: f64,
    pub temperature_c: f64,
    pub connected: bool,
    pub charging: bool,
}

/// Anomaly/provenance flags attached to a sample by the validator and the
/// trip lifecycle. Non-exclusive: a sample may carry any combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFlag {
    TimeGap,
    DistanceAnomaly,
    VoltageAnomaly,
    EfficiencyOutlier,
    SpeedAnomaly,
    ChargingDetected,
    Interpolated,
}

impl SampleFlag {
    const fn bit(self) -> u8 {
        match self {
            SampleFlag::TimeGap => 1 << 0,
            SampleFlag::DistanceAnomaly => 1 << 1,
            SampleFlag::VoltageAnomaly => 1 << 2,
            SampleFlag::EfficiencyOutlier => 1 << 3,
            SampleFlag::SpeedAnomaly => 1 << 4,
            SampleFlag::ChargingDetected => 1 << 5,
            SampleFlag::Interpolated => 1 << 6,
        }
    }

    const ALL: [SampleFlag; 7] = [
        SampleFlag::TimeGap,
        SampleFlag::DistanceAnomaly,
        SampleFlag::VoltageAnomaly,
        SampleFlag::EfficiencyOutlier,
        SampleFlag::SpeedAnomaly,
        SampleFlag::ChargingDetected,
        SampleFlag::Interpolated,
    ];
}

/// Compact set of [`SampleFlag`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFlags(u8);

impl SampleFlags {
    pub const fn empty() -> Self {
        SampleFlags(0)
    }

    pub fn insert(&mut self, flag: SampleFlag) {
        self.0 |= flag.bit();
    }

    pub fn with(mut self, flag: SampleFlag) -> Self {
        self.insert(flag);
        self
    }

    pub const fn contains(self, flag: SampleFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = SampleFlag> {
        SampleFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Debug for SampleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A telemetry sample after compensation and flagging. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatterySample {
    pub raw: TelemetrySample,
    /// Sag-compensated pack voltage, volts.
    pub compensated_voltage: f64,
    pub flags: SampleFlags,
}

impl BatterySample {
    pub fn new(raw: TelemetrySample, compensated_voltage: f64, flags: SampleFlags) -> Self {
        Self {
            raw,
            compensated_voltage,
            flags,
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        self.raw.timestamp
    }

    pub fn is_interpolated(&self) -> bool {
        self.flags.contains(SampleFlag::Interpolated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_insert_and_contains() {
        let mut flags = SampleFlags::empty();
        assert!(flags.is_empty());

        flags.insert(SampleFlag::TimeGap);
        flags.insert(SampleFlag::Interpolated);

        assert!(flags.contains(SampleFlag::TimeGap));
        assert!(flags.contains(SampleFlag::Interpolated));
        assert!(!flags.contains(SampleFlag::VoltageAnomaly));
    }

    #[test]
    fn flags_iter_yields_inserted_flags_only() {
        let flags = SampleFlags::empty()
            .with(SampleFlag::DistanceAnomaly)
            .with(SampleFlag::SpeedAnomaly);

        let collected: Vec<_> = flags.iter().collect();
        assert_eq!(
            collected,
            vec![SampleFlag::DistanceAnomaly, SampleFlag::SpeedAnomaly]
        );
    }
}

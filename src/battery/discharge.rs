//! Discharge curve model: pure cell-voltage <-> energy-percent conversion.
//!
//! Piecewise over three physically distinct regions of a li-ion cell:
//! a flat top (4.20-3.95 V), a long gradual middle (3.95-3.50 V) and a
//! rapid knee at the bottom (3.50-3.00 V). All energy accounting in the
//! engine goes through this mapping, so it must stay monotonic and
//! invertible.

/// Fully charged cell voltage.
pub const CELL_FULL_V: f64 = 4.20;
/// Boundary between the flat and gradual regions.
pub const CELL_FLAT_END_V: f64 = 3.95;
/// Boundary between the gradual and rapid regions.
pub const CELL_GRADUAL_END_V: f64 = 3.50;
/// Empty cell voltage.
pub const CELL_EMPTY_V: f64 = 3.00;

const FLAT_END_PERCENT: f64 = 80.0;
const GRADUAL_END_PERCENT: f64 = 20.0;
const RAPID_EXPONENT: f64 = 1.5;

/// Maps a cell voltage to its remaining energy percentage.
///
/// Clamps outside [3.00, 4.20] to [0, 100]. Monotonically non-decreasing
/// in the cell voltage.
pub fn voltage_to_energy_percent(cell_voltage: f64) -> f64 {
    if cell_voltage >= CELL_FULL_V {
        return 100.0;
    }
    if cell_voltage <= CELL_EMPTY_V {
        return 0.0;
    }

    if cell_voltage >= CELL_FLAT_END_V {
        // Flat region: 80-100% over 3.95-4.20 V, linear.
        let t = (cell_voltage - CELL_FLAT_END_V) / (CELL_FULL_V - CELL_FLAT_END_V);
        FLAT_END_PERCENT + t * (100.0 - FLAT_END_PERCENT)
    } else if cell_voltage >= CELL_GRADUAL_END_V {
        // Gradual region: 20-80% over 3.50-3.95 V, linear.
        let t = (cell_voltage - CELL_GRADUAL_END_V) / (CELL_FLAT_END_V - CELL_GRADUAL_END_V);
        GRADUAL_END_PERCENT + t * (FLAT_END_PERCENT - GRADUAL_END_PERCENT)
    } else {
        // Rapid region: 0-20% over 3.00-3.50 V, power law.
        let t = (cell_voltage - CELL_EMPTY_V) / (CELL_GRADUAL_END_V - CELL_EMPTY_V);
        GRADUAL_END_PERCENT * t.powf(RAPID_EXPONENT)
    }
}

/// Inverse of [`voltage_to_energy_percent`]. Clamps percent to [0, 100].
pub fn energy_percent_to_voltage(percent: f64) -> f64 {
    let percent = percent.clamp(0.0, 100.0);

    if percent >= FLAT_END_PERCENT {
        let t = (percent - FLAT_END_PERCENT) / (100.0 - FLAT_END_PERCENT);
        CELL_FLAT_END_V + t * (CELL_FULL_V - CELL_FLAT_END_V)
    } else if percent >= GRADUAL_END_PERCENT {
        let t = (percent - GRADUAL_END_PERCENT) / (FLAT_END_PERCENT - GRADUAL_END_PERCENT);
        CELL_GRADUAL_END_V + t * (CELL_FLAT_END_V - CELL_GRADUAL_END_V)
    } else {
        let t = (percent / GRADUAL_END_PERCENT).powf(1.0 / RAPID_EXPONENT);
        CELL_EMPTY_V + t * (CELL_GRADUAL_END_V - CELL_EMPTY_V)
    }
}

/// Maps a pack voltage to energy percent for a pack of `cell_count` cells
/// in series. A non-positive cell count yields 0 (never divides by zero).
pub fn pack_voltage_to_energy_percent(pack_voltage: f64, cell_count: u32) -> f64 {
    if cell_count == 0 {
        return 0.0;
    }
    voltage_to_energy_percent(pack_voltage / cell_count as f64)
}

/// Remaining energy in watt-hours for a pack at the given voltage.
pub fn remaining_energy_wh(pack_voltage: f64, cell_count: u32, capacity_wh: f64) -> f64 {
    pack_voltage_to_energy_percent(pack_voltage, cell_count) / 100.0 * capacity_wh
}

/// Energy consumed between two pack voltages, watt-hours. Negative deltas
/// (voltage rose, e.g. after a rest) clamp to zero.
pub fn consumed_energy_wh(
    from_pack_voltage: f64,
    to_pack_voltage: f64,
    cell_count: u32,
    capacity_wh: f64,
) -> f64 {
    let from = pack_voltage_to_energy_percent(from_pack_voltage, cell_count);
    let to = pack_voltage_to_energy_percent(to_pack_voltage, cell_count);
    ((from - to) / 100.0 * capacity_wh).max(0.0)
}

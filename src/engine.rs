//! The orchestrator: one task owns every piece of mutable trip state and
//! processes samples and external commands in arrival order. Published
//! output goes through the watch channels in [`EngineState`]; readers never
//! lock.

use crate::battery::compensator::VoltageCompensator;
use crate::calibration::{self, MilestoneTracker, SegmentHistory};
use crate::config::Config;
use crate::error::EngineError;
use crate::estimation::{
    self, EstimateStatus, PackParams, RangeEstimate, RangeEstimator,
};
use crate::state::{EngineState, TripStats};
use crate::store::{self, KeyValueStore, RecoverySnapshot};
use crate::telemetry::{BatterySample, SampleFlag, TelemetrySample};
use crate::trip::lifecycle::{
    ChargingDetector, ChargingTransition, ConnectivityTracker, INTERPOLATION_SPACING,
    ParkedDetector, ParkedTransition, interpolate_gap,
};
use crate::trip::{ChargingEvent, SegmentKind, TripSnapshot};
use crate::validator::{self, TIME_GAP_THRESHOLD};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Recompute at most this often while showing gate progress.
const INSUFFICIENT_RECOMPUTE_EVERY: Duration = Duration::from_secs(10);
/// Recompute interval once estimating, battery at or above 50%.
const HIGH_BATTERY_RECOMPUTE_EVERY: Duration = Duration::from_secs(5 * 60);
/// Recompute interval below 50%: the lower the charge the fresher the
/// estimate should be.
const LOW_BATTERY_RECOMPUTE_EVERY: Duration = Duration::from_secs(60);
const LOW_BATTERY_THRESHOLD: f64 = 50.0;

/// Plausible series cell counts for auto-detection.
const KNOWN_CELL_COUNTS: [u32; 5] = [16, 20, 24, 30, 36];
/// Mid-discharge cell voltage the auto-detector matches against.
const NOMINAL_CELL_V: f64 = 3.85;

/// Everything the engine reads from configuration, resolved once at
/// startup. Never re-read at use-site.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub enabled: bool,
    pub cell_count: u32,
    pub capacity_wh: f64,
    pub auto_detect_cells: bool,
    pub calibration_enabled: bool,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.engine_enabled(),
            cell_count: config.cell_count(),
            capacity_wh: config.capacity_wh(),
            auto_detect_cells: config.auto_detect_cells(),
            calibration_enabled: config.calibration_enabled(),
        }
    }
}

/// Commands serialized onto the engine task alongside samples, so external
/// resets never interleave with an in-flight update.
#[derive(Debug)]
pub enum EngineCommand {
    Sample(TelemetrySample),
    Reset { ack: oneshot::Sender<()> },
    Shutdown,
}

pub struct Engine {
    settings: EngineSettings,
    estimator: Box<dyn RangeEstimator>,
    store: Box<dyn KeyValueStore>,
    state: EngineState,
    trip: TripSnapshot,
    compensator: VoltageCompensator,
    connectivity: ConnectivityTracker,
    charging: ChargingDetector,
    parking: ParkedDetector,
    milestones: MilestoneTracker,
    history: SegmentHistory,
    last_raw: Option<TelemetrySample>,
    last_recompute: Option<SystemTime>,
    stale_published: bool,
    detected_cells: Option<u32>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        estimator: Box<dyn RangeEstimator>,
        store: Box<dyn KeyValueStore>,
    ) -> Self {
        let history = store::load_history(store.as_ref());
        if !history.is_empty() {
            info!(segments = history.len(), "Loaded historical segments");
        }
        Self {
            settings,
            estimator,
            store,
            state: EngineState::new(),
            trip: TripSnapshot::new(),
            compensator: VoltageCompensator::new(),
            connectivity: ConnectivityTracker::new(),
            charging: ChargingDetector::new(),
            parking: ParkedDetector::new(),
            milestones: MilestoneTracker::new(),
            history,
            last_raw: None,
            last_recompute: None,
            stale_published: false,
            detected_cells: None,
        }
    }

    /// Restores the crash-recovery snapshot if it is fresh enough, seeding
    /// the compensator and gap detection with the last pre-restart sample.
    pub fn restore_recovery(&mut self, now: SystemTime) {
        if let Some(snapshot) = store::load_recovery(self.store.as_ref(), now) {
            info!("Restored recovery snapshot from previous run");
            self.compensator.reinitialize(snapshot.last_sample.voltage);
            self.last_raw = Some(snapshot.last_sample);
            if !snapshot.connected {
                self.connectivity
                    .observe(false, snapshot.last_sample.timestamp);
            }
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn subscribe_estimate(&self) -> watch::Receiver<Option<RangeEstimate>> {
        self.state.subscribe_estimate()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<TripStats> {
        self.state.subscribe_stats()
    }

    fn pack(&self) -> PackParams {
        PackParams {
            cell_count: self.detected_cells.unwrap_or(self.settings.cell_count),
            capacity_wh: self.settings.capacity_wh,
        }
    }

    /// The full per-sample pipeline. Every failure inside degrades to a
    /// status or a warning; nothing here may take the process down.
    pub fn process_sample(&mut self, sample: TelemetrySample) -> Result<(), EngineError> {
        if !self.settings.enabled {
            return Ok(());
        }
        let now = sample.timestamp;

        self.connectivity.observe(sample.connected, now);
        if !sample.connected {
            self.handle_disconnected(now)?;
            return Ok(());
        }
        self.stale_published = false;

        if self.settings.auto_detect_cells && self.detected_cells.is_none() && sample.voltage > 0.0
        {
            let cells = detect_cell_count(sample.voltage);
            info!(cells, voltage = sample.voltage, "Auto-detected cell count");
            self.detected_cells = Some(cells);
        }

        self.fill_gap_before(&sample);
        let transition = self.charging.observe(self.last_raw.as_ref(), &sample);
        self.apply_charging_transition(transition, &sample);
        self.apply_parked_transition(&sample);

        let mut flags = validator::compute_flags(&sample, self.last_raw.as_ref());
        if self.charging.is_charging() {
            flags.insert(SampleFlag::ChargingDetected);
        }
        let compensated = self.compensator.compensate(sample.voltage, sample.power_w);
        let battery = BatterySample::new(sample, compensated, flags);

        if !self.trip.append(battery) {
            warn!("Dropping sample with non-advancing timestamp");
            self.publish_stats()?;
            return Ok(());
        }
        self.last_raw = Some(sample);

        if !self.charging.is_charging() {
            self.record_milestones(&sample);
        }

        self.maybe_recompute(&sample, now)?;
        self.publish_stats()?;
        self.persist_recovery(&sample, now);
        Ok(())
    }

    /// Atomically replaces all trip state. Nothing partial is ever
    /// observable: the published estimate and stats are cleared in the same
    /// synchronous step.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        info!("Resetting trip state");
        self.trip = TripSnapshot::new();
        self.compensator = VoltageCompensator::new();
        self.charging.reset();
        self.parking.reset();
        self.milestones.reset();
        self.last_raw = None;
        self.last_recompute = None;
        self.stale_published = false;
        // The snapshot holds the discarded trip's last sample; a restart
        // must not resume from it.
        if let Err(e) = store::clear_recovery(self.store.as_mut()) {
            warn!(error = %e, "Failed to clear recovery snapshot");
        }
        self.state.clear()
    }

    fn handle_disconnected(&mut self, now: SystemTime) -> Result<(), EngineError> {
        if self.stale_published || !self.connectivity.is_stale(now) {
            return Ok(());
        }
        // Past the staleness threshold: demote the published estimate
        // without recomputation.
        if let Some(previous) = self.state.estimate().cloned() {
            warn!("Telemetry source silent beyond staleness threshold");
            self.state
                .set_estimate(previous.with_status(EstimateStatus::Stale))?;
        }
        self.stale_published = true;
        self.publish_stats()
    }

    /// Fills the span between the last real sample and the new one with
    /// interpolated samples when the delta exceeds the gap threshold. The
    /// trip is never reset by a gap, however long.
    fn fill_gap_before(&mut self, sample: &TelemetrySample) {
        let Some(last) = self.last_raw else { return };
        let Ok(delta) = sample.timestamp.duration_since(last.timestamp) else {
            return;
        };
        if delta <= TIME_GAP_THRESHOLD {
            return;
        }
        // A hiccup shorter than the interpolation spacing is flagged on the
        // sample but opens no segments; there is nothing to fill.
        if delta <= INTERPOLATION_SPACING {
            return;
        }

        let synthetic = interpolate_gap(&last, sample);
        self.trip.start_segment(SegmentKind::ConnectionGap, false, None);
        if synthetic.is_empty() {
            debug!(
                gap_secs = delta.as_secs(),
                "Gap exceeds interpolation limit, recording dropout only"
            );
        } else {
            info!(
                gap_secs = delta.as_secs(),
                samples = synthetic.len(),
                "Interpolating telemetry gap"
            );
            let mut previous = last;
            for raw in synthetic {
                let mut flags = validator::compute_flags(&raw, Some(&previous));
                flags.insert(SampleFlag::Interpolated);
                let compensated = self.compensator.compensate(raw.voltage, raw.power_w);
                self.trip.append(BatterySample::new(raw, compensated, flags));
                previous = raw;
            }
        }
        // Riding resumes in a fresh segment. The baseline is untouched,
        // except when there is none yet (gap straight after a recovery
        // restore): then the resumed segment becomes the trip baseline.
        let needs_baseline = !self.trip.segments().iter().any(|s| s.is_baseline);
        let resumed_kind = if !needs_baseline && self.parking.is_parked() {
            SegmentKind::Parked
        } else {
            SegmentKind::NormalRiding
        };
        self.trip.start_segment(
            resumed_kind,
            needs_baseline,
            needs_baseline.then_some("trip-start"),
        );
    }

    /// Opens and closes parked segments around sustained stillness.
    /// Suppressed while charging; a charging stop is already its own
    /// segment kind.
    fn apply_parked_transition(&mut self, sample: &TelemetrySample) {
        if self.charging.is_charging() {
            self.parking.reset();
            return;
        }
        match self.parking.observe(sample) {
            ParkedTransition::None => {}
            ParkedTransition::Parked => {
                debug!("Sustained stop, opening parked segment");
                self.trip.start_segment(SegmentKind::Parked, false, None);
            }
            ParkedTransition::Resumed => {
                debug!("Motion resumed after parking");
                self.trip.start_segment(SegmentKind::NormalRiding, false, None);
            }
        }
    }

    fn apply_charging_transition(
        &mut self,
        transition: ChargingTransition,
        sample: &TelemetrySample,
    ) {
        match transition {
            ChargingTransition::None => {}
            ChargingTransition::Started => {
                let before = self.charging.before_sample().copied().unwrap_or(*sample);
                info!(
                    voltage = before.voltage,
                    percent = before.battery_percent,
                    "Charging confirmed"
                );
                self.trip.open_charging_event(ChargingEvent {
                    started_at: sample.timestamp,
                    voltage_before: before.voltage,
                    percent_before: before.battery_percent,
                    ended_at: None,
                    voltage_after: None,
                    percent_after: None,
                });
                self.trip.start_segment(SegmentKind::Charging, false, None);
            }
            ChargingTransition::Ended => {
                info!(
                    voltage = sample.voltage,
                    percent = sample.battery_percent,
                    "Charging ended, new baseline"
                );
                self.trip.close_charging_event(
                    sample.timestamp,
                    sample.voltage,
                    sample.battery_percent,
                );
                self.trip
                    .start_segment(SegmentKind::NormalRiding, true, Some("post-charge"));
                self.compensator.reinitialize(sample.voltage);
                self.milestones.reset();
            }
        }
    }

    fn record_milestones(&mut self, sample: &TelemetrySample) {
        if !(0.0..=100.0).contains(&sample.battery_percent) {
            return;
        }
        let candidates = self.milestones.observe(
            sample.battery_percent,
            sample.timestamp,
            &self.trip,
            self.settings.capacity_wh,
        );
        let mut persisted = false;
        for candidate in candidates {
            if self.history.push(candidate) {
                persisted = true;
            } else {
                debug!(
                    start = candidate.start_percent,
                    end = candidate.end_percent,
                    distance_km = candidate.distance_km,
                    "Historical segment candidate rejected"
                );
            }
        }
        if persisted {
            if let Err(e) = store::save_history(self.store.as_mut(), &self.history) {
                warn!(error = %e, "Failed to persist segment history");
            }
        }
    }

    fn recompute_due(&self, sample: &TelemetrySample, now: SystemTime) -> bool {
        let Some(last) = self.last_recompute else {
            // Always recompute on the very first sample.
            return true;
        };
        let interval = match self.state.estimate().map(|e| e.status) {
            // Progress reports, post-charge and post-reconnect recovery all
            // want a fresh estimate quickly.
            None
            | Some(EstimateStatus::InsufficientData)
            | Some(EstimateStatus::Collecting)
            | Some(EstimateStatus::Charging)
            | Some(EstimateStatus::Stale) => INSUFFICIENT_RECOMPUTE_EVERY,
            _ if sample.battery_percent < LOW_BATTERY_THRESHOLD => LOW_BATTERY_RECOMPUTE_EVERY,
            _ => HIGH_BATTERY_RECOMPUTE_EVERY,
        };
        now.duration_since(last).unwrap_or(Duration::ZERO) >= interval
    }

    fn maybe_recompute(
        &mut self,
        sample: &TelemetrySample,
        now: SystemTime,
    ) -> Result<(), EngineError> {
        if self.charging.is_charging() {
            // Keep the last range on screen, marked as charging.
            let needs_mark = self
                .state
                .estimate()
                .is_none_or(|e| e.status != EstimateStatus::Charging);
            if needs_mark {
                let marked = match self.state.estimate().cloned() {
                    Some(previous) => previous.with_status(EstimateStatus::Charging),
                    None => RangeEstimate {
                        range_km: None,
                        status: EstimateStatus::Charging,
                        confidence: 0.0,
                        efficiency_wh_per_km: None,
                        sample_count: 0,
                        band_85: None,
                        band_95: None,
                        progress: None,
                        timestamp: now,
                    },
                };
                self.state.set_estimate(marked)?;
            }
            return Ok(());
        }

        if !self.recompute_due(sample, now) {
            // Skipped cycles republish nothing: the watch channel already
            // holds the previous estimate.
            return Ok(());
        }

        match estimation::estimate_with_gate(self.estimator.as_ref(), &self.trip, self.pack(), now)
        {
            Some(mut estimate) => {
                self.apply_calibration(&mut estimate, sample.battery_percent);
                debug!(
                    status = ?estimate.status,
                    range_km = estimate.range_km,
                    confidence = estimate.confidence,
                    "Publishing estimate"
                );
                self.state.set_estimate(estimate)?;
                self.last_recompute = Some(now);
            }
            None => {
                // Degenerate numerics: keep the previous estimate rather
                // than publishing invalid numbers.
                debug!("Estimator returned no estimate, keeping previous");
                self.last_recompute = Some(now);
            }
        }
        Ok(())
    }

    fn apply_calibration(&self, estimate: &mut RangeEstimate, battery_percent: f64) {
        let (Some(range_km), Some(efficiency)) = (estimate.range_km, estimate.efficiency_wh_per_km)
        else {
            return;
        };
        let factor = calibration::calibration_factor(
            &self.history,
            battery_percent,
            efficiency,
            self.settings.calibration_enabled,
        );
        if factor == 1.0 {
            return;
        }
        estimate.range_km = Some(range_km * factor);
        for band in [&mut estimate.band_85, &mut estimate.band_95]
            .into_iter()
            .flatten()
        {
            band.lower_km *= factor;
            band.upper_km *= factor;
        }
    }

    fn publish_stats(&mut self) -> Result<(), EngineError> {
        let stats = TripStats {
            started_at: self.trip.started_at(),
            total_distance_km: self.trip.total_distance_km(),
            riding_minutes: self.trip.total_riding_time().as_secs_f64() / 60.0,
            sample_count: self.trip.sample_count(),
            segment_count: self.trip.segments().len(),
            charging_event_count: self.trip.charging_events().len(),
            milestone_count: self.milestones.milestones().len(),
            history_count: self.history.len(),
            connected: !self.connectivity.is_disconnected(),
            charging: self.charging.is_charging(),
        };
        self.state.set_stats(stats)
    }

    fn persist_recovery(&mut self, sample: &TelemetrySample, now: SystemTime) {
        let snapshot = RecoverySnapshot {
            last_sample: *sample,
            connected: !self.connectivity.is_disconnected(),
            saved_at: now,
        };
        if let Err(e) = store::save_recovery(self.store.as_mut(), &snapshot) {
            warn!(error = %e, "Failed to persist recovery snapshot");
        }
    }
}

/// Picks the plausible series cell count whose per-cell voltage is closest
/// to a mid-discharge cell.
fn detect_cell_count(pack_voltage: f64) -> u32 {
    KNOWN_CELL_COUNTS
        .into_iter()
        .min_by(|a, b| {
            let da = (pack_voltage / *a as f64 - NOMINAL_CELL_V).abs();
            let db = (pack_voltage / *b as f64 - NOMINAL_CELL_V).abs();
            da.total_cmp(&db)
        })
        .unwrap_or(crate::config::DEFAULT_CELL_COUNT)
}

/// Cloneable handle to a running engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    estimate_rx: watch::Receiver<Option<RangeEstimate>>,
    stats_rx: watch::Receiver<TripStats>,
}

impl EngineHandle {
    pub async fn submit(&self, sample: TelemetrySample) -> Result<(), EngineError> {
        self.commands
            .send(EngineCommand::Sample(sample))
            .await
            .map_err(|_| EngineError::CommandChannelClosed)
    }

    /// Resets the trip, waiting until the engine task has applied it.
    pub async fn reset(&self) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(EngineCommand::Reset { ack })
            .await
            .map_err(|_| EngineError::CommandChannelClosed)?;
        done.await.map_err(|_| EngineError::CommandChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.commands
            .send(EngineCommand::Shutdown)
            .await
            .map_err(|_| EngineError::CommandChannelClosed)
    }

    pub fn latest_estimate(&self) -> Option<RangeEstimate> {
        self.estimate_rx.borrow().clone()
    }

    pub fn latest_stats(&self) -> TripStats {
        self.stats_rx.borrow().clone()
    }
}

/// Spawns the single-consumer processing loop and returns its handle.
pub fn spawn(mut engine: Engine) -> (EngineHandle, tokio::task::JoinHandle<()>) {
    let (commands, mut rx) = mpsc::channel(256);
    let handle = EngineHandle {
        commands,
        estimate_rx: engine.subscribe_estimate(),
        stats_rx: engine.subscribe_stats(),
    };
    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Sample(sample) => {
                    if let Err(e) = engine.process_sample(sample) {
                        warn!(error = %e, "Error processing sample");
                    }
                }
                EngineCommand::Reset { ack } => {
                    if let Err(e) = engine.reset() {
                        warn!(error = %e, "Error resetting trip");
                    }
                    let _ = ack.send(());
                }
                EngineCommand::Shutdown => break,
            }
        }
        info!("Engine task stopped");
    });
    (handle, task)
}

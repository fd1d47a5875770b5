use crate::error::EngineError;
use crate::estimation::RangeEstimate;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::watch;

/// Read-only trip statistics published alongside the estimate. Distance
/// and riding time both cover the whole trip, not just the current
/// baseline window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TripStats {
    pub started_at: Option<SystemTime>,
    pub total_distance_km: f64,
    pub riding_minutes: f64,
    pub sample_count: usize,
    pub segment_count: usize,
    pub charging_event_count: usize,
    pub milestone_count: usize,
    pub history_count: usize,
    pub connected: bool,
    pub charging: bool,
}

/// Last-value-cached output of the engine. The engine task is the sole
/// writer; any number of observers read through watch receivers without
/// locking.
#[derive(Debug)]
pub struct EngineState {
    estimate: Option<RangeEstimate>,
    estimate_tx: watch::Sender<Option<RangeEstimate>>,
    stats: TripStats,
    stats_tx: watch::Sender<TripStats>,
    // Held so the channels stay open with zero external subscribers.
    _estimate_rx: watch::Receiver<Option<RangeEstimate>>,
    _stats_rx: watch::Receiver<TripStats>,
}

impl EngineState {
    pub fn new() -> Self {
        let (estimate_tx, _estimate_rx) = watch::channel(None);
        let (stats_tx, _stats_rx) = watch::channel(TripStats::default());
        Self {
            estimate: None,
            estimate_tx,
            stats: TripStats::default(),
            stats_tx,
            _estimate_rx,
            _stats_rx,
        }
    }

    pub fn estimate(&self) -> Option<&RangeEstimate> {
        self.estimate.as_ref()
    }

    pub fn subscribe_estimate(&self) -> watch::Receiver<Option<RangeEstimate>> {
        self.estimate_tx.subscribe()
    }

    pub fn set_estimate(&mut self, estimate: RangeEstimate) -> Result<(), EngineError> {
        self.estimate = Some(estimate.clone());
        self.estimate_tx
            .send(Some(estimate))
            .map_err(|_| EngineError::WatchSend)
    }

    pub fn stats(&self) -> &TripStats {
        &self.stats
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<TripStats> {
        self.stats_tx.subscribe()
    }

    pub fn set_stats(&mut self, stats: TripStats) -> Result<(), EngineError> {
        self.stats = stats.clone();
        self.stats_tx.send(stats).map_err(|_| EngineError::WatchSend)
    }

    /// Clears the published estimate as part of an atomic reset.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.estimate = None;
        self.estimate_tx
            .send(None)
            .map_err(|_| EngineError::WatchSend)?;
        self.set_stats(TripStats::default())
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::EstimateStatus;
    use std::time::UNIX_EPOCH;

    fn estimate(range_km: f64) -> RangeEstimate {
        RangeEstimate {
            range_km: Some(range_km),
            status: EstimateStatus::Valid,
            confidence: 0.8,
            efficiency_wh_per_km: Some(18.0),
            sample_count: 42,
            band_85: None,
            band_95: None,
            progress: None,
            timestamp: UNIX_EPOCH,
        }
    }

    #[test]
    fn set_estimate_updates_state_and_watch() {
        let mut state = EngineState::new();
        let receiver = state.subscribe_estimate();

        assert!(state.set_estimate(estimate(55.0)).is_ok());

        assert_eq!(state.estimate(), Some(&estimate(55.0)));
        assert_eq!(*receiver.borrow(), Some(estimate(55.0)));
    }

    #[test]
    fn set_stats_updates_state_and_watch() {
        let mut state = EngineState::new();
        let receiver = state.subscribe_stats();
        let stats = TripStats {
            total_distance_km: 12.5,
            sample_count: 240,
            connected: true,
            ..TripStats::default()
        };

        assert!(state.set_stats(stats.clone()).is_ok());

        assert_eq!(state.stats(), &stats);
        assert_eq!(*receiver.borrow(), stats);
    }

    #[test]
    fn clear_resets_both_channels() {
        let mut state = EngineState::new();
        let estimate_rx = state.subscribe_estimate();
        state.set_estimate(estimate(55.0)).expect("set estimate");

        assert!(state.clear().is_ok());

        assert!(state.estimate().is_none());
        assert!(estimate_rx.borrow().is_none());
        assert_eq!(state.stats(), &TripStats::default());
    }
}

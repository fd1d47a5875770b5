use crate::estimation::{ConfidenceBand, DataProgress, EstimateStatus};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RangeSuccessResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_km: Option<f64>,
    pub status: EstimateStatus,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency_wh_per_km: Option<f64>,
    pub sample_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_85: Option<BandResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_95: Option<BandResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BandResponse {
    pub lower_km: f64,
    pub upper_km: f64,
}

impl From<ConfidenceBand> for BandResponse {
    fn from(band: ConfidenceBand) -> Self {
        Self {
            lower_km: band.lower_km,
            upper_km: band.upper_km,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ProgressResponse {
    pub riding_minutes: f64,
    pub required_minutes: f64,
    pub distance_km: f64,
    pub required_distance_km: f64,
}

impl From<DataProgress> for ProgressResponse {
    fn from(progress: DataProgress) -> Self {
        Self {
            riding_minutes: progress.riding_minutes,
            required_minutes: progress.required_minutes,
            distance_km: progress.distance_km,
            required_distance_km: progress.required_distance_km,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RangeErrorResponse {
    pub error_code: RangeErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeErrorCode {
    NoData,
    InternalError,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StatsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub total_distance_km: f64,
    pub riding_minutes: f64,
    pub sample_count: usize,
    pub segment_count: usize,
    pub charging_event_count: usize,
    pub milestone_count: usize,
    pub history_count: usize,
    pub connected: bool,
    pub charging: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ResetResponse {
    pub status: ResetStatus,
    pub timestamp: String,
}

/// A failed reset answers with [`RangeErrorResponse`] instead, so the only
/// status this body ever carries is the successful one.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ResetStatus {
    Ok,
}

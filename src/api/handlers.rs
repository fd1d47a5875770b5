use crate::api::responses::{
    RangeErrorCode, RangeErrorResponse, RangeSuccessResponse, ResetResponse, ResetStatus,
    StatsResponse,
};
use crate::engine::EngineHandle;
use crate::telemetry::TelemetrySample;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::error;

pub enum RangeResponse {
    Success(RangeSuccessResponse),
    Error {
        status: StatusCode,
        body: RangeErrorResponse,
    },
}

impl IntoResponse for RangeResponse {
    fn into_response(self) -> Response {
        match self {
            RangeResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            RangeResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_range(State(handle): State<EngineHandle>) -> impl IntoResponse {
    let now = format_timestamp(SystemTime::now());
    match handle.latest_estimate() {
        Some(estimate) => RangeResponse::Success(RangeSuccessResponse {
            range_km: estimate.range_km,
            status: estimate.status,
            confidence: estimate.confidence,
            efficiency_wh_per_km: estimate.efficiency_wh_per_km,
            sample_count: estimate.sample_count,
            band_85: estimate.band_85.map(Into::into),
            band_95: estimate.band_95.map(Into::into),
            progress: estimate.progress.map(Into::into),
            timestamp: format_timestamp(estimate.timestamp),
        }),
        None => RangeResponse::Error {
            status: StatusCode::NOT_FOUND,
            body: RangeErrorResponse {
                error_code: RangeErrorCode::NoData,
                error_message: "No estimate published yet".to_string(),
                timestamp: now,
            },
        },
    }
}

pub async fn get_stats(State(handle): State<EngineHandle>) -> impl IntoResponse {
    let stats = handle.latest_stats();
    Json(StatsResponse {
        started_at: stats.started_at.map(format_timestamp),
        total_distance_km: stats.total_distance_km,
        riding_minutes: stats.riding_minutes,
        sample_count: stats.sample_count,
        segment_count: stats.segment_count,
        charging_event_count: stats.charging_event_count,
        milestone_count: stats.milestone_count,
        history_count: stats.history_count,
        connected: stats.connected,
        charging: stats.charging,
        timestamp: format_timestamp(SystemTime::now()),
    })
}

pub async fn post_reset(State(handle): State<EngineHandle>) -> Response {
    let timestamp = format_timestamp(SystemTime::now());
    match handle.reset().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ResetResponse {
                status: ResetStatus::Ok,
                timestamp,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Reset command failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RangeErrorResponse {
                    error_code: RangeErrorCode::InternalError,
                    error_message: "Engine task is not running".to_string(),
                    timestamp,
                }),
            )
                .into_response()
        }
    }
}

/// Accepts one pushed telemetry sample and queues it onto the engine task.
pub async fn post_telemetry(
    State(handle): State<EngineHandle>,
    Json(sample): Json<TelemetrySample>,
) -> impl IntoResponse {
    match handle.submit(sample).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            error!(error = %e, "Failed to queue telemetry sample");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

fn format_timestamp(timestamp: SystemTime) -> String {
    OffsetDateTime::from(timestamp)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".to_string())
}

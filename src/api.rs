//! HTTP surface for the scoring and playbook service. The router is built
//! here so integration tests can drive it without binding a socket; the
//! binary adds process-level routes such as `/metrics` on top.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::error::AppError;
use crate::ingest::service::{BulkIngestReport, IngestService};
use crate::reporting::{self, ChurnReasonRollup};
use crate::store::{CouponError, CouponRepository, RecordStore};

#[derive(Clone)]
pub struct ApiState {
    pub readiness: Arc<AtomicBool>,
    pub service: Arc<IngestService>,
    pub records: Arc<dyn RecordStore>,
    pub coupons: Arc<dyn CouponRepository>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/api/v1/customers/track", post(track_endpoint))
        .route("/api/v1/customers/bulk", post(bulk_endpoint))
        .route("/api/v1/customers/:customer_id/score", get(score_endpoint))
        .route("/api/v1/reports/churn-reasons", get(reasons_endpoint))
        .route("/api/v1/coupons/:code/redeem", post(redeem_endpoint))
        .with_state(state)
}

async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(State(state): State<ApiState>) -> impl IntoResponse {
    if state.readiness.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        )
    }
}

async fn track_endpoint(
    State(state): State<ApiState>,
    Json(payload): Json<Map<String, Value>>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.service.ingest_event(&payload)?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

async fn bulk_endpoint(
    State(state): State<ApiState>,
    body: String,
) -> Result<Json<BulkIngestReport>, AppError> {
    let report = state
        .service
        .clone()
        .ingest_bulk(Cursor::new(body.into_bytes()))
        .await?;
    Ok(Json(report))
}

async fn score_endpoint(
    State(state): State<ApiState>,
    Path(customer_id): Path<String>,
) -> Result<Response, AppError> {
    match state.records.fetch(&customer_id)? {
        Some(current) => {
            let mut body =
                serde_json::to_value(current.scored.view()).unwrap_or_else(|_| json!({}));
            if let Some(object) = body.as_object_mut() {
                object.insert("customer_id".to_string(), json!(customer_id));
                object.insert("tags".to_string(), json!(current.tags));
            }
            Ok((StatusCode::OK, Json(body)).into_response())
        }
        None => {
            let payload = json!({
                "customer_id": customer_id,
                "error": "customer has not been scored",
            });
            Ok((StatusCode::NOT_FOUND, Json(payload)).into_response())
        }
    }
}

async fn reasons_endpoint(
    State(state): State<ApiState>,
) -> Result<Json<ChurnReasonRollup>, AppError> {
    let rollup = reporting::aggregate(&state.records.all_scored()?);
    Ok(Json(rollup))
}

async fn redeem_endpoint(
    State(state): State<ApiState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    match state.coupons.redeem(&code, Utc::now()) {
        Ok(coupon) => Ok((StatusCode::OK, Json(coupon)).into_response()),
        Err(err @ CouponError::NotFound) => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "code": code, "error": err.to_string() })),
        )
            .into_response()),
        Err(err @ (CouponError::Expired | CouponError::AlreadyRedeemed)) => Ok((
            StatusCode::CONFLICT,
            Json(json!({ "code": code, "error": err.to_string() })),
        )
            .into_response()),
        Err(CouponError::Store(err)) => Err(err.into()),
    }
}

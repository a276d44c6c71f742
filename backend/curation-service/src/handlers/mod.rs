pub mod selection;
pub mod subjects;

pub use selection::{select, SelectRequest};
pub use subjects::{
    curate, decay, feedback, record_impressions, score, CurateRequest, DecayRequest,
    FeedbackRequest, ImpressionsRequest, ScoreRequest,
};

use crate::config::DecayConfig;
use crate::db::{ClickLog, ImpressionStore};
use crate::error::AppError;
use crate::models::{CandidateItem, InteractionHistory, SelectionResult};
use crate::services::curation::CurationService;
use crate::services::decay::RewardDecayProcess;
use crate::services::vector_math::is_finite_vector;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::{get, web, HttpResponse, ResponseError};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Shared handler state
pub struct AppState {
    pub service_name: String,
    pub curation: Arc<CurationService>,
    pub decay: Arc<RewardDecayProcess>,
    pub impressions: Arc<dyn ImpressionStore>,
    pub clicks: Arc<dyn ClickLog>,
    pub decay_config: DecayConfig,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(metrics)
        .service(score)
        .service(feedback)
        .service(record_impressions)
        .service(decay)
        .service(curate)
        .service(select);
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    service: &'a str,
}

/// GET /health
#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        service: &state.service_name,
    })
}

/// GET /metrics
#[get("/metrics")]
pub async fn metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(crate::metrics::render())
}

#[derive(Debug, Serialize)]
pub struct SelectedItemResponse {
    pub id: String,
    pub bucket: crate::models::Bucket,
    pub scores: crate::models::ComponentScores,
}

#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    pub items: Vec<SelectedItemResponse>,
    pub match_score: f64,
    pub stats: crate::models::SelectionStats,
}

impl From<SelectionResult> for SelectionResponse {
    fn from(result: SelectionResult) -> Self {
        Self {
            items: result
                .items
                .into_iter()
                .map(|i| SelectedItemResponse {
                    id: i.item.id,
                    bucket: i.bucket,
                    scores: i.scores,
                })
                .collect(),
            match_score: result.match_score,
            stats: result.stats,
        }
    }
}

// ---------------------------------------------------------------------------
// Request guards
// ---------------------------------------------------------------------------

pub const CORRELATION_HEADER: &str = "x-correlation-id";
pub const API_KEY_HEADER: &str = "x-internal-api-key";

/// Caller-supplied correlation id, or a fresh one
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Health and metrics stay open; everything else needs the key when configured
pub fn authorize(path: &str, headers: &HeaderMap, expected_key: Option<&str>) -> Result<(), AppError> {
    let Some(expected) = expected_key else {
        return Ok(());
    };
    if path == "/health" || path == "/metrics" {
        return Ok(());
    }

    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        return Err(AppError::Unauthorized("invalid internal api key".into()));
    }
    Ok(())
}

/// Echo the correlation id on a response
pub fn tag_correlation<B>(mut res: ServiceResponse<B>, correlation: &str) -> ServiceResponse<B> {
    if let Ok(value) = HeaderValue::from_str(correlation) {
        res.headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    res
}

/// Short-circuit a request that failed `authorize`
pub fn reject(req: ServiceRequest, err: AppError, correlation: &str) -> ServiceResponse {
    let res = req.into_response(err.error_response());
    tag_correlation(res, correlation)
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

pub(crate) fn validate_subject(subject_id: &str) -> Result<(), AppError> {
    if subject_id.trim().is_empty() {
        return Err(AppError::Validation("subject must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn validate_embedding(field: &str, embedding: &[f64]) -> Result<(), AppError> {
    if embedding.is_empty() {
        return Err(AppError::Validation(format!("{field}: embedding is empty")));
    }
    if !is_finite_vector(embedding) {
        return Err(AppError::Validation(format!(
            "{field}: embedding contains non-finite values"
        )));
    }
    Ok(())
}

pub(crate) fn validate_pool(pool: &[CandidateItem]) -> Result<(), AppError> {
    for item in pool {
        if item.id.is_empty() {
            return Err(AppError::Validation("candidate id must not be empty".into()));
        }
        validate_embedding(&item.id, &item.embedding)?;
    }
    Ok(())
}

/// Fill in `normalized_age` from `published_at` where the caller left it out
pub(crate) fn resolve_ages(pool: &mut [CandidateItem]) {
    let now = Utc::now();
    for item in pool.iter_mut() {
        item.resolve_age(now);
    }
}

pub(crate) fn validate_history(history: &InteractionHistory) -> Result<(), AppError> {
    for e in &history.recent_positive {
        validate_embedding("recent_positive", e)?;
    }
    for e in &history.recent_negative {
        validate_embedding("recent_negative", e)?;
    }
    Ok(())
}

/// `count <= 0` selects nothing; above `max` is rejected
pub(crate) fn validate_count(count: i64, max: usize) -> Result<usize, AppError> {
    if count <= 0 {
        return Ok(0);
    }
    let count = count as usize;
    if count > max {
        return Err(AppError::Validation(format!(
            "count {count} exceeds maximum {max}"
        )));
    }
    Ok(count)
}

use super::{
    resolve_ages, validate_count, validate_embedding, validate_history, validate_pool, AppState,
    SelectionResponse,
};
use crate::error::AppError;
use crate::models::{CandidateItem, Embedding, InteractionHistory};
use actix_web::{post, web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub pool: Vec<CandidateItem>,
    pub profile: Vec<f64>,
    #[serde(default)]
    pub recent_positive: Vec<Embedding>,
    #[serde(default)]
    pub recent_negative: Vec<Embedding>,
    pub count: i64,
}

/// POST /v1/select
/// Diverse selection without a bandit (every UCB is 0)
#[post("/v1/select")]
pub async fn select(
    state: web::Data<AppState>,
    body: web::Json<SelectRequest>,
) -> Result<HttpResponse, AppError> {
    let mut request = body.into_inner();
    resolve_ages(&mut request.pool);
    let history = InteractionHistory {
        recent_positive: request.recent_positive,
        recent_negative: request.recent_negative,
    };

    validate_pool(&request.pool)?;
    validate_embedding("profile", &request.profile)?;
    validate_history(&history)?;
    let count = validate_count(request.count, state.curation.selection_config().max_count)?;

    let result = state
        .curation
        .select(&request.pool, &request.profile, &history, count);

    Ok(HttpResponse::Ok().json(SelectionResponse::from(result)))
}

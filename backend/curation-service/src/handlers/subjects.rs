use super::{
    resolve_ages, validate_count, validate_embedding, validate_history, validate_pool,
    validate_subject, AppState, SelectionResponse,
};
use crate::error::AppError;
use crate::models::{
    CandidateItem, ClickEvent, DecayOutcome, InteractionHistory, PendingImpression, UcbScore,
    UserProfile,
};
use actix_web::{post, web, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub candidates: Vec<CandidateItem>,
    /// Observed click-through rate; lower CTR widens exploration
    #[serde(default)]
    pub user_ctr: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub scores: Vec<UcbScore>,
    pub skipped: usize,
    pub degraded: bool,
}

/// POST /v1/subjects/{subject}/score
/// UCB per candidate, in request order
#[post("/v1/subjects/{subject}/score")]
pub async fn score(
    state: web::Data<AppState>,
    subject: web::Path<String>,
    body: web::Json<ScoreRequest>,
) -> Result<HttpResponse, AppError> {
    let subject = subject.into_inner();
    validate_subject(&subject)?;

    let request = body.into_inner();
    let user_ctr = request.user_ctr;
    let candidates = request.candidates_with_recency();
    validate_pool(&candidates)?;

    let outcome = state
        .curation
        .bandit()
        .score(&subject, &candidates, user_ctr)
        .await?;

    Ok(HttpResponse::Ok().json(ScoreResponse {
        scores: outcome.scores,
        skipped: outcome.skipped,
        degraded: outcome.degraded,
    }))
}

impl ScoreRequest {
    fn candidates_with_recency(mut self) -> Vec<CandidateItem> {
        resolve_ages(&mut self.candidates);
        self.candidates
            .into_iter()
            .map(|mut item| {
                item.refresh_recency();
                item
            })
            .collect()
    }
}

/// Feedback for one item. `click` and `interest` carry reward 1.0.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackRequest {
    Click {
        item_id: String,
        embedding: Vec<f64>,
        #[serde(default)]
        clicked_at: Option<DateTime<Utc>>,
    },
    Interest {
        embedding: Vec<f64>,
    },
    Reward {
        embedding: Vec<f64>,
        reward: f64,
    },
}

impl FeedbackRequest {
    fn embedding(&self) -> &[f64] {
        match self {
            FeedbackRequest::Click { embedding, .. }
            | FeedbackRequest::Interest { embedding }
            | FeedbackRequest::Reward { embedding, .. } => embedding,
        }
    }

    fn reward(&self) -> f64 {
        match self {
            FeedbackRequest::Click { .. } | FeedbackRequest::Interest { .. } => 1.0,
            FeedbackRequest::Reward { reward, .. } => *reward,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub outcome: &'static str,
}

/// POST /v1/subjects/{subject}/feedback
#[post("/v1/subjects/{subject}/feedback")]
pub async fn feedback(
    state: web::Data<AppState>,
    subject: web::Path<String>,
    body: web::Json<FeedbackRequest>,
) -> Result<HttpResponse, AppError> {
    let subject = subject.into_inner();
    validate_subject(&subject)?;

    let request = body.into_inner();
    validate_embedding("embedding", request.embedding())?;
    if !request.reward().is_finite() {
        return Err(AppError::Validation("reward must be finite".into()));
    }

    // The click log is what decay consults, so record it before the update
    if let FeedbackRequest::Click {
        item_id,
        clicked_at,
        ..
    } = &request
    {
        if item_id.is_empty() {
            return Err(AppError::Validation("item_id must not be empty".into()));
        }
        state
            .clicks
            .record_click(&ClickEvent {
                subject_id: subject.clone(),
                item_id: item_id.clone(),
                clicked_at: clicked_at.unwrap_or_else(Utc::now),
            })
            .await?;
    }

    let outcome = state
        .curation
        .bandit()
        .update(&subject, request.embedding(), request.reward())
        .await?;

    Ok(HttpResponse::Ok().json(FeedbackResponse {
        outcome: outcome.as_str(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeliveredItem {
    pub item_id: String,
    pub embedding: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ImpressionsRequest {
    pub items: Vec<DeliveredItem>,
    /// Delivery time; defaults to now
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ImpressionsResponse {
    pub recorded: usize,
}

/// POST /v1/subjects/{subject}/impressions
/// Register delivered items so unclicked ones can decay later
#[post("/v1/subjects/{subject}/impressions")]
pub async fn record_impressions(
    state: web::Data<AppState>,
    subject: web::Path<String>,
    body: web::Json<ImpressionsRequest>,
) -> Result<HttpResponse, AppError> {
    let subject = subject.into_inner();
    validate_subject(&subject)?;

    let request = body.into_inner();
    for item in &request.items {
        if item.item_id.is_empty() {
            return Err(AppError::Validation("item_id must not be empty".into()));
        }
        validate_embedding(&item.item_id, &item.embedding)?;
    }

    let sent_at = request.sent_at.unwrap_or_else(Utc::now);
    let recorded = request.items.len();
    for item in request.items {
        state
            .impressions
            .append(&PendingImpression {
                subject_id: subject.clone(),
                item_id: item.item_id,
                embedding: item.embedding,
                sent_at,
            })
            .await?;
    }

    debug!(subject = %subject, recorded = recorded, "Impressions recorded");
    Ok(HttpResponse::Ok().json(ImpressionsResponse { recorded }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DecayRequest {
    /// Falls back to the configured TTL
    #[serde(default)]
    pub ttl_ms: Option<i64>,
}

/// POST /v1/subjects/{subject}/decay
#[post("/v1/subjects/{subject}/decay")]
pub async fn decay(
    state: web::Data<AppState>,
    subject: web::Path<String>,
    body: Option<web::Json<DecayRequest>>,
) -> Result<HttpResponse, AppError> {
    let subject = subject.into_inner();
    validate_subject(&subject)?;

    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let ttl = match request.ttl_ms {
        Some(ms) => Duration::try_milliseconds(ms)
            .ok_or_else(|| AppError::Validation(format!("ttl_ms {ms} is out of range")))?,
        None => state.decay_config.ttl(),
    };

    let outcome: DecayOutcome = state.decay.decay(&subject, ttl).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CurateRequest {
    pub pool: Vec<CandidateItem>,
    pub profile: Vec<f64>,
    #[serde(default)]
    pub history: InteractionHistory,
    pub count: i64,
    #[serde(default)]
    pub user_ctr: Option<f64>,
    /// Register the selected items as pending impressions
    #[serde(default)]
    pub record_impressions: bool,
}

/// POST /v1/subjects/{subject}/curate
/// Bandit scoring and diverse selection in one call
#[post("/v1/subjects/{subject}/curate")]
pub async fn curate(
    state: web::Data<AppState>,
    subject: web::Path<String>,
    body: web::Json<CurateRequest>,
) -> Result<HttpResponse, AppError> {
    let subject = subject.into_inner();
    validate_subject(&subject)?;

    let mut request = body.into_inner();
    resolve_ages(&mut request.pool);
    validate_pool(&request.pool)?;
    validate_embedding("profile", &request.profile)?;
    validate_history(&request.history)?;
    let count = validate_count(request.count, state.curation.selection_config().max_count)?;

    let profile = UserProfile::new(subject.as_str(), request.profile);
    let result = state
        .curation
        .curate(
            &profile,
            &request.pool,
            &request.history,
            count,
            request.user_ctr,
        )
        .await?;

    if request.record_impressions {
        let sent_at = Utc::now();
        for selected in &result.items {
            state
                .impressions
                .append(&PendingImpression {
                    subject_id: subject.clone(),
                    item_id: selected.item.id.clone(),
                    embedding: selected.item.embedding.clone(),
                    sent_at,
                })
                .await?;
        }
    }

    Ok(HttpResponse::Ok().json(SelectionResponse::from(result)))
}

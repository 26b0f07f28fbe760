//! Cost summary endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::services::{CostPeriod, CostSummary};
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CostQuery {
    /// today | week | month | all; anything else means month
    pub period: Option<String>,
}

/// GET /api/v1/costs
pub async fn get_costs(
    State(state): State<AppState>,
    Query(query): Query<CostQuery>,
) -> ApiResult<Json<CostSummary>> {
    let period = query
        .period
        .as_deref()
        .map(|p| p.parse::<CostPeriod>().unwrap_or_default())
        .unwrap_or_default();

    Ok(Json(state.costs.summary(period).await?))
}

pub fn cost_routes() -> Router<AppState> {
    Router::new().route("/api/v1/costs", get(get_costs))
}

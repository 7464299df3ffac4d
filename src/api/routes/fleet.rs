//! Fleet view endpoint

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::FleetResponse};

/// GET /api/fleet
///
/// Aggregates every known instance; counts as a visit
pub async fn get_fleet(State(state): State<ApiState>) -> ApiResult<Json<FleetResponse>> {
    let view = state.aggregator.aggregate(&state.instance_id).await?;

    let health = view
        .liveness
        .iter()
        .map(|(id, liveness)| (id.clone(), liveness.health(state.stale_after)))
        .collect();

    Ok(Json(FleetResponse { view, health }))
}

//! Own instance information

use axum::{Json, extract::State};

use crate::InstanceSnapshot;
use crate::api::{error::ApiResult, state::ApiState, types::InfoResponse};
use crate::store::{VISITOR_COUNT_KEY, instance_info_key};

/// GET /api/info
///
/// Counts a visit and returns the last snapshot this instance reported
pub async fn get_info(State(state): State<ApiState>) -> ApiResult<Json<InfoResponse>> {
    let visitor_count = state.store.increment(VISITOR_COUNT_KEY).await?;
    let fields = state
        .store
        .get_all_fields(&instance_info_key(&state.instance_id))
        .await?;

    Ok(Json(InfoResponse {
        snapshot: InstanceSnapshot::from_fields(&fields),
        visitor_count,
        instance_index: state.instance_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

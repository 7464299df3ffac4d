//! Heartbeat listing endpoint

use axum::{Json, extract::State};

use crate::api::{
    error::ApiResult,
    state::ApiState,
    types::{HeartbeatEntry, HeartbeatsResponse},
};
use crate::store::HEARTBEATS_KEY;
use crate::util::now_ms;

/// GET /api/heartbeats
///
/// Lists every known instance with its last heartbeat, sorted by id
pub async fn list_heartbeats(State(state): State<ApiState>) -> ApiResult<Json<HeartbeatsResponse>> {
    let heartbeats = state.store.get_all_fields(HEARTBEATS_KEY).await?;
    let now = now_ms();

    let mut entries: Vec<HeartbeatEntry> = heartbeats
        .into_iter()
        .map(|(instance_index, raw)| {
            let last_heartbeat = raw.trim().parse::<i64>().ok();
            HeartbeatEntry {
                instance_index,
                last_heartbeat,
                seconds_ago: last_heartbeat.map(|ts| (now.saturating_sub(ts).max(0) / 1000) as u64),
            }
        })
        .collect();
    entries.sort_by(|a, b| a.instance_index.cmp(&b.instance_index));

    Ok(Json(HeartbeatsResponse {
        count: entries.len(),
        heartbeats: entries,
    }))
}

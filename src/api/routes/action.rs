//! Instruction dispatch endpoint

use axum::{Json, extract::State};
use tracing::{error, info};

use crate::actors::command_bus::dispatch;
use crate::actors::messages::InstructionKind;
use crate::api::{
    state::ApiState,
    types::{ActionRequest, ActionResponse},
};

/// POST /api/action
///
/// Publishes `{"type": action}` to the target instance's channel. Delivery
/// is fire-and-forget, so the response is the same whether or not the
/// publish reached anyone.
pub async fn post_action(
    State(state): State<ApiState>,
    Json(request): Json<ActionRequest>,
) -> Json<ActionResponse> {
    info!(
        "dispatching {} to instance {}",
        request.action, request.instance_index
    );

    let kind = InstructionKind::from(request.action.as_str());
    if let Err(e) = dispatch(state.store.as_ref(), &request.instance_index, &kind).await {
        error!("failed to publish action {}: {e}", request.action);
    }

    Json(ActionResponse {
        message: format!("Action {} performed", request.action),
    })
}

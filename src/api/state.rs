//! API shared state

use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::Aggregator;
use crate::store::SharedStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Store used for the instance's own reads and for publishing actions
    pub store: Arc<dyn SharedStore>,

    /// Builds the fleet view on `/api/fleet`
    pub aggregator: Aggregator,

    /// Id of the instance serving the request
    pub instance_id: String,

    /// Heartbeat age after which an instance is reported as stale
    pub stale_after: Duration,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn SharedStore>,
        instance_id: impl Into<String>,
        stale_after: Duration,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(Arc::clone(&store)),
            store,
            instance_id: instance_id.into(),
            stale_after,
        }
    }
}

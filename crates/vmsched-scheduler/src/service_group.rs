//! Heartbeat-based service liveness.
//!
//! A service is up when its last heartbeat is no older than the configured
//! down time.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use vmsched_state::{ServiceRecord, store::epoch_secs};

use crate::collaborators::ServiceGroup;

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct HeartbeatServiceGroup {
    down_time: Duration,
    clock: Clock,
}

impl HeartbeatServiceGroup {
    pub fn new(down_time: Duration) -> Self {
        Self {
            down_time,
            clock: Arc::new(epoch_secs),
        }
    }

    /// Replace the wall clock (unix seconds). Used by tests.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

impl ServiceGroup for HeartbeatServiceGroup {
    fn service_is_up(&self, service: &ServiceRecord) -> bool {
        let elapsed = (self.clock)().saturating_sub(service.last_heartbeat);
        let up = elapsed <= self.down_time.as_secs();
        if !up {
            debug!(
                host = %service.host,
                topic = %service.topic,
                elapsed,
                "service heartbeat is stale"
            );
        }
        up
    }
}

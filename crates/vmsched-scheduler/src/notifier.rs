//! Notifier that emits events as structured log records.

use tracing::{error, info};
use vmsched_core::RequestContext;

use crate::collaborators::{CollabResult, Notifier};

pub struct LogNotifier {
    publisher_id: String,
}

impl LogNotifier {
    pub fn new(publisher_id: impl Into<String>) -> Self {
        Self {
            publisher_id: publisher_id.into(),
        }
    }
}

impl Notifier for LogNotifier {
    fn info(&self, ctx: &RequestContext, event_type: &str, payload: serde_json::Value) -> CollabResult<()> {
        info!(
            target: "vmsched::notification",
            publisher = %self.publisher_id,
            %event_type,
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            %payload,
            "notification"
        );
        Ok(())
    }

    fn error(&self, ctx: &RequestContext, event_type: &str, payload: serde_json::Value) -> CollabResult<()> {
        error!(
            target: "vmsched::notification",
            publisher = %self.publisher_id,
            %event_type,
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            %payload,
            "notification"
        );
        Ok(())
    }
}

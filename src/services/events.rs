use crate::models::events::SessionEvent;

/// Fire-and-forget lifecycle sink. Implementations must return quickly and
/// never fail the caller; the pipeline does not block on event delivery.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// Default sink: structured log lines under the `spool::events` target,
/// which downstream collectors can tail.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SessionEvent) {
        tracing::info!(
            target: "spool::events",
            event = event.name(),
            upload_id = %event.upload_id(),
            "session lifecycle"
        );
    }
}

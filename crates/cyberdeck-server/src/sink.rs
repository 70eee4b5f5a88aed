//! Persistence sink for status time series.

use chrono::Utc;
use cyberdeck_core::Status;
use tracing::trace;

/// Receives status copies after every update. Implementations must not
/// block the caller for long and must not fail loudly.
pub trait PersistenceSink: Send + Sync {
    fn dump_data(&self, id: &str, status: &Status);
}

/// Emits each dump as a structured `trace` event.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl PersistenceSink for TracingSink {
    fn dump_data(&self, id: &str, status: &Status) {
        trace!(
            target: "cyberdeck::persistence",
            id,
            timestamp = %Utc::now().to_rfc3339(),
            fields = %status.to_json(),
            "dump_data"
        );
    }
}

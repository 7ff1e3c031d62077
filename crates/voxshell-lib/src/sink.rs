//! Diagnostic sink for messages the browser client posts to `/log`.

use voxshell_core::types::LogEntry;

/// Fire-and-forget receiver for client diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, client_ip: &str, entry: LogEntry);
}

/// Writes client diagnostics into the process log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, client_ip: &str, entry: LogEntry) {
        tracing::info!(client_ip, msg = %entry.msg, req = %entry.req, "client log");
    }
}

/// Advisory events the engine reports but does not fail on (spec.md §7:
/// `Redacted` is a signal, not an error). Hosts can implement this to
/// surface redaction events to a user; the default just logs.
pub trait DiagnosticSink: Send + Sync {
    fn redacted(&self, memory_id: Option<i64>, pattern_count: usize);
}

/// Logs via `tracing`, matching how the rest of the engine reports
/// non-fatal conditions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn redacted(&self, memory_id: Option<i64>, pattern_count: usize) {
        tracing::warn!(
            memory_id = ?memory_id,
            pattern_count,
            "sensitive content redacted before storage"
        );
    }
}

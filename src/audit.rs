use uuid::Uuid;

/// Receives one line per storage mutation.
///
/// Writes must not block or fail the calling operation.
pub trait AuditLogSink: Send + Sync {
    fn write_audit_log(&self, message: &str, actor_id: Option<Uuid>, workspace_id: Option<Uuid>);
}

/// Emits audit entries as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLogSink for TracingAuditLog {
    fn write_audit_log(&self, message: &str, actor_id: Option<Uuid>, workspace_id: Option<Uuid>) {
        tracing::info!(
            target: "storages::audit",
            actor_id = ?actor_id,
            workspace_id = ?workspace_id,
            "{}",
            message
        );
    }
}

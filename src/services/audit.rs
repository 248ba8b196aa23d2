use serde_json::Value;
use sqlx::PgPool;

/// Append an audit-trail row. Fire-and-forget: a failed audit write is
/// logged and never fails the primary operation.
pub async fn write_audit_log(
    pool: Option<&PgPool>,
    user_id: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    before_state: Option<Value>,
    after_state: Option<Value>,
) {
    let Some(pool) = pool else {
        return;
    };

    let result = sqlx::query(
        "INSERT INTO audit_logs (user_id, action, entity_type, entity_id, before_state, after_state)
         VALUES ($1::uuid, $2, $3, $4::uuid, $5, $6)",
    )
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(before_state)
    .bind(after_state)
    .execute(pool)
    .await;

    if let Err(error) = result {
        tracing::warn!(
            action,
            entity_type,
            error = %error,
            "Failed to write audit log entry"
        );
    }
}

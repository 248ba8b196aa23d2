use serde_json::{json, Map, Value};
use sqlx::{PgConnection, PgPool, Row};

use crate::error::AppError;
use crate::repository::table_service::{create_row_tx, update_row_tx};

/// The three derived aggregates of a payment plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanTotals {
    pub scheduled: f64,
    pub paid: f64,
    pub pending: f64,
}

impl PlanTotals {
    pub fn new(scheduled: f64, paid: f64) -> Self {
        let scheduled = round2(scheduled);
        let paid = round2(paid);
        Self {
            scheduled,
            paid,
            pending: round2(scheduled - paid),
        }
    }

    pub const ZERO: PlanTotals = PlanTotals {
        scheduled: 0.0,
        paid: 0.0,
        pending: 0.0,
    };
}

/// Recompute a plan's totals from its installment rows and persist them.
///
/// Always a full SUM over the live rows, never arithmetic on the previous
/// totals; runs inside the caller's transaction so readers only ever see the
/// aggregates in step with the installments.
pub async fn recompute_plan_totals(
    conn: &mut PgConnection,
    plan_id: &str,
) -> Result<PlanTotals, AppError> {
    let sums = sqlx::query(
        "SELECT COALESCE(SUM(scheduled_amount), 0)::float8 AS scheduled,
                COALESCE(SUM(paid_amount), 0)::float8 AS paid
         FROM plan_payments
         WHERE plan_id = $1::uuid",
    )
    .bind(plan_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|error| AppError::Dependency(format!("plan totals query: {error}")))?;

    let totals = PlanTotals::new(
        sums.try_get::<f64, _>("scheduled").unwrap_or(0.0),
        sums.try_get::<f64, _>("paid").unwrap_or(0.0),
    );

    let updated = sqlx::query(
        "UPDATE payment_plans
         SET total_scheduled_amount = $2,
             total_paid_amount = $3,
             total_pending_amount = $4
         WHERE id = $1::uuid",
    )
    .bind(plan_id)
    .bind(totals.scheduled)
    .bind(totals.paid)
    .bind(totals.pending)
    .execute(&mut *conn)
    .await
    .map_err(|error| AppError::Dependency(format!("plan totals update: {error}")))?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Payment plan not found.".to_string()));
    }
    Ok(totals)
}

/// Create the plan for the original contract. One per client; a second
/// attempt is a conflict, not an update.
pub async fn create_original_plan(
    pool: &PgPool,
    client_id: &str,
    mut fields: Map<String, Value>,
) -> Result<Value, AppError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|error| AppError::Dependency(format!("txn begin: {error}")))?;

    ensure_client_exists(&mut tx, client_id).await?;

    let existing = sqlx::query(
        "SELECT 1 FROM payment_plans
         WHERE client_id = $1::uuid AND contract_type = 'original'",
    )
    .bind(client_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|error| AppError::Dependency(format!("plan lookup: {error}")))?;
    if existing.is_some() {
        return Err(AppError::Conflict(
            "This client already has a payment plan for the original contract.".to_string(),
        ));
    }

    insert_plan_defaults(&mut fields, client_id, "original");
    let plan = create_row_tx(&mut tx, "payment_plans", &fields).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("txn commit: {error}")))?;
    Ok(plan)
}

/// Create or update the plan attached to one renewal. The plan is created
/// lazily the first time an amount/frequency is set for that renewal and
/// updated afterwards; the two paths are selected by an existence check.
pub async fn set_renewal_plan(
    pool: &PgPool,
    client_id: &str,
    renewal_id: &str,
    fields: Map<String, Value>,
) -> Result<(Value, bool), AppError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|error| AppError::Dependency(format!("txn begin: {error}")))?;

    let renewal = sqlx::query(
        "SELECT 1 FROM renewals WHERE id = $1::uuid AND client_id = $2::uuid",
    )
    .bind(renewal_id)
    .bind(client_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|error| AppError::Dependency(format!("renewal lookup: {error}")))?;
    if renewal.is_none() {
        return Err(AppError::NotFound(
            "Renewal not found for this client.".to_string(),
        ));
    }

    let existing = sqlx::query(
        "SELECT id::text AS id FROM payment_plans
         WHERE client_id = $1::uuid AND renewal_id = $2::uuid",
    )
    .bind(client_id)
    .bind(renewal_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|error| AppError::Dependency(format!("plan lookup: {error}")))?
    .and_then(|row| row.try_get::<String, _>("id").ok());

    let (plan, created) = match existing {
        Some(plan_id) => {
            if fields.is_empty() {
                return Err(AppError::BadRequest("No fields to update.".to_string()));
            }
            let plan = update_row_tx(&mut tx, "payment_plans", &plan_id, &fields, "id").await?;
            (plan, false)
        }
        None => {
            let mut payload = fields;
            payload.insert(
                "renewal_id".to_string(),
                Value::String(renewal_id.to_string()),
            );
            insert_plan_defaults(&mut payload, client_id, "renewal");
            let plan = create_row_tx(&mut tx, "payment_plans", &payload).await?;
            (plan, true)
        }
    };

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("txn commit: {error}")))?;
    Ok((plan, created))
}

/// Insert a batch of installments and recompute the plan totals, all in one
/// transaction.
pub async fn add_installments(
    pool: &PgPool,
    plan_id: &str,
    installments: Vec<Map<String, Value>>,
) -> Result<(Vec<Value>, PlanTotals), AppError> {
    if installments.is_empty() {
        return Err(AppError::BadRequest(
            "At least one installment is required.".to_string(),
        ));
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|error| AppError::Dependency(format!("txn begin: {error}")))?;

    ensure_plan_exists(&mut tx, plan_id).await?;

    let mut created = Vec::with_capacity(installments.len());
    for mut payload in installments {
        payload.insert("plan_id".to_string(), Value::String(plan_id.to_string()));
        created.push(create_row_tx(&mut tx, "plan_payments", &payload).await?);
    }

    let totals = recompute_plan_totals(&mut tx, plan_id).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("txn commit: {error}")))?;
    Ok((created, totals))
}

/// Patch one installment and recompute the plan totals in one transaction.
pub async fn update_installment(
    pool: &PgPool,
    plan_id: &str,
    installment_id: &str,
    patch: Map<String, Value>,
) -> Result<(Value, PlanTotals), AppError> {
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|error| AppError::Dependency(format!("txn begin: {error}")))?;

    ensure_installment_in_plan(&mut tx, plan_id, installment_id).await?;
    let updated = update_row_tx(&mut tx, "plan_payments", installment_id, &patch, "id").await?;
    let totals = recompute_plan_totals(&mut tx, plan_id).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("txn commit: {error}")))?;
    Ok((updated, totals))
}

/// Delete one installment and recompute the plan totals in one transaction.
pub async fn delete_installment(
    pool: &PgPool,
    plan_id: &str,
    installment_id: &str,
) -> Result<(Value, PlanTotals), AppError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|error| AppError::Dependency(format!("txn begin: {error}")))?;

    let existing = ensure_installment_in_plan(&mut tx, plan_id, installment_id).await?;

    sqlx::query("DELETE FROM plan_payments WHERE id = $1::uuid")
        .bind(installment_id)
        .execute(&mut *tx)
        .await
        .map_err(|error| AppError::Dependency(format!("installment delete: {error}")))?;

    let totals = recompute_plan_totals(&mut tx, plan_id).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("txn commit: {error}")))?;
    Ok((existing, totals))
}

pub fn totals_json(totals: PlanTotals) -> Value {
    json!({
        "total_scheduled_amount": totals.scheduled,
        "total_paid_amount": totals.paid,
        "total_pending_amount": totals.pending,
    })
}

fn insert_plan_defaults(fields: &mut Map<String, Value>, client_id: &str, contract_type: &str) {
    fields.insert(
        "client_id".to_string(),
        Value::String(client_id.to_string()),
    );
    fields.insert(
        "contract_type".to_string(),
        Value::String(contract_type.to_string()),
    );
    if !fields.contains_key("currency") {
        fields.insert("currency".to_string(), Value::String("DOP".to_string()));
    }
    fields.insert("total_scheduled_amount".to_string(), json!(0.0));
    fields.insert("total_paid_amount".to_string(), json!(0.0));
    fields.insert("total_pending_amount".to_string(), json!(0.0));
}

async fn ensure_client_exists(conn: &mut PgConnection, client_id: &str) -> Result<(), AppError> {
    let row = sqlx::query("SELECT 1 FROM clients WHERE id = $1::uuid")
        .bind(client_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|error| AppError::Dependency(format!("client lookup: {error}")))?;
    if row.is_none() {
        return Err(AppError::NotFound("Client not found.".to_string()));
    }
    Ok(())
}

async fn ensure_plan_exists(conn: &mut PgConnection, plan_id: &str) -> Result<(), AppError> {
    let row = sqlx::query("SELECT 1 FROM payment_plans WHERE id = $1::uuid")
        .bind(plan_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|error| AppError::Dependency(format!("plan lookup: {error}")))?;
    if row.is_none() {
        return Err(AppError::NotFound("Payment plan not found.".to_string()));
    }
    Ok(())
}

async fn ensure_installment_in_plan(
    conn: &mut PgConnection,
    plan_id: &str,
    installment_id: &str,
) -> Result<Value, AppError> {
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row FROM plan_payments t
         WHERE id = $1::uuid AND plan_id = $2::uuid",
    )
    .bind(installment_id)
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|error| AppError::Dependency(format!("installment lookup: {error}")))?;

    row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound("Installment not found in this plan.".to_string()))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{insert_plan_defaults, PlanTotals};

    #[test]
    fn pending_is_scheduled_minus_paid() {
        let totals = PlanTotals::new(1000.0, 400.0);
        assert_eq!(totals.scheduled, 1000.0);
        assert_eq!(totals.paid, 400.0);
        assert_eq!(totals.pending, 600.0);
    }

    #[test]
    fn totals_round_to_cents() {
        let totals = PlanTotals::new(10.005, 0.0);
        assert_eq!(totals.scheduled, 10.01);
        assert_eq!(totals.pending, 10.01);

        let drift = PlanTotals::new(0.1 + 0.2, 0.3);
        assert_eq!(drift.pending, 0.0);
    }

    #[test]
    fn empty_plan_sums_to_zero() {
        assert_eq!(PlanTotals::new(0.0, 0.0), PlanTotals::ZERO);
    }

    #[test]
    fn new_plans_start_with_zero_totals() {
        let mut fields = Map::new();
        fields.insert("installment_amount".to_string(), json!(250.0));
        insert_plan_defaults(&mut fields, "client-1", "renewal");

        assert_eq!(
            fields.get("contract_type"),
            Some(&Value::String("renewal".to_string()))
        );
        assert_eq!(fields.get("total_scheduled_amount"), Some(&json!(0.0)));
        assert_eq!(fields.get("total_paid_amount"), Some(&json!(0.0)));
        assert_eq!(fields.get("total_pending_amount"), Some(&json!(0.0)));
        assert_eq!(
            fields.get("currency"),
            Some(&Value::String("DOP".to_string()))
        );
    }

    #[test]
    fn provided_currency_is_kept() {
        let mut fields = Map::new();
        fields.insert("currency".to_string(), json!("USD"));
        insert_plan_defaults(&mut fields, "client-1", "original");
        assert_eq!(
            fields.get("currency"),
            Some(&Value::String("USD".to_string()))
        );
    }
}

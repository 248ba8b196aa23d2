use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, require_user_id, ROLE_ACCOUNTANT, ROLE_ADMIN},
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input,
        AddInstallmentsInput, CreatePaymentPlanInput, PaymentPlansQuery, PlanInstallmentPath,
        PlanPath, UpdateInstallmentInput, UpdatePaymentPlanInput,
    },
    services::{
        audit::write_audit_log,
        payment_plans::{
            add_installments, create_original_plan, delete_installment, set_renewal_plan,
            totals_json, update_installment,
        },
    },
    state::AppState,
};

const PLAN_EDIT_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_ACCOUNTANT];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payment-plans",
            axum::routing::get(list_payment_plans).post(create_payment_plan),
        )
        .route(
            "/payment-plans/{plan_id}",
            axum::routing::get(get_payment_plan).patch(update_payment_plan),
        )
        .route(
            "/payment-plans/{plan_id}/installments",
            axum::routing::post(add_plan_installments),
        )
        .route(
            "/payment-plans/{plan_id}/installments/{installment_id}",
            axum::routing::patch(update_plan_installment).delete(delete_plan_installment),
        )
}

async fn list_payment_plans(
    State(state): State<AppState>,
    Query(query): Query<PaymentPlansQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(client_id) = non_empty_opt(query.client_id.as_deref()) {
        filters.insert("client_id".to_string(), Value::String(client_id));
    }
    if let Some(contract_type) = non_empty_opt(query.contract_type.as_deref()) {
        filters.insert("contract_type".to_string(), Value::String(contract_type));
    }

    let rows = list_rows(
        pool,
        "payment_plans",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

/// Create the plan for a contract instance. "original" plans are unique per
/// client; "renewal" plans are created lazily for their renewal the first
/// time terms are set, and updated on later calls.
async fn create_payment_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreatePaymentPlanInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user = require_role(&state, &headers, PLAN_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let contract_type = payload.contract_type.trim().to_ascii_lowercase();
    let mut fields = remove_nulls(serialize_to_map(&payload));
    fields.remove("client_id");
    fields.remove("contract_type");
    fields.remove("renewal_id");

    let (plan, created) = match contract_type.as_str() {
        "original" => {
            let plan = create_original_plan(pool, &payload.client_id, fields).await?;
            (plan, true)
        }
        "renewal" => {
            let renewal_id = payload
                .renewal_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| {
                    AppError::BadRequest(
                        "renewal_id is required for a renewal payment plan.".to_string(),
                    )
                })?;
            set_renewal_plan(pool, &payload.client_id, renewal_id, fields).await?
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "contract_type must be 'original' or 'renewal', got '{other}'."
            )));
        }
    };

    let plan_id = value_str(&plan, "id");
    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        if created { "create" } else { "update" },
        "payment_plans",
        Some(&plan_id),
        None,
        Some(plan.clone()),
    )
    .await;

    let status = if created {
        axum::http::StatusCode::CREATED
    } else {
        axum::http::StatusCode::OK
    };
    Ok((status, Json(plan)))
}

async fn get_payment_plan(
    State(state): State<AppState>,
    Path(path): Path<PlanPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let plan = get_row(pool, "payment_plans", &path.plan_id, "id").await?;

    let mut filters = Map::new();
    filters.insert("plan_id".to_string(), Value::String(path.plan_id.clone()));
    let installments = list_rows(
        pool,
        "plan_payments",
        Some(&filters),
        500,
        0,
        "scheduled_date",
        true,
    )
    .await?;

    let mut item = plan;
    if let Some(obj) = item.as_object_mut() {
        obj.insert("installments".to_string(), Value::Array(installments));
    }
    Ok(Json(item))
}

/// Update the mutable plan terms. The derived totals are never writable
/// here; only the reconciler touches them.
async fn update_payment_plan(
    State(state): State<AppState>,
    Path(path): Path<PlanPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePaymentPlanInput>,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, PLAN_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "payment_plans", &path.plan_id, "id").await?;
    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = crate::repository::table_service::update_row(
        pool,
        "payment_plans",
        &path.plan_id,
        &patch,
        "id",
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "update",
        "payment_plans",
        Some(&path.plan_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn add_plan_installments(
    State(state): State<AppState>,
    Path(path): Path<PlanPath>,
    headers: HeaderMap,
    Json(payload): Json<AddInstallmentsInput>,
) -> AppResult<impl IntoResponse> {
    let user = require_role(&state, &headers, PLAN_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    for installment in &payload.installments {
        if installment.scheduled_amount < 0.0 {
            return Err(AppError::BadRequest(
                "scheduled_amount must not be negative.".to_string(),
            ));
        }
        if chrono::NaiveDate::parse_from_str(installment.scheduled_date.trim(), "%Y-%m-%d")
            .is_err()
        {
            return Err(AppError::BadRequest(
                "scheduled_date must be YYYY-MM-DD.".to_string(),
            ));
        }
    }

    let rows = payload
        .installments
        .iter()
        .map(|installment| remove_nulls(serialize_to_map(installment)))
        .collect::<Vec<_>>();

    let (created, totals) = add_installments(pool, &path.plan_id, rows).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "create",
        "plan_payments",
        Some(&path.plan_id),
        None,
        Some(Value::Array(created.clone())),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "data": created,
            "totals": totals_json(totals),
        })),
    ))
}

async fn update_plan_installment(
    State(state): State<AppState>,
    Path(path): Path<PlanInstallmentPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateInstallmentInput>,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, PLAN_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let patch = remove_nulls(serialize_to_map(&payload));
    let (updated, totals) =
        update_installment(pool, &path.plan_id, &path.installment_id, patch).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "update",
        "plan_payments",
        Some(&path.installment_id),
        None,
        Some(updated.clone()),
    )
    .await;

    Ok(Json(json!({
        "installment": updated,
        "totals": totals_json(totals),
    })))
}

async fn delete_plan_installment(
    State(state): State<AppState>,
    Path(path): Path<PlanInstallmentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, PLAN_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let (deleted, totals) = delete_installment(pool, &path.plan_id, &path.installment_id).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "delete",
        "plan_payments",
        Some(&path.installment_id),
        Some(deleted),
        None,
    )
    .await;

    Ok(Json(json!({
        "deleted": true,
        "totals": totals_json(totals),
    })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, require_user_id, ROLE_ADMIN, ROLE_OPERATOR},
    error::{AppError, AppResult},
    repository::table_service::{create_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CarrierPath,
        CarriersQuery, CreateCarrierInput, UpdateCarrierInput,
    },
    services::audit::write_audit_log,
    state::AppState,
};

const CARRIER_EDIT_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_OPERATOR];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/carriers",
            axum::routing::get(list_carriers).post(create_carrier),
        )
        .route(
            "/carriers/{carrier_id}",
            axum::routing::get(get_carrier).patch(update_carrier),
        )
}

async fn list_carriers(
    State(state): State<AppState>,
    Query(query): Query<CarriersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(client_id) = non_empty_opt(query.client_id.as_deref()) {
        filters.insert("client_id".to_string(), Value::String(client_id));
    }
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(device_serial) = non_empty_opt(query.device_serial.as_deref()) {
        filters.insert("device_serial".to_string(), Value::String(device_serial));
    }

    let rows = list_rows(
        pool,
        "carriers",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_carrier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateCarrierInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user = require_role(&state, &headers, CARRIER_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    // The assignment must point at a real client.
    let _client = get_row(pool, "clients", &payload.client_id, "id").await?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "created_by_user_id".to_string(),
        Value::String(user.id.clone()),
    );

    let created = create_row(pool, "carriers", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "create",
        "carriers",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_carrier(
    State(state): State<AppState>,
    Path(path): Path<CarrierPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "carriers", &path.carrier_id, "id").await?;
    Ok(Json(record))
}

async fn update_carrier(
    State(state): State<AppState>,
    Path(path): Path<CarrierPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateCarrierInput>,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, CARRIER_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "carriers", &path.carrier_id, "id").await?;
    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "carriers", &path.carrier_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "update",
        "carriers",
        Some(&path.carrier_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
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

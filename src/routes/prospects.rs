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
    repository::table_service::{create_row, delete_row, get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateProspectInput,
        ProspectPath, ProspectsQuery, UpdateProspectInput,
    },
    services::audit::write_audit_log,
    state::AppState,
};

const PROSPECT_EDIT_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_OPERATOR];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/prospects",
            axum::routing::get(list_prospects).post(create_prospect),
        )
        .route(
            "/prospects/{prospect_id}",
            axum::routing::get(get_prospect)
                .patch(update_prospect)
                .delete(delete_prospect),
        )
}

async fn list_prospects(
    State(state): State<AppState>,
    Query(query): Query<ProspectsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(search) = non_empty_opt(query.search.as_deref()) {
        filters.insert(
            "full_name__ilike".to_string(),
            Value::String(format!("%{search}%")),
        );
    }

    let rows = list_rows(
        pool,
        "prospects",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_prospect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateProspectInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user = require_role(&state, &headers, PROSPECT_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    record.insert(
        "created_by_user_id".to_string(),
        Value::String(user.id.clone()),
    );

    let created = create_row(pool, "prospects", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "create",
        "prospects",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_prospect(
    State(state): State<AppState>,
    Path(path): Path<ProspectPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "prospects", &path.prospect_id, "id").await?;
    Ok(Json(record))
}

async fn update_prospect(
    State(state): State<AppState>,
    Path(path): Path<ProspectPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateProspectInput>,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, PROSPECT_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "prospects", &path.prospect_id, "id").await?;
    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }

    let updated = update_row(pool, "prospects", &path.prospect_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "update",
        "prospects",
        Some(&path.prospect_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_prospect(
    State(state): State<AppState>,
    Path(path): Path<ProspectPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, &[crate::auth::ROLE_ADMIN]).await?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "prospects", &path.prospect_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "delete",
        "prospects",
        Some(&path.prospect_id),
        Some(deleted),
        None,
    )
    .await;

    Ok(Json(json!({ "deleted": true })))
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

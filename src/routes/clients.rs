use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::{
    auth::{require_role, require_user_id, ROLE_ADMIN, ROLE_OPERATOR},
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows, update_row},
    schemas::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, ClientPath,
        ClientsQuery, CreateClientInput, UpdateClientInput,
    },
    services::{
        audit::write_audit_log,
        validity::{compute_validity, today_in, ContractTerms, RenewalEntry},
    },
    state::AppState,
};

const CLIENT_EDIT_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_OPERATOR];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/clients",
            axum::routing::get(list_clients).post(create_client),
        )
        .route(
            "/clients/{client_id}",
            axum::routing::get(get_client).patch(update_client),
        )
}

async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<ClientsQuery>,
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
    if let Some(case_number) = non_empty_opt(query.case_number.as_deref()) {
        filters.insert("case_number".to_string(), Value::String(case_number));
    }

    let rows = list_rows(
        pool,
        "clients",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 1000),
        0,
        "created_at",
        false,
    )
    .await?;

    let enriched = enrich_clients_with_validity(&state, pool, rows).await?;
    Ok(Json(json!({ "data": enriched })))
}

async fn create_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateClientInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user = require_role(&state, &headers, CLIENT_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let mut record = remove_nulls(serialize_to_map(&payload));
    normalize_client_payload(&mut record)?;
    record.insert(
        "created_by_user_id".to_string(),
        Value::String(user.id.clone()),
    );

    let created = crate::repository::table_service::create_row(pool, "clients", &record).await?;
    let client_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "create",
        "clients",
        Some(&client_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_client(
    State(state): State<AppState>,
    Path(path): Path<ClientPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "clients", &path.client_id, "id").await?;

    let renewal_rows = list_rows(
        pool,
        "renewals",
        Some(&json_map(&[(
            "client_id",
            Value::String(path.client_id.clone()),
        )])),
        500,
        0,
        "renewal_date",
        false,
    )
    .await?;

    let entries = renewal_rows
        .iter()
        .filter_map(RenewalEntry::from_row)
        .collect::<Vec<_>>();
    let validity = compute_validity(
        &ContractTerms::from_row(&record),
        &entries,
        today_in(state.config.timezone),
    );

    let mut item = record;
    if let Some(obj) = item.as_object_mut() {
        obj.insert("renewals".to_string(), Value::Array(renewal_rows));
        obj.insert("validity".to_string(), validity.to_payload());
    }

    Ok(Json(item))
}

async fn update_client(
    State(state): State<AppState>,
    Path(path): Path<ClientPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateClientInput>,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, CLIENT_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "clients", &path.client_id, "id").await?;

    let mut patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    normalize_client_payload(&mut patch)?;

    let updated = update_row(pool, "clients", &path.client_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "update",
        "clients",
        Some(&path.client_id),
        Some(record),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

/// Attach the computed validity to each client row. The calculator degrades
/// to "N/A" on malformed rows, so one bad legacy record cannot take the
/// listing down.
async fn enrich_clients_with_validity(
    state: &AppState,
    pool: &sqlx::PgPool,
    rows: Vec<Value>,
) -> AppResult<Vec<Value>> {
    if rows.is_empty() {
        return Ok(rows);
    }

    let client_ids = rows
        .iter()
        .map(|row| value_str(row, "id"))
        .filter(|id| !id.is_empty())
        .map(Value::String)
        .collect::<Vec<_>>();

    let renewal_rows = list_rows(
        pool,
        "renewals",
        Some(&json_map(&[("client_id", Value::Array(client_ids))])),
        1000,
        0,
        "renewal_date",
        false,
    )
    .await?;

    let mut renewals_by_client: HashMap<String, Vec<RenewalEntry>> = HashMap::new();
    for row in &renewal_rows {
        let client_id = value_str(row, "client_id");
        if client_id.is_empty() {
            continue;
        }
        if let Some(entry) = RenewalEntry::from_row(row) {
            renewals_by_client.entry(client_id).or_default().push(entry);
        }
    }

    let today = today_in(state.config.timezone);
    let mut enriched = Vec::with_capacity(rows.len());
    for mut row in rows {
        let client_id = value_str(&row, "id");
        let entries = renewals_by_client
            .remove(&client_id)
            .unwrap_or_default();
        let validity = compute_validity(&ContractTerms::from_row(&row), &entries, today);
        if let Some(obj) = row.as_object_mut() {
            obj.insert("validity".to_string(), validity.to_payload());
        }
        enriched.push(row);
    }

    Ok(enriched)
}

fn normalize_client_payload(payload: &mut Map<String, Value>) -> AppResult<()> {
    if let Some(status) = payload
        .get("status")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_lowercase)
    {
        payload.insert("status".to_string(), Value::String(status));
    }
    if let Some(currency) = payload
        .get("currency")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_ascii_uppercase)
    {
        payload.insert("currency".to_string(), Value::String(currency));
    }

    for key in ["placement_date", "contract_date"] {
        if let Some(raw) = payload.get(key).and_then(Value::as_str) {
            if chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").is_err() {
                return Err(AppError::BadRequest(format!(
                    "{key} must be YYYY-MM-DD."
                )));
            }
        }
    }
    Ok(())
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

fn json_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in entries {
        map.insert((*key).to_string(), value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::normalize_client_payload;

    #[test]
    fn normalizes_status_and_currency() {
        let mut payload = Map::new();
        payload.insert("status".to_string(), json!(" Active "));
        payload.insert("currency".to_string(), json!("dop"));
        normalize_client_payload(&mut payload).expect("valid payload");
        assert_eq!(payload.get("status"), Some(&Value::String("active".to_string())));
        assert_eq!(payload.get("currency"), Some(&Value::String("DOP".to_string())));
    }

    #[test]
    fn rejects_malformed_contract_dates() {
        let mut payload = Map::new();
        payload.insert("contract_date".to_string(), json!("01/02/2025"));
        assert!(normalize_client_payload(&mut payload).is_err());

        let mut ok = Map::new();
        ok.insert("contract_date".to_string(), json!("2025-02-01"));
        assert!(normalize_client_payload(&mut ok).is_ok());
    }
}

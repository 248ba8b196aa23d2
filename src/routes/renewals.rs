use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, require_user_id, ROLE_ADMIN, ROLE_OPERATOR},
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_rows},
    schemas::RenewClientInput,
    services::{
        audit::write_audit_log,
        renewals::renew_contract,
        validity::{compute_validity, today_in, ContractTerms, RenewalEntry},
    },
    state::AppState,
};

use crate::schemas::ClientPath;

const RENEWAL_EDIT_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_OPERATOR];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/clients/{client_id}/validity",
            axum::routing::get(get_client_validity),
        )
        .route(
            "/clients/{client_id}/renewals",
            axum::routing::get(list_client_renewals).post(renew_client),
        )
}

/// Current validity snapshot: expiration date, total contracted months,
/// days remaining, and active flag. Malformed legacy rows come back with
/// "N/A" sentinels instead of an error.
async fn get_client_validity(
    State(state): State<AppState>,
    Path(path): Path<ClientPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let client = get_row(pool, "clients", &path.client_id, "id").await?;
    let renewal_rows = load_renewal_rows(pool, &path.client_id).await?;
    let entries = renewal_rows
        .iter()
        .filter_map(RenewalEntry::from_row)
        .collect::<Vec<_>>();

    let validity = compute_validity(
        &ContractTerms::from_row(&client),
        &entries,
        today_in(state.config.timezone),
    );

    let mut payload = validity.to_payload();
    if let Some(obj) = payload.as_object_mut() {
        obj.insert(
            "client_id".to_string(),
            Value::String(path.client_id.clone()),
        );
        obj.insert("renewal_count".to_string(), json!(entries.len()));
    }
    Ok(Json(payload))
}

async fn list_client_renewals(
    State(state): State<AppState>,
    Path(path): Path<ClientPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    // 404 on unknown clients rather than an empty list.
    let _client = get_row(pool, "clients", &path.client_id, "id").await?;
    let rows = load_renewal_rows(pool, &path.client_id).await?;
    Ok(Json(json!({ "data": rows })))
}

/// Extend the contract. The duplicate-day check, the expiration chaining and
/// the insert are one transaction; a same-day duplicate is rejected with 409
/// and nothing is written.
async fn renew_client(
    State(state): State<AppState>,
    Path(path): Path<ClientPath>,
    headers: HeaderMap,
    Json(payload): Json<RenewClientInput>,
) -> AppResult<impl IntoResponse> {
    let user = require_role(&state, &headers, RENEWAL_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let renewal_date = match payload.renewal_date.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                AppError::BadRequest("renewal_date must be YYYY-MM-DD.".to_string())
            })?,
        ),
        _ => None,
    };

    if let Some(document_id) = non_empty_opt(payload.document_id.as_deref()) {
        // The referenced supporting document must exist before we record it.
        let document = get_row(pool, "prosecutor_documents", &document_id, "id").await?;
        if value_str(&document, "client_id") != path.client_id {
            return Err(AppError::BadRequest(
                "document_id does not belong to this client.".to_string(),
            ));
        }
    }

    let outcome = renew_contract(
        pool,
        &path.client_id,
        payload.months,
        renewal_date,
        non_empty_opt(payload.document_id.as_deref()).as_deref(),
        &user.id,
        today_in(state.config.timezone),
    )
    .await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "renew",
        "renewals",
        Some(&value_str(&outcome.renewal, "id")),
        None,
        Some(outcome.renewal.clone()),
    )
    .await;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "previous_expiration_date": outcome
                .previous_expiration_date
                .format("%Y-%m-%d")
                .to_string(),
            "new_expiration_date": outcome
                .new_expiration_date
                .format("%Y-%m-%d")
                .to_string(),
            "days_remaining": outcome.days_remaining,
            "months_added": outcome.months_added,
            "renewal_date": outcome.renewal_date.format("%Y-%m-%d").to_string(),
            "renewal": outcome.renewal,
        })),
    ))
}

async fn load_renewal_rows(pool: &sqlx::PgPool, client_id: &str) -> AppResult<Vec<Value>> {
    let mut filters = Map::new();
    filters.insert(
        "client_id".to_string(),
        Value::String(client_id.to_string()),
    );
    list_rows(pool, "renewals", Some(&filters), 500, 0, "renewal_date", false).await
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

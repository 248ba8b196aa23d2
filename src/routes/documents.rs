use axum::{
    extract::{Multipart, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};

use crate::{
    auth::{require_role, require_user_id, ROLE_ADMIN, ROLE_OPERATOR},
    error::{AppError, AppResult},
    repository::table_service::{create_row, delete_row, get_row, list_rows},
    schemas::{clamp_limit_in_range, default_document_category, DocumentPath, DocumentsQuery},
    services::{audit::write_audit_log, storage::BlobStore},
    state::AppState,
};

const DOC_EDIT_ROLES: &[&str] = &[ROLE_ADMIN, ROLE_OPERATOR];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/documents",
            axum::routing::get(list_documents).post(upload_document),
        )
        .route(
            "/documents/{document_id}",
            axum::routing::get(get_document).delete(delete_document),
        )
}

async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(client_id) = non_empty_opt(query.client_id.as_deref()) {
        filters.insert("client_id".to_string(), Value::String(client_id));
    }
    if let Some(category) = non_empty_opt(query.category.as_deref()) {
        filters.insert("category".to_string(), Value::String(category));
    }

    let rows = list_rows(
        pool,
        "prosecutor_documents",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "created_at",
        false,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

/// Upload a prosecutor document: the file goes to blob storage, the metadata
/// row to the database.
async fn upload_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let user = require_role(&state, &headers, DOC_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;
    let store = blob_store(&state)?;

    let mut client_id: Option<String> = None;
    let mut category = default_document_category();
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::BadRequest(format!("Invalid multipart body: {error}")))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                file_name = field
                    .file_name()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(ToOwned::to_owned);
                content_type = field.content_type().map(ToOwned::to_owned);
                let bytes = field.bytes().await.map_err(|error| {
                    AppError::BadRequest(format!("Could not read uploaded file: {error}"))
                })?;
                file_bytes = Some(bytes.to_vec());
            }
            "client_id" => {
                client_id = field.text().await.ok().map(|value| value.trim().to_string());
            }
            "category" => {
                if let Ok(value) = field.text().await {
                    let trimmed = value.trim().to_ascii_lowercase();
                    if !trimmed.is_empty() {
                        category = trimmed;
                    }
                }
            }
            _ => {}
        }
    }

    let client_id = client_id
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::BadRequest("client_id is required.".to_string()))?;
    let file_name = file_name
        .ok_or_else(|| AppError::BadRequest("A file with a filename is required.".to_string()))?;
    let file_bytes =
        file_bytes.ok_or_else(|| AppError::BadRequest("A file is required.".to_string()))?;
    if file_bytes.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty.".to_string()));
    }

    let _client = get_row(pool, "clients", &client_id, "id").await?;

    let storage_key = format!(
        "prosecutor-documents/{}/{}",
        uuid::Uuid::new_v4(),
        sanitize_file_name(&file_name)
    );
    let file_size_bytes = file_bytes.len() as i64;
    store
        .upload(&storage_key, content_type.as_deref(), file_bytes)
        .await?;

    let mut record = Map::new();
    record.insert("client_id".to_string(), Value::String(client_id));
    record.insert("file_name".to_string(), Value::String(file_name));
    record.insert(
        "file_url".to_string(),
        Value::String(store.object_url(&storage_key)),
    );
    record.insert("storage_key".to_string(), Value::String(storage_key));
    record.insert("file_size_bytes".to_string(), json!(file_size_bytes));
    if let Some(mime) = content_type {
        record.insert("mime_type".to_string(), Value::String(mime));
    }
    record.insert("category".to_string(), Value::String(category));
    record.insert(
        "uploaded_by_user_id".to_string(),
        Value::String(user.id.clone()),
    );

    let created = create_row(pool, "prosecutor_documents", &record).await?;
    let entity_id = value_str(&created, "id");

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "create",
        "prosecutor_documents",
        Some(&entity_id),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn get_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let _user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let record = get_row(pool, "prosecutor_documents", &path.document_id, "id").await?;
    Ok(Json(record))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(path): Path<DocumentPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user = require_role(&state, &headers, DOC_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let deleted = delete_row(pool, "prosecutor_documents", &path.document_id, "id").await?;

    // The blob delete is best-effort: once the row is gone we do not roll it
    // back on a storage failure, we only log the orphaned object.
    let storage_key = value_str(&deleted, "storage_key");
    if !storage_key.is_empty() {
        if let Some(store) = state.blob_store.as_ref() {
            if let Err(error) = store.delete(&storage_key).await {
                tracing::warn!(
                    storage_key,
                    error = %error,
                    "Document row deleted but blob delete failed; object is orphaned"
                );
            }
        }
    }

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&user.id),
        "delete",
        "prosecutor_documents",
        Some(&path.document_id),
        Some(deleted),
        None,
    )
    .await;

    Ok(Json(json!({ "deleted": true })))
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned = name
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_') {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();
    if cleaned.trim_matches('_').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn blob_store(state: &AppState) -> AppResult<&BlobStore> {
    state.blob_store.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Blob storage is not configured. Set DOCUMENTS_BUCKET.".to_string(),
        )
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

#[cfg(test)]
mod tests {
    use super::sanitize_file_name;

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_file_name("acta fiscal.pdf"), "acta_fiscal.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("???"), "document");
    }
}

use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};

use crate::error::AppError;
use crate::repository::table_service::create_row_tx;
use crate::services::validity::{
    add_months, days_remaining_on, duration_display_text, extract_months, usable_date,
    ContractTerms, RenewalEntry,
};

/// Outcome of a committed renewal.
#[derive(Debug, Clone)]
pub struct RenewalOutcome {
    pub previous_expiration_date: NaiveDate,
    pub new_expiration_date: NaiveDate,
    pub days_remaining: i64,
    pub months_added: i64,
    pub renewal_date: NaiveDate,
    pub renewal: Value,
}

/// Extend a client's contract by `months_new`, chaining from the current
/// expiration date.
///
/// The duplicate-day check, basis resolution, and insert all run inside one
/// transaction; any failure rolls the whole thing back. The check-then-insert
/// runs at the database's default isolation, so two simultaneous renewals for
/// the same client can still race under read committed.
pub async fn renew_contract(
    pool: &PgPool,
    client_id: &str,
    months_new: i64,
    renewal_date: Option<NaiveDate>,
    document_id: Option<&str>,
    created_by_user_id: &str,
    today: NaiveDate,
) -> Result<RenewalOutcome, AppError> {
    if months_new <= 0 {
        return Err(AppError::BadRequest(
            "months must be a positive integer.".to_string(),
        ));
    }
    let renewal_date = renewal_date.unwrap_or(today);

    let mut tx = pool
        .begin()
        .await
        .map_err(|error| AppError::Dependency(format!("txn begin: {error}")))?;

    let client = sqlx::query("SELECT row_to_json(t) AS row FROM clients t WHERE id = $1::uuid")
        .bind(client_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| AppError::Dependency(format!("client lookup: {error}")))?
        .and_then(|row| row.try_get::<Option<Value>, _>("row").ok().flatten())
        .ok_or_else(|| AppError::NotFound("Client not found.".to_string()))?;

    let duplicate =
        sqlx::query("SELECT 1 FROM renewals WHERE client_id = $1::uuid AND renewal_date = $2")
            .bind(client_id)
            .bind(renewal_date)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|error| AppError::Dependency(format!("duplicate check: {error}")))?;
    if duplicate.is_some() {
        return Err(AppError::Conflict(format!(
            "A renewal already exists for this client on {renewal_date}."
        )));
    }

    let latest = sqlx::query(
        "SELECT renewal_date, renewal_duration FROM renewals
         WHERE client_id = $1::uuid
         ORDER BY renewal_date DESC
         LIMIT 1",
    )
    .bind(client_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|error| AppError::Dependency(format!("latest renewal lookup: {error}")))?
    .map(|row| {
        Ok::<RenewalEntry, sqlx::Error>(RenewalEntry {
            renewal_date: row.try_get("renewal_date")?,
            renewal_duration: row.try_get("renewal_duration")?,
        })
    })
    .transpose()
    .map_err(|error| AppError::Dependency(format!("latest renewal decode: {error}")))?;

    let previous_expiration_date = resolve_basis_expiration(&client, latest.as_ref())?;
    let new_expiration_date = add_months(previous_expiration_date, months_new)?;

    let mut payload = Map::new();
    payload.insert("client_id".to_string(), Value::String(client_id.to_string()));
    payload.insert(
        "renewal_date".to_string(),
        Value::String(renewal_date.format("%Y-%m-%d").to_string()),
    );
    payload.insert(
        "renewal_duration".to_string(),
        Value::String(duration_display_text(months_new)),
    );
    if let Some(document_id) = document_id {
        payload.insert(
            "document_id".to_string(),
            Value::String(document_id.to_string()),
        );
    }
    payload.insert(
        "created_by_user_id".to_string(),
        Value::String(created_by_user_id.to_string()),
    );

    let renewal = create_row_tx(&mut tx, "renewals", &payload).await?;

    tx.commit()
        .await
        .map_err(|error| AppError::Dependency(format!("txn commit: {error}")))?;

    Ok(RenewalOutcome {
        previous_expiration_date,
        new_expiration_date,
        days_remaining: days_remaining_on(Some(new_expiration_date), today),
        months_added: months_new,
        renewal_date,
        renewal,
    })
}

/// Current expiration the next renewal chains from: the latest renewal's date
/// plus its own month count, or the placement/contract date plus the original
/// duration when the contract has never been renewed.
fn resolve_basis_expiration(
    client: &Value,
    latest: Option<&RenewalEntry>,
) -> Result<NaiveDate, AppError> {
    if let Some(renewal) = latest {
        return add_months(
            renewal.renewal_date,
            i64::from(extract_months(&renewal.renewal_duration)),
        )
        .map_err(|_| {
            AppError::BadRequest(
                "The latest renewal has no usable duration; cannot compute the current \
                 expiration."
                    .to_string(),
            )
        });
    }

    let terms = ContractTerms::from_row(client);
    let base_date = usable_base_date(&terms).ok_or_else(|| {
        AppError::BadRequest(
            "Client contract dates are incomplete; cannot compute the current expiration."
                .to_string(),
        )
    })?;
    add_months(base_date, terms.contract_duration).map_err(|_| {
        AppError::BadRequest(
            "Client contract duration is not a positive number of months.".to_string(),
        )
    })
}

fn usable_base_date(terms: &ContractTerms) -> Option<NaiveDate> {
    usable_date(terms.placement_date).or(usable_date(terms.contract_date))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::resolve_basis_expiration;
    use crate::services::validity::RenewalEntry;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn basis_uses_latest_renewal_own_duration() {
        let client = json!({
            "contract_date": "2025-01-01",
            "contract_duration": 12
        });
        let latest = RenewalEntry {
            renewal_date: date(2025, 10, 1),
            renewal_duration: "6 meses".to_string(),
        };
        assert_eq!(
            resolve_basis_expiration(&client, Some(&latest)).unwrap(),
            date(2026, 4, 1)
        );
    }

    #[test]
    fn basis_falls_back_to_contract_terms() {
        let client = json!({
            "contract_date": "2025-01-01",
            "contract_duration": 12
        });
        assert_eq!(
            resolve_basis_expiration(&client, None).unwrap(),
            date(2026, 1, 1)
        );
    }

    #[test]
    fn basis_prefers_placement_date() {
        let client = json!({
            "placement_date": "2025-02-15",
            "contract_date": "2025-01-01",
            "contract_duration": 6
        });
        assert_eq!(
            resolve_basis_expiration(&client, None).unwrap(),
            date(2025, 8, 15)
        );
    }

    #[test]
    fn basis_rejects_incomplete_contracts() {
        let no_dates = json!({ "contract_duration": 12 });
        assert!(resolve_basis_expiration(&no_dates, None).is_err());

        let zero_duration = json!({
            "contract_date": "2025-01-01",
            "contract_duration": 0
        });
        assert!(resolve_basis_expiration(&zero_duration, None).is_err());

        let legacy_year = json!({
            "contract_date": "1997-05-01",
            "contract_duration": 12
        });
        assert!(resolve_basis_expiration(&legacy_year, None).is_err());
    }

    #[test]
    fn basis_rejects_renewal_without_digits() {
        let client = json!({
            "contract_date": "2025-01-01",
            "contract_duration": 12
        });
        let latest = RenewalEntry {
            renewal_date: date(2025, 10, 1),
            renewal_duration: "indefinido".to_string(),
        };
        assert!(resolve_basis_expiration(&client, Some(&latest)).is_err());
    }
}

use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

fn default_limit_200() -> i64 {
    200
}
fn default_limit_300() -> i64 {
    300
}
fn default_status_active() -> String {
    "active".to_string()
}
fn default_status_new() -> String {
    "new".to_string()
}
fn default_status_scheduled() -> String {
    "scheduled".to_string()
}
fn default_status_pending() -> String {
    "pending".to_string()
}
fn default_currency_dop() -> String {
    "DOP".to_string()
}
fn default_contract_type_original() -> String {
    "original".to_string()
}
fn default_category_other() -> String {
    "other".to_string()
}

// ── Clients ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ClientPath {
    pub client_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ClientsQuery {
    pub status: Option<String>,
    /// Case-insensitive substring match on the client's full name.
    pub search: Option<String>,
    pub case_number: Option<String>,
    #[serde(default = "default_limit_300")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateClientInput {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    pub document_number: Option<String>,
    pub case_number: Option<String>,
    pub court_name: Option<String>,
    pub prosecutor_name: Option<String>,
    pub phone_e164: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub address: Option<String>,
    /// YYYY-MM-DD; when the monitoring device was installed.
    pub placement_date: Option<String>,
    /// YYYY-MM-DD; when the contract was signed.
    pub contract_date: Option<String>,
    /// Initial contract length in months.
    pub contract_duration: Option<i32>,
    #[serde(default = "default_status_active")]
    pub status: String,
    #[serde(default = "default_currency_dop")]
    pub currency: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateClientInput {
    pub full_name: Option<String>,
    pub document_number: Option<String>,
    pub case_number: Option<String>,
    pub court_name: Option<String>,
    pub prosecutor_name: Option<String>,
    pub phone_e164: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub placement_date: Option<String>,
    pub contract_date: Option<String>,
    pub contract_duration: Option<i32>,
    pub status: Option<String>,
    pub currency: Option<String>,
    pub notes: Option<String>,
}

// ── Renewals ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RenewClientInput {
    /// Months added by this renewal.
    pub months: i64,
    /// YYYY-MM-DD; defaults to today in the service timezone.
    pub renewal_date: Option<String>,
    /// Supporting prosecutor document, when one backs the renewal.
    pub document_id: Option<String>,
}

// ── Payment plans ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PlanPath {
    pub plan_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PlanInstallmentPath {
    pub plan_id: String,
    pub installment_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct PaymentPlansQuery {
    pub client_id: Option<String>,
    pub contract_type: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreatePaymentPlanInput {
    pub client_id: String,
    /// "original" or "renewal".
    #[serde(default = "default_contract_type_original")]
    pub contract_type: String,
    /// Required when contract_type is "renewal".
    pub renewal_id: Option<String>,
    #[validate(range(min = 0.0))]
    pub installment_amount: Option<f64>,
    /// e.g. "monthly", "biweekly".
    pub payment_frequency: Option<String>,
    /// Defaults to DOP on creation; omitted fields never patch an existing
    /// renewal plan.
    pub currency: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdatePaymentPlanInput {
    pub installment_amount: Option<f64>,
    pub payment_frequency: Option<String>,
    pub currency: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CreateInstallmentInput {
    pub scheduled_amount: f64,
    /// YYYY-MM-DD.
    pub scheduled_date: String,
    pub paid_amount: Option<f64>,
    /// YYYY-MM-DD.
    pub paid_date: Option<String>,
    #[serde(default = "default_status_pending")]
    pub status: String,
    pub payment_method: Option<String>,
    pub receipt_number: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AddInstallmentsInput {
    pub installments: Vec<CreateInstallmentInput>,
}

/// The full set of updatable installment columns. Anything else in the
/// request body is a deserialization error rather than a silently ignored
/// key.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateInstallmentInput {
    pub scheduled_amount: Option<f64>,
    pub scheduled_date: Option<String>,
    pub paid_amount: Option<f64>,
    pub paid_date: Option<String>,
    pub status: Option<String>,
    pub payment_method: Option<String>,
    pub receipt_number: Option<String>,
    pub notes: Option<String>,
}

// ── Prospects ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ProspectPath {
    pub prospect_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct ProspectsQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateProspectInput {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    pub phone_e164: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub case_number: Option<String>,
    pub referral_source: Option<String>,
    #[serde(default = "default_status_new")]
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateProspectInput {
    pub full_name: Option<String>,
    pub phone_e164: Option<String>,
    pub email: Option<String>,
    pub case_number: Option<String>,
    pub referral_source: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

// ── Carriers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CarrierPath {
    pub carrier_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct CarriersQuery {
    pub client_id: Option<String>,
    pub status: Option<String>,
    pub device_serial: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateCarrierInput {
    pub client_id: String,
    #[validate(length(min = 1, max = 100))]
    pub device_serial: String,
    pub device_type: Option<String>,
    /// YYYY-MM-DD.
    pub installed_date: Option<String>,
    #[serde(default = "default_status_active")]
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateCarrierInput {
    pub device_serial: Option<String>,
    pub device_type: Option<String>,
    pub installed_date: Option<String>,
    pub removed_date: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

// ── Operations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OperationPath {
    pub operation_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OperationsQuery {
    pub client_id: Option<String>,
    pub status: Option<String>,
    pub operation_type: Option<String>,
    /// Inclusive YYYY-MM-DD lower bound on the scheduled date.
    pub scheduled_from: Option<String>,
    /// Inclusive YYYY-MM-DD upper bound on the scheduled date.
    pub scheduled_to: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateOperationInput {
    pub client_id: Option<String>,
    /// installation | retrieval | maintenance | inspection.
    #[validate(length(min = 1, max = 50))]
    pub operation_type: String,
    pub description: Option<String>,
    /// YYYY-MM-DD.
    pub scheduled_date: Option<String>,
    pub assigned_user_id: Option<String>,
    #[serde(default = "default_status_scheduled")]
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateOperationInput {
    pub operation_type: Option<String>,
    pub description: Option<String>,
    pub scheduled_date: Option<String>,
    pub completed_date: Option<String>,
    pub assigned_user_id: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

// ── Documents ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DocumentPath {
    pub document_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct DocumentsQuery {
    pub client_id: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

pub fn default_document_category() -> String {
    default_category_other()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        clamp_limit_in_range, remove_nulls, serialize_to_map, UpdateInstallmentInput,
    };

    #[test]
    fn strips_nulls_from_patches() {
        let input: UpdateInstallmentInput = serde_json::from_value(json!({
            "paid_amount": 250.0,
            "paid_date": "2025-06-01",
            "status": null
        }))
        .expect("valid input");

        let patch = remove_nulls(serialize_to_map(&input));
        assert_eq!(patch.len(), 2);
        assert!(patch.contains_key("paid_amount"));
        assert!(patch.contains_key("paid_date"));
        assert!(!patch.contains_key("status"));
    }

    #[test]
    fn rejects_unknown_installment_fields() {
        let result: Result<UpdateInstallmentInput, _> = serde_json::from_value(json!({
            "paid_amount": 250.0,
            "not_a_column": true
        }));
        assert!(result.is_err());
    }

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(0, 1, 500), 1);
        assert_eq!(clamp_limit_in_range(50, 1, 500), 50);
        assert_eq!(clamp_limit_in_range(9999, 1, 500), 500);
    }
}

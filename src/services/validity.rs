use chrono::{Datelike, Months, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::error::AppError;

/// Contract years outside this window are treated as data-entry garbage and
/// make the validity Indeterminate instead of producing absurd expirations.
const MIN_CONTRACT_YEAR: i32 = 2000;
const MAX_CONTRACT_YEAR: i32 = 2099;

/// Base contract terms of a monitored client.
#[derive(Debug, Clone, Copy)]
pub struct ContractTerms {
    pub placement_date: Option<NaiveDate>,
    pub contract_date: Option<NaiveDate>,
    pub contract_duration: i64,
}

/// One renewal row, newest-first in the lists handed to the calculator.
#[derive(Debug, Clone)]
pub struct RenewalEntry {
    pub renewal_date: NaiveDate,
    pub renewal_duration: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RenewalSummary {
    pub renewal_date: NaiveDate,
    pub months: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValiditySnapshot {
    pub expiration_date: NaiveDate,
    pub months_contracted: i64,
    pub days_remaining: i64,
    pub is_active: bool,
    pub last_renewal: Option<RenewalSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndeterminateReason {
    MissingBaseDate,
    NonPositiveDuration,
    UnresolvableExpiration,
}

/// Validity of a contract. Malformed historical rows degrade to
/// `Indeterminate` so one bad record cannot break a listing endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractValidity {
    Valid(ValiditySnapshot),
    Indeterminate(IndeterminateReason),
}

/// Add a whole number of months with calendar rollover. The day component is
/// clamped at short months (2025-01-31 + 1 month = 2025-02-28).
pub fn add_months(base: NaiveDate, months: i64) -> Result<NaiveDate, AppError> {
    let months = u32::try_from(months)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| {
            AppError::BadRequest("months must be a positive integer.".to_string())
        })?;

    base.checked_add_months(Months::new(months))
        .ok_or_else(|| AppError::BadRequest("Date is out of range.".to_string()))
}

/// Whole days from `today` until `expiration`, both at midnight. The same
/// day yields 0, past dates go negative, and a missing date degrades to 0
/// because listing endpoints call this once per row.
pub fn days_remaining_on(expiration: Option<NaiveDate>, today: NaiveDate) -> i64 {
    expiration
        .map(|date| (date - today).num_days())
        .unwrap_or(0)
}

/// Today's date in the service timezone.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Month count from a stored duration text such as "6 meses": the first run
/// of ASCII digits, 0 when there is none. Lenient on purpose; the column
/// holds display text, not a structured interval.
pub fn extract_months(duration_text: &str) -> u32 {
    let digits = duration_text
        .chars()
        .skip_while(|character| !character.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect::<String>();
    digits.parse::<u32>().unwrap_or(0)
}

/// Display text stored on a renewal row for a month count.
pub fn duration_display_text(months: i64) -> String {
    format!("{months} meses")
}

/// Compute the validity snapshot for a contract and its renewal history.
///
/// `months_contracted` accumulates the original duration plus every
/// renewal's months, while the expiration basis uses only the latest
/// renewal's own months (or the base date + original duration when no
/// renewal exists). The two figures intentionally disagree for multi-renewal
/// contracts and must not be collapsed into one computation.
pub fn compute_validity(
    terms: &ContractTerms,
    renewals: &[RenewalEntry],
    today: NaiveDate,
) -> ContractValidity {
    let Some(base_date) = usable_date(terms.placement_date).or(usable_date(terms.contract_date))
    else {
        return ContractValidity::Indeterminate(IndeterminateReason::MissingBaseDate);
    };
    if terms.contract_duration <= 0 {
        return ContractValidity::Indeterminate(IndeterminateReason::NonPositiveDuration);
    }

    let months_contracted = terms.contract_duration
        + renewals
            .iter()
            .map(|renewal| i64::from(extract_months(&renewal.renewal_duration)))
            .sum::<i64>();

    let latest = renewals.iter().max_by_key(|renewal| renewal.renewal_date);

    let (basis_date, basis_months) = match latest {
        Some(renewal) => (
            renewal.renewal_date,
            i64::from(extract_months(&renewal.renewal_duration)),
        ),
        None => (base_date, terms.contract_duration),
    };

    let Ok(expiration_date) = add_months(basis_date, basis_months) else {
        return ContractValidity::Indeterminate(IndeterminateReason::UnresolvableExpiration);
    };

    let days_remaining = days_remaining_on(Some(expiration_date), today);

    ContractValidity::Valid(ValiditySnapshot {
        expiration_date,
        months_contracted,
        days_remaining,
        is_active: days_remaining > 0,
        last_renewal: latest.map(|renewal| RenewalSummary {
            renewal_date: renewal.renewal_date,
            months: extract_months(&renewal.renewal_duration),
        }),
    })
}

/// Filter out dates outside the plausible contract window (year 2000-2099).
pub fn usable_date(date: Option<NaiveDate>) -> Option<NaiveDate> {
    date.filter(|value| (MIN_CONTRACT_YEAR..=MAX_CONTRACT_YEAR).contains(&value.year()))
}

impl ContractTerms {
    /// Read the contract fields out of a `row_to_json` client row.
    pub fn from_row(row: &Value) -> Self {
        Self {
            placement_date: row_date(row, "placement_date"),
            contract_date: row_date(row, "contract_date"),
            contract_duration: row
                .as_object()
                .and_then(|obj| obj.get("contract_duration"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
        }
    }
}

impl RenewalEntry {
    pub fn from_row(row: &Value) -> Option<Self> {
        Some(Self {
            renewal_date: row_date(row, "renewal_date")?,
            renewal_duration: row
                .as_object()
                .and_then(|obj| obj.get("renewal_duration"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

impl ContractValidity {
    /// Wire shape of a validity snapshot. Indeterminate contracts keep the
    /// legacy "N/A" sentinels so clients listing many records render them
    /// uniformly.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Valid(snapshot) => serde_json::json!({
                "expiration_date": snapshot.expiration_date.format("%Y-%m-%d").to_string(),
                "months_contracted": snapshot.months_contracted,
                "days_remaining": snapshot.days_remaining,
                "is_active": snapshot.is_active,
                "last_renewal": snapshot.last_renewal,
            }),
            Self::Indeterminate(_) => serde_json::json!({
                "expiration_date": "N/A",
                "months_contracted": "N/A",
                "days_remaining": "N/A",
                "is_active": false,
                "last_renewal": Value::Null,
            }),
        }
    }
}

fn row_date(row: &Value, key: &str) -> Option<NaiveDate> {
    row.as_object()
        .and_then(|obj| obj.get(key))
        .and_then(Value::as_str)
        .and_then(|text| NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{
        add_months, compute_validity, days_remaining_on, extract_months, ContractTerms,
        ContractValidity, IndeterminateReason, RenewalEntry,
    };

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn add_months_rolls_over_years() {
        assert_eq!(
            add_months(date(2025, 10, 15), 6).unwrap(),
            date(2026, 4, 15)
        );
        assert_eq!(add_months(date(2025, 12, 1), 1).unwrap(), date(2026, 1, 1));
    }

    #[test]
    fn add_months_clamps_short_months() {
        assert_eq!(add_months(date(2025, 1, 31), 1).unwrap(), date(2025, 2, 28));
        assert_eq!(add_months(date(2024, 1, 31), 1).unwrap(), date(2024, 2, 29));
    }

    #[test]
    fn add_months_rejects_non_positive_counts() {
        assert!(add_months(date(2025, 1, 1), 0).is_err());
        assert!(add_months(date(2025, 1, 1), -3).is_err());
    }

    #[test]
    fn days_remaining_is_whole_days_from_midnight() {
        let today = date(2025, 6, 10);
        assert_eq!(days_remaining_on(Some(today), today), 0);
        assert_eq!(days_remaining_on(Some(date(2025, 6, 20)), today), 10);
        assert_eq!(days_remaining_on(Some(date(2025, 6, 5)), today), -5);
        assert_eq!(days_remaining_on(None, today), 0);
    }

    #[test]
    fn extracts_leading_month_counts() {
        assert_eq!(extract_months("6 meses"), 6);
        assert_eq!(extract_months("12 meses prorrogables"), 12);
        assert_eq!(extract_months(""), 0);
        assert_eq!(extract_months("sin duración"), 0);
    }

    #[test]
    fn original_contract_without_renewals() {
        let terms = ContractTerms {
            placement_date: None,
            contract_date: Some(date(2025, 1, 1)),
            contract_duration: 12,
        };
        let ContractValidity::Valid(snapshot) =
            compute_validity(&terms, &[], date(2025, 6, 1))
        else {
            panic!("expected a valid snapshot");
        };
        assert_eq!(snapshot.expiration_date, date(2026, 1, 1));
        assert_eq!(snapshot.months_contracted, 12);
        assert!(snapshot.is_active);
        assert!(snapshot.last_renewal.is_none());
    }

    #[test]
    fn renewal_moves_basis_but_months_accumulate() {
        let terms = ContractTerms {
            placement_date: None,
            contract_date: Some(date(2025, 1, 1)),
            contract_duration: 12,
        };
        let renewals = vec![RenewalEntry {
            renewal_date: date(2025, 10, 1),
            renewal_duration: "6 meses".to_string(),
        }];
        let ContractValidity::Valid(snapshot) =
            compute_validity(&terms, &renewals, date(2025, 11, 1))
        else {
            panic!("expected a valid snapshot");
        };
        // Basis = latest renewal date + its own 6 months, not the 18 total.
        assert_eq!(snapshot.expiration_date, date(2026, 4, 1));
        assert_eq!(snapshot.months_contracted, 18);
        let last = snapshot.last_renewal.expect("has last renewal");
        assert_eq!(last.renewal_date, date(2025, 10, 1));
        assert_eq!(last.months, 6);
    }

    #[test]
    fn latest_renewal_is_by_date_not_list_order() {
        let terms = ContractTerms {
            placement_date: Some(date(2024, 3, 15)),
            contract_date: None,
            contract_duration: 6,
        };
        let renewals = vec![
            RenewalEntry {
                renewal_date: date(2024, 9, 1),
                renewal_duration: "3 meses".to_string(),
            },
            RenewalEntry {
                renewal_date: date(2025, 2, 1),
                renewal_duration: "12 meses".to_string(),
            },
        ];
        let ContractValidity::Valid(snapshot) =
            compute_validity(&terms, &renewals, date(2025, 3, 1))
        else {
            panic!("expected a valid snapshot");
        };
        assert_eq!(snapshot.expiration_date, date(2026, 2, 1));
        assert_eq!(snapshot.months_contracted, 6 + 3 + 12);
    }

    #[test]
    fn placement_date_wins_over_contract_date() {
        let terms = ContractTerms {
            placement_date: Some(date(2025, 2, 10)),
            contract_date: Some(date(2025, 1, 1)),
            contract_duration: 3,
        };
        let ContractValidity::Valid(snapshot) =
            compute_validity(&terms, &[], date(2025, 3, 1))
        else {
            panic!("expected a valid snapshot");
        };
        assert_eq!(snapshot.expiration_date, date(2025, 5, 10));
    }

    #[test]
    fn malformed_data_degrades_to_indeterminate() {
        let no_dates = ContractTerms {
            placement_date: None,
            contract_date: None,
            contract_duration: 12,
        };
        assert_eq!(
            compute_validity(&no_dates, &[], date(2025, 1, 1)),
            ContractValidity::Indeterminate(IndeterminateReason::MissingBaseDate)
        );

        let legacy_year = ContractTerms {
            placement_date: Some(date(1999, 12, 31)),
            contract_date: None,
            contract_duration: 12,
        };
        assert_eq!(
            compute_validity(&legacy_year, &[], date(2025, 1, 1)),
            ContractValidity::Indeterminate(IndeterminateReason::MissingBaseDate)
        );

        let zero_duration = ContractTerms {
            placement_date: Some(date(2025, 1, 1)),
            contract_date: None,
            contract_duration: 0,
        };
        assert_eq!(
            compute_validity(&zero_duration, &[], date(2025, 1, 1)),
            ContractValidity::Indeterminate(IndeterminateReason::NonPositiveDuration)
        );
    }

    #[test]
    fn renewal_without_digits_makes_expiration_unresolvable() {
        let terms = ContractTerms {
            placement_date: Some(date(2025, 1, 1)),
            contract_date: None,
            contract_duration: 12,
        };
        let renewals = vec![RenewalEntry {
            renewal_date: date(2025, 6, 1),
            renewal_duration: "indefinido".to_string(),
        }];
        assert_eq!(
            compute_validity(&terms, &renewals, date(2025, 7, 1)),
            ContractValidity::Indeterminate(IndeterminateReason::UnresolvableExpiration)
        );
    }

    #[test]
    fn expired_contract_is_inactive() {
        let terms = ContractTerms {
            placement_date: None,
            contract_date: Some(date(2023, 1, 1)),
            contract_duration: 12,
        };
        let ContractValidity::Valid(snapshot) =
            compute_validity(&terms, &[], date(2025, 1, 1))
        else {
            panic!("expected a valid snapshot");
        };
        assert_eq!(snapshot.expiration_date, date(2024, 1, 1));
        assert!(!snapshot.is_active);
        assert!(snapshot.days_remaining < 0);
    }

    #[test]
    fn indeterminate_payload_uses_na_sentinels() {
        let payload = ContractValidity::Indeterminate(IndeterminateReason::MissingBaseDate)
            .to_payload();
        assert_eq!(payload["expiration_date"], "N/A");
        assert_eq!(payload["months_contracted"], "N/A");
        assert_eq!(payload["days_remaining"], "N/A");
        assert_eq!(payload["is_active"], false);
        assert!(payload["last_renewal"].is_null());
    }

    #[test]
    fn valid_payload_formats_dates() {
        let terms = ContractTerms {
            placement_date: None,
            contract_date: Some(date(2025, 1, 1)),
            contract_duration: 12,
        };
        let payload = compute_validity(&terms, &[], date(2025, 6, 1)).to_payload();
        assert_eq!(payload["expiration_date"], "2026-01-01");
        assert_eq!(payload["months_contracted"], 12);
        assert_eq!(payload["is_active"], true);
    }

    #[test]
    fn reads_terms_and_renewals_from_json_rows() {
        let client = json!({
            "placement_date": "2025-03-01",
            "contract_date": null,
            "contract_duration": 9
        });
        let terms = ContractTerms::from_row(&client);
        assert_eq!(terms.placement_date, Some(date(2025, 3, 1)));
        assert_eq!(terms.contract_date, None);
        assert_eq!(terms.contract_duration, 9);

        let renewal = json!({
            "renewal_date": "2025-10-01",
            "renewal_duration": "6 meses"
        });
        let entry = RenewalEntry::from_row(&renewal).expect("parses");
        assert_eq!(entry.renewal_date, date(2025, 10, 1));
        assert_eq!(entry.renewal_duration, "6 meses");

        assert!(RenewalEntry::from_row(&json!({ "renewal_duration": "6 meses" })).is_none());
    }
}

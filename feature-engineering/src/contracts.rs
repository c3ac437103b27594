//! Output column contracts for feature tables
//!
//! Each feature publishes its columns in a fixed order with a unit hint. The
//! hint drives the checks in [`validate_rows`]; metrics that are NaN
//! serialize as `null` and are exempt from range checks.

use chrono::NaiveDate;
use common::{FeatureError, FeatureResult};
use serde::Serialize;
use serde_json::Value;

/// Slack allowed on bounded ratios
const RATIO_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitHint {
    Identifier,
    Date,
    Window,
    Shares,
    Ratio,
    PricePerShare,
    InvDollar,
    Price,
    Probability,
    ProbabilityDelta,
    Count,
    QcFlag,
    /// Events per second
    Rate,
    Seconds,
    /// Unbounded real-valued statistic
    Score,
}

impl UnitHint {
    fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::Identifier | Self::Window => match value {
                Value::String(_) => Ok(()),
                other => Err(format!("expected a string, got {other}")),
            },
            Self::Date => match value {
                Value::String(s) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Ok(()),
                other => Err(format!("expected a YYYY-MM-DD date, got {other}")),
            },
            Self::Count => match value {
                Value::Number(n) if n.is_u64() => Ok(()),
                other => Err(format!("expected a non-negative integer, got {other}")),
            },
            Self::QcFlag => match value {
                Value::Bool(_) => Ok(()),
                other => Err(format!("expected a boolean, got {other}")),
            },
            Self::Shares | Self::Price | Self::PricePerShare | Self::Score => {
                numeric(value).map(|_| ())
            }
            Self::InvDollar | Self::Rate | Self::Seconds => match numeric(value)? {
                Some(x) if x < 0.0 => Err(format!("expected a non-negative value, got {x}")),
                _ => Ok(()),
            },
            Self::Ratio | Self::ProbabilityDelta => match numeric(value)? {
                Some(x) if x.abs() > 1.0 + RATIO_TOLERANCE => {
                    Err(format!("expected a value in [-1, 1], got {x}"))
                }
                _ => Ok(()),
            },
            Self::Probability => match numeric(value)? {
                Some(x) if !(0.0..=1.0).contains(&x) => {
                    Err(format!("expected a value in [0, 1], got {x}"))
                }
                _ => Ok(()),
            },
        }
    }
}

/// `None` for a null metric
fn numeric(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        other => Err(format!("expected a number, got {other}")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub column: &'static str,
    pub unit: UnitHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureContract {
    pub feature: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl FeatureContract {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.column).collect()
    }
}

const fn col(column: &'static str, unit: UnitHint) -> ColumnSpec {
    ColumnSpec { column, unit }
}

const KEY: [ColumnSpec; 3] = [
    col("symbol", UnitHint::Identifier),
    col("date", UnitHint::Date),
    col("window", UnitHint::Window),
];

static CONTRACTS: &[FeatureContract] = &[
    FeatureContract {
        feature: "compute_ofi",
        columns: &[
            KEY[0],
            KEY[1],
            KEY[2],
            col("ofi", UnitHint::Shares),
            col("ofi_obs", UnitHint::Count),
            col("ofi_qc_pass", UnitHint::QcFlag),
        ],
    },
    FeatureContract {
        feature: "book_imbalance",
        columns: &[
            KEY[0],
            KEY[1],
            KEY[2],
            col("book_imbalance", UnitHint::Ratio),
            col("book_imbalance_obs", UnitHint::Count),
            col("book_imbalance_qc_pass", UnitHint::QcFlag),
        ],
    },
    FeatureContract {
        feature: "kyle_lambda",
        columns: &[
            KEY[0],
            KEY[1],
            KEY[2],
            col("kyle_lambda", UnitHint::PricePerShare),
            col("kyle_lambda_obs", UnitHint::Count),
            col("kyle_lambda_qc_pass", UnitHint::QcFlag),
        ],
    },
    FeatureContract {
        feature: "amihud_illiq",
        columns: &[
            KEY[0],
            KEY[1],
            KEY[2],
            col("amihud_illiq", UnitHint::InvDollar),
            col("amihud_obs", UnitHint::Count),
            col("amihud_qc_pass", UnitHint::QcFlag),
        ],
    },
    FeatureContract {
        feature: "spreads",
        columns: &[
            KEY[0],
            KEY[1],
            KEY[2],
            col("avg_spread", UnitHint::Price),
            col("avg_rel_spread", UnitHint::Ratio),
            col("spreads_obs", UnitHint::Count),
            col("spreads_qc_pass", UnitHint::QcFlag),
        ],
    },
    FeatureContract {
        feature: "compute_vpin",
        columns: &[
            KEY[0],
            KEY[1],
            KEY[2],
            col("vpin", UnitHint::Probability),
            col("vpin_change", UnitHint::ProbabilityDelta),
            col("vpin_obs", UnitHint::Count),
            col("vpin_buckets", UnitHint::Count),
            col("vpin_qc_pass", UnitHint::QcFlag),
        ],
    },
    FeatureContract {
        feature: "hawkes_self_excitation_metrics",
        columns: &[
            KEY[0],
            KEY[1],
            KEY[2],
            col("event_type", UnitHint::Identifier),
            col("branching_ratio", UnitHint::Ratio),
            col("kernel_norm", UnitHint::Rate),
            col("baseline", UnitHint::Rate),
            col("amplitude", UnitHint::Rate),
            col("decay", UnitHint::Rate),
            col("log_likelihood", UnitHint::Score),
            col("n_events", UnitHint::Count),
            col("duration", UnitHint::Seconds),
            col("converged", UnitHint::QcFlag),
            col("poisson_fallback", UnitHint::QcFlag),
        ],
    },
];

/// Contract for a feature by operation name
pub fn contract(name: &str) -> Option<&'static FeatureContract> {
    CONTRACTS.iter().find(|c| c.feature == name)
}

pub fn feature_names() -> impl Iterator<Item = &'static str> {
    CONTRACTS.iter().map(|c| c.feature)
}

/// Check serialized rows against a feature's contract.
///
/// Every row must be an object whose keys match the contract's columns in
/// order, and every cell must satisfy its unit hint.
pub fn validate_rows(name: &str, rows: &[Value]) -> FeatureResult<()> {
    let contract = contract(name).ok_or_else(|| {
        FeatureError::invalid_parameter(
            "feature",
            format!("one of {}", feature_names().collect::<Vec<_>>().join(", ")),
            name,
        )
    })?;
    let expected = contract.column_names();

    for (row_idx, row) in rows.iter().enumerate() {
        let Value::Object(fields) = row else {
            return Err(FeatureError::invalid_value(name, row_idx, "row is not an object"));
        };

        let actual: Vec<&str> = fields.keys().map(String::as_str).collect();
        if actual != expected {
            return Err(FeatureError::invalid_value(
                name,
                row_idx,
                format!("columns {actual:?} do not match {expected:?}"),
            ));
        }

        for spec in contract.columns {
            let value = fields.get(spec.column).unwrap_or(&Value::Null);
            spec.unit
                .check(value)
                .map_err(|reason| FeatureError::invalid_value(spec.column, row_idx, reason))?;
        }
    }
    Ok(())
}

/// Serialize rows and check them against `name`'s contract
pub fn validate_serialized<T: Serialize>(name: &str, rows: &[T]) -> FeatureResult<()> {
    let values = rows
        .iter()
        .enumerate()
        .map(|(row, r)| {
            serde_json::to_value(r)
                .map_err(|e| FeatureError::invalid_value(name, row, e.to_string()))
        })
        .collect::<FeatureResult<Vec<_>>>()?;
    validate_rows(name, &values)
}

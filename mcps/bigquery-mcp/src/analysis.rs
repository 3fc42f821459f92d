//! Column profiling
//!
//! Builds the per-column profiling queries run by `analyze_columns`, turns
//! their single result row into a profile, and classifies columns by name,
//! type and cardinality. `analyze_table` profiles a fetched sample in memory
//! with the same classifier.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::{Row, SchemaField};
use crate::format::cell_text;

/// How many distinct values a column may have before example values are dropped
const EXAMPLE_CARDINALITY: usize = 20;
const MAX_EXAMPLES: usize = 10;

/// Map legacy REST type names onto GoogleSQL names
pub fn normalize_type(field_type: &str) -> String {
    let upper = field_type.to_ascii_uppercase();
    match upper.as_str() {
        "INTEGER" => "INT64".to_string(),
        "FLOAT" => "FLOAT64".to_string(),
        "BOOLEAN" => "BOOL".to_string(),
        "RECORD" => "STRUCT".to_string(),
        _ => upper,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Numeric,
    Text,
    /// Temporal column with the matching *_DIFF function
    Temporal(&'static str),
    Generic,
}

pub fn profile_kind(field: &SchemaField) -> ProfileKind {
    if field.is_repeated() {
        return ProfileKind::Generic;
    }
    match normalize_type(&field.field_type).as_str() {
        "INT64" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => ProfileKind::Numeric,
        "STRING" => ProfileKind::Text,
        "DATE" => ProfileKind::Temporal("DATE_DIFF"),
        "DATETIME" => ProfileKind::Temporal("DATETIME_DIFF"),
        "TIMESTAMP" => ProfileKind::Temporal("TIMESTAMP_DIFF"),
        _ => ProfileKind::Generic,
    }
}

// ============================================================================
// Profiling SQL
// ============================================================================

/// Profiling query for one column over the first `sample_size` rows.
///
/// `table` is a validated `project.dataset.table` path. The column is
/// aliased to `v` so the outer query never repeats the quoted name.
pub fn build_profile_query(table: &str, field: &SchemaField, sample_size: u64) -> String {
    let sample = format!(
        "WITH sample_data AS (\n  SELECT `{}` AS v\n  FROM `{}`\n  LIMIT {}\n)",
        field.name, table, sample_size
    );

    match profile_kind(field) {
        ProfileKind::Numeric => format!(
            "{sample}\nSELECT\n  COUNT(*) AS total_count,\n  COUNTIF(v IS NULL) AS null_count,\n  \
             COUNT(DISTINCT v) AS distinct_count,\n  MIN(v) AS min_value,\n  MAX(v) AS max_value,\n  \
             AVG(v) AS avg_value,\n  STDDEV(v) AS stddev_value,\n  APPROX_QUANTILES(v, 4) AS quartiles\n\
             FROM sample_data\nLIMIT 1"
        ),
        ProfileKind::Text => format!(
            "{sample},\ntop_values AS (\n  SELECT v AS value, COUNT(*) AS freq\n  FROM sample_data\n  \
             WHERE v IS NOT NULL\n  GROUP BY v\n  ORDER BY freq DESC\n  LIMIT {MAX_EXAMPLES}\n)\n\
             SELECT\n  COUNT(*) AS total_count,\n  COUNTIF(v IS NULL) AS null_count,\n  \
             COUNT(DISTINCT v) AS distinct_count,\n  MIN(LENGTH(v)) AS min_length,\n  \
             MAX(LENGTH(v)) AS max_length,\n  AVG(LENGTH(v)) AS avg_length,\n  \
             (SELECT ARRAY_AGG(STRUCT(value, freq) ORDER BY freq DESC) FROM top_values) AS top_values\n\
             FROM sample_data\nLIMIT 1"
        ),
        ProfileKind::Temporal(diff) => format!(
            "{sample}\nSELECT\n  COUNT(*) AS total_count,\n  COUNTIF(v IS NULL) AS null_count,\n  \
             COUNT(DISTINCT v) AS distinct_count,\n  MIN(v) AS min_value,\n  MAX(v) AS max_value,\n  \
             {diff}(MAX(v), MIN(v), DAY) AS range_days\nFROM sample_data\nLIMIT 1"
        ),
        ProfileKind::Generic => format!(
            "{sample}\nSELECT\n  COUNT(*) AS total_count,\n  COUNTIF(v IS NULL) AS null_count,\n  \
             COUNT(DISTINCT TO_JSON_STRING(v)) AS distinct_count\nFROM sample_data\nLIMIT 1"
        ),
    }
}

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub data_type: String,
    pub nullable: bool,
    pub null_ratio: f64,
    pub category: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likely_primary_key: Option<bool>,
    pub cardinality_type: &'static str,
}

/// Classify a column from its name, type and observed cardinality
pub fn classify_column(
    name: &str,
    data_type: &str,
    null_ratio: f64,
    cardinality: u64,
    sample_size: u64,
) -> Classification {
    let data_type = normalize_type(data_type);
    let lower = name.to_ascii_lowercase();
    let mut likely_primary_key = None;

    let is_identifier = lower == "id"
        || ["_id", "id_", "_key", "key_"]
            .iter()
            .any(|marker| lower.contains(marker));

    let category = if is_identifier {
        likely_primary_key = Some(null_ratio == 0.0 && cardinality == sample_size);
        "identifier"
    } else {
        match data_type.as_str() {
            "TIMESTAMP" | "DATETIME" | "DATE" | "TIME" => "temporal",
            "INT64" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
                if cardinality < 10 {
                    "categorical_numeric"
                } else {
                    "measure"
                }
            }
            "STRING" => {
                let uniqueness = if sample_size > 0 {
                    cardinality as f64 / sample_size as f64
                } else {
                    0.0
                };
                if uniqueness > 0.95 {
                    "high_cardinality_string"
                } else if cardinality < 50 {
                    "categorical"
                } else {
                    "descriptive"
                }
            }
            "BOOL" => "boolean",
            "STRUCT" | "ARRAY" | "JSON" => "complex",
            _ => "other",
        }
    };

    let cardinality_type = match cardinality {
        1 => "constant",
        2 => "binary",
        c if c < 10 => "low",
        c if c < 100 => "medium",
        _ => "high",
    };

    Classification {
        data_type,
        nullable: null_ratio > 0.0,
        null_ratio: round_to(null_ratio, 4),
        category,
        likely_primary_key,
        cardinality_type,
    }
}

// ============================================================================
// Profile results
// ============================================================================

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn as_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_to(part as f64 / total as f64 * 100.0, 2)
    }
}

/// Turn one profiling result row into the column's analysis object
pub fn summarize_profile(field: &SchemaField, row: &Row, include_examples: bool) -> Value {
    let total = as_u64(row.get("total_count"));
    let nulls = as_u64(row.get("null_count"));
    let distinct = as_u64(row.get("distinct_count"));
    let null_ratio = if total > 0 {
        nulls as f64 / total as f64
    } else {
        0.0
    };

    let mut analysis = json!({
        "column_name": field.name,
        "data_type": field.field_type,
        "mode": field.mode,
        "description": field.description,
        "total_rows_analyzed": total,
        "null_analysis": {
            "null_count": nulls,
            "non_null_count": total.saturating_sub(nulls),
            "null_percentage": percent(nulls, total),
            "is_nullable": !field.mode.eq_ignore_ascii_case("REQUIRED"),
        },
        "cardinality": {
            "distinct_count": distinct,
            "distinct_percentage": percent(distinct, total),
            "is_unique": total > 0 && distinct == total,
            "has_duplicates": distinct < total,
        },
    });

    match profile_kind(field) {
        ProfileKind::Numeric => {
            let mut stats = json!({
                "min": as_f64(row.get("min_value")),
                "max": as_f64(row.get("max_value")),
                "avg": as_f64(row.get("avg_value")),
                "stddev": as_f64(row.get("stddev_value")),
            });
            if let Some(Value::Array(q)) = row.get("quartiles") {
                if q.len() == 5 {
                    stats["quartiles"] = json!({
                        "q0_min": as_f64(q.first()),
                        "q1": as_f64(q.get(1)),
                        "q2_median": as_f64(q.get(2)),
                        "q3": as_f64(q.get(3)),
                        "q4_max": as_f64(q.get(4)),
                    });
                }
            }
            analysis["numeric_stats"] = stats;
        }
        ProfileKind::Text => {
            analysis["string_stats"] = json!({
                "min_length": as_f64(row.get("min_length")),
                "max_length": as_f64(row.get("max_length")),
                "avg_length": as_f64(row.get("avg_length")).map(|v| round_to(v, 2)),
            });
            if include_examples {
                if let Some(Value::Array(items)) = row.get("top_values") {
                    let top: Vec<Value> = items
                        .iter()
                        .filter(|item| !item["value"].is_null())
                        .take(MAX_EXAMPLES)
                        .map(|item| {
                            let count = as_u64(item.get("freq"));
                            json!({
                                "value": item["value"],
                                "count": count,
                                "percentage": percent(count, total),
                            })
                        })
                        .collect();
                    analysis["top_values"] = Value::Array(top);
                }
            }
        }
        ProfileKind::Temporal(_) => {
            analysis["temporal_stats"] = json!({
                "min_value": row.get("min_value").cloned().unwrap_or(Value::Null),
                "max_value": row.get("max_value").cloned().unwrap_or(Value::Null),
                "range_days": row.get("range_days").and_then(|v| as_f64(Some(v))),
            });
        }
        ProfileKind::Generic => {}
    }

    analysis["classification"] = json!(classify_column(
        &field.name,
        &field.field_type,
        null_ratio,
        distinct,
        total
    ));
    analysis["data_quality"] = json!({
        "completeness": round_to((1.0 - null_ratio) * 100.0, 2),
        "uniqueness": percent(distinct, total),
        "has_nulls": nulls > 0,
    });

    analysis
}

/// Compact per-column view: null percentage, distinct count and category
pub fn compact_profile(analysis: &Value) -> Value {
    if analysis.get("error").is_some() {
        return analysis.clone();
    }
    json!({
        "nulls": format!(
            "{:.1}%",
            analysis["null_analysis"]["null_percentage"].as_f64().unwrap_or(0.0)
        ),
        "distinct": analysis["cardinality"]["distinct_count"],
        "type": analysis["classification"]["category"],
    })
}

/// Column name lists flagging notable columns across an analysis
pub fn analysis_summary(columns: &[Value]) -> Value {
    let names = |pred: &dyn Fn(&Value) -> bool| -> Vec<Value> {
        columns
            .iter()
            .filter(|c| pred(c))
            .map(|c| c["column_name"].clone())
            .collect()
    };

    json!({
        "high_null_columns": names(&|c| {
            c["null_analysis"]["null_percentage"].as_f64().unwrap_or(0.0) > 50.0
        }),
        "unique_columns": names(&|c| c["cardinality"]["is_unique"].as_bool().unwrap_or(false)),
        "constant_columns": names(&|c| c["cardinality"]["distinct_count"].as_u64() == Some(1)),
        "high_cardinality_columns": names(&|c| {
            c["cardinality"]["distinct_percentage"].as_f64().unwrap_or(0.0) > 90.0
        }),
    })
}

// ============================================================================
// In-memory sample profiling
// ============================================================================

/// Per-column statistics over rows already fetched
pub fn profile_sample(schema: &[SchemaField], rows: &[Row]) -> Vec<Value> {
    let sample_size = rows.len() as u64;

    schema
        .iter()
        .map(|field| {
            let mut nulls = 0u64;
            let mut counts: HashMap<String, u64> = HashMap::new();
            for row in rows {
                match row.get(&field.name) {
                    None | Some(Value::Null) => nulls += 1,
                    Some(value) => *counts.entry(cell_text(value)).or_default() += 1,
                }
            }
            let distinct = counts.len() as u64;
            let null_ratio = if sample_size > 0 {
                nulls as f64 / sample_size as f64
            } else {
                0.0
            };

            let mut column = json!({
                "name": field.name,
                "type": field.field_type,
                "mode": field.mode,
                "description": field.description,
                "null_count": nulls,
                "null_percentage": round_to(null_ratio * 100.0, 2),
                "distinct_count": distinct,
                "classification": classify_column(
                    &field.name,
                    &field.field_type,
                    null_ratio,
                    distinct,
                    sample_size,
                ),
            });

            if !counts.is_empty() && counts.len() <= EXAMPLE_CARDINALITY {
                let mut values: Vec<(String, u64)> = counts.into_iter().collect();
                values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                column["sample_values"] = values
                    .into_iter()
                    .take(MAX_EXAMPLES)
                    .map(|(value, count)| json!({ "value": value, "count": count }))
                    .collect();
            }

            column
        })
        .collect()
}

/// Names from `requested` that the schema does not have
pub fn unknown_columns(schema: &[SchemaField], requested: &[String]) -> Vec<String> {
    let known: HashSet<&str> = schema.iter().map(|f| f.name.as_str()).collect();
    requested
        .iter()
        .filter(|c| !known.contains(c.as_str()))
        .cloned()
        .collect()
}

//! Result rendering for tool responses
//!
//! Query rows are returned as JSON objects by default, or rendered to CSV or
//! a plain-text table on request. Compact mode trims schemas and metadata to
//! the fields an agent actually needs.

use query_gate::lexer::{tokenize, TokenKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::backend::{Row, SchemaField, TableMetadata};
use crate::types::BqError;

/// On-demand analysis price used for dry-run estimates
const USD_PER_TIB: f64 = 5.0;
const BYTES_PER_TIB: f64 = 1_099_511_627_776.0;
const BYTES_PER_MIB: f64 = 1_048_576.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    Table,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Table => "table",
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// Column order for rendering: the schema's, or the first row's keys
fn column_names(schema: &[SchemaField], rows: &[Row]) -> Vec<String> {
    if !schema.is_empty() {
        return schema.iter().map(|f| f.name.clone()).collect();
    }
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

/// Text form of a cell; NULL renders empty, nested values as JSON
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn to_csv(schema: &[SchemaField], rows: &[Row]) -> Result<String, BqError> {
    if rows.is_empty() {
        return Ok(String::new());
    }

    let columns = column_names(schema, rows);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|e| BqError::Format(e.to_string()))?;

    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|col| row.get(col).map(cell_text).unwrap_or_default())
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| BqError::Format(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| BqError::Format(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| BqError::Format(e.to_string()))
}

/// Left-aligned plain-text table with a dashed header rule
pub fn to_table(schema: &[SchemaField], rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No results".to_string();
    }

    let columns = column_names(schema, rows);
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|col| row.get(col).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(value, &width)| format!("{:<width$}", value, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let header = render(&columns);
    let rule = "-".repeat(header.chars().count());
    let mut lines = vec![header, rule];
    for row in &cells {
        lines.push(render(row));
    }
    lines.join("\n")
}

// ============================================================================
// Schema and metadata
// ============================================================================

/// Compact: `{column: TYPE}`. Standard: full field list.
pub fn format_schema(schema: &[SchemaField], compact: bool) -> Value {
    if compact {
        let map: Map<String, Value> = schema
            .iter()
            .map(|f| (f.name.clone(), Value::String(f.field_type.clone())))
            .collect();
        Value::Object(map)
    } else {
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }
}

pub fn format_table_info(table: &TableMetadata, compact: bool) -> Value {
    if compact {
        json!({
            "table": table.full_path(),
            "type": table.table_type,
            "rows": table.num_rows,
            "size_mb": bytes_to_mb(table.num_bytes),
            "created": table.created.map(|ts| ts.to_rfc3339()),
            "schema": format_schema(&table.schema, true),
        })
    } else {
        let mut info = json!({
            "status": "success",
            "project_id": table.project_id,
            "dataset_id": table.dataset_id,
            "table_id": table.table_id,
            "full_path": table.full_path(),
            "table_type": table.table_type,
            "description": table.description,
            "num_rows": table.num_rows,
            "size_bytes": table.num_bytes,
            "size_mb": bytes_to_mb(table.num_bytes),
            "created": table.created.map(|ts| ts.to_rfc3339()),
            "modified": table.modified.map(|ts| ts.to_rfc3339()),
            "location": table.location,
            "schema": format_schema(&table.schema, false),
            "total_columns": table.schema.len(),
        });
        if let Some(partitioning) = &table.partitioning {
            info["partitioning"] = serde_json::to_value(partitioning).unwrap_or(Value::Null);
        }
        if !table.clustering_fields.is_empty() {
            info["clustering_fields"] = json!(table.clustering_fields);
        }
        info
    }
}

// ============================================================================
// Numbers and log helpers
// ============================================================================

pub fn bytes_to_mb(bytes: u64) -> f64 {
    round_to(bytes as f64 / BYTES_PER_MIB, 2)
}

pub fn estimate_cost_usd(bytes: u64) -> f64 {
    round_to(bytes as f64 / BYTES_PER_TIB * USD_PER_TIB, 6)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Shorten query text for logs, on a char boundary
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::VeryComplex => "very_complex",
        }
    }
}

/// Rough cost class from the query's keywords (literals and comments ignored)
pub fn estimate_complexity(sql: &str) -> Complexity {
    let Ok(tokens) = tokenize(sql) else {
        return Complexity::Simple;
    };
    let words: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| t.text)
        .collect();

    let count = |word: &str| words.iter().filter(|w| w.eq_ignore_ascii_case(word)).count();
    let has_pair = |first: &str, second: &str| {
        words
            .windows(2)
            .any(|w| w[0].eq_ignore_ascii_case(first) && w[1].eq_ignore_ascii_case(second))
    };

    let mut score = count("JOIN") * 2;
    if count("OVER") > 0 || count("WINDOW") > 0 {
        score += 3;
    }
    if has_pair("GROUP", "BY") {
        score += 1;
    }
    if has_pair("ORDER", "BY") {
        score += 1;
    }
    if count("UNION") > 0 {
        score += 2;
    }
    score += count("WITH");

    match score {
        0 => Complexity::Simple,
        1..=3 => Complexity::Moderate,
        4..=7 => Complexity::Complex,
        _ => Complexity::VeryComplex,
    }
}

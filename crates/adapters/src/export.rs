use dbview_core::query_runner::{CellValue, ResultSet};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
}

/// Header row followed by one line per row. Nulls are written as empty
/// fields.
#[must_use]
pub fn result_set_to_csv(result: &ResultSet) -> String {
    let mut content = String::new();
    content.push_str(
        &result
            .columns
            .iter()
            .map(|header| csv_escape(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    content.push('\n');

    for row in &result.rows {
        let mut values = Vec::with_capacity(result.columns.len());
        for column_index in 0..result.columns.len() {
            let value = match row.values.get(column_index) {
                None | Some(CellValue::Null) => String::new(),
                Some(cell) => csv_escape(&cell.to_string()),
            };
            values.push(value);
        }
        content.push_str(&values.join(","));
        content.push('\n');
    }

    content
}

/// Array of objects keyed by column name, values keeping their JSON type.
pub fn result_set_to_json(result: &ResultSet) -> Result<String, ExportError> {
    let mut records = Vec::with_capacity(result.rows.len());
    for row in &result.rows {
        let mut object = Map::with_capacity(result.columns.len());
        for (column_index, header) in result.columns.iter().enumerate() {
            let value = match row.values.get(column_index) {
                Some(cell) => serde_json::to_value(cell)?,
                None => Value::Null,
            };
            object.insert(header.clone(), value);
        }
        records.push(Value::Object(object));
    }

    Ok(serde_json::to_string_pretty(&records)?)
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

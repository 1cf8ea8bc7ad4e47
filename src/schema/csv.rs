//! Pipe-delimited CSV ingest (spec §6.2).
//!
//! Hustle's bulk-load format is a `|`-delimited line per record, one field
//! per schema column in order. `parse_line` hands back borrowed `&str`
//! slices so the decimal-to-native-width re-encoding in [`decode_row`]
//! touches each field once, avoiding an allocation per field on the hot
//! ingest path.

use crate::block::Value;
use crate::error::{HustleError, Result};
use crate::schema::{DataType, Schema};
use crate::table::Table;

/// Split one ingest line into its `|`-delimited fields, validating the
/// field count against `schema`.
pub fn parse_line<'a>(line: &'a str, schema: &Schema) -> Result<Vec<&'a str>> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() != schema.num_fields() {
        return Err(HustleError::Schema(format!(
            "expected {} fields, found {}",
            schema.num_fields(),
            fields.len()
        )));
    }
    Ok(fields)
}

/// Decode one line's fields into typed values per `schema`: integer columns
/// are parsed as signed decimals and re-encoded into the column's native
/// width, string columns are taken verbatim, and fixed binary columns are
/// rejected (CSV has no escaping for opaque bytes).
pub fn decode_row(line: &str, schema: &Schema) -> Result<Vec<Value>> {
    let fields = parse_line(line, schema)?;
    fields
        .into_iter()
        .zip(&schema.fields)
        .map(|(field, column)| match column.data_type {
            DataType::Utf8 => Ok(Value::Text(field.to_string())),
            DataType::FixedBinary(_) => Err(HustleError::Schema(format!(
                "column {:?} is fixed binary, which CSV ingest cannot decode",
                column.name
            ))),
            _ => field
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| HustleError::Schema(format!("column {:?}: invalid integer {field:?}: {e}", column.name))),
        })
        .collect()
}

/// Parse one ingest line and insert it into `table`, returning the new
/// row's external row id.
pub fn ingest_line(table: &Table, line: &str) -> Result<u64> {
    let row = decode_row(line, table.schema())?;
    table.insert_record(&row)
}

/// Parse and insert every non-empty line of a multi-line CSV payload,
/// returning the row ids assigned in order.
pub fn ingest(table: &Table, text: &str) -> Result<Vec<u64>> {
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| ingest_line(table, line))
        .collect()
}

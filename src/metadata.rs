//! Small materialized aggregates (SMA) used to prune blocks before a
//! predicate scans their rows (spec §4.2).
//!
//! Each column of each block gets a `min`/`max` summary computed from the
//! valid rows. `Select` consults `ColumnSma::can_skip` before scanning a
//! block's data at all; this mirrors the original `select.cc`'s templated
//! `Filter<T, Op>` short-circuit on SMA bounds.

use crate::block::{Block, ColumnStorage, Value};
use crate::predicate::CompareOp;
use crate::schema::DataType;

/// Min/max summary for one column within one block.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSma {
    pub min: Value,
    pub max: Value,
}

fn value_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Text(x), Value::Text(y)) => x.partial_cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.partial_cmp(y),
        _ => None,
    }
}

impl ColumnSma {
    /// Compute the SMA for column `col_idx` of `block`, over valid rows
    /// only. Returns `None` for an entirely-empty or all-invalid block.
    pub fn compute(block: &Block, col_idx: usize) -> Option<ColumnSma> {
        let field = block.schema().field(col_idx)?;
        let mut min: Option<Value> = None;
        let mut max: Option<Value> = None;
        for row in 0..block.num_rows() {
            if !block.valid(row) {
                continue;
            }
            let value = match block.column(col_idx) {
                ColumnStorage::Fixed(_) => {
                    let width = field.data_type.fixed_width().unwrap();
                    decode_for_sma(block.column(col_idx).fixed_element(row, width), field.data_type)
                }
                ColumnStorage::Utf8 { .. } => {
                    Value::Text(block.column(col_idx).utf8_element(row).to_string())
                }
            };
            min = Some(match min {
                None => value.clone(),
                Some(m) => {
                    if value_cmp(&value, &m) == Some(std::cmp::Ordering::Less) {
                        value.clone()
                    } else {
                        m
                    }
                }
            });
            max = Some(match max {
                None => value.clone(),
                Some(m) => {
                    if value_cmp(&value, &m) == Some(std::cmp::Ordering::Greater) {
                        value
                    } else {
                        m
                    }
                }
            });
        }
        Some(ColumnSma {
            min: min?,
            max: max?,
        })
    }

    /// Returns true if no row in the block can possibly satisfy
    /// `op value` given this column's [min, max] range, i.e. the block can
    /// be skipped entirely without scanning its rows.
    pub fn can_skip(&self, op: CompareOp, value: &Value) -> bool {
        match op {
            CompareOp::Eq => {
                matches!(value_cmp(value, &self.min), Some(std::cmp::Ordering::Less))
                    || matches!(value_cmp(value, &self.max), Some(std::cmp::Ordering::Greater))
            }
            CompareOp::Ne => false,
            CompareOp::Lt => {
                matches!(value_cmp(&self.min, value), Some(std::cmp::Ordering::Greater))
                    || value_cmp(&self.min, value) == Some(std::cmp::Ordering::Equal)
            }
            CompareOp::Le => matches!(value_cmp(&self.min, value), Some(std::cmp::Ordering::Greater)),
            CompareOp::Gt => {
                matches!(value_cmp(&self.max, value), Some(std::cmp::Ordering::Less))
                    || value_cmp(&self.max, value) == Some(std::cmp::Ordering::Equal)
            }
            CompareOp::Ge => matches!(value_cmp(&self.max, value), Some(std::cmp::Ordering::Less)),
            CompareOp::Between => false,
        }
    }
}

fn decode_for_sma(bytes: &[u8], data_type: DataType) -> Value {
    match data_type {
        DataType::Int8 => Value::Int(bytes[0] as i8 as i64),
        DataType::Int16 => Value::Int(i16::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DataType::Int32 => Value::Int(i32::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DataType::Int64 => Value::Int(i64::from_le_bytes(bytes.try_into().unwrap())),
        DataType::UInt8 => Value::Int(bytes[0] as i64),
        DataType::UInt16 => Value::Int(u16::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DataType::UInt32 => Value::Int(u32::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DataType::UInt64 => Value::Int(u64::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DataType::Float64 => Value::Float(f64::from_le_bytes(bytes.try_into().unwrap())),
        DataType::FixedBinary(_) => Value::Bytes(bytes.to_vec()),
        DataType::Utf8 => unreachable!(),
    }
}

/// SMA for every column of one block. Rebuilt whenever the block is
/// mutated (see the "dirty list" in `Table`).
#[derive(Clone, Debug, Default)]
pub struct BlockSma {
    pub columns: Vec<Option<ColumnSma>>,
}

impl BlockSma {
    pub fn compute(block: &Block) -> Self {
        let columns = (0..block.num_cols())
            .map(|i| ColumnSma::compute(block, i))
            .collect();
        BlockSma { columns }
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnSma> {
        self.columns.get(idx).and_then(|c| c.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DEFAULT_BLOCK_CAPACITY;
    use crate::schema::{Field, Schema};
    use std::sync::Arc;

    fn block_with_ints(values: &[i64]) -> Block {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64)]));
        let mut block = Block::new(0, schema, DEFAULT_BLOCK_CAPACITY);
        for (i, v) in values.iter().enumerate() {
            block.insert_record(&[Value::Int(*v)], i as u64).unwrap();
        }
        block
    }

    #[test]
    fn computes_min_max_over_valid_rows() {
        let block = block_with_ints(&[5, 1, 9, 3]);
        let sma = ColumnSma::compute(&block, 0).unwrap();
        assert_eq!(sma.min, Value::Int(1));
        assert_eq!(sma.max, Value::Int(9));
    }

    #[test]
    fn skips_block_when_predicate_value_outside_range() {
        let block = block_with_ints(&[5, 1, 9, 3]);
        let sma = ColumnSma::compute(&block, 0).unwrap();
        assert!(sma.can_skip(CompareOp::Eq, &Value::Int(100)));
        assert!(!sma.can_skip(CompareOp::Eq, &Value::Int(5)));
        assert!(sma.can_skip(CompareOp::Gt, &Value::Int(9)));
        assert!(!sma.can_skip(CompareOp::Gt, &Value::Int(8)));
    }

    #[test]
    fn excludes_invalidated_rows_from_the_summary() {
        let mut block = block_with_ints(&[5, 1, 9, 3]);
        block.set_valid(2, false); // drop the 9
        let sma = ColumnSma::compute(&block, 0).unwrap();
        assert_eq!(sma.max, Value::Int(5));
    }
}

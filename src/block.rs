//! Physical columnar storage unit (spec §3/§4.1).
//!
//! A `Block` holds up to `capacity` bytes of column data across a fixed
//! schema, plus a byte-packed valid bitmap. Blocks are append-only in the
//! common case; deletions clear the valid bit in place, and compaction
//! rebuilds a fresh block from the surviving rows (`Block::rebuild_from`)
//! rather than mutating buffers in place, mirroring
//! `storage/block.h`'s `InsertRecords(block_map, row_map, ...)` overload.

pub mod io;

use std::sync::Arc;

use crate::buffer::{Bitmap, Buffer};
use crate::error::{HustleError, Result};
use crate::schema::{DataType, Schema};

pub type BlockId = u32;

/// Default block capacity in bytes, matching the original `BLOCK_SIZE`.
pub const DEFAULT_BLOCK_CAPACITY: usize = 1 << 20;

/// One decoded/typed field value, used both for serial-wire-format record
/// insertion and for CSV-parsed record insertion. Keeping a single owned
/// value type lets `Block::insert_record` stay a single code path instead
/// of the two parallel overloads the original C++ `Block` carried.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
}

impl Value {
    fn encoded_len(&self, data_type: DataType) -> usize {
        match data_type.fixed_width() {
            Some(w) => w,
            None => match self {
                Value::Text(s) => s.len(),
                Value::Bytes(b) => b.len(),
                _ => 0,
            },
        }
    }
}

/// Storage for one column's worth of data across all rows in a block.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnStorage {
    /// Native-width elements packed contiguously, little-endian.
    Fixed(Buffer),
    /// Variable-length UTF-8 text: `offsets[i]..offsets[i+1]` indexes into
    /// `data`. `offsets` always has `num_rows + 1` entries.
    Utf8 { offsets: Vec<i32>, data: Buffer },
}

impl ColumnStorage {
    fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::Utf8 => ColumnStorage::Utf8 {
                offsets: vec![0],
                data: Buffer::new(),
            },
            _ => ColumnStorage::Fixed(Buffer::new()),
        }
    }

    /// Borrow the raw bytes of element `row` for a fixed-width column.
    pub fn fixed_element(&self, row: usize, width: usize) -> &[u8] {
        match self {
            ColumnStorage::Fixed(buf) => buf.read_at(row * width, width),
            ColumnStorage::Utf8 { .. } => panic!("fixed_element called on Utf8 column"),
        }
    }

    pub fn utf8_element(&self, row: usize) -> &str {
        match self {
            ColumnStorage::Utf8 { offsets, data } => {
                let start = offsets[row] as usize;
                let end = offsets[row + 1] as usize;
                std::str::from_utf8(data.read_at(start, end - start)).unwrap_or("")
            }
            ColumnStorage::Fixed(_) => panic!("utf8_element called on fixed column"),
        }
    }

    pub fn num_rows(&self) -> usize {
        match self {
            ColumnStorage::Utf8 { offsets, .. } => offsets.len().saturating_sub(1),
            ColumnStorage::Fixed(_) => 0, // callers derive length from Block::num_rows
        }
    }
}

fn encode_fixed(value: &Value, data_type: DataType) -> Result<Vec<u8>> {
    let width = data_type
        .fixed_width()
        .ok_or_else(|| HustleError::Schema("encode_fixed called on variable-length type".into()))?;
    let int = |i: i64| -> Vec<u8> {
        match data_type {
            DataType::Int8 => (i as i8).to_le_bytes().to_vec(),
            DataType::Int16 => (i as i16).to_le_bytes().to_vec(),
            DataType::Int32 => (i as i32).to_le_bytes().to_vec(),
            DataType::Int64 => i.to_le_bytes().to_vec(),
            DataType::UInt8 => (i as u8).to_le_bytes().to_vec(),
            DataType::UInt16 => (i as u16).to_le_bytes().to_vec(),
            DataType::UInt32 => (i as u32).to_le_bytes().to_vec(),
            DataType::UInt64 => (i as u64).to_le_bytes().to_vec(),
            _ => unreachable!(),
        }
    };
    match (value, data_type) {
        (Value::Int(i), dt) if dt.is_integer() => Ok(int(*i)),
        (Value::Float(f), DataType::Float64) => Ok(f.to_le_bytes().to_vec()),
        (Value::Bytes(b), DataType::FixedBinary(n)) => {
            if b.len() != n as usize {
                return Err(HustleError::Schema(format!(
                    "fixed binary width mismatch: expected {n}, got {}",
                    b.len()
                )));
            }
            Ok(b.clone())
        }
        (Value::Null, _) => Ok(vec![0u8; width]),
        (v, dt) => Err(HustleError::Schema(format!(
            "cannot encode value {v:?} as {dt:?}"
        ))),
    }
}

/// A fixed-capacity columnar storage unit.
pub struct Block {
    id: BlockId,
    schema: Arc<Schema>,
    capacity: usize,
    num_bytes: usize,
    num_rows: usize,
    columns: Vec<ColumnStorage>,
    valid: Bitmap,
    /// slot -> external row id, used by `Table` to track provenance across
    /// delete-compaction rebuilds.
    row_id_map: Vec<u64>,
}

impl Block {
    pub fn new(id: BlockId, schema: Arc<Schema>, capacity: usize) -> Self {
        let columns = schema
            .fields
            .iter()
            .map(|f| ColumnStorage::new(f.data_type))
            .collect();
        Block {
            id,
            schema,
            capacity,
            num_bytes: 0,
            num_rows: 0,
            columns,
            valid: Bitmap::new(),
            row_id_map: Vec::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.schema.num_fields()
    }

    pub fn fixed_record_width(&self) -> usize {
        self.schema.fixed_record_width()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_left(&self) -> usize {
        self.capacity.saturating_sub(self.num_bytes)
    }

    pub fn valid(&self, row: usize) -> bool {
        self.valid.get(row)
    }

    pub fn set_valid(&mut self, row: usize, val: bool) {
        self.valid.set(row, val);
    }

    pub fn valid_bitmap(&self) -> &Bitmap {
        &self.valid
    }

    pub fn column(&self, index: usize) -> &ColumnStorage {
        &self.columns[index]
    }

    pub fn column_by_name(&self, name: &str) -> Result<&ColumnStorage> {
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| HustleError::Schema(format!("no such column: {name}")))?;
        Ok(&self.columns[idx])
    }

    pub fn row_id(&self, row: usize) -> u64 {
        self.row_id_map[row]
    }

    pub fn row_id_map(&self) -> &[u64] {
        &self.row_id_map
    }

    fn record_size(&self, values: &[Value]) -> usize {
        values
            .iter()
            .zip(self.schema.fields.iter())
            .map(|(v, f)| v.encoded_len(f.data_type))
            .sum()
    }

    /// Append one record, assigning it external row id `row_id`. Returns
    /// the slot the record landed in. Fails with `NotEnoughSpace` without
    /// mutating the block if the record does not fit.
    pub fn insert_record(&mut self, values: &[Value], row_id: u64) -> Result<usize> {
        if values.len() != self.schema.num_fields() {
            return Err(HustleError::Schema(format!(
                "expected {} values, got {}",
                self.schema.num_fields(),
                values.len()
            )));
        }
        let needed = self.record_size(values);
        if needed > self.bytes_left() {
            return Err(HustleError::NotEnoughSpace);
        }
        for (col, (value, field)) in self.columns.iter_mut().zip(
            values
                .iter()
                .zip(self.schema.fields.iter())
                .collect::<Vec<_>>(),
        ) {
            match col {
                ColumnStorage::Fixed(buf) => {
                    let bytes = encode_fixed(value, field.data_type)?;
                    buf.extend_from_slice(&bytes);
                }
                ColumnStorage::Utf8 { offsets, data } => {
                    let text = match value {
                        Value::Text(s) => s.as_str(),
                        Value::Null => "",
                        other => {
                            return Err(HustleError::Schema(format!(
                                "cannot encode value {other:?} as utf8"
                            )))
                        }
                    };
                    data.extend_from_slice(text.as_bytes());
                    offsets.push(data.len() as i32);
                }
            }
        }
        self.valid.resize(self.num_rows + 1, true);
        self.row_id_map.push(row_id);
        self.num_rows += 1;
        self.num_bytes += needed;
        Ok(self.num_rows - 1)
    }

    /// Overwrite a fixed-width column's value in place (used for UPDATE).
    pub fn update_column_value(&mut self, col: usize, row: usize, value: &Value) -> Result<()> {
        let field = self.schema.fields[col].clone();
        let width = field
            .data_type
            .fixed_width()
            .ok_or_else(|| HustleError::Unimplemented("update on variable-length column".into()))?;
        let bytes = encode_fixed(value, field.data_type)?;
        match &mut self.columns[col] {
            ColumnStorage::Fixed(buf) => {
                buf.write_at(row * width, &bytes);
                Ok(())
            }
            ColumnStorage::Utf8 { .. } => Err(HustleError::Unimplemented(
                "update on variable-length column".into(),
            )),
        }
    }

    /// Shrink every buffer's allocation down to exactly what `num_rows`
    /// requires, reclaiming space left over from an over-provisioned
    /// initial allocation.
    pub fn truncate_buffers(&mut self) {
        for (col, field) in self.columns.iter_mut().zip(self.schema.fields.iter()) {
            if let (ColumnStorage::Fixed(buf), Some(width)) = (col, field.data_type.fixed_width())
            {
                buf.truncate(self.num_rows * width);
            }
        }
    }

    /// Rebuild a fresh block containing only the given surviving rows,
    /// reusing the same schema and capacity. Used by `Table::delete` to
    /// compact a block after rows are logically removed.
    pub fn rebuild_from(
        id: BlockId,
        schema: Arc<Schema>,
        capacity: usize,
        rows: impl Iterator<Item = (u64, Vec<Value>)>,
    ) -> Result<Self> {
        let mut block = Block::new(id, schema, capacity);
        for (row_id, values) in rows {
            block.insert_record(&values, row_id)?;
        }
        block.truncate_buffers();
        Ok(block)
    }

    /// Materialize a single column's value at `row`, without decoding the
    /// rest of the row. Used by operators (join, LIP, aggregate) that only
    /// ever need one or two columns per row.
    pub fn value(&self, col: usize, row: usize) -> Value {
        let field = &self.schema.fields[col];
        match &self.columns[col] {
            ColumnStorage::Fixed(buf) => {
                let width = field.data_type.fixed_width().unwrap();
                decode_fixed(buf.read_at(row * width, width), field.data_type)
            }
            ColumnStorage::Utf8 { .. } => {
                Value::Text(self.columns[col].utf8_element(row).to_string())
            }
        }
    }

    /// Materialize one full row as owned values, honoring the valid bit
    /// only insofar as the caller is expected to check it separately.
    pub fn row(&self, row: usize) -> Vec<Value> {
        self.schema
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| match &self.columns[i] {
                ColumnStorage::Fixed(buf) => {
                    let width = field.data_type.fixed_width().unwrap();
                    let bytes = buf.read_at(row * width, width);
                    decode_fixed(bytes, field.data_type)
                }
                ColumnStorage::Utf8 { .. } => {
                    Value::Text(self.columns[i].utf8_element(row).to_string())
                }
            })
            .collect()
    }
}

fn decode_fixed(bytes: &[u8], data_type: DataType) -> Value {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ]))
    }

    #[test]
    fn insert_and_read_row() {
        let mut block = Block::new(0, schema(), DEFAULT_BLOCK_CAPACITY);
        let slot = block
            .insert_record(&[Value::Int(7), Value::Text("alice".into())], 100)
            .unwrap();
        assert_eq!(slot, 0);
        assert_eq!(block.num_rows(), 1);
        assert!(block.valid(0));
        assert_eq!(block.row_id(0), 100);
        assert_eq!(
            block.row(0),
            vec![Value::Int(7), Value::Text("alice".into())]
        );
    }

    #[test]
    fn insert_fails_when_capacity_exhausted() {
        let mut block = Block::new(0, schema(), 8);
        block
            .insert_record(&[Value::Int(1), Value::Text("".into())], 1)
            .unwrap();
        let err = block
            .insert_record(&[Value::Int(2), Value::Text("".into())], 2)
            .unwrap_err();
        assert!(matches!(err, HustleError::NotEnoughSpace));
    }

    #[test]
    fn rebuild_from_compacts_surviving_rows() {
        let mut block = Block::new(0, schema(), DEFAULT_BLOCK_CAPACITY);
        block
            .insert_record(&[Value::Int(1), Value::Text("a".into())], 10)
            .unwrap();
        block
            .insert_record(&[Value::Int(2), Value::Text("b".into())], 11)
            .unwrap();
        let surviving = vec![(11u64, block.row(1))];
        let rebuilt =
            Block::rebuild_from(1, schema(), DEFAULT_BLOCK_CAPACITY, surviving.into_iter())
                .unwrap();
        assert_eq!(rebuilt.num_rows(), 1);
        assert_eq!(rebuilt.row_id(0), 11);
    }

    #[test]
    fn update_column_value_overwrites_fixed_column() {
        let mut block = Block::new(0, schema(), DEFAULT_BLOCK_CAPACITY);
        block
            .insert_record(&[Value::Int(1), Value::Text("a".into())], 0)
            .unwrap();
        block.update_column_value(0, 0, &Value::Int(99)).unwrap();
        assert_eq!(block.row(0)[0], Value::Int(99));
    }
}

//! Persisted block format (spec §6.1).
//!
//! Grounded on the teacher's `storage::chunk::{ChunkWriter, ChunkReader}`:
//! a small magic + version header followed by a schema frame and then the
//! raw column buffers, read by loading the whole frame into memory rather
//! than memory-mapping (the teacher's "read whole file, seek into memory"
//! strategy, acceptable here since blocks are capacity-bounded).

use std::io::{Read, Write};
use std::sync::Arc;

use crate::buffer::{Bitmap, Buffer};
use crate::error::{HustleError, Result};
use crate::schema::Schema;

use super::{Block, ColumnStorage};

const MAGIC: u32 = 0x4855_5354; // "HUST"
const VERSION: u16 = 1;

fn write_u32(w: &mut impl Write, v: u32) -> Result<()> {
    Ok(w.write_all(&v.to_le_bytes())?)
}
fn write_u64(w: &mut impl Write, v: u64) -> Result<()> {
    Ok(w.write_all(&v.to_le_bytes())?)
}
fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> Result<()> {
    write_u64(w, bytes.len() as u64)?;
    Ok(w.write_all(bytes)?)
}
fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
fn read_u16(r: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}
fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_u64(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serialize `block` to `writer` in the persisted block format.
pub fn write_block(writer: &mut impl Write, block: &Block) -> Result<()> {
    write_u32(writer, MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    write_u32(writer, block.id)?;
    write_u64(writer, block.capacity as u64)?;
    write_u64(writer, block.num_rows as u64)?;

    let schema_bytes = bincode::serialize(&*block.schema)
        .map_err(|e| HustleError::Io(format!("schema encode failed: {e}")))?;
    write_bytes(writer, &schema_bytes)?;

    write_bytes(writer, block.valid.as_bytes())?;

    let row_id_bytes = bincode::serialize(&block.row_id_map)
        .map_err(|e| HustleError::Io(format!("row id map encode failed: {e}")))?;
    write_bytes(writer, &row_id_bytes)?;

    for col in &block.columns {
        match col {
            ColumnStorage::Fixed(buf) => {
                writer.write_all(&[0u8])?;
                write_bytes(writer, buf.as_slice())?;
            }
            ColumnStorage::Utf8 { offsets, data } => {
                writer.write_all(&[1u8])?;
                let offsets_bytes = bincode::serialize(offsets)
                    .map_err(|e| HustleError::Io(format!("offsets encode failed: {e}")))?;
                write_bytes(writer, &offsets_bytes)?;
                write_bytes(writer, data.as_slice())?;
            }
        }
    }
    Ok(())
}

/// Deserialize a block previously written by `write_block`.
pub fn read_block(reader: &mut impl Read) -> Result<Block> {
    let magic = read_u32(reader)?;
    if magic != MAGIC {
        return Err(HustleError::Io(format!(
            "bad block magic: expected {MAGIC:#x}, found {magic:#x}"
        )));
    }
    let version = read_u16(reader)?;
    if version != VERSION {
        return Err(HustleError::Io(format!("unsupported block version {version}")));
    }
    let id = read_u32(reader)?;
    let capacity = read_u64(reader)? as usize;
    let num_rows = read_u64(reader)? as usize;

    let schema_bytes = read_bytes(reader)?;
    let schema: Schema = bincode::deserialize(&schema_bytes)
        .map_err(|e| HustleError::Io(format!("schema decode failed: {e}")))?;
    let schema = Arc::new(schema);

    let valid_bytes = read_bytes(reader)?;
    let mut valid = Bitmap::with_len(num_rows, false);
    for row in 0..num_rows {
        let byte = valid_bytes.get(row / 8).copied().unwrap_or(0);
        valid.set(row, (byte >> (row % 8)) & 1 == 1);
    }

    let row_id_bytes = read_bytes(reader)?;
    let row_id_map: Vec<u64> = bincode::deserialize(&row_id_bytes)
        .map_err(|e| HustleError::Io(format!("row id map decode failed: {e}")))?;

    let mut columns = Vec::with_capacity(schema.num_fields());
    for _ in 0..schema.num_fields() {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        let col = match tag[0] {
            0 => {
                let bytes = read_bytes(reader)?;
                let mut buf = Buffer::new();
                buf.extend_from_slice(&bytes);
                ColumnStorage::Fixed(buf)
            }
            1 => {
                let offsets_bytes = read_bytes(reader)?;
                let offsets: Vec<i32> = bincode::deserialize(&offsets_bytes)
                    .map_err(|e| HustleError::Io(format!("offsets decode failed: {e}")))?;
                let data_bytes = read_bytes(reader)?;
                let mut data = Buffer::new();
                data.extend_from_slice(&data_bytes);
                ColumnStorage::Utf8 { offsets, data }
            }
            t => return Err(HustleError::Io(format!("unknown column tag {t}"))),
        };
        columns.push(col);
    }

    let num_bytes = columns
        .iter()
        .map(|c| match c {
            ColumnStorage::Fixed(b) => b.len(),
            ColumnStorage::Utf8 { data, .. } => data.len(),
        })
        .sum();

    Ok(Block {
        id,
        schema,
        capacity,
        num_bytes,
        num_rows,
        columns,
        valid,
        row_id_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Value, DEFAULT_BLOCK_CAPACITY};
    use crate::schema::{DataType, Field};
    use std::io::Cursor;

    #[test]
    fn round_trips_through_a_buffer() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ]));
        let mut block = Block::new(3, schema, DEFAULT_BLOCK_CAPACITY);
        block
            .insert_record(&[Value::Int(42), Value::Text("hustle".into())], 7)
            .unwrap();

        let mut bytes = Vec::new();
        write_block(&mut bytes, &block).unwrap();

        let mut cursor = Cursor::new(bytes);
        let restored = read_block(&mut cursor).unwrap();
        assert_eq!(restored.id(), 3);
        assert_eq!(restored.num_rows(), 1);
        assert_eq!(restored.row_id(0), 7);
        assert_eq!(
            restored.row(0),
            vec![Value::Int(42), Value::Text("hustle".into())]
        );
    }

    #[test]
    fn round_trips_to_a_temp_file() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32)]));
        let mut block = Block::new(0, schema, DEFAULT_BLOCK_CAPACITY);
        block.insert_record(&[Value::Int(5)], 0).unwrap();

        let mut file = tempfile::tempfile().unwrap();
        write_block(&mut file, &block).unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0)).unwrap();
        let restored = read_block(&mut file).unwrap();
        assert_eq!(restored.row(0), vec![Value::Int(5)]);
    }
}

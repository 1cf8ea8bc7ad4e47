//! Serial-type decoding for the persisted-record wire format (spec §6.3).
//!
//! A record is encoded as a varint-prefixed header of per-column serial
//! type codes followed by the concatenated column payloads, in the spirit
//! of SQLite's record format: codes 0-9 denote small fixed-width patterns
//! (including the 0/1 boolean constants 8 and 9), even codes >= 12 are BLOBs
//! of length `(code-12)/2`, odd codes >= 13 are UTF-8 strings of length
//! `(code-13)/2`. Multi-byte integers are stored big-endian on the wire and
//! must be byte-reversed into this crate's native little-endian buffers.

use crate::block::Value;
use crate::error::{HustleError, Result};
use crate::schema::Schema;
use crate::table::Table;

/// A single decoded field value, still borrowed from the wire buffer where
/// possible to avoid a copy for the two constant-valued serial types.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialValue<'a> {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Zero,
    One,
    Blob(&'a [u8]),
    Text(&'a str),
}

/// Read a LEB128 varint, returning the value and the number of bytes read.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate().take(10) {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(HustleError::Schema("varint too long or unterminated".into()))
}

/// Reverse a big-endian wire integer into this crate's native byte order.
pub fn reverse_bytes(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}

/// Decode the field whose serial type code is `code`, consuming `payload`
/// from the front of `data` and returning the remaining slice.
pub fn decode_field(code: u64, data: &[u8]) -> Result<(SerialValue<'_>, &[u8])> {
    match code {
        0 => Ok((SerialValue::Null, data)),
        1 => {
            let (head, rest) = split(data, 1)?;
            Ok((SerialValue::I8(head[0] as i8), rest))
        }
        2 => {
            let (head, rest) = split(data, 2)?;
            let be: [u8; 2] = head.try_into().unwrap();
            Ok((SerialValue::I16(i16::from_be_bytes(be)), rest))
        }
        3 => {
            let (head, rest) = split(data, 3)?;
            let mut be = [0u8; 4];
            be[1..].copy_from_slice(head);
            Ok((SerialValue::I32(i32::from_be_bytes(be)), rest))
        }
        4 => {
            let (head, rest) = split(data, 4)?;
            let be: [u8; 4] = head.try_into().unwrap();
            Ok((SerialValue::I32(i32::from_be_bytes(be)), rest))
        }
        5 => {
            let (head, rest) = split(data, 6)?;
            let mut be = [0u8; 8];
            be[2..].copy_from_slice(head);
            Ok((SerialValue::I64(i64::from_be_bytes(be)), rest))
        }
        6 => {
            let (head, rest) = split(data, 8)?;
            let be: [u8; 8] = head.try_into().unwrap();
            Ok((SerialValue::I64(i64::from_be_bytes(be)), rest))
        }
        7 => {
            let (head, rest) = split(data, 8)?;
            let be: [u8; 8] = head.try_into().unwrap();
            Ok((SerialValue::F64(f64::from_be_bytes(be)), rest))
        }
        8 => Ok((SerialValue::Zero, data)),
        9 => Ok((SerialValue::One, data)),
        n if n >= 12 && n % 2 == 0 => {
            let len = ((n - 12) / 2) as usize;
            let (head, rest) = split(data, len)?;
            Ok((SerialValue::Blob(head), rest))
        }
        n if n >= 13 => {
            let len = ((n - 13) / 2) as usize;
            let (head, rest) = split(data, len)?;
            let text = std::str::from_utf8(head)
                .map_err(|e| HustleError::Schema(format!("invalid utf8 field: {e}")))?;
            Ok((SerialValue::Text(text), rest))
        }
        n => Err(HustleError::Schema(format!("unknown serial type code {n}"))),
    }
}

fn split(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(HustleError::Schema(format!(
            "record truncated: need {len} bytes, have {}",
            data.len()
        )));
    }
    Ok(data.split_at(len))
}

impl SerialValue<'_> {
    fn into_value(self) -> Value {
        match self {
            SerialValue::Null => Value::Null,
            SerialValue::I8(v) => Value::Int(v as i64),
            SerialValue::I16(v) => Value::Int(v as i64),
            SerialValue::I32(v) => Value::Int(v as i64),
            SerialValue::I64(v) => Value::Int(v),
            SerialValue::F64(v) => Value::Float(v),
            SerialValue::Zero => Value::Int(0),
            SerialValue::One => Value::Int(1),
            SerialValue::Blob(b) => Value::Bytes(b.to_vec()),
            SerialValue::Text(s) => Value::Text(s.to_string()),
        }
    }
}

/// Decode one wire record: a varint serial-type code per column, in schema
/// order, followed by the concatenated payloads those codes describe.
/// Returns the decoded row plus whatever trailing bytes follow the record.
pub fn decode_record<'a>(data: &'a [u8], schema: &Schema) -> Result<(Vec<Value>, &'a [u8])> {
    let mut codes = Vec::with_capacity(schema.num_fields());
    let mut rest = data;
    for _ in 0..schema.num_fields() {
        let (code, len) = read_varint(rest)?;
        codes.push(code);
        rest = &rest[len..];
    }

    let mut row = Vec::with_capacity(schema.num_fields());
    for code in codes {
        let (value, remaining) = decode_field(code, rest)?;
        row.push(value.into_value());
        rest = remaining;
    }
    Ok((row, rest))
}

/// Decode one wire record and insert it into `table`, returning the new
/// row's external row id (spec §6.3).
pub fn insert_record(table: &Table, data: &[u8]) -> Result<u64> {
    let (row, _) = decode_record(data, table.schema())?;
    table.insert_record(&row)
}

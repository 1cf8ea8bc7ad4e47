//! Column/field type system and schema descriptors.
//!
//! `DataType` is a closed sum type rather than an open class hierarchy:
//! every operator dispatches on it with a `match`, following the "no open
//! inheritance for the column-type switch" design note.

pub mod csv;
pub mod serial;

use serde::{Deserialize, Serialize};

use crate::error::{HustleError, Result};

/// The physical representation of a single column's values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float64,
    /// Fixed-width opaque byte string of the given width.
    FixedBinary(u16),
    /// Variable-length UTF-8 string, backed by an offsets/data buffer pair.
    Utf8,
}

impl DataType {
    /// Byte width of one element, or `None` for variable-length types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => Some(8),
            DataType::FixedBinary(n) => Some(n as usize),
            DataType::Utf8 => None,
        }
    }

    pub fn is_variable_length(self) -> bool {
        self.fixed_width().is_none()
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }
}

/// One named, typed column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Field {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields shared by every block in a table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Schema { fields }
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_by_name(&self, name: &str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| HustleError::Schema(format!("no such field: {name}")))
    }

    /// Sum of the fixed-width columns' byte widths. Variable-length columns
    /// (Utf8) are excluded; callers budget those separately via the table's
    /// insert pool heuristics.
    pub fn fixed_record_width(&self) -> usize {
        self.fields
            .iter()
            .filter_map(|f| f.data_type.fixed_width())
            .sum()
    }
}

//! Lazy views over a table and the operator-result lists that chain them
//! (spec §3/§4.4), grounded on `operators/LazyTable.h` and
//! `OperatorResult.h`.
//!
//! A `LazyTable` never copies column data: it pairs a `Table` with a
//! `Restriction` describing which rows currently survive, in which order.
//! `Select` only ever narrows a block's own row set, so its output is
//! represented as `Restriction::Chunks` (one surviving-row list per block,
//! block order preserved — spec's "filter"). `Join` and `LIP`, by
//! contrast, must be able to reorder and cross block boundaries to keep
//! sibling lazy views position-for-position aligned after back-
//! propagation (spec's "indices" + "index_chunks"), so their output is
//! `Restriction::Ordered`: an explicit list of `(block_id, row)` pairs in
//! the exact logical order downstream operators must preserve.

use std::collections::HashMap;
use std::sync::Arc;

use crate::block::Value;
use crate::table::Table;

/// `(block_index, row_index)` — one physical row, self-describing enough
/// to survive a cross-block reorder.
pub type Position = (u32, u32);

/// Per-block list of surviving row indices within one `LazyTable`,
/// produced by `Select` (spec's "filter").
pub type IndexChunks = Vec<Vec<u32>>;

/// A hash table built by `select_build_hash`/`join`: join-key value to the
/// `Position`s that produced it.
pub type JoinHashTable = HashMap<i64, Vec<Position>>;

/// Which rows of the underlying table currently survive, and in what
/// order downstream operators must treat them.
#[derive(Clone)]
pub enum Restriction {
    /// No restriction yet: every valid row of every block, in block order.
    All,
    /// Per-block surviving row lists, block order preserved. Produced by
    /// `Select`; never reorders or crosses block boundaries.
    Chunks(IndexChunks),
    /// An explicit, possibly cross-block, possibly permuted row order.
    /// Produced by `Join`/`Lip` back-propagation so that position `i`
    /// means the same logical composite row across every sibling view.
    Ordered(Vec<Position>),
}

/// A filtered, not-yet-materialized view of a `Table`.
#[derive(Clone)]
pub struct LazyTable {
    pub table: Arc<Table>,
    pub restriction: Restriction,
    /// Set by `select_build_hash`, consumed by `join` to skip rebuilding
    /// the probe structure for this view's join column.
    pub hash_table: Option<Arc<JoinHashTable>>,
}

impl LazyTable {
    pub fn new(table: Arc<Table>) -> Self {
        LazyTable {
            table,
            restriction: Restriction::All,
            hash_table: None,
        }
    }

    pub fn with_filter(table: Arc<Table>, filter: IndexChunks) -> Self {
        LazyTable {
            table,
            restriction: Restriction::Chunks(filter),
            hash_table: None,
        }
    }

    pub fn with_ordered(table: Arc<Table>, positions: Vec<Position>) -> Self {
        LazyTable {
            table,
            restriction: Restriction::Ordered(positions),
            hash_table: None,
        }
    }

    /// Attach a prebuilt join hash table to this view (consuming setter),
    /// as `select_build_hash` does after computing its filter.
    pub fn with_hash_table(mut self, hash_table: Arc<JoinHashTable>) -> Self {
        self.hash_table = Some(hash_table);
        self
    }

    /// The exact, ordered list of surviving `(block, row)` positions this
    /// view currently represents. The one place that understands all
    /// three `Restriction` variants; every other method is built on it.
    pub fn logical_positions(&self) -> Vec<Position> {
        match &self.restriction {
            Restriction::Ordered(positions) => positions.clone(),
            Restriction::Chunks(chunks) => chunks
                .iter()
                .enumerate()
                .flat_map(|(b, rows)| rows.iter().map(move |&r| (b as u32, r)))
                .collect(),
            Restriction::All => {
                let blocks = self.table.read_blocks();
                (0..blocks.len())
                    .flat_map(|b| {
                        let block = &blocks[b];
                        (0..block.num_rows())
                            .filter(|&r| block.valid(r))
                            .map(move |r| (b as u32, r as u32))
                    })
                    .collect()
            }
        }
    }

    /// Total surviving row count across all blocks, without
    /// materializing any of them.
    pub fn num_rows(&self) -> usize {
        match &self.restriction {
            Restriction::Ordered(positions) => positions.len(),
            Restriction::Chunks(chunks) => chunks.iter().map(|c| c.len()).sum(),
            Restriction::All => {
                let blocks = self.table.read_blocks();
                (0..blocks.len())
                    .map(|i| (0..blocks[i].num_rows()).filter(|&r| blocks[i].valid(r)).count())
                    .sum()
            }
        }
    }

    /// The surviving row indices local to block `block_idx`, in whatever
    /// order they were recorded. Retained for `Select`, which only ever
    /// consumes per-block chunks; operators that must preserve a
    /// cross-block logical order use `logical_positions` instead.
    pub fn chunk(&self, block_idx: usize) -> Vec<u32> {
        match &self.restriction {
            Restriction::Chunks(chunks) => chunks.get(block_idx).cloned().unwrap_or_default(),
            Restriction::All => {
                let blocks = self.table.read_blocks();
                (0..blocks[block_idx].num_rows())
                    .filter(|&r| blocks[block_idx].valid(r))
                    .map(|r| r as u32)
                    .collect()
            }
            Restriction::Ordered(_) => self
                .logical_positions()
                .into_iter()
                .filter(|&(b, _)| b as usize == block_idx)
                .map(|(_, r)| r)
                .collect(),
        }
    }

    pub fn num_chunks(&self) -> usize {
        match &self.restriction {
            Restriction::Chunks(chunks) => chunks.len(),
            _ => self.table.num_blocks(),
        }
    }

    /// Materialize one column's value at a specific surviving position.
    pub fn value_at(&self, col: usize, pos: Position) -> Value {
        let blocks = self.table.read_blocks();
        blocks[pos.0 as usize].value(col, pos.1 as usize)
    }

    /// Materialize every surviving row of one column, in logical order.
    pub fn materialize_column(&self, col: usize) -> Vec<Value> {
        let blocks = self.table.read_blocks();
        self.logical_positions()
            .into_iter()
            .map(|(b, r)| blocks[b as usize].value(col, r as usize))
            .collect()
    }

    /// Pull every surviving row into owned values, in logical order. The
    /// last step before a result leaves the engine, or before an
    /// aggregate needs concrete values to group by.
    pub fn materialize(&self) -> Vec<Vec<Value>> {
        let blocks = self.table.read_blocks();
        self.logical_positions()
            .into_iter()
            .map(|(b, r)| blocks[b as usize].row(r as usize))
            .collect()
    }
}

/// An ordered list of lazy views, the universal currency operators pass
/// to one another. A join appends its build-side and probe-side tables in
/// order; an aggregate consumes an `OperatorResult` and emits a fresh
/// single-table one.
#[derive(Clone, Default)]
pub struct OperatorResult {
    pub tables: Vec<LazyTable>,
}

impl OperatorResult {
    pub fn new() -> Self {
        OperatorResult { tables: Vec::new() }
    }

    pub fn single(lazy: LazyTable) -> Self {
        OperatorResult {
            tables: vec![lazy],
        }
    }

    pub fn append(&mut self, lazy: LazyTable) {
        self.tables.push(lazy);
    }

    pub fn get_table(&self, idx: usize) -> &LazyTable {
        &self.tables[idx]
    }

    pub fn materialize_all(&self) -> Vec<Vec<Vec<Value>>> {
        self.tables.iter().map(|t| t.materialize()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field, Schema};

    fn sample_table() -> Arc<Table> {
        let schema = Arc::new(Schema::new(vec![Field::new("n", DataType::Int64)]));
        let table = Table::new("t", schema);
        for i in 0..5 {
            table.insert_record(&[Value::Int(i)]).unwrap();
        }
        Arc::new(table)
    }

    #[test]
    fn unfiltered_lazy_table_sees_every_valid_row() {
        let lazy = LazyTable::new(sample_table());
        assert_eq!(lazy.num_rows(), 5);
        assert_eq!(lazy.materialize().len(), 5);
    }

    #[test]
    fn filtered_lazy_table_only_sees_selected_indices() {
        let table = sample_table();
        let lazy = LazyTable::with_filter(table, vec![vec![1, 3]]);
        assert_eq!(lazy.num_rows(), 2);
        let rows = lazy.materialize();
        assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(3)]]);
    }

    #[test]
    fn ordered_restriction_preserves_explicit_row_order() {
        let table = sample_table();
        let lazy = LazyTable::with_ordered(table, vec![(0, 3), (0, 1), (0, 4)]);
        let rows = lazy.materialize();
        assert_eq!(
            rows,
            vec![vec![Value::Int(3)], vec![Value::Int(1)], vec![Value::Int(4)]]
        );
    }
}

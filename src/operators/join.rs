//! Hash-join operator (spec §4.6), grounded on `operators/Join.cpp`.
//!
//! Only equijoins on integer-typed columns are specified. A predicate's
//! right side is the build side: its join column is hashed (or, if the
//! right lazy view already carries a hash table from
//! `select_build_hash`, reused as-is — spec §4.9's "downstream FilterJoin
//! can probe it without rebuilding"); the left side is the probe side.
//! Matching pairs back-propagate into every lazy view of the working
//! result: whichever view was the build side gets the exact matched
//! positions, and every other view (including the probe side) is
//! re-indexed by gathering through the probe side's surviving positions,
//! so that position `i` denotes the same logical composite row in every
//! view from here on.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HustleError, Result};
use crate::lazy::{JoinHashTable, LazyTable, OperatorResult, Position};
use crate::predicate::int_of;

/// One equijoin predicate `left.left_col = right.right_col`, referencing
/// tables by their index in the working `OperatorResult`.
#[derive(Copy, Clone, Debug)]
pub struct JoinPredicate {
    pub left_table: usize,
    pub left_col: usize,
    pub right_table: usize,
    pub right_col: usize,
}

impl JoinPredicate {
    pub fn new(left_table: usize, left_col: usize, right_table: usize, right_col: usize) -> Self {
        JoinPredicate {
            left_table,
            left_col,
            right_table,
            right_col,
        }
    }
}

/// A join graph: a chain of equijoin predicates applied left to right,
/// each consuming the previous predicate's back-propagated result (spec
/// treats the whole graph as a single AND-connected chain).
pub type JoinGraph = Vec<JoinPredicate>;

fn build_hash_table(view: &LazyTable, col: usize) -> Result<Arc<JoinHashTable>> {
    if let Some(existing) = &view.hash_table {
        return Ok(existing.clone());
    }
    let mut map: JoinHashTable = HashMap::new();
    for pos in view.logical_positions() {
        let value = view.value_at(col, pos);
        let key = int_of(&value)
            .ok_or_else(|| HustleError::Schema("join column must be an integer type".into()))?;
        map.entry(key).or_default().push(pos);
    }
    Ok(Arc::new(map))
}

/// Execute one equijoin predicate against `result`, returning a new
/// `OperatorResult` with every lazy view's indices updated to the
/// surviving composite rows.
pub fn join(result: &OperatorResult, predicate: &JoinPredicate) -> Result<OperatorResult> {
    if predicate.left_table == predicate.right_table {
        return Err(HustleError::Schema(
            "join predicate must reference two distinct tables".into(),
        ));
    }
    let left = &result.tables[predicate.left_table];
    let right = &result.tables[predicate.right_table];

    let build = build_hash_table(right, predicate.right_col)?;
    let left_positions = left.logical_positions();

    // left_indices[m] is an index into left_positions; right_matches[m]
    // is the actual matched Position on the build side (no indirection
    // needed since the hash table already stores positions directly).
    let mut left_indices: Vec<u32> = Vec::new();
    let mut right_matches: Vec<Position> = Vec::new();
    for (i, &pos) in left_positions.iter().enumerate() {
        let value = left.value_at(predicate.left_col, pos);
        let Some(key) = int_of(&value) else { continue };
        if let Some(matches) = build.get(&key) {
            for &right_pos in matches {
                left_indices.push(i as u32);
                right_matches.push(right_pos);
            }
        }
    }

    let mut out = OperatorResult::new();
    for (idx, view) in result.tables.iter().enumerate() {
        if idx == predicate.right_table {
            out.append(LazyTable::with_ordered(view.table.clone(), right_matches.clone()));
            continue;
        }
        let old_positions = if idx == predicate.left_table {
            left_positions.clone()
        } else {
            view.logical_positions()
        };
        let new_positions: Vec<Position> = left_indices
            .iter()
            .map(|&l| old_positions[l as usize])
            .collect();
        out.append(LazyTable::with_ordered(view.table.clone(), new_positions));
    }
    Ok(out)
}

/// Run every predicate of a join graph in sequence, each consuming the
/// previous step's back-propagated result.
pub fn join_chain(result: &OperatorResult, graph: &JoinGraph) -> Result<OperatorResult> {
    let mut current = result.clone();
    for predicate in graph {
        current = join(&current, predicate)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Value;
    use crate::schema::{DataType, Field, Schema};
    use crate::table::Table;

    fn r_table() -> Arc<Table> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("key", DataType::Int64),
            Field::new("data", DataType::Int64),
        ]));
        let table = Table::new("r", schema);
        for (key, data) in [(0, 0), (1, 10), (2, 20), (3, 30)] {
            table
                .insert_record(&[Value::Int(key), Value::Int(data)])
                .unwrap();
        }
        Arc::new(table)
    }

    fn s_table() -> Arc<Table> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("key", DataType::Int64),
            Field::new("label", DataType::Utf8),
        ]));
        let table = Table::new("s", schema);
        for (key, label) in [(0, "S0"), (1, "S1"), (2, "S2"), (3, "S3")] {
            table
                .insert_record(&[Value::Int(key), Value::Text(label.into())])
                .unwrap();
        }
        Arc::new(table)
    }

    #[test]
    fn equijoin_on_unique_key_pairs_every_row() {
        let mut result = OperatorResult::new();
        result.append(LazyTable::new(r_table()));
        result.append(LazyTable::new(s_table()));

        let predicate = JoinPredicate::new(0, 0, 1, 0);
        let joined = join(&result, &predicate).unwrap();

        assert_eq!(joined.tables[0].num_rows(), 4);
        assert_eq!(joined.tables[1].num_rows(), 4);

        let left_rows = joined.tables[0].materialize();
        let right_rows = joined.tables[1].materialize();
        for (l, r) in left_rows.iter().zip(right_rows.iter()) {
            assert_eq!(l[0], r[0], "joined rows must share the same key");
        }
    }

    #[test]
    fn non_matching_keys_are_dropped() {
        let schema = Arc::new(Schema::new(vec![Field::new("key", DataType::Int64)]));
        let left_table = Table::new("l", schema.clone());
        left_table.insert_record(&[Value::Int(1)]).unwrap();
        left_table.insert_record(&[Value::Int(99)]).unwrap();
        let right_table = Table::new("r", schema);
        right_table.insert_record(&[Value::Int(1)]).unwrap();

        let mut result = OperatorResult::new();
        result.append(LazyTable::new(Arc::new(left_table)));
        result.append(LazyTable::new(Arc::new(right_table)));

        let joined = join(&result, &JoinPredicate::new(0, 0, 1, 0)).unwrap();
        assert_eq!(joined.tables[0].num_rows(), 1);
    }

    #[test]
    fn back_propagation_realigns_a_sibling_view() {
        // Simulate a second dimension already joined to `r` in a prior
        // step: its indices are pre-aligned with r's full row stream, so
        // after joining r against s, the sibling must end up with the
        // same length and row-for-row correspondence as r and s.
        let r = r_table();
        let sibling_table = {
            let schema = Arc::new(Schema::new(vec![Field::new("tag", DataType::Int64)]));
            let t = Table::new("sibling", schema);
            for v in [100, 101, 102, 103] {
                t.insert_record(&[Value::Int(v)]).unwrap();
            }
            Arc::new(t)
        };

        let mut result = OperatorResult::new();
        result.append(LazyTable::new(r));
        result.append(LazyTable::new(s_table()));
        // sibling pre-aligned: row i of sibling corresponds to row i of r.
        result.append(LazyTable::with_ordered(
            sibling_table,
            vec![(0, 0), (0, 1), (0, 2), (0, 3)],
        ));

        // Only keep r rows with key < 2 via a manual ordered restriction,
        // to exercise gather-through-prior-indices on the sibling.
        result.tables[0] = LazyTable::with_ordered(result.tables[0].table.clone(), vec![(0, 0), (0, 1)]);

        let joined = join(&result, &JoinPredicate::new(0, 0, 1, 0)).unwrap();
        assert_eq!(joined.tables[2].num_rows(), joined.tables[0].num_rows());
        let sibling_rows = joined.tables[2].materialize();
        assert_eq!(sibling_rows, vec![vec![Value::Int(100)], vec![Value::Int(101)]]);
    }

    #[test]
    fn join_chain_applies_predicates_in_sequence() {
        let fact_table = {
            let schema = Arc::new(Schema::new(vec![
                Field::new("fk1", DataType::Int64),
                Field::new("fk2", DataType::Int64),
            ]));
            let t = Table::new("fact", schema);
            for (fk1, fk2) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                t.insert_record(&[Value::Int(fk1), Value::Int(fk2)]).unwrap();
            }
            Arc::new(t)
        };
        let dim1 = {
            let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64)]));
            let t = Table::new("dim1", schema);
            t.insert_record(&[Value::Int(0)]).unwrap();
            Arc::new(t)
        };
        let dim2 = {
            let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64)]));
            let t = Table::new("dim2", schema);
            t.insert_record(&[Value::Int(1)]).unwrap();
            Arc::new(t)
        };

        let mut result = OperatorResult::new();
        result.append(LazyTable::new(fact_table));
        result.append(LazyTable::new(dim1));
        result.append(LazyTable::new(dim2));

        let graph = vec![
            JoinPredicate::new(0, 0, 1, 0),
            JoinPredicate::new(0, 1, 2, 0),
        ];
        let joined = join_chain(&result, &graph).unwrap();
        assert_eq!(joined.tables[0].num_rows(), 1);
        assert_eq!(joined.tables[0].materialize()[0], vec![Value::Int(0), Value::Int(1)]);
    }
}

//! Select-build-hash, a fused variant of `select` (spec §4.9), grounded
//! on `operators/select/select.cc`'s `build_filters`-adjacent probe-
//! structure build that some dimension-table selects perform inline.
//!
//! After computing the ordinary select filter, this also builds a join
//! hash table on the surviving rows' values of a named join column, so a
//! downstream `join` can probe it directly instead of rebuilding.

use crate::error::{HustleError, Result};
use crate::lazy::{JoinHashTable, LazyTable};
use crate::predicate::{int_of, PredicateTree};
use std::collections::HashMap;
use std::sync::Arc;

use super::select::select;

/// Run `select`, then build a hash table on `join_col`'s surviving values.
pub fn select_build_hash(
    input: &LazyTable,
    predicate: &PredicateTree,
    join_col: usize,
) -> Result<LazyTable> {
    let selected = select(input, predicate);
    let mut hash: JoinHashTable = HashMap::new();
    for pos in selected.logical_positions() {
        let value = selected.value_at(join_col, pos);
        let key = int_of(&value)
            .ok_or_else(|| HustleError::Schema("join column must be an integer type".into()))?;
        hash.entry(key).or_default().push(pos);
    }
    Ok(selected.with_hash_table(Arc::new(hash)))
}

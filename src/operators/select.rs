//! Select operator (spec §4.5), grounded on
//! `operators/select/select.cc`.
//!
//! Filtering happens block-by-block: a block whose SMA summary proves no
//! row can satisfy a leaf predicate is skipped without touching its data
//! (`select.cc`'s templated `Filter<T, Op>` SMA short-circuit); otherwise
//! every valid row is evaluated against the predicate tree recursively,
//! AND/OR combining child bitmaps exactly as the original does with
//! direct bytewise bitmap AND/OR.

use std::sync::Arc;

use crate::block::Block;
use crate::error::Result;
use crate::lazy::LazyTable;
use crate::metadata::BlockSma;
use crate::predicate::{eval_leaf, CompareOp, PredicateTree};
use crate::scheduler::task::{LambdaTask, TaskContext, TaskDescription};
use crate::scheduler::Scheduler;
use crate::table::Table;

/// True if `sma` proves the whole block can be skipped for this
/// predicate subtree (every leaf it touches is provably unsatisfiable).
/// AND short-circuits as soon as one branch proves skippable; OR only
/// skips if *both* branches do.
fn block_prunable(sma: Option<&BlockSma>, predicate: &PredicateTree) -> bool {
    let Some(sma) = sma else { return false };
    match predicate {
        PredicateTree::And(l, r) => block_prunable(Some(sma), l) || block_prunable(Some(sma), r),
        PredicateTree::Or(l, r) => block_prunable(Some(sma), l) && block_prunable(Some(sma), r),
        PredicateTree::Leaf { column, op, value, .. } => match sma.column(*column) {
            Some(col_sma) => *op != CompareOp::Between && col_sma.can_skip(*op, value),
            None => false,
        },
    }
}

fn row_matches(block: &Block, row: usize, predicate: &PredicateTree) -> bool {
    match predicate {
        PredicateTree::And(l, r) => row_matches(block, row, l) && row_matches(block, row, r),
        PredicateTree::Or(l, r) => row_matches(block, row, l) || row_matches(block, row, r),
        PredicateTree::Leaf { column, op, value, high } => {
            let field = block.schema().field(*column).unwrap();
            let actual = if field.data_type.is_variable_length() {
                crate::block::Value::Text(block.column(*column).utf8_element(row).to_string())
            } else {
                let width = field.data_type.fixed_width().unwrap();
                decode(block.column(*column).fixed_element(row, width), field.data_type)
            };
            eval_leaf(*op, &actual, value, high.as_ref())
        }
    }
}

fn decode(bytes: &[u8], data_type: crate::schema::DataType) -> crate::block::Value {
    use crate::block::Value;
    use crate::schema::DataType as DT;
    match data_type {
        DT::Int8 => Value::Int(bytes[0] as i8 as i64),
        DT::Int16 => Value::Int(i16::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DT::Int32 => Value::Int(i32::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DT::Int64 => Value::Int(i64::from_le_bytes(bytes.try_into().unwrap())),
        DT::UInt8 => Value::Int(bytes[0] as i64),
        DT::UInt16 => Value::Int(u16::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DT::UInt32 => Value::Int(u32::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DT::UInt64 => Value::Int(u64::from_le_bytes(bytes.try_into().unwrap()) as i64),
        DT::Float64 => Value::Float(f64::from_le_bytes(bytes.try_into().unwrap())),
        DT::FixedBinary(_) => Value::Bytes(bytes.to_vec()),
        DT::Utf8 => unreachable!(),
    }
}

/// Evaluate `predicate` against one block, honoring `input`'s incoming
/// filter (so a chained select only ever narrows, never widens, the
/// surviving row set) and that block's SMA (so a provably-unmatchable
/// block is skipped without a row scan).
fn filter_block(block: &Block, sma: Option<&BlockSma>, incoming: &[u32], predicate: &PredicateTree) -> Vec<u32> {
    if block_prunable(sma, predicate) {
        return Vec::new();
    }
    incoming
        .iter()
        .copied()
        .filter(|&row| block.valid(row as usize) && row_matches(block, row as usize, predicate))
        .collect()
}

/// Sequential reference implementation: filter every block of `input`
/// against `predicate`, producing a new, more selective `LazyTable`.
pub fn select(input: &LazyTable, predicate: &PredicateTree) -> LazyTable {
    input.table.generate_indices();
    let blocks = input.table.read_blocks();
    let mut chunks = Vec::with_capacity(input.num_chunks());
    for block_idx in 0..input.num_chunks() {
        let incoming = input.chunk(block_idx);
        let sma = input.table.block_sma(block_idx);
        chunks.push(filter_block(&blocks[block_idx], sma.as_ref(), &incoming, predicate));
    }
    LazyTable::with_filter(input.table.clone(), chunks)
}

/// Scheduler-driven variant: one task per block, gathered by a
/// continuation, mirroring `select.cc`'s `ForEachBatch` parallel filter
/// stage followed by a single "build result" stage.
pub fn select_scheduled(
    scheduler: &Scheduler,
    input: &LazyTable,
    predicate: PredicateTree,
) -> Result<LazyTable> {
    input.table.generate_indices();
    let num_blocks = input.num_chunks();
    let table: Arc<Table> = input.table.clone();
    let incoming_chunks: Vec<Vec<u32>> = (0..num_blocks).map(|i| input.chunk(i)).collect();

    if num_blocks == 0 {
        return Ok(LazyTable::with_filter(table, Vec::new()));
    }

    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, Vec<u32>)>();
    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

    // The finish task must not run until every per-block task has reported
    // into `gather`, so it is registered first (deferred, one dependency)
    // and only then does `gather` name it as the continuation's dependent.
    let finish = scheduler.spawn_deferred_lambda_task(
        TaskDescription::new("select-finish"),
        1,
        None,
        move |_ctx| {
            let _ = done_tx.send(());
        },
    );
    let gather = scheduler.new_continuation(
        TaskDescription::new("select-gather"),
        num_blocks,
        Some(finish),
    );

    for block_idx in 0..num_blocks {
        let table = table.clone();
        let predicate = predicate.clone();
        let incoming = incoming_chunks[block_idx].clone();
        let tx = result_tx.clone();
        scheduler.spawn_lambda_task(
            TaskDescription::new("select-block"),
            Some(gather),
            move |_ctx: &TaskContext| {
                let sma = table.block_sma(block_idx);
                let blocks = table.read_blocks();
                let chunk = filter_block(&blocks[block_idx], sma.as_ref(), &incoming, &predicate);
                let _ = tx.send((block_idx, chunk));
            },
        );
    }
    drop(result_tx);

    done_rx.recv().ok();

    let mut chunks = vec![Vec::new(); num_blocks];
    for (idx, chunk) in result_rx.try_iter() {
        chunks[idx] = chunk;
    }
    Ok(LazyTable::with_filter(table, chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Value;
    use crate::schema::{DataType, Field, Schema};

    fn people_table() -> Arc<Table> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("age", DataType::Int64),
            Field::new("name", DataType::Utf8),
        ]));
        let table = Table::new("people", schema);
        for (age, name) in [(20, "a"), (40, "b"), (60, "c"), (10, "d")] {
            table
                .insert_record(&[Value::Int(age), Value::Text(name.into())])
                .unwrap();
        }
        Arc::new(table)
    }

    #[test]
    fn select_and_predicate_narrows_rows() {
        let table = people_table();
        let input = LazyTable::new(table);
        let predicate = PredicateTree::leaf(0, CompareOp::Ge, Value::Int(20))
            .and(PredicateTree::leaf(0, CompareOp::Lt, Value::Int(60)));
        let result = select(&input, &predicate);
        let rows = result.materialize();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| matches!(r[0], Value::Int(n) if (20..60).contains(&n))));
    }

    #[test]
    fn select_or_predicate_widens_within_block() {
        let table = people_table();
        let input = LazyTable::new(table);
        let predicate = PredicateTree::leaf(0, CompareOp::Lt, Value::Int(15))
            .or(PredicateTree::leaf(0, CompareOp::Gt, Value::Int(50)));
        let result = select(&input, &predicate);
        assert_eq!(result.num_rows(), 2);
    }

    #[test]
    fn sma_prunes_a_block_that_cannot_match() {
        let table = people_table();
        table.generate_indices();
        let sma = table.block_sma(0).unwrap();
        let predicate = PredicateTree::leaf(0, CompareOp::Eq, Value::Int(1000));
        assert!(block_prunable(Some(&sma), &predicate));
    }

    #[test]
    fn chained_select_only_narrows_further() {
        let table = people_table();
        let first = select(
            &LazyTable::new(table),
            &PredicateTree::leaf(0, CompareOp::Ge, Value::Int(0)),
        );
        let second = select(&first, &PredicateTree::leaf(0, CompareOp::Gt, Value::Int(30)));
        assert!(second.num_rows() <= first.num_rows());
        assert_eq!(second.num_rows(), 2);
    }

    #[test]
    fn select_scheduled_matches_sequential_result() {
        let table = people_table();
        let config = crate::config::EngineConfig {
            num_workers: 2,
            ..Default::default()
        };
        let scheduler = Scheduler::new(&config);
        let input = LazyTable::new(table.clone());
        let predicate = PredicateTree::leaf(0, CompareOp::Ge, Value::Int(20));
        let scheduled = select_scheduled(&scheduler, &input, predicate.clone()).unwrap();
        scheduler.shutdown();
        let sequential = select(&LazyTable::new(table), &predicate);
        assert_eq!(scheduled.num_rows(), sequential.num_rows());
    }
}

//! Ordered collection of blocks forming one logical table (spec §3/§4.3).
//!
//! Two independent locks guard disjoint concerns and are never held
//! together: `blocks` (an `RwLock`, so concurrent operator scans don't
//! serialize against each other) guards block creation/compaction, and
//! `insert_pool` (a plain `Mutex`) guards which block index currently
//! accepts new rows. This mirrors spec §5's "two mutexes, never nested"
//! rule and `storage/table.cc`'s split between block allocation and
//! insert-pool acquisition.
//!
//! The `row_id_directory` maps each external row id to its current
//! `(block_index, slot)`, so `lookup`/`update`/`delete` can address a row
//! without scanning, and so delete-compaction's slot shuffling stays
//! invisible to callers (spec §4.3).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use crate::block::{Block, BlockId, Value, DEFAULT_BLOCK_CAPACITY};
use crate::error::Result;
use crate::error::HustleError;
use crate::metadata::BlockSma;
use crate::predicate::{eval_leaf, PredicateTree};
use crate::schema::Schema;

/// A named, schema-bound collection of blocks.
pub struct Table {
    name: String,
    schema: Arc<Schema>,
    block_capacity: usize,
    blocks: RwLock<Vec<Block>>,
    smas: Mutex<Vec<Option<BlockSma>>>,
    dirty: Mutex<HashSet<usize>>,
    insert_pool: Mutex<Option<usize>>,
    next_row_id: AtomicU64,
    row_id_directory: Mutex<HashMap<u64, (usize, usize)>>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Table::with_capacity(name, schema, DEFAULT_BLOCK_CAPACITY)
    }

    pub fn with_capacity(name: impl Into<String>, schema: Arc<Schema>, block_capacity: usize) -> Self {
        Table {
            name: name.into(),
            schema,
            block_capacity,
            blocks: RwLock::new(Vec::new()),
            smas: Mutex::new(Vec::new()),
            dirty: Mutex::new(HashSet::new()),
            insert_pool: Mutex::new(None),
            next_row_id: AtomicU64::new(0),
            row_id_directory: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    pub fn read_blocks(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.blocks.read().unwrap()
    }

    fn allocate_new_block_as_pool(&self) -> Result<usize> {
        let idx = {
            let mut blocks = self.blocks.write().unwrap();
            let id = blocks.len() as BlockId;
            blocks.push(Block::new(id, self.schema.clone(), self.block_capacity));
            blocks.len() - 1
        };
        {
            let mut smas = self.smas.lock().unwrap();
            smas.push(None);
        }
        {
            let mut pool = self.insert_pool.lock().unwrap();
            *pool = Some(idx);
        }
        self.dirty.lock().unwrap().insert(idx);
        Ok(idx)
    }

    /// Append one record, updating the row-id directory and returning the
    /// new external row id (spec §4.3's `insert_record` contract).
    pub fn insert_record(&self, values: &[Value]) -> Result<u64> {
        let row_id = self.next_row_id.fetch_add(1, Ordering::SeqCst);
        loop {
            let pool_idx = *self.insert_pool.lock().unwrap();
            let idx = match pool_idx {
                Some(idx) => idx,
                None => self.allocate_new_block_as_pool()?,
            };
            let mut blocks = self.blocks.write().unwrap();
            match blocks[idx].insert_record(values, row_id) {
                Ok(slot) => {
                    drop(blocks);
                    self.dirty.lock().unwrap().insert(idx);
                    self.row_id_directory.lock().unwrap().insert(row_id, (idx, slot));
                    return Ok(row_id);
                }
                Err(HustleError::NotEnoughSpace) => {
                    drop(blocks);
                    self.allocate_new_block_as_pool()?;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve `row_id` through the directory to its live `(block_index,
    /// slot)`, failing if the row was never inserted or has since been
    /// deleted.
    fn locate(&self, row_id: u64) -> Result<(usize, usize)> {
        let (block_idx, slot) = *self
            .row_id_directory
            .lock()
            .unwrap()
            .get(&row_id)
            .ok_or_else(|| HustleError::Invariant(format!("no such row id: {row_id}")))?;
        let blocks = self.blocks.read().unwrap();
        if !blocks[block_idx].valid(slot) {
            return Err(HustleError::Invariant(format!("row id {row_id} has been deleted")));
        }
        Ok((block_idx, slot))
    }

    /// Look up one row by its external row id (spec §4.3/P3).
    pub fn lookup(&self, row_id: u64) -> Result<Vec<Value>> {
        let (block_idx, slot) = self.locate(row_id)?;
        Ok(self.blocks.read().unwrap()[block_idx].row(slot))
    }

    /// Update `affected_columns` of `row_id` to `new_values`. Columns whose
    /// type is fixed-width are overwritten in place via the block; if any
    /// affected column is variable-length, the row is deleted and
    /// re-inserted instead, since string columns are never updated in
    /// place (spec §4.3).
    pub fn update(&self, row_id: u64, affected_columns: &[usize], new_values: &[Value]) -> Result<()> {
        if affected_columns.len() != new_values.len() {
            return Err(HustleError::Schema(
                "affected_columns and new_values must have equal length".into(),
            ));
        }
        let (block_idx, slot) = self.locate(row_id)?;

        let needs_rewrite = affected_columns
            .iter()
            .any(|&col| self.schema.fields[col].data_type.fixed_width().is_none());
        if needs_rewrite {
            let mut row = self.lookup(row_id)?;
            for (&col, value) in affected_columns.iter().zip(new_values) {
                row[col] = value.clone();
            }
            self.delete(row_id)?;
            self.insert_record(&row)?;
            return Ok(());
        }

        {
            let mut blocks = self.blocks.write().unwrap();
            for (&col, value) in affected_columns.iter().zip(new_values) {
                blocks[block_idx].update_column_value(col, slot, value)?;
            }
        }
        self.dirty.lock().unwrap().insert(block_idx);
        Ok(())
    }

    /// Delete one row by its external row id: clear its valid bit, then
    /// rebuild the owning block to compact away invalid rows, updating the
    /// directory for every row id whose slot moved (spec §4.3).
    pub fn delete(&self, row_id: u64) -> Result<()> {
        let (block_idx, slot) = self.locate(row_id)?;

        let rebuilt = {
            let mut blocks = self.blocks.write().unwrap();
            let block = &mut blocks[block_idx];
            block.set_valid(slot, false);
            let old_id = block.id();
            let survivors: Vec<(u64, Vec<Value>)> = (0..block.num_rows())
                .filter(|&r| block.valid(r))
                .map(|r| (block.row_id(r), block.row(r)))
                .collect();
            Block::rebuild_from(old_id, self.schema.clone(), self.block_capacity, survivors.into_iter())?
        };

        let bytes_left = rebuilt.bytes_left();
        let fixed_width = rebuilt.fixed_record_width();
        {
            let mut blocks = self.blocks.write().unwrap();
            blocks[block_idx] = rebuilt;
        }
        self.dirty.lock().unwrap().insert(block_idx);

        {
            let mut directory = self.row_id_directory.lock().unwrap();
            directory.remove(&row_id);
            let blocks = self.blocks.read().unwrap();
            for (new_slot, &rid) in blocks[block_idx].row_id_map().iter().enumerate() {
                directory.insert(rid, (block_idx, new_slot));
            }
        }

        if bytes_left > fixed_width {
            *self.insert_pool.lock().unwrap() = Some(block_idx);
        }
        Ok(())
    }

    pub fn insert_records(&self, rows: impl IntoIterator<Item = Vec<Value>>) -> Result<()> {
        for row in rows {
            self.insert_record(&row)?;
        }
        Ok(())
    }

    /// Catalog-layer bulk delete: clear the valid bit for every row across
    /// every block satisfying `predicate`, then compact each touched
    /// block to reclaim its space. Distinct from the row-id-addressed
    /// `delete` above — this scans the whole table rather than resolving
    /// a single directory entry.
    pub fn delete_matching(&self, predicate: &PredicateTree) -> Result<usize> {
        let mut total = 0;
        let block_count = self.num_blocks();
        for idx in 0..block_count {
            let survivors: Vec<(u64, Vec<Value>)> = {
                let mut blocks = self.blocks.write().unwrap();
                let block = &mut blocks[idx];
                let mut deleted_here = 0;
                for row in 0..block.num_rows() {
                    if block.valid(row) && row_matches(block, row, predicate) {
                        block.set_valid(row, false);
                        deleted_here += 1;
                    }
                }
                if deleted_here == 0 {
                    continue;
                }
                total += deleted_here;
                (0..block.num_rows())
                    .filter(|&r| block.valid(r))
                    .map(|r| (block.row_id(r), block.row(r)))
                    .collect()
            };
            let rebuilt = {
                let blocks = self.blocks.read().unwrap();
                let old_id = blocks[idx].id();
                Block::rebuild_from(old_id, self.schema.clone(), self.block_capacity, survivors.into_iter())?
            };
            {
                let mut blocks = self.blocks.write().unwrap();
                blocks[idx] = rebuilt;
            }
            self.dirty.lock().unwrap().insert(idx);

            let mut directory = self.row_id_directory.lock().unwrap();
            let blocks = self.blocks.read().unwrap();
            directory.retain(|_, &mut (b, _)| b != idx);
            for (new_slot, &rid) in blocks[idx].row_id_map().iter().enumerate() {
                directory.insert(rid, (idx, new_slot));
            }
        }
        Ok(total)
    }

    /// Recompute SMA summaries for every block marked dirty since the
    /// last call, matching the "regenerate on demand, not on every
    /// mutation" design note in spec §9.
    pub fn generate_indices(&self) {
        let dirty: Vec<usize> = {
            let mut dirty = self.dirty.lock().unwrap();
            dirty.drain().collect()
        };
        if dirty.is_empty() {
            return;
        }
        let blocks = self.blocks.read().unwrap();
        let mut smas = self.smas.lock().unwrap();
        if smas.len() < blocks.len() {
            smas.resize(blocks.len(), None);
        }
        for idx in dirty {
            if idx < blocks.len() {
                smas[idx] = Some(BlockSma::compute(&blocks[idx]));
            }
        }
    }

    pub fn block_sma(&self, idx: usize) -> Option<BlockSma> {
        self.smas.lock().unwrap().get(idx).cloned().flatten()
    }
}

fn row_matches(block: &Block, row: usize, predicate: &PredicateTree) -> bool {
    match predicate {
        PredicateTree::And(l, r) => row_matches(block, row, l) && row_matches(block, row, r),
        PredicateTree::Or(l, r) => row_matches(block, row, l) || row_matches(block, row, r),
        PredicateTree::Leaf {
            column,
            op,
            value,
            high,
        } => {
            let field = block.schema().field(*column).unwrap();
            let actual = if field.data_type.is_variable_length() {
                crate::block::Value::Text(block.column(*column).utf8_element(row).to_string())
            } else {
                let width = field.data_type.fixed_width().unwrap();
                decode_value(block.column(*column).fixed_element(row, width), field.data_type)
            };
            eval_leaf(*op, &actual, value, high.as_ref())
        }
    }
}

fn decode_value(bytes: &[u8], data_type: crate::schema::DataType) -> Value {
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

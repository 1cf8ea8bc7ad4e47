//! Lookahead Information Passing (spec §4.7), grounded on
//! `operators/LIP.cpp`/`utils/BloomFilter.cpp`.
//!
//! Before a star-schema join runs, LIP prunes the fact table against a
//! Bloom filter per dimension table, probing the fact table in batches.
//! Within a batch, the first filter scans every row; each subsequent
//! filter only re-probes rows that survived the filters before it (a
//! branchless-friendly two-pointer partition, matching `LIP.cpp`'s
//! `probe_filters2`'s swap-to-tail compaction). After each batch, every
//! filter's rolling hit rate is updated and filters are re-sorted
//! ascending by hit rate, so later batches probe the cheapest (most
//! selective) filters first.
//!
//! LIP is advisory: false positives are fine (a later join drops them),
//! false negatives are not, so soundness only requires that every row a
//! join would have kept also survives here.

use crate::bloom::BloomFilter;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::lazy::{LazyTable, OperatorResult, Position};
use crate::predicate::int_of;

/// One dimension table gating the fact table through a named foreign key.
#[derive(Copy, Clone, Debug)]
pub struct DimensionGate {
    /// Index of the dimension's lazy view in the working `OperatorResult`.
    pub dim_table: usize,
    /// Primary-key column on the dimension table.
    pub dim_pk_col: usize,
    /// Foreign-key column on the fact table this filter gates.
    pub fact_fk_col: usize,
}

impl DimensionGate {
    pub fn new(dim_table: usize, dim_pk_col: usize, fact_fk_col: usize) -> Self {
        DimensionGate {
            dim_table,
            dim_pk_col,
            fact_fk_col,
        }
    }
}

struct LiveFilter {
    bloom: BloomFilter,
    fact_fk_col: usize,
}

/// Build one Bloom filter per dimension gate, sized and populated from
/// that dimension's currently-surviving primary-key values.
fn build_filters(result: &OperatorResult, gates: &[DimensionGate], config: &EngineConfig) -> Result<Vec<LiveFilter>> {
    gates
        .iter()
        .map(|gate| {
            let dim_view = &result.tables[gate.dim_table];
            let positions = dim_view.logical_positions();
            let mut bloom = BloomFilter::new(
                positions.len(),
                config.bloom_false_positive_rate,
                config.filter_memory,
            );
            for &pos in &positions {
                let value = dim_view.value_at(gate.dim_pk_col, pos);
                if let Some(key) = int_of(&value) {
                    bloom.insert(key);
                }
            }
            Ok(LiveFilter {
                bloom,
                fact_fk_col: gate.fact_fk_col,
            })
        })
        .collect()
}

/// Probe one batch of fact-table positions against `filters` in `order`
/// (cheapest-first), updating each filter's rolling hit rate and
/// returning the surviving positions plus each filter's `(hits, probes)`
/// observed this batch (applied to the filters by the caller once the
/// batch's probing is entirely done, matching spec §4.7's "after the
/// batch, call `update()` on every filter").
fn probe_batch(
    fact: &LazyTable,
    batch: &[Position],
    filters: &[LiveFilter],
    order: &[usize],
) -> (Vec<Position>, Vec<(u64, u64)>) {
    let mut stats = vec![(0u64, 0u64); filters.len()];
    let mut live: Vec<Position> = Vec::with_capacity(batch.len());

    let first = order[0];
    let mut hits = 0u64;
    for &pos in batch {
        let value = fact.value_at(filters[first].fact_fk_col, pos);
        let passes = int_of(&value).is_some_and(|k| filters[first].bloom.probe(k));
        if passes {
            live.push(pos);
            hits += 1;
        }
    }
    stats[first] = (hits, batch.len() as u64);

    for &filter_idx in &order[1..] {
        let probes = live.len() as u64;
        let mut write = 0usize;
        let mut filter_hits = 0u64;
        for read in 0..live.len() {
            let pos = live[read];
            let value = fact.value_at(filters[filter_idx].fact_fk_col, pos);
            let passes = int_of(&value).is_some_and(|k| filters[filter_idx].bloom.probe(k));
            if passes {
                live[write] = pos;
                write += 1;
                filter_hits += 1;
            }
        }
        live.truncate(write);
        stats[filter_idx] = (filter_hits, probes);
    }

    (live, stats)
}

/// Default number of batches the fact table's surviving positions are
/// partitioned into before each re-sort of filter order.
const DEFAULT_BATCH_COUNT: usize = 4;

/// Run the LIP pipeline: prune `fact_table`'s surviving rows against
/// every dimension gate's Bloom filter, leaving every dimension view
/// unchanged in the output.
pub fn lip(
    result: &OperatorResult,
    fact_table: usize,
    gates: &[DimensionGate],
    config: &EngineConfig,
) -> Result<OperatorResult> {
    lip_with_batches(result, fact_table, gates, config, DEFAULT_BATCH_COUNT)
}

pub fn lip_with_batches(
    result: &OperatorResult,
    fact_table: usize,
    gates: &[DimensionGate],
    config: &EngineConfig,
    batch_count: usize,
) -> Result<OperatorResult> {
    let mut filters = build_filters(result, gates, config)?;
    let fact_view = &result.tables[fact_table];
    let fact_positions = fact_view.logical_positions();

    if filters.is_empty() {
        let mut out = result.clone();
        out.tables[fact_table] = LazyTable::with_ordered(fact_view.table.clone(), fact_positions);
        return Ok(out);
    }

    let batch_size = fact_positions.len().div_ceil(batch_count.max(1)).max(1);
    let mut order: Vec<usize> = (0..filters.len()).collect();
    let mut survivors: Vec<Position> = Vec::with_capacity(fact_positions.len());

    for batch in fact_positions.chunks(batch_size) {
        let (live, stats) = probe_batch(fact_view, batch, &filters, &order);
        survivors.extend(live);
        for (idx, &(hits, probes)) in stats.iter().enumerate() {
            filters[idx].bloom.update(hits, probes);
        }
        order.sort_by(|&a, &b| {
            filters[a]
                .bloom
                .hit_rate()
                .partial_cmp(&filters[b].bloom.hit_rate())
                .unwrap()
        });
    }

    let mut out = result.clone();
    out.tables[fact_table] = LazyTable::with_ordered(fact_view.table.clone(), survivors);
    Ok(out)
}

//! Relational operators over `LazyTable`/`OperatorResult` (spec §4.5-4.9).
//!
//! Each operator exposes a sequential reference implementation (the
//! algorithmic core, heavily unit tested) plus a `*_scheduled` entry point
//! that wires the same core onto the `scheduler` as a multi-stage task
//! chain, mirroring the original's per-block/per-chunk task fan-out
//! (`select.cc`'s `ForEachBatch`, `Join.cpp`'s 5-stage `hash_join` chain,
//! `LIP.cpp`'s `build_filters`/`probe_filters` cycle). Separating the two
//! keeps the relational semantics testable without needing a live
//! scheduler in every test.

pub mod aggregate;
pub mod join;
pub mod lip;
pub mod select;
pub mod select_build_hash;

//! Bloom filter used by the LIP pipeline (spec §4.7), grounded on
//! `utils/BloomFilter.{h,cpp}`.
//!
//! Sizing follows the original formulas: for a target false-positive rate
//! `eps` and `n` expected insertions, `num_hashes = round(-log2(eps))` and
//! `num_cells = n * num_hashes / ln(2)`. The original's hash mixer is a
//! deliberately weak 32-bit avalanche function; the spec explicitly
//! permits replacing it, so here each of the `num_hashes` hash slots is an
//! independently-seeded `xxh3_64`, reusing the `xxhash-rust` dependency
//! the teacher already carries for fingerprinting.

use xxhash_rust::xxh3::xxh3_64_with_seed;

/// A counting-free Bloom filter over `i64` join keys, with a rolling hit
/// rate estimate used to reorder dimension-table filters cheapest-first.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_cells: usize,
    num_hashes: usize,
    /// Rolling window of (hits, probes) per update cycle.
    window: Vec<(u64, u64)>,
    window_cap: usize,
    window_pos: usize,
    window_filled: usize,
    hits_total: u64,
    probes_total: u64,
}

impl BloomFilter {
    /// Build a filter sized for `n` expected insertions at false-positive
    /// rate `eps`, with a rolling hit-rate window of `window_cap` cycles.
    pub fn new(n: usize, eps: f64, window_cap: usize) -> Self {
        let num_hashes = (-eps.log2()).round().max(1.0) as usize;
        let num_cells = ((n.max(1) as f64) * num_hashes as f64 / std::f64::consts::LN_2).ceil() as usize;
        let num_cells = num_cells.max(64);
        let words = num_cells.div_ceil(64);
        BloomFilter {
            bits: vec![0u64; words],
            num_cells,
            num_hashes,
            window: vec![(0, 0); window_cap.max(1)],
            window_cap: window_cap.max(1),
            window_pos: 0,
            window_filled: 0,
            hits_total: 0,
            probes_total: 0,
        }
    }

    fn cell(&self, key: i64, slot: usize) -> usize {
        let h = xxh3_64_with_seed(&key.to_le_bytes(), slot as u64);
        (h % self.num_cells as u64) as usize
    }

    pub fn insert(&mut self, key: i64) {
        for slot in 0..self.num_hashes {
            let cell = self.cell(key, slot);
            self.bits[cell / 64] |= 1 << (cell % 64);
        }
    }

    pub fn probe(&self, key: i64) -> bool {
        (0..self.num_hashes).all(|slot| {
            let cell = self.cell(key, slot);
            self.bits[cell / 64] & (1 << (cell % 64)) != 0
        })
    }

    /// Record one probe cycle's (hits, total) into the rolling window,
    /// evicting the oldest cycle once the window is full.
    pub fn update(&mut self, hits: u64, probes: u64) {
        let (old_hits, old_probes) = self.window[self.window_pos];
        self.hits_total = self.hits_total - old_hits + hits;
        self.probes_total = self.probes_total - old_probes + probes;
        self.window[self.window_pos] = (hits, probes);
        self.window_pos = (self.window_pos + 1) % self.window_cap;
        self.window_filled = (self.window_filled + 1).min(self.window_cap);
    }

    /// Fraction of probes that passed the filter over the current rolling
    /// window. `1.0` until any cycle has been recorded, so a brand-new
    /// filter is tried before being judged ineffective.
    pub fn hit_rate(&self) -> f64 {
        if self.probes_total == 0 {
            1.0
        } else {
            self.hits_total as f64 / self.probes_total as f64
        }
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }
}

/// Ascending-hit-rate comparator: cheaper (lower hit rate, i.e. more
/// selective) filters sort first so LIP probes them before the less
/// selective ones.
pub fn compare_by_hit_rate(a: &BloomFilter, b: &BloomFilter) -> std::cmp::Ordering {
    a.hit_rate()
        .partial_cmp(&b.hit_rate())
        .unwrap_or(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_keys_always_probe_positive() {
        let mut bf = BloomFilter::new(1000, 1e-2, 10);
        for k in 0..1000i64 {
            bf.insert(k);
        }
        for k in 0..1000i64 {
            assert!(bf.probe(k));
        }
    }

    #[test]
    fn absent_keys_mostly_probe_negative() {
        let mut bf = BloomFilter::new(1000, 1e-2, 10);
        for k in 0..1000i64 {
            bf.insert(k);
        }
        let false_positives = (1_000_000..1_001_000i64).filter(|&k| bf.probe(k)).count();
        assert!(
            (false_positives as f64) < 50.0,
            "false positive rate too high: {false_positives}/1000"
        );
    }

    #[test]
    fn hit_rate_reflects_rolling_window() {
        let mut bf = BloomFilter::new(100, 1e-2, 3);
        bf.update(10, 100);
        bf.update(5, 100);
        bf.update(0, 100);
        assert!((bf.hit_rate() - 0.05).abs() < 1e-9);
        bf.update(100, 100); // evicts the first cycle (10/100)
        assert!((bf.hit_rate() - (5.0 + 0.0 + 100.0) / 300.0).abs() < 1e-9);
    }

    #[test]
    fn comparator_orders_lower_hit_rate_first() {
        let mut cheap = BloomFilter::new(100, 1e-2, 5);
        cheap.update(1, 100);
        let mut expensive = BloomFilter::new(100, 1e-2, 5);
        expensive.update(90, 100);
        assert_eq!(
            compare_by_hit_rate(&cheap, &expensive),
            std::cmp::Ordering::Less
        );
    }
}

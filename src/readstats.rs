// Aggregate statistics, shared across worker threads. One atomic per
// counter; no locks on the hot path.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub struct ReadStats {
    pub total_reads: AtomicU64,
    pub total_bases: AtomicU64,
    pub min_read_len: AtomicU32,
    pub max_read_len: AtomicU32,
    /// Reads passing the E-value threshold against any database.
    pub total_reads_mapped: AtomicU64,
    /// Reads additionally passing identity and coverage thresholds.
    pub total_reads_mapped_cov: AtomicU64,
    /// Reads eligible for de novo OTU clustering.
    pub total_reads_denovo: AtomicU64,
    /// Reads matched per database, parallel to the index list.
    pub reads_matched_per_db: Vec<AtomicU64>,
}

impl ReadStats {
    pub fn new(num_dbs: usize) -> Self {
        ReadStats {
            total_reads: AtomicU64::new(0),
            total_bases: AtomicU64::new(0),
            min_read_len: AtomicU32::new(u32::MAX),
            max_read_len: AtomicU32::new(0),
            total_reads_mapped: AtomicU64::new(0),
            total_reads_mapped_cov: AtomicU64::new(0),
            total_reads_denovo: AtomicU64::new(0),
            reads_matched_per_db: (0..num_dbs).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn observe_input_read(&self, len: usize) {
        self.total_reads.fetch_add(1, Ordering::Relaxed);
        self.total_bases.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn observe_read_len(&self, len: usize) {
        self.min_read_len.fetch_min(len as u32, Ordering::Relaxed);
        self.max_read_len.fetch_max(len as u32, Ordering::Relaxed);
    }

    pub fn mean_read_len(&self) -> u64 {
        let n = self.total_reads.load(Ordering::Relaxed);
        if n == 0 {
            0
        } else {
            self.total_bases.load(Ordering::Relaxed) / n
        }
    }
}

// Engine configuration structures.
//
// All tunables travel through these immutable structs; nothing is read from
// process-wide state. Defaults mirror the tool's documented behavior.

use std::path::PathBuf;

use crate::evalue::KarlinParams;

/// Options for `ribosift filter`.
#[derive(Debug, Clone)]
pub struct FilterOpt {
    /// Ordered list of index prefixes to search, in the order given.
    pub indexes: Vec<PathBuf>,
    /// Reads file (FASTA or FASTQ, optionally gzipped).
    pub reads: PathBuf,
    /// Working directory holding the key-value store.
    pub workdir: PathBuf,

    /// Number of reader threads (one writer is paired with each).
    pub num_read_threads: usize,
    /// Number of processor threads.
    pub num_proc_threads: usize,

    /// Search the forward strand only.
    pub forward_only: bool,
    /// Emit up to this many alignments per read; -1 = no limit configured.
    pub num_alignments: i32,
    /// Best-hit mode: stop once this many top-scoring alignments are held.
    pub num_best_hits: u32,
    /// Best-hit mode engages after this many successful LIS chains.
    pub min_lis: u32,

    pub match_score: i32,
    /// Mismatch penalty, negative.
    pub mismatch: i32,
    /// Gap open penalty, positive.
    pub gap_open: i32,
    /// Gap extension penalty, positive.
    pub gap_ext: i32,
    /// E-value acceptance cutoff.
    pub evalue: f64,
    /// Identity fraction required for OTU-map membership (0..1).
    pub min_id: f64,
    /// Read coverage fraction required for OTU-map membership (0..1).
    pub min_cov: f64,

    /// Minimum seed hits per reference before LIS chaining considers it.
    pub seed_hits: usize,
    /// Minimum lookup-table occurrence count before a trie is probed.
    pub min_seed_occur: u32,
    /// Padding added to each side of a candidate reference region.
    pub edges: u32,
    /// Override of the per-part window stride schedule.
    pub passes: Option<[usize; 3]>,

    pub blast_out: bool,
    pub sam_out: bool,
    pub fastx_out: bool,
    pub otu_map: bool,
    pub de_novo_otu: bool,
    /// Prefix for output files of matching reads.
    pub aligned_prefix: PathBuf,
    /// Prefix for output files of non-matching reads.
    pub other_prefix: Option<PathBuf>,
}

impl Default for FilterOpt {
    fn default() -> Self {
        FilterOpt {
            indexes: Vec::new(),
            reads: PathBuf::new(),
            workdir: PathBuf::from("ribosift-wd"),
            num_read_threads: 1,
            num_proc_threads: 1,
            forward_only: false,
            num_alignments: -1,
            num_best_hits: 1,
            min_lis: 2,
            match_score: 2,
            mismatch: -3,
            gap_open: 5,
            gap_ext: 2,
            evalue: 1.0,
            min_id: 0.97,
            min_cov: 0.97,
            seed_hits: 2,
            min_seed_occur: 0,
            edges: 4,
            passes: None,
            blast_out: false,
            sam_out: false,
            fastx_out: false,
            otu_map: false,
            de_novo_otu: false,
            aligned_prefix: PathBuf::from("aligned"),
            other_prefix: None,
        }
    }
}

impl FilterOpt {
    /// Karlin-Altschul parameters for the configured scoring scheme.
    pub fn karlin(&self) -> KarlinParams {
        KarlinParams::nucleotide(self.match_score, self.mismatch, self.gap_open, self.gap_ext)
    }

    /// True when the per-read limit on emitted alignments is active.
    pub fn num_alignments_mode(&self) -> bool {
        self.num_alignments > 0
    }

    /// True when best-hit early termination is active.
    pub fn best_hit_mode(&self) -> bool {
        !self.num_alignments_mode() && self.num_best_hits > 0 && self.min_lis > 0
    }
}

/// Options for `ribosift index`.
#[derive(Debug, Clone)]
pub struct IndexOpt {
    /// Reference FASTA (optionally gzipped).
    pub reference: PathBuf,
    /// Output index prefix.
    pub out: PathBuf,
    /// Full window length (`lnwin`), must be even.
    pub seed_len: usize,
    /// Upper bound on reference bases per index part.
    pub max_part_bases: u64,
}

impl Default for IndexOpt {
    fn default() -> Self {
        IndexOpt {
            reference: PathBuf::new(),
            out: PathBuf::new(),
            seed_len: 18,
            max_part_bases: 500_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_best_hit() {
        let opt = FilterOpt::default();
        assert!(!opt.num_alignments_mode());
        assert!(opt.best_hit_mode());
    }

    #[test]
    fn num_alignments_takes_precedence() {
        let opt = FilterOpt {
            num_alignments: 1,
            ..FilterOpt::default()
        };
        assert!(opt.num_alignments_mode());
        assert!(!opt.best_hit_mode());
    }
}

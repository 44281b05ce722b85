// Per-read mutable state threaded through the pipeline.
//
// A Read is created by a reader thread, mutated by exactly one processor at
// a time, and checkpointed to the key-value store by a writer after every
// index part. The checkpoint carries alignments, counters and flags; seed
// hits are per-part scratch and are not persisted.

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::encoding;

/// State-record format version, bumped on any layout change.
const STATE_VERSION: u8 = 1;

/// A seed hit: one window of the read matched one half-window occurrence of
/// a reference with at most one edit in the non-exact half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedHit {
    pub ref_id: u32,
    /// Window start on the reference.
    pub ref_pos: u32,
    /// Window start on the read (strand-oriented).
    pub read_pos: u32,
}

/// An accepted gapped alignment of a read against one reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub index_num: u16,
    pub part: u16,
    pub ref_id: u32,
    pub ref_start: u32,
    pub ref_end: u32,
    /// Read coordinates in the aligned strand's frame.
    pub read_start: u32,
    pub read_end: u32,
    pub reverse: bool,
    pub score: i32,
    pub cigar: Vec<(u8, u32)>,
    pub evalue: f64,
    pub bit_score: f64,
    /// Fraction of identical columns over all alignment columns.
    pub identity: f64,
    /// Fraction of the read covered by the alignment.
    pub coverage: f64,
}

impl Alignment {
    pub fn cigar_string(&self) -> String {
        let mut s = String::new();
        for &(op, len) in &self.cigar {
            s.push_str(&len.to_string());
            s.push(op as char);
        }
        s
    }

    /// Alignment columns (M + I + D).
    pub fn aligned_columns(&self) -> u32 {
        self.cigar.iter().map(|&(_, len)| len).sum()
    }

    /// Number of gap openings (I/D runs).
    pub fn gap_openings(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|&&(op, _)| op == b'I' || op == b'D')
            .count() as u32
    }
}

#[derive(Debug, Clone)]
pub struct Read {
    /// Monotonic ordinal within the input; key-value store key.
    pub id: u64,
    pub header: String,
    /// Original ASCII sequence, kept for output.
    pub seq: Vec<u8>,
    /// 2-bit encoded sequence, same length as `seq`.
    pub encoded: Vec<u8>,
    pub qual: Option<Vec<u8>>,

    /// Seed hits accumulated across passes of the current (part, strand).
    pub seed_hits: Vec<SeedHit>,
    pub alignments: Vec<Alignment>,
    /// Countdown from the configured --num-alignments limit; -1 = no limit.
    pub num_alignments: i32,
    /// Best Smith-Waterman score seen so far.
    pub max_sw_score: i32,
    /// Alignments currently held at the best score (best-hit mode).
    pub best_count: u32,
    /// Successful LIS chains extended for this read (gates best-hit mode).
    pub lis_chains: u32,
    pub hit: bool,
    /// Candidate for de novo OTU clustering: hit the database but no
    /// alignment passed both identity and coverage thresholds.
    pub hit_denovo: bool,
    /// Search for this read is finished; later parts skip it.
    pub done: bool,
    pub last_index: u16,
    pub last_part: u16,
    pub is_valid: bool,
}

impl Read {
    pub fn new(
        id: u64,
        header: String,
        seq: Vec<u8>,
        qual: Option<Vec<u8>>,
        num_alignments: i32,
    ) -> Self {
        let encoded = encoding::encode(&seq);
        debug_assert_eq!(encoded.len(), seq.len());
        Read {
            id,
            header,
            seq,
            encoded,
            qual,
            seed_hits: Vec::new(),
            alignments: Vec::new(),
            num_alignments,
            max_sw_score: 0,
            best_count: 0,
            lis_chains: 0,
            hit: false,
            hit_denovo: true,
            done: false,
            last_index: 0,
            last_part: 0,
            is_valid: true,
        }
    }

    /// First whitespace-delimited token of the header, for report columns.
    pub fn name(&self) -> &str {
        self.header.split_whitespace().next().unwrap_or(&self.header)
    }

    /// Serialize the checkpointable result state into a compact
    /// little-endian record.
    pub fn serialize_state(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.alignments.len() * 64);
        buf.push(STATE_VERSION);
        let mut flags = 0u8;
        if self.hit {
            flags |= 1;
        }
        if self.hit_denovo {
            flags |= 1 << 1;
        }
        if self.done {
            flags |= 1 << 2;
        }
        if self.is_valid {
            flags |= 1 << 3;
        }
        buf.push(flags);
        buf.write_u16::<LittleEndian>(self.last_index).unwrap();
        buf.write_u16::<LittleEndian>(self.last_part).unwrap();
        buf.write_i32::<LittleEndian>(self.num_alignments).unwrap();
        buf.write_i32::<LittleEndian>(self.max_sw_score).unwrap();
        buf.write_u32::<LittleEndian>(self.best_count).unwrap();
        buf.write_u32::<LittleEndian>(self.lis_chains).unwrap();
        buf.write_u32::<LittleEndian>(self.alignments.len() as u32)
            .unwrap();
        for a in &self.alignments {
            buf.write_u16::<LittleEndian>(a.index_num).unwrap();
            buf.write_u16::<LittleEndian>(a.part).unwrap();
            buf.write_u32::<LittleEndian>(a.ref_id).unwrap();
            buf.write_u32::<LittleEndian>(a.ref_start).unwrap();
            buf.write_u32::<LittleEndian>(a.ref_end).unwrap();
            buf.write_u32::<LittleEndian>(a.read_start).unwrap();
            buf.write_u32::<LittleEndian>(a.read_end).unwrap();
            buf.push(a.reverse as u8);
            buf.write_i32::<LittleEndian>(a.score).unwrap();
            buf.write_f64::<LittleEndian>(a.evalue).unwrap();
            buf.write_f64::<LittleEndian>(a.bit_score).unwrap();
            buf.write_f64::<LittleEndian>(a.identity).unwrap();
            buf.write_f64::<LittleEndian>(a.coverage).unwrap();
            buf.write_u32::<LittleEndian>(a.cigar.len() as u32).unwrap();
            for &(op, len) in &a.cigar {
                buf.push(op);
                buf.write_u32::<LittleEndian>(len).unwrap();
            }
        }
        buf
    }

    /// Restore the result state from a checkpoint record. Sequence fields
    /// are untouched; they are re-read from the input on every iteration.
    pub fn restore_state(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut cur = Cursor::new(bytes);
        let version = cur.read_u8()?;
        if version != STATE_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported read-state version {version}"),
            ));
        }
        let flags = cur.read_u8()?;
        self.hit = flags & 1 != 0;
        self.hit_denovo = flags & (1 << 1) != 0;
        self.done = flags & (1 << 2) != 0;
        self.is_valid = flags & (1 << 3) != 0;
        self.last_index = cur.read_u16::<LittleEndian>()?;
        self.last_part = cur.read_u16::<LittleEndian>()?;
        self.num_alignments = cur.read_i32::<LittleEndian>()?;
        self.max_sw_score = cur.read_i32::<LittleEndian>()?;
        self.best_count = cur.read_u32::<LittleEndian>()?;
        self.lis_chains = cur.read_u32::<LittleEndian>()?;
        let n = cur.read_u32::<LittleEndian>()? as usize;
        let mut alignments = Vec::with_capacity(n);
        for _ in 0..n {
            let index_num = cur.read_u16::<LittleEndian>()?;
            let part = cur.read_u16::<LittleEndian>()?;
            let ref_id = cur.read_u32::<LittleEndian>()?;
            let ref_start = cur.read_u32::<LittleEndian>()?;
            let ref_end = cur.read_u32::<LittleEndian>()?;
            let read_start = cur.read_u32::<LittleEndian>()?;
            let read_end = cur.read_u32::<LittleEndian>()?;
            let reverse = cur.read_u8()? != 0;
            let score = cur.read_i32::<LittleEndian>()?;
            let evalue = cur.read_f64::<LittleEndian>()?;
            let bit_score = cur.read_f64::<LittleEndian>()?;
            let identity = cur.read_f64::<LittleEndian>()?;
            let coverage = cur.read_f64::<LittleEndian>()?;
            let n_ops = cur.read_u32::<LittleEndian>()? as usize;
            let mut cigar = Vec::with_capacity(n_ops);
            for _ in 0..n_ops {
                let op = cur.read_u8()?;
                let len = cur.read_u32::<LittleEndian>()?;
                cigar.push((op, len));
            }
            alignments.push(Alignment {
                index_num,
                part,
                ref_id,
                ref_start,
                ref_end,
                read_start,
                read_end,
                reverse,
                score,
                cigar,
                evalue,
                bit_score,
                identity,
                coverage,
            });
        }
        self.alignments = alignments;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alignment() -> Alignment {
        Alignment {
            index_num: 0,
            part: 1,
            ref_id: 7,
            ref_start: 12,
            ref_end: 42,
            read_start: 0,
            read_end: 30,
            reverse: true,
            score: 55,
            cigar: vec![(b'M', 20), (b'I', 1), (b'M', 9)],
            evalue: 1.5e-12,
            bit_score: 48.3,
            identity: 0.9667,
            coverage: 1.0,
        }
    }

    #[test]
    fn state_roundtrip_preserves_everything() {
        let mut read = Read::new(9, "r9 desc".into(), b"ACGTACGT".to_vec(), None, 3);
        read.hit = true;
        read.hit_denovo = false;
        read.done = true;
        read.num_alignments = 1;
        read.max_sw_score = 55;
        read.best_count = 2;
        read.lis_chains = 4;
        read.last_index = 1;
        read.last_part = 2;
        read.alignments.push(sample_alignment());

        let bytes = read.serialize_state();
        let mut fresh = Read::new(9, "r9 desc".into(), b"ACGTACGT".to_vec(), None, -1);
        fresh.restore_state(&bytes).unwrap();

        assert!(fresh.hit);
        assert!(!fresh.hit_denovo);
        assert!(fresh.done);
        assert_eq!(fresh.num_alignments, 1);
        assert_eq!(fresh.max_sw_score, 55);
        assert_eq!(fresh.best_count, 2);
        assert_eq!(fresh.lis_chains, 4);
        assert_eq!(fresh.last_index, 1);
        assert_eq!(fresh.last_part, 2);
        assert_eq!(fresh.alignments, vec![sample_alignment()]);
    }

    #[test]
    fn restore_rejects_unknown_version() {
        let mut read = Read::new(0, "r".into(), b"ACGT".to_vec(), None, -1);
        let mut bytes = read.serialize_state();
        bytes[0] = 99;
        assert!(read.restore_state(&bytes).is_err());
    }

    #[test]
    fn cigar_helpers() {
        let a = sample_alignment();
        assert_eq!(a.cigar_string(), "20M1I9M");
        assert_eq!(a.aligned_columns(), 30);
        assert_eq!(a.gap_openings(), 1);
    }

    #[test]
    fn name_takes_first_token() {
        let read = Read::new(0, "read1 length=150".into(), b"ACGT".to_vec(), None, -1);
        assert_eq!(read.name(), "read1");
    }
}

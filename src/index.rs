// On-disk index of a reference collection and its in-memory per-part form.
//
// `build_index` produces, for a prefix P:
//   P.stats       - magic, version, window parameters, part table
//   P.part<k>     - half-window postings for part k
//   P.part<k>.refs- headers + encoded sequences for part k
//
// A part file stores, per non-empty half-window key, the forward postings
// (packed second half, ref id, window position) and reverse postings
// (packed reversed first half, ref id, window position). Loading a part
// rebuilds the lookup table of 4^partialwin entries, each holding an
// occurrence count and the two burst tries.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;

use crate::bursttrie::{BurstTrie, Occurrence};
use crate::encoding;
use crate::error::{EngineError, EngineResult};
use crate::fastx_reader::{FastxFormat, FastxReader};
use crate::opts::IndexOpt;
use crate::references::References;

const STATS_MAGIC: &[u8; 4] = b"RSIX";
const PART_MAGIC: &[u8; 4] = b"RSPT";
const INDEX_VERSION: u32 = 1;

/// Per-part search parameters derived from the window length.
#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    /// Full window length.
    pub lnwin: usize,
    /// Half-window length.
    pub partialwin: usize,
    /// Match-state rows available to the window automaton.
    pub numbvs: usize,
    /// Window strides for passes 0..2, coarse to fine.
    pub skiplengths: [usize; 3],
}

impl IndexParams {
    pub fn from_seed_len(lnwin: usize) -> EngineResult<Self> {
        if lnwin < 8 || lnwin % 2 != 0 {
            return Err(EngineError::InvalidInput(format!(
                "seed length must be even and at least 8, got {lnwin}"
            )));
        }
        let partialwin = lnwin / 2;
        if partialwin > 16 {
            return Err(EngineError::InvalidInput(format!(
                "seed length {lnwin} exceeds the packable half-window maximum (32)"
            )));
        }
        Ok(IndexParams {
            lnwin,
            partialwin,
            numbvs: 4 * (partialwin - 2),
            skiplengths: [lnwin, (lnwin / 2).max(1), 3.min(lnwin)],
        })
    }

    /// Number of lookup-table slots.
    pub fn table_size(&self) -> usize {
        1usize << (2 * self.partialwin)
    }
}

/// Part table entry in the stats file.
#[derive(Debug, Clone, Copy)]
pub struct PartInfo {
    pub num_refs: u32,
    pub num_bases: u64,
}

/// Index-wide metadata, loaded once per index prefix.
#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub params: IndexParams,
    pub parts: Vec<PartInfo>,
    pub total_ref_bases: u64,
}

impl IndexMeta {
    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn load(prefix: &Path) -> EngineResult<Self> {
        let path = suffixed(prefix, ".stats");
        let mut r = BufReader::new(File::open(&path).map_err(|e| {
            EngineError::IndexLoad(format!("{}: {e}", path.display()))
        })?);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != STATS_MAGIC {
            return Err(EngineError::IndexLoad(format!(
                "{}: not a ribosift index",
                path.display()
            )));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(EngineError::IndexLoad(format!(
                "{}: unsupported index version {version}",
                path.display()
            )));
        }
        let lnwin = r.read_u32::<LittleEndian>()? as usize;
        let params = IndexParams::from_seed_len(lnwin)?;
        let total_ref_bases = r.read_u64::<LittleEndian>()?;
        let num_parts = r.read_u32::<LittleEndian>()? as usize;
        let mut parts = Vec::with_capacity(num_parts);
        for _ in 0..num_parts {
            let num_refs = r.read_u32::<LittleEndian>()?;
            let num_bases = r.read_u64::<LittleEndian>()?;
            parts.push(PartInfo { num_refs, num_bases });
        }
        Ok(IndexMeta {
            params,
            parts,
            total_ref_bases,
        })
    }

    fn save(&self, prefix: &Path) -> EngineResult<()> {
        let mut w = BufWriter::new(File::create(suffixed(prefix, ".stats"))?);
        w.write_all(STATS_MAGIC)?;
        w.write_u32::<LittleEndian>(INDEX_VERSION)?;
        w.write_u32::<LittleEndian>(self.params.lnwin as u32)?;
        w.write_u64::<LittleEndian>(self.total_ref_bases)?;
        w.write_u32::<LittleEndian>(self.parts.len() as u32)?;
        for p in &self.parts {
            w.write_u32::<LittleEndian>(p.num_refs)?;
            w.write_u64::<LittleEndian>(p.num_bases)?;
        }
        w.flush()?;
        Ok(())
    }
}

/// One lookup-table slot: occurrence count plus the forward-extension and
/// reverse-extension tries, either of which may be absent.
#[derive(Default)]
pub struct LookupEntry {
    pub count: u32,
    pub trie_f: Option<BurstTrie>,
    pub trie_r: Option<BurstTrie>,
}

/// A loaded index part. Read-only for the duration of the part iteration;
/// shared by reference across all processor threads.
pub struct IndexPart {
    pub params: IndexParams,
    pub lookup: Vec<LookupEntry>,
}

impl IndexPart {
    /// Blocking, single-threaded load of one part.
    pub fn load(prefix: &Path, part: usize, meta: &IndexMeta) -> EngineResult<Self> {
        let path = suffixed(prefix, &format!(".part{part}"));
        let started = Instant::now();
        let mut r = BufReader::new(File::open(&path).map_err(|e| {
            EngineError::IndexLoad(format!("{}: {e}", path.display()))
        })?);
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != PART_MAGIC {
            return Err(EngineError::IndexLoad(format!(
                "{}: not an index part",
                path.display()
            )));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(EngineError::IndexLoad(format!(
                "{}: unsupported part version {version}",
                path.display()
            )));
        }
        let params = meta.params;
        let mut lookup: Vec<LookupEntry> = std::iter::repeat_with(LookupEntry::default)
            .take(params.table_size())
            .collect();

        let num_keys = r.read_u32::<LittleEndian>()? as usize;
        let mut total_postings = 0usize;
        for _ in 0..num_keys {
            let key = r.read_u32::<LittleEndian>()? as usize;
            if key >= lookup.len() {
                return Err(EngineError::IndexLoad(format!(
                    "{}: key {key} out of range for half-window length {}",
                    path.display(),
                    params.partialwin
                )));
            }
            let nf = r.read_u32::<LittleEndian>()?;
            let nr = r.read_u32::<LittleEndian>()?;
            let entry = &mut lookup[key];
            entry.count = nf + nr;
            total_postings += (nf + nr) as usize;
            if nf > 0 {
                let trie = entry
                    .trie_f
                    .get_or_insert_with(|| BurstTrie::new(params.partialwin));
                for _ in 0..nf {
                    let suffix = r.read_u32::<LittleEndian>()?;
                    let ref_id = r.read_u32::<LittleEndian>()?;
                    let pos = r.read_u32::<LittleEndian>()?;
                    trie.insert(suffix, Occurrence { ref_id, pos });
                }
            }
            if nr > 0 {
                let trie = entry
                    .trie_r
                    .get_or_insert_with(|| BurstTrie::new(params.partialwin));
                for _ in 0..nr {
                    let suffix = r.read_u32::<LittleEndian>()?;
                    let ref_id = r.read_u32::<LittleEndian>()?;
                    let pos = r.read_u32::<LittleEndian>()?;
                    trie.insert(suffix, Occurrence { ref_id, pos });
                }
            }
        }
        log::debug!(
            "loaded part {part}: {num_keys} keys, {total_postings} postings in {:.2} sec",
            started.elapsed().as_secs_f64()
        );
        Ok(IndexPart { params, lookup })
    }
}

/// Path of the reference file for one part.
pub fn part_refs_path(prefix: &Path, part: usize) -> PathBuf {
    suffixed(prefix, &format!(".part{part}.refs"))
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(prefix.to_string_lossy().to_string() + suffix)
}

struct Posting {
    suffix: u32,
    ref_id: u32,
    pos: u32,
}

/// Build the on-disk index for one reference FASTA.
pub fn build_index(opts: &IndexOpt) -> EngineResult<()> {
    let params = IndexParams::from_seed_len(opts.seed_len)?;
    let started = Instant::now();

    let mut reader = FastxReader::open(&opts.reference)?;
    if reader.format() != FastxFormat::Fasta {
        return Err(EngineError::InvalidInput(format!(
            "{}: reference databases must be FASTA",
            opts.reference.display()
        )));
    }

    // Partition references into parts, greedily bounded by max_part_bases.
    let mut parts: Vec<References> = Vec::new();
    let mut current = References {
        headers: Vec::new(),
        seqs: Vec::new(),
    };
    let mut current_bases = 0u64;
    let mut total_ref_bases = 0u64;
    while let Some(record) = reader.next_record() {
        let record = record?;
        let encoded = encoding::encode(&record.seq);
        if encoded.len() < params.lnwin {
            log::warn!(
                "reference {} is shorter than the window length {}; it will never be matched",
                record.header,
                params.lnwin
            );
        }
        if current_bases > 0 && current_bases + encoded.len() as u64 > opts.max_part_bases {
            parts.push(std::mem::replace(
                &mut current,
                References {
                    headers: Vec::new(),
                    seqs: Vec::new(),
                },
            ));
            current_bases = 0;
        }
        current_bases += encoded.len() as u64;
        total_ref_bases += encoded.len() as u64;
        current.headers.push(record.header);
        current.seqs.push(encoded);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    if parts.is_empty() {
        return Err(EngineError::InvalidInput(format!(
            "{}: no reference sequences found",
            opts.reference.display()
        )));
    }

    let meta = IndexMeta {
        params,
        parts: parts
            .iter()
            .map(|p| PartInfo {
                num_refs: p.len() as u32,
                num_bases: p.seqs.iter().map(|s| s.len() as u64).sum(),
            })
            .collect(),
        total_ref_bases,
    };
    meta.save(&opts.out)?;

    for (part_num, refs) in parts.iter().enumerate() {
        write_part(&opts.out, part_num, refs, &params)?;
        refs.save(&part_refs_path(&opts.out, part_num))?;
    }

    log::info!(
        "indexed {} references ({} bases) into {} part(s) in {:.2} sec",
        meta.parts.iter().map(|p| p.num_refs as u64).sum::<u64>(),
        total_ref_bases,
        parts.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn write_part(
    prefix: &Path,
    part_num: usize,
    refs: &References,
    params: &IndexParams,
) -> EngineResult<()> {
    // key -> (forward postings, reverse postings)
    let mut table: FxHashMap<u32, (Vec<Posting>, Vec<Posting>)> = FxHashMap::default();
    let mut windows = 0u64;

    for (ref_id, seq) in refs.seqs.iter().enumerate() {
        if seq.len() < params.lnwin {
            continue;
        }
        for pos in 0..=(seq.len() - params.lnwin) {
            let key_left = encoding::pack_window(seq, pos, params.partialwin);
            let key_right = encoding::pack_window(seq, pos + params.partialwin, params.partialwin);
            let (key_left, key_right) = match (key_left, key_right) {
                (Some(l), Some(r)) => (l, r),
                // A window containing an ambiguous base is never indexed.
                _ => continue,
            };
            let rev_left =
                encoding::pack_window_rev(seq, pos + params.partialwin, params.partialwin)
                    .expect("left half packed above");
            windows += 1;
            table.entry(key_left).or_default().0.push(Posting {
                suffix: key_right,
                ref_id: ref_id as u32,
                pos: pos as u32,
            });
            table.entry(key_right).or_default().1.push(Posting {
                suffix: rev_left,
                ref_id: ref_id as u32,
                pos: pos as u32,
            });
        }
    }

    let mut keys: Vec<u32> = table.keys().copied().collect();
    keys.sort_unstable();

    let path = suffixed(prefix, &format!(".part{part_num}"));
    let mut w = BufWriter::new(File::create(&path)?);
    w.write_all(PART_MAGIC)?;
    w.write_u32::<LittleEndian>(INDEX_VERSION)?;
    w.write_u32::<LittleEndian>(keys.len() as u32)?;
    for key in keys {
        let (forward, reverse) = &table[&key];
        w.write_u32::<LittleEndian>(key)?;
        w.write_u32::<LittleEndian>(forward.len() as u32)?;
        w.write_u32::<LittleEndian>(reverse.len() as u32)?;
        for p in forward.iter().chain(reverse.iter()) {
            w.write_u32::<LittleEndian>(p.suffix)?;
            w.write_u32::<LittleEndian>(p.ref_id)?;
            w.write_u32::<LittleEndian>(p.pos)?;
        }
    }
    w.flush()?;
    log::debug!("part {part_num}: {windows} windows indexed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn build_from_fasta(
        fasta: &[u8],
        seed_len: usize,
        max_part_bases: u64,
    ) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let fasta_path = dir.path().join("db.fasta");
        let mut f = File::create(&fasta_path).unwrap();
        f.write_all(fasta).unwrap();
        let prefix = dir.path().join("db");
        build_index(&IndexOpt {
            reference: fasta_path,
            out: prefix.clone(),
            seed_len,
            max_part_bases,
        })
        .unwrap();
        (dir, prefix)
    }

    #[test]
    fn params_are_derived_from_seed_len() {
        let p = IndexParams::from_seed_len(18).unwrap();
        assert_eq!(p.partialwin, 9);
        assert_eq!(p.numbvs, 28);
        assert_eq!(p.skiplengths, [18, 9, 3]);
        assert!(IndexParams::from_seed_len(17).is_err());
        assert!(IndexParams::from_seed_len(4).is_err());
    }

    #[test]
    fn build_and_load_single_part() {
        let (_dir, prefix) = build_from_fasta(b">r1\nACGTACGTACGTACGTAC\n", 18, 1_000_000);

        let meta = IndexMeta::load(&prefix).unwrap();
        assert_eq!(meta.num_parts(), 1);
        assert_eq!(meta.total_ref_bases, 18);

        let part = IndexPart::load(&prefix, 0, &meta).unwrap();
        // A single 18-base reference has exactly one window.
        let key = encoding::pack_window(&encoding::encode(b"ACGTACGTA"), 0, 9).unwrap();
        let entry = &part.lookup[key as usize];
        assert!(entry.count >= 1);
        assert!(entry.trie_f.is_some());

        let refs = References::load(&part_refs_path(&prefix, 0)).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs.name(0), "r1");
    }

    #[test]
    fn part_split_respects_base_limit() {
        let fasta = b">a\nACGTACGTACGTACGTACGT\n>b\nTGCATGCATGCATGCATGCA\n";
        let (_dir, prefix) = build_from_fasta(fasta, 18, 20);
        let meta = IndexMeta::load(&prefix).unwrap();
        assert_eq!(meta.num_parts(), 2);
        assert_eq!(meta.parts[0].num_refs, 1);
        assert_eq!(meta.parts[1].num_refs, 1);
        IndexPart::load(&prefix, 0, &meta).unwrap();
        IndexPart::load(&prefix, 1, &meta).unwrap();
    }

    #[test]
    fn ambiguous_windows_are_skipped() {
        // 4 leading bases, 2 Ns, then 24 clean bases: only the 7 windows
        // that start past the Ns are indexable.
        let (_dir, prefix) =
            build_from_fasta(b">n\nACGTNNACGTACGTACGTACGTACGTACGT\n", 18, 1_000_000);
        let meta = IndexMeta::load(&prefix).unwrap();
        let part = IndexPart::load(&prefix, 0, &meta).unwrap();
        let total: usize = part
            .lookup
            .iter()
            .filter_map(|e| e.trie_f.as_ref())
            .map(|t| t.num_occurrences())
            .sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn meta_load_rejects_missing_index() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            IndexMeta::load(&dir.path().join("nope")),
            Err(EngineError::IndexLoad(_))
        ));
    }
}

// Report writers: BLAST-tabular, SAM, matched/unmatched FASTX, OTU map,
// and the human-readable log summary. All files are written by the final
// emission pass in input order.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;

use crate::encoding;
use crate::error::EngineResult;
use crate::fastx_reader::FastxFormat;
use crate::index::{self, IndexMeta};
use crate::opts::FilterOpt;
use crate::read::{Alignment, Read};
use crate::readstats::ReadStats;
use crate::references::References;

/// Reference names and lengths for every (index, part), loaded once for
/// the final emission pass.
pub struct RefCatalog {
    dbs: Vec<Vec<Vec<RefEntry>>>,
}

pub struct RefEntry {
    pub name: String,
    pub len: usize,
}

impl RefCatalog {
    pub fn load(indexes: &[PathBuf], metas: &[IndexMeta]) -> EngineResult<Self> {
        let mut dbs = Vec::with_capacity(indexes.len());
        for (prefix, meta) in indexes.iter().zip(metas) {
            let mut parts = Vec::with_capacity(meta.num_parts());
            for part in 0..meta.num_parts() {
                let refs = References::load(&index::part_refs_path(prefix, part))?;
                parts.push(
                    (0..refs.len())
                        .map(|i| RefEntry {
                            name: refs.name(i as u32).to_string(),
                            len: refs.seq_len(i as u32),
                        })
                        .collect(),
                );
            }
            dbs.push(parts);
        }
        Ok(RefCatalog { dbs })
    }

    pub fn entry(&self, a: &Alignment) -> &RefEntry {
        &self.dbs[a.index_num as usize][a.part as usize][a.ref_id as usize]
    }

    fn iter_all(&self) -> impl Iterator<Item = &RefEntry> {
        self.dbs.iter().flatten().flatten()
    }
}

fn format_evalue(ev: f64) -> String {
    if ev < 1e-99 {
        "0.0".to_string()
    } else {
        format!("{ev:.2e}")
    }
}

pub struct ReportWriter {
    blast: Option<BufWriter<File>>,
    sam: Option<BufWriter<File>>,
    aligned_fastx: Option<BufWriter<File>>,
    other_fastx: Option<BufWriter<File>>,
    otu: Option<FxHashMap<String, Vec<String>>>,
    otu_path: PathBuf,
    log_path: PathBuf,
    format: FastxFormat,
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(prefix.to_string_lossy().to_string() + suffix)
}

impl ReportWriter {
    pub fn create(
        opts: &FilterOpt,
        catalog: &RefCatalog,
        format: FastxFormat,
    ) -> EngineResult<Self> {
        let aligned = &opts.aligned_prefix;
        let fastx_ext = match format {
            FastxFormat::Fasta => ".fasta",
            FastxFormat::Fastq => ".fastq",
        };

        let blast = if opts.blast_out {
            Some(BufWriter::new(File::create(suffixed(aligned, ".blast"))?))
        } else {
            None
        };

        let mut sam = if opts.sam_out {
            Some(BufWriter::new(File::create(suffixed(aligned, ".sam"))?))
        } else {
            None
        };
        if let Some(w) = sam.as_mut() {
            writeln!(w, "@HD\tVN:1.0\tSO:unsorted")?;
            for entry in catalog.iter_all() {
                writeln!(w, "@SQ\tSN:{}\tLN:{}", entry.name, entry.len)?;
            }
            writeln!(
                w,
                "@PG\tID:{}\tPN:{}\tVN:{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
            )?;
        }

        let aligned_fastx = if opts.fastx_out {
            Some(BufWriter::new(File::create(suffixed(aligned, fastx_ext))?))
        } else {
            None
        };
        let other_fastx = match (&opts.other_prefix, opts.fastx_out) {
            (Some(other), true) => Some(BufWriter::new(File::create(suffixed(other, fastx_ext))?)),
            _ => None,
        };

        Ok(ReportWriter {
            blast,
            sam,
            aligned_fastx,
            other_fastx,
            otu: if opts.otu_map {
                Some(FxHashMap::default())
            } else {
                None
            },
            otu_path: suffixed(aligned, "_otus.txt"),
            log_path: suffixed(aligned, ".log"),
            format,
        })
    }

    /// Emit one read's records and advance the aggregate counters.
    pub fn emit_read(
        &mut self,
        read: &Read,
        catalog: &RefCatalog,
        opts: &FilterOpt,
        stats: &ReadStats,
    ) -> EngineResult<()> {
        if read.hit {
            stats.total_reads_mapped.fetch_add(1, Ordering::Relaxed);
            let mut seen_db = Vec::new();
            for a in &read.alignments {
                if !seen_db.contains(&a.index_num) {
                    seen_db.push(a.index_num);
                    stats.reads_matched_per_db[a.index_num as usize]
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            if read
                .alignments
                .iter()
                .any(|a| a.identity >= opts.min_id && a.coverage >= opts.min_cov)
            {
                stats.total_reads_mapped_cov.fetch_add(1, Ordering::Relaxed);
            }
            if opts.de_novo_otu && read.hit_denovo {
                stats.total_reads_denovo.fetch_add(1, Ordering::Relaxed);
            }
        }

        for a in &read.alignments {
            if let Some(w) = self.blast.as_mut() {
                write_blast_line(w, read, a, catalog)?;
            }
            if let Some(w) = self.sam.as_mut() {
                write_sam_line(w, read, a, catalog)?;
            }
        }

        if read.hit {
            if let Some(map) = self.otu.as_mut() {
                // Best alignment passing both thresholds defines the OTU.
                if let Some(best) = read
                    .alignments
                    .iter()
                    .filter(|a| a.identity >= opts.min_id && a.coverage >= opts.min_cov)
                    .max_by_key(|a| a.score)
                {
                    map.entry(catalog.entry(best).name.clone())
                        .or_default()
                        .push(read.name().to_string());
                }
            }
            if let Some(w) = self.aligned_fastx.as_mut() {
                write_fastx_record(w, read, self.format)?;
            }
        } else if let Some(w) = self.other_fastx.as_mut() {
            write_fastx_record(w, read, self.format)?;
        }
        Ok(())
    }

    /// Write the OTU map and append the run summary to the log file.
    pub fn finalize(mut self, opts: &FilterOpt, stats: &ReadStats) -> EngineResult<u64> {
        let mut num_otus = 0u64;
        if let Some(map) = self.otu.take() {
            let mut w = BufWriter::new(File::create(&self.otu_path)?);
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            num_otus = names.len() as u64;
            for name in names {
                write!(w, "{name}")?;
                for member in &map[name] {
                    write!(w, "\t{member}")?;
                }
                writeln!(w)?;
            }
            w.flush()?;
        }

        for w in [
            self.blast.as_mut(),
            self.sam.as_mut(),
            self.aligned_fastx.as_mut(),
            self.other_fastx.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            w.flush()?;
        }

        write_log(&self.log_path, opts, stats, num_otus)?;
        Ok(num_otus)
    }
}

fn write_blast_line(
    w: &mut impl Write,
    read: &Read,
    a: &Alignment,
    catalog: &RefCatalog,
) -> EngineResult<()> {
    let columns = a.aligned_columns();
    let matches = (a.identity * f64::from(columns)).round() as u32;
    let m_columns: u32 = a
        .cigar
        .iter()
        .filter(|&&(op, _)| op == b'M')
        .map(|&(_, len)| len)
        .sum();
    let mismatches = m_columns.saturating_sub(matches);
    let read_len = read.seq.len() as u32;
    // Query coordinates are reported on the original strand; a minus-strand
    // alignment has qstart > qend.
    let (qstart, qend) = if a.reverse {
        (read_len - a.read_start, read_len - a.read_end + 1)
    } else {
        (a.read_start + 1, a.read_end)
    };
    writeln!(
        w,
        "{}\t{}\t{:.2}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.1}",
        read.name(),
        catalog.entry(a).name,
        a.identity * 100.0,
        columns,
        mismatches,
        a.gap_openings(),
        qstart,
        qend,
        a.ref_start + 1,
        a.ref_end,
        format_evalue(a.evalue),
        a.bit_score,
    )?;
    Ok(())
}

fn write_sam_line(
    w: &mut impl Write,
    read: &Read,
    a: &Alignment,
    catalog: &RefCatalog,
) -> EngineResult<()> {
    // SEQ and CIGAR are emitted in the aligned strand's frame.
    let (seq, qual) = if a.reverse {
        let seq = encoding::reverse_complement_ascii(&read.seq);
        let qual = read.qual.as_ref().map(|q| {
            let mut q = q.clone();
            q.reverse();
            q
        });
        (seq, qual)
    } else {
        (read.seq.clone(), read.qual.clone())
    };
    let flag = if a.reverse { 16u16 } else { 0 };
    let clip5 = a.read_start;
    let clip3 = read.seq.len() as u32 - a.read_end;
    let mut cigar = String::new();
    if clip5 > 0 {
        cigar.push_str(&format!("{clip5}S"));
    }
    cigar.push_str(&a.cigar_string());
    if clip3 > 0 {
        cigar.push_str(&format!("{clip3}S"));
    }
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t255\t{}\t*\t0\t0\t{}\t{}\tAS:i:{}",
        read.name(),
        flag,
        catalog.entry(a).name,
        a.ref_start + 1,
        cigar,
        String::from_utf8_lossy(&seq),
        qual.map(|q| String::from_utf8_lossy(&q).into_owned())
            .unwrap_or_else(|| "*".to_string()),
        a.score,
    )?;
    Ok(())
}

fn write_fastx_record(w: &mut impl Write, read: &Read, format: FastxFormat) -> EngineResult<()> {
    match format {
        FastxFormat::Fasta => {
            writeln!(w, ">{}", read.header)?;
            w.write_all(&read.seq)?;
            writeln!(w)?;
        }
        FastxFormat::Fastq => {
            writeln!(w, "@{}", read.header)?;
            w.write_all(&read.seq)?;
            writeln!(w, "\n+")?;
            w.write_all(read.qual.as_deref().unwrap_or(b""))?;
            writeln!(w)?;
        }
    }
    Ok(())
}

fn write_log(
    path: &Path,
    opts: &FilterOpt,
    stats: &ReadStats,
    num_otus: u64,
) -> EngineResult<()> {
    let mut w = BufWriter::new(OpenOptions::new().create(true).append(true).open(path)?);
    let total = stats.total_reads.load(Ordering::Relaxed);
    let mapped = stats.total_reads_mapped.load(Ordering::Relaxed);
    let pct = |n: u64| {
        if total == 0 {
            0.0
        } else {
            n as f64 / total as f64 * 100.0
        }
    };

    writeln!(w, " Results:")?;
    writeln!(w, "    Total reads = {total}")?;
    if opts.de_novo_otu {
        writeln!(
            w,
            "    Total reads for de novo clustering = {}",
            stats.total_reads_denovo.load(Ordering::Relaxed)
        )?;
    }
    writeln!(
        w,
        "    Total reads passing E-value threshold = {mapped} ({:.2})",
        pct(mapped)
    )?;
    writeln!(
        w,
        "    Total reads failing E-value threshold = {} ({:.2})",
        total - mapped,
        pct(total - mapped)
    )?;
    writeln!(
        w,
        "    Minimum read length = {}",
        stats.min_read_len.load(Ordering::Relaxed)
    )?;
    writeln!(
        w,
        "    Maximum read length = {}",
        stats.max_read_len.load(Ordering::Relaxed)
    )?;
    writeln!(w, "    Mean read length    = {}", stats.mean_read_len())?;
    writeln!(w, " By database:")?;
    for (prefix, counter) in opts.indexes.iter().zip(&stats.reads_matched_per_db) {
        writeln!(
            w,
            "    {}\t\t{:.2}",
            prefix.display(),
            pct(counter.load(Ordering::Relaxed))
        )?;
    }
    if opts.otu_map {
        writeln!(
            w,
            " Total reads passing %id and %coverage thresholds = {}",
            stats.total_reads_mapped_cov.load(Ordering::Relaxed)
        )?;
        writeln!(w, " Total OTUs = {num_otus}")?;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    writeln!(w, "\n Completed (unix time {now})")?;
    w.flush()?;
    Ok(())
}

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use ribosift::opts::{FilterOpt, IndexOpt};
use ribosift::{index, pipeline};

#[derive(Parser)]
#[command(name = "ribosift")]
#[command(about = "ribosift - filter rRNA reads against reference databases", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the burst-trie index for a reference database
    Index {
        /// Reference FASTA file
        #[arg(long = "ref", value_name = "REF.FA")]
        reference: PathBuf,

        /// Prefix for the index files (default: same as the FASTA)
        #[arg(short = 'o', long, value_name = "PREFIX")]
        out: Option<PathBuf>,

        /// Seed window length (even)
        #[arg(short = 'L', long, value_name = "INT", default_value = "18")]
        seed_len: usize,

        /// Maximum reference bases per index part
        #[arg(short = 'm', long, value_name = "INT", default_value = "500000000")]
        max_part_bases: u64,

        /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
        #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
        verbosity: i32,
    },

    /// Filter reads against one or more reference indexes
    Filter {
        /// Index prefix (repeat for multiple databases, searched in order)
        #[arg(long = "ref", value_name = "PREFIX", required = true)]
        indexes: Vec<PathBuf>,

        /// Reads file (FASTA or FASTQ, optionally .gz)
        #[arg(long, value_name = "READS")]
        reads: PathBuf,

        /// Working directory for the key-value store
        #[arg(short = 'd', long, value_name = "DIR", default_value = "ribosift-wd")]
        workdir: PathBuf,

        /// Prefix for output files of matching reads
        #[arg(long, value_name = "PREFIX", default_value = "aligned")]
        aligned: PathBuf,

        /// Prefix for output files of non-matching reads
        #[arg(long, value_name = "PREFIX")]
        other: Option<PathBuf>,

        // ===== Output selection =====
        /// Write BLAST-like tabular alignments
        #[arg(long)]
        blast: bool,

        /// Write SAM alignments
        #[arg(long)]
        sam: bool,

        /// Write matching (and with --other, non-matching) reads as FASTA/FASTQ
        #[arg(long)]
        fastx: bool,

        /// Write an OTU map of reads passing identity and coverage thresholds
        #[arg(long)]
        otu_map: bool,

        /// Flag reads failing identity/coverage for de novo clustering
        #[arg(long)]
        de_novo_otu: bool,

        // ===== Search control =====
        /// Search the forward strand only
        #[arg(short = 'F', long)]
        forward: bool,

        /// Report up to INT alignments per read (0 = use best-hit mode)
        #[arg(short = 'N', long, value_name = "INT", default_value = "0")]
        num_alignments: i32,

        /// Report the INT highest-scoring alignments per read
        #[arg(long, value_name = "INT", default_value = "1")]
        best: u32,

        /// Best-hit search engages after INT successful LIS chains
        #[arg(long, value_name = "INT", default_value = "2")]
        min_lis: u32,

        /// Minimum seed hits on a reference before chaining considers it
        #[arg(long, value_name = "INT", default_value = "2")]
        seed_hits: usize,

        /// Minimum lookup occurrences before a half-window is traversed
        #[arg(long, value_name = "INT", default_value = "0")]
        min_seed_occur: u32,

        /// Padding on each side of a candidate reference region
        #[arg(long, value_name = "INT", default_value = "4")]
        edges: u32,

        /// Window strides for the three passes, e.g. 18,9,3
        #[arg(long, value_name = "INT,INT,INT")]
        passes: Option<String>,

        // ===== Scoring =====
        /// Score for a nucleotide match
        #[arg(long = "match", value_name = "INT", default_value = "2")]
        match_score: i32,

        /// Penalty for a mismatch (negative)
        #[arg(long, value_name = "INT", default_value = "-3", allow_hyphen_values = true)]
        mismatch: i32,

        /// Gap open penalty
        #[arg(long, value_name = "INT", default_value = "5")]
        gap_open: i32,

        /// Gap extension penalty
        #[arg(long, value_name = "INT", default_value = "2")]
        gap_ext: i32,

        /// E-value threshold for accepting an alignment
        #[arg(short = 'e', long, value_name = "FLOAT", default_value = "1.0")]
        evalue: f64,

        /// Identity fraction for OTU-map membership
        #[arg(long, value_name = "FLOAT", default_value = "0.97")]
        min_id: f64,

        /// Read coverage fraction for OTU-map membership
        #[arg(long, value_name = "FLOAT", default_value = "0.97")]
        min_cov: f64,

        // ===== Processing =====
        /// Number of reader threads (a writer is paired with each)
        #[arg(long, value_name = "INT", default_value = "1")]
        threads_read: usize,

        /// Number of processor threads
        #[arg(short = 'a', long, value_name = "INT", default_value = "1")]
        threads_proc: usize,

        /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
        #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
        verbosity: i32,
    },
}

fn init_logger(verbosity: i32) {
    let log_level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn parse_passes(s: &str) -> Result<[usize; 3], String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("--passes needs three comma-separated strides: {s}"));
    }
    let mut out = [0usize; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid stride in --passes: {part}"))?;
        if *slot == 0 {
            return Err("--passes strides must be positive".to_string());
        }
    }
    Ok(out)
}

fn main() {
    if let Err(e) = run() {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            reference,
            out,
            seed_len,
            max_part_bases,
            verbosity,
        } => {
            init_logger(verbosity);
            let out = out.unwrap_or_else(|| reference.clone());
            log::info!("building index for {}", reference.display());
            let opts = IndexOpt {
                reference,
                out,
                seed_len,
                max_part_bases,
            };
            index::build_index(&opts).context("index building failed")?;
        }

        Commands::Filter {
            indexes,
            reads,
            workdir,
            aligned,
            other,
            blast,
            sam,
            fastx,
            otu_map,
            de_novo_otu,
            forward,
            num_alignments,
            best,
            min_lis,
            seed_hits,
            min_seed_occur,
            edges,
            passes,
            match_score,
            mismatch,
            gap_open,
            gap_ext,
            evalue,
            min_id,
            min_cov,
            threads_read,
            threads_proc,
            verbosity,
        } => {
            init_logger(verbosity);

            let passes = passes
                .as_deref()
                .map(parse_passes)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            anyhow::ensure!(mismatch < 0, "--mismatch must be negative, got {mismatch}");

            let opts = FilterOpt {
                indexes,
                reads,
                workdir,
                num_read_threads: threads_read,
                num_proc_threads: threads_proc,
                forward_only: forward,
                num_alignments: if num_alignments > 0 { num_alignments } else { -1 },
                num_best_hits: best,
                min_lis,
                match_score,
                mismatch,
                gap_open,
                gap_ext,
                evalue,
                min_id,
                min_cov,
                seed_hits,
                min_seed_occur,
                edges,
                passes,
                blast_out: blast,
                sam_out: sam,
                fastx_out: fastx,
                otu_map,
                de_novo_otu,
                aligned_prefix: aligned,
                other_prefix: other,
            };

            pipeline::run_filter(&opts).context("filtering failed")?;
        }
    }
    Ok(())
}

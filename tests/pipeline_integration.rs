// End-to-end tests over the full pipeline: on-disk index, key-value store
// checkpointing across parts, worker pool, and report emission.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use ribosift::index::build_index;
use ribosift::kvstore::KeyValueStore;
use ribosift::opts::{FilterOpt, IndexOpt};
use ribosift::pipeline::run_filter;
use ribosift::read::Read;

const REF18: &str = "ACGTACGTACGTACGTAC";

fn write_fasta(path: &Path, records: &[(&str, &str)]) {
    let mut out = String::new();
    for (name, seq) in records {
        out.push('>');
        out.push_str(name);
        out.push('\n');
        out.push_str(seq);
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

fn build_db(dir: &Path, name: &str, records: &[(&str, &str)], max_part_bases: u64) -> PathBuf {
    let fasta = dir.join(format!("{name}.fasta"));
    write_fasta(&fasta, records);
    let prefix = dir.join(name);
    build_index(&IndexOpt {
        reference: fasta,
        out: prefix.clone(),
        seed_len: 18,
        max_part_bases,
    })
    .unwrap();
    prefix
}

fn base_opts(dir: &Path, indexes: Vec<PathBuf>, reads: &Path) -> FilterOpt {
    FilterOpt {
        indexes,
        reads: reads.to_path_buf(),
        workdir: dir.join("wd"),
        seed_hits: 1,
        blast_out: true,
        fastx_out: true,
        aligned_prefix: dir.join("aligned"),
        other_prefix: Some(dir.join("other")),
        ..FilterOpt::default()
    }
}

/// Restore the checkpointed state of one read from the store.
fn read_state(workdir: &Path, ordinal: u64) -> Read {
    let store = KeyValueStore::open(workdir).unwrap();
    let bytes = store
        .get(ordinal)
        .unwrap()
        .unwrap_or_else(|| panic!("no state for read {ordinal}"));
    let mut read = Read::new(ordinal, String::new(), b"N".to_vec(), None, -1);
    read.restore_state(&bytes).unwrap();
    read
}

fn blast_lines(dir: &Path) -> Vec<String> {
    let text = fs::read_to_string(dir.join("aligned.blast")).unwrap();
    text.lines().map(|l| l.to_string()).collect()
}

#[test]
fn exact_match_single_seed() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    write_fasta(&reads, &[("q1", REF18)]);

    let opts = base_opts(dir.path(), vec![db], &reads);
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(state.hit);
    assert!(state.is_valid);
    assert_eq!(state.alignments.len(), 1);
    let a = &state.alignments[0];
    assert_eq!(a.score, 18 * 2);
    assert_eq!((a.ref_start, a.ref_end), (0, 18));
    assert_eq!((a.read_start, a.read_end), (0, 18));
    assert_eq!(a.cigar, vec![(b'M', 18)]);

    let lines = blast_lines(dir.path());
    assert_eq!(lines.len(), 1);
    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields[0], "q1");
    assert_eq!(fields[1], "ref1");
    assert_eq!(fields[2], "100.00");

    // the matching read lands in the aligned FASTA, nothing in other
    let aligned = fs::read_to_string(dir.path().join("aligned.fasta")).unwrap();
    assert!(aligned.contains(">q1"));
    let other = fs::read_to_string(dir.path().join("other.fasta")).unwrap();
    assert!(other.is_empty());
}

#[test]
fn single_substitution_in_right_half() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    // position 11 T->G: left half exact, one edit in the right half
    write_fasta(&reads, &[("q1", "ACGTACGTACGGACGTAC")]);

    let opts = base_opts(dir.path(), vec![db], &reads);
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(state.hit);
    assert_eq!(state.alignments.len(), 1);
    assert_eq!(state.alignments[0].score, 17 * 2 - 3);
    assert_eq!(state.max_sw_score, 17 * 2 - 3);
}

#[test]
fn too_short_read_is_skipped_without_crashing() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    write_fasta(&reads, &[("tiny", "ACGTACGTAC")]);

    let opts = base_opts(dir.path(), vec![db], &reads);
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(!state.is_valid);
    assert!(!state.hit);
    assert!(state.alignments.is_empty());
    assert!(blast_lines(dir.path()).is_empty());
    // an unmatched read still flows to the other file
    let other = fs::read_to_string(dir.path().join("other.fasta")).unwrap();
    assert!(other.contains(">tiny"));
}

#[test]
fn num_alignments_limit_halts_after_one() {
    let dir = TempDir::new().unwrap();
    let refs: Vec<(String, &str)> = (0..5).map(|i| (format!("ref{i}"), REF18)).collect();
    let refs_borrowed: Vec<(&str, &str)> =
        refs.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    let db = build_db(dir.path(), "db", &refs_borrowed, 1 << 30);
    let reads = dir.path().join("reads.fasta");
    write_fasta(&reads, &[("q1", REF18)]);

    let mut opts = base_opts(dir.path(), vec![db], &reads);
    opts.num_alignments = 1;
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(state.hit);
    assert!(state.done);
    assert_eq!(state.alignments.len(), 1);
    assert_eq!(state.num_alignments, 0);
    assert_eq!(blast_lines(dir.path()).len(), 1);
}

#[test]
fn pass_escalation_discovers_offset_seed() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    let query = format!("TTTTT{REF18}TTTTT");
    write_fasta(&reads, &[("q1", &query)]);

    let mut opts = base_opts(dir.path(), vec![db], &reads);
    opts.passes = Some([10, 5, 1]);
    opts.forward_only = true;
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(state.hit);
    assert_eq!(state.alignments.len(), 1);
    let a = &state.alignments[0];
    assert_eq!(a.score, 18 * 2);
    assert_eq!((a.read_start, a.read_end), (5, 23));
}

#[test]
fn state_carries_across_index_parts() {
    let dir = TempDir::new().unwrap();
    // two references forced into two parts; the read matches only the
    // second, so the hit is found on part 1 after a miss on part 0
    let db = build_db(
        dir.path(),
        "db",
        &[("decoy", "TGCATGCATGCATGCATGCA"), ("target", REF18)],
        20,
    );
    let reads = dir.path().join("reads.fasta");
    write_fasta(&reads, &[("q1", REF18)]);

    let opts = base_opts(dir.path(), vec![db], &reads);
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(state.hit);
    assert_eq!(state.last_part, 1);
    assert_eq!(state.alignments.len(), 1);
    assert_eq!(state.alignments[0].part, 1);

    // counted once in the summary
    assert_eq!(blast_lines(dir.path()).len(), 1);
    let log = fs::read_to_string(dir.path().join("aligned.log")).unwrap();
    assert!(log.contains("Total reads = 1"));
    assert!(log.contains("Total reads passing E-value threshold = 1"));
}

#[test]
fn reverse_strand_read_is_matched() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    // reverse complement of the reference
    write_fasta(&reads, &[("q1", "GTACGTACGTACGTACGT")]);

    let mut opts = base_opts(dir.path(), vec![db], &reads);
    opts.sam_out = true;
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(state.hit);
    assert!(state.alignments[0].reverse);
    assert_eq!(state.alignments[0].score, 18 * 2);

    let sam = fs::read_to_string(dir.path().join("aligned.sam")).unwrap();
    let record = sam.lines().find(|l| !l.starts_with('@')).unwrap();
    let fields: Vec<&str> = record.split('\t').collect();
    assert_eq!(fields[1], "16");
    // SEQ is emitted on the aligned (reference) strand
    assert_eq!(fields[9], REF18);
}

#[test]
fn forward_only_skips_reverse_strand() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    write_fasta(&reads, &[("q1", "GTACGTACGTACGTACGT")]);

    let mut opts = base_opts(dir.path(), vec![db], &reads);
    opts.forward_only = true;
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(!state.hit);
    assert!(blast_lines(dir.path()).is_empty());
}

#[test]
fn fastq_input_round_trips_quality() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fastq");
    fs::write(
        &reads,
        format!("@q1\n{REF18}\n+\nIIIIIIIIIIIIIIIIII\n"),
    )
    .unwrap();

    let opts = base_opts(dir.path(), vec![db], &reads);
    run_filter(&opts).unwrap();

    let aligned = fs::read_to_string(dir.path().join("aligned.fastq")).unwrap();
    assert!(aligned.starts_with("@q1\n"));
    assert!(aligned.contains("IIIIIIIIIIIIIIIIII"));
}

#[test]
fn otu_map_collects_passing_reads() {
    let dir = TempDir::new().unwrap();
    let db = build_db(dir.path(), "db", &[("ref1", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    write_fasta(&reads, &[("q1", REF18), ("q2", REF18)]);

    let mut opts = base_opts(dir.path(), vec![db], &reads);
    opts.otu_map = true;
    run_filter(&opts).unwrap();

    let otus = fs::read_to_string(dir.path().join("aligned_otus.txt")).unwrap();
    let lines: Vec<&str> = otus.lines().collect();
    assert_eq!(lines.len(), 1);
    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields[0], "ref1");
    assert!(fields.contains(&"q1"));
    assert!(fields.contains(&"q2"));

    let log = fs::read_to_string(dir.path().join("aligned.log")).unwrap();
    assert!(log.contains("Total OTUs = 1"));
}

#[test]
fn results_are_independent_of_processor_count() {
    let reference = "ACGTTGCAGGTCAATCCGTACCGTTGAACGTTGCAGGTCAATCAG";
    let mut reads: Vec<(String, String)> = Vec::new();
    let mut rng = StdRng::seed_from_u64(11);
    for i in 0..40 {
        let start = rng.gen_range(0..reference.len() - 20);
        let len = rng.gen_range(18..=(reference.len() - start).min(30));
        reads.push((format!("q{i}"), reference[start..start + len].to_string()));
    }

    let mut outputs = Vec::new();
    for procs in [1usize, 4] {
        let dir = TempDir::new().unwrap();
        let db = build_db(dir.path(), "db", &[("ref1", reference)], 1 << 30);
        let reads_path = dir.path().join("reads.fasta");
        let borrowed: Vec<(&str, &str)> = reads
            .iter()
            .map(|(n, s)| (n.as_str(), s.as_str()))
            .collect();
        write_fasta(&reads_path, &borrowed);

        let mut opts = base_opts(dir.path(), vec![db], &reads_path);
        opts.num_proc_threads = procs;
        run_filter(&opts).unwrap();
        outputs.push(blast_lines(dir.path()));
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn embedded_reads_always_align_with_bounded_score() {
    // Randomized property: a read embedded verbatim in a reference must
    // produce at least one accepted alignment scoring no less than
    // (lnwin - 1) * match + min(mismatch, -gap_open - gap_ext).
    let mut rng = StdRng::seed_from_u64(7);
    let bases = [b'A', b'C', b'G', b'T'];
    let random_seq = |len: usize, rng: &mut StdRng| -> String {
        (0..len)
            .map(|_| bases[rng.gen_range(0..4)] as char)
            .collect()
    };

    let dir = TempDir::new().unwrap();
    let mut refs: Vec<(String, String)> = Vec::new();
    let mut reads: Vec<(String, String)> = Vec::new();
    for i in 0..15 {
        let read_len = rng.gen_range(18..=72);
        let read = random_seq(read_len, &mut rng);
        let left = random_seq(rng.gen_range(0..30), &mut rng);
        let right = random_seq(rng.gen_range(0..30), &mut rng);
        refs.push((format!("ref{i}"), format!("{left}{read}{right}")));
        reads.push((format!("q{i}"), read));
    }
    let refs_borrowed: Vec<(&str, &str)> = refs
        .iter()
        .map(|(n, s)| (n.as_str(), s.as_str()))
        .collect();
    let db = build_db(dir.path(), "db", &refs_borrowed, 1 << 30);
    let reads_path = dir.path().join("reads.fasta");
    let reads_borrowed: Vec<(&str, &str)> = reads
        .iter()
        .map(|(n, s)| (n.as_str(), s.as_str()))
        .collect();
    write_fasta(&reads_path, &reads_borrowed);

    let opts = base_opts(dir.path(), vec![db], &reads_path);
    run_filter(&opts).unwrap();

    let bound = 17 * 2 + (-3i32).min(-5 - 2);
    for i in 0..reads.len() as u64 {
        let state = read_state(&opts.workdir, i);
        assert!(state.hit, "read {i} did not hit");
        assert!(!state.alignments.is_empty());
        assert!(
            state.max_sw_score >= bound,
            "read {i} scored {} < {bound}",
            state.max_sw_score
        );
    }
}

#[test]
fn two_databases_are_searched_in_order() {
    let dir = TempDir::new().unwrap();
    let db_a = build_db(dir.path(), "dbA", &[("refA", "TGCATGCATGCATGCATGCA")], 1 << 30);
    let db_b = build_db(dir.path(), "dbB", &[("refB", REF18)], 1 << 30);
    let reads = dir.path().join("reads.fasta");
    write_fasta(&reads, &[("q1", REF18)]);

    let opts = base_opts(dir.path(), vec![db_a, db_b], &reads);
    run_filter(&opts).unwrap();

    let state = read_state(&opts.workdir, 0);
    assert!(state.hit);
    assert_eq!(state.last_index, 1);
    assert_eq!(state.alignments[0].index_num, 1);

    let lines = blast_lines(dir.path());
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("refB"));
}

// The filtering pipeline: for every (index, part) pair, a pool of reader,
// processor and writer threads connected by bounded channels streams every
// read through the seed-and-extend driver and checkpoints its state in the
// key-value store. After the last part, a final pass re-streams the input
// in order, joins it with the store, and writes the reports.
//
// Producer finalization is sender-drop: when the last reader (or processor)
// exits, its channel disconnects, consumers drain what remains and see
// end-of-stream. A worker that hits an I/O error records it and exits; the
// disconnect unwinds the rest of the pool and the error is surfaced after
// join.

use std::sync::Mutex;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::driver::process_read;
use crate::error::{EngineError, EngineResult};
use crate::fastx_reader::FastxReader;
use crate::index::{self, IndexMeta, IndexPart};
use crate::kvstore::KeyValueStore;
use crate::opts::FilterOpt;
use crate::output::{RefCatalog, ReportWriter};
use crate::read::Read;
use crate::readstats::ReadStats;
use crate::references::References;

/// Capacity of the read and write queues.
pub const QUEUE_SIZE_MAX: usize = 100;

/// Run the whole filtering pipeline. Returns once every index part has
/// been processed and all reports are written.
pub fn run_filter(opts: &FilterOpt) -> EngineResult<()> {
    if opts.indexes.is_empty() {
        return Err(EngineError::InvalidInput(
            "no reference indexes given".to_string(),
        ));
    }

    let num_cores = num_cpus::get();
    let num_read = opts.num_read_threads.max(1);
    let num_proc = opts.num_proc_threads.max(1);
    let num_threads = 2 * num_read + num_proc;
    log::info!("CPU cores on this machine: {num_cores}");
    if num_threads > num_cores {
        log::warn!("number of cores {num_cores} is less than the {num_threads} allocated threads");
    }

    let metas = opts
        .indexes
        .iter()
        .map(|prefix| IndexMeta::load(prefix))
        .collect::<EngineResult<Vec<IndexMeta>>>()?;

    let kvdb = KeyValueStore::create(&opts.workdir)?;
    let stats = ReadStats::new(opts.indexes.len());

    let mut loop_count = 0u32;
    for (index_num, prefix) in opts.indexes.iter().enumerate() {
        let meta = &metas[index_num];
        for part_num in 0..meta.num_parts() {
            log::info!(
                "loading index part {}/{} of {} ...",
                part_num + 1,
                meta.num_parts(),
                prefix.display()
            );
            let started = Instant::now();
            let part = IndexPart::load(prefix, part_num, meta)?;
            let refs = References::load(&index::part_refs_path(prefix, part_num))?;
            log::info!("done [{:.2} sec]", started.elapsed().as_secs_f64());

            run_part(
                opts,
                &kvdb,
                &stats,
                &part,
                &refs,
                index_num as u16,
                part_num as u16,
                meta.total_ref_bases,
                loop_count == 0,
            )?;
            loop_count += 1;
        }
    }
    kvdb.flush()?;

    final_report(opts, &metas, &kvdb, &stats)
}

/// One (index, part) iteration: spawn the worker pool, wait for it to
/// drain, surface the first recorded error.
#[allow(clippy::too_many_arguments)]
fn run_part(
    opts: &FilterOpt,
    kvdb: &KeyValueStore,
    stats: &ReadStats,
    part: &IndexPart,
    refs: &References,
    index_num: u16,
    part_num: u16,
    db_bases: u64,
    first_iteration: bool,
) -> EngineResult<()> {
    let num_read = opts.num_read_threads.max(1);
    let num_proc = opts.num_proc_threads.max(1);

    let source = Mutex::new((FastxReader::open(&opts.reads)?, 0u64));
    let errors: Mutex<Vec<EngineError>> = Mutex::new(Vec::new());

    let (read_tx, read_rx) = bounded::<Read>(QUEUE_SIZE_MAX);
    let (write_tx, write_rx) = bounded::<Read>(QUEUE_SIZE_MAX);

    thread::scope(|s| {
        for _ in 0..num_read {
            let tx = read_tx.clone();
            let source = &source;
            let errors = &errors;
            s.spawn(move || {
                reader_worker(source, tx, kvdb, stats, opts, first_iteration, errors)
            });
        }
        drop(read_tx);

        for _ in 0..num_proc {
            let rx = read_rx.clone();
            let tx = write_tx.clone();
            s.spawn(move || {
                processor_worker(rx, tx, part, refs, index_num, part_num, db_bases, opts, stats)
            });
        }
        drop(read_rx);
        drop(write_tx);

        for _ in 0..num_read {
            let rx = write_rx.clone();
            let errors = &errors;
            s.spawn(move || writer_worker(rx, kvdb, errors));
        }
        drop(write_rx);
    });

    let mut errs = errors.into_inner().expect("error list poisoned");
    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs.remove(0))
    }
}

/// Reader: pop records from the shared source, assign ordinals, re-hydrate
/// persisted state on iterations after the first, push to the read queue.
fn reader_worker(
    source: &Mutex<(FastxReader, u64)>,
    tx: Sender<Read>,
    kvdb: &KeyValueStore,
    stats: &ReadStats,
    opts: &FilterOpt,
    first_iteration: bool,
    errors: &Mutex<Vec<EngineError>>,
) {
    let record_err = |e: EngineError| {
        log::error!("reader: {e}");
        errors.lock().expect("error list poisoned").push(e);
    };
    loop {
        let (record, ordinal) = {
            let mut guard = source.lock().expect("input source poisoned");
            match guard.0.next_record() {
                None => return, // EOF finalizes this producer
                Some(Err(e)) => {
                    record_err(e.into());
                    return;
                }
                Some(Ok(record)) => {
                    let ordinal = guard.1;
                    guard.1 += 1;
                    (record, ordinal)
                }
            }
        };

        let mut read = Read::new(
            ordinal,
            record.header,
            record.seq,
            record.qual,
            opts.num_alignments,
        );
        if first_iteration {
            stats.observe_input_read(read.seq.len());
        } else {
            match kvdb.get(ordinal) {
                Ok(Some(bytes)) => {
                    if let Err(e) = read.restore_state(&bytes) {
                        record_err(e.into());
                        return;
                    }
                    // Reads terminated by an earlier part are not re-fed.
                    if read.done {
                        continue;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    record_err(e.into());
                    return;
                }
            }
        }
        if tx.send(read).is_err() {
            return; // all consumers gone
        }
    }
}

/// Processor: exclusive owner of each popped read until it is pushed on.
#[allow(clippy::too_many_arguments)]
fn processor_worker(
    rx: Receiver<Read>,
    tx: Sender<Read>,
    part: &IndexPart,
    refs: &References,
    index_num: u16,
    part_num: u16,
    db_bases: u64,
    opts: &FilterOpt,
    stats: &ReadStats,
) {
    for mut read in rx {
        process_read(
            &mut read, part, refs, index_num, part_num, db_bases, opts, stats,
        );
        if tx.send(read).is_err() {
            return;
        }
    }
}

/// Writer: checkpoint every popped read, including invalidated ones, so
/// the decision survives to the next iteration.
fn writer_worker(rx: Receiver<Read>, kvdb: &KeyValueStore, errors: &Mutex<Vec<EngineError>>) {
    for read in rx {
        if let Err(e) = kvdb.put(read.id, &read.serialize_state()) {
            log::error!("writer: {e}");
            errors.lock().expect("error list poisoned").push(e.into());
            return;
        }
    }
}

/// Final pass: re-stream the input in order, join with the store, emit
/// the configured reports and the log summary.
fn final_report(
    opts: &FilterOpt,
    metas: &[IndexMeta],
    kvdb: &KeyValueStore,
    stats: &ReadStats,
) -> EngineResult<()> {
    let catalog = RefCatalog::load(&opts.indexes, metas)?;
    let mut reader = FastxReader::open(&opts.reads)?;
    let mut writer = ReportWriter::create(opts, &catalog, reader.format())?;

    let mut ordinal = 0u64;
    while let Some(record) = reader.next_record() {
        let record = record?;
        let mut read = Read::new(
            ordinal,
            record.header,
            record.seq,
            record.qual,
            opts.num_alignments,
        );
        if let Some(bytes) = kvdb.get(ordinal)? {
            read.restore_state(&bytes)?;
        }
        writer.emit_read(&read, &catalog, opts, stats)?;
        ordinal += 1;
    }
    let num_otus = writer.finalize(opts, stats)?;
    if opts.otu_map {
        log::info!("reports written for {ordinal} reads, {num_otus} OTUs");
    } else {
        log::info!("reports written for {ordinal} reads");
    }
    Ok(())
}

// Per-read driver: runs the windowed seed search for one read against one
// loaded index part, forward strand first, then the reverse complement
// unless forward-only search is configured or the read terminated early.
//
// Each strand walks the read in up to three passes of decreasing window
// stride. After the final window of a pass the chainer/extender is invoked;
// if it neither finished the read nor exhausted the pass schedule, the next
// (finer) stride is tried, skipping windows probed in earlier passes.

use rustc_hash::FxHashSet;

use crate::alignment::compute_lis_alignment;
use crate::encoding;
use crate::index::IndexPart;
use crate::opts::FilterOpt;
use crate::read::Read;
use crate::readstats::ReadStats;
use crate::references::References;
use crate::seed_search::probe_window;

#[allow(clippy::too_many_arguments)]
pub fn process_read(
    read: &mut Read,
    part: &IndexPart,
    refs: &References,
    index_num: u16,
    part_num: u16,
    db_bases: u64,
    opts: &FilterOpt,
    stats: &ReadStats,
) {
    read.last_index = index_num;
    read.last_part = part_num;

    if read.done || !read.is_valid {
        return;
    }

    stats.observe_read_len(read.seq.len());

    let lnwin = part.params.lnwin;
    if read.encoded.len() < lnwin {
        log::warn!(
            "read {} ({}) is shorter than the window length {lnwin}; it will not be searched",
            read.id,
            read.name()
        );
        read.is_valid = false;
        return;
    }

    let encoded = read.encoded.clone();
    search_strand(
        read, &encoded, false, part, refs, index_num, part_num, db_bases, opts,
    );

    if !opts.forward_only && !read.done {
        // Early termination before the reverse-strand pass.
        let skip = (opts.num_alignments_mode() && read.num_alignments <= 0)
            || (opts.best_hit_mode() && read.best_count >= opts.num_best_hits);
        if !skip {
            let rc = encoding::reverse_complement(&read.encoded);
            search_strand(
                read, &rc, true, part, refs, index_num, part_num, db_bases, opts,
            );
        }
    }

    // A read that never matched is no de novo candidate.
    if !read.hit && !opts.forward_only && read.hit_denovo {
        read.hit_denovo = false;
    }
}

#[allow(clippy::too_many_arguments)]
fn search_strand(
    read: &mut Read,
    encoded: &[u8],
    reverse: bool,
    part: &IndexPart,
    refs: &References,
    index_num: u16,
    part_num: u16,
    db_bases: u64,
    opts: &FilterOpt,
) {
    let params = &part.params;
    let skiplengths = opts.passes.unwrap_or(params.skiplengths);
    let mut windowshift = skiplengths[0].max(1);

    read.seed_hits.clear();
    let mut aligned_refs: FxHashSet<u32> = FxHashSet::default();
    // Windows probed in an earlier pass are not probed again.
    let mut probed = vec![false; encoded.len()];
    let mut pass_n = 0usize;

    let mut search = true;
    while search {
        let numwin = (encoded.len() - params.lnwin + windowshift) / windowshift;
        let mut win_index = 0usize;
        for win_num in 0..numwin {
            if !probed[win_index] {
                probed[win_index] = true;
                probe_window(
                    part,
                    encoded,
                    win_index,
                    opts.min_seed_occur,
                    &mut read.seed_hits,
                );
            }
            if win_num == numwin - 1 {
                let (_accepted, done) = compute_lis_alignment(
                    read, encoded, reverse, part, refs, index_num, part_num, db_bases,
                    &mut aligned_refs, opts,
                );
                if done {
                    search = false;
                } else if pass_n == 2 {
                    search = false;
                } else {
                    // Collapse duplicate strides before escalating.
                    while pass_n < 2 && skiplengths[pass_n] == skiplengths[pass_n + 1] {
                        pass_n += 1;
                    }
                    pass_n += 1;
                    if pass_n > 2 {
                        search = false;
                    } else {
                        windowshift = skiplengths[pass_n].max(1);
                    }
                }
                // The final window of a pass is never offset further.
                break;
            }
            win_index += windowshift;
        }
    }
}

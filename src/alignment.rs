// Candidate selection and gapped extension: runs after each window pass,
// promoting accumulated seed hits to alignments.
//
// Per reference with enough hits, the LIS chain defines a candidate region
// (chain span plus the read overhangs, padded by `edges` and clamped to the
// reference). The region is extended with banded Smith-Waterman, scored
// against the E-value-derived minimum, and booked against the configured
// early-termination rules.

use rustc_hash::FxHashSet;

use crate::banded_swa::{banded_sw, count_matches, SwScoring};
use crate::chaining::{group_by_reference, longest_increasing_chain};
use crate::evalue;
use crate::index::IndexPart;
use crate::opts::FilterOpt;
use crate::read::{Alignment, Read};
use crate::references::References;

/// Returns `(accepted, done)`: whether any new alignment was accepted in
/// this invocation, and whether the read's search is finished.
#[allow(clippy::too_many_arguments)]
pub fn compute_lis_alignment(
    read: &mut Read,
    encoded: &[u8],
    reverse: bool,
    part: &IndexPart,
    refs: &References,
    index_num: u16,
    part_num: u16,
    db_bases: u64,
    aligned_refs: &mut FxHashSet<u32>,
    opts: &FilterOpt,
) -> (bool, bool) {
    let params = &part.params;
    let karlin = opts.karlin();
    let min_score = evalue::min_score_for_evalue(opts.evalue, encoded.len(), db_bases, &karlin);
    let scoring = SwScoring {
        match_score: opts.match_score,
        mismatch: opts.mismatch,
        gap_open: opts.gap_open,
        gap_ext: opts.gap_ext,
    };

    let mut accepted_any = false;
    for (ref_id, pairs) in group_by_reference(&read.seed_hits) {
        if read.done {
            break;
        }
        if pairs.len() < opts.seed_hits || aligned_refs.contains(&ref_id) {
            continue;
        }
        let chain = longest_increasing_chain(&pairs);
        if chain.is_empty() {
            continue;
        }
        read.lis_chains += 1;

        let ref_seq = &refs.seqs[ref_id as usize];
        let (first_ref, first_read) = chain[0];
        let (last_ref, last_read) = chain[chain.len() - 1];
        // Chain span plus read overhangs, padded by the configured edges.
        let lo = (first_ref as usize)
            .saturating_sub(first_read as usize + opts.edges as usize);
        let tail = encoded
            .len()
            .saturating_sub(last_read as usize + params.lnwin);
        let hi = (last_ref as usize + params.lnwin + tail + opts.edges as usize)
            .min(ref_seq.len());
        if lo >= hi {
            continue;
        }
        let region = &ref_seq[lo..hi];
        let band = (region.len() as i32 - encoded.len() as i32).abs()
            + 2 * opts.edges as i32
            + 8;
        let sw = match banded_sw(encoded, region, band, &scoring) {
            Some(sw) => sw,
            None => continue,
        };
        if sw.score < min_score {
            log::debug!(
                "read {}: ref {ref_id} extension score {} below threshold {min_score}",
                read.id,
                sw.score
            );
            continue;
        }

        let matches = count_matches(&sw, encoded, region);
        let columns: u32 = sw.cigar.iter().map(|&(_, len)| len).sum();
        let identity = f64::from(matches) / f64::from(columns.max(1));
        let coverage = (sw.query_end - sw.query_start) as f64 / encoded.len() as f64;
        let alignment = Alignment {
            index_num,
            part: part_num,
            ref_id,
            ref_start: (lo + sw.target_start) as u32,
            ref_end: (lo + sw.target_end) as u32,
            read_start: sw.query_start as u32,
            read_end: sw.query_end as u32,
            reverse,
            score: sw.score,
            cigar: sw.cigar,
            evalue: evalue::evalue(sw.score, encoded.len(), db_bases, &karlin),
            bit_score: evalue::bit_score(sw.score, &karlin),
            identity,
            coverage,
        };

        accepted_any = true;
        aligned_refs.insert(ref_id);
        read.hit = true;
        if identity >= opts.min_id && coverage >= opts.min_cov {
            read.hit_denovo = false;
        }
        if alignment.score > read.max_sw_score {
            read.max_sw_score = alignment.score;
        }

        if opts.num_alignments_mode() {
            read.alignments.push(alignment);
            read.num_alignments -= 1;
            if read.num_alignments == 0 {
                read.done = true;
            }
        } else if opts.best_hit_mode() {
            read.alignments.push(alignment);
            if read.lis_chains >= opts.min_lis {
                let max = read.max_sw_score;
                read.alignments.retain(|a| a.score == max);
                read.best_count = read.alignments.len() as u32;
                if read.best_count >= opts.num_best_hits {
                    read.done = true;
                }
            }
        } else {
            read.alignments.push(alignment);
        }
    }

    (accepted_any, read.done)
}

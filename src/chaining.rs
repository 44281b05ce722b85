// Seed-hit chaining: group hits per reference and pick the largest colinear
// set by longest increasing subsequence over read positions.

use rustc_hash::FxHashMap;

use crate::read::SeedHit;

/// (ref_pos, read_pos) of one seed hit.
pub type HitPair = (u32, u32);

/// Partition accumulated seed hits by reference id, in ascending reference
/// order so downstream processing is deterministic.
pub fn group_by_reference(hits: &[SeedHit]) -> Vec<(u32, Vec<HitPair>)> {
    let mut groups: FxHashMap<u32, Vec<HitPair>> = FxHashMap::default();
    for h in hits {
        groups
            .entry(h.ref_id)
            .or_default()
            .push((h.ref_pos, h.read_pos));
    }
    let mut out: Vec<(u32, Vec<HitPair>)> = groups.into_iter().collect();
    out.sort_unstable_by_key(|(ref_id, _)| *ref_id);
    out
}

/// Longest strictly increasing subsequence on read position, over pairs
/// sorted by reference position. Ties between equally long chains are
/// broken toward the chain starting at the lower read position, so the
/// selected candidate region does not depend on grouping order.
pub fn longest_increasing_chain(pairs: &[HitPair]) -> Vec<HitPair> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<HitPair> = pairs.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let n = sorted.len();
    let mut len = vec![1u32; n];
    let mut start = vec![0u32; n]; // read_pos at the head of the best chain ending here
    let mut prev = vec![usize::MAX; n];
    for i in 0..n {
        start[i] = sorted[i].1;
        for j in 0..i {
            if sorted[j].1 < sorted[i].1 {
                let cand_len = len[j] + 1;
                let better = cand_len > len[i] || (cand_len == len[i] && start[j] < start[i]);
                if better {
                    len[i] = cand_len;
                    start[i] = start[j];
                    prev[i] = j;
                }
            }
        }
    }

    let mut best = 0;
    for i in 1..n {
        if len[i] > len[best] || (len[i] == len[best] && start[i] < start[best]) {
            best = i;
        }
    }

    let mut chain = Vec::with_capacity(len[best] as usize);
    let mut at = best;
    loop {
        chain.push(sorted[at]);
        if prev[at] == usize::MAX {
            break;
        }
        at = prev[at];
    }
    chain.reverse();
    chain
}

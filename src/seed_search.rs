// Approximate half-window probes into the burst tries.
//
// Every window of `lnwin` bases on the read is split into two halves. The
// forward probe requires the left half to match a lookup key exactly and
// walks the key's forward trie over the right half allowing at most one
// edit; the reverse probe mirrors this (exact right half, one edit in the
// left half, scanned right-to-left) and only runs when the forward probe
// found no exact extension.
//
// The one-edit matcher is a typed match-state automaton advanced one trie
// edge at a time. Each state word tracks which of four alignments of the
// trie path against the read is still feasible: exact so far, one
// substitution, one deletion (path one base ahead of the read), or one
// insertion (read one base ahead of the path). A state dies when its next
// comparison fails; traversal prunes a subtree as soon as no state
// survives.

use crate::bursttrie::TrieNode;
use crate::encoding;
use crate::index::IndexPart;
use crate::read::SeedHit;

const EXACT: u8 = 1 << 0;
const SUB: u8 = 1 << 1;
const DEL: u8 = 1 << 2;
const INS: u8 = 1 << 3;

/// Feasible alignment states of a trie path against a read half-window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchState {
    bits: u8,
}

impl MatchState {
    pub fn start() -> Self {
        MatchState { bits: EXACT }
    }

    pub fn alive(self) -> bool {
        self.bits != 0
    }

    /// An exact (zero-edit) alignment is still feasible.
    pub fn exact(self) -> bool {
        self.bits & EXACT != 0
    }

    /// Advance all live states over path base `c` at path depth `k`.
    /// `w` holds the read bases the pattern is matched against, in pattern
    /// order; index k+1 is read one base ahead (insertion), k-1 one base
    /// behind (deletion).
    pub fn step(self, k: usize, c: u8, w: &[u8]) -> MatchState {
        let mut bits = 0;
        let at = |i: usize| w.get(i).copied();
        if self.bits & EXACT != 0 {
            match at(k) {
                Some(b) if b == c => bits |= EXACT,
                Some(_) => bits |= SUB,
                None => {}
            }
            // deletion: path consumes a base the read lacks
            bits |= DEL;
            // insertion: skip one read base, match the next
            if at(k + 1) == Some(c) {
                bits |= INS;
            }
        }
        if self.bits & SUB != 0 && at(k) == Some(c) {
            bits |= SUB;
        }
        if self.bits & DEL != 0 && k >= 1 && at(k - 1) == Some(c) {
            bits |= DEL;
        }
        if self.bits & INS != 0 && at(k + 1) == Some(c) {
            bits |= INS;
        }
        MatchState { bits }
    }
}

fn traverse(
    node: &TrieNode,
    k: usize,
    state: MatchState,
    w: &[u8],
    depth: usize,
    win_index: u32,
    hits: &mut Vec<SeedHit>,
    accept_zero_kmer: &mut bool,
) {
    match node {
        TrieNode::Interior { .. } => {
            for c in 0..4u8 {
                if let Some(child) = node.child(c) {
                    let next = state.step(k, c, w);
                    if next.alive() {
                        traverse(child, k + 1, next, w, depth, win_index, hits, accept_zero_kmer);
                    }
                }
            }
        }
        TrieNode::Bucket { entries } => {
            'entry: for entry in entries {
                let mut s = state;
                let mut kk = k;
                for i in 0..entry.suffix.len() {
                    s = s.step(kk, entry.suffix.get(i), w);
                    kk += 1;
                    if !s.alive() {
                        continue 'entry;
                    }
                }
                if kk == depth {
                    for occ in &entry.occurrences {
                        hits.push(SeedHit {
                            ref_id: occ.ref_id,
                            ref_pos: occ.pos,
                            read_pos: win_index,
                        });
                    }
                    if s.exact() {
                        *accept_zero_kmer = true;
                    }
                }
            }
        }
    }
}

/// Probe one window of the read against the part's lookup table, appending
/// any seed hits found.
pub fn probe_window(
    part: &IndexPart,
    encoded: &[u8],
    win_index: usize,
    min_seed_occur: u32,
    out: &mut Vec<SeedHit>,
) {
    let pw = part.params.partialwin;
    let mut accept_zero_kmer = false;
    let mut id_hits: Vec<SeedHit> = Vec::with_capacity(part.params.numbvs);

    // (1a) exact left half, <=1 edit in the right half.
    if let Some(key_f) = encoding::pack_window(encoded, win_index, pw) {
        let entry = &part.lookup[key_f as usize];
        if entry.count > min_seed_occur {
            if let Some(trie) = &entry.trie_f {
                let end = (win_index + 2 * pw + 1).min(encoded.len());
                let w = &encoded[win_index + pw..end];
                traverse(
                    trie.root(),
                    0,
                    MatchState::start(),
                    w,
                    pw,
                    win_index as u32,
                    &mut id_hits,
                    &mut accept_zero_kmer,
                );
            }
        }
    }

    // (1b) exact right half, <=1 edit in the left half, scanned
    // right-to-left. Skipped when (1a) already found an exact extension.
    if !accept_zero_kmer {
        if let Some(key_r) = encoding::pack_window(encoded, win_index + pw, pw) {
            let entry = &part.lookup[key_r as usize];
            if entry.count > min_seed_occur {
                if let Some(trie) = &entry.trie_r {
                    // Pattern order is right-to-left from the end of the
                    // left half; one extra base below the window start
                    // accommodates the insertion state.
                    let lo = win_index.saturating_sub(1);
                    let mut w: Vec<u8> = encoded[lo..win_index + pw].to_vec();
                    w.reverse();
                    traverse(
                        trie.root(),
                        0,
                        MatchState::start(),
                        &w,
                        pw,
                        win_index as u32,
                        &mut id_hits,
                        &mut accept_zero_kmer,
                    );
                }
            }
        }
    }

    out.extend_from_slice(&id_hits);
}

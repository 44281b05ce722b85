// Scalar banded Smith-Waterman with affine gaps and full traceback.
//
// Local alignment between an encoded read (query) and a candidate reference
// region (target). The DP is restricted to a diagonal band; cells outside
// the band read as "fresh start" for H and as unreachable for the gap
// matrices, which can only under-score, never over-score. Tracebacks stop
// at the first zero cell, giving genuine local coordinates.

const NEG: i32 = i32::MIN / 2;

// Traceback sources for H.
const TB_STOP: u8 = 0;
const TB_DIAG: u8 = 1;
const TB_E: u8 = 2; // gap in target, consumes query ('I')
const TB_F: u8 = 3; // gap in query, consumes target ('D')

const E_EXT: u8 = 1 << 2;
const F_EXT: u8 = 1 << 3;

#[derive(Debug, Clone, Copy)]
pub struct SwScoring {
    pub match_score: i32,
    /// Negative.
    pub mismatch: i32,
    /// Positive.
    pub gap_open: i32,
    /// Positive.
    pub gap_ext: i32,
}

impl SwScoring {
    #[inline]
    fn score(&self, a: u8, b: u8) -> i32 {
        if a < 4 && a == b {
            self.match_score
        } else {
            self.mismatch
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwAlignment {
    pub score: i32,
    pub query_start: usize,
    /// Exclusive.
    pub query_end: usize,
    pub target_start: usize,
    /// Exclusive.
    pub target_end: usize,
    /// M/I/D run-length operations, query-to-target.
    pub cigar: Vec<(u8, u32)>,
}

/// Best local alignment of `query` against `target` within a diagonal band
/// of half-width `band`. Returns `None` when nothing scores above zero.
pub fn banded_sw(
    query: &[u8],
    target: &[u8],
    band: i32,
    scoring: &SwScoring,
) -> Option<SwAlignment> {
    let qlen = query.len();
    let tlen = target.len();
    if qlen == 0 || tlen == 0 {
        return None;
    }
    let band = band.max(1);
    let w = qlen + 1;
    let goe = scoring.gap_open + scoring.gap_ext;

    let mut h = vec![0i32; w * (tlen + 1)];
    let mut f = vec![NEG; w * (tlen + 1)];
    let mut tb = vec![TB_STOP; w * (tlen + 1)];

    let mut best = 0i32;
    let mut best_i = 0usize;
    let mut best_j = 0usize;

    for i in 1..=tlen {
        let jlo = if (i as i32) - band > 1 { (i as i32 - band) as usize } else { 1 };
        let jhi = ((i as i32 + band) as usize).min(qlen);
        if jlo > jhi {
            continue;
        }
        let mut e = NEG;
        for j in jlo..=jhi {
            let idx = i * w + j;

            // E: gap in target (consumes query), same-row recurrence.
            let e_open = h[idx - 1] - goe;
            let e_ext = e - scoring.gap_ext;
            let e_from_ext = e_ext >= e_open;
            e = e_ext.max(e_open);

            // F: gap in query (consumes target), previous-row recurrence.
            let f_open = h[idx - w] - goe;
            let f_ext = f[idx - w] - scoring.gap_ext;
            let f_from_ext = f_ext >= f_open;
            let f_cur = f_ext.max(f_open);
            f[idx] = f_cur;

            let diag = h[idx - w - 1] + scoring.score(query[j - 1], target[i - 1]);

            let mut cell = 0;
            let mut from = TB_STOP;
            if diag > cell {
                cell = diag;
                from = TB_DIAG;
            }
            if e > cell {
                cell = e;
                from = TB_E;
            }
            if f_cur > cell {
                cell = f_cur;
                from = TB_F;
            }
            h[idx] = cell;
            let mut code = from;
            if e_from_ext {
                code |= E_EXT;
            }
            if f_from_ext {
                code |= F_EXT;
            }
            tb[idx] = code;

            if cell > best {
                best = cell;
                best_i = i;
                best_j = j;
            }
        }
    }

    if best <= 0 {
        return None;
    }

    // Traceback from the maximum to the first zero cell.
    enum State {
        H,
        E,
        F,
    }
    let mut ops: Vec<(u8, u32)> = Vec::new();
    let push = |ops: &mut Vec<(u8, u32)>, op: u8| {
        if let Some(last) = ops.last_mut() {
            if last.0 == op {
                last.1 += 1;
                return;
            }
        }
        ops.push((op, 1));
    };

    let (mut i, mut j) = (best_i, best_j);
    let mut state = State::H;
    loop {
        let code = tb[i * w + j];
        match state {
            State::H => match code & 3 {
                TB_DIAG => {
                    push(&mut ops, b'M');
                    i -= 1;
                    j -= 1;
                }
                TB_E => state = State::E,
                TB_F => state = State::F,
                _ => break,
            },
            State::E => {
                push(&mut ops, b'I');
                if code & E_EXT == 0 {
                    state = State::H;
                }
                j -= 1;
            }
            State::F => {
                push(&mut ops, b'D');
                if code & F_EXT == 0 {
                    state = State::H;
                }
                i -= 1;
            }
        }
        if i == 0 || j == 0 {
            break;
        }
    }
    ops.reverse();

    Some(SwAlignment {
        score: best,
        query_start: j,
        query_end: best_j,
        target_start: i,
        target_end: best_i,
        cigar: ops,
    })
}

/// Count identical columns by replaying the CIGAR over both sequences.
pub fn count_matches(aln: &SwAlignment, query: &[u8], target: &[u8]) -> u32 {
    let mut matches = 0;
    let mut qi = aln.query_start;
    let mut ti = aln.target_start;
    for &(op, len) in &aln.cigar {
        match op {
            b'M' => {
                for _ in 0..len {
                    if query[qi] < 4 && query[qi] == target[ti] {
                        matches += 1;
                    }
                    qi += 1;
                    ti += 1;
                }
            }
            b'I' => qi += len as usize,
            b'D' => ti += len as usize,
            _ => {}
        }
    }
    matches
}

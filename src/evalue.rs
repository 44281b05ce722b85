// Karlin-Altschul statistics for alignment significance.
//
// E = K * m * n * exp(-lambda * S) over the read x database search space.
// Parameters are tabulated for the nucleotide scoring schemes the tool
// ships with and fall back to the ungapped +2/-3 values otherwise.

/// Karlin-Altschul statistical parameters.
#[derive(Debug, Clone, Copy)]
pub struct KarlinParams {
    pub lambda: f64,
    pub k: f64,
    /// Relative entropy of the scoring system.
    pub h: f64,
}

/// (match, -mismatch, gap_open, gap_ext, lambda, K, H)
const NUCL_TABLE: [(i32, i32, i32, i32, f64, f64, f64); 4] = [
    (2, 3, 5, 2, 0.625, 0.410, 0.780),
    (2, 3, 0, 0, 0.625, 0.410, 0.780),
    (1, 2, 2, 1, 1.090, 0.300, 0.990),
    (1, 2, 0, 0, 1.280, 0.460, 0.850),
];

impl KarlinParams {
    /// Parameters for a nucleotide scoring scheme. `mismatch` is the
    /// (negative) penalty as configured.
    pub fn nucleotide(match_score: i32, mismatch: i32, gap_open: i32, gap_ext: i32) -> Self {
        let penalty = -mismatch;
        for &(m, p, go, ge, lambda, k, h) in &NUCL_TABLE {
            if m == match_score && p == penalty && go == gap_open && ge == gap_ext {
                return KarlinParams { lambda, k, h };
            }
        }
        log::warn!(
            "no Karlin-Altschul entry for match={match_score} mismatch={mismatch} \
             gap_open={gap_open} gap_ext={gap_ext}; using +2/-3 defaults"
        );
        KarlinParams {
            lambda: 0.625,
            k: 0.410,
            h: 0.780,
        }
    }
}

/// Bit score: S' = (lambda * S - ln K) / ln 2.
pub fn bit_score(raw_score: i32, params: &KarlinParams) -> f64 {
    (params.lambda * raw_score as f64 - params.k.ln()) / std::f64::consts::LN_2
}

/// E-value over a read x database search space.
pub fn evalue(raw_score: i32, read_len: usize, db_len: u64, params: &KarlinParams) -> f64 {
    let space = read_len as f64 * db_len as f64;
    space * params.k * (-params.lambda * raw_score as f64).exp()
}

/// Smallest raw score whose E-value is at or below the cutoff:
/// S = ceil((ln K + ln(m*n) - ln E) / lambda).
pub fn min_score_for_evalue(
    cutoff: f64,
    read_len: usize,
    db_len: u64,
    params: &KarlinParams,
) -> i32 {
    if cutoff <= 0.0 {
        return i32::MAX;
    }
    let space = (read_len as f64 * db_len as f64).max(1.0);
    let s = (params.k.ln() + space.ln() - cutoff.ln()) / params.lambda;
    s.ceil().max(1.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_matches_defaults() {
        let p = KarlinParams::nucleotide(2, -3, 5, 2);
        assert!((p.lambda - 0.625).abs() < 1e-9);
        assert!((p.k - 0.410).abs() < 1e-9);
    }

    #[test]
    fn evalue_decreases_with_score() {
        let p = KarlinParams::nucleotide(2, -3, 5, 2);
        let e1 = evalue(20, 100, 10_000, &p);
        let e2 = evalue(40, 100, 10_000, &p);
        assert!(e2 < e1);
        assert!(e2 > 0.0);
    }

    #[test]
    fn min_score_inverts_evalue() {
        let p = KarlinParams::nucleotide(2, -3, 5, 2);
        let cutoff = 1e-3;
        let s = min_score_for_evalue(cutoff, 150, 1_000_000, &p);
        assert!(evalue(s, 150, 1_000_000, &p) <= cutoff);
        assert!(evalue(s - 1, 150, 1_000_000, &p) > cutoff);
    }

    #[test]
    fn bit_score_is_monotonic() {
        let p = KarlinParams::nucleotide(2, -3, 5, 2);
        assert!(bit_score(30, &p) > bit_score(20, &p));
    }
}

//! NaN-aware linear interpolation helpers

/// Fill non-finite gaps by linear interpolation over sample positions.
///
/// Leading and trailing gaps take the nearest finite value. A slice with no
/// finite value is returned unchanged.
pub fn fill_gaps_linear(values: &[f64]) -> Vec<f64> {
    let valid: Vec<usize> = (0..values.len()).filter(|&i| values[i].is_finite()).collect();
    let (first, last) = match (valid.first(), valid.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return values.to_vec(),
    };

    let mut out = values.to_vec();
    for v in out.iter_mut().take(first) {
        *v = values[first];
    }
    for v in out.iter_mut().skip(last + 1) {
        *v = values[last];
    }
    for pair in valid.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi - lo < 2 {
            continue;
        }
        let span = (hi - lo) as f64;
        for i in lo + 1..hi {
            let w = (i - lo) as f64 / span;
            out[i] = values[lo] + w * (values[hi] - values[lo]);
        }
    }
    out
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be non-decreasing and non-empty. Points outside the range take
/// the end values; callers that need NaN outside coverage check the range.
pub fn interp_linear(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    let n = xp.len();
    if n == 0 || x.is_nan() {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    // First index with xp > x; xp[j-1] <= x < xp[j]
    let j = xp.partition_point(|&t| t <= x);
    let i = j - 1;
    let w = (x - xp[i]) / (xp[j] - xp[i]);
    fp[i] + w * (fp[j] - fp[i])
}

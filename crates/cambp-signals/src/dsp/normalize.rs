//! Amplitude normalization and robust outlier suppression for waveforms

use super::interpolate::fill_gaps_linear;

/// Consistency constant relating MAD to the standard deviation.
const MAD_CONSISTENCY: f64 = 0.6745;

/// Result of mapping a target waveform onto a reference amplitude range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeAlignment {
    pub values: Vec<f64>,
    pub scale: f64,
    pub offset: f64,
}

/// Tolerance-based float equality (`rtol = 1e-5`, `atol = 1e-8`).
pub(crate) fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

/// Median of the finite entries, `None` when there are none.
pub fn finite_median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    Some(if finite.len() % 2 == 0 {
        (finite[mid - 1] + finite[mid]) / 2.0
    } else {
        finite[mid]
    })
}

/// Replace samples whose modified z-score exceeds `threshold` and refill
/// every gap by linear interpolation.
///
/// The modified z-score is `0.6745 * (x - median) / MAD`. When the MAD is
/// zero, or nothing is finite, the input is returned as is.
pub fn remove_mad_outliers(values: &[f64], threshold: f64) -> Vec<f64> {
    let median = match finite_median(values) {
        Some(m) => m,
        None => return values.to_vec(),
    };
    let deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    let mad = match finite_median(&deviations) {
        Some(m) if m != 0.0 => m,
        _ => return values.to_vec(),
    };

    let masked: Vec<f64> = values
        .iter()
        .map(|&v| {
            if (MAD_CONSISTENCY * (v - median) / mad).abs() > threshold {
                f64::NAN
            } else {
                v
            }
        })
        .collect();
    fill_gaps_linear(&masked)
}

/// Linearly map finite samples onto `[lower, upper]`.
///
/// A constant signal maps to the midpoint; non-finite samples are untouched.
pub fn normalize_to_range(values: &[f64], lower: f64, upper: f64) -> Vec<f64> {
    let (min, max) = match finite_bounds(values) {
        Some(b) => b,
        None => return values.to_vec(),
    };

    if is_close(max, min) {
        let mid = lower + (upper - lower) / 2.0;
        return values
            .iter()
            .map(|&v| if v.is_finite() { mid } else { v })
            .collect();
    }

    let scale = (upper - lower) / (max - min);
    values
        .iter()
        .map(|&v| if v.is_finite() { (v - min) * scale + lower } else { v })
        .collect()
}

/// Map `target` so its finite min/max land on the finite min/max of
/// `reference`.
///
/// Falls back to matching means when either range is (close to) zero, and
/// to the identity when either side has fewer than two finite samples.
pub fn align_to_reference(reference: &[f64], target: &[f64]) -> RangeAlignment {
    let ref_valid: Vec<f64> = reference.iter().copied().filter(|v| v.is_finite()).collect();
    let target_valid: Vec<f64> = target.iter().copied().filter(|v| v.is_finite()).collect();

    if ref_valid.len() < 2 || target_valid.len() < 2 {
        return RangeAlignment {
            values: target.to_vec(),
            scale: 1.0,
            offset: 0.0,
        };
    }

    let (ref_min, ref_max) = finite_bounds(&ref_valid).unwrap_or((0.0, 0.0));
    let (target_min, target_max) = finite_bounds(&target_valid).unwrap_or((0.0, 0.0));
    let ref_range = ref_max - ref_min;
    let target_range = target_max - target_min;

    if is_close(ref_range, 0.0) || is_close(target_range, 0.0) {
        let offset = mean(&ref_valid) - mean(&target_valid);
        return RangeAlignment {
            values: target.iter().map(|v| v + offset).collect(),
            scale: 1.0,
            offset,
        };
    }

    let scale = ref_range / target_range;
    let offset = ref_min - scale * target_min;
    RangeAlignment {
        values: target.iter().map(|v| v * scale + offset).collect(),
        scale,
        offset,
    }
}

fn finite_bounds(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

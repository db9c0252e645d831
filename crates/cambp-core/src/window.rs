use std::collections::BTreeMap;

/// Averages paired true/predicted values inside fixed-width time windows.
pub struct WindowAggregator;

impl WindowAggregator {
    /// Bucket samples by `floor(t / window_s)` and average each bucket.
    ///
    /// Returns the inputs unchanged when `window_s <= 0`, when no times are
    /// given, or when no sample has a finite time and finite values. Output
    /// is ordered by window index.
    pub fn aggregate(
        y_true: &[f64],
        y_pred: &[f64],
        times: Option<&[f64]>,
        window_s: f64,
    ) -> (Vec<f64>, Vec<f64>) {
        let times = match times {
            Some(t) if window_s > 0.0 => t,
            _ => return (y_true.to_vec(), y_pred.to_vec()),
        };

        let mut samples: Vec<(f64, f64, f64)> = times
            .iter()
            .zip(y_true.iter().zip(y_pred.iter()))
            .filter(|(t, (y, p))| t.is_finite() && y.is_finite() && p.is_finite())
            .map(|(&t, (&y, &p))| (t, y, p))
            .collect();
        if samples.is_empty() {
            return (y_true.to_vec(), y_pred.to_vec());
        }
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));

        // window -> (sum_true, sum_pred, count)
        let mut buckets: BTreeMap<i64, (f64, f64, usize)> = BTreeMap::new();
        for (t, y, p) in samples {
            let entry = buckets
                .entry((t / window_s).floor() as i64)
                .or_insert((0.0, 0.0, 0));
            entry.0 += y;
            entry.1 += p;
            entry.2 += 1;
        }

        buckets
            .into_values()
            .map(|(sy, sp, n)| (sy / n as f64, sp / n as f64))
            .unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_window_unsorted_times() {
        let (t, p) = WindowAggregator::aggregate(
            &[30.0, 10.0, 20.0],
            &[31.0, 11.0, 21.0],
            Some(&[3.0, 1.0, 2.0][..]),
            10.0,
        );
        assert_eq!(t.len(), 1);
        assert_relative_eq!(t[0], 20.0);
        assert_relative_eq!(p[0], 21.0);
    }

    #[test]
    fn test_windows_in_chronological_order() {
        let (t, p) = WindowAggregator::aggregate(
            &[1.0, 2.0, 3.0, 4.0],
            &[1.5, 2.5, 3.5, 4.5],
            Some(&[25.0, 0.0, 11.0, 5.0][..]),
            10.0,
        );
        // windows 0: {2, 4}, 1: {3}, 2: {1}
        assert_eq!(t, vec![3.0, 3.0, 1.0]);
        assert_eq!(p, vec![3.5, 3.5, 1.5]);
    }

    #[test]
    fn test_noop_cases() {
        let y = [1.0, 2.0];
        let p = [1.1, 2.1];
        assert_eq!(WindowAggregator::aggregate(&y, &p, None, 10.0), (y.to_vec(), p.to_vec()));
        assert_eq!(
            WindowAggregator::aggregate(&y, &p, Some(&[0.0, 1.0][..]), 0.0),
            (y.to_vec(), p.to_vec())
        );
        assert_eq!(
            WindowAggregator::aggregate(&y, &p, Some(&[f64::NAN, f64::NAN][..]), 10.0),
            (y.to_vec(), p.to_vec())
        );
    }

    #[test]
    fn test_drops_non_finite_samples() {
        let (t, p) = WindowAggregator::aggregate(
            &[10.0, f64::NAN, 30.0],
            &[11.0, 21.0, 31.0],
            Some(&[0.0, 1.0, f64::NAN][..]),
            5.0,
        );
        assert_eq!(t, vec![10.0]);
        assert_eq!(p, vec![11.0]);
    }
}

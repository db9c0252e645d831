//! Cross-validation splitters
//!
//! - `k_fold` - contiguous folds, no shuffling (internal hyper-parameter search)
//! - `group_k_fold` - no group shared between train and test
//! - `time_series_split` - expanding window, train strictly precedes test

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    #[serde(alias = "groupkfold")]
    Group,
    #[serde(rename = "timeseries", alias = "time_series")]
    TimeSeries,
}

impl fmt::Display for SplitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitStrategy::Group => f.write_str("group"),
            SplitStrategy::TimeSeries => f.write_str("timeseries"),
        }
    }
}

impl FromStr for SplitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "group" | "groupkfold" => Ok(SplitStrategy::Group),
            "timeseries" | "time_series" => Ok(SplitStrategy::TimeSeries),
            other => Err(format!("unknown split strategy '{}'", other)),
        }
    }
}

/// Disjoint train/test index sets, both ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Fold {
    fn from_test_mask(test_mask: &[bool]) -> Self {
        let (test, train): (Vec<usize>, Vec<usize>) =
            (0..test_mask.len()).partition(|&i| test_mask[i]);
        Self { train, test }
    }
}

pub struct CrossValidator;

impl CrossValidator {
    /// Contiguous folds; the first `n % k` folds hold one extra sample.
    pub fn k_fold(n_samples: usize, n_splits: usize) -> Result<Vec<Fold>, PipelineError> {
        if n_splits < 2 {
            return Err(PipelineError::InvalidSplits(n_splits));
        }
        if n_splits > n_samples {
            return Err(PipelineError::TooFewSamples {
                n_samples,
                n_splits,
            });
        }

        let base = n_samples / n_splits;
        let extra = n_samples % n_splits;
        let mut folds = Vec::with_capacity(n_splits);
        let mut start = 0;
        for k in 0..n_splits {
            let size = base + usize::from(k < extra);
            let mut mask = vec![false; n_samples];
            mask[start..start + size].iter_mut().for_each(|m| *m = true);
            folds.push(Fold::from_test_mask(&mask));
            start += size;
        }
        Ok(folds)
    }

    /// Assign groups to folds, largest group first, each into the fold with
    /// the fewest samples so far. Ties between equal-size groups go in
    /// reverse lexical order.
    pub fn group_k_fold<S: AsRef<str>>(groups: &[S], n_splits: usize) -> Result<Vec<Fold>, PipelineError> {
        if n_splits < 2 {
            return Err(PipelineError::InvalidSplits(n_splits));
        }

        let mut sizes: BTreeMap<&str, usize> = BTreeMap::new();
        for g in groups {
            *sizes.entry(g.as_ref()).or_insert(0) += 1;
        }
        if sizes.len() < n_splits {
            return Err(PipelineError::InsufficientGroups {
                found: sizes.len(),
                required: n_splits,
            });
        }

        // Lexical order from the BTreeMap, stable ascending by size, reversed
        let mut ordered: Vec<(&str, usize)> = sizes.into_iter().collect();
        ordered.sort_by_key(|&(_, n)| n);
        ordered.reverse();

        let mut fold_load = vec![0usize; n_splits];
        let mut fold_of: BTreeMap<&str, usize> = BTreeMap::new();
        for (group, n) in ordered {
            let lightest = (0..n_splits)
                .min_by_key(|&k| fold_load[k])
                .unwrap_or(0);
            fold_load[lightest] += n;
            fold_of.insert(group, lightest);
        }

        Ok((0..n_splits)
            .map(|k| {
                let mask: Vec<bool> = groups
                    .iter()
                    .map(|g| fold_of.get(g.as_ref()) == Some(&k))
                    .collect();
                Fold::from_test_mask(&mask)
            })
            .collect())
    }

    /// Expanding-window splits over samples already in time order.
    ///
    /// `test_size = n / (n_splits + 1)`; test blocks are the last
    /// `n_splits * test_size` samples, train is everything before each block.
    pub fn time_series_split(n_samples: usize, n_splits: usize) -> Result<Vec<Fold>, PipelineError> {
        if n_splits < 2 {
            return Err(PipelineError::InvalidSplits(n_splits));
        }
        if n_splits + 1 > n_samples {
            return Err(PipelineError::TooFewSamples {
                n_samples,
                n_splits,
            });
        }

        let test_size = n_samples / (n_splits + 1);
        let first = n_samples - n_splits * test_size;
        Ok((0..n_splits)
            .map(|k| {
                let start = first + k * test_size;
                Fold {
                    train: (0..start).collect(),
                    test: (start..start + test_size).collect(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_k_fold_sizes() {
        let folds = CrossValidator::k_fold(10, 3).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(folds[1].test, vec![4, 5, 6]);
        assert_eq!(folds[1].train, vec![0, 1, 2, 3, 7, 8, 9]);
        assert!(CrossValidator::k_fold(2, 3).is_err());
        assert!(CrossValidator::k_fold(10, 1).is_err());
    }

    #[test]
    fn test_group_k_fold_three_groups() {
        let groups = ["a", "a", "b", "c", "c", "c", "b", "a", "c"];
        let folds = CrossValidator::group_k_fold(&groups, 3).unwrap();
        assert_eq!(folds.len(), 3);

        let mut seen = vec![0; groups.len()];
        for fold in &folds {
            let test_groups: HashSet<&str> = fold.test.iter().map(|&i| groups[i]).collect();
            let train_groups: HashSet<&str> = fold.train.iter().map(|&i| groups[i]).collect();
            assert!(test_groups.is_disjoint(&train_groups));
            for &i in &fold.test {
                seen[i] += 1;
            }
            assert_eq!(fold.test.len() + fold.train.len(), groups.len());
        }
        assert!(seen.iter().all(|&c| c == 1));
        // Largest group ("c", 4 rows) lands in the first fold
        assert!(folds[0].test.iter().all(|&i| groups[i] == "c"));
    }

    #[test]
    fn test_group_k_fold_balances_load() {
        let mut groups = Vec::new();
        for (g, n) in [("s1", 10), ("s2", 6), ("s3", 5), ("s4", 1)] {
            groups.extend(std::iter::repeat(g).take(n));
        }
        let folds = CrossValidator::group_k_fold(&groups, 2).unwrap();
        // s1 -> fold0 (10), s2 -> fold1 (6), s3 -> fold1 (11), s4 -> fold0 (11)
        assert_eq!(folds[0].test.len(), 11);
        assert_eq!(folds[1].test.len(), 11);
    }

    #[test]
    fn test_group_k_fold_needs_enough_groups() {
        let err = CrossValidator::group_k_fold(&["a", "a", "b"], 3).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientGroups { found: 2, required: 3 }));
    }

    #[test]
    fn test_time_series_split_layout() {
        let folds = CrossValidator::time_series_split(10, 3).unwrap();
        assert_eq!(folds[0].train, (0..4).collect::<Vec<_>>());
        assert_eq!(folds[0].test, vec![4, 5]);
        assert_eq!(folds[2].train, (0..8).collect::<Vec<_>>());
        assert_eq!(folds[2].test, vec![8, 9]);
        for f in &folds {
            assert!(f.train.iter().max() < f.test.iter().min());
        }
        assert!(CrossValidator::time_series_split(3, 3).is_err());
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("groupkfold".parse::<SplitStrategy>().unwrap(), SplitStrategy::Group);
        assert_eq!("timeseries".parse::<SplitStrategy>().unwrap(), SplitStrategy::TimeSeries);
        assert!("random".parse::<SplitStrategy>().is_err());
    }
}

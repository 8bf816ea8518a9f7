//! Built-in clustering scores.
//!
//! External scores compare the predicted labels with a dataset's target;
//! internal scores only look at the data. Every function returns `None`
//! where the score is undefined for its input.

use crate::algorithms::squared_euclidean;
use crate::model::{Label, Matrix, Score, ScoreFn};
use std::collections::BTreeMap;

pub fn builtin() -> Vec<Score> {
    vec![
        Score::new("Rand", ScoreFn::Target(rand_index)),
        Score::new("Adjusted rand", ScoreFn::Target(adjusted_rand_index)),
        Score::new("Fowlkes-Mallows", ScoreFn::Target(fowlkes_mallows)),
        Score::new("Completeness", ScoreFn::Target(completeness)),
        Score::new("Calinski-Harabasz", ScoreFn::Data(calinski_harabasz)),
        Score::new("Silhouette", ScoreFn::Data(silhouette)),
        Score::new("Minkowski", ScoreFn::Target(minkowski)),
        Score::new("Purity", ScoreFn::Target(purity)),
    ]
}

/// Rows are target classes, columns predicted clusters.
struct Contingency {
    table: Vec<Vec<f64>>,
    n: f64,
}

impl Contingency {
    fn new(target: &[Label], pred: &[Label]) -> Option<Self> {
        if target.len() != pred.len() || target.is_empty() {
            return None;
        }
        let classes = index_of(target);
        let clusters = index_of(pred);
        let mut table = vec![vec![0.0; clusters.len()]; classes.len()];
        for (t, p) in target.iter().zip(pred) {
            table[classes[t]][clusters[p]] += 1.0;
        }
        Some(Self {
            table,
            n: target.len() as f64,
        })
    }

    fn row_sums(&self) -> Vec<f64> {
        self.table.iter().map(|r| r.iter().sum()).collect()
    }

    fn col_sums(&self) -> Vec<f64> {
        let cols = self.table.first().map_or(0, Vec::len);
        (0..cols)
            .map(|j| self.table.iter().map(|r| r[j]).sum())
            .collect()
    }

    /// Pair counts: (same cluster in both, same class, same cluster).
    fn pair_sums(&self) -> (f64, f64, f64) {
        let sn = self.table.iter().flatten().map(|&v| comb2(v)).sum();
        let sa = self.row_sums().into_iter().map(comb2).sum();
        let sb = self.col_sums().into_iter().map(comb2).sum();
        (sn, sa, sb)
    }
}

fn index_of(labels: &[Label]) -> BTreeMap<Label, usize> {
    let mut idx = BTreeMap::new();
    for l in labels {
        let next = idx.len();
        idx.entry(*l).or_insert(next);
    }
    idx
}

fn comb2(x: f64) -> f64 {
    x * (x - 1.0) / 2.0
}

pub fn rand_index(target: &[Label], pred: &[Label]) -> Option<f64> {
    let c = Contingency::new(target, pred)?;
    let total = comb2(c.n);
    if total == 0.0 {
        return Some(1.0);
    }
    let (sn, sa, sb) = c.pair_sums();
    let disagreements = sa + sb - 2.0 * sn;
    Some((total - disagreements) / total)
}

pub fn adjusted_rand_index(target: &[Label], pred: &[Label]) -> Option<f64> {
    let c = Contingency::new(target, pred)?;
    let total = comb2(c.n);
    if total == 0.0 {
        return Some(1.0);
    }
    let (sn, sa, sb) = c.pair_sums();
    let expected = sa * sb / total;
    let max = (sa + sb) / 2.0;
    if max == expected {
        return Some(1.0);
    }
    Some((sn - expected) / (max - expected))
}

pub fn fowlkes_mallows(target: &[Label], pred: &[Label]) -> Option<f64> {
    let c = Contingency::new(target, pred)?;
    let (sn, sa, sb) = c.pair_sums();
    if sn == 0.0 {
        return Some(0.0);
    }
    Some(sn / (sa * sb).sqrt())
}

/// Do all members of a class end up in the same cluster?
pub fn completeness(target: &[Label], pred: &[Label]) -> Option<f64> {
    let c = Contingency::new(target, pred)?;
    let entropy_pred: f64 = c
        .col_sums()
        .into_iter()
        .filter(|&b| b > 0.0)
        .map(|b| -(b / c.n) * (b / c.n).ln())
        .sum();
    if entropy_pred == 0.0 {
        return Some(1.0);
    }
    let rows = c.row_sums();
    let mut conditional = 0.0;
    for (row, a) in c.table.iter().zip(&rows) {
        for &v in row.iter().filter(|&&v| v > 0.0) {
            conditional -= (v / c.n) * (v / a).ln();
        }
    }
    Some(1.0 - conditional / entropy_pred)
}

/// Distance between the two partitions' co-membership matrices, relative to
/// the predicted partition. Lower is better.
pub fn minkowski(target: &[Label], pred: &[Label]) -> Option<f64> {
    let c = Contingency::new(target, pred)?;
    let (sn, sa, sb) = c.pair_sums();
    if sb == 0.0 {
        return None;
    }
    Some(((sa + sb - 2.0 * sn).max(0.0)).sqrt() / sb.sqrt())
}

/// Share of samples that belong to the dominant class of their cluster.
pub fn purity(target: &[Label], pred: &[Label]) -> Option<f64> {
    let c = Contingency::new(target, pred)?;
    let cols = c.table.first().map_or(0, Vec::len);
    let dominant: f64 = (0..cols)
        .map(|j| c.table.iter().map(|r| r[j]).fold(0.0, f64::max))
        .sum();
    Some(dominant / c.n)
}

/// Defined for `2 <= clusters <= n - 1`.
fn cluster_members(n: usize, pred: &[Label]) -> Option<Vec<Vec<usize>>> {
    if pred.len() != n {
        return None;
    }
    let idx = index_of(pred);
    if idx.len() < 2 || idx.len() >= n {
        return None;
    }
    let mut members = vec![Vec::new(); idx.len()];
    for (i, l) in pred.iter().enumerate() {
        members[idx[l]].push(i);
    }
    Some(members)
}

pub fn silhouette(data: &Matrix, pred: &[Label]) -> Option<f64> {
    let n = data.n_samples();
    let members = cluster_members(n, pred)?;
    let idx = index_of(pred);
    let dist = |i: usize, j: usize| squared_euclidean(data.row(i), data.row(j)).sqrt();
    let mut total = 0.0;
    for i in 0..n {
        let own = idx[&pred[i]];
        if members[own].len() == 1 {
            // Singleton clusters contribute 0.
            continue;
        }
        let mean_to = |cluster: &[usize]| -> f64 {
            let sum: f64 = cluster.iter().filter(|&&j| j != i).map(|&j| dist(i, j)).sum();
            let count = cluster.iter().filter(|&&j| j != i).count();
            sum / count as f64
        };
        let a = mean_to(&members[own]);
        let b = members
            .iter()
            .enumerate()
            .filter(|(c, _)| *c != own)
            .map(|(_, m)| mean_to(m))
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    Some(total / n as f64)
}

pub fn calinski_harabasz(data: &Matrix, pred: &[Label]) -> Option<f64> {
    let n = data.n_samples();
    let members = cluster_members(n, pred)?;
    let k = members.len();
    let dims = data.n_features();
    let centroid = |rows: &[usize]| -> Vec<f64> {
        let mut c = vec![0.0; dims];
        for &i in rows {
            for (acc, v) in c.iter_mut().zip(data.row(i)) {
                *acc += v;
            }
        }
        c.iter().map(|v| v / rows.len() as f64).collect()
    };
    let all: Vec<usize> = (0..n).collect();
    let overall = centroid(&all);
    let mut between = 0.0;
    let mut within = 0.0;
    for cluster in &members {
        let c = centroid(cluster);
        between += cluster.len() as f64 * squared_euclidean(&c, &overall);
        within += cluster
            .iter()
            .map(|&i| squared_euclidean(data.row(i), &c))
            .sum::<f64>();
    }
    if within == 0.0 {
        return Some(1.0);
    }
    Some((between / (k - 1) as f64) / (within / (n - k) as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-6)
    }

    #[test]
    fn perfect_agreement_up_to_renaming() {
        let target = [0, 0, 1, 1, 2, 2];
        let pred = [5, 5, 3, 3, 9, 9];
        assert!(close(rand_index(&target, &pred), 1.0));
        assert!(close(adjusted_rand_index(&target, &pred), 1.0));
        assert!(close(fowlkes_mallows(&target, &pred), 1.0));
        assert!(close(completeness(&target, &pred), 1.0));
        assert!(close(purity(&target, &pred), 1.0));
        assert!(close(minkowski(&target, &pred), 0.0));
    }

    #[test]
    fn known_reference_values() {
        // Reference values from the usual textbook definitions.
        let target = [0, 0, 1, 1];
        let pred = [0, 0, 1, 2];
        assert!(close(rand_index(&target, &pred), 5.0 / 6.0));
        assert!(close(adjusted_rand_index(&target, &pred), 4.0 / 7.0));
        assert!(close(fowlkes_mallows(&target, &pred), 1.0 / 2f64.sqrt()));
        assert!(close(purity(&target, &pred), 1.0));
        // one class split over two clusters
        assert!(completeness(&target, &pred).is_some_and(|c| c < 1.0 && c > 0.0));
        assert!(close(minkowski(&target, &pred), 1.0));
    }

    #[test]
    fn single_cluster_makes_internal_scores_undefined() {
        let data = Matrix::from_rows(vec![vec![0.0], vec![1.0], vec![2.0]]).unwrap();
        assert_eq!(silhouette(&data, &[0, 0, 0]), None);
        assert_eq!(calinski_harabasz(&data, &[0, 0, 0]), None);
        assert_eq!(silhouette(&data, &[0, 1, 2]), None);
    }

    #[test]
    fn silhouette_of_separated_pairs() {
        let data = Matrix::from_rows(vec![
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![5.0, 5.0],
            vec![5.0, 6.0],
        ])
        .unwrap();
        let s = silhouette(&data, &[0, 0, 1, 1]).unwrap();
        assert!((s - 0.858_585_6).abs() < 1e-4, "got {s}");
        let ch = calinski_harabasz(&data, &[0, 0, 1, 1]).unwrap();
        assert!(ch > 50.0);
    }

    #[test]
    fn builtin_scores_split_by_target_need() {
        let scores = builtin();
        let needing: Vec<_> = scores.iter().filter(|s| s.needs_target()).collect();
        assert_eq!(needing.len(), 6);
        assert_eq!(scores.len(), 8);
    }
}

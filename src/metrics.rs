//! Cross-run score statistics for the compare report.

use crate::model::{RunId, RunResult};
use crate::registry::Named;
use std::collections::BTreeMap;

/// Scores where a smaller value means a better match.
const LOWER_IS_BETTER: &[&str] = &["Minkowski"];

/// Compute summary metrics (mean, median, 25th percentile, 75th percentile) from samples
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

pub fn lower_is_better(score: &str) -> bool {
    LOWER_IS_BETTER.contains(&score)
}

/// One score across the compared runs. Runs without a value for the score
/// do not take part.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreStats {
    pub score: String,
    pub mean: f64,
    pub median: f64,
    pub p25: f64,
    pub p75: f64,
    /// Best first.
    pub ranking: Vec<(RunId, String, f64)>,
}

pub fn compare<'a>(runs: impl IntoIterator<Item = (RunId, &'a RunResult)>) -> Vec<ScoreStats> {
    let mut by_score: BTreeMap<&str, Vec<(RunId, String, f64)>> = BTreeMap::new();
    for (id, run) in runs {
        for (score, value) in run.scores() {
            by_score
                .entry(score.as_str())
                .or_default()
                .push((id, run.name().to_string(), *value));
        }
    }

    let mut out = Vec::with_capacity(by_score.len());
    for (score, mut ranking) in by_score {
        let values: Vec<f64> = ranking.iter().map(|(_, _, v)| *v).collect();
        let Some((mean, median, p25, p75)) = compute_metrics(&values) else {
            continue;
        };
        if lower_is_better(score) {
            ranking.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)));
        } else {
            ranking.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));
        }
        out.push(ScoreStats {
            score: score.to_string(),
            mean,
            median,
            p25,
            p75,
            ranking,
        });
    }
    out
}

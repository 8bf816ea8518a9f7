use crate::error::{LabError, LabResult};
use crate::params::{CallArgs, ParamValues, ParameterSchema};
use crate::registry::{Id, Named};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Cluster label as produced by an algorithm. Negative values (e.g. `-1`)
/// are allowed and conventionally mean "noise".
pub type Label = i64;

pub type DatasetId = Id<Dataset>;
pub type AlgorithmId = Id<Algorithm>;
pub type ScoreId = Id<Score>;
pub type RunId = Id<RunResult>;

/// Dense row-major `n_samples × n_features` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
}

impl Matrix {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> LabResult<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(LabError::Dataset(format!(
                "row {} has {} values, expected {cols}",
                i + 1,
                row.len()
            )));
        }
        let n = rows.len();
        Ok(Self {
            rows: n,
            cols,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn n_samples(&self) -> usize {
        self.rows
    }

    pub fn n_features(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.cols..(i + 1) * self.cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows).map(move |i| self.values[i * self.cols + j])
    }

    /// Scale every feature to `[0, 1]`; constant features become `0`.
    pub fn normalised(&self) -> Self {
        let mut out = self.clone();
        for j in 0..self.cols {
            let (lo, hi) = self
                .column(j)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            let span = hi - lo;
            for i in 0..self.rows {
                let v = &mut out.values[i * self.cols + j];
                *v = if span > 0.0 { (*v - lo) / span } else { 0.0 };
            }
        }
        out
    }
}

/// One clustering problem. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    data: Matrix,
    target: Option<Vec<Label>>,
    num_of_classes: usize,
    feature_names: Vec<String>,
    titles: Option<Vec<String>>,
}

impl Dataset {
    /// At least one of `num_of_classes` and `target` must be given; with a
    /// target the class count is always derived from it.
    pub fn new(
        name: impl Into<String>,
        data: Matrix,
        num_of_classes: Option<usize>,
        target: Option<Vec<Label>>,
        feature_names: Option<Vec<String>>,
        titles: Option<Vec<String>>,
    ) -> LabResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(LabError::Dataset("dataset name must not be empty".into()));
        }
        let n = data.n_samples();
        let num_of_classes = match (&target, num_of_classes) {
            (Some(t), _) => {
                if t.len() != n {
                    return Err(LabError::Dataset(format!(
                        "target has {} labels for {n} samples",
                        t.len()
                    )));
                }
                t.iter().collect::<BTreeSet<_>>().len()
            }
            (None, Some(k)) => k,
            (None, None) => {
                return Err(LabError::Dataset(
                    "either the number of classes or a target must be specified".into(),
                ))
            }
        };
        let feature_names = match feature_names {
            Some(names) if names.len() != data.n_features() => {
                return Err(LabError::Dataset(format!(
                    "{} feature names for {} features",
                    names.len(),
                    data.n_features()
                )))
            }
            Some(names) => names,
            None => (1..=data.n_features())
                .map(|i| format!("Feature {i}"))
                .collect(),
        };
        if let Some(t) = &titles {
            if t.len() != n {
                return Err(LabError::Dataset(format!(
                    "{} titles for {n} samples",
                    t.len()
                )));
            }
        }
        Ok(Self {
            name,
            data,
            target,
            num_of_classes,
            feature_names,
            titles,
        })
    }

    pub fn data(&self) -> &Matrix {
        &self.data
    }

    pub fn target(&self) -> Option<&[Label]> {
        self.target.as_deref()
    }

    pub fn num_of_classes(&self) -> usize {
        self.num_of_classes
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn titles(&self) -> Option<&[String]> {
        self.titles.as_deref()
    }

    pub fn n_samples(&self) -> usize {
        self.data.n_samples()
    }
}

impl Named for Dataset {
    const KIND: &'static str = "dataset";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Executable body of an algorithm. The core never looks inside; it only
/// hands over the data and the call arguments built from the schema.
pub trait ClusterAlgorithm: Send + Sync {
    fn cluster(&self, data: &Matrix, args: &CallArgs) -> anyhow::Result<Vec<Label>>;
}

impl<F> ClusterAlgorithm for F
where
    F: Fn(&Matrix, &CallArgs) -> anyhow::Result<Vec<Label>> + Send + Sync,
{
    fn cluster(&self, data: &Matrix, args: &CallArgs) -> anyhow::Result<Vec<Label>> {
        self(data, args)
    }
}

#[derive(Clone)]
pub struct Algorithm {
    name: String,
    schema: ParameterSchema,
    body: Arc<dyn ClusterAlgorithm>,
    /// Where the definition came from (`builtin` or a plugin file name).
    origin: String,
}

impl Algorithm {
    pub fn new(
        name: impl Into<String>,
        schema: ParameterSchema,
        body: Arc<dyn ClusterAlgorithm>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schema,
            body,
            origin: origin.into(),
        }
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn run(&self, data: &Matrix, args: &CallArgs) -> anyhow::Result<Vec<Label>> {
        self.body.cluster(data, args)
    }
}

impl fmt::Debug for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Algorithm")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl Named for Algorithm {
    const KIND: &'static str = "algorithm";

    fn name(&self) -> &str {
        &self.name
    }
}

/// What a scoring function looks at besides the predicted labels.
#[derive(Clone)]
pub enum ScoreFn {
    /// Internal criteria: `(data, pred)`.
    Data(fn(&Matrix, &[Label]) -> Option<f64>),
    /// External criteria: `(target, pred)`.
    Target(fn(&[Label], &[Label]) -> Option<f64>),
}

#[derive(Clone)]
pub struct Score {
    name: String,
    fun: ScoreFn,
}

impl Score {
    pub fn new(name: impl Into<String>, fun: ScoreFn) -> Self {
        Self {
            name: name.into(),
            fun,
        }
    }

    pub fn needs_target(&self) -> bool {
        matches!(self.fun, ScoreFn::Target(_))
    }

    /// `None` when the score is undefined for this input: a missing target,
    /// or a labelling the score cannot be computed on.
    pub fn calc(&self, dataset: &Dataset, pred: &[Label]) -> Option<f64> {
        let value = match self.fun {
            ScoreFn::Data(f) => f(dataset.data(), pred),
            ScoreFn::Target(f) => f(dataset.target()?, pred),
        }?;
        value.is_finite().then_some(value)
    }
}

impl fmt::Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Score")
            .field("name", &self.name)
            .field("needs_target", &self.needs_target())
            .finish()
    }
}

impl Named for Score {
    const KIND: &'static str = "score";

    fn name(&self) -> &str {
        &self.name
    }
}

/// A named parameter set for one algorithm that has not been executed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgoConfig {
    pub name: String,
    pub algorithm: AlgorithmId,
    pub params: ParamValues,
}

impl Named for AlgoConfig {
    const KIND: &'static str = "configuration";

    fn name(&self) -> &str {
        &self.name
    }
}

/// Complete, reproducible description of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub name: String,
    pub dataset: DatasetId,
    pub algorithm: AlgorithmId,
    pub params: ParamValues,
    pub scores: Vec<ScoreId>,
}

impl RunConfig {
    /// Same dataset, algorithm, parameters and score set; the name is a label only.
    pub fn same_execution(&self, other: &RunConfig) -> bool {
        let mine: BTreeSet<_> = self.scores.iter().collect();
        let theirs: BTreeSet<_> = other.scores.iter().collect();
        self.dataset == other.dataset
            && self.algorithm == other.algorithm
            && self.params == other.params
            && mine == theirs
    }
}

/// Immutable outcome of executing a [`RunConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    config: RunConfig,
    labels: Vec<Label>,
    scores: BTreeMap<String, f64>,
    elapsed: Duration,
    timestamp_utc: String,
}

impl RunResult {
    pub(crate) fn new(
        config: RunConfig,
        labels: Vec<Label>,
        scores: BTreeMap<String, f64>,
        elapsed: Duration,
        timestamp_utc: String,
    ) -> Self {
        Self {
            config,
            labels,
            scores,
            elapsed,
            timestamp_utc,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn scores(&self) -> &BTreeMap<String, f64> {
        &self.scores
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn timestamp_utc(&self) -> &str {
        &self.timestamp_utc
    }

    /// Cluster label → member count, in label order.
    pub fn cluster_sizes(&self) -> BTreeMap<Label, usize> {
        let mut sizes = BTreeMap::new();
        for l in &self.labels {
            *sizes.entry(*l).or_insert(0) += 1;
        }
        sizes
    }
}

impl Named for RunResult {
    const KIND: &'static str = "run";

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    /// Explore one dataset with individual runs.
    #[default]
    Research,
    /// Run saved configurations side by side.
    Compare,
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppMode::Research => f.write_str("research"),
            AppMode::Compare => f.write_str("compare"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Matrix {
        Matrix::from_rows(vec![vec![0.0, 10.0], vec![2.0, 10.0], vec![4.0, 10.0]]).unwrap()
    }

    #[test]
    fn class_count_comes_from_target() {
        let ds = Dataset::new("d", matrix(), Some(7), Some(vec![0, 1, 1]), None, None).unwrap();
        assert_eq!(ds.num_of_classes(), 2);
        assert_eq!(ds.feature_names(), ["Feature 1", "Feature 2"]);
    }

    #[test]
    fn dataset_needs_target_or_class_count() {
        let err = Dataset::new("d", matrix(), None, None, None, None).unwrap_err();
        assert!(matches!(err, LabError::Dataset(_)));
        assert!(Dataset::new("d", matrix(), None, Some(vec![0, 1]), None, None).is_err());
        assert!(Dataset::new("d", matrix(), Some(2), None, None, Some(vec!["a".into()])).is_err());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert!(Matrix::from_rows(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn normalisation_maps_to_unit_interval() {
        let m = matrix().normalised();
        assert_eq!(m.column(0).collect::<Vec<_>>(), vec![0.0, 0.5, 1.0]);
        assert_eq!(m.column(1).collect::<Vec<_>>(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn target_scores_are_undefined_without_target() {
        let ds = Dataset::new("d", matrix(), Some(2), None, None, None).unwrap();
        let score = Score::new("always one", ScoreFn::Target(|_, _| Some(1.0)));
        assert!(score.needs_target());
        assert_eq!(score.calc(&ds, &[0, 0, 1]), None);
    }
}

//! Shared fixtures: small datasets and stub algorithms with known behaviour.

use crate::engine::Catalog;
use crate::model::{
    Algorithm, AlgorithmId, Dataset, DatasetId, Label, Matrix, RunConfig, ScoreId,
};
use crate::params::{CallArgs, ParamDecl, ParamValue, ParamValues, ParameterSchema, TypedValue};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub(crate) struct Ids {
    pub dataset: DatasetId,
    pub labelled: DatasetId,
    pub algorithm: AlgorithmId,
    pub short: AlgorithmId,
    pub scores: BTreeMap<String, ScoreId>,
}

fn pairs_matrix() -> Matrix {
    Matrix::from_rows(vec![
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![5.0, 5.0],
        vec![5.0, 6.0],
    ])
    .unwrap()
}

/// Two separated pairs of points, no target.
pub(crate) fn pairs_dataset(name: &str) -> Dataset {
    Dataset::new(name, pairs_matrix(), Some(2), None, None, None).unwrap()
}

/// Same points with a target.
pub(crate) fn labelled_dataset(name: &str) -> Dataset {
    Dataset::new(name, pairs_matrix(), None, Some(vec![0, 0, 1, 1]), None, None).unwrap()
}

/// Cuts the samples at the `k - 1` widest gaps of their coordinate sums.
/// `k` defaults to 2; an explicit `None` is an error.
pub(crate) fn split_stub(name: &str) -> Algorithm {
    let schema = ParameterSchema::new(vec![ParamDecl::int("k", Some(1), None)]).unwrap();
    let body = |data: &Matrix, args: &CallArgs| -> anyhow::Result<Vec<Label>> {
        let k = args.int_or("k", 2)? as usize;
        anyhow::ensure!(k <= data.n_samples(), "k larger than the sample count");
        let sums: Vec<f64> = data.rows().map(|r| r.iter().sum()).collect();
        let mut sorted = sums.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mut gaps: Vec<(f64, f64)> = sorted.windows(2).map(|w| (w[1] - w[0], w[1])).collect();
        gaps.sort_by(|a, b| b.0.total_cmp(&a.0));
        let cuts: Vec<f64> = gaps.iter().take(k - 1).map(|g| g.1).collect();
        Ok(sums
            .iter()
            .map(|s| cuts.iter().filter(|c| s >= c).count() as Label)
            .collect())
    };
    Algorithm::new(name, schema, Arc::new(body), "test")
}

/// Returns one label too few.
fn short_stub() -> Algorithm {
    let body = |data: &Matrix, _: &CallArgs| -> anyhow::Result<Vec<Label>> {
        Ok(vec![0; data.n_samples().saturating_sub(1)])
    };
    Algorithm::new("Short", ParameterSchema::default(), Arc::new(body), "test")
}

/// Remembers every argument map it was called with.
pub(crate) fn recording_algorithm() -> (Algorithm, Arc<Mutex<Vec<CallArgs>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let schema = ParameterSchema::new(vec![
        ParamDecl::int("k", None, None),
        ParamDecl::boolean("echo"),
        ParamDecl::choice("mode", &["a", "b"]),
    ])
    .unwrap();
    let body = move |data: &Matrix, args: &CallArgs| -> anyhow::Result<Vec<Label>> {
        log.lock().unwrap().push(args.clone());
        Ok(vec![0; data.n_samples()])
    };
    (Algorithm::new("Recorder", schema, Arc::new(body), "test"), seen)
}

pub(crate) fn catalog_with_pairs() -> (Catalog, Ids) {
    let mut catalog = Catalog::default();
    let dataset = catalog.datasets.insert(pairs_dataset("pairs"));
    let labelled = catalog.datasets.insert(labelled_dataset("labelled"));
    let algorithm = catalog.algorithms.insert(split_stub("Split"));
    let short = catalog.algorithms.insert(short_stub());
    let mut scores = BTreeMap::new();
    for score in crate::scores::builtin() {
        let name = crate::registry::Named::name(&score).to_string();
        scores.insert(name, catalog.scores.insert(score));
    }
    (
        catalog,
        Ids {
            dataset,
            labelled,
            algorithm,
            short,
            scores,
        },
    )
}

/// `Split` on `pairs` with `k = 2` and the named scores.
pub(crate) fn run_config(ids: &Ids, scores: &[&str]) -> RunConfig {
    let mut params = ParamValues::default();
    params.set("k", ParamValue::ExplicitValue(TypedValue::Int(2)));
    RunConfig {
        name: "split-2".into(),
        dataset: ids.dataset,
        algorithm: ids.algorithm,
        params,
        scores: scores.iter().map(|s| ids.scores[*s]).collect(),
    }
}

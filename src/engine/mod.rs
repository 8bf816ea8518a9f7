mod scoring;

use crate::error::{LabError, LabResult};
use crate::model::{
    AlgoConfig, Algorithm, Dataset, DatasetId, RunConfig, RunId, RunResult, Score,
};
use crate::params::ParamValues;
use crate::registry::{Named, Registry};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Live entities a run can refer to, passed explicitly to every component.
#[derive(Default)]
pub struct Catalog {
    pub datasets: Registry<Dataset>,
    pub algorithms: Registry<Algorithm>,
    pub scores: Registry<Score>,
    /// Named, not yet executed parameter sets.
    pub configs: Registry<AlgoConfig>,
}

/// Lifecycle of one execution. Only `Completed` runs are ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Refuse to execute a configuration identical to a live result.
    pub dedupe: bool,
}

/// Produces and tracks run results. Results are never mutated once stored.
#[derive(Default)]
pub struct RunExecutor {
    results: Registry<RunResult>,
}

impl RunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute(
        &mut self,
        catalog: &Catalog,
        config: RunConfig,
        opts: ExecuteOptions,
    ) -> LabResult<RunId> {
        let dataset = catalog.datasets.get(config.dataset)?;
        let algorithm = catalog.algorithms.get(config.algorithm)?;
        let scores = config
            .scores
            .iter()
            .map(|id| catalog.scores.get(*id))
            .collect::<LabResult<Vec<_>>>()?;
        let params = algorithm.schema().validate(&config.params)?;
        let config = RunConfig { params, ..config };

        if opts.dedupe {
            if let Some(existing) = self.find_duplicate(&config) {
                return Err(LabError::DuplicateRun {
                    existing: existing.to_string(),
                });
            }
        }

        debug!(
            state = ?RunState::Pending,
            run = %config.name,
            dataset = %dataset.name(),
            algorithm = %algorithm.name(),
            params = %config.params,
            "executing run"
        );
        let algorithm_name = algorithm.name().to_string();
        let started = Instant::now();
        let labels = match algorithm.run(dataset.data(), &config.params.call_args()) {
            Ok(labels) => labels,
            Err(e) => {
                warn!(state = ?RunState::Failed, run = %config.name, "algorithm failed: {e:#}");
                return Err(LabError::AlgorithmFailed {
                    algorithm: algorithm_name,
                    reason: format!("{e:#}"),
                });
            }
        };
        let elapsed = started.elapsed();
        if labels.len() != dataset.n_samples() {
            warn!(state = ?RunState::Failed, run = %config.name, "wrong label count");
            return Err(LabError::LabelCountMismatch {
                algorithm: algorithm_name,
                expected: dataset.n_samples(),
                got: labels.len(),
            });
        }

        let computed = scoring::evaluate(dataset, &labels, &scores);
        let result = RunResult::new(
            config,
            labels,
            computed,
            elapsed,
            time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
        );
        let name = result.config().name.clone();
        let id = self.results.insert(result);
        info!(state = ?RunState::Completed, run = %name, id = %id, ?elapsed, "run stored");
        Ok(id)
    }

    /// Execute the prior run's dataset/algorithm/scores with new parameters.
    /// The old result is left alone.
    pub fn rerun(
        &mut self,
        catalog: &Catalog,
        id: RunId,
        params: ParamValues,
        opts: ExecuteOptions,
    ) -> LabResult<RunId> {
        let prior = self.get(id)?.config().clone();
        self.execute(catalog, RunConfig { params, ..prior }, opts)
    }

    pub fn get(&self, id: RunId) -> LabResult<&RunResult> {
        self.results.get(id)
    }

    /// A run by handle (`#3`) or by configuration name; a name shared by
    /// several runs is `Ambiguous`.
    pub fn resolve(&self, reference: &str) -> LabResult<RunId> {
        self.results.resolve(reference)
    }

    /// Returns whether the result existed.
    pub fn remove(&mut self, id: RunId) -> bool {
        let existed = self.results.remove(id).is_some();
        debug!(id = %id, existed, "remove run");
        existed
    }

    /// Drop every result computed on `dataset`; returns how many went away.
    pub fn remove_for_dataset(&mut self, dataset: DatasetId) -> usize {
        let doomed: Vec<RunId> = self
            .results
            .iter()
            .filter(|(_, r)| r.config().dataset == dataset)
            .map(|(id, _)| id)
            .collect();
        for id in &doomed {
            self.results.remove(*id);
        }
        doomed.len()
    }

    pub fn find_duplicate(&self, config: &RunConfig) -> Option<RunId> {
        self.results
            .iter()
            .find(|(_, r)| r.config().same_execution(config))
            .map(|(id, _)| id)
    }

    pub fn results(&self) -> impl Iterator<Item = (RunId, &RunResult)> + '_ {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    /// Store a result rebuilt from persisted state under a fresh handle.
    pub(crate) fn adopt(&mut self, result: RunResult) -> RunId {
        self.results.insert(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LabError;
    use crate::params::{ParamValue, TypedValue};
    use crate::testutil::{catalog_with_pairs, recording_algorithm, run_config};

    #[test]
    fn labels_cover_every_sample() {
        let (catalog, ids) = catalog_with_pairs();
        let mut exec = RunExecutor::new();
        let id = exec
            .execute(&catalog, run_config(&ids, &["Silhouette"]), ExecuteOptions::default())
            .unwrap();
        let run = exec.get(id).unwrap();
        assert_eq!(run.labels().len(), 4);
        assert_eq!(run.cluster_sizes().len(), 2);
        assert_eq!(run.labels()[0], run.labels()[1]);
        assert_eq!(run.labels()[2], run.labels()[3]);
        assert_ne!(run.labels()[0], run.labels()[2]);
        let s = run.scores()["Silhouette"];
        assert!(s > 0.85 && s < 0.87, "silhouette {s}");
    }

    #[test]
    fn target_scores_are_absent_without_target() {
        let (catalog, ids) = catalog_with_pairs();
        let mut exec = RunExecutor::new();
        let id = exec
            .execute(
                &catalog,
                run_config(&ids, &["Silhouette", "Rand"]),
                ExecuteOptions::default(),
            )
            .unwrap();
        let run = exec.get(id).unwrap();
        assert!(run.scores().contains_key("Silhouette"));
        assert!(!run.scores().contains_key("Rand"));
        // still recorded as requested
        assert_eq!(run.config().scores.len(), 2);
    }

    #[test]
    fn unspecified_parameters_never_reach_the_body() {
        let (mut catalog, ids) = catalog_with_pairs();
        let (algorithm, seen) = recording_algorithm();
        let recorder = catalog.algorithms.insert(algorithm);
        let mut exec = RunExecutor::new();
        let mut cfg = run_config(&ids, &[]);
        cfg.algorithm = recorder;
        cfg.params = ParamValues::default();
        cfg.params.set("k", ParamValue::ExplicitValue(TypedValue::Int(2)));
        cfg.params.set("echo", ParamValue::ExplicitNull);
        cfg.params.set("mode", ParamValue::Unspecified);
        exec.execute(&catalog, cfg, ExecuteOptions::default()).unwrap();

        let calls = seen.lock().unwrap();
        let args = calls.last().unwrap();
        assert_eq!(args.get("k"), Some(&Some(TypedValue::Int(2))));
        assert_eq!(args.get("echo"), Some(&None));
        assert!(!args.contains_key("mode"));
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn failures_store_nothing() {
        let (catalog, ids) = catalog_with_pairs();
        let mut exec = RunExecutor::new();

        let mut bad = run_config(&ids, &[]);
        bad.params.set("k", ParamValue::ExplicitValue(TypedValue::Int(0)));
        let err = exec.execute(&catalog, bad, ExecuteOptions::default()).unwrap_err();
        assert!(err.is_parameter_error());

        let mut failing = run_config(&ids, &[]);
        failing.params.set("k", ParamValue::ExplicitNull);
        let err = exec
            .execute(&catalog, failing, ExecuteOptions::default())
            .unwrap_err();
        assert!(matches!(err, LabError::AlgorithmFailed { .. }));

        let mut stale = run_config(&ids, &[]);
        stale.dataset = crate::registry::Id::from_raw_for_tests(999);
        let err = exec.execute(&catalog, stale, ExecuteOptions::default()).unwrap_err();
        assert!(matches!(err, LabError::NotFound { kind: "dataset", .. }));

        assert!(exec.is_empty());
    }

    #[test]
    fn wrong_label_count_is_a_failed_run() {
        let (catalog, ids) = catalog_with_pairs();
        let mut exec = RunExecutor::new();
        let mut cfg = run_config(&ids, &[]);
        cfg.algorithm = ids.short;
        cfg.params = ParamValues::default();
        let err = exec.execute(&catalog, cfg, ExecuteOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            LabError::LabelCountMismatch {
                expected: 4,
                got: 3,
                ..
            }
        ));
        assert!(exec.is_empty());
    }

    #[test]
    fn duplicates_coexist_unless_dedupe_requested() {
        let (catalog, ids) = catalog_with_pairs();
        let mut exec = RunExecutor::new();
        let a = exec
            .execute(&catalog, run_config(&ids, &["Silhouette"]), ExecuteOptions::default())
            .unwrap();
        let b = exec
            .execute(&catalog, run_config(&ids, &["Silhouette"]), ExecuteOptions::default())
            .unwrap();
        assert_ne!(a, b);
        let err = exec
            .execute(
                &catalog,
                run_config(&ids, &["Silhouette"]),
                ExecuteOptions { dedupe: true },
            )
            .unwrap_err();
        assert!(matches!(err, LabError::DuplicateRun { .. }));
        assert_eq!(exec.len(), 2);
    }

    #[test]
    fn rerun_makes_a_new_result_and_keeps_the_old() {
        let (catalog, ids) = catalog_with_pairs();
        let mut exec = RunExecutor::new();
        let first = exec
            .execute(&catalog, run_config(&ids, &["Silhouette"]), ExecuteOptions::default())
            .unwrap();
        let mut params = ParamValues::default();
        params.set("k", ParamValue::ExplicitValue(TypedValue::Int(1)));
        let second = exec
            .rerun(&catalog, first, params, ExecuteOptions::default())
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(exec.get(first).unwrap().cluster_sizes().len(), 2);
        let again = exec.get(second).unwrap();
        assert_eq!(again.cluster_sizes().len(), 1);
        // silhouette is undefined for a single cluster
        assert!(again.scores().is_empty());
        assert!(exec.remove(first));
        assert!(!exec.remove(first));
    }
}

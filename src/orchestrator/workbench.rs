//! The experiment workbench.
//!
//! Owns the catalog, the run executor and the on-disk stores, and turns
//! name-based requests from presentation layers into core operations.

use crate::algorithms;
use crate::engine::{Catalog, ExecuteOptions, RunExecutor};
use crate::error::LabError;
use crate::model::{AlgoConfig, AlgorithmId, AppMode, Dataset, DatasetId, RunConfig, RunId, ScoreId};
use crate::params::RawParam;
use crate::plugin::PluginLoader;
use crate::registry::Named;
use crate::scores;
use crate::session::{LoadReport, SessionStore};
use crate::storage::DatasetStore;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where datasets, plugins and the session live.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WorkspacePaths {
    pub home: PathBuf,
    pub datasets: PathBuf,
    pub plugins: PathBuf,
    pub session: PathBuf,
}

impl WorkspacePaths {
    /// `home` defaults to the platform data directory; `session` to
    /// `<home>/session.json`.
    pub fn resolve(home: Option<PathBuf>, session: Option<PathBuf>) -> Result<Self> {
        let home = match home {
            Some(h) => h,
            None => dirs::data_dir()
                .context("no data directory on this platform; pass --home")?
                .join("cluster-lab"),
        };
        Ok(Self {
            datasets: home.join("datasets"),
            plugins: home.join("plugins"),
            session: session.unwrap_or_else(|| home.join("session.json")),
            home,
        })
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.home, &self.datasets, &self.plugins] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// A run request as typed by the user: everything addressed by name.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunRequest {
    pub dataset: String,
    pub algorithm: String,
    pub name: Option<String>,
    pub params: BTreeMap<String, RawParam>,
    /// All registered scores when empty.
    pub scores: Vec<String>,
    pub dedupe: bool,
}

pub(crate) struct Workbench {
    paths: WorkspacePaths,
    catalog: Catalog,
    executor: RunExecutor,
    mode: AppMode,
    datasets: DatasetStore,
    plugins: PluginLoader,
    session: SessionStore,
}

impl Workbench {
    /// Register built-ins, plugins from the search path and stored datasets.
    pub fn open(paths: WorkspacePaths) -> Result<Self> {
        paths.ensure()?;
        let mut catalog = Catalog::default();
        for score in scores::builtin() {
            catalog.scores.insert(score);
        }
        for algorithm in algorithms::builtin() {
            catalog.algorithms.insert(algorithm);
        }
        let plugins = PluginLoader::new(&paths.plugins);
        for (file, err) in plugins.load_search_path(&mut catalog.algorithms) {
            warn!(plugin = %file, "not loaded: {err}");
        }
        let datasets = DatasetStore::new(&paths.datasets);
        for ds in datasets.load_all().context("load datasets")? {
            catalog.datasets.insert(ds);
        }
        debug!(
            datasets = catalog.datasets.len(),
            algorithms = catalog.algorithms.len(),
            "workbench ready"
        );
        Ok(Self {
            session: SessionStore::new(&paths.session),
            paths,
            catalog,
            executor: RunExecutor::new(),
            mode: AppMode::default(),
            datasets,
            plugins,
        })
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn executor(&self) -> &RunExecutor {
        &self.executor
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    // --- session -----------------------------------------------------------

    pub fn restore_session(&mut self) -> Result<LoadReport> {
        let report = self
            .session
            .load(&mut self.catalog, &mut self.executor)
            .with_context(|| format!("load session {}", self.session.path().display()))?;
        self.mode = report.mode.unwrap_or_default();
        Ok(report)
    }

    pub fn save_session(&self) -> Result<PathBuf> {
        self.session
            .save(&self.catalog, &self.executor, self.mode)
            .with_context(|| format!("save session {}", self.session.path().display()))?;
        Ok(self.session.path().to_path_buf())
    }

    /// Drop every run and template and switch to `mode`.
    pub fn new_session(&mut self, mode: AppMode) {
        self.executor.clear();
        self.catalog.configs.clear();
        self.mode = mode;
        info!(%mode, "new session");
    }

    // --- datasets ----------------------------------------------------------

    pub fn add_dataset(&mut self, dataset: Dataset) -> Result<DatasetId> {
        if self.catalog.datasets.find_by_name(dataset.name()).is_some() {
            return Err(LabError::DuplicateName {
                kind: "dataset",
                name: dataset.name().to_string(),
            }
            .into());
        }
        self.datasets.add(&dataset)?;
        Ok(self.catalog.datasets.insert(dataset))
    }

    /// Removes the dataset, its file and every run computed on it.
    /// Returns the number of runs that went with it.
    pub fn remove_dataset(&mut self, reference: &str) -> Result<usize> {
        let id = self.catalog.datasets.resolve(reference)?;
        let name = self.catalog.datasets.get(id)?.name().to_string();
        self.datasets.delete(&name)?;
        let runs = self.executor.remove_for_dataset(id);
        self.catalog.datasets.remove(id);
        info!(dataset = %name, runs, "dataset and its runs removed");
        Ok(runs)
    }

    pub fn dataset(&self, reference: &str) -> Result<&Dataset> {
        let id = self.catalog.datasets.resolve(reference)?;
        Ok(self.catalog.datasets.get(id)?)
    }

    // --- algorithms --------------------------------------------------------

    pub fn load_plugin(&mut self, source: &Path) -> Result<Vec<AlgorithmId>> {
        debug!(
            source = %source.display(),
            into = %self.plugins.search_path().display(),
            "installing plugin"
        );
        Ok(self
            .plugins
            .load_and_register(source, &mut self.catalog.algorithms)?)
    }

    // --- runs --------------------------------------------------------------

    fn resolve_scores(&self, names: &[String]) -> Result<Vec<ScoreId>> {
        if names.is_empty() {
            return Ok(self.catalog.scores.ids());
        }
        Ok(names
            .iter()
            .map(|n| self.catalog.scores.resolve(n))
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub fn run(&mut self, request: RunRequest) -> Result<RunId> {
        let dataset = self.catalog.datasets.resolve(&request.dataset)?;
        let algorithm_id = self.catalog.algorithms.resolve(&request.algorithm)?;
        let algorithm = self.catalog.algorithms.get(algorithm_id)?;
        let params = algorithm.schema().coerce(&request.params)?;
        let config = RunConfig {
            name: request
                .name
                .unwrap_or_else(|| algorithm.name().to_string()),
            dataset,
            algorithm: algorithm_id,
            params,
            scores: self.resolve_scores(&request.scores)?,
        };
        let opts = ExecuteOptions {
            dedupe: request.dedupe,
        };
        Ok(self.executor.execute(&self.catalog, config, opts)?)
    }

    /// Re-execute a run with its parameters edited by `changes`; keys left
    /// out of `changes` keep their previous state.
    pub fn rerun(
        &mut self,
        reference: &str,
        changes: BTreeMap<String, RawParam>,
        replace: bool,
        dedupe: bool,
    ) -> Result<RunId> {
        let id = self.executor.resolve(reference)?;
        let prior = self.executor.get(id)?.config().clone();
        let algorithm = self.catalog.algorithms.get(prior.algorithm)?;
        let mut raw = prior.params.to_raw();
        raw.extend(changes);
        let params = algorithm.schema().coerce(&raw)?;
        let new_id = self
            .executor
            .rerun(&self.catalog, id, params, ExecuteOptions { dedupe })?;
        if replace {
            self.executor.remove(id);
        }
        Ok(new_id)
    }

    pub fn remove_run(&mut self, reference: &str) -> Result<()> {
        let id = self.executor.resolve(reference)?;
        self.executor.remove(id);
        Ok(())
    }

    pub fn resolve_run(&self, reference: &str) -> Result<RunId> {
        Ok(self.executor.resolve(reference)?)
    }

    // --- configuration templates ------------------------------------------

    pub fn add_config(
        &mut self,
        name: &str,
        algorithm: &str,
        params: &BTreeMap<String, RawParam>,
    ) -> Result<()> {
        if self.catalog.configs.find_by_name(name).is_some() {
            return Err(LabError::DuplicateName {
                kind: "configuration",
                name: name.to_string(),
            }
            .into());
        }
        let algorithm = self.catalog.algorithms.resolve(algorithm)?;
        let params = self.catalog.algorithms.get(algorithm)?.schema().coerce(params)?;
        self.catalog.configs.insert(AlgoConfig {
            name: name.to_string(),
            algorithm,
            params,
        });
        Ok(())
    }

    pub fn remove_config(&mut self, reference: &str) -> Result<()> {
        let id = self.catalog.configs.resolve(reference)?;
        self.catalog.configs.remove(id);
        Ok(())
    }

    /// Execute templates (all of them when `names` is empty) on one dataset.
    /// Each template succeeds or fails on its own.
    pub fn run_configs(
        &mut self,
        names: &[String],
        dataset: &str,
        scores: &[String],
        dedupe: bool,
    ) -> Result<Vec<(String, Result<RunId>)>> {
        let dataset = self.catalog.datasets.resolve(dataset)?;
        let scores = self.resolve_scores(scores)?;
        let ids = if names.is_empty() {
            self.catalog.configs.ids()
        } else {
            names
                .iter()
                .map(|n| self.catalog.configs.resolve(n))
                .collect::<Result<Vec<_>, _>>()?
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let template = self.catalog.configs.get(id)?.clone();
            let config = RunConfig {
                name: template.name.clone(),
                dataset,
                algorithm: template.algorithm,
                params: template.params,
                scores: scores.clone(),
            };
            let outcome = self
                .executor
                .execute(&self.catalog, config, ExecuteOptions { dedupe })
                .map_err(anyhow::Error::from);
            out.push((template.name, outcome));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{generate_blobs, BlobOptions};
    use tempfile::tempdir;

    fn bench(home: &Path) -> Workbench {
        let paths = WorkspacePaths::resolve(Some(home.to_path_buf()), None).unwrap();
        Workbench::open(paths).unwrap()
    }

    fn blobs(name: &str) -> Dataset {
        generate_blobs(&BlobOptions {
            name: name.into(),
            n_samples: 30,
            centers: 3,
            cluster_std: 0.3,
            seed: Some(1),
            ..Default::default()
        })
        .unwrap()
    }

    fn set(pairs: &[(&str, &str)]) -> BTreeMap<String, RawParam> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), RawParam::Text(v.to_string())))
            .collect()
    }

    fn lab_error(err: &anyhow::Error) -> &LabError {
        err.downcast_ref::<LabError>().unwrap()
    }

    #[test]
    fn state_survives_a_restart_through_the_session() {
        let td = tempdir().unwrap();
        {
            let mut wb = bench(td.path());
            wb.add_dataset(blobs("blobs")).unwrap();
            wb.run(RunRequest {
                dataset: "blobs".into(),
                algorithm: "K-means".into(),
                name: Some("k3".into()),
                params: set(&[("n_clusters", "3")]),
                ..Default::default()
            })
            .unwrap();
            wb.add_config("two", "K-means", &set(&[("n_clusters", "2")]))
                .unwrap();
            wb.new_session(AppMode::Compare);
            wb.add_config("three", "K-means", &set(&[("n_clusters", "3")]))
                .unwrap();
            let results = wb.run_configs(&[], "blobs", &[], false).unwrap();
            assert!(results.iter().all(|(_, r)| r.is_ok()));
            wb.save_session().unwrap();
        }
        let mut wb = bench(td.path());
        let report = wb.restore_session().unwrap();
        assert_eq!(wb.mode(), AppMode::Compare);
        assert_eq!((report.runs, report.configs), (1, 1));
        let id = wb.resolve_run("three").unwrap();
        let run = wb.executor().get(id).unwrap();
        assert_eq!(run.cluster_sizes().len(), 3);
        // all registered scores were requested, blobs carry a target
        assert!(run.scores().contains_key("Adjusted rand"));
    }

    #[test]
    fn duplicate_dataset_names_are_refused() {
        let td = tempdir().unwrap();
        let mut wb = bench(td.path());
        wb.add_dataset(blobs("b")).unwrap();
        let err = wb.add_dataset(blobs("b")).unwrap_err();
        assert!(matches!(lab_error(&err), LabError::DuplicateName { .. }));
        assert_eq!(wb.catalog().datasets.len(), 1);
    }

    #[test]
    fn removing_a_dataset_removes_its_runs_and_file() {
        let td = tempdir().unwrap();
        let mut wb = bench(td.path());
        wb.add_dataset(blobs("b")).unwrap();
        let request = RunRequest {
            dataset: "b".into(),
            algorithm: "DBSCAN".into(),
            ..Default::default()
        };
        wb.run(request.clone()).unwrap();
        wb.run(request).unwrap();
        assert_eq!(wb.remove_dataset("b").unwrap(), 2);
        assert!(wb.executor().is_empty());
        assert!(!wb.paths().datasets.join("b.csv").exists());
        assert!(wb.dataset("b").is_err());
    }

    #[test]
    fn rerun_edits_only_the_given_parameters() {
        let td = tempdir().unwrap();
        let mut wb = bench(td.path());
        wb.add_dataset(blobs("b")).unwrap();
        let first = wb
            .run(RunRequest {
                dataset: "b".into(),
                algorithm: "Agglomerative clustering".into(),
                params: set(&[("n_clusters", "3"), ("linkage", "average")]),
                scores: vec!["Silhouette".into()],
                ..Default::default()
            })
            .unwrap();
        let second = wb
            .rerun(&first.to_string(), set(&[("n_clusters", "2")]), true, false)
            .unwrap();
        assert!(wb.executor().get(first).is_err());
        let cfg = wb.executor().get(second).unwrap().config().clone();
        assert_eq!(cfg.params.to_raw(), set(&[("n_clusters", "2"), ("linkage", "average")]));
        assert_eq!(cfg.scores.len(), 1);

        let err = wb
            .rerun(&second.to_string(), set(&[("n_clusters", "2")]), false, true)
            .unwrap_err();
        assert!(matches!(lab_error(&err), LabError::DuplicateRun { .. }));
    }

    #[test]
    fn shared_run_name_is_refused_until_a_handle_is_given() {
        let td = tempdir().unwrap();
        let mut wb = bench(td.path());
        wb.add_dataset(blobs("b")).unwrap();
        let request = || RunRequest {
            dataset: "b".into(),
            algorithm: "K-means".into(),
            scores: vec!["Silhouette".into()],
            ..Default::default()
        };
        let first = wb.run(request()).unwrap();
        let second = wb.run(request()).unwrap();

        let err = wb.remove_run("K-means").unwrap_err();
        assert!(matches!(lab_error(&err), LabError::Ambiguous { .. }));
        let err = wb.rerun("K-means", BTreeMap::new(), true, false).unwrap_err();
        assert!(matches!(lab_error(&err), LabError::Ambiguous { .. }));
        assert_eq!(wb.executor().len(), 2);

        wb.remove_run(&first.to_string()).unwrap();
        assert_eq!(wb.resolve_run("K-means").unwrap(), second);
    }

    #[test]
    fn bad_input_is_reported_before_anything_runs() {
        let td = tempdir().unwrap();
        let mut wb = bench(td.path());
        wb.add_dataset(blobs("b")).unwrap();
        let err = wb
            .run(RunRequest {
                dataset: "b".into(),
                algorithm: "K-means".into(),
                params: set(&[("n_clusters", "many")]),
                ..Default::default()
            })
            .unwrap_err();
        assert!(lab_error(&err).is_parameter_error());
        let err = wb
            .run(RunRequest {
                dataset: "nope".into(),
                algorithm: "K-means".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(lab_error(&err), LabError::NotFound { kind: "dataset", .. }));
        assert!(wb.executor().is_empty());
    }

    #[test]
    fn plugins_in_the_search_path_are_picked_up_on_open() {
        let td = tempdir().unwrap();
        let plugins = td.path().join("plugins");
        std::fs::create_dir_all(&plugins).unwrap();
        std::fs::write(
            plugins.join("extra.json"),
            r#"{"algorithms":[{"name":"Single link","kernel":"agglomerative","fixed":{"linkage":"single"}}]}"#,
        )
        .unwrap();
        std::fs::write(plugins.join("broken.json"), "{}").unwrap();
        let wb = bench(td.path());
        assert!(wb.catalog().algorithms.find_by_name("Single link").is_some());
        assert_eq!(wb.catalog().algorithms.len(), 4);
    }
}

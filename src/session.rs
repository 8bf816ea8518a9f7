//! Durable snapshot of runs and configuration templates.
//!
//! Everything on disk is addressed by name: handles are renumbered on every
//! start, so loading re-resolves names against whatever the live catalog
//! holds and silently drops what no longer resolves.

use crate::engine::{Catalog, RunExecutor};
use crate::error::LabResult;
use crate::model::{AlgoConfig, AppMode, Label, RunConfig, RunResult};
use crate::params::ParamValues;
use crate::registry::Named;
use crate::storage::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// On-disk form of a whole session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFile {
    /// Absent means no session was ever started in this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AppMode>,
    /// Dataset name → runs computed on it.
    #[serde(default)]
    pub data: BTreeMap<String, Vec<RunRecord>>,
    #[serde(default)]
    pub algo_configs: Vec<ConfigRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_config_name: String,
    pub algorithm_name: String,
    #[serde(default)]
    pub params: ParamValues,
    /// Scores asked for, including those that produced no value.
    #[serde(default)]
    pub requested_scores: Vec<String>,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    pub cluster_labels: Vec<Label>,
    #[serde(default, with = "humantime_serde")]
    pub elapsed: Duration,
    #[serde(default)]
    pub timestamp_utc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub algo_config_name: String,
    pub algo_name: String,
    #[serde(default)]
    pub params: ParamValues,
}

/// What a load restored and what it had to leave behind.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub mode: Option<AppMode>,
    pub runs: usize,
    pub configs: usize,
    pub skipped: Vec<String>,
}

impl LoadReport {
    pub fn has_session(&self) -> bool {
        self.mode.is_some()
    }

    fn skip(&mut self, reason: String) {
        info!("session restore: {reason}");
        self.skipped.push(reason);
    }
}

impl RunRecord {
    /// Name-addressed form of a live result.
    pub fn from_result(catalog: &Catalog, run: &RunResult) -> LabResult<Self> {
        let config = run.config();
        let algorithm = catalog.algorithms.get(config.algorithm)?;
        let mut requested_scores = Vec::with_capacity(config.scores.len());
        for id in &config.scores {
            requested_scores.push(catalog.scores.get(*id)?.name().to_string());
        }
        Ok(Self {
            run_config_name: config.name.clone(),
            algorithm_name: algorithm.name().to_string(),
            params: config.params.clone(),
            requested_scores,
            scores: run.scores().clone(),
            cluster_labels: run.labels().to_vec(),
            elapsed: run.elapsed(),
            timestamp_utc: run.timestamp_utc().to_string(),
        })
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(
        catalog: &Catalog,
        executor: &RunExecutor,
        mode: AppMode,
    ) -> LabResult<SessionFile> {
        let mut file = SessionFile {
            mode: Some(mode),
            ..Default::default()
        };
        for (_, run) in executor.results() {
            let dataset = catalog.datasets.get(run.config().dataset)?;
            file.data
                .entry(dataset.name().to_string())
                .or_default()
                .push(RunRecord::from_result(catalog, run)?);
        }
        for (_, cfg) in catalog.configs.iter() {
            file.algo_configs.push(ConfigRecord {
                algo_config_name: cfg.name.clone(),
                algo_name: catalog.algorithms.get(cfg.algorithm)?.name().to_string(),
                params: cfg.params.clone(),
            });
        }
        Ok(file)
    }

    pub fn save(&self, catalog: &Catalog, executor: &RunExecutor, mode: AppMode) -> LabResult<()> {
        let file = Self::snapshot(catalog, executor, mode)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &json)?;
        info!(
            path = %self.path.display(),
            runs = executor.len(),
            configs = file.algo_configs.len(),
            %mode,
            "session saved"
        );
        Ok(())
    }

    /// Replace live runs and templates with what the file holds.
    ///
    /// A missing file, or one without a mode, leaves the state empty and is
    /// reported through [`LoadReport::has_session`]. A file that cannot be
    /// parsed is an error and leaves the state untouched.
    pub fn load(&self, catalog: &mut Catalog, executor: &mut RunExecutor) -> LabResult<LoadReport> {
        let file = match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str::<SessionFile>(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionFile::default(),
            Err(e) => return Err(e.into()),
        };
        executor.clear();
        catalog.configs.clear();
        Ok(restore(file, catalog, executor))
    }
}

/// Best-effort reconciliation of a parsed session against the live catalog.
pub fn restore(file: SessionFile, catalog: &mut Catalog, executor: &mut RunExecutor) -> LoadReport {
    let mut report = LoadReport {
        mode: file.mode,
        ..Default::default()
    };
    if file.mode.is_none() {
        debug!("no session stored");
        return report;
    }
    let datasets = catalog.datasets.name_index();
    let algorithms = catalog.algorithms.name_index();
    let scores = catalog.scores.name_index();

    for (dataset_name, records) in file.data {
        let Some(&dataset_id) = datasets.get(&dataset_name) else {
            report.skip(format!(
                "{} run(s) on missing dataset `{dataset_name}`",
                records.len()
            ));
            continue;
        };
        let n_samples = match catalog.datasets.get(dataset_id) {
            Ok(ds) => ds.n_samples(),
            Err(_) => continue,
        };
        for record in records {
            let run_name = record.run_config_name.clone();
            let Some(&algorithm_id) = algorithms.get(&record.algorithm_name) else {
                report.skip(format!(
                    "run `{run_name}`: algorithm `{}` is not registered",
                    record.algorithm_name
                ));
                continue;
            };
            if record.cluster_labels.len() != n_samples {
                report.skip(format!(
                    "run `{run_name}`: {} labels but `{dataset_name}` now has {n_samples} rows",
                    record.cluster_labels.len()
                ));
                continue;
            }
            let params = match catalog
                .algorithms
                .get(algorithm_id)
                .and_then(|a| a.schema().validate(&record.params))
            {
                Ok(p) => p,
                Err(e) => {
                    report.skip(format!("run `{run_name}`: {e}"));
                    continue;
                }
            };
            let mut score_ids = Vec::with_capacity(record.requested_scores.len());
            for name in &record.requested_scores {
                match scores.get(name) {
                    Some(id) => score_ids.push(*id),
                    None => debug!(run = %run_name, score = %name, "dropping unknown score"),
                }
            }
            let config = RunConfig {
                name: record.run_config_name,
                dataset: dataset_id,
                algorithm: algorithm_id,
                params,
                scores: score_ids,
            };
            executor.adopt(RunResult::new(
                config,
                record.cluster_labels,
                record.scores,
                record.elapsed,
                record.timestamp_utc,
            ));
            report.runs += 1;
        }
    }

    for cfg in file.algo_configs {
        let Some(&algorithm) = algorithms.get(&cfg.algo_name) else {
            report.skip(format!(
                "configuration `{}`: algorithm `{}` is not registered",
                cfg.algo_config_name, cfg.algo_name
            ));
            continue;
        };
        if catalog.configs.find_by_name(&cfg.algo_config_name).is_some() {
            warn!(config = %cfg.algo_config_name, "duplicate configuration name in session");
            continue;
        }
        let params = match catalog
            .algorithms
            .get(algorithm)
            .and_then(|a| a.schema().validate(&cfg.params))
        {
            Ok(p) => p,
            Err(e) => {
                report.skip(format!("configuration `{}`: {e}", cfg.algo_config_name));
                continue;
            }
        };
        catalog.configs.insert(AlgoConfig {
            name: cfg.algo_config_name,
            algorithm,
            params,
        });
        report.configs += 1;
    }
    info!(
        runs = report.runs,
        configs = report.configs,
        skipped = report.skipped.len(),
        "session restored"
    );
    report
}

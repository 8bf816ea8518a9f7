//! Post-run processing utilities.
//!
//! Handles auto-save, exports and the text summary after a run completes.

use super::workbench::Workbench;
use crate::model::RunId;
use crate::session::RunRecord;
use crate::storage;
use crate::text_summary::{self, TextSummary};
use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub summary: TextSummary,
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PostRunOptions<'a> {
    pub auto_save: bool,
    pub export_json: Option<&'a Path>,
    pub export_csv: Option<&'a Path>,
}

/// JSON export form of one run.
#[derive(Serialize)]
struct ExportedRun<'a> {
    dataset_name: &'a str,
    #[serde(flatten)]
    run: RunRecord,
}

/// Write the session back if enabled. A failed save is logged, not fatal.
pub(crate) fn auto_save(wb: &Workbench, enabled: bool) -> Option<PathBuf> {
    if !enabled {
        return None;
    }
    match wb.save_session() {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("auto-save failed: {e:#}");
            None
        }
    }
}

pub(crate) fn export_json(wb: &Workbench, id: RunId, path: &Path) -> Result<()> {
    let catalog = wb.catalog();
    let run = wb.executor().get(id)?;
    let dataset = catalog.datasets.get(run.config().dataset)?;
    let record = ExportedRun {
        dataset_name: crate::registry::Named::name(dataset),
        run: RunRecord::from_result(catalog, run)?,
    };
    storage::export_json(path, &record)
}

pub(crate) fn export_csv(wb: &Workbench, id: RunId, path: &Path) -> Result<()> {
    let run = wb.executor().get(id)?;
    let dataset = wb.catalog().datasets.get(run.config().dataset)?;
    storage::export_csv(path, dataset, run)
}

/// Process a completed run: auto-save, export and summarise.
pub(crate) fn process_run_completion(
    wb: &Workbench,
    id: RunId,
    opts: PostRunOptions<'_>,
) -> Result<ProcessedRun> {
    let run = wb.executor().get(id)?;
    let summary = text_summary::build_run_summary(wb.catalog(), id, run);

    let auto_saved_path = auto_save(wb, opts.auto_save);

    let mut export_messages = Vec::new();
    if let Some(export_path) = opts.export_json {
        match export_json(wb, id, export_path) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(export_path) = opts.export_csv {
        match export_csv(wb, id, export_path) {
            Ok(_) => export_messages.push(format!("Exported CSV: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }

    Ok(ProcessedRun {
        summary,
        export_messages,
        auto_saved_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::workbench::{RunRequest, WorkspacePaths};
    use crate::storage::{generate_blobs, BlobOptions};
    use tempfile::tempdir;

    #[test]
    fn completion_saves_and_exports() {
        let td = tempdir().unwrap();
        let paths = WorkspacePaths::resolve(Some(td.path().to_path_buf()), None).unwrap();
        let mut wb = Workbench::open(paths).unwrap();
        let ds = generate_blobs(&BlobOptions {
            name: "b".into(),
            n_samples: 12,
            seed: Some(3),
            ..Default::default()
        })
        .unwrap();
        wb.add_dataset(ds).unwrap();
        let id = wb
            .run(RunRequest {
                dataset: "b".into(),
                algorithm: "K-means".into(),
                scores: vec!["Rand".into()],
                ..Default::default()
            })
            .unwrap();

        let json = td.path().join("run.json");
        let csv = td.path().join("run.csv");
        let processed = process_run_completion(
            &wb,
            id,
            PostRunOptions {
                auto_save: true,
                export_json: Some(&json),
                export_csv: Some(&csv),
            },
        )
        .unwrap();
        assert_eq!(processed.export_messages.len(), 2);
        assert!(processed.export_messages.iter().all(|m| m.starts_with("Exported")));
        assert_eq!(processed.auto_saved_path.as_deref(), Some(wb.paths().session.as_path()));
        assert!(wb.paths().session.exists());

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["dataset_name"], "b");
        assert_eq!(value["algorithm_name"], "K-means");
        assert_eq!(value["cluster_labels"].as_array().unwrap().len(), 12);
        let header = std::fs::read_to_string(&csv).unwrap();
        assert!(header.starts_with("Feature 1,Feature 2,cluster"));
    }
}

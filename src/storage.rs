//! Dataset files, the dataset manifest and run exports.
//!
//! Layout of the dataset directory:
//! - `datasets.json`: ordered manifest, one entry per dataset;
//! - `<file>.csv`: header row, optional title column, one column per feature.

use crate::error::{LabError, LabResult};
use crate::model::{Dataset, Label, Matrix, RunResult};
use crate::registry::Named;
use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MANIFEST: &str = "datasets.json";

/// Header used for the title column when the dataset does not name one.
const DEFAULT_TITLE_COLUMN: &str = "title";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    file: String,
    num_of_classes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<Vec<Label>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title_column: Option<String>,
}

pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Every dataset in manifest order. Entries whose file has disappeared
    /// are dropped from the manifest; unreadable files are skipped.
    pub fn load_all(&self) -> LabResult<Vec<Dataset>> {
        let entries = self.read_manifest()?;
        let listed = entries.len();
        let mut kept = Vec::with_capacity(entries.len());
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = self.dir.join(&entry.file);
            if !path.exists() {
                warn!(
                    dataset = %entry.name,
                    file = %path.display(),
                    "dataset file missing, pruning manifest entry"
                );
                continue;
            }
            match read_dataset_file(&path, &entry) {
                Ok(ds) => out.push(ds),
                Err(e) => warn!(dataset = %entry.name, "skipping unreadable dataset: {e}"),
            }
            kept.push(entry);
        }
        if kept.len() != listed {
            self.write_manifest(&kept)?;
        }
        debug!(count = out.len(), "datasets loaded");
        Ok(out)
    }

    /// Write the dataset file and append it to the manifest. A taken name is
    /// refused before anything is written.
    pub fn add(&self, dataset: &Dataset) -> LabResult<()> {
        let mut entries = self.read_manifest()?;
        if entries.iter().any(|e| e.name == dataset.name()) {
            return Err(LabError::DuplicateName {
                kind: "dataset",
                name: dataset.name().to_string(),
            });
        }
        let taken: BTreeSet<&str> = entries.iter().map(|e| e.file.as_str()).collect();
        let file = file_name_for(dataset.name(), &taken);
        std::fs::create_dir_all(&self.dir)?;
        write_dataset_file(&self.dir.join(&file), dataset)?;
        entries.push(ManifestEntry {
            name: dataset.name().to_string(),
            file,
            num_of_classes: dataset.num_of_classes(),
            target: dataset.target().map(<[Label]>::to_vec),
            title_column: dataset.titles().map(|_| DEFAULT_TITLE_COLUMN.to_string()),
        });
        self.write_manifest(&entries)?;
        info!(dataset = %dataset.name(), samples = dataset.n_samples(), "dataset added");
        Ok(())
    }

    /// Returns whether the dataset was known.
    pub fn delete(&self, name: &str) -> LabResult<bool> {
        let mut entries = self.read_manifest()?;
        let Some(pos) = entries.iter().position(|e| e.name == name) else {
            return Ok(false);
        };
        let entry = entries.remove(pos);
        self.write_manifest(&entries)?;
        match std::fs::remove_file(self.dir.join(&entry.file)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(dataset = %name, "dataset removed");
        Ok(true)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST)
    }

    fn read_manifest(&self) -> LabResult<Vec<ManifestEntry>> {
        match std::fs::read_to_string(self.manifest_path()) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_manifest(&self, entries: &[ManifestEntry]) -> LabResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.manifest_path(), &json)?;
        Ok(())
    }
}

/// Keep names readable on disk while staying a single path component.
fn file_name_for(name: &str, taken: &BTreeSet<&str>) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut candidate = format!("{stem}.csv");
    let mut n = 2;
    while taken.contains(candidate.as_str()) {
        candidate = format!("{stem}-{n}.csv");
        n += 1;
    }
    candidate
}

/// Write `bytes` next to `path` first, then move it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

fn write_dataset_file(path: &Path, dataset: &Dataset) -> LabResult<()> {
    let mut w = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = Vec::with_capacity(dataset.data().n_features() + 1);
    if dataset.titles().is_some() {
        header.push(DEFAULT_TITLE_COLUMN);
    }
    header.extend(dataset.feature_names().iter().map(String::as_str));
    w.write_record(&header)?;
    for (i, row) in dataset.data().rows().enumerate() {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        if let Some(titles) = dataset.titles() {
            record.push(titles[i].clone());
        }
        record.extend(row.iter().map(f64::to_string));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

fn read_dataset_file(path: &Path, entry: &ManifestEntry) -> LabResult<Dataset> {
    let table = read_csv(path)?;
    let title_idx = match &entry.title_column {
        Some(col) => Some(table.column_index(col)?),
        None => None,
    };
    let features: Vec<usize> = (0..table.headers.len())
        .filter(|i| Some(*i) != title_idx)
        .collect();
    let data = table.matrix(&features)?;
    let titles = title_idx.map(|i| table.column(i).map(str::to_string).collect());
    let feature_names = features.iter().map(|i| table.headers[*i].clone()).collect();
    Dataset::new(
        entry.name.clone(),
        data,
        Some(entry.num_of_classes),
        entry.target.clone(),
        Some(feature_names),
        titles,
    )
}

/// A tabular file as read, before any column is interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn read_csv(path: &Path) -> LabResult<CsvTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(CsvTable { headers, rows })
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> LabResult<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LabError::not_found("column", name))
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |r| r[idx].as_str())
    }

    /// Columns in which every cell parses as a number.
    pub fn numeric_columns(&self) -> Vec<usize> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        (0..self.headers.len())
            .filter(|&i| self.column(i).all(|c| c.parse::<f64>().is_ok()))
            .collect()
    }

    fn matrix(&self, columns: &[usize]) -> LabResult<Matrix> {
        let mut rows = Vec::with_capacity(self.rows.len());
        for (r, row) in self.rows.iter().enumerate() {
            let mut values = Vec::with_capacity(columns.len());
            for &c in columns {
                let cell = &row[c];
                let v = cell.parse::<f64>().map_err(|_| {
                    LabError::Dataset(format!(
                        "row {}, column `{}`: `{cell}` is not a number",
                        r + 1,
                        self.headers[c]
                    ))
                })?;
                values.push(v);
            }
            rows.push(values);
        }
        Matrix::from_rows(rows)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub name: String,
    /// Feature columns; all numeric columns when `None`.
    pub columns: Option<Vec<String>>,
    pub title_column: Option<String>,
    pub target_column: Option<String>,
    pub num_of_classes: Option<usize>,
    pub normalise: bool,
}

/// Build a dataset from a table according to `opts`.
pub fn import(table: &CsvTable, opts: &ImportOptions) -> LabResult<Dataset> {
    if table.rows.is_empty() {
        return Err(LabError::Dataset("the file has no data rows".into()));
    }
    let title_idx = opts
        .title_column
        .as_deref()
        .map(|c| table.column_index(c))
        .transpose()?;
    let target_idx = opts
        .target_column
        .as_deref()
        .map(|c| table.column_index(c))
        .transpose()?;

    let numeric = table.numeric_columns();
    let features: Vec<usize> = match &opts.columns {
        Some(cols) => {
            let mut idx = Vec::with_capacity(cols.len());
            for c in cols {
                let i = table.column_index(c)?;
                if !numeric.contains(&i) {
                    return Err(LabError::Dataset(format!("column `{c}` is not numeric")));
                }
                idx.push(i);
            }
            idx
        }
        None => numeric
            .into_iter()
            .filter(|i| Some(*i) != title_idx && Some(*i) != target_idx)
            .collect(),
    };
    if features.is_empty() {
        return Err(LabError::Dataset("no numeric feature columns selected".into()));
    }

    let mut data = table.matrix(&features)?;
    if opts.normalise {
        data = data.normalised();
    }
    let target = match target_idx {
        Some(i) => {
            let mut labels = Vec::with_capacity(table.rows.len());
            for cell in table.column(i) {
                let l = cell.parse::<Label>().map_err(|_| {
                    LabError::Dataset(format!("target `{cell}` is not an integer label"))
                })?;
                labels.push(l);
            }
            Some(labels)
        }
        None => None,
    };
    let titles = title_idx.map(|i| table.column(i).map(str::to_string).collect());
    let feature_names = features.iter().map(|i| table.headers[*i].clone()).collect();
    Dataset::new(
        opts.name.clone(),
        data,
        opts.num_of_classes,
        target,
        Some(feature_names),
        titles,
    )
}

#[derive(Debug, Clone)]
pub struct BlobOptions {
    pub name: String,
    pub n_samples: usize,
    pub n_features: usize,
    pub centers: usize,
    pub cluster_std: f64,
    /// Random when `None`.
    pub seed: Option<u64>,
    pub normalise: bool,
}

impl Default for BlobOptions {
    fn default() -> Self {
        Self {
            name: "blobs".into(),
            n_samples: 100,
            n_features: 2,
            centers: 3,
            cluster_std: 1.0,
            seed: None,
            normalise: false,
        }
    }
}

/// Isotropic gaussian blobs around centers drawn from `[-10, 10)`; the
/// target is the blob index.
pub fn generate_blobs(opts: &BlobOptions) -> LabResult<Dataset> {
    if opts.n_samples == 0 || opts.n_features == 0 || opts.centers == 0 {
        return Err(LabError::Dataset(
            "samples, features and centers must all be positive".into(),
        ));
    }
    if opts.centers > opts.n_samples {
        return Err(LabError::Dataset(format!(
            "{} centers for {} samples",
            opts.centers, opts.n_samples
        )));
    }
    if !(opts.cluster_std.is_finite() && opts.cluster_std >= 0.0) {
        return Err(LabError::Dataset(
            "cluster_std must be a non-negative number".into(),
        ));
    }
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let noise = Normal::new(0.0, opts.cluster_std)
        .map_err(|e| LabError::Dataset(format!("cluster_std: {e}")))?;
    let centers: Vec<Vec<f64>> = (0..opts.centers)
        .map(|_| (0..opts.n_features).map(|_| rng.gen_range(-10.0..10.0)).collect())
        .collect();

    let mut rows = Vec::with_capacity(opts.n_samples);
    let mut target = Vec::with_capacity(opts.n_samples);
    for (c, center) in centers.iter().enumerate() {
        let count = opts.n_samples / opts.centers + usize::from(c < opts.n_samples % opts.centers);
        for _ in 0..count {
            rows.push(
                center
                    .iter()
                    .map(|m| m + noise.sample(&mut rng))
                    .collect(),
            );
            target.push(c as Label);
        }
    }
    let mut data = Matrix::from_rows(rows)?;
    if opts.normalise {
        data = data.normalised();
    }
    Dataset::new(opts.name.clone(), data, None, Some(target), None, None)
}

/// Features (and titles, if any) with the predicted label appended as `cluster`.
pub fn export_csv(path: &Path, dataset: &Dataset, run: &RunResult) -> Result<()> {
    anyhow::ensure!(
        run.labels().len() == dataset.n_samples(),
        "run has {} labels but dataset `{}` has {} rows",
        run.labels().len(),
        dataset.name(),
        dataset.n_samples()
    );
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("create {}", path.display()))?;
    let mut header: Vec<&str> = Vec::new();
    if dataset.titles().is_some() {
        header.push(DEFAULT_TITLE_COLUMN);
    }
    header.extend(dataset.feature_names().iter().map(String::as_str));
    header.push("cluster");
    w.write_record(&header)?;
    for (i, row) in dataset.data().rows().enumerate() {
        let mut record: Vec<String> = Vec::with_capacity(header.len());
        if let Some(titles) = dataset.titles() {
            record.push(titles[i].clone());
        }
        record.extend(row.iter().map(f64::to_string));
        record.push(run.labels()[i].to_string());
        w.write_record(&record)?;
    }
    w.flush().context("flush csv")?;
    Ok(())
}

pub fn export_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("serialize run")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample(name: &str) -> Dataset {
        let data = Matrix::from_rows(vec![vec![0.0, 1.5], vec![2.0, 3.0], vec![4.0, 4.5]]).unwrap();
        Dataset::new(
            name,
            data,
            None,
            Some(vec![0, 1, 1]),
            Some(vec!["x".into(), "y".into()]),
            Some(vec!["a".into(), "b".into(), "c".into()]),
        )
        .unwrap()
    }

    #[test]
    fn add_then_load_round_trips() {
        let td = tempdir().unwrap();
        let store = DatasetStore::new(td.path());
        store.add(&sample("iris/small")).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![sample("iris/small")]);
        assert!(td.path().join("iris_small.csv").exists());
    }

    #[test]
    fn duplicate_name_writes_nothing() {
        let td = tempdir().unwrap();
        let store = DatasetStore::new(td.path());
        store.add(&sample("d")).unwrap();
        let manifest_before = fs::read_to_string(td.path().join(MANIFEST)).unwrap();
        let err = store.add(&sample("d")).unwrap_err();
        assert!(matches!(err, LabError::DuplicateName { kind: "dataset", .. }));
        assert_eq!(
            fs::read_to_string(td.path().join(MANIFEST)).unwrap(),
            manifest_before
        );
        assert!(!td.path().join("d-2.csv").exists());
    }

    #[test]
    fn missing_files_are_pruned_from_the_manifest() {
        let td = tempdir().unwrap();
        let store = DatasetStore::new(td.path());
        store.add(&sample("keep")).unwrap();
        store.add(&sample("gone")).unwrap();
        fs::remove_file(td.path().join("gone.csv")).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        let manifest = fs::read_to_string(td.path().join(MANIFEST)).unwrap();
        assert!(manifest.contains("keep") && !manifest.contains("gone"));
    }

    #[test]
    fn delete_removes_file_and_entry() {
        let td = tempdir().unwrap();
        let store = DatasetStore::new(td.path());
        store.add(&sample("d")).unwrap();
        assert!(store.delete("d").unwrap());
        assert!(!store.delete("d").unwrap());
        assert!(!td.path().join("d.csv").exists());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn import_picks_numeric_columns_title_and_target() {
        let td = tempdir().unwrap();
        let path = td.path().join("in.csv");
        fs::write(
            &path,
            "name,a,b,class\nfirst,1,10,0\nsecond,2,20,1\nthird,3,40,1\n",
        )
        .unwrap();
        let table = read_csv(&path).unwrap();
        assert_eq!(table.numeric_columns(), vec![1, 2, 3]);

        let ds = import(
            &table,
            &ImportOptions {
                name: "t".into(),
                title_column: Some("name".into()),
                target_column: Some("class".into()),
                normalise: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ds.feature_names(), ["a", "b"]);
        assert_eq!(ds.num_of_classes(), 2);
        assert_eq!(ds.titles().unwrap()[1], "second");
        assert_eq!(ds.data().column(1).collect::<Vec<_>>(), vec![0.0, 1.0 / 3.0, 1.0]);

        let err = import(
            &table,
            &ImportOptions {
                name: "t".into(),
                columns: Some(vec!["name".into()]),
                num_of_classes: Some(2),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, LabError::Dataset(_)));

        // neither a target nor a hint
        assert!(import(
            &table,
            &ImportOptions {
                name: "t".into(),
                ..Default::default()
            }
        )
        .is_err());
    }

    #[test]
    fn blobs_are_reproducible_with_a_seed() {
        let opts = BlobOptions {
            n_samples: 31,
            centers: 3,
            seed: Some(7),
            ..Default::default()
        };
        let a = generate_blobs(&opts).unwrap();
        let b = generate_blobs(&opts).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_samples(), 31);
        assert_eq!(a.num_of_classes(), 3);
        assert_eq!(a.target().unwrap().iter().filter(|l| **l == 0).count(), 11);
        assert!(generate_blobs(&BlobOptions {
            centers: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn blob_noise_follows_cluster_std() {
        let tight = generate_blobs(&BlobOptions {
            n_samples: 20,
            centers: 2,
            cluster_std: 0.0,
            seed: Some(3),
            ..Default::default()
        })
        .unwrap();
        let target = tight.target().unwrap();
        for (i, row) in tight.data().rows().enumerate() {
            let first = target.iter().position(|l| *l == target[i]).unwrap();
            assert_eq!(row, tight.data().row(first));
        }

        let wide = generate_blobs(&BlobOptions {
            n_samples: 4000,
            n_features: 1,
            centers: 1,
            cluster_std: 2.0,
            seed: Some(11),
            ..Default::default()
        })
        .unwrap();
        let xs: Vec<f64> = wide.data().rows().map(|r| r[0]).collect();
        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!((var.sqrt() - 2.0).abs() < 0.15, "std {}", var.sqrt());
    }

    #[test]
    fn exported_csv_appends_cluster_column() {
        let td = tempdir().unwrap();
        let ds = sample("d");
        let config = crate::model::RunConfig {
            name: "r".into(),
            dataset: crate::registry::Id::from_raw_for_tests(1),
            algorithm: crate::registry::Id::from_raw_for_tests(1),
            params: Default::default(),
            scores: Vec::new(),
        };
        let run = RunResult::new(
            config,
            vec![1, 0, 1],
            Default::default(),
            std::time::Duration::from_millis(3),
            "now".into(),
        );
        let path = td.path().join("out.csv");
        export_csv(&path, &ds, &run).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("title,x,y,cluster"));
        assert_eq!(lines.next(), Some("a,0,1.5,1"));
        assert_eq!(lines.count(), 2);
    }
}

//! Loading algorithm definitions from plugin files.
//!
//! A plugin is a JSON document that exposes a list named `algorithms`. Each
//! entry names an algorithm, declares its parameter schema, picks one of the
//! built-in kernels as its body and may pin some call arguments:
//!
//! ```json
//! { "algorithms": [
//!     { "name": "Ward (5)", "kernel": "agglomerative",
//!       "params": [ { "name": "metric", "type": "choice", "options": ["euclidean"] } ],
//!       "fixed": { "linkage": "ward", "n_clusters": 5 } }
//! ] }
//! ```
//!
//! Registration is all-or-nothing: on any failure nothing is registered and a
//! file copied into the search path is removed again.

use crate::algorithms;
use crate::error::{LabError, LabResult};
use crate::model::{Algorithm, AlgorithmId, ClusterAlgorithm, Label, Matrix};
use crate::params::{CallArgs, ParamValue, ParamValues, ParameterSchema, TypedValue};
use crate::registry::{Named, Registry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the collection every plugin must expose.
pub const CONTRACT_KEY: &str = "algorithms";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmDescriptor {
    pub name: String,
    pub kernel: String,
    #[serde(default)]
    pub params: ParameterSchema,
    #[serde(default)]
    pub fixed: BTreeMap<String, Option<TypedValue>>,
}

/// A built-in kernel with plugin-pinned arguments layered over user input.
struct BoundKernel {
    kernel: Arc<dyn ClusterAlgorithm>,
    fixed: BTreeMap<String, Option<TypedValue>>,
}

impl ClusterAlgorithm for BoundKernel {
    fn cluster(&self, data: &Matrix, args: &CallArgs) -> anyhow::Result<Vec<Label>> {
        let args = args.clone().with_fixed(&self.fixed);
        self.kernel.cluster(data, &args)
    }
}

pub struct PluginLoader {
    search_path: PathBuf,
}

impl PluginLoader {
    pub fn new(search_path: impl Into<PathBuf>) -> Self {
        Self {
            search_path: search_path.into(),
        }
    }

    pub fn search_path(&self) -> &Path {
        &self.search_path
    }

    /// Parse one plugin file into algorithm definitions without registering them.
    pub fn load(&self, source: &Path) -> LabResult<Vec<Algorithm>> {
        let source_name = file_name(source);
        let text = std::fs::read_to_string(source)?;
        let doc: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| LabError::contract(&source_name, format!("not valid JSON: {e}")))?;
        let Some(list) = doc.get(CONTRACT_KEY) else {
            return Err(LabError::contract(
                &source_name,
                format!("no `{CONTRACT_KEY}` collection exposed"),
            ));
        };
        let descriptors: Vec<AlgorithmDescriptor> = serde_json::from_value(list.clone())
            .map_err(|e| LabError::contract(&source_name, e.to_string()))?;

        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(descriptors.len());
        for desc in descriptors {
            if !seen.insert(desc.name.clone()) {
                return Err(LabError::DuplicateName {
                    kind: "algorithm",
                    name: desc.name,
                });
            }
            out.push(build(&source_name, desc)?);
        }
        debug!(source = %source_name, count = out.len(), "plugin parsed");
        Ok(out)
    }

    /// Install `source` into the search path and register its algorithms.
    ///
    /// Fails with `DuplicateName` if any new name is already registered; in
    /// that case, and on any other failure, the registry is left untouched and
    /// the file is removed from the search path. A file from the search path
    /// whose algorithms are already registered is refused and kept.
    pub fn load_and_register(
        &self,
        source: &Path,
        registry: &mut Registry<Algorithm>,
    ) -> LabResult<Vec<AlgorithmId>> {
        let source_name = file_name(source);
        let dest = self.search_path.join(&source_name);
        let already_installed = same_file(source, &dest);
        if already_installed {
            if registry.iter().any(|(_, a)| a.origin() == source_name) {
                return Err(LabError::DuplicateName {
                    kind: "plugin",
                    name: source_name,
                });
            }
        } else {
            if dest.exists() {
                return Err(LabError::DuplicateName {
                    kind: "plugin file",
                    name: source_name,
                });
            }
            std::fs::create_dir_all(&self.search_path)?;
            std::fs::copy(source, &dest)?;
        }

        match self.load(&dest).and_then(|algos| check_names(&algos, registry).map(|_| algos)) {
            Ok(algos) => Ok(register(&source_name, algos, registry)),
            Err(e) => {
                match std::fs::remove_file(&dest) {
                    Ok(()) => warn!(
                        source = %source_name,
                        path = %dest.display(),
                        "plugin rejected and removed from the search path: {e}"
                    ),
                    Err(rm) => warn!(
                        path = %dest.display(),
                        "plugin rejected ({e}); could not remove it: {rm}"
                    ),
                }
                Err(e)
            }
        }
    }

    /// Register every `*.json` plugin in the search path, in file name order.
    /// Broken files are skipped; their errors are returned for reporting.
    pub fn load_search_path(&self, registry: &mut Registry<Algorithm>) -> Vec<(String, LabError)> {
        let mut failures = Vec::new();
        let mut files: Vec<PathBuf> = match std::fs::read_dir(&self.search_path) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return failures,
            Err(e) => {
                failures.push((self.search_path.display().to_string(), e.into()));
                return failures;
            }
        };
        files.sort();
        for path in files {
            let name = file_name(&path);
            let outcome = self
                .load(&path)
                .and_then(|algos| check_names(&algos, registry).map(|_| algos));
            match outcome {
                Ok(algos) => {
                    register(&name, algos, registry);
                }
                Err(e) => {
                    warn!(plugin = %name, "skipping plugin: {e}");
                    failures.push((name, e));
                }
            }
        }
        failures
    }
}

fn build(source_name: &str, desc: AlgorithmDescriptor) -> LabResult<Algorithm> {
    let kernel = algorithms::kernel(&desc.kernel).ok_or_else(|| {
        LabError::contract(
            source_name,
            format!(
                "algorithm `{}` uses unknown kernel `{}` (known: {})",
                desc.name,
                desc.kernel,
                algorithms::KERNELS.join(", ")
            ),
        )
    })?;
    let schema = ParameterSchema::new(desc.params.params().to_vec())
        .map_err(|e| LabError::contract(source_name, format!("`{}`: {e}", desc.name)))?;
    if let Some(k) = desc.fixed.keys().find(|k| schema.get(k).is_some()) {
        return Err(LabError::contract(
            source_name,
            format!("`{}`: `{k}` is both fixed and declared", desc.name),
        ));
    }
    let fixed = check_fixed(&desc.kernel, &desc.fixed).map_err(|e| {
        LabError::contract(source_name, format!("`{}`: fixed arguments: {e}", desc.name))
    })?;
    let body = BoundKernel { kernel, fixed };
    Ok(Algorithm::new(desc.name, schema, Arc::new(body), source_name))
}

/// Fixed arguments must be ones the kernel understands, of the right kind.
fn check_fixed(
    kernel: &str,
    fixed: &BTreeMap<String, Option<TypedValue>>,
) -> LabResult<BTreeMap<String, Option<TypedValue>>> {
    let schema = algorithms::kernel_schema(kernel)
        .ok_or_else(|| LabError::not_found("kernel", kernel))??;
    let mut values = ParamValues::default();
    for (name, value) in fixed {
        let value = match value {
            Some(v) => ParamValue::ExplicitValue(v.clone()),
            None => ParamValue::ExplicitNull,
        };
        values.set(name, value);
    }
    let checked = schema.validate(&values)?;
    Ok(fixed
        .keys()
        .map(|name| match checked.get(name) {
            ParamValue::ExplicitValue(v) => (name.clone(), Some(v)),
            _ => (name.clone(), None),
        })
        .collect())
}

fn check_names(algos: &[Algorithm], registry: &Registry<Algorithm>) -> LabResult<()> {
    let existing: BTreeSet<String> = registry.names().into_iter().collect();
    match algos.iter().find(|a| existing.contains(a.name())) {
        Some(clash) => Err(LabError::DuplicateName {
            kind: "algorithm",
            name: clash.name().to_string(),
        }),
        None => Ok(()),
    }
}

fn register(
    source_name: &str,
    algos: Vec<Algorithm>,
    registry: &mut Registry<Algorithm>,
) -> Vec<AlgorithmId> {
    let names: Vec<String> = algos.iter().map(|a| a.name().to_string()).collect();
    let ids = algos.into_iter().map(|a| registry.insert(a)).collect();
    info!(plugin = %source_name, algorithms = ?names, "plugin registered");
    ids
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

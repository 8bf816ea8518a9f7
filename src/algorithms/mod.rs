//! Built-in clustering bodies.
//!
//! The experiment core treats these exactly like plugin-supplied algorithms:
//! opaque [`ClusterAlgorithm`] bodies paired with a declared schema. Plugin
//! files refer to them by kernel name.

mod agglomerative;
mod dbscan;
mod kmeans;

use crate::error::LabResult;
use crate::model::{Algorithm, ClusterAlgorithm};
use crate::params::{ParamDecl, ParameterSchema};
use anyhow::{bail, Result};
use std::sync::Arc;

pub use agglomerative::Agglomerative;
pub use dbscan::Dbscan;
pub use kmeans::KMeans;

/// Kernel names accepted in plugin descriptors.
pub const KERNELS: &[&str] = &["kmeans", "agglomerative", "dbscan"];

pub fn kernel(name: &str) -> Option<Arc<dyn ClusterAlgorithm>> {
    match name {
        "kmeans" => Some(Arc::new(KMeans)),
        "agglomerative" => Some(Arc::new(Agglomerative)),
        "dbscan" => Some(Arc::new(Dbscan)),
        _ => None,
    }
}

const METRICS: &[&str] = &["euclidean", "manhattan", "cosine"];

/// Every argument a kernel understands, as the built-in algorithms declare it.
pub fn kernel_schema(name: &str) -> Option<LabResult<ParameterSchema>> {
    let decls = match name {
        "kmeans" => vec![
            ParamDecl::int("n_clusters", Some(1), None).with_help("number of clusters"),
            ParamDecl::int("max_iter", Some(1), None),
            ParamDecl::real("tol", Some(0.0), None),
            ParamDecl::int("n_init", Some(1), None),
            ParamDecl::int("seed", Some(0), None).with_help("None picks a random seed"),
        ],
        "agglomerative" => vec![
            ParamDecl::int("n_clusters", Some(1), None),
            ParamDecl::choice("linkage", &["ward", "complete", "average", "single"]),
            ParamDecl::choice("metric", METRICS),
        ],
        "dbscan" => vec![
            ParamDecl::real("eps", Some(0.0), None),
            ParamDecl::int("min_samples", Some(1), None),
            ParamDecl::choice("metric", METRICS),
        ],
        _ => return None,
    };
    Some(ParameterSchema::new(decls))
}

/// Algorithms registered in every fresh process before plugins are loaded.
pub fn builtin() -> Vec<Algorithm> {
    let mut out = Vec::new();
    for (name, kernel_name) in [
        ("K-means", "kmeans"),
        ("Agglomerative clustering", "agglomerative"),
        ("DBSCAN", "dbscan"),
    ] {
        // Static declarations; a failure here is a typo in this file.
        let (Some(Ok(schema)), Some(body)) = (kernel_schema(kernel_name), kernel(kernel_name))
        else {
            tracing::error!(algorithm = name, "built-in algorithm declaration is invalid");
            continue;
        };
        out.push(Algorithm::new(name, schema, body, "builtin"));
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Metric {
    Euclidean,
    Manhattan,
    Cosine,
}

impl Metric {
    pub(crate) fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "euclidean" | "l2" => Metric::Euclidean,
            "manhattan" | "l1" => Metric::Manhattan,
            "cosine" => Metric::Cosine,
            other => bail!("unknown metric `{other}`"),
        })
    }

    pub(crate) fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Euclidean => squared_euclidean(a, b).sqrt(),
            Metric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            Metric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
        }
    }
}

pub(crate) fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Validate a requested cluster count against the number of samples.
pub(crate) fn check_cluster_count(k: i64, n: usize) -> Result<usize> {
    if k < 1 {
        bail!("n_clusters must be at least 1, got {k}");
    }
    let k = k as usize;
    if k > n {
        bail!("n_clusters={k} exceeds the number of samples ({n})");
    }
    Ok(k)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::model::Matrix;

    /// Two tight, well separated groups: rows 0..3 and 3..6.
    pub(crate) fn two_blobs() -> Matrix {
        Matrix::from_rows(vec![
            vec![0.0, 0.0],
            vec![0.1, 0.2],
            vec![0.2, 0.1],
            vec![9.0, 9.0],
            vec![9.1, 9.2],
            vec![9.2, 9.1],
        ])
        .unwrap()
    }

    pub(crate) fn same_partition(labels: &[i64], expected: &[i64]) -> bool {
        labels.len() == expected.len()
            && (0..labels.len()).all(|i| {
                (0..labels.len()).all(|j| (labels[i] == labels[j]) == (expected[i] == expected[j]))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Named;

    #[test]
    fn builtin_names_are_distinct_and_kernels_resolve() {
        let algos = builtin();
        assert_eq!(algos.len(), 3);
        let mut names: Vec<_> = algos.iter().map(|a| a.name().to_string()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
        for k in KERNELS {
            assert!(kernel(k).is_some());
            assert!(kernel_schema(k).is_some_and(|s| s.is_ok()));
        }
        assert!(kernel("spectral").is_none());
        assert!(kernel_schema("spectral").is_none());
    }

    #[test]
    fn metrics() {
        let a = [0.0, 3.0];
        let b = [4.0, 0.0];
        assert_eq!(Metric::Euclidean.distance(&a, &b), 5.0);
        assert_eq!(Metric::Manhattan.distance(&a, &b), 7.0);
        assert!((Metric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-12);
        assert!(Metric::parse("chebyshev").is_err());
    }
}

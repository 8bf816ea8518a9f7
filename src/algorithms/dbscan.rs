use super::Metric;
use crate::model::{ClusterAlgorithm, Label, Matrix};
use crate::params::CallArgs;
use anyhow::{bail, Result};
use std::collections::VecDeque;

/// Density-based clustering; points in no dense region get label `-1`.
pub struct Dbscan;

const NOISE: Label = -1;

impl ClusterAlgorithm for Dbscan {
    fn cluster(&self, data: &Matrix, args: &CallArgs) -> Result<Vec<Label>> {
        let eps = args.real_or("eps", 0.5)?;
        if eps <= 0.0 {
            bail!("eps must be positive, got {eps}");
        }
        let min_samples = args.int_or("min_samples", 5)?.max(1) as usize;
        let metric = Metric::parse(args.choice_or("metric", "euclidean")?)?;

        let n = data.n_samples();
        let neighbours = |i: usize| -> Vec<usize> {
            (0..n)
                .filter(|&j| metric.distance(data.row(i), data.row(j)) <= eps)
                .collect()
        };

        let mut labels: Vec<Option<Label>> = vec![None; n];
        let mut next: Label = 0;
        for i in 0..n {
            if labels[i].is_some() {
                continue;
            }
            let seeds = neighbours(i);
            if seeds.len() < min_samples {
                labels[i] = Some(NOISE);
                continue;
            }
            let cluster = next;
            next += 1;
            labels[i] = Some(cluster);
            let mut queue: VecDeque<usize> = seeds.into_iter().collect();
            while let Some(j) = queue.pop_front() {
                match labels[j] {
                    // Border point previously marked as noise.
                    Some(NOISE) => labels[j] = Some(cluster),
                    Some(_) => {}
                    None => {
                        labels[j] = Some(cluster);
                        let reach = neighbours(j);
                        if reach.len() >= min_samples {
                            queue.extend(reach);
                        }
                    }
                }
            }
        }
        Ok(labels.into_iter().map(|l| l.unwrap_or(NOISE)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::fixtures::two_blobs;
    use crate::params::{ParamDecl, ParameterSchema, RawParam};
    use std::collections::BTreeMap;

    fn args(eps: &str, min_samples: &str) -> CallArgs {
        let schema = ParameterSchema::new(vec![
            ParamDecl::real("eps", None, None),
            ParamDecl::int("min_samples", None, None),
        ])
        .unwrap();
        let raw = BTreeMap::from([
            ("eps".to_string(), RawParam::Text(eps.into())),
            ("min_samples".to_string(), RawParam::Text(min_samples.into())),
        ]);
        schema.coerce(&raw).unwrap().call_args()
    }

    #[test]
    fn finds_dense_groups() {
        let labels = Dbscan.cluster(&two_blobs(), &args("1.0", "2")).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn sparse_points_are_noise() {
        let labels = Dbscan.cluster(&two_blobs(), &args("0.01", "2")).unwrap();
        assert!(labels.iter().all(|&l| l == NOISE));
    }
}

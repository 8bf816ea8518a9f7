use super::{check_cluster_count, squared_euclidean};
use crate::model::{ClusterAlgorithm, Label, Matrix};
use crate::params::CallArgs;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lloyd's k-means with k-means++ seeding; the best of `n_init` restarts wins.
///
/// Unspecified `seed` means seed 0 (reproducible); an explicit `None` draws a
/// fresh seed.
pub struct KMeans;

impl ClusterAlgorithm for KMeans {
    fn cluster(&self, data: &Matrix, args: &CallArgs) -> Result<Vec<Label>> {
        let n = data.n_samples();
        if n == 0 {
            return Ok(Vec::new());
        }
        let k = check_cluster_count(args.int_or("n_clusters", 8.min(n as i64))?, n)?;
        let max_iter = args.int_or("max_iter", 300)?.max(1) as usize;
        let tol = args.real_or("tol", 1e-4)?;
        let n_init = args.int_or("n_init", 4)?.max(1) as usize;
        let seed = match args.get("seed") {
            None => 0,
            Some(None) => rand::random::<u64>(),
            Some(Some(_)) => args.int_or("seed", 0)? as u64,
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut best: Option<(f64, Vec<usize>)> = None;
        for _ in 0..n_init {
            let (inertia, labels) = lloyd(data, k, max_iter, tol, &mut rng);
            if best.as_ref().map_or(true, |(b, _)| inertia < *b) {
                best = Some((inertia, labels));
            }
        }
        let labels = best.map(|(_, l)| l).unwrap_or_default();
        Ok(labels.into_iter().map(|l| l as Label).collect())
    }
}

fn lloyd(
    data: &Matrix,
    k: usize,
    max_iter: usize,
    tol: f64,
    rng: &mut StdRng,
) -> (f64, Vec<usize>) {
    let mut centers = plus_plus_init(data, k, rng);
    let mut labels = vec![0usize; data.n_samples()];
    for _ in 0..max_iter {
        for (i, row) in data.rows().enumerate() {
            labels[i] = nearest(&centers, row).0;
        }
        let mut sums = vec![vec![0.0; data.n_features()]; k];
        let mut counts = vec![0usize; k];
        for (row, &l) in data.rows().zip(&labels) {
            counts[l] += 1;
            for (s, v) in sums[l].iter_mut().zip(row) {
                *s += v;
            }
        }
        let mut shift = 0.0;
        for c in 0..k {
            // An emptied cluster keeps its previous center.
            if counts[c] == 0 {
                continue;
            }
            let new: Vec<f64> = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            shift += squared_euclidean(&centers[c], &new);
            centers[c] = new;
        }
        if shift <= tol {
            break;
        }
    }
    let mut inertia = 0.0;
    for (i, row) in data.rows().enumerate() {
        let (c, d) = nearest(&centers, row);
        labels[i] = c;
        inertia += d;
    }
    (inertia, labels)
}

fn plus_plus_init(data: &Matrix, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = data.n_samples();
    let mut centers = vec![data.row(rng.gen_range(0..n)).to_vec()];
    while centers.len() < k {
        let dists: Vec<f64> = data.rows().map(|r| nearest(&centers, r).1).collect();
        let total: f64 = dists.iter().sum();
        let idx = if total <= 0.0 {
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = n - 1;
            for (i, d) in dists.iter().enumerate() {
                if target < *d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        };
        centers.push(data.row(idx).to_vec());
    }
    centers
}

/// Index of the closest center and the squared distance to it.
fn nearest(centers: &[Vec<f64>], row: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, center) in centers.iter().enumerate() {
        let d = squared_euclidean(center, row);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

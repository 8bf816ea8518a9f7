use super::{check_cluster_count, squared_euclidean, Metric};
use crate::model::{ClusterAlgorithm, Label, Matrix};
use crate::params::CallArgs;
use anyhow::{bail, Result};

/// Bottom-up hierarchical clustering with Lance-Williams distance updates.
pub struct Agglomerative;

#[derive(Debug, Clone, Copy)]
enum Linkage {
    Ward,
    Complete,
    Average,
    Single,
}

impl ClusterAlgorithm for Agglomerative {
    fn cluster(&self, data: &Matrix, args: &CallArgs) -> Result<Vec<Label>> {
        let n = data.n_samples();
        if n == 0 {
            return Ok(Vec::new());
        }
        let k = check_cluster_count(args.int_or("n_clusters", 2.min(n as i64))?, n)?;
        let linkage = match args.choice_or("linkage", "ward")? {
            "ward" => Linkage::Ward,
            "complete" => Linkage::Complete,
            "average" => Linkage::Average,
            "single" => Linkage::Single,
            other => bail!("unknown linkage `{other}`"),
        };
        let metric = Metric::parse(args.choice_or("metric", "euclidean")?)?;
        if matches!(linkage, Linkage::Ward) && metric != Metric::Euclidean {
            bail!("ward linkage only works with the euclidean metric");
        }

        // Ward works on squared distances.
        let mut dist = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = match linkage {
                    Linkage::Ward => squared_euclidean(data.row(i), data.row(j)),
                    _ => metric.distance(data.row(i), data.row(j)),
                };
                dist[i][j] = d;
                dist[j][i] = d;
            }
        }

        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let mut active: Vec<bool> = vec![true; n];
        let mut remaining = n;
        while remaining > k {
            let mut best = (0, 0, f64::INFINITY);
            for i in 0..n {
                if !active[i] {
                    continue;
                }
                for j in (i + 1)..n {
                    if active[j] && dist[i][j] < best.2 {
                        best = (i, j, dist[i][j]);
                    }
                }
            }
            let (a, b, d_ab) = best;
            let (na, nb) = (members[a].len() as f64, members[b].len() as f64);
            for c in 0..n {
                if !active[c] || c == a || c == b {
                    continue;
                }
                let nc = members[c].len() as f64;
                let (d_ac, d_bc) = (dist[a][c], dist[b][c]);
                let merged = match linkage {
                    Linkage::Single => d_ac.min(d_bc),
                    Linkage::Complete => d_ac.max(d_bc),
                    Linkage::Average => (na * d_ac + nb * d_bc) / (na + nb),
                    Linkage::Ward => {
                        ((na + nc) * d_ac + (nb + nc) * d_bc - nc * d_ab) / (na + nb + nc)
                    }
                };
                dist[a][c] = merged;
                dist[c][a] = merged;
            }
            let moved = std::mem::take(&mut members[b]);
            members[a].extend(moved);
            active[b] = false;
            remaining -= 1;
        }

        // Label clusters in order of their first member.
        let mut clusters: Vec<&Vec<usize>> = (0..n)
            .filter(|&i| active[i])
            .map(|i| &members[i])
            .collect();
        clusters.sort_by_key(|m| m.iter().min().copied().unwrap_or(usize::MAX));
        let mut labels = vec![0 as Label; n];
        for (label, cluster) in clusters.iter().enumerate() {
            for &i in cluster.iter() {
                labels[i] = label as Label;
            }
        }
        Ok(labels)
    }
}

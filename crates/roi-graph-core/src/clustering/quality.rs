//! Cluster quality metrics, computed once after labeling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::labels::ClusterLabeling;
use crate::sparse::SparseMatrix;

/// Per-cluster and per-sample statistics of a final labeling.
///
/// Cluster-keyed maps hold exactly one entry per cluster id in
/// `labels_dict`; sample-keyed maps hold one entry per clustered ROI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean `sConj` over member pairs (absent pairs count as 0).
    pub cluster_intra_means: BTreeMap<i64, f32>,
    pub cluster_intra_mins: BTreeMap<i64, f32>,
    pub cluster_intra_maxs: BTreeMap<i64, f32>,
    /// Mean silhouette of each cluster's members.
    pub cluster_silhouette: BTreeMap<i64, f32>,
    /// Silhouette of each clustered ROI on `dConj`.
    pub sample_silhouette: BTreeMap<usize, f32>,
    /// Mean `sConj` of each clustered ROI towards its cluster mates.
    pub sample_intra_means: BTreeMap<usize, f32>,
    pub n_clusters: usize,
    pub n_unclustered: usize,
    pub n_violations: usize,
}

impl QualityMetrics {
    /// Compute metrics of `labeling` from the (unpruned) conjunctive graph.
    ///
    /// Pairs absent from `d_conj` are treated as maximally distant: the
    /// larger of 1.0 and the largest stored distance.
    pub fn compute(labeling: &ClusterLabeling, s_conj: &SparseMatrix<f32>, d_conj: &SparseMatrix<f32>) -> Self {
        let mut cluster_intra_means = BTreeMap::new();
        let mut cluster_intra_mins = BTreeMap::new();
        let mut cluster_intra_maxs = BTreeMap::new();
        let mut sample_intra_means = BTreeMap::new();

        for (&cluster, members) in &labeling.labels_dict {
            let mut pair_values = Vec::new();
            for (x, &a) in members.iter().enumerate() {
                for &b in &members[x + 1..] {
                    pair_values.push(s_conj.get(a, b).unwrap_or(0.0));
                }
            }
            let (mean, min, max) = summarize(&pair_values);
            cluster_intra_means.insert(cluster, mean);
            cluster_intra_mins.insert(cluster, min);
            cluster_intra_maxs.insert(cluster, max);

            for &a in members {
                let others = members.len() - 1;
                let total: f32 = members
                    .iter()
                    .filter(|&&b| b != a)
                    .map(|&b| s_conj.get(a, b).unwrap_or(0.0))
                    .sum();
                let mean = if others > 0 { total / others as f32 } else { 0.0 };
                sample_intra_means.insert(a, mean);
            }
        }

        let sample_silhouette = silhouettes(labeling, d_conj);
        let cluster_silhouette = labeling
            .labels_dict
            .iter()
            .map(|(&cluster, members)| {
                let sum: f32 = members.iter().filter_map(|m| sample_silhouette.get(m)).sum();
                (cluster, sum / members.len().max(1) as f32)
            })
            .collect();

        Self {
            cluster_intra_means,
            cluster_intra_mins,
            cluster_intra_maxs,
            cluster_silhouette,
            sample_silhouette,
            sample_intra_means,
            n_clusters: labeling.n_clusters(),
            n_unclustered: labeling.n_unclustered(),
            n_violations: labeling.violations_labels.len(),
        }
    }

    /// Mean of the per-cluster silhouettes, 0 when there are no clusters.
    pub fn mean_silhouette(&self) -> f32 {
        if self.cluster_silhouette.is_empty() {
            return 0.0;
        }
        self.cluster_silhouette.values().sum::<f32>() / self.cluster_silhouette.len() as f32
    }
}

fn summarize(values: &[f32]) -> (f32, f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    (mean, min, max)
}

/// Silhouette `(b - a) / max(a, b)` per clustered ROI, from sparse distances.
fn silhouettes(labeling: &ClusterLabeling, d_conj: &SparseMatrix<f32>) -> BTreeMap<usize, f32> {
    let absent = d_conj
        .data()
        .iter()
        .copied()
        .filter(|d| d.is_finite())
        .fold(1.0f32, f32::max);
    let sizes: BTreeMap<i64, usize> = labeling.labels_dict.iter().map(|(&c, m)| (c, m.len())).collect();

    let mut out = BTreeMap::new();
    let mut stored: BTreeMap<i64, (f32, usize)> = BTreeMap::new();
    for (&own, members) in &labeling.labels_dict {
        for &i in members {
            stored.clear();
            for (j, d) in d_conj.row(i) {
                let l = labeling.labels[j];
                if j == i || l < 0 || !d.is_finite() {
                    continue;
                }
                let e = stored.entry(l).or_insert((0.0, 0));
                e.0 += d;
                e.1 += 1;
            }
            let mean_to = |cluster: i64, size: usize| -> f32 {
                let (sum, count) = stored.get(&cluster).copied().unwrap_or((0.0, 0));
                (sum + (size - count) as f32 * absent) / size as f32
            };

            let own_size = sizes[&own] - 1;
            if own_size == 0 || sizes.len() < 2 {
                out.insert(i, 0.0);
                continue;
            }
            let a = mean_to(own, own_size);
            let b = sizes
                .iter()
                .filter(|(&c, _)| c != own)
                .map(|(&c, &size)| mean_to(c, size))
                .fold(f32::INFINITY, f32::min);
            let denom = a.max(b);
            out.insert(i, if denom > 0.0 { (b - a) / denom } else { 0.0 });
        }
    }
    out
}

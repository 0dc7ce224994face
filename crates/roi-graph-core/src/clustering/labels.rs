//! Cluster labelings, label layouts and the constraint-violation pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{TrackingError, TrackingResult};
use crate::similarity::SessionConstraintMasker;
use crate::sparse::{SparseMatrix, TripletBuilder};

/// Label for ROIs that belong to no cluster.
pub const UNCLUSTERED: i64 = -1;

/// Map distinct non-negative labels to `0..K` in ascending order.
/// Negative labels become [`UNCLUSTERED`].
///
/// ```
/// use roi_graph_core::clustering::squeeze_integers;
///
/// assert_eq!(squeeze_integers(&[7, -1, 3, 7, -5]), vec![1, -1, 0, 1, -1]);
/// ```
pub fn squeeze_integers(labels: &[i64]) -> Vec<i64> {
    let mut distinct: Vec<i64> = labels.iter().copied().filter(|&l| l >= 0).collect();
    distinct.sort_unstable();
    distinct.dedup();
    labels
        .iter()
        .map(|l| match distinct.binary_search(l) {
            Ok(rank) if *l >= 0 => rank as i64,
            _ => UNCLUSTERED,
        })
        .collect()
}

/// Labels supplied either per session or already concatenated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", content = "labels", rename_all = "snake_case")]
pub enum LabelLayout {
    PerSession(Vec<Vec<i64>>),
    Concatenated(Vec<i64>),
}

impl LabelLayout {
    /// Resolve to one label per global ROI.
    ///
    /// # Errors
    ///
    /// `TrackingError::ShapeMismatch` if the lengths disagree with
    /// `n_rois_per_session`.
    pub fn into_concatenated(self, n_rois_per_session: &[usize]) -> TrackingResult<Vec<i64>> {
        let total: usize = n_rois_per_session.iter().sum();
        match self {
            LabelLayout::Concatenated(labels) => {
                if labels.len() != total {
                    return Err(TrackingError::shape_mismatch("labels", total, labels.len()));
                }
                Ok(labels)
            }
            LabelLayout::PerSession(per_session) => {
                if per_session.len() != n_rois_per_session.len() {
                    return Err(TrackingError::shape_mismatch(
                        "labels sessions",
                        n_rois_per_session.len(),
                        per_session.len(),
                    ));
                }
                for (s, (labels, &n)) in per_session.iter().zip(n_rois_per_session).enumerate() {
                    if labels.len() != n {
                        return Err(TrackingError::shape_mismatch(format!("labels of session {}", s), n, labels.len()));
                    }
                }
                Ok(per_session.into_iter().flatten().collect())
            }
        }
    }
}

/// Final assignment of ROIs to cluster identities.
///
/// Cluster ids are `0..K`; `labels_dict`, `labels_bool` and every
/// `labels_bool_by_session` matrix cover exactly those `K` clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLabeling {
    /// One label per global ROI, `-1` for unclustered.
    pub labels: Vec<i64>,
    pub labels_by_session: Vec<Vec<i64>>,
    /// Cluster id -> member ROI indices (global, ascending).
    pub labels_dict: BTreeMap<i64, Vec<usize>>,
    /// `n_rois x K` membership.
    pub labels_bool: SparseMatrix<bool>,
    /// Per session `n_rois_in_session x K` membership.
    #[serde(rename = "labels_bool_bySession")]
    pub labels_bool_by_session: Vec<SparseMatrix<bool>>,
    /// ROIs removed from a cluster because they broke a session constraint.
    pub violations_labels: Vec<usize>,
}

impl ClusterLabeling {
    /// Build every representation from raw labels.
    ///
    /// Labels are squeezed first, so any non-negative ids are accepted.
    pub fn new(labels: &[i64], offsets: &[usize], violations_labels: Vec<usize>) -> TrackingResult<Self> {
        let n = offsets.last().copied().unwrap_or(0);
        if labels.len() != n {
            return Err(TrackingError::shape_mismatch("labels", n, labels.len()));
        }
        let labels = squeeze_integers(labels);
        let n_clusters = labels.iter().filter(|&&l| l >= 0).max().map_or(0, |&m| m as usize + 1);

        let mut labels_dict: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        let mut all = TripletBuilder::new((n, n_clusters));
        for (g, &l) in labels.iter().enumerate() {
            if l >= 0 {
                labels_dict.entry(l).or_default().push(g);
                all.push(g, l as usize, true)?;
            }
        }

        let mut labels_by_session = Vec::with_capacity(offsets.len().saturating_sub(1));
        let mut labels_bool_by_session = Vec::with_capacity(offsets.len().saturating_sub(1));
        for w in offsets.windows(2) {
            let (start, end) = (w[0], w[1]);
            let session_labels = labels[start..end].to_vec();
            let mut b = TripletBuilder::new((end - start, n_clusters));
            for (r, &l) in session_labels.iter().enumerate() {
                if l >= 0 {
                    b.push(r, l as usize, true)?;
                }
            }
            labels_by_session.push(session_labels);
            labels_bool_by_session.push(b.build());
        }

        Ok(Self {
            labels,
            labels_by_session,
            labels_dict,
            labels_bool: all.build(),
            labels_bool_by_session,
            violations_labels,
        })
    }

    #[inline]
    pub fn n_clusters(&self) -> usize {
        self.labels_dict.len()
    }

    pub fn n_unclustered(&self) -> usize {
        self.labels.iter().filter(|&&l| l < 0).count()
    }
}

/// Remove ROIs from clusters until no cluster holds an ineligible pair.
///
/// Within a cluster, the member with the most ineligible partners is removed
/// first; ties go to the lower mean `s_conj` towards the rest of the cluster,
/// then to the higher index. Clusters left smaller than `min_cluster_size`
/// dissolve. Returns the removed ROIs in ascending order.
pub fn resolve_violations(
    labels: &mut [i64],
    session_of: &[usize],
    masker: &SessionConstraintMasker,
    s_conj: &SparseMatrix<f32>,
    min_cluster_size: usize,
) -> Vec<usize> {
    let mut clusters: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (g, &l) in labels.iter().enumerate() {
        if l >= 0 {
            clusters.entry(l).or_default().push(g);
        }
    }

    let mut violations = Vec::new();
    for (_, mut members) in clusters {
        loop {
            let worst = members
                .iter()
                .map(|&a| {
                    let conflicts = members
                        .iter()
                        .filter(|&&b| b != a && !masker.is_eligible(session_of[a], session_of[b]))
                        .count();
                    (a, conflicts)
                })
                .filter(|&(_, c)| c > 0)
                .max_by(|&(a, ca), &(b, cb)| {
                    ca.cmp(&cb)
                        .then_with(|| mean_similarity(s_conj, b, &members).total_cmp(&mean_similarity(s_conj, a, &members)))
                        .then(a.cmp(&b))
                });
            let Some((drop, _)) = worst else { break };
            labels[drop] = UNCLUSTERED;
            violations.push(drop);
            members.retain(|&m| m != drop);
        }
        if members.len() < min_cluster_size {
            for &m in &members {
                labels[m] = UNCLUSTERED;
            }
        }
    }

    violations.sort_unstable();
    if !violations.is_empty() {
        warn!(n_violations = violations.len(), "Removed ROIs violating session constraints");
    }
    violations
}

/// Mean stored similarity of `a` to the other members; absent pairs count as 0.
fn mean_similarity(s_conj: &SparseMatrix<f32>, a: usize, members: &[usize]) -> f32 {
    let others = members.len().saturating_sub(1);
    if others == 0 {
        return 0.0;
    }
    let total: f32 = members
        .iter()
        .filter(|&&b| b != a)
        .filter_map(|&b| s_conj.get(a, b))
        .sum();
    total / others as f32
}

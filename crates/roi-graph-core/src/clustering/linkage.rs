//! Session-aware single linkage over sparse mutual-reachability distances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TrackingError, TrackingResult};
use crate::similarity::SessionConstraintMasker;
use crate::sparse::SparseMatrix;

/// Parameters for [`SessionAwareLinkage`].
///
/// # Example
///
/// ```
/// use roi_graph_core::clustering::LinkageParams;
///
/// let params = LinkageParams::default().with_min_cluster_size(3);
/// assert!(params.validate().is_ok());
/// assert!(params.enforce_session_constraints);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkageParams {
    /// Smallest component kept as a cluster. Must be >= 2.
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Neighbour rank defining the core distance. Must be >= 1.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Refuse merges that would put ineligible session pairs in one cluster.
    #[serde(default = "default_enforce")]
    pub enforce_session_constraints: bool,
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_min_samples() -> usize {
    1
}

fn default_enforce() -> bool {
    true
}

impl Default for LinkageParams {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            min_samples: default_min_samples(),
            enforce_session_constraints: default_enforce(),
        }
    }
}

impl LinkageParams {
    #[must_use]
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    #[must_use]
    pub fn with_min_samples(mut self, samples: usize) -> Self {
        self.min_samples = samples;
        self
    }

    #[must_use]
    pub fn with_session_constraints(mut self, enforce: bool) -> Self {
        self.enforce_session_constraints = enforce;
        self
    }

    /// Validate parameters.
    ///
    /// # Errors
    ///
    /// `TrackingError::InvalidParameter` if `min_cluster_size < 2` or
    /// `min_samples < 1`.
    pub fn validate(&self) -> TrackingResult<()> {
        if self.min_cluster_size < 2 {
            return Err(TrackingError::invalid_parameter(format!(
                "min_cluster_size must be >= 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.min_samples < 1 {
            return Err(TrackingError::invalid_parameter(format!(
                "min_samples must be >= 1, got {}",
                self.min_samples
            )));
        }
        Ok(())
    }
}

/// Union-find with per-root sorted session lists.
struct SessionUnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
    sessions: Vec<Vec<usize>>,
}

impl SessionUnionFind {
    fn new(session_of: &[usize]) -> Self {
        Self {
            parent: (0..session_of.len()).collect(),
            size: vec![1; session_of.len()],
            sessions: session_of.iter().map(|&s| vec![s]).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn compatible(&self, a: usize, b: usize, masker: &SessionConstraintMasker) -> bool {
        self.sessions[a]
            .iter()
            .all(|&sa| self.sessions[b].iter().all(|&sb| masker.is_eligible(sa, sb)))
    }

    fn union(&mut self, a: usize, b: usize) {
        let (big, small) = if self.size[a] >= self.size[b] { (a, b) } else { (b, a) };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        let moved = std::mem::take(&mut self.sessions[small]);
        let merged = &mut self.sessions[big];
        merged.extend(moved);
        merged.sort_unstable();
        merged.dedup();
    }
}

/// Single-linkage clustering on the pruned distance graph.
///
/// Distances are first turned into mutual-reachability distances
/// `max(d, core_i, core_j)`, where `core_i` is the `min_samples`-th smallest
/// stored distance of row `i` (its largest stored distance when the row is
/// shorter). Edges are merged in ascending order, ties broken by index.
#[derive(Debug, Clone)]
pub struct SessionAwareLinkage {
    params: LinkageParams,
    masker: SessionConstraintMasker,
}

impl SessionAwareLinkage {
    pub fn new(params: LinkageParams, masker: SessionConstraintMasker) -> TrackingResult<Self> {
        params.validate()?;
        Ok(Self { params, masker })
    }

    #[inline]
    pub fn params(&self) -> &LinkageParams {
        &self.params
    }

    /// Cluster labels per ROI, `-1` for unclustered. Cluster ids are assigned
    /// in order of each cluster's smallest member.
    pub fn fit(&self, distances: &SparseMatrix<f32>, session_of: &[usize]) -> TrackingResult<Vec<i64>> {
        let n = session_of.len();
        if distances.shape() != (n, n) {
            return Err(TrackingError::shape_mismatch("dConj", n, distances.nrows()));
        }

        let core = self.core_distances(distances);

        let mut edges: BTreeMap<(usize, usize), f32> = BTreeMap::new();
        for (i, j, d) in distances.iter() {
            if i == j || !d.is_finite() {
                continue;
            }
            let key = (i.min(j), i.max(j));
            let w = d.max(core[i]).max(core[j]);
            edges
                .entry(key)
                .and_modify(|e| *e = e.min(w))
                .or_insert(w);
        }
        let mut edges: Vec<(f32, usize, usize)> = edges.into_iter().map(|((a, b), w)| (w, a, b)).collect();
        edges.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

        let mut uf = SessionUnionFind::new(session_of);
        let mut refused = 0usize;
        for &(_, a, b) in &edges {
            let (ra, rb) = (uf.find(a), uf.find(b));
            if ra == rb {
                continue;
            }
            if self.params.enforce_session_constraints && !uf.compatible(ra, rb, &self.masker) {
                refused += 1;
                continue;
            }
            uf.union(ra, rb);
        }

        let mut labels = vec![-1i64; n];
        let mut ids: BTreeMap<usize, i64> = BTreeMap::new();
        for i in 0..n {
            let root = uf.find(i);
            if uf.size[root] < self.params.min_cluster_size {
                continue;
            }
            let next = ids.len() as i64;
            labels[i] = *ids.entry(root).or_insert(next);
        }

        debug!(
            n_edges = edges.len(),
            refused_merges = refused,
            n_clusters = ids.len(),
            "Linkage complete"
        );
        Ok(labels)
    }

    fn core_distances(&self, distances: &SparseMatrix<f32>) -> Vec<f32> {
        let k = self.params.min_samples;
        let mut row: Vec<f32> = Vec::new();
        (0..distances.nrows())
            .map(|i| {
                row.clear();
                row.extend(
                    distances
                        .row(i)
                        .filter(|&(j, d)| j != i && d.is_finite())
                        .map(|(_, d)| d),
                );
                if row.is_empty() {
                    return 0.0;
                }
                row.sort_by(f32::total_cmp);
                row[(k - 1).min(row.len() - 1)]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::TripletBuilder;

    fn symmetric(n: usize, edges: &[(usize, usize, f32)]) -> SparseMatrix<f32> {
        let mut b = TripletBuilder::new((n, n));
        for &(i, j, d) in edges {
            b.push_symmetric(i, j, d).unwrap();
        }
        b.build()
    }

    #[test]
    fn test_params_validation() {
        assert!(LinkageParams::default().validate().is_ok());
        assert!(LinkageParams::default().with_min_cluster_size(1).validate().is_err());
        assert!(LinkageParams::default().with_min_samples(0).validate().is_err());
        println!("[PASS] linkage params validated");
    }

    #[test]
    fn test_two_components_labelled_by_smallest_member() {
        // sessions: 0,1,2 | 0,1
        let session_of = vec![0, 1, 2, 0, 1];
        let d = symmetric(5, &[(3, 4, 0.1), (0, 1, 0.2), (1, 2, 0.3)]);
        let linkage = SessionAwareLinkage::new(LinkageParams::default(), SessionConstraintMasker::default()).unwrap();
        let labels = linkage.fit(&d, &session_of).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_session_constraint_blocks_merge() {
        // ROI 0 and 2 share session 0; bridging through 1 must be refused once.
        let session_of = vec![0, 1, 0];
        let d = symmetric(3, &[(0, 1, 0.1), (1, 2, 0.2)]);
        let enforced =
            SessionAwareLinkage::new(LinkageParams::default(), SessionConstraintMasker::default()).unwrap();
        let labels = enforced.fit(&d, &session_of).unwrap();
        assert_eq!(labels, vec![0, 0, -1], "second same-session ROI must stay out");

        let free = SessionAwareLinkage::new(
            LinkageParams::default().with_session_constraints(false),
            SessionConstraintMasker::default(),
        )
        .unwrap();
        assert_eq!(free.fit(&d, &session_of).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_small_components_unclustered() {
        let session_of = vec![0, 1, 2, 3];
        let d = symmetric(4, &[(0, 1, 0.1)]);
        let linkage = SessionAwareLinkage::new(
            LinkageParams::default().with_min_cluster_size(3),
            SessionConstraintMasker::default(),
        )
        .unwrap();
        assert_eq!(linkage.fit(&d, &session_of).unwrap(), vec![-1; 4]);
    }

    #[test]
    fn test_core_distance_reorders_merges() {
        let linkage = SessionAwareLinkage::new(
            LinkageParams::default().with_min_samples(2),
            SessionConstraintMasker::default(),
        )
        .unwrap();
        let d = symmetric(3, &[(0, 1, 0.1), (0, 2, 0.5)]);
        let core = linkage.core_distances(&d);
        assert_eq!(core, vec![0.5, 0.1, 0.5]);
    }
}

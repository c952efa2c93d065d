use super::executor::Executor;
use super::groups::GroupLayout;
use crate::error::Result;

/// Common interface for per-group hard initializers (one label per sample).
pub trait GroupInitializer {
    /// Label every sample with a cluster index below [`n_clusters`](Self::n_clusters),
    /// fitting each group of `layout` independently on `executor`.
    fn init_labels<E: Executor>(
        &self,
        executor: &E,
        samples: &[Vec<f64>],
        layout: &GroupLayout,
    ) -> Result<Vec<usize>>;

    /// The configured number of clusters per group.
    fn n_clusters(&self) -> usize;
}

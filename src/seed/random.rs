//! Uniform random seeder

use rand::rngs::StdRng;

use crate::sample::sample_rows;
use crate::storage::RelationStore;
use crate::types::CentroidRow;
use crate::{Error, Result};

/// Select `k` points uniformly at random as the initial centroids,
/// assigning dense ids 1..k in arrival order.
pub(crate) async fn seed(
    store: &dyn RelationStore,
    working: &str,
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<CentroidRow>> {
    let points = store.scan_points(working).await?;
    if points.len() < k {
        return Err(Error::InsufficientPoints {
            kept: points.len(),
            required: k,
        });
    }

    let picked = sample_rows(&points, k, rng);
    let centroids: Vec<CentroidRow> = picked
        .into_iter()
        .enumerate()
        .map(|(i, p)| CentroidRow {
            cid: (i + 1) as i32,
            coords: p.coords,
        })
        .collect();

    tracing::debug!("Seeded {} centroids by uniform sampling", centroids.len());
    Ok(centroids)
}

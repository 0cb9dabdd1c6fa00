//! k-means++ seeder
//!
//! Iterative weighted seeding: each successive centroid is drawn with
//! probability proportional to its squared distance to the nearest
//! already-chosen centroid. Large point sets are cut down first with a
//! Bernoulli sub-sample materialised as a temp relation.

use rand::rngs::StdRng;
use rand::Rng;

use crate::run::{temp_name, RunCtx};
use crate::sample::sample_rows;
use crate::storage::RelationStore;
use crate::types::{CentroidRow, DistanceMetric, PointRow};
use crate::{Error, Result};

/// Fraction of the point set sampled when the caller does not choose one.
const DEFAULT_SAMPLE_FRAC: f64 = 0.01;

pub(crate) async fn seed(
    store: &dyn RelationStore,
    ctx: &RunCtx,
    working: &str,
    k: usize,
    sample_frac: Option<f64>,
    metric: DistanceMetric,
    rng: &mut StdRng,
) -> Result<Vec<CentroidRow>> {
    let points = store.scan_points(working).await?;
    let n = points.len();
    if n < k {
        return Err(Error::InsufficientPoints {
            kept: n,
            required: k,
        });
    }

    let frac = sample_frac.unwrap_or(DEFAULT_SAMPLE_FRAC);
    let target = (n as f64 * frac) as usize;

    // An explicit fraction must leave more candidates than centroids;
    // the defaulted fraction quietly falls back to the full point set.
    if sample_frac.is_some() && target <= k {
        return Err(Error::SampleTooSmall { target, k });
    }

    let candidates = if target > k && target < n {
        // Materialise the sub-sample so the weighted draw runs over a
        // relation of its own.
        let sample_rel = temp_name("sample");
        ctx.track_temp(sample_rel.clone());
        store.create_points(&sample_rel).await?;
        let sampled = sample_rows(&points, target, rng);
        store.insert_points(&sample_rel, sampled).await?;
        store.scan_points(&sample_rel).await?
    } else {
        points
    };

    let centroids = weighted_seed(candidates, k, metric, rng)?;
    tracing::debug!(
        "Seeded {} centroids with kmeans++ over {} candidates",
        centroids.len(),
        n
    );
    Ok(centroids)
}

/// The seeding loop proper, over an in-memory candidate pool.
fn weighted_seed(
    mut candidates: Vec<PointRow>,
    k: usize,
    metric: DistanceMetric,
    rng: &mut StdRng,
) -> Result<Vec<CentroidRow>> {
    // The cumulative-weight draw walks candidates in pid order, so that
    // zero-distance ties resolve to the lowest pid.
    candidates.sort_by_key(|p| p.pid);

    let first = rng.gen_range(0..candidates.len());
    let mut centroids = vec![CentroidRow {
        cid: 1,
        coords: candidates[first].coords.clone(),
    }];

    let mut min_dist: Vec<f64> = Vec::with_capacity(candidates.len());
    for p in &candidates {
        min_dist.push(metric.distance(&p.coords, &centroids[0].coords)?);
    }

    while centroids.len() < k {
        let total: f64 = min_dist.iter().map(|d| d * d).sum();
        let r = rng.gen::<f64>() * total;

        let mut chosen = candidates.len() - 1;
        let mut cum = 0.0;
        for (idx, d) in min_dist.iter().enumerate() {
            cum += d * d;
            if cum >= r {
                chosen = idx;
                break;
            }
        }

        let next = CentroidRow {
            cid: (centroids.len() + 1) as i32,
            coords: candidates[chosen].coords.clone(),
        };
        for (idx, p) in candidates.iter().enumerate() {
            let d = metric.distance(&p.coords, &next.coords)?;
            if d < min_dist[idx] {
                min_dist[idx] = d;
            }
        }
        centroids.push(next);
    }

    Ok(centroids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SparseVector;
    use rand::SeedableRng;

    fn line_points(values: &[f64]) -> Vec<PointRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| PointRow::new(i as i64 + 1, SparseVector::from_dense(&[v])))
            .collect()
    }

    #[test]
    fn outlier_always_becomes_a_centroid() {
        // Four duplicates at 0 and one point at 100: whatever the first
        // draw picks, the distance-squared weighting forces the other
        // location to be picked next.
        for seed in 0..20 {
            let points = line_points(&[0.0, 0.0, 0.0, 0.0, 100.0]);
            let mut rng = StdRng::seed_from_u64(seed);
            let centroids = weighted_seed(points, 2, DistanceMetric::L2Norm, &mut rng).unwrap();
            let mut positions: Vec<f64> =
                centroids.iter().map(|c| c.coords.get(0)).collect();
            positions.sort_by(f64::total_cmp);
            assert_eq!(positions, vec![0.0, 100.0], "seed {}", seed);
        }
    }

    #[test]
    fn zero_weight_pool_falls_back_to_lowest_pid() {
        // All candidates identical: every min-distance is zero, so the
        // draw degenerates to the first candidate in pid order.
        let points = line_points(&[5.0, 5.0, 5.0]);
        let mut rng = StdRng::seed_from_u64(1);
        let centroids = weighted_seed(points, 2, DistanceMetric::L2Norm, &mut rng).unwrap();
        assert_eq!(centroids.len(), 2);
        assert_eq!(centroids[1].coords.get(0), 5.0);
        assert_eq!(centroids[1].cid, 2);
    }

    #[test]
    fn ids_are_dense_in_insertion_order() {
        let points = line_points(&[0.0, 10.0, 20.0, 30.0]);
        let mut rng = StdRng::seed_from_u64(9);
        let centroids = weighted_seed(points, 4, DistanceMetric::L1Norm, &mut rng).unwrap();
        let cids: Vec<i32> = centroids.iter().map(|c| c.cid).collect();
        assert_eq!(cids, vec![1, 2, 3, 4]);
    }
}

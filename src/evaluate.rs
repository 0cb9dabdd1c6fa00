//! Model evaluation
//!
//! Total within-cluster cost and the simplified silhouette coefficient,
//! both computed against centroid positions rather than pairwise over
//! cluster members.

use rayon::prelude::*;

use crate::types::{CentroidRow, DistanceMetric, PointRow};
use crate::{Error, Result};

/// Cost and simplified silhouette of a finished clustering.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation {
    /// Sum over points of the distance to the assigned centroid.
    pub cost: f64,
    /// Mean of `(b - a) / max(a, b)` where `a` is the distance to the
    /// own centroid and `b` the distance to the nearest other centroid.
    pub silhouette: f64,
}

pub(crate) fn evaluate_model(
    points: &[PointRow],
    centroids: &[CentroidRow],
    metric: DistanceMetric,
) -> Result<Evaluation> {
    if points.is_empty() {
        return Err(Error::internal("evaluation over an empty point set"));
    }

    let contributions: Vec<(f64, f64)> = points
        .par_iter()
        .map(|p| {
            let mut own = None;
            let mut nearest_other = f64::INFINITY;
            for c in centroids {
                let d = metric.distance(&p.coords, &c.coords)?;
                if c.cid == p.cid {
                    own = Some(d);
                } else if d < nearest_other {
                    nearest_other = d;
                }
            }
            let a = own.ok_or_else(|| {
                Error::internal(format!("point {} assigned to unknown centroid {}", p.pid, p.cid))
            })?;

            // A single-centroid model has no "nearest other" to compare
            // against; its silhouette contribution is zero.
            if nearest_other.is_infinite() {
                return Ok((a, 0.0));
            }
            let b = nearest_other;
            let denom = a.max(b);
            let s = if denom == 0.0 { 0.0 } else { (b - a) / denom };
            Ok((a, s))
        })
        .collect::<Result<_>>()?;

    let cost = contributions.iter().map(|(a, _)| a).sum();
    let silhouette =
        contributions.iter().map(|(_, s)| s).sum::<f64>() / contributions.len() as f64;

    Ok(Evaluation { cost, silhouette })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SparseVector;

    fn point(pid: i64, dense: &[f64], cid: i32) -> PointRow {
        let mut p = PointRow::new(pid, SparseVector::from_dense(dense));
        p.cid = cid;
        p
    }

    fn centroid(cid: i32, dense: &[f64]) -> CentroidRow {
        CentroidRow {
            cid,
            coords: SparseVector::from_dense(dense),
        }
    }

    #[test]
    fn cost_sums_distances_to_own_centroid() {
        let points = vec![point(1, &[0.0], 1), point(2, &[1.0], 1), point(3, &[10.0], 2)];
        let centroids = vec![centroid(1, &[0.5]), centroid(2, &[10.0])];
        let eval = evaluate_model(&points, &centroids, DistanceMetric::L2Norm).unwrap();
        assert!((eval.cost - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tight_separated_clusters_score_near_one() {
        let points = vec![
            point(1, &[0.0], 1),
            point(2, &[0.2], 1),
            point(3, &[100.0], 2),
            point(4, &[100.2], 2),
        ];
        let centroids = vec![centroid(1, &[0.1]), centroid(2, &[100.1])];
        let eval = evaluate_model(&points, &centroids, DistanceMetric::L2Norm).unwrap();
        assert!(eval.silhouette > 0.99);
    }

    #[test]
    fn single_centroid_silhouette_is_zero() {
        let points = vec![point(1, &[0.0], 1), point(2, &[4.0], 1)];
        let centroids = vec![centroid(1, &[2.0])];
        let eval = evaluate_model(&points, &centroids, DistanceMetric::L2Norm).unwrap();
        assert_eq!(eval.silhouette, 0.0);
        assert!((eval.cost - 4.0).abs() < 1e-12);
    }

    #[test]
    fn coincident_point_and_centroids_contribute_zero() {
        // a == b == 0 for the point sitting on two coincident centroids.
        let points = vec![point(1, &[1.0], 1)];
        let centroids = vec![centroid(1, &[1.0]), centroid(2, &[1.0])];
        let eval = evaluate_model(&points, &centroids, DistanceMetric::L2Norm).unwrap();
        assert_eq!(eval.silhouette, 0.0);
        assert_eq!(eval.cost, 0.0);
    }
}

//! Vector and metric kernel
//!
//! Distance and centroid-aggregation rules for the four supported metrics.
//! Every public function rejects vectors of unequal dimension; within one
//! clustering run the ingest layer guarantees a single dimension, so these
//! checks only fire on misuse of the library API.

use std::f64::consts::FRAC_PI_2;

use crate::types::{DistanceMetric, SparseVector};
use crate::{Error, Result};

fn check_dims(u: &SparseVector, v: &SparseVector) -> Result<()> {
    if u.dim() != v.dim() {
        return Err(Error::dimension_mismatch(format!(
            "vectors of dimension {} and {} are incomparable",
            u.dim(),
            v.dim()
        )));
    }
    Ok(())
}

/// Inner product of two sparse vectors.
pub fn dot(u: &SparseVector, v: &SparseVector) -> Result<f64> {
    check_dims(u, v)?;
    let mut a = u.iter().peekable();
    let mut b = v.iter().peekable();
    let mut sum = 0.0;
    while let (Some(&(ia, va)), Some(&(ib, vb))) = (a.peek(), b.peek()) {
        if ia == ib {
            sum += va * vb;
            a.next();
            b.next();
        } else if ia < ib {
            a.next();
        } else {
            b.next();
        }
    }
    Ok(sum)
}

/// Euclidean (l2) norm.
pub fn norm2(v: &SparseVector) -> f64 {
    v.iter().map(|(_, x)| x * x).sum::<f64>().sqrt()
}

/// Scale to unit l2 norm; the zero vector maps to itself.
pub fn normalize(v: &SparseVector) -> SparseVector {
    let n = norm2(v);
    if n == 0.0 {
        v.clone()
    } else {
        v.scaled(1.0 / n)
    }
}

/// Fold `f` over the union of stored indices of `u` and `v`, passing the
/// two component values (0.0 where absent).
fn union_fold<F: FnMut(f64, f64)>(u: &SparseVector, v: &SparseVector, mut f: F) {
    let mut a = u.iter().peekable();
    let mut b = v.iter().peekable();
    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (Some((ia, va)), Some((ib, vb))) => {
                if ia == ib {
                    f(va, vb);
                    a.next();
                    b.next();
                } else if ia < ib {
                    f(va, 0.0);
                    a.next();
                } else {
                    f(0.0, vb);
                    b.next();
                }
            }
            (Some((_, va)), None) => {
                f(va, 0.0);
                a.next();
            }
            (None, Some((_, vb))) => {
                f(0.0, vb);
                b.next();
            }
            (None, None) => break,
        }
    }
}

impl DistanceMetric {
    /// Distance between two vectors under this metric.
    ///
    /// Cosine returns the angle in radians, not `1 - cos`; an all-zero
    /// vector is treated as orthogonal to everything (distance `pi/2`).
    pub fn distance(&self, u: &SparseVector, v: &SparseVector) -> Result<f64> {
        check_dims(u, v)?;
        match self {
            DistanceMetric::L1Norm => {
                let mut sum = 0.0;
                union_fold(u, v, |a, b| sum += (a - b).abs());
                Ok(sum)
            }
            DistanceMetric::L2Norm => {
                let mut sum = 0.0;
                union_fold(u, v, |a, b| {
                    let d = a - b;
                    sum += d * d;
                });
                Ok(sum.sqrt())
            }
            DistanceMetric::Cosine => {
                let nu = norm2(u);
                let nv = norm2(v);
                if nu == 0.0 || nv == 0.0 {
                    return Ok(FRAC_PI_2);
                }
                let cos = (dot(u, v)? / (nu * nv)).clamp(-1.0, 1.0);
                Ok(cos.acos())
            }
            DistanceMetric::Tanimoto => {
                let d = dot(u, v)?;
                let nu = norm2(u);
                let nv = norm2(v);
                let denom = nu * nu + nv * nv - d;
                if denom == 0.0 {
                    // Both vectors are zero; identical by convention.
                    return Ok(0.0);
                }
                Ok(1.0 - d / denom)
            }
        }
    }

    /// Centroid update for a cluster of points.
    ///
    /// l1norm/l2norm use the componentwise mean; cosine/tanimoto use the
    /// componentwise mean of the normalized points.
    pub fn aggregate<'a, I>(&self, members: I) -> Result<SparseVector>
    where
        I: IntoIterator<Item = &'a SparseVector>,
    {
        let mut iter = members.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| Error::internal("aggregate over empty cluster"))?;
        let dim = first.dim();
        let mut acc = vec![0.0; dim as usize];
        let mut count = 0usize;
        for v in std::iter::once(first).chain(iter) {
            if v.dim() != dim {
                return Err(Error::dimension_mismatch(format!(
                    "cluster member of dimension {} in a dimension-{} cluster",
                    v.dim(),
                    dim
                )));
            }
            let member = match self {
                DistanceMetric::Cosine | DistanceMetric::Tanimoto => normalize(v),
                _ => v.clone(),
            };
            for (i, x) in member.iter() {
                acc[i as usize] += x;
            }
            count += 1;
        }
        let inv = 1.0 / count as f64;
        for x in acc.iter_mut() {
            *x *= inv;
        }
        Ok(SparseVector::from_dense(&acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(dense: &[f64]) -> SparseVector {
        SparseVector::from_dense(dense)
    }

    #[test]
    fn dot_intersects_indices() {
        let u = sv(&[1.0, 0.0, 2.0]);
        let v = sv(&[0.0, 3.0, 4.0]);
        assert_eq!(dot(&u, &v).unwrap(), 8.0);
    }

    #[test]
    fn dot_rejects_dimension_mismatch() {
        let u = sv(&[1.0]);
        let v = sv(&[1.0, 2.0]);
        assert!(matches!(dot(&u, &v), Err(Error::DimensionMismatch(_))));
    }

    #[test]
    fn l1_and_l2_distances() {
        let u = sv(&[1.0, 0.0]);
        let v = sv(&[0.0, 1.0]);
        assert_eq!(DistanceMetric::L1Norm.distance(&u, &v).unwrap(), 2.0);
        let d = DistanceMetric::L2Norm.distance(&u, &v).unwrap();
        assert!((d - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn cosine_is_an_angle() {
        let u = sv(&[1.0, 0.0]);
        let v = sv(&[0.0, 2.0]);
        let d = DistanceMetric::Cosine.distance(&u, &v).unwrap();
        assert!((d - FRAC_PI_2).abs() < 1e-12);

        let w = sv(&[3.0, 0.0]);
        let d = DistanceMetric::Cosine.distance(&u, &w).unwrap();
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn cosine_zero_vector_is_orthogonal() {
        let z = sv(&[0.0, 0.0]);
        let u = sv(&[1.0, 1.0]);
        assert_eq!(DistanceMetric::Cosine.distance(&z, &u).unwrap(), FRAC_PI_2);
    }

    #[test]
    fn tanimoto_identical_vectors() {
        let u = sv(&[1.0, 2.0]);
        let d = DistanceMetric::Tanimoto.distance(&u, &u).unwrap();
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn tanimoto_disjoint_vectors() {
        let u = sv(&[1.0, 0.0]);
        let v = sv(&[0.0, 1.0]);
        assert_eq!(DistanceMetric::Tanimoto.distance(&u, &v).unwrap(), 1.0);
    }

    #[test]
    fn normalize_is_idempotent() {
        let v = sv(&[3.0, 4.0]);
        let n1 = normalize(&v);
        let n2 = normalize(&n1);
        assert!((norm2(&n1) - 1.0).abs() < 1e-12);
        for ((_, a), (_, b)) in n1.iter().zip(n2.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn normalize_zero_is_zero() {
        let z = sv(&[0.0, 0.0]);
        assert!(normalize(&z).is_zero());
    }

    #[test]
    fn aggregate_mean_for_l2() {
        let a = sv(&[0.0, 0.0]);
        let b = sv(&[2.0, 4.0]);
        let c = DistanceMetric::L2Norm.aggregate([&a, &b]).unwrap();
        assert_eq!(c.to_dense(), vec![1.0, 2.0]);
    }

    #[test]
    fn aggregate_normalizes_for_cosine() {
        let a = sv(&[2.0, 0.0]);
        let b = sv(&[0.0, 5.0]);
        let c = DistanceMetric::Cosine.aggregate([&a, &b]).unwrap();
        assert_eq!(c.to_dense(), vec![0.5, 0.5]);
    }

    #[test]
    fn aggregate_empty_cluster_is_an_error() {
        let err = DistanceMetric::L2Norm
            .aggregate(std::iter::empty::<&SparseVector>())
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}

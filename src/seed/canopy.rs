//! Canopy seeder
//!
//! Builds threshold-defined canopies over the point set, emits their
//! centres as the initial centroids, and stamps every point with the set
//! of canopies it belongs to. The Lloyd engine then restricts each
//! point's assignment search to that candidate set.
//!
//! Canopy construction runs greedily per shard of the scan order; a
//! global dedup pass afterwards discards centres within `t2` of a
//! lower-indexed survivor, which is what permits the sharded step in the
//! first place. Membership uses `max(t1, 2*t2)`: after dedup, a point's
//! nearest surviving centre is at most `2*t2` away by triangle
//! inequality.

use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::sample::sample_rows;
use crate::storage::RelationStore;
use crate::types::{CentroidRow, DistanceMetric, PointRow};
use crate::{Error, Result};

/// Points per greedy shard during canopy construction.
const SHARD_ROWS: usize = 1024;

/// Threshold-estimation sample cap.
const ESTIMATE_SAMPLE: usize = 1000;

pub(crate) async fn seed(
    store: &dyn RelationStore,
    working: &str,
    metric: DistanceMetric,
    t1_opt: Option<f64>,
    t2_opt: Option<f64>,
    rng: &mut StdRng,
) -> Result<Vec<CentroidRow>> {
    let points = store.scan_points(working).await?;

    let (t1, t2) = match (t1_opt, t2_opt) {
        (Some(t1), Some(t2)) => (t1, t2),
        _ => {
            let (est_t1, est_t2) = estimate_thresholds(&points, metric, rng)?;
            let t1 = t1_opt.unwrap_or(est_t1);
            let t2 = t2_opt.unwrap_or(est_t2);
            if t1_opt.is_none() && t2_opt.is_none() && t1 <= t2 {
                return Err(Error::ThresholdUnavailable(format!(
                    "estimated t1 ({}) does not exceed estimated t2 ({})",
                    t1, t2
                )));
            }
            (t1, t2)
        }
    };
    if t1 <= t2 {
        return Err(Error::InvalidThreshold(format!(
            "t1 ({}) must exceed t2 ({})",
            t1, t2
        )));
    }

    let centroids = build_canopies(&points, metric, t2, SHARD_ROWS)?;
    tracing::debug!(
        "Canopy seeding produced {} centres (t1 = {}, t2 = {})",
        centroids.len(),
        t1,
        t2
    );

    let stamped = stamp_memberships(points, &centroids, metric, t1.max(2.0 * t2))?;
    store.truncate_relation(working).await?;
    store.insert_points(working, stamped).await?;

    Ok(centroids)
}

/// Estimate (t1, t2) from the pairwise-distance distribution of a sample.
///
/// The sorted upper-triangle distances are cut into 10 equi-count
/// buckets; t1 is the smallest distance of the top bucket and t2 the
/// largest distance of the bottom one.
fn estimate_thresholds(
    points: &[PointRow],
    metric: DistanceMetric,
    rng: &mut StdRng,
) -> Result<(f64, f64)> {
    let sample = sample_rows(points, ESTIMATE_SAMPLE, rng);
    if sample.len() < 2 {
        return Err(Error::ThresholdUnavailable(
            "need at least two points to estimate canopy thresholds".to_string(),
        ));
    }

    let mut distances: Vec<f64> = (0..sample.len())
        .into_par_iter()
        .map(|i| {
            let mut row = Vec::with_capacity(sample.len() - i - 1);
            for j in (i + 1)..sample.len() {
                row.push(metric.distance(&sample[i].coords, &sample[j].coords)?);
            }
            Ok(row)
        })
        .collect::<Result<Vec<Vec<f64>>>>()?
        .into_iter()
        .flatten()
        .collect();
    distances.sort_by(f64::total_cmp);

    let len = distances.len();
    let base = len / 10;
    if base == 0 {
        return Err(Error::ThresholdUnavailable(format!(
            "{} pairwise distances cannot fill 10 buckets",
            len
        )));
    }
    let rem = len % 10;
    // ntile semantics: the first `rem` buckets hold one extra row.
    let first_bucket = base + usize::from(rem > 0);
    let t2 = distances[first_bucket - 1];
    let t1 = distances[len - base];
    Ok((t1, t2))
}

/// Greedy canopy construction over shards of the scan order, followed by
/// the global dedup that keeps the lower-indexed of any two centres
/// within `t2` of each other.
fn build_canopies(
    points: &[PointRow],
    metric: DistanceMetric,
    t2: f64,
    shard_rows: usize,
) -> Result<Vec<CentroidRow>> {
    let shard_centres: Vec<Vec<&PointRow>> = points
        .par_chunks(shard_rows.max(1))
        .map(|chunk| shard_canopies(chunk, metric, t2))
        .collect::<Result<_>>()?;

    let mut survivors: Vec<&PointRow> = Vec::new();
    for candidate in shard_centres.into_iter().flatten() {
        let mut duplicate = false;
        for kept in &survivors {
            if metric.distance(&candidate.coords, &kept.coords)? <= t2 {
                duplicate = true;
                break;
            }
        }
        if !duplicate {
            survivors.push(candidate);
        }
    }

    Ok(survivors
        .into_iter()
        .enumerate()
        .map(|(i, p)| CentroidRow {
            cid: (i + 1) as i32,
            coords: p.coords.clone(),
        })
        .collect())
}

fn shard_canopies<'a>(
    chunk: &'a [PointRow],
    metric: DistanceMetric,
    t2: f64,
) -> Result<Vec<&'a PointRow>> {
    let mut centres: Vec<&PointRow> = Vec::new();
    for p in chunk {
        let mut covered = false;
        for c in &centres {
            if metric.distance(&p.coords, &c.coords)? <= t2 {
                covered = true;
                break;
            }
        }
        if !covered {
            centres.push(p);
        }
    }
    Ok(centres)
}

/// Store each point's canopy set. A point beyond the membership
/// threshold of every centre adopts its nearest centre, keeping the
/// canopy set non-empty.
fn stamp_memberships(
    points: Vec<PointRow>,
    centroids: &[CentroidRow],
    metric: DistanceMetric,
    threshold: f64,
) -> Result<Vec<PointRow>> {
    if centroids.is_empty() {
        return Err(Error::internal("canopy membership without canopy centres"));
    }
    points
        .into_par_iter()
        .map(|mut p| {
            let mut members = Vec::new();
            let mut nearest = centroids[0].cid;
            let mut nearest_dist = f64::INFINITY;
            for c in centroids {
                let d = metric.distance(&p.coords, &c.coords)?;
                if d <= threshold {
                    members.push(c.cid);
                }
                if d < nearest_dist {
                    nearest_dist = d;
                    nearest = c.cid;
                }
            }
            if members.is_empty() {
                members.push(nearest);
            }
            p.canopies = Some(members);
            Ok(p)
        })
        .collect()
}

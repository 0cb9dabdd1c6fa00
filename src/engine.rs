//! Lloyd iteration engine
//!
//! Runs k-means to a fixed point over double-buffered point relations.
//! Every phase is a pure function over the scanned working set; the only
//! cross-phase mutation is the swap of the centroid array and of the
//! active buffer between iterations.
//!
//! An iteration refreshes centroids from the previous assignment (a
//! centroid whose cluster emptied keeps its position), then reassigns
//! every point against the refreshed snapshot. Running the assignment
//! last means the emitted point table is exactly locally optimal for the
//! emitted centroids. The convergence log opens with the conventional 1.0
//! for the initial assignment pass and records the real reassignment
//! fraction of each iteration after it.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::run::RunCtx;
use crate::storage::RelationStore;
use crate::types::{CentroidRow, DistanceMetric, PointRow, SparseVector, UNASSIGNED};
use crate::{Error, Result};

/// What a finished (or stopped) Lloyd run hands back to the driver.
#[derive(Debug)]
pub(crate) struct LloydOutcome {
    pub centroids: Vec<CentroidRow>,
    pub iterations_run: usize,
    pub convergence_log: Vec<f64>,
    /// Buffer relation holding the final assignment.
    pub final_buffer: String,
}

pub(crate) async fn run_lloyd(
    store: &dyn RelationStore,
    ctx: &RunCtx,
    metric: DistanceMetric,
    mut centroids: Vec<CentroidRow>,
    buffer_a: &str,
    buffer_b: &str,
    kept_count: usize,
    max_iter: usize,
    conv_threshold: f64,
) -> Result<LloydOutcome> {
    centroids.sort_by_key(|c| c.cid);

    // Initial assignment: give every point a cid against the seeded
    // centroids without moving them.
    ctx.check_cancelled()?;
    let points = store.scan_points(buffer_a).await?;
    let assigned = assign_points(points, &centroids, metric)?;
    store.truncate_relation(buffer_b).await?;
    store.insert_points(buffer_b, assigned).await?;

    let mut current = buffer_b.to_string();
    let mut other = buffer_a.to_string();
    let mut convergence_log = vec![1.0];
    let mut iterations_run = 0;

    for iteration in 1..=max_iter {
        ctx.check_cancelled()?;

        let previous = store.scan_points(&current).await?;
        centroids = refresh_centroids(&previous, centroids, metric)?;
        let reassigned = assign_points(previous.clone(), &centroids, metric)?;

        let changed = previous
            .iter()
            .zip(reassigned.iter())
            .filter(|(before, after)| before.cid != after.cid)
            .count();
        let delta = changed as f64 / kept_count as f64;

        store.truncate_relation(&other).await?;
        store.insert_points(&other, reassigned).await?;
        std::mem::swap(&mut current, &mut other);

        convergence_log.push(delta);
        iterations_run = iteration;

        if ctx.verbose {
            tracing::info!(
                "Iteration {}: {} of {} points reassigned (delta {:.6})",
                iteration,
                changed,
                kept_count,
                delta
            );
        } else {
            tracing::debug!("Iteration {}: delta {:.6}", iteration, delta);
        }

        if delta < conv_threshold {
            break;
        }
    }

    Ok(LloydOutcome {
        centroids,
        iterations_run,
        convergence_log,
        final_buffer: current,
    })
}

/// Assign each point to its nearest centroid, searching only the point's
/// canopy set when one is present. Ties go to the lowest cid.
fn assign_points(
    points: Vec<PointRow>,
    centroids: &[CentroidRow],
    metric: DistanceMetric,
) -> Result<Vec<PointRow>> {
    points
        .into_par_iter()
        .map(|mut p| {
            let mut best_cid = UNASSIGNED;
            let mut best = f64::INFINITY;
            match &p.canopies {
                Some(cids) => {
                    for &cid in cids {
                        let centroid = centroid_by_cid(centroids, cid)?;
                        let d = metric.distance(&p.coords, &centroid.coords)?;
                        if d < best {
                            best = d;
                            best_cid = cid;
                        }
                    }
                }
                None => {
                    for centroid in centroids {
                        let d = metric.distance(&p.coords, &centroid.coords)?;
                        if d < best {
                            best = d;
                            best_cid = centroid.cid;
                        }
                    }
                }
            }
            if best_cid == UNASSIGNED {
                return Err(Error::internal(format!(
                    "point {} has no candidate centroids",
                    p.pid
                )));
            }
            p.cid = best_cid;
            Ok(p)
        })
        .collect()
}

/// Recompute each centroid as the per-metric aggregate of its cluster.
/// A centroid with no assigned points keeps its previous position.
fn refresh_centroids(
    points: &[PointRow],
    previous: Vec<CentroidRow>,
    metric: DistanceMetric,
) -> Result<Vec<CentroidRow>> {
    let mut clusters: HashMap<i32, Vec<&SparseVector>> = HashMap::new();
    for p in points {
        if p.cid != UNASSIGNED {
            clusters.entry(p.cid).or_default().push(&p.coords);
        }
    }

    previous
        .into_par_iter()
        .map(|c| match clusters.get(&c.cid) {
            Some(members) => Ok(CentroidRow {
                cid: c.cid,
                coords: metric.aggregate(members.iter().copied())?,
            }),
            None => Ok(c),
        })
        .collect()
}

/// Centroid ids are dense 1..k over the sorted array, so lookups are a
/// direct index; fall back to an error rather than indexing blindly.
fn centroid_by_cid(centroids: &[CentroidRow], cid: i32) -> Result<&CentroidRow> {
    let idx = (cid - 1) as usize;
    match centroids.get(idx) {
        Some(c) if c.cid == cid => Ok(c),
        _ => Err(Error::internal(format!("unknown centroid id {}", cid))),
    }
}

//! Run driver
//!
//! The single entry point: validates options, stages working relations,
//! dispatches seeding, runs the Lloyd engine, evaluates, and emits the
//! two output relations. All run-scoped state lives in an explicit
//! context value; temp relations are owned by the run and dropped on
//! every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::engine;
use crate::evaluate;
use crate::ingest;
use crate::seed;
use crate::storage::{quote_ident, validate_ident, RelationKind, RelationStore};
use crate::types::{CentroidRow, DistanceMetric, InitMethod, SourceSpec, SparseVector};
use crate::{Error, Result};

pub const DEFAULT_MAX_ITER: usize = 20;
pub const DEFAULT_CONV_THRESHOLD: f64 = 0.001;

/// Options accepted by [`run_kmeans`].
///
/// `max_iter` and `conv_threshold` fall back to the defaults when absent
/// or non-positive; a missing `evaluate` means true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Point source relation.
    pub src_relation: String,
    /// Vector column of the source.
    pub src_col_data: String,
    /// Optional id column; dense ids are synthesized when absent.
    pub src_col_id: Option<String>,
    /// Relation holding explicit initial centroids. When given together
    /// with `init_cset_col`, seeding is skipped and `k` is derived.
    pub init_cset_rel: Option<String>,
    /// Vector column of the initial-centroid relation.
    pub init_cset_col: Option<String>,
    pub init_method: InitMethod,
    /// kmeans++ sub-sample fraction in (0, 1].
    pub sample_frac: Option<f64>,
    /// Number of centroids; required unless centroids are provided or
    /// canopy seeding is selected.
    pub k: Option<usize>,
    /// Canopy thresholds; estimated from the data when absent.
    pub t1: Option<f64>,
    pub t2: Option<f64>,
    pub dist_metric: DistanceMetric,
    pub max_iter: Option<i64>,
    pub conv_threshold: Option<f64>,
    pub evaluate: Option<bool>,
    pub out_points: String,
    pub out_centroids: String,
    pub verbose: bool,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl RunOptions {
    pub fn new(
        src_relation: impl Into<String>,
        src_col_data: impl Into<String>,
        out_points: impl Into<String>,
        out_centroids: impl Into<String>,
    ) -> Self {
        Self {
            src_relation: src_relation.into(),
            src_col_data: src_col_data.into(),
            src_col_id: None,
            init_cset_rel: None,
            init_cset_col: None,
            init_method: InitMethod::Random,
            sample_frac: None,
            k: None,
            t1: None,
            t2: None,
            dist_metric: DistanceMetric::L2Norm,
            max_iter: None,
            conv_threshold: None,
            evaluate: None,
            out_points: out_points.into(),
            out_centroids: out_centroids.into(),
            verbose: false,
            seed: None,
        }
    }
}

/// What a finished run reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub src_relation: String,
    pub kept_points: usize,
    pub init_method: InitMethod,
    pub k: usize,
    pub dist_metric: DistanceMetric,
    pub iterations_run: usize,
    /// Total within-cluster cost; `None` when evaluation is disabled.
    pub cost: Option<f64>,
    /// Simplified silhouette; `None` when evaluation is disabled.
    pub silhouette: Option<f64>,
    pub out_points: String,
    pub out_centroids: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Cooperative cancellation flag, observed at phase boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Run-scoped context threaded through the phases.
pub(crate) struct RunCtx {
    pub verbose: bool,
    pub out_points: String,
    pub out_centroids: String,
    cancel: CancelHandle,
    temps: Mutex<Vec<String>>,
}

impl RunCtx {
    pub(crate) fn new(options: &RunOptions, cancel: CancelHandle) -> Self {
        Self {
            verbose: options.verbose,
            out_points: options.out_points.clone(),
            out_centroids: options.out_centroids.clone(),
            cancel,
            temps: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn track_temp(&self, name: String) {
        self.temps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(name);
    }

    fn take_temps(&self) -> Vec<String> {
        std::mem::take(
            &mut *self
                .temps
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

/// Unique name for a run-owned intermediate relation.
pub(crate) fn temp_name(purpose: &str) -> String {
    format!("__bildam_{}_{}", purpose, uuid::Uuid::new_v4().simple())
}

/// Run k-means over `options.src_relation` and materialise the final
/// assignment and centroid relations.
pub async fn run_kmeans(
    store: Arc<dyn RelationStore>,
    options: RunOptions,
) -> Result<RunSummary> {
    run_kmeans_cancellable(store, options, CancelHandle::new()).await
}

/// [`run_kmeans`] with an externally owned cancellation handle. A
/// cancelled run drops its intermediate relations and reports
/// [`Error::Cancelled`]; the output relations are left as created.
pub async fn run_kmeans_cancellable(
    store: Arc<dyn RelationStore>,
    options: RunOptions,
    cancel: CancelHandle,
) -> Result<RunSummary> {
    let started_at = Utc::now();
    let resolved = resolve(&options)?;

    // Name collisions fail before any other work; the outputs themselves
    // are claimed once ingest has validated the input.
    for name in [&options.out_points, &options.out_centroids] {
        if store.relation_exists(name).await? {
            return Err(Error::OutputExists(name.clone()));
        }
    }

    let ctx = RunCtx::new(&options, cancel);
    let result = drive(store.as_ref(), &ctx, &options, &resolved).await;

    // Intermediates go away on success, failure, and cancellation alike.
    for name in ctx.take_temps() {
        if let Err(e) = store.drop_relation(&name).await {
            tracing::warn!("Failed to drop temp relation {}: {}", quote_ident(&name), e);
        }
    }

    let outcome = result?;
    let summary = RunSummary {
        src_relation: options.src_relation,
        kept_points: outcome.kept_points,
        init_method: resolved.mode,
        k: outcome.k,
        dist_metric: resolved.metric,
        iterations_run: outcome.iterations_run,
        cost: outcome.cost,
        silhouette: outcome.silhouette,
        out_points: options.out_points,
        out_centroids: options.out_centroids,
        started_at,
        finished_at: Utc::now(),
    };
    tracing::info!(
        "Clustered {} points into {} clusters in {} iterations ({} / {})",
        summary.kept_points,
        summary.k,
        summary.iterations_run,
        summary.init_method,
        summary.dist_metric
    );
    Ok(summary)
}

struct Resolved {
    mode: InitMethod,
    metric: DistanceMetric,
    k: Option<usize>,
    max_iter: usize,
    conv_threshold: f64,
    evaluate: bool,
}

fn resolve(options: &RunOptions) -> Result<Resolved> {
    validate_ident(&options.src_relation)?;
    validate_ident(&options.out_points)?;
    validate_ident(&options.out_centroids)?;
    if options.out_points == options.out_centroids {
        return Err(Error::invalid_input(
            "out_points and out_centroids must name different relations",
        ));
    }

    let mode = match (&options.init_cset_rel, &options.init_cset_col) {
        (Some(rel), Some(_)) => {
            validate_ident(rel)?;
            InitMethod::Provided
        }
        (None, None) => {
            if options.init_method == InitMethod::Provided {
                return Err(Error::invalid_input(
                    "init method 'provided' requires init_cset_rel and init_cset_col",
                ));
            }
            options.init_method
        }
        _ => {
            return Err(Error::invalid_input(
                "init_cset_rel and init_cset_col must be given together",
            ));
        }
    };

    let k = match mode {
        InitMethod::Provided | InitMethod::Canopy => {
            if mode == InitMethod::Canopy && options.k.is_some() {
                tracing::warn!("k is ignored with canopy seeding; the canopy count decides");
            }
            None
        }
        _ => match options.k {
            Some(0) | None => {
                return Err(Error::invalid_input(format!(
                    "k must be a positive integer for init method '{}'",
                    mode
                )));
            }
            Some(k) => Some(k),
        },
    };

    if let Some(frac) = options.sample_frac {
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(Error::invalid_input(format!(
                "sample_frac must lie in (0, 1], got {}",
                frac
            )));
        }
    }

    for (name, value) in [("t1", options.t1), ("t2", options.t2)] {
        if let Some(v) = value {
            if v <= 0.0 {
                return Err(Error::InvalidThreshold(format!(
                    "{} must be positive, got {}",
                    name, v
                )));
            }
        }
    }
    if let (Some(t1), Some(t2)) = (options.t1, options.t2) {
        if t1 <= t2 {
            return Err(Error::InvalidThreshold(format!(
                "t1 ({}) must exceed t2 ({})",
                t1, t2
            )));
        }
    }

    let max_iter = match options.max_iter {
        Some(v) if v > 0 => v as usize,
        _ => DEFAULT_MAX_ITER,
    };
    let conv_threshold = match options.conv_threshold {
        Some(v) if v > 0.0 => v,
        _ => DEFAULT_CONV_THRESHOLD,
    };

    Ok(Resolved {
        mode,
        metric: options.dist_metric,
        k,
        max_iter,
        conv_threshold,
        evaluate: options.evaluate.unwrap_or(true),
    })
}

struct DriveOutcome {
    kept_points: usize,
    k: usize,
    iterations_run: usize,
    cost: Option<f64>,
    silhouette: Option<f64>,
}

async fn drive(
    store: &dyn RelationStore,
    ctx: &RunCtx,
    options: &RunOptions,
    resolved: &Resolved,
) -> Result<DriveOutcome> {
    ctx.check_cancelled()?;

    let buffer_a = temp_name("points_a");
    ctx.track_temp(buffer_a.clone());
    store.create_points(&buffer_a).await?;
    let buffer_b = temp_name("points_b");
    ctx.track_temp(buffer_b.clone());
    store.create_points(&buffer_b).await?;

    let src = SourceSpec {
        relation: options.src_relation.clone(),
        coord_column: options.src_col_data.clone(),
        id_column: options.src_col_id.clone(),
    };
    let report = ingest::build_point_set(store, &src, &buffer_a).await?;

    // Ingest validated the input; claim the outputs before seeding so a
    // later failure leaves them behind in their partial state.
    ctx.check_cancelled()?;
    store.create_points(&ctx.out_points).await?;
    store.create_centroids(&ctx.out_centroids).await?;

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    ctx.check_cancelled()?;
    let centroids = match resolved.mode {
        InitMethod::Provided => {
            provided_centroids(store, options, report.dim, report.kept_count).await?
        }
        InitMethod::Random => {
            let k = resolved.k.ok_or_else(|| Error::internal("random seeding without k"))?;
            seed::random::seed(store, &buffer_a, k, &mut rng).await?
        }
        InitMethod::KmeansPlusPlus => {
            let k = resolved.k.ok_or_else(|| Error::internal("kmeans++ seeding without k"))?;
            seed::kmeanspp::seed(
                store,
                ctx,
                &buffer_a,
                k,
                options.sample_frac,
                resolved.metric,
                &mut rng,
            )
            .await?
        }
        InitMethod::Canopy => {
            seed::canopy::seed(
                store,
                &buffer_a,
                resolved.metric,
                options.t1,
                options.t2,
                &mut rng,
            )
            .await?
        }
    };
    let k = centroids.len();

    let outcome = engine::run_lloyd(
        store,
        ctx,
        resolved.metric,
        centroids,
        &buffer_a,
        &buffer_b,
        report.kept_count,
        resolved.max_iter,
        resolved.conv_threshold,
    )
    .await?;

    tracing::debug!(
        "Convergence log after {} iterations: {:?}",
        outcome.iterations_run,
        outcome.convergence_log
    );

    ctx.check_cancelled()?;
    let final_points = store.scan_points(&outcome.final_buffer).await?;
    store
        .insert_points(&ctx.out_points, final_points.clone())
        .await?;
    store
        .insert_centroids(&ctx.out_centroids, outcome.centroids.clone())
        .await?;

    let (cost, silhouette) = if resolved.evaluate {
        let eval = evaluate::evaluate_model(&final_points, &outcome.centroids, resolved.metric)?;
        (Some(eval.cost), Some(eval.silhouette))
    } else {
        (None, None)
    };

    Ok(DriveOutcome {
        kept_points: report.kept_count,
        k,
        iterations_run: outcome.iterations_run,
        cost,
        silhouette,
    })
}

/// Load caller-supplied initial centroids, relabelling them densely 1..k.
async fn provided_centroids(
    store: &dyn RelationStore,
    options: &RunOptions,
    expected_dim: u32,
    kept_count: usize,
) -> Result<Vec<CentroidRow>> {
    let rel = options
        .init_cset_rel
        .as_deref()
        .ok_or_else(|| Error::internal("provided centroids without a relation"))?;
    let col = options
        .init_cset_col
        .as_deref()
        .ok_or_else(|| Error::internal("provided centroids without a column"))?;

    let coords: Vec<SparseVector> = match store.relation_kind(rel).await? {
        None => return Err(Error::RelationNotFound(rel.to_string())),
        Some(RelationKind::Centroids) => {
            let mut rows = store.scan_centroids(rel).await?;
            rows.sort_by_key(|c| c.cid);
            rows.into_iter().map(|c| c.coords).collect()
        }
        Some(RelationKind::Source) => {
            let spec = SourceSpec::new(rel, col);
            let rows = store.scan_source(&spec).await?;
            let mut coords = Vec::with_capacity(rows.len());
            for row in rows {
                let dense = row.coords.ok_or_else(|| {
                    Error::invalid_input("initial centroids must not be null")
                })?;
                let v = SparseVector::from_dense(&dense);
                if v.has_nan() {
                    return Err(Error::invalid_input(
                        "initial centroids must not contain NaN",
                    ));
                }
                coords.push(v);
            }
            coords
        }
        Some(RelationKind::Points) => {
            return Err(Error::invalid_input(format!(
                "relation {} holds working points, not centroids",
                quote_ident(rel)
            )));
        }
    };

    if coords.is_empty() {
        return Err(Error::invalid_input(format!(
            "initial centroid relation {} is empty",
            quote_ident(rel)
        )));
    }
    for v in &coords {
        if v.dim() != expected_dim {
            return Err(Error::invalid_input(format!(
                "initial centroids have dimension {} but points have dimension {}",
                v.dim(),
                expected_dim
            )));
        }
    }
    if kept_count < coords.len() {
        return Err(Error::InsufficientPoints {
            kept: kept_count,
            required: coords.len(),
        });
    }

    Ok(coords
        .into_iter()
        .enumerate()
        .map(|(i, coords)| CentroidRow {
            cid: (i + 1) as i32,
            coords,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_options() -> RunOptions {
        let mut options = RunOptions::new("src", "coords", "pts_out", "cset_out");
        options.k = Some(2);
        options
    }

    #[test]
    fn defaults_substitute_for_non_positive_knobs() {
        let mut options = base_options();
        options.max_iter = Some(-3);
        options.conv_threshold = Some(0.0);
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.max_iter, DEFAULT_MAX_ITER);
        assert_eq!(resolved.conv_threshold, DEFAULT_CONV_THRESHOLD);
        assert!(resolved.evaluate);
    }

    #[test]
    fn k_is_required_for_random_and_kmeanspp() {
        let mut options = base_options();
        options.k = None;
        assert!(matches!(resolve(&options), Err(Error::InvalidInput(_))));

        options.init_method = InitMethod::Canopy;
        assert!(resolve(&options).is_ok());
    }

    #[test]
    fn cset_options_must_come_in_pairs() {
        let mut options = base_options();
        options.init_cset_rel = Some("cset".to_string());
        assert!(matches!(resolve(&options), Err(Error::InvalidInput(_))));

        options.init_cset_col = Some("coords".to_string());
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.mode, InitMethod::Provided);
    }

    #[test]
    fn thresholds_must_be_positive_and_ordered() {
        let mut options = base_options();
        options.t1 = Some(-1.0);
        assert!(matches!(
            resolve(&options),
            Err(Error::InvalidThreshold(_))
        ));

        options.t1 = Some(1.0);
        options.t2 = Some(2.0);
        assert!(matches!(
            resolve(&options),
            Err(Error::InvalidThreshold(_))
        ));
    }

    #[test]
    fn sample_frac_bounds() {
        let mut options = base_options();
        options.sample_frac = Some(1.5);
        assert!(matches!(resolve(&options), Err(Error::InvalidInput(_))));
        options.sample_frac = Some(1.0);
        assert!(resolve(&options).is_ok());
    }

    #[test]
    fn output_names_must_differ() {
        let mut options = base_options();
        options.out_centroids = options.out_points.clone();
        assert!(matches!(resolve(&options), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn cancel_handle_flips_once() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel();
        assert!(handle.is_cancelled());
        let clone = handle.clone();
        assert!(clone.is_cancelled());
    }
}

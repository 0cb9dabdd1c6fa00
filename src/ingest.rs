//! Data ingest and validation
//!
//! Builds the working point set from a source relation: synthesizes ids
//! when the source has none, strips null vectors, and enforces a single
//! dimension across the run.

use std::collections::HashSet;

use crate::storage::{quote_ident, RelationStore};
use crate::types::{PointRow, SourceSpec, SparseVector};
use crate::{Error, Result};

/// What ingest kept, out of what the source produced.
#[derive(Debug, Clone, Copy)]
pub struct IngestReport {
    pub source_count: usize,
    pub kept_count: usize,
    pub dim: u32,
}

/// Materialise the working point set into `dest` (an existing, empty
/// point relation).
pub(crate) async fn build_point_set(
    store: &dyn RelationStore,
    src: &SourceSpec,
    dest: &str,
) -> Result<IngestReport> {
    let rows = store.scan_source(src).await?;
    let source_count = rows.len();
    if source_count == 0 {
        return Err(Error::invalid_input(format!(
            "source relation {} is empty",
            quote_ident(&src.relation)
        )));
    }

    // Ids first: a synthesized ordering covers every source row, dropped
    // or not, so re-runs over the same source agree on pids.
    let mut seen = HashSet::with_capacity(source_count);
    let mut keyed = Vec::with_capacity(source_count);
    for (i, row) in rows.into_iter().enumerate() {
        let pid = match &src.id_column {
            Some(col) => row.id.ok_or_else(|| {
                Error::invalid_input(format!("null id in column {}", quote_ident(col)))
            })?,
            None => (i + 1) as i64,
        };
        if !seen.insert(pid) {
            return Err(Error::invalid_input(format!("duplicate point id {}", pid)));
        }
        keyed.push((pid, row.coords));
    }

    let mut points = Vec::with_capacity(keyed.len());
    let mut dim: Option<u32> = None;
    for (pid, coords) in keyed {
        let Some(dense) = coords else {
            continue;
        };
        let coords = SparseVector::from_dense(&dense);
        if coords.has_nan() {
            continue;
        }
        match dim {
            None => dim = Some(coords.dim()),
            Some(d) if d != coords.dim() => {
                return Err(Error::invalid_input("points must have the same dimensions"));
            }
            Some(_) => {}
        }
        points.push(PointRow::new(pid, coords));
    }

    let kept_count = points.len();
    let dim = dim.ok_or_else(|| {
        Error::invalid_input(format!(
            "source relation {} has no usable points",
            quote_ident(&src.relation)
        ))
    })?;

    store.insert_points(dest, points).await?;

    tracing::info!(
        "Ingested {} of {} points from {} (dimension {})",
        kept_count,
        source_count,
        quote_ident(&src.relation),
        dim
    );

    Ok(IngestReport {
        source_count,
        kept_count,
        dim,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mem::MemStore;
    use crate::types::{ColumnValue, SourceRecord};

    fn vector_record(coords: Vec<f64>) -> SourceRecord {
        SourceRecord::with_columns([("v", ColumnValue::Vector(coords))])
    }

    async fn setup(records: Vec<SourceRecord>) -> MemStore {
        let store = MemStore::new();
        store.register_source("src", records).await.unwrap();
        store.create_points("work").await.unwrap();
        store
    }

    #[tokio::test]
    async fn synthesizes_dense_ids() {
        let store = setup(vec![
            vector_record(vec![1.0, 0.0]),
            vector_record(vec![0.0, 1.0]),
        ])
        .await;

        let report = build_point_set(&store, &SourceSpec::new("src", "v"), "work")
            .await
            .unwrap();
        assert_eq!(report.kept_count, 2);
        assert_eq!(report.dim, 2);

        let pids: Vec<i64> = store
            .scan_points("work")
            .await
            .unwrap()
            .iter()
            .map(|p| p.pid)
            .collect();
        assert_eq!(pids, vec![1, 2]);
    }

    #[tokio::test]
    async fn drops_null_and_nan_rows() {
        let store = setup(vec![
            vector_record(vec![1.0, 0.0]),
            SourceRecord::with_columns([("v", ColumnValue::Null)]),
            vector_record(vec![f64::NAN, 1.0]),
            vector_record(vec![0.0, 2.0]),
        ])
        .await;

        let report = build_point_set(&store, &SourceSpec::new("src", "v"), "work")
            .await
            .unwrap();
        assert_eq!(report.source_count, 4);
        assert_eq!(report.kept_count, 2);

        // Synthesized ids still cover the dropped rows.
        let pids: Vec<i64> = store
            .scan_points("work")
            .await
            .unwrap()
            .iter()
            .map(|p| p.pid)
            .collect();
        assert_eq!(pids, vec![1, 4]);
    }

    #[tokio::test]
    async fn rejects_mixed_dimensions() {
        let store = setup(vec![
            vector_record(vec![1.0, 0.0]),
            vector_record(vec![1.0, 0.0, 0.0]),
        ])
        .await;

        let err = build_point_set(&store, &SourceSpec::new("src", "v"), "work")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("same dimensions")));
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let store = MemStore::new();
        let records = vec![
            SourceRecord::with_columns([
                ("v", ColumnValue::Vector(vec![1.0])),
                ("id", ColumnValue::Bigint(5)),
            ]),
            SourceRecord::with_columns([
                ("v", ColumnValue::Vector(vec![2.0])),
                ("id", ColumnValue::Bigint(5)),
            ]),
        ];
        store.register_source("src", records).await.unwrap();
        store.create_points("work").await.unwrap();

        let spec = SourceSpec::new("src", "v").with_id_column("id");
        let err = build_point_set(&store, &spec, "work").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("duplicate")));
    }

    #[tokio::test]
    async fn rejects_empty_source() {
        let store = setup(Vec::new()).await;
        let err = build_point_set(&store, &SourceSpec::new("src", "v"), "work")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}

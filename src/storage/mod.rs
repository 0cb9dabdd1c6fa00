//! Relation storage abstraction
//!
//! The engine only asks its substrate for a handful of verbs: scan a
//! relation, insert rows, and create/truncate/drop working tables.
//! Grouped aggregation and cumulative sums are computed by the engine over
//! scanned rows, so any store that can satisfy these verbs can host a run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{CentroidRow, ColumnValue, PointRow, SourceRecord, SourceRow, SourceSpec};
use crate::{Error, Result};

pub mod local;
pub mod mem;

/// Row kind a relation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Source,
    Points,
    Centroids,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RelationKind::Source => "source",
            RelationKind::Points => "points",
            RelationKind::Centroids => "centroids",
        };
        f.write_str(name)
    }
}

/// Storage substrate trait
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Row kind stored under `name`, or `None` if the relation is absent.
    async fn relation_kind(&self, name: &str) -> Result<Option<RelationKind>>;

    /// Check whether a relation of any kind exists under `name`.
    async fn relation_exists(&self, name: &str) -> Result<bool> {
        Ok(self.relation_kind(name).await?.is_some())
    }

    /// Create an empty point relation; fails if `name` is taken.
    async fn create_points(&self, name: &str) -> Result<()>;

    /// Create an empty centroid relation; fails if `name` is taken.
    async fn create_centroids(&self, name: &str) -> Result<()>;

    /// Drop a relation; dropping a missing relation is a no-op.
    async fn drop_relation(&self, name: &str) -> Result<()>;

    /// Remove all rows, keeping the relation and its kind.
    async fn truncate_relation(&self, name: &str) -> Result<()>;

    /// Stage raw rows as a scannable source relation.
    async fn register_source(&self, name: &str, rows: Vec<SourceRecord>) -> Result<()>;

    /// Project a source relation onto the id/coordinate columns.
    async fn scan_source(&self, spec: &SourceSpec) -> Result<Vec<SourceRow>>;

    async fn scan_points(&self, name: &str) -> Result<Vec<PointRow>>;

    async fn insert_points(&self, name: &str, rows: Vec<PointRow>) -> Result<()>;

    async fn scan_centroids(&self, name: &str) -> Result<Vec<CentroidRow>>;

    async fn insert_centroids(&self, name: &str, rows: Vec<CentroidRow>) -> Result<()>;
}

/// Storage configuration
#[derive(Debug, Clone)]
pub enum StoreConfig {
    Mem,
    Local { root_path: String },
}

/// Create a store from config
pub async fn create_store(config: StoreConfig) -> Result<Arc<dyn RelationStore>> {
    match config {
        StoreConfig::Mem => Ok(Arc::new(mem::MemStore::new())),
        StoreConfig::Local { root_path } => {
            let store = local::LocalStore::new(root_path)?;
            Ok(Arc::new(store))
        }
    }
}

/// A materialized relation, tagged by the row kind it holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Relation {
    Source(Vec<SourceRecord>),
    Points(Vec<PointRow>),
    Centroids(Vec<CentroidRow>),
}

impl Relation {
    pub(crate) fn kind(&self) -> RelationKind {
        match self {
            Relation::Source(_) => RelationKind::Source,
            Relation::Points(_) => RelationKind::Points,
            Relation::Centroids(_) => RelationKind::Centroids,
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Relation::Source(rows) => rows.clear(),
            Relation::Points(rows) => rows.clear(),
            Relation::Centroids(rows) => rows.clear(),
        }
    }
}

pub(crate) fn kind_mismatch(name: &str, relation: &Relation, wanted: RelationKind) -> Error {
    Error::storage(format!(
        "relation {} holds {} rows, not {}",
        quote_ident(name),
        relation.kind(),
        wanted
    ))
}

/// Quote an identifier for diagnostics and query text, doubling any
/// embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Reject identifiers the substrate cannot address safely.
pub fn validate_ident(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_input("relation name must not be empty"));
    }
    if name.len() > 128 {
        return Err(Error::invalid_input(format!(
            "relation name {} exceeds 128 characters",
            quote_ident(name)
        )));
    }
    if name
        .chars()
        .any(|c| c.is_control() || c == '/' || c == '\\')
    {
        return Err(Error::invalid_input(format!(
            "relation name {} contains unsupported characters",
            quote_ident(name)
        )));
    }
    Ok(())
}

/// Shared source projection used by both store implementations.
pub(crate) fn project_source(rows: &[SourceRecord], spec: &SourceSpec) -> Result<Vec<SourceRow>> {
    let mut out = Vec::with_capacity(rows.len());
    for record in rows {
        let coords = match record.columns.get(&spec.coord_column) {
            Some(ColumnValue::Vector(v)) => Some(v.clone()),
            Some(ColumnValue::Null) => None,
            Some(other) => {
                return Err(Error::invalid_input(format!(
                    "column {} of relation {} is not a vector column (found {:?})",
                    quote_ident(&spec.coord_column),
                    quote_ident(&spec.relation),
                    other
                )));
            }
            None => {
                return Err(Error::invalid_input(format!(
                    "relation {} has no column {}",
                    quote_ident(&spec.relation),
                    quote_ident(&spec.coord_column)
                )));
            }
        };
        let id = match &spec.id_column {
            Some(col) => match record.columns.get(col) {
                Some(ColumnValue::Bigint(v)) => Some(*v),
                Some(ColumnValue::Null) => None,
                Some(other) => {
                    return Err(Error::invalid_input(format!(
                        "column {} of relation {} is not a bigint column (found {:?})",
                        quote_ident(col),
                        quote_ident(&spec.relation),
                        other
                    )));
                }
                None => {
                    return Err(Error::invalid_input(format!(
                        "relation {} has no column {}",
                        quote_ident(&spec.relation),
                        quote_ident(col)
                    )));
                }
            },
            None => None,
        };
        out.push(SourceRow { id, coords });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceRecord;

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn validate_ident_rejects_bad_names() {
        assert!(validate_ident("points_out").is_ok());
        assert!(validate_ident("").is_err());
        assert!(validate_ident("a/b").is_err());
        assert!(validate_ident(&"x".repeat(200)).is_err());
    }

    #[test]
    fn project_source_reports_missing_column() {
        let rows = vec![SourceRecord::with_columns([(
            "coords",
            ColumnValue::Vector(vec![1.0]),
        )])];
        let spec = SourceSpec::new("src", "missing");
        let err = project_source(&rows, &spec).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn project_source_surfaces_nulls() {
        let rows = vec![
            SourceRecord::with_columns([
                ("coords", ColumnValue::Vector(vec![1.0, 2.0])),
                ("id", ColumnValue::Bigint(7)),
            ]),
            SourceRecord::with_columns([
                ("coords", ColumnValue::Null),
                ("id", ColumnValue::Null),
            ]),
        ];
        let spec = SourceSpec::new("src", "coords").with_id_column("id");
        let projected = project_source(&rows, &spec).unwrap();
        assert_eq!(projected[0].id, Some(7));
        assert_eq!(projected[0].coords.as_deref(), Some(&[1.0, 2.0][..]));
        assert!(projected[1].id.is_none());
        assert!(projected[1].coords.is_none());
    }
}

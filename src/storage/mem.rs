//! In-memory relation store
//!
//! The default substrate for embedded use and tests. Relations live in a
//! concurrent map; temp tables and outputs share the same namespace.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::types::{CentroidRow, PointRow, SourceRecord, SourceRow, SourceSpec};
use crate::{Error, Result};

use super::{kind_mismatch, project_source, quote_ident, Relation, RelationKind, RelationStore};

/// In-memory store
#[derive(Default)]
pub struct MemStore {
    relations: DashMap<String, Relation>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn create(&self, name: &str, relation: Relation) -> Result<()> {
        match self.relations.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::storage(format!(
                "relation {} already exists",
                quote_ident(name)
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(relation);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RelationStore for MemStore {
    async fn relation_kind(&self, name: &str) -> Result<Option<RelationKind>> {
        Ok(self.relations.get(name).map(|r| r.kind()))
    }

    async fn create_points(&self, name: &str) -> Result<()> {
        self.create(name, Relation::Points(Vec::new()))
    }

    async fn create_centroids(&self, name: &str) -> Result<()> {
        self.create(name, Relation::Centroids(Vec::new()))
    }

    async fn drop_relation(&self, name: &str) -> Result<()> {
        self.relations.remove(name);
        Ok(())
    }

    async fn truncate_relation(&self, name: &str) -> Result<()> {
        match self.relations.get_mut(name) {
            Some(mut relation) => {
                relation.clear();
                Ok(())
            }
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }

    async fn register_source(&self, name: &str, rows: Vec<SourceRecord>) -> Result<()> {
        self.relations
            .insert(name.to_string(), Relation::Source(rows));
        Ok(())
    }

    async fn scan_source(&self, spec: &SourceSpec) -> Result<Vec<SourceRow>> {
        match self.relations.get(&spec.relation) {
            Some(relation) => match relation.value() {
                Relation::Source(rows) => project_source(rows, spec),
                other => Err(kind_mismatch(&spec.relation, other, RelationKind::Source)),
            },
            None => Err(Error::RelationNotFound(spec.relation.clone())),
        }
    }

    async fn scan_points(&self, name: &str) -> Result<Vec<PointRow>> {
        match self.relations.get(name) {
            Some(relation) => match relation.value() {
                Relation::Points(rows) => Ok(rows.clone()),
                other => Err(kind_mismatch(name, other, RelationKind::Points)),
            },
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }

    async fn insert_points(&self, name: &str, rows: Vec<PointRow>) -> Result<()> {
        match self.relations.get_mut(name) {
            Some(mut relation) => match relation.value_mut() {
                Relation::Points(existing) => {
                    existing.extend(rows);
                    Ok(())
                }
                other => Err(kind_mismatch(name, other, RelationKind::Points)),
            },
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }

    async fn scan_centroids(&self, name: &str) -> Result<Vec<CentroidRow>> {
        match self.relations.get(name) {
            Some(relation) => match relation.value() {
                Relation::Centroids(rows) => Ok(rows.clone()),
                other => Err(kind_mismatch(name, other, RelationKind::Centroids)),
            },
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }

    async fn insert_centroids(&self, name: &str, rows: Vec<CentroidRow>) -> Result<()> {
        match self.relations.get_mut(name) {
            Some(mut relation) => match relation.value_mut() {
                Relation::Centroids(existing) => {
                    existing.extend(rows);
                    Ok(())
                }
                other => Err(kind_mismatch(name, other, RelationKind::Centroids)),
            },
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }
}

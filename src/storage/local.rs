//! Local filesystem relation store
//!
//! One JSON file per relation under a root directory. Mutations are
//! serialised behind a single lock; a clustering run touches each working
//! relation from one phase at a time, so contention is not a concern.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use crate::types::{CentroidRow, PointRow, SourceRecord, SourceRow, SourceSpec};
use crate::{Error, Result};

use super::{
    kind_mismatch, project_source, quote_ident, validate_ident, Relation, RelationKind,
    RelationStore,
};

/// Local filesystem store
pub struct LocalStore {
    root_path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(root_path: impl Into<PathBuf>) -> Result<Self> {
        let root_path = root_path.into();
        std::fs::create_dir_all(&root_path)?;
        Ok(Self {
            root_path,
            write_lock: Mutex::new(()),
        })
    }

    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        validate_ident(name)?;
        Ok(self.root_path.join(format!("{}.json", name)))
    }

    async fn load(&self, name: &str) -> Result<Option<Relation>> {
        let path = self.resolve_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path).await?;
        let relation = serde_json::from_slice(&data)?;
        Ok(Some(relation))
    }

    async fn save(&self, name: &str, relation: &Relation) -> Result<()> {
        let path = self.resolve_path(name)?;
        let data = serde_json::to_vec(relation)?;
        write_atomic(&path, &data).await
    }

    async fn create(&self, name: &str, relation: Relation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.load(name).await?.is_some() {
            return Err(Error::storage(format!(
                "relation {} already exists",
                quote_ident(name)
            )));
        }
        self.save(name, &relation).await
    }
}

/// Write through a temp file so readers never observe a half-written
/// relation.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl RelationStore for LocalStore {
    async fn relation_kind(&self, name: &str) -> Result<Option<RelationKind>> {
        Ok(self.load(name).await?.map(|r| r.kind()))
    }

    async fn create_points(&self, name: &str) -> Result<()> {
        self.create(name, Relation::Points(Vec::new())).await
    }

    async fn create_centroids(&self, name: &str) -> Result<()> {
        self.create(name, Relation::Centroids(Vec::new())).await
    }

    async fn drop_relation(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.resolve_path(name)?;
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn truncate_relation(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut relation = self
            .load(name)
            .await?
            .ok_or_else(|| Error::RelationNotFound(name.to_string()))?;
        relation.clear();
        self.save(name, &relation).await
    }

    async fn register_source(&self, name: &str, rows: Vec<SourceRecord>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save(name, &Relation::Source(rows)).await
    }

    async fn scan_source(&self, spec: &SourceSpec) -> Result<Vec<SourceRow>> {
        match self.load(&spec.relation).await? {
            Some(Relation::Source(rows)) => project_source(&rows, spec),
            Some(other) => Err(kind_mismatch(&spec.relation, &other, RelationKind::Source)),
            None => Err(Error::RelationNotFound(spec.relation.clone())),
        }
    }

    async fn scan_points(&self, name: &str) -> Result<Vec<PointRow>> {
        match self.load(name).await? {
            Some(Relation::Points(rows)) => Ok(rows),
            Some(other) => Err(kind_mismatch(name, &other, RelationKind::Points)),
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }

    async fn insert_points(&self, name: &str, rows: Vec<PointRow>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.load(name).await? {
            Some(Relation::Points(mut existing)) => {
                existing.extend(rows);
                self.save(name, &Relation::Points(existing)).await
            }
            Some(other) => Err(kind_mismatch(name, &other, RelationKind::Points)),
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }

    async fn scan_centroids(&self, name: &str) -> Result<Vec<CentroidRow>> {
        match self.load(name).await? {
            Some(Relation::Centroids(rows)) => Ok(rows),
            Some(other) => Err(kind_mismatch(name, &other, RelationKind::Centroids)),
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }

    async fn insert_centroids(&self, name: &str, rows: Vec<CentroidRow>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.load(name).await? {
            Some(Relation::Centroids(mut existing)) => {
                existing.extend(rows);
                self.save(name, &Relation::Centroids(existing)).await
            }
            Some(other) => Err(kind_mismatch(name, &other, RelationKind::Centroids)),
            None => Err(Error::RelationNotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SparseVector;
    use tempfile::TempDir;

    #[tokio::test]
    async fn relations_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = LocalStore::new(temp_dir.path()).unwrap();
            store.create_centroids("model").await.unwrap();
            store
                .insert_centroids(
                    "model",
                    vec![CentroidRow {
                        cid: 1,
                        coords: SparseVector::from_dense(&[0.5, 0.5]),
                    }],
                )
                .await
                .unwrap();
        }

        let store = LocalStore::new(temp_dir.path()).unwrap();
        let rows = store.scan_centroids("model").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cid, 1);
    }

    #[tokio::test]
    async fn truncate_and_drop() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();

        store.create_points("work").await.unwrap();
        store
            .insert_points(
                "work",
                vec![PointRow::new(9, SparseVector::from_dense(&[1.0]))],
            )
            .await
            .unwrap();

        store.truncate_relation("work").await.unwrap();
        assert!(store.scan_points("work").await.unwrap().is_empty());

        store.drop_relation("work").await.unwrap();
        assert_eq!(store.relation_kind("work").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new(temp_dir.path()).unwrap();
        assert!(store.create_points("../escape").await.is_err());
    }
}

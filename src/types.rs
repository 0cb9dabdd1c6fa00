//! Core types for bildam

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Point ID type
pub type PointId = i64;

/// Centroid ID type; dense in `[1, k]` once seeding completes
pub type CentroidId = i32;

/// Sentinel `cid` for a point that has not been assigned yet
pub const UNASSIGNED: CentroidId = 0;

/// Sparse double-precision vector with an explicit dimension.
///
/// Stored as parallel `indices`/`values` arrays sorted by index. Absent
/// indices read as 0.0. Two vectors of different dimensions are
/// incomparable; the metric kernel rejects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    dim: u32,
    indices: Vec<u32>,
    values: Vec<f64>,
}

impl SparseVector {
    /// Create an all-zero vector of the given dimension.
    pub fn zeros(dim: u32) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from a dense slice, keeping only non-zero components.
    ///
    /// NaN components compare unequal to zero and are therefore kept;
    /// they mark the vector as null-like and are detected at ingest via
    /// [`SparseVector::has_nan`].
    pub fn from_dense(dense: &[f64]) -> Self {
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (i, &v) in dense.iter().enumerate() {
            if v != 0.0 {
                indices.push(i as u32);
                values.push(v);
            }
        }
        Self {
            dim: dense.len() as u32,
            indices,
            values,
        }
    }

    /// Build from `(index, value)` entries.
    ///
    /// Entries are sorted by index; out-of-range or duplicate indices are
    /// rejected.
    pub fn from_entries(dim: u32, entries: &[(u32, f64)]) -> crate::Result<Self> {
        let mut sorted: Vec<(u32, f64)> =
            entries.iter().copied().filter(|(_, v)| *v != 0.0).collect();
        sorted.sort_by_key(|(i, _)| *i);
        let mut indices = Vec::with_capacity(sorted.len());
        let mut values = Vec::with_capacity(sorted.len());
        for (i, v) in sorted {
            if i >= dim {
                return Err(Error::invalid_input(format!(
                    "sparse index {} out of range for dimension {}",
                    i, dim
                )));
            }
            if indices.last() == Some(&i) {
                return Err(Error::invalid_input(format!("duplicate sparse index {}", i)));
            }
            indices.push(i);
            values.push(v);
        }
        Ok(Self {
            dim,
            indices,
            values,
        })
    }

    pub fn dim(&self) -> u32 {
        self.dim
    }

    /// Number of stored (non-zero) components.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Value at `index`, 0.0 if absent.
    pub fn get(&self, index: u32) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    /// Iterate stored `(index, value)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.dim as usize];
        for (i, v) in self.iter() {
            dense[i as usize] = v;
        }
        dense
    }

    /// True when any stored component is NaN, i.e. the self-dot is
    /// undefined and the vector counts as null at ingest.
    pub fn has_nan(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// True when every component is zero.
    pub fn is_zero(&self) -> bool {
        self.values.is_empty()
    }

    /// Componentwise scale by a finite factor.
    pub(crate) fn scaled(&self, factor: f64) -> SparseVector {
        SparseVector {
            dim: self.dim,
            indices: self.indices.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }
}

/// Working row of the point set.
///
/// `cid` starts at [`UNASSIGNED`]; `canopies` is `None` outside canopy
/// mode, meaning the candidate set is all centroids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointRow {
    pub pid: PointId,
    pub coords: SparseVector,
    pub cid: CentroidId,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub canopies: Option<Vec<CentroidId>>,
}

impl PointRow {
    pub fn new(pid: PointId, coords: SparseVector) -> Self {
        Self {
            pid,
            coords,
            cid: UNASSIGNED,
            canopies: None,
        }
    }
}

/// A centroid row; `cid` is dense in `[1, k]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidRow {
    pub cid: CentroidId,
    pub coords: SparseVector,
}

/// Column value inside a source relation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Bigint(i64),
    Float(f64),
    Vector(Vec<f64>),
}

/// Raw row of a registered source relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub columns: HashMap<String, ColumnValue>,
}

impl SourceRecord {
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnValue)>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Projection of a source record onto the columns the engine consumes.
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub id: Option<PointId>,
    pub coords: Option<Vec<f64>>,
}

/// Names the relation and columns a point (or centroid) set is read from.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub relation: String,
    pub coord_column: String,
    pub id_column: Option<String>,
}

impl SourceSpec {
    pub fn new(relation: impl Into<String>, coord_column: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            coord_column: coord_column.into(),
            id_column: None,
        }
    }

    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = Some(id_column.into());
        self
    }
}

/// Distance metric for clustering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    L1Norm,
    L2Norm,
    Cosine,
    Tanimoto,
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l1norm" | "manhattan" => Ok(DistanceMetric::L1Norm),
            "l2norm" | "euclidean" => Ok(DistanceMetric::L2Norm),
            "cosine" => Ok(DistanceMetric::Cosine),
            "tanimoto" => Ok(DistanceMetric::Tanimoto),
            other => Err(Error::UnknownMetric(other.to_string())),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::L1Norm => "l1norm",
            DistanceMetric::L2Norm => "l2norm",
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Tanimoto => "tanimoto",
        };
        f.write_str(name)
    }
}

/// Centroid seeding strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InitMethod {
    Random,
    #[serde(rename = "kmeans++")]
    KmeansPlusPlus,
    Canopy,
    /// Centroids supplied by the caller; never parsed from user input.
    Provided,
}

impl FromStr for InitMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(InitMethod::Random),
            "kmeans++" | "kmeanspp" => Ok(InitMethod::KmeansPlusPlus),
            "canopy" => Ok(InitMethod::Canopy),
            other => Err(Error::UnknownInitMethod(other.to_string())),
        }
    }
}

impl fmt::Display for InitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitMethod::Random => "random",
            InitMethod::KmeansPlusPlus => "kmeans++",
            InitMethod::Canopy => "canopy",
            InitMethod::Provided => "provided",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_from_dense_skips_zeros() {
        let v = SparseVector::from_dense(&[0.0, 1.5, 0.0, -2.0]);
        assert_eq!(v.dim(), 4);
        assert_eq!(v.nnz(), 2);
        assert_eq!(v.get(1), 1.5);
        assert_eq!(v.get(2), 0.0);
        assert_eq!(v.to_dense(), vec![0.0, 1.5, 0.0, -2.0]);
    }

    #[test]
    fn sparse_from_dense_keeps_nan() {
        let v = SparseVector::from_dense(&[0.0, f64::NAN]);
        assert!(v.has_nan());
        assert_eq!(v.nnz(), 1);
    }

    #[test]
    fn sparse_from_entries_rejects_out_of_range() {
        let err = SparseVector::from_entries(3, &[(3, 1.0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn sparse_from_entries_sorts() {
        let v = SparseVector::from_entries(5, &[(4, 2.0), (1, 1.0)]).unwrap();
        let pairs: Vec<_> = v.iter().collect();
        assert_eq!(pairs, vec![(1, 1.0), (4, 2.0)]);
    }

    #[test]
    fn metric_parses_aliases() {
        assert_eq!(
            "manhattan".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::L1Norm
        );
        assert_eq!(
            "euclidean".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::L2Norm
        );
        assert!(matches!(
            "chebyshev".parse::<DistanceMetric>(),
            Err(Error::UnknownMetric(_))
        ));
    }

    #[test]
    fn init_method_parses() {
        assert_eq!(
            "kmeans++".parse::<InitMethod>().unwrap(),
            InitMethod::KmeansPlusPlus
        );
        assert!(matches!(
            "provided".parse::<InitMethod>(),
            Err(Error::UnknownInitMethod(_))
        ));
    }
}

//! Exact nearest-neighbour vector index with versioned snapshots.
//!
//! [`VectorEngine`] is the seam; [`FlatIndex`] scans every stored vector
//! and returns the `k` closest by Euclidean distance. Bookmark
//! collections are small enough (tens of thousands of vectors at most)
//! that an exact scan stays fast and keeps results reproducible.
//!
//! Snapshots are JSON tagged with [`FLAT_INDEX_VERSION`]. Restoring a
//! snapshot with any other tag fails with
//! [`ShelfError::IndexVersionMismatch`]; callers rebuild from item
//! embeddings instead of migrating.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ShelfError;
use crate::models::ItemId;

/// Version tag written into every [`FlatIndex`] snapshot.
pub const FLAT_INDEX_VERSION: &str = "flat-l2-v1";

/// A vector hit. Smaller distance is closer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: ItemId,
    pub distance: f32,
}

/// Map a distance onto `(0, 1]` for score fusion.
pub fn similarity(distance: f32) -> f64 {
    1.0 / (1.0 + distance.max(0.0) as f64)
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Dot product; `0.0` when lengths differ.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Pluggable vector engine.
pub trait VectorEngine: Send + Sync {
    fn add(&mut self, id: ItemId, vector: Vec<f32>) -> Result<()>;
    fn remove(&mut self, ids: &[ItemId]);
    fn clear(&mut self);
    /// Up to `k` neighbours, closest first, ties broken by id.
    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor>;
    fn serialize(&self) -> Result<Vec<u8>>;
    /// Replace the contents with a snapshot produced by [`VectorEngine::serialize`].
    fn restore(&mut self, bytes: &[u8]) -> Result<()>;
    fn len(&self) -> usize;
    /// Ids with a stored vector, ascending.
    fn ids(&self) -> Vec<ItemId>;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn dims(&self) -> Option<usize>;
    fn version(&self) -> &'static str;
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    id: ItemId,
    vector: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: String,
    dims: Option<usize>,
    entries: Vec<SnapshotEntry>,
}

#[derive(Deserialize)]
struct SnapshotHeader {
    version: String,
}

/// Brute-force L2 index.
#[derive(Debug, Default, Clone)]
pub struct FlatIndex {
    dims: Option<usize>,
    entries: BTreeMap<ItemId, Vec<f32>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a snapshot into a fresh index.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header: SnapshotHeader =
            serde_json::from_slice(bytes).context("Failed to read vector snapshot header")?;
        if header.version != FLAT_INDEX_VERSION {
            return Err(ShelfError::IndexVersionMismatch {
                expected: FLAT_INDEX_VERSION.to_string(),
                found: header.version,
            }
            .into());
        }
        let snapshot: Snapshot =
            serde_json::from_slice(bytes).context("Failed to decode vector snapshot")?;
        Ok(Self {
            dims: snapshot.dims,
            entries: snapshot
                .entries
                .into_iter()
                .map(|e| (e.id, e.vector))
                .collect(),
        })
    }
}

impl VectorEngine for FlatIndex {
    fn add(&mut self, id: ItemId, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            bail!("cannot index an empty vector for item {}", id);
        }
        match self.dims {
            Some(d) if d != vector.len() => bail!(
                "vector dimension mismatch for item {}: index has {}, got {}",
                id,
                d,
                vector.len()
            ),
            _ => self.dims = Some(vector.len()),
        }
        self.entries.insert(id, vector);
        Ok(())
    }

    fn remove(&mut self, ids: &[ItemId]) {
        for id in ids {
            self.entries.remove(id);
        }
        if self.entries.is_empty() {
            self.dims = None;
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.dims = None;
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        if k == 0 || Some(query.len()) != self.dims {
            return Vec::new();
        }
        let mut hits: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|(id, v)| Neighbor {
                id: *id,
                distance: l2_distance(query, v),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        hits
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let snapshot = Snapshot {
            version: FLAT_INDEX_VERSION.to_string(),
            dims: self.dims,
            entries: self
                .entries
                .iter()
                .map(|(id, v)| SnapshotEntry {
                    id: *id,
                    vector: v.clone(),
                })
                .collect(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        *self = FlatIndex::deserialize(bytes)?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn ids(&self) -> Vec<ItemId> {
        self.entries.keys().copied().collect()
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    fn version(&self) -> &'static str {
        FLAT_INDEX_VERSION
    }
}

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_version_mismatch;

    fn index() -> FlatIndex {
        let mut idx = FlatIndex::new();
        idx.add(1, vec![1.0, 0.0]).unwrap();
        idx.add(2, vec![0.0, 1.0]).unwrap();
        idx.add(3, vec![0.7, 0.7]).unwrap();
        idx
    }

    #[test]
    fn nearest_first() {
        let idx = index();
        let hits = idx.search(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 3);
    }

    #[test]
    fn ties_break_by_id() {
        let mut idx = FlatIndex::new();
        idx.add(9, vec![1.0, 0.0]).unwrap();
        idx.add(4, vec![1.0, 0.0]).unwrap();
        let ids: Vec<ItemId> = idx.search(&[1.0, 0.0], 5).iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![4, 9]);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut idx = index();
        assert!(idx.add(4, vec![1.0, 2.0, 3.0]).is_err());
        assert!(idx.add(4, Vec::new()).is_err());
        assert!(idx.search(&[1.0, 2.0, 3.0], 3).is_empty());
    }

    #[test]
    fn remove_and_replace() {
        let mut idx = index();
        idx.add(1, vec![0.0, -1.0]).unwrap();
        assert_eq!(idx.len(), 3);
        idx.remove(&[1, 2, 3]);
        assert!(idx.is_empty());
        assert_eq!(idx.dims(), None);
    }

    #[test]
    fn snapshot_roundtrip() {
        let idx = index();
        let bytes = idx.serialize().unwrap();
        let restored = FlatIndex::deserialize(&bytes).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(
            restored.search(&[0.0, 1.0], 1)[0].id,
            idx.search(&[0.0, 1.0], 1)[0].id
        );
    }

    #[test]
    fn snapshot_version_mismatch() {
        let bytes = br#"{"version":"hnsw-v0","dims":2,"entries":[]}"#;
        let err = FlatIndex::deserialize(bytes).unwrap_err();
        assert!(is_version_mismatch(&err));
    }

    #[test]
    fn similarity_mapping() {
        assert!((similarity(0.0) - 1.0).abs() < 1e-9);
        assert!((similarity(1.0) - 0.5).abs() < 1e-9);
        assert!(similarity(100.0) < 0.01);
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![0.5f32, -1.25, 3.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
        assert!(blob_to_vec(&[1, 2, 3]).is_empty());
    }
}

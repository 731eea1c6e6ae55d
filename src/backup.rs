//! Backup export and import.
//!
//! A bundle is one JSON document holding every collection of the store:
//!
//! ```json
//! {
//!   "version": 1,
//!   "exported_at": "2026-01-01T00:00:00Z",
//!   "items": [...],
//!   "jobs": [...],
//!   "settings": [...],
//!   "index_snapshot": { "version": "flat-l2-v1", "data": "<base64>" }
//! }
//! ```
//!
//! Import accepts only the exact [`BUNDLE_VERSION`] and replaces the store
//! contents in one step. The caller rebuilds the in-memory indexes after.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use starshelf_core::error::ShelfError;
use starshelf_core::index::IndexSnapshot;
use starshelf_core::models::{IndexJob, Item, Setting};
use starshelf_core::store::{ItemStore, StoreContents};

pub const BUNDLE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub items: Vec<Item>,
    pub jobs: Vec<IndexJob>,
    pub settings: Vec<Setting>,
    #[serde(default)]
    pub index_snapshot: Option<EncodedSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedSnapshot {
    pub version: String,
    /// Base64 of the raw snapshot bytes.
    pub data: String,
}

impl EncodedSnapshot {
    fn encode(snapshot: &IndexSnapshot) -> Self {
        Self {
            version: snapshot.version.clone(),
            data: STANDARD.encode(&snapshot.data),
        }
    }

    fn decode(&self) -> Result<IndexSnapshot> {
        let data = STANDARD
            .decode(&self.data)
            .map_err(|e| ShelfError::Parse(format!("index snapshot: {}", e)))?;
        Ok(IndexSnapshot {
            version: self.version.clone(),
            data,
        })
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

pub async fn export_bundle<S: ItemStore + ?Sized>(store: &S) -> Result<Bundle> {
    let contents = store.export_all().await?;
    Ok(Bundle {
        version: BUNDLE_VERSION,
        exported_at: Utc::now(),
        items: contents.items,
        jobs: contents.jobs,
        settings: contents.settings,
        index_snapshot: contents.snapshot.as_ref().map(EncodedSnapshot::encode),
    })
}

pub async fn import_bundle<S: ItemStore + ?Sized>(store: &S, bundle: Bundle) -> Result<()> {
    check_version(bundle.version)?;
    let snapshot = bundle
        .index_snapshot
        .as_ref()
        .map(EncodedSnapshot::decode)
        .transpose()?;
    let items = bundle.items.len();
    store
        .replace_all(StoreContents {
            items: bundle.items,
            jobs: bundle.jobs,
            settings: bundle.settings,
            snapshot,
        })
        .await?;
    info!(items, "backup imported");
    Ok(())
}

/// Parse a bundle, rejecting a foreign version before reading the rest.
pub fn parse_bundle(json: &str) -> Result<Bundle> {
    let header: VersionHeader = serde_json::from_str(json)
        .map_err(|e| ShelfError::Parse(format!("backup bundle: {}", e)))?;
    check_version(header.version)?;
    let bundle = serde_json::from_str(json)
        .map_err(|e| ShelfError::Parse(format!("backup bundle: {}", e)))?;
    Ok(bundle)
}

fn check_version(found: u32) -> Result<()> {
    if found != BUNDLE_VERSION {
        return Err(ShelfError::BackupVersion {
            expected: BUNDLE_VERSION,
            found,
        }
        .into());
    }
    Ok(())
}

/// Write a bundle to `output`, or to stdout when `None`.
pub async fn write_bundle<S: ItemStore + ?Sized>(
    store: &S,
    output: Option<&Path>,
) -> Result<Bundle> {
    let bundle = export_bundle(store).await?;
    let json = serde_json::to_string_pretty(&bundle)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write backup: {}", path.display()))?;
            eprintln!("Exported {} items to {}", bundle.items.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(bundle)
}

pub async fn read_bundle<S: ItemStore + ?Sized>(store: &S, path: &Path) -> Result<Bundle> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backup: {}", path.display()))?;
    let bundle = parse_bundle(&json)?;
    import_bundle(store, bundle.clone()).await?;
    Ok(bundle)
}

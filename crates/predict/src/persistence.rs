//! Snapshot persistence.
//!
//! A snapshot is two artifacts: the index (trie plus funnels) and the items.
//! Both are postcard-encoded and zstd-compressed (level 6, multi-threaded),
//! and each is written to a temporary file in the target directory before
//! being renamed over the previous artifact.
//!
//! Both artifacts carry the same `stamp`; a pair with different stamps was
//! torn by an interrupted save and is refused on load.

mod worker;

pub use worker::SnapshotWorker;

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::thread::available_parallelism;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PredictError, Result};
use crate::index::PrefixTrie;
use crate::shared::{IndexData, SharedIndex};
use crate::storage::{Farm, Funnel};
use crate::types::{FunnelId, IndexStats, Item, ItemId};

/// Artifact format version - increment when changing the format.
pub const ARTIFACT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 6;

#[derive(Serialize)]
struct IndexArtifactRef<'a> {
    version: u32,
    stamp: u64,
    trie: &'a PrefixTrie,
    funnels: Vec<(FunnelId, &'a Funnel)>,
}

#[derive(Deserialize)]
struct IndexArtifact {
    version: u32,
    stamp: u64,
    trie: PrefixTrie,
    funnels: Vec<(FunnelId, Funnel)>,
}

#[derive(Serialize, Deserialize)]
struct ItemsArtifact {
    version: u32,
    stamp: u64,
    items: Vec<StoredItem>,
}

/// Documents are kept as JSON text; postcard cannot decode self-describing values.
#[derive(Serialize, Deserialize)]
struct StoredItem {
    id: ItemId,
    document: String,
}

/// What a completed save wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedSnapshot {
    /// `SharedIndex::generation` observed while encoding.
    pub generation: u64,
    pub stats: IndexStats,
}

// ---------------------------------------------------------------------------
// Write operations
// ---------------------------------------------------------------------------

/// Writes a consistent snapshot of `shared` to the two artifact paths.
///
/// Encoding happens under one read lock; compression and file I/O do not
/// hold the lock.
pub fn save_snapshot(
    shared: &SharedIndex,
    index_path: &Path,
    items_path: &Path,
) -> Result<SavedSnapshot> {
    let started = Instant::now();
    let stamp = unix_now_nanos();

    let (index_bytes, items_bytes, snapshot) = {
        let data = shared.read();
        let generation = shared.generation();

        let mut funnels: Vec<(FunnelId, &Funnel)> = data.farm.funnels().collect();
        funnels.sort_unstable_by_key(|(id, _)| *id);
        let index = IndexArtifactRef {
            version: ARTIFACT_VERSION,
            stamp,
            trie: &data.trie,
            funnels,
        };
        let index_bytes = postcard::to_stdvec(&index).map_err(|error| {
            PredictError::Serialization(format!("failed to encode index artifact: {error}"))
        })?;

        let mut items = data
            .farm
            .items()
            .map(|item| {
                serde_json::to_string(&item.document)
                    .map(|document| StoredItem {
                        id: item.id,
                        document,
                    })
                    .map_err(|error| {
                        PredictError::Serialization(format!(
                            "failed to encode item {}: {error}",
                            item.id
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        items.sort_unstable_by_key(|item| item.id);
        let items_bytes = postcard::to_stdvec(&ItemsArtifact {
            version: ARTIFACT_VERSION,
            stamp,
            items,
        })
        .map_err(|error| {
            PredictError::Serialization(format!("failed to encode items artifact: {error}"))
        })?;

        let snapshot = SavedSnapshot {
            generation,
            stats: data.stats(),
        };
        (index_bytes, items_bytes, snapshot)
    };

    write_artifact(items_path, &items_bytes)?;
    write_artifact(index_path, &index_bytes)?;

    tracing::info!(
        index = %index_path.display(),
        items = %items_path.display(),
        keys = snapshot.stats.keys,
        item_count = snapshot.stats.items,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Saved predict snapshot"
    );
    Ok(snapshot)
}

/// Compresses `bytes` into `path` through a temp file and an atomic rename.
fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|error| {
        PredictError::Internal(format!(
            "failed to create data directory {}: {error}",
            dir.display()
        ))
    })?;

    let temp = tempfile::NamedTempFile::new_in(dir)?;
    let mut encoder = zstd::Encoder::new(temp, ZSTD_LEVEL).map_err(|error| {
        PredictError::Internal(format!("failed to create zstd encoder: {error}"))
    })?;
    let threads = available_parallelism()
        .map(|count| count.get() as u32)
        .unwrap_or(4);
    encoder.multithread(threads).map_err(|error| {
        PredictError::Internal(format!("failed to enable multi-threaded zstd: {error}"))
    })?;
    encoder.write_all(bytes)?;
    let temp = encoder.finish()?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|error| {
        PredictError::Internal(format!(
            "failed to finalize artifact {}: {}",
            path.display(),
            error.error
        ))
    })?;
    tracing::debug!(path = %path.display(), raw_bytes = bytes.len(), "Wrote artifact");
    Ok(())
}

// ---------------------------------------------------------------------------
// Read operations
// ---------------------------------------------------------------------------

/// Restores index state from the two artifacts.
///
/// Returns `Ok(None)` when neither artifact exists. A lone artifact, a
/// version or stamp mismatch, and any broken invariant are errors.
pub fn load_snapshot(index_path: &Path, items_path: &Path) -> Result<Option<IndexData>> {
    let started = Instant::now();
    let index_bytes = read_artifact(index_path)?;
    let items_bytes = read_artifact(items_path)?;
    let (index_bytes, items_bytes) = match (index_bytes, items_bytes) {
        (None, None) => return Ok(None),
        (Some(_), None) => return Err(PredictError::ArtifactNotFound(items_path.to_path_buf())),
        (None, Some(_)) => return Err(PredictError::ArtifactNotFound(index_path.to_path_buf())),
        (Some(index), Some(items)) => (index, items),
    };

    let _span = tracing::info_span!("snapshot_decode", path = %index_path.display()).entered();

    let index: IndexArtifact = postcard::from_bytes(&index_bytes).map_err(|error| {
        PredictError::Serialization(format!("failed to decode index artifact: {error}"))
    })?;
    let items: ItemsArtifact = postcard::from_bytes(&items_bytes).map_err(|error| {
        PredictError::Serialization(format!("failed to decode items artifact: {error}"))
    })?;

    for version in [index.version, items.version] {
        if version != ARTIFACT_VERSION {
            return Err(PredictError::Serialization(format!(
                "unsupported artifact version {version}, expected {ARTIFACT_VERSION}"
            )));
        }
    }
    if index.stamp != items.stamp {
        return Err(PredictError::Integrity(
            "index and items artifacts come from different snapshots".to_string(),
        ));
    }

    let documents = items
        .items
        .into_iter()
        .map(|stored| {
            serde_json::from_str::<Map<String, Value>>(&stored.document)
                .map(|document| Item {
                    id: stored.id,
                    document,
                })
                .map_err(|error| {
                    PredictError::Serialization(format!(
                        "failed to decode item {}: {error}",
                        stored.id
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let farm = Farm::restore(index.funnels, documents)?;
    let data = IndexData::from_parts(index.trie, farm)?;

    let stats = data.stats();
    tracing::info!(
        keys = stats.keys,
        funnels = stats.funnels,
        items = stats.items,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Restored predict snapshot"
    );
    Ok(Some(data))
}

/// Reads and decompresses an artifact; `Ok(None)` if the file does not exist.
fn read_artifact(path: &Path) -> Result<Option<Vec<u8>>> {
    let input = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let mut decoder = zstd::Decoder::new(input).map_err(|error| {
        PredictError::Serialization(format!(
            "failed to open zstd stream {}: {error}",
            path.display()
        ))
    })?;
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes).map_err(|error| {
        PredictError::Serialization(format!(
            "failed to decompress {}: {error}",
            path.display()
        ))
    })?;
    Ok(Some(bytes))
}

fn unix_now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

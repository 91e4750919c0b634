//! Checkpoint store shared by all worker ranks.
//!
//! Intermediate per-tile artifacts are written to shared storage and
//! read back in later stages; together with the inter-stage barrier this
//! is the only coordination between ranks. Each (stage, tile) artifact
//! has exactly one writer, the rank owning that tile, and any number of
//! readers in the next stage. The barrier, not per-artifact locking, is
//! what makes a read legal.

use std::fs;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{InsarError, InsarResult};

/// Stage identifiers used for checkpoint artifact keys.
pub mod stage {
    /// Per-tile phase sub-stacks extracted before estimation.
    pub const PHASE: &str = "phase";
    /// Per-tile minimum-spanning-tree selection matrices (seeded by the
    /// upstream MST selector, consumed here).
    pub const MST: &str = "mst";
    /// Per-tile linear rate products.
    pub const RATE: &str = "rate";
    /// Per-tile time-series inversion products.
    pub const TIME_SERIES: &str = "tseries";
}

/// Deterministic artifact name embedding both stage and tile index, so
/// stages sharing one output directory never collide and a restarted
/// run can locate artifacts with no extra bookkeeping.
pub fn artifact_name(stage: &str, tile: usize) -> String {
    format!("{}_{}.bin", stage, tile)
}

/// Key-value checkpoint store addressed by (stage, tile index).
///
/// Backends must make `put` atomic: a concurrent reader either sees the
/// complete artifact or none at all, never a partial write.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, stage: &str, tile: usize, bytes: &[u8]) -> InsarResult<()>;
    fn get(&self, stage: &str, tile: usize) -> InsarResult<Vec<u8>>;
    fn contains(&self, stage: &str, tile: usize) -> bool;
}

/// Serialize a value and store it under (stage, tile).
pub fn put_artifact<T: Serialize>(
    store: &dyn CheckpointStore,
    stage: &str,
    tile: usize,
    value: &T,
) -> InsarResult<()> {
    let bytes = bincode::serialize(value).map_err(|e| {
        InsarError::Checkpoint(format!(
            "Failed to serialize artifact {}: {}",
            artifact_name(stage, tile),
            e
        ))
    })?;
    store.put(stage, tile, &bytes)
}

/// Load and deserialize the artifact stored under (stage, tile).
pub fn get_artifact<T: DeserializeOwned>(
    store: &dyn CheckpointStore,
    stage: &str,
    tile: usize,
) -> InsarResult<T> {
    let bytes = store.get(stage, tile)?;
    bincode::deserialize(&bytes).map_err(|e| {
        InsarError::Checkpoint(format!(
            "Failed to deserialize artifact {}: {}",
            artifact_name(stage, tile),
            e
        ))
    })
}

/// Filesystem-backed checkpoint store.
///
/// Artifacts are written to a temporary file in the same directory and
/// renamed into place, so the commit point is the rename and readers
/// never observe a partially written artifact.
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    pub fn new(dir: impl Into<PathBuf>) -> InsarResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, stage: &str, tile: usize) -> PathBuf {
        self.dir.join(artifact_name(stage, tile))
    }
}

impl CheckpointStore for FsStore {
    fn put(&self, stage: &str, tile: usize, bytes: &[u8]) -> InsarResult<()> {
        let tmp = self.dir.join(format!(".{}.tmp", artifact_name(stage, tile)));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, self.path(stage, tile))?;
        log::debug!(
            "Checkpointed {} ({} bytes)",
            artifact_name(stage, tile),
            bytes.len()
        );
        Ok(())
    }

    fn get(&self, stage: &str, tile: usize) -> InsarResult<Vec<u8>> {
        let path = self.path(stage, tile);
        fs::read(&path).map_err(|e| {
            InsarError::Checkpoint(format!(
                "Failed to read artifact {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn contains(&self, stage: &str, tile: usize) -> bool {
        self.path(stage, tile).is_file()
    }
}

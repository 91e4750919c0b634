//! Distributed tile orchestration modules

pub mod coordinator;
pub mod kernel;
pub mod store;
pub mod tile;

// Re-export main types
pub use coordinator::{CoordinatorConfig, StageCoordinator};
pub use kernel::{
    MstMatrix, RasterSink, RateKernel, RateProduct, TimeSeriesKernel, TimeSeriesProduct,
};
pub use store::{artifact_name, get_artifact, put_artifact, CheckpointStore, FsStore};
pub use tile::{assign, partition, Tile};

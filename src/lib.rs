//! RateStack: A Fast, Modular InSAR Deformation Time-Series Processor
//!
//! This library estimates ground-deformation time series and linear
//! deformation rate from stacks of satellite radar interferograms. It
//! corrects systematic orbital-trajectory phase errors before inversion
//! and orchestrates checkpointed, tile-parallel computation for networks
//! that do not fit in memory on one machine.

pub mod core;
pub mod dist;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    InsarError, InsarResult, Interferogram, OrbitalDegree, OrbitalMethod, Phase, PhaseImage,
    RasterStack,
};

pub use crate::core::{orbital_correction, EpochIndex, NetworkModel};
pub use dist::{CheckpointStore, CoordinatorConfig, FsStore, StageCoordinator, Tile};

//! Core estimation modules

pub mod epochs;
pub mod orbital;

// Re-export main types
pub use epochs::EpochIndex;
pub use orbital::{
    design_matrix, independent_correction, independent_corrections, network_correction,
    network_design_matrix, network_ifg_correction, orbital_correction, NetworkModel,
};

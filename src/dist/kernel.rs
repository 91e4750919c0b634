//! Seams to the external numerical kernels and the raster sink.
//!
//! Rate estimation and time-series inversion are consumed as black-box
//! operations over one tile's interferogram sub-stack. The coordinator
//! only validates that a kernel's product matches the tile extent; a
//! failed or malformed product aborts the whole run, since partial
//! results cannot be safely reassembled.

use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::types::{InsarError, InsarResult};

/// Per-tile interferogram selection produced by the upstream
/// minimum-spanning-tree selector: (ifg, row, col), nonzero = selected.
pub type MstMatrix = Array3<u8>;

/// Per-tile linear rate estimation product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateProduct {
    pub rate: Array2<f32>,
    pub error: Array2<f32>,
    pub samples: Array2<f32>,
}

impl RateProduct {
    pub(crate) fn check_extent(&self, tile: usize, shape: (usize, usize)) -> InsarResult<()> {
        for (name, band) in [
            ("rate", &self.rate),
            ("error", &self.error),
            ("samples", &self.samples),
        ] {
            if band.dim() != shape {
                return Err(InsarError::Kernel(format!(
                    "Rate product band '{}' for tile {} has shape {:?}, tile extent is {:?}",
                    name,
                    tile,
                    band.dim(),
                    shape
                )));
            }
        }
        Ok(())
    }
}

/// Per-tile time-series inversion product; band axis is the output
/// epoch sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesProduct {
    pub incremental: Array3<f32>,
    pub cumulative: Array3<f32>,
    pub velocity: Array3<f32>,
}

impl TimeSeriesProduct {
    pub fn num_bands(&self) -> usize {
        self.incremental.dim().2
    }

    pub(crate) fn check_extent(&self, tile: usize, shape: (usize, usize)) -> InsarResult<()> {
        let bands = self.num_bands();
        for (name, stack) in [
            ("incremental", &self.incremental),
            ("cumulative", &self.cumulative),
            ("velocity", &self.velocity),
        ] {
            let (rows, cols, nb) = stack.dim();
            if (rows, cols) != shape || nb != bands {
                return Err(InsarError::Kernel(format!(
                    "Time series stack '{}' for tile {} has shape {:?}, expected {:?} x {} bands",
                    name,
                    tile,
                    stack.dim(),
                    shape,
                    bands
                )));
            }
        }
        Ok(())
    }
}

/// Linear deformation rate estimation over one tile's sub-stack.
pub trait RateKernel: Send + Sync {
    fn estimate(
        &self,
        tile_ifgs: &[Array2<f32>],
        vcm: &Array2<f64>,
        mst: &MstMatrix,
    ) -> InsarResult<RateProduct>;
}

/// Time-series inversion over one tile's sub-stack.
pub trait TimeSeriesKernel: Send + Sync {
    fn invert(
        &self,
        tile_ifgs: &[Array2<f32>],
        vcm: &Array2<f64>,
        mst: &MstMatrix,
    ) -> InsarResult<TimeSeriesProduct>;
}

/// Destination for reassembled full-extent output rasters. Final raster
/// persistence (format, georeferencing) lives behind this seam.
pub trait RasterSink: Send + Sync {
    /// Write one full-extent band. `date` labels time-series bands with
    /// their output epoch; rate bands carry no date.
    fn write_band(
        &self,
        product: &str,
        date: Option<NaiveDate>,
        band: &Array2<f32>,
    ) -> InsarResult<()>;
}

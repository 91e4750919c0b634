//! Distributed multi-stage computation over tiles.
//!
//! A fixed pool of worker ranks is launched once per run; each rank
//! walks the state machine
//! INIT -> RATE_STAGE -> BARRIER -> TIME_SERIES_STAGE (optional) ->
//! BARRIER -> REASSEMBLY -> DONE.
//! Ranks share nothing but the checkpoint store, and the inter-stage
//! barrier is the only cross-rank ordering guarantee: crossing it is
//! what licenses reading another rank's stage-N artifacts in stage N+1.
//! There is no message passing, no retry, and no mid-stage cancellation;
//! the unit of recovery is the whole run.

use std::sync::{Barrier, Mutex};
use std::thread;

use chrono::NaiveDate;
use ndarray::{s, Array2, ArrayView2};

use crate::core::epochs::EpochIndex;
use crate::dist::kernel::{
    MstMatrix, RasterSink, RateKernel, RateProduct, TimeSeriesKernel, TimeSeriesProduct,
};
use crate::dist::store::{self, get_artifact, put_artifact, CheckpointStore};
use crate::dist::tile::{assign, partition, Tile};
use crate::types::{InsarError, InsarResult, Interferogram};

/// Run-wide coordination settings, fixed at launch.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Number of worker ranks. No dynamic pool; set once per run.
    pub workers: usize,
    /// Tile grid dimensions over the common raster extent.
    pub tile_rows: usize,
    pub tile_cols: usize,
    /// Whether to run the time-series inversion stage after rate.
    pub compute_time_series: bool,
}

/// Drives the checkpointed multi-stage computation across worker ranks.
pub struct StageCoordinator<'a> {
    store: &'a dyn CheckpointStore,
    rate_kernel: &'a dyn RateKernel,
    ts_kernel: &'a dyn TimeSeriesKernel,
    sink: &'a dyn RasterSink,
    config: CoordinatorConfig,
}

impl<'a> StageCoordinator<'a> {
    pub fn new(
        store: &'a dyn CheckpointStore,
        rate_kernel: &'a dyn RateKernel,
        ts_kernel: &'a dyn TimeSeriesKernel,
        sink: &'a dyn RasterSink,
        config: CoordinatorConfig,
    ) -> InsarResult<Self> {
        if config.workers == 0 {
            return Err(InsarError::Config(
                "Coordinator needs at least one worker rank".to_string(),
            ));
        }
        Ok(Self {
            store,
            rate_kernel,
            ts_kernel,
            sink,
            config,
        })
    }

    /// Run all stages to completion.
    ///
    /// Expects the per-tile MST selection matrices to be present in the
    /// store (stage `mst`) before the run starts; they are the upstream
    /// selector's output. `vcm` is the (num_ifgs x num_ifgs) temporal
    /// variance-covariance matrix consumed by both kernels.
    pub fn run(
        &self,
        ifgs: &[Interferogram],
        vcm: &Array2<f64>,
        epochs: &EpochIndex,
    ) -> InsarResult<()> {
        let shape = self.check_stack(ifgs, vcm)?;
        let tiles = partition(shape, self.config.tile_rows, self.config.tile_cols)?;
        let assignments = assign(tiles.len(), self.config.workers)?;
        log::info!(
            "Distributed run: {} ifgs, {} tiles, {} ranks, time series {}",
            ifgs.len(),
            tiles.len(),
            self.config.workers,
            self.config.compute_time_series
        );

        let barrier = Barrier::new(self.config.workers);
        let first_error: Mutex<Option<InsarError>> = Mutex::new(None);

        thread::scope(|scope| {
            for (rank, owned) in assignments.iter().enumerate() {
                let barrier = &barrier;
                let first_error = &first_error;
                let tiles = &tiles;
                scope.spawn(move || {
                    self.worker(rank, owned, tiles, ifgs, vcm, epochs, shape, barrier, first_error);
                });
            }
        });

        let error = match first_error.into_inner() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        match error {
            Some(err) => Err(err),
            None => {
                log::info!("Distributed run complete");
                Ok(())
            }
        }
    }

    fn check_stack(
        &self,
        ifgs: &[Interferogram],
        vcm: &Array2<f64>,
    ) -> InsarResult<(usize, usize)> {
        let first = ifgs.first().ok_or_else(|| {
            InsarError::Config("Distributed run needs at least one interferogram".to_string())
        })?;
        let shape = (first.rows(), first.cols());
        for (i, ifg) in ifgs.iter().enumerate() {
            if (ifg.rows(), ifg.cols()) != shape {
                return Err(InsarError::Topology(format!(
                    "Interferogram {} extent {}x{} differs from common extent {}x{}",
                    i,
                    ifg.rows(),
                    ifg.cols(),
                    shape.0,
                    shape.1
                )));
            }
        }
        if vcm.dim() != (ifgs.len(), ifgs.len()) {
            return Err(InsarError::Config(format!(
                "Variance-covariance matrix shape {:?} does not match {} interferograms",
                vcm.dim(),
                ifgs.len()
            )));
        }
        Ok(shape)
    }

    #[allow(clippy::too_many_arguments)]
    fn worker(
        &self,
        rank: usize,
        owned: &[usize],
        tiles: &[Tile],
        ifgs: &[Interferogram],
        vcm: &Array2<f64>,
        epochs: &EpochIndex,
        shape: (usize, usize),
        barrier: &Barrier,
        first_error: &Mutex<Option<InsarError>>,
    ) {
        log::info!("Rank {}: INIT, owns {} tiles", rank, owned.len());
        self.guarded(first_error, || self.extract_phase(owned, tiles, ifgs));
        barrier.wait();

        log::info!("Rank {}: RATE_STAGE", rank);
        self.guarded(first_error, || self.rate_stage(owned, tiles, vcm));
        barrier.wait();

        if self.config.compute_time_series {
            log::info!("Rank {}: TIME_SERIES_STAGE", rank);
            self.guarded(first_error, || self.time_series_stage(owned, tiles, vcm));
            barrier.wait();
        }

        log::info!("Rank {}: REASSEMBLY", rank);
        self.guarded(first_error, || self.reassemble(rank, tiles, shape, epochs));
        log::info!("Rank {}: DONE", rank);
    }

    /// Run one stage's work unless the run has already failed; record
    /// the first error. A failed rank keeps participating in barriers
    /// as a no-op so that no other rank deadlocks.
    fn guarded(
        &self,
        first_error: &Mutex<Option<InsarError>>,
        work: impl FnOnce() -> InsarResult<()>,
    ) {
        let failed = match first_error.lock() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        };
        if failed {
            return;
        }
        if let Err(err) = work() {
            log::error!("Stage failed, aborting run: {}", err);
            let mut slot = match first_error.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.is_none() {
                *slot = Some(err);
            }
        }
    }

    /// Checkpoint each owned tile's phase sub-stack so later stages read
    /// tile-sized arrays instead of slicing the full stack again.
    fn extract_phase(
        &self,
        owned: &[usize],
        tiles: &[Tile],
        ifgs: &[Interferogram],
    ) -> InsarResult<()> {
        for &t in owned {
            let tile = &tiles[t];
            let stack: Vec<Array2<f32>> = ifgs
                .iter()
                .map(|ifg| tile.view(ifg.phase()).to_owned())
                .collect();
            put_artifact(self.store, store::stage::PHASE, tile.index, &stack)?;
        }
        Ok(())
    }

    fn rate_stage(&self, owned: &[usize], tiles: &[Tile], vcm: &Array2<f64>) -> InsarResult<()> {
        for &t in owned {
            let tile = &tiles[t];
            log::debug!("Rate estimation for tile {}", tile.index);
            let mst: MstMatrix = get_artifact(self.store, store::stage::MST, tile.index)?;
            let tile_ifgs: Vec<Array2<f32>> =
                get_artifact(self.store, store::stage::PHASE, tile.index)?;
            let product = self.rate_kernel.estimate(&tile_ifgs, vcm, &mst)?;
            product.check_extent(tile.index, (tile.rows(), tile.cols()))?;
            put_artifact(self.store, store::stage::RATE, tile.index, &product)?;
        }
        Ok(())
    }

    fn time_series_stage(
        &self,
        owned: &[usize],
        tiles: &[Tile],
        vcm: &Array2<f64>,
    ) -> InsarResult<()> {
        for &t in owned {
            let tile = &tiles[t];
            log::debug!("Time series inversion for tile {}", tile.index);
            let mst: MstMatrix = get_artifact(self.store, store::stage::MST, tile.index)?;
            let tile_ifgs: Vec<Array2<f32>> =
                get_artifact(self.store, store::stage::PHASE, tile.index)?;
            let product = self.ts_kernel.invert(&tile_ifgs, vcm, &mst)?;
            product.check_extent(tile.index, (tile.rows(), tile.cols()))?;
            put_artifact(self.store, store::stage::TIME_SERIES, tile.index, &product)?;
        }
        Ok(())
    }

    /// Stitch per-tile products into full-extent output rasters, one
    /// output band per product at a time. Holding the whole multi-epoch
    /// cube at full extent can exceed available memory by orders of
    /// magnitude, so peak memory stays bounded to one band per product.
    fn reassemble(
        &self,
        rank: usize,
        tiles: &[Tile],
        shape: (usize, usize),
        epochs: &EpochIndex,
    ) -> InsarResult<()> {
        if rank == 0 {
            let mut rate = Array2::<f32>::from_elem(shape, f32::NAN);
            let mut error = Array2::<f32>::from_elem(shape, f32::NAN);
            let mut samples = Array2::<f32>::from_elem(shape, f32::NAN);
            for tile in tiles {
                let product: RateProduct =
                    get_artifact(self.store, store::stage::RATE, tile.index)?;
                paste(&mut rate, tile, product.rate.view());
                paste(&mut error, tile, product.error.view());
                paste(&mut samples, tile, product.samples.view());
            }
            self.sink.write_band("rate", None, &rate)?;
            self.sink.write_band("error", None, &error)?;
            self.sink.write_band("samples", None, &samples)?;
        }

        if !self.config.compute_time_series {
            return Ok(());
        }

        // Band count comes from the first tile's product; every other
        // tile must agree exactly or the outputs cannot be reassembled.
        let first: TimeSeriesProduct =
            get_artifact(self.store, store::stage::TIME_SERIES, tiles[0].index)?;
        let num_bands = first.num_bands();
        drop(first);

        let mut band_assignments = assign(num_bands, self.config.workers)?;
        let my_bands = std::mem::take(&mut band_assignments[rank]);
        log::info!(
            "Rank {} reassembles {} of {} time series bands",
            rank,
            my_bands.len(),
            num_bands
        );

        let dates: Vec<NaiveDate> = epochs.dates().collect();
        for band in my_bands {
            // Band i spans epochs i -> i+1; label it with the later date.
            let date = dates.get(band + 1).copied();
            let mut incremental = Array2::<f32>::from_elem(shape, f32::NAN);
            let mut cumulative = Array2::<f32>::from_elem(shape, f32::NAN);
            let mut velocity = Array2::<f32>::from_elem(shape, f32::NAN);
            for tile in tiles {
                let product: TimeSeriesProduct =
                    get_artifact(self.store, store::stage::TIME_SERIES, tile.index)?;
                if product.num_bands() != num_bands {
                    return Err(InsarError::Kernel(format!(
                        "Tile {} has {} time series bands, expected {}",
                        tile.index,
                        product.num_bands(),
                        num_bands
                    )));
                }
                paste(&mut incremental, tile, product.incremental.slice(s![.., .., band]));
                paste(&mut cumulative, tile, product.cumulative.slice(s![.., .., band]));
                paste(&mut velocity, tile, product.velocity.slice(s![.., .., band]));
            }
            self.sink.write_band("tsincr", date, &incremental)?;
            self.sink.write_band("tscuml", date, &cumulative)?;
            self.sink.write_band("tsvel", date, &velocity)?;
        }
        Ok(())
    }
}

fn paste(full: &mut Array2<f32>, tile: &Tile, band: ArrayView2<'_, f32>) {
    full.slice_mut(s![
        tile.top_left.0..tile.bottom_right.0,
        tile.top_left.1..tile.bottom_right.1
    ])
    .assign(&band);
}

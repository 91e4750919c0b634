//! Orbital error estimation and removal.
//!
//! Imprecise satellite trajectory knowledge leaves a smooth, low-order
//! spatial phase ramp in each interferogram. This module fits and
//! forward-models that ramp, either independently per interferogram or
//! jointly across the network (one parameter block per acquisition epoch).
//!
//! Corrections are returned as new rasters; input phase data is never
//! touched. Applying the correction is the caller's decision.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::core::epochs::EpochIndex;
use crate::types::{InsarError, InsarResult, Interferogram, OrbitalDegree, OrbitalMethod, PhaseImage};

/// Relative singular value cutoff for the network pseudoinverse. The
/// joint system is typically rank-deficient, so small singular values
/// are dropped rather than inverted.
const NETWORK_RCOND: f64 = 1e-6;

/// Relative cutoff for the per-interferogram ordinary least squares fit.
const INDEPENDENT_RCOND: f64 = 1e-12;

/// Fitted network orbital model: one parameter block per epoch.
#[derive(Debug, Clone)]
pub struct NetworkModel {
    /// (num_epochs x nparams), row e holds the parameters of epoch e.
    params: Array2<f64>,
    degree: OrbitalDegree,
    offset: bool,
}

impl NetworkModel {
    /// Parameter block of one epoch.
    pub fn epoch_params(&self, epoch: usize) -> ArrayView1<'_, f64> {
        self.params.row(epoch)
    }

    pub fn num_epochs(&self) -> usize {
        self.params.nrows()
    }

    pub fn nparams(&self) -> usize {
        self.params.ncols()
    }

    pub fn degree(&self) -> OrbitalDegree {
        self.degree
    }

    pub fn offset(&self) -> bool {
        self.offset
    }
}

/// Top level orbital correction over a stack of interferograms.
///
/// Returns one correction raster per input interferogram, in input order.
pub fn orbital_correction(
    ifgs: &[Interferogram],
    degree: OrbitalDegree,
    method: OrbitalMethod,
    offset: bool,
) -> InsarResult<Vec<PhaseImage>> {
    log::info!(
        "Orbital correction: {} ifgs, degree {:?}, method {:?}, offset {}",
        ifgs.len(),
        degree,
        method,
        offset
    );

    match method {
        OrbitalMethod::Independent => independent_corrections(ifgs, degree, offset),
        OrbitalMethod::Network => {
            let epochs = EpochIndex::from_ifgs(ifgs);
            let model = network_correction(ifgs, &epochs, degree, offset)?;
            ifgs.iter()
                .map(|ifg| network_ifg_correction(ifg, &model, &epochs))
                .collect()
        }
    }
}

/// Build the per-pixel design matrix for one interferogram.
///
/// One row per raster cell in row-major order, matching the flattening
/// order used to vectorize the phase raster. Misaligning these two
/// orders would silently pair observations with the wrong predictors,
/// so row (r * cols + c) is always cell (r, c). Coordinates are scaled
/// by the pixel spacing: a raw index carries no physical distance.
pub fn design_matrix(ifg: &Interferogram, degree: OrbitalDegree, offset: bool) -> Array2<f64> {
    let nparams = degree.nparams(offset);
    let mut dm = Array2::<f64>::zeros((ifg.num_cells(), nparams));
    let (x_step, y_step) = (ifg.x_step(), ifg.y_step());
    let cols = ifg.cols();

    for r in 0..ifg.rows() {
        let y = r as f64 * y_step;
        for c in 0..cols {
            let x = c as f64 * x_step;
            let i = r * cols + c;
            match degree {
                OrbitalDegree::Planar => {
                    dm[[i, 0]] = x;
                    dm[[i, 1]] = y;
                }
                OrbitalDegree::Quadratic => {
                    dm[[i, 0]] = x * x;
                    dm[[i, 1]] = y * y;
                    dm[[i, 2]] = x * y;
                    dm[[i, 3]] = x;
                    dm[[i, 4]] = y;
                }
            }
            if offset {
                dm[[i, nparams - 1]] = 1.0;
            }
        }
    }
    dm
}

/// Build the block-structured joint design matrix for the whole network.
///
/// Shape is (cells_per_ifg * num_ifgs, nparams * num_epochs). The row
/// block of interferogram i holds its individual design matrix negated
/// in the master epoch's column block and unnegated in the slave's,
/// encoding phase = slave orbital phase - master orbital phase.
pub fn network_design_matrix(
    ifgs: &[Interferogram],
    epochs: &EpochIndex,
    degree: OrbitalDegree,
    offset: bool,
) -> InsarResult<Array2<f64>> {
    check_network(ifgs, epochs)?;

    let nparams = degree.nparams(offset);
    let num_cells = ifgs[0].num_cells();
    let shape = (num_cells * ifgs.len(), nparams * epochs.len());
    log::debug!(
        "Network design matrix: {} ifgs, {} epochs, shape {:?}",
        ifgs.len(),
        epochs.len(),
        shape
    );

    let mut data = Array2::<f64>::zeros(shape);
    for (i, ifg) in ifgs.iter().enumerate() {
        let dm = design_matrix(ifg, degree, offset);
        let rs = i * num_cells;

        let master_id = epochs.index_of(ifg.master()).ok_or_else(|| {
            InsarError::Topology(format!("Master date {} not indexed", ifg.master()))
        })?;
        let slave_id = epochs.index_of(ifg.slave()).ok_or_else(|| {
            InsarError::Topology(format!("Slave date {} not indexed", ifg.slave()))
        })?;

        let mut master_block = data.slice_mut(ndarray::s![
            rs..rs + num_cells,
            master_id * nparams..(master_id + 1) * nparams
        ]);
        master_block.assign(&dm);
        master_block.mapv_inplace(|v| -v);

        let mut slave_block = data.slice_mut(ndarray::s![
            rs..rs + num_cells,
            slave_id * nparams..(slave_id + 1) * nparams
        ]);
        slave_block.assign(&dm);
    }
    Ok(data)
}

/// Fit the orbital ramp of a single interferogram and forward-model it
/// over the full raster extent.
///
/// NaN observations are excluded from the fit, but the returned
/// correction is defined everywhere, including originally no-data cells.
pub fn independent_correction(
    ifg: &Interferogram,
    degree: OrbitalDegree,
    offset: bool,
) -> InsarResult<PhaseImage> {
    let dm = design_matrix(ifg, degree, offset);
    let vphase: Vec<f64> = ifg.phase().iter().map(|&v| v as f64).collect();
    debug_assert_eq!(vphase.len(), dm.nrows());

    let (valid_dm, valid_obs) = drop_nan_rows(&dm, &vphase);
    let model = solve_least_squares(&valid_dm, &valid_obs, INDEPENDENT_RCOND)?;

    let expected = degree.nparams(offset);
    if model.len() != expected {
        return Err(InsarError::Numerical(format!(
            "Fitted {} orbital parameters, expected {}",
            model.len(),
            expected
        )));
    }

    forward_model(&dm, &model, (ifg.rows(), ifg.cols()))
}

/// Independent correction over a stack, one fit per interferogram.
pub fn independent_corrections(
    ifgs: &[Interferogram],
    degree: OrbitalDegree,
    offset: bool,
) -> InsarResult<Vec<PhaseImage>> {
    ifgs.par_iter()
        .map(|ifg| independent_correction(ifg, degree, offset))
        .collect()
}

/// Joint network fit: one least-squares problem whose unknowns are the
/// per-epoch orbital parameters.
///
/// Solved with a regularized pseudoinverse (singular values below
/// 1e-6 of the largest are dropped) since network topology and data
/// gaps generally leave the joint system rank-deficient. Recovery of
/// per-interferogram corrections from the model is the consumer's step,
/// see [`network_ifg_correction`].
pub fn network_correction(
    ifgs: &[Interferogram],
    epochs: &EpochIndex,
    degree: OrbitalDegree,
    offset: bool,
) -> InsarResult<NetworkModel> {
    let dm = network_design_matrix(ifgs, epochs, degree, offset)?;

    // Stack observations in ifg order to match the design matrix row blocks
    let vphase: Vec<f64> = ifgs
        .iter()
        .flat_map(|ifg| ifg.phase().iter().map(|&v| v as f64))
        .collect();
    debug_assert_eq!(vphase.len(), dm.nrows());

    let (valid_dm, valid_obs) = drop_nan_rows(&dm, &vphase);
    log::debug!(
        "Network solve: {} of {} observations valid",
        valid_obs.len(),
        vphase.len()
    );

    let model = solve_least_squares(&valid_dm, &valid_obs, NETWORK_RCOND)?;

    let nparams = degree.nparams(offset);
    let expected = nparams * epochs.len();
    if model.len() != expected {
        return Err(InsarError::Numerical(format!(
            "Fitted {} network parameters, expected {}",
            model.len(),
            expected
        )));
    }

    let params = Array2::from_shape_vec((epochs.len(), nparams), model)
        .map_err(|e| InsarError::Numerical(e.to_string()))?;
    Ok(NetworkModel {
        params,
        degree,
        offset,
    })
}

/// Recover one interferogram's correction from a fitted network model by
/// evaluating (slave epoch block - master epoch block) against the
/// interferogram's own design matrix.
pub fn network_ifg_correction(
    ifg: &Interferogram,
    model: &NetworkModel,
    epochs: &EpochIndex,
) -> InsarResult<PhaseImage> {
    let master_id = epochs.index_of(ifg.master()).ok_or_else(|| {
        InsarError::Topology(format!("Master date {} not indexed", ifg.master()))
    })?;
    let slave_id = epochs.index_of(ifg.slave()).ok_or_else(|| {
        InsarError::Topology(format!("Slave date {} not indexed", ifg.slave()))
    })?;

    let delta: Vec<f64> = model
        .epoch_params(slave_id)
        .iter()
        .zip(model.epoch_params(master_id).iter())
        .map(|(s, m)| s - m)
        .collect();

    let dm = design_matrix(ifg, model.degree(), model.offset());
    forward_model(&dm, &delta, (ifg.rows(), ifg.cols()))
}

fn check_network(ifgs: &[Interferogram], epochs: &EpochIndex) -> InsarResult<()> {
    if ifgs.len() < 2 {
        return Err(InsarError::Topology(format!(
            "Network correction needs at least 2 interferograms, got {}",
            ifgs.len()
        )));
    }
    let first = &ifgs[0];
    for (i, ifg) in ifgs.iter().enumerate() {
        if ifg.rows() != first.rows()
            || ifg.cols() != first.cols()
            || ifg.x_step() != first.x_step()
            || ifg.y_step() != first.y_step()
        {
            return Err(InsarError::Topology(format!(
                "Interferogram {} geometry {}x{} ({}, {}) differs from stack geometry",
                i,
                ifg.rows(),
                ifg.cols(),
                ifg.x_step(),
                ifg.y_step()
            )));
        }
        for date in [ifg.master(), ifg.slave()] {
            if epochs.index_of(date).is_none() {
                return Err(InsarError::Topology(format!(
                    "Date {} of interferogram {} missing from epoch index",
                    date, i
                )));
            }
        }
    }
    Ok(())
}

/// Drop observation rows holding the NaN no-data sentinel, keeping the
/// design matrix and observation vector aligned row for row.
fn drop_nan_rows(dm: &Array2<f64>, obs: &[f64]) -> (Array2<f64>, Vec<f64>) {
    let keep: Vec<usize> = obs
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .map(|(i, _)| i)
        .collect();
    let valid_dm = dm.select(Axis(0), &keep);
    let valid_obs: Vec<f64> = keep.iter().map(|&i| obs[i]).collect();
    (valid_dm, valid_obs)
}

/// Minimum-norm least squares via SVD, dropping singular values below
/// `rcond` times the largest.
fn solve_least_squares(dm: &Array2<f64>, obs: &[f64], rcond: f64) -> InsarResult<Vec<f64>> {
    let (nrows, ncols) = dm.dim();
    if nrows == 0 {
        return Err(InsarError::Numerical(
            "No valid observations left after NaN filtering".to_string(),
        ));
    }

    let a = DMatrix::from_row_iterator(nrows, ncols, dm.iter().copied());
    let b = DVector::from_column_slice(obs);
    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    let x = svd
        .solve(&b, rcond * max_sv)
        .map_err(|e| InsarError::Numerical(e.to_string()))?;
    Ok(x.iter().copied().collect())
}

/// Evaluate a fitted model over a design matrix and reshape to raster form.
fn forward_model(
    dm: &Array2<f64>,
    params: &[f64],
    shape: (usize, usize),
) -> InsarResult<PhaseImage> {
    let p = ArrayView1::from(params);
    let fitted = dm.dot(&p);
    let data: Vec<f32> = fitted.iter().map(|&v| v as f32).collect();
    Array2::from_shape_vec(shape, data).map_err(|e| InsarError::Numerical(e.to_string()))
}

use approx::assert_abs_diff_eq;
use chrono::NaiveDate;
use ndarray::Array2;

use ratestack::core::{
    network_correction, network_design_matrix, network_ifg_correction, orbital_correction,
    EpochIndex,
};
use ratestack::types::{Interferogram, OrbitalDegree, OrbitalMethod};

const X_STEP: f64 = 90.0;
const Y_STEP: f64 = 80.0;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Planar surface with offset evaluated at cell (r, c).
fn plane(params: [f64; 3], r: usize, c: usize) -> f64 {
    params[0] * c as f64 * X_STEP + params[1] * r as f64 * Y_STEP + params[2]
}

/// Build a synthetic interferogram whose phase is exactly the
/// difference of two per-epoch planar orbital surfaces.
fn synthetic_ifg(
    shape: (usize, usize),
    master: NaiveDate,
    slave: NaiveDate,
    master_params: [f64; 3],
    slave_params: [f64; 3],
) -> Interferogram {
    let phase = Array2::from_shape_fn(shape, |(r, c)| {
        (plane(slave_params, r, c) - plane(master_params, r, c)) as f32
    });
    Interferogram::new(phase, master, slave, X_STEP, Y_STEP).unwrap()
}

fn three_ifg_network() -> (Vec<Interferogram>, Vec<[f64; 3]>) {
    let d0 = date(2009, 1, 3);
    let d1 = date(2009, 2, 7);
    let d2 = date(2009, 3, 14);

    // Per-epoch planar orbital parameters (a, b, offset)
    let p0 = [1.2e-3, -0.8e-3, 0.40];
    let p1 = [-0.5e-3, 1.6e-3, -0.25];
    let p2 = [2.1e-3, 0.4e-3, 0.10];

    let ifgs = vec![
        synthetic_ifg((10, 12), d0, d1, p0, p1),
        synthetic_ifg((10, 12), d1, d2, p1, p2),
        synthetic_ifg((10, 12), d0, d2, p0, p2),
    ];
    (ifgs, vec![p0, p1, p2])
}

#[test]
fn test_network_design_matrix_shape_and_blocks() {
    let (ifgs, _) = three_ifg_network();
    let epochs = EpochIndex::from_ifgs(&ifgs);
    assert_eq!(epochs.len(), 3);

    let degree = OrbitalDegree::Planar;
    let offset = true;
    let nparams = degree.nparams(offset);
    let cells = ifgs[0].num_cells();

    let dm = network_design_matrix(&ifgs, &epochs, degree, offset).unwrap();
    assert_eq!(dm.dim(), (3 * cells, 3 * nparams));

    for (i, ifg) in ifgs.iter().enumerate() {
        let single = ratestack::core::design_matrix(ifg, degree, offset);
        let m = epochs.index_of(ifg.master()).unwrap();
        let s = epochs.index_of(ifg.slave()).unwrap();

        for row in 0..cells {
            for e in 0..epochs.len() {
                for p in 0..nparams {
                    let got = dm[[i * cells + row, e * nparams + p]];
                    let want = if e == m {
                        -single[[row, p]]
                    } else if e == s {
                        single[[row, p]]
                    } else {
                        0.0
                    };
                    assert_abs_diff_eq!(got, want);
                }
            }
        }
    }
}

#[test]
fn test_network_recovers_planar_epoch_differences() {
    let (ifgs, params) = three_ifg_network();
    let epochs = EpochIndex::from_ifgs(&ifgs);

    let model = network_correction(&ifgs, &epochs, OrbitalDegree::Planar, true).unwrap();
    assert_eq!(model.num_epochs(), 3);
    assert_eq!(model.nparams(), 3);

    // Absolute epoch parameters are unobservable (only differences
    // constrain the data), but every recovered per-ifg correction must
    // match the analytic slave-minus-master surface.
    let epoch_order: Vec<_> = epochs.dates().collect();
    for ifg in &ifgs {
        let correction = network_ifg_correction(ifg, &model, &epochs).unwrap();
        let mi = epoch_order.iter().position(|&d| d == ifg.master()).unwrap();
        let si = epoch_order.iter().position(|&d| d == ifg.slave()).unwrap();
        for r in 0..ifg.rows() {
            for c in 0..ifg.cols() {
                let expected = plane(params[si], r, c) - plane(params[mi], r, c);
                assert_abs_diff_eq!(correction[[r, c]] as f64, expected, epsilon = 1e-4);
            }
        }
    }
}

#[test]
fn test_network_correction_with_nan_holes() {
    let (mut ifgs, params) = three_ifg_network();
    // punch no-data holes in one interferogram; the fit must ignore
    // them and the correction must still be defined there
    let mut phase = ifgs[0].phase().clone();
    phase[[2, 3]] = f32::NAN;
    phase[[7, 9]] = f32::NAN;
    ifgs[0] = Interferogram::new(
        phase,
        ifgs[0].master(),
        ifgs[0].slave(),
        X_STEP,
        Y_STEP,
    )
    .unwrap();

    let epochs = EpochIndex::from_ifgs(&ifgs);
    let model = network_correction(&ifgs, &epochs, OrbitalDegree::Planar, true).unwrap();
    let correction = network_ifg_correction(&ifgs[0], &model, &epochs).unwrap();

    let expected = plane(params[1], 2, 3) - plane(params[0], 2, 3);
    assert!(!correction[[2, 3]].is_nan());
    assert_abs_diff_eq!(correction[[2, 3]] as f64, expected, epsilon = 1e-4);
}

#[test]
fn test_top_level_dispatch() {
    let (ifgs, _) = three_ifg_network();

    let independent = orbital_correction(
        &ifgs,
        OrbitalDegree::Planar,
        OrbitalMethod::Independent,
        true,
    )
    .unwrap();
    assert_eq!(independent.len(), ifgs.len());

    let network =
        orbital_correction(&ifgs, OrbitalDegree::Planar, OrbitalMethod::Network, true).unwrap();
    assert_eq!(network.len(), ifgs.len());

    // Synthetic phase is an exact planar ramp, so both methods should
    // reproduce the observations
    for (corr, ifg) in network.iter().zip(&ifgs) {
        for (got, want) in corr.iter().zip(ifg.phase().iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-3);
        }
    }
}

#[test]
fn test_quadratic_network_well_formed() {
    // Unit spacing keeps the quadratic columns within the 1e-6
    // singular-value cutoff of the network pseudoinverse
    let d0 = date(2009, 1, 3);
    let d1 = date(2009, 2, 7);
    let d2 = date(2009, 3, 14);
    let surfaces: [fn(f64, f64) -> f64; 3] = [
        |r: f64, c: f64| 0.02 * c * c - 0.01 * r * r + 0.015 * r * c + 0.3 * c - 0.2 * r + 0.4,
        |r: f64, c: f64| -0.01 * c * c + 0.02 * r * r + 0.005 * r * c - 0.1 * c + 0.4 * r - 0.25,
        |r: f64, c: f64| 0.015 * c * c + 0.01 * r * r - 0.02 * r * c + 0.2 * c + 0.1 * r + 0.1,
    ];
    let pairs = [(0usize, 1usize, d0, d1), (1, 2, d1, d2), (0, 2, d0, d2)];
    let ifgs: Vec<Interferogram> = pairs
        .iter()
        .map(|&(m, s, md, sd)| {
            let phase = Array2::from_shape_fn((10, 12), |(r, c)| {
                (surfaces[s](r as f64, c as f64) - surfaces[m](r as f64, c as f64)) as f32
            });
            Interferogram::new(phase, md, sd, 1.0, 1.0).unwrap()
        })
        .collect();

    let epochs = EpochIndex::from_ifgs(&ifgs);
    let model = network_correction(&ifgs, &epochs, OrbitalDegree::Quadratic, true).unwrap();
    assert_eq!(model.num_epochs(), 3);
    assert_eq!(model.nparams(), 6);

    // The synthetic signal is exactly quadratic, so the recovered
    // corrections must match the observations
    for ifg in &ifgs {
        let correction = network_ifg_correction(ifg, &model, &epochs).unwrap();
        for (got, want) in correction.iter().zip(ifg.phase().iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-3);
        }
    }
}

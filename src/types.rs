use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Unwrapped interferometric phase value, NaN for no-data
pub type Phase = f32;

/// 2D phase raster (rows x cols)
pub type PhaseImage = Array2<Phase>;

/// 3D raster stack (rows x cols x bands)
pub type RasterStack = Array3<f32>;

/// Polynomial degree of the orbital error model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitalDegree {
    /// Planar surface: [x, y] (+ offset)
    Planar,
    /// Quadratic surface: [x^2, y^2, xy, x, y] (+ offset)
    Quadratic,
}

impl OrbitalDegree {
    /// Number of model parameters for this degree.
    pub fn nparams(&self, offset: bool) -> usize {
        let base = match self {
            OrbitalDegree::Planar => 2,
            OrbitalDegree::Quadratic => 5,
        };
        if offset {
            base + 1
        } else {
            base
        }
    }
}

impl TryFrom<i32> for OrbitalDegree {
    type Error = InsarError;

    fn try_from(value: i32) -> InsarResult<Self> {
        match value {
            1 => Ok(OrbitalDegree::Planar),
            2 => Ok(OrbitalDegree::Quadratic),
            other => Err(InsarError::Config(format!(
                "Invalid degree of {} for orbital correction",
                other
            ))),
        }
    }
}

/// Orbital correction method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitalMethod {
    /// One least-squares fit per interferogram
    Independent,
    /// Joint fit across the network, one parameter block per epoch
    Network,
}

impl TryFrom<i32> for OrbitalMethod {
    type Error = InsarError;

    fn try_from(value: i32) -> InsarResult<Self> {
        match value {
            1 => Ok(OrbitalMethod::Independent),
            2 => Ok(OrbitalMethod::Network),
            other => Err(InsarError::Config(format!(
                "Unknown orbital correction method '{}'",
                other
            ))),
        }
    }
}

/// A single unwrapped interferogram.
///
/// Owns its phase raster; the correction engine never mutates it and
/// returns new correction arrays instead. The master acquisition must
/// strictly precede the slave acquisition.
#[derive(Debug, Clone)]
pub struct Interferogram {
    phase: PhaseImage,
    master: NaiveDate,
    slave: NaiveDate,
    x_step: f64,
    y_step: f64,
}

impl Interferogram {
    /// Create a new interferogram, validating epoch ordering.
    pub fn new(
        phase: PhaseImage,
        master: NaiveDate,
        slave: NaiveDate,
        x_step: f64,
        y_step: f64,
    ) -> InsarResult<Self> {
        if master >= slave {
            return Err(InsarError::Topology(format!(
                "Master date {} must strictly precede slave date {}",
                master, slave
            )));
        }
        if x_step <= 0.0 || y_step <= 0.0 {
            return Err(InsarError::Config(format!(
                "Pixel spacing must be positive, got ({}, {})",
                x_step, y_step
            )));
        }
        Ok(Self {
            phase,
            master,
            slave,
            x_step,
            y_step,
        })
    }

    pub fn phase(&self) -> &PhaseImage {
        &self.phase
    }

    pub fn master(&self) -> NaiveDate {
        self.master
    }

    pub fn slave(&self) -> NaiveDate {
        self.slave
    }

    pub fn x_step(&self) -> f64 {
        self.x_step
    }

    pub fn y_step(&self) -> f64 {
        self.y_step
    }

    pub fn rows(&self) -> usize {
        self.phase.nrows()
    }

    pub fn cols(&self) -> usize {
        self.phase.ncols()
    }

    /// Total cell count, rows x cols.
    pub fn num_cells(&self) -> usize {
        self.phase.len()
    }

    /// Fraction of cells holding the NaN no-data sentinel.
    pub fn nan_fraction(&self) -> f64 {
        let nans = self.phase.iter().filter(|v| v.is_nan()).count();
        nans as f64 / self.num_cells() as f64
    }

    /// Temporal baseline between the two acquisitions in days.
    pub fn time_span_days(&self) -> i64 {
        (self.slave - self.master).num_days()
    }
}

/// Error types for InSAR stack processing
#[derive(Debug, thiserror::Error)]
pub enum InsarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network topology error: {0}")]
    Topology(String),

    #[error("Numerical invariant violation: {0}")]
    Numerical(String),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Tile kernel failure: {0}")]
    Kernel(String),
}

/// Result type for InSAR operations
pub type InsarResult<T> = Result<T, InsarError>;

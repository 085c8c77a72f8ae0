//! Density fields and the image loader.
//!
//! A [`DensityField`] is a row-major grid of non-negative mass values covering
//! the unit square. Row `r` spans `y ∈ [r / rows, (r + 1) / rows]`, so rows are
//! stored bottom-up: the loader flips image rows, which run top-down.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use thiserror::Error;

/// Errors while building or loading a density field.
#[derive(Debug, Error)]
pub enum DensityError {
    #[error("Failed to load density image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Density field is empty ({rows}x{cols})")]
    Empty { rows: usize, cols: usize },

    #[error("Invalid density {value} at row {row}, column {col}")]
    InvalidValue { row: usize, col: usize, value: f64 },
}

/// A 2D grid of non-negative mass values.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityField {
    values: Array2<f64>,
}

impl DensityField {
    /// Wrap a grid, rejecting empty grids and negative or non-finite entries.
    pub fn new(values: Array2<f64>) -> Result<Self, DensityError> {
        let (rows, cols) = values.dim();
        if rows == 0 || cols == 0 {
            return Err(DensityError::Empty { rows, cols });
        }
        if let Some(((row, col), &value)) = values
            .indexed_iter()
            .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return Err(DensityError::InvalidValue { row, col, value });
        }
        Ok(Self { values })
    }

    /// Build a field by evaluating `f(row, col)`.
    pub fn from_fn<F>(rows: usize, cols: usize, f: F) -> Result<Self, DensityError>
    where
        F: FnMut((usize, usize)) -> f64,
    {
        Self::new(Array2::from_shape_fn((rows, cols), f))
    }

    /// A constant field.
    pub fn constant(rows: usize, cols: usize, value: f64) -> Result<Self, DensityError> {
        Self::new(Array2::from_elem((rows, cols), value))
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    pub fn total_mass(&self) -> f64 {
        self.values.sum()
    }

    /// Scale the field so that its maximum is at most 1.
    ///
    /// Fields already within `[0, 1]` are left untouched.
    pub fn normalize_max(&mut self) {
        let max = self.max();
        if max > 1.0 {
            self.values.mapv_inplace(|v| v / max);
        }
    }
}

/// Decode an image file into a density field.
///
/// Pixels are converted to 16-bit luminance and mapped to `[0, 1]`; brighter
/// pixels carry more mass.
pub fn load_density(path: &Path) -> Result<DensityField, DensityError> {
    let img = image::open(path).map_err(|source| DensityError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let gray = img.to_luma16();
    let (width, height) = gray.dimensions();
    let (rows, cols) = (height as usize, width as usize);
    log::debug!("loaded {} ({}x{})", path.display(), cols, rows);

    DensityField::from_fn(rows, cols, |(row, col)| {
        let px = gray.get_pixel(col as u32, (rows - 1 - row) as u32);
        px.0[0] as f64 / u16::MAX as f64
    })
}

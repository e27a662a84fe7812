/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Containers for the coefficients of a basis-function bias expansion.
//!
//! A [`CoeffsSpace`] fixes the multi-dimensional shape of one coefficient
//! set and the bijection between multi-indices and flat indices.  On top of
//! it sit a dense [`CoeffsVector`] (one value per coefficient, plus an
//! optional auxiliary shadow array) and a [`CoeffsMatrix`] (one value per
//! unordered pair of coefficients, stored diagonal-only or as a packed
//! upper triangle).
//!
//! Shape mismatches and out-of-range indices are programmer errors and
//! panic; everything that can go wrong due to external input (files,
//! replica groups) is reported through `FailResult`.

#[macro_use] extern crate log;
#[macro_use] extern crate failure;
#[macro_use] extern crate itertools;

pub type FailResult<T> = Result<T, failure::Error>;

pub use crate::space::CoeffsSpace;
pub use crate::vector::CoeffsVector;
pub use crate::matrix::{CoeffsMatrix, MatrixMode};

mod space;
mod vector;
mod matrix;
pub mod io;

/// A checkpoint record's own bookkeeping disagrees with itself or with the
/// configured shape.  Either the file is corrupted, or it belongs to a
/// different coefficient set.
#[derive(Debug, Fail)]
#[fail(display = "inconsistent checkpoint data: {}", detail)]
pub struct ConsistencyError {
    pub detail: String,
}

/// A checkpoint body held fewer records than the declared total, and the
/// caller did not opt into partial data.
#[derive(Debug, Fail)]
#[fail(display = "missing coefficients in checkpoint: expected {}, found {}", expected, found)]
pub struct ShortReadError {
    pub expected: usize,
    pub found: usize,
}

/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

use crate::{CoeffsSpace, FailResult};
use crate::io::{self, ReadOutcome};

use std::io::{BufRead, Write};
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use rand::Rng;
use rand::distributions::{IndependentSample, Normal};
use vesfit_walkers::{self as walkers, ReplicaGroup};

/// One scalar per coefficient of a [`CoeffsSpace`], allocated once at
/// construction and never resized.
///
/// May carry an auxiliary shadow array of identical length (an independent
/// value stream, e.g. instantaneous coefficients next to their running
/// average) and an iteration counter.
#[derive(Debug, Clone)]
pub struct CoeffsVector {
    space: Arc<CoeffsSpace>,
    label: String,
    kind: String,
    data: Vec<f64>,
    aux: Option<Vec<f64>>,
    counter: u64,
}

impl CoeffsVector {
    pub fn new(space: Arc<CoeffsSpace>, label: impl Into<String>, with_aux: bool) -> CoeffsVector {
        let total = space.total();
        CoeffsVector {
            space,
            label: label.into(),
            kind: "linear_basis_coeffs".to_string(),
            data: vec![0.0; total],
            aux: if with_aux { Some(vec![0.0; total]) } else { None },
            counter: 0,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> CoeffsVector {
        self.kind = kind.into();
        self
    }

    pub fn space(&self) -> &Arc<CoeffsSpace> { &self.space }
    pub fn label(&self) -> &str { &self.label }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
    pub fn has_aux(&self) -> bool { self.aux.is_some() }

    pub fn set_label(&mut self, label: impl Into<String>) { self.label = label.into(); }

    pub fn same_shape(&self, other: &CoeffsVector) -> bool {
        self.space.shape() == other.space.shape()
    }

    fn assert_same_len(&self, len: usize) {
        assert_eq!(
            self.data.len(), len,
            "shape mismatch: '{}' has {} coefficients, operand has {}",
            self.label, self.data.len(), len,
        );
    }

    // ----------------------------------------------------
    // element access

    pub fn value(&self, index: usize) -> f64 { self.data[index] }
    pub fn set_value(&mut self, index: usize, value: f64) { self.data[index] = value; }
    pub fn add_to_value(&mut self, index: usize, value: f64) { self.data[index] += value; }

    pub fn value_at(&self, indices: &[usize]) -> f64 {
        self.data[self.space.index_of(indices)]
    }
    pub fn set_value_at(&mut self, indices: &[usize], value: f64) {
        let i = self.space.index_of(indices);
        self.data[i] = value;
    }
    pub fn add_to_value_at(&mut self, indices: &[usize], value: f64) {
        let i = self.space.index_of(indices);
        self.data[i] += value;
    }

    fn aux_slice(&self) -> &[f64] {
        match self.aux {
            Some(ref aux) => aux,
            None => panic!("'{}' has no auxiliary coefficients", self.label),
        }
    }
    fn aux_slice_mut(&mut self) -> &mut [f64] {
        match self.aux {
            Some(ref mut aux) => aux,
            None => panic!("'{}' has no auxiliary coefficients", self.label),
        }
    }

    pub fn aux_value(&self, index: usize) -> f64 { self.aux_slice()[index] }
    pub fn set_aux_value(&mut self, index: usize, value: f64) {
        self.aux_slice_mut()[index] = value;
    }
    pub fn add_to_aux_value(&mut self, index: usize, value: f64) {
        self.aux_slice_mut()[index] += value;
    }

    pub fn data(&self) -> &[f64] { &self.data }
    pub fn data_mut(&mut self) -> &mut [f64] { &mut self.data }
    pub fn aux(&self) -> Option<&[f64]> { self.aux.as_ref().map(|v| &v[..]) }
    pub fn aux_mut(&mut self) -> Option<&mut [f64]> { self.aux.as_mut().map(|v| &mut v[..]) }

    // ----------------------------------------------------
    // bulk operations

    pub fn fill(&mut self, value: f64) {
        for x in &mut self.data { *x = value; }
    }

    pub fn fill_aux(&mut self, value: f64) {
        for x in self.aux_slice_mut() { *x = value; }
    }

    /// Scale the main array, and the auxiliary array if present.
    pub fn scale(&mut self, factor: f64) {
        for x in &mut self.data { *x *= factor; }
        if let Some(ref mut aux) = self.aux {
            for x in aux { *x *= factor; }
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        for x in &mut self.data { *x += value; }
    }

    pub fn add_slice(&mut self, values: &[f64]) {
        self.assert_same_len(values.len());
        for (x, &v) in izip!(&mut self.data, values) { *x += v; }
    }

    pub fn assign_slice(&mut self, values: &[f64]) {
        self.assert_same_len(values.len());
        self.data.copy_from_slice(values);
    }

    pub fn add_vector(&mut self, other: &CoeffsVector) {
        self.add_slice(&other.data);
    }

    pub fn add_scaled_vector(&mut self, factor: f64, other: &CoeffsVector) {
        self.assert_same_len(other.data.len());
        for (x, &v) in izip!(&mut self.data, &other.data) { *x += factor * v; }
    }

    pub fn assign_vector(&mut self, other: &CoeffsVector) {
        self.assign_slice(&other.data);
    }

    /// Copy the main array into the auxiliary array.
    pub fn snapshot_to_aux(&mut self) {
        let CoeffsVector { ref data, ref mut aux, ref label, .. } = *self;
        match *aux {
            Some(ref mut aux) => aux.copy_from_slice(data),
            None => panic!("'{}' has no auxiliary coefficients", label),
        }
    }

    /// Overwrite every main value with a draw from the standard normal
    /// distribution.
    pub fn randomize_gaussian<R: Rng>(&mut self, rng: &mut R) {
        let normal = Normal::new(0.0, 1.0);
        for x in &mut self.data {
            *x = normal.ind_sample(rng);
        }
    }

    pub fn count_values(&self, value: f64) -> usize {
        self.data.iter().filter(|&&x| x == value).count()
    }

    // ----------------------------------------------------
    // monitoring

    pub fn rms(&self) -> f64 {
        let sumsq: f64 = self.data.iter().map(|x| x * x).sum();
        (sumsq / self.data.len() as f64).sqrt()
    }

    /// Largest absolute value and the flat index where it occurs.
    pub fn max_abs(&self) -> (f64, usize) {
        let mut best = (0.0, 0);
        for (i, &x) in self.data.iter().enumerate() {
            if x.abs() > best.0 {
                best = (x.abs(), i);
            }
        }
        best
    }

    // ----------------------------------------------------
    // counter

    pub fn counter(&self) -> u64 { self.counter }
    pub fn set_counter(&mut self, value: u64) { self.counter = value; }
    pub fn bump_counter(&mut self) { self.counter += 1; }

    // ----------------------------------------------------
    // multi-walker

    /// Replace the main array with its element-wise average over all
    /// walkers in `group` (sum-then-broadcast; blocking collective).
    pub fn average_over_walkers(&mut self, group: &dyn ReplicaGroup) -> FailResult<()> {
        walkers::average_over_group(group, &mut self.data)
    }

    // ----------------------------------------------------
    // checkpoints

    /// Append one checkpoint block; see the `io` module for the format.
    pub fn write_checkpoint(&self, w: &mut dyn Write, with_descriptions: bool) -> FailResult<()> {
        io::write_vector(w, self, with_descriptions)
    }

    /// Read one checkpoint block, validating it against this vector's space.
    ///
    /// A body with fewer records than the space's total is an error unless
    /// `allow_partial`; unlisted coefficients keep their current value.
    pub fn read_checkpoint(&mut self, r: &mut dyn BufRead, allow_partial: bool) -> FailResult<ReadOutcome> {
        let outcome = io::read_vector(r, self, allow_partial)?;
        if let Some(iteration) = outcome.iteration {
            self.counter = iteration;
        }
        Ok(outcome)
    }
}

impl Index<usize> for CoeffsVector {
    type Output = f64;
    fn index(&self, index: usize) -> &f64 { &self.data[index] }
}

impl IndexMut<usize> for CoeffsVector {
    fn index_mut(&mut self, index: usize) -> &mut f64 { &mut self.data[index] }
}

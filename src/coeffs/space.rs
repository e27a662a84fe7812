/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

use crate::FailResult;

/// The shape of one coefficient set: an ordered list of dimensions, each
/// with a label and a positive extent (the number of basis functions along
/// that axis).  Immutable once constructed.
///
/// The flat index is a mixed-radix encoding with the **last dimension
/// varying fastest**; `index_of` and `indices_of` are exact inverses over
/// `[0, total)`.  The checkpoint reader cross-checks this convention on
/// every record it reads back, so it must never change independently of
/// the file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoeffsSpace {
    labels: Vec<String>,
    shape: Vec<usize>,
    strides: Vec<usize>,
    total: usize,
    basis_descriptors: Option<Vec<String>>,
}

impl CoeffsSpace {
    pub fn new<S: Into<String>>(labels: Vec<S>, shape: Vec<usize>) -> FailResult<CoeffsSpace> {
        let labels: Vec<String> = labels.into_iter().map(|s| s.into()).collect();
        ensure!(!shape.is_empty(), "a coefficient space needs at least one dimension");
        ensure!(
            labels.len() == shape.len(),
            "dimension labels and extents differ in length ({} vs {})",
            labels.len(), shape.len(),
        );
        ensure!(
            shape.iter().all(|&n| n > 0),
            "every dimension of a coefficient space must have a nonzero extent (got {:?})",
            shape,
        );

        // stride[last] = 1; stride[d] = stride[d+1] * extent[d+1]
        let mut strides = vec![1; shape.len()];
        for d in (0..shape.len() - 1).rev() {
            strides[d] = strides[d + 1] * shape[d + 1];
        }
        let total = shape.iter().product();

        Ok(CoeffsSpace { labels, shape, strides, total, basis_descriptors: None })
    }

    /// Attach one human-readable basis-set descriptor per dimension.
    /// These end up in checkpoint headers (`<dim>_basis` fields).
    pub fn with_basis_descriptors<S: Into<String>>(mut self, descriptors: Vec<S>) -> FailResult<CoeffsSpace> {
        let descriptors: Vec<String> = descriptors.into_iter().map(|s| s.into()).collect();
        ensure!(
            descriptors.len() == self.ndim(),
            "got {} basis descriptors for {} dimensions",
            descriptors.len(), self.ndim(),
        );
        self.basis_descriptors = Some(descriptors);
        Ok(self)
    }

    pub fn ndim(&self) -> usize { self.shape.len() }
    pub fn total(&self) -> usize { self.total }
    pub fn shape(&self) -> &[usize] { &self.shape }
    pub fn labels(&self) -> &[String] { &self.labels }
    pub fn label(&self, dim: usize) -> &str { &self.labels[dim] }
    pub fn extent(&self, dim: usize) -> usize { self.shape[dim] }
    pub fn basis_descriptors(&self) -> Option<&[String]> {
        self.basis_descriptors.as_ref().map(|v| &v[..])
    }

    /// Flat index of a multi-index.  Panics on a wrong-arity or
    /// out-of-range multi-index.
    pub fn index_of(&self, indices: &[usize]) -> usize {
        assert_eq!(
            indices.len(), self.ndim(),
            "multi-index arity {} does not match a {}-dimensional space",
            indices.len(), self.ndim(),
        );
        izip!(indices, &self.shape, &self.strides)
            .map(|(&i, &n, &stride)| {
                assert!(i < n, "index {} out of range for extent {}", i, n);
                i * stride
            })
            .sum()
    }

    /// Multi-index of a flat index.  Panics when `index >= total()`.
    pub fn indices_of(&self, index: usize) -> Vec<usize> {
        assert!(
            index < self.total,
            "flat index {} out of range for {} coefficients",
            index, self.total,
        );
        let mut rest = index;
        self.strides.iter()
            .map(|&stride| {
                let i = rest / stride;
                rest %= stride;
                i
            })
            .collect()
    }

    /// Default human-readable description of one coefficient.
    pub fn describe(&self, index: usize) -> String {
        let indices: Vec<String> = self.indices_of(index).iter().map(|i| i.to_string()).collect();
        format!("c({})", indices.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_follow_last_dimension_fastest() {
        let space = CoeffsSpace::new(vec!["x", "y"], vec![3, 4]).unwrap();
        assert_eq!(space.total(), 12);
        assert_eq!(space.index_of(&[0, 0]), 0);
        assert_eq!(space.index_of(&[0, 1]), 1);
        assert_eq!(space.index_of(&[1, 0]), 4);
        assert_eq!(space.index_of(&[2, 3]), 11);
    }

    #[test]
    fn indexing_round_trips_over_the_whole_space() {
        let space = CoeffsSpace::new(vec!["a", "b", "c"], vec![2, 3, 4]).unwrap();
        let mut seen = vec![false; space.total()];
        for i in 0..space.extent(0) {
            for j in 0..space.extent(1) {
                for k in 0..space.extent(2) {
                    let flat = space.index_of(&[i, j, k]);
                    assert!(!seen[flat], "two multi-indices map to flat index {}", flat);
                    seen[flat] = true;
                    assert_eq!(space.indices_of(flat), vec![i, j, k]);
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn one_dimensional_space_is_the_identity() {
        let space = CoeffsSpace::new(vec!["x"], vec![7]).unwrap();
        for i in 0..7 {
            assert_eq!(space.index_of(&[i]), i);
            assert_eq!(space.indices_of(i), vec![i]);
        }
    }

    #[test]
    fn bad_construction_is_rejected() {
        assert!(CoeffsSpace::new(Vec::<String>::new(), vec![]).is_err());
        assert!(CoeffsSpace::new(vec!["x"], vec![3, 4]).is_err());
        assert!(CoeffsSpace::new(vec!["x", "y"], vec![3, 0]).is_err());
        let space = CoeffsSpace::new(vec!["x", "y"], vec![3, 4]).unwrap();
        assert!(space.with_basis_descriptors(vec!["FOURIER"]).is_err());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_multi_index_panics() {
        let space = CoeffsSpace::new(vec!["x", "y"], vec![3, 4]).unwrap();
        space.index_of(&[0, 4]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_flat_index_panics() {
        let space = CoeffsSpace::new(vec!["x"], vec![3]).unwrap();
        space.indices_of(3);
    }

    #[test]
    fn descriptions() {
        let space = CoeffsSpace::new(vec!["x", "y"], vec![3, 4]).unwrap();
        assert_eq!(space.describe(11), "c(2,3)");
    }
}

//Copyright 2024 Felix Engl
//
//Licensed under the Apache License, Version 2.0 (the "License");
//you may not use this file except in compliance with the License.
//You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
//Unless required by applicable law or agreed to in writing, software
//distributed under the License is distributed on an "AS IS" BASIS,
//WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//See the License for the specific language governing permissions and
//limitations under the License.

//! Numeric helpers shared by the topic models.
//!
//! Accumulations are done in f64, the results are cast back to the element type of the input.

use half::f16;
use itertools::Itertools;
use ndarray::{Array, Array1, Array2, ArrayView, ArrayView1, ArrayView2, Axis, Dimension, Ix1, Ix2};
use nmftopics_toolkit::normal_number::cmp_descending;
use num::{Float, ToPrimitive};
use sprs::CsMat;
use statrs::function::gamma::digamma;
use thiserror::Error;
use crate::corpus::SparseDocument;

#[derive(Debug, Error)]
pub enum MathError {
    #[error("The shapes {left:?} and {right:?} are not compatible!")]
    ShapeMismatch {
        left: Vec<usize>,
        right: Vec<usize>
    },
    #[error("Arrays with {0} dimensions are not supported!")]
    UnsupportedDimension(usize),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

#[inline(always)]
fn to_f64<T: ToPrimitive>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

#[inline(always)]
fn from_f64<T: Float>(value: f64) -> T {
    T::from(value).unwrap_or_else(T::nan)
}

/// Log of the sum of the exponentials of `x`, stabilized by subtracting the maximum.
///
/// Does not handle NaN values.
pub fn log_sum_exp<T: Float>(x: ArrayView2<T>) -> T {
    let max = x.iter().copied().map(to_f64).fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return from_f64(max);
    }
    let sum: f64 = x.iter().map(|&value| (to_f64(value) - max).exp()).sum();
    from_f64(sum.ln() + max)
}

/// The mean of `|a - b|`.
pub fn mean_absolute_difference<T: Float>(a: ArrayView1<T>, b: ArrayView1<T>) -> Result<T, MathError> {
    if a.len() != b.len() {
        return Err(MathError::ShapeMismatch { left: a.shape().to_vec(), right: b.shape().to_vec() });
    }
    if a.is_empty() {
        return Ok(T::zero());
    }
    let sum: f64 = a.iter().zip_eq(b.iter()).map(|(&x, &y)| (to_f64(x) - to_f64(y)).abs()).sum();
    Ok(from_f64(sum / a.len() as f64))
}

/// `E[log(theta)]` for `theta ~ Dir(alpha)`.
pub fn dirichlet_expectation_1d<T: Float>(alpha: ArrayView1<T>) -> Array1<T> {
    let psi_sum_alpha = digamma(alpha.iter().copied().map(to_f64).sum());
    alpha.mapv(|value| from_f64(digamma(to_f64(value)) - psi_sum_alpha))
}

/// [dirichlet_expectation_1d] for every row of `alpha`.
pub fn dirichlet_expectation_2d<T: Float>(alpha: ArrayView2<T>) -> Array2<T> {
    let mut result = Array2::from_elem(alpha.raw_dim(), T::zero());
    for (row, mut target) in alpha.axis_iter(Axis(0)).zip_eq(result.axis_iter_mut(Axis(0))) {
        target.assign(&dirichlet_expectation_1d(row));
    }
    result
}

/// Dispatches to [dirichlet_expectation_1d] or [dirichlet_expectation_2d] by the number of dimensions.
pub fn dirichlet_expectation<T: Float, D: Dimension>(alpha: ArrayView<T, D>) -> Result<Array<T, D>, MathError> {
    let result = match alpha.ndim() {
        1 => dirichlet_expectation_1d(alpha.into_dimensionality::<Ix1>()?).into_dyn(),
        2 => dirichlet_expectation_2d(alpha.into_dimensionality::<Ix2>()?).into_dyn(),
        other => return Err(MathError::UnsupportedDimension(other))
    };
    Ok(result.into_dimensionality::<D>()?)
}

/// The kind of norm used by the unit vector functions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Norm {
    L1,
    #[default]
    L2
}

impl Norm {
    fn of(self, values: impl Iterator<Item=f64>) -> f64 {
        match self {
            Norm::L1 => values.map(f64::abs).sum(),
            Norm::L2 => values.map(|value| value * value).sum::<f64>().sqrt()
        }
    }
}

/// An element that can be normalized.
/// Floats keep their precision, integers are promoted to f64.
pub trait UnitVectorElement: Copy {
    type Output: Float;
    fn to_output(self) -> Self::Output;
}

macro_rules! impl_unit_vector_element {
    (for float: $($t:ty),*) => {
        $(
            impl UnitVectorElement for $t {
                type Output = $t;
                #[inline(always)]
                fn to_output(self) -> Self::Output {
                    self
                }
            }
        )*
    };
    (for integer: $($t:ty),*) => {
        $(
            impl UnitVectorElement for $t {
                type Output = f64;
                #[inline(always)]
                fn to_output(self) -> Self::Output {
                    self as f64
                }
            }
        )*
    };
}

impl_unit_vector_element!(for float: f16, f32, f64);
impl_unit_vector_element!(for integer: u8, i8, u16, i16, u32, i32, u64, i64, usize, isize);

/// Scales `values` by `1/length`, a length of zero is treated as 1.0.
fn scale_by_length<T: Float>(values: &mut [T], length: f64) -> f64 {
    if length > 0.0 {
        let divisor: T = from_f64(length);
        values.iter_mut().for_each(|value| *value = *value / divisor);
        length
    } else {
        1.0
    }
}

/// Scales `vec` to unit length with the L2 norm.
pub fn unit_vector<T: UnitVectorElement>(vec: ArrayView1<T>) -> Array1<T::Output> {
    unit_vector_with(vec, Norm::L2).0
}

/// Scales `vec` to unit length with the L2 norm and returns the norm.
/// Empty and all-zero vectors are returned unchanged with a norm of 1.0.
pub fn unit_vector_with_norm<T: UnitVectorElement>(vec: ArrayView1<T>) -> (Array1<T::Output>, f64) {
    unit_vector_with(vec, Norm::L2)
}

pub fn unit_vector_with<T: UnitVectorElement>(vec: ArrayView1<T>, norm: Norm) -> (Array1<T::Output>, f64) {
    let mut values = vec.iter().map(|value| value.to_output()).collect_vec();
    let length = norm.of(values.iter().copied().map(to_f64));
    let length = scale_by_length(&mut values, length);
    (Array1::from(values), length)
}

/// Scales the stored values of a compressed sparse matrix to unit length.
/// The sparsity structure and the storage order are kept.
pub fn unit_sparse_matrix<T: UnitVectorElement>(mat: &CsMat<T>, norm: Norm) -> (CsMat<T::Output>, f64) {
    let mut converted: CsMat<T::Output> = mat.map(|value| value.to_output());
    let length = norm.of(converted.data().iter().copied().map(to_f64));
    let length = scale_by_length(converted.data_mut(), length);
    (converted, length)
}

/// Scales a bag of words to unit length.
pub fn unit_sparse_document<T: UnitVectorElement>(doc: &[(usize, T)], norm: Norm) -> (SparseDocument<T::Output>, f64) {
    let mut values = doc.iter().map(|(_, value)| value.to_output()).collect_vec();
    let length = norm.of(values.iter().copied().map(to_f64));
    let length = scale_by_length(&mut values, length);
    (doc.iter().map(|(id, _)| *id).zip_eq(values).collect(), length)
}

/// Converts a bag of words into a dense vector of `length`. Ids outside of the vector are ignored.
pub fn sparse_to_full(doc: &[(usize, f64)], length: usize) -> Array1<f64> {
    let mut result = Array1::zeros(length);
    for &(id, value) in doc {
        if let Some(target) = result.get_mut(id) {
            *target += value;
        }
    }
    result
}

/// Converts a dense vector into a bag of words, dropping every value with `|value| <= eps`.
pub fn full_to_sparse(vec: ArrayView1<f64>, eps: f64) -> SparseDocument<f64> {
    vec.iter().copied().enumerate().filter(|(_, value)| value.abs() > eps).collect()
}

/// The ids of the `topn` biggest values, in descending order. Ties are ordered by ascending id.
pub fn argsort_desc(values: ArrayView1<f64>, topn: usize) -> Vec<usize> {
    values
        .iter()
        .copied()
        .enumerate()
        .sorted_by(|(id_a, a), (id_b, b)| cmp_descending(*a, *b).then(id_a.cmp(id_b)))
        .take(topn)
        .map(|(id, _)| id)
        .collect()
}

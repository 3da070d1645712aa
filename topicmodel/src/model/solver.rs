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


//! The projected gradient solvers of the factorization.

use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;
use sprs::CsMat;
use crate::model::NmfConfig;

/// Runs one sweep of coordinate descent over `h` and returns the norm of the projected gradient.
/// The topics are visited in the order of `permutation`.
pub(crate) fn solve_h(
    mut h: ArrayViewMut2<f64>,
    wtv: ArrayView2<f64>,
    wtw: ArrayView2<f64>,
    permutation: &[usize],
    kappa: f64
) -> f64 {
    let mut violation = 0.0;
    for sample in 0..h.ncols() {
        for &component in permutation {
            let hess = wtw[[component, component]];
            if hess <= 0.0 {
                continue;
            }
            let mut grad = -wtv[[component, sample]];
            for other in 0..h.nrows() {
                grad += wtw[[component, other]] * h[[other, sample]];
            }
            grad *= kappa / hess;

            let value = h[[component, sample]];
            let projected = if value == 0.0 { grad.min(0.0) } else { grad };
            violation += projected * projected;
            h[[component, sample]] = (value - grad).max(0.0);
        }
    }
    violation.sqrt()
}

/// Calculates `Wᵀ·v` for the sparse batch `v`.
pub(crate) fn w_transposed_dot(w: ArrayView2<f64>, v: &CsMat<f64>) -> Array2<f64> {
    let mut wtv = Array2::zeros((w.ncols(), v.cols()));
    for (sample, column) in v.outer_iterator().enumerate() {
        let mut target = wtv.column_mut(sample);
        for (term, &value) in column.iter() {
            target.scaled_add(value, &w.row(term));
        }
    }
    wtv
}

/// Calculates `v·hᵀ` for the sparse batch `v`.
pub(crate) fn dot_h_transposed(v: &CsMat<f64>, h: ArrayView2<f64>) -> Array2<f64> {
    let mut vht = Array2::zeros((v.rows(), h.nrows()));
    for (sample, column) in v.outer_iterator().enumerate() {
        let activations = h.column(sample);
        for (term, &value) in column.iter() {
            vht.row_mut(term).scaled_add(value, &activations);
        }
    }
    vht
}

/// Finds the non-negative activations `h` (topics x samples) that reconstruct `v` with `w`.
///
/// `h` is used as warm start if it fits the batch.
pub(crate) fn solve_projection<R: Rng>(
    v: &CsMat<f64>,
    w: ArrayView2<f64>,
    h: Option<Array2<f64>>,
    v_max: f64,
    config: &NmfConfig,
    rng: &mut R
) -> Array2<f64> {
    let num_terms = w.nrows() as f64;
    let num_topics = w.ncols();
    let batch_size = v.cols();

    let mut h = match h {
        Some(h) if h.dim() == (num_topics, batch_size) => h,
        _ => Array2::zeros((num_topics, batch_size))
    };

    let wtw = w.t().dot(&w);
    let wtv = w_transposed_dot(w, v);
    let mut permutation: Vec<usize> = (0..num_topics).collect();

    let mut error = 0.0;
    for iteration in 0..config.h_max_iter {
        permutation.shuffle(rng);
        let new_error = solve_h(h.view_mut(), wtv.view(), wtw.view(), &permutation, config.kappa) / num_terms;
        h.mapv_inplace(|value| value.min(v_max));
        if error != 0.0 && (error - new_error).abs() < config.h_stop_condition {
            log::debug!("h converged after {} iterations with an error of {new_error}", iteration + 1);
            break;
        }
        error = new_error;
    }
    h
}

/// Clips `w` to `[0, v_max]` and scales every column with a L2 norm above 1 down to unit length.
pub(crate) fn clip_and_normalize(mut w: ArrayViewMut2<f64>, v_max: f64) {
    w.mapv_inplace(|value| value.clamp(0.0, v_max));
    let norms: Array1<f64> = w.map_axis(Axis(0), |column| column.dot(&column).sqrt().max(1.0));
    w /= &norms;
}

/// Refines `w` by projected gradient descent on the running statistics `a` and `b`.
///
/// `w_error` holds the error of the last solve and is updated in place.
pub(crate) fn solve_w(
    mut w: ArrayViewMut2<f64>,
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    v_max: f64,
    w_error: &mut f64,
    config: &NmfConfig
) {
    let a_norm = a.iter().map(|value| value * value).sum::<f64>().sqrt();
    if a_norm == 0.0 {
        return;
    }
    let eta = config.kappa / a_norm;

    for iteration in 0..config.w_max_iter {
        let wa = w.dot(&a);
        w.scaled_add(-eta, &(&wa - &b));
        clip_and_normalize(w.view_mut(), v_max);

        let error = 0.5 * (&wa * &w).sum() - (&w * &b).sum();
        if w_error.is_finite() && *w_error != 0.0 && ((error - *w_error) / *w_error).abs() < config.w_stop_condition {
            log::debug!("w converged after {} iterations", iteration + 1);
            *w_error = error;
            break;
        }
        *w_error = error;
    }
}

/// The frobenius norm of `v - w·h`.
pub(crate) fn l2_norm(v: &CsMat<f64>, w: ArrayView2<f64>, h: ArrayView2<f64>) -> f64 {
    let mut sum = 0.0;
    for (sample, column) in v.outer_iterator().enumerate() {
        let mut residual = w.dot(&h.column(sample));
        for (term, &value) in column.iter() {
            residual[term] -= value;
        }
        sum += residual.dot(&residual);
    }
    sum.sqrt()
}

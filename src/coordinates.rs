//! LPS / RAS sign conventions.
//!
//! blockmatching and the image library work in LPS, the scene in RAS. The two
//! differ by the sign of the first two axes, so the same negation converts in
//! either direction.

use ndarray::{Array4, Axis, s};
use rayon::prelude::*;

/// Negate the X and Y component of every vector in a `[Z, Y, X, 3]` field
pub fn flip_vectors(field: &mut Array4<f32>) {
    field
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut plane| {
            plane
                .slice_mut(s![.., .., ..2])
                .mapv_inplace(|v| -v);
        });
}

/// Negate the first two rows of a row-major 3x3 direction cosine matrix
pub fn flip_direction(direction: &mut [f64; 9]) {
    for value in direction.iter_mut().take(6) {
        *value = -*value;
    }
}

/// Negate the first two origin coordinates
pub fn flip_origin(origin: &mut [f64; 3]) {
    origin[0] = -origin[0];
    origin[1] = -origin[1];
}

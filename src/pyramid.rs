use std::fmt;

use thiserror::Error;

/// Largest axis size at which blockmatching stops building coarser levels
pub const COARSEST_MAX_AXIS: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PyramidError {
    #[error("Volume shape {0:?} has a non-positive dimension")]
    NonPositiveDimension(Vec<usize>),
}

/// Per-level voxel grid of the multi-resolution pyramid, level 0 being the
/// native grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PyramidLevels {
    levels: Vec<Vec<usize>>,
}

impl PyramidLevels {
    pub fn from_shape(shape: &[usize]) -> Result<Self, PyramidError> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(PyramidError::NonPositiveDimension(shape.to_vec()));
        }

        let mut levels = vec![shape.to_vec()];
        loop {
            let previous = &levels[levels.len() - 1];
            let max_axis = max_axis(previous);
            if max_axis <= COARSEST_MAX_AXIS {
                break;
            }
            let bound = closest_lower_power_of_two(max_axis);
            let next = previous.iter().map(|&axis| axis.min(bound)).collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Index of the coarsest level
    pub fn highest_level(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level(&self, level: usize) -> Option<&[usize]> {
        self.levels.get(level).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.levels.iter().map(Vec::as_slice).enumerate()
    }
}

impl fmt::Display for PyramidLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (level, shape) in self.iter() {
            let shape: Vec<String> = shape.iter().map(usize::to_string).collect();
            writeln!(f, "{level}: {}", shape.join(" x "))?;
        }
        Ok(())
    }
}

/// Largest power of two strictly below `n` when `n` is itself a power of
/// two, otherwise the largest power of two below `n`.
pub fn closest_lower_power_of_two(n: usize) -> usize {
    debug_assert!(n > 0);
    if n.is_power_of_two() {
        (n / 2).max(1)
    } else {
        1 << n.ilog2()
    }
}

fn max_axis(shape: &[usize]) -> usize {
    shape.iter().copied().max().unwrap_or(0)
}

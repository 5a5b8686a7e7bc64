//! Reading and writing blockmatching `.trsf` files.
//!
//! Linear transformations are stored as text:
//!
//! ```text
//! (
//! 08
//!    1.00000000   0.00000000   0.00000000  12.50000000
//!    ...three more rows...
//! )
//! ```
//!
//! Each value takes 13 characters with 8 fractional digits and values are
//! concatenated without a separator. Dense transformations are stored as an
//! INRIMAGE volume, see [`crate::displacement`].

use std::{fmt::Write as _, fs, path::Path};

use ndarray::Array2;
use thiserror::Error;

use crate::displacement::{DisplacementError, DisplacementField, GridDims};
use crate::enums::TransformDirection;

const OPEN_DELIMITER: &str = "(";
const VERSION_MARKER: &str = "08";
const CLOSE_DELIMITER: &str = ")";
const FIELD_WIDTH: usize = 13;
const FRACTION_DIGITS: usize = 8;

#[derive(Debug, Error)]
pub enum TransformFileError {
    #[error("Transform file has {0} lines, expected at least 6")]
    TooFewLines(usize),

    #[error("Invalid number {token:?} on matrix row {row}")]
    InvalidNumber { row: usize, token: String },

    #[error("Matrix row {row} has {count} values, expected 4")]
    WrongColumnCount { row: usize, count: usize },

    #[error("Matrix is singular and cannot be inverted")]
    SingularMatrix,

    #[error("Displacement field error: {0}")]
    Displacement(#[from] DisplacementError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Homogeneous 4x4 matrix, row-major
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearTransform {
    rows: [[f64; 4]; 4],
}

impl Default for LinearTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl LinearTransform {
    pub fn new(rows: [[f64; 4]; 4]) -> Self {
        Self { rows }
    }

    pub fn identity() -> Self {
        let mut rows = [[0.0; 4]; 4];
        for (i, row) in rows.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[[f64; 4]; 4] {
        &self.rows
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.rows[row][col]
    }

    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((4, 4), |(r, c)| self.rows[r][c])
    }

    /// Largest element-wise difference to `other`
    pub fn max_abs_diff(&self, other: &LinearTransform) -> f64 {
        self.rows
            .iter()
            .flatten()
            .zip(other.rows.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    pub fn multiply(&self, other: &LinearTransform) -> LinearTransform {
        let mut rows = [[0.0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.rows[r][k] * other.rows[k][c]).sum();
            }
        }
        LinearTransform { rows }
    }

    /// Gauss-Jordan elimination with partial pivoting
    pub fn inverse(&self) -> Result<LinearTransform, TransformFileError> {
        let mut a = self.rows;
        let mut inv = LinearTransform::identity().rows;

        for col in 0..4 {
            let pivot = (col..4)
                .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
                .unwrap_or(col);
            if a[pivot][col].abs() < 1e-12 {
                return Err(TransformFileError::SingularMatrix);
            }
            a.swap(col, pivot);
            inv.swap(col, pivot);

            let scale = a[col][col];
            for k in 0..4 {
                a[col][k] /= scale;
                inv[col][k] /= scale;
            }

            for row in 0..4 {
                if row == col {
                    continue;
                }
                let factor = a[row][col];
                if factor == 0.0 {
                    continue;
                }
                for k in 0..4 {
                    a[row][k] -= factor * a[col][k];
                    inv[row][k] -= factor * inv[col][k];
                }
            }
        }

        Ok(LinearTransform { rows: inv })
    }

    /// Convert between the matrix blockmatching writes and the one kept in
    /// the scene. Applying it twice gives back the original matrix.
    pub fn in_direction(
        self,
        direction: TransformDirection,
    ) -> Result<LinearTransform, TransformFileError> {
        match direction {
            TransformDirection::AsWritten => Ok(self),
            TransformDirection::FloatingToReference => self.inverse(),
        }
    }

    /// Render the `.trsf` text representation
    pub fn to_trsf_string(&self) -> String {
        let mut out = String::new();
        out.push_str(OPEN_DELIMITER);
        out.push('\n');
        out.push_str(VERSION_MARKER);
        out.push('\n');
        for row in &self.rows {
            for value in row {
                // Writing into a String cannot fail
                let _ = write!(
                    out,
                    "{value:width$.precision$}",
                    width = FIELD_WIDTH,
                    precision = FRACTION_DIGITS
                );
            }
            out.push('\n');
        }
        out.push_str(CLOSE_DELIMITER);
        out.push('\n');
        out
    }

    /// Parse the `.trsf` text representation
    pub fn parse_trsf(text: &str) -> Result<LinearTransform, TransformFileError> {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() < 6 {
            return Err(TransformFileError::TooFewLines(lines.len()));
        }

        let mut rows = [[0.0; 4]; 4];
        for (row, line) in lines[2..6].iter().enumerate() {
            rows[row] = Self::parse_row(row, line)?;
        }
        Ok(LinearTransform { rows })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<LinearTransform, TransformFileError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse_trsf(&text)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), TransformFileError> {
        fs::write(path.as_ref(), self.to_trsf_string())?;
        Ok(())
    }

    fn parse_row(row: usize, line: &str) -> Result<[f64; 4], TransformFileError> {
        let tokens = tokenize(line);
        if tokens.len() != 4 {
            return Err(TransformFileError::WrongColumnCount {
                row,
                count: tokens.len(),
            });
        }

        let mut values = [0.0; 4];
        for (value, token) in values.iter_mut().zip(tokens) {
            *value = token
                .parse::<f64>()
                .map_err(|_| TransformFileError::InvalidNumber {
                    row,
                    token: token.to_string(),
                })?;
        }
        Ok(values)
    }
}

/// Split a matrix row into numbers.
///
/// A value wider than its field runs into the previous one, either at its
/// sign or, for positive values, right after the previous value's
/// fractional digits.
fn tokenize(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    for word in line.split_whitespace() {
        let bytes = word.as_bytes();
        let mut start = 0;
        for i in 1..bytes.len() {
            let sign = matches!(bytes[i], b'-' | b'+');
            if sign && !matches!(bytes[i - 1], b'e' | b'E') {
                split_fractions(&word[start..i], &mut tokens);
                start = i;
            }
        }
        split_fractions(&word[start..], &mut tokens);
    }
    tokens
}

fn split_fractions<'a>(mut piece: &'a str, tokens: &mut Vec<&'a str>) {
    while let Some(dot) = piece.find('.') {
        let end = dot + 1 + FRACTION_DIGITS;
        if !piece[dot + 1..].contains('.') || end >= piece.len() || !piece.is_char_boundary(end) {
            break;
        }
        tokens.push(&piece[..end]);
        piece = &piece[end..];
    }
    if !piece.is_empty() {
        tokens.push(piece);
    }
}

/// Contents of a `.trsf` file, linear or dense
#[derive(Debug)]
pub enum TransformFile {
    Linear(LinearTransform),
    Vectorfield(DisplacementField),
}

impl TransformFile {
    /// Read a transformation, telling the two kinds apart by the first line.
    ///
    /// `dims` is the voxel grid of the reference volume and is only used for
    /// dense transformations.
    pub fn read(path: impl AsRef<Path>, dims: GridDims) -> Result<Self, TransformFileError> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        if is_inrimage(&bytes) {
            let field = DisplacementField::decode(&bytes, dims)?;
            Ok(TransformFile::Vectorfield(field))
        } else {
            let text = String::from_utf8_lossy(&bytes);
            Ok(TransformFile::Linear(LinearTransform::parse_trsf(&text)?))
        }
    }
}

fn is_inrimage(bytes: &[u8]) -> bool {
    let first_line = bytes.split(|&b| b == b'\n').next().unwrap_or_default();
    first_line.windows(8).any(|w| w == b"INRIMAGE")
}

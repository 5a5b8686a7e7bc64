//! Dense displacement fields exchanged with blockmatching.
//!
//! The tool stores a vectorfield transformation as an INRIMAGE-4 volume: a
//! 256 byte text header followed by little-endian `f32` samples. Samples are
//! ordered with the vector component varying fastest, then X, Y and Z, so the
//! flat stream reshapes directly into a `[Z, Y, X, C]` array.
//!
//! Single-slice volumes carry two components per voxel. Decoded fields always
//! have three, the third one being zero.

use std::{collections::HashMap, fs, path::Path};

use ndarray::{Array4, s};
use thiserror::Error;

use crate::coordinates;

pub const HEADER_SIZE: usize = 256;
const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();
const MAGIC: &str = "#INRIMAGE-4#{";
const HEADER_END: &str = "##}\n";

#[derive(Debug, Error)]
pub enum DisplacementError {
    #[error("Displacement file is truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Displacement field is {actual:?} but the reference grid is {expected:?}")]
    DimensionMismatch {
        expected: [usize; 4],
        actual: [usize; 4],
    },

    #[error("Invalid displacement header entry {0:?}")]
    InvalidHeader(String),

    #[error("Displacement payload is {actual} bytes but the reference grid needs {expected}")]
    PayloadMismatch { expected: usize, actual: usize },

    #[error("Voxel grid must not be empty, got {0:?}")]
    EmptyGrid(GridDims),

    #[error("Voxel grid {0:?} is too large to address")]
    GridTooLarge(GridDims),

    #[error("Displacement vectors need 3 components, got {0}")]
    ComponentCount(usize),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Voxel grid size in the tool's axis order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridDims {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl GridDims {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Build from a `(depth, height, width)` array shape
    pub fn from_zyx(dim: (usize, usize, usize)) -> Self {
        Self {
            x: dim.2,
            y: dim.1,
            z: dim.0,
        }
    }

    /// Vector components stored per voxel
    pub fn components(&self) -> usize {
        if self.z == 1 { 2 } else { 3 }
    }

    pub fn voxel_count(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    pub fn sample_count(&self) -> Option<usize> {
        self.voxel_count()?.checked_mul(self.components())
    }

    /// Bytes of sample data, `None` when the grid is too large to address
    pub fn payload_len(&self) -> Option<usize> {
        self.sample_count()?.checked_mul(SAMPLE_SIZE)
    }

    fn stored_shape(&self) -> [usize; 4] {
        [self.z, self.y, self.x, self.components()]
    }
}

/// Per-voxel displacement vectors, indexed `[z, y, x, component]`
#[derive(Clone, Debug, PartialEq)]
pub struct DisplacementField {
    data: Array4<f32>,
    spacing: [f32; 3],
}

impl DisplacementField {
    /// Wrap an array of shape `[Z, Y, X, 3]`
    pub fn new(data: Array4<f32>) -> Result<Self, DisplacementError> {
        match data.dim().3 {
            3 => Ok(Self {
                data,
                spacing: [1.0; 3],
            }),
            components => Err(DisplacementError::ComponentCount(components)),
        }
    }

    pub fn with_spacing(mut self, spacing: [f32; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn zeros(dims: GridDims) -> Self {
        Self {
            data: Array4::zeros((dims.z, dims.y, dims.x, 3)),
            spacing: [1.0; 3],
        }
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array4<f32> {
        &mut self.data
    }

    pub fn spacing(&self) -> [f32; 3] {
        self.spacing
    }

    pub fn dims(&self) -> GridDims {
        let (z, y, x, _) = self.data.dim();
        GridDims { x, y, z }
    }

    /// Switch vectors between LPS and RAS
    pub fn flip_in_plane(&mut self) {
        coordinates::flip_vectors(&mut self.data);
    }

    /// Decode a tool-written field for a reference grid of size `dims`
    pub fn decode(bytes: &[u8], dims: GridDims) -> Result<Self, DisplacementError> {
        let expected = dims
            .payload_len()
            .and_then(|len| len.checked_add(HEADER_SIZE))
            .ok_or(DisplacementError::GridTooLarge(dims))?;
        if expected == HEADER_SIZE {
            return Err(DisplacementError::EmptyGrid(dims));
        }
        if bytes.len() < expected {
            return Err(DisplacementError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let header = InrHeader::parse(&bytes[..HEADER_SIZE])?;
        let mut spacing = [1.0; 3];
        if let Some(header) = header {
            let actual = header.shape()?;
            if actual != dims.stored_shape() {
                return Err(DisplacementError::DimensionMismatch {
                    expected: dims.stored_shape(),
                    actual,
                });
            }
            spacing = header.spacing()?;
        } else if bytes.len() != expected {
            // Without a header the length is the only check of the grid
            return Err(DisplacementError::PayloadMismatch {
                expected: expected - HEADER_SIZE,
                actual: bytes.len() - HEADER_SIZE,
            });
        }

        let payload = &bytes[HEADER_SIZE..expected];
        let samples: Vec<f32> = payload
            .chunks_exact(SAMPLE_SIZE)
            .map(|chunk| f32::from_bits(u32::from_le(bytemuck::pod_read_unaligned(chunk))))
            .collect();

        let data = Self::pad_to_three_components(samples, dims)?;
        Ok(Self { data, spacing })
    }

    /// Encode in the tool's layout, dropping the padding component of
    /// single-slice fields
    pub fn encode(&self) -> Vec<u8> {
        let dims = self.dims();
        let components = dims.components();

        let words: Vec<u32> = self
            .data
            .slice(s![.., .., .., ..components])
            .iter()
            .map(|v| v.to_bits().to_le())
            .collect();

        let mut bytes = InrHeader::render(dims, self.spacing).into_bytes();
        bytes.extend_from_slice(bytemuck::cast_slice(&words));
        bytes
    }

    pub fn read(path: impl AsRef<Path>, dims: GridDims) -> Result<Self, DisplacementError> {
        let bytes = fs::read(path.as_ref())?;
        Self::decode(&bytes, dims)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), DisplacementError> {
        fs::write(path.as_ref(), self.encode())?;
        Ok(())
    }

    fn pad_to_three_components(
        samples: Vec<f32>,
        dims: GridDims,
    ) -> Result<Array4<f32>, DisplacementError> {
        let shape = (dims.z, dims.y, dims.x, dims.components());
        let stored = Array4::from_shape_vec(shape, samples)?;
        if dims.components() == 3 {
            return Ok(stored);
        }

        let mut data = Array4::zeros((dims.z, dims.y, dims.x, 3));
        data.slice_mut(s![.., .., .., ..2]).assign(&stored);
        Ok(data)
    }
}

/// Key/value entries of an INRIMAGE-4 header
struct InrHeader {
    entries: HashMap<String, String>,
}

impl InrHeader {
    /// `None` when the bytes are not an INRIMAGE header
    fn parse(bytes: &[u8]) -> Result<Option<Self>, DisplacementError> {
        let text = String::from_utf8_lossy(bytes);
        let mut lines = text.lines();
        if lines.next().map(str::trim) != Some(MAGIC) {
            return Ok(None);
        }

        let entries = lines
            .take_while(|line| !line.starts_with("##}"))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Ok(Some(Self { entries }))
    }

    fn number<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, DisplacementError> {
        match self.entries.get(key) {
            Some(value) => value
                .parse()
                .map_err(|_| DisplacementError::InvalidHeader(format!("{key}={value}"))),
            None => Ok(default),
        }
    }

    fn shape(&self) -> Result<[usize; 4], DisplacementError> {
        Ok([
            self.number("ZDIM", 1)?,
            self.number("YDIM", 1)?,
            self.number("XDIM", 1)?,
            self.number("VDIM", 1)?,
        ])
    }

    fn spacing(&self) -> Result<[f32; 3], DisplacementError> {
        Ok([
            self.number("VX", 1.0)?,
            self.number("VY", 1.0)?,
            self.number("VZ", 1.0)?,
        ])
    }

    fn render(dims: GridDims, spacing: [f32; 3]) -> String {
        let mut header = format!(
            "{MAGIC}\nXDIM={}\nYDIM={}\nZDIM={}\nVDIM={}\nTYPE=float\nPIXSIZE=32 bits\nCPU=decm\nVX={}\nVY={}\nVZ={}\n",
            dims.x,
            dims.y,
            dims.z,
            dims.components(),
            spacing[0],
            spacing[1],
            spacing[2],
        );
        let padding = HEADER_SIZE.saturating_sub(header.len() + HEADER_END.len());
        header.extend(std::iter::repeat_n('\n', padding));
        header.push_str(HEADER_END);
        header
    }
}

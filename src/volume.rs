use crate::coordinates;
use crate::displacement::GridDims;
use crate::enums::Orientation;

use image::{ImageBuffer, Rgb};
use ndarray::{Array3, ArrayView2, s};
use rayon::prelude::*;

/// Spatial placement of a voxel grid, in the image library's LPS convention
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Geometry {
    /// Voxel size along (x, y, z)
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    /// Row-major direction cosines
    pub direction: [f64; 9],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Geometry {
    /// Same geometry expressed in the other of LPS / RAS
    pub fn flipped(&self) -> Self {
        let mut flipped = *self;
        coordinates::flip_direction(&mut flipped.direction);
        coordinates::flip_origin(&mut flipped.origin);
        flipped
    }

    pub fn same_direction(&self, other: &Geometry) -> bool {
        self.direction == other.direction
    }
}

/// Voxel types found in NIfTI and Analyze files
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoxelType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
    Float128,
    Complex,
    Rgb,
}

impl VoxelType {
    /// blockmatching only handles scalar, non-extended-precision voxels
    pub fn is_supported(&self) -> bool {
        !matches!(self, VoxelType::Float128 | VoxelType::Complex | VoxelType::Rgb)
    }
}

/// Header-level description of a volume
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeInfo {
    pub name: String,
    /// (depth, height, width)
    pub dim: (usize, usize, usize),
    pub geometry: Geometry,
    pub voxel_type: VoxelType,
}

impl VolumeInfo {
    pub fn grid(&self) -> GridDims {
        GridDims::from_zyx(self.dim)
    }

    /// Shape in the tool's (x, y, z) order
    pub fn shape_xyz(&self) -> [usize; 3] {
        [self.dim.2, self.dim.1, self.dim.0]
    }
}

#[derive(Clone, Debug, Default)]
pub struct Volume {
    pub data: Array3<f32>,
    pub geometry: Geometry,
}

impl Volume {
    pub fn new(data: Array3<f32>, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    /// Intensity range used to window slices into 8 bits
    pub fn value_range(&self) -> (f32, f32) {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    #[inline]
    fn normalize_to_u8(value: f32, (lo, hi): (f32, f32)) -> u8 {
        if hi <= lo {
            return 0;
        }
        (((value - lo) / (hi - lo)) * 255.0).clamp(0.0, 255.0) as u8
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    /// Index of the middle slice along `orientation`
    pub fn center_index(&self, orientation: &Orientation) -> usize {
        let dim = self.data.dim();
        match orientation {
            Orientation::Axial => dim.0 / 2,
            Orientation::Coronal => dim.1 / 2,
            Orientation::Sagittal => dim.2 / 2,
        }
    }

    /// Composite a slice of `background` (green) with the same slice of
    /// `foreground` (magenta) blended at `opacity`.
    ///
    /// Both volumes must share a voxel grid, which is the case for the
    /// reference and the resampled result.
    pub fn overlay_image(
        background: &Volume,
        foreground: &Volume,
        index: usize,
        orientation: Orientation,
        opacity: f32,
    ) -> Option<ImageBuffer<Rgb<u8>, Vec<u8>>> {
        if background.dim() != foreground.dim() {
            return None;
        }
        let bg = background.get_slice_from_axis(index, &orientation)?;
        let fg = foreground.get_slice_from_axis(index, &orientation)?;
        let bg_range = background.value_range();
        let fg_range = foreground.value_range();
        let opacity = opacity.clamp(0.0, 1.0);

        let (height, width) = bg.dim();
        let bg_values: Vec<f32> = bg.iter().copied().collect();
        let fg_values: Vec<f32> = fg.iter().copied().collect();

        let pixel_data: Vec<u8> = bg_values
            .par_iter()
            .zip(fg_values.par_iter())
            .flat_map_iter(|(&b, &f)| {
                let b = Self::normalize_to_u8(b, bg_range) as f32 * (1.0 - opacity);
                let f = Self::normalize_to_u8(f, fg_range) as f32 * opacity;
                [f as u8, b as u8, f as u8]
            })
            .collect();

        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(dim: (usize, usize, usize)) -> Volume {
        Volume::new(
            Array3::from_shape_fn(dim, |(z, y, x)| (z * 100 + y * 10 + x) as f32),
            Geometry::default(),
        )
    }

    #[test]
    fn slices_follow_orientation() {
        let volume = ramp((4, 3, 2));
        assert_eq!(
            volume.get_slice_from_axis(1, &Orientation::Axial).unwrap().dim(),
            (3, 2)
        );
        assert_eq!(
            volume.get_slice_from_axis(2, &Orientation::Coronal).unwrap().dim(),
            (4, 2)
        );
        assert_eq!(
            volume.get_slice_from_axis(1, &Orientation::Sagittal).unwrap()[[3, 2]],
            321.0
        );
        assert!(volume.get_slice_from_axis(2, &Orientation::Sagittal).is_none());
    }

    #[test]
    fn overlay_tints_background_green_and_foreground_magenta() {
        let background = ramp((2, 2, 2));
        let mut foreground = ramp((2, 2, 2));
        foreground.data_mut().fill(0.0);
        foreground.data_mut()[[0, 0, 0]] = 1.0;

        let image =
            Volume::overlay_image(&background, &foreground, 1, Orientation::Axial, 0.5).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        // brightest background voxel, empty foreground
        assert_eq!(image.get_pixel(1, 1).0, [0, 127, 0]);

        let image =
            Volume::overlay_image(&background, &foreground, 0, Orientation::Axial, 0.5).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [127, 0, 127]);
    }

    #[test]
    fn overlay_needs_matching_grids() {
        assert!(
            Volume::overlay_image(&ramp((2, 2, 2)), &ramp((2, 2, 3)), 0, Orientation::Axial, 0.5)
                .is_none()
        );
    }

    #[test]
    fn geometry_flip_is_an_involution() {
        let geometry = Geometry {
            spacing: [0.5, 0.5, 2.0],
            origin: [1.0, 2.0, 3.0],
            direction: [0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, -1.0],
        };
        let flipped = geometry.flipped();
        assert_eq!(flipped.origin, [-1.0, -2.0, 3.0]);
        assert_eq!(flipped.spacing, geometry.spacing);
        assert_eq!(flipped.flipped(), geometry);
    }
}

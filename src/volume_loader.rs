use crate::enums::VolumeFormat;
use crate::volume::{Geometry, Volume, VolumeInfo, VoxelType};

use ndarray::{ArrayD, Axis, Ix3};
use nifti::{
    InMemNiftiVolume, IntoNdArray, NiftiHeader, NiftiObject, NiftiType, ReaderOptions,
    writer::WriterOptions,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

/// Analyze 7.5 and NIfTI-1 headers share this layout
const HEADER_SIZE: usize = 348;
const MAGIC_OFFSET: usize = 344;
const MAGIC_PAIR: &[u8; 4] = b"ni1\0";
const MAGIC_SINGLE: &[u8; 4] = b"n+1\0";

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("Unsupported volume format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Expected a 2D or 3D volume, found {0} dimensions")]
    UnsupportedDimensionality(usize),

    #[error("Analyze header {} is shorter than 348 bytes", .0.display())]
    TruncatedHeader(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Read the header of a NIfTI or Analyze volume
    pub fn load_info(path: impl AsRef<Path>) -> Result<VolumeInfo, VolumeLoaderError> {
        let path = path.as_ref();
        let header = Self::read_header(path)?;
        Self::info_from_header(path, &header)
    }

    /// Load voxel data and geometry
    pub fn load_volume(path: impl AsRef<Path>) -> Result<Volume, VolumeLoaderError> {
        let path = path.as_ref();
        let (header, data) = Self::read_data(path)?;
        debug!("Loaded {} with shape {:?}", path.display(), data.shape());

        Ok(Volume::new(
            Self::to_zyx(data)?,
            Self::geometry_from_header(&header),
        ))
    }

    /// Overwrite the placement of a blockmatching result with the one of its
    /// reference volume.
    ///
    /// NIfTI results get the reference geometry written into their header,
    /// Analyze results get a copy of the reference `.hdr` file.
    pub fn repair_result(
        reference_path: &Path,
        reference: &VolumeInfo,
        result_path: &Path,
    ) -> Result<(), VolumeLoaderError> {
        match Self::check_format(result_path)? {
            VolumeFormat::Nifti => {
                let (mut header, data) = Self::read_data(result_path)?;
                Self::write_geometry(&mut header, &reference.geometry);
                WriterOptions::new(result_path)
                    .reference_header(&header)
                    .write_nifti(&data)?;
            }
            VolumeFormat::Analyze => {
                fs::copy(
                    Self::header_path(reference_path),
                    Self::header_path(result_path),
                )?;
            }
        }
        info!("Copied reference geometry into {}", result_path.display());
        Ok(())
    }

    /// Write the volume at `from` to `to`.
    ///
    /// Files are copied when both paths name the same format and compression,
    /// including the `.img` half of an Analyze pair. Otherwise the voxels are
    /// re-encoded as `f32` in the format `to` names.
    pub fn export(from: &Path, to: &Path) -> Result<(), VolumeLoaderError> {
        let source = Self::check_format(from)?;
        let target = Self::check_format(to)?;

        if source == target && is_gz(from) == is_gz(to) {
            let header = Self::header_path(to);
            fs::copy(Self::header_path(from), &header)?;
            if source == VolumeFormat::Analyze {
                fs::copy(Self::image_path(from), Self::image_path(to))?;
            }
            debug!("Copied {} to {}", from.display(), header.display());
            return Ok(());
        }

        let (header, data) = Self::read_data(from)?;
        WriterOptions::new(Self::header_path(to))
            .reference_header(&header)
            .write_nifti(&data)?;
        debug!("Re-encoded {} as {}", from.display(), to.display());
        Ok(())
    }

    /// Volume name derived from its file name
    pub fn name_from_path(path: &Path) -> String {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let lower = file_name.to_ascii_lowercase();
        [".nii.gz", ".nii", ".hdr", ".img"]
            .iter()
            .find(|ext| lower.ends_with(*ext))
            .map(|ext| file_name[..file_name.len() - ext.len()].to_string())
            .unwrap_or_else(|| file_name.to_string())
    }

    fn check_format(path: &Path) -> Result<VolumeFormat, VolumeLoaderError> {
        VolumeFormat::from_path(path)
            .ok_or_else(|| VolumeLoaderError::UnsupportedFormat(path.to_path_buf()))
    }

    fn header_path(path: &Path) -> PathBuf {
        match VolumeFormat::from_path(path) {
            Some(VolumeFormat::Analyze) => path.with_extension("hdr"),
            _ => path.to_path_buf(),
        }
    }

    fn image_path(path: &Path) -> PathBuf {
        path.with_extension("img")
    }

    fn read_header(path: &Path) -> Result<NiftiHeader, VolumeLoaderError> {
        match Self::check_format(path)? {
            VolumeFormat::Nifti => Ok(NiftiHeader::from_file(path)?),
            VolumeFormat::Analyze => Self::read_analyze_header(&Self::header_path(path)),
        }
    }

    /// Read a `.hdr` file, which may be a NIfTI pair header or a plain
    /// Analyze 7.5 header.
    ///
    /// Analyze headers have no magic code and keep unrelated history fields
    /// where NIfTI stores its transforms and scaling, so those are cleared and
    /// the geometry falls back to `pixdim`.
    fn read_analyze_header(path: &Path) -> Result<NiftiHeader, VolumeLoaderError> {
        let mut bytes = fs::read(path)?;
        if bytes.len() < HEADER_SIZE {
            return Err(VolumeLoaderError::TruncatedHeader(path.to_path_buf()));
        }
        bytes.truncate(HEADER_SIZE);

        let magic = &bytes[MAGIC_OFFSET..HEADER_SIZE];
        if magic == MAGIC_PAIR || magic == MAGIC_SINGLE {
            return Ok(NiftiHeader::from_reader(bytes.as_slice())?);
        }

        bytes[MAGIC_OFFSET..HEADER_SIZE].copy_from_slice(MAGIC_PAIR);
        let mut header = NiftiHeader::from_reader(bytes.as_slice())?;
        header.qform_code = 0;
        header.sform_code = 0;
        header.scl_slope = 0.0;
        header.scl_inter = 0.0;
        header.vox_offset = 0.0;
        header.fix();
        debug!("Read {} as an Analyze 7.5 header", path.display());
        Ok(header)
    }

    fn read_data(path: &Path) -> Result<(NiftiHeader, ArrayD<f32>), VolumeLoaderError> {
        match Self::check_format(path)? {
            VolumeFormat::Nifti => {
                let object = ReaderOptions::new().read_file(path)?;
                let header = object.header().clone();
                let data = object.into_volume().into_ndarray::<f32>()?;
                Ok((header, data))
            }
            VolumeFormat::Analyze => {
                let header = Self::read_analyze_header(&Self::header_path(path))?;
                let volume = InMemNiftiVolume::from_file(Self::image_path(path), &header)?;
                Ok((header, volume.into_ndarray::<f32>()?))
            }
        }
    }

    fn info_from_header(path: &Path, header: &NiftiHeader) -> Result<VolumeInfo, VolumeLoaderError> {
        let rank = header.dim[0] as usize;
        let axis = |i: usize| -> usize {
            if i <= rank {
                header.dim[i].max(1) as usize
            } else {
                1
            }
        };
        if !(2..=3).contains(&rank) && !(rank > 3 && (4..=rank).all(|i| axis(i) == 1)) {
            return Err(VolumeLoaderError::UnsupportedDimensionality(rank));
        }

        Ok(VolumeInfo {
            name: Self::name_from_path(path),
            dim: (axis(3), axis(2), axis(1)),
            geometry: Self::geometry_from_header(header),
            voxel_type: Self::voxel_type(header.data_type()?),
        })
    }

    fn voxel_type(data_type: NiftiType) -> VoxelType {
        match data_type {
            NiftiType::Uint8 => VoxelType::UInt8,
            NiftiType::Int8 => VoxelType::Int8,
            NiftiType::Uint16 => VoxelType::UInt16,
            NiftiType::Int16 => VoxelType::Int16,
            NiftiType::Uint32 => VoxelType::UInt32,
            NiftiType::Int32 => VoxelType::Int32,
            NiftiType::Uint64 => VoxelType::UInt64,
            NiftiType::Int64 => VoxelType::Int64,
            NiftiType::Float32 => VoxelType::Float32,
            NiftiType::Float64 => VoxelType::Float64,
            NiftiType::Float128 => VoxelType::Float128,
            NiftiType::Complex64 | NiftiType::Complex128 | NiftiType::Complex256 => {
                VoxelType::Complex
            }
            NiftiType::Rgb24 | NiftiType::Rgba32 => VoxelType::Rgb,
        }
    }

    /// Header affine in RAS (sform, then qform, then pixdim), converted to
    /// the LPS convention of [`Geometry`]
    fn geometry_from_header(header: &NiftiHeader) -> Geometry {
        let affine = if header.sform_code > 0 {
            [header.srow_x, header.srow_y, header.srow_z]
        } else if header.qform_code > 0 {
            let b = header.quatern_b;
            let c = header.quatern_c;
            let d = header.quatern_d;
            let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
            let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let (dx, dy, dz) = (header.pixdim[1], header.pixdim[2], header.pixdim[3] * qfac);
            [
                [
                    (a * a + b * b - c * c - d * d) * dx,
                    (2.0 * b * c - 2.0 * a * d) * dy,
                    (2.0 * b * d + 2.0 * a * c) * dz,
                    header.quatern_x,
                ],
                [
                    (2.0 * b * c + 2.0 * a * d) * dx,
                    (a * a + c * c - b * b - d * d) * dy,
                    (2.0 * c * d - 2.0 * a * b) * dz,
                    header.quatern_y,
                ],
                [
                    (2.0 * b * d - 2.0 * a * c) * dx,
                    (2.0 * c * d + 2.0 * a * b) * dy,
                    (a * a + d * d - c * c - b * b) * dz,
                    header.quatern_z,
                ],
            ]
        } else {
            [
                [header.pixdim[1], 0.0, 0.0, 0.0],
                [0.0, header.pixdim[2], 0.0, 0.0],
                [0.0, 0.0, header.pixdim[3], 0.0],
            ]
        };

        let mut ras = Geometry::default();
        for col in 0..3 {
            let norm = (0..3)
                .map(|row| (affine[row][col] as f64).powi(2))
                .sum::<f64>()
                .sqrt();
            if norm > 1e-9 {
                ras.spacing[col] = norm;
                for row in 0..3 {
                    ras.direction[row * 3 + col] = affine[row][col] as f64 / norm;
                }
            }
        }
        for row in 0..3 {
            ras.origin[row] = affine[row][3] as f64;
        }
        ras.flipped()
    }

    /// Store `geometry` as the header's sform
    fn write_geometry(header: &mut NiftiHeader, geometry: &Geometry) {
        let ras = geometry.flipped();
        let mut rows = [[0.0f32; 4]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            for c in 0..3 {
                row[c] = (ras.direction[r * 3 + c] * ras.spacing[c]) as f32;
            }
            row[3] = ras.origin[r] as f32;
        }
        header.srow_x = rows[0];
        header.srow_y = rows[1];
        header.srow_z = rows[2];
        header.sform_code = 1;
        header.qform_code = 0;
        for c in 0..3 {
            header.pixdim[c + 1] = ras.spacing[c] as f32;
        }
    }

    /// NIfTI arrays are indexed (x, y, z); volumes are (z, y, x)
    fn to_zyx(mut data: ArrayD<f32>) -> Result<ndarray::Array3<f32>, VolumeLoaderError> {
        while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
            let last = data.ndim() - 1;
            data = data.remove_axis(Axis(last));
        }
        if data.ndim() == 2 {
            data = data.insert_axis(Axis(2));
        }
        if data.ndim() != 3 {
            return Err(VolumeLoaderError::UnsupportedDimensionality(data.ndim()));
        }

        let xyz = data.into_dimensionality::<Ix3>()?;
        Ok(xyz.reversed_axes().as_standard_layout().into_owned())
    }
}

fn is_gz(path: &Path) -> bool {
    path.to_string_lossy().to_ascii_lowercase().ends_with(".gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn write_test_volume(path: &Path, header: &NiftiHeader) {
        let data = Array3::from_shape_fn((4, 3, 2), |(x, y, z)| (x + 10 * y + 100 * z) as f32);
        WriterOptions::new(path)
            .reference_header(header)
            .write_nifti(&data)
            .unwrap();
    }

    /// Turn a NIfTI pair header into a plain Analyze 7.5 one
    fn strip_magic(hdr: &Path) {
        let mut bytes = fs::read(hdr).unwrap();
        bytes[MAGIC_OFFSET..HEADER_SIZE].fill(0);
        fs::write(hdr, bytes).unwrap();
    }

    fn write_analyze_volume(path: &Path, header: &NiftiHeader) {
        write_test_volume(path, header);
        strip_magic(&path.with_extension("hdr"));
    }

    fn oblique_header() -> NiftiHeader {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [-2.0, 0.0, 0.0, 10.0];
        header.srow_y = [0.0, 2.0, 0.0, -20.0];
        header.srow_z = [0.0, 0.0, 3.0, 5.0];
        header.pixdim = [1.0, 2.0, 2.0, 3.0, 1.0, 1.0, 1.0, 1.0];
        header
    }

    #[test]
    fn names_drop_volume_extensions() {
        assert_eq!(VolumeLoader::name_from_path(Path::new("/a/t1.nii.gz")), "t1");
        assert_eq!(VolumeLoader::name_from_path(Path::new("brain.HDR")), "brain");
        assert_eq!(VolumeLoader::name_from_path(Path::new("x.mha")), "x.mha");
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = VolumeLoader::load_info("volume.mha").unwrap_err();
        assert!(matches!(err, VolumeLoaderError::UnsupportedFormat(_)));
    }

    #[test]
    fn header_geometry_is_reported_in_lps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.nii");
        write_test_volume(&path, &oblique_header());

        let info = VolumeLoader::load_info(&path).unwrap();
        assert_eq!(info.name, "ref");
        assert_eq!(info.dim, (2, 3, 4));
        assert_eq!(info.voxel_type, VoxelType::Float32);
        assert_eq!(info.geometry.spacing, [2.0, 2.0, 3.0]);
        assert_eq!(info.geometry.origin, [-10.0, 20.0, 5.0]);
        assert_eq!(
            info.geometry.direction,
            [1.0, -0.0, -0.0, -0.0, -1.0, -0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn volume_data_is_reordered_to_zyx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.nii.gz");
        write_test_volume(&path, &oblique_header());

        let volume = VolumeLoader::load_volume(&path).unwrap();
        assert_eq!(volume.dim(), (2, 3, 4));
        assert_eq!(volume.data()[[1, 2, 3]], 123.0);
    }

    #[test]
    fn nifti_repair_copies_reference_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.nii");
        let result = dir.path().join("res.nii");
        write_test_volume(&reference, &oblique_header());
        write_test_volume(&result, &NiftiHeader::default());

        let info = VolumeLoader::load_info(&reference).unwrap();
        VolumeLoader::repair_result(&reference, &info, &result).unwrap();

        let repaired = VolumeLoader::load_info(&result).unwrap();
        assert_eq!(repaired.geometry, info.geometry);
    }

    #[test]
    fn trailing_singleton_axes_are_dropped() {
        let data = ndarray::Array4::<f32>::zeros((4, 3, 2, 1)).into_dyn();
        let zyx = VolumeLoader::to_zyx(data).unwrap();
        assert_eq!(zyx.dim(), (2, 3, 4));
    }

    #[test]
    fn analyze_pair_without_magic_is_read_with_pixdim_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain.hdr");
        write_analyze_volume(&path, &oblique_header());

        let info = VolumeLoader::load_info(&path).unwrap();
        assert_eq!(info.name, "brain");
        assert_eq!(info.dim, (2, 3, 4));
        assert_eq!(info.voxel_type, VoxelType::Float32);
        assert_eq!(info.geometry.spacing, [2.0, 2.0, 3.0]);
        assert_eq!(info.geometry.origin, [0.0, 0.0, 0.0]);
        assert_eq!(
            info.geometry.direction,
            [-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0]
        );

        let volume = VolumeLoader::load_volume(dir.path().join("brain.img")).unwrap();
        assert_eq!(volume.data()[[1, 2, 3]], 123.0);
    }

    #[test]
    fn short_analyze_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.hdr");
        fs::write(&path, [0u8; 100]).unwrap();
        let err = VolumeLoader::load_info(&path).unwrap_err();
        assert!(matches!(err, VolumeLoaderError::TruncatedHeader(_)));
    }

    #[test]
    fn analyze_repair_copies_reference_header() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.hdr");
        let result = dir.path().join("res.hdr");
        let mut header = oblique_header();
        header.pixdim = [1.0, 0.5, 0.5, 4.0, 1.0, 1.0, 1.0, 1.0];
        write_analyze_volume(&reference, &header);
        write_analyze_volume(&result, &NiftiHeader::default());

        let info = VolumeLoader::load_info(&reference).unwrap();
        VolumeLoader::repair_result(&reference, &info, &result).unwrap();

        assert_eq!(fs::read(&result).unwrap(), fs::read(&reference).unwrap());
        let repaired = VolumeLoader::load_info(&result).unwrap();
        assert_eq!(repaired.geometry.spacing, [0.5, 0.5, 4.0]);
        assert_eq!(
            VolumeLoader::load_volume(&result).unwrap().data()[[1, 2, 3]],
            123.0
        );
    }

    #[test]
    fn export_copies_both_halves_of_an_analyze_pair() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("res.hdr");
        let to = dir.path().join("out.hdr");
        write_analyze_volume(&from, &oblique_header());

        VolumeLoader::export(&from, &to).unwrap();
        assert_eq!(
            fs::read(dir.path().join("out.img")).unwrap(),
            fs::read(dir.path().join("res.img")).unwrap()
        );
        assert_eq!(VolumeLoader::load_info(&to).unwrap().dim, (2, 3, 4));
    }

    #[test]
    fn export_re_encodes_when_compression_differs() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("res.nii.gz");
        let to = dir.path().join("out.nii");
        write_test_volume(&from, &oblique_header());

        VolumeLoader::export(&from, &to).unwrap();
        // An uncompressed file starts with sizeof_hdr rather than the gzip magic
        let bytes = fs::read(&to).unwrap();
        assert_ne!(&bytes[..2], &[0x1f, 0x8b]);
        let volume = VolumeLoader::load_volume(&to).unwrap();
        assert_eq!(volume.data()[[1, 2, 3]], 123.0);
        assert_eq!(
            VolumeLoader::load_info(&to).unwrap().geometry,
            VolumeLoader::load_info(&from).unwrap().geometry
        );
    }
}

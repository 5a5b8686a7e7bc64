//! Capabilities the registration needs from the host scene.
//!
//! Volumes and transforms are referred to by opaque ids. [`crate::scene::Scene`]
//! is the file-backed implementation used by the command-line front-end.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::displacement::DisplacementField;
use crate::transform_file::{LinearTransform, TransformFileError};
use crate::volume::{Volume, VolumeInfo};
use crate::volume_loader::VolumeLoaderError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TransformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown volume {0}")]
    UnknownVolume(VolumeId),

    #[error("Unknown transform {0}")]
    UnknownTransform(TransformId),

    #[error("Transform {0} does not hold a matrix")]
    NotLinear(TransformId),

    #[error("Volume {0} has no file on disk")]
    NoStorage(VolumeId),

    #[error("Volume loading error: {0}")]
    Loader(#[from] VolumeLoaderError),

    #[error("Transform file error: {0}")]
    TransformFile(#[from] TransformFileError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait VolumeStore {
    fn volume_info(&self, id: &VolumeId) -> Result<VolumeInfo, StoreError>;

    /// File the volume was loaded from
    fn file_path(&self, id: &VolumeId) -> Result<PathBuf, StoreError>;

    /// Voxel data, used for previews
    fn volume(&self, id: &VolumeId) -> Result<Volume, StoreError>;

    fn import_volume(&mut self, path: &Path, name: &str) -> Result<VolumeId, StoreError>;

    fn remove_volume(&mut self, id: &VolumeId) -> Result<(), StoreError>;

    fn rename_volume(&mut self, id: &VolumeId, name: &str) -> Result<(), StoreError>;
}

pub trait TransformStore {
    /// Matrix mapping the transform's parent frame into its own
    fn matrix_from_parent(&self, id: &TransformId) -> Result<LinearTransform, StoreError>;

    fn set_matrix_from_parent(
        &mut self,
        id: &TransformId,
        matrix: LinearTransform,
    ) -> Result<(), StoreError>;

    fn set_displacement(
        &mut self,
        id: &TransformId,
        field: DisplacementField,
    ) -> Result<(), StoreError>;

    /// Place `volume` under `transform`
    fn observe_transform(
        &mut self,
        volume: &VolumeId,
        transform: &TransformId,
    ) -> Result<(), StoreError>;
}

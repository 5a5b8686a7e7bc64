use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::displacement::DisplacementField;
use crate::enums::TransformDirection;
use crate::store::{StoreError, TransformId, TransformStore, VolumeId, VolumeStore};
use crate::transform_file::{LinearTransform, TransformFileError};
use crate::volume::{Volume, VolumeInfo};
use crate::volume_loader::VolumeLoader;

#[derive(Clone, Debug)]
struct VolumeNode {
    name: String,
    path: PathBuf,
    info: VolumeInfo,
    transform: Option<TransformId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransformNode {
    Linear(LinearTransform),
    Displacement(DisplacementField),
}

/// Volumes backed by files and transforms held in memory
#[derive(Default)]
pub struct Scene {
    volumes: BTreeMap<VolumeId, VolumeNode>,
    transforms: BTreeMap<TransformId, TransformNode>,
    next_volume: usize,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a volume header from disk, named after its file
    pub fn load_volume(&mut self, path: &Path) -> Result<VolumeId, StoreError> {
        let name = VolumeLoader::name_from_path(path);
        self.import_volume(path, &name)
    }

    /// Create an identity transform
    pub fn add_transform(&mut self, name: &str) -> TransformId {
        let id = TransformId(name.to_string());
        self.transforms
            .insert(id.clone(), TransformNode::Linear(LinearTransform::identity()));
        id
    }

    pub fn transform(&self, id: &TransformId) -> Option<&TransformNode> {
        self.transforms.get(id)
    }

    pub fn volume_name(&self, id: &VolumeId) -> Option<&str> {
        self.volumes.get(id).map(|node| node.name.as_str())
    }

    /// Transform a volume observes, if any
    pub fn parent_transform(&self, id: &VolumeId) -> Option<&TransformId> {
        self.volumes.get(id)?.transform.as_ref()
    }

    /// Read a linear transform written by blockmatching, converted the same
    /// way as a registration result
    pub fn load_transform(
        &mut self,
        path: &Path,
        name: &str,
        direction: TransformDirection,
    ) -> Result<TransformId, StoreError> {
        let matrix = LinearTransform::read(path)?.in_direction(direction)?;
        let id = self.add_transform(name);
        self.set_matrix_from_parent(&id, matrix)?;
        debug!("Loaded transform {} from {}", id, path.display());
        Ok(id)
    }

    /// Write a transform in blockmatching's file format, undoing the
    /// conversions applied when its result was loaded
    pub fn save_transform(
        &self,
        id: &TransformId,
        path: &Path,
        direction: TransformDirection,
    ) -> Result<(), StoreError> {
        match self.transform_node(id)? {
            TransformNode::Linear(matrix) => {
                matrix.in_direction(direction)?.write(path)?;
            }
            TransformNode::Displacement(field) => {
                let mut lps = field.clone();
                lps.flip_in_plane();
                lps.write(path).map_err(TransformFileError::from)?;
            }
        }
        debug!("Saved transform {} to {}", id, path.display());
        Ok(())
    }

    fn volume_node(&self, id: &VolumeId) -> Result<&VolumeNode, StoreError> {
        self.volumes
            .get(id)
            .ok_or_else(|| StoreError::UnknownVolume(id.clone()))
    }

    fn transform_node(&self, id: &TransformId) -> Result<&TransformNode, StoreError> {
        self.transforms
            .get(id)
            .ok_or_else(|| StoreError::UnknownTransform(id.clone()))
    }
}

impl VolumeStore for Scene {
    fn volume_info(&self, id: &VolumeId) -> Result<VolumeInfo, StoreError> {
        let node = self.volume_node(id)?;
        Ok(VolumeInfo {
            name: node.name.clone(),
            ..node.info.clone()
        })
    }

    fn file_path(&self, id: &VolumeId) -> Result<PathBuf, StoreError> {
        Ok(self.volume_node(id)?.path.clone())
    }

    fn volume(&self, id: &VolumeId) -> Result<Volume, StoreError> {
        Ok(VolumeLoader::load_volume(&self.volume_node(id)?.path)?)
    }

    fn import_volume(&mut self, path: &Path, name: &str) -> Result<VolumeId, StoreError> {
        let info = VolumeLoader::load_info(path)?;
        let id = VolumeId(format!("volume{}", self.next_volume));
        self.next_volume += 1;
        self.volumes.insert(
            id.clone(),
            VolumeNode {
                name: name.to_string(),
                path: path.to_path_buf(),
                info,
                transform: None,
            },
        );
        debug!("Imported {} as {} ({})", path.display(), id, name);
        Ok(id)
    }

    fn remove_volume(&mut self, id: &VolumeId) -> Result<(), StoreError> {
        self.volumes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::UnknownVolume(id.clone()))
    }

    fn rename_volume(&mut self, id: &VolumeId, name: &str) -> Result<(), StoreError> {
        let node = self
            .volumes
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownVolume(id.clone()))?;
        node.name = name.to_string();
        Ok(())
    }
}

impl TransformStore for Scene {
    fn matrix_from_parent(&self, id: &TransformId) -> Result<LinearTransform, StoreError> {
        match self.transform_node(id)? {
            TransformNode::Linear(matrix) => Ok(*matrix),
            TransformNode::Displacement(_) => Err(StoreError::NotLinear(id.clone())),
        }
    }

    fn set_matrix_from_parent(
        &mut self,
        id: &TransformId,
        matrix: LinearTransform,
    ) -> Result<(), StoreError> {
        self.transforms.insert(id.clone(), TransformNode::Linear(matrix));
        Ok(())
    }

    fn set_displacement(
        &mut self,
        id: &TransformId,
        field: DisplacementField,
    ) -> Result<(), StoreError> {
        self.transforms
            .insert(id.clone(), TransformNode::Displacement(field));
        Ok(())
    }

    fn observe_transform(
        &mut self,
        volume: &VolumeId,
        transform: &TransformId,
    ) -> Result<(), StoreError> {
        self.transform_node(transform)?;
        let node = self
            .volumes
            .get_mut(volume)
            .ok_or_else(|| StoreError::UnknownVolume(volume.clone()))?;
        node.transform = Some(transform.clone());
        Ok(())
    }
}

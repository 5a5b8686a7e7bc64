use thiserror::Error;

use crate::enums::{TransformDirection, TransformationType};
use crate::pyramid::PyramidLevels;
use crate::store::{TransformId, VolumeId};

pub const DEFAULT_PYRAMID_HIGHEST_LEVEL: u32 = 3;
pub const DEFAULT_PYRAMID_LOWEST_LEVEL: u32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Highest pyramid level {highest} is below lowest level {lowest}")]
    InvalidPyramidLevels { highest: u32, lowest: u32 },

    #[error("Pyramid level {level} exceeds the {available} levels of the reference volume")]
    PyramidLevelOutOfRange { level: u32, available: usize },

    #[error("Reference and floating volume are the same")]
    SameInputs,

    #[error("Neither a result volume nor a result transform was requested")]
    NoOutputs,

    #[error("{volume} intensity thresholds are inverted: low {low} > high {high}")]
    InvalidThresholds {
        volume: &'static str,
        low: i32,
        high: i32,
    },

    #[error("Images do not have the same orientation")]
    DirectionMismatch,

    #[error("Voxel type {0} is not supported by blockmatching")]
    UnsupportedDataType(String),
}

/// Voxels outside `[low, high]` are ignored when selecting blocks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntensityThresholds {
    pub low: i32,
    pub high: i32,
}

/// Everything needed to run one registration
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationConfig {
    pub reference: VolumeId,
    pub floating: VolumeId,
    pub initial_transform: Option<TransformId>,
    pub result_volume: Option<VolumeId>,
    pub result_transform: Option<TransformId>,
    pub transformation_type: TransformationType,
    pub pyramid_highest_level: u32,
    pub pyramid_lowest_level: u32,
    pub gaussian_filtering: bool,
    pub reference_thresholds: Option<IntensityThresholds>,
    pub floating_thresholds: Option<IntensityThresholds>,
    pub direction: TransformDirection,
    pub repair_geometry: bool,
}

impl RegistrationConfig {
    pub fn new(reference: VolumeId, floating: VolumeId) -> Self {
        Self {
            reference,
            floating,
            initial_transform: None,
            result_volume: None,
            result_transform: None,
            transformation_type: TransformationType::default(),
            pyramid_highest_level: DEFAULT_PYRAMID_HIGHEST_LEVEL,
            pyramid_lowest_level: DEFAULT_PYRAMID_LOWEST_LEVEL,
            gaussian_filtering: false,
            reference_thresholds: None,
            floating_thresholds: None,
            direction: TransformDirection::default(),
            repair_geometry: false,
        }
    }

    pub fn with_floating(mut self, floating: VolumeId) -> Self {
        self.floating = floating;
        self
    }

    pub fn with_transformation_type(mut self, transformation_type: TransformationType) -> Self {
        self.transformation_type = transformation_type;
        self
    }

    pub fn with_pyramid_levels(mut self, highest: u32, lowest: u32) -> Self {
        self.pyramid_highest_level = highest;
        self.pyramid_lowest_level = lowest;
        self
    }

    pub fn with_result_volume(mut self, id: VolumeId) -> Self {
        self.result_volume = Some(id);
        self
    }

    pub fn with_result_transform(mut self, id: TransformId) -> Self {
        self.result_transform = Some(id);
        self
    }

    pub fn with_initial_transform(mut self, id: TransformId) -> Self {
        self.initial_transform = Some(id);
        self
    }

    /// Whether enough is selected to start a registration
    pub fn is_ready(&self) -> bool {
        self.result_volume.is_some() || self.result_transform.is_some()
    }

    /// Checks that need nothing but the configuration and the pyramid of the
    /// reference volume
    pub fn validate(&self, reference_levels: &PyramidLevels) -> Result<(), ValidationError> {
        if self.reference == self.floating {
            return Err(ValidationError::SameInputs);
        }
        if !self.is_ready() {
            return Err(ValidationError::NoOutputs);
        }
        if self.pyramid_highest_level < self.pyramid_lowest_level {
            return Err(ValidationError::InvalidPyramidLevels {
                highest: self.pyramid_highest_level,
                lowest: self.pyramid_lowest_level,
            });
        }
        if self.pyramid_highest_level as usize > reference_levels.highest_level() {
            return Err(ValidationError::PyramidLevelOutOfRange {
                level: self.pyramid_highest_level,
                available: reference_levels.len(),
            });
        }

        let thresholds = [
            ("Reference", self.reference_thresholds),
            ("Floating", self.floating_thresholds),
        ];
        for (volume, threshold) in thresholds {
            match threshold {
                Some(IntensityThresholds { low, high }) if low > high => {
                    return Err(ValidationError::InvalidThresholds { volume, low, high });
                }
                _ => {}
            }
        }
        Ok(())
    }
}

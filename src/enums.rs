use std::{fmt, path::Path};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Orientation {
    #[default]
    Axial,
    Coronal,
    Sagittal,
}

/// Transformation model estimated by blockmatching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum TransformationType {
    #[default]
    Rigid,
    Similitude,
    Affine,
    Vectorfield,
}

impl TransformationType {
    pub const ALL: [TransformationType; 4] = [
        TransformationType::Rigid,
        TransformationType::Similitude,
        TransformationType::Affine,
        TransformationType::Vectorfield,
    ];

    /// Value passed to `-transformation-type`
    pub fn as_arg(&self) -> &'static str {
        match self {
            TransformationType::Rigid => "rigid",
            TransformationType::Similitude => "similitude",
            TransformationType::Affine => "affine",
            TransformationType::Vectorfield => "vectorfield",
        }
    }

    /// Whether the result transformation is a 4x4 matrix
    pub fn is_linear(&self) -> bool {
        !matches!(self, TransformationType::Vectorfield)
    }

    pub fn default_transform_name(&self) -> String {
        format!("Output {} transform", self.as_arg())
    }

    pub fn default_volume_name(&self) -> String {
        format!("Output {} volume", self.as_arg())
    }
}

impl fmt::Display for TransformationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Which way a result matrix maps once it is stored in the scene.
///
/// blockmatching writes the transformation that resamples the floating
/// image into the reference frame. Whether the scene wants that matrix or
/// its inverse depends on the tool release, so it is left to the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TransformDirection {
    /// Store the matrix exactly as the tool wrote it
    #[default]
    AsWritten,
    /// Invert the tool's matrix so it maps floating to reference
    FloatingToReference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeFormat {
    Nifti,
    Analyze,
}

impl VolumeFormat {
    /// Detect the format from a file name, `None` for anything else
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.contains(".nii") {
            Some(VolumeFormat::Nifti)
        } else if name.ends_with(".hdr") || name.ends_with(".img") {
            Some(VolumeFormat::Analyze)
        } else {
            None
        }
    }

    /// Extension used for a freshly generated result volume
    pub fn result_extension(&self) -> &'static str {
        match self {
            VolumeFormat::Nifti => ".nii.gz",
            VolumeFormat::Analyze => ".hdr",
        }
    }
}

//! One blockmatching run from configuration to loaded results.

use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{CommandBuilder, CommandError, Invocation};
use crate::config::{RegistrationConfig, ValidationError};
use crate::displacement::{DisplacementError, DisplacementField};
use crate::naming::{IdGenerator, TempNamer};
use crate::pyramid::{PyramidError, PyramidLevels};
use crate::runner::{RunError, ToolRunner, verify_outputs};
use crate::store::{StoreError, TransformId, TransformStore, VolumeId, VolumeStore};
use crate::transform_file::{LinearTransform, TransformFileError};
use crate::volume::VolumeInfo;
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid parameters: {0}")]
    Validation(#[from] ValidationError),

    #[error("Pyramid error: {0}")]
    Pyramid(#[from] PyramidError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Transform file error: {0}")]
    TransformFile(#[from] TransformFileError),

    #[error("Displacement field error: {0}")]
    Displacement(#[from] DisplacementError),

    #[error("Scene error: {0}")]
    Store(#[from] StoreError),

    #[error("Volume loading error: {0}")]
    Loader(#[from] VolumeLoaderError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// What a finished registration put into the scene
#[derive(Clone, Debug)]
pub struct RegistrationReport {
    pub command_line: String,
    pub elapsed: Duration,
    pub exit_code: Option<i32>,
    pub result_volume: Option<VolumeId>,
    pub result_transform: Option<TransformId>,
    /// Volume to show over the reference
    pub foreground: Option<VolumeId>,
    pub result_volume_path: PathBuf,
    pub result_transform_path: PathBuf,
}

pub struct Registration<R: ToolRunner, G: IdGenerator> {
    builder: CommandBuilder,
    runner: R,
    namer: TempNamer<G>,
}

impl<R: ToolRunner, G: IdGenerator> Registration<R, G> {
    pub fn new(program: impl Into<PathBuf>, runner: R, namer: TempNamer<G>) -> Self {
        Self {
            builder: CommandBuilder::new(program),
            runner,
            namer,
        }
    }

    /// Validate the inputs and build the command line without running it.
    ///
    /// The initial transformation, if any, is written to its temporary file.
    pub fn prepare<S>(
        &mut self,
        store: &S,
        config: &RegistrationConfig,
    ) -> Result<Invocation, RegistrationError>
    where
        S: VolumeStore + TransformStore,
    {
        let reference = store.volume_info(&config.reference)?;
        let floating = store.volume_info(&config.floating)?;

        let levels = PyramidLevels::from_shape(&reference.shape_xyz())?;
        config.validate(&levels)?;
        Self::validate_volumes(&reference, &floating)?;

        let invocation = self.builder.build(
            config,
            &store.file_path(&config.reference)?,
            &store.file_path(&config.floating)?,
            &mut self.namer,
        )?;

        if let (Some(transform), Some(path)) =
            (&config.initial_transform, &invocation.paths.initial_transform)
        {
            let matrix = store.matrix_from_parent(transform)?;
            matrix.in_direction(config.direction)?.write(path)?;
            debug!("Wrote initial transform {} to {}", transform, path.display());
        }

        Ok(invocation)
    }

    /// Run blockmatching and load what it produced into `store`
    pub async fn run<S>(
        &mut self,
        store: &mut S,
        config: &RegistrationConfig,
    ) -> Result<RegistrationReport, RegistrationError>
    where
        S: VolumeStore + TransformStore,
    {
        let invocation = self.prepare(store, config)?;
        let command_line = invocation.display();
        info!("{command_line}");

        let output = self.runner.run(&invocation).await?;
        verify_outputs(&invocation, &output)?;
        info!(
            "Registration completed in {} seconds.",
            output.elapsed.as_secs()
        );

        let mut report = RegistrationReport {
            command_line,
            elapsed: output.elapsed,
            exit_code: output.exit_code,
            result_volume: None,
            result_transform: None,
            foreground: None,
            result_volume_path: invocation.paths.result_volume.clone(),
            result_transform_path: invocation.paths.result_transform.clone(),
        };
        Self::load_results(store, config, &invocation, &mut report)?;
        Ok(report)
    }

    fn validate_volumes(
        reference: &VolumeInfo,
        floating: &VolumeInfo,
    ) -> Result<(), ValidationError> {
        for info in [reference, floating] {
            if !info.voxel_type.is_supported() {
                return Err(ValidationError::UnsupportedDataType(format!(
                    "{:?} ({})",
                    info.voxel_type, info.name
                )));
            }
        }

        if !reference.geometry.same_direction(&floating.geometry) {
            warn!("Images do not have the same orientation");
            warn!("Reference: {:?}", reference.geometry.direction);
            warn!("Floating: {:?}", floating.geometry.direction);
            return Err(ValidationError::DirectionMismatch);
        }
        Ok(())
    }

    fn load_results<S>(
        store: &mut S,
        config: &RegistrationConfig,
        invocation: &Invocation,
        report: &mut RegistrationReport,
    ) -> Result<(), RegistrationError>
    where
        S: VolumeStore + TransformStore,
    {
        let paths = &invocation.paths;
        let reference = store.volume_info(&config.reference)?;

        if config.repair_geometry {
            VolumeLoader::repair_result(&paths.reference, &reference, &paths.result_volume)?;
        }

        if let Some(previous) = &config.result_volume {
            let name = match store.volume_info(previous) {
                Ok(info) => {
                    store.remove_volume(previous)?;
                    info.name
                }
                Err(_) => config.transformation_type.default_volume_name(),
            };
            let id = store.import_volume(&paths.result_volume, &name)?;
            store.rename_volume(&id, &name)?;
            report.foreground = Some(id.clone());
            report.result_volume = Some(id);
        }

        if let Some(transform) = &config.result_transform {
            if config.transformation_type.is_linear() {
                let matrix =
                    LinearTransform::read(&paths.result_transform)?.in_direction(config.direction)?;
                store.set_matrix_from_parent(transform, matrix)?;
                store.observe_transform(&config.floating, transform)?;
                report.foreground = Some(config.floating.clone());
            } else {
                let mut field = DisplacementField::read(&paths.result_transform, reference.grid())?;
                field.flip_in_plane();
                store.set_displacement(transform, field)?;
            }
            report.result_transform = Some(transform.clone());
        }

        Ok(())
    }
}

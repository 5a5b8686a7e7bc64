//! # blockmatching library
//!
//! This crate drives the external `blockmatching` registration tool and
//! exchanges its results with a scene of volumes and transforms.
//!
//! The registration itself (block matching, pyramidal estimation, robust
//! fitting) happens inside the tool. This crate collects the parameters,
//! validates them, builds the command line, runs the tool and reads back:
//!  - Linear transformations (rigid, similitude, affine) from the tool's
//!    text `.trsf` format
//!  - Dense vectorfield transformations from its INRIMAGE binary format,
//!    converted from LPS to RAS
//!  - The resampled floating volume (NIfTI or Analyze)
//!
//! The scene is reached through the [`store::VolumeStore`] and
//! [`store::TransformStore`] traits, so codecs and validation can be used
//! without any host application. [`scene::Scene`] is a file-backed
//! implementation of both.
//!
//! The tool's exit code is not reliable across releases. A run counts as
//! successful when every output file it was asked for exists.
//!
//! # Examples
//!
//! ## Registering two NIfTI volumes
//!
//! ```no_run
//! # use blockmatching::{
//! #     config::RegistrationConfig, enums::{TransformDirection, TransformationType},
//! #     naming::TempNamer,
//! #     registration::Registration, runner::ProcessRunner, scene::Scene,
//! # };
//! # use std::path::Path;
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut scene = Scene::new();
//! let reference = scene.load_volume(Path::new("t1.nii.gz"))?;
//! let floating = scene.load_volume(Path::new("t2.nii.gz"))?;
//! let transform = scene.add_transform("Output affine transform");
//!
//! let config = RegistrationConfig::new(reference, floating)
//!     .with_transformation_type(TransformationType::Affine)
//!     .with_result_transform(transform.clone());
//!
//! let mut registration =
//!     Registration::new("blockmatching", ProcessRunner, TempNamer::in_system_temp()?);
//! registration.run(&mut scene, &config).await?;
//! scene.save_transform(&transform, Path::new("t2_to_t1.trsf"), TransformDirection::AsWritten)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Listing the pyramid levels of a volume
//!
//! ```
//! # use blockmatching::pyramid::PyramidLevels;
//! let levels = PyramidLevels::from_shape(&[256, 256, 160]).unwrap();
//! assert_eq!(levels.level(1), Some(&[128, 128, 128][..]));
//! assert_eq!(levels.highest_level(), 3);
//! ```

pub mod command;
pub mod config;
pub mod coordinates;
pub mod displacement;
pub mod enums;
pub mod naming;
pub mod pyramid;
pub mod registration;
pub mod runner;
pub mod scene;
pub mod store;
pub mod transform_file;
pub mod volume;
pub mod volume_loader;

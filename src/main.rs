use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use blockmatching::{
    config::{
        DEFAULT_PYRAMID_HIGHEST_LEVEL, DEFAULT_PYRAMID_LOWEST_LEVEL, IntensityThresholds,
        RegistrationConfig,
    },
    enums::{Orientation, TransformDirection, TransformationType},
    naming::{RandomIds, TempNamer},
    pyramid::PyramidLevels,
    registration::{Registration, RegistrationReport},
    runner::{ProcessRunner, which},
    scene::Scene,
    store::{VolumeId, VolumeStore},
    volume::Volume,
    volume_loader::VolumeLoader,
};

#[derive(Parser)]
#[command(name = "blockmatching-run")]
#[command(about = "Register volumes with the blockmatching tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a floating volume onto a reference volume
    Register(RegisterArgs),

    /// Print the pyramid levels available for a volume
    Levels {
        /// NIfTI or Analyze volume
        volume: PathBuf,
    },
}

#[derive(Args)]
struct RegisterArgs {
    /// Fixed volume
    #[arg(long)]
    reference: PathBuf,

    /// Moving volume
    #[arg(long)]
    floating: PathBuf,

    #[arg(long, value_enum, default_value_t = TransformationType::Rigid)]
    transformation: TransformationType,

    #[arg(long, default_value_t = DEFAULT_PYRAMID_HIGHEST_LEVEL)]
    pyramid_highest_level: u32,

    #[arg(long, default_value_t = DEFAULT_PYRAMID_LOWEST_LEVEL)]
    pyramid_lowest_level: u32,

    /// Smooth each pyramid level with a Gaussian filter
    #[arg(long)]
    gaussian_filtering: bool,

    /// Reference intensity window used to select blocks
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"], allow_negative_numbers = true)]
    reference_thresholds: Option<Vec<i32>>,

    /// Floating intensity window used to select blocks
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"], allow_negative_numbers = true)]
    floating_thresholds: Option<Vec<i32>>,

    /// Linear `.trsf` file the registration starts from, in the tool's
    /// convention
    #[arg(long)]
    initial_transform: Option<PathBuf>,

    /// Where to copy the resampled floating volume
    #[arg(long)]
    output_volume: Option<PathBuf>,

    /// Where to save the estimated transformation, in the tool's convention
    #[arg(long)]
    output_transform: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = TransformDirection::AsWritten)]
    direction: TransformDirection,

    /// Copy the reference geometry into the result volume
    #[arg(long)]
    repair_geometry: bool,

    /// blockmatching executable, defaults to ~/bin/blockmatching or PATH
    #[arg(long, env = "BLOCKMATCHING_PATH")]
    blockmatching: Option<PathBuf>,

    /// Directory for temporary files
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Only print the command line
    #[arg(long)]
    dry_run: bool,

    /// Write a reference/result overlay PNG
    #[arg(long)]
    preview: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Orientation::Axial)]
    orientation: Orientation,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register(args) => register(args).await?,
        Commands::Levels { volume } => {
            let info = VolumeLoader::load_info(&volume)?;
            let levels = PyramidLevels::from_shape(&info.shape_xyz())?;
            print!("{levels}");
        }
    }

    Ok(())
}

async fn register(args: RegisterArgs) -> Result<()> {
    let mut scene = Scene::new();
    let reference = scene.load_volume(&args.reference)?;
    let floating = scene.load_volume(&args.floating)?;

    let mut config = RegistrationConfig::new(reference.clone(), floating)
        .with_transformation_type(args.transformation)
        .with_pyramid_levels(args.pyramid_highest_level, args.pyramid_lowest_level);
    config.gaussian_filtering = args.gaussian_filtering;
    config.reference_thresholds = args.reference_thresholds.as_deref().map(thresholds);
    config.floating_thresholds = args.floating_thresholds.as_deref().map(thresholds);
    config.direction = args.direction;
    config.repair_geometry = args.repair_geometry;

    if let Some(path) = &args.initial_transform {
        let id = scene
            .load_transform(path, "Initial transform", args.direction)
            .with_context(|| format!("reading initial transform {}", path.display()))?;
        config = config.with_initial_transform(id);
    }
    if args.output_transform.is_some() {
        let id = scene.add_transform(&args.transformation.default_transform_name());
        config = config.with_result_transform(id);
    }
    if args.output_volume.is_some() {
        config = config.with_result_volume(VolumeId(args.transformation.default_volume_name()));
    }

    let program = executable(args.blockmatching.as_deref());
    let namer = match &args.temp_dir {
        Some(dir) => TempNamer::new(dir, RandomIds)?,
        None => TempNamer::in_system_temp()?,
    };
    let mut registration = Registration::new(program, ProcessRunner, namer);

    if args.dry_run {
        let invocation = registration.prepare(&scene, &config)?;
        println!("{}", invocation.display());
        return Ok(());
    }

    let report = registration.run(&mut scene, &config).await?;
    export(&scene, &config, &report, &args)?;

    if let Some(path) = &args.preview {
        write_preview(&scene, &reference, &report, args.orientation, path)?;
    }
    Ok(())
}

fn thresholds(values: &[i32]) -> IntensityThresholds {
    IntensityThresholds {
        low: values[0],
        high: values[1],
    }
}

fn executable(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let home_bin = std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("bin").join("blockmatching"));
    home_bin
        .and_then(|path| which(path))
        .or_else(|| which("blockmatching"))
        .unwrap_or_else(|| PathBuf::from("blockmatching"))
}

fn export(
    scene: &Scene,
    config: &RegistrationConfig,
    report: &RegistrationReport,
    args: &RegisterArgs,
) -> Result<()> {
    if let Some(output) = &args.output_volume {
        VolumeLoader::export(&report.result_volume_path, output)
            .with_context(|| format!("writing {}", output.display()))?;
        info!("Result volume written to {}", output.display());
    }
    if let (Some(output), Some(transform)) = (&args.output_transform, &config.result_transform) {
        scene.save_transform(transform, output, config.direction)?;
        info!("Result transform written to {}", output.display());
    }
    Ok(())
}

fn write_preview(
    scene: &Scene,
    reference: &VolumeId,
    report: &RegistrationReport,
    orientation: Orientation,
    path: &Path,
) -> Result<()> {
    let Some(result) = &report.result_volume else {
        warn!("No result volume to preview");
        return Ok(());
    };
    let background: Volume = scene.volume(reference)?;
    let foreground = scene.volume(result)?;
    let index = background.center_index(&orientation);
    let Some(image) = Volume::overlay_image(&background, &foreground, index, orientation, 0.5)
    else {
        bail!("result volume does not share the reference grid");
    };
    image.save(path)?;
    info!("Preview written to {}", path.display());
    Ok(())
}

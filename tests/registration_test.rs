use std::path::{Path, PathBuf};
use std::time::Duration;

use blockmatching::command::Invocation;
use blockmatching::config::{RegistrationConfig, ValidationError};
use blockmatching::displacement::{DisplacementField, GridDims};
use blockmatching::enums::{TransformDirection, TransformationType};
use blockmatching::naming::{SequentialIds, TempNamer};
use blockmatching::registration::{Registration, RegistrationError};
use blockmatching::runner::{RunError, ToolOutput, ToolRunner};
use blockmatching::scene::{Scene, TransformNode};
use blockmatching::store::{TransformStore, VolumeId, VolumeStore};
use blockmatching::transform_file::LinearTransform;
use ndarray::{Array3, s};
use blockmatching::volume_loader::VolumeLoader;
use nifti::{NiftiHeader, writer::WriterOptions};

/// Stands in for blockmatching: writes the declared outputs itself
struct FakeTool {
    exit_code: i32,
    transform: Option<Vec<u8>>,
    write_volume: bool,
}

impl FakeTool {
    fn linear(matrix: &LinearTransform) -> Self {
        Self {
            exit_code: 0,
            transform: Some(matrix.to_trsf_string().into_bytes()),
            write_volume: true,
        }
    }
}

impl ToolRunner for FakeTool {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError> {
        if self.write_volume {
            VolumeLoader::export(&invocation.paths.floating, &invocation.paths.result_volume)
                .unwrap();
        }
        if let Some(bytes) = &self.transform {
            std::fs::write(&invocation.paths.result_transform, bytes).unwrap();
        }
        Ok(ToolOutput {
            exit_code: Some(self.exit_code),
            stdout: String::new(),
            stderr: "blockmatching: failed".into(),
            elapsed: Duration::from_millis(10),
        })
    }
}

fn write_volume(path: &Path, dim_xyz: (usize, usize, usize), flip_x: bool) {
    let mut header = NiftiHeader::default();
    header.sform_code = 1;
    header.srow_x = [if flip_x { 1.0 } else { -1.0 }, 0.0, 0.0, 0.0];
    header.srow_y = [0.0, -1.0, 0.0, 0.0];
    header.srow_z = [0.0, 0.0, 1.0, 0.0];
    let data = Array3::from_shape_fn(dim_xyz, |(x, y, z)| (x + y + z) as f32);
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&data)
        .unwrap();
}

/// Writes a `.hdr`/`.img` pair without the NIfTI magic, as Analyze 7.5 tools do
fn write_analyze_volume(hdr: &Path, dim_xyz: (usize, usize, usize), spacing: [f32; 3]) {
    let mut header = NiftiHeader::default();
    header.pixdim = [1.0, spacing[0], spacing[1], spacing[2], 1.0, 1.0, 1.0, 1.0];
    let data = Array3::from_shape_fn(dim_xyz, |(x, y, z)| (x * y + z) as f32);
    WriterOptions::new(hdr)
        .reference_header(&header)
        .write_nifti(&data)
        .unwrap();

    let mut bytes = std::fs::read(hdr).unwrap();
    bytes[344..348].fill(0);
    std::fs::write(hdr, bytes).unwrap();
}

struct Fixture {
    dir: tempfile::TempDir,
    scene: Scene,
    reference: VolumeId,
    floating: VolumeId,
}

fn fixture(dim_xyz: (usize, usize, usize)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let reference_path = dir.path().join("reference.nii");
    let floating_path = dir.path().join("floating.nii");
    write_volume(&reference_path, dim_xyz, false);
    write_volume(&floating_path, dim_xyz, false);

    let mut scene = Scene::new();
    let reference = scene.load_volume(&reference_path).unwrap();
    let floating = scene.load_volume(&floating_path).unwrap();
    Fixture {
        dir,
        scene,
        reference,
        floating,
    }
}

/// The fixtures are small, so only pyramid levels 0 and 1 exist
fn base_config(f: &Fixture) -> RegistrationConfig {
    RegistrationConfig::new(f.reference.clone(), f.floating.clone()).with_pyramid_levels(1, 0)
}

fn registration<R: ToolRunner>(dir: &Path, tool: R) -> Registration<R, SequentialIds> {
    let namer = TempNamer::new(dir.join("tmp"), SequentialIds::new("bm")).unwrap();
    Registration::new(PathBuf::from("blockmatching"), tool, namer)
}

fn translation(x: f64) -> LinearTransform {
    let mut rows = *LinearTransform::identity().rows();
    rows[0][3] = x;
    LinearTransform::new(rows)
}

#[tokio::test]
async fn linear_result_is_stored_and_observed_by_floating() {
    let mut f = fixture((64, 64, 40));
    let transform = f.scene.add_transform("Output affine transform");
    let config = base_config(&f)
        .with_transformation_type(TransformationType::Affine)
        .with_result_transform(transform.clone());

    let mut registration = registration(f.dir.path(), FakeTool::linear(&translation(4.5)));
    let report = registration.run(&mut f.scene, &config).await.unwrap();

    assert_eq!(report.result_transform, Some(transform.clone()));
    assert_eq!(report.foreground, Some(f.floating.clone()));
    assert_eq!(f.scene.parent_transform(&f.floating), Some(&transform));
    assert_eq!(f.scene.matrix_from_parent(&transform).unwrap().get(0, 3), 4.5);
    assert!(report.command_line.contains("-transformation-type affine"));
}

#[tokio::test]
async fn direction_setting_inverts_the_tool_matrix() {
    let mut f = fixture((64, 64, 40));
    let transform = f.scene.add_transform("t");
    let mut config = base_config(&f).with_result_transform(transform.clone());
    config.direction = TransformDirection::FloatingToReference;

    let mut registration = registration(f.dir.path(), FakeTool::linear(&translation(4.5)));
    registration.run(&mut f.scene, &config).await.unwrap();

    let stored = f.scene.matrix_from_parent(&transform).unwrap();
    assert!((stored.get(0, 3) + 4.5).abs() < 1e-9);
}

#[tokio::test]
async fn result_volume_replaces_previous_node_and_keeps_its_name() {
    let mut f = fixture((64, 64, 40));
    let previous = f
        .scene
        .import_volume(&f.dir.path().join("floating.nii"), "My result")
        .unwrap();
    let config = base_config(&f).with_result_volume(previous.clone());

    let mut registration = registration(f.dir.path(), FakeTool::linear(&translation(0.0)));
    let report = registration.run(&mut f.scene, &config).await.unwrap();

    let result = report.result_volume.unwrap();
    assert_ne!(result, previous);
    assert!(f.scene.volume_info(&previous).is_err());
    assert_eq!(f.scene.volume_name(&result), Some("My result"));
    assert_eq!(report.foreground, Some(result));
    assert!(report.result_volume_path.starts_with(f.dir.path().join("tmp")));
}

#[tokio::test]
async fn vectorfield_result_is_converted_to_ras() {
    let mut f = fixture((40, 36, 34));
    let dims = GridDims::new(40, 36, 34);
    let mut tool_field = DisplacementField::zeros(dims);
    tool_field.data_mut().slice_mut(s![.., .., .., 0]).fill(1.5);
    tool_field.data_mut().slice_mut(s![.., .., .., 1]).fill(-2.0);
    tool_field.data_mut().slice_mut(s![.., .., .., 2]).fill(3.0);

    let transform = f.scene.add_transform("Output vectorfield transform");
    let config = base_config(&f)
        .with_transformation_type(TransformationType::Vectorfield)
        .with_result_transform(transform.clone());

    let tool = FakeTool {
        exit_code: 0,
        transform: Some(tool_field.encode()),
        write_volume: true,
    };
    let mut registration = registration(f.dir.path(), tool);
    let report = registration.run(&mut f.scene, &config).await.unwrap();

    assert_eq!(report.foreground, None);
    match f.scene.transform(&transform) {
        Some(TransformNode::Displacement(field)) => {
            assert_eq!(field.data().dim(), (34, 36, 40, 3));
            assert_eq!(field.data()[[5, 6, 7, 0]], -1.5);
            assert_eq!(field.data()[[5, 6, 7, 1]], 2.0);
            assert_eq!(field.data()[[5, 6, 7, 2]], 3.0);
        }
        other => panic!("expected a displacement field, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_outputs_surface_tool_stderr() {
    let mut f = fixture((64, 64, 40));
    let transform = f.scene.add_transform("t");
    let config = base_config(&f).with_result_transform(transform.clone());

    let tool = FakeTool {
        exit_code: 1,
        transform: None,
        write_volume: true,
    };
    let mut registration = registration(f.dir.path(), tool);
    let err = registration.run(&mut f.scene, &config).await.unwrap_err();

    match err {
        RegistrationError::Run(RunError::Failed {
            exit_code, stderr, ..
        }) => {
            assert_eq!(exit_code, Some(1));
            assert_eq!(stderr, "blockmatching: failed");
        }
        other => panic!("unexpected {other:?}"),
    }
    // Nothing was loaded
    assert_eq!(
        f.scene.matrix_from_parent(&transform).unwrap(),
        LinearTransform::identity()
    );
}

#[tokio::test]
async fn inverted_pyramid_is_rejected_before_invocation() {
    let mut f = fixture((64, 64, 40));
    let config = base_config(&f)
        .with_result_volume(VolumeId("result".into()))
        .with_pyramid_levels(0, 2);

    let tool = FakeTool {
        exit_code: 0,
        transform: None,
        write_volume: false,
    };
    let mut registration = registration(f.dir.path(), tool);
    let err = registration.run(&mut f.scene, &config).await.unwrap_err();
    assert!(matches!(
        err,
        RegistrationError::Validation(ValidationError::InvalidPyramidLevels { .. })
    ));
    assert!(!f.dir.path().join("tmp/bm0000.nii.gz").exists());
}

#[test]
fn differing_orientations_are_rejected() {
    let mut f = fixture((64, 64, 40));
    let flipped_path = f.dir.path().join("flipped.nii");
    write_volume(&flipped_path, (64, 64, 40), true);
    let flipped = f.scene.load_volume(&flipped_path).unwrap();

    let config = base_config(&f)
        .with_floating(flipped)
        .with_result_volume(VolumeId("result".into()));
    let mut registration = registration(f.dir.path(), FakeTool::linear(&translation(0.0)));
    let err = registration.prepare(&f.scene, &config).unwrap_err();
    assert!(matches!(
        err,
        RegistrationError::Validation(ValidationError::DirectionMismatch)
    ));
}

#[test]
fn initial_transform_is_written_for_the_tool() {
    let mut f = fixture((64, 64, 40));
    let initial = f.scene.add_transform("Initial transform");
    f.scene
        .set_matrix_from_parent(&initial, translation(-7.0))
        .unwrap();
    let config = base_config(&f)
        .with_result_volume(VolumeId("result".into()))
        .with_initial_transform(initial);

    let mut registration = registration(f.dir.path(), FakeTool::linear(&translation(0.0)));
    let invocation = registration.prepare(&f.scene, &config).unwrap();

    let path = invocation.paths.initial_transform.clone().unwrap();
    assert_eq!(LinearTransform::read(&path).unwrap().get(0, 3), -7.0);
    let position = invocation
        .args
        .iter()
        .position(|a| a == "-initial-transformation")
        .unwrap();
    assert_eq!(invocation.args[position + 1], path.display().to_string());
}

#[tokio::test]
async fn analyze_inputs_produce_repaired_analyze_result() {
    let dir = tempfile::tempdir().unwrap();
    let reference_path = dir.path().join("reference.hdr");
    let floating_path = dir.path().join("floating.hdr");
    write_analyze_volume(&reference_path, (64, 48, 40), [0.9, 0.9, 2.5]);
    write_analyze_volume(&floating_path, (64, 48, 40), [1.0, 1.0, 1.0]);

    let mut scene = Scene::new();
    let reference = scene.load_volume(&reference_path).unwrap();
    let floating = scene.load_volume(&floating_path).unwrap();
    let mut config = RegistrationConfig::new(reference.clone(), floating)
        .with_pyramid_levels(1, 0)
        .with_result_volume(VolumeId("result".into()));
    config.repair_geometry = true;

    let mut registration = registration(dir.path(), FakeTool::linear(&translation(0.0)));
    let report = registration.run(&mut scene, &config).await.unwrap();

    let position = report.command_line.find("-result ").unwrap();
    assert!(report.command_line[position..].starts_with(&format!(
        "-result {}",
        report.result_volume_path.display()
    )));
    assert!(report.result_volume_path.to_string_lossy().ends_with(".hdr"));
    assert!(report.result_volume_path.with_extension("img").exists());

    let result = report.result_volume.unwrap();
    let info = scene.volume_info(&result).unwrap();
    assert_eq!(info.dim, (40, 48, 64));
    assert_eq!(
        info.geometry.spacing,
        scene.volume_info(&reference).unwrap().geometry.spacing
    );

    let exported = dir.path().join("exported.nii");
    VolumeLoader::export(&report.result_volume_path, &exported).unwrap();
    let volume = VolumeLoader::load_volume(&exported).unwrap();
    assert_eq!(volume.data()[[3, 2, 5]], 13.0);
}

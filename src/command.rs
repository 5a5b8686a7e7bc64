use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{IntensityThresholds, RegistrationConfig};
use crate::enums::VolumeFormat;
use crate::naming::{IdGenerator, TempNamer};

const TRANSFORM_EXTENSION: &str = ".trsf";
const LOG_EXTENSION: &str = ".log";
const COMMAND_EXTENSION: &str = ".cmd";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Reference volume {} is neither NIfTI nor Analyze", .0.display())]
    UnsupportedFormat(PathBuf),
}

/// Files involved in one blockmatching run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationPaths {
    pub reference: PathBuf,
    pub floating: PathBuf,
    pub result_volume: PathBuf,
    pub result_transform: PathBuf,
    pub initial_transform: Option<PathBuf>,
    pub log: PathBuf,
    pub command_line: PathBuf,
}

impl InvocationPaths {
    /// Files the tool must have written for the run to count as successful
    pub fn declared_outputs(&self) -> [&Path; 2] {
        [&self.result_volume, &self.result_transform]
    }
}

/// Program and arguments of a single run; built fresh every time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub paths: InvocationPaths,
}

impl Invocation {
    /// Space separated command line, for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct CommandBuilder {
    program: PathBuf,
}

impl CommandBuilder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn build<G: IdGenerator>(
        &self,
        config: &RegistrationConfig,
        reference: &Path,
        floating: &Path,
        namer: &mut TempNamer<G>,
    ) -> Result<Invocation, CommandError> {
        let format = VolumeFormat::from_path(reference)
            .ok_or_else(|| CommandError::UnsupportedFormat(reference.to_path_buf()))?;

        let paths = InvocationPaths {
            reference: reference.to_path_buf(),
            floating: floating.to_path_buf(),
            result_volume: namer.path(format.result_extension()),
            result_transform: namer.path(TRANSFORM_EXTENSION),
            initial_transform: config
                .initial_transform
                .as_ref()
                .map(|_| namer.path(TRANSFORM_EXTENSION)),
            log: namer.path(LOG_EXTENSION),
            command_line: namer.path(COMMAND_EXTENSION),
        };

        let mut args = ArgList::default();
        args.flag_value("-reference", paths.reference.display());
        args.flag_value("-floating", paths.floating.display());
        args.flag_value("-result", paths.result_volume.display());
        args.flag_value("-result-transformation", paths.result_transform.display());
        args.flag_value("-pyramid-highest-level", config.pyramid_highest_level);
        args.flag_value("-pyramid-lowest-level", config.pyramid_lowest_level);
        args.flag_value("-transformation-type", config.transformation_type);

        if config.gaussian_filtering {
            args.flag("-pyramid-gaussian-filtering");
        }
        if let Some(initial) = &paths.initial_transform {
            args.flag_value("-initial-transformation", initial.display());
            args.flag("-composition-with-initial");
        }
        if let Some(thresholds) = config.reference_thresholds {
            args.thresholds("reference", thresholds);
        }
        if let Some(thresholds) = config.floating_thresholds {
            args.thresholds("floating", thresholds);
        }

        args.flag_value("-command-line", paths.command_line.display());
        args.flag_value("-logfile", paths.log.display());

        Ok(Invocation {
            program: self.program.clone(),
            args: args.0,
            paths,
        })
    }
}

#[derive(Default)]
struct ArgList(Vec<String>);

impl ArgList {
    fn flag(&mut self, flag: &str) {
        self.0.push(flag.to_string());
    }

    fn flag_value(&mut self, flag: &str, value: impl ToString) {
        self.0.push(flag.to_string());
        self.0.push(value.to_string());
    }

    fn thresholds(&mut self, volume: &str, thresholds: IntensityThresholds) {
        self.flag_value(&format!("-{volume}-low-threshold"), thresholds.low);
        self.flag_value(&format!("-{volume}-high-threshold"), thresholds.high);
    }
}

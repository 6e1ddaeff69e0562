use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use log::LevelFilter;

use crate::enums::TiltMode;
use crate::error::{Result, VolumeError};
use crate::pipeline::PipelineOptions;
use crate::volume_loader::VolumeLoader;
use crate::writer::SeriesSettings;

/// Command-line arguments for dicom-resample
#[derive(Parser, Debug)]
#[command(name = "dicom-resample")]
#[command(about = "Resample a DICOM series to fewer, thicker slices")]
#[command(version)]
pub struct Cli {
    /// Directory holding the input series (.dcm files, not searched recursively)
    #[arg(short, long, value_name = "DIRECTORY", default_value = ".")]
    pub input_directory: PathBuf,

    /// Text file listing one input file per line, used instead of the directory
    #[arg(short = 'l', long, value_name = "FILE")]
    pub filelist: Option<PathBuf>,

    /// Directory the new series is written to, the input directory when
    /// omitted
    #[arg(short, long, value_name = "DIRECTORY")]
    pub output_directory: Option<PathBuf>,

    /// Number of slices of the output series
    #[arg(short = 'n', long)]
    pub number_of_slices: usize,

    /// Series number of the output series
    #[arg(long)]
    pub series_number: Option<i32>,

    /// Added to the scaled input series number
    #[arg(long, default_value_t = 1)]
    pub series_number_offset: i32,

    /// Scale of the input series number (default 100 below 100, else 10)
    #[arg(long)]
    pub series_number_multiplier: Option<i32>,

    /// Series description of the output series
    #[arg(long)]
    pub series_description: Option<String>,

    /// Prepended to the input series description
    #[arg(long)]
    pub series_description_prefix: Option<String>,

    /// Appended to the input series description
    #[arg(long)]
    pub series_description_suffix: Option<String>,

    /// Keep stored values instead of applying Rescale Slope/Intercept
    #[arg(long)]
    pub no_rescale: bool,

    /// The series holds label masks; merged slices keep the maximum
    #[arg(long)]
    pub mask: bool,

    /// What to do with slices drifting from a tilted gantry
    #[arg(long, default_value = "check")]
    pub tilt: TiltArg,

    /// Write a PNG of the middle axial slice of the output volume
    #[arg(long, value_name = "FILE")]
    pub preview: Option<PathBuf>,

    /// Verbosity from 0 (errors only) to 4 (trace)
    #[arg(short, long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=4))]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TiltArg {
    /// Detect and report only
    Check,
    /// Shift drifting slices back in line
    Correct,
}

impl From<TiltArg> for TiltMode {
    fn from(arg: TiltArg) -> Self {
        match arg {
            TiltArg::Check => TiltMode::CheckOnly,
            TiltArg::Correct => TiltMode::ApplyCorrection,
        }
    }
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn output_directory(&self) -> &Path {
        self.output_directory
            .as_deref()
            .unwrap_or(self.input_directory.as_path())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            apply_rescale: !self.no_rescale,
            is_mask: self.mask,
            tilt_mode: self.tilt.into(),
            ..PipelineOptions::default()
        }
    }

    pub fn series_settings(&self) -> SeriesSettings {
        SeriesSettings {
            series_number: self.series_number,
            series_number_offset: self.series_number_offset,
            series_number_multiplier: self.series_number_multiplier,
            series_description: self.series_description.clone(),
            description_prefix: self.series_description_prefix.clone(),
            description_suffix: self.series_description_suffix.clone(),
        }
    }

    /// The input files, from the file list when given, else the directory
    ///
    /// # Errors
    ///
    /// Fails when the list or directory cannot be read or names no file.
    pub fn input_paths(&self) -> Result<Vec<PathBuf>> {
        match &self.filelist {
            Some(list) => read_filelist(list),
            None => VolumeLoader::list_directory(&self.input_directory),
        }
    }
}

/// Non-empty lines of `list`, trimmed
fn read_filelist(list: &Path) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = fs::read_to_string(list)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();
    if paths.is_empty() {
        return Err(VolumeError::InputEmpty);
    }
    Ok(paths)
}

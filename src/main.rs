use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use dicom_stack::{
    cli::Cli,
    enums::{Interpolation, Orientation},
    error::VolumeError,
    pipeline::{Pipeline, resample_to_slice_count},
    screening::{Screening, screen},
    tag_store::DicomFileStore,
    writer::SeriesWriter,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            exit_code(&e)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, VolumeError> {
    let paths = cli.input_paths()?;
    info!("Found {} input file(s)", paths.len());

    match screen(&paths, &DicomFileStore, cli.number_of_slices)? {
        Screening::Proceed => {}
        Screening::NotVolumetric => {
            warn!("Input is not a volumetric series, nothing written");
            return Ok(ExitCode::from(2));
        }
        Screening::WithinThreshold { slices } => {
            info!(
                "Series has {slices} slice(s), not more than the requested {}",
                cli.number_of_slices
            );
            return Ok(ExitCode::from(3));
        }
    }

    let output = Pipeline::new(cli.pipeline_options()).run(&paths, &DicomFileStore)?;
    for skipped in &output.report.skipped {
        warn!("Skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    let input_slices = output.volume.depth();
    let volume = resample_to_slice_count(
        output.volume,
        cli.number_of_slices,
        output.report.tilt.correction_needed,
    );

    if let Some(preview) = &cli.preview {
        match volume.preview_image(volume.depth() / 2, Orientation::Axial, Interpolation::Linear) {
            Some(image) => {
                if let Err(e) = image.save(preview) {
                    warn!("Could not save preview {}: {e}", preview.display());
                }
            }
            None => warn!("Volume is empty, no preview written"),
        }
    }

    let writer = SeriesWriter::new(
        &output.template,
        &cli.series_settings(),
        input_slices,
        volume.depth(),
    );
    info!(
        "Writing series {} ({})",
        writer.series_number(),
        writer.series_description()
    );
    writer.write(&volume, cli.output_directory())?;
    Ok(ExitCode::SUCCESS)
}

fn exit_code(e: &VolumeError) -> ExitCode {
    match e {
        VolumeError::InconsistentGeometry { .. }
        | VolumeError::VolumeAllocationError { .. }
        | VolumeError::UnsupportedSamples { .. } => ExitCode::from(2),
        VolumeError::Write { .. } => ExitCode::from(4),
        _ => ExitCode::from(1),
    }
}

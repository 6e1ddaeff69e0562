//! One invocation from item paths to a normalised volume.

use std::path::Path;

use log::{info, warn};
use nalgebra::Vector3;

use crate::catalog::SkippedItem;
use crate::enums::{Interpolation, SampleKind, TiltMode};
use crate::error::Result;
use crate::gantry::{TiltReport, correct_gantry_tilt};
use crate::interpolator::{gaussian_smooth, resample};
use crate::tag_store::{ItemHeader, TagStore};
use crate::thickness::{
    DEFAULT_TOLERANCE, ThicknessMergeOutcome, merge_half_and_full_thickness, merge_slices,
};
use crate::volume::{Pose, Volume, VolumeGeometry};
use crate::volume_loader::{LoadedVolume, MIN_SAMPLE_VALUE, VolumeLoader};

/// Requested ratios at or below this are smoothed before resampling
const SMOOTHING_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// Map stored values through Rescale Slope/Intercept
    pub apply_rescale: bool,
    /// The volume holds labels; merged slices take the maximum
    pub is_mask: bool,
    pub tilt_mode: TiltMode,
    pub merge_half_thickness: bool,
    /// Thicknesses within this many millimetres count as equal
    pub thickness_tolerance: f64,
    /// Average every `k` consecutive slices
    pub merge_factor: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            apply_rescale: true,
            is_mask: false,
            tilt_mode: TiltMode::CheckOnly,
            merge_half_thickness: true,
            thickness_tolerance: DEFAULT_TOLERANCE,
            merge_factor: None,
        }
    }
}

/// What each stage decided
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub skipped: Vec<SkippedItem>,
    pub reversed: bool,
    pub axial: bool,
    pub tilt: TiltReport,
    /// `None` when the merge was disabled or skipped because of tilt
    pub thickness: Option<ThicknessMergeOutcome>,
    pub factor_merged: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub volume: Volume,
    /// Header of the first accepted item
    pub template: ItemHeader,
    pub report: PipelineReport,
}

pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Load the items at `paths` and run every normalisation stage
    ///
    /// # Errors
    ///
    /// Fails when the items cannot be assembled into one volume; the
    /// normalisation stages themselves never fail.
    pub fn run<P>(&self, paths: &[P], store: &impl TagStore) -> Result<PipelineOutput>
    where
        P: AsRef<Path> + Sync,
    {
        let loaded = VolumeLoader::load(paths, store, self.options.apply_rescale)?;
        Ok(self.process(loaded))
    }

    /// Run tilt detection and slice merging on an assembled volume
    pub fn process(&self, loaded: LoadedVolume) -> PipelineOutput {
        let LoadedVolume {
            mut volume,
            template,
            skipped,
            reversed,
        } = loaded;
        let options = &self.options;

        let axial = volume.is_axial_or_axial_oblique();
        if !axial {
            info!("Scan is not axial or axial-oblique");
        }

        let tilt = correct_gantry_tilt(&mut volume, options.tilt_mode);
        let may_merge = !tilt.correction_needed || options.tilt_mode == TiltMode::ApplyCorrection;
        if !may_merge {
            warn!("Uncorrected gantry tilt, slices are not merged");
        }

        let mut thickness = None;
        if options.merge_half_thickness && may_merge {
            let (merged, outcome) =
                merge_half_and_full_thickness(volume, options.thickness_tolerance, options.is_mask);
            volume = merged;
            thickness = Some(outcome);
        }

        let mut factor_merged = false;
        if let (Some(factor), true) = (options.merge_factor, may_merge) {
            let (merged, changed) = merge_slices(volume, factor);
            volume = merged;
            factor_merged = changed;
        }

        PipelineOutput {
            volume,
            template,
            report: PipelineReport {
                skipped,
                reversed,
                axial,
                tilt,
                thickness,
                factor_merged,
            },
        }
    }
}

/// Resample the volume along its slice normal to `slice_count` slices
///
/// Only reduces: a count of zero or at least the current depth returns the
/// volume unchanged. Strong reductions are smoothed along the normal first
/// unless the slices drift from a gantry tilt.
pub fn resample_to_slice_count(volume: Volume, slice_count: usize, tilted: bool) -> Volume {
    let depth = volume.depth();
    if slice_count == 0 || slice_count >= depth {
        return volume;
    }
    let ratio = slice_count as f64 / depth as f64;
    let source = volume.geometry;

    let smoothed;
    let data = if !tilted && ratio <= SMOOTHING_RATIO {
        let sigma = source.spacing.z / ratio;
        info!("Smoothing along the slice normal with sigma {sigma:.3} mm");
        smoothed = gaussian_smooth(&volume.data, source.spacing, [0.0, 0.0, sigma]);
        &smoothed
    } else {
        &volume.data
    };

    let mut target = source;
    target.spacing.z = depth as f64 * source.spacing.z / slice_count as f64;
    let (_, height, width) = volume.dim();
    let mut resampled = resample(
        data,
        &source,
        &target,
        (slice_count, height, width),
        Interpolation::Linear,
        MIN_SAMPLE_VALUE,
    );
    if volume.sample_kind == SampleKind::Integer {
        resampled.mapv_inplace(|v| v.round_ties_even());
    }

    let (row, column) = volume
        .poses
        .first()
        .map(|pose| (pose.row, pose.column))
        .unwrap_or_else(|| {
            (
                source.direction.column(0).into_owned(),
                source.direction.column(1).into_owned(),
            )
        });
    let poses = (0..slice_count)
        .map(|i| {
            let position = target.index_to_world(Vector3::new(0.0, 0.0, i as f64));
            Pose::new(position, row, column)
        })
        .collect();

    info!(
        "Resampled {depth} slices to {slice_count}, spacing {:.3} mm",
        target.spacing.z
    );
    Volume {
        data: resampled,
        geometry: VolumeGeometry {
            spacing: target.spacing,
            origin: source.origin,
            direction: source.direction,
        },
        poses,
        thicknesses: vec![Some(target.spacing.z); slice_count],
        slice_distances: vec![target.spacing.z; slice_count - 1],
        table_positions: Vec::new(),
        sample_kind: volume.sample_kind,
        rescaled: volume.rescaled,
    }
}

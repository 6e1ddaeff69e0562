//! Merging of thin slices: half/full-thickness acquisitions and plain
//! fixed-factor reduction.

use log::{debug, info};
use nalgebra::Vector3;
use ndarray::{Array2, Array3, Axis};

use crate::volume::{Pose, PoseTable, Volume, VolumeGeometry};

/// Thicknesses closer than this many millimetres belong to one group
pub const DEFAULT_TOLERANCE: f64 = 0.1;
/// Thinner slices are never merged
pub const MIN_THICKNESS: f64 = 0.1;
const RATIO_TOLERANCE: f64 = 0.1;

/// Slices sharing one nominal thickness
#[derive(Debug, Clone, PartialEq)]
pub struct ThicknessGroup {
    /// Thickness of the first slice that opened the group
    pub thickness: f64,
    /// Slice indices in depth order
    pub indices: Vec<usize>,
}

impl ThicknessGroup {
    pub fn min_index(&self) -> usize {
        self.indices.first().copied().unwrap_or(0)
    }

    pub fn max_index(&self) -> usize {
        self.indices.last().copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    SingleThickness,
    MissingThickness,
    NotContiguous,
    TooManyGroups,
    BelowMinimum,
    NotHalfRatio,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThicknessMergeOutcome {
    Merged {
        thin: f64,
        thick: f64,
        /// Spacing along the slice normal after merging
        spacing: f64,
        depth: usize,
    },
    Ineligible(IneligibleReason),
}

/// How the samples of a merged group are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reducer {
    Mean,
    /// Label volumes keep any label present in the group
    Max,
}

/// First-fit clustering of the recorded thicknesses, groups in order of
/// appearance; slices without a thickness are left out
pub fn group_thicknesses(thicknesses: &[Option<f64>], tolerance: f64) -> Vec<ThicknessGroup> {
    let mut groups: Vec<ThicknessGroup> = Vec::new();
    for (index, thickness) in thicknesses.iter().enumerate() {
        let Some(thickness) = *thickness else {
            continue;
        };
        match groups
            .iter_mut()
            .find(|group| (group.thickness - thickness).abs() <= tolerance)
        {
            Some(group) => group.indices.push(index),
            None => groups.push(ThicknessGroup {
                thickness,
                indices: vec![index],
            }),
        }
    }
    groups
}

/// Decide whether the volume is a thin stack followed or preceded by a stack
/// twice as thick; return the (thin, thick) groups when it is
fn half_and_full_groups(
    volume: &Volume,
    tolerance: f64,
) -> Result<(ThicknessGroup, ThicknessGroup), IneligibleReason> {
    let mut groups = group_thicknesses(&volume.thicknesses, tolerance);
    if groups.len() <= 1 {
        return Err(IneligibleReason::SingleThickness);
    }
    if volume.thicknesses.iter().any(Option::is_none) {
        return Err(IneligibleReason::MissingThickness);
    }

    groups.sort_by_key(ThicknessGroup::min_index);
    if groups
        .windows(2)
        .any(|pair| pair[0].max_index() >= pair[1].min_index())
    {
        return Err(IneligibleReason::NotContiguous);
    }
    if groups.len() > 2 {
        return Err(IneligibleReason::TooManyGroups);
    }

    groups.sort_by(|a, b| a.thickness.total_cmp(&b.thickness));
    let (thin, thick) = (groups[0].clone(), groups[1].clone());
    if thin.thickness < MIN_THICKNESS {
        return Err(IneligibleReason::BelowMinimum);
    }
    if (thick.thickness / thin.thickness - 2.0).abs() > RATIO_TOLERANCE {
        return Err(IneligibleReason::NotHalfRatio);
    }
    Ok((thin, thick))
}

/// Merge pairs of half-thickness slices so the whole volume takes the full
/// thickness
///
/// Pairs are averaged, or take their maximum when `is_mask`; an odd trailing
/// thin slice is kept as is. Volumes that are not a clean half/full
/// acquisition come back untouched with the reason.
pub fn merge_half_and_full_thickness(
    volume: Volume,
    tolerance: f64,
    is_mask: bool,
) -> (Volume, ThicknessMergeOutcome) {
    let (thin, thick) = match half_and_full_groups(&volume, tolerance) {
        Ok(groups) => groups,
        Err(reason) => {
            debug!("Slice thickness merge not applicable: {reason:?}");
            return (volume, ThicknessMergeOutcome::Ineligible(reason));
        }
    };

    let spacing = thick_group_spacing(&volume, &thick);
    let mut groups: Vec<Vec<usize>> = thin.indices.chunks(2).map(<[usize]>::to_vec).collect();
    groups.extend(thick.indices.iter().map(|&index| vec![index]));
    groups.sort_by_key(|group| group[0]);

    let reducer = if is_mask { Reducer::Max } else { Reducer::Mean };
    let merged = combine(&volume, &groups, reducer, spacing);
    info!(
        "Merged {} slice(s) of {:.2} mm into {:.2} mm, depth {} -> {}",
        thin.indices.len(),
        thin.thickness,
        thick.thickness,
        volume.depth(),
        merged.depth()
    );
    let outcome = ThicknessMergeOutcome::Merged {
        thin: thin.thickness,
        thick: thick.thickness,
        spacing,
        depth: merged.depth(),
    };
    (merged, outcome)
}

/// Distance between two neighbours near the middle of the thick group, or
/// its nominal thickness when that cannot be measured
fn thick_group_spacing(volume: &Volume, thick: &ThicknessGroup) -> f64 {
    let (first, last) = (thick.min_index(), thick.max_index());
    if last > first {
        let middle = ((first + last) / 2).min(last - 1);
        let (a, b) = (&volume.poses[middle], &volume.poses[middle + 1]);
        let distance = (b.position - a.position).dot(&a.normal()).abs();
        if distance.is_finite() && distance > 0.0 {
            return distance;
        }
    }
    thick.thickness
}

/// Average every `factor` consecutive slices into one
///
/// A trailing group shorter than `factor` averages what is left. Returns the
/// volume untouched and `false` for `factor <= 1`.
pub fn merge_slices(volume: Volume, factor: usize) -> (Volume, bool) {
    if factor <= 1 || volume.depth() == 0 {
        return (volume, false);
    }
    let groups: Vec<Vec<usize>> = (0..volume.depth())
        .collect::<Vec<_>>()
        .chunks(factor)
        .map(<[usize]>::to_vec)
        .collect();
    let spacing = volume.geometry.spacing.z * factor as f64;
    let merged = combine(&volume, &groups, Reducer::Mean, spacing);
    info!(
        "Merged every {factor} slices, depth {} -> {}",
        volume.depth(),
        merged.depth()
    );
    (merged, true)
}

/// Build the volume with one slice per group of source slice indices
fn combine(volume: &Volume, groups: &[Vec<usize>], reducer: Reducer, spacing_z: f64) -> Volume {
    let (_, height, width) = volume.dim();
    let kind = volume.sample_kind;
    let mut data = Array3::<f32>::zeros((groups.len(), height, width));
    for (mut out, group) in data.outer_iter_mut().zip(groups) {
        match reducer {
            Reducer::Mean => {
                let mut sum = Array2::<f64>::zeros((height, width));
                for &index in group {
                    sum.zip_mut_with(&volume.data.index_axis(Axis(0), index), |s, &v| {
                        *s += v as f64
                    });
                }
                let count = group.len() as f64;
                out.zip_mut_with(&sum, |o, &s| *o = kind.settle(s / count) as f32);
            }
            Reducer::Max => {
                out.fill(f32::MIN);
                for &index in group {
                    out.zip_mut_with(&volume.data.index_axis(Axis(0), index), |o, &v| {
                        *o = o.max(v)
                    });
                }
            }
        }
    }

    let poses: PoseTable = groups
        .iter()
        .map(|group| {
            let first = volume.poses[group[0]];
            let position = group
                .iter()
                .map(|&index| volume.poses[index].position)
                .sum::<Vector3<f64>>()
                / group.len() as f64;
            Pose::new(position, first.row, first.column)
        })
        .collect();

    let table_positions = if volume.table_positions.len() == volume.depth() {
        groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|&index| volume.table_positions[index])
                    .sum::<f64>()
                    / group.len() as f64
            })
            .collect()
    } else {
        Vec::new()
    };

    let depth = groups.len();
    let mut spacing = volume.geometry.spacing;
    spacing.z = spacing_z;
    Volume {
        data,
        geometry: VolumeGeometry::from_poses(&poses, spacing),
        poses,
        thicknesses: vec![Some(spacing_z); depth],
        slice_distances: vec![spacing_z; depth.saturating_sub(1)],
        table_positions,
        sample_kind: volume.sample_kind,
        rescaled: volume.rescaled,
    }
}

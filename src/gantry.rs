//! Detection and correction of the in-plane drift a tilted gantry leaves
//! between consecutive slices.

use log::{debug, info};
use ndarray::Axis;

use crate::enums::{Interpolation, SampleKind, TiltMode};
use crate::interpolator::translate_slice;
use crate::volume::Volume;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TiltReport {
    /// Some slice drifts more than a quarter pixel from the reference slice
    pub correction_needed: bool,
    /// Slices rewritten by [`TiltMode::ApplyCorrection`]
    pub corrected_slices: usize,
    /// Largest in-plane drift, in millimetres
    pub max_shift: f64,
}

/// In-plane drift `(x, y)` of every slice relative to the middle one
pub fn measure_shifts(volume: &Volume) -> Vec<(f64, f64)> {
    let poses = &volume.poses;
    if poses.is_empty() {
        return Vec::new();
    }
    let reference = poses[reference_index(poses.len())].position;
    poses
        .iter()
        .map(|pose| {
            let d = pose.position - reference;
            (pose.row.dot(&d), pose.column.dot(&d))
        })
        .collect()
}

fn reference_index(depth: usize) -> usize {
    ((depth as f64 / 2.0).round_ties_even() as usize).min(depth - 1)
}

/// Check for gantry tilt and, in [`TiltMode::ApplyCorrection`], shift every
/// drifting slice back in line with the reference slice
///
/// Shifted-in samples take the smallest value of the volume. Only the
/// correcting mode touches the volume.
pub fn correct_gantry_tilt(volume: &mut Volume, mode: TiltMode) -> TiltReport {
    let shifts = measure_shifts(volume);
    let spacing = volume.geometry.spacing;
    let tolerance = (spacing.x / 4.0, spacing.y / 4.0);
    let drifting: Vec<bool> = shifts
        .iter()
        .map(|(sx, sy)| sx.abs() > tolerance.0 || sy.abs() > tolerance.1)
        .collect();

    let mut report = TiltReport {
        correction_needed: drifting.iter().any(|&d| d),
        corrected_slices: 0,
        max_shift: shifts
            .iter()
            .map(|(sx, sy)| sx.hypot(*sy))
            .fold(0.0, f64::max),
    };

    if !report.correction_needed {
        debug!("No gantry tilt, largest drift {:.3} mm", report.max_shift);
        return report;
    }
    if mode == TiltMode::CheckOnly {
        info!(
            "Gantry tilt detected, largest drift {:.3} mm, left uncorrected",
            report.max_shift
        );
        return report;
    }

    let fill = volume.min_max().map_or(0.0, |(low, _)| low);
    let kind = volume.sample_kind;
    for (z, &(sx, sy)) in shifts.iter().enumerate() {
        if !drifting[z] {
            continue;
        }
        let mut slice = volume.data.index_axis_mut(Axis(0), z);
        let mut shifted = translate_slice(
            slice.view(),
            (-sy / spacing.y, -sx / spacing.x),
            Interpolation::Linear,
            fill,
        );
        if kind == SampleKind::Integer {
            shifted.mapv_inplace(|v| kind.settle(v as f64) as f32);
        }
        slice.assign(&shifted);

        let pose = &mut volume.poses[z];
        pose.position += pose.row * sx + pose.column * sy;
        report.corrected_slices += 1;
    }

    if let (Some(&(sx, sy)), Some(first)) = (shifts.first(), volume.poses.first()) {
        volume.geometry.origin += first.row * sx + first.column * sy;
    }
    info!(
        "Corrected gantry tilt on {} slice(s), largest drift {:.3} mm",
        report.corrected_slices, report.max_shift
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Pose, PoseTable};
    use nalgebra::Vector3;
    use ndarray::Array3;

    /// Slices whose origin drifts `drift` mm along X per slice, each showing
    /// one bright column at world x = 5
    fn tilted_volume(depth: usize, drift: f64) -> Volume {
        let poses: PoseTable = (0..depth)
            .map(|z| {
                Pose::new(
                    Vector3::new(z as f64 * drift, 0.0, z as f64 * 2.0),
                    Vector3::new(1.0, 0.0, 0.0),
                    Vector3::new(0.0, 1.0, 0.0),
                )
            })
            .collect();
        let data = Array3::from_shape_fn((depth, 3, 8), |(z, _, x)| {
            let world_x = x as f64 + z as f64 * drift;
            if (world_x - 5.0).abs() < 1e-9 { 100.0 } else { 0.0 }
        });
        Volume::from_slices(data, poses, (1.0, 1.0), vec![Some(2.0); depth])
    }

    #[test]
    fn reference_is_the_middle_slice() {
        assert_eq!(reference_index(1), 0);
        assert_eq!(reference_index(3), 2);
        assert_eq!(reference_index(4), 2);
        assert_eq!(reference_index(5), 2);
    }

    #[test]
    fn sub_quarter_pixel_drift_needs_no_correction() {
        let mut volume = tilted_volume(5, 0.05);
        let report = correct_gantry_tilt(&mut volume, TiltMode::ApplyCorrection);
        assert!(!report.correction_needed);
        assert_eq!(report.corrected_slices, 0);
        assert!(report.max_shift < 0.25);
    }

    #[test]
    fn check_only_never_mutates() {
        let mut volume = tilted_volume(3, 1.0);
        let before = volume.clone();
        let report = correct_gantry_tilt(&mut volume, TiltMode::CheckOnly);
        assert!(report.correction_needed);
        assert_eq!(report.corrected_slices, 0);
        assert_eq!(report.max_shift, 2.0);
        assert_eq!(volume.data, before.data);
        assert_eq!(volume.poses, before.poses);
        assert_eq!(volume.geometry, before.geometry);
    }

    #[test]
    fn correction_aligns_slices_with_the_reference() {
        let mut volume = tilted_volume(3, 1.0);
        let report = correct_gantry_tilt(&mut volume, TiltMode::ApplyCorrection);
        assert!(report.correction_needed);
        assert_eq!(report.corrected_slices, 2);

        // The reference slice (index 2) shows world x = 5 at column 3
        for z in 0..3 {
            assert_eq!(volume.data[[z, 1, 3]], 100.0, "slice {z}");
        }
        // Columns shifted in from outside the slice take the minimum
        assert_eq!(volume.data[[0, 0, 7]], 0.0);

        assert_eq!(volume.poses[0].position.x, -2.0);
        assert_eq!(volume.poses[2].position.x, 2.0);
        assert_eq!(volume.geometry.origin.x, -2.0);
    }
}

use log::{debug, info};
use ndarray::Axis;

use crate::volume::Volume;

/// Put a stack recorded against the table direction back into increasing
/// table position
///
/// Needs at least two table positions; reverses when the first is larger than
/// the last. The buffer is reordered along depth together with every
/// per-slice table, so a second call is a no-op. Returns whether anything was
/// reversed.
pub fn normalize_orientation(volume: &mut Volume) -> bool {
    let (Some(&first), Some(&last)) = (volume.table_positions.first(), volume.table_positions.last())
    else {
        return false;
    };
    if volume.table_positions.len() < 2 || first <= last {
        debug!("Table positions {first} .. {last} already increase");
        return false;
    }

    info!("Table positions decrease from {first} to {last}, reversing slice order");
    volume.data.invert_axis(Axis(0));
    volume.data = volume.data.as_standard_layout().into_owned();
    volume.poses.reverse();
    volume.thicknesses.reverse();
    volume.slice_distances.reverse();
    volume.table_positions.reverse();

    if let Some(&distance) = volume.slice_distances.first() {
        if distance.is_finite() && distance > 0.0 {
            volume.geometry.spacing.z = distance;
        }
    }
    volume.refresh_geometry();
    true
}

use log::warn;
use nalgebra::Vector3;

use crate::volume::Pose;

/// |cos 45°|
const AXIAL_COSINE: f64 = 0.7071;

/// Whether the first slice normal lies within 45° of the patient Z axis
///
/// Without any pose the question cannot be answered and `false` is returned.
pub fn is_axial_or_axial_oblique(poses: &[Pose]) -> bool {
    let Some(first) = poses.first() else {
        warn!("No slice orientation available, cannot classify the scan axis");
        return false;
    };
    let normal = first.normal();
    let normal = normal.try_normalize(1e-12).unwrap_or(normal);
    normal.dot(&Vector3::z()).abs() > AXIAL_COSINE
}

//! Volumetric primitives: sub-region extraction, in-plane translation,
//! separable Gaussian smoothing, resampling onto another grid and value range.

use nalgebra::Vector3;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, Zip, s};

use crate::enums::Interpolation;
use crate::volume::VolumeGeometry;

/// How far outside the grid a linear sample may land and still count as inside
const EDGE_TOLERANCE: f64 = 1e-6;

/// Sigma below this many voxels leaves an axis untouched
const MIN_SIGMA_VOXELS: f64 = 0.01;

/// Sigma above this many voxels uses the recursive filter, whose cost does
/// not grow with sigma
const RECURSIVE_SIGMA_VOXELS: f64 = 4.0;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Dimensions `(depth, height, width)` that make every voxel as small as
    /// the finest spacing
    pub(crate) fn get_isotropic_dimensions(
        spacing: Vector3<f64>,
        original_dim: (usize, usize, usize),
    ) -> (u32, u32, u32) {
        let min_spacing = spacing.x.min(spacing.y).min(spacing.z);
        let inv_min_spacing = 1.0 / min_spacing;

        // original_dim is (depth, height, width) corresponding to (z, y, x)
        let new_x = (original_dim.2 as f64 * spacing.x * inv_min_spacing) as u32;
        let new_y = (original_dim.1 as f64 * spacing.y * inv_min_spacing) as u32;
        let new_z = (original_dim.0 as f64 * spacing.z * inv_min_spacing) as u32;

        (new_z, new_y, new_x)
    }

    /// Bilinear sample at a position already clamped into the slice
    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<f32>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = slice[[y0, x0]];
        let v01 = slice[[y0, x1]];
        let v10 = slice[[y1, x0]];
        let v11 = slice[[y1, x1]];

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }

    /// Sample a slice at a continuous `(y, x)` index, `fill` outside the grid
    #[inline]
    pub(crate) fn sample_2d(
        slice: &ArrayView2<f32>,
        y: f64,
        x: f64,
        interpolation: Interpolation,
        fill: f32,
    ) -> f32 {
        let (height, width) = slice.dim();
        match interpolation {
            Interpolation::Nearest => match (nearest(y, height), nearest(x, width)) {
                (Some(y), Some(x)) => slice[[y, x]],
                _ => fill,
            },
            Interpolation::Linear => {
                if !inside(y, height) || !inside(x, width) {
                    return fill;
                }
                let y = y.clamp(0.0, (height - 1) as f64) as f32;
                let x = x.clamp(0.0, (width - 1) as f64) as f32;
                Self::bilinear_interpolate(slice, y, x)
            }
        }
    }

    /// Sample a volume at a continuous `(z, y, x)` index, `fill` outside the grid
    pub(crate) fn sample_3d(
        volume: &ArrayView3<f32>,
        z: f64,
        y: f64,
        x: f64,
        interpolation: Interpolation,
        fill: f32,
    ) -> f32 {
        let (depth, _, _) = volume.dim();
        match interpolation {
            Interpolation::Nearest => match nearest(z, depth) {
                Some(z) => Self::sample_2d(&volume.index_axis(Axis(0), z), y, x, interpolation, fill),
                None => fill,
            },
            Interpolation::Linear => {
                if !inside(z, depth) {
                    return fill;
                }
                let z = z.clamp(0.0, (depth - 1) as f64);
                let z0 = z.floor() as usize;
                let z1 = (z0 + 1).min(depth - 1);
                let dz = (z - z0 as f64) as f32;
                let v0 = Self::sample_2d(&volume.index_axis(Axis(0), z0), y, x, interpolation, fill);
                if dz == 0.0 || z1 == z0 {
                    return v0;
                }
                let v1 = Self::sample_2d(&volume.index_axis(Axis(0), z1), y, x, interpolation, fill);
                v0.mul_add(1.0 - dz, v1 * dz)
            }
        }
    }
}

#[inline]
fn inside(index: f64, size: usize) -> bool {
    size > 0 && index >= -EDGE_TOLERANCE && index <= (size - 1) as f64 + EDGE_TOLERANCE
}

#[inline]
fn nearest(index: f64, size: usize) -> Option<usize> {
    let rounded = index.round();
    (rounded >= 0.0 && rounded < size as f64).then_some(rounded as usize)
}

/// Copy the axis-aligned block starting at `offset` with extent `size`,
/// both `(z, y, x)`; the block is cropped to the volume
pub fn extract_region(data: &Array3<f32>, offset: [usize; 3], size: [usize; 3]) -> Array3<f32> {
    let (depth, height, width) = data.dim();
    let end = |axis: usize, limit: usize| (offset[axis] + size[axis]).min(limit);
    let start = |axis: usize, limit: usize| offset[axis].min(limit);
    data.slice(s![
        start(0, depth)..end(0, depth),
        start(1, height)..end(1, height),
        start(2, width)..end(2, width)
    ])
    .to_owned()
}

/// Translate a slice by a continuous offset of `(rows, columns)`
///
/// The output sample at `(y, x)` is the input sampled at
/// `(y + offset.0, x + offset.1)`; samples that land outside the input take
/// `fill`.
pub fn translate_slice(
    slice: ArrayView2<f32>,
    offset: (f64, f64),
    interpolation: Interpolation,
    fill: f32,
) -> Array2<f32> {
    Array2::from_shape_fn(slice.dim(), |(y, x)| {
        Interpolator::sample_2d(
            &slice,
            y as f64 + offset.0,
            x as f64 + offset.1,
            interpolation,
            fill,
        )
    })
}

/// Separable Gaussian smoothing with a per-axis sigma in millimetres
///
/// `spacing` and `sigma` are both `(x, y, z)`. Edges replicate the border
/// sample. Wide sigmas run the Young and van Vliet recursive approximation
/// instead of a sampled kernel.
pub fn gaussian_smooth(data: &Array3<f32>, spacing: Vector3<f64>, sigma: [f64; 3]) -> Array3<f32> {
    let mut smoothed = data.clone();
    // (x, y, z) maps onto array axes (2, 1, 0)
    for (component, array_axis) in [(0, 2), (1, 1), (2, 0)] {
        let sigma_voxels = sigma[component] / spacing[component];
        if !sigma_voxels.is_finite() || sigma_voxels < MIN_SIGMA_VOXELS {
            continue;
        }
        let filter = if sigma_voxels > RECURSIVE_SIGMA_VOXELS {
            LaneFilter::Recursive(RecursiveGaussian::new(sigma_voxels))
        } else {
            let kernel = gaussian_kernel(sigma_voxels);
            if kernel.len() == 1 {
                continue;
            }
            LaneFilter::Kernel(kernel)
        };
        let source = smoothed;
        let mut target = Array3::zeros(source.dim());
        Zip::from(target.lanes_mut(Axis(array_axis)))
            .and(source.lanes(Axis(array_axis)))
            .par_for_each(|mut out, lane| match &filter {
                LaneFilter::Kernel(kernel) => convolve_lane(lane, kernel, &mut out),
                LaneFilter::Recursive(recursive) => recursive.filter_lane(lane, &mut out),
            });
        smoothed = target;
    }
    smoothed
}

enum LaneFilter {
    Kernel(Array1<f64>),
    Recursive(RecursiveGaussian),
}

/// Third-order causal plus anti-causal Gaussian approximation
/// (Young and van Vliet, 1995), valid for sigma of at least half a voxel
#[derive(Debug, Clone, Copy)]
struct RecursiveGaussian {
    gain: f64,
    feedback: [f64; 3],
}

impl RecursiveGaussian {
    fn new(sigma: f64) -> Self {
        let q = if sigma >= 2.5 {
            0.98711 * sigma - 0.96330
        } else {
            3.97156 - 4.14554 * (1.0 - 0.26891 * sigma).sqrt()
        };
        let (q2, q3) = (q * q, q * q * q);
        let b0 = 1.57825 + 2.44413 * q + 1.4281 * q2 + 0.422205 * q3;
        let feedback = [
            (2.44413 * q + 2.85619 * q2 + 1.26661 * q3) / b0,
            -(1.4281 * q2 + 1.26661 * q3) / b0,
            0.422205 * q3 / b0,
        ];
        Self {
            gain: 1.0 - feedback.iter().sum::<f64>(),
            feedback,
        }
    }

    /// Both passes start from the steady state of their border sample
    fn filter_lane(&self, lane: ArrayView1<f32>, out: &mut ndarray::ArrayViewMut1<f32>) {
        let Some(&first) = lane.first() else {
            return;
        };
        let [b1, b2, b3] = self.feedback;

        let mut forward = Vec::with_capacity(lane.len());
        let mut state = [first as f64; 3];
        for &value in lane {
            let w = self.gain * value as f64 + b1 * state[0] + b2 * state[1] + b3 * state[2];
            state = [w, state[0], state[1]];
            forward.push(w);
        }

        let mut state = [state[0]; 3];
        for (i, &w) in forward.iter().enumerate().rev() {
            let y = self.gain * w + b1 * state[0] + b2 * state[1] + b3 * state[2];
            state = [y, state[0], state[1]];
            out[i] = y as f32;
        }
    }
}

fn gaussian_kernel(sigma: f64) -> Array1<f64> {
    let radius = (3.0 * sigma).ceil() as i64;
    let mut kernel = Array1::from_shape_fn((2 * radius + 1) as usize, |i| {
        let x = (i as i64 - radius) as f64;
        (-0.5 * (x / sigma).powi(2)).exp()
    });
    let total = kernel.sum();
    kernel /= total;
    kernel
}

fn convolve_lane(lane: ArrayView1<f32>, kernel: &Array1<f64>, out: &mut ndarray::ArrayViewMut1<f32>) {
    let len = lane.len() as i64;
    let radius = (kernel.len() / 2) as i64;
    for i in 0..len {
        let value: f64 = kernel
            .iter()
            .enumerate()
            .map(|(k, weight)| {
                let j = (i + k as i64 - radius).clamp(0, len - 1);
                weight * lane[j as usize] as f64
            })
            .sum();
        out[i as usize] = value as f32;
    }
}

/// Resample `data`, laid out by `source`, onto the grid of `target` with
/// `size` = `(depth, height, width)`
///
/// Target voxels whose world position falls outside the source grid take
/// `fill`.
pub fn resample(
    data: &Array3<f32>,
    source: &VolumeGeometry,
    target: &VolumeGeometry,
    size: (usize, usize, usize),
    interpolation: Interpolation,
    fill: f32,
) -> Array3<f32> {
    let view = data.view();
    let mut output = Array3::zeros(size);
    Zip::indexed(&mut output).par_for_each(|(z, y, x), value| {
        let world = target.index_to_world(Vector3::new(x as f64, y as f64, z as f64));
        let index = source.world_to_index(world);
        *value = Interpolator::sample_3d(&view, index.z, index.y, index.x, interpolation, fill);
    });
    output
}

/// Smallest and largest sample, `None` for an empty buffer
pub fn min_max(data: &Array3<f32>) -> Option<(f32, f32)> {
    data.iter().fold(None, |range, &v| match range {
        None => Some((v, v)),
        Some((low, high)) => Some((low.min(v), high.max(v))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_close;
    use nalgebra::Matrix3;
    use ndarray::array;
    use rstest::rstest;

    #[rstest]
    #[case((1.0, 1.0, 1.0), (2, 3, 4), (2, 3, 4))]
    #[case((0.5, 0.5, 2.0), (10, 4, 4), (40, 4, 4))]
    fn isotropic_dimensions(
        #[case] spacing: (f64, f64, f64),
        #[case] dim: (usize, usize, usize),
        #[case] expected: (u32, u32, u32),
    ) {
        let spacing = Vector3::new(spacing.0, spacing.1, spacing.2);
        assert_eq!(Interpolator::get_isotropic_dimensions(spacing, dim), expected);
    }

    #[test]
    fn whole_pixel_translation_moves_content_and_fills() {
        let slice = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let shifted = translate_slice(slice.view(), (0.0, -1.0), Interpolation::Linear, -7.0);
        assert_eq!(shifted, array![[-7.0, 1.0, 2.0], [-7.0, 4.0, 5.0]]);
    }

    #[test]
    fn half_pixel_translation_interpolates() {
        let slice = array![[0.0_f32, 10.0, 20.0]];
        let shifted = translate_slice(slice.view(), (0.0, 0.5), Interpolation::Linear, 0.0);
        assert_eq!(shifted[[0, 0]], 5.0);
        assert_eq!(shifted[[0, 1]], 15.0);
        assert_eq!(shifted[[0, 2]], 0.0);
    }

    #[test]
    fn region_is_cropped_to_the_volume() {
        let data = Array3::from_shape_fn((4, 3, 3), |(z, _, _)| z as f32);
        let region = extract_region(&data, [2, 1, 0], [5, 2, 3]);
        assert_eq!(region.dim(), (2, 2, 3));
        assert_eq!(region[[0, 0, 0]], 2.0);
        assert_eq!(region[[1, 1, 2]], 3.0);
    }

    #[test]
    fn smoothing_preserves_constant_volumes() {
        let data = Array3::from_elem((6, 2, 2), 42.0_f32);
        let smoothed = gaussian_smooth(&data, Vector3::new(1.0, 1.0, 1.0), [0.001, 0.001, 2.0]);
        for value in smoothed.iter() {
            assert!((value - 42.0).abs() < 1e-4);
        }
    }

    #[test]
    fn smoothing_spreads_along_requested_axis_only() {
        let mut data = Array3::zeros((5, 3, 3));
        data[[2, 1, 1]] = 100.0;
        let smoothed = gaussian_smooth(&data, Vector3::new(1.0, 1.0, 1.0), [0.001, 0.001, 1.0]);
        assert!(smoothed[[2, 1, 1]] < 100.0);
        assert!(smoothed[[1, 1, 1]] > 0.0);
        assert_eq!(smoothed[[2, 1, 0]], 0.0);
        // Border taps beyond a short lane are lost, never gained
        let total: f32 = smoothed.iter().sum();
        assert!(total > 98.0 && total <= 100.0 + 1e-3);
    }

    #[test]
    fn wide_sigma_approximates_the_gaussian_impulse_response() {
        let mut data = Array3::zeros((401, 1, 1));
        data[[200, 0, 0]] = 1000.0;
        let sigma = 10.0;
        let smoothed = gaussian_smooth(&data, Vector3::new(1.0, 1.0, 1.0), [0.0, 0.0, sigma]);

        let peak = 1000.0 / (sigma * (2.0 * std::f64::consts::PI).sqrt());
        let centre = smoothed[[200, 0, 0]] as f64;
        assert!((centre - peak).abs() < 0.02 * peak, "peak {centre}, expected {peak}");
        assert!((smoothed[[190, 0, 0]] - smoothed[[210, 0, 0]]).abs() < 1e-2);
        let total: f32 = smoothed.iter().sum();
        assert!((total - 1000.0).abs() < 5.0, "total {total}");
    }

    #[test]
    fn wide_sigma_on_a_short_lane_keeps_constants() {
        let data = Array3::from_elem((3, 2, 2), -1024.0_f32);
        let smoothed = gaussian_smooth(&data, Vector3::new(1.0, 1.0, 0.5), [0.0, 0.0, 400.0]);
        for value in smoothed.iter() {
            assert!((value + 1024.0).abs() < 1e-2);
        }
    }

    #[test]
    fn resample_halves_depth_linearly() {
        let data = Array3::from_shape_fn((5, 2, 2), |(z, _, _)| z as f32 * 10.0);
        let source = VolumeGeometry {
            spacing: Vector3::new(1.0, 1.0, 1.0),
            origin: Vector3::zeros(),
            direction: Matrix3::identity(),
        };
        let target = VolumeGeometry {
            spacing: Vector3::new(1.0, 1.0, 1.5),
            ..source
        };
        let output = resample(&data, &source, &target, (4, 2, 2), Interpolation::Linear, -1024.0);
        assert_eq!(output.dim(), (4, 2, 2));
        assert_close(output[[0, 0, 0]] as f64, 0.0);
        assert_close(output[[1, 0, 0]] as f64, 15.0);
        assert_close(output[[2, 1, 1]] as f64, 30.0);
        // 4.5 mm lies beyond the last source slice
        assert_eq!(output[[3, 0, 0]], -1024.0);
    }

    #[test]
    fn min_max_of_empty_buffer_is_none() {
        assert_eq!(min_max(&Array3::zeros((0, 2, 2))), None);
        let data = array![[[3.0_f32, -2.0], [8.0, 0.0]]];
        assert_eq!(min_max(&data), Some((-2.0, 8.0)));
    }
}

use std::ops::{Deref, DerefMut};

use image::{GrayImage, ImageBuffer};
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView2, s};
use rayon::prelude::*;

use crate::axis;
use crate::enums::{Interpolation, Orientation, SampleKind};
use crate::interpolator::{Interpolator, min_max};

/// Position and in-plane axes of one slice, in patient coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Image Position (Patient): world coordinate of the first sample
    pub position: Vector3<f64>,
    /// Direction of increasing column index
    pub row: Vector3<f64>,
    /// Direction of increasing row index
    pub column: Vector3<f64>,
}

impl Pose {
    pub fn new(position: Vector3<f64>, row: Vector3<f64>, column: Vector3<f64>) -> Self {
        Self {
            position,
            row,
            column,
        }
    }

    /// Build a pose from raw Image Position (3 values) and Image Orientation
    /// (6 values) tag contents
    pub fn from_tags(position: &[f64], orientation: &[f64]) -> Option<Self> {
        if position.len() != 3 || orientation.len() != 6 {
            return None;
        }
        Some(Self::new(
            Vector3::from_column_slice(position),
            Vector3::from_column_slice(&orientation[0..3]),
            Vector3::from_column_slice(&orientation[3..6]),
        ))
    }

    /// Slice normal, `row × column`
    pub fn normal(&self) -> Vector3<f64> {
        self.row.cross(&self.column)
    }

    /// Image Orientation (Patient) in tag order
    pub fn orientation(&self) -> [f64; 6] {
        [
            self.row.x,
            self.row.y,
            self.row.z,
            self.column.x,
            self.column.y,
            self.column.z,
        ]
    }
}

/// One [`Pose`] per slice of a volume, in depth order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseTable(Vec<Pose>);

impl PoseTable {
    pub fn new(poses: Vec<Pose>) -> Self {
        Self(poses)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, pose: Pose) {
        self.0.push(pose);
    }

    pub fn into_inner(self) -> Vec<Pose> {
        self.0
    }
}

impl Deref for PoseTable {
    type Target = [Pose];

    fn deref(&self) -> &[Pose] {
        &self.0
    }
}

impl DerefMut for PoseTable {
    fn deref_mut(&mut self) -> &mut [Pose] {
        &mut self.0
    }
}

impl FromIterator<Pose> for PoseTable {
    fn from_iter<T: IntoIterator<Item = Pose>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Mapping between voxel indices and patient coordinates
///
/// `spacing` is ordered `(x, y, z)` = (column step, row step, slice step) and
/// the columns of `direction` are the matching unit axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    pub spacing: Vector3<f64>,
    pub origin: Vector3<f64>,
    pub direction: Matrix3<f64>,
}

impl Default for VolumeGeometry {
    fn default() -> Self {
        Self {
            spacing: Vector3::new(1.0, 1.0, 1.0),
            origin: Vector3::zeros(),
            direction: Matrix3::identity(),
        }
    }
}

impl VolumeGeometry {
    /// World position of the continuous index `(x, y, z)`
    pub fn index_to_world(&self, index: Vector3<f64>) -> Vector3<f64> {
        self.origin + self.direction * index.component_mul(&self.spacing)
    }

    /// Continuous `(x, y, z)` index of a world position
    pub fn world_to_index(&self, world: Vector3<f64>) -> Vector3<f64> {
        (self.direction.transpose() * (world - self.origin)).component_div(&self.spacing)
    }

    /// Derive origin and direction from the first poses of a stack
    ///
    /// The normal column is flipped when consecutive slices step against
    /// `row × column`, so that increasing depth index always moves along the
    /// third direction column.
    pub fn from_poses(poses: &[Pose], spacing: Vector3<f64>) -> Self {
        let Some(first) = poses.first() else {
            return Self {
                spacing,
                ..Self::default()
            };
        };
        let row = unit(first.row);
        let column = unit(first.column);
        let mut normal = unit(first.normal());
        if let Some(second) = poses.get(1) {
            if (second.position - first.position).dot(&normal) < 0.0 {
                normal = -normal;
            }
        }
        Self {
            spacing,
            origin: first.position,
            direction: Matrix3::from_columns(&[row, column, normal]),
        }
    }
}

fn unit(v: Vector3<f64>) -> Vector3<f64> {
    v.try_normalize(1e-12).unwrap_or(v)
}

/// Dense `depth × height × width` sample buffer with its geometry and
/// per-slice tables
#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub data: Array3<f32>,
    pub geometry: VolumeGeometry,
    pub poses: PoseTable,
    /// Nominal Slice Thickness of each slice, when recorded
    pub thicknesses: Vec<Option<f64>>,
    /// Distance between consecutive slices along the slice normal
    pub slice_distances: Vec<f64>,
    /// Table Position of each slice that recorded one, in depth order
    pub table_positions: Vec<f64>,
    pub sample_kind: SampleKind,
    /// Whether stored values were mapped through Rescale Slope/Intercept
    pub rescaled: bool,
}

impl Volume {
    /// Build a volume from stacked slices and their poses
    ///
    /// `in_plane_spacing` is `(x, y)`. The through-plane spacing is the first
    /// inter-slice distance when it can be measured, else the first slice
    /// thickness, else 1.0.
    pub fn from_slices(
        data: Array3<f32>,
        poses: PoseTable,
        in_plane_spacing: (f64, f64),
        thicknesses: Vec<Option<f64>>,
    ) -> Self {
        let slice_distances = measure_slice_distances(&poses);
        let spacing_z = slice_distances
            .first()
            .copied()
            .filter(|d| d.is_finite() && *d > 0.0)
            .or_else(|| {
                thicknesses
                    .first()
                    .copied()
                    .flatten()
                    .filter(|t| t.is_finite() && *t > 0.0)
            })
            .unwrap_or(1.0);
        let spacing = Vector3::new(in_plane_spacing.0, in_plane_spacing.1, spacing_z);

        Self {
            data,
            geometry: VolumeGeometry::from_poses(&poses, spacing),
            poses,
            thicknesses,
            slice_distances,
            table_positions: Vec::new(),
            sample_kind: SampleKind::Integer,
            rescaled: false,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    /// Smallest and largest sample value, `None` for an empty volume
    pub fn min_max(&self) -> Option<(f32, f32)> {
        min_max(&self.data)
    }

    /// Re-derive origin and direction after the pose table was rebuilt
    pub(crate) fn refresh_geometry(&mut self) {
        self.geometry = VolumeGeometry::from_poses(&self.poses, self.geometry.spacing);
    }

    /// Whether the slice normal lies within 45° of the patient Z axis
    pub fn is_axial_or_axial_oblique(&self) -> bool {
        axis::is_axial_or_axial_oblique(&self.poses)
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    /// Render one slice as an 8-bit image, windowed to the volume's value range
    ///
    /// With [`Interpolation::Linear`] coronal and sagittal slices are
    /// stretched so that pixels come out square.
    pub fn preview_image(
        &self,
        index: usize,
        orientation: Orientation,
        interpolation: Interpolation,
    ) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(index, orientation)?;
        let (low, high) = self.min_max()?;
        let window = Window { low, high };

        match interpolation {
            Interpolation::Nearest => window.slice_to_image(&slice),
            Interpolation::Linear => {
                if matches!(orientation, Orientation::Axial) {
                    return window.slice_to_image(&slice);
                }
                let (width, height) = self.get_output_dimensions(orientation);
                window.interpolate_slice(&slice, width, height)
            }
        }
    }

    fn get_output_dimensions(&self, orientation: Orientation) -> (u32, u32) {
        let (depth, height, width) =
            Interpolator::get_isotropic_dimensions(self.geometry.spacing, self.dim());
        // Always (width, height) of the rendered image
        match orientation {
            Orientation::Axial => (width, height),
            Orientation::Coronal => (width, depth),
            Orientation::Sagittal => (height, depth),
        }
    }

    fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}

/// Distance between consecutive slice positions, projected on the normal of
/// the earlier slice
pub(crate) fn measure_slice_distances(poses: &[Pose]) -> Vec<f64> {
    poses
        .windows(2)
        .map(|pair| (pair[1].position - pair[0].position).dot(&pair[0].normal()).abs())
        .collect()
}

struct Window {
    low: f32,
    high: f32,
}

impl Window {
    #[inline]
    fn to_u8(&self, value: f32) -> u8 {
        let range = self.high - self.low;
        if range <= 0.0 {
            return 0;
        }
        (((value - self.low) / range) * 255.0).clamp(0.0, 255.0) as u8
    }

    fn slice_to_image(&self, slice: &ArrayView2<'_, f32>) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice.iter().map(|&v| self.to_u8(v)).collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn interpolate_slice(
        &self,
        slice: &ArrayView2<'_, f32>,
        width: u32,
        height: u32,
    ) -> Option<GrayImage> {
        let (slice_height, slice_width) = slice.dim();
        if width == 0 || height == 0 || slice_height == 0 || slice_width == 0 {
            return None;
        }

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map(|y| {
                (0..width)
                    .map(|x| {
                        // Normalized coordinates with half-pixel offset
                        let norm_x = (x as f32 + 0.5) / width as f32;
                        let norm_y = (y as f32 + 0.5) / height as f32;

                        let src_x = (norm_x * slice_width as f32 - 0.5)
                            .clamp(0.0, (slice_width - 1) as f32);
                        let src_y = (norm_y * slice_height as f32 - 0.5)
                            .clamp(0.0, (slice_height - 1) as f32);

                        let value = Interpolator::bilinear_interpolate(slice, src_y, src_x);
                        self.to_u8(value)
                    })
                    .collect::<Vec<u8>>()
            })
            .collect();

        ImageBuffer::from_raw(width, height, pixel_data)
    }
}

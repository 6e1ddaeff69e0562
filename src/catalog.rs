//! First pass over an input set: read every header, decide whether the item
//! belongs to the volume, and describe what the assembler will need from it.

use std::fmt;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use log::{debug, info, warn};
use nalgebra::Vector3;
use rayon::prelude::*;

use crate::error::{Result, VolumeError};
use crate::tag_store::{
    ItemHeader, TagStore, find_recursive, float_value, int_value, multi_float_value,
    multi_string_value, string_value,
};
use crate::volume::Pose;

pub const ENHANCED_CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2.1";
pub const ENHANCED_MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4.1";
pub const ENHANCED_PET_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.130";

const ENHANCED_SOP_CLASSES: [&str; 3] = [
    ENHANCED_CT_IMAGE_STORAGE,
    ENHANCED_MR_IMAGE_STORAGE,
    ENHANCED_PET_IMAGE_STORAGE,
];

/// Linear mapping from stored values to modality units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

impl Rescale {
    #[inline]
    pub fn apply(&self, value: f32) -> f32 {
        (value as f64 * self.slope + self.intercept) as f32
    }

    /// Whether integral stored values stay integral
    pub fn is_integral(&self) -> bool {
        self.slope.fract() == 0.0 && self.intercept.fract() == 0.0
    }
}

/// Geometry and value mapping recorded for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameGeometry {
    pub position: Option<Vector3<f64>>,
    pub orientation: Option<[f64; 6]>,
    pub thickness: Option<f64>,
    pub rescale: Option<Rescale>,
    pub table_position: Option<f64>,
}

impl FrameGeometry {
    pub fn pose(&self) -> Option<Pose> {
        let position = self.position?;
        let orientation = self.orientation?;
        Pose::from_tags(position.as_slice(), &orientation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerLayout {
    /// One slice per item
    Conventional { instance_number: i32 },
    /// One item holding the whole stack
    Enhanced { frame_count: usize },
}

/// Everything the later stages need to know about one accepted item
#[derive(Debug, Clone)]
pub struct SliceDescriptor {
    pub source_index: usize,
    pub path: PathBuf,
    /// Coordinate along the principal axis of the scan
    pub position: f64,
    pub series_uid: Option<String>,
    pub transfer_syntax: String,
    pub layout: ContainerLayout,
    pub width: usize,
    pub height: usize,
    /// One entry per frame; conventional items hold exactly one
    pub frames: Vec<FrameGeometry>,
    /// In-plane spacing `(x, y)`: column step then row step
    pub pixel_spacing: Option<(f64, f64)>,
}

impl SliceDescriptor {
    pub fn instance_number(&self) -> Option<i32> {
        match self.layout {
            ContainerLayout::Conventional { instance_number } => Some(instance_number),
            ContainerLayout::Enhanced { .. } => None,
        }
    }

    pub fn is_enhanced(&self) -> bool {
        matches!(self.layout, ContainerLayout::Enhanced { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Unreadable(String),
    Localizer,
    EmptyContainer,
    MissingTags(Vec<&'static str>),
    FrameCountMismatch {
        frames: usize,
        positions: usize,
        orientations: usize,
    },
    AfterEnhanced,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable(reason) => write!(f, "unreadable: {reason}"),
            SkipReason::Localizer => f.write_str("localizer or scout image"),
            SkipReason::EmptyContainer => f.write_str("multi-frame container without frames"),
            SkipReason::MissingTags(names) => write!(f, "missing {}", names.join(", ")),
            SkipReason::FrameCountMismatch {
                frames,
                positions,
                orientations,
            } => write!(
                f,
                "{frames} frames but {positions} positions and {orientations} orientations"
            ),
            SkipReason::AfterEnhanced => {
                f.write_str("a multi-frame container already provides the volume")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedItem {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Accepted items in input order, plus what was left out and why
#[derive(Debug, Clone)]
pub struct Catalog {
    pub descriptors: Vec<SliceDescriptor>,
    pub skipped: Vec<SkippedItem>,
    /// Header of the first accepted item, used as output template
    pub template: ItemHeader,
    /// Principal axis (0 = x, 1 = y, 2 = z) positions are measured along
    pub axis: usize,
}

impl Catalog {
    /// Read every header through `store` and classify the items
    ///
    /// Headers are read in parallel; classification runs in input order so
    /// the result does not depend on scheduling.
    ///
    /// # Errors
    ///
    /// [`VolumeError::InputEmpty`] when no item was accepted.
    pub fn build<P>(paths: &[P], store: &impl TagStore) -> Result<Self>
    where
        P: AsRef<Path> + Sync,
    {
        let headers: Vec<Result<ItemHeader>> = paths
            .par_iter()
            .map(|path| store.read_header(path.as_ref()))
            .collect();

        let mut builder = CatalogBuilder::default();
        for (source_index, (path, header)) in paths.iter().zip(headers).enumerate() {
            builder.add(source_index, path.as_ref(), header);
        }
        builder.finish()
    }
}

#[derive(Default)]
struct CatalogBuilder {
    descriptors: Vec<SliceDescriptor>,
    skipped: Vec<SkippedItem>,
    template: Option<ItemHeader>,
    reference_axis: Option<usize>,
    enhanced_accepted: bool,
}

impl CatalogBuilder {
    fn add(&mut self, source_index: usize, path: &Path, header: Result<ItemHeader>) {
        let outcome = if self.enhanced_accepted {
            Err(SkipReason::AfterEnhanced)
        } else {
            match header {
                Ok(header) => self.classify(source_index, path, header),
                Err(e) => Err(SkipReason::Unreadable(e.to_string())),
            }
        };

        match outcome {
            Ok((descriptor, header)) => {
                debug!(
                    "Accepted {} at position {:.3}",
                    path.display(),
                    descriptor.position
                );
                self.enhanced_accepted = descriptor.is_enhanced();
                self.template.get_or_insert(header);
                self.descriptors.push(descriptor);
            }
            Err(reason) => {
                warn!("Skipping {}: {reason}", path.display());
                self.skipped.push(SkippedItem {
                    path: path.to_path_buf(),
                    reason,
                });
            }
        }
    }

    fn classify(
        &mut self,
        source_index: usize,
        path: &Path,
        header: ItemHeader,
    ) -> std::result::Result<(SliceDescriptor, ItemHeader), SkipReason> {
        let dataset = &header.dataset;
        if image_type_contains(dataset, &["LOCALIZER", "SCOUT"]) {
            return Err(SkipReason::Localizer);
        }

        let descriptor = if is_enhanced(dataset) {
            self.describe_enhanced(source_index, path, &header)?
        } else {
            self.describe_conventional(source_index, path, &header)?
        };
        Ok((descriptor, header))
    }

    /// Axis of this item, reconciled with the axis of the scan
    fn settle_axis(&mut self, path: &Path, orientation: &[f64; 6]) -> usize {
        let axis = principal_axis(orientation);
        let reference = *self.reference_axis.get_or_insert(axis);
        if axis != reference {
            warn!(
                "{} is oriented along axis {axis}, the scan along axis {reference}",
                path.display()
            );
        }
        reference
    }

    fn describe_conventional(
        &mut self,
        source_index: usize,
        path: &Path,
        header: &ItemHeader,
    ) -> std::result::Result<SliceDescriptor, SkipReason> {
        let dataset = &header.dataset;
        let instance_number = int_value(dataset, tags::INSTANCE_NUMBER);
        let position = vector_value(dataset, tags::IMAGE_POSITION_PATIENT);
        let orientation = orientation_value(dataset, tags::IMAGE_ORIENTATION_PATIENT);
        let axis = orientation
            .as_ref()
            .map(|orientation| self.settle_axis(path, orientation));

        let scalar = match (position, axis) {
            (Some(position), Some(axis)) => Some(position[axis]),
            _ => float_value(dataset, tags::SLICE_LOCATION),
        }
        .or(instance_number.map(f64::from));

        let mut missing = Vec::new();
        if instance_number.is_none() {
            missing.push("InstanceNumber");
        }
        if position.is_none() {
            missing.push("ImagePositionPatient");
        }
        if orientation.is_none() {
            missing.push("ImageOrientationPatient");
        }
        if scalar.is_none() {
            missing.push("slice position");
        }
        let (Some(instance_number), Some(scalar)) = (instance_number, scalar) else {
            return Err(SkipReason::MissingTags(missing));
        };
        if !missing.is_empty() {
            return Err(SkipReason::MissingTags(missing));
        }

        let frame = FrameGeometry {
            position,
            orientation,
            thickness: float_value(dataset, tags::SLICE_THICKNESS),
            rescale: rescale_value(dataset),
            table_position: float_value(dataset, tags::TABLE_POSITION),
        };

        Ok(SliceDescriptor {
            source_index,
            path: path.to_path_buf(),
            position: scalar,
            series_uid: string_value(dataset, tags::SERIES_INSTANCE_UID),
            transfer_syntax: header.transfer_syntax.clone(),
            layout: ContainerLayout::Conventional { instance_number },
            width: dimension(dataset, tags::COLUMNS),
            height: dimension(dataset, tags::ROWS),
            frames: vec![frame],
            pixel_spacing: multi_float_value(dataset, tags::PIXEL_SPACING)
                .and_then(|spacing| spacing_pair(&spacing)),
        })
    }

    fn describe_enhanced(
        &mut self,
        source_index: usize,
        path: &Path,
        header: &ItemHeader,
    ) -> std::result::Result<SliceDescriptor, SkipReason> {
        let dataset = &header.dataset;
        let frame_count = int_value(dataset, tags::NUMBER_OF_FRAMES)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        if frame_count == 0 {
            return Err(SkipReason::EmptyContainer);
        }

        let positions: Vec<Vector3<f64>> = find_recursive(dataset, tags::IMAGE_POSITION_PATIENT)
            .into_iter()
            .filter_map(|value| value.to_multi_float64().ok())
            .filter(|values| values.len() == 3)
            .map(|values| Vector3::from_column_slice(&values))
            .collect();
        let orientations: Vec<[f64; 6]> = find_recursive(dataset, tags::IMAGE_ORIENTATION_PATIENT)
            .into_iter()
            .filter_map(|value| value.to_multi_float64().ok())
            .filter_map(|values| <[f64; 6]>::try_from(values.as_slice()).ok())
            .collect();
        if positions.len() != frame_count || orientations.len() != frame_count {
            return Err(SkipReason::FrameCountMismatch {
                frames: frame_count,
                positions: positions.len(),
                orientations: orientations.len(),
            });
        }

        let axis = self.settle_axis(path, &orientations[0]);
        let thicknesses = per_frame(recursive_floats(dataset, tags::SLICE_THICKNESS), frame_count);
        let slopes = per_frame(recursive_floats(dataset, tags::RESCALE_SLOPE), frame_count);
        let intercepts = per_frame(recursive_floats(dataset, tags::RESCALE_INTERCEPT), frame_count);
        let table_positions = recursive_floats(dataset, tags::TABLE_POSITION);
        let table_positions: Vec<Option<f64>> = if table_positions.len() == frame_count {
            table_positions.into_iter().map(Some).collect()
        } else {
            vec![None; frame_count]
        };

        let frames = (0..frame_count)
            .map(|i| FrameGeometry {
                position: Some(positions[i]),
                orientation: Some(orientations[i]),
                thickness: thicknesses[i],
                rescale: match (slopes[i], intercepts[i]) {
                    (None, None) => None,
                    (slope, intercept) => Some(Rescale {
                        slope: slope.unwrap_or(1.0),
                        intercept: intercept.unwrap_or(0.0),
                    }),
                },
                table_position: table_positions[i],
            })
            .collect();

        info!(
            "{} is a multi-frame container with {frame_count} frames",
            path.display()
        );

        Ok(SliceDescriptor {
            source_index,
            path: path.to_path_buf(),
            position: positions[0][axis],
            series_uid: string_value(dataset, tags::SERIES_INSTANCE_UID),
            transfer_syntax: header.transfer_syntax.clone(),
            layout: ContainerLayout::Enhanced { frame_count },
            width: dimension(dataset, tags::COLUMNS),
            height: dimension(dataset, tags::ROWS),
            frames,
            pixel_spacing: find_recursive(dataset, tags::PIXEL_SPACING)
                .into_iter()
                .find_map(|value| value.to_multi_float64().ok())
                .and_then(|spacing| spacing_pair(&spacing)),
        })
    }

    fn finish(self) -> Result<Catalog> {
        let (Some(template), false) = (self.template, self.descriptors.is_empty()) else {
            return Err(VolumeError::InputEmpty);
        };
        info!(
            "Catalogued {} item(s), skipped {}",
            self.descriptors.len(),
            self.skipped.len()
        );
        Ok(Catalog {
            descriptors: self.descriptors,
            skipped: self.skipped,
            template,
            axis: self.reference_axis.unwrap_or(2),
        })
    }
}

/// Index of the largest-magnitude component of `row × column`; the first
/// one wins on ties
pub fn principal_axis(orientation: &[f64; 6]) -> usize {
    let row = Vector3::new(orientation[0], orientation[1], orientation[2]);
    let column = Vector3::new(orientation[3], orientation[4], orientation[5]);
    let normal = row.cross(&column).abs();
    let mut axis = 0;
    for i in 1..3 {
        if normal[i] > normal[axis] {
            axis = i;
        }
    }
    axis
}

pub(crate) fn is_enhanced(dataset: &InMemDicomObject) -> bool {
    string_value(dataset, tags::SOP_CLASS_UID)
        .is_some_and(|uid| ENHANCED_SOP_CLASSES.contains(&uid.as_str()))
}

/// Whether any Image Type value contains one of `needles`, ignoring case
pub(crate) fn image_type_contains(dataset: &InMemDicomObject, needles: &[&str]) -> bool {
    multi_string_value(dataset, tags::IMAGE_TYPE).is_some_and(|image_type| {
        image_type.iter().any(|entry| {
            let entry = entry.to_ascii_uppercase();
            needles
                .iter()
                .any(|needle| entry.contains(&needle.to_ascii_uppercase()))
        })
    })
}

fn vector_value(dataset: &InMemDicomObject, tag: Tag) -> Option<Vector3<f64>> {
    multi_float_value(dataset, tag)
        .filter(|values| values.len() == 3)
        .map(|values| Vector3::from_column_slice(&values))
}

fn orientation_value(dataset: &InMemDicomObject, tag: Tag) -> Option<[f64; 6]> {
    multi_float_value(dataset, tag).and_then(|values| <[f64; 6]>::try_from(values.as_slice()).ok())
}

fn rescale_value(dataset: &InMemDicomObject) -> Option<Rescale> {
    let slope = float_value(dataset, tags::RESCALE_SLOPE);
    let intercept = float_value(dataset, tags::RESCALE_INTERCEPT);
    if slope.is_none() && intercept.is_none() {
        return None;
    }
    Some(Rescale {
        slope: slope.unwrap_or(1.0),
        intercept: intercept.unwrap_or(0.0),
    })
}

fn dimension(dataset: &InMemDicomObject, tag: Tag) -> usize {
    int_value(dataset, tag)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(0)
}

/// Pixel Spacing is stored as (row step, column step)
fn spacing_pair(spacing: &[f64]) -> Option<(f64, f64)> {
    match spacing {
        [row, column, ..] if *row > 0.0 && *column > 0.0 => Some((*column, *row)),
        _ => None,
    }
}

fn recursive_floats(dataset: &InMemDicomObject, tag: Tag) -> Vec<f64> {
    find_recursive(dataset, tag)
        .into_iter()
        .filter_map(|value| value.to_float64().ok())
        .collect()
}

/// One value per frame when there are exactly enough, else the first value
/// for every frame
fn per_frame(values: Vec<f64>, frame_count: usize) -> Vec<Option<f64>> {
    if values.len() == frame_count {
        return values.into_iter().map(Some).collect();
    }
    vec![values.first().copied(); frame_count]
}

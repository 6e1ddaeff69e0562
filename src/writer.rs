//! Export of a volume as a new single-frame DICOM series.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::tags;
use log::{debug, info};
use nalgebra::Vector3;
use ndarray::Axis;
use uuid::Uuid;

use crate::catalog::{
    ENHANCED_CT_IMAGE_STORAGE, ENHANCED_MR_IMAGE_STORAGE, ENHANCED_PET_IMAGE_STORAGE,
};
use crate::error::{Result, VolumeError};
use crate::tag_store::{ItemHeader, decimal_strings, int_value, string_value};
use crate::volume::{Pose, Volume};

pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
const PET_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.128";

/// Multi-frame bookkeeping that must not survive into single-frame output
const MULTI_FRAME_TAGS: [Tag; 4] = [
    tags::NUMBER_OF_FRAMES,
    tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
    tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
    tags::PIXEL_DATA,
];

/// A fresh UID under the UUID-derived `2.25` root
pub fn generate_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// How the new series is numbered and described
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSettings {
    /// Used as is when set
    pub series_number: Option<i32>,
    pub series_number_offset: i32,
    /// Defaults to 100 for input series numbers below 100, else 10
    pub series_number_multiplier: Option<i32>,
    /// Used as is when set
    pub series_description: Option<String>,
    pub description_prefix: Option<String>,
    /// Defaults to ` (resampled to N slices)`
    pub description_suffix: Option<String>,
}

impl Default for SeriesSettings {
    fn default() -> Self {
        Self {
            series_number: None,
            series_number_offset: 1,
            series_number_multiplier: None,
            series_description: None,
            description_prefix: None,
            description_suffix: None,
        }
    }
}

impl SeriesSettings {
    pub fn series_number(&self, input: Option<i32>) -> i32 {
        if let Some(number) = self.series_number {
            return number;
        }
        let input = input.unwrap_or(0);
        let multiplier = self
            .series_number_multiplier
            .unwrap_or(if input < 100 { 100 } else { 10 });
        input
            .saturating_mul(multiplier)
            .saturating_add(self.series_number_offset)
    }

    pub fn series_description(&self, input: Option<&str>, slice_count: usize) -> String {
        if let Some(description) = &self.series_description {
            return description.clone();
        }
        let suffix = self
            .description_suffix
            .clone()
            .unwrap_or_else(|| format!(" (resampled to {slice_count} slices)"));
        format!(
            "{}{}{suffix}",
            self.description_prefix.as_deref().unwrap_or(""),
            input.unwrap_or("")
        )
    }
}

/// Writes every slice of a volume as one file of a new series
pub struct SeriesWriter<'a> {
    template: &'a ItemHeader,
    series_uid: String,
    series_number: i32,
    series_description: String,
    /// Series Date and Series Time, taken once for every slice
    series_date: String,
    series_time: String,
    input_slices: usize,
}

impl<'a> SeriesWriter<'a> {
    /// Prepare a series derived from `template` with `input_slices` source
    /// slices resampled into `output_slices`
    pub fn new(
        template: &'a ItemHeader,
        settings: &SeriesSettings,
        input_slices: usize,
        output_slices: usize,
    ) -> Self {
        let dataset = &template.dataset;
        let now = Local::now();
        Self {
            template,
            series_uid: generate_uid(),
            series_number: settings.series_number(int_value(dataset, tags::SERIES_NUMBER)),
            series_description: settings.series_description(
                string_value(dataset, tags::SERIES_DESCRIPTION).as_deref(),
                output_slices,
            ),
            series_date: now.format("%Y%m%d").to_string(),
            series_time: now.format("%H%M%S").to_string(),
            input_slices,
        }
    }

    pub fn series_uid(&self) -> &str {
        &self.series_uid
    }

    pub fn series_number(&self) -> i32 {
        self.series_number
    }

    pub fn series_description(&self) -> &str {
        &self.series_description
    }

    /// Write one file per slice into `output_dir`, created if missing
    ///
    /// # Errors
    ///
    /// [`VolumeError::Write`] when a file cannot be encoded or written.
    pub fn write(&self, volume: &Volume, output_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(output_dir).map_err(|e| VolumeError::Write {
            path: output_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        let signed = volume.min_max().is_some_and(|(low, _)| low < 0.0);
        let depth = volume.depth();

        let paths = (0..depth)
            .map(|index| {
                let path = output_dir.join(format!("{}_slice{:04}.dcm", self.series_uid, index + 1));
                self.write_slice(volume, index, signed, &path)?;
                debug!("Wrote {}", path.display());
                Ok(path)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Wrote series {} ({} slices) to {}",
            self.series_number,
            paths.len(),
            output_dir.display()
        );
        Ok(paths)
    }

    fn write_slice(&self, volume: &Volume, index: usize, signed: bool, path: &Path) -> Result<()> {
        let dataset = self.slice_dataset(volume, index, signed);
        let sop_class = string_value(&dataset, tags::SOP_CLASS_UID).unwrap_or_default();
        let sop_instance = string_value(&dataset, tags::SOP_INSTANCE_UID).unwrap_or_default();
        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(sop_class)
            .media_storage_sop_instance_uid(sop_instance);

        let write_error = |reason: String| VolumeError::Write {
            path: path.to_path_buf(),
            reason,
        };
        dataset
            .with_meta(meta)
            .map_err(|e| write_error(e.to_string()))?
            .write_to_file(path)
            .map_err(|e| write_error(e.to_string()))
    }

    fn slice_dataset(&self, volume: &Volume, index: usize, signed: bool) -> InMemDicomObject {
        let mut dataset = self.template.dataset.clone();
        for tag in MULTI_FRAME_TAGS {
            dataset.remove_element(tag);
        }

        let input_series = string_value(&dataset, tags::SERIES_INSTANCE_UID).unwrap_or_default();
        let source_class = string_value(&dataset, tags::SOP_CLASS_UID);
        let sop_class = single_frame_class(source_class.as_deref().unwrap_or(CT_IMAGE_STORAGE));
        let pose = volume
            .poses
            .get(index)
            .copied()
            .unwrap_or_else(|| grid_pose(volume, index));
        let spacing = volume.geometry.spacing;
        let (_, rows, columns) = volume.dim();

        let put_text = |dataset: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str| {
            dataset.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        };
        put_text(&mut dataset, tags::SOP_CLASS_UID, VR::UI, sop_class);
        put_text(&mut dataset, tags::SOP_INSTANCE_UID, VR::UI, &generate_uid());
        put_text(&mut dataset, tags::SERIES_INSTANCE_UID, VR::UI, &self.series_uid);
        put_text(&mut dataset, tags::FRAME_OF_REFERENCE_UID, VR::UI, &input_series);
        put_text(
            &mut dataset,
            tags::SERIES_NUMBER,
            VR::IS,
            &self.series_number.to_string(),
        );
        put_text(
            &mut dataset,
            tags::SERIES_DESCRIPTION,
            VR::LO,
            &self.series_description,
        );
        put_text(&mut dataset, tags::SERIES_DATE, VR::DA, &self.series_date);
        put_text(&mut dataset, tags::SERIES_TIME, VR::TM, &self.series_time);
        put_text(
            &mut dataset,
            tags::INSTANCE_NUMBER,
            VR::IS,
            &(index + 1).to_string(),
        );
        let image_type = [
            "DERIVED".to_string(),
            "SECONDARY".to_string(),
            "INTERPOLATED".to_string(),
            self.input_slices.to_string(),
            volume.depth().to_string(),
        ];
        dataset.put(DataElement::new(
            tags::IMAGE_TYPE,
            VR::CS,
            PrimitiveValue::Strs(image_type.into_iter().collect()),
        ));

        let position = pose.position;
        let geometry = [
            (tags::IMAGE_POSITION_PATIENT, decimal_strings(position.as_slice())),
            (tags::IMAGE_ORIENTATION_PATIENT, decimal_strings(&pose.orientation())),
            (tags::PIXEL_SPACING, decimal_strings(&[spacing.y, spacing.x])),
            (tags::SLICE_THICKNESS, decimal_strings(&[spacing.z])),
            (tags::SPACING_BETWEEN_SLICES, decimal_strings(&[spacing.z])),
            (tags::SLICE_LOCATION, decimal_strings(&[slice_location(&pose)])),
        ];
        for (tag, value) in geometry {
            dataset.put(DataElement::new(tag, VR::DS, value));
        }
        if volume.rescaled {
            dataset.put(DataElement::new(tags::RESCALE_SLOPE, VR::DS, decimal_strings(&[1.0])));
            dataset.put(DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, decimal_strings(&[0.0])));
        }

        let us = |value: u16| PrimitiveValue::from(value);
        dataset.put(DataElement::new(tags::ROWS, VR::US, us(rows as u16)));
        dataset.put(DataElement::new(tags::COLUMNS, VR::US, us(columns as u16)));
        dataset.put(DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, us(1)));
        if string_value(&dataset, tags::PHOTOMETRIC_INTERPRETATION).is_none() {
            put_text(&mut dataset, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2");
        }
        dataset.put(DataElement::new(tags::BITS_ALLOCATED, VR::US, us(16)));
        dataset.put(DataElement::new(tags::BITS_STORED, VR::US, us(16)));
        dataset.put(DataElement::new(tags::HIGH_BIT, VR::US, us(15)));
        dataset.put(DataElement::new(
            tags::PIXEL_REPRESENTATION,
            VR::US,
            us(u16::from(signed)),
        ));

        let slice = volume.data.index_axis(Axis(0), index);
        let samples = slice.iter().map(|&v| stored_sample(v, signed)).collect();
        dataset.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(samples),
        ));
        dataset
    }
}

/// Pose of slice `index` on the volume grid, for volumes without a pose table
fn grid_pose(volume: &Volume, index: usize) -> Pose {
    let geometry = &volume.geometry;
    Pose::new(
        geometry.index_to_world(Vector3::new(0.0, 0.0, index as f64)),
        geometry.direction.column(0).into_owned(),
        geometry.direction.column(1).into_owned(),
    )
}

/// Position of the slice along its own unit normal
fn slice_location(pose: &Pose) -> f64 {
    let normal = pose.normal();
    normal
        .try_normalize(1e-12)
        .map_or(pose.position.z, |normal| pose.position.dot(&normal))
}

/// 16-bit stored word of a sample; signed values keep their two's
/// complement bits
fn stored_sample(value: f32, signed: bool) -> u16 {
    let value = value.round();
    if signed {
        value.clamp(i16::MIN as f32, i16::MAX as f32) as i16 as u16
    } else {
        value.clamp(0.0, u16::MAX as f32) as u16
    }
}

fn single_frame_class(sop_class: &str) -> &str {
    match sop_class {
        ENHANCED_CT_IMAGE_STORAGE => CT_IMAGE_STORAGE,
        ENHANCED_MR_IMAGE_STORAGE => MR_IMAGE_STORAGE,
        ENHANCED_PET_IMAGE_STORAGE => PET_IMAGE_STORAGE,
        other => other,
    }
}

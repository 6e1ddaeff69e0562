//! Synthetic CT series written to disk for the integration tests.

use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use dicom_stack::tag_store::decimal_strings;

pub const ROWS: u16 = 4;
pub const COLUMNS: u16 = 6;

/// One axial slice of a synthetic series
#[derive(Debug, Clone)]
pub struct Slice {
    pub instance: i32,
    pub z: f64,
    pub thickness: f64,
    /// Stored value of every sample
    pub value: u16,
    pub series: &'static str,
}

impl Slice {
    pub fn new(instance: i32, z: f64, thickness: f64, value: u16) -> Self {
        Self {
            instance,
            z,
            thickness,
            value,
            series: "1.2.826.0.1.3680043.2.1143.1",
        }
    }

    fn dataset(&self, sop_instance: &str) -> InMemDicomObject {
        let text = |tag, vr, value: &str| DataElement::new(tag, vr, PrimitiveValue::from(value));
        let us = |tag, value: u16| DataElement::new(tag, VR::US, PrimitiveValue::from(value));
        let samples = vec![self.value; ROWS as usize * COLUMNS as usize];
        InMemDicomObject::from_element_iter([
            text(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE),
            text(tags::SOP_INSTANCE_UID, VR::UI, sop_instance),
            text(tags::MODALITY, VR::CS, "CT"),
            text(tags::SERIES_INSTANCE_UID, VR::UI, self.series),
            text(tags::SERIES_NUMBER, VR::IS, "3"),
            text(tags::SERIES_DESCRIPTION, VR::LO, "Abdomen"),
            DataElement::new(
                tags::IMAGE_TYPE,
                VR::CS,
                PrimitiveValue::Strs(
                    ["ORIGINAL", "PRIMARY", "AXIAL"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
            ),
            text(tags::INSTANCE_NUMBER, VR::IS, &self.instance.to_string()),
            DataElement::new(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                decimal_strings(&[-10.0, -20.0, self.z]),
            ),
            DataElement::new(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                decimal_strings(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ),
            DataElement::new(tags::PIXEL_SPACING, VR::DS, decimal_strings(&[0.5, 0.75])),
            DataElement::new(tags::SLICE_THICKNESS, VR::DS, decimal_strings(&[self.thickness])),
            DataElement::new(tags::RESCALE_SLOPE, VR::DS, decimal_strings(&[1.0])),
            DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, decimal_strings(&[-1024.0])),
            us(tags::ROWS, ROWS),
            us(tags::COLUMNS, COLUMNS),
            us(tags::SAMPLES_PER_PIXEL, 1),
            text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"),
            us(tags::BITS_ALLOCATED, 16),
            us(tags::BITS_STORED, 16),
            us(tags::HIGH_BIT, 15),
            us(tags::PIXEL_REPRESENTATION, 0),
            DataElement::new(tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(samples.into())),
        ])
    }

    /// Write the slice as `slice_<instance>.dcm` under `dir`
    pub fn write(&self, dir: &Path) -> PathBuf {
        let sop_instance = format!("1.2.826.0.1.3680043.2.1143.2.{}", self.instance);
        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_instance.as_str());
        let path = dir.join(format!("slice_{:03}.dcm", self.instance));
        self.dataset(&sop_instance)
            .with_meta(meta)
            .unwrap()
            .write_to_file(&path)
            .unwrap();
        path
    }
}

/// Evenly spaced slices at `spacing` mm, instance numbers from 1
pub fn even_series(count: usize, spacing: f64) -> Vec<Slice> {
    (0..count)
        .map(|i| Slice::new(i as i32 + 1, i as f64 * spacing, spacing, 1000 + i as u16))
        .collect()
}

pub fn write_all(slices: &[Slice], dir: &Path) -> Vec<PathBuf> {
    slices.iter().map(|slice| slice.write(dir)).collect()
}

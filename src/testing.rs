//! Synthetic headers and stacks shared by the unit tests.

use std::path::PathBuf;

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::InMemDicomObject;
use dicom_dictionary_std::{tags, uids};
use nalgebra::Vector3;
use ndarray::Array3;

use crate::catalog::ENHANCED_CT_IMAGE_STORAGE;
use crate::tag_store::{InMemoryStore, ItemHeader, decimal_strings};
use crate::volume::{Pose, PoseTable};

pub(crate) const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub(crate) const AXIAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

pub(crate) fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}

/// Axial poses at the given table heights
pub(crate) fn axial_poses(z: &[f64]) -> PoseTable {
    z.iter()
        .map(|&z| {
            Pose::new(
                Vector3::new(0.0, 0.0, z),
                Vector3::new(1.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
            )
        })
        .collect()
}

fn text(tag: dicom::core::Tag, vr: VR, value: &str) -> DataElement<InMemDicomObject> {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

fn strings(values: &[&str]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|s| s.to_string()).collect())
}

/// One conventional CT slice
#[derive(Debug, Clone)]
pub(crate) struct CtSlice {
    pub instance: Option<i32>,
    pub position: Option<[f64; 3]>,
    pub orientation: [f64; 6],
    pub rows: u16,
    pub columns: u16,
    pub pixel_spacing: [f64; 2],
    pub thickness: Option<f64>,
    pub series: &'static str,
    pub table_position: Option<f64>,
    pub image_type: &'static [&'static str],
    pub rescale: Option<(f64, f64)>,
    pub pixel: f32,
}

impl CtSlice {
    pub fn axial(instance: i32, z: f64) -> Self {
        Self {
            instance: Some(instance),
            position: Some([0.0, 0.0, z]),
            orientation: AXIAL,
            rows: 4,
            columns: 4,
            pixel_spacing: [1.0, 1.0],
            thickness: Some(1.0),
            series: "1.2.3",
            table_position: None,
            image_type: &["ORIGINAL", "PRIMARY", "AXIAL"],
            rescale: None,
            pixel: 0.0,
        }
    }

    pub fn header(&self) -> ItemHeader {
        let mut dataset = InMemDicomObject::from_element_iter([
            text(tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE),
            text(tags::MODALITY, VR::CS, "CT"),
            text(tags::SERIES_INSTANCE_UID, VR::UI, self.series),
            DataElement::new(tags::IMAGE_TYPE, VR::CS, strings(self.image_type)),
            DataElement::new(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                decimal_strings(&self.orientation),
            ),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(self.rows)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(self.columns)),
            DataElement::new(
                tags::PIXEL_SPACING,
                VR::DS,
                decimal_strings(&self.pixel_spacing),
            ),
        ]);
        if let Some(instance) = self.instance {
            dataset.put(text(tags::INSTANCE_NUMBER, VR::IS, &instance.to_string()));
        }
        if let Some(position) = self.position {
            dataset.put(DataElement::new(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                decimal_strings(&position),
            ));
        }
        if let Some(thickness) = self.thickness {
            dataset.put(DataElement::new(
                tags::SLICE_THICKNESS,
                VR::DS,
                decimal_strings(&[thickness]),
            ));
        }
        if let Some(table_position) = self.table_position {
            dataset.put(DataElement::new(
                tags::TABLE_POSITION,
                VR::DS,
                decimal_strings(&[table_position]),
            ));
        }
        if let Some((slope, intercept)) = self.rescale {
            dataset.put(DataElement::new(
                tags::RESCALE_SLOPE,
                VR::DS,
                decimal_strings(&[slope]),
            ));
            dataset.put(DataElement::new(
                tags::RESCALE_INTERCEPT,
                VR::DS,
                decimal_strings(&[intercept]),
            ));
        }
        ItemHeader::new(EXPLICIT_VR_LE, dataset)
    }

    pub fn frames(&self) -> Array3<f32> {
        Array3::from_elem((1, self.rows as usize, self.columns as usize), self.pixel)
    }
}

/// Evenly spaced axial stack, instance numbers from 1
pub(crate) fn axial_stack(z: &[f64]) -> Vec<CtSlice> {
    z.iter()
        .enumerate()
        .map(|(i, &z)| CtSlice::axial(i as i32 + 1, z))
        .collect()
}

/// Register every slice under `slice_NNN.dcm` in input order
pub(crate) fn store_of(slices: &[CtSlice]) -> (InMemoryStore, Vec<PathBuf>) {
    let mut store = InMemoryStore::new();
    let paths = slices
        .iter()
        .enumerate()
        .map(|(i, slice)| {
            let path = PathBuf::from(format!("slice_{i:03}.dcm"));
            store.insert(&path, slice.header(), Some(slice.frames()));
            path
        })
        .collect();
    (store, paths)
}

/// Per-frame values an enhanced container may carry besides its geometry
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FrameExtras {
    pub rescale: Option<(f64, f64)>,
    pub table_position: Option<f64>,
}

fn frame_item(z: f64, thickness: f64, extras: FrameExtras) -> InMemDicomObject {
    let position = InMemDicomObject::from_element_iter([DataElement::new(
        tags::IMAGE_POSITION_PATIENT,
        VR::DS,
        decimal_strings(&[0.0, 0.0, z]),
    )]);
    let orientation = InMemDicomObject::from_element_iter([DataElement::new(
        tags::IMAGE_ORIENTATION_PATIENT,
        VR::DS,
        decimal_strings(&AXIAL),
    )]);
    let measures = InMemDicomObject::from_element_iter([
        DataElement::new(tags::SLICE_THICKNESS, VR::DS, decimal_strings(&[thickness])),
        DataElement::new(tags::PIXEL_SPACING, VR::DS, decimal_strings(&[0.5, 0.5])),
    ]);
    let mut item = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::PLANE_POSITION_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![position]),
        ),
        DataElement::new(
            tags::PLANE_ORIENTATION_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![orientation]),
        ),
        DataElement::new(
            tags::PIXEL_MEASURES_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![measures]),
        ),
    ]);
    if let Some((slope, intercept)) = extras.rescale {
        let transformation = InMemDicomObject::from_element_iter([
            DataElement::new(tags::RESCALE_SLOPE, VR::DS, decimal_strings(&[slope])),
            DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, decimal_strings(&[intercept])),
        ]);
        item.put(DataElement::new(
            tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![transformation]),
        ));
    }
    if let Some(table_position) = extras.table_position {
        let ct_position = InMemDicomObject::from_element_iter([DataElement::new(
            tags::TABLE_POSITION,
            VR::DS,
            decimal_strings(&[table_position]),
        )]);
        item.put(DataElement::new(
            tags::CT_POSITION_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(vec![ct_position]),
        ));
    }
    item
}

/// Enhanced CT container with one per-frame item per entry of `z`
///
/// `declared_frames` overrides Number of Frames to build inconsistent
/// containers.
pub(crate) fn enhanced_header(z: &[f64], thickness: f64, declared_frames: usize) -> ItemHeader {
    let extras = vec![FrameExtras::default(); z.len()];
    enhanced_header_with(z, thickness, declared_frames, &extras)
}

/// Enhanced CT container whose frames also carry `extras`, paired by index
pub(crate) fn enhanced_header_with(
    z: &[f64],
    thickness: f64,
    declared_frames: usize,
    extras: &[FrameExtras],
) -> ItemHeader {
    let frames: Vec<_> = z
        .iter()
        .enumerate()
        .map(|(i, &z)| frame_item(z, thickness, extras.get(i).copied().unwrap_or_default()))
        .collect();
    let dataset = InMemDicomObject::from_element_iter([
        text(tags::SOP_CLASS_UID, VR::UI, ENHANCED_CT_IMAGE_STORAGE),
        text(tags::MODALITY, VR::CS, "CT"),
        text(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.3"),
        text(tags::NUMBER_OF_FRAMES, VR::IS, &declared_frames.to_string()),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(3_u16)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(2_u16)),
        DataElement::new(
            tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(frames),
        ),
    ]);
    ItemHeader::new(EXPLICIT_VR_LE, dataset)
}

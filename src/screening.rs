//! Pre-flight checks run on the first readable header before a series is
//! loaded in full.

use std::path::Path;

use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use log::{debug, warn};

use crate::catalog::image_type_contains;
use crate::error::{Result, VolumeError};
use crate::tag_store::{ItemHeader, TagStore, int_value, string_value};

const VOLUMETRIC_MODALITIES: [&str; 3] = ["CT", "MR", "PT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screening {
    /// Worth loading
    Proceed,
    /// Not a cross-sectional acquisition
    NotVolumetric,
    /// Already has no more slices than requested
    WithinThreshold { slices: usize },
}

fn frame_count(dataset: &InMemDicomObject) -> usize {
    int_value(dataset, tags::NUMBER_OF_FRAMES)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(1)
}

/// Whether the item looks like a slice of a primary cross-sectional scan
pub fn is_volumetric_series(dataset: &InMemDicomObject) -> bool {
    if image_type_contains(dataset, &["LOCALIZER", "SCOUT", "SECONDARY"]) {
        debug!("Image type marks a localizer or derived image");
        return false;
    }
    let modality = string_value(dataset, tags::MODALITY).unwrap_or_default();
    if !VOLUMETRIC_MODALITIES.contains(&modality.as_str()) {
        debug!("Modality {modality:?} is not cross-sectional");
        return false;
    }
    int_value(dataset, tags::INSTANCE_NUMBER).is_some() || frame_count(dataset) > 1
}

/// Whether the series holds more slices than `requested`
///
/// A multi-frame item counts its frames, otherwise every input item is one
/// slice.
pub fn exceeds_slice_threshold(dataset: &InMemDicomObject, item_count: usize, requested: usize) -> bool {
    slice_count(dataset, item_count) > requested
}

fn slice_count(dataset: &InMemDicomObject, item_count: usize) -> usize {
    match frame_count(dataset) {
        frames if frames > 1 => frames,
        _ => item_count,
    }
}

/// Screen the input set through its first readable header
///
/// # Errors
///
/// [`VolumeError::InputEmpty`] for no input, else the read error of the last
/// item when none can be read.
pub fn screen<P>(paths: &[P], store: &impl TagStore, requested: usize) -> Result<Screening>
where
    P: AsRef<Path>,
{
    let mut last_error = None;
    let mut header: Option<ItemHeader> = None;
    for path in paths {
        match store.read_header(path.as_ref()) {
            Ok(found) => {
                header = Some(found);
                break;
            }
            Err(e) => {
                warn!("{e}");
                last_error = Some(e);
            }
        }
    }
    let Some(header) = header else {
        return Err(last_error.unwrap_or(VolumeError::InputEmpty));
    };

    let dataset = &header.dataset;
    if !is_volumetric_series(dataset) {
        return Ok(Screening::NotVolumetric);
    }
    let slices = slice_count(dataset, paths.len());
    if !exceeds_slice_threshold(dataset, paths.len(), requested) {
        return Ok(Screening::WithinThreshold { slices });
    }
    Ok(Screening::Proceed)
}

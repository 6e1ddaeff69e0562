//! Access to per-item DICOM metadata and sample data.
//!
//! The rest of the crate never opens files directly: every header and pixel
//! read goes through a [`TagStore`], so a scan can be assembled from files on
//! disk ([`DicomFileStore`]) or from objects already held in memory
//! ([`InMemoryStore`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::core::header::Header;
use dicom::core::value::{PrimitiveValue, Value};
use dicom::object::{InMemDicomObject, OpenFileOptions, open_file};
use dicom::pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use dicom_dictionary_std::tags;
use ndarray::{Array3, Array4, s};

use crate::error::{Result, VolumeError};

/// Metadata of a single input item, without its pixel data
#[derive(Debug, Clone)]
pub struct ItemHeader {
    pub transfer_syntax: String,
    pub dataset: InMemDicomObject,
}

impl ItemHeader {
    pub fn new(transfer_syntax: impl Into<String>, dataset: InMemDicomObject) -> Self {
        Self {
            transfer_syntax: transfer_syntax.into(),
            dataset,
        }
    }
}

/// Source of DICOM headers and decoded sample frames
pub trait TagStore: Sync {
    /// Read the metadata of `path`, stopping before the pixel data
    fn read_header(&self, path: &Path) -> Result<ItemHeader>;

    /// Read the stored sample values of `path` as `(frames, rows, columns)`
    ///
    /// No modality or VOI LUT is applied; rescaling is the caller's concern.
    fn read_frames(&self, path: &Path) -> Result<Array3<f32>>;
}

/// [`TagStore`] backed by DICOM files on disk
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomFileStore;

impl TagStore for DicomFileStore {
    fn read_header(&self, path: &Path) -> Result<ItemHeader> {
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)
            .map_err(|e| VolumeError::unreadable(path, e))?;
        let transfer_syntax = object
            .meta()
            .transfer_syntax()
            .trim_end_matches('\0')
            .to_string();
        Ok(ItemHeader::new(transfer_syntax, object.into_inner()))
    }

    fn read_frames(&self, path: &Path) -> Result<Array3<f32>> {
        let object = open_file(path).map_err(|e| VolumeError::unreadable(path, e))?;
        let pixel_data = object
            .decode_pixel_data()
            .map_err(|e| VolumeError::unreadable(path, e))?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let samples: Array4<f32> = pixel_data
            .to_ndarray_with_options(&options)
            .map_err(|e| VolumeError::unreadable(path, e))?;

        let channels = samples.dim().3;
        if channels != 1 {
            return Err(VolumeError::UnsupportedSamples {
                path: path.to_path_buf(),
                samples: channels,
            });
        }
        Ok(samples.slice_move(s![.., .., .., 0]))
    }
}

struct MemoryItem {
    header: ItemHeader,
    frames: Option<Array3<f32>>,
}

/// [`TagStore`] over headers and frames that are already decoded
#[derive(Default)]
pub struct InMemoryStore {
    items: HashMap<PathBuf, MemoryItem>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item; `frames` may be omitted for header-only items
    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        header: ItemHeader,
        frames: Option<Array3<f32>>,
    ) {
        self.items
            .insert(path.into(), MemoryItem { header, frames });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn item(&self, path: &Path) -> Result<&MemoryItem> {
        self.items
            .get(path)
            .ok_or_else(|| VolumeError::unreadable(path, "no such item"))
    }
}

impl TagStore for InMemoryStore {
    fn read_header(&self, path: &Path) -> Result<ItemHeader> {
        Ok(self.item(path)?.header.clone())
    }

    fn read_frames(&self, path: &Path) -> Result<Array3<f32>> {
        self.item(path)?
            .frames
            .clone()
            .ok_or_else(|| VolumeError::unreadable(path, "item has no pixel data"))
    }
}

/// Find every primitive value of `tag`, descending into nested sequences
///
/// Matches are returned in depth-first order, so the values found inside the
/// items of a per-frame sequence come out in frame order.
pub fn find_recursive<'a>(dataset: &'a InMemDicomObject, tag: Tag) -> Vec<&'a PrimitiveValue> {
    let mut found = Vec::new();
    collect_recursive(dataset, tag, &mut found);
    found
}

fn collect_recursive<'a>(dataset: &'a InMemDicomObject, tag: Tag, found: &mut Vec<&'a PrimitiveValue>) {
    for element in dataset.iter() {
        match element.value() {
            Value::Sequence(sequence) => {
                for item in sequence.items() {
                    collect_recursive(item, tag, found);
                }
            }
            Value::Primitive(value) if element.tag() == tag => found.push(value),
            _ => {}
        }
    }
}

/// String value of `tag`, trimmed; `None` when absent or empty
pub fn string_value(dataset: &InMemDicomObject, tag: Tag) -> Option<String> {
    dataset
        .element(tag)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|s| trim_value(&s).to_string())
        .filter(|s| !s.is_empty())
}

/// All string values of a multi-valued `tag`
pub fn multi_string_value(dataset: &InMemDicomObject, tag: Tag) -> Option<Vec<String>> {
    dataset
        .element(tag)
        .ok()
        .and_then(|element| element.to_multi_str().ok())
        .map(|values| values.iter().map(|s| trim_value(s).to_string()).collect())
}

/// Strip padding: spaces, and the NUL used by UI values
fn trim_value(value: &str) -> &str {
    value.trim_matches(|c: char| c.is_whitespace() || c == '\0')
}

pub fn int_value(dataset: &InMemDicomObject, tag: Tag) -> Option<i32> {
    dataset
        .element(tag)
        .ok()
        .and_then(|element| element.to_int::<i32>().ok())
}

pub fn float_value(dataset: &InMemDicomObject, tag: Tag) -> Option<f64> {
    dataset
        .element(tag)
        .ok()
        .and_then(|element| element.to_float64().ok())
}

pub fn multi_float_value(dataset: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    dataset
        .element(tag)
        .ok()
        .and_then(|element| element.to_multi_float64().ok())
        .filter(|values| !values.is_empty())
}

/// Decimal string (DS) value holding `values`, each within the 16 character limit
pub fn decimal_strings(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|&v| format_decimal(v)).collect())
}

fn format_decimal(value: f64) -> String {
    let fixed = format!("{value:.6}");
    let fixed = fixed.trim_end_matches('0').trim_end_matches('.');
    let fixed = if fixed == "-0" { "0" } else { fixed };
    if fixed.len() <= 16 {
        fixed.to_string()
    } else {
        format!("{value:.6e}")
    }
}

//! # DICOM-stack library
//!
//! This crate assembles a stack of DICOM slices into one normalised volume.
//!
//! It builds on the dicom-rs ecosystem to read the header of every input
//! item, keeps the slices that belong to a cross-sectional scan and orders
//! them along the scan axis. Both conventional single-frame series and
//! enhanced multi-frame containers are supported. Headers are read in
//! parallel using rayon. A set of items passes into the volume only as a
//! whole: duplicate positions, duplicate or missing instance numbers, mixed
//! in-plane sizes and mixed series reject the entire input.
//!
//! After assembly the volume goes through a fixed chain of stages:
//!  - Orientation: stacks recorded by decreasing table position are reversed
//!  - Gantry tilt: in-plane drift between slices is detected and optionally
//!    shifted back
//!  - Slice thickness: a series mixing thin and double-thickness slices is
//!    merged into the thick spacing
//!
//! The volume can finally be resampled to fewer slices, written out as a new
//! single-frame series or previewed along the three medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//! Assumptions:
//!   - Grayscale data (one sample per pixel)
//!   - One scan per input set (a single Series Instance UID)
//!
//! # Examples
//!
//! ## Resampling a directory of DICOM files
//!
//! Load all DICOM files from the dicom/ directory, reduce the volume to 20
//! slices and save the middle axial slice as an image.
//!
//! ```no_run
//! # use dicom_stack::{Interpolation, Orientation, Pipeline, PipelineOptions, VolumeLoader};
//! # use dicom_stack::pipeline::resample_to_slice_count;
//! # use dicom_stack::tag_store::DicomFileStore;
//! let paths = VolumeLoader::list_directory("dicom").expect("should have listed files");
//! let output = Pipeline::new(PipelineOptions::default())
//!     .run(&paths, &DicomFileStore)
//!     .expect("should have loaded files from directory");
//! let volume = resample_to_slice_count(output.volume, 20, output.report.tilt.correction_needed);
//! let image = volume
//!     .preview_image(volume.depth() / 2, Orientation::Axial, Interpolation::Linear)
//!     .expect("should have returned image at center of volume");
//! image.save("result.png").expect("should have saved the image");
//! ```

pub mod axis;
pub mod catalog;
pub mod cli;
pub mod enums;
pub mod error;
pub mod gantry;
pub mod interpolator;
pub mod normalizer;
pub mod pipeline;
pub mod screening;
pub mod tag_store;
pub mod thickness;
pub mod validator;
pub mod volume;
pub mod volume_loader;
pub mod writer;

#[cfg(test)]
mod testing;

pub use enums::{Interpolation, Orientation, SampleKind, TiltMode};
pub use error::{Result, VolumeError};
pub use pipeline::{Pipeline, PipelineOptions, PipelineOutput, PipelineReport};
pub use volume::{Pose, PoseTable, Volume, VolumeGeometry};
pub use volume_loader::{LoadedVolume, VolumeLoader};

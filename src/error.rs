use std::path::PathBuf;

use thiserror::Error;

use crate::validator::GeometryIssue;

/// Result type for volume assembly operations
pub type Result<T> = std::result::Result<T, VolumeError>;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("No usable DICOM items in the input set")]
    InputEmpty,

    #[error("Could not read {}: {reason}", .path.display())]
    ItemUnreadable { path: PathBuf, reason: String },

    #[error("Inconsistent input set ({} issue(s)): {}", .issues.len(), format_issues(.issues))]
    InconsistentGeometry { issues: Vec<GeometryIssue> },

    #[error("Invalid volume dimensions {depth} x {height} x {width}")]
    VolumeAllocationError {
        depth: usize,
        height: usize,
        width: usize,
    },

    #[error("{} has {samples} samples per pixel, only grayscale is supported", .path.display())]
    UnsupportedSamples { path: PathBuf, samples: usize },

    #[error("Could not write {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

impl VolumeError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        VolumeError::ItemUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

fn format_issues(issues: &[GeometryIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

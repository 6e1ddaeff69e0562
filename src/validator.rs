//! All-or-nothing consistency checks over a catalog.

use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::catalog::{Catalog, SkippedItem, SliceDescriptor};
use crate::error::{Result, VolumeError};
use crate::tag_store::ItemHeader;

/// One reason an input set does not form a single coherent scan
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryIssue {
    #[error("{} and {} share position {position}", .first.display(), .second.display())]
    DuplicatePosition {
        position: f64,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{} belongs to series {found:?}, expected {expected:?}", .path.display())]
    MultipleSeries {
        expected: Option<String>,
        found: Option<String>,
        path: PathBuf,
    },

    #[error("{} and {} share instance number {instance_number}", .first.display(), .second.display())]
    DuplicateInstanceNumber {
        instance_number: i32,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("instance numbers jump from {previous} ({}) to {next} ({})", .first.display(), .second.display())]
    InstanceGap {
        previous: i32,
        next: i32,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("{} is {}x{}, expected {}x{}", .path.display(), .found.0, .found.1, .expected.0, .expected.1)]
    SizeMismatch {
        /// `(width, height)` of the first slice
        expected: (usize, usize),
        found: (usize, usize),
        path: PathBuf,
    },

    #[error("multi-frame container {} is combined with other items", .path.display())]
    MixedContainers { path: PathBuf },
}

/// A catalog that passed every check; descriptors are in position order
#[derive(Debug, Clone)]
pub struct ValidatedCatalog {
    descriptors: Vec<SliceDescriptor>,
    skipped: Vec<SkippedItem>,
    template: ItemHeader,
    axis: usize,
}

impl ValidatedCatalog {
    pub fn descriptors(&self) -> &[SliceDescriptor] {
        &self.descriptors
    }

    pub fn skipped(&self) -> &[SkippedItem] {
        &self.skipped
    }

    pub fn template(&self) -> &ItemHeader {
        &self.template
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn into_parts(self) -> (Vec<SliceDescriptor>, Vec<SkippedItem>, ItemHeader) {
        (self.descriptors, self.skipped, self.template)
    }
}

/// Sort the catalog by position and reject it if any issue is found
///
/// # Errors
///
/// [`VolumeError::InconsistentGeometry`] listing every detected issue.
pub fn validate(catalog: Catalog) -> Result<ValidatedCatalog> {
    let Catalog {
        mut descriptors,
        skipped,
        template,
        axis,
    } = catalog;
    descriptors.sort_by(|a, b| a.position.total_cmp(&b.position));

    let issues = find_issues(&descriptors);
    if !issues.is_empty() {
        for issue in &issues {
            warn!("{issue}");
        }
        return Err(VolumeError::InconsistentGeometry { issues });
    }

    info!("{} slice(s) form a consistent scan", descriptors.len());
    Ok(ValidatedCatalog {
        descriptors,
        skipped,
        template,
        axis,
    })
}

/// Every issue of `descriptors`, which must already be in position order
pub fn find_issues(descriptors: &[SliceDescriptor]) -> Vec<GeometryIssue> {
    let Some(first) = descriptors.first() else {
        return Vec::new();
    };
    let mut issues = Vec::new();

    if descriptors.len() > 1 {
        if let Some(enhanced) = descriptors.iter().find(|d| d.is_enhanced()) {
            issues.push(GeometryIssue::MixedContainers {
                path: enhanced.path.clone(),
            });
        }
    }

    for pair in descriptors.windows(2) {
        if pair[0].position == pair[1].position {
            issues.push(GeometryIssue::DuplicatePosition {
                position: pair[0].position,
                first: pair[0].path.clone(),
                second: pair[1].path.clone(),
            });
        }
    }

    for descriptor in &descriptors[1..] {
        if descriptor.series_uid != first.series_uid {
            issues.push(GeometryIssue::MultipleSeries {
                expected: first.series_uid.clone(),
                found: descriptor.series_uid.clone(),
                path: descriptor.path.clone(),
            });
        }
    }

    issues.extend(instance_issues(descriptors));

    let expected = (first.width, first.height);
    for descriptor in &descriptors[1..] {
        let found = (descriptor.width, descriptor.height);
        if found != expected {
            issues.push(GeometryIssue::SizeMismatch {
                expected,
                found,
                path: descriptor.path.clone(),
            });
        }
    }

    issues
}

/// Duplicates and gaps between neighbours in instance-number order
fn instance_issues(descriptors: &[SliceDescriptor]) -> Vec<GeometryIssue> {
    let mut numbered: Vec<(i32, &Path)> = descriptors
        .iter()
        .filter_map(|d| Some((d.instance_number()?, d.path.as_path())))
        .collect();
    numbered.sort_by_key(|(number, _)| *number);

    numbered
        .windows(2)
        .filter_map(|pair| {
            let ((previous, first), (next, second)) = (pair[0], pair[1]);
            if previous == next {
                Some(GeometryIssue::DuplicateInstanceNumber {
                    instance_number: previous,
                    first: first.to_path_buf(),
                    second: second.to_path_buf(),
                })
            } else if previous.checked_add(1) != Some(next) {
                Some(GeometryIssue::InstanceGap {
                    previous,
                    next,
                    first: first.to_path_buf(),
                    second: second.to_path_buf(),
                })
            } else {
                None
            }
        })
        .collect()
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, info};
use ndarray::{Array3, ArrayView2, ArrayViewMut2, Axis, s};

use crate::catalog::{Catalog, ContainerLayout, FrameGeometry, SkippedItem, SliceDescriptor};
use crate::enums::SampleKind;
use crate::error::{Result, VolumeError};
use crate::normalizer;
use crate::tag_store::{DicomFileStore, ItemHeader, TagStore};
use crate::validator::{ValidatedCatalog, validate};
use crate::volume::{PoseTable, Volume};

/// Samples below this value are raised to it
pub const MIN_SAMPLE_VALUE: f32 = -1024.0;

/// An assembled volume together with what the catalog pass learned
#[derive(Debug, Clone)]
pub struct LoadedVolume {
    pub volume: Volume,
    /// Header of the first accepted item
    pub template: ItemHeader,
    pub skipped: Vec<SkippedItem>,
    /// Whether the stack was reversed into increasing table position
    pub reversed: bool,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Catalog, validate, assemble and orient the items at `paths`
    ///
    /// # Errors
    ///
    /// Returns error if no item is usable, the items do not form one scan or
    /// their pixel data cannot be read
    pub fn load<P>(paths: &[P], store: &impl TagStore, apply_rescale: bool) -> Result<LoadedVolume>
    where
        P: AsRef<Path> + Sync,
    {
        let catalog = Catalog::build(paths, store)?;
        let validated = validate(catalog)?;
        let mut volume = Self::assemble(&validated, store, apply_rescale)?;
        let reversed = normalizer::normalize_orientation(&mut volume);
        let (_, skipped, template) = validated.into_parts();

        Ok(LoadedVolume {
            volume,
            template,
            skipped,
            reversed,
        })
    }

    /// Load a volume from DICOM files on disk
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        apply_rescale: bool,
    ) -> Result<LoadedVolume> {
        Self::load(paths, &DicomFileStore, apply_rescale)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(path: impl AsRef<Path>, apply_rescale: bool) -> Result<LoadedVolume> {
        let paths = Self::list_directory(path)?;
        Self::load_from_file_paths(&paths, apply_rescale)
    }

    /// The `.dcm` files directly inside `path`, sorted by name
    pub fn list_directory(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|s| s.to_str())
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeError::InputEmpty);
        }
        paths.sort();
        Ok(paths)
    }

    /// Stream the validated slices into one buffer and derive its geometry
    ///
    /// # Errors
    ///
    /// [`VolumeError::VolumeAllocationError`] for an empty plane or stack,
    /// [`VolumeError::ItemUnreadable`] when pixel data cannot be read or does
    /// not match the allocated plane.
    pub fn assemble(
        validated: &ValidatedCatalog,
        store: &impl TagStore,
        apply_rescale: bool,
    ) -> Result<Volume> {
        let descriptors = validated.descriptors();
        let first = descriptors.first().ok_or(VolumeError::InputEmpty)?;
        let depth = match first.layout {
            ContainerLayout::Conventional { .. } => descriptors.len(),
            ContainerLayout::Enhanced { frame_count } => frame_count,
        };
        let (height, width) = (first.height, first.width);
        if depth == 0 || height == 0 || width == 0 {
            return Err(VolumeError::VolumeAllocationError {
                depth,
                height,
                width,
            });
        }

        let mut data = Array3::<f32>::zeros((depth, height, width));
        let mut filler = SliceFiller::new(apply_rescale);
        let mut depth_index = 0;
        for descriptor in descriptors {
            let frames = store.read_frames(&descriptor.path)?;
            let frames = Self::check_frames(descriptor, frames, (height, width))?;
            for (frame, geometry) in frames.axis_iter(Axis(0)).zip(&descriptor.frames) {
                filler.fill(data.slice_mut(s![depth_index, .., ..]), frame, geometry);
                depth_index += 1;
            }
            debug!("Read {} frame(s) from {}", descriptor.frames.len(), descriptor.path.display());
        }

        let mut poses = PoseTable::with_capacity(depth);
        let mut thicknesses = Vec::with_capacity(depth);
        let mut table_positions = Vec::new();
        for descriptor in descriptors {
            for frame in &descriptor.frames {
                let pose = frame.pose().ok_or_else(|| {
                    VolumeError::unreadable(&descriptor.path, "missing slice geometry")
                })?;
                poses.push(pose);
                thicknesses.push(frame.thickness);
                table_positions.extend(frame.table_position);
            }
        }
        let in_plane_spacing = first.pixel_spacing.unwrap_or((1.0, 1.0));

        let mut volume = Volume::from_slices(data, poses, in_plane_spacing, thicknesses);
        volume.table_positions = table_positions;
        volume.sample_kind = filler.sample_kind;
        volume.rescaled = filler.rescaled;

        info!(
            "Assembled volume {:?} with spacing ({:.3}, {:.3}, {:.3})",
            volume.dim(),
            volume.geometry.spacing.x,
            volume.geometry.spacing.y,
            volume.geometry.spacing.z
        );
        Ok(volume)
    }

    /// Keep only the frames the descriptor accounts for, all of plane size
    fn check_frames(
        descriptor: &SliceDescriptor,
        frames: Array3<f32>,
        plane: (usize, usize),
    ) -> Result<Array3<f32>> {
        let (count, rows, columns) = frames.dim();
        let expected = descriptor.frames.len();
        if (rows, columns) != plane || count < expected {
            return Err(VolumeError::unreadable(
                &descriptor.path,
                format!(
                    "pixel data is {count}x{rows}x{columns}, expected {expected}x{}x{}",
                    plane.0, plane.1
                ),
            ));
        }
        Ok(frames.slice_move(s![..expected, .., ..]))
    }
}

/// Writes frames into the volume, tracking how rescaling affected values
struct SliceFiller {
    apply_rescale: bool,
    sample_kind: SampleKind,
    rescaled: bool,
}

impl SliceFiller {
    fn new(apply_rescale: bool) -> Self {
        Self {
            apply_rescale,
            sample_kind: SampleKind::Integer,
            rescaled: false,
        }
    }

    fn fill(
        &mut self,
        mut target: ArrayViewMut2<f32>,
        frame: ArrayView2<f32>,
        geometry: &FrameGeometry,
    ) {
        let rescale = match geometry.rescale {
            Some(rescale) if self.apply_rescale => {
                self.rescaled = true;
                if !rescale.is_integral() {
                    self.sample_kind = SampleKind::Float;
                }
                rescale
            }
            _ => Default::default(),
        };
        target.zip_mut_with(&frame, |out, &value| {
            *out = rescale.apply(value).max(MIN_SAMPLE_VALUE);
        });
    }
}

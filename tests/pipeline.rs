mod common;

use dicom_dictionary_std::tags;
use dicom_stack::pipeline::resample_to_slice_count;
use dicom_stack::screening::{Screening, screen};
use dicom_stack::tag_store::{DicomFileStore, TagStore, int_value, string_value};
use dicom_stack::thickness::ThicknessMergeOutcome;
use dicom_stack::writer::{SeriesSettings, SeriesWriter};
use dicom_stack::{Pipeline, PipelineOptions, VolumeError, VolumeLoader};
use nalgebra::Vector3;

use common::{COLUMNS, ROWS, Slice, even_series, write_all};

#[test]
fn directory_loads_into_a_rescaled_volume() {
    let dir = tempfile::tempdir().unwrap();
    write_all(&even_series(6, 2.0), dir.path());

    let loaded = VolumeLoader::load_from_directory(dir.path(), true).unwrap();
    let volume = loaded.volume;
    assert_eq!(volume.dim(), (6, ROWS as usize, COLUMNS as usize));
    assert_eq!(volume.geometry.spacing, Vector3::new(0.75, 0.5, 2.0));
    assert_eq!(volume.geometry.origin, Vector3::new(-10.0, -20.0, 0.0));
    assert!(volume.rescaled);
    assert_eq!(volume.data[[0, 0, 0]], -24.0);
    assert_eq!(volume.data[[5, 3, 5]], -19.0);
    assert!(loaded.skipped.is_empty());
    assert!(!loaded.reversed);
}

#[test]
fn input_order_does_not_matter() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = write_all(&even_series(5, 1.0), dir.path());
    paths.reverse();
    paths.swap(1, 3);

    let volume = VolumeLoader::load_from_file_paths(&paths, false).unwrap().volume;
    let first_column: Vec<f32> = (0..5).map(|z| volume.data[[z, 0, 0]]).collect();
    assert_eq!(first_column, vec![1000.0, 1001.0, 1002.0, 1003.0, 1004.0]);
}

#[test]
fn duplicate_positions_reject_the_whole_set() {
    let dir = tempfile::tempdir().unwrap();
    let mut slices = even_series(4, 1.0);
    slices[2].z = slices[1].z;
    write_all(&slices, dir.path());

    let result = VolumeLoader::load_from_directory(dir.path(), true);
    assert!(matches!(
        result,
        Err(VolumeError::InconsistentGeometry { .. })
    ));
}

#[test]
fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        VolumeLoader::load_from_directory(dir.path(), true),
        Err(VolumeError::InputEmpty)
    ));
}

#[test]
fn half_thickness_series_is_merged_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let z = [0.0, 1.0, 2.0, 3.0, 4.0, 5.5, 7.5, 9.5, 11.5, 13.5];
    let slices: Vec<Slice> = z
        .iter()
        .enumerate()
        .map(|(i, &z)| Slice::new(i as i32 + 1, z, if i < 5 { 1.0 } else { 2.0 }, 1000))
        .collect();
    let paths = write_all(&slices, dir.path());

    let output = Pipeline::new(PipelineOptions::default())
        .run(&paths, &DicomFileStore)
        .unwrap();
    assert_eq!(output.volume.depth(), 8);
    assert!(matches!(
        output.report.thickness,
        Some(ThicknessMergeOutcome::Merged { depth: 8, .. })
    ));
    assert!(output.volume.data.iter().all(|&v| v == -24.0));
}

#[test]
fn screening_reads_the_first_file() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_all(&even_series(4, 1.0), dir.path());
    assert_eq!(
        screen(&paths, &DicomFileStore, 2).unwrap(),
        Screening::Proceed
    );
    assert_eq!(
        screen(&paths, &DicomFileStore, 4).unwrap(),
        Screening::WithinThreshold { slices: 4 }
    );
}

#[test]
fn resampled_series_round_trips_through_disk() {
    let input = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let paths = write_all(&even_series(10, 1.0), input.path());

    let output = Pipeline::new(PipelineOptions::default())
        .run(&paths, &DicomFileStore)
        .unwrap();
    let volume = resample_to_slice_count(output.volume, 4, output.report.tilt.correction_needed);
    assert_eq!(volume.depth(), 4);

    let writer = SeriesWriter::new(&output.template, &SeriesSettings::default(), 10, 4);
    let written = writer.write(&volume, output_dir.path()).unwrap();
    assert_eq!(written.len(), 4);

    let header = DicomFileStore.read_header(&written[0]).unwrap();
    let dataset = &header.dataset;
    assert_eq!(int_value(dataset, tags::SERIES_NUMBER), Some(301));
    assert_eq!(
        string_value(dataset, tags::SERIES_DESCRIPTION).as_deref(),
        Some("Abdomen (resampled to 4 slices)")
    );
    assert_eq!(
        string_value(dataset, tags::SERIES_INSTANCE_UID).as_deref(),
        Some(writer.series_uid())
    );

    let reloaded = VolumeLoader::load_from_directory(output_dir.path(), true)
        .unwrap()
        .volume;
    assert_eq!(reloaded.dim(), volume.dim());
    assert!((reloaded.geometry.spacing.z - 2.5).abs() < 1e-6);
    assert_eq!(reloaded.geometry.spacing.x, 0.75);
    assert_eq!(reloaded.geometry.origin, volume.geometry.origin);
    assert_eq!(reloaded.data, volume.data);
}

//! Snapshot mirrors of sealed segments.

use littdb_core::snapshot::{LOWER_BOUND_FILE, UPPER_BOUND_FILE};
use littdb_core::set_lower_bound;
use littdb_testkit::prelude::*;
use std::fs;
use std::path::Path;

fn linked_segments(dir: &Path) -> Vec<u32> {
    let mut indices: Vec<u32> = fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".metadata")?.parse().ok()
        })
        .collect();
    indices.sort_unstable();
    indices
}

#[test]
fn sealed_segments_are_linked() {
    let snapshot_root = tempfile::tempdir().unwrap();
    let snapshot_path = snapshot_root.path().to_path_buf();
    let fixture = TestDb::with_config(move |config| {
        config.max_segment_key_count(2).snapshot_directory(snapshot_path)
    });
    fixture.db().start().unwrap();

    let table = fixture.get_table("snap").unwrap();
    for i in 0..5u64 {
        table.put(&i.to_le_bytes(), b"v").unwrap();
    }

    let dir = snapshot_root.path().join("snap");
    // Segments 0 and 1 are full; 2 is still active.
    assert_eq!(linked_segments(&dir), vec![0, 1]);
    assert_eq!(fs::read_to_string(dir.join(UPPER_BOUND_FILE)).unwrap(), "1");
    let link = dir.join("0.keys");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert!(!fs::read(&link).unwrap().is_empty());
}

#[test]
fn missing_links_repaired_above_lower_bound() {
    let snapshot_root = tempfile::tempdir().unwrap();
    let snapshot_path = snapshot_root.path().to_path_buf();
    let mut fixture = TestDb::with_config(move |config| {
        config.max_segment_key_count(1).snapshot_directory(snapshot_path)
    });
    fixture.db().start().unwrap();
    {
        let table = fixture.get_table("snap").unwrap();
        for i in 0..4u64 {
            table.put(&i.to_le_bytes(), b"v").unwrap();
        }
    }
    fixture.close();

    let dir = snapshot_root.path().join("snap");
    // The consumer copied and pruned everything up to segment 1.
    for entry in fs::read_dir(&dir).unwrap().filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name != UPPER_BOUND_FILE {
            fs::remove_file(entry.path()).unwrap();
        }
    }
    set_lower_bound(snapshot_root.path(), "snap", 1).unwrap();
    assert!(dir.join(LOWER_BOUND_FILE).exists());

    fixture.restart();
    fixture.get_table("snap").unwrap();
    assert_eq!(linked_segments(&dir), vec![2, 3]);
}

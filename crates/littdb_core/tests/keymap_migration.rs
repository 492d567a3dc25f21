//! Keymap type switches and keymap relocation between roots.

use littdb_core::{DbError, KeymapType};
use littdb_testkit::prelude::*;
use std::fs;

const KEYS: u64 = 150;

fn fill(fixture: &TestDb, table: &str) {
    let table = fixture.get_table(table).unwrap();
    for i in 0..KEYS {
        table.put(&i.to_le_bytes(), &sample_value(i, 40)).unwrap();
    }
}

fn verify(fixture: &TestDb, table: &str) {
    let table = fixture.get_table(table).unwrap();
    for i in 0..KEYS {
        assert_eq!(
            table.get(&i.to_le_bytes()).unwrap().unwrap(),
            sample_value(i, 40),
            "key {i}"
        );
    }
    assert_eq!(table.key_count().unwrap(), KEYS);
}

#[test]
fn every_type_switch_preserves_data() {
    for (from, to) in keymap_type_switches() {
        let mut fixture = TestDb::with_config(|config| config.keymap_type(from));
        fixture.db().start().unwrap();
        fill(&fixture, "m");

        fixture.reopen(|config| config.keymap_type(to));
        fixture.db().start().unwrap();
        verify(&fixture, "m");

        let marker = fixture.roots()[0].join("m/keymap/keymap-type.txt");
        assert_eq!(fs::read_to_string(marker).unwrap(), to.marker(), "{from} -> {to}");
    }
}

#[test]
fn switching_back_and_forth() {
    let mut fixture = TestDb::with_config(|config| config.keymap_type(KeymapType::Redb));
    fixture.db().start().unwrap();
    fill(&fixture, "m");

    for keymap_type in [KeymapType::InMemory, KeymapType::RedbUnsafe, KeymapType::Redb] {
        fixture.reopen(|config| config.keymap_type(keymap_type));
        fixture.db().start().unwrap();
        verify(&fixture, "m");
    }
}

#[test]
fn interrupted_migration_is_redone() {
    let mut fixture = TestDb::with_config(|config| config.keymap_type(KeymapType::Redb));
    fixture.db().start().unwrap();
    fill(&fixture, "m");
    fixture.close();

    // A load that died before finishing leaves no sentinel.
    fs::remove_file(fixture.roots()[0].join("m/keymap/initialized")).unwrap();

    fixture.reopen(|config| config);
    fixture.db().start().unwrap();
    verify(&fixture, "m");
}

#[test]
fn keymap_can_move_between_roots() {
    let mut fixture = TestDb::multi_root(2, |config| config.keymap_type(KeymapType::Redb));
    fixture.db().start().unwrap();
    fill(&fixture, "m");
    fixture.close();

    let roots = fixture.roots().to_vec();
    fs::rename(roots[0].join("m/keymap"), roots[1].join("m/keymap")).unwrap();

    fixture.reopen(|config| config);
    fixture.db().start().unwrap();
    verify(&fixture, "m");
    assert!(roots[1].join("m/keymap/keymap-type.txt").exists());
    assert!(!roots[0].join("m/keymap").exists());
}

#[test]
fn duplicated_keymap_is_rejected() {
    let mut fixture = TestDb::multi_root(2, |config| config.keymap_type(KeymapType::Redb));
    fixture.db().start().unwrap();
    fill(&fixture, "m");
    fixture.close();

    let roots = fixture.roots().to_vec();
    fs::create_dir_all(roots[1].join("m/keymap")).unwrap();

    fixture.reopen(|config| config);
    assert!(matches!(
        fixture.get_table("m"),
        Err(DbError::AmbiguousKeymap { .. })
    ));
}

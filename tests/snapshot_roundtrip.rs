//! Integration test: snapshot export/import through files.

use std::fs::File;
use std::io::{BufReader, Write};

use kolumn::{Collection, CollectionConfig, ColumnKind, Value};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> CollectionConfig {
    CollectionConfig {
        capacity: 2048,
        chunk_size: 256,
        scan_threads: Some(2),
    }
}

fn build() -> Collection {
    let c = Collection::with_config(config()).unwrap();
    c.create_column("race", ColumnKind::Enum).unwrap();
    c.create_column("age", ColumnKind::Float64).unwrap();
    c.create_column("active", ColumnKind::Bool).unwrap();
    c.create_column("meta", ColumnKind::Any).unwrap();
    c.create_index("human", "race", |v: &Value| v == "human").unwrap();
    c.create_index("young", "age", |v: &Value| {
        v.as_f64().map_or(false, |age| age < 20.0)
    })
    .unwrap();

    let races = ["human", "elf", "dwarf", "orc"];
    for i in 0..1000 {
        let mut object = serde_json::json!({
            "race": races[i % races.len()],
            "age": (i % 60) as f64,
            "active": i % 3 == 0,
        });
        if i % 7 == 0 {
            object["meta"] = serde_json::json!({"guild": "north", "rank": i});
        }
        c.insert_object(&object).unwrap();
    }
    c.query(|txn| txn.with_float("age", |v| v > 55.0)?.delete_all())
        .unwrap();
    c
}

fn register(c: &Collection) {
    c.create_column("race", ColumnKind::Enum).unwrap();
    c.create_column("age", ColumnKind::Float64).unwrap();
    c.create_index("human", "race", |v: &Value| v == "human").unwrap();
    c.create_index("young", "age", |v: &Value| {
        v.as_f64().map_or(false, |age| age < 20.0)
    })
    .unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn file_roundtrip_preserves_rows_and_indexes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("players.kls");

    let original = build();
    original.snapshot(File::create(&path).unwrap()).unwrap();
    config().write_to(dir.path()).unwrap();

    let restored_config = CollectionConfig::read_from(dir.path()).unwrap().unwrap();
    let restored = Collection::with_config(restored_config).unwrap();
    register(&restored);
    restored
        .load(BufReader::new(File::open(&path).unwrap()))
        .unwrap();

    assert_eq!(restored.count(), original.count());
    for row in 0..1000 {
        assert_eq!(restored.fetch(row), original.fetch(row), "row {}", row);
    }
    let selectors: [&[&str]; 5] = [&["human"], &["young"], &["human", "young"], &["active"], &["meta"]];
    for selector in selectors {
        let before = original.query(|txn| Ok(txn.with(selector)?.rows())).unwrap();
        let after = restored.query(|txn| Ok(txn.with(selector)?.rows())).unwrap();
        assert_eq!(before, after, "selector {:?}", selector);
    }
}

#[test]
fn restored_collection_keeps_accepting_writes() {
    let original = build();
    let mut bytes = Vec::new();
    original.snapshot(&mut bytes).unwrap();

    let restored = Collection::with_config(config()).unwrap();
    register(&restored);
    restored.load(bytes.as_slice()).unwrap();

    let row = restored
        .insert_object(&serde_json::json!({"race": "human", "age": 10}))
        .unwrap();
    assert_eq!(row, 1000);
    let young_humans = restored
        .query(|txn| Ok(txn.with(&["human", "young"])?.rows()))
        .unwrap();
    assert!(young_humans.contains(&row));

    restored
        .query(|txn| {
            txn.with(&["human"])?.range_column("age", |cursor| {
                cursor.set(50.0)?;
                Ok(true)
            })
        })
        .unwrap();
    let young_humans = restored
        .query(|txn| Ok(txn.with(&["human", "young"])?.count()))
        .unwrap();
    assert_eq!(young_humans, 0);
}

#[test]
fn corrupt_file_leaves_collection_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.kls");

    let mut bytes = Vec::new();
    build().snapshot(&mut bytes).unwrap();
    let mut file = File::create(&path).unwrap();
    file.write_all(&bytes[..bytes.len() / 2]).unwrap();
    drop(file);

    let target = build();
    let before = target.count();
    let err = target.load(File::open(&path).unwrap()).unwrap_err();
    assert_eq!(err.code(), "CORRUPT_SNAPSHOT");
    assert_eq!(target.count(), before);
    assert_eq!(target.indexes(), vec!["human".to_string(), "young".to_string()]);
}

#[test]
fn kind_mismatch_is_corrupt() {
    let mut bytes = Vec::new();
    build().snapshot(&mut bytes).unwrap();

    // First column is "active" (sorted by name): flip its kind byte to float64.
    // Layout: magic(4) version(2) chunk_size(4) chunk_count(4) column_count(4)
    // name_len(4) "active"(6) kind(1).
    let kind_at = 4 + 2 + 4 + 4 + 4 + 4 + "active".len();
    assert_eq!(bytes[kind_at], ColumnKind::Bool as u8);
    bytes[kind_at] = ColumnKind::Float64 as u8;

    let err = Collection::with_config(config())
        .unwrap()
        .load(bytes.as_slice())
        .unwrap_err();
    assert_eq!(err.code(), "CORRUPT_SNAPSHOT");
}

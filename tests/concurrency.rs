//! Integration test: concurrent readers and writers on one collection.
//!
//! Writers insert and run update passes while readers keep querying.
//! Nothing may panic or deadlock, and once all threads join every index
//! must agree with its predicate.

use std::sync::Arc;
use std::thread;

use kolumn::{Collection, CollectionConfig, ColumnKind, Record, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn collection() -> Arc<Collection> {
    let c = Collection::with_config(CollectionConfig {
        capacity: 0,
        chunk_size: 128,
        scan_threads: Some(4),
    })
    .unwrap();
    c.create_column("class", ColumnKind::Enum).unwrap();
    c.create_column("level", ColumnKind::Float64).unwrap();
    c.create_index("mage", "class", |v: &Value| v == "mage").unwrap();
    c.create_index("veteran", "level", |v: &Value| {
        v.as_f64().map_or(false, |level| level >= 50.0)
    })
    .unwrap();
    Arc::new(c)
}

fn record(class: &str, level: f64) -> Record {
    let mut r = Record::new();
    r.insert("class".into(), class.into());
    r.insert("level".into(), level.into());
    r
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn concurrent_inserts_get_unique_rows() {
    let c = collection();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                (0..500)
                    .map(|i| {
                        let class = if (t + i) % 2 == 0 { "mage" } else { "rogue" };
                        c.insert(&record(class, i as f64)).unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut rows: Vec<usize> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    rows.sort_unstable();
    rows.dedup();
    assert_eq!(rows.len(), 4000);
    assert_eq!(c.count(), 4000);

    let mages = c.query(|txn| Ok(txn.with(&["mage"])?.count())).unwrap();
    assert_eq!(mages, 2000);
}

#[test]
fn readers_run_alongside_writers() {
    let c = collection();
    for i in 0..1000 {
        c.insert(&record("mage", (i % 100) as f64)).unwrap();
    }

    let writer = {
        let c = Arc::clone(&c);
        thread::spawn(move || {
            for round in 0..20 {
                c.query(|txn| {
                    txn.with(&["mage"])?.range_column("level", |cursor| {
                        let level = cursor.float64().unwrap_or(0.0);
                        cursor.set((level + round as f64) % 100.0)?;
                        Ok(true)
                    })
                })
                .unwrap();
                c.insert(&record("rogue", 75.0)).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                for _ in 0..50 {
                    let veterans = c
                        .query(|txn| Ok(txn.with(&["veteran"])?.count()))
                        .unwrap();
                    assert!(veterans <= c.count());
                    let scanned = c
                        .query(|txn| Ok(txn.with_float("level", |v| v >= 0.0)?.count()))
                        .unwrap();
                    assert!(scanned >= 1000);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(c.count(), 1020);
    let indexed = c.query(|txn| Ok(txn.with(&["veteran"])?.rows())).unwrap();
    let scanned = c
        .query(|txn| Ok(txn.with_float("level", |v| v >= 50.0)?.rows()))
        .unwrap();
    assert_eq!(indexed, scanned);
}

#[test]
fn create_index_while_inserting() {
    let c = collection();
    let writer = {
        let c = Arc::clone(&c);
        thread::spawn(move || {
            for i in 0..2000 {
                let class = if i % 4 == 0 { "rogue" } else { "mage" };
                c.insert(&record(class, 1.0)).unwrap();
            }
        })
    };
    c.create_index("rogue", "class", |v: &Value| v == "rogue").unwrap();
    writer.join().unwrap();

    let rogues = c.query(|txn| Ok(txn.with(&["rogue"])?.count())).unwrap();
    assert_eq!(rogues, 500);
}

#[test]
fn queries_never_mix_schemas_across_loads() {
    // Same rows in both snapshots; "all" sorts first and shifts the slot
    // of "mage" in the second one.
    let source = collection();
    for i in 0..300 {
        let class = if i % 3 == 0 { "mage" } else { "rogue" };
        source.insert(&record(class, i as f64)).unwrap();
    }
    let mut mage_only = Vec::new();
    source.snapshot(&mut mage_only).unwrap();
    source.create_index("all", "class", |_: &Value| true).unwrap();
    let mut shifted = Vec::new();
    source.snapshot(&mut shifted).unwrap();

    let target = collection();
    target.load(mage_only.as_slice()).unwrap();

    let loader = {
        let target = Arc::clone(&target);
        thread::spawn(move || {
            for round in 0..100 {
                let bytes = if round % 2 == 0 { &shifted } else { &mage_only };
                target.load(bytes.as_slice()).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let target = Arc::clone(&target);
            thread::spawn(move || {
                for _ in 0..200 {
                    let mages = target
                        .query(|txn| Ok(txn.with(&["mage"])?.count()))
                        .unwrap();
                    assert_eq!(mages, 100);
                }
            })
        })
        .collect();

    loader.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

use smallpack::bookkeeping::BookkeepingStore;
use smallpack::StoreOutcome;

use crate::{payload, raw_bin, Fixture, MINUTE};

#[test]
fn test_full_bin_packs_into_one_archive() {
    let fx = Fixture::new(vec![raw_bin(1000, 0 * MINUTE, 60 * MINUTE)]);
    let engine = fx.open();

    let mut bins = Vec::new();
    for i in 0..3 {
        let record = fx.write("raw", &format!("f{}.dat", i), &payload(i, 1200));
        match engine.store_small_file(record).unwrap() {
            StoreOutcome::Enrolled { bin_id } => bins.push(bin_id),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    assert!(bins.windows(2).all(|w| w[0] == w[1]));

    let report = engine.tick().unwrap();

    assert_eq!(report.packed.len(), 1);
    let archive = engine.bookkeeping().archive(report.packed[0]).unwrap().unwrap();
    assert_eq!(archive.archive.manifest.len(), 3);
    assert_eq!(archive.archive.payload_size(), 3600);
    assert_eq!(archive.definition, "raw");
    assert!(engine.bins().bins().is_empty());

    let status = engine.status();
    assert_eq!(status.archives_packed, 1);
    assert_eq!(status.bytes_packed, 3600);
    assert_eq!(status.files_enrolled, 3);

    // Nothing left to do
    assert!(engine.tick().unwrap().is_idle());
}

#[test]
fn test_bin_flushes_once_total_reaches_target() {
    let fx = Fixture::new(vec![raw_bin(1000, 0 * MINUTE, 60 * MINUTE)]);
    let engine = fx.open();

    for i in 0..2 {
        let record = fx.write("raw", &format!("f{}.dat", i), &payload(i, 400));
        engine.store_small_file(record).unwrap();
    }
    assert!(engine.tick().unwrap().packed.is_empty());

    engine
        .store_small_file(fx.write("raw", "f2.dat", &payload(2, 400)))
        .unwrap();
    let report = engine.tick().unwrap();

    assert_eq!(report.packed.len(), 1);
    let archive = engine.bookkeeping().archive(report.packed[0]).unwrap().unwrap();
    assert_eq!(archive.archive.manifest.len(), 3);
    assert_eq!(archive.archive.payload_size(), 1200);
    assert!(engine.bins().bins().is_empty());
}

#[test]
fn test_small_bin_waits_for_max_age() {
    let fx = Fixture::new(vec![raw_bin(1000, 0 * MINUTE, 10 * MINUTE)]);
    let engine = fx.open();

    let record = fx.write("raw", "tiny.dat", &payload(1, 10));
    engine.store_small_file(record.clone()).unwrap();

    assert!(engine.tick().unwrap().packed.is_empty());
    fx.clock.advance(9 * MINUTE);
    assert!(engine.tick().unwrap().packed.is_empty());

    fx.clock.advance(2 * MINUTE);
    let report = engine.tick().unwrap();

    assert_eq!(report.packed.len(), 1);
    assert!(engine.locate(&record.file_id).unwrap().is_some());
}

#[test]
fn test_min_age_holds_back_full_bin() {
    let fx = Fixture::new(vec![raw_bin(100, 5 * MINUTE, 60 * MINUTE)]);
    let engine = fx.open();

    engine
        .store_small_file(fx.write("raw", "a.dat", &payload(1, 200)))
        .unwrap();

    assert!(engine.tick().unwrap().packed.is_empty());
    fx.clock.advance(5 * MINUTE);
    assert_eq!(engine.tick().unwrap().packed.len(), 1);
}

#[test]
fn test_restore_round_trip() {
    let fx = Fixture::new(vec![raw_bin(100, 0 * MINUTE, 60 * MINUTE)]);
    let engine = fx.open();
    let data = payload(7, 4096);
    let record = fx.write("raw", "event.dat", &data);
    engine.store_small_file(record.clone()).unwrap();
    let archive_id = engine.tick().unwrap().packed[0];

    let dest = fx.dir.path().join("restored").join("event.dat");
    let written = engine.restore_small_file(&record.file_id, &dest).unwrap();

    assert_eq!(written, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert_eq!(
        engine.locate(&record.file_id).unwrap().unwrap(),
        format!(
            "osm://smallpack/?store=tape&group=exp1&bfid={}:raw/archive_{:012}.sfa",
            record.file_id, archive_id
        )
    );
}

#[test]
fn test_definitions_fill_separate_bins() {
    let logs = smallpack::matcher::BinDefinition::builder("logs")
        .file_expression(r".*\.log")
        .archive_size(50)
        .archive_path("logs")
        .build()
        .unwrap();
    let fx = Fixture::new(vec![logs, raw_bin(50, 0 * MINUTE, 60 * MINUTE)]);
    let engine = fx.open();

    engine
        .store_small_file(fx.write("raw", "run.log", &payload(1, 60)))
        .unwrap();
    engine
        .store_small_file(fx.write("raw", "run.dat", &payload(2, 60)))
        .unwrap();

    let report = engine.tick().unwrap();
    assert_eq!(report.packed.len(), 2);

    let definitions: Vec<String> = report
        .packed
        .iter()
        .map(|id| engine.bookkeeping().archive(*id).unwrap().unwrap().definition)
        .collect();
    assert!(definitions.contains(&"logs".to_string()));
    assert!(definitions.contains(&"raw".to_string()));
}

#[test]
fn test_packed_file_reports_locator_on_store() {
    let fx = Fixture::new(vec![raw_bin(10, 0 * MINUTE, 60 * MINUTE)]);
    let engine = fx.open();
    let record = fx.write("raw", "a.dat", &payload(1, 20));
    engine.store_small_file(record.clone()).unwrap();
    engine.tick().unwrap();

    match engine.store_small_file(record.clone()).unwrap() {
        StoreOutcome::AlreadyPacked { locator } => {
            assert_eq!(Some(locator), engine.locate(&record.file_id).unwrap());
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_many_bins_pack_in_one_tick() {
    let definitions = (0..5)
        .map(|d| {
            smallpack::matcher::BinDefinition::builder(format!("d{}", d))
                .path_expression(format!(".*/d{}", d))
                .archive_size(100)
                .build()
                .unwrap()
        })
        .collect();
    let fx = Fixture::new(definitions);
    let engine = fx.open();

    for d in 0..5 {
        for i in 0..3 {
            let record = fx.write(&format!("d{}", d), &format!("{}.dat", i), &payload(i, 40));
            engine.store_small_file(record).unwrap();
        }
    }

    let report = engine.tick().unwrap();
    assert_eq!(report.packed.len(), 5);
    assert_eq!(engine.status().files_enrolled, 15);
}

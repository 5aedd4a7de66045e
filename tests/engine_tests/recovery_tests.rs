use std::fs;

use smallpack::bins::BinStateStore;
use smallpack::checksum::ChecksumAlgorithm;
use smallpack::record::EnrolledFile;
use smallpack::StoreOutcome;

use crate::{payload, raw_bin, Fixture, MINUTE};

#[test]
fn test_restart_restores_open_bins() {
    let fx = Fixture::new(vec![raw_bin(10_000, 0 * MINUTE, 30 * MINUTE)]);
    let records: Vec<_> = (0..4)
        .map(|i| fx.write("raw", &format!("{}.dat", i), &payload(i, 100)))
        .collect();

    let bin_id = {
        let engine = fx.open();
        let mut bin_id = 0;
        for record in &records {
            if let StoreOutcome::Enrolled { bin_id: id } =
                engine.store_small_file(record.clone()).unwrap()
            {
                bin_id = id;
            }
        }
        engine.close().unwrap();
        bin_id
    };

    let engine = fx.open();
    let recovery = engine.recovery();
    assert_eq!(recovery.open_bins, 1);
    assert_eq!(recovery.members, 4);
    assert_eq!(engine.bins().snapshot(bin_id).unwrap().size, 400);

    // Age keeps counting from the original creation time
    fx.clock.advance(31 * MINUTE);
    let report = engine.tick().unwrap();
    assert_eq!(report.packed.len(), 1);
    for record in &records {
        assert!(engine.locate(&record.file_id).unwrap().is_some());
    }
}

#[test]
fn test_restart_rebuilds_mid_flush_bin() {
    let fx = Fixture::new(vec![raw_bin(10_000, 0 * MINUTE, 30 * MINUTE)]);
    let record = fx.write("raw", "a.dat", &payload(1, 100));

    {
        let engine = fx.open();
        let bin_id = match engine.store_small_file(record.clone()).unwrap() {
            StoreOutcome::Enrolled { bin_id } => bin_id,
            other => panic!("unexpected outcome {:?}", other),
        };
        engine.bins().begin_flush(bin_id).unwrap();
    }

    let engine = fx.open();
    assert_eq!(engine.recovery().flushing_bins, 1);

    // Not due by size or age, but it was already flushing
    let report = engine.tick().unwrap();
    assert_eq!(report.packed.len(), 1);
    assert!(engine.locate(&record.file_id).unwrap().is_some());
}

#[test]
fn test_restart_keeps_bookkeeping() {
    let fx = Fixture::new(vec![raw_bin(100, 0 * MINUTE, 30 * MINUTE)]);
    let a = fx.write("raw", "a.dat", &payload(1, 150));
    let b = fx.write("raw", "b.dat", &payload(2, 150));

    let first_archive = {
        let engine = fx.open();
        engine.store_small_file(a.clone()).unwrap();
        engine.tick().unwrap().packed[0]
    };

    let engine = fx.open();
    let dest = fx.dir.path().join("a.out");
    engine.restore_small_file(&a.file_id, &dest).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), payload(1, 150));

    engine.store_small_file(b).unwrap();
    let second_archive = engine.tick().unwrap().packed[0];
    assert!(second_archive > first_archive);
}

#[test]
fn test_restart_skips_members_already_packed() {
    let fx = Fixture::new(vec![raw_bin(100, 0 * MINUTE, 30 * MINUTE)]);
    let data = payload(1, 150);
    let record = fx.write("raw", "a.dat", &data);

    {
        let engine = fx.open();
        engine.store_small_file(record.clone()).unwrap();
        engine.tick().unwrap();
    }

    // A bin journal entry that outlived its archive's commit
    {
        let (store, _) =
            BinStateStore::open(&fx.config, fx.clock.clone(), |_| false).unwrap();
        store
            .enroll(
                "raw",
                EnrolledFile {
                    record: record.clone(),
                    size: data.len() as u64,
                    checksum: ChecksumAlgorithm::Crc32.digest(&data),
                    enrolled_at: 0,
                },
            )
            .unwrap();
    }

    let engine = fx.open();
    assert_eq!(engine.recovery().already_packed, 1);
    assert!(engine.bins().bins().is_empty());
    assert!(engine.tick().unwrap().packed.is_empty());
}

#[test]
fn test_open_discards_stale_containers() {
    let fx = Fixture::new(vec![raw_bin(100, 0 * MINUTE, 30 * MINUTE)]);
    let stale = fx.config.container_dir().join("raw").join("archive_000000000009.sfa");
    fs::create_dir_all(stale.parent().unwrap()).unwrap();
    fs::write(&stale, b"half written").unwrap();

    let _engine = fx.open();

    assert!(!stale.exists());
    assert!(fx.config.container_dir().is_dir());
}

#[test]
fn test_deferred_queue_survives_restart() {
    let fx = Fixture::new(vec![raw_bin(100, 0 * MINUTE, 30 * MINUTE)]);
    let record = fx.record("raw", "late.dat");

    {
        let engine = fx.open();
        engine.store_small_file(record.clone()).unwrap();
    }

    fx.write("raw", "late.dat", &payload(4, 200));
    let engine = fx.open();
    assert_eq!(engine.recovery().deferred, 1);

    let report = engine.tick().unwrap();
    assert_eq!(report.deferred_enrolled, 1);
    assert_eq!(report.packed.len(), 1);
}


//! Scenario and property tests for reconciliation

use crate::catalog::{CatalogConnection, CatalogReader, CatalogWriter, SqliteCatalog};
use crate::compression::CompressionTable;
use crate::fingerprint::{collapse_occurrences, ArchiveLocation, DuplicateMap, FileFingerprint, FingerprintMap};
use crate::reconcile::*;
use crate::scanner::{DiskScanner, ScanOptions};
use proptest::prelude::*;
use rstest::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tempfile::TempDir;
use test_case::test_case;

fn fingerprint(name: &str, compression: Option<&str>, path: &str, size: u64) -> FileFingerprint {
    FileFingerprint::new(name, compression.map(str::to_string), path).with_size(size)
}

fn single(fp: FileFingerprint) -> FingerprintMap {
    let mut map = FingerprintMap::new();
    map.insert(fp.logical_name.clone(), fp);
    map
}

fn no_duplicates() -> DuplicateMap {
    DuplicateMap::new()
}

mod scenarios {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_duplicate_on_disk_matching_db_entry_is_equal() {
        let plain = fingerprint("a.fits", None, "x", 10);
        let compressed = fingerprint("a.fits", Some(".fz"), "x", 4);

        let mut occurrences = BTreeMap::new();
        occurrences.insert("a.fits".to_string(), vec![compressed, plain.clone()]);
        let (disk, disk_dups) = collapse_occurrences(occurrences);

        assert_eq!(disk_dups["a.fits"].len(), 2);
        assert_eq!(disk["a.fits"], plain);

        let db = single(fingerprint("a.fits", None, "x", 10));
        let report = compare(&db, &disk, &no_duplicates(), &disk_dups, true, false);

        assert_eq!(report.outcome("a.fits"), Some(ReconciliationOutcome::Equal));
        assert_eq!(report.disk_duplicates["a.fits"].len(), 2);
        assert!(report.has_duplicates());
    }

    #[test]
    fn test_db_only_when_disk_is_empty() {
        let db = single(fingerprint("b.fits", None, "y", 5));
        let report = compare(&db, &FingerprintMap::new(), &no_duplicates(), &no_duplicates(), false, false);

        assert_eq!(report.names_with(ReconciliationOutcome::DbOnly), vec!["b.fits"]);
    }

    #[test]
    fn test_path_wins_over_size() {
        let db = single(fingerprint("a.fits", None, "x", 10));
        let disk = single(fingerprint("a.fits", None, "z", 11));

        let report = compare(&db, &disk, &no_duplicates(), &no_duplicates(), true, true);
        assert_eq!(report.outcome("a.fits"), Some(ReconciliationOutcome::PathMismatch));
    }

    #[test]
    fn test_size_wins_over_hash() {
        let db = single(fingerprint("a.fits", None, "x", 10).with_hash("aaa"));
        let disk = single(fingerprint("a.fits", None, "x", 11).with_hash("bbb"));

        let report = compare(&db, &disk, &no_duplicates(), &no_duplicates(), true, true);
        assert_eq!(report.outcome("a.fits"), Some(ReconciliationOutcome::SizeMismatch));
    }

    #[test]
    fn test_hash_checked_only_when_asked() {
        let db = single(fingerprint("a.fits", None, "x", 10).with_hash("aaa"));
        let disk = single(fingerprint("a.fits", None, "x", 10).with_hash("bbb"));

        let without = compare(&db, &disk, &no_duplicates(), &no_duplicates(), true, false);
        assert_eq!(without.outcome("a.fits"), Some(ReconciliationOutcome::Equal));

        let with = compare(&db, &disk, &no_duplicates(), &no_duplicates(), true, true);
        assert_eq!(with.outcome("a.fits"), Some(ReconciliationOutcome::HashMismatch));
    }

    #[test_case(None, Some(10), ReconciliationOutcome::SizeMismatch; "size unknown in catalog")]
    #[test_case(Some(10), None, ReconciliationOutcome::SizeMismatch; "size unknown on disk")]
    #[test_case(Some(10), Some(10), ReconciliationOutcome::Equal; "size known on both sides")]
    fn test_unknown_size_cannot_be_confirmed(
        db_size: Option<u64>,
        disk_size: Option<u64>,
        expected: ReconciliationOutcome,
    ) {
        let mut db_fp = FileFingerprint::new("a.fits", None, "x");
        db_fp.size_bytes = db_size;
        let mut disk_fp = FileFingerprint::new("a.fits", None, "x");
        disk_fp.size_bytes = disk_size;

        let report = compare(&single(db_fp), &single(disk_fp), &no_duplicates(), &no_duplicates(), true, false);
        assert_eq!(report.outcome("a.fits"), Some(expected));
    }

    #[test]
    fn test_missing_hash_is_a_mismatch() {
        let db = single(fingerprint("a.fits", None, "x", 10));
        let disk = single(fingerprint("a.fits", None, "x", 10).with_hash("abc"));

        let report = compare(&db, &disk, &no_duplicates(), &no_duplicates(), false, true);
        assert_eq!(report.outcome("a.fits"), Some(ReconciliationOutcome::HashMismatch));
    }

    #[test]
    fn test_compression_variant_does_not_affect_path_check() {
        let db = single(fingerprint("a.fits", Some(".fz"), "x", 4));
        let disk = single(fingerprint("a.fits", None, "x", 4));

        let report = compare(&db, &disk, &no_duplicates(), &no_duplicates(), true, false);
        assert_eq!(report.outcome("a.fits"), Some(ReconciliationOutcome::Equal));
    }
}

mod end_to_end {
    use super::*;

    #[fixture]
    fn archive_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("raw/night1")).unwrap();
        fs::create_dir_all(dir.path().join("raw/night2")).unwrap();
        fs::write(dir.path().join("raw/night1/a.fits"), b"0123456789").unwrap();
        fs::write(dir.path().join("raw/night1/b.fits.fz"), b"bbbb").unwrap();
        fs::write(dir.path().join("raw/night2/c.fits"), b"ccc").unwrap();
        fs::write(dir.path().join("raw/night2/new.fits"), b"n").unwrap();
        dir
    }

    fn catalog_for(root: &str) -> SqliteCatalog {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let writer = CatalogWriter::new(&catalog);
        writer.register_archive(&ArchiveLocation::new("home", root)).unwrap();
        for fp in [
            fingerprint("a.fits", None, "raw/night1", 10),
            fingerprint("b.fits", Some(".fz"), "raw/night1", 4),
            fingerprint("c.fits", None, "raw/night1", 3),
            fingerprint("gone.fits", None, "raw/night2", 8),
        ] {
            writer.register_file("home", &fp, None, None).unwrap();
        }
        catalog.commit().unwrap();
        catalog
    }

    #[rstest]
    fn test_catalog_against_scan(archive_tree: TempDir) {
        let root = archive_tree.path();
        let catalog = catalog_for(&root.to_string_lossy());

        let db = CatalogReader::new(&catalog)
            .get_files("home", Some("raw"), None, None)
            .unwrap();
        let disk = DiskScanner::new(ScanOptions::default(), CompressionTable::default())
            .scan(root, "raw")
            .unwrap();

        let report = compare(
            &db.fingerprints,
            &disk.fingerprints,
            &db.duplicates,
            &disk.duplicates,
            true,
            false,
        );

        assert_eq!(report.names_with(ReconciliationOutcome::Equal), vec!["a.fits", "b.fits"]);
        assert_eq!(report.outcome("c.fits"), Some(ReconciliationOutcome::PathMismatch));
        assert_eq!(report.outcome("gone.fits"), Some(ReconciliationOutcome::DbOnly));
        assert_eq!(report.outcome("new.fits"), Some(ReconciliationOutcome::DiskOnly));
        assert!(!report.has_duplicates());

        let summary = report.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.equal + summary.path_mismatch + summary.db_only + summary.disk_only, 5);
    }

    #[rstest]
    fn test_hash_verification_against_scan(archive_tree: TempDir) {
        let root = archive_tree.path();
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let writer = CatalogWriter::new(&catalog);
        writer
            .register_archive(&ArchiveLocation::new("home", root.to_string_lossy()))
            .unwrap();
        let good = fingerprint("a.fits", None, "raw/night1", 10)
            .with_hash("781e5e245d69b566979b86e28d23f2c7");
        let bad = fingerprint("c.fits", None, "raw/night2", 3).with_hash("00000000000000000000000000000000");
        writer.register_file("home", &good, None, None).unwrap();
        writer.register_file("home", &bad, None, None).unwrap();
        catalog.commit().unwrap();

        let db = CatalogReader::new(&catalog)
            .get_files("home", Some("raw"), None, None)
            .unwrap();
        let disk = DiskScanner::new(ScanOptions::default(), CompressionTable::default())
            .scan_with_hash(root, "raw", true)
            .unwrap();

        let report = compare(&db.fingerprints, &disk.fingerprints, &db.duplicates, &disk.duplicates, true, true);
        assert_eq!(report.outcome("a.fits"), Some(ReconciliationOutcome::Equal));
        assert_eq!(report.outcome("c.fits"), Some(ReconciliationOutcome::HashMismatch));
    }
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-e]{1,2}\\.fits"
}

fn fingerprint_strategy() -> impl Strategy<Value = FileFingerprint> {
    (
        name_strategy(),
        prop_oneof![Just(None), Just(Some(".fz".to_string()))],
        prop_oneof![Just("x"), Just("y"), Just("x/")],
        prop::option::of(0u64..4),
        prop::option::of(prop_oneof![Just("h1".to_string()), Just("h2".to_string())]),
    )
        .prop_map(|(name, compression, path, size, hash)| {
            let mut fp = FileFingerprint::new(name, compression, path);
            fp.size_bytes = size;
            fp.content_hash = hash;
            fp
        })
}

fn fingerprint_map_strategy() -> impl Strategy<Value = FingerprintMap> {
    prop::collection::vec(fingerprint_strategy(), 0..12).prop_map(|fps| {
        fps.into_iter()
            .map(|fp| (fp.logical_name.clone(), fp))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_every_name_lands_in_exactly_one_bucket(
        db in fingerprint_map_strategy(),
        disk in fingerprint_map_strategy(),
        check_size in any::<bool>(),
        check_hash in any::<bool>(),
    ) {
        let report = compare(&db, &disk, &DuplicateMap::new(), &DuplicateMap::new(), check_size, check_hash);

        let union: BTreeSet<&String> = db.keys().chain(disk.keys()).collect();
        prop_assert_eq!(report.files.len(), union.len());

        let mut seen = BTreeSet::new();
        for outcome in ReconciliationOutcome::ALL {
            for name in report.names_with(outcome) {
                prop_assert!(seen.insert(name.to_string()), "{} reported twice", name);
            }
        }
        prop_assert_eq!(seen.len(), union.len());
        prop_assert_eq!(report.summary().total, union.len());
    }

    #[test]
    fn prop_path_mismatch_takes_precedence(
        db_fp in fingerprint_strategy(),
        disk_fp in fingerprint_strategy(),
    ) {
        let mut disk_fp = disk_fp;
        disk_fp.logical_name = db_fp.logical_name.clone();

        let outcome = compare(&single(db_fp.clone()), &single(disk_fp.clone()), &DuplicateMap::new(), &DuplicateMap::new(), true, true)
            .outcome(&db_fp.logical_name);

        if !db_fp.same_path(&disk_fp) {
            prop_assert_eq!(outcome, Some(ReconciliationOutcome::PathMismatch));
        } else if db_fp.size_bytes.is_none() || db_fp.size_bytes != disk_fp.size_bytes {
            prop_assert_eq!(outcome, Some(ReconciliationOutcome::SizeMismatch));
        }
    }

    #[test]
    fn prop_compare_is_deterministic(
        db in fingerprint_map_strategy(),
        disk in fingerprint_map_strategy(),
    ) {
        let first = compare(&db, &disk, &DuplicateMap::new(), &DuplicateMap::new(), true, true);
        let second = compare(&db, &disk, &DuplicateMap::new(), &DuplicateMap::new(), true, true);
        prop_assert_eq!(first.files, second.files);
    }

    #[test]
    fn prop_duplicates_keep_every_occurrence(
        fps in prop::collection::vec(fingerprint_strategy(), 0..16),
    ) {
        let mut occurrences: BTreeMap<String, Vec<FileFingerprint>> = BTreeMap::new();
        for fp in &fps {
            occurrences.entry(fp.logical_name.clone()).or_default().push(fp.clone());
        }
        let counts: BTreeMap<String, usize> = occurrences.iter().map(|(k, v)| (k.clone(), v.len())).collect();

        let (representatives, duplicates) = collapse_occurrences(occurrences);

        for (name, count) in counts {
            prop_assert!(representatives.contains_key(&name));
            if count > 1 {
                prop_assert_eq!(duplicates[&name].len(), count);
                prop_assert!(duplicates[&name].contains(&representatives[&name]));
            } else {
                prop_assert!(!duplicates.contains_key(&name));
            }
        }
    }

    #[test]
    fn prop_split_then_join_restores_filename(
        stem in "[a-z0-9_]{1,8}(\\.fits)?",
        suffix in prop_oneof![Just(""), Just(".fz"), Just(".gz"), Just(".bz2")],
    ) {
        let table = CompressionTable::default();
        let filename = format!("{}{}", stem, suffix);

        let (logical, compression) = table.split(&filename);
        prop_assert_eq!(CompressionTable::join(&logical, compression.as_deref()), filename);
        prop_assert_eq!(compression.is_some(), !suffix.is_empty());
    }
}

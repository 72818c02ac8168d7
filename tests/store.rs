use std::fs::{self, File};
use std::time::{Duration, SystemTime};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use unsd_sync::domain::{Dataset, EmissionObservation, EnergyObservation};
use unsd_sync::error::SyncError;
use unsd_sync::store::SnapshotStore;

fn temp_store() -> (tempfile::TempDir, SnapshotStore) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("data_files")).unwrap();
    (dir, SnapshotStore::new(root))
}

fn set_age(store: &SnapshotStore, dataset: Dataset, now: SystemTime, age: Duration) {
    let file = File::options()
        .write(true)
        .open(store.path(dataset).as_std_path())
        .unwrap();
    file.set_modified(now - age).unwrap();
}

#[test]
fn snapshot_write_replaces_previous_contents() {
    let (_dir, store) = temp_store();
    let first = vec![EnergyObservation {
        ref_area: "USA".to_string(),
        commodity: "Electricity".to_string(),
        transaction: "Final consumption, other".to_string(),
        time_period: 2019,
        value: 10.5,
    }];
    store.write(&first).unwrap();
    assert_eq!(store.read::<EnergyObservation>().unwrap(), first);

    store.write::<EnergyObservation>(&[]).unwrap();
    assert!(store.read::<EnergyObservation>().unwrap().is_empty());
    let content = fs::read_to_string(store.path(Dataset::Ebal).as_std_path()).unwrap();
    assert_eq!(content, "REF_AREA,COMMODITY,TRANSACTION,TIME_PERIOD,value\n");

    let leftovers: Vec<_> = fs::read_dir(store.root().as_std_path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn missing_snapshot_is_not_found() {
    let (_dir, store) = temp_store();
    assert!(!store.all_present());
    assert_matches!(
        store.read::<EmissionObservation>(),
        Err(SyncError::SnapshotNotFound(_))
    );
    assert_matches!(
        store.age(Dataset::Unfcc, SystemTime::now()),
        Err(SyncError::SnapshotNotFound(_))
    );
}

#[test]
fn corrupt_snapshot_is_a_format_error() {
    let (_dir, store) = temp_store();
    store.ensure_root().unwrap();
    fs::write(
        store.path(Dataset::Unfcc).as_std_path(),
        "REF_AREA,INDICATOR,TIME_PERIOD,value\nAUS,X,not-a-year,1\n",
    )
    .unwrap();
    assert_matches!(
        store.read::<EmissionObservation>(),
        Err(SyncError::SnapshotFormat { .. })
    );
}

#[test]
fn oldest_snapshot_sets_the_age() {
    let (_dir, store) = temp_store();
    store.write::<EnergyObservation>(&[]).unwrap();
    store.write::<EmissionObservation>(&[]).unwrap();
    assert!(store.all_present());

    let now = SystemTime::now();
    set_age(&store, Dataset::Ebal, now, Duration::from_secs(100));
    set_age(&store, Dataset::Unfcc, now, Duration::from_secs(4000));
    assert_eq!(store.oldest_age(now).unwrap().as_secs(), 4000);

    let status = store.status(now);
    assert_eq!(status.len(), 2);
    let ebal = status
        .iter()
        .find(|entry| entry.dataset == Dataset::Ebal)
        .unwrap();
    assert!(ebal.exists);
    assert_eq!(ebal.age_secs, Some(100));
    assert_eq!(ebal.rows, Some(0));
}

#[test]
fn future_modification_time_counts_as_fresh() {
    let (_dir, store) = temp_store();
    store.write::<EnergyObservation>(&[]).unwrap();
    let now = SystemTime::now() - Duration::from_secs(60);
    assert_eq!(store.age(Dataset::Ebal, now).unwrap(), Duration::ZERO);
}

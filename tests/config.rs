use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use unsd_sync::config::{Config, ConfigLoader, ENV_DATA_DIR, ENV_MONGO_URI, RetryEntry};
use unsd_sync::domain::UpsertStrategy;
use unsd_sync::error::SyncError;

#[test]
fn explicit_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unsd-sync.json");
    fs::write(
        &path,
        r#"{
  "mongo_uri": "mongodb://db.internal:27017",
  "database": "energy",
  "data_dir": "/var/lib/unsd",
  "api_base_url": "https://example.org/ws/rest/",
  "tick_interval_secs": 30,
  "staleness_secs": 7200,
  "strategy": "incremental",
  "insert_batch_size": 500,
  "retry": { "max_attempts": 2, "backoff_secs": 0 },
  "http_retries": 1,
  "http_retry_delay_ms": 50
}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.database, "energy");
    assert_eq!(resolved.data_dir, Utf8PathBuf::from("/var/lib/unsd"));
    assert_eq!(resolved.api_base_url, "https://example.org/ws/rest");
    assert_eq!(resolved.tick_interval, Duration::from_secs(30));
    assert_eq!(resolved.staleness, Duration::from_secs(7200));
    assert_eq!(resolved.strategy, UpsertStrategy::Incremental);
    assert_eq!(resolved.insert_batch_size, 500);
    assert_eq!(resolved.retry.max_attempts, 2);
    assert_eq!(resolved.retry.backoff, Duration::ZERO);
    assert_eq!(resolved.retry.escalate_after, 5);
    assert_eq!(resolved.http_retry.retries, 1);
    assert_eq!(resolved.http_retry.delay(2), Duration::from_millis(100));
}

#[test]
fn explicit_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, SyncError::ConfigRead(_));
}

#[test]
fn unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unsd-sync.json");
    fs::write(&path, r#"{ "staleness": 10 }"#).unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, SyncError::ConfigParse(_));
}

#[test]
fn zero_intervals_are_invalid() {
    let config = Config {
        staleness_secs: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(SyncError::InvalidConfig(_))
    );

    let config = Config {
        retry: Some(RetryEntry {
            max_attempts: Some(0),
            ..RetryEntry::default()
        }),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(SyncError::InvalidConfig(_))
    );
}

#[test]
fn environment_overrides_file_values() {
    let mut resolved = ConfigLoader::resolve_config(Config {
        mongo_uri: Some("mongodb://file:27017".to_string()),
        ..Config::default()
    })
    .unwrap();

    ConfigLoader::apply_env(&mut resolved, |key| match key {
        ENV_MONGO_URI => Some("mongodb://env:27017".to_string()),
        ENV_DATA_DIR => Some("  ".to_string()),
        _ => None,
    });

    assert_eq!(resolved.mongo_uri, "mongodb://env:27017");
    assert_ne!(resolved.data_dir, Utf8PathBuf::from(""));
}

#[test]
fn log_file_parent_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = Utf8PathBuf::from_path_buf(dir.path().join("logs").join("unsd-sync.log")).unwrap();
    let resolved = ConfigLoader::resolve_config(Config {
        log_file: Some(log_path.to_string()),
        ..Config::default()
    })
    .unwrap();

    let file = resolved.open_log_file().unwrap();
    assert!(file.is_some());
    assert!(log_path.as_std_path().is_file());

    let without = ConfigLoader::resolve_config(Config::default()).unwrap();
    assert!(without.open_log_file().unwrap().is_none());
}

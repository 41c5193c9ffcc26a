//! Recovery tests for the durable inventory.
//!
//! These tests verify that:
//! - a reopened inventory serves exactly what was committed
//! - a torn or corrupt final commit is dropped whole on replay
//! - ids keep increasing across restarts

#![cfg(feature = "persistent")]

use std::fs;
use std::sync::Arc;

use hostrecon::{
    open_inventory, DomainAssetRecord, EngineConfig, HostId, HostRecord, InventoryEngine,
    PersistentConfig,
};
use tempfile::tempdir;

const WAL_FILE: &str = "inventory.wal";

fn open(dir: &std::path::Path) -> InventoryEngine {
    let store = open_inventory(
        dir,
        Some(PersistentConfig {
            sync_on_write: false,
            ..PersistentConfig::default()
        }),
    )
    .unwrap();
    InventoryEngine::new(Arc::new(store), EngineConfig::default()).unwrap()
}

fn host(address: &str, hostname: &str) -> HostRecord {
    HostRecord {
        hostname: Some(hostname.to_string()),
        ..HostRecord::new(address)
    }
}

#[test]
fn reopened_inventory_matches_what_was_committed() {
    let dir = tempdir().unwrap();
    let (hosts, assets) = {
        let engine = open(dir.path());
        engine.register_user("alice").unwrap();
        let mut record = host("10.0.0.1", "web01");
        record.owner_name = Some("alice".to_string());
        record.domain_assets = Some(vec![DomainAssetRecord {
            hostname: "web01".to_string(),
            domain_name: Some("corp.local".to_string()),
            ..DomainAssetRecord::default()
        }]);
        engine.submit_hosts(vec![record, host("10.0.0.2", "db01")]).unwrap();
        engine
            .submit_hosts(vec![host("10.0.0.2", "db01-renamed")])
            .unwrap();
        (
            engine.list_hosts().unwrap(),
            engine.list_domain_assets().unwrap(),
        )
    };

    let engine = open(dir.path());
    assert_eq!(engine.list_hosts().unwrap(), hosts);
    assert_eq!(engine.list_domain_assets().unwrap(), assets);
    assert_eq!(hosts[0].owner_name.as_deref(), Some("alice"));
}

#[test]
fn torn_final_commit_is_dropped_whole() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(WAL_FILE);
    let good_len = {
        let engine = open(dir.path());
        engine.submit_hosts(vec![host("10.0.0.1", "a")]).unwrap();
        let good_len = fs::metadata(&wal_path).unwrap().len();
        engine
            .submit_hosts(vec![host("10.0.0.2", "b"), host("10.0.0.3", "c")])
            .unwrap();
        good_len
    };

    // Simulate a crash in the middle of writing the second commit.
    let file = fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
    let full_len = file.metadata().unwrap().len();
    file.set_len(good_len + (full_len - good_len) / 2).unwrap();
    drop(file);

    let engine = open(dir.path());
    let hosts = engine.list_hosts().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].address, "10.0.0.1");
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), good_len);

    // The log accepts new commits after the cut.
    engine.submit_hosts(vec![host("10.0.0.4", "d")]).unwrap();
    drop(engine);
    assert_eq!(open(dir.path()).list_hosts().unwrap().len(), 2);
}

#[test]
fn corrupt_checksum_drops_the_commit() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(WAL_FILE);
    {
        let engine = open(dir.path());
        engine.submit_hosts(vec![host("10.0.0.1", "a")]).unwrap();
        engine.submit_hosts(vec![host("10.0.0.2", "b")]).unwrap();
    }

    // Flip a bit in the CRC of the last frame.
    let mut bytes = fs::read(&wal_path).unwrap();
    if let Some(last) = bytes.last_mut() {
        *last ^= 0x01;
    }
    fs::write(&wal_path, &bytes).unwrap();

    let engine = open(dir.path());
    let hosts = engine.list_hosts().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].address, "10.0.0.1");
}

#[test]
fn ids_keep_increasing_across_restarts() {
    let dir = tempdir().unwrap();
    {
        let engine = open(dir.path());
        engine
            .submit_hosts(vec![host("10.0.0.1", "a"), host("10.0.0.2", "b")])
            .unwrap();
        assert_eq!(engine.delete_all_hosts().unwrap(), 2);
    }

    let engine = open(dir.path());
    assert!(engine.list_hosts().unwrap().is_empty());
    let report = engine.submit_hosts(vec![host("10.0.0.1", "a")]).unwrap();
    assert_eq!(report.outcomes[0].host_id(), Some(HostId::new(3)));
}

#[test]
fn second_open_of_a_locked_directory_fails() {
    let dir = tempdir().unwrap();
    let _engine = open(dir.path());
    assert!(open_inventory(dir.path(), None).is_err());
}

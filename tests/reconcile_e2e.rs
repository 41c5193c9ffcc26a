use std::collections::BTreeSet;
use std::time::Duration;

use hostrecon::{
    BatchPolicy, DomainAssetRecord, EngineConfig, EventPayload, ExecutionError, HostId,
    HostRecord, InventoryEngine, MergeOutcome, ReconError, RecordOutcome, ServiceMergeMode,
    ServiceRecord, ValidationError,
};

fn engine_with(config: EngineConfig) -> InventoryEngine {
    InventoryEngine::in_memory(config).unwrap()
}

fn engine() -> InventoryEngine {
    engine_with(EngineConfig::default())
}

fn host(address: &str, hostname: &str) -> HostRecord {
    HostRecord {
        hostname: Some(hostname.to_string()),
        ..HostRecord::new(address)
    }
}

fn service(port: u16, name: &str) -> ServiceRecord {
    ServiceRecord {
        port,
        protocol: Some("tcp".to_string()),
        state: Some("open".to_string()),
        name: Some(name.to_string()),
        ..ServiceRecord::default()
    }
}

fn asset(hostname: &str, domain: Option<&str>, address: Option<&str>) -> DomainAssetRecord {
    DomainAssetRecord {
        hostname: hostname.to_string(),
        domain_name: domain.map(str::to_string),
        address: address.map(str::to_string),
        ..DomainAssetRecord::default()
    }
}

fn find<'a>(hosts: &'a [HostRecord], address: &str) -> &'a HostRecord {
    hosts
        .iter()
        .find(|h| h.address == address)
        .unwrap_or_else(|| panic!("no host {address}"))
}

#[test]
fn matched_only_batch_drops_unmatched_records() {
    let engine = engine_with(EngineConfig {
        batch_policy: BatchPolicy::MatchedOnly,
        ..EngineConfig::default()
    });
    engine.submit_hosts(vec![host("10.0.0.1", "old")]).unwrap();

    let changes = engine.subscribe().unwrap();
    let report = engine
        .submit_hosts(vec![host("10.0.0.1", "new"), host("10.0.0.2", "fresh")])
        .unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(report.dropped(), 1);
    assert_eq!(
        report.outcomes[1],
        RecordOutcome::Dropped {
            address: "10.0.0.2".to_string()
        }
    );

    let hosts = engine.list_hosts().unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].hostname.as_deref(), Some("new"));

    let event = changes.recv_timeout(Duration::from_secs(2)).unwrap();
    let EventPayload::HostsUpgraded { records } = event.payload else {
        panic!("expected an upgraded event, got {:?}", event.payload);
    };
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].address, "10.0.0.1");
    assert_eq!(records[0].hostname.as_deref(), Some("new"));
    assert!(changes.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn matched_only_batch_without_matches_inserts_all() {
    let engine = engine_with(EngineConfig {
        batch_policy: BatchPolicy::MatchedOnly,
        ..EngineConfig::default()
    });
    let changes = engine.subscribe().unwrap();

    let report = engine
        .submit_hosts(vec![host("10.0.0.1", "a"), host("10.0.0.2", "b")])
        .unwrap();
    assert_eq!(report.inserted(), 2);

    let event = changes.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(event.payload, EventPayload::HostsAdded);
    assert_eq!(event.commit_sequence, report.commit_sequence);
    assert!(changes.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn per_record_batch_merges_and_inserts() {
    let engine = engine();
    engine.submit_hosts(vec![host("10.0.0.1", "old")]).unwrap();

    let changes = engine.subscribe().unwrap();
    let report = engine
        .submit_hosts(vec![host("10.0.0.1", "new"), host("10.0.0.2", "fresh")])
        .unwrap();
    assert_eq!(report.updated(), 1);
    assert_eq!(report.inserted(), 1);
    assert_eq!(report.dropped(), 0);

    let hosts = engine.list_hosts().unwrap();
    assert_eq!(hosts.len(), 2);
    assert_eq!(find(&hosts, "10.0.0.1").hostname.as_deref(), Some("new"));
    assert_eq!(find(&hosts, "10.0.0.2").hostname.as_deref(), Some("fresh"));

    let first = changes.recv_timeout(Duration::from_secs(2)).unwrap();
    let EventPayload::HostsUpgraded { records } = first.payload else {
        panic!("expected an upgraded event first");
    };
    assert_eq!(records.len(), 1);
    let second = changes.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(second.payload, EventPayload::HostsAdded);
    assert_eq!(first.commit_sequence, second.commit_sequence);
}

#[test]
fn blank_hostname_never_clobbers() {
    let engine = engine();
    engine.submit_hosts(vec![host("10.0.0.1", "web01")]).unwrap();

    let mut rescan = host("10.0.0.1", "  ");
    rescan.state = Some("down".to_string());
    engine.submit_hosts(vec![rescan]).unwrap();
    engine.submit_hosts(vec![HostRecord::new("10.0.0.1")]).unwrap();

    let hosts = engine.list_hosts().unwrap();
    assert_eq!(hosts[0].hostname.as_deref(), Some("web01"));
    // State is always taken from the latest record.
    assert_eq!(hosts[0].state, None);
}

#[test]
fn service_diff_preserves_identity_of_kept_services() {
    let engine = engine();
    let mut first = host("10.0.0.1", "a");
    first.services = vec![service(22, "ssh"), service(80, "http")];
    engine.submit_hosts(vec![first]).unwrap();
    let before = engine.list_hosts().unwrap().remove(0);
    let http_id = before.services.iter().find(|s| s.port == 80).unwrap().id;

    let mut second = host("10.0.0.1", "a");
    second.services = vec![service(80, "http"), service(443, "https")];
    engine.submit_hosts(vec![second]).unwrap();

    let after = engine.list_hosts().unwrap().remove(0);
    let ports: BTreeSet<u16> = after.services.iter().map(|s| s.port).collect();
    assert_eq!(ports, BTreeSet::from([80, 443]));
    assert_eq!(after.services.iter().find(|s| s.port == 80).unwrap().id, http_id);
}

#[test]
fn service_replace_mode_recreates_services() {
    let engine = engine_with(EngineConfig {
        service_merge: ServiceMergeMode::Replace,
        ..EngineConfig::default()
    });
    let mut first = host("10.0.0.1", "a");
    first.services = vec![service(22, "ssh"), service(80, "http")];
    engine.submit_hosts(vec![first]).unwrap();
    let before = engine.list_hosts().unwrap().remove(0);
    let http_id = before.services.iter().find(|s| s.port == 80).unwrap().id;

    let mut second = host("10.0.0.1", "a");
    second.services = vec![service(80, "http"), service(443, "https")];
    engine.submit_hosts(vec![second]).unwrap();

    let after = engine.list_hosts().unwrap().remove(0);
    let ports: BTreeSet<u16> = after.services.iter().map(|s| s.port).collect();
    assert_eq!(ports, BTreeSet::from([80, 443]));
    assert_ne!(after.services.iter().find(|s| s.port == 80).unwrap().id, http_id);
}

#[test]
fn resubmitting_a_batch_is_idempotent() {
    let engine = engine();
    let mut record = host("10.0.0.1", "a");
    record.services = vec![service(22, "ssh")];
    record.domain_assets = Some(vec![asset("ws1", Some("corp.local"), None)]);
    let batch = vec![record, host("10.0.0.2", "b")];

    engine.submit_hosts(batch.clone()).unwrap();
    let first_hosts = engine.list_hosts().unwrap();
    let first_assets = engine.list_domain_assets().unwrap();

    let report = engine.submit_hosts(batch).unwrap();
    assert_eq!(report.unchanged(), 2);
    assert_eq!(engine.list_hosts().unwrap(), first_hosts);
    assert_eq!(engine.list_domain_assets().unwrap(), first_assets);
}

#[test]
fn domain_asset_links_to_host_by_address() {
    let engine = engine();
    let filler: Vec<HostRecord> = (1..=6)
        .map(|i| host(&format!("10.0.1.{i}"), &format!("filler{i}")))
        .collect();
    engine.submit_hosts(filler).unwrap();
    engine.submit_hosts(vec![host("10.0.0.5", "dc1")]).unwrap();
    assert_eq!(
        find(&engine.list_hosts().unwrap(), "10.0.0.5").id,
        Some(HostId::new(7))
    );

    let report = engine
        .submit_domain_assets(vec![asset("dc1", Some("corp.local"), Some("10.0.0.5"))])
        .unwrap();
    assert_eq!(report.outcomes[0].outcome, MergeOutcome::Inserted);
    assert_eq!(report.outcomes[0].host_id, Some(HostId::new(7)));

    let hosts = engine.list_hosts().unwrap();
    let linked = find(&hosts, "10.0.0.5").domain_assets.as_deref().unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].hostname, "dc1");
}

#[test]
fn linkage_is_reevaluated_on_every_merge() {
    let engine = engine();
    engine
        .submit_hosts(vec![host("10.0.0.5", "a"), host("10.0.0.6", "b")])
        .unwrap();

    let report = engine
        .submit_domain_assets(vec![asset("dc1", Some("corp.local"), Some("10.0.0.5"))])
        .unwrap();
    assert_eq!(report.outcomes[0].host_id, Some(HostId::new(1)));

    // The asset moved.
    let report = engine
        .submit_domain_assets(vec![asset("dc1", Some("corp.local"), Some("10.0.0.6"))])
        .unwrap();
    assert_eq!(report.outcomes[0].outcome, MergeOutcome::Updated);
    assert_eq!(report.outcomes[0].host_id, Some(HostId::new(2)));

    // No address and no explicit host: unlinked.
    let report = engine
        .submit_domain_assets(vec![asset("dc1", Some("corp.local"), Some("   "))])
        .unwrap();
    assert_eq!(report.outcomes[0].host_id, None);

    // An explicit host id wins over the address.
    let mut explicit = asset("dc1", Some("corp.local"), Some("10.0.0.6"));
    explicit.host_id = Some(HostId::new(1));
    let report = engine.submit_domain_assets(vec![explicit]).unwrap();
    assert_eq!(report.outcomes[0].host_id, Some(HostId::new(1)));

    // An address that matches no host: unlinked again.
    let report = engine
        .submit_domain_assets(vec![asset("dc1", Some("corp.local"), Some("10.9.9.9"))])
        .unwrap();
    assert_eq!(report.outcomes[0].outcome, MergeOutcome::Updated);
    assert_eq!(report.outcomes[0].host_id, None);
    let hosts = engine.list_hosts().unwrap();
    assert!(hosts
        .iter()
        .all(|h| h.domain_assets.as_deref().unwrap_or_default().is_empty()));

    let assets = engine.list_domain_assets().unwrap();
    assert_eq!(assets.len(), 1);
}

#[test]
fn unknown_explicit_host_rejects_the_batch() {
    let engine = engine();
    let mut bad = asset("dc2", None, None);
    bad.host_id = Some(HostId::new(42));

    let err = engine
        .submit_domain_assets(vec![asset("dc1", None, None), bad])
        .unwrap_err();
    assert!(matches!(
        err,
        ReconError::Execution(ExecutionError::HostNotFound { .. })
    ));
    assert!(engine.list_domain_assets().unwrap().is_empty());
}

#[test]
fn domain_asset_identity_is_hostname_and_domain() {
    let engine = engine();
    engine
        .submit_domain_assets(vec![
            asset("dc1", Some("corp.local"), None),
            asset("dc1", Some("lab.local"), None),
            asset("dc1", None, None),
        ])
        .unwrap();
    assert_eq!(engine.list_domain_assets().unwrap().len(), 3);

    let mut renamed = asset("dc1", Some("corp.local"), None);
    renamed.role = Some("primary".to_string());
    let report = engine.submit_domain_assets(vec![renamed]).unwrap();
    assert_eq!(report.outcomes[0].outcome, MergeOutcome::Updated);
    assert_eq!(engine.list_domain_assets().unwrap().len(), 3);
}

#[test]
fn empty_domain_asset_batch_is_rejected() {
    let engine = engine();
    let err = engine.submit_domain_assets(Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        ReconError::Validation(ValidationError::EmptyBatch)
    ));
}

#[test]
fn nested_assets_replace_the_host_links() {
    let engine = engine();
    let mut record = host("10.0.0.1", "a");
    record.domain_assets = Some(vec![
        asset("ws1", Some("corp.local"), None),
        asset("ws2", Some("corp.local"), None),
    ]);
    engine.submit_hosts(vec![record]).unwrap();

    let mut narrowed = host("10.0.0.1", "a");
    narrowed.domain_assets = Some(vec![asset("ws2", Some("corp.local"), None)]);
    let report = engine.submit_hosts(vec![narrowed]).unwrap();
    assert_eq!(report.updated(), 1);
    let linked: Vec<_> = engine
        .list_domain_assets()
        .unwrap()
        .into_iter()
        .filter(|a| a.host_id.is_some())
        .map(|a| a.hostname)
        .collect();
    assert_eq!(linked, vec!["ws2".to_string()]);

    let mut cleared = host("10.0.0.1", "a");
    cleared.domain_assets = Some(Vec::new());
    assert_eq!(engine.submit_hosts(vec![cleared]).unwrap().updated(), 1);
    assert!(engine
        .list_domain_assets()
        .unwrap()
        .iter()
        .all(|a| a.host_id.is_none()));
}

#[test]
fn host_record_without_domain_assets_unlinks_them() {
    let engine = engine();
    let mut record = host("10.0.0.1", "a");
    record.domain_assets = Some(vec![asset("ws1", Some("corp.local"), None)]);
    engine.submit_hosts(vec![record]).unwrap();

    // `null` and a missing field both carry the empty set.
    let rescan: HostRecord =
        serde_json::from_str(r#"{"ip": "10.0.0.1", "domainAssets": null}"#).unwrap();
    assert_eq!(rescan.domain_assets, None);
    let report = engine.submit_hosts(vec![rescan]).unwrap();
    assert_eq!(report.updated(), 1);

    let hosts = engine.list_hosts().unwrap();
    assert!(hosts[0].domain_assets.as_deref().unwrap_or_default().is_empty());
    let assets = engine.list_domain_assets().unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].host_id, None);

    let bare: HostRecord = serde_json::from_str(r#"{"ip": "10.0.0.1"}"#).unwrap();
    assert_eq!(engine.submit_hosts(vec![bare]).unwrap().unchanged(), 1);
}

#[test]
fn nested_asset_links_to_its_parent_host() {
    let engine = engine();
    engine.submit_hosts(vec![host("10.0.0.1", "a")]).unwrap();

    let mut nested = asset("ws1", None, Some("10.0.0.1"));
    nested.host_id = Some(HostId::new(99));
    let mut record = host("10.0.0.2", "b");
    record.domain_assets = Some(vec![nested]);
    engine.submit_hosts(vec![record]).unwrap();

    let assets = engine.list_domain_assets().unwrap();
    assert_eq!(assets[0].host_id, Some(HostId::new(2)));
}

#[test]
fn delete_all_hosts_unlinks_assets() {
    let engine = engine();
    let changes = engine.subscribe().unwrap();
    let mut record = host("10.0.0.1", "a");
    record.domain_assets = Some(vec![asset("ws1", None, None)]);
    engine.submit_hosts(vec![record, host("10.0.0.2", "b")]).unwrap();
    changes.recv_timeout(Duration::from_secs(2)).unwrap();

    assert_eq!(engine.delete_all_hosts().unwrap(), 2);
    assert!(engine.list_hosts().unwrap().is_empty());
    let assets = engine.list_domain_assets().unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].host_id, None);
    assert!(changes.recv_timeout(Duration::from_millis(100)).is_err());

    // Ids are not reused.
    let report = engine.submit_hosts(vec![host("10.0.0.1", "a")]).unwrap();
    assert_eq!(report.outcomes[0].host_id(), Some(HostId::new(3)));
}

#[test]
fn update_host_overwrites_and_notifies() {
    let engine = engine();
    engine.register_user("alice").unwrap();
    engine.submit_hosts(vec![host("10.0.0.1", "a")]).unwrap();
    let stored = engine.list_hosts().unwrap().remove(0);
    let id = stored.id.unwrap();

    let changes = engine.subscribe().unwrap();
    let mut edit = stored;
    edit.address = "10.0.0.9".to_string();
    edit.owner_name = Some("alice".to_string());
    edit.standing = Some("compromised".to_string());
    let view = engine.update_host(id, edit).unwrap();
    assert_eq!(view.address, "10.0.0.9");
    assert_eq!(view.owner_name.as_deref(), Some("alice"));
    assert_eq!(view.version, Some(2));

    let event = changes.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(event.payload, EventPayload::HostUpdated { record: view });

    // The edit was based on version 1, which is gone now.
    let mut stale = host("10.0.0.9", "a");
    stale.version = Some(1);
    assert!(engine.update_host(id, stale).unwrap_err().is_not_found());
}

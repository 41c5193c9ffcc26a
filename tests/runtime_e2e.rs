use std::time::Duration;

use hostrecon::{
    DomainAssetRecord, EngineConfig, HostId, HostRecord, InventoryEngine, ReconRuntime, Request,
    Response, RuntimeConfig,
};

fn runtime(workers: usize) -> ReconRuntime {
    let config = EngineConfig {
        runtime: RuntimeConfig {
            workers,
            queue_capacity: 256,
        },
        ..EngineConfig::default()
    };
    ReconRuntime::new(InventoryEngine::in_memory(config).unwrap()).unwrap()
}

#[test]
fn concurrent_submissions_of_the_same_hosts_never_duplicate() {
    let runtime = runtime(4);
    let batch: Vec<HostRecord> = (1..=10)
        .map(|i| HostRecord::new(format!("10.0.0.{i}")))
        .collect();

    let handles: Vec<_> = (0..16)
        .map(|_| runtime.submit(Request::SubmitHosts(batch.clone())).unwrap())
        .collect();

    let mut inserted = 0;
    for handle in handles {
        let Response::HostBatch(report) = handle.join_timeout(Duration::from_secs(10)).unwrap()
        else {
            panic!("expected a batch report");
        };
        inserted += report.inserted();
    }
    assert_eq!(inserted, 10);

    let Response::Hosts(hosts) = runtime.execute(Request::ListHosts).unwrap() else {
        panic!("expected hosts");
    };
    assert_eq!(hosts.len(), 10);
}

#[test]
fn every_request_kind_round_trips() {
    let runtime = runtime(2);

    let Response::HostBatch(report) = runtime
        .execute(Request::SubmitHosts(vec![HostRecord::new("10.0.0.5")]))
        .unwrap()
    else {
        panic!("expected a batch report");
    };
    let id = report.outcomes[0].host_id().unwrap();
    assert_eq!(id, HostId::new(1));

    let Response::DomainAssetBatch(assets) = runtime
        .execute(Request::SubmitDomainAssets(vec![DomainAssetRecord {
            hostname: "dc1".to_string(),
            address: Some("10.0.0.5".to_string()),
            ..DomainAssetRecord::default()
        }]))
        .unwrap()
    else {
        panic!("expected a domain asset report");
    };
    assert_eq!(assets.outcomes[0].host_id, Some(id));

    let Response::HostUpdated(view) = runtime
        .execute(Request::UpdateHost {
            id,
            record: HostRecord {
                hostname: Some("dc1".to_string()),
                ..HostRecord::new("10.0.0.5")
            },
        })
        .unwrap()
    else {
        panic!("expected the updated host");
    };
    assert_eq!(view.hostname.as_deref(), Some("dc1"));
    assert_eq!(view.domain_assets.as_deref().map(<[_]>::len), Some(1));

    let Response::DomainAssets(listed) = runtime.execute(Request::ListDomainAssets).unwrap() else {
        panic!("expected domain assets");
    };
    assert_eq!(listed.len(), 1);

    assert_eq!(
        runtime.execute(Request::DeleteAllHosts).unwrap(),
        Response::HostsDeleted(1)
    );
}

#[test]
fn failed_requests_report_their_error() {
    let runtime = runtime(1);
    let err = runtime
        .execute(Request::SubmitDomainAssets(Vec::new()))
        .unwrap_err();
    assert!(err.is_validation());

    let err = runtime
        .execute(Request::UpdateHost {
            id: HostId::new(9),
            record: HostRecord::new("10.0.0.9"),
        })
        .unwrap_err();
    assert!(err.is_not_found());
}

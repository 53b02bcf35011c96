//! HTTP API through the router, without a listener.


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use uuid::Uuid;

use ks_installer::api::{router, ApiState};
use ks_installer::config::{IpmiConfig, QueueConfig, RaftConfig, RsviewConfig};
use ks_installer::dns::DnsResolver;
use ks_installer::handlers::notify::LogNotifier;
use ks_installer::raft::fsm::KvFsm;
use ks_installer::raft::service::ConsensusService;
use ks_installer::raft::snapshot::SnapshotStore;
use ks_installer::raft::storage::MemoryLogStore;
use ks_installer::raft::KvStore;
use ks_installer::rsview::Unconfigured;
use ks_installer::scheduler::{CompletionRegistry, Dispatcher, JobContext, JobState};
use ks_installer::store::{MemoryStorage, Storage};

use test_harness::wait_for;

struct Api {
    app: Router,
    storage: Arc<MemoryStorage>,
    consensus: Arc<ConsensusService>,
    // Keeps the job channel open; nothing consumes it.
    _dispatcher: Dispatcher,
}

/// Router over a consensus node that is never started. With `peers` the
/// node stays a follower that knows no leader.
fn api(node_id: u64, peers: &[(u64, &str)]) -> Api {
    let storage = Arc::new(MemoryStorage::new());
    let ipmi = IpmiConfig {
        cidr_block: "10.0.0.0/8".parse().unwrap(),
        hostname_tld: "example.com".into(),
        ..IpmiConfig::default()
    };
    let ctx = Arc::new(JobContext {
        storage: storage.clone(),
        resolver: Arc::new(DnsResolver::new(Some("127.0.0.1:53".parse().unwrap())).unwrap()),
        topology: Arc::new(Unconfigured),
        notifier: Arc::new(LogNotifier),
        completions: CompletionRegistry::new(),
        ipmi: ipmi.clone(),
        rsview: RsviewConfig::default(),
        queue: QueueConfig::default(),
    });
    let (dispatcher, queue) = Dispatcher::new(ctx);

    let mut config = RaftConfig::new(node_id, "127.0.0.1:0".parse().unwrap());
    config.election_timeout_min_ms = 100;
    config.election_timeout_max_ms = 200;
    let mut members = BTreeMap::from([(node_id, "127.0.0.1:0".to_string())]);
    for (id, addr) in peers {
        members.insert(*id, addr.to_string());
    }
    let fsm = Arc::new(KvFsm::new());
    let consensus = Arc::new(
        ConsensusService::with_stores(
            config,
            members,
            Arc::new(MemoryLogStore::new()),
            Arc::new(SnapshotStore::in_memory()),
            fsm.clone(),
        )
        .unwrap(),
    );
    let kv = KvStore::new(fsm, consensus.clone());

    let app = router(ApiState {
        storage: storage.clone(),
        queue,
        kv,
        ipmi,
    });
    Api {
        app,
        storage,
        consensus,
        _dispatcher: dispatcher,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_create_host_accepts_and_persists_jobs() {
    let api = api(1, &[]);
    let body = json!({
        "ipmi_address": "10.0.0.5",
        "ports": [{"mac": "aa:bb:cc:dd:ee:01"}, {"mac": "AA-BB-CC-DD-EE-02"}]
    });

    let (status, resp) = send(&api.app, "POST", "/v1/hosts", Some(&body.to_string())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let jobs = resp["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0]["action"], "host-create");
    assert_eq!(jobs[1]["action"], "topology-parse");
    assert!(jobs.iter().all(|j| j["state"] == "created"));
    assert_eq!(api.storage.job_count().await, 3);

    // Every job shares the request id as requester
    let request_id: Uuid = resp["request_id"].as_str().unwrap().parse().unwrap();
    let first: Uuid = jobs[0]["id"].as_str().unwrap().parse().unwrap();
    let stored = api.storage.get_job(first).await.unwrap().unwrap();
    assert_eq!(stored.requester_id, request_id);
    assert_eq!(stored.state, JobState::Created);

    let (status, view) = send(&api.app, "GET", &format!("/v1/jobs/{first}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["action"], "host-create");
    assert_eq!(view["fail_count"], 0);
}

#[tokio::test]
async fn test_create_host_rejects_bad_input() {
    let api = api(1, &[]);

    let (status, resp) = send(&api.app, "POST", "/v1/hosts", Some(r#"{"ipmi_address":"10.0.0.999"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["errors"][0]["title"], "Abnormal IP address");

    let (status, _) = send(&api.app, "POST", "/v1/hosts", Some(r#"{"ipmi_address":"192.168.1.1"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"ipmi_address": "10.0.0.5", "ports": [{"mac": "nope"}, {"mac": "aa:bb:cc"}]});
    let (status, resp) = send(&api.app, "POST", "/v1/hosts", Some(&body.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["errors"].as_array().unwrap().len(), 2);

    let (status, resp) = send(&api.app, "POST", "/v1/hosts", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["errors"][0]["title"], "Unknown API request format");

    // Rejected requests create no jobs
    assert_eq!(api.storage.job_count().await, 0);
}

#[tokio::test]
async fn test_unqueued_jobs_fail_instead_of_lingering() {
    let Api {
        app,
        storage,
        _dispatcher: dispatcher,
        ..
    } = api(1, &[]);
    // The job channel closes with its receiver
    drop(dispatcher);

    let body = json!({"ipmi_address": "10.0.0.5", "ports": [{"mac": "aa:bb:cc:dd:ee:01"}]});
    let (status, resp) = send(&app, "POST", "/v1/hosts", Some(&body.to_string())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // The request error, then one per stored job naming it
    let errors = resp["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].get("job_id").is_none());
    assert_eq!(storage.job_count().await, 2);
    for err in &errors[1..] {
        let id: Uuid = err["job_id"].as_str().unwrap().parse().unwrap();
        let job = storage.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].id.to_string(), err["id"].as_str().unwrap());
    }
}

#[tokio::test]
async fn test_unknown_job_and_port_are_not_found() {
    let api = api(1, &[]);

    let (status, resp) = send(&api.app, "GET", &format!("/v1/jobs/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(resp["errors"][0]["code"].as_u64().is_some());

    let (status, _) = send(&api.app, "GET", "/v1/jobs/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&api.app, "GET", "/v1/ports/aa:bb:cc:dd:ee:ff", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&api.app, "GET", "/v1/ports/zz", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_kv_write_on_follower_conflicts() {
    let api = api(1, &[(2, "127.0.0.1:59999")]);

    let (status, resp) = send(&api.app, "PUT", "/v1/kv/hosts/ipmi1", Some("\"v\"")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(resp["errors"][0]["title"], "Not the cluster leader");
    assert!(resp.get("leader_id").is_none());

    let (status, _) = send(&api.app, "DELETE", "/v1/kv/hosts/ipmi1", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, resp) = send(&api.app, "GET", "/v1/cluster", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["node_id"], 1);
    assert!(resp["leader_id"].is_null());
}

#[tokio::test]
async fn test_kv_round_trip_on_leader() {
    let api = api(1, &[]);
    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();
    api.consensus.start(&tracker, cancel.clone()).await;
    api.consensus.bootstrap(false).await.unwrap();

    let consensus = api.consensus.clone();
    assert!(
        wait_for(
            || {
                let consensus = consensus.clone();
                async move { consensus.leader().await == Some(1) }
            },
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await,
        "single node never became leader"
    );

    let (status, resp) = send(&api.app, "PUT", "/v1/kv/hosts/ipmi1", Some("10.0.0.5")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(resp["index"].as_u64().unwrap() > 0);

    let (status, resp) = send(&api.app, "GET", "/v1/kv/hosts/ipmi1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["value"], "10.0.0.5");

    let (status, _) = send(&api.app, "DELETE", "/v1/kv/hosts/ipmi1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&api.app, "GET", "/v1/kv/hosts/ipmi1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, resp) = send(&api.app, "GET", "/v1/cluster", None).await;
    assert_eq!(resp["role"], "leader");
    assert_eq!(resp["leader_id"], 1);

    cancel.cancel();
    tracker.close();
    tracker.wait().await;
}

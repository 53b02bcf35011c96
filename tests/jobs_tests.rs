//! Dispatcher, workers, retry gate and handlers with in-process doubles.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ks_installer::config::{ConflictPolicy, IpmiConfig, QueueConfig, RsviewConfig};
use ks_installer::dns::ReverseResolver;
use ks_installer::error::{AppError, ErrorKind};
use ks_installer::handlers::notify::Notifier;
use ks_installer::model::{Host, MacAddr, Port};
use ks_installer::rsview::{PortAttributes, TopologySource};
use ks_installer::scheduler::job::{HostCreate, Notify, TopologyParse};
use ks_installer::scheduler::{
    ActionKind, CompletionRegistry, Dispatcher, Job, JobAction, JobContext, JobQueue, JobState,
};
use ks_installer::store::{MemoryStorage, Storage, StoreError};

const MAC: &str = "aa:bb:cc:dd:ee:ff";

/// Answers from a script first, then from a fixed list.
struct MockResolver {
    names: Vec<String>,
    script: Mutex<VecDeque<Result<Vec<String>, AppError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockResolver {
    fn returning(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(mut self, times: usize) -> Self {
        let script = (0..times)
            .map(|_| Err(AppError::new(ErrorKind::HostsResolverFailed)))
            .collect();
        self.script = Mutex::new(script);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ReverseResolver for MockResolver {
    async fn reverse(&self, _ip: IpAddr) -> Result<Vec<String>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if let Some(answer) = self.script.lock().unwrap().pop_front() {
            return answer;
        }
        Ok(self.names.clone())
    }
}

struct MockTopology {
    vlans: String,
    lldp: String,
}

impl MockTopology {
    fn new(vlans: &str, lldp: &str) -> Self {
        Self {
            vlans: vlans.into(),
            lldp: lldp.into(),
        }
    }
}

#[async_trait]
impl TopologySource for MockTopology {
    async fn port_attributes(&self, mac: MacAddr) -> Result<PortAttributes, AppError> {
        let mac = mac.to_string();
        let row = [
            "/rescan",
            "jun-a1.example.com",
            "xe-0/0/12",
            "ae12",
            "no",
            self.vlans.as_str(),
            "up/up",
            self.lldp.as_str(),
            mac.as_str(),
            "",
            "",
            "",
            "",
            "r1",
            "zone-a",
            "dc1",
            "no/now",
        ];
        PortAttributes::from_fields(row.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<Notify>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &Notify) -> Result<(), AppError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Memory storage whose first `update_job` calls fail.
struct FlakyStorage {
    inner: MemoryStorage,
    failing_updates: AtomicUsize,
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.insert_job(job).await
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let left = self.failing_updates.load(Ordering::SeqCst);
        if left > 0 {
            self.failing_updates.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.update_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn find_job_by_requester(&self, requester_id: Uuid, action: ActionKind) -> Result<Option<Job>, StoreError> {
        self.inner.find_job_by_requester(requester_id, action).await
    }

    async fn find_host_by_hostname(&self, hostname: &str) -> Result<Option<Host>, StoreError> {
        self.inner.find_host_by_hostname(hostname).await
    }

    async fn get_host(&self, id: Uuid) -> Result<Option<Host>, StoreError> {
        self.inner.get_host(id).await
    }

    async fn upsert_host(&self, host: &Host) -> Result<(), StoreError> {
        self.inner.upsert_host(host).await
    }

    async fn upsert_port(&self, port: &Port) -> Result<(), StoreError> {
        self.inner.upsert_port(port).await
    }

    async fn get_port(&self, mac: MacAddr) -> Result<Option<Port>, StoreError> {
        self.inner.get_port(mac).await
    }

    async fn insert_error(&self, err: &AppError) -> Result<(), StoreError> {
        self.inner.insert_error(err).await
    }

    async fn errors_for_job(&self, job_id: Uuid) -> Result<Vec<AppError>, StoreError> {
        self.inner.errors_for_job(job_id).await
    }
}

/// Holds every job update until the test opens the gate.
struct GatedStorage {
    inner: MemoryStorage,
    gate: tokio::sync::Semaphore,
}

impl GatedStorage {
    fn closed() -> Self {
        Self {
            inner: MemoryStorage::new(),
            gate: tokio::sync::Semaphore::new(0),
        }
    }

    fn open(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Storage for GatedStorage {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.insert_job(job).await
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let _permit = self.gate.acquire().await.unwrap();
        self.inner.update_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn find_job_by_requester(&self, requester_id: Uuid, action: ActionKind) -> Result<Option<Job>, StoreError> {
        self.inner.find_job_by_requester(requester_id, action).await
    }

    async fn find_host_by_hostname(&self, hostname: &str) -> Result<Option<Host>, StoreError> {
        self.inner.find_host_by_hostname(hostname).await
    }

    async fn get_host(&self, id: Uuid) -> Result<Option<Host>, StoreError> {
        self.inner.get_host(id).await
    }

    async fn upsert_host(&self, host: &Host) -> Result<(), StoreError> {
        self.inner.upsert_host(host).await
    }

    async fn upsert_port(&self, port: &Port) -> Result<(), StoreError> {
        self.inner.upsert_port(port).await
    }

    async fn get_port(&self, mac: MacAddr) -> Result<Option<Port>, StoreError> {
        self.inner.get_port(mac).await
    }

    async fn insert_error(&self, err: &AppError) -> Result<(), StoreError> {
        self.inner.insert_error(err).await
    }

    async fn errors_for_job(&self, job_id: Uuid) -> Result<Vec<AppError>, StoreError> {
        self.inner.errors_for_job(job_id).await
    }
}

fn queue_config(max_job_fails: u32) -> QueueConfig {
    QueueConfig {
        workers: 2,
        worker_capacity: 1,
        queue_buffer: 16,
        max_job_fails,
        retry_interval_ms: 20,
        block_timeout_ms: 5000,
    }
}

fn rsview_config() -> RsviewConfig {
    RsviewConfig {
        vlans: vec![100, 300],
        port_names: vec!["xe-".into()],
        switch_names: vec!["jun-".into()],
        ..RsviewConfig::default()
    }
}

fn ipmi_config() -> IpmiConfig {
    IpmiConfig {
        cidr_block: "10.0.0.0/8".parse().unwrap(),
        hostname_tld: "example.com".into(),
        conflict_policy: ConflictPolicy::Reject,
    }
}

struct Harness {
    storage: Arc<dyn Storage>,
    queue: JobQueue,
    notifier: Arc<RecordingNotifier>,
    done: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl Harness {
    fn start(
        storage: Arc<dyn Storage>,
        resolver: impl ReverseResolver + 'static,
        topology: impl TopologySource + 'static,
        queue: QueueConfig,
    ) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = Arc::new(JobContext {
            storage: storage.clone(),
            resolver: Arc::new(resolver),
            topology: Arc::new(topology),
            notifier: notifier.clone(),
            completions: CompletionRegistry::new(),
            ipmi: ipmi_config(),
            rsview: rsview_config(),
            queue,
        });
        let (dispatcher, queue) = Dispatcher::new(ctx);
        let done = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatcher.run(done.clone()));
        Self {
            storage,
            queue,
            notifier,
            done,
            dispatcher,
        }
    }

    async fn submit(&self, job: Job) -> Uuid {
        let id = job.id;
        self.storage.insert_job(&job).await.unwrap();
        self.queue.enqueue(job).await.unwrap();
        id
    }

    /// Poll until the job reaches `state`, returning it.
    async fn wait_state(&self, id: Uuid, state: JobState, limit: Duration) -> Job {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let job = self.storage.get_job(id).await.unwrap().unwrap();
            if job.state == state {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {} waiting for {state}",
                job.state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn shutdown(self) {
        self.done.cancel();
        self.dispatcher.await.unwrap();
    }
}

fn host_job(requester: Uuid, ip: &str) -> Job {
    Job::new(
        requester,
        JobAction::HostCreate(HostCreate {
            ipmi_address: ip.parse().unwrap(),
        }),
    )
}

fn port_job(requester: Uuid) -> Job {
    Job::new(
        requester,
        JobAction::TopologyParse(TopologyParse {
            mac: MAC.parse().unwrap(),
        }),
    )
}

#[tokio::test]
async fn test_host_create_persists_host() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com."]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let id = h.submit(host_job(Uuid::new_v4(), "10.0.0.5")).await;
    let job = h.wait_state(id, JobState::Done, Duration::from_secs(5)).await;
    assert_eq!(job.fail_count, 0);

    let host = storage.find_host_by_hostname("ipmi1").await.unwrap().unwrap();
    assert_eq!(host.ipmi_address.to_string(), "10.0.0.5");
    assert_eq!(host.creator_job_id, id);
    assert_eq!(job.host_id, Some(host.id));
    h.shutdown().await;
}

#[tokio::test]
async fn test_second_identical_request_updates_host() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let first = h.submit(host_job(Uuid::new_v4(), "10.0.0.5")).await;
    h.wait_state(first, JobState::Done, Duration::from_secs(5)).await;
    let original = storage.find_host_by_hostname("ipmi1").await.unwrap().unwrap();

    let second = h.submit(host_job(Uuid::new_v4(), "10.0.0.5")).await;
    h.wait_state(second, JobState::Done, Duration::from_secs(5)).await;
    let updated = storage.find_host_by_hostname("ipmi1").await.unwrap().unwrap();

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.creator_job_id, second);
    h.shutdown().await;
}

#[tokio::test]
async fn test_resubmitted_host_keeps_earlier_ports_linkable() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let first_request = Uuid::new_v4();
    let first = h.submit(host_job(first_request, "10.0.0.5")).await;
    h.wait_state(first, JobState::Done, Duration::from_secs(5)).await;

    // A second request for the same IPMI address takes over the host record
    let second = h.submit(host_job(Uuid::new_v4(), "10.0.0.5")).await;
    h.wait_state(second, JobState::Done, Duration::from_secs(5)).await;
    let host = storage.find_host_by_hostname("ipmi1").await.unwrap().unwrap();
    assert_eq!(host.creator_job_id, second);

    let port = h.submit(port_job(first_request)).await;
    let job = h.wait_state(port, JobState::Done, Duration::from_secs(5)).await;
    assert!(job.errors.is_empty());
    let stored = storage.get_port(MAC.parse().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.host_id, Some(host.id));
    h.shutdown().await;
}

#[tokio::test]
async fn test_ambiguous_ptr_fails_with_single_error() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["a.example.com", "b.example.com"]),
        MockTopology::new("100", "a.example.com"),
        queue_config(1),
    );

    let id = h.submit(host_job(Uuid::new_v4(), "10.0.0.5")).await;
    let job = h.wait_state(id, JobState::Failed, Duration::from_secs(5)).await;

    assert_eq!(job.fail_count, 1);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].kind, ErrorKind::HostsAmbiguousResolver);
    let recorded = storage.errors_for_job(id).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert!(storage.find_host_by_hostname("a").await.unwrap().is_none());

    // The failure is escalated exactly once
    tokio::time::sleep(Duration::from_millis(200)).await;
    let notices = h.notifier.notices.lock().unwrap().clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].failed_job_id, id);
    assert_eq!(notices[0].failed_action, ActionKind::HostCreate);
    h.shutdown().await;
}

#[tokio::test]
async fn test_failure_turns_terminal_exactly_at_threshold() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]).failing_first(10),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let id = h.submit(host_job(Uuid::new_v4(), "10.0.0.5")).await;
    let job = h.wait_state(id, JobState::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.fail_count, 3);
    assert_eq!(storage.errors_for_job(id).await.unwrap().len(), 3);
    h.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let storage = Arc::new(MemoryStorage::new());
    let resolver = MockResolver::returning(&["ipmi1.example.com"]).failing_first(2);
    let h = Harness::start(
        storage.clone(),
        resolver,
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let id = h.submit(host_job(Uuid::new_v4(), "10.0.0.5")).await;
    let job = h.wait_state(id, JobState::Done, Duration::from_secs(5)).await;
    assert_eq!(job.fail_count, 2);
    // Errors of a job that eventually succeeded are still recorded
    assert_eq!(storage.errors_for_job(id).await.unwrap().len(), 2);
    assert!(h.notifier.notices.lock().unwrap().is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn test_ip_outside_cidr_is_terminal() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(5),
    );

    let id = h.submit(host_job(Uuid::new_v4(), "192.168.1.1")).await;
    let job = h.wait_state(id, JobState::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.fail_count, 1);
    assert_eq!(job.errors[0].kind, ErrorKind::HostsIpmiCidrMismatch);
    h.shutdown().await;
}

#[tokio::test]
async fn test_unknown_vlan_writes_no_port() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("200, 201", "ipmi1.example.com"),
        queue_config(3),
    );

    let requester = Uuid::new_v4();
    let host = h.submit(host_job(requester, "10.0.0.5")).await;
    h.wait_state(host, JobState::Done, Duration::from_secs(5)).await;

    let id = h.submit(port_job(requester)).await;
    let job = h.wait_state(id, JobState::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.fail_count, 1);
    assert_eq!(job.errors[0].kind, ErrorKind::RsviewUnknownVlan);
    assert_eq!(storage.port_count().await, 0);
    h.shutdown().await;
}

#[tokio::test]
async fn test_lldp_mismatch_writes_no_port() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi7.example.com"),
        queue_config(3),
    );

    let requester = Uuid::new_v4();
    let host = h.submit(host_job(requester, "10.0.0.5")).await;
    h.wait_state(host, JobState::Done, Duration::from_secs(5)).await;

    let id = h.submit(port_job(requester)).await;
    let job = h.wait_state(id, JobState::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.errors[0].kind, ErrorKind::PortsLldpMismatch);
    assert_eq!(storage.port_count().await, 0);
    h.shutdown().await;
}

#[tokio::test]
async fn test_port_blocks_until_sibling_done() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]).slow(Duration::from_millis(300)),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let requester = Uuid::new_v4();
    let started = tokio::time::Instant::now();
    let host = h.submit(host_job(requester, "10.0.0.5")).await;
    let port = h.submit(port_job(requester)).await;

    h.wait_state(port, JobState::Blocked, Duration::from_secs(2)).await;
    let job = h.wait_state(port, JobState::Done, Duration::from_secs(3)).await;
    // Woken by the sibling, not by the block timeout
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(job.fail_count, 0);

    let host_id = storage.get_job(host).await.unwrap().unwrap().host_id;
    let host = storage.find_host_by_hostname("ipmi1").await.unwrap().unwrap();
    assert_eq!(host_id, Some(host.id));
    let stored = storage.get_port(MAC.parse().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.host_id, Some(host.id));
    assert_eq!(stored.vlan, 100);
    assert_eq!(stored.switch_name, "jun-a1.example.com");
    h.shutdown().await;
}

#[tokio::test]
async fn test_port_fails_when_sibling_failed() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&[]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(1),
    );

    let requester = Uuid::new_v4();
    let host = h.submit(host_job(requester, "10.0.0.5")).await;
    h.wait_state(host, JobState::Failed, Duration::from_secs(5)).await;

    let port = h.submit(port_job(requester)).await;
    let job = h.wait_state(port, JobState::Failed, Duration::from_secs(5)).await;
    assert_eq!(job.errors[0].kind, ErrorKind::JobsSiblingFailed);
    h.shutdown().await;
}

#[tokio::test]
async fn test_pending_write_failure_goes_through_retry() {
    let storage = Arc::new(FlakyStorage {
        inner: MemoryStorage::new(),
        failing_updates: AtomicUsize::new(1),
    });
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let id = h.submit(Job::new(Uuid::new_v4(), JobAction::Ping)).await;
    let job = h.wait_state(id, JobState::Done, Duration::from_secs(5)).await;
    assert_eq!(job.fail_count, 1);
    assert_eq!(job.errors[0].kind, ErrorKind::InternalSqlError);
    h.shutdown().await;
}

#[tokio::test]
async fn test_unknown_action_is_dropped() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let unknown = h.submit(Job::new(Uuid::new_v4(), JobAction::Unknown)).await;
    let ping = h.submit(Job::new(Uuid::new_v4(), JobAction::Ping)).await;
    h.wait_state(ping, JobState::Done, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let job = storage.get_job(unknown).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert!(job.errors.is_empty());
    h.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_buffered_jobs() {
    let storage = Arc::new(MemoryStorage::new());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi1.example.com"),
        queue_config(3),
    );

    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(h.submit(Job::new(Uuid::new_v4(), JobAction::Ping)).await);
    }
    let queue = h.queue.clone();
    let storage_ref = h.storage.clone();
    h.shutdown().await;

    for id in ids {
        let job = storage_ref.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Done, "job {id} not drained");
    }
    assert!(queue.is_closed());
    assert!(queue.enqueue(Job::new(Uuid::new_v4(), JobAction::Ping)).await.is_err());
}

#[tokio::test]
async fn test_enqueue_waits_while_buffer_is_full() {
    let storage = Arc::new(GatedStorage::closed());
    let h = Harness::start(
        storage.clone(),
        MockResolver::returning(&["ipmi1.example.com"]),
        MockTopology::new("100", "ipmi1.example.com"),
        QueueConfig {
            workers: 1,
            queue_buffer: 1,
            ..queue_config(3)
        },
    );

    let jobs: Vec<Job> = (0..3).map(|_| Job::new(Uuid::new_v4(), JobAction::Ping)).collect();
    for job in &jobs {
        storage.insert_job(job).await.unwrap();
    }

    // The dispatcher takes the first job and stalls persisting it; the
    // second fills the one-slot buffer.
    h.queue.enqueue(jobs[0].clone()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), h.queue.enqueue(jobs[1].clone()))
        .await
        .expect("second job should fit the buffer")
        .unwrap();

    let queue = h.queue.clone();
    let third = jobs[2].clone();
    let blocked = tokio::spawn(async move { queue.enqueue(third).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "enqueue returned while the buffer was full");

    storage.open();
    tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("enqueue still waiting after the dispatcher resumed")
        .unwrap()
        .unwrap();

    for job in &jobs {
        h.wait_state(job.id, JobState::Done, Duration::from_secs(2)).await;
    }
    h.shutdown().await;
}

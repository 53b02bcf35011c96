use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::dns::DnsResolver;
use crate::error::Error;
use crate::grpc::GrpcServer;
use crate::handlers::notify::LogNotifier;
use crate::raft::{ConsensusService, KvFsm, KvStore};
use crate::rsview::{RsviewClient, TopologySource, Unconfigured};
use crate::scheduler::{CompletionRegistry, Dispatcher, JobContext};
use crate::store::{MemoryStorage, Storage};

/// One orchestrator process: consensus, job system and HTTP API.
pub struct Orchestrator {
    config: Config,
    consensus: Arc<ConsensusService>,
    kv: KvStore,
    ctx: Arc<JobContext>,
}

impl Orchestrator {
    /// Open the consensus stores and connect the external collaborators.
    pub async fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;

        let fsm = Arc::new(KvFsm::new());
        let consensus = Arc::new(ConsensusService::init(config.raft.clone(), fsm.clone()).await?);
        let kv = KvStore::new(fsm, consensus.clone());

        let topology: Arc<dyn TopologySource> = if config.rsview.url.is_empty() {
            tracing::warn!("rsview.url is empty, topology-parse jobs will fail");
            Arc::new(Unconfigured)
        } else {
            Arc::new(RsviewClient::connect(config.rsview.clone()).await?)
        };

        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let ctx = Arc::new(JobContext {
            storage,
            resolver: Arc::new(DnsResolver::new(config.dns_resolver)?),
            topology,
            notifier: Arc::new(LogNotifier),
            completions: CompletionRegistry::new(),
            ipmi: config.ipmi.clone(),
            rsview: config.rsview.clone(),
            queue: config.queue.clone(),
        });

        Ok(Self::with_parts(config, consensus, kv, ctx))
    }

    /// Assemble from already built parts.
    pub fn with_parts(config: Config, consensus: Arc<ConsensusService>, kv: KvStore, ctx: Arc<JobContext>) -> Self {
        Self {
            config,
            consensus,
            kv,
            ctx,
        }
    }

    /// Run every subsystem until `cancel` fires, then wait for them to
    /// drain.
    ///
    /// A subsystem that cannot start (socket in use, bootstrap failure)
    /// cancels the others.
    pub async fn run(self, force_bootstrap: bool, cancel: CancellationToken) -> Result<(), Error> {
        let tracker = TaskTracker::new();
        self.consensus.start(&tracker, cancel.clone()).await;

        let grpc = GrpcServer::new(self.config.raft.listen, self.consensus.clone());
        let token = cancel.clone();
        tracker.spawn(async move {
            if let Err(e) = grpc.run(token.clone()).await {
                tracing::error!(error = %e, "gRPC server failed");
                token.cancel();
            }
        });

        let (dispatcher, queue) = Dispatcher::new(self.ctx.clone());
        tracker.spawn(dispatcher.run(cancel.clone()));

        let state = ApiState {
            storage: self.ctx.storage.clone(),
            queue,
            kv: self.kv.clone(),
            ipmi: self.config.ipmi.clone(),
        };
        let addr = self.config.http.listen;
        let token = cancel.clone();
        tracker.spawn(async move {
            if let Err(e) = api::serve(addr, state, token.clone()).await {
                tracing::error!(error = %e, "HTTP API failed");
                token.cancel();
            }
        });
        tracker.close();

        tracing::info!(
            node_id = self.consensus.id(),
            raft = %self.config.raft.listen,
            http = %addr,
            workers = self.config.queue.workers,
            "Orchestrator started"
        );

        let result = self.consensus.bootstrap(force_bootstrap).await;
        match &result {
            Ok(()) => cancel.cancelled().await,
            Err(e) => {
                tracing::error!(error = %e, "Bootstrap failed, shutting down");
                cancel.cancel();
            }
        }

        tracker.wait().await;
        tracing::info!("Orchestrator stopped");
        result.map_err(Error::from)
    }
}

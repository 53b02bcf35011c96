use std::sync::Arc;

use crate::config::{IpmiConfig, QueueConfig, RsviewConfig};
use crate::dns::ReverseResolver;
use crate::handlers::notify::Notifier;
use crate::rsview::TopologySource;
use crate::scheduler::completion::CompletionRegistry;
use crate::store::Storage;

/// Everything a job handler may touch, handed to the dispatcher at
/// construction.
#[derive(Clone)]
pub struct JobContext {
    pub storage: Arc<dyn Storage>,
    pub resolver: Arc<dyn ReverseResolver>,
    pub topology: Arc<dyn TopologySource>,
    pub notifier: Arc<dyn Notifier>,
    pub completions: CompletionRegistry,
    pub ipmi: IpmiConfig,
    /// Allow-lists for scraped port attributes.
    pub rsview: RsviewConfig,
    pub queue: QueueConfig,
}

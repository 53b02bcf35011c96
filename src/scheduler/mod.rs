//! In-process job system: a dispatcher feeding a bounded worker pool, with
//! bounded retry and sibling blocking.

pub mod completion;
pub mod context;
pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod retry;

pub use completion::CompletionRegistry;
pub use context::JobContext;
pub use dispatcher::Dispatcher;
pub use job::{ActionKind, Job, JobAction, JobOutcome, JobState};
pub use queue::JobQueue;

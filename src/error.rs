use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Raft error: {0}")]
    Raft(#[from] RaftError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Application error: {0}")]
    App(#[from] AppError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the consensus layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaftError {
    #[error("Not the leader, current leader is node {0:?}")]
    NotLeader(Option<u64>),

    #[error("Local node id {0} is missing from the configured node list")]
    MissingLocalId(u64),

    #[error("Cluster already bootstrapped, refusing to bootstrap again")]
    CantBootstrap,

    #[error("Timed out waiting for the command to be applied")]
    Timeout,

    #[error("Proposal queue is full")]
    Busy,

    #[error("Raft node is shutting down")]
    Shutdown,

    #[error("Unknown node {0}")]
    UnknownNode(u64),

    #[error("Log storage error: {0}")]
    Storage(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failures of the job queue ingress.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,

    #[error("Job queue is full")]
    Full,
}

/// Enumerated application error kinds.
///
/// Every kind carries its own stable numeric code, human-facing title and
/// detail, HTTP status classification and retry policy, so no lookup table can
/// miss an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InternalCommonError = 1,
    InternalSqlError = 2,
    ApiUnknownFormat = 10,
    ApiNotFound = 11,
    HostsAbnormalIp = 20,
    HostsIpmiCidrMismatch = 21,
    HostsIpmiTldMismatch = 22,
    HostsAmbiguousResolver = 23,
    HostsResolverFailed = 24,
    HostsIpmiConflict = 25,
    PortsAbnormalMac = 30,
    PortsLldpMismatch = 31,
    RsviewRequestFailed = 40,
    RsviewGenericError = 41,
    RsviewAuthTestFail = 42,
    RsviewPortNotFound = 43,
    RsviewSiteLayoutChanged = 44,
    RsviewUnknownVlan = 45,
    RsviewUnknownPort = 46,
    RsviewUnknownJun = 47,
    RsviewUnknownLldp = 48,
    JobsSiblingMissing = 50,
    JobsSiblingFailed = 51,
    NotifyDeliveryFailed = 60,
    RaftNotLeader = 70,
    RaftUnavailable = 71,
}

impl ErrorKind {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn title(self) -> &'static str {
        match self {
            ErrorKind::InternalCommonError => "Internal error",
            ErrorKind::InternalSqlError => "Internal database error",
            ErrorKind::ApiUnknownFormat => "Unknown API request format",
            ErrorKind::ApiNotFound => "Resource not found",
            ErrorKind::HostsAbnormalIp => "Abnormal IP address",
            ErrorKind::HostsIpmiCidrMismatch => "IPMI address outside of the allowed network",
            ErrorKind::HostsIpmiTldMismatch => "IPMI hostname domain mismatch",
            ErrorKind::HostsAmbiguousResolver => "Ambiguous reverse DNS answer",
            ErrorKind::HostsResolverFailed => "Reverse DNS lookup failed",
            ErrorKind::HostsIpmiConflict => "IPMI address conflict",
            ErrorKind::PortsAbnormalMac => "Abnormal MAC address",
            ErrorKind::PortsLldpMismatch => "LLDP neighbor mismatch",
            ErrorKind::RsviewRequestFailed => "Topology service request failed",
            ErrorKind::RsviewGenericError => "Topology service error",
            ErrorKind::RsviewAuthTestFail => "Topology service authentication failed",
            ErrorKind::RsviewPortNotFound => "Port not found in topology service",
            ErrorKind::RsviewSiteLayoutChanged => "Topology service layout changed",
            ErrorKind::RsviewUnknownVlan => "Unknown VLAN",
            ErrorKind::RsviewUnknownPort => "Unknown switch port",
            ErrorKind::RsviewUnknownJun => "Unknown switch",
            ErrorKind::RsviewUnknownLldp => "Unknown LLDP neighbor",
            ErrorKind::JobsSiblingMissing => "Dependent job not found",
            ErrorKind::JobsSiblingFailed => "Dependent job failed",
            ErrorKind::NotifyDeliveryFailed => "Notification delivery failed",
            ErrorKind::RaftNotLeader => "Not the cluster leader",
            ErrorKind::RaftUnavailable => "Cluster unavailable",
        }
    }

    pub fn detail(self) -> &'static str {
        match self {
            ErrorKind::InternalCommonError => {
                "The current request could not be processed! Please, try again later!"
            }
            ErrorKind::InternalSqlError => {
                "The current request could not be processed due to a database error. Please, try again later!"
            }
            ErrorKind::ApiUnknownFormat => {
                "Could not parse request! Please read the documentation and try again!"
            }
            ErrorKind::ApiNotFound => "The requested resource does not exist.",
            ErrorKind::HostsAbnormalIp => "Could not parse the given IP address!",
            ErrorKind::HostsIpmiCidrMismatch => {
                "The configured IPMI CIDR block does not include the given address!"
            }
            ErrorKind::HostsIpmiTldMismatch => {
                "The domain of the resolved IPMI hostname does not match the configuration!"
            }
            ErrorKind::HostsAmbiguousResolver => {
                "The resolver returned zero or more than one hostname for the IPMI address!"
            }
            ErrorKind::HostsResolverFailed => "The reverse DNS lookup of the IPMI address failed.",
            ErrorKind::HostsIpmiConflict => {
                "A host with the same hostname is registered with a different IPMI address!"
            }
            ErrorKind::PortsAbnormalMac => "Could not parse the given MAC address!",
            ErrorKind::PortsLldpMismatch => {
                "The LLDP neighbor of the port does not match the resolved hostname!"
            }
            ErrorKind::RsviewRequestFailed => "Could not fetch port attributes from the topology service.",
            ErrorKind::RsviewGenericError => "The topology service answered with an abnormal response.",
            ErrorKind::RsviewAuthTestFail => "The topology service client test failed. Check the credentials!",
            ErrorKind::RsviewPortNotFound => "The topology service does not know the given MAC address.",
            ErrorKind::RsviewSiteLayoutChanged => {
                "The topology service page layout does not match the expected template!"
            }
            ErrorKind::RsviewUnknownVlan => "The port VLANs do not match any configured VLAN!",
            ErrorKind::RsviewUnknownPort => "The switch port name does not match any configured port name!",
            ErrorKind::RsviewUnknownJun => "The switch name does not match any configured switch name!",
            ErrorKind::RsviewUnknownLldp => "The port has no valid LLDP neighbor!",
            ErrorKind::JobsSiblingMissing => "The host creation job of this request was not found!",
            ErrorKind::JobsSiblingFailed => "The host creation job of this request has failed!",
            ErrorKind::NotifyDeliveryFailed => "The failure notification could not be delivered.",
            ErrorKind::RaftNotLeader => "This node is not the cluster leader. Retry against the leader.",
            ErrorKind::RaftUnavailable => "The cluster could not commit the change. Please, try again later!",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InternalCommonError
            | ErrorKind::InternalSqlError
            | ErrorKind::HostsAmbiguousResolver
            | ErrorKind::JobsSiblingMissing => 500,
            ErrorKind::ApiUnknownFormat
            | ErrorKind::HostsAbnormalIp
            | ErrorKind::HostsIpmiCidrMismatch
            | ErrorKind::PortsAbnormalMac => 400,
            ErrorKind::ApiNotFound | ErrorKind::RsviewPortNotFound => 404,
            ErrorKind::HostsIpmiConflict
            | ErrorKind::PortsLldpMismatch
            | ErrorKind::RaftNotLeader => 409,
            ErrorKind::HostsIpmiTldMismatch
            | ErrorKind::RsviewUnknownVlan
            | ErrorKind::RsviewUnknownPort
            | ErrorKind::RsviewUnknownJun
            | ErrorKind::RsviewUnknownLldp => 422,
            ErrorKind::JobsSiblingFailed => 424,
            ErrorKind::HostsResolverFailed
            | ErrorKind::RsviewRequestFailed
            | ErrorKind::RsviewGenericError
            | ErrorKind::RsviewAuthTestFail
            | ErrorKind::RsviewSiteLayoutChanged
            | ErrorKind::NotifyDeliveryFailed => 502,
            ErrorKind::RaftUnavailable => 503,
        }
    }

    /// Terminal kinds fail the owning job on first occurrence; the rest go
    /// through the bounded retry path.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ErrorKind::ApiUnknownFormat
                | ErrorKind::HostsAbnormalIp
                | ErrorKind::HostsIpmiCidrMismatch
                | ErrorKind::HostsIpmiTldMismatch
                | ErrorKind::HostsIpmiConflict
                | ErrorKind::PortsAbnormalMac
                | ErrorKind::PortsLldpMismatch
                | ErrorKind::RsviewAuthTestFail
                | ErrorKind::RsviewSiteLayoutChanged
                | ErrorKind::RsviewUnknownVlan
                | ErrorKind::RsviewUnknownPort
                | ErrorKind::RsviewUnknownJun
                | ErrorKind::RsviewUnknownLldp
                | ErrorKind::JobsSiblingMissing
                | ErrorKind::JobsSiblingFailed
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// One recorded occurrence of an application error, owned by a job or by an
/// HTTP request.
#[derive(Error, Debug, Clone, Serialize)]
#[error("{kind}")]
pub struct AppError {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub job_id: Option<Uuid>,
    pub request_id: Option<Uuid>,
    /// Internal cause, logged and stored but never shown to clients.
    pub source_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AppError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            job_id: None,
            request_id: None,
            source_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl std::fmt::Display) -> Self {
        self.source_message = Some(source.to_string());
        self
    }

    pub fn for_request(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }
}

impl From<ErrorKind> for AppError {
    fn from(kind: ErrorKind) -> Self {
        AppError::new(kind)
    }
}

impl From<RaftError> for AppError {
    fn from(err: RaftError) -> Self {
        let kind = match err {
            RaftError::NotLeader(_) => ErrorKind::RaftNotLeader,
            _ => ErrorKind::RaftUnavailable,
        };
        AppError::new(kind).with_source(err)
    }
}

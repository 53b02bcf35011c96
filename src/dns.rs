//! Reverse DNS lookups for IPMI addresses.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;

use crate::error::{AppError, ErrorKind};

#[async_trait]
pub trait ReverseResolver: Send + Sync {
    /// Every PTR name published for `ip`. An address without records
    /// yields an empty list.
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, AppError>;
}

pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Query `nameserver` when given, otherwise the system configuration.
    pub fn new(nameserver: Option<SocketAddr>) -> Result<Self, AppError> {
        let inner = match nameserver {
            Some(addr) => {
                let mut config = ResolverConfig::new();
                config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
                TokioAsyncResolver::tokio(config, ResolverOpts::default())
            }
            None => TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| AppError::new(ErrorKind::HostsResolverFailed).with_source(e))?,
        };
        Ok(Self { inner })
    }
}

#[async_trait]
impl ReverseResolver for DnsResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, AppError> {
        match self.inner.reverse_lookup(ip).await {
            Ok(lookup) => Ok(lookup.iter().map(|name| name.to_string()).collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(AppError::new(ErrorKind::HostsResolverFailed).with_source(e)),
        }
    }
}

/// Hostname for a set of PTR names: the first label of the only name.
///
/// Zero or several names fail with `HostsAmbiguousResolver`. When `tld` is
/// non-empty the rest of the name must equal it.
pub fn derive_hostname(names: &[String], tld: &str) -> Result<String, AppError> {
    let [name] = names else {
        return Err(AppError::new(ErrorKind::HostsAmbiguousResolver)
            .with_source(format!("{} PTR names: {names:?}", names.len())));
    };

    let name = name.trim_end_matches('.');
    let (label, domain) = name.split_once('.').unwrap_or((name, ""));
    if label.is_empty() {
        return Err(AppError::new(ErrorKind::HostsAbnormalIp).with_source(format!("empty PTR name {name:?}")));
    }

    let tld = tld.trim_matches('.');
    if !tld.is_empty() && !domain.eq_ignore_ascii_case(tld) {
        return Err(AppError::new(ErrorKind::HostsIpmiTldMismatch)
            .with_source(format!("{name} is not under {tld}")));
    }
    Ok(label.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_name_yields_first_label() {
        let host = derive_hostname(&names(&["ipmi1.example.com."]), "example.com").unwrap();
        assert_eq!(host, "ipmi1");
        assert_eq!(derive_hostname(&names(&["IPMI1.example.com"]), "").unwrap(), "ipmi1");
    }

    #[test]
    fn zero_or_many_names_are_ambiguous() {
        for list in [names(&[]), names(&["a.example.com", "b.example.com"])] {
            let err = derive_hostname(&list, "").unwrap_err();
            assert_eq!(err.kind, ErrorKind::HostsAmbiguousResolver);
        }
    }

    #[test]
    fn foreign_domain_is_rejected() {
        let err = derive_hostname(&names(&["ipmi1.other.net"]), "example.com").unwrap_err();
        assert_eq!(err.kind, ErrorKind::HostsIpmiTldMismatch);
        assert!(err.is_terminal());
    }
}

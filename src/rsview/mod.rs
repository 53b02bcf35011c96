//! Switch-side port facts scraped from the rsview topology tool.

pub mod client;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, ErrorKind};
use crate::model::MacAddr;

pub use client::RsviewClient;

/// Columns of one rsview port row, in page order.
pub const FIELD_COUNT: usize = 17;

#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn port_attributes(&self, mac: MacAddr) -> Result<PortAttributes, AppError>;
}

/// Used when no rsview URL is configured; every lookup fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl TopologySource for Unconfigured {
    async fn port_attributes(&self, _mac: MacAddr) -> Result<PortAttributes, AppError> {
        Err(AppError::new(ErrorKind::RsviewGenericError).with_source("rsview.url is not configured"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PortAttributes {
    pub rescan_link: String,
    /// Switch hostname.
    pub hostname: String,
    pub port: String,
    pub bundle: String,
    pub force_up: String,
    /// Space or comma separated VLAN ids.
    pub vlans: String,
    pub admin_status: String,
    pub oper_status: String,
    /// Neighbor hostname as announced over LLDP.
    pub lldp: String,
    pub macs: String,
    pub link_ip: String,
    pub rips: String,
    pub link_ip_by_name: String,
    pub rips_by_name: String,
    pub rack: String,
    pub zone: String,
    pub dc: String,
    pub port_flapped: String,
    pub last_scan: String,
}

impl PortAttributes {
    /// Build from the cells of one row. An empty row means rsview knows
    /// nothing about the port; any other count means the page changed.
    pub fn from_fields(fields: Vec<String>) -> Result<Self, AppError> {
        if fields.is_empty() {
            return Err(AppError::new(ErrorKind::RsviewPortNotFound));
        }
        let Ok(cells) = <[String; FIELD_COUNT]>::try_from(fields) else {
            return Err(AppError::new(ErrorKind::RsviewSiteLayoutChanged)
                .with_source(format!("expected {FIELD_COUNT} columns")));
        };

        let [rescan_link, hostname, port, bundle, force_up, vlans, status, lldp, macs, link_ip, rips, link_ip_by_name, rips_by_name, rack, zone, dc, flapped] =
            cells;
        let (admin_status, oper_status) = split_status(&status);
        let (port_flapped, last_scan) = split_status(&flapped);

        Ok(Self {
            rescan_link,
            hostname,
            port,
            bundle,
            force_up,
            vlans,
            admin_status,
            oper_status,
            lldp,
            macs,
            link_ip,
            rips,
            link_ip_by_name,
            rips_by_name,
            rack,
            zone,
            dc,
            port_flapped,
            last_scan,
        })
    }

    /// VLAN ids listed for the port. Tokens that are not decimal numbers
    /// are skipped.
    pub fn vlan_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.vlans
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(|t| t.trim().parse().ok())
    }
}

/// rsview packs two values into a single cell as `a/b`.
fn split_status(cell: &str) -> (String, String) {
    match cell.split_once('/') {
        Some((a, b)) => (a.trim().to_string(), b.trim().to_string()),
        None => (cell.trim().to_string(), String::new()),
    }
}

//! Host and port records.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 48-bit hardware address, accepted as `aa:bb:cc:dd:ee:ff` or
/// `aa-bb-cc-dd-ee-ff`, always printed lowercase with colons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct ParseMacError(String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sep = if s.contains('-') { '-' } else { ':' };
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(sep);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ParseMacError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    /// First label of the IPMI address' PTR name.
    pub hostname: String,
    pub ipmi_address: IpAddr,
    pub creator_job_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    pub fn new(hostname: String, ipmi_address: IpAddr, creator_job_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            hostname,
            ipmi_address,
            creator_job_id,
            updated_at: Utc::now(),
        }
    }
}

/// Switch-side facts about a port, linked to a host once LLDP confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub mac: MacAddr,
    pub host_id: Option<Uuid>,
    pub switch_name: String,
    pub port_name: String,
    pub vlan: u32,
    pub lldp: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_and_dash_forms() {
        let a: MacAddr = "AA:bb:cc:dd:ee:ff".parse().unwrap();
        let b: MacAddr = "aa-bb-cc-dd-ee-ff".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn rejects_malformed_macs() {
        for bad in ["", "aa:bb:cc:dd:ee", "aa:bb:cc:dd:ee:ff:00", "aa:bb:cc:dd:ee:gg", "aabb:cc:dd:ee:ff"] {
            assert!(bad.parse::<MacAddr>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn serializes_as_string() {
        let mac: MacAddr = "01:02:03:04:05:06".parse().unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"01:02:03:04:05:06\"");
        let back: MacAddr = serde_json::from_str("\"01-02-03-04-05-06\"").unwrap();
        assert_eq!(back, mac);
    }
}

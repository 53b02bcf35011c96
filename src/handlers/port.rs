use chrono::Utc;

use crate::error::{AppError, ErrorKind};
use crate::model::Port;
use crate::rsview::PortAttributes;
use crate::scheduler::context::JobContext;
use crate::scheduler::job::{ActionKind, Job, JobOutcome, JobState, TopologyParse};

/// Switch-side facts that passed the allow-lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub vlan: u32,
    pub port_name: String,
    pub switch_name: String,
    /// First label of the LLDP neighbor.
    pub lldp_host: String,
}

/// Scrape the port, validate it, and link it to the host created by the
/// sibling job once that job is done. Nothing is written unless every
/// check passes.
pub async fn parse_topology(ctx: &JobContext, job: &Job, req: &TopologyParse) -> Result<JobOutcome, AppError> {
    let attrs = ctx.topology.port_attributes(req.mac).await?;
    let placement = validate(ctx, &attrs)?;

    let sibling = ctx
        .storage
        .find_job_by_requester(job.requester_id, ActionKind::HostCreate)
        .await?
        .ok_or_else(|| AppError::new(ErrorKind::JobsSiblingMissing))?;
    match sibling.state {
        JobState::Created | JobState::Pending | JobState::Blocked => {
            return Ok(JobOutcome::Blocked {
                requester_id: job.requester_id,
            })
        }
        JobState::Failed => {
            return Err(AppError::new(ErrorKind::JobsSiblingFailed).with_source(format!("sibling job {}", sibling.id)))
        }
        JobState::Done => {}
    }

    let host_id = sibling.host_id.ok_or_else(|| {
        AppError::new(ErrorKind::JobsSiblingMissing).with_source(format!("job {} recorded no host", sibling.id))
    })?;
    let host = ctx.storage.get_host(host_id).await?.ok_or_else(|| {
        AppError::new(ErrorKind::JobsSiblingMissing).with_source(format!("host {host_id} of job {} is gone", sibling.id))
    })?;
    if placement.lldp_host != host.hostname {
        return Err(AppError::new(ErrorKind::PortsLldpMismatch).with_source(format!(
            "LLDP neighbor {} is not host {}",
            placement.lldp_host, host.hostname
        )));
    }

    let port = Port {
        mac: req.mac,
        host_id: Some(host.id),
        switch_name: placement.switch_name,
        port_name: placement.port_name,
        vlan: placement.vlan,
        lldp: attrs.lldp,
        updated_at: Utc::now(),
    };
    ctx.storage.upsert_port(&port).await?;
    tracing::info!(job_id = %job.id, mac = %port.mac, host = %host.hostname, "Port linked to host");
    Ok(JobOutcome::Done)
}

pub fn validate(ctx: &JobContext, attrs: &PortAttributes) -> Result<Placement, AppError> {
    let vlans: Vec<u32> = attrs.vlan_ids().collect();
    let vlan = first_match(&ctx.rsview.vlans, |v| vlans.contains(v), "VLAN")
        .copied()
        .ok_or_else(|| AppError::new(ErrorKind::RsviewUnknownVlan).with_source(format!("vlans {:?}", attrs.vlans)))?;

    first_match(&ctx.rsview.port_names, |p| attrs.port.contains(p.as_str()), "port name")
        .ok_or_else(|| AppError::new(ErrorKind::RsviewUnknownPort).with_source(format!("port {:?}", attrs.port)))?;

    first_match(&ctx.rsview.switch_names, |s| attrs.hostname.contains(s.as_str()), "switch name")
        .ok_or_else(|| AppError::new(ErrorKind::RsviewUnknownJun).with_source(format!("switch {:?}", attrs.hostname)))?;

    let lldp_host = attrs.lldp.trim().split('.').next().unwrap_or_default();
    if lldp_host.is_empty() {
        return Err(AppError::new(ErrorKind::RsviewUnknownLldp));
    }

    Ok(Placement {
        vlan,
        port_name: attrs.port.clone(),
        switch_name: attrs.hostname.clone(),
        lldp_host: lldp_host.to_ascii_lowercase(),
    })
}

/// First allow-list entry accepted by `matches`. Further matches point at
/// an overlapping configuration and are only logged.
fn first_match<'a, T: std::fmt::Debug>(
    allowed: &'a [T],
    matches: impl Fn(&T) -> bool,
    what: &str,
) -> Option<&'a T> {
    let mut hits = allowed.iter().filter(|a| matches(a));
    let first = hits.next()?;
    let extra: Vec<&T> = hits.collect();
    if !extra.is_empty() {
        tracing::warn!(what, first = ?first, extra = ?extra, "Several allow-list entries match");
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins() {
        let allowed = vec!["xe-".to_string(), "xe-0".to_string(), "ge-".to_string()];
        let hit = first_match(&allowed, |p| "xe-0/0/1".contains(p.as_str()), "port name");
        assert_eq!(hit.map(String::as_str), Some("xe-"));
        assert!(first_match(&allowed, |p| "et-0/0/1".contains(p.as_str()), "port name").is_none());
    }
}

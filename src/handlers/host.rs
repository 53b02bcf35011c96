use chrono::Utc;
use uuid::Uuid;

use crate::config::ConflictPolicy;
use crate::dns::derive_hostname;
use crate::error::{AppError, ErrorKind};
use crate::model::Host;
use crate::scheduler::context::JobContext;
use crate::scheduler::job::HostCreate;

/// Resolve the IPMI address to a hostname and upsert the host under it.
pub async fn create_host(ctx: &JobContext, job_id: Uuid, req: &HostCreate) -> Result<Host, AppError> {
    let ip = req.ipmi_address;
    if !ctx.ipmi.cidr_block.contains(&ip) {
        return Err(AppError::new(ErrorKind::HostsIpmiCidrMismatch)
            .with_source(format!("{ip} is outside {}", ctx.ipmi.cidr_block)));
    }

    let names = ctx.resolver.reverse(ip).await?;
    let hostname = derive_hostname(&names, &ctx.ipmi.hostname_tld)?;

    let host = match ctx.storage.find_host_by_hostname(&hostname).await? {
        None => Host::new(hostname, ip, job_id),
        Some(existing) if existing.ipmi_address == ip => Host {
            creator_job_id: job_id,
            updated_at: Utc::now(),
            ..existing
        },
        Some(existing) => resolve_conflict(ctx.ipmi.conflict_policy, existing, ip, job_id)?,
    };

    ctx.storage.upsert_host(&host).await?;
    tracing::info!(job_id = %job_id, hostname = %host.hostname, ipmi = %host.ipmi_address, "Host saved");
    Ok(host)
}

/// A host of the same name is already registered with another IPMI address.
fn resolve_conflict(
    policy: ConflictPolicy,
    existing: Host,
    ip: std::net::IpAddr,
    job_id: Uuid,
) -> Result<Host, AppError> {
    match policy {
        ConflictPolicy::Reject => Err(AppError::new(ErrorKind::HostsIpmiConflict).with_source(format!(
            "{} is registered with {}, got {ip}",
            existing.hostname, existing.ipmi_address
        ))),
        ConflictPolicy::Overwrite => {
            tracing::warn!(
                hostname = %existing.hostname,
                old = %existing.ipmi_address,
                new = %ip,
                "Overwriting IPMI address of existing host"
            );
            Ok(Host {
                ipmi_address: ip,
                creator_job_id: job_id,
                updated_at: Utc::now(),
                ..existing
            })
        }
        ConflictPolicy::Merge => {
            tracing::warn!(
                hostname = %existing.hostname,
                kept = %existing.ipmi_address,
                ignored = %ip,
                "Keeping stored IPMI address of existing host"
            );
            Ok(Host {
                creator_job_id: job_id,
                updated_at: Utc::now(),
                ..existing
            })
        }
    }
}

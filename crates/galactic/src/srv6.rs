//! Kernel programmer.
//!
//! Turns decoded control-plane intents into kernel forwarding state:
//! End.DT46 ingress routes on the tenant host device, H.Encaps egress
//! routes in the tenant VRF table, and proxy-neighbor entries for host
//! prefixes. All operations are idempotent: installs replace, deletes
//! treat missing state as success.
//!
//! The devices this module touches are created elsewhere. Their absence
//! is reported as `DeviceMissing`/`VrfMissing`, never healed.

use std::net::Ipv6Addr;

use crate::addr::Prefix;
use crate::codec;
use crate::error::{AgentError, Result};
use crate::netlink::{Connection, LinkMessage};

/// Fixed loopback device used as the output of all egress routes.
pub const LOOPBACK_DEVICE: &str = "lo-galactic";

/// Derive the (host device, VRF device) names for an endpoint.
pub(crate) fn endpoint_devices(endpoint: Ipv6Addr) -> Result<(String, String)> {
    let (vpc_hex, attach_hex) = codec::decode_endpoint(endpoint);
    let vpc = codec::hex_to_base62(&vpc_hex)?;
    let attach = codec::hex_to_base62(&attach_hex)?;
    Ok((
        codec::host_device(&vpc, &attach),
        codec::vrf_device(&vpc, &attach),
    ))
}

/// Netlink-backed kernel programmer.
pub struct Srv6Programmer {
    conn: Connection,
}

impl Srv6Programmer {
    /// Open the rtnetlink connection.
    pub fn new() -> Result<Self> {
        Ok(Self {
            conn: Connection::new().map_err(AgentError::Netlink)?,
        })
    }

    async fn device(&self, name: &str) -> Result<LinkMessage> {
        self.conn
            .link_by_name(name)
            .await
            .map_err(AgentError::Netlink)?
            .ok_or_else(|| AgentError::DeviceMissing(name.to_string()))
    }

    /// Resolve the routing table bound to an attachment's VRF device.
    async fn vrf_table(&self, name: &str) -> Result<u32> {
        let link = self
            .conn
            .link_by_name(name)
            .await
            .map_err(AgentError::Netlink)?
            .ok_or_else(|| AgentError::VrfMissing(name.to_string()))?;

        link.vrf_table()
            .ok_or_else(|| AgentError::VrfMissing(format!("{} carries no routing table", name)))
    }

    /// Install the ingress decapsulation route for an endpoint:
    /// `endpoint/128` on the host device, End.DT46 into the VRF table.
    pub async fn ingress_add(&self, endpoint: Ipv6Addr) -> Result<()> {
        let (host, vrf) = endpoint_devices(endpoint)?;
        let link = self.device(&host).await?;
        let table = self.vrf_table(&vrf).await?;

        self.conn
            .replace_end_dt46(endpoint, link.ifindex(), table)
            .await
            .map_err(AgentError::Netlink)
    }

    /// Remove the ingress route. A route that is already gone is success.
    pub async fn ingress_delete(&self, endpoint: Ipv6Addr) -> Result<()> {
        let (host, _) = endpoint_devices(endpoint)?;
        let link = self.device(&host).await?;

        match self.conn.del_seg6_local(endpoint, link.ifindex()).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other.map_err(AgentError::Netlink),
        }
    }

    /// Install the egress route for `prefix` via `endpoint`'s VRF table,
    /// H.Encaps with `segments` out of the agent loopback. Host prefixes
    /// additionally get a proxy-neighbor entry on the host device.
    ///
    /// Both installs are attempted; their failures are returned together.
    pub async fn egress_add(
        &self,
        prefix: &Prefix,
        endpoint: Ipv6Addr,
        segments: &[Ipv6Addr],
    ) -> Result<()> {
        let (host, vrf) = endpoint_devices(endpoint)?;
        let mut errors = Vec::new();

        if prefix.is_host() {
            if let Err(err) = self.proxy_add(&host, prefix).await {
                errors.push(err);
            }
        }

        if let Err(err) = self.route_add(&vrf, prefix, segments).await {
            errors.push(err);
        }

        AgentError::aggregate(errors)
    }

    /// Mirror of `egress_add`. Missing entries are success; remaining
    /// failures are returned together.
    pub async fn egress_delete(
        &self,
        prefix: &Prefix,
        endpoint: Ipv6Addr,
        _segments: &[Ipv6Addr],
    ) -> Result<()> {
        let (host, vrf) = endpoint_devices(endpoint)?;
        let mut errors = Vec::new();

        if prefix.is_host() {
            if let Err(err) = self.proxy_delete(&host, prefix).await {
                errors.push(err);
            }
        }

        if let Err(err) = self.route_delete(&vrf, prefix).await {
            errors.push(err);
        }

        AgentError::aggregate(errors)
    }

    async fn proxy_add(&self, host: &str, prefix: &Prefix) -> Result<()> {
        let link = self.device(host).await?;
        self.conn
            .replace_proxy_neighbor(link.ifindex(), prefix.addr())
            .await
            .map_err(AgentError::Netlink)
    }

    async fn proxy_delete(&self, host: &str, prefix: &Prefix) -> Result<()> {
        let link = self.device(host).await?;
        match self.conn.del_proxy_neighbor(link.ifindex(), prefix.addr()).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other.map_err(AgentError::Netlink),
        }
    }

    async fn route_add(&self, vrf: &str, prefix: &Prefix, segments: &[Ipv6Addr]) -> Result<()> {
        let loopback = self.device(LOOPBACK_DEVICE).await?;
        let table = self.vrf_table(vrf).await?;
        self.conn
            .replace_seg6_encap(prefix, table, loopback.ifindex(), segments)
            .await
            .map_err(AgentError::Netlink)
    }

    async fn route_delete(&self, vrf: &str, prefix: &Prefix) -> Result<()> {
        let loopback = self.device(LOOPBACK_DEVICE).await?;
        let table = self.vrf_table(vrf).await?;
        match self
            .conn
            .del_table_route(prefix, table, loopback.ifindex())
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => other.map_err(AgentError::Netlink),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_from_endpoint() {
        // vpc=1, attach=1 in the lower 64 bits.
        let endpoint: Ipv6Addr = "fc00::1:1".parse().unwrap();
        let (host, vrf) = endpoint_devices(endpoint).unwrap();
        assert_eq!(host, "G000000001001H");
        assert_eq!(vrf, "G000000001001V");
    }

    #[test]
    fn device_names_at_extremes() {
        let endpoint: Ipv6Addr = "fc00::ffff:ffff:ffff:ffff".parse().unwrap();
        let (host, vrf) = endpoint_devices(endpoint).unwrap();
        assert!(host.len() <= 15);
        assert!(vrf.len() <= 15);
        assert!(host.starts_with('G') && host.ends_with('H'));
        assert!(vrf.starts_with('G') && vrf.ends_with('V'));
    }

    #[test]
    fn distinct_attachments_get_distinct_devices() {
        let a = endpoint_devices("fc00::1:1".parse().unwrap()).unwrap();
        let b = endpoint_devices("fc00::1:2".parse().unwrap()).unwrap();
        assert_ne!(a.0, b.0);
        assert_ne!(a.1, b.1);
    }
}

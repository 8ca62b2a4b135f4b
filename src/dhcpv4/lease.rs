// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;

use super::config::DhcpV4Config;
use super::msg::DhcpV4Message;
use super::option::DhcpV4Option;
use crate::{DhcpError, ErrorKind, ETH_ALEN};

/// A validated, fixed-up DHCP lease as handed to the application via
/// [`crate::DhcpV4Event`].
#[derive(Debug, PartialEq, Clone)]
#[non_exhaustive]
pub struct DhcpV4Lease {
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub srv_id: Ipv4Addr,
    pub(crate) srv_mac: Option<[u8; ETH_ALEN]>,
    pub lease_time: u32,
    pub t1: u32,
    pub t2: u32,
    pub subnet_mask: Ipv4Addr,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
}

impl Default for DhcpV4Lease {
    fn default() -> Self {
        Self {
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            srv_id: Ipv4Addr::UNSPECIFIED,
            srv_mac: None,
            lease_time: 0,
            t1: 0,
            t2: 0,
            subnet_mask: Ipv4Addr::UNSPECIFIED,
            router: None,
            dns_servers: Vec::new(),
        }
    }
}

impl std::convert::TryFrom<(&DhcpV4Message, &DhcpV4Config)> for DhcpV4Lease {
    type Error = DhcpError;

    /// Extract the fields this client cares about from a parsed OFFER/ACK.
    /// No fix-up or range validation happens here: that is `validate`'s job,
    /// run against the already-extracted lease so both the OFFER and ACK
    /// paths share one code path for classful-default/clamping rules. The
    /// config is only consulted to cap `dns_servers` at `max_dns_servers`,
    /// a data-model invariant on the lease rather than a wire-level rule.
    fn try_from((msg, config): (&DhcpV4Message, &DhcpV4Config)) -> Result<Self, Self::Error> {
        let mut ret = Self {
            siaddr: msg.siaddr,
            yiaddr: msg.yiaddr,
            srv_mac: msg.srv_mac,
            ..Default::default()
        };
        for opt in msg.options.iter() {
            match opt {
                DhcpV4Option::ServerIdentifier(v) => ret.srv_id = *v,
                DhcpV4Option::AddressLeaseTime(v) => ret.lease_time = *v,
                DhcpV4Option::RenewalTime(v) => ret.t1 = *v,
                DhcpV4Option::RebindingTime(v) => ret.t2 = *v,
                DhcpV4Option::SubnetMask(v) => ret.subnet_mask = *v,
                DhcpV4Option::Router(v) => ret.router = Some(*v),
                DhcpV4Option::DomainNameServer(v) => ret.dns_servers = v.clone(),
                _ => (),
            }
        }
        ret.dns_servers.truncate(config.max_dns_servers as usize);
        if ret.srv_id == Ipv4Addr::UNSPECIFIED {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpServerReply,
                "reply carries no server identifier".to_string(),
            ));
        }
        if ret.yiaddr == Ipv4Addr::UNSPECIFIED {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpServerReply,
                "reply carries no offered address".to_string(),
            ));
        }
        Ok(ret)
    }
}

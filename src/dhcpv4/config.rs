// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;

use crate::netlink::get_iface_index_mac;
use crate::{DhcpError, ErrorKind, ETH_ALEN};

// https://www.iana.org/assignments/arp-parameters/arp-parameters.xhtml#arp-parameters-2
const ARP_HW_TYPE_ETHERNET: u8 = 1;

/// Option 61/60 cannot carry more than a single TLV's length byte worth of
/// data.
const MAX_CLIENT_ID_SIZE: usize = 255;
const MAX_VENDOR_CLASS_ID_SIZE: usize = 255;

const DEFAULT_TIMEOUT_SECONDS: u32 = 120;
const DEFAULT_BASE_RTX_TIMEOUT_SECONDS: u8 = 4;
const DEFAULT_MAX_RTX_TIMEOUT_SECONDS: u8 = 64;
const DEFAULT_XID_REUSE_MAX: u8 = 4;
const DEFAULT_MAX_REQUESTS: u8 = 4;
const DEFAULT_MAX_REBOOT_REQUESTS: u8 = 2;
const DEFAULT_RESET_TIMEOUT_SECONDS: u8 = 10;
const DEFAULT_MIN_RENEW_RTX_TIMEOUT_SECONDS: u8 = 60;
const DEFAULT_ARP_RESPONSE_TIMEOUT_SECONDS: u8 = 1;
const DEFAULT_NUM_ARP_QUERIES: u8 = 2;
const DEFAULT_MAX_DNS_SERVERS: u8 = 4;
const DEFAULT_TTL: u8 = 128;

/// Builder-style configuration for a [`crate::DhcpV4Client`]. All setters
/// validate their argument's range against §3's static parameter bounds and
/// return a programmer-error `DhcpError` rather than panicking, since a
/// caller may construct this from untrusted runtime input.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpV4Config {
    pub(crate) iface_name: String,
    pub(crate) iface_index: u32,
    pub(crate) src_mac: [u8; ETH_ALEN],
    pub(crate) client_id: Vec<u8>,
    pub(crate) vendor_class_id: Vec<u8>,
    pub(crate) host_name: String,
    pub(crate) requested_ip: Option<Ipv4Addr>,
    pub(crate) timeout_seconds: u32,

    pub(crate) max_dns_servers: u8,
    pub(crate) xid_reuse_max: u8,
    pub(crate) max_requests: u8,
    pub(crate) max_reboot_requests: u8,
    pub(crate) base_rtx_timeout_seconds: u8,
    pub(crate) max_rtx_timeout_seconds: u8,
    pub(crate) reset_timeout_seconds: u8,
    pub(crate) min_renew_rtx_timeout_seconds: u8,
    pub(crate) arp_response_timeout_seconds: u8,
    pub(crate) num_arp_queries: u8,
    pub(crate) ttl: u8,
}

impl Default for DhcpV4Config {
    fn default() -> Self {
        Self {
            iface_name: String::new(),
            iface_index: 0,
            src_mac: [0u8; ETH_ALEN],
            client_id: Vec::new(),
            vendor_class_id: Vec::new(),
            host_name: String::new(),
            requested_ip: None,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_dns_servers: DEFAULT_MAX_DNS_SERVERS,
            xid_reuse_max: DEFAULT_XID_REUSE_MAX,
            max_requests: DEFAULT_MAX_REQUESTS,
            max_reboot_requests: DEFAULT_MAX_REBOOT_REQUESTS,
            base_rtx_timeout_seconds: DEFAULT_BASE_RTX_TIMEOUT_SECONDS,
            max_rtx_timeout_seconds: DEFAULT_MAX_RTX_TIMEOUT_SECONDS,
            reset_timeout_seconds: DEFAULT_RESET_TIMEOUT_SECONDS,
            min_renew_rtx_timeout_seconds: DEFAULT_MIN_RENEW_RTX_TIMEOUT_SECONDS,
            arp_response_timeout_seconds: DEFAULT_ARP_RESPONSE_TIMEOUT_SECONDS,
            num_arp_queries: DEFAULT_NUM_ARP_QUERIES,
            ttl: DEFAULT_TTL,
        }
    }
}

fn check_range(name: &str, value: u8, min: u8, max: u8) -> Result<(), DhcpError> {
    if value < min || value > max {
        return Err(DhcpError::new(
            ErrorKind::InvalidArgument,
            format!("{name}={value} is out of range [{min}, {max}]"),
        ));
    }
    Ok(())
}

impl DhcpV4Config {
    pub fn new(iface_name: &str) -> Self {
        Self {
            iface_name: iface_name.to_string(),
            ..Default::default()
        }
    }

    /// Resolve the interface's ifindex and hardware address over netlink.
    pub(crate) async fn init(&mut self) -> Result<(), DhcpError> {
        let (iface_index, mac) = get_iface_index_mac(&self.iface_name).await?;
        self.iface_index = iface_index;
        self.src_mac = mac;
        Ok(())
    }

    pub fn set_timeout(&mut self, timeout_seconds: u32) -> &mut Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn set_host_name(&mut self, host_name: &str) -> &mut Self {
        self.host_name = host_name.to_string();
        self
    }

    pub fn set_requested_ip(&mut self, ip: Ipv4Addr) -> &mut Self {
        self.requested_ip = Some(ip);
        self
    }

    pub fn use_mac_as_client_id(&mut self) -> &mut Self {
        let mut client_id = vec![ARP_HW_TYPE_ETHERNET];
        client_id.extend_from_slice(&self.src_mac);
        self.client_id = client_id;
        self
    }

    pub fn use_host_name_as_client_id(&mut self) -> &mut Self {
        if !self.host_name.is_empty() {
            // RFC 2132 9.14: type 0 identifies a non-hardware-address
            // client identifier. No NUL terminator.
            let host_name = self.host_name.clone();
            self.set_client_id(0, host_name.as_bytes());
        }
        self
    }

    pub fn set_client_id(&mut self, client_id_type: u8, client_id: &[u8]) -> &mut Self {
        let mut full = vec![client_id_type];
        full.extend_from_slice(client_id);
        full.truncate(MAX_CLIENT_ID_SIZE);
        self.client_id = full;
        self
    }

    pub fn set_vendor_class_id(&mut self, vendor_class_id: &[u8]) -> &mut Self {
        let mut v = vendor_class_id.to_vec();
        v.truncate(MAX_VENDOR_CLASS_ID_SIZE);
        self.vendor_class_id = v;
        self
    }

    pub fn set_max_dns_servers(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("MaxDnsServers", v, 1, 31)?;
        self.max_dns_servers = v;
        Ok(self)
    }

    pub fn set_xid_reuse_max(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("XidReuseMax", v, 1, 5)?;
        self.xid_reuse_max = v;
        Ok(self)
    }

    pub fn set_max_requests(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("MaxRequests", v, 1, 5)?;
        self.max_requests = v;
        Ok(self)
    }

    pub fn set_max_reboot_requests(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("MaxRebootRequests", v, 1, 5)?;
        self.max_reboot_requests = v;
        Ok(self)
    }

    pub fn set_base_rtx_timeout_seconds(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("BaseRtxTimeoutSeconds", v, 1, 4)?;
        self.base_rtx_timeout_seconds = v;
        Ok(self)
    }

    pub fn set_max_rtx_timeout_seconds(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("MaxRtxTimeoutSeconds", v, self.base_rtx_timeout_seconds, 255)?;
        self.max_rtx_timeout_seconds = v;
        Ok(self)
    }

    pub fn set_reset_timeout_seconds(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("ResetTimeoutSeconds", v, 1, 128)?;
        self.reset_timeout_seconds = v;
        Ok(self)
    }

    pub fn set_min_renew_rtx_timeout_seconds(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("MinRenewRtxTimeoutSeconds", v, 10, 255)?;
        self.min_renew_rtx_timeout_seconds = v;
        Ok(self)
    }

    pub fn set_arp_response_timeout_seconds(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("ArpResponseTimeoutSeconds", v, 1, 5)?;
        self.arp_response_timeout_seconds = v;
        Ok(self)
    }

    pub fn set_num_arp_queries(&mut self, v: u8) -> Result<&mut Self, DhcpError> {
        check_range("NumArpQueries", v, 1, 10)?;
        self.num_arp_queries = v;
        Ok(self)
    }

    pub fn set_ttl(&mut self, v: u8) -> &mut Self {
        self.ttl = v;
        self
    }
}

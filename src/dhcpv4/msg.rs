// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;

use super::option::{DhcpV4Option, DhcpV4Options, OPT_MESSAGE_TYPE, OPT_SERVER_IDENTIFIER};
use super::socket::{CLIENT_PORT, SERVER_PORT};
use crate::buffer::{Buffer, BufferMut};
use crate::mac::BROADCAST_MAC_ADDRESS;
use crate::{DhcpError, DhcpV4Config, ErrorContext, ErrorKind, ETH_ALEN};

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash, Default)]
#[non_exhaustive]
pub(crate) enum DhcpV4MessageType {
    #[default]
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpV4MessageType {
    pub(crate) fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for DhcpV4MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Discover => "DISCOVER",
                Self::Offer => "OFFER",
                Self::Request => "REQUEST",
                Self::Ack => "ACK",
                Self::Nak => "NAK",
                Self::Decline => "DECLINE",
                Self::Release => "RELEASE",
                Self::Inform => "INFORM",
            }
        )
    }
}

impl TryFrom<u8> for DhcpV4MessageType {
    type Error = DhcpError;

    fn try_from(d: u8) -> Result<Self, DhcpError> {
        Ok(match d {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => {
                return Err(DhcpError::new(
                    ErrorKind::NotSupported,
                    format!("DHCPv4 message type {d} is not supported"),
                ))
            }
        })
    }
}

const MAX_CHADDR_LEN: usize = 16;
const MAX_SNAME_LEN: usize = 64;
const MAX_FILE_LEN: usize = 128;
const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const ARP_HW_TYPE_ETHERNET: u8 = 1;
const HW_ADDR_LEN_ETHERNET: u8 = 6;
const DHCPV4_MAGIC_COOKIE: [u8; 4] = [99u8, 130, 83, 99];

/// Maximum DHCP message size this client advertises via option 57.
const MAX_DHCP_MESSAGE_SIZE: u16 = 1500;

#[derive(Debug, Clone)]
pub(crate) struct DhcpV4Message {
    pub(crate) op: u8,
    pub(crate) htype: u8,
    pub(crate) hlen: u8,
    pub(crate) hops: u8,
    pub(crate) xid: u32,
    pub(crate) secs: u16,
    pub(crate) flags: u16,
    pub(crate) ciaddr: Ipv4Addr,
    pub(crate) yiaddr: Ipv4Addr,
    pub(crate) siaddr: Ipv4Addr,
    pub(crate) giaddr: Ipv4Addr,
    pub(crate) chaddr: [u8; MAX_CHADDR_LEN],
    pub(crate) sname: String,
    pub(crate) file: String,
    pub(crate) options: DhcpV4Options,
    /// Not part of the RFC layout: the source MAC of the Ethernet frame
    /// this message arrived in, filled in by `parse_eth_packet` so the
    /// client can address unicast RENEWING traffic to the leasing server.
    pub(crate) srv_mac: Option<[u8; ETH_ALEN]>,
}

impl Default for DhcpV4Message {
    fn default() -> Self {
        Self {
            op: BOOTREQUEST,
            htype: ARP_HW_TYPE_ETHERNET,
            hlen: HW_ADDR_LEN_ETHERNET,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0u8; MAX_CHADDR_LEN],
            sname: String::new(),
            file: String::new(),
            options: DhcpV4Options::new(),
            srv_mac: None,
        }
    }
}

impl DhcpV4Message {
    // 236-byte fixed header plus 4-byte magic cookie plus the 3-byte
    // mandatory MessageType option.
    const MIN_LEN: usize = 243;

    pub(crate) fn parse(raw: &[u8]) -> Result<Self, DhcpError> {
        if raw.len() < Self::MIN_LEN {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!(
                    "raw data length {} is less than minimum DHCP message size {}",
                    raw.len(),
                    Self::MIN_LEN
                ),
            ));
        }
        let mut buf = Buffer::new(raw);

        let mut ret = Self {
            op: buf.get_u8().context("header field 'op'")?,
            htype: buf.get_u8().context("header field 'htype'")?,
            hlen: buf.get_u8().context("header field 'hlen'")?,
            hops: buf.get_u8().context("header field 'hops'")?,
            xid: buf.get_u32_be().context("header field 'xid'")?,
            secs: buf.get_u16_be().context("header field 'secs'")?,
            flags: buf.get_u16_be().context("header field 'flags'")?,
            ciaddr: buf.get_ipv4().context("header field 'ciaddr'")?,
            yiaddr: buf.get_ipv4().context("header field 'yiaddr'")?,
            siaddr: buf.get_ipv4().context("header field 'siaddr'")?,
            giaddr: buf.get_ipv4().context("header field 'giaddr'")?,
            chaddr: {
                let mut chaddr = [0u8; MAX_CHADDR_LEN];
                chaddr.copy_from_slice(
                    buf.get_bytes(MAX_CHADDR_LEN).context("header field 'chaddr'")?,
                );
                chaddr
            },
            sname: buf
                .get_string_with_null(MAX_SNAME_LEN)
                .context("header field 'sname'")?,
            file: buf
                .get_string_with_null(MAX_FILE_LEN)
                .context("header field 'file'")?,
            options: DhcpV4Options::new(),
            srv_mac: None,
        };

        let magic_cookie = buf.get_bytes(4).context("magic cookie")?;
        if magic_cookie != DHCPV4_MAGIC_COOKIE {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!(
                    "DHCP magic cookie mismatch, expected {DHCPV4_MAGIC_COOKIE:?}, got {magic_cookie:?}"
                ),
            ));
        }

        ret.options = DhcpV4Options::parse(buf.get_remains())
            .context("option area")?;

        if ret.op != BOOTREPLY {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!("expected op=BOOTREPLY, got {}", ret.op),
            ));
        }
        if ret.htype != ARP_HW_TYPE_ETHERNET || ret.hlen != HW_ADDR_LEN_ETHERNET {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!("unexpected htype/hlen {}/{}", ret.htype, ret.hlen),
            ));
        }
        if ret.options.get(OPT_MESSAGE_TYPE).is_none() {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                "missing mandatory message type option".to_string(),
            ));
        }
        if ret.options.get(OPT_SERVER_IDENTIFIER).is_none() {
            return Err(DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                "missing mandatory server identifier option".to_string(),
            ));
        }
        match ret.message_type() {
            Some(DhcpV4MessageType::Offer)
            | Some(DhcpV4MessageType::Ack)
            | Some(DhcpV4MessageType::Nak) => (),
            other => {
                return Err(DhcpError::new(
                    ErrorKind::InvalidDhcpMessage,
                    format!("unexpected message type {other:?} from server"),
                ))
            }
        }

        log::trace!("Parsed DHCP message {ret:?}");
        Ok(ret)
    }

    pub(crate) fn parse_eth_packet(buf: &[u8]) -> Result<Self, DhcpError> {
        let packet = etherparse::SlicedPacket::from_ethernet(buf).map_err(|e| {
            DhcpError::new(
                ErrorKind::InvalidDhcpMessage,
                format!("failed to parse ethernet frame: {e}"),
            )
        })?;

        let udp_payload = match packet.transport {
            Some(etherparse::TransportSlice::Udp(udp)) => udp.payload(),
            _ => {
                return Err(DhcpError::new(
                    ErrorKind::InvalidDhcpMessage,
                    "ethernet frame carries no UDP payload".to_string(),
                ))
            }
        };

        let mut ret = Self::parse(udp_payload)?;
        if let Some(eth_header) = packet.link.and_then(|l| l.to_header()).and_then(|h| h.ethernet2()) {
            ret.srv_mac = Some(eth_header.source);
        }
        Ok(ret)
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        buf.write_u8(self.op);
        buf.write_u8(self.htype);
        buf.write_u8(self.hlen);
        buf.write_u8(self.hops);
        buf.write_u32_be(self.xid);
        buf.write_u16_be(self.secs);
        buf.write_u16_be(self.flags);
        buf.write_ipv4(self.ciaddr);
        buf.write_ipv4(self.yiaddr);
        buf.write_ipv4(self.siaddr);
        buf.write_ipv4(self.giaddr);
        buf.write_bytes(&self.chaddr);
        buf.write_string_with_null(&self.sname, MAX_SNAME_LEN);
        buf.write_string_with_null(&self.file, MAX_FILE_LEN);
        buf.write_bytes(&DHCPV4_MAGIC_COOKIE);
        self.options.emit(buf);
    }

    pub(crate) fn to_dhcp_packet(&self) -> Vec<u8> {
        let mut buf = BufferMut::new(Self::MIN_LEN);
        self.emit(&mut buf);
        buf.data
    }

    pub(crate) fn to_eth_packet_broadcast(
        &self,
        src_mac: [u8; ETH_ALEN],
        ttl: u8,
    ) -> Result<Vec<u8>, DhcpError> {
        gen_eth_packet(
            src_mac,
            BROADCAST_MAC_ADDRESS,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::BROADCAST,
            CLIENT_PORT,
            SERVER_PORT,
            ttl,
            &self.to_dhcp_packet(),
        )
    }

    pub(crate) fn to_eth_packet_unicast(
        &self,
        src_mac: [u8; ETH_ALEN],
        dst_mac: [u8; ETH_ALEN],
        dst_ip: Ipv4Addr,
        ttl: u8,
    ) -> Result<Vec<u8>, DhcpError> {
        gen_eth_packet(
            src_mac,
            dst_mac,
            self.ciaddr,
            dst_ip,
            CLIENT_PORT,
            SERVER_PORT,
            ttl,
            &self.to_dhcp_packet(),
        )
    }

    fn base(xid: u32, config: &DhcpV4Config) -> Self {
        let mut ret = Self {
            xid,
            ..Default::default()
        };
        ret.chaddr[..ETH_ALEN].copy_from_slice(&config.src_mac);
        ret
    }

    fn add_identity_options(&mut self, config: &DhcpV4Config, msg_type: DhcpV4MessageType) {
        if !config.client_id.is_empty() {
            self.options
                .push(DhcpV4Option::ClientIdentifier(config.client_id.clone()));
        }
        if msg_type != DhcpV4MessageType::Decline {
            if !config.vendor_class_id.is_empty() {
                self.options.push(DhcpV4Option::VendorClassIdentifier(
                    config.vendor_class_id.clone(),
                ));
            }
        }
    }

    pub(crate) fn new_discover(xid: u32, config: &DhcpV4Config) -> Self {
        let mut ret = Self::base(xid, config);
        ret.options
            .push(DhcpV4Option::MessageType(DhcpV4MessageType::Discover));
        ret.options
            .push(DhcpV4Option::ParameterRequestList(parameter_request_list()));
        ret.options
            .push(DhcpV4Option::MaxMessageSize(MAX_DHCP_MESSAGE_SIZE));
        ret.add_identity_options(config, DhcpV4MessageType::Discover);
        ret
    }

    /// REBOOTING: re-request a remembered address without having seen an
    /// OFFER. `ciaddr` stays zero; the address goes in option 50.
    pub(crate) fn new_request_rebooting(
        xid: u32,
        config: &DhcpV4Config,
        requested_ip: Ipv4Addr,
    ) -> Self {
        let mut ret = Self::base(xid, config);
        ret.options
            .push(DhcpV4Option::MessageType(DhcpV4MessageType::Request));
        ret.options
            .push(DhcpV4Option::RequestedIpAddress(requested_ip));
        ret.options
            .push(DhcpV4Option::ParameterRequestList(parameter_request_list()));
        ret.options
            .push(DhcpV4Option::MaxMessageSize(MAX_DHCP_MESSAGE_SIZE));
        ret.add_identity_options(config, DhcpV4MessageType::Request);
        ret
    }

    /// REQUESTING: accept a specific OFFER. `ciaddr` stays zero; both the
    /// requested address and the offering server's identifier are sent.
    pub(crate) fn new_request_selecting(
        xid: u32,
        config: &DhcpV4Config,
        offered_ip: Ipv4Addr,
        server_id: Ipv4Addr,
    ) -> Self {
        let mut ret = Self::new_request_rebooting(xid, config, offered_ip);
        ret.options.push(DhcpV4Option::ServerIdentifier(server_id));
        ret
    }

    /// RENEWING/REBINDING: unicast or broadcast REQUEST with `ciaddr` set
    /// and no requested-IP/server-identifier options (RFC 2131 table 4).
    pub(crate) fn new_request_renew_rebind(
        xid: u32,
        config: &DhcpV4Config,
        ciaddr: Ipv4Addr,
    ) -> Self {
        let mut ret = Self::base(xid, config);
        ret.ciaddr = ciaddr;
        ret.options
            .push(DhcpV4Option::MessageType(DhcpV4MessageType::Request));
        ret.options
            .push(DhcpV4Option::ParameterRequestList(parameter_request_list()));
        ret.options
            .push(DhcpV4Option::MaxMessageSize(MAX_DHCP_MESSAGE_SIZE));
        ret.add_identity_options(config, DhcpV4MessageType::Request);
        ret
    }

    pub(crate) fn new_decline(
        xid: u32,
        config: &DhcpV4Config,
        declined_ip: Ipv4Addr,
        server_id: Ipv4Addr,
        message: &str,
    ) -> Self {
        let mut ret = Self::base(xid, config);
        ret.options
            .push(DhcpV4Option::MessageType(DhcpV4MessageType::Decline));
        ret.options
            .push(DhcpV4Option::RequestedIpAddress(declined_ip));
        ret.options.push(DhcpV4Option::ServerIdentifier(server_id));
        ret.options.push(DhcpV4Option::Message(message.to_string()));
        ret.add_identity_options(config, DhcpV4MessageType::Decline);
        ret
    }

    pub(crate) fn message_type(&self) -> Option<DhcpV4MessageType> {
        match self.options.get(OPT_MESSAGE_TYPE) {
            Some(DhcpV4Option::MessageType(t)) => Some(*t),
            _ => None,
        }
    }
}

fn parameter_request_list() -> Vec<u8> {
    use super::option::{
        OPT_ADDRESS_LEASE_TIME, OPT_DOMAIN_NAME_SERVER, OPT_REBINDING_TIME, OPT_RENEWAL_TIME,
        OPT_ROUTER, OPT_SUBNET_MASK,
    };
    vec![
        OPT_SUBNET_MASK,
        OPT_ROUTER,
        OPT_DOMAIN_NAME_SERVER,
        OPT_ADDRESS_LEASE_TIME,
        OPT_RENEWAL_TIME,
        OPT_REBINDING_TIME,
    ]
}

fn gen_eth_packet(
    src_mac: [u8; ETH_ALEN],
    dst_mac: [u8; ETH_ALEN],
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    payload: &[u8],
) -> Result<Vec<u8>, DhcpError> {
    let builder = etherparse::PacketBuilder::ethernet2(src_mac, dst_mac)
        .ipv4(src_ip.octets(), dst_ip.octets(), ttl)
        .udp(src_port, dst_port);

    let mut packet = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder.write(&mut packet, payload)?;
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_round_trips_header_fields() {
        let mut config = DhcpV4Config::new("eth0");
        config.src_mac = [2, 0, 0, 0, 0, 1];
        let msg = DhcpV4Message::new_discover(0x1234_5678, &config);
        let raw = msg.to_dhcp_packet();

        let parsed = Buffer::new(&raw);
        let mut parsed = parsed;
        assert_eq!(parsed.get_u8().unwrap(), BOOTREQUEST);
        assert_eq!(parsed.get_u8().unwrap(), ARP_HW_TYPE_ETHERNET);
        assert_eq!(parsed.get_u8().unwrap(), HW_ADDR_LEN_ETHERNET);
    }

    #[test]
    fn parameter_request_list_matches_consumed_options() {
        let list = parameter_request_list();
        assert!(list.contains(&super::super::option::OPT_SUBNET_MASK));
        assert!(list.contains(&super::super::option::OPT_ROUTER));
        assert!(list.contains(&super::super::option::OPT_DOMAIN_NAME_SERVER));
        assert!(list.contains(&super::super::option::OPT_ADDRESS_LEASE_TIME));
        assert!(list.contains(&super::super::option::OPT_RENEWAL_TIME));
        assert!(list.contains(&super::super::option::OPT_REBINDING_TIME));
    }
}

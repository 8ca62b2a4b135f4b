// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;

use crate::buffer::{Buffer, BufferMut};
use crate::dhcpv4::msg::DhcpV4MessageType;
use crate::{DhcpError, ErrorKind};

pub(crate) const OPT_PAD: u8 = 0;
pub(crate) const OPT_SUBNET_MASK: u8 = 1;
pub(crate) const OPT_ROUTER: u8 = 3;
pub(crate) const OPT_DOMAIN_NAME_SERVER: u8 = 6;
pub(crate) const OPT_REQUESTED_IP_ADDRESS: u8 = 50;
pub(crate) const OPT_ADDRESS_LEASE_TIME: u8 = 51;
pub(crate) const OPT_MESSAGE_TYPE: u8 = 53;
pub(crate) const OPT_SERVER_IDENTIFIER: u8 = 54;
pub(crate) const OPT_PARAMETER_REQUEST_LIST: u8 = 55;
pub(crate) const OPT_MESSAGE: u8 = 56;
pub(crate) const OPT_MAX_MESSAGE_SIZE: u8 = 57;
pub(crate) const OPT_RENEWAL_TIME: u8 = 58;
pub(crate) const OPT_REBINDING_TIME: u8 = 59;
pub(crate) const OPT_VENDOR_CLASS_IDENTIFIER: u8 = 60;
pub(crate) const OPT_CLIENT_IDENTIFIER: u8 = 61;
pub(crate) const OPT_END: u8 = 255;

/// One decoded DHCP option. Only the codes this client emits or consumes
/// (per RFC 2132) get a typed variant; everything else round-trips through
/// `Unknown` so a malformed or exotic option never aborts the whole parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DhcpV4Option {
    SubnetMask(Ipv4Addr),
    Router(Ipv4Addr),
    DomainNameServer(Vec<Ipv4Addr>),
    RequestedIpAddress(Ipv4Addr),
    AddressLeaseTime(u32),
    MessageType(DhcpV4MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    Message(String),
    MaxMessageSize(u16),
    RenewalTime(u32),
    RebindingTime(u32),
    VendorClassIdentifier(Vec<u8>),
    ClientIdentifier(Vec<u8>),
    Unknown(u8, Vec<u8>),
}

impl DhcpV4Option {
    pub(crate) fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OPT_SUBNET_MASK,
            Self::Router(_) => OPT_ROUTER,
            Self::DomainNameServer(_) => OPT_DOMAIN_NAME_SERVER,
            Self::RequestedIpAddress(_) => OPT_REQUESTED_IP_ADDRESS,
            Self::AddressLeaseTime(_) => OPT_ADDRESS_LEASE_TIME,
            Self::MessageType(_) => OPT_MESSAGE_TYPE,
            Self::ServerIdentifier(_) => OPT_SERVER_IDENTIFIER,
            Self::ParameterRequestList(_) => OPT_PARAMETER_REQUEST_LIST,
            Self::Message(_) => OPT_MESSAGE,
            Self::MaxMessageSize(_) => OPT_MAX_MESSAGE_SIZE,
            Self::RenewalTime(_) => OPT_RENEWAL_TIME,
            Self::RebindingTime(_) => OPT_REBINDING_TIME,
            Self::VendorClassIdentifier(_) => OPT_VENDOR_CLASS_IDENTIFIER,
            Self::ClientIdentifier(_) => OPT_CLIENT_IDENTIFIER,
            Self::Unknown(code, _) => *code,
        }
    }

    fn emit_value(&self, buf: &mut BufferMut) {
        match self {
            Self::SubnetMask(ip)
            | Self::Router(ip)
            | Self::RequestedIpAddress(ip)
            | Self::ServerIdentifier(ip) => buf.write_ipv4(*ip),
            Self::DomainNameServer(ips) => {
                for ip in ips {
                    buf.write_ipv4(*ip);
                }
            }
            Self::AddressLeaseTime(v) | Self::RenewalTime(v) | Self::RebindingTime(v) => {
                buf.write_u32_be(*v)
            }
            Self::MessageType(t) => buf.write_u8(t.as_u8()),
            Self::ParameterRequestList(codes) => buf.write_bytes(codes),
            Self::Message(text) => buf.write_string_without_null(text),
            Self::MaxMessageSize(v) => buf.write_u16_be(*v),
            Self::VendorClassIdentifier(bytes) | Self::ClientIdentifier(bytes) => {
                buf.write_bytes(bytes)
            }
            Self::Unknown(_, bytes) => buf.write_bytes(bytes),
        }
    }

    fn value_len(&self) -> usize {
        match self {
            Self::SubnetMask(_)
            | Self::Router(_)
            | Self::RequestedIpAddress(_)
            | Self::ServerIdentifier(_) => 4,
            Self::DomainNameServer(ips) => ips.len() * 4,
            Self::AddressLeaseTime(_) | Self::RenewalTime(_) | Self::RebindingTime(_) => 4,
            Self::MessageType(_) => 1,
            Self::ParameterRequestList(codes) => codes.len(),
            Self::Message(text) => text.as_bytes().len(),
            Self::MaxMessageSize(_) => 2,
            Self::VendorClassIdentifier(bytes) | Self::ClientIdentifier(bytes) => bytes.len(),
            Self::Unknown(_, bytes) => bytes.len(),
        }
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        buf.write_u8(self.code());
        buf.write_u8(self.value_len() as u8);
        self.emit_value(buf);
    }

    fn decode(code: u8, raw: &[u8]) -> Result<Self, DhcpError> {
        let mut value = Buffer::new(raw);
        Ok(match code {
            OPT_SUBNET_MASK => Self::SubnetMask(value.get_ipv4()?),
            OPT_ROUTER => Self::Router(value.get_ipv4()?),
            OPT_DOMAIN_NAME_SERVER => {
                let mut ips = Vec::new();
                while !value.is_empty() {
                    ips.push(value.get_ipv4()?);
                }
                Self::DomainNameServer(ips)
            }
            OPT_REQUESTED_IP_ADDRESS => Self::RequestedIpAddress(value.get_ipv4()?),
            OPT_ADDRESS_LEASE_TIME => Self::AddressLeaseTime(value.get_u32_be()?),
            OPT_MESSAGE_TYPE => {
                Self::MessageType(DhcpV4MessageType::try_from(value.get_u8()?)?)
            }
            OPT_SERVER_IDENTIFIER => Self::ServerIdentifier(value.get_ipv4()?),
            OPT_PARAMETER_REQUEST_LIST => {
                Self::ParameterRequestList(value.get_bytes(raw.len())?.to_vec())
            }
            OPT_MESSAGE => Self::Message(value.get_string_without_null(raw.len())?),
            OPT_MAX_MESSAGE_SIZE => Self::MaxMessageSize(value.get_u16_be()?),
            OPT_RENEWAL_TIME => Self::RenewalTime(value.get_u32_be()?),
            OPT_REBINDING_TIME => Self::RebindingTime(value.get_u32_be()?),
            OPT_VENDOR_CLASS_IDENTIFIER => {
                Self::VendorClassIdentifier(value.get_bytes(raw.len())?.to_vec())
            }
            OPT_CLIENT_IDENTIFIER => {
                Self::ClientIdentifier(value.get_bytes(raw.len())?.to_vec())
            }
            _ => Self::Unknown(code, raw.to_vec()),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DhcpV4Options {
    opts: Vec<DhcpV4Option>,
}

impl DhcpV4Options {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, opt: DhcpV4Option) {
        self.opts.push(opt);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &DhcpV4Option> {
        self.opts.iter()
    }

    pub(crate) fn get(&self, code: u8) -> Option<&DhcpV4Option> {
        self.opts.iter().find(|o| o.code() == code)
    }

    /// Parse the TLV option area: `code(1) len(1) value(len)`, padded with
    /// 0x00, terminated by 0xFF. An unterminated option area is accepted as
    /// long as every TLV inside it is well formed, since some servers omit
    /// the trailing pad when the option area ends exactly on a boundary.
    pub(crate) fn parse(raw: &[u8]) -> Result<Self, DhcpError> {
        let mut buf = Buffer::new(raw);
        let mut opts = Self::new();
        while !buf.is_empty() {
            let code = buf.get_u8()?;
            if code == OPT_PAD {
                continue;
            }
            if code == OPT_END {
                break;
            }
            let len = buf.get_u8()? as usize;
            let value = buf.get_bytes(len)?;
            opts.push(DhcpV4Option::decode(code, value)?);
        }
        Ok(opts)
    }

    pub(crate) fn emit(&self, buf: &mut BufferMut) {
        for opt in &self.opts {
            opt.emit(buf);
        }
        buf.write_u8(OPT_END);
    }
}

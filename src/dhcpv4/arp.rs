// SPDX-License-Identifier: Apache-2.0

//! ARP-based duplicate address detection used by the CHECKING state.
//!
//! The DHCP BPF filter installed on the main raw socket (`ip and udp dst
//! port 68`) never passes ARP frames, so probing uses a second raw socket
//! bound directly to `ETH_P_ARP` instead of touching that filter.

use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use nix::sys::socket::MsgFlags;
use tokio::io::unix::AsyncFd;

use super::socket::{bind_raw_socket, create_raw_eth_socket};
use crate::buffer::{Buffer, BufferMut};
use crate::mac::BROADCAST_MAC_ADDRESS;
use crate::{DhcpError, DhcpV4Config, ErrorKind, ETH_ALEN};

const ETHERTYPE_ARP: u16 = 0x0806;
const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_HLEN_ETHERNET: u8 = 6;
const ARP_PLEN_IPV4: u8 = 4;
const ARP_OPER_REQUEST: u16 = 1;
const ARP_OPER_REPLY: u16 = 2;
const ETH_HEADER_LEN: usize = 14;
const ARP_PACKET_LEN: usize = 28;

pub(crate) struct ArpProbe {
    fd: AsyncFd<OwnedFd>,
    src_mac: [u8; ETH_ALEN],
}

impl ArpProbe {
    pub(crate) fn new(config: &DhcpV4Config) -> Result<Self, DhcpError> {
        let fd = create_raw_eth_socket()?;
        bind_raw_socket(
            fd.as_raw_fd(),
            libc::ETH_P_ARP,
            config.iface_index as libc::c_int,
            &config.src_mac,
        )?;
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            src_mac: config.src_mac,
        })
    }

    /// Send `config.num_arp_queries` who-has probes for `candidate_ip`,
    /// waiting up to `config.arp_response_timeout_seconds` between each.
    /// Returns the replier's MAC as soon as any is-at response for the
    /// candidate address arrives; `None` if nothing answered after all
    /// queries.
    pub(crate) async fn probe(
        &self,
        config: &DhcpV4Config,
        candidate_ip: Ipv4Addr,
    ) -> Result<Option<[u8; ETH_ALEN]>, DhcpError> {
        let timeout = Duration::from_secs(config.arp_response_timeout_seconds as u64);
        for query in 0..config.num_arp_queries {
            log::debug!("ARP probe {}/{} for {candidate_ip}", query + 1, config.num_arp_queries);
            self.send_request(candidate_ip).await?;

            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, self.recv_frame()).await {
                    Ok(Ok(frame)) => {
                        if let Some(mac) = parse_is_at(&frame, candidate_ip) {
                            return Ok(Some(mac));
                        }
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => break,
                }
            }
        }
        Ok(None)
    }

    async fn send_request(&self, target_ip: Ipv4Addr) -> Result<(), DhcpError> {
        let frame = build_request(self.src_mac, Ipv4Addr::UNSPECIFIED, target_ip);
        let mut sent = 0;
        while sent < frame.len() {
            let mut guard = self.fd.writable().await?;
            let _ = guard
                .try_io(|inner| {
                    sent += nix::sys::socket::send(
                        inner.get_ref().as_raw_fd(),
                        &frame[sent..],
                        MsgFlags::empty(),
                    )?;
                    Ok(())
                })
                .map_err(|e| {
                    DhcpError::new(ErrorKind::IoError, format!("failed to send ARP probe: {e:?}"))
                })?;
        }
        Ok(())
    }

    async fn recv_frame(&self) -> Result<Vec<u8>, DhcpError> {
        let mut buffer = [0u8; 64];
        let rc = loop {
            let mut guard = self.fd.readable().await?;
            if let Ok(s) = guard.try_io(|inner| {
                Ok(nix::sys::socket::recv(
                    inner.get_ref().as_raw_fd(),
                    &mut buffer,
                    MsgFlags::empty(),
                )?)
            }) {
                break s?;
            }
        };
        Ok(buffer[..rc].to_vec())
    }
}

fn build_request(src_mac: [u8; ETH_ALEN], src_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let mut buf = BufferMut::new(ETH_HEADER_LEN + ARP_PACKET_LEN);
    buf.write_bytes(&BROADCAST_MAC_ADDRESS);
    buf.write_bytes(&src_mac);
    buf.write_u16_be(ETHERTYPE_ARP);

    buf.write_u16_be(ARP_HTYPE_ETHERNET);
    buf.write_u16_be(ARP_PTYPE_IPV4);
    buf.write_u8(ARP_HLEN_ETHERNET);
    buf.write_u8(ARP_PLEN_IPV4);
    buf.write_u16_be(ARP_OPER_REQUEST);
    buf.write_bytes(&src_mac);
    buf.write_ipv4(src_ip);
    buf.write_bytes(&[0u8; ETH_ALEN]);
    buf.write_ipv4(target_ip);
    buf.data
}

/// Returns the sender MAC if `frame` is an ARP is-at reply claiming
/// `candidate_ip`.
fn parse_is_at(frame: &[u8], candidate_ip: Ipv4Addr) -> Option<[u8; ETH_ALEN]> {
    if frame.len() < ETH_HEADER_LEN + ARP_PACKET_LEN {
        return None;
    }
    let mut buf = Buffer::new(&frame[ETH_HEADER_LEN..]);
    let htype = buf.get_u16_be().ok()?;
    let ptype = buf.get_u16_be().ok()?;
    let hlen = buf.get_u8().ok()?;
    let plen = buf.get_u8().ok()?;
    let oper = buf.get_u16_be().ok()?;
    if htype != ARP_HTYPE_ETHERNET
        || ptype != ARP_PTYPE_IPV4
        || hlen != ARP_HLEN_ETHERNET
        || plen != ARP_PLEN_IPV4
        || oper != ARP_OPER_REPLY
    {
        return None;
    }
    let mut sender_mac = [0u8; ETH_ALEN];
    sender_mac.copy_from_slice(buf.get_bytes(ETH_ALEN).ok()?);
    let sender_ip = buf.get_ipv4().ok()?;
    if sender_ip != candidate_ip {
        return None;
    }
    Some(sender_mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_at_reply_for_candidate_is_recognized() {
        let replier_mac = [0x02, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa];
        let candidate = Ipv4Addr::new(192, 0, 2, 10);

        let mut buf = BufferMut::new(ETH_HEADER_LEN + ARP_PACKET_LEN);
        buf.write_bytes(&[0xffu8; ETH_ALEN]);
        buf.write_bytes(&replier_mac);
        buf.write_u16_be(ETHERTYPE_ARP);
        buf.write_u16_be(ARP_HTYPE_ETHERNET);
        buf.write_u16_be(ARP_PTYPE_IPV4);
        buf.write_u8(ARP_HLEN_ETHERNET);
        buf.write_u8(ARP_PLEN_IPV4);
        buf.write_u16_be(ARP_OPER_REPLY);
        buf.write_bytes(&replier_mac);
        buf.write_ipv4(candidate);
        buf.write_bytes(&[0u8; ETH_ALEN]);
        buf.write_ipv4(candidate);

        assert_eq!(parse_is_at(&buf.data, candidate), Some(replier_mac));
    }

    #[test]
    fn reply_for_other_address_is_ignored() {
        let replier_mac = [0x02, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa];
        let candidate = Ipv4Addr::new(192, 0, 2, 10);
        let other = Ipv4Addr::new(192, 0, 2, 99);

        let mut buf = BufferMut::new(ETH_HEADER_LEN + ARP_PACKET_LEN);
        buf.write_bytes(&[0xffu8; ETH_ALEN]);
        buf.write_bytes(&replier_mac);
        buf.write_u16_be(ETHERTYPE_ARP);
        buf.write_u16_be(ARP_HTYPE_ETHERNET);
        buf.write_u16_be(ARP_PTYPE_IPV4);
        buf.write_u8(ARP_HLEN_ETHERNET);
        buf.write_u8(ARP_PLEN_IPV4);
        buf.write_u16_be(ARP_OPER_REPLY);
        buf.write_bytes(&replier_mac);
        buf.write_ipv4(other);
        buf.write_bytes(&[0u8; ETH_ALEN]);
        buf.write_ipv4(candidate);

        assert_eq!(parse_is_at(&buf.data, candidate), None);
    }
}

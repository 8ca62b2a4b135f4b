// SPDX-License-Identifier: Apache-2.0

//! OFFER sanity checks and the ACK validation/fix-up pipeline. Both run
//! against an already-decoded [`DhcpV4Message`]/[`DhcpV4Lease`] pair so the
//! rules read as a flat, short-circuiting list instead of being tangled
//! into the wire codec or the state machine.

use std::net::Ipv4Addr;

use super::lease::DhcpV4Lease;
use super::msg::DhcpV4Message;
use crate::{DhcpError, ErrorKind, ETH_ALEN};

/// Extra facts the fix-up pipeline needs that aren't carried on the wire:
/// what state the client was in when it sent the request this reply answers.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct AckContext {
    /// Set when replying to a REQUESTING REQUEST: the OFFER's address and
    /// server identifier must be echoed back unchanged.
    pub(crate) offered_yiaddr: Option<Ipv4Addr>,
    pub(crate) offered_srv_id: Option<Ipv4Addr>,
    /// Set when replying to a RENEWING/REBINDING REQUEST.
    pub(crate) lease_time_elapsed: Option<u32>,
    pub(crate) request_send_time_elapsed: Option<u32>,
    pub(crate) max_timer_seconds: u32,
}

fn address_sanity_check(ip: Ipv4Addr) -> Result<(), DhcpError> {
    if ip.is_unspecified() {
        return Err(reject("address is 0.0.0.0"));
    }
    if ip == Ipv4Addr::BROADCAST {
        return Err(reject("address is the limited broadcast address"));
    }
    if ip.octets()[0] == 127 {
        return Err(reject("address is in 127.0.0.0/8"));
    }
    if ip.octets()[0] >= 224 {
        return Err(reject("address is in the 224.0.0.0/4 multicast range"));
    }
    Ok(())
}

fn reject(why: &str) -> DhcpError {
    DhcpError::new(ErrorKind::InvalidDhcpServerReply, why.to_string())
}

pub(crate) fn chaddr_matches(msg: &DhcpV4Message, our_mac: &[u8; ETH_ALEN]) -> bool {
    &msg.chaddr[..ETH_ALEN] == our_mac.as_slice()
}

/// Common sanity shared by OFFER and ACK: header shape is checked already
/// by `DhcpV4Message::parse`, so this covers the per-exchange facts parse
/// cannot know (xid, chaddr) plus the offered address range.
fn base_sanity_check(
    msg: &DhcpV4Message,
    xid: u32,
    our_mac: &[u8; ETH_ALEN],
) -> Result<(), DhcpError> {
    if msg.xid != xid {
        return Err(reject("xid does not match the outstanding request"));
    }
    if !chaddr_matches(msg, our_mac) {
        return Err(reject("chaddr does not match our hardware address"));
    }
    address_sanity_check(msg.yiaddr)
}

pub(crate) fn validate_offer(
    msg: &DhcpV4Message,
    xid: u32,
    our_mac: &[u8; ETH_ALEN],
) -> Result<(), DhcpError> {
    base_sanity_check(msg, xid, our_mac)
}

fn classful_default_mask(yiaddr: Ipv4Addr) -> Result<Ipv4Addr, DhcpError> {
    let first_octet = yiaddr.octets()[0];
    Ok(if first_octet < 128 {
        Ipv4Addr::new(255, 0, 0, 0)
    } else if first_octet < 192 {
        Ipv4Addr::new(255, 255, 0, 0)
    } else if first_octet < 224 {
        Ipv4Addr::new(255, 255, 255, 0)
    } else {
        return Err(reject("address has no classful default subnet mask"));
    })
}

fn is_contiguous_mask(mask: Ipv4Addr) -> bool {
    let bits = u32::from_be_bytes(mask.octets());
    let inverted = !bits;
    // A contiguous "ones then zeros" mask satisfies inverted & (inverted+1) == 0
    // (inverted is itself all-ones-from-the-low-end, i.e. 2^n - 1).
    inverted & inverted.wrapping_add(1) == 0
}

fn directed_broadcast(yiaddr: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    let addr_bits = u32::from_be_bytes(yiaddr.octets());
    let mask_bits = u32::from_be_bytes(mask.octets());
    Ipv4Addr::from((addr_bits & mask_bits) | !mask_bits)
}

fn same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask: Ipv4Addr) -> bool {
    let mask_bits = u32::from_be_bytes(mask.octets());
    (u32::from_be_bytes(a.octets()) & mask_bits) == (u32::from_be_bytes(b.octets()) & mask_bits)
}

/// Run the 11-rule ACK validation/fix-up pipeline against an already
/// option-extracted lease. Returns the fixed-up lease or the first rule
/// that failed.
pub(crate) fn validate_and_fixup_ack(
    msg: &DhcpV4Message,
    xid: u32,
    our_mac: &[u8; ETH_ALEN],
    mut lease: DhcpV4Lease,
    ctx: &AckContext,
) -> Result<DhcpV4Lease, DhcpError> {
    // Rule 1: OFFER sanity plus lease time present.
    base_sanity_check(msg, xid, our_mac)?;
    if lease.lease_time == 0 {
        return Err(reject("ack carries no address lease time"));
    }

    // Rule 2: classful default subnet mask if absent.
    if lease.subnet_mask == Ipv4Addr::UNSPECIFIED {
        lease.subnet_mask = classful_default_mask(lease.yiaddr)?;
    }

    // Rule 3: mask must be contiguous ones-then-zeros.
    if !is_contiguous_mask(lease.subnet_mask) {
        return Err(reject("subnet mask is not contiguous"));
    }

    // Rule 4: yiaddr must not equal its own directed broadcast address.
    if lease.yiaddr == directed_broadcast(lease.yiaddr, lease.subnet_mask) {
        return Err(reject("offered address is the subnet's directed broadcast address"));
    }

    // Rule 5: drop router silently if not in the same subnet as yiaddr.
    if let Some(router) = lease.router {
        if !same_subnet(router, lease.yiaddr, lease.subnet_mask) {
            log::debug!("dropping router {router} outside the offered subnet");
            lease.router = None;
        }
    }

    // Rule 6/7: renewal time default and cap.
    if lease.t1 == 0 {
        lease.t1 = lease.lease_time / 2;
    }
    lease.t1 = lease.t1.min(lease.lease_time);

    // Rule 8/9: rebinding time default and clamp.
    if lease.t2 == 0 {
        lease.t2 = lease.lease_time / 8 * 7;
    }
    lease.t2 = lease.t2.clamp(lease.t1, lease.lease_time);

    // Rule 10: REQUESTING must echo the stored OFFER.
    if let Some(offered_yiaddr) = ctx.offered_yiaddr {
        if lease.yiaddr != offered_yiaddr {
            return Err(reject("ack's yiaddr does not match the accepted offer"));
        }
    }
    if let Some(offered_srv_id) = ctx.offered_srv_id {
        if lease.srv_id != offered_srv_id {
            return Err(reject("ack's server identifier does not match the accepted offer"));
        }
    }

    // Rule 11: RENEWING/REBINDING replies arriving implausibly late.
    if let (Some(lease_time_elapsed), Some(request_send_time_elapsed)) =
        (ctx.lease_time_elapsed, ctx.request_send_time_elapsed)
    {
        if lease_time_elapsed.saturating_sub(request_send_time_elapsed) > ctx.max_timer_seconds {
            return Err(reject("ack arrived implausibly late for the outstanding request"));
        }
    }

    Ok(lease)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classful_default_picks_class_a_b_c() {
        assert_eq!(
            classful_default_mask(Ipv4Addr::new(10, 0, 0, 1)).unwrap(),
            Ipv4Addr::new(255, 0, 0, 0)
        );
        assert_eq!(
            classful_default_mask(Ipv4Addr::new(172, 16, 0, 1)).unwrap(),
            Ipv4Addr::new(255, 255, 0, 0)
        );
        assert_eq!(
            classful_default_mask(Ipv4Addr::new(192, 168, 0, 1)).unwrap(),
            Ipv4Addr::new(255, 255, 255, 0)
        );
        assert!(classful_default_mask(Ipv4Addr::new(224, 0, 0, 1)).is_err());
    }

    #[test]
    fn contiguous_mask_check() {
        assert!(is_contiguous_mask(Ipv4Addr::new(255, 255, 255, 0)));
        assert!(is_contiguous_mask(Ipv4Addr::new(255, 255, 255, 255)));
        assert!(!is_contiguous_mask(Ipv4Addr::new(255, 0, 255, 0)));
    }

    #[test]
    fn directed_broadcast_matches_known_subnet() {
        let addr = Ipv4Addr::new(192, 0, 2, 10);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        assert_eq!(directed_broadcast(addr, mask), Ipv4Addr::new(192, 0, 2, 255));
    }

    #[test]
    fn router_outside_subnet_is_dropped() {
        let msg = DhcpV4Message {
            xid: 1,
            yiaddr: Ipv4Addr::new(192, 0, 2, 10),
            ..Default::default()
        };
        let mut our_mac = [0u8; ETH_ALEN];
        our_mac.copy_from_slice(&msg.chaddr[..ETH_ALEN]);
        let lease = DhcpV4Lease {
            yiaddr: Ipv4Addr::new(192, 0, 2, 10),
            srv_id: Ipv4Addr::new(192, 0, 2, 1),
            lease_time: 3600,
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            router: Some(Ipv4Addr::new(198, 51, 100, 1)),
            ..Default::default()
        };
        let ctx = AckContext {
            max_timer_seconds: u32::MAX,
            ..Default::default()
        };
        let fixed = validate_and_fixup_ack(&msg, 1, &our_mac, lease, &ctx).unwrap();
        assert_eq!(fixed.router, None);
    }
}

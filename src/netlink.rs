// SPDX-License-Identifier: Apache-2.0

use std::net::{IpAddr, Ipv4Addr};

use futures::stream::TryStreamExt;
use rtnetlink::packet_route::address::AddressAttribute;
use rtnetlink::packet_route::link::{LinkAttribute, LinkFlags};
use rtnetlink::packet_route::route::{RouteAddress, RouteAttribute};
use rtnetlink::IpVersion;

use crate::{DhcpError, ErrorKind, ETH_ALEN};

/// Resolve an interface's ifindex and hardware address. Spawns its own
/// netlink connection and tears it down once the lookup completes, mirroring
/// how short-lived netlink queries are issued elsewhere in this crate's
/// lineage rather than holding a connection open for the whole client
/// lifetime.
pub(crate) async fn get_iface_index_mac(
    iface_name: &str,
) -> Result<(u32, [u8; ETH_ALEN]), DhcpError> {
    let (connection, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(connection);

    let mut links = handle
        .link()
        .get()
        .match_name(iface_name.to_string())
        .execute();

    while let Some(nl_msg) = links.try_next().await? {
        let mut mac = None;
        for nla in &nl_msg.attributes {
            if let LinkAttribute::Address(addr) = nla {
                if addr.len() == ETH_ALEN {
                    let mut buf = [0u8; ETH_ALEN];
                    buf.copy_from_slice(addr);
                    mac = Some(buf);
                }
            }
        }
        if let Some(mac) = mac {
            return Ok((nl_msg.header.index, mac));
        }
    }
    Err(DhcpError::new(
        ErrorKind::InvalidArgument,
        format!("Interface {iface_name} not found"),
    ))
}

pub(crate) async fn is_link_up(iface_index: u32) -> Result<bool, DhcpError> {
    let (connection, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(connection);

    let mut links = handle.link().get().match_index(iface_index).execute();
    if let Some(nl_msg) = links.try_next().await? {
        return Ok(nl_msg.header.flags.contains(LinkFlags::Up)
            && nl_msg.header.flags.contains(LinkFlags::Running));
    }
    Err(DhcpError::new(
        ErrorKind::InvalidArgument,
        format!("Interface with index {iface_index} not found"),
    ))
}

/// Install the lease's IPv4 address/prefix and, if present, the default
/// route through the offered gateway. Best-effort idempotent: replacing an
/// already-installed identical address/route is not an error.
pub(crate) async fn apply(
    iface_index: u32,
    addr: Ipv4Addr,
    prefix_len: u8,
    gateway: Option<Ipv4Addr>,
) -> Result<(), DhcpError> {
    let (connection, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(connection);

    handle
        .address()
        .add(iface_index, IpAddr::V4(addr), prefix_len)
        .execute()
        .await
        .map_err(|e| {
            DhcpError::new(
                ErrorKind::IoError,
                format!("Failed to add address {addr}/{prefix_len}: {e}"),
            )
        })?;

    if let Some(gw) = gateway {
        handle
            .route()
            .add()
            .v4()
            .gateway(gw)
            .output_interface(iface_index)
            .execute()
            .await
            .map_err(|e| {
                DhcpError::new(
                    ErrorKind::IoError,
                    format!("Failed to add default route via {gw}: {e}"),
                )
            })?;
    }

    Ok(())
}

/// Withdraw whatever this client previously applied. Errors are logged by
/// the caller and otherwise ignored: by the time `clear()` runs the address
/// or route may already be gone (link removed, race with another manager).
pub(crate) async fn clear(
    iface_index: u32,
    addr: Ipv4Addr,
    prefix_len: u8,
    gateway: Option<Ipv4Addr>,
) -> Result<(), DhcpError> {
    let (connection, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(connection);

    if let Some(gw) = gateway {
        let mut routes = handle.route().get(IpVersion::V4).execute();
        while let Some(rt) = routes.try_next().await? {
            let mut matches_gw = false;
            for attr in &rt.attributes {
                if let RouteAttribute::Gateway(RouteAddress::Inet(g)) = attr {
                    if *g == gw {
                        matches_gw = true;
                    }
                }
            }
            if matches_gw {
                let _ = handle.route().del(rt).execute().await;
            }
        }
    }

    let mut addrs = handle
        .address()
        .get()
        .set_link_index_filter(iface_index)
        .execute();
    while let Some(nl_msg) = addrs.try_next().await? {
        let mut matches = false;
        for attr in &nl_msg.attributes {
            if let AddressAttribute::Address(IpAddr::V4(a)) = attr {
                if *a == addr {
                    matches = true;
                }
            }
        }
        if matches {
            let _ = handle.address().del(nl_msg).execute().await;
        }
    }

    Ok(())
}

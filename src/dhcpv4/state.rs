// SPDX-License-Identifier: Apache-2.0

/// The nine-state DHCPv4 client automaton (RFC 2131 section 4.4 plus the
/// CHECKING/RESETTING/LINK_DOWN states needed by a real deployment: ARP
/// conflict detection before binding, and loss/return of carrier).
#[derive(Debug, PartialEq, Clone, Copy, Eq, Default)]
pub enum DhcpV4State {
    /// No link; timer idle; no address assigned.
    #[default]
    LinkDown,
    /// Cooling off after a failure, waiting to restart discovery.
    Resetting,
    /// Requesting a previously known address without discovery.
    Rebooting,
    /// Broadcasting DISCOVERs, awaiting OFFER.
    Selecting,
    /// Sent REQUEST for an offered address, awaiting ACK/NAK.
    Requesting,
    /// ARP-probing the offered address before binding.
    Checking,
    /// Lease active, waiting until renewal time.
    Bound,
    /// Unicast REQUESTs to the leasing server.
    Renewing,
    /// Broadcast REQUESTs to any server.
    Rebinding,
}

impl std::fmt::Display for DhcpV4State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::LinkDown => "link_down",
                Self::Resetting => "resetting",
                Self::Rebooting => "rebooting",
                Self::Selecting => "selecting",
                Self::Requesting => "requesting",
                Self::Checking => "checking",
                Self::Bound => "bound",
                Self::Renewing => "renewing",
                Self::Rebinding => "rebinding",
            }
        )
    }
}

impl DhcpV4State {
    /// Interface address/gateway is assigned iff state is one of these three
    /// (data-model invariant).
    pub(crate) fn has_assigned_address(&self) -> bool {
        matches!(self, Self::Bound | Self::Renewing | Self::Rebinding)
    }
}

// SPDX-License-Identifier: Apache-2.0

use crate::DhcpV4Lease;

/// The four application-visible lease events. Everything else the client
/// does internally (retransmits, ARP probes, dropped packets) stays inside
/// the state machine.
#[derive(Debug, Clone)]
pub enum DhcpV4Event {
    /// A new lease with no previous lease active.
    LeaseObtained(DhcpV4Lease),
    /// A new lease replacing an existing one, possibly on a different IP.
    LeaseRenewed(DhcpV4Lease),
    /// Lease withdrawn due to timeout or NAK (not due to link down).
    LeaseLost,
    /// Lease withdrawn because the link went down while holding one.
    LinkDown,
}

impl std::fmt::Display for DhcpV4Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeaseObtained(lease) => {
                write!(f, "LeaseObtained({})", lease.yiaddr)
            }
            Self::LeaseRenewed(lease) => {
                write!(f, "LeaseRenewed({})", lease.yiaddr)
            }
            Self::LeaseLost => write!(f, "LeaseLost"),
            Self::LinkDown => write!(f, "LinkDown"),
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

mod arp;
mod client;
mod config;
mod lease;
mod msg;
mod option;
mod socket;
mod state;
mod validate;

pub use self::{client::DhcpV4Client, config::DhcpV4Config, lease::DhcpV4Lease, state::DhcpV4State};

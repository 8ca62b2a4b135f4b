// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::{DhcpV4Client, DhcpV4Config, DhcpV4Event};

use super::env::{block_on, spawn_client, with_dhcp_env, TEST_NIC_CLI};

/// Remembering an address dnsmasq will never recognize forces REBOOTING's
/// first REQUEST to come back NAKed; the client must fall back to SELECTING
/// and still end up with a normal pool lease rather than getting stuck.
#[test]
fn test_scenario_nak_falls_back_to_selecting() {
    with_dhcp_env(|| {
        block_on(async {
            let mut config = DhcpV4Config::new(TEST_NIC_CLI);
            // Outside dnsmasq's configured range: guaranteed NAK.
            config.set_requested_ip(Ipv4Addr::new(203, 0, 113, 5));
            let client = DhcpV4Client::init(config).await.expect("client init failed");

            let (handle, mut rx) = spawn_client(client);

            let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .expect("timed out waiting for a lease after the NAK")
                .expect("event channel closed before a lease arrived");

            match event {
                DhcpV4Event::LeaseObtained(lease) => {
                    assert_ne!(lease.yiaddr, Ipv4Addr::new(203, 0, 113, 5));
                    assert!(lease.yiaddr.octets()[0..3] == [192, 0, 2]);
                }
                other => panic!("expected LeaseObtained after recovering from the NAK, got {other}"),
            }

            handle.abort();
        });
    })
}

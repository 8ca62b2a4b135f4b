// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::{DhcpV4Client, DhcpV4Config, DhcpV4Event};

use super::env::{block_on, spawn_client, with_dhcp_env, FOO1_CLIENT_ID, FOO1_STATIC_IP, TEST_NIC_CLI};

/// LINK_DOWN -> SELECTING -> REQUESTING -> CHECKING -> BOUND against a real
/// dnsmasq, with a static host reservation pinning the offered address.
#[test]
fn test_scenario_acquire() {
    with_dhcp_env(|| {
        block_on(async {
            let mut config = DhcpV4Config::new(TEST_NIC_CLI);
            config.set_client_id(0, FOO1_CLIENT_ID.as_bytes());
            let client = DhcpV4Client::init(config).await.expect("client init failed");

            let (handle, mut rx) = spawn_client(client);

            let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .expect("timed out waiting for a lease")
                .expect("event channel closed before a lease arrived");

            match event {
                DhcpV4Event::LeaseObtained(lease) => {
                    assert_eq!(lease.yiaddr, FOO1_STATIC_IP);
                    assert!(lease.lease_time > 0);
                    assert!(lease.t1 > 0 && lease.t1 <= lease.lease_time);
                }
                other => panic!("expected LeaseObtained, got {other}"),
            }

            handle.abort();
        });
    })
}

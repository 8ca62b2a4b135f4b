// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::{DhcpV4Client, DhcpV4Config, DhcpV4Event};

use super::env::{block_on, spawn_client, with_dhcp_env, FOO1_CLIENT_ID, FOO1_STATIC_IP, TEST_NIC_CLI};

/// BOUND -> RENEWING -> BOUND: once t1 elapses the client unicasts a REQUEST
/// to the leasing server and should come back with the same address and a
/// fresh lease_time.
#[test]
fn test_scenario_renew() {
    with_dhcp_env(|| {
        block_on(async {
            let mut config = DhcpV4Config::new(TEST_NIC_CLI);
            config.set_client_id(0, FOO1_CLIENT_ID.as_bytes());
            let client = DhcpV4Client::init(config).await.expect("client init failed");

            let (handle, mut rx) = spawn_client(client);

            let first = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .expect("timed out waiting for the initial lease")
                .expect("event channel closed before a lease arrived");
            let initial_lease_time = match first {
                DhcpV4Event::LeaseObtained(lease) => {
                    assert_eq!(lease.yiaddr, FOO1_STATIC_IP);
                    lease.lease_time
                }
                other => panic!("expected LeaseObtained, got {other}"),
            };

            // dnsmasq's --dhcp-range gives a 60s lease; t1 defaults to half
            // of that, so renewal should land comfortably inside 90s.
            let renewed = tokio::time::timeout(Duration::from_secs(90), rx.recv())
                .await
                .expect("timed out waiting for the renewal")
                .expect("event channel closed before the renewal arrived");
            match renewed {
                DhcpV4Event::LeaseRenewed(lease) => {
                    assert_eq!(lease.yiaddr, FOO1_STATIC_IP);
                    assert!(lease.lease_time > 0);
                    let _ = initial_lease_time;
                }
                other => panic!("expected LeaseRenewed, got {other}"),
            }

            handle.abort();
        });
    })
}

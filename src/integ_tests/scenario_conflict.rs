// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::{DhcpV4Client, DhcpV4Config};

use super::env::{block_on, spawn_client, with_dhcp_env, FOO2_CLIENT_ID, TEST_NIC_CLI};

/// dnsmasq offers an address that is already live on the server's own veth,
/// so CHECKING's ARP probe must see a reply and DECLINE rather than bind.
/// No LeaseObtained should ever arrive for it.
#[test]
fn test_scenario_conflict() {
    with_dhcp_env(|| {
        block_on(async {
            let mut config = DhcpV4Config::new(TEST_NIC_CLI);
            config.set_client_id(0, FOO2_CLIENT_ID.as_bytes());
            config.set_reset_timeout_seconds(1).unwrap();
            let client = DhcpV4Client::init(config).await.expect("client init failed");

            let (handle, mut rx) = spawn_client(client);

            // The client should keep cycling DISCOVER -> OFFER -> DECLINE ->
            // RESETTING without ever reporting a lease; confirm it hasn't
            // bound within a window comfortably longer than one DECLINE/
            // RESETTING round trip.
            let outcome = tokio::time::timeout(Duration::from_secs(15), rx.recv()).await;
            assert!(
                outcome.is_err(),
                "client reported an event for a conflicting address instead of silently declining"
            );

            handle.abort();
        });
    })
}

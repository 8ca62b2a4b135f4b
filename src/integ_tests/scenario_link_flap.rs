// SPDX-License-Identifier: Apache-2.0

use std::process::Command;
use std::time::Duration;

use crate::{DhcpV4Client, DhcpV4Config, DhcpV4Event};

use super::env::{block_on, spawn_client, with_dhcp_env, FOO1_CLIENT_ID, FOO1_STATIC_IP, TEST_NIC_CLI};

/// BOUND -> LINK_DOWN (configuration withdrawn, LinkDown fired) -> REBOOTING
/// -> CHECKING -> BOUND once the link returns, re-requesting the same
/// remembered address.
#[test]
fn test_scenario_link_flap() {
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
            assert!(matches!(first, DhcpV4Event::LeaseObtained(_)));

            let _ = Command::new("ip").args(["link", "set", TEST_NIC_CLI, "down"]).status();

            let down_event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for LinkDown")
                .expect("event channel closed before LinkDown arrived");
            assert!(matches!(down_event, DhcpV4Event::LinkDown));

            let _ = Command::new("ip").args(["link", "set", TEST_NIC_CLI, "up"]).status();

            let reacquired = tokio::time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .expect("timed out waiting to reacquire after the link came back")
                .expect("event channel closed before reacquiring a lease");
            match reacquired {
                DhcpV4Event::LeaseObtained(lease) => {
                    assert_eq!(lease.yiaddr, FOO1_STATIC_IP);
                }
                other => panic!("expected LeaseObtained after the link returned, got {other}"),
            }

            handle.abort();
        });
    })
}

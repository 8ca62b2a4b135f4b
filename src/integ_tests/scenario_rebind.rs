// SPDX-License-Identifier: Apache-2.0

use std::process::Command;
use std::time::Duration;

use crate::{DhcpV4Client, DhcpV4Config, DhcpV4Event};

use super::env::{block_on, spawn_client, with_dhcp_env, FOO1_CLIENT_ID, FOO1_STATIC_IP, TEST_NIC_CLI};

const SRV_IP: &str = "192.0.2.1";

fn block_unicast_renewal() {
    let _ = Command::new("iptables")
        .args(["-I", "OUTPUT", "-p", "udp", "-d", SRV_IP, "--dport", "67", "-j", "DROP"])
        .status();
}

fn unblock_unicast_renewal() {
    let _ = Command::new("iptables")
        .args(["-D", "OUTPUT", "-p", "udp", "-d", SRV_IP, "--dport", "67", "-j", "DROP"])
        .status();
}

/// BOUND -> RENEWING -> REBINDING -> BOUND: with unicast REQUESTs to the
/// leasing server dropped at the firewall, RENEWING must time out by t2 and
/// REBINDING's broadcast REQUEST (which the firewall rule does not match)
/// should still land a renewal.
#[test]
fn test_scenario_rebind() {
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

            block_unicast_renewal();

            // 60s lease: t1=30s (renewal attempts start failing silently),
            // t2=52.5s (rebinding broadcasts and should succeed).
            let result = tokio::time::timeout(Duration::from_secs(120), rx.recv()).await;
            unblock_unicast_renewal();

            match result.expect("timed out waiting for rebinding to land a lease") {
                Some(DhcpV4Event::LeaseRenewed(lease)) => {
                    assert_eq!(lease.yiaddr, FOO1_STATIC_IP);
                }
                other => panic!("expected LeaseRenewed via REBINDING, got {other:?}"),
            }

            handle.abort();
        });
    })
}

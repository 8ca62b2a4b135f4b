// SPDX-License-Identifier: Apache-2.0

use std::io::Read;
use std::net::Ipv4Addr;
use std::process::Command;
use std::str::FromStr;

/// Set (to any value) to run the network-namespace integration tests. They
/// need root and a `dnsmasq` binary on PATH, neither of which a plain
/// sandboxed `cargo test` run can assume, so they no-op skip rather than
/// fail when this isn't set.
const TEST_GATE_ENV: &str = "DHCPV4_CLIENT_RUN_NETNS_TESTS";

const PID_FILE_PATH: &str = "/tmp/dhcpv4_test_dnsmasq_pid";
const TEST_DHCPD_NETNS: &str = "dhcpv4_test";
const LOG_FILE: &str = "/tmp/dhcpv4_test_dnsmasq_log";
pub(crate) const TEST_NIC_CLI: &str = "dhcpcli";
const TEST_NIC_CLI_MAC: &str = "00:23:45:67:89:1a";
const TEST_NIC_SRV: &str = "dhcpsrv";

const TEST_DHCP_SRV_IP: &str = "192.0.2.1";

pub(crate) const FOO1_HOSTNAME: &str = "foo1";
pub(crate) const FOO1_CLIENT_ID: &str =
    "0123456789123456012345678912345601234567891234560123456789123456";

pub(crate) const FOO1_STATIC_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 99);

/// Reserved for the conflict scenario: dnsmasq always offers this address to
/// `FOO2_CLIENT_ID`, and it is also pre-assigned on the server veth so the
/// kernel answers ARP who-has queries for it on the real owner's behalf.
pub(crate) const FOO2_CLIENT_ID: &str =
    "9876543210987654098765432109876509876543210987650987654321098765";
pub(crate) const CONFLICT_IP: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 88);

fn create_test_net_namespace() {
    run_cmd(&format!("ip netns add {TEST_DHCPD_NETNS}"));
}

fn remove_test_net_namespace() {
    run_cmd_ignore_failure(&format!("ip netns del {TEST_DHCPD_NETNS}"));
}

fn create_test_veth_nics() {
    run_cmd(&format!(
        "ip link add {TEST_NIC_CLI} address {TEST_NIC_CLI_MAC} type veth peer \
         name {TEST_NIC_SRV}"
    ));
    run_cmd(&format!("ip link set {TEST_NIC_CLI} up"));
    run_cmd(&format!(
        "ip link set {TEST_NIC_SRV} netns {TEST_DHCPD_NETNS}"
    ));
    run_cmd(&format!(
        "ip netns exec {TEST_DHCPD_NETNS} ip link set {TEST_NIC_SRV} up",
    ));
    run_cmd(&format!(
        "ip netns exec {TEST_DHCPD_NETNS} ip addr add {TEST_DHCP_SRV_IP}/24 \
         dev {TEST_NIC_SRV}",
    ));
    // Pre-assigned so the kernel answers ARP for it on the client's behalf,
    // giving scenario_conflict a real duplicate to detect.
    run_cmd(&format!(
        "ip netns exec {TEST_DHCPD_NETNS} ip addr add {CONFLICT_IP}/24 \
         dev {TEST_NIC_SRV}",
    ));
    std::thread::sleep(std::time::Duration::from_secs(1));
}

fn remove_test_veth_nics() {
    run_cmd_ignore_failure(&format!("ip link del {TEST_NIC_CLI}"));
}

fn start_dhcp_server() {
    run_cmd(&format!("rm {LOG_FILE}"));
    run_cmd(&format!("touch {LOG_FILE}"));
    run_cmd(&format!("chmod 666 {LOG_FILE}"));

    let dnsmasq_opts = format!(
        r#"
        --pid-file={PID_FILE_PATH}
        --log-queries
        --log-dhcp
        --log-debug
        --log-facility={LOG_FILE}
        --conf-file=/dev/null
        --dhcp-leasefile=/tmp/dhcpv4_test_dhcpd_lease
        --no-hosts
        --dhcp-host=id:{FOO1_CLIENT_ID},{FOO1_STATIC_IP},{FOO1_HOSTNAME}
        --dhcp-host=id:{FOO2_CLIENT_ID},{CONFLICT_IP},foo2
        --dhcp-option=option:dns-server,8.8.8.8,1.1.1.1
        --dhcp-option=option:router,{TEST_DHCP_SRV_IP}
        --bind-interfaces
        --except-interface=lo
        --clear-on-reload
        --interface=dhcpsrv
        --dhcp-range=192.0.2.2,192.0.2.50,60
        --no-ping
        "#
    );

    let cmd = format!(
        "ip netns exec {} dnsmasq {}",
        TEST_DHCPD_NETNS,
        dnsmasq_opts.replace('\n', " ")
    );
    let cmds: Vec<&str> = cmd.split(' ').collect();

    Command::new(cmds[0])
        .args(&cmds[1..])
        .spawn()
        .expect("Failed to start DHCP server")
        .wait()
        .ok();
    // Need to wait 1 seconds for dnsmasq to finish its start
    std::thread::sleep(std::time::Duration::from_secs(1));
}

fn stop_dhcp_server() {
    if !std::path::Path::new(PID_FILE_PATH).exists() {
        return;
    }
    let mut fd = std::fs::File::open(PID_FILE_PATH)
        .unwrap_or_else(|_| panic!("Failed to open {PID_FILE_PATH} file"));
    let mut contents = String::new();
    fd.read_to_string(&mut contents)
        .unwrap_or_else(|_| panic!("Failed to read {PID_FILE_PATH} file"));

    let pid = u32::from_str(contents.trim())
        .unwrap_or_else(|_| panic!("Invalid PID content {contents}"));

    run_cmd_ignore_failure(&format!("kill {pid}"));
}

fn run_cmd(cmd: &str) -> String {
    let cmds: Vec<&str> = cmd.split(' ').collect();
    String::from_utf8(
        Command::new(cmds[0])
            .args(&cmds[1..])
            .output()
            .unwrap_or_else(|_| panic!("failed to execute command {cmd}"))
            .stdout,
    )
    .expect("Failed to convert file command output to String")
}

fn run_cmd_ignore_failure(cmd: &str) -> String {
    let cmds: Vec<&str> = cmd.split(' ').collect();

    match Command::new(cmds[0]).args(&cmds[1..]).output() {
        Ok(o) => String::from_utf8(o.stdout).unwrap_or_default(),
        Err(e) => {
            eprintln!("Failed to execute command {cmd}: {e}");
            "".to_string()
        }
    }
}

pub(crate) fn with_dhcp_env<T>(test: T)
where
    T: FnOnce() + std::panic::UnwindSafe,
{
    if std::env::var(TEST_GATE_ENV).is_err() {
        eprintln!(
            "skipping: set {TEST_GATE_ENV}=1 to run the network-namespace integration tests"
        );
        return;
    }

    create_test_net_namespace();
    create_test_veth_nics();
    stop_dhcp_server();
    start_dhcp_server();

    let result = std::panic::catch_unwind(|| {
        test();
    });

    stop_dhcp_server();
    remove_test_veth_nics();
    remove_test_net_namespace();
    assert!(result.is_ok())
}

pub(crate) fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Runtime::new()
        .expect("failed to create tokio runtime")
        .block_on(fut)
}

/// Drive a client's `run()` loop on its own task, forwarding every event
/// over an unbounded channel. The caller is responsible for aborting the
/// returned handle once the scenario under test is done with it.
pub(crate) fn spawn_client(
    mut client: crate::DhcpV4Client,
) -> (
    tokio::task::JoinHandle<()>,
    tokio::sync::mpsc::UnboundedReceiver<crate::DhcpV4Event>,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let _ = client
            .run(move |ev| {
                let _ = tx.send(ev);
            })
            .await;
    });
    (handle, rx)
}

// SPDX-License-Identifier: Apache-2.0

use dhcpv4_client::{DhcpV4Client, DhcpV4Config, DhcpV4Event};

const TEST_NIC: &str = "dhcpcli";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_log();
    let mut config = DhcpV4Config::new(TEST_NIC);
    config.set_host_name("dhcpv4-client-test");
    config.use_host_name_as_client_id();
    config.set_timeout(60);
    let mut cli = DhcpV4Client::init(config).await?;

    cli.run(|event| match event {
        DhcpV4Event::LeaseObtained(lease) => {
            println!("got lease {lease:?}");
        }
        DhcpV4Event::LeaseRenewed(lease) => {
            println!("renewed lease {lease:?}");
        }
        DhcpV4Event::LeaseLost => {
            println!("lease lost");
        }
        DhcpV4Event::LinkDown => {
            println!("link down");
        }
    })
    .await?;

    Ok(())
}

fn enable_log() {
    env_logger::Builder::new()
        .filter(Some("dhcpv4_client"), log::LevelFilter::Debug)
        .init();
}

// SPDX-License-Identifier: Apache-2.0

use crate::ETH_ALEN;

pub(crate) const BROADCAST_MAC_ADDRESS: [u8; ETH_ALEN] = [u8::MAX; ETH_ALEN];

pub(crate) fn mac_to_string(mac: &[u8; ETH_ALEN]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<String>>()
        .join(":")
}

// SPDX-License-Identifier: Apache-2.0

#[cfg(test)]
mod scenario_acquire;
#[cfg(test)]
mod scenario_conflict;
#[cfg(test)]
mod scenario_link_flap;
#[cfg(test)]
mod scenario_nak;
#[cfg(test)]
mod scenario_rebind;
#[cfg(test)]
mod scenario_renew;

mod env;

// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use super::arp::ArpProbe;
use super::lease::DhcpV4Lease;
use super::msg::{DhcpV4Message, DhcpV4MessageType};
use super::option::OPT_SERVER_IDENTIFIER;
use super::option::DhcpV4Option;
use super::socket::{DhcpRawSocket, DhcpUdpV4Socket, DhcpV4Socket};
use super::state::DhcpV4State;
use super::validate::{self, AckContext};
use crate::mac::mac_to_string;
use crate::netlink;
use crate::timer::{DhcpTimer, LeaseClock, MAX_TIMER_SECONDS};
use crate::{DhcpError, DhcpV4Config, DhcpV4Event, ErrorKind};

/// How often link state is re-checked while otherwise idle (waiting on a
/// timer or a reply). Not part of any spec'd constant: a practical
/// granularity for a polled netlink link-state check.
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(2);

enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    LinkDown,
}

/// The DHCPv4 client: a nine-state automaton driven by `run()`. Constructed
/// against one interface; dropping it best-effort withdraws whatever
/// address/route it last applied.
#[derive(Debug)]
pub struct DhcpV4Client {
    config: DhcpV4Config,
    state: DhcpV4State,
    xid: u32,
    lease: Option<DhcpV4Lease>,
    lease_clock: Option<LeaseClock>,
    /// Address to retry without discovery after a link flap (REBOOTING),
    /// remembered from a prior lease or from `DhcpV4Config::set_requested_ip`.
    remembered_ip: Option<Ipv4Addr>,
    /// Lease parsed from the last accepted OFFER, carried into REQUESTING
    /// and then CHECKING before it becomes `self.lease`.
    pending_lease: Option<DhcpV4Lease>,
    raw_socket: Option<DhcpRawSocket>,
}

impl DhcpV4Client {
    /// Resolve the interface and start in LINK_DOWN; `run()` drives
    /// discovery (or reboot, if a requested IP is configured) once the link
    /// comes up.
    pub async fn init(mut config: DhcpV4Config) -> Result<Self, DhcpError> {
        config.init().await?;
        let remembered_ip = config.requested_ip;
        Ok(Self {
            config,
            state: DhcpV4State::LinkDown,
            xid: rand::random(),
            lease: None,
            lease_clock: None,
            remembered_ip,
            pending_lease: None,
            raw_socket: None,
        })
    }

    pub fn has_lease(&self) -> bool {
        self.state.has_assigned_address()
    }

    pub fn lease_info(&self) -> Option<&DhcpV4Lease> {
        self.lease.as_ref()
    }

    pub fn state(&self) -> DhcpV4State {
        self.state
    }

    /// Drive the state machine forever, calling `on_event` for every
    /// application-visible lease event. Returns only on an unrecoverable
    /// internal error (socket/netlink setup failure); protocol-level
    /// drops and conflicts are handled internally and never surface here.
    pub async fn run(
        &mut self,
        mut on_event: impl FnMut(DhcpV4Event),
    ) -> Result<(), DhcpError> {
        loop {
            self.step(&mut on_event).await?;
        }
    }

    async fn step(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        match self.state {
            DhcpV4State::LinkDown => self.step_link_down().await,
            DhcpV4State::Resetting => self.step_resetting().await,
            DhcpV4State::Rebooting => self.step_rebooting(on_event).await,
            DhcpV4State::Selecting => self.step_selecting(on_event).await,
            DhcpV4State::Requesting => self.step_requesting(on_event).await,
            DhcpV4State::Checking => self.step_checking(on_event).await,
            DhcpV4State::Bound => self.step_bound(on_event).await,
            DhcpV4State::Renewing => self.step_renewing(on_event).await,
            DhcpV4State::Rebinding => self.step_rebinding(on_event).await,
        }
    }

    fn ensure_raw_socket(&mut self) -> Result<&DhcpRawSocket, DhcpError> {
        if self.raw_socket.is_none() {
            self.raw_socket = Some(DhcpRawSocket::new(&self.config)?);
        }
        Ok(self.raw_socket.as_ref().expect("just inserted"))
    }

    async fn is_link_up(&self) -> Result<bool, DhcpError> {
        netlink::is_link_up(self.config.iface_index).await
    }

    /// Race `fut` against `dur`, polling link state at `LINK_POLL_INTERVAL`
    /// granularity while waiting.
    async fn wait_with_link_check<T>(
        &self,
        dur: Duration,
        fut: impl Future<Output = Result<T, DhcpError>>,
    ) -> Result<WaitOutcome<T>, DhcpError> {
        tokio::pin!(fut);
        let deadline = tokio::time::Instant::now() + dur;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(WaitOutcome::TimedOut);
            }
            let tick = remaining.min(LINK_POLL_INTERVAL);
            tokio::select! {
                result = &mut fut => return Ok(WaitOutcome::Ready(result?)),
                _ = tokio::time::sleep(tick) => {
                    if !self.is_link_up().await? {
                        return Ok(WaitOutcome::LinkDown);
                    }
                }
            }
        }
    }

    /// Pure timed wait (no reply expected), still checking link state.
    /// Returns `true` if link went down before `dur` elapsed.
    async fn sleep_with_link_check(&self, dur: Duration) -> Result<bool, DhcpError> {
        let deadline = tokio::time::Instant::now() + dur;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let tick = remaining.min(LINK_POLL_INTERVAL);
            tokio::time::sleep(tick).await;
            if !self.is_link_up().await? {
                return Ok(true);
            }
        }
    }

    fn withdraw_lease_event(&mut self, on_event: &mut impl FnMut(DhcpV4Event), link_down: bool) {
        if self.lease.take().is_some() {
            on_event(if link_down {
                DhcpV4Event::LinkDown
            } else {
                DhcpV4Event::LeaseLost
            });
        }
        self.lease_clock = None;
        self.pending_lease = None;
    }

    async fn apply_lease(&mut self, lease: &DhcpV4Lease) -> Result<(), DhcpError> {
        let prefix_len = prefix_len_from_mask(lease.subnet_mask);
        netlink::apply(self.config.iface_index, lease.yiaddr, prefix_len, lease.router).await
    }

    async fn withdraw_configuration(&mut self, lease: &DhcpV4Lease) -> Result<(), DhcpError> {
        let prefix_len = prefix_len_from_mask(lease.subnet_mask);
        netlink::clear(self.config.iface_index, lease.yiaddr, prefix_len, lease.router).await
    }

    /// Link went down in a blocking wait. Withdraw configuration if we had
    /// one, fire LinkDown, go back to LINK_DOWN, and remember the address
    /// we were holding (or trying for) so reconnection tries REBOOTING.
    async fn handle_link_down(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        if let Some(lease) = self.lease.clone() {
            self.remembered_ip = Some(lease.yiaddr);
            self.withdraw_configuration(&lease).await?;
        }
        self.withdraw_lease_event(on_event, true);
        self.raw_socket = None;
        self.state = DhcpV4State::LinkDown;
        Ok(())
    }

    async fn step_link_down(&mut self) -> Result<(), DhcpError> {
        loop {
            if self.is_link_up().await? {
                break;
            }
            tokio::time::sleep(LINK_POLL_INTERVAL).await;
        }
        self.xid = rand::random();
        self.state = if self.remembered_ip.is_some() {
            DhcpV4State::Rebooting
        } else {
            DhcpV4State::Selecting
        };
        Ok(())
    }

    async fn step_resetting(&mut self) -> Result<(), DhcpError> {
        if self
            .sleep_with_link_check(Duration::from_secs(self.config.reset_timeout_seconds as u64))
            .await?
        {
            self.state = DhcpV4State::LinkDown;
            self.raw_socket = None;
            return Ok(());
        }
        self.xid = rand::random();
        self.state = DhcpV4State::Selecting;
        Ok(())
    }

    async fn step_selecting(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        let mut rtx = self.config.base_rtx_timeout_seconds as u64;
        let mut sends_since_xid_reuse: u8 = 0;
        loop {
            {
                let socket = self.ensure_raw_socket()?;
                let msg = DhcpV4Message::new_discover(self.xid, &self.config);
                let pkt = msg.to_eth_packet_broadcast(self.config.src_mac, self.config.ttl)?;
                socket.send(&pkt).await?;
            }

            let socket_ref = self.raw_socket.as_ref().expect("ensured above");
            let xid = self.xid;
            match self
                .wait_with_link_check(
                    Duration::from_secs(rtx),
                    socket_ref.recv_dhcp_message(DhcpV4MessageType::Offer, xid, &self.config.src_mac),
                )
                .await?
            {
                WaitOutcome::Ready(Some(reply)) => {
                    if validate::validate_offer(&reply, self.xid, &self.config.src_mac).is_ok() {
                        if let Ok(offer) = DhcpV4Lease::try_from((&reply, &self.config)) {
                            self.pending_lease = Some(offer);
                            self.state = DhcpV4State::Requesting;
                            return Ok(());
                        }
                    }
                }
                WaitOutcome::Ready(None) => (),
                WaitOutcome::TimedOut => (),
                WaitOutcome::LinkDown => {
                    self.handle_link_down(on_event).await?;
                    return Ok(());
                }
            }

            sends_since_xid_reuse += 1;
            if sends_since_xid_reuse >= self.config.xid_reuse_max {
                self.xid = rand::random();
                sends_since_xid_reuse = 0;
            }
            rtx = (rtx * 2).min(self.config.max_rtx_timeout_seconds as u64);
        }
    }

    async fn step_requesting(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        let offer = self.pending_lease.clone().ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "REQUESTING entered with no pending offer".to_string())
        })?;
        let mut rtx = self.config.base_rtx_timeout_seconds as u64;

        for _ in 0..self.config.max_requests {
            {
                let socket = self.ensure_raw_socket()?;
                let msg = DhcpV4Message::new_request_selecting(
                    self.xid,
                    &self.config,
                    offer.yiaddr,
                    offer.srv_id,
                );
                let pkt = msg.to_eth_packet_broadcast(self.config.src_mac, self.config.ttl)?;
                socket.send(&pkt).await?;
            }

            let socket_ref = self.raw_socket.as_ref().expect("ensured above");
            let xid = self.xid;
            match self
                .wait_with_link_check(
                    Duration::from_secs(rtx),
                    socket_ref.recv_dhcp_message(DhcpV4MessageType::Ack, xid, &self.config.src_mac),
                )
                .await?
            {
                WaitOutcome::Ready(Some(reply)) => {
                    if reply.message_type() == Some(DhcpV4MessageType::Nak) {
                        if nak_server_id_matches(&reply, offer.srv_id) {
                            self.pending_lease = None;
                            self.state = DhcpV4State::Resetting;
                            return Ok(());
                        }
                        continue;
                    }
                    if let Ok(raw_lease) = DhcpV4Lease::try_from((&reply, &self.config)) {
                        let ctx = AckContext {
                            offered_yiaddr: Some(offer.yiaddr),
                            offered_srv_id: Some(offer.srv_id),
                            max_timer_seconds: MAX_TIMER_SECONDS as u32,
                            ..Default::default()
                        };
                        if let Ok(lease) = validate::validate_and_fixup_ack(
                            &reply,
                            self.xid,
                            &self.config.src_mac,
                            raw_lease,
                            &ctx,
                        ) {
                            self.pending_lease = Some(lease);
                            self.state = DhcpV4State::Checking;
                            return Ok(());
                        }
                    }
                }
                WaitOutcome::Ready(None) => (),
                WaitOutcome::TimedOut => (),
                WaitOutcome::LinkDown => {
                    self.handle_link_down(on_event).await?;
                    return Ok(());
                }
            }
            rtx = (rtx * 2).min(self.config.max_rtx_timeout_seconds as u64);
        }

        self.pending_lease = None;
        self.state = DhcpV4State::Selecting;
        self.xid = rand::random();
        Ok(())
    }

    async fn step_rebooting(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        let requested_ip = self.remembered_ip.ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "REBOOTING entered with no remembered IP".to_string())
        })?;
        let mut rtx = self.config.base_rtx_timeout_seconds as u64;

        for _ in 0..self.config.max_reboot_requests {
            {
                let socket = self.ensure_raw_socket()?;
                let msg = DhcpV4Message::new_request_rebooting(self.xid, &self.config, requested_ip);
                let pkt = msg.to_eth_packet_broadcast(self.config.src_mac, self.config.ttl)?;
                socket.send(&pkt).await?;
            }

            let socket_ref = self.raw_socket.as_ref().expect("ensured above");
            let xid = self.xid;
            match self
                .wait_with_link_check(
                    Duration::from_secs(rtx),
                    socket_ref.recv_dhcp_message(DhcpV4MessageType::Ack, xid, &self.config.src_mac),
                )
                .await?
            {
                WaitOutcome::Ready(Some(reply)) => {
                    if reply.message_type() == Some(DhcpV4MessageType::Nak) {
                        self.state = DhcpV4State::Selecting;
                        self.xid = rand::random();
                        return Ok(());
                    }
                    if let Ok(raw_lease) = DhcpV4Lease::try_from((&reply, &self.config)) {
                        let ctx = AckContext {
                            max_timer_seconds: MAX_TIMER_SECONDS as u32,
                            ..Default::default()
                        };
                        if let Ok(lease) = validate::validate_and_fixup_ack(
                            &reply,
                            self.xid,
                            &self.config.src_mac,
                            raw_lease,
                            &ctx,
                        ) {
                            self.pending_lease = Some(lease);
                            self.state = DhcpV4State::Checking;
                            return Ok(());
                        }
                    }
                }
                WaitOutcome::Ready(None) => (),
                WaitOutcome::TimedOut => (),
                WaitOutcome::LinkDown => {
                    self.handle_link_down(on_event).await?;
                    return Ok(());
                }
            }
            rtx = (rtx * 2).min(self.config.max_rtx_timeout_seconds as u64);
        }

        self.state = DhcpV4State::Selecting;
        self.xid = rand::random();
        Ok(())
    }

    async fn step_checking(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        let lease = self.pending_lease.clone().ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "CHECKING entered with no pending lease".to_string())
        })?;
        let probe = ArpProbe::new(&self.config)?;
        if let Some(conflict_mac) = probe.probe(&self.config, lease.yiaddr).await? {
            log::warn!(
                "address conflict: {} is-at {}, declining",
                lease.yiaddr,
                mac_to_string(&conflict_mac)
            );
            let socket = self.ensure_raw_socket()?;
            let decline =
                DhcpV4Message::new_decline(self.xid, &self.config, lease.yiaddr, lease.srv_id, "ArpResponse");
            let pkt = decline.to_eth_packet_broadcast(self.config.src_mac, self.config.ttl)?;
            socket.send(&pkt).await?;
            self.pending_lease = None;
            self.state = DhcpV4State::Resetting;
            return Ok(());
        }

        self.apply_lease(&lease).await?;
        let had_lease = self.lease.is_some();
        self.lease = Some(lease.clone());
        self.pending_lease = None;
        self.lease_clock = Some(LeaseClock::start_now());
        self.state = DhcpV4State::Bound;
        on_event(if had_lease {
            DhcpV4Event::LeaseRenewed(lease)
        } else {
            DhcpV4Event::LeaseObtained(lease)
        });
        Ok(())
    }

    async fn step_bound(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        let lease = self.lease.clone().ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "BOUND entered with no lease".to_string())
        })?;
        let clock = self.lease_clock.ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "BOUND entered with no lease clock".to_string())
        })?;

        loop {
            let elapsed = clock.elapsed_secs();
            if elapsed >= lease.t1 {
                self.state = DhcpV4State::Renewing;
                return Ok(());
            }
            let remaining = DhcpTimer::next_sub_interval((lease.t1 - elapsed) as u64);
            if self.sleep_with_link_check(remaining).await? {
                self.handle_link_down(on_event).await?;
                return Ok(());
            }
        }
    }

    async fn step_renewing(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        let lease = self.lease.clone().ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "RENEWING entered with no lease".to_string())
        })?;
        let clock = self.lease_clock.ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "RENEWING entered with no lease clock".to_string())
        })?;
        let udp_socket = DhcpUdpV4Socket::new(&self.config.iface_name, lease.yiaddr, lease.srv_id).await?;
        let request_send_time_elapsed = clock.elapsed_secs();

        loop {
            let elapsed = clock.elapsed_secs();
            if elapsed >= lease.lease_time {
                self.withdraw_lease_event(on_event, false);
                self.state = DhcpV4State::Selecting;
                self.xid = rand::random();
                return Ok(());
            }
            if elapsed >= lease.t2 {
                self.state = DhcpV4State::Rebinding;
                return Ok(());
            }

            let msg = DhcpV4Message::new_request_renew_rebind(self.xid, &self.config, lease.yiaddr);
            udp_socket.send(&msg.to_dhcp_packet()).await?;

            let time_to_next_state = lease.t2.saturating_sub(elapsed) as u64;
            let rtx = (self.config.min_renew_rtx_timeout_seconds as u64).max(time_to_next_state / 2).max(1);
            let xid = self.xid;

            match self
                .wait_with_link_check(
                    Duration::from_secs(rtx),
                    udp_socket.recv_dhcp_message(DhcpV4MessageType::Ack, xid, &self.config.src_mac),
                )
                .await?
            {
                WaitOutcome::Ready(Some(reply)) => {
                    if reply.message_type() == Some(DhcpV4MessageType::Nak) {
                        self.withdraw_lease_event(on_event, false);
                        self.state = DhcpV4State::Selecting;
                        self.xid = rand::random();
                        return Ok(());
                    }
                    if let Ok(raw_lease) = DhcpV4Lease::try_from((&reply, &self.config)) {
                        let ctx = AckContext {
                            lease_time_elapsed: Some(elapsed),
                            request_send_time_elapsed: Some(request_send_time_elapsed),
                            max_timer_seconds: MAX_TIMER_SECONDS as u32,
                            ..Default::default()
                        };
                        if let Ok(new_lease) = validate::validate_and_fixup_ack(
                            &reply,
                            self.xid,
                            &self.config.src_mac,
                            raw_lease,
                            &ctx,
                        ) {
                            self.bind_renewed_lease(new_lease, on_event).await?;
                            return Ok(());
                        }
                    }
                }
                WaitOutcome::Ready(None) => (),
                WaitOutcome::TimedOut => (),
                WaitOutcome::LinkDown => {
                    self.handle_link_down(on_event).await?;
                    return Ok(());
                }
            }
        }
    }

    async fn step_rebinding(&mut self, on_event: &mut impl FnMut(DhcpV4Event)) -> Result<(), DhcpError> {
        let lease = self.lease.clone().ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "REBINDING entered with no lease".to_string())
        })?;
        let clock = self.lease_clock.ok_or_else(|| {
            DhcpError::new(ErrorKind::Bug, "REBINDING entered with no lease clock".to_string())
        })?;
        let request_send_time_elapsed = clock.elapsed_secs();

        loop {
            let elapsed = clock.elapsed_secs();
            if elapsed >= lease.lease_time {
                self.withdraw_lease_event(on_event, false);
                self.state = DhcpV4State::Selecting;
                self.xid = rand::random();
                self.raw_socket = None;
                return Ok(());
            }

            {
                let socket = self.ensure_raw_socket()?;
                let msg = DhcpV4Message::new_request_renew_rebind(self.xid, &self.config, lease.yiaddr);
                let pkt = msg.to_eth_packet_broadcast(self.config.src_mac, self.config.ttl)?;
                socket.send(&pkt).await?;
            }

            let time_to_next_state = lease.lease_time.saturating_sub(elapsed) as u64;
            let rtx = (self.config.min_renew_rtx_timeout_seconds as u64).max(time_to_next_state / 2).max(1);
            let socket_ref = self.raw_socket.as_ref().expect("ensured above");
            let xid = self.xid;

            match self
                .wait_with_link_check(
                    Duration::from_secs(rtx),
                    socket_ref.recv_dhcp_message(DhcpV4MessageType::Ack, xid, &self.config.src_mac),
                )
                .await?
            {
                WaitOutcome::Ready(Some(reply)) => {
                    if reply.message_type() == Some(DhcpV4MessageType::Nak) {
                        self.withdraw_lease_event(on_event, false);
                        self.state = DhcpV4State::Selecting;
                        self.xid = rand::random();
                        return Ok(());
                    }
                    if let Ok(raw_lease) = DhcpV4Lease::try_from((&reply, &self.config)) {
                        let ctx = AckContext {
                            lease_time_elapsed: Some(elapsed),
                            request_send_time_elapsed: Some(request_send_time_elapsed),
                            max_timer_seconds: MAX_TIMER_SECONDS as u32,
                            ..Default::default()
                        };
                        if let Ok(new_lease) = validate::validate_and_fixup_ack(
                            &reply,
                            self.xid,
                            &self.config.src_mac,
                            raw_lease,
                            &ctx,
                        ) {
                            self.bind_renewed_lease(new_lease, on_event).await?;
                            return Ok(());
                        }
                    }
                }
                WaitOutcome::Ready(None) => (),
                WaitOutcome::TimedOut => (),
                WaitOutcome::LinkDown => {
                    self.handle_link_down(on_event).await?;
                    return Ok(());
                }
            }
        }
    }

    async fn bind_renewed_lease(
        &mut self,
        new_lease: DhcpV4Lease,
        on_event: &mut impl FnMut(DhcpV4Event),
    ) -> Result<(), DhcpError> {
        if let Some(old) = self.lease.clone() {
            if old.yiaddr != new_lease.yiaddr {
                self.withdraw_configuration(&old).await?;
            }
        }
        self.apply_lease(&new_lease).await?;
        self.lease = Some(new_lease.clone());
        self.lease_clock = Some(LeaseClock::start_now());
        self.state = DhcpV4State::Bound;
        on_event(DhcpV4Event::LeaseRenewed(new_lease));
        Ok(())
    }
}

impl Drop for DhcpV4Client {
    /// Best-effort, fire-and-forget withdrawal: `clear()` is async and a
    /// destructor cannot await it, so the netlink call is spawned onto the
    /// current runtime rather than run inline.
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            let iface_index = self.config.iface_index;
            let prefix_len = prefix_len_from_mask(lease.subnet_mask);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = netlink::clear(iface_index, lease.yiaddr, prefix_len, lease.router).await {
                        log::warn!("failed to withdraw lease configuration on drop: {e}");
                    }
                });
            }
        }
    }
}

fn nak_server_id_matches(reply: &DhcpV4Message, expected: Ipv4Addr) -> bool {
    matches!(
        reply.options.get(OPT_SERVER_IDENTIFIER),
        Some(DhcpV4Option::ServerIdentifier(v)) if *v == expected
    )
}

fn prefix_len_from_mask(mask: Ipv4Addr) -> u8 {
    u32::from_be_bytes(mask.octets()).count_ones() as u8
}

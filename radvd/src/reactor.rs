//! The single-threaded, non-blocking event loop wiring the ICMPv6 socket,
//! the kernel event channel, and the scheduler deadline together.

use std::os::fd::BorrowedFd;

use anyhow::Context as _;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Configuration;
use crate::icmpv6::Endpoint;
use crate::iface::{RefreshOutcome, Tracker};
use crate::netlink;
use crate::scheduler::Scheduler;
use crate::wire::ra::RouterAdvertisement;
use crate::wire::rs;

/// Owns every long-lived piece of state; components are reached only
/// through method calls on this value, never via ambient globals.
pub struct Reactor {
    config: Configuration,
    clock: Clock,
    icmp: Endpoint,
    netlink: netlink::Socket,
    tracker: Tracker,
    scheduler: Scheduler,
    icmp_buf: [u8; 1500],
    netlink_buf: [u8; 8192],
}

impl Reactor {
    pub fn new(config: Configuration) -> anyhow::Result<Reactor> {
        let clock = Clock::new();
        let icmp = Endpoint::open()?;
        let netlink = netlink::Socket::open()?;
        let tracker = Tracker::new(config.interface.clone());
        let scheduler = Scheduler::new(&clock, config.max_rtr_adv_interval_secs);

        Ok(Reactor {
            config,
            clock,
            icmp,
            netlink,
            tracker,
            scheduler,
            icmp_buf: [0; 1500],
            netlink_buf: [0; 8192],
        })
    }

    /// Runs until a fatal error occurs (the process is expected to be
    /// killed by the operating system otherwise).
    pub fn run(&mut self) -> anyhow::Result<()> {
        info!(interface = %self.config.interface, "starting router advertisement daemon");

        // Establish an initial view of the interface before relying on
        // notifications for subsequent changes.
        if self.tracker.refresh(&self.icmp) == RefreshOutcome::BecameReadyOrChanged {
            self.scheduler.reset(&self.clock);
        }

        loop {
            self.step()?;
        }
    }

    fn step(&mut self) -> anyhow::Result<()> {
        let now = self.clock.now();
        let ok = self.tracker.state().ok;

        let timeout = if ok {
            let remaining = self.clock.diff_ms(self.scheduler.next_advert(), now).max(0) as u64;
            // `PollTimeout` only holds a u16 worth of milliseconds; a
            // remaining time beyond that just means an extra, harmless
            // wakeup before the deadline actually arrives.
            PollTimeout::from(remaining.min(u16::MAX as u64) as u16)
        } else {
            PollTimeout::NONE
        };

        let icmp_fd = unsafe { BorrowedFd::borrow_raw(self.icmp.as_raw_fd()) };
        let netlink_fd = unsafe { BorrowedFd::borrow_raw(self.netlink.as_raw_fd()) };
        let mut fds = [
            PollFd::new(icmp_fd, PollFlags::POLLIN),
            PollFd::new(netlink_fd, PollFlags::POLLIN),
        ];

        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(e) => anyhow::bail!("poll failed: {e}"),
        }

        let now = self.clock.now();

        if readable(&fds[0]) {
            self.handle_icmp();
        }
        if readable(&fds[1]) {
            self.handle_netlink()?;
        }

        if self.tracker.state().ok && !self.clock.after(self.scheduler.next_advert(), now) {
            self.send_advertisement();
        }

        Ok(())
    }

    fn handle_icmp(&mut self) {
        let received = match self.icmp.recv(&mut self.icmp_buf) {
            Ok(Some(r)) => r,
            Ok(None) => return,
            Err(err) => {
                warn!(%err, "failed to read from ICMPv6 socket");
                return;
            }
        };

        let payload = &self.icmp_buf[..received.len];
        match rs::validate(payload, received.hop_limit, &received.source) {
            Ok(()) => {
                self.scheduler.schedule_unsolicited(&self.clock);
            }
            Err(reason) => {
                warn!(?reason, source = %received.source, "dropping router solicitation");
            }
        }
    }

    fn handle_netlink(&mut self) -> anyhow::Result<()> {
        let events = self
            .netlink
            .recv_events(&mut self.netlink_buf)
            .map_err(crate::error::Error::from)
            .context("kernel event channel failed")?;

        let tracked_ifindex = self.tracker.tracked_ifindex();
        let ok = self.tracker.state().ok;
        let relevant = events.iter().any(|event| is_relevant(event, tracked_ifindex, ok));
        if relevant && self.tracker.refresh(&self.icmp) == RefreshOutcome::BecameReadyOrChanged {
            self.scheduler.reset(&self.clock);
            self.scheduler.schedule_unsolicited(&self.clock);
        }

        Ok(())
    }

    fn send_advertisement(&mut self) {
        let state = self.tracker.state().clone();
        let ra = RouterAdvertisement {
            source_mac: state.mac,
            default_lifetime: self.config.default_lifetime,
            prefixes: self.config.prefixes.clone(),
            valid_lifetime: self.config.valid_lifetime,
            preferred_lifetime: self.config.preferred_lifetime,
            rdnss: self.config.rdnss.clone(),
        };
        let payload = ra.encode();

        match self.icmp.send_advertisement(&payload, state.ifindex, state.link_local) {
            Ok(()) => {
                self.scheduler.record_send(&self.clock);
                self.scheduler.schedule_periodic(&self.clock);
            }
            Err(err) => {
                warn!(%err, "failed to send router advertisement");
                self.tracker.clear();
            }
        }
    }
}

fn is_relevant(event: &netlink::Event, tracked_ifindex: u32, ok: bool) -> bool {
    use netlink::Event::*;
    match *event {
        LinkAdded(_) => true,
        LinkRemoved(ifindex) => ok && ifindex == tracked_ifindex,
        AddressAdded(ifindex) => !ok && ifindex == tracked_ifindex,
        AddressRemoved(ifindex) => ok && ifindex == tracked_ifindex,
    }
}

fn readable(fd: &PollFd) -> bool {
    fd.revents().map(|r| r.contains(PollFlags::POLLIN)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink::Event::*;

    #[test]
    fn link_added_is_always_relevant() {
        assert!(is_relevant(&LinkAdded(9), 3, true));
        assert!(is_relevant(&LinkAdded(9), 3, false));
    }

    #[test]
    fn address_added_only_relevant_when_not_ok() {
        // `tracked_ifindex` here stands in for `Tracker::tracked_ifindex()`,
        // which survives an outage even though `State::ifindex` resets to 0
        // — this is what lets an address re-add be recognized once the
        // interface comes back.
        assert!(is_relevant(&AddressAdded(3), 3, false));
        assert!(!is_relevant(&AddressAdded(3), 3, true));
    }

    #[test]
    fn address_removed_only_relevant_when_ok() {
        assert!(is_relevant(&AddressRemoved(3), 3, true));
        assert!(!is_relevant(&AddressRemoved(3), 3, false));
    }

    #[test]
    fn events_for_other_interfaces_ignored() {
        assert!(!is_relevant(&LinkRemoved(4), 3, true));
        assert!(!is_relevant(&AddressRemoved(4), 3, true));
        assert!(!is_relevant(&AddressAdded(4), 3, false));
    }
}

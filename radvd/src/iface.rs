//! Resolves and tracks the single interface this daemon advertises on:
//! its index, MAC, link-local address, and whether it's currently fit to
//! advertise from at all.

use std::ffi::CString;
use std::io;
use std::net::Ipv6Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::warn;

use crate::icmpv6::Endpoint;

const SIOCGIFHWADDR: libc::c_ulong = 0x8927;

#[repr(C)]
struct IfReqHwAddr {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_hwaddr: libc::sockaddr,
}

/// Everything the scheduler and ICMPv6 endpoint need to know about the
/// tracked interface. Rebuilt wholesale by `refresh`, never patched
/// field-by-field, per the atomicity call in the design notes: a refresh
/// that fails partway through never leaves a half-populated, `ok = true`
/// view in place of the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub ok: bool,
    pub ifindex: u32,
    pub mac: [u8; 6],
    pub link_local: Ipv6Addr,
}

pub struct Tracker {
    name: String,
    state: State,
    /// Last ifindex successfully resolved for `name` via `if_nametoindex`.
    /// Kept even across a failed refresh (unlike `state`, which reverts to
    /// all-default) so that kernel events about this interface — in
    /// particular an address add/remove that arrives while `state.ok` is
    /// false — can still be matched against it. `state.ifindex` is not
    /// reused for this because it is zeroed whenever `ok` is false, per
    /// the atomicity guarantee on `State` itself.
    tracked_ifindex: u32,
}

/// Outcome of a refresh, used by the caller to decide whether to trigger
/// an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// State is unchanged and no fresh multicast join happened.
    Unchanged,
    /// State changed, or the multicast join was freshly established
    /// (rather than already-a-member): an advertisement should follow.
    BecameReadyOrChanged,
}

impl Tracker {
    pub fn new(name: impl Into<String>) -> Tracker {
        Tracker { name: name.into(), state: State::default(), tracked_ifindex: 0 }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The most recently resolved ifindex for this interface, independent
    /// of whether the interface is currently `ok`. Kernel-event relevance
    /// filtering (`reactor::is_relevant`) matches against this rather than
    /// `state().ifindex`, which resets to 0 whenever `ok` is false.
    pub fn tracked_ifindex(&self) -> u32 {
        self.tracked_ifindex
    }

    /// Drop to `ok = false` without touching the kernel. Used after a
    /// send failure: the interface tracker re-establishes readiness on
    /// the next relevant kernel event rather than retrying immediately.
    pub fn clear(&mut self) {
        self.state = State::default();
    }

    /// Snapshot-then-rebuild-from-scratch: the result fully replaces
    /// `self.state`, never patches it, so an early `not ready` exit can't
    /// leave stale fields from a previous success lying around.
    pub fn refresh(&mut self, endpoint: &Endpoint) -> RefreshOutcome {
        let previous = self.state.clone();
        let (built, fresh_join) = self.build_state(endpoint);
        let new_state = built.unwrap_or_default();

        let changed = new_state != previous;
        self.state = new_state;

        if changed || fresh_join {
            RefreshOutcome::BecameReadyOrChanged
        } else {
            RefreshOutcome::Unchanged
        }
    }

    fn build_state(&mut self, endpoint: &Endpoint) -> (Option<State>, bool) {
        let ifindex = match if_nametoindex(&self.name) {
            Some(i) => i,
            None => {
                warn!(interface = %self.name, "interface not found");
                return (None, false);
            }
        };
        // Record the index as soon as it's resolved, even if a later step
        // in this refresh fails: it's still the most accurate information
        // available about which interface future kernel events refer to.
        self.tracked_ifindex = ifindex;

        let mac = match hardware_address(&self.name) {
            Ok(mac) => mac,
            Err(err) => {
                warn!(interface = %self.name, %err, "failed to query hardware address");
                return (None, false);
            }
        };

        let link_local = match find_link_local(&self.name) {
            Ok(Some(addr)) => addr,
            Ok(None) => {
                warn!(interface = %self.name, "no link-local address present");
                return (None, false);
            }
            Err(err) => {
                warn!(interface = %self.name, %err, "failed to enumerate addresses");
                return (None, false);
            }
        };

        let fresh_join = match endpoint.bind_to_interface(&self.name, ifindex) {
            Ok(fresh_join) => fresh_join,
            Err(err) => {
                warn!(interface = %self.name, %err, "failed to bind or join multicast group");
                return (None, false);
            }
        };

        (Some(State { ok: true, ifindex, mac, link_local }), fresh_join)
    }
}

fn if_nametoindex(name: &str) -> Option<u32> {
    let cname = CString::new(name).ok()?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        None
    } else {
        Some(index)
    }
}

fn hardware_address(name: &str) -> io::Result<[u8; 6]> {
    let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let sock = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut ifr = IfReqHwAddr {
        ifr_name: [0; libc::IFNAMSIZ],
        ifr_hwaddr: unsafe { std::mem::zeroed() },
    };
    let name_bytes = name.as_bytes();
    if name_bytes.len() >= libc::IFNAMSIZ {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
    }
    for (dst, &src) in ifr.ifr_name.iter_mut().zip(name_bytes) {
        *dst = src as libc::c_char;
    }

    let res = unsafe { libc::ioctl(sock.as_raw_fd(), SIOCGIFHWADDR as _, &mut ifr) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut mac = [0u8; 6];
    for (dst, &src) in mac.iter_mut().zip(ifr.ifr_hwaddr.sa_data.iter()) {
        *dst = src as u8;
    }
    Ok(mac)
}

/// First IPv6 link-local (`fe80::/10`) address bound to `name`.
fn find_link_local(name: &str) -> nix::Result<Option<Ipv6Addr>> {
    for iface in nix::ifaddrs::getifaddrs()? {
        if iface.interface_name != name {
            continue;
        }
        let Some(address) = iface.address else { continue };
        let Some(sin6) = address.as_sockaddr_in6() else { continue };
        let addr = sin6.ip();
        if is_link_local(&addr) {
            return Ok(Some(addr));
        }
    }
    Ok(None)
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    let segments = addr.segments();
    segments[0] & 0xffc0 == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_local_classification() {
        assert!(is_link_local(&"fe80::1".parse().unwrap()));
        assert!(is_link_local(&"fe80:1234::1".parse().unwrap()));
        assert!(!is_link_local(&"2001:db8::1".parse().unwrap()));
        assert!(!is_link_local(&"::1".parse().unwrap()));
        assert!(!is_link_local(&"fec0::1".parse().unwrap()));
    }

    #[test]
    fn tracker_starts_not_ok() {
        let tracker = Tracker::new("eth0");
        assert!(!tracker.state().ok);
        assert_eq!(tracker.tracked_ifindex(), 0);
    }

    #[test]
    fn clear_resets_state_but_keeps_tracked_ifindex() {
        let mut tracker = Tracker::new("eth0");
        tracker.state = State { ok: true, ifindex: 7, mac: [0; 6], link_local: "fe80::1".parse().unwrap() };
        tracker.tracked_ifindex = 7;

        tracker.clear();

        assert!(!tracker.state().ok);
        assert_eq!(tracker.state().ifindex, 0);
        assert_eq!(tracker.tracked_ifindex(), 7);
    }
}

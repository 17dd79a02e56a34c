//! Raw ICMPv6 endpoint: socket setup, the `ff02::1` send path, and the
//! receive path with its hop-limit and destination-address ancillary data.
//!
//! Sockopts here (`IPV6_CHECKSUM` at `SOL_RAW`, `ICMP6_FILTER`) have no
//! stable `nix` wrapper, so they're issued directly against `libc`, the
//! same way the custom `sockopt` module upstream of this workspace did it.

use std::io;
use std::mem;
use std::net::Ipv6Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::{c_int, c_void, sockaddr_in6, socklen_t};
use tracing::{debug, warn};

use crate::wire::ICMPV6_RTR_SOLICIT;

const IPV6_CHECKSUM: c_int = 7;
const ICMP6_FILTER: c_int = 1;
const IPV6_RECVHOPLIMIT: c_int = 51;
const IPV6_RECVPKTINFO: c_int = 49;
const IPV6_PKTINFO: c_int = 50;
const IPV6_MULTICAST_LOOP: c_int = 19;

const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
pub const ALL_ROUTERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 2);

/// A bitmask of the 256 possible ICMPv6 types, in the kernel's native
/// `icmp6_filter` layout (32 bits per word, type N's bit lives at word
/// `N / 32`, bit `N % 32`). Passing `ICMP6_FILTER` a filter that blocks
/// everything except Router Solicitation means the reactor's recv loop
/// never has to look at anything else.
struct Icmp6Filter([u32; 8]);

impl Icmp6Filter {
    fn block_all() -> Icmp6Filter {
        Icmp6Filter([u32::MAX; 8])
    }

    fn set_pass(&mut self, icmp_type: u8) {
        let word = (icmp_type / 32) as usize;
        let bit = icmp_type % 32;
        self.0[word] &= !(1 << bit);
    }
}

/// One socket, bound to a single interface, used both to receive Router
/// Solicitations and to send Router Advertisements.
pub struct Endpoint {
    fd: OwnedFd,
}

/// A received, ancillary-data-annotated datagram.
pub struct Received {
    pub len: usize,
    pub source: Ipv6Addr,
    pub hop_limit: u8,
}

fn check(res: c_int) -> io::Result<()> {
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

unsafe fn setsockopt_raw<T>(fd: RawFd, level: c_int, name: c_int, val: &T) -> io::Result<()> {
    let res = libc::setsockopt(
        fd,
        level,
        name,
        val as *const T as *const c_void,
        mem::size_of::<T>() as socklen_t,
    );
    check(res)
}

impl Endpoint {
    /// Open and fully configure the raw ICMPv6 socket, but do not yet bind
    /// it to an interface or join any multicast group; that's
    /// `bind_to_interface`'s job, since it can change as interfaces come
    /// and go.
    pub fn open() -> io::Result<Endpoint> {
        let raw = unsafe {
            libc::socket(
                libc::AF_INET6,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                libc::IPPROTO_ICMPV6,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        unsafe {
            setsockopt_raw(fd.as_raw_fd(), libc::SOL_RAW, IPV6_CHECKSUM, &2i32)?;
            setsockopt_raw(fd.as_raw_fd(), libc::SOL_IPV6, libc::IPV6_UNICAST_HOPS, &255i32)?;
            setsockopt_raw(fd.as_raw_fd(), libc::SOL_IPV6, libc::IPV6_MULTICAST_HOPS, &255i32)?;
            setsockopt_raw(fd.as_raw_fd(), libc::SOL_IPV6, IPV6_MULTICAST_LOOP, &1i32)?;
            setsockopt_raw(fd.as_raw_fd(), libc::SOL_IPV6, IPV6_RECVHOPLIMIT, &1i32)?;
            setsockopt_raw(fd.as_raw_fd(), libc::SOL_IPV6, IPV6_RECVPKTINFO, &1i32)?;

            let mut filter = Icmp6Filter::block_all();
            filter.set_pass(ICMPV6_RTR_SOLICIT);
            setsockopt_raw(fd.as_raw_fd(), libc::IPPROTO_ICMPV6, ICMP6_FILTER, &filter.0)?;
        }

        Ok(Endpoint { fd })
    }

    /// Bind to a single interface (`SO_BINDTODEVICE`) so the socket only
    /// ever sees traffic on it, and join the all-routers multicast group
    /// there. `EADDRINUSE` on the join is swallowed (not an error: it means
    /// a previous refresh already joined the same group on the same
    /// interface), but the caller still needs to tell the two outcomes
    /// apart, so this returns whether the join was freshly established
    /// (`true`) or the group was already joined (`false`).
    pub fn bind_to_interface(&self, ifname: &str, ifindex: u32) -> io::Result<bool> {
        let mut name_buf = [0u8; libc::IFNAMSIZ];
        let name_bytes = ifname.as_bytes();
        if name_bytes.len() >= name_buf.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "interface name too long"));
        }
        name_buf[..name_bytes.len()].copy_from_slice(name_bytes);

        let res = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                name_buf.as_ptr() as *const c_void,
                name_buf.len() as socklen_t,
            )
        };
        check(res)?;

        let mreq = libc::ipv6_mreq {
            ipv6mr_multiaddr: libc::in6_addr { s6_addr: ALL_ROUTERS.octets() },
            ipv6mr_interface: ifindex,
        };
        let res = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_IPV6,
                libc::IPV6_ADD_MEMBERSHIP,
                &mreq as *const _ as *const c_void,
                mem::size_of::<libc::ipv6_mreq>() as socklen_t,
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EADDRINUSE) {
                return Err(err);
            }
            debug!(interface = ifname, "already a member of ff02::2");
            return Ok(false);
        }

        Ok(true)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Send a Router Advertisement to `ff02::1` on `ifindex`, with the
    /// packet's source address pinned to `source` via `IPV6_PKTINFO`
    /// ancillary data (so the kernel doesn't pick whichever address it
    /// likes best).
    pub fn send_advertisement(&self, payload: &[u8], ifindex: u32, source: Ipv6Addr) -> io::Result<()> {
        let dest = sockaddr_in6 {
            sin6_family: libc::AF_INET6 as u16,
            sin6_port: 0,
            sin6_flowinfo: 0,
            sin6_addr: libc::in6_addr { s6_addr: ALL_NODES.octets() },
            sin6_scope_id: ifindex,
        };

        let pktinfo = libc::in6_pktinfo {
            ipi6_addr: libc::in6_addr { s6_addr: source.octets() },
            ipi6_ifindex: ifindex as i32,
        };

        let mut cmsg_buf = [0u8; cmsg_space::<libc::in6_pktinfo>()];
        let mut iov = libc::iovec {
            iov_base: payload.as_ptr() as *mut c_void,
            iov_len: payload.len(),
        };

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &dest as *const _ as *mut c_void;
        msg.msg_namelen = mem::size_of::<sockaddr_in6>() as u32;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = cmsg_buf.len();

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::IPPROTO_IPV6;
            (*cmsg).cmsg_type = IPV6_PKTINFO;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::in6_pktinfo>() as u32) as usize;
            std::ptr::write(libc::CMSG_DATA(cmsg) as *mut libc::in6_pktinfo, pktinfo);
        }

        let res = unsafe { libc::sendmsg(self.fd.as_raw_fd(), &msg, 0) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Receive one datagram into `buf`, returning its length, source
    /// address, and the ancillary hop limit. Returns `Ok(None)` on
    /// `EAGAIN`/`EWOULDBLOCK` (nothing pending, the common case in a
    /// non-blocking reactor).
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<Received>> {
        let mut src: sockaddr_in6 = unsafe { mem::zeroed() };
        let mut cmsg_buf = [0u8; 128];
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = &mut src as *mut _ as *mut c_void;
        msg.msg_namelen = mem::size_of::<sockaddr_in6>() as u32;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = cmsg_buf.len();

        let n = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }

        let mut hop_limit = None;
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::IPPROTO_IPV6 && (*cmsg).cmsg_type == IPV6_RECVHOPLIMIT {
                    let ptr = libc::CMSG_DATA(cmsg) as *const c_int;
                    hop_limit = Some(std::ptr::read_unaligned(ptr) as u8);
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        let Some(hop_limit) = hop_limit else {
            warn!("received ICMPv6 datagram with no hop limit ancillary data, dropping");
            return Ok(None);
        };

        Ok(Some(Received {
            len: n as usize,
            source: Ipv6Addr::from(src.sin6_addr.s6_addr),
            hop_limit,
        }))
    }
}

const fn cmsg_space<T>() -> usize {
    // Mirrors libc's CMSG_SPACE macro, which isn't const-evaluable itself.
    let header = mem::size_of::<libc::cmsghdr>();
    let aligned_header = (header + mem::size_of::<usize>() - 1) & !(mem::size_of::<usize>() - 1);
    let len = mem::size_of::<T>();
    let aligned_len = (len + mem::size_of::<usize>() - 1) & !(mem::size_of::<usize>() - 1);
    aligned_header + aligned_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_blocks_everything_but_router_solicitation() {
        let mut filter = Icmp6Filter::block_all();
        filter.set_pass(ICMPV6_RTR_SOLICIT);
        for t in 0..=255u8 {
            let word = (t / 32) as usize;
            let bit = t % 32;
            let passes = filter.0[word] & (1 << bit) == 0;
            assert_eq!(passes, t == ICMPV6_RTR_SOLICIT, "type {t}");
        }
    }
}

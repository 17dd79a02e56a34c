//! A non-blocking `AF_NETLINK`/`NETLINK_ROUTE` socket subscribed to link
//! and IPv6 address change notifications. No background thread: the
//! reactor polls this socket's fd like any other and drains it inline.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

const NETLINK_ROUTE: i32 = 0;

const RTMGRP_LINK: u32 = 1;
const RTMGRP_IPV6_IFADDR: u32 = 0x100;

const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_NEWADDR: u16 = 20;
const RTM_DELADDR: u16 = 21;

const NLMSG_DONE: u16 = 3;
const NLMSG_ERROR: u16 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
struct NlMsgHdr {
    nlmsg_len: u32,
    nlmsg_type: u16,
    nlmsg_flags: u16,
    nlmsg_seq: u32,
    nlmsg_pid: u32,
}

const NLMSGHDR_LEN: usize = mem::size_of::<NlMsgHdr>();

/// `ifi_index` is the only field of `ifinfomsg` the daemon cares about;
/// it always sits at the same offset regardless of link type.
const IFINFOMSG_INDEX_OFFSET: usize = 4;
/// Likewise `ifa_index` within `ifaddrmsg`.
const IFADDRMSG_INDEX_OFFSET: usize = 4;

#[repr(C)]
struct SockaddrNl {
    nl_family: u16,
    nl_pad: u16,
    nl_pid: u32,
    nl_groups: u32,
}

/// A classified netlink event relevant to interface/address tracking. Only
/// the interface index is kept: the interface tracker re-derives current
/// state with a full `getifaddrs`/`if_nametoindex` refresh rather than
/// trying to keep the kernel's notification payload in sync incrementally.
///
/// The kernel only ever multicasts `RTM_NEWLINK` for both "a link appeared"
/// and "an existing link's attributes changed" (there is no separate
/// "link-set" notification type), so both cases are represented by the
/// single `LinkAdded` variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    LinkAdded(u32),
    LinkRemoved(u32),
    AddressAdded(u32),
    AddressRemoved(u32),
}

impl Event {
    pub fn ifindex(&self) -> u32 {
        match *self {
            Event::LinkAdded(i)
            | Event::LinkRemoved(i)
            | Event::AddressAdded(i)
            | Event::AddressRemoved(i) => i,
        }
    }
}

pub struct Socket {
    fd: OwnedFd,
}

impl Socket {
    /// Open the subscription socket. Doesn't request an initial dump:
    /// the caller is expected to do its own `getifaddrs`-based refresh at
    /// startup before relying on notifications for subsequent changes.
    pub fn open() -> io::Result<Socket> {
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                NETLINK_ROUTE,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = SockaddrNl {
            nl_family: libc::AF_NETLINK as u16,
            nl_pad: 0,
            nl_pid: 0,
            nl_groups: RTMGRP_LINK | RTMGRP_IPV6_IFADDR,
        };
        let res = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<SockaddrNl>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Socket { fd })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Read and classify one buffer's worth of pending messages.
    /// `EAGAIN`/`EWOULDBLOCK` yields an empty vector rather than an error.
    /// An `NLMSG_ERROR` payload is treated as fatal: subscription sockets
    /// should never receive one in ordinary operation, so seeing one
    /// means something is wrong with how the socket was set up.
    pub fn recv_events(&self, buf: &mut [u8]) -> io::Result<Vec<Event>> {
        let n = unsafe { libc::recv(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut _, buf.len(), 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        parse_messages(&buf[..n as usize])
    }
}

fn parse_messages(data: &[u8]) -> io::Result<Vec<Event>> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset + NLMSGHDR_LEN <= data.len() {
        let hdr: NlMsgHdr = unsafe { std::ptr::read_unaligned(data[offset..].as_ptr() as *const NlMsgHdr) };
        if (hdr.nlmsg_len as usize) < NLMSGHDR_LEN {
            break;
        }
        let msg_end = offset + hdr.nlmsg_len as usize;
        if msg_end > data.len() {
            break;
        }
        let payload = &data[offset + NLMSGHDR_LEN..msg_end];

        match hdr.nlmsg_type {
            NLMSG_DONE => break,
            NLMSG_ERROR => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "netlink subscription socket received NLMSG_ERROR",
                ));
            }
            RTM_NEWLINK => {
                if let Some(ifindex) = read_u32(payload, IFINFOMSG_INDEX_OFFSET) {
                    events.push(Event::LinkAdded(ifindex));
                }
            }
            RTM_DELLINK => {
                if let Some(ifindex) = read_u32(payload, IFINFOMSG_INDEX_OFFSET) {
                    events.push(Event::LinkRemoved(ifindex));
                }
            }
            RTM_NEWADDR => {
                if let Some(ifindex) = read_u32(payload, IFADDRMSG_INDEX_OFFSET) {
                    events.push(Event::AddressAdded(ifindex));
                }
            }
            RTM_DELADDR => {
                if let Some(ifindex) = read_u32(payload, IFADDRMSG_INDEX_OFFSET) {
                    events.push(Event::AddressRemoved(ifindex));
                }
            }
            _ => {}
        }

        // Netlink messages are padded to 4-byte alignment.
        offset = (msg_end + 3) & !3;
    }

    Ok(events)
}

fn read_u32(payload: &[u8], offset: usize) -> Option<u32> {
    let bytes = payload.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_msg(buf: &mut Vec<u8>, msg_type: u16, ifindex: u32) {
        let mut ifinfomsg = vec![0u8; 16];
        ifinfomsg[4..8].copy_from_slice(&ifindex.to_ne_bytes());
        let total_len = NLMSGHDR_LEN + ifinfomsg.len();
        let hdr = NlMsgHdr {
            nlmsg_len: total_len as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: 0,
            nlmsg_seq: 0,
            nlmsg_pid: 0,
        };
        let hdr_bytes = unsafe {
            std::slice::from_raw_parts(&hdr as *const NlMsgHdr as *const u8, NLMSGHDR_LEN)
        };
        buf.extend_from_slice(hdr_bytes);
        buf.extend_from_slice(&ifinfomsg);
    }

    #[test]
    fn parses_link_and_address_events() {
        let mut buf = Vec::new();
        push_msg(&mut buf, RTM_NEWLINK, 3);
        push_msg(&mut buf, RTM_NEWADDR, 3);
        push_msg(&mut buf, RTM_DELLINK, 4);

        let events = parse_messages(&buf).unwrap();
        assert_eq!(
            events,
            vec![
                Event::LinkAdded(3),
                Event::AddressAdded(3),
                Event::LinkRemoved(4),
            ]
        );
    }

    #[test]
    fn stops_at_nlmsg_done() {
        let mut buf = Vec::new();
        push_msg(&mut buf, RTM_NEWLINK, 3);
        push_msg(&mut buf, NLMSG_DONE, 0);
        push_msg(&mut buf, RTM_NEWLINK, 5);

        let events = parse_messages(&buf).unwrap();
        assert_eq!(events, vec![Event::LinkAdded(3)]);
    }

    #[test]
    fn nlmsg_error_is_fatal() {
        let mut buf = Vec::new();
        push_msg(&mut buf, NLMSG_ERROR, 0);
        assert!(parse_messages(&buf).is_err());
    }

    #[test]
    fn truncated_trailing_message_is_ignored() {
        let mut buf = Vec::new();
        push_msg(&mut buf, RTM_NEWLINK, 3);
        buf.extend_from_slice(&[0, 0, 0]);
        let events = parse_messages(&buf).unwrap();
        assert_eq!(events, vec![Event::LinkAdded(3)]);
    }
}

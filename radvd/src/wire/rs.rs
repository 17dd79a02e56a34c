//! Router Solicitation validation (RFC 4861 §6.1.1, §4.1).

use std::net::Ipv6Addr;

use super::{parse_options, OptionError, ICMPV6_RTR_SOLICIT, OPT_SOURCE_LINK_LAYER_ADDRESS};

const RS_HEADER_LEN: usize = 8;

/// Why an inbound packet was rejected as not a valid solicitation worth
/// acting on. All of these are silent-drop outcomes, not errors: a
/// malformed or spoofed RS never reaches the scheduler.
#[derive(Debug, Eq, PartialEq)]
pub enum RejectReason {
    /// Ancillary hop limit wasn't exactly 255 (RFC 4861 §6.1.1): the
    /// packet didn't originate on the local link.
    HopLimit,
    WrongTypeOrCode,
    TooShort,
    Options(OptionError),
    /// A Source Link-Layer Address option was present but the IPv6 source
    /// address was unspecified (`::`), which RFC 4861 §4.1 forbids.
    UnspecifiedSourceWithLinkLayerAddress,
}

impl From<OptionError> for RejectReason {
    fn from(e: OptionError) -> Self {
        RejectReason::Options(e)
    }
}

/// Validate an inbound ICMPv6 Router Solicitation. `hop_limit` is the value
/// read from the `IPV6_RECVHOPLIMIT` ancillary data, not the packet body
/// (the IPv6 hop limit isn't part of the ICMPv6 payload at all). `source`
/// is the packet's IPv6 source address.
///
/// Returns `Ok(())` when the solicitation is well-formed and should trigger
/// a solicited Router Advertisement; the caller does not need anything
/// else out of the packet, so there is no corresponding `RouterSolicitation`
/// struct to decode into.
pub fn validate(buf: &[u8], hop_limit: u8, source: &Ipv6Addr) -> Result<(), RejectReason> {
    if hop_limit != 255 {
        return Err(RejectReason::HopLimit);
    }
    if buf.len() < RS_HEADER_LEN {
        return Err(RejectReason::TooShort);
    }
    if buf[0] != ICMPV6_RTR_SOLICIT || buf[1] != 0 {
        return Err(RejectReason::WrongTypeOrCode);
    }

    let options = parse_options(&buf[RS_HEADER_LEN..])?;
    let has_link_layer_address = options
        .iter()
        .any(|(opt_type, _)| *opt_type == OPT_SOURCE_LINK_LAYER_ADDRESS);
    if has_link_layer_address && source.is_unspecified() {
        return Err(RejectReason::UnspecifiedSourceWithLinkLayerAddress);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        vec![ICMPV6_RTR_SOLICIT, 0, 0, 0, 0, 0, 0, 0]
    }

    #[test]
    fn bare_solicitation_accepted() {
        let buf = header();
        let source: Ipv6Addr = "fe80::1".parse().unwrap();
        assert_eq!(validate(&buf, 255, &source), Ok(()));
    }

    #[test]
    fn wrong_hop_limit_rejected() {
        let buf = header();
        let source: Ipv6Addr = "fe80::1".parse().unwrap();
        assert_eq!(validate(&buf, 64, &source), Err(RejectReason::HopLimit));
    }

    #[test]
    fn wrong_type_rejected() {
        let mut buf = header();
        buf[0] = 134;
        let source: Ipv6Addr = "fe80::1".parse().unwrap();
        assert_eq!(validate(&buf, 255, &source), Err(RejectReason::WrongTypeOrCode));
    }

    #[test]
    fn too_short_rejected() {
        let buf = vec![ICMPV6_RTR_SOLICIT, 0, 0, 0];
        let source: Ipv6Addr = "fe80::1".parse().unwrap();
        assert_eq!(validate(&buf, 255, &source), Err(RejectReason::TooShort));
    }

    #[test]
    fn link_layer_address_with_unspecified_source_rejected() {
        let mut buf = header();
        buf.extend_from_slice(&[1, 1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let source: Ipv6Addr = "::".parse().unwrap();
        assert_eq!(
            validate(&buf, 255, &source),
            Err(RejectReason::UnspecifiedSourceWithLinkLayerAddress)
        );
    }

    #[test]
    fn link_layer_address_with_real_source_accepted() {
        let mut buf = header();
        buf.extend_from_slice(&[1, 1, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        let source: Ipv6Addr = "fe80::1".parse().unwrap();
        assert_eq!(validate(&buf, 255, &source), Ok(()));
    }
}

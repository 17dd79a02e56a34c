//! Router Advertisement construction (and, for round-trip testing,
//! decoding). Field layout follows RFC 4861 §4.2 plus the Prefix
//! Information option (§4.6.2) and the RDNSS option (RFC 8106 §5.1).

use std::net::Ipv6Addr;

use byteorder::{BigEndian, ByteOrder};

use super::{
    parse_options, push_option_header, OptionError, ICMPV6_RTR_ADVERT, OPT_PREFIX_INFORMATION,
    OPT_RDNSS, OPT_SOURCE_LINK_LAYER_ADDRESS, PIO_FLAG_AUTONOMOUS, PIO_FLAG_ONLINK,
};

/// One `/64` prefix to advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    pub address: Ipv6Addr,
    pub on_link: bool,
}

/// Everything needed to build a single Router Advertisement. Lifetimes are
/// already resolved (not `Option`s) because `Configuration` fills in its
/// defaults before this type is ever constructed.
#[derive(Debug, Clone)]
pub struct RouterAdvertisement {
    pub source_mac: [u8; 6],
    pub default_lifetime: u16,
    pub prefixes: Vec<Prefix>,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub rdnss: Vec<Ipv6Addr>,
}

pub const CUR_HOP_LIMIT: u8 = 64;
const RDNSS_LIFETIME_SECS: u32 = 1200;

impl RouterAdvertisement {
    /// Serialize as the ICMPv6 payload (type/code/checksum included; the
    /// checksum field is left zero for the kernel to fill via the
    /// `IPV6_CHECKSUM` socket option).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.prefixes.len() * 32 + self.rdnss.len() * 16);

        out.push(ICMPV6_RTR_ADVERT);
        out.push(0); // code
        out.extend_from_slice(&[0, 0]); // checksum, kernel-filled
        out.push(CUR_HOP_LIMIT);
        out.push(0); // M/O flags, always unset
        out.extend_from_slice(&self.default_lifetime.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // reachable time
        out.extend_from_slice(&0u32.to_be_bytes()); // retrans timer

        push_option_header(&mut out, OPT_SOURCE_LINK_LAYER_ADDRESS, 1);
        out.extend_from_slice(&self.source_mac);

        for prefix in &self.prefixes {
            push_option_header(&mut out, OPT_PREFIX_INFORMATION, 4);
            out.push(64); // prefix length
            let mut flags = PIO_FLAG_AUTONOMOUS;
            if prefix.on_link {
                flags |= PIO_FLAG_ONLINK;
            }
            out.push(flags);
            out.extend_from_slice(&self.valid_lifetime.to_be_bytes());
            out.extend_from_slice(&self.preferred_lifetime.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes()); // reserved
            out.extend_from_slice(&prefix.address.octets());
        }

        if !self.rdnss.is_empty() {
            let len_words = 1 + 2 * self.rdnss.len();
            push_option_header(&mut out, OPT_RDNSS, len_words as u8);
            out.extend_from_slice(&[0, 0]); // reserved
            out.extend_from_slice(&RDNSS_LIFETIME_SECS.to_be_bytes());
            for server in &self.rdnss {
                out.extend_from_slice(&server.octets());
            }
        }

        out
    }
}

/// Failure modes when decoding a byte string back into a
/// [`RouterAdvertisement`]. Only used by tests and diagnostic tooling; the
/// daemon itself never needs to decode its own output.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeError {
    TooShort,
    WrongType,
    Options(OptionError),
    BadSourceLinkLayerAddress,
    BadPrefixInformation,
    BadRdnss,
}

impl From<OptionError> for DecodeError {
    fn from(e: OptionError) -> Self {
        DecodeError::Options(e)
    }
}

const RA_HEADER_LEN: usize = 16;

/// Decode a previously-encoded RA. Used by the round-trip test in
/// `crate::wire::ra::tests` and by offline tooling, not by the reactor.
pub fn decode(buf: &[u8]) -> Result<RouterAdvertisement, DecodeError> {
    if buf.len() < RA_HEADER_LEN {
        return Err(DecodeError::TooShort);
    }
    if buf[0] != ICMPV6_RTR_ADVERT {
        return Err(DecodeError::WrongType);
    }
    let default_lifetime = BigEndian::read_u16(&buf[6..8]);

    let mut source_mac = None;
    let mut prefixes = Vec::new();
    let mut valid_lifetime = 0;
    let mut preferred_lifetime = 0;
    let mut rdnss = Vec::new();

    for (opt_type, body) in parse_options(&buf[RA_HEADER_LEN..])? {
        match opt_type {
            OPT_SOURCE_LINK_LAYER_ADDRESS => {
                if body.len() < 6 {
                    return Err(DecodeError::BadSourceLinkLayerAddress);
                }
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&body[..6]);
                source_mac = Some(mac);
            }
            OPT_PREFIX_INFORMATION => {
                if body.len() < 30 {
                    return Err(DecodeError::BadPrefixInformation);
                }
                let flags = body[1];
                valid_lifetime = BigEndian::read_u32(&body[2..6]);
                preferred_lifetime = BigEndian::read_u32(&body[6..10]);
                let mut addr = [0u8; 16];
                addr.copy_from_slice(&body[14..30]);
                prefixes.push(Prefix {
                    address: Ipv6Addr::from(addr),
                    on_link: flags & PIO_FLAG_ONLINK != 0,
                });
            }
            OPT_RDNSS => {
                if body.len() < 6 || (body.len() - 6) % 16 != 0 {
                    return Err(DecodeError::BadRdnss);
                }
                for chunk in body[6..].chunks(16) {
                    let mut addr = [0u8; 16];
                    addr.copy_from_slice(chunk);
                    rdnss.push(Ipv6Addr::from(addr));
                }
            }
            _ => {}
        }
    }

    Ok(RouterAdvertisement {
        source_mac: source_mac.unwrap_or([0; 6]),
        default_lifetime,
        prefixes,
        valid_lifetime,
        preferred_lifetime,
        rdnss,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RouterAdvertisement {
        RouterAdvertisement {
            source_mac: [0x02, 0x11, 0x22, 0x33, 0x44, 0x55],
            default_lifetime: 1800,
            prefixes: vec![Prefix {
                address: "2001:db8:1::".parse().unwrap(),
                on_link: true,
            }],
            valid_lifetime: 86400,
            preferred_lifetime: 14400,
            rdnss: vec![
                "2001:4860:4860::8888".parse().unwrap(),
                "2001:4860:4860::8844".parse().unwrap(),
            ],
        }
    }

    #[test]
    fn round_trips() {
        let ra = sample();
        let encoded = ra.encode();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.source_mac, ra.source_mac);
        assert_eq!(decoded.default_lifetime, ra.default_lifetime);
        assert_eq!(decoded.prefixes, ra.prefixes);
        assert_eq!(decoded.valid_lifetime, ra.valid_lifetime);
        assert_eq!(decoded.preferred_lifetime, ra.preferred_lifetime);
        assert_eq!(decoded.rdnss, ra.rdnss);
    }

    #[test]
    fn zero_lifetime_is_not_a_default_router() {
        let mut ra = sample();
        ra.default_lifetime = 0;
        let encoded = ra.encode();
        assert_eq!(&encoded[6..8], &[0, 0]);
    }

    #[test]
    fn no_rdnss_option_when_unconfigured() {
        let mut ra = sample();
        ra.rdnss.clear();
        let encoded = ra.encode();
        let decoded = decode(&encoded).unwrap();
        assert!(decoded.rdnss.is_empty());
    }

    #[test]
    fn hop_limit_is_always_64() {
        let encoded = sample().encode();
        assert_eq!(encoded[4], CUR_HOP_LIMIT);
    }

    #[test]
    fn decode_via_hexdump_fixture() {
        // A minimal, hand-built RA: hop limit 64, lifetime 0, one PIO for
        // 2001:db8::/64 with A+L set, valid/preferred default.
        let bytes = binhelpers::rhexdump!(
            r#"
            0000   86 00 00 00 40 00 00 00 00 00 00 00 00 00 00 00
            0010   03 04 40 c0 00 01 51 80 00 00 38 40 00 00 00 00
            0020   20 01 0d b8 00 00 00 00 00 00 00 00 00 00 00 00
            "#
        );
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.default_lifetime, 0);
        assert_eq!(decoded.prefixes.len(), 1);
        assert!(decoded.prefixes[0].on_link);
        assert_eq!(decoded.prefixes[0].address, "2001:db8::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(decoded.valid_lifetime, 86400);
        assert_eq!(decoded.preferred_lifetime, 14400);
    }
}

//! Validates and stores the immutable runtime parameters, and the
//! hand-rolled `argv` scanner that builds one from `std::env::args()`.
//! This is ambient CLI scaffolding, not part of the wire/scheduling core,
//! so it leans on `anyhow` for its error handling rather than the local
//! `Error` type the reactor's hot paths use.

use std::net::Ipv6Addr;

use anyhow::{anyhow, bail, Context, Result};

use crate::wire::ra::Prefix;

const MAX_PREFIXES: usize = 8;
const MAX_RDNSS: usize = 3;
const DEFAULT_VALID_LIFETIME: u32 = 86400;
const DEFAULT_PREFERRED_LIFETIME: u32 = 14400;
const DEFAULT_MAX_RTR_ADV_INTERVAL_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct Configuration {
    pub interface: String,
    pub prefixes: Vec<Prefix>,
    pub default_lifetime: u16,
    pub rdnss: Vec<Ipv6Addr>,
    pub valid_lifetime: u32,
    pub preferred_lifetime: u32,
    pub max_rtr_adv_interval_secs: u64,
}

const USAGE: &str = "\
usage: radvd -i <interface> (-a|-p) <prefix>... [options]

  -i <ifname>                      interface to advertise on (required)
  -a <prefix>                      /64 prefix to advertise (repeatable)
  -p <prefix>                      /64 prefix to advertise as on-link (repeatable)
  --default-lifetime <seconds>     router lifetime, 0..65535 (default 0)
  --rdnss <ipv6>                   recursive DNS server, repeatable up to 3
  --valid-lifetime <seconds>       prefix valid lifetime (default 86400)
  --preferred-lifetime <seconds>   prefix preferred lifetime (default 14400)
  --max-router-adv-interval <sec>  max interval between unsolicited RAs (default 600)
  -h                               print this message and exit
";

/// Parses `std::env::args()` (skipping argv[0]) into a `Configuration`, or
/// returns `Ok(None)` when `-h` was given (the caller should print usage
/// and exit 0 without treating it as an error).
pub fn parse(args: impl Iterator<Item = String>) -> Result<Option<Configuration>> {
    let mut interface = None;
    let mut prefixes = Vec::new();
    let mut default_lifetime: u16 = 0;
    let mut rdnss = Vec::new();
    let mut valid_lifetime = DEFAULT_VALID_LIFETIME;
    let mut preferred_lifetime = DEFAULT_PREFERRED_LIFETIME;
    let mut max_rtr_adv_interval_secs = DEFAULT_MAX_RTR_ADV_INTERVAL_SECS;

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                eprint!("{USAGE}");
                return Ok(None);
            }
            "-i" => {
                let value = args.next().context("-i requires an interface name")?;
                if interface.is_some() {
                    bail!("-i may only be given once");
                }
                interface = Some(value);
            }
            "-a" | "-p" => {
                let value = args.next().context("-a/-p requires a prefix")?;
                let on_link = arg == "-p";
                prefixes.push(parse_prefix(&value, on_link)?);
                if prefixes.len() > MAX_PREFIXES {
                    bail!("at most {MAX_PREFIXES} prefixes may be configured");
                }
            }
            "--default-lifetime" => {
                let value = args.next().context("--default-lifetime requires a value")?;
                let parsed: u32 = value.parse().context("invalid --default-lifetime")?;
                default_lifetime = u16::try_from(parsed).context("--default-lifetime must be 0..65535")?;
            }
            "--rdnss" => {
                let value = args.next().context("--rdnss requires an address")?;
                let addr: Ipv6Addr = value.parse().context("invalid --rdnss address")?;
                rdnss.push(addr);
                if rdnss.len() > MAX_RDNSS {
                    bail!("at most {MAX_RDNSS} --rdnss entries may be configured");
                }
            }
            "--valid-lifetime" => {
                let value = args.next().context("--valid-lifetime requires a value")?;
                valid_lifetime = value.parse().context("invalid --valid-lifetime")?;
            }
            "--preferred-lifetime" => {
                let value = args.next().context("--preferred-lifetime requires a value")?;
                preferred_lifetime = value.parse().context("invalid --preferred-lifetime")?;
            }
            "--max-router-adv-interval" => {
                let value = args.next().context("--max-router-adv-interval requires a value")?;
                max_rtr_adv_interval_secs = value.parse().context("invalid --max-router-adv-interval")?;
            }
            other => bail!("unrecognized argument: {other}"),
        }
    }

    let interface = interface.ok_or_else(|| anyhow!("-i <interface> is required"))?;
    if interface.is_empty() || interface.len() >= libc::IFNAMSIZ {
        bail!("interface name must be 1..{} characters", libc::IFNAMSIZ);
    }
    if prefixes.is_empty() {
        bail!("at least one -a or -p prefix is required");
    }
    if preferred_lifetime > valid_lifetime {
        bail!("--preferred-lifetime must not exceed --valid-lifetime");
    }

    Ok(Some(Configuration {
        interface,
        prefixes,
        default_lifetime,
        rdnss,
        valid_lifetime,
        preferred_lifetime,
        max_rtr_adv_interval_secs,
    }))
}

fn parse_prefix(value: &str, on_link: bool) -> Result<Prefix> {
    let (addr_part, prefix_len) = value
        .split_once('/')
        .ok_or_else(|| anyhow!("prefix {value} must be in address/length form"))?;
    let address: Ipv6Addr = addr_part.parse().with_context(|| format!("invalid prefix address {addr_part}"))?;
    let prefix_len: u8 = prefix_len.parse().with_context(|| format!("invalid prefix length in {value}"))?;
    if prefix_len != 64 {
        bail!("prefix {value} must have length 64");
    }
    if address.segments()[4..] != [0, 0, 0, 0] {
        bail!("prefix {value} must have zero host bits below /64");
    }
    Ok(Prefix { address, on_link })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &[&str]) -> impl Iterator<Item = String> {
        s.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn minimal_configuration_parses() {
        let config = parse(args(&["-i", "eth0", "-p", "2001:db8:1::/64"])).unwrap().unwrap();
        assert_eq!(config.interface, "eth0");
        assert_eq!(config.prefixes.len(), 1);
        assert!(config.prefixes[0].on_link);
    }

    #[test]
    fn help_flag_short_circuits() {
        assert!(parse(args(&["-h"])).unwrap().is_none());
    }

    #[test]
    fn missing_interface_rejected() {
        assert!(parse(args(&["-p", "2001:db8:1::/64"])).is_err());
    }

    #[test]
    fn missing_prefix_rejected() {
        assert!(parse(args(&["-i", "eth0"])).is_err());
    }

    #[test]
    fn ninth_prefix_rejected() {
        let mut a = vec!["-i".to_string(), "eth0".to_string()];
        for i in 0..9 {
            a.push("-a".to_string());
            a.push(format!("2001:db8:{i:x}::/64"));
        }
        assert!(parse(a.into_iter()).is_err());
    }

    #[test]
    fn eighth_prefix_accepted() {
        let mut a = vec!["-i".to_string(), "eth0".to_string()];
        for i in 0..8 {
            a.push("-a".to_string());
            a.push(format!("2001:db8:{i:x}::/64"));
        }
        assert!(parse(a.into_iter()).unwrap().is_some());
    }

    #[test]
    fn fourth_rdnss_rejected() {
        let a = args(&[
            "-i", "eth0", "-p", "2001:db8:1::/64",
            "--rdnss", "2001:4860:4860::8888",
            "--rdnss", "2001:4860:4860::8844",
            "--rdnss", "2001:4860:4860::1111",
            "--rdnss", "2001:4860:4860::2222",
        ]);
        assert!(parse(a).is_err());
    }

    #[test]
    fn nonzero_host_bits_rejected() {
        assert!(parse_prefix("2001:db8::1/64", false).is_err());
    }

    #[test]
    fn wrong_prefix_length_rejected() {
        assert!(parse_prefix("2001:db8::/48", false).is_err());
    }

    #[test]
    fn max_default_lifetime_accepted_overflow_rejected() {
        let a = args(&["-i", "eth0", "-p", "2001:db8::/64", "--default-lifetime", "65535"]);
        assert!(parse(a).unwrap().is_some());

        let a = args(&["-i", "eth0", "-p", "2001:db8::/64", "--default-lifetime", "65536"]);
        assert!(parse(a).is_err());
    }

    #[test]
    fn repeated_interface_flag_rejected() {
        let a = args(&["-i", "eth0", "-i", "eth1", "-p", "2001:db8::/64"]);
        assert!(parse(a).is_err());
    }
}

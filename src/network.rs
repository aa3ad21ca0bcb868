use std::fmt;
use std::iter::FusedIterator;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};

/// An IPv4 network in CIDR notation. The base address must not have host
/// bits set: `10.0.0.7/24` is rejected rather than read as `10.0.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CidrRange {
    network: Ipv4Addr,
    prefix: u8,
}

impl CidrRange {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        let net = Ipv4Net::new(addr, prefix).map_err(|_| {
            SweepError::invalid_range(
                &format!("{}/{}", addr, prefix),
                "prefix length must be between 0 and 32",
            )
        })?;

        if net.network() != addr {
            return Err(SweepError::invalid_range(
                &net.to_string(),
                format!("host bits set, did you mean {}?", net.trunc()),
            ));
        }

        Ok(Self {
            network: addr,
            prefix,
        })
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SweepError::invalid_range(input, "empty input"));
        }

        // A bare address is a /32
        let Some((addr, prefix)) = input.split_once('/') else {
            let addr: Ipv4Addr = input
                .parse()
                .map_err(|_| SweepError::invalid_range(input, "not an IPv4 address"))?;
            return Self::new(addr, 32);
        };

        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| SweepError::invalid_range(input, "not an IPv4 address"))?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SweepError::invalid_range(input, "prefix length is not a number"));
        }
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| SweepError::invalid_range(input, "prefix length is not a number"))?;

        if prefix > 32 {
            return Err(SweepError::invalid_range(
                input,
                "prefix length must be between 0 and 32",
            ));
        }

        Self::new(addr, prefix)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.last())
    }

    fn first(&self) -> u32 {
        u32::from(self.network)
    }

    fn last(&self) -> u32 {
        let size = 1u64 << (32 - u32::from(self.prefix));
        (u64::from(self.first()) + size - 1) as u32
    }

    /// Number of addresses `hosts()` yields.
    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix));
        if self.prefix < 31 {
            size - 2
        } else {
            size
        }
    }

    /// Ascending host addresses. Network and broadcast addresses are skipped
    /// below /31. Each call starts a fresh iterator.
    pub fn hosts(&self) -> HostIter {
        let (start, end) = if self.prefix < 31 {
            (u64::from(self.first()) + 1, u64::from(self.last()) - 1)
        } else {
            (u64::from(self.first()), u64::from(self.last()))
        };

        HostIter {
            next: start,
            end_inclusive: end,
        }
    }

    /// `192.168.1.0/24` -> `192_168_1_0_24`, safe for file names.
    pub fn file_safe(&self) -> String {
        self.to_string().replace(['/', '.'], "_")
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for CidrRange {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lazy host iterator over a [`CidrRange`]. Bounds are kept in `u64` so the
/// `/0` range needs no special casing.
#[derive(Debug, Clone)]
pub struct HostIter {
    next: u64,
    end_inclusive: u64,
}

impl Iterator for HostIter {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        if self.next > self.end_inclusive {
            return None;
        }
        let ip = Ipv4Addr::from(self.next as u32);
        self.next += 1;
        Some(ip)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end_inclusive + 1).saturating_sub(self.next);
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl FusedIterator for HostIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cidr() {
        let range = CidrRange::parse("192.168.1.0/30").unwrap();
        let hosts: Vec<_> = range.hosts().collect();
        assert_eq!(
            hosts,
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
    }

    #[test]
    fn test_parse_single_ip() {
        let range = CidrRange::parse("10.0.0.9").unwrap();
        assert_eq!(range.prefix(), 32);
        assert_eq!(range.hosts().collect::<Vec<_>>(), vec![Ipv4Addr::new(10, 0, 0, 9)]);
    }

    #[test]
    fn test_host_bits_rejected() {
        let err = CidrRange::parse("192.168.1.7/24").unwrap_err();
        assert!(matches!(err, SweepError::InvalidRange { .. }));
        assert!(err.to_string().contains("192.168.1.0/24"));
        assert!(CidrRange::new(Ipv4Addr::new(10, 0, 0, 1), 31).is_err());

        let range = CidrRange::parse(" 10.1.2.0/24 ").unwrap();
        assert_eq!(range.broadcast(), Ipv4Addr::new(10, 1, 2, 255));
        assert_eq!(range.to_string(), "10.1.2.0/24");
    }

    #[test]
    fn test_point_to_point_ranges_keep_all_addresses() {
        let slash31: Vec<_> = CidrRange::parse("10.0.0.0/31").unwrap().hosts().collect();
        assert_eq!(slash31, vec![Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 1)]);

        let slash32: Vec<_> = CidrRange::parse("10.0.0.5/32").unwrap().hosts().collect();
        assert_eq!(slash32, vec![Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test]
    fn test_host_count_matches_prefix_rule() {
        for prefix in 0..=32u8 {
            let range = CidrRange::new(Ipv4Addr::UNSPECIFIED, prefix).unwrap();
            let size = 1u64 << (32 - u32::from(prefix));
            let expected = if prefix < 31 { size - 2 } else { size };
            assert_eq!(range.host_count(), expected, "prefix /{}", prefix);
            assert_eq!(range.hosts().size_hint().1, usize::try_from(expected).ok());
        }
    }

    #[test]
    fn test_enumeration_count_and_order() {
        for prefix in 16..=32u8 {
            let range = CidrRange::new(Ipv4Addr::new(172, 16, 0, 0), prefix).unwrap();
            let hosts: Vec<u32> = range.hosts().map(u32::from).collect();
            assert_eq!(hosts.len() as u64, range.host_count(), "prefix /{}", prefix);
            assert!(hosts.windows(2).all(|w| w[0] < w[1]), "prefix /{}", prefix);
        }
    }

    #[test]
    fn test_full_range_edges() {
        let range = CidrRange::parse("0.0.0.0/0").unwrap();
        let mut hosts = range.hosts();
        assert_eq!(hosts.next(), Some(Ipv4Addr::new(0, 0, 0, 1)));
        assert_eq!(range.broadcast(), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(range.host_count(), (1u64 << 32) - 2);
    }

    #[test]
    fn test_hosts_is_restartable() {
        let range = CidrRange::parse("192.168.7.0/29").unwrap();
        let first: Vec<_> = range.hosts().collect();
        let second: Vec<_> = range.hosts().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn test_invalid_cidr() {
        for input in [
            "192.168.1.0/99",
            "192.168.1.0/33",
            "300.1.1.1/24",
            "abc",
            "",
            "10.0.0.0/",
            "::1/128",
            "10.0.0.0/+24",
            "10.0.0.0/ 24",
            "192.168.1.7/24",
        ] {
            let err = CidrRange::parse(input).unwrap_err();
            assert!(matches!(err, SweepError::InvalidRange { .. }), "{}", input);
        }
    }

    #[test]
    fn test_file_safe() {
        let range = CidrRange::parse("192.168.1.0/24").unwrap();
        assert_eq!(range.file_safe(), "192_168_1_0_24");
    }
}

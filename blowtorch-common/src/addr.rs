use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid MAC address '{0}', expected xx:xx:xx:xx:xx:xx")]
    InvalidMac(String),
    #[error("invalid IPv4 address '{0}', expected a.b.c.d")]
    InvalidIpv4(String),
}

/// A 48-bit hardware address, stored in wire order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// The address as a 48-bit integer, first octet most significant.
    pub fn to_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }
}

impl FromStr for MacAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_mac(s)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Parses `xx:xx:xx:xx:xx:xx`. Each field is exactly two hex digits.
pub fn parse_mac(text: &str) -> Result<MacAddress, AddressError> {
    let invalid = || AddressError::InvalidMac(text.to_string());

    let mut octets = [0u8; 6];
    let mut fields = text.split(':');
    for octet in octets.iter_mut() {
        let field = fields.next().ok_or_else(invalid)?;
        if field.len() != 2 || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        *octet = u8::from_str_radix(field, 16).map_err(|_| invalid())?;
    }
    if fields.next().is_some() {
        return Err(invalid());
    }

    Ok(MacAddress(octets))
}

/// Parses dotted-decimal `a.b.c.d`. Every field must be 1-3 digits and at most 255.
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr, AddressError> {
    let invalid = || AddressError::InvalidIpv4(text.to_string());

    let mut octets = [0u8; 4];
    let mut fields = text.split('.');
    for octet in octets.iter_mut() {
        let field = fields.next().ok_or_else(invalid)?;
        if field.is_empty() || field.len() > 3 || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // u8 parsing rejects anything above 255
        *octet = field.parse().map_err(|_| invalid())?;
    }
    if fields.next().is_some() {
        return Err(invalid());
    }

    Ok(Ipv4Addr::from(octets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mac_to_integer() {
        let mac = parse_mac("0a:38:ca:f6:f3:20").unwrap();
        assert_eq!(mac.to_u64(), 0x0a38caf6f320);
        assert_eq!(mac.octets(), [0x0a, 0x38, 0xca, 0xf6, 0xf3, 0x20]);
        assert_eq!(mac.to_string(), "0a:38:ca:f6:f3:20");
    }

    #[test]
    fn parses_mac_uppercase() {
        let mac: MacAddress = "FF:EE:DD:00:11:22".parse().unwrap();
        assert_eq!(mac.to_u64(), 0xffeedd001122);
    }

    #[test]
    fn rejects_malformed_mac() {
        for bad in [
            "",
            "0a:38:ca:f6:f3",
            "0a:38:ca:f6:f3:20:11",
            "0a:38:ca:f6:f3:2g",
            "0a-38-ca-f6-f3-20",
            "a:38:ca:f6:f3:20",
            "0a:38:ca:f6:f3:200",
            "0a:38:ca:f6:f3:",
            "+a:38:ca:f6:f3:20",
        ] {
            assert_eq!(
                parse_mac(bad),
                Err(AddressError::InvalidMac(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parses_ipv4() {
        assert_eq!(
            parse_ipv4("172.30.0.73").unwrap(),
            Ipv4Addr::new(172, 30, 0, 73)
        );
        assert_eq!(parse_ipv4("0.0.0.0").unwrap(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            parse_ipv4("255.255.255.255").unwrap(),
            Ipv4Addr::BROADCAST
        );
    }

    #[test]
    fn rejects_malformed_ipv4() {
        for bad in ["", "172.30.0", "172.30.0.73.1", "172.30.x.73", "172..0.73", "1.2.3.-4", " 1.2.3.4"] {
            assert!(parse_ipv4(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn ipv4_octets_are_bounded() {
        assert_eq!(
            parse_ipv4("172.30.0.256"),
            Err(AddressError::InvalidIpv4("172.30.0.256".to_string()))
        );
        assert!(parse_ipv4("1.2.3.0255").is_err());
    }

    #[test]
    fn error_carries_format_hint() {
        let err = parse_mac("nope").unwrap_err();
        assert!(err.to_string().contains("xx:xx:xx:xx:xx:xx"));
        let err = parse_ipv4("nope").unwrap_err();
        assert!(err.to_string().contains("a.b.c.d"));
    }
}

//! Ethernet, IPv4 and UDP headers for the fixed packet template.
//!
//! Every multi-byte field is kept as a host integer and encoded big-endian
//! by `to_bytes`.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::addr::MacAddress;

pub const ETH_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const UDP_HDR_LEN: usize = 8;
/// Ethernet + IPv4 + UDP.
pub const HEADERS_LEN: usize = ETH_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const IPPROTO_UDP: u8 = 17;
/// Version 4, header length of five 32-bit words.
pub const IP_VERSION_IHL: u8 = 0x45;
pub const IP_DEFAULT_TTL: u8 = 64;

pub const UDP_PORT: u16 = 6666;
pub const UDP_SRC_PORT: u16 = UDP_PORT;
pub const UDP_DST_PORT: u16 = UDP_PORT;

/// Index of the checksum field when the IPv4 header is viewed as 16-bit words.
const IP_CHECKSUM_WORD: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("frame length {0} cannot hold the {HEADERS_LEN} header bytes")]
    FrameTooShort(usize),
    #[error("payload of {0} bytes overflows the IPv4 total length field")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub ether_type: u16,
}

impl EthernetHeader {
    pub fn ipv4(dst: MacAddress, src: MacAddress) -> Self {
        EthernetHeader {
            dst,
            src,
            ether_type: ETHERTYPE_IPV4,
        }
    }

    pub fn to_bytes(&self) -> [u8; ETH_HDR_LEN] {
        let mut out = [0u8; ETH_HDR_LEN];
        out[0..6].copy_from_slice(&self.dst.octets());
        out[6..12].copy_from_slice(&self.src.octets());
        out[12..14].copy_from_slice(&self.ether_type.to_be_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub packet_id: u16,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    pub fn to_bytes(&self) -> [u8; IPV4_HDR_LEN] {
        let mut out = [0u8; IPV4_HDR_LEN];
        out[0] = self.version_ihl;
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        out[4..6].copy_from_slice(&self.packet_id.to_be_bytes());
        out[6..8].copy_from_slice(&self.fragment_offset.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol;
        out[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        out[12..16].copy_from_slice(&self.src.octets());
        out[16..20].copy_from_slice(&self.dst.octets());
        out
    }

    /// Header checksum over the ten 16-bit words, skipping the checksum
    /// word itself. Any value currently in `checksum` is ignored.
    pub fn compute_checksum(&self) -> u16 {
        let bytes = self.to_bytes();

        let mut sum: u32 = 0;
        for (i, word) in bytes.chunks_exact(2).enumerate() {
            if i == IP_CHECKSUM_WORD {
                continue;
            }
            sum += u16::from_be_bytes([word[0], word[1]]) as u32;
        }

        // Nine words fit comfortably in 32 bits, a single fold is enough.
        sum = (sum >> 16) + (sum & 0xFFFF);
        if sum > 0xFFFF {
            sum -= 0xFFFF;
        }

        match !sum & 0xFFFF {
            0 => 0xFFFF,
            csum => csum as u16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    /// Always zero: synthetic traffic is sent with the UDP checksum disabled.
    pub checksum: u16,
}

impl UdpHeader {
    pub fn to_bytes(&self) -> [u8; UDP_HDR_LEN] {
        let mut out = [0u8; UDP_HDR_LEN];
        out[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        out[4..6].copy_from_slice(&self.length.to_be_bytes());
        out[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        out
    }
}

/// Builds the IPv4 and UDP headers for a datagram carrying `payload_len` bytes.
pub fn build(
    payload_len: usize,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<(Ipv4Header, UdpHeader), HeaderError> {
    let total_length = payload_len
        .checked_add(UDP_HDR_LEN + IPV4_HDR_LEN)
        .and_then(|len| u16::try_from(len).ok())
        .ok_or(HeaderError::PayloadTooLarge(payload_len))?;
    let udp_length = total_length - IPV4_HDR_LEN as u16;

    let udp = UdpHeader {
        src_port: UDP_SRC_PORT,
        dst_port: UDP_DST_PORT,
        length: udp_length,
        checksum: 0,
    };

    let mut ip = Ipv4Header {
        version_ihl: IP_VERSION_IHL,
        tos: 0,
        total_length,
        packet_id: 0,
        fragment_offset: 0,
        ttl: IP_DEFAULT_TTL,
        protocol: IPPROTO_UDP,
        checksum: 0,
        src,
        dst,
    };
    ip.checksum = ip.compute_checksum();

    Ok((ip, udp))
}

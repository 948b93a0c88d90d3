use std::net::Ipv4Addr;

use thiserror::Error;

use crate::addr::MacAddress;
use crate::headers::{
    self, EthernetHeader, HeaderError, Ipv4Header, UdpHeader, ETH_HDR_LEN, HEADERS_LEN,
    IPV4_HDR_LEN,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("transmit buffer holds {capacity} bytes, frame needs {needed}")]
    BufferTooSmall { capacity: usize, needed: usize },
}

/// The headers shared by every frame, built once and stamped into each
/// transmit buffer by [`FrameTemplate::assemble`].
#[derive(Debug, Clone)]
pub struct FrameTemplate {
    eth: EthernetHeader,
    ip: Ipv4Header,
    udp: UdpHeader,
    header_bytes: [u8; HEADERS_LEN],
    frame_len: usize,
}

impl FrameTemplate {
    pub fn new(
        frame_len: usize,
        dst_mac: MacAddress,
        src_mac: MacAddress,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
    ) -> Result<Self, HeaderError> {
        let payload_len = frame_len
            .checked_sub(HEADERS_LEN)
            .ok_or(HeaderError::FrameTooShort(frame_len))?;

        let eth = EthernetHeader::ipv4(dst_mac, src_mac);
        let (ip, udp) = headers::build(payload_len, src_ip, dst_ip)?;

        let mut header_bytes = [0u8; HEADERS_LEN];
        header_bytes[..ETH_HDR_LEN].copy_from_slice(&eth.to_bytes());
        header_bytes[ETH_HDR_LEN..ETH_HDR_LEN + IPV4_HDR_LEN].copy_from_slice(&ip.to_bytes());
        header_bytes[ETH_HDR_LEN + IPV4_HDR_LEN..].copy_from_slice(&udp.to_bytes());

        Ok(FrameTemplate {
            eth,
            ip,
            udp,
            header_bytes,
            frame_len,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn payload_len(&self) -> usize {
        self.frame_len - HEADERS_LEN
    }

    pub fn ethernet(&self) -> &EthernetHeader {
        &self.eth
    }

    pub fn ipv4(&self) -> &Ipv4Header {
        &self.ip
    }

    pub fn udp(&self) -> &UdpHeader {
        &self.udp
    }

    /// Writes the headers at the start of `buf` and returns the frame length.
    ///
    /// Payload bytes are left as they are: pooled buffers start zeroed and
    /// only ever receive these same headers.
    pub fn assemble(&self, buf: &mut [u8]) -> Result<usize, FrameError> {
        if buf.len() < self.frame_len {
            return Err(FrameError::BufferTooSmall {
                capacity: buf.len(),
                needed: self.frame_len,
            });
        }

        buf[..HEADERS_LEN].copy_from_slice(&self.header_bytes);
        Ok(self.frame_len)
    }
}

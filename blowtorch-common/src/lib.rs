//! Wire model for the blowtorch UDP packet generator.
//!
//! Everything here is pure: address parsing, header construction, frame
//! assembly into a caller-owned buffer and throughput arithmetic. The
//! packet I/O lives in `blowtorch-app`.

pub mod addr;
pub mod frame;
pub mod headers;
pub mod stats;

pub use addr::{parse_ipv4, parse_mac, AddressError, MacAddress};
pub use frame::{FrameError, FrameTemplate};
pub use headers::{EthernetHeader, HeaderError, Ipv4Header, UdpHeader};
pub use stats::TxReport;

/// Total length of every transmitted frame, Ethernet header included.
pub const TX_FRAME_LEN: usize = 862;

//! A minimal IPv4 + UDP encapsulation, used only for the URMA/`config = 0x3` datalink payload
//! (spec.md §4.5). Grounded on `net::ip::v4::Header` and `net::udp::Header`, trimmed of
//! fragmentation, options, and IPv6 (both explicit Non-goals) since this simulator's IPv4 header
//! exists only to carry the node/port address scheme of spec.md §6, not to interoperate with a
//! real IP stack.

pub mod checksum;
pub mod v4;

pub use v4::{Header as Ipv4Header, UdpHeader};

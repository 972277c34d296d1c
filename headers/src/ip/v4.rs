//! A minimal, fragmentation-free IPv4 header plus a UDP header, used only to carry the
//! `10.<nodeId/256>.<nodeId%256>.<port+1>` addressing scheme onto the `config = 0x3` datalink
//! payload path. Trimmed from `net::ip::v4::Header`: no IHL options, no fragmentation bits (this
//! simulator never fragments), and no `Interface` actor, since nothing here needs to interoperate
//! with a real IP stack or dispatch by protocol number beyond UDP.

use core::mem::size_of;
use core::net::Ipv4Addr;

use utils::bytes::{self, Cast};
use utils::endian::u16be;

use crate::Checksum;

/// Fixed version/IHL byte for a 20-byte, option-free IPv4 header: version 4, IHL 5 (words).
const VER_IHL: u8 = 0x45;

const PROTO_UDP: u8 = 17;

#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct Header {
	ver_ihl: u8,
	tos: u8,
	total_len: u16be,
	id: u16be,
	flags_frag: u16be,
	ttl: u8,
	proto: u8,
	checksum: [u8; 2],
	pub src: Ipv4Addr,
	pub dst: Ipv4Addr,
}

impl Header {
	pub fn new(src: Ipv4Addr, dst: Ipv4Addr, payload_len: u16, tos: u8) -> Self {
		let mut header = Self {
			ver_ihl: VER_IHL,
			tos,
			total_len: (size_of::<Header>() as u16 + payload_len).into(),
			id: 0.into(),
			flags_frag: (1u16 << 14).into(), // don't-fragment
			ttl: 64,
			proto: PROTO_UDP,
			checksum: [0, 0],
			src,
			dst,
		};

		header.checksum = Checksum::of(bytes::as_slice(&header)).end();
		header
	}

	pub fn len(&self) -> usize {
		self.total_len.get() as usize
	}

	/// The ToS byte, stamped with the originating TP's priority (spec.md §4.5 "Routing-key hash").
	pub fn tos(&self) -> u8 {
		self.tos
	}

	pub fn checksum_valid(&self) -> bool {
		Checksum::of(bytes::as_slice(self)).end() == [0, 0]
	}
}

#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct UdpHeader {
	pub src_port: u16be,
	pub dst_port: u16be,
	pub len: u16be,
	pub checksum: [u8; 2],
}

impl UdpHeader {
	pub fn new(src_port: u16, dst_port: u16, payload_len: u16) -> Self {
		Self {
			src_port: src_port.into(),
			dst_port: dst_port.into(),
			len: (size_of::<Self>() as u16 + payload_len).into(),
			checksum: [0, 0],
		}
	}
}

/// Maps a Unified Bus node id to the simulator's synthetic IPv4 address space (spec.md §6):
/// `10.<nodeId/256>.<nodeId%256>.<port+1>`.
pub fn node_port_to_addr(node_id: u32, port: u8) -> Ipv4Addr {
	Ipv4Addr::new(10, (node_id / 256) as u8, (node_id % 256) as u8, port + 1)
}

/// Inverse of [`node_port_to_addr`]: recovers the `(node_id, port)` pair encoded in an address
/// produced by this simulator.
pub fn addr_to_node_port(addr: Ipv4Addr) -> (u32, u8) {
	let [_, hi, lo, port] = addr.octets();
	(u32::from(hi) * 256 + u32::from(lo), port - 1)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn address_round_trips() {
		let addr = node_port_to_addr(4660, 2);
		assert_eq!(addr_to_node_port(addr), (4660, 2));
	}

	#[test]
	fn header_checksum_validates() {
		let header = Header::new(Ipv4Addr::new(10, 0, 1, 1), Ipv4Addr::new(10, 0, 2, 1), 64, 0);
		assert!(header.checksum_valid());
		assert_eq!(header.len(), size_of::<Header>() + 64);
	}
}

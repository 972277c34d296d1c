//! Memory-access extended headers (spec.md §4.1, §4.10): the LDST-layer header carrying the
//! virtual address, token id, and requested transfer length of a single UB-MEM data packet.
//!
//! Grounded on the same full/compact split `transaction.rs` uses for `TransactionHeader` /
//! `CompactTransactionHeader`: a "full" header that carries enough address width to stand alone,
//! and a "compact" header that drops the high bits of the address once the task segment's packets
//! share a common 64 KiB-aligned base (tracked by the LDST thread, not re-derived here).

use core::mem::size_of;

use bilge::prelude::*;
use utils::bytes::Cast;
use utils::endian::u64be;

#[bitsize(8)]
#[derive(FromBits, Cast, Clone, Copy)]
#[repr(C)]
struct Flags {
	req_length: u5,
	/// Set on the final packet carved out of a task segment (spec.md §4.10): lets the peer emit
	/// exactly one cumulative response per segment instead of one per packet.
	last_packet: bool,
	reserved: u2,
}

#[bitsize(24)]
#[derive(FromBits, Clone, Copy)]
struct Token {
	token_id: u20,
	reserved: u4,
}

/// The 16-byte full memory-access extended header: used until a token's address base has been
/// established on the peer, the way `TransactionHeader` carries the full requester context.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct MaeHeader {
	opcode: u8,
	flags: Flags,
	token: [u8; 3],
	addr: u64be,
	length: u8,
	reserved: u16,
}

impl MaeHeader {
	pub fn new(opcode: u8, req_length: u5, token_id: u20, addr: u64, length: u8, last_packet: bool) -> Self {
		let token = Token::new(token_id, u4::new(0));

		Self {
			opcode,
			flags: Flags::new(req_length, last_packet, u2::new(0)),
			token: u32::from(token).to_be_bytes()[1..].try_into().unwrap(),
			addr: addr.into(),
			length,
			reserved: 0,
		}
	}

	pub fn opcode(&self) -> u8 {
		self.opcode
	}

	pub fn req_length(&self) -> u5 {
		self.flags.req_length()
	}

	pub fn last_packet(&self) -> bool {
		self.flags.last_packet()
	}

	pub fn token_id(&self) -> u20 {
		let raw = u32::from_be_bytes([0, self.token[0], self.token[1], self.token[2]]);
		Token::from(raw).token_id()
	}

	pub fn addr(&self) -> u64 {
		self.addr.get()
	}

	pub fn length(&self) -> u8 {
		self.length
	}
}

/// The 12-byte compact memory-access extended header, carrying only the low 48 bits of the
/// virtual address. Every packet after the first in a task segment uses this form (spec.md §9's
/// resolved Open Question (b): only the compact form is ever peeked on receive).
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct CompactMaeHeader {
	opcode: u8,
	flags: Flags,
	token: [u8; 3],
	addr_lo: [u8; 6],
	length: u8,
}

impl CompactMaeHeader {
	pub fn new(opcode: u8, req_length: u5, token_id: u20, addr: u64, length: u8, last_packet: bool) -> Self {
		let token = Token::new(token_id, u4::new(0));
		let bytes = addr.to_be_bytes();

		Self {
			opcode,
			flags: Flags::new(req_length, last_packet, u2::new(0)),
			token: u32::from(token).to_be_bytes()[1..].try_into().unwrap(),
			addr_lo: bytes[2..].try_into().unwrap(),
			length,
		}
	}

	pub fn opcode(&self) -> u8 {
		self.opcode
	}

	pub fn req_length(&self) -> u5 {
		self.flags.req_length()
	}

	pub fn last_packet(&self) -> bool {
		self.flags.last_packet()
	}

	pub fn token_id(&self) -> u20 {
		let raw = u32::from_be_bytes([0, self.token[0], self.token[1], self.token[2]]);
		Token::from(raw).token_id()
	}

	/// Recovers the low 48 bits of the virtual address; the caller supplies the high 16 bits
	/// from the task segment's tracked base, since the wire form never carries them.
	pub fn addr_lo(&self) -> u64 {
		let mut bytes = [0u8; 8];
		bytes[2..].copy_from_slice(&self.addr_lo);
		u64::from_be_bytes(bytes)
	}

	pub fn length(&self) -> u8 {
		self.length
	}
}

/// Packet size in bytes for a task segment's `reqLength` exponent (spec.md §3): `64 * 2^length`.
pub fn packet_size(req_length: u5) -> u32 {
	64u32 << u8::from(req_length)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn full_header_round_trips() {
		let header = MaeHeader::new(0x10, u5::new(5), u20::new(0x12345), 0xdead_beef_0000_1234, 3, true);

		assert_eq!(header.opcode(), 0x10);
		assert_eq!(header.req_length(), u5::new(5));
		assert_eq!(header.token_id(), u20::new(0x12345));
		assert_eq!(header.addr(), 0xdead_beef_0000_1234);
		assert_eq!(header.length(), 3);
		assert!(header.last_packet());
		assert_eq!(size_of::<MaeHeader>(), 16);
	}

	#[test]
	fn compact_header_truncates_address() {
		let header = CompactMaeHeader::new(0x11, u5::new(2), u20::new(7), 0xdead_beef_0000_1234, 1, false);

		assert_eq!(header.token_id(), u20::new(7));
		assert_eq!(header.addr_lo(), 0xbeef_0000_1234);
		assert!(!header.last_packet());
		assert_eq!(size_of::<CompactMaeHeader>(), 12);
	}

	#[test]
	fn packet_size_follows_exponent() {
		assert_eq!(packet_size(u5::new(0)), 64);
		assert_eq!(packet_size(u5::new(4)), 1024);
	}
}

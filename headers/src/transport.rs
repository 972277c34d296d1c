//! The 16-byte transport header (spec.md §4.1, §4.3): carries the transport-pair (TP) identifiers,
//! the 24-bit packet sequence number (PSN) the sliding window and selective-receive bitmap track,
//! and the cumulative message sequence number (MSN) used for CBFC-style cumulative ACKs.
//!
//! Grounded on `ub-header.h`'s `UbTransportHeader`, split here into three 32/64-bit blocks the way
//! `net::tcp`'s header splits flags from sequence numbers, since bilge bitfields can't straddle a
//! word boundary on their own.

use core::mem::size_of;

use bilge::prelude::*;
use utils::bytes::Cast;

#[bitsize(64)]
#[derive(FromBits, Clone, Copy)]
struct Block1 {
	last_packet: bool,
	opcode: u7,
	version: u2,
	reserved: u2,
	nlp: u4,
	src_tpn: u24,
	dst_tpn: u24,
}

#[bitsize(32)]
#[derive(FromBits, Clone, Copy)]
struct Block2 {
	ack_request: bool,
	error: bool,
	reserved: u6,
	psn: u24,
}

#[bitsize(32)]
#[derive(FromBits, Clone, Copy)]
struct Block3 {
	rsp_status: u3,
	rsp_info: u5,
	tp_msn: u24,
}

#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct TransportHeader {
	block1: Block1,
	block2: Block2,
	block3: Block3,
}

impl TransportHeader {
	pub fn new(last_packet: bool, opcode: u7, src_tpn: u24, dst_tpn: u24, ack_request: bool, psn: u24, tp_msn: u24) -> Self {
		Self {
			block1: Block1::new(last_packet, opcode, u2::new(0), u4::new(0), src_tpn, dst_tpn),
			block2: Block2::new(ack_request, false, psn),
			block3: Block3::new(u3::new(0), u5::new(0), tp_msn),
		}
	}

	pub fn last_packet(&self) -> bool {
		self.block1.last_packet()
	}

	pub fn opcode(&self) -> u7 {
		self.block1.opcode()
	}

	pub fn src_tpn(&self) -> u24 {
		self.block1.src_tpn()
	}

	pub fn dst_tpn(&self) -> u24 {
		self.block1.dst_tpn()
	}

	pub fn ack_request(&self) -> bool {
		self.block2.ack_request()
	}

	pub fn set_ack_request(&mut self, value: bool) {
		self.block2.set_ack_request(value);
	}

	pub fn error(&self) -> bool {
		self.block2.error()
	}

	pub fn set_error(&mut self, value: bool) {
		self.block2.set_error(value);
	}

	pub fn psn(&self) -> u24 {
		self.block2.psn()
	}

	pub fn set_psn(&mut self, psn: u24) {
		self.block2.set_psn(psn);
	}

	pub fn tp_msn(&self) -> u24 {
		self.block3.tp_msn()
	}

	pub fn set_tp_msn(&mut self, msn: u24) {
		self.block3.set_tp_msn(msn);
	}

	pub fn rsp_status(&self) -> u3 {
		self.block3.rsp_status()
	}

	pub fn set_rsp_status(&mut self, status: u3) {
		self.block3.set_rsp_status(status);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_fields_round_trip() {
		let mut header =
			TransportHeader::new(true, u7::new(5), u24::new(11), u24::new(22), false, u24::new(100), u24::new(7));

		assert!(header.last_packet());
		assert_eq!(header.opcode(), u7::new(5));
		assert_eq!(header.src_tpn(), u24::new(11));
		assert_eq!(header.dst_tpn(), u24::new(22));
		assert_eq!(header.psn(), u24::new(100));
		assert_eq!(header.tp_msn(), u24::new(7));

		header.set_ack_request(true);
		header.set_psn(u24::new(101));

		assert!(header.ack_request());
		assert_eq!(header.psn(), u24::new(101));
		assert_eq!(size_of::<TransportHeader>(), 16);
	}
}

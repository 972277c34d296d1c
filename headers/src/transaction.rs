//! Transaction headers (spec.md §4.1, §4.8): URMA's request/ack framing riding inside a transport
//! packet's payload. Grounded on `ub-header.h`'s `UbTransactionHeader`/`UbAckTransactionHeader`
//! family: full headers carry the originating requester-context id for out-of-band resource
//! lookups, compact headers drop it once a transport-pair association is established.

use core::mem::size_of;

use bilge::prelude::*;
use utils::bytes::Cast;
use utils::endian::u16be;

/// Requested completion ordering for a transaction (spec.md §4.8, §7's ROI/ROL note).
#[bitsize(3)]
#[derive(FromBits, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderType {
	None = 0,
	Relaxed = 1,
	Strong = 2,
	#[fallback]
	Reserved,
}

#[bitsize(8)]
#[derive(FromBits, Cast, Clone, Copy)]
#[repr(C)]
struct Flags1 {
	ta_ver: u2,
	ee: u2,
	tv_en: bool,
	poison: bool,
	reserved: bool,
	ud_flag: bool,
}

#[bitsize(8)]
#[derive(FromBits, Cast, Clone, Copy)]
#[repr(C)]
struct Flags4 {
	no_ta_ack: bool,
	order: OrderType,
	mt_en: bool,
	fce: bool,
	retry: bool,
	alloc: bool,
}

#[bitsize(24)]
#[derive(FromBits, Clone, Copy)]
struct IniRc {
	reserved: bool,
	exclusive: bool,
	rc_type: u2,
	rc_id: u20,
}

/// The 8-byte full transaction header, used on a TP's first request until the peer has learned
/// the requester's resource-context id.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct TransactionHeader {
	ta_opcode: u8,
	flags1: Flags1,
	ini_ta_ssn: u16be,
	flags4: Flags4,
	ini_rc: [u8; 3],
}

impl TransactionHeader {
	pub fn new(ta_opcode: u8, order: OrderType, ini_ta_ssn: u16, rc_id: u20) -> Self {
		let ini_rc = IniRc::new(false, false, u2::new(0), rc_id);

		Self {
			ta_opcode,
			flags1: Flags1::new(u2::new(0), u2::new(0), false, false, false, false),
			ini_ta_ssn: ini_ta_ssn.into(),
			flags4: Flags4::new(false, order, false, false, false, false),
			ini_rc: u32::from(ini_rc).to_be_bytes()[1..].try_into().unwrap(),
		}
	}

	pub fn ta_opcode(&self) -> u8 {
		self.ta_opcode
	}

	pub fn order(&self) -> OrderType {
		self.flags4.order()
	}

	pub fn ini_ta_ssn(&self) -> u16 {
		self.ini_ta_ssn.get()
	}

	pub fn ini_rc_id(&self) -> u20 {
		let raw = u32::from_be_bytes([0, self.ini_rc[0], self.ini_rc[1], self.ini_rc[2]]);
		IniRc::from(raw).rc_id()
	}
}

/// The 4-byte compact transaction header: used on every packet after a TP has resolved the
/// requester context out of band.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct CompactTransactionHeader {
	ta_opcode: u8,
	flags1: Flags1,
	ini_ta_ssn: u16be,
}

impl CompactTransactionHeader {
	pub fn new(ta_opcode: u8, ini_ta_ssn: u16) -> Self {
		Self { ta_opcode, flags1: Flags1::new(u2::new(0), u2::new(0), false, false, false, false), ini_ta_ssn: ini_ta_ssn.into() }
	}

	pub fn ta_opcode(&self) -> u8 {
		self.ta_opcode
	}

	pub fn ini_ta_ssn(&self) -> u16 {
		self.ini_ta_ssn.get()
	}
}

#[bitsize(8)]
#[derive(FromBits, Cast, Clone, Copy)]
#[repr(C)]
struct AckFlags1 {
	ta_ver: u2,
	ee: u2,
	reserved: u4,
}

/// The 8-byte full ack transaction header.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct AckTransactionHeader {
	ta_opcode: u8,
	flags1: AckFlags1,
	rsp_ta_ssn: u16be,
	ini_rc: [u8; 4],
}

impl AckTransactionHeader {
	pub fn new(ta_opcode: u8, rsp_ta_ssn: u16, rc_id: u20) -> Self {
		let ini_rc = IniRc::new(false, false, u2::new(0), rc_id);

		Self {
			ta_opcode,
			flags1: AckFlags1::new(u2::new(0), u2::new(0), u4::new(0)),
			rsp_ta_ssn: rsp_ta_ssn.into(),
			ini_rc: u32::from(ini_rc).to_be_bytes(),
		}
	}

	pub fn ta_opcode(&self) -> u8 {
		self.ta_opcode
	}

	pub fn rsp_ta_ssn(&self) -> u16 {
		self.rsp_ta_ssn.get()
	}
}

/// The 4-byte compact ack transaction header.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct CompactAckTransactionHeader {
	ta_opcode: u8,
	flags1: AckFlags1,
	rsp_ta_ssn: u16be,
}

impl CompactAckTransactionHeader {
	pub fn new(ta_opcode: u8, rsp_ta_ssn: u16) -> Self {
		Self { ta_opcode, flags1: AckFlags1::new(u2::new(0), u2::new(0), u4::new(0)), rsp_ta_ssn: rsp_ta_ssn.into() }
	}

	pub fn ta_opcode(&self) -> u8 {
		self.ta_opcode
	}

	pub fn rsp_ta_ssn(&self) -> u16 {
		self.rsp_ta_ssn.get()
	}
}

/// A 1-byte placeholder transaction used only to keep a transport-pair's keepalive/credit traffic
/// flowing when there is no real transaction data to carry.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct DummyTransactionHeader {
	ta_opcode: u8,
}

impl DummyTransactionHeader {
	pub const OPCODE: u8 = 0x7f;

	pub fn new() -> Self {
		Self { ta_opcode: Self::OPCODE }
	}
}

impl Default for DummyTransactionHeader {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn full_header_recovers_requester_context() {
		let header = TransactionHeader::new(0x01, OrderType::Strong, 55, u20::new(0xabcde));

		assert_eq!(header.ta_opcode(), 0x01);
		assert_eq!(header.order(), OrderType::Strong);
		assert_eq!(header.ini_ta_ssn(), 55);
		assert_eq!(header.ini_rc_id(), u20::new(0xabcde));
	}

	#[test]
	fn compact_header_is_four_bytes() {
		assert_eq!(size_of::<CompactTransactionHeader>(), 4);
		assert_eq!(size_of::<TransactionHeader>(), 8);
		assert_eq!(size_of::<AckTransactionHeader>(), 8);
		assert_eq!(size_of::<CompactAckTransactionHeader>(), 4);
		assert_eq!(size_of::<DummyTransactionHeader>(), 1);
	}
}

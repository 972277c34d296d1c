//! UB and CNA-16 network headers, plus the congestion-extension tail carried on ACK packets
//! (spec.md §4.1, §4.6, §4.7). Grounded on `ub-header.h`'s `UbNetworkHeader`/`UbCna16NetworkHeader`
//! unions: the 13-bit `cc` field is mode-dependent and is interpreted with per-mode accessors
//! rather than split into separate bilge fields, since bilge structs cannot be unions.

use bilge::prelude::*;
use utils::bytes::Cast;
use utils::endian::u32be;

/// Which congestion-control scheme's state is carried in a network header's `cc` field.
#[bitsize(3)]
#[derive(FromBits, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CcMode {
	Caqm = 0,
	FecnRtt = 2,
	Fecn = 4,
	#[fallback]
	Unknown,
}

/// The 6-byte Unified Bus network header (spec.md §4.1).
#[bitsize(48)]
#[derive(FromBits, Cast, Clone, Copy)]
#[repr(C)]
pub struct NetworkHeader {
	pub mode: CcMode,
	cc: u13,
	reserved: u7,
	pub npi: u25,
}

impl NetworkHeader {
	pub fn caqm(&self) -> Option<CaqmField> {
		(self.mode() == CcMode::Caqm).then(|| CaqmField::from(self.cc()))
	}

	pub fn set_caqm(&mut self, field: CaqmField) {
		self.set_mode(CcMode::Caqm);
		self.set_cc(u13::from(field));
	}

	pub fn fecn_rtt(&self) -> Option<FecnRttField> {
		(self.mode() == CcMode::FecnRtt).then(|| FecnRttField::from(self.cc()))
	}

	pub fn set_fecn_rtt(&mut self, field: FecnRttField) {
		self.set_mode(CcMode::FecnRtt);
		self.set_cc(u13::from(field));
	}

	pub fn fecn(&self) -> Option<FecnField> {
		(self.mode() == CcMode::Fecn).then(|| FecnField::from(self.cc()))
	}

	pub fn set_fecn(&mut self, field: FecnField) {
		self.set_mode(CcMode::Fecn);
		self.set_cc(u13::from(field));
	}
}

/// CAQM's 13-bit network-header payload (spec.md §4.6): a congestion-sample hint plus the flags
/// switches and receivers use to drive the window algorithm.
#[bitsize(13)]
#[derive(FromBits, Clone, Copy)]
pub struct CaqmField {
	pub location: bool,
	reserved: bool,
	pub enable: bool,
	pub c: bool,
	pub i: bool,
	pub hint: u8,
}

/// The FECN-RTT network-header payload: a 10-bit timestamp sample plus a 2-bit FECN marking.
#[bitsize(13)]
#[derive(FromBits, Clone, Copy)]
pub struct FecnRttField {
	pub location: bool,
	pub timestamp: u10,
	pub fecn: u2,
}

/// The plain FECN network-header payload.
#[bitsize(13)]
#[derive(FromBits, Clone, Copy)]
pub struct FecnField {
	pub location: bool,
	reserved: u10,
	pub fecn: u2,
}

/// The 8-byte CNA-16/LDST network header (spec.md §4.1): addressed by 16-bit compact node
/// addresses rather than the full UB address scheme.
#[bitsize(64)]
#[derive(FromBits, Cast, Clone, Copy)]
#[repr(C)]
pub struct Cna16NetworkHeader {
	pub scna: u16,
	pub dcna: u16,
	pub mode: CcMode,
	cc: u13,
	pub lb: u8,
	pub sl: u4,
	pub management: bool,
	pub nlp: u3,
}

/// 12-bit compact node id, 4-bit port (`port + 1`, matching spec.md §6's address scheme).
pub fn cna16(node_id: u16, port: u8) -> u16 {
	debug_assert!(node_id < 1 << 12);
	(node_id << 4) | u16::from(port + 1)
}

pub fn from_cna16(cna: u16) -> (u16, u8) {
	let port_field = (cna & 0xf) as u8;
	(cna >> 4, port_field.saturating_sub(1))
}

/// The congestion-extension tail (CETPH) riding on ACK packets to carry CAQM feedback back to the
/// sender (spec.md §4.6, §4.7). Not one of the datalink-tabled header kinds; addressed directly by
/// the transport channel's ACK-receive path.
#[bitsize(32)]
#[derive(FromBits, Clone, Copy)]
pub struct CetphTail {
	reserved: u6,
	pub location: bool,
	pub i: bool,
	pub c: u8,
	pub hint: u16,
}

#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct Cetph {
	pub ack_sequence: u32be,
	tail: u32,
}

impl Cetph {
	pub fn new(ack_sequence: u32, tail: CetphTail) -> Self {
		Self { ack_sequence: ack_sequence.into(), tail: u32::from(tail) }
	}

	pub fn tail(&self) -> CetphTail {
		CetphTail::from(self.tail)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn caqm_mode_round_trips() {
		let mut header = NetworkHeader::new(CcMode::Caqm, u13::new(0), u25::new(12345));
		header.set_caqm(CaqmField::new(true, true, false, true, 200));

		let field = header.caqm().expect("caqm mode");
		assert!(field.location());
		assert!(field.enable());
		assert!(!field.c());
		assert!(field.i());
		assert_eq!(field.hint(), 200);
		assert!(header.fecn().is_none());
	}

	#[test]
	fn cna16_address_round_trips() {
		let cna = cna16(0x0ab, 3);
		assert_eq!(from_cna16(cna), (0x0ab, 3));
	}

	#[test]
	fn cetph_round_trips() {
		let cetph = Cetph::new(9000, CetphTail::new(false, true, 42, 1000));
		assert_eq!(cetph.ack_sequence.get(), 9000);
		assert_eq!(cetph.tail().c(), 42);
		assert_eq!(cetph.tail().hint(), 1000);
	}
}

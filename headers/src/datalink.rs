//! Datalink-layer headers (spec.md §4.1): the per-packet header that rides in front of every
//! network-layer payload, and the control/credit header used by CBFC to advertise per-VL credit.

use bilge::prelude::*;
use utils::bytes::Cast;
use utils::endian::u16be;

/// The 4-byte header stamped on every datalink packet.
///
/// `config` selects how the rest of the packet is to be interpreted downstream (§4.5): `0x0` UB
/// network header, `0x1` CNA-16/LDST network header, `0x3` IPv4 payload, with the remaining
/// values reserved for future datalink-config extensions.
#[bitsize(32)]
#[derive(FromBits, Cast, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct DatalinkPacketHeader {
	pub config: u4,
	/// `false` selects the non-shortest (load-spreading) port set, `true` the shortest-path set.
	pub routing_policy: bool,
	/// `false` hashes per-flow, `true` spreads per-packet.
	pub load_balance: bool,
	pub packet_vl: u4,
	pub credit_target_vl: u4,
	pub ack: bool,
	pub credit: bool,
	reserved: u16,
}

/// Config value for a control/credit frame (spec.md §4.1, §4.5).
pub const CONFIG_CONTROL: u4 = u4::new(0x0);
/// Config value for an IPv4-encapsulated URMA payload.
pub const CONFIG_IPV4: u4 = u4::new(0x3);
/// Config value for a CNA-16/UB-MEM LDST network header payload.
pub const CONFIG_CNA16: u4 = u4::new(0x9);

/// The 40-byte per-VL credit advertisement carried by CBFC control packets (spec.md §4.1, §4.4).
///
/// Packs 16 six-bit credit counts into twelve bytes as four 24-bit big-endian groups of four
/// values each, matching the wire layout the original credit header uses; the rest of the header
/// is reserved padding out to 40 bytes.
#[derive(Cast, Clone, Copy)]
#[repr(C)]
pub struct DatalinkControlCreditHeader {
	config: u8,
	ack_number: u16be,
	credits: [u8; 12],
	reserved: [u8; 25],
}

const VL_COUNT: usize = 16;

impl DatalinkControlCreditHeader {
	pub fn new(ack_number: u16) -> Self {
		Self { config: 0, ack_number: ack_number.into(), credits: [0; 12], reserved: [0; 25] }
	}

	pub fn ack_number(&self) -> u16 {
		self.ack_number.get()
	}

	/// Returns the advertised credit count for virtual lane `vl`, a 6-bit value (0..=63).
	pub fn credit(&self, vl: usize) -> u8 {
		debug_assert!(vl < VL_COUNT);

		let group = &self.credits[(vl / 4) * 3..(vl / 4) * 3 + 3];
		let word = u32::from_be_bytes([0, group[0], group[1], group[2]]);

		let shift = 6 * (3 - vl % 4);
		((word >> shift) & 0x3f) as u8
	}

	/// Sets the advertised credit count for virtual lane `vl`. `value` is truncated to 6 bits.
	pub fn set_credit(&mut self, vl: usize, value: u8) {
		debug_assert!(vl < VL_COUNT);

		let group = &mut self.credits[(vl / 4) * 3..(vl / 4) * 3 + 3];
		let mut word = u32::from_be_bytes([0, group[0], group[1], group[2]]);

		let shift = 6 * (3 - vl % 4);
		word &= !(0x3f << shift);
		word |= ((value & 0x3f) as u32) << shift;

		let bytes = word.to_be_bytes();
		group.copy_from_slice(&bytes[1..]);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn packet_header_round_trips() {
		let raw: u32 =
			DatalinkPacketHeader::new(CONFIG_CONTROL, true, false, u4::new(3), u4::new(0), true, false).into();
		let header = DatalinkPacketHeader::from(raw);

		assert_eq!(header.config(), CONFIG_CONTROL);
		assert!(header.routing_policy());
		assert!(!header.load_balance());
		assert_eq!(header.packet_vl(), u4::new(3));
		assert!(header.ack());
		assert!(!header.credit());
	}

	#[test]
	fn credit_packing_is_independent_per_lane() {
		let mut header = DatalinkControlCreditHeader::new(7);

		for vl in 0..VL_COUNT {
			header.set_credit(vl, (vl as u8 * 3) % 64);
		}

		for vl in 0..VL_COUNT {
			assert_eq!(header.credit(vl), (vl as u8 * 3) % 64, "vl {vl}");
		}

		assert_eq!(header.ack_number(), 7);
	}
}

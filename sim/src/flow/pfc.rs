//! Priority Flow Control (spec.md §4.9): a watermark-based alternative to CBFC.

use headers::datalink::DatalinkControlCreditHeader;

use super::ControlFrame;
use crate::flow::cbfc::VL_COUNT;

/// The "full permission" sentinel advertised in a credit frame's 6-bit field.
pub const UB_CREDIT_MAX: u8 = 63;

pub struct PfcConfig {
	pub hi: u32,
	pub lo: u32,
}

pub struct Pfc {
	hi: u32,
	lo: u32,
	ingress_bytes: [u32; VL_COUNT],
	/// Whether we currently permit the peer to send us data on each VL (our own advertisement).
	local_permission: [bool; VL_COUNT],
	/// What the peer last told us about their ingress availability.
	peer_permission: [bool; VL_COUNT],
	last_emitted: [bool; VL_COUNT],
	ack_number: u16,
}

impl Pfc {
	pub fn new(config: PfcConfig) -> Self {
		Self {
			hi: config.hi,
			lo: config.lo,
			ingress_bytes: [0; VL_COUNT],
			local_permission: [true; VL_COUNT],
			peer_permission: [true; VL_COUNT],
			last_emitted: [true; VL_COUNT],
			ack_number: 0,
		}
	}

	pub fn can_send(&self, vl: u8) -> bool {
		self.peer_permission[vl as usize]
	}

	fn maybe_emit(&mut self) -> Option<ControlFrame> {
		if self.local_permission == self.last_emitted {
			return None;
		}

		self.last_emitted = self.local_permission;
		self.ack_number = self.ack_number.wrapping_add(1);

		let mut header = DatalinkControlCreditHeader::new(self.ack_number);

		for v in 0..VL_COUNT {
			header.set_credit(v, if self.local_permission[v] { UB_CREDIT_MAX } else { 0 });
		}

		Some(ControlFrame { header })
	}

	/// Called on reception of a data packet into this port's ingress on `vl`.
	pub fn on_receive(&mut self, vl: u8, size: u32) -> Option<ControlFrame> {
		let v = vl as usize;
		self.ingress_bytes[v] += size;

		if self.ingress_bytes[v] >= self.hi {
			self.local_permission[v] = false;
		}

		self.maybe_emit()
	}

	/// Called when a previously-ingressed packet on `vl` has been drained (handed to the TP/LDST
	/// consumer or forwarded out), freeing ingress buffer usage.
	pub fn release(&mut self, vl: u8, size: u32) -> Option<ControlFrame> {
		let v = vl as usize;
		self.ingress_bytes[v] = self.ingress_bytes[v].saturating_sub(size);

		if self.ingress_bytes[v] <= self.lo {
			self.local_permission[v] = true;
		}

		self.maybe_emit()
	}

	pub fn on_permission_frame(&mut self, header: &DatalinkControlCreditHeader) {
		for v in 0..VL_COUNT {
			self.peer_permission[v] = header.credit(v) != 0;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn crossing_hi_clears_permission_and_emits() {
		let mut pfc = Pfc::new(PfcConfig { hi: 100, lo: 20 });
		assert!(pfc.on_receive(3, 50).is_none());

		let frame = pfc.on_receive(3, 60).expect("crossed hi, permission changed");
		assert_eq!(frame.header.credit(3), 0);
		assert_eq!(frame.header.credit(0), UB_CREDIT_MAX);
	}

	#[test]
	fn dropping_below_lo_restores_permission() {
		let mut pfc = Pfc::new(PfcConfig { hi: 100, lo: 20 });
		pfc.on_receive(3, 150);

		assert!(pfc.release(3, 100).is_none(), "still above lo");
		let frame = pfc.release(3, 40).expect("dropped below lo");
		assert_eq!(frame.header.credit(3), UB_CREDIT_MAX);
	}

	#[test]
	fn peer_permission_gates_can_send() {
		let mut pfc = Pfc::new(PfcConfig { hi: 100, lo: 20 });
		assert!(pfc.can_send(3));

		let mut header = DatalinkControlCreditHeader::new(0);
		header.set_credit(3, 0);
		pfc.on_permission_frame(&header);

		assert!(!pfc.can_send(3));
	}
}

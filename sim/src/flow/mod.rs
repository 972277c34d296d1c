//! Flow control (spec.md §4.8 CBFC, §4.9 PFC).
//!
//! Grounded on §9's polymorphism note: "the *flow-control* capability (CBFC vs. PFC vs. no-op —
//! operations `isFcLimited`, `handleSent/ReceivedPacket`, `handleReceivedControlPacket`,
//! `handleReleaseOccupiedFlowControl`)". Modeled as a small capability enum rather than a trait
//! object, matching the "tagged variants... preferred over deep hierarchies" guidance.

pub mod cbfc;
pub mod pfc;

use headers::datalink::DatalinkControlCreditHeader;

use self::cbfc::Cbfc;
use self::pfc::Pfc;

/// A control/credit frame a flow-control engine wants the port to emit.
pub struct ControlFrame {
	pub header: DatalinkControlCreditHeader,
}

pub enum FlowControl {
	Cbfc(Cbfc),
	Pfc(Pfc),
	None,
}

impl FlowControl {
	/// Whether a packet of `size` bytes on `vl` is currently blocked from being sent.
	pub fn is_fc_limited(&self, vl: u8, size: u32) -> bool {
		match self {
			FlowControl::Cbfc(c) => !c.can_send(vl, size),
			FlowControl::Pfc(p) => !p.can_send(vl),
			FlowControl::None => false,
		}
	}

	/// Called by the port immediately before a data packet is serialized.
	pub fn handle_sent_packet(&mut self, vl: u8, size: u32) {
		if let FlowControl::Cbfc(c) = self {
			c.debit(vl, size);
		}
	}

	/// Called by the peer port on reception of a data packet. May return a control frame to
	/// emit back to the sender.
	pub fn handle_received_packet(&mut self, vl: u8, size: u32) -> Option<ControlFrame> {
		match self {
			FlowControl::Cbfc(c) => c.on_receive(vl, size),
			FlowControl::Pfc(p) => p.on_receive(vl, size),
			FlowControl::None => None,
		}
	}

	/// Called on reception of a control/credit frame (datalink config `0x0`).
	pub fn handle_received_control_packet(&mut self, header: &DatalinkControlCreditHeader) {
		match self {
			FlowControl::Cbfc(c) => c.on_credit_frame(header),
			FlowControl::Pfc(p) => p.on_permission_frame(header),
			FlowControl::None => {}
		}
	}

	/// Called when a previously sent packet's transmission completes, releasing any flow-control
	/// state that was held pending that completion (e.g. PFC's ingress-byte usage). May return a
	/// control frame the peer needs to learn the lane reopened.
	pub fn handle_release_occupied_flow_control(&mut self, vl: u8, size: u32) -> Option<ControlFrame> {
		match self {
			FlowControl::Pfc(p) => p.release(vl, size),
			FlowControl::Cbfc(_) | FlowControl::None => None,
		}
	}
}

//! Port transmit/receive finite-state machine (spec.md §4.4) and the per-node packet demux that
//! decides, from the datalink header's `config` field, which layer a freshly arrived packet is
//! handed to (spec.md §4.5 "Packet classification").
//!
//! Grounded on `wireguard::tunnel::Peer`'s send-then-schedule-completion shape: a port's egress
//! queue is drained one packet at a time, each serialized for `size * 8 / rate + interframeGap`
//! before `TransmitComplete` fires and the link's propagation delay is applied on the wire,
//! mirroring `Peer::handle_data`'s arm-then-wait idiom with `cx.after`.

use std::time::Duration;

use headers::datalink::{DatalinkControlCreditHeader, CONFIG_CNA16, CONFIG_CONTROL};
use headers::transport::TransportHeader;
use log::warn;
use stakker::CX;
use utils::bytes;

use crate::fault::FaultOutcome;
use crate::flow::ControlFrame;
use crate::node::{NodeHandle, NodeKind, PortState};
use crate::packet::{FlowTag, Packet};
use crate::transport::{OPCODE_ACK, OPCODE_RELIABLE_TA};
use crate::Simulation;

const DL_LEN: usize = 4;
const IPV4_LEN: usize = 20;
const UDP_LEN: usize = 8;
const NETWORK_LEN: usize = 6;
/// Byte offset of the transport header within a `CONFIG_IPV4` packet, for the fault injector's
/// corrupt-in-flight hook (spec.md §4.4 step 1: "sets the transport header's error bit").
const TP_HEADER_OFFSET: usize = DL_LEN + IPV4_LEN + UDP_LEN + NETWORK_LEN;
const CONTROL_HEADER_LEN: usize = 40;

fn mark_corrupt(packet: &mut Packet) {
	if packet.len() < TP_HEADER_OFFSET + core::mem::size_of::<TransportHeader>() {
		return;
	}

	let tph: &mut TransportHeader = bytes::cast_mut(&mut packet.bytes_mut()[TP_HEADER_OFFSET..TP_HEADER_OFFSET + 16]);
	tph.set_error(true);
}

impl Simulation {
	/// `TriggerTransmit(outPort)` (spec.md §4.4): begins serializing the head-of-line egress
	/// packet if the port is currently idle; a no-op otherwise, since the port's own
	/// `transmit_complete` re-triggers itself once it frees up.
	pub fn trigger_transmit(&mut self, cx: CX![], node: NodeHandle, out_port: u16) {
		self.sync_clock(cx);

		let node_id = self.nodes[node].id;
		let fault_enabled = !self.fault.is_empty();

		{
			let port = &self.nodes[node].ports[out_port as usize];

			if port.state != PortState::Ready || port.egress.is_empty() {
				return;
			}
		}

		let (task_id, size, vl, base_rate, interframe_gap) = {
			let port = &self.nodes[node].ports[out_port as usize];
			let packet = port.egress.front().expect("checked non-empty above");
			(packet.flow.task_id, packet.len() as u32, packet.vl(), port.rate, port.interframe_gap)
		};

		let rate = self.fault.effective_rate(node_id, out_port, base_rate);
		let outcome =
			if fault_enabled { self.fault.check(task_id, node_id, out_port, &mut self.rng) } else { FaultOutcome::Pass };

		let mut packet = self.nodes[node].ports[out_port as usize].egress.pop_front().expect("checked non-empty above");
		self.nodes[node].ports[out_port as usize].state = PortState::Busy;
		self.nodes[node].queue_manager.pop_egress(out_port as usize, vl as usize, size);

		let serialize = Duration::from_secs_f64(size as f64 * 8.0 / rate.max(1) as f64) + interframe_gap;

		let (hold, dropped) = match outcome {
			FaultOutcome::Pass => (serialize, false),
			FaultOutcome::Delay(extra) => (serialize + extra, false),
			FaultOutcome::Corrupt => {
				mark_corrupt(&mut packet);
				(serialize, false)
			}
			FaultOutcome::Drop => (Duration::ZERO, true),
		};

		self.nodes[node].ports[out_port as usize].flow_control.handle_sent_packet(vl, size);

		let actor = cx.access_actor().clone();

		cx.after(hold, move |s| actor.apply(s, move |this, cx| this.transmit_complete(cx, node, out_port, packet, dropped)));
	}

	/// `TransmitComplete` (spec.md §4.4 step 3): frees the port, re-triggers both the allocator
	/// (to pull the next packet) and this port's own transmit FSM, and — unless the packet was
	/// dropped or the link is down — schedules its arrival at the peer port after the link's
	/// propagation delay.
	fn transmit_complete(&mut self, cx: CX![], node: NodeHandle, out_port: u16, packet: Packet, dropped: bool) {
		self.sync_clock(cx);

		let link = self.nodes[node].ports[out_port as usize].link.filter(|l| l.up);
		self.nodes[node].ports[out_port as usize].state = PortState::Ready;

		let now = self.now;
		let released = self.nodes[node].ports[out_port as usize].flow_control.handle_release_occupied_flow_control(packet.vl(), packet.len() as u32);

		if let Some(frame) = released {
			self.emit_control_frame(cx, node, out_port, frame);
		}

		let mut packet = packet;
		packet.record_egress(out_port, now);

		if !dropped {
			if let Some(link) = link {
				let actor = cx.access_actor().clone();

				cx.after(link.delay, move |s| {
					actor.apply(s, move |this, cx| this.port_receive(cx, link.peer_node, link.peer_port, packet))
				});
			} else {
				warn!("node {} port {out_port} transmit_complete with no live link; packet dropped", self.nodes[node].id);
			}
		}

		self.trigger_allocator(cx, node, out_port);
		self.trigger_transmit(cx, node, out_port);
	}

	/// Packet arrival at `in_port` (spec.md §4.4 step 4, §4.5 "Packet classification"). Demuxes
	/// on the datalink header's `config` field: control/credit frames terminate at the
	/// flow-control engine, everything else is handed to the node-kind-appropriate layer.
	pub fn port_receive(&mut self, cx: CX![], node: NodeHandle, in_port: u16, mut packet: Packet) {
		self.sync_clock(cx);

		let node_id = self.nodes[node].id;
		let now = self.now;
		packet.record_ingress(node_id, Some(in_port), now);

		let config = packet.datalink().config();

		if config == CONFIG_CONTROL {
			if packet.len() < CONTROL_HEADER_LEN {
				warn!("node {node_id} port {in_port} short control frame ({} bytes)", packet.len());
				return;
			}

			let header: &DatalinkControlCreditHeader = bytes::cast(&packet.bytes()[..CONTROL_HEADER_LEN]);
			self.nodes[node].ports[in_port as usize].flow_control.handle_received_control_packet(header);
			return;
		}

		let vl = packet.vl();
		let size = packet.len() as u32;

		if let Some(frame) = self.nodes[node].ports[in_port as usize].flow_control.handle_received_packet(vl, size) {
			self.emit_control_frame(cx, node, in_port, frame);
		}

		match self.nodes[node].kind {
			NodeKind::Switch => self.switch_handle_packet(cx, node, in_port, packet),
			NodeKind::Endpoint if config == CONFIG_CNA16 => self.ldst_recv_packet(cx, node, in_port, packet),
			NodeKind::Endpoint => self.endpoint_recv_ipv4(cx, node, in_port, packet),
		}
	}

	/// Routes a `CONFIG_IPV4` arrival at an endpoint to the owning TP's data- or ACK-receive path,
	/// by `dstTpn` and the transport header's opcode (spec.md §4.6 "Receive path").
	fn endpoint_recv_ipv4(&mut self, cx: CX![], node: NodeHandle, in_port: u16, packet: Packet) {
		let (dst_tpn, opcode, size) = {
			let mut reader = packet.reader();
			reader.split::<headers::datalink::DatalinkPacketHeader>();
			reader.split::<headers::ip::v4::Header>();
			reader.split::<headers::ip::v4::UdpHeader>();
			reader.split::<headers::network::NetworkHeader>();
			let tph = reader.split::<TransportHeader>();
			(u32::from(tph.dst_tpn()), tph.opcode(), packet.len())
		};

		let Some(controller) = self.nodes[node].controller.as_ref() else {
			warn!("node {} has no controller; dropping IPv4 packet", self.nodes[node].id);
			return;
		};

		let Some(&handle) = controller.tp_by_tpn.get(&dst_tpn) else {
			warn!("node {} port {in_port} IPv4 packet for unknown TPN {dst_tpn} ({size} bytes)", self.nodes[node].id);
			return;
		};

		if opcode == OPCODE_ACK {
			self.transport_recv_ack(cx, node, handle, packet);
		} else if opcode == OPCODE_RELIABLE_TA {
			self.transport_recv_data_packet(cx, node, handle, packet);
		} else {
			warn!("node {} TP {dst_tpn} unknown opcode {opcode:?}", self.nodes[node].id);
		}
	}

	/// Queues a flow-control-engine-generated credit/permission frame for transmission back out
	/// the port it arrived on (control frames ride the same physical link in both directions).
	fn emit_control_frame(&mut self, cx: CX![], node: NodeHandle, out_port: u16, frame: ControlFrame) {
		let packet = Packet::build(CONTROL_HEADER_LEN, FlowTag { task_id: 0, flow_size: 0 }, |c| {
			c.push(&frame.header);
		});

		self.nodes[node].ports[out_port as usize].egress.push_back(packet);
		self.trigger_transmit(cx, node, out_port);
	}
}

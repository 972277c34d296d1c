//! Switch classification and forwarding (spec.md §4.5).
//!
//! Grounded on `port.rs`'s `port_receive` demux (the control/credit branch and the
//! endpoint-vs-switch split already live there) and on `routing.rs`'s `RouteKey`/`RouteDecision`
//! shape. Only `NodeKind::Switch` nodes ever reach `switch_handle_packet` — endpoints short-circuit
//! straight to `endpoint_recv_ipv4`/`ldst_recv_packet` in `port.rs` before this module is
//! consulted, so the "packet is for a local TP/LDST instance" half of spec.md §4.5's classifier is
//! structurally unreachable here: a switch never owns a `Controller` (see `node.rs`'s
//! `new_switch`), so it can never be the addressee of a UB or CNA-16 payload. This module is
//! forward-only.

use bilge::prelude::*;
use headers::datalink::{DatalinkPacketHeader, CONFIG_CNA16, CONFIG_IPV4};
use headers::ip::v4::{Header as Ipv4Header, UdpHeader};
use headers::network::{Cna16NetworkHeader, NetworkHeader};
use log::warn;
use stakker::CX;
use utils::bytes;

use crate::node::NodeHandle;
use crate::packet::Packet;
use crate::routing::RouteKey;
use crate::Simulation;

const DL_LEN: usize = 4;
const IPV4_LEN: usize = 20;
const UDP_LEN: usize = 8;
const NETWORK_LEN: usize = 6;
const NET_HEADER_OFFSET: usize = DL_LEN + IPV4_LEN + UDP_LEN;

fn net_header_mut(packet: &mut Packet) -> &mut NetworkHeader {
	bytes::cast_mut(&mut packet.bytes_mut()[NET_HEADER_OFFSET..NET_HEADER_OFFSET + NETWORK_LEN])
}

impl Simulation {
	/// Entry point for every arrival at a switch port (spec.md §4.5, called from `port_receive`
	/// once the control/credit case has already been peeled off).
	pub fn switch_handle_packet(&mut self, cx: CX![], node: NodeHandle, in_port: u16, packet: Packet) {
		self.sync_clock(cx);

		let config = packet.datalink().config();

		if config == CONFIG_IPV4 {
			self.switch_forward_ipv4(cx, node, in_port, packet);
		} else if config == CONFIG_CNA16 {
			self.switch_forward_cna16(cx, node, in_port, packet);
		} else {
			warn!("node {} port {in_port} unrecognized datalink config {config:?}; dropping", self.nodes[node].id);
		}
	}

	fn switch_forward_ipv4(&mut self, cx: CX![], node: NodeHandle, in_port: u16, mut packet: Packet) {
		let key = {
			let mut reader = packet.reader();
			reader.split::<DatalinkPacketHeader>();
			let ip = reader.split::<Ipv4Header>();
			let udp = reader.split::<UdpHeader>();

			RouteKey { src_ip: u32::from(ip.src), dst_ip: u32::from(ip.dst), src_port: udp.src_port.get(), dst_port: udp.dst_port.get(), priority: ip.tos() }
		};

		if self.config.cc_enabled {
			if let Some(mut field) = net_header_mut(&mut packet).caqm() {
				let mtu = self.config.caqm.mtu;
				let beta = self.config.caqm.beta;
				let mark_prob = self.config.caqm.mark_prob;
				let switch_cc = &mut self.nodes[node].ports[in_port as usize].switch_cc;
				switch_cc.on_forward(&mut field, mtu, beta, mark_prob, &mut self.rng);
				net_header_mut(&mut packet).set_caqm(field);
			}
		}

		self.forward(cx, node, in_port, key, packet);
	}

	fn switch_forward_cna16(&mut self, cx: CX![], node: NodeHandle, in_port: u16, packet: Packet) {
		let key = {
			let mut reader = packet.reader();
			reader.split::<DatalinkPacketHeader>();
			let net = reader.split::<Cna16NetworkHeader>();

			RouteKey { src_ip: net.scna() as u32, dst_ip: net.dcna() as u32, src_port: 0, dst_port: 0, priority: net.sl().into() }
		};

		self.forward(cx, node, in_port, key, packet);
	}

	/// `Forward` (spec.md §4.5): route, rewrite the routing-policy bit if a non-shortest path was
	/// picked, admission-check, and push into the VOQ the outbound port's allocator will drain.
	fn forward(&mut self, cx: CX![], node: NodeHandle, in_port: u16, key: RouteKey, mut packet: Packet) {
		let node_id = self.nodes[node].id;
		let use_shortest_path = self.config.use_shortest_path;
		let use_packet_spray = self.config.use_packet_spray;

		let decision = {
			let switch = self.nodes[node].switch.as_mut().expect("switch_handle_packet only runs on switch nodes");
			switch.routing.get_out_port(key, in_port, use_shortest_path, use_packet_spray)
		};

		let Some(decision) = decision else {
			panic!("node {node_id} port {in_port}: no route to destination {:#x} (routing table has no entry)", key.dst_ip);
		};

		if !decision.took_shortest {
			packet.datalink_mut().set_routing_policy(true);
		}

		let out_port = decision.out_port;
		let vl = packet.vl() as usize;
		let size = packet.len() as u32;

		if !self.nodes[node].queue_manager.check_ingress(in_port as usize, vl, size) {
			warn!("node {node_id} port {in_port} vl {vl}: ingress buffer full, dropping {size}-byte packet");
			return;
		}

		self.nodes[node].queue_manager.push_ingress(in_port as usize, vl, size);
		self.nodes[node].queue_manager.push_egress(out_port as usize, vl, size);

		self.nodes[node].switch.as_mut().unwrap().voq.push(out_port as usize, vl, in_port as usize, packet);

		self.trigger_allocator(cx, node, out_port);
	}

	/// Drives every switch port's CAQM periodic update (spec.md §4.7 "Switch"), started once at
	/// run start. A no-op per port whose `switch_cc` isn't `SwitchCongestionControl::Caqm`.
	pub fn arm_caqm_periodic(&mut self, cx: CX![]) {
		self.sync_clock(cx);

		if !self.config.cc_enabled {
			return;
		}

		let nodes: Vec<NodeHandle> = self.nodes.iter().map(|(h, _)| h).collect();

		for node in nodes {
			let port_count = self.nodes[node].ports.len();

			for port in 0..port_count as u16 {
				self.caqm_periodic_tick(cx, node, port);
			}
		}
	}

	fn caqm_periodic_tick(&mut self, cx: CX![], node: NodeHandle, port: u16) {
		self.sync_clock(cx);

		let period = self.config.caqm.cc_update_period;
		let qt = self.config.caqm.qt;
		let lambda = self.config.caqm.lambda;
		let vl_num = self.config.vl_num;
		let rate = self.nodes[node].ports[port as usize].rate;
		let egress_bytes: u32 = (0..vl_num).map(|vl| self.nodes[node].queue_manager.egress_bytes(port as usize, vl)).sum();

		self.nodes[node].ports[port as usize].switch_cc.periodic_update(period, rate, qt, egress_bytes, lambda);

		let actor = cx.access_actor().clone();

		cx.after(period, move |s| actor.apply(s, move |this, cx| this.caqm_periodic_tick(cx, node, port)));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::routing::RoutingTable;

	#[test]
	fn route_key_hashes_the_same_for_ipv4_and_cna16_paths() {
		// Both classifiers build a `RouteKey` the same generic way; this just documents that the
		// routing table doesn't care which address scheme populated `dst_ip`.
		let mut rt = RoutingTable::new();
		rt.insert(0xabc, &[1, 2], &[1, 1]);

		let key = RouteKey { src_ip: 0, dst_ip: 0xabc, src_port: 0, dst_port: 0, priority: 0 };
		assert!(rt.get_out_port(key, 0, true, true).is_some());
	}
}

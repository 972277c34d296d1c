//! The VOQ fabric and the per-`(outPort, vl)` round-robin allocator (spec.md §3, §4.3).
//!
//! Grounded on `collections::slab::Registry`'s handle idiom for the transport-channel back-
//! reference a `TPCHANNEL` ingress source carries, and on `wireguard::tunnel::Peer`'s plain-data
//! (non-actor) style for `VoqFabric`/`Allocator` themselves: all the bookkeeping here is pure
//! data manipulation, with no event scheduling of its own — scheduling is threaded in by
//! `Simulation`'s `trigger_allocator`/`trigger_transmit` methods (see `port.rs`), the same way
//! `Peer`'s plain methods take a `cx: CX![Wireguard]` only to forward it to a scheduling call.

use std::collections::VecDeque;

use collections::slab::Handle;
use stakker::CX;

use crate::ldst::LdstThread;
use crate::packet::Packet;
use crate::transport::TransportChannel;
use crate::Simulation;

pub const MAX_VL: usize = 16;

/// A three-dimensional `[outPort][vl][inPort]` index of FIFO packet queues, owned by a switch
/// (spec.md §3: "only switches consume it").
pub struct VoqFabric {
	vl_num: usize,
	in_ports: usize,
	out_ports: usize,
	queues: Vec<VecDeque<Packet>>,
}

impl VoqFabric {
	pub fn new(out_ports: usize, vl_num: usize, in_ports: usize) -> Self {
		Self { vl_num, in_ports, out_ports, queues: (0..out_ports * vl_num * in_ports).map(|_| VecDeque::new()).collect() }
	}

	#[inline]
	fn index(&self, out_port: usize, vl: usize, in_port: usize) -> usize {
		debug_assert!(out_port < self.out_ports && vl < self.vl_num && in_port < self.in_ports);
		(out_port * self.vl_num + vl) * self.in_ports + in_port
	}

	pub fn push(&mut self, out_port: usize, vl: usize, in_port: usize, packet: Packet) {
		let idx = self.index(out_port, vl, in_port);
		self.queues[idx].push_back(packet);
	}

	pub fn is_empty(&self, out_port: usize, vl: usize, in_port: usize) -> bool {
		self.queues[self.index(out_port, vl, in_port)].is_empty()
	}

	pub fn front_size(&self, out_port: usize, vl: usize, in_port: usize) -> Option<usize> {
		self.queues[self.index(out_port, vl, in_port)].front().map(Packet::len)
	}

	pub fn pop(&mut self, out_port: usize, vl: usize, in_port: usize) -> Option<Packet> {
		self.queues[self.index(out_port, vl, in_port)].pop_front()
	}

	pub fn in_ports(&self) -> usize {
		self.in_ports
	}
}

/// Where an allocator's registered ingress queue pulls its next packet from.
#[derive(Clone, Copy)]
pub enum IngressSource {
	Voq { in_port: u16 },
	Transport(Handle<TransportChannel>),
	Ldst(Handle<LdstThread>),
}

/// Per-`(outPort, vl)` round-robin bookkeeping (spec.md §4.3). One instance lives on every port,
/// covering every VL that port serves.
#[derive(Default)]
pub struct Allocator {
	queues: [Vec<IngressSource>; MAX_VL],
	cursor: [usize; MAX_VL],
	/// Set while a `TriggerAllocator` run for this port is already in progress.
	pub running: bool,
}

impl Allocator {
	pub fn register(&mut self, vl: u8, source: IngressSource) {
		self.queues[vl as usize].push(source);
	}

	fn advance(&mut self, vl: u8) {
		let n = self.queues[vl as usize].len();

		if n > 0 {
			self.cursor[vl as usize] = (self.cursor[vl as usize] + 1) % n;
		}
	}
}

/// An ingress source's next-packet size and a draining closure, resolved against live state.
enum Picked {
	None,
	Packet { in_port: Option<u16>, vl: u8, size: u32 },
}

impl Simulation {
	/// `TriggerAllocator(outPort)` (spec.md §4.3). Idempotent while already running; otherwise
	/// walks VLs priority-strict, then queues at each VL starting from the round-robin cursor,
	/// and schedules the two-event handoff to the port once a packet is picked.
	pub fn trigger_allocator(&mut self, cx: CX![], node: Handle<crate::node::Node>, out_port: u16) {
		self.sync_clock(cx);
		let allocation_time = self.config.allocation_time;
		let n = &mut self.nodes[node];
		let port = &mut n.ports[out_port as usize];

		if port.allocator.running {
			// Idempotent: a run is already in progress for this port.
			self.trigger_transmit(cx, node, out_port);
			return;
		}

		let vl_num = self.config.vl_num;
		// `bucket_vl` is the priority bucket being walked; the packet a `source` yields may carry a
		// different actual vl (the `Voq` arm of `peek_source` scans every VL for a given in_port,
		// independent of which bucket it's registered under — see `DESIGN.md`), so the packet's own
		// vl, not `bucket_vl`, must drive flow-control checks and the later pop/accounting.
		let mut picked: Option<(u8, u8, IngressSource, u32)> = None;

		'outer: for bucket_vl in 0..vl_num as u8 {
			let queue_len = self.nodes[node].ports[out_port as usize].allocator.queues[bucket_vl as usize].len();

			for attempt in 0..queue_len {
				let idx = {
					let port = &self.nodes[node].ports[out_port as usize];
					(port.allocator.cursor[bucket_vl as usize] + attempt) % queue_len.max(1)
				};

				let source = self.nodes[node].ports[out_port as usize].allocator.queues[bucket_vl as usize][idx];

				let Picked::Packet { vl: actual_vl, size, .. } = self.peek_source(node, out_port, source) else { continue };

				let allowed = {
					let port = &self.nodes[node].ports[out_port as usize];
					!port.flow_control.is_fc_limited(actual_vl, size)
				};

				if allowed {
					picked = Some((bucket_vl, actual_vl, source, size));
					break 'outer;
				}
			}
		}

		let Some((bucket_vl, vl, source, _size)) = picked else {
			let port = &mut self.nodes[node].ports[out_port as usize];
			port.allocator.running = false;
			return;
		};

		{
			let port = &mut self.nodes[node].ports[out_port as usize];
			port.allocator.running = true;
			port.allocator.advance(bucket_vl);
		}

		let actor = cx.access_actor().clone();

		cx.after(allocation_time, move |s| {
			actor.apply(s, move |this, cx| this.allocator_fire(cx, node, out_port, vl, source))
		});
	}

	fn allocator_fire(&mut self, cx: CX![], node: Handle<crate::node::Node>, out_port: u16, vl: u8, source: IngressSource) {
		self.sync_clock(cx);

		if let Some(packet) = self.take_from_source(node, out_port, vl, source) {
			let port = &mut self.nodes[node].ports[out_port as usize];
			port.egress.push_back(packet);
			port.allocator.running = false;
		} else {
			self.nodes[node].ports[out_port as usize].allocator.running = false;
		}

		self.trigger_transmit(cx, node, out_port);
	}

	fn peek_source(&self, node: Handle<crate::node::Node>, out_port: u16, source: IngressSource) -> Picked {
		match source {
			IngressSource::Voq { in_port } => {
				let n = &self.nodes[node];
				let Some(switch) = &n.switch else { return Picked::None };
				let vl_num = self.config.vl_num;

				for vl in 0..vl_num {
					if let Some(size) = switch.voq.front_size(out_port as usize, vl, in_port as usize) {
						return Picked::Packet { in_port: Some(in_port), vl: vl as u8, size: size as u32 };
					}
				}

				Picked::None
			}
			IngressSource::Transport(handle) => {
				let n = &self.nodes[node];
				let Some(controller) = &n.controller else { return Picked::None };
				let tp = &controller.tps[handle];

				match tp.peek_next_packet_size() {
					Some(size) => Picked::Packet { in_port: None, vl: tp.vl, size },
					None => Picked::None,
				}
			}
			IngressSource::Ldst(handle) => {
				let n = &self.nodes[node];
				let Some(controller) = &n.controller else { return Picked::None };
				let Some(ldst) = &controller.ldst else { return Picked::None };

				match ldst.peek_next_packet_size(handle) {
					Some((vl, size)) => Picked::Packet { in_port: None, vl, size },
					None => Picked::None,
				}
			}
		}
	}

	fn take_from_source(&mut self, node: Handle<crate::node::Node>, out_port: u16, vl: u8, source: IngressSource) -> Option<Packet> {
		match source {
			IngressSource::Voq { in_port } => {
				let n = &mut self.nodes[node];
				let switch = n.switch.as_mut()?;
				let packet = switch.voq.pop(out_port as usize, vl as usize, in_port as usize)?;
				n.queue_manager.pop_ingress(in_port as usize, vl as usize, packet.len() as u32);
				Some(packet)
			}
			IngressSource::Transport(handle) => self.transport_get_next_packet(node, handle),
			IngressSource::Ldst(handle) => self.ldst_get_next_packet(node, handle),
		}
	}
}

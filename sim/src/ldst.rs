//! The load/store (LDST) memory-semantic pipeline: UB-MEM traffic addressed by CNA-16 rather than
//! a transport channel's IPv4-style pair (spec.md §4.10).
//!
//! Grounded on `transport.rs`'s pull-model shape (a plain struct owning queued work, drained by the
//! allocator through [`crate::voq::IngressSource::Ldst`] exactly the way `IngressSource::Transport`
//! drains a [`crate::transport::TransportChannel`]) and on its packet-building idiom (`Packet::build`
//! plus `Cursor::split`). Every LDST thread sends at most one task segment at a time — the queue
//! head stays in place until both fully sent and fully acked — so the wire `token` field only has
//! to name the thread, never a packet or chunk within it (spec.md §9's open question (a)).

use std::collections::VecDeque;

use bilge::prelude::*;
use collections::map::HashMap;
use collections::slab::{Handle, Registry};
use headers::datalink::{DatalinkPacketHeader, CONFIG_CNA16};
use headers::mae::{self, CompactMaeHeader};
use headers::network::{cna16, CcMode, Cna16NetworkHeader};
use headers::transaction::CompactTransactionHeader;
use log::warn;
use stakker::CX;

use crate::node::NodeHandle;
use crate::packet::{FlowTag, Packet};
use crate::voq::IngressSource;
use crate::Simulation;

/// LDST opcodes (spec.md §4.10). Plain bytes, not bilge bitfields, the way `transport.rs`'s
/// `OPCODE_RELIABLE_TA`/`OPCODE_ACK` share a namespace with the transaction header's `ta_opcode`.
const OPCODE_WRITE: u8 = 0x20;
const OPCODE_READ: u8 = 0x21;
const OPCODE_WRITE_ACK: u8 = 0x22;
const OPCODE_READ_RESPONSE: u8 = 0x23;

const DL_LEN: usize = 4;
const CNA16_LEN: usize = 8;
const TA_LEN: usize = 4;
const MAE_LEN: usize = 12;
const HEADER_LEN: usize = DL_LEN + CNA16_LEN + TA_LEN + MAE_LEN;

/// One thread's share of a STORE or LOAD task (spec.md §4.10 "segmented across the instance's
/// threads"), carved at dispatch time and drained one MTU-ish chunk per wire packet.
struct LdstTaskSegment {
	task_id: u64,
	dst_cna: u16,
	addr: u64,
	total_bytes: u32,
	sent_bytes: u32,
	acked_bytes: u32,
	packet_size: u32,
	req_length: u5,
}

/// A single fixed worker in an endpoint's LDST thread pool (spec.md §4.10 "a fixed-size pool of
/// threads, each bound to one port and VL"). Holds at most one STORE and one LOAD task segment in
/// flight; everything queued behind the head waits its turn.
pub struct LdstThread {
	pub port: u16,
	pub vl: u8,
	store_queue: VecDeque<LdstTaskSegment>,
	load_queue: VecDeque<LdstTaskSegment>,
	/// Request budget: decremented on every packet sent, restored on every response received
	/// (spec.md §4.10 "an outstanding-request budget gates how far a thread may run ahead").
	outstanding: u32,
	inflight_cap: u32,
}

impl LdstThread {
	/// Applies a response to this thread's current head-of-queue segment. Returns the finished
	/// task id once that segment's last byte has been acked.
	fn on_response(&mut self, is_write_ack: bool, payload_len: u32) -> Option<u64> {
		self.outstanding = (self.outstanding + 1).min(self.inflight_cap);

		let queue = if is_write_ack { &mut self.store_queue } else { &mut self.load_queue };
		let segment = queue.front_mut()?;

		if is_write_ack {
			segment.acked_bytes = segment.total_bytes;
		} else {
			segment.acked_bytes = (segment.acked_bytes + payload_len).min(segment.total_bytes);
		}

		if segment.acked_bytes < segment.total_bytes {
			return None;
		}

		queue.pop_front().map(|s| s.task_id)
	}
}

fn pull_chunk(queue: &mut VecDeque<LdstTaskSegment>) -> Option<(u32, bool, u64, u16, u5)> {
	let segment = queue.front_mut()?;

	if segment.sent_bytes >= segment.total_bytes {
		return None;
	}

	let chunk = (segment.total_bytes - segment.sent_bytes).min(segment.packet_size);
	let addr = segment.addr + segment.sent_bytes as u64;
	segment.sent_bytes += chunk;
	let last_packet = segment.sent_bytes >= segment.total_bytes;

	Some((chunk, last_packet, addr, segment.dst_cna, segment.req_length))
}

fn peek_chunk(queue: &VecDeque<LdstTaskSegment>) -> Option<u32> {
	let segment = queue.front()?;

	if segment.sent_bytes >= segment.total_bytes {
		return None;
	}

	Some((segment.total_bytes - segment.sent_bytes).min(segment.packet_size))
}

/// The LDST instance an endpoint's controller owns (spec.md §3 "one LDST instance per endpoint").
pub struct LdstInstance {
	threads: Registry<LdstThread>,
	thread_order: Vec<Handle<LdstThread>>,
	/// `task_id -> segments not yet fully acked`, so a task split across every thread in the
	/// instance only finishes once all of them have (spec.md §9 open question (c): "split a task
	/// evenly across every thread the instance owns").
	pending: HashMap<u64, u32>,
}

impl LdstInstance {
	fn new() -> Self {
		Self { threads: Registry::new(), thread_order: Vec::new(), pending: HashMap::default() }
	}

	/// Reconstructs a thread handle from a response packet's wire `token` (spec.md §9 open
	/// question (a)).
	fn thread_handle_at(&self, token: u32) -> Option<Handle<LdstThread>> {
		self.threads.handle_at(token as usize)
	}

	fn thread_mut(&mut self, handle: Handle<LdstThread>) -> &mut LdstThread {
		self.threads.get_mut(handle)
	}

	fn thread_ref(&self, handle: Handle<LdstThread>) -> &LdstThread {
		self.threads.get(handle)
	}

	/// `peekNextPacketSize` for the allocator's pull model (spec.md §4.3).
	pub fn peek_next_packet_size(&self, handle: Handle<LdstThread>) -> Option<(u8, u32)> {
		let thread = self.threads.get(handle);

		if thread.outstanding == 0 {
			return None;
		}

		let chunk = peek_chunk(&thread.store_queue).or_else(|| peek_chunk(&thread.load_queue))?;
		Some((thread.vl, HEADER_LEN as u32 + chunk))
	}

	fn note_segment_done(&mut self, task_id: u64) -> bool {
		let Some(count) = self.pending.get_mut(&task_id) else { return false };
		*count -= 1;

		if *count == 0 {
			self.pending.remove(&task_id);
			true
		} else {
			false
		}
	}
}

fn build_packet(opcode: u8, scna: u16, dcna: u16, vl: u8, req_length: u5, token: u32, addr: u64, last_packet: bool, flow: FlowTag, payload: &[u8]) -> Packet {
	let cap = HEADER_LEN + payload.len();

	Packet::build(cap, flow, |cursor| {
		let (dl, cursor) = cursor.split::<DatalinkPacketHeader>();
		*dl = DatalinkPacketHeader::new(CONFIG_CNA16, true, false, u4::new(vl), u4::new(0), false, false);

		let (net, cursor) = cursor.split::<Cna16NetworkHeader>();
		*net = Cna16NetworkHeader::new(scna, dcna, CcMode::Caqm, u13::new(0), 0, u4::new(vl), false, u3::new(0));

		let (ta, cursor) = cursor.split::<CompactTransactionHeader>();
		*ta = CompactTransactionHeader::new(opcode, 0);

		let (mae_hdr, cursor) = cursor.split::<CompactMaeHeader>();
		*mae_hdr = CompactMaeHeader::new(opcode, req_length, u20::new(token), addr, 0, last_packet);

		cursor.push(payload);
	})
}

impl Simulation {
	/// Creates an LDST instance on `node` with `thread_count` threads, round-robin-bound to its
	/// physical ports, and registers each one with its port's allocator (spec.md §4.10). Called
	/// once per endpoint at configuration-load time.
	pub fn create_ldst_instance(&mut self, node: NodeHandle, thread_count: usize, inflight_cap: u32) {
		let port_count = self.nodes[node].ports.len();
		assert!(port_count > 0, "node has no ports to bind ldst threads to");

		let mut instance = LdstInstance::new();

		for i in 0..thread_count {
			let port = (i % port_count) as u16;
			let vl = 0;

			let handle = instance.threads.insert(LdstThread {
				port,
				vl,
				store_queue: VecDeque::new(),
				load_queue: VecDeque::new(),
				outstanding: inflight_cap,
				inflight_cap,
			});

			instance.thread_order.push(handle);
			self.nodes[node].ports[port as usize].allocator.register(vl, IngressSource::Ldst(handle));
		}

		self.nodes[node].controller.as_mut().expect("ldst instance requires an endpoint controller").ldst = Some(instance);
	}

	/// Splits `task_id` evenly across every thread the source node's LDST instance owns and
	/// enqueues one segment per thread (spec.md §4.10, §9 open question (c)). `is_write` selects
	/// STORE (single cumulative `WRITE_ACK`) vs. LOAD (one `READ_RESPONSE` per packet) completion
	/// semantics.
	pub fn handle_ldst_task(&mut self, cx: CX![], node: NodeHandle, dst_node: NodeHandle, length: u64, task_id: u64, is_write: bool, address: u64) {
		self.sync_clock(cx);
		let req_length = u5::new(self.config.ldst_req_length);
		let packet_size = mae::packet_size(req_length);
		let dst_node_id = self.nodes[dst_node].id;

		let thread_handles = {
			let controller = self.nodes[node].controller.as_ref().expect("ldst traffic needs an endpoint controller");
			let ldst = controller.ldst.as_ref().expect("node has no ldst instance configured");
			ldst.thread_order.clone()
		};

		let n = thread_handles.len() as u64;
		assert!(n > 0, "ldst instance has no threads configured");
		let base = length / n;
		let rem = length % n;

		{
			let controller = self.nodes[node].controller.as_mut().unwrap();
			controller.ldst.as_mut().unwrap().pending.insert(task_id, thread_handles.len() as u32);
		}

		let mut addr_cursor = address;

		for (i, thread_handle) in thread_handles.into_iter().enumerate() {
			let bytes = base + u64::from((i as u64) < rem);

			if bytes == 0 {
				let done = {
					let controller = self.nodes[node].controller.as_mut().unwrap();
					controller.ldst.as_mut().unwrap().note_segment_done(task_id)
				};

				if done {
					self.on_task_finished(cx, task_id);
				}

				continue;
			}

			let segment = LdstTaskSegment {
				task_id,
				dst_cna: cna16(dst_node_id as u16, 0),
				addr: addr_cursor,
				total_bytes: bytes as u32,
				sent_bytes: 0,
				acked_bytes: 0,
				packet_size,
				req_length,
			};

			addr_cursor += bytes;

			{
				let controller = self.nodes[node].controller.as_mut().unwrap();
				let ldst = controller.ldst.as_mut().unwrap();
				let thread = ldst.thread_mut(thread_handle);

				if is_write {
					thread.store_queue.push_back(segment);
				} else {
					thread.load_queue.push_back(segment);
				}
			}

			self.ldst_pump_thread(cx, node, thread_handle);
		}
	}

	/// Pull-model `getNextPacket()` for an LDST thread registered with a port's allocator.
	pub fn ldst_get_next_packet(&mut self, node: NodeHandle, handle: Handle<LdstThread>) -> Option<Packet> {
		let node_id = self.nodes[node].id;
		let controller = self.nodes[node].controller.as_mut()?;
		let ldst = controller.ldst.as_mut()?;
		let token = handle.raw() as u32;
		let thread = ldst.threads.get_mut(handle);

		if thread.outstanding == 0 {
			return None;
		}

		let (is_write, chunk, last_packet, addr, dst_cna, req_length) = if let Some((c, l, a, d, r)) = pull_chunk(&mut thread.store_queue) {
			(true, c, l, a, d, r)
		} else if let Some((c, l, a, d, r)) = pull_chunk(&mut thread.load_queue) {
			(false, c, l, a, d, r)
		} else {
			return None;
		};

		thread.outstanding -= 1;

		let opcode = if is_write { OPCODE_WRITE } else { OPCODE_READ };
		let scna = cna16(node_id as u16, thread.port as u8);
		let payload = vec![0u8; chunk as usize];
		let flow = FlowTag { task_id: 0, flow_size: chunk as u64 };

		Some(build_packet(opcode, scna, dst_cna, thread.vl, req_length, token, addr, last_packet, flow, &payload))
	}

	/// Entry point for a `CONFIG_CNA16` arrival at an endpoint (spec.md §4.5 "Packet
	/// classification"), reached from `port.rs`'s `port_receive`.
	pub fn ldst_recv_packet(&mut self, cx: CX![], node: NodeHandle, in_port: u16, packet: Packet) {
		self.sync_clock(cx);

		let opcode = {
			let mut reader = packet.reader();
			reader.split::<DatalinkPacketHeader>();
			reader.split::<Cna16NetworkHeader>();
			reader.split::<CompactTransactionHeader>().ta_opcode()
		};

		match opcode {
			OPCODE_WRITE | OPCODE_READ => self.ldst_recv_request(cx, node, in_port, packet),
			OPCODE_WRITE_ACK | OPCODE_READ_RESPONSE => self.ldst_recv_response(cx, node, packet),
			other => warn!("node {} port {in_port} unknown ldst opcode {other:#x}", self.nodes[node].id),
		}
	}

	/// Responds to a STORE (single cumulative `WRITE_ACK` once the last packet lands) or LOAD
	/// (one `READ_RESPONSE` per request packet) request (spec.md §4.10, Scenario 4's "every store
	/// completes with a single TRANSACTION_ACK").
	fn ldst_recv_request(&mut self, cx: CX![], node: NodeHandle, in_port: u16, packet: Packet) {
		let (scna, dcna, sl, is_write, token, last_packet, payload_len) = {
			let mut reader = packet.reader();
			reader.split::<DatalinkPacketHeader>();
			let net = reader.split::<Cna16NetworkHeader>();
			let ta = reader.split::<CompactTransactionHeader>();
			let mae_hdr = reader.split::<CompactMaeHeader>();

			(net.scna(), net.dcna(), net.sl(), ta.ta_opcode() == OPCODE_WRITE, u32::from(mae_hdr.token_id()), mae_hdr.last_packet(), reader.remaining().len())
		};

		let flow = FlowTag { task_id: 0, flow_size: 0 };

		let response = if is_write {
			if !last_packet {
				return;
			}

			build_packet(OPCODE_WRITE_ACK, dcna, scna, sl.into(), u5::new(0), token, 0, true, flow, &[])
		} else {
			build_packet(OPCODE_READ_RESPONSE, dcna, scna, sl.into(), u5::new(0), token, 0, last_packet, flow, &vec![0u8; payload_len])
		};

		self.nodes[node].ports[in_port as usize].egress.push_back(response);
		self.trigger_transmit(cx, node, in_port);
	}

	fn ldst_recv_response(&mut self, cx: CX![], node: NodeHandle, packet: Packet) {
		let (is_write_ack, token, payload_len) = {
			let mut reader = packet.reader();
			reader.split::<DatalinkPacketHeader>();
			reader.split::<Cna16NetworkHeader>();
			let ta = reader.split::<CompactTransactionHeader>();
			let mae_hdr = reader.split::<CompactMaeHeader>();

			(ta.ta_opcode() == OPCODE_WRITE_ACK, u32::from(mae_hdr.token_id()), reader.remaining().len())
		};

		let Some(controller) = self.nodes[node].controller.as_mut() else { return };
		let Some(ldst) = controller.ldst.as_mut() else { return };
		let Some(handle) = ldst.thread_handle_at(token) else { return };

		let finished_task = ldst.thread_mut(handle).on_response(is_write_ack, payload_len as u32);

		if let Some(task_id) = finished_task {
			if ldst.note_segment_done(task_id) {
				self.on_task_finished(cx, task_id);
			}
		}

		self.ldst_pump_thread(cx, node, handle);
	}

	fn ldst_pump_thread(&mut self, cx: CX![], node: NodeHandle, handle: Handle<LdstThread>) {
		let port = {
			let controller = self.nodes[node].controller.as_ref().expect("ldst lives on an endpoint");
			controller.ldst.as_ref().expect("ldst_pump_thread requires an ldst instance").thread_ref(handle).port
		};

		self.trigger_allocator(cx, node, port);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_thread(inflight_cap: u32) -> LdstThread {
		LdstThread { port: 0, vl: 0, store_queue: VecDeque::new(), load_queue: VecDeque::new(), outstanding: inflight_cap, inflight_cap }
	}

	fn test_segment(task_id: u64, total_bytes: u32) -> LdstTaskSegment {
		LdstTaskSegment { task_id, dst_cna: cna16(1, 0), addr: 0, total_bytes, sent_bytes: 0, acked_bytes: 0, packet_size: 64, req_length: u5::new(0) }
	}

	#[test]
	fn store_completes_on_single_cumulative_ack() {
		let mut thread = test_thread(4);
		thread.store_queue.push_back(test_segment(7, 200));

		assert_eq!(thread.on_response(true, 0), Some(7));
		assert!(thread.store_queue.is_empty());
	}

	#[test]
	fn load_accumulates_bytes_before_finishing() {
		let mut thread = test_thread(4);
		thread.load_queue.push_back(test_segment(9, 100));

		assert_eq!(thread.on_response(false, 64), None);
		assert_eq!(thread.on_response(false, 36), Some(9));
	}

	#[test]
	fn pull_chunk_caps_at_packet_size() {
		let mut queue = VecDeque::new();
		queue.push_back(test_segment(1, 130));

		let (chunk, last_packet, _, _, _) = pull_chunk(&mut queue).unwrap();
		assert_eq!(chunk, 64);
		assert!(!last_packet);

		let (chunk, last_packet, _, _, _) = pull_chunk(&mut queue).unwrap();
		assert_eq!(chunk, 64);
		assert!(!last_packet);

		let (chunk, last_packet, _, _, _) = pull_chunk(&mut queue).unwrap();
		assert_eq!(chunk, 2);
		assert!(last_packet);
	}

	#[test]
	fn instance_finishes_task_only_after_every_thread_acks() {
		let mut instance = LdstInstance::new();
		instance.pending.insert(5, 2);

		assert!(!instance.note_segment_done(5));
		assert!(instance.note_segment_done(5));
	}
}

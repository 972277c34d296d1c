//! The reliable transport channel (TP): spec.md §3 "Transport Channel (TP)", §4.6.
//!
//! Grounded on `wireguard::tunnel::Peer`'s send/retransmit-timer shape (a plain struct owned by
//! the top-level actor, whose methods take `cx: CX![Simulation]` to schedule future events) and
//! on `wireguard::tunnel::window::Window` (wrapped here as [`collections::bitmap::Bitmap`]) for
//! the out-of-order receive bitmap.

use std::collections::VecDeque;
use std::time::Duration;

use bilge::prelude::*;
use collections::slab::Handle;
use headers::datalink::{DatalinkPacketHeader, CONFIG_IPV4};
use headers::ip::v4::{node_port_to_addr, Header as Ipv4Header, UdpHeader};
use headers::network::{CaqmField, Cetph, CetphTail, NetworkHeader};
use headers::transport::TransportHeader;
use log::{debug, warn};
use stakker::CX;

use crate::congestion::CongestionControl;
use crate::node::NodeHandle;
use crate::packet::{FlowTag, Packet};
use crate::Simulation;

/// TP opcode for a reliable data segment packet (spec.md §4.6 step 3).
pub const OPCODE_RELIABLE_TA: u7 = u7::new(0x00);
/// TP opcode for a cumulative ACK.
pub const OPCODE_ACK: u7 = u7::new(0x01);

const DL_LEN: usize = 4;
const IPV4_LEN: usize = 20;
const UDP_LEN: usize = 8;
const NETWORK_LEN: usize = 6;
const TP_LEN: usize = 16;
const CETPH_LEN: usize = 8;

/// The slice of one URMA WQE segment that has been assigned to this TP (spec.md §4.11 "Per-TP
/// scheduling": "stamp PSN range and MSN, push into the TP's outstanding list"). `payload` is the
/// already-built transaction-header-plus-data blob; the TP only knows how to carve it into MTU
/// chunks and wrap each chunk with the wire headers it owns.
pub struct OutstandingSegment {
	pub wqe_id: u64,
	pub task_id: u64,
	pub msn: u32,
	pub psn_start: u32,
	pub psn_count: u32,
	pub payload: Vec<u8>,
	pub sent_bytes: u32,
	pub last_packet: bool,
}

impl OutstandingSegment {
	fn total_bytes(&self) -> u32 {
		self.payload.len() as u32
	}

	fn is_complete(&self, psn_snd_una: u32) -> bool {
		psn_snd_una >= self.psn_start + self.psn_count
	}
}

struct PendingAck {
	psn_start: u32,
	psn_end: u32,
}

pub struct TransportChannel {
	pub tpn: u32,
	pub dst_tpn: u32,
	pub src_node: NodeHandle,
	pub src_port: u16,
	pub dst_node: NodeHandle,
	pub dst_port: u16,
	pub priority: u8,
	pub vl: u8,
	pub mtu: u32,

	pub psn_snd_nxt: u32,
	pub psn_snd_una: u32,
	/// Monotonically-growing count of PSN slots ever allocated to queued segments (spec.md §9
	/// open question (c): never rewound by retransmission, unlike `psn_snd_nxt`).
	pub tp_psn_cnt: u32,
	outstanding: VecDeque<OutstandingSegment>,
	inflight_cap: usize,

	rto: Duration,
	initial_rto: Duration,
	attempts_left: u32,
	retrans_exponent_factor: u32,
	retrans_armed: bool,
	pub aborted: bool,

	pub psn_recv_nxt: u32,
	recv_bitmap: collections::bitmap::Bitmap,
	ack_queue: VecDeque<PendingAck>,

	pub congestion_control: CongestionControl,
	pub use_shortest_paths: bool,
	pub use_packet_spray: bool,

	/// Guards re-entrant `scheduleWqeSegment` calls (spec.md §4.11).
	pub scheduling_in_progress: bool,
	next_msn: u32,
	/// Round-robin cursor over the jetties bound to this TP (spec.md §4.11 "Per-TP scheduling"
	/// picks fairly among jetties that share a channel).
	pub rr_cursor: usize,
}

impl TransportChannel {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		tpn: u32,
		dst_tpn: u32,
		src_node: NodeHandle,
		src_port: u16,
		dst_node: NodeHandle,
		dst_port: u16,
		priority: u8,
		vl: u8,
		mtu: u32,
		ooo_threshold: usize,
		initial_rto: Duration,
		max_retrans_attempts: u32,
		retrans_exponent_factor: u32,
		inflight_cap: usize,
		congestion_control: CongestionControl,
		use_shortest_paths: bool,
		use_packet_spray: bool,
	) -> Self {
		Self {
			tpn,
			dst_tpn,
			src_node,
			src_port,
			dst_node,
			dst_port,
			priority,
			vl,
			mtu,
			psn_snd_nxt: 0,
			psn_snd_una: 0,
			tp_psn_cnt: 0,
			outstanding: VecDeque::new(),
			inflight_cap,
			rto: initial_rto,
			initial_rto,
			attempts_left: max_retrans_attempts,
			retrans_exponent_factor,
			retrans_armed: false,
			aborted: false,
			psn_recv_nxt: 0,
			recv_bitmap: collections::bitmap::Bitmap::new(ooo_threshold),
			ack_queue: VecDeque::new(),
			congestion_control,
			use_shortest_paths,
			use_packet_spray,
			scheduling_in_progress: false,
			next_msn: 0,
			rr_cursor: 0,
		}
	}

	pub fn has_room(&self) -> bool {
		self.outstanding.len() < self.inflight_cap
	}

	/// Hands out the next MSN and advances the counter (spec.md §4.11 "stamp PSN range and MSN" —
	/// MSNs are assigned in send order and never reused, unlike PSNs on retransmit).
	pub fn next_msn(&mut self) -> u32 {
		let msn = self.next_msn;
		self.next_msn += 1;
		msn
	}

	/// Size in bytes of whatever `get_next_packet` would produce right now, or `None` if the TP
	/// has nothing to send — used by the allocator's peek pass (spec.md §4.3).
	pub fn peek_next_packet_size(&self) -> Option<u32> {
		if !self.ack_queue.is_empty() {
			return Some(ack_packet_bytes());
		}

		let segment = self.outstanding.iter().find(|s| s.sent_bytes < s.total_bytes())?;
		Some(data_packet_bytes(self.next_chunk_len(segment)))
	}

	fn next_chunk_len(&self, segment: &OutstandingSegment) -> u32 {
		(segment.total_bytes() - segment.sent_bytes).min(self.mtu)
	}
}

fn data_packet_bytes(payload: u32) -> u32 {
	(DL_LEN + IPV4_LEN + UDP_LEN + NETWORK_LEN + TP_LEN) as u32 + payload
}

fn ack_packet_bytes() -> u32 {
	(DL_LEN + IPV4_LEN + UDP_LEN + NETWORK_LEN + TP_LEN + CETPH_LEN) as u32
}

impl Simulation {
	/// Pull-model `getNextPacket()` for a TP registered with a port's allocator (spec.md §4.6
	/// "Send path"). Returns `None` when the TP has nothing admissible to send right now.
	pub fn transport_get_next_packet(&mut self, node: NodeHandle, handle: Handle<TransportChannel>) -> Option<Packet> {
		let now = self.now;
		let cc_enabled = self.config.cc_enabled;

		let controller = self.nodes[node].controller.as_mut()?;
		let tp = &mut controller.tps[handle];

		if let Some(ack) = tp.ack_queue.pop_front() {
			return Some(build_ack_packet(tp, ack));
		}

		let segment_idx = tp.outstanding.iter().position(|s| s.sent_bytes < s.total_bytes())?;
		let chunk = tp.next_chunk_len(&tp.outstanding[segment_idx]);

		if cc_enabled {
			if let Some(rest) = tp.congestion_control.get_rest_cwnd() {
				if rest < chunk {
					return None;
				}
			}
		}

		let psn = tp.psn_snd_nxt;
		let cc_field = tp.congestion_control.sender_gen_network_header(psn, chunk, now);
		tp.congestion_control.sender_update_congestion_ctrl_data(psn, chunk);

		let (msn, task_id, last_packet, body) = {
			let segment = &mut tp.outstanding[segment_idx];
			let start = segment.sent_bytes as usize;
			let body = segment.payload[start..start + chunk as usize].to_vec();
			segment.sent_bytes += chunk;
			let last_packet = segment.last_packet && segment.sent_bytes >= segment.total_bytes();
			(segment.msn, segment.task_id, last_packet, body)
		};

		tp.psn_snd_nxt += 1;
		tp.retrans_armed = true;

		let packet = build_data_packet(tp, psn, msn, &body, last_packet, cc_field, FlowTag { task_id, flow_size: body.len() as u64 });

		Some(packet)
	}

	/// Pushes a freshly-segmented WQE chunk onto `handle`'s outstanding list and arms the
	/// retransmit timer if it wasn't already running (spec.md §4.11 "Per-TP scheduling").
	pub fn transport_push_segment(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>, segment: OutstandingSegment) {
		self.sync_clock(cx);

		let needs_arm = {
			let tp = &mut self.nodes[node].controller.as_mut().unwrap().tps[handle];
			tp.tp_psn_cnt += segment.psn_count;
			tp.outstanding.push_back(segment);
			let was_armed = tp.retrans_armed;
			tp.retrans_armed = true;
			!was_armed
		};

		if needs_arm {
			self.arm_retransmit(cx, node, handle);
		}

		self.wake_tp(cx, node, handle);
	}

	/// Actually (re)arms the retransmit timer from an event callback with access to `cx`.
	fn arm_retransmit(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>) {
		let rto = self.nodes[node].controller.as_ref().unwrap().tps[handle].rto;
		let actor = cx.access_actor().clone();

		cx.after(rto, move |s| actor.apply(s, move |this, cx| this.retransmit_timeout(cx, node, handle)));
	}

	/// `ReTxTimeout` (spec.md §4.6 "Retransmit timer").
	fn retransmit_timeout(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>) {
		self.sync_clock(cx);
		let factor = self.config.retrans_exponent_factor;
		let mtu = self.config.mtu;

		let controller = self.nodes[node].controller.as_mut().expect("tp lives on an endpoint");
		let tp = &mut controller.tps[handle];

		if !tp.retrans_armed || tp.aborted || tp.outstanding.is_empty() {
			return;
		}

		if tp.attempts_left == 0 {
			tp.aborted = true;
			panic!("TP {} exhausted retransmission attempts; aborting run", tp.tpn);
		}

		tp.attempts_left -= 1;
		tp.rto = Duration::from_nanos(tp.rto.as_nanos() as u64 * (1 << factor));

		let una = tp.psn_snd_una;
		tp.psn_snd_nxt = una;

		for segment in tp.outstanding.iter_mut() {
			let start = segment.psn_start;
			let end = start + segment.psn_count;

			segment.sent_bytes = if una <= start {
				0
			} else if una >= end {
				segment.total_bytes()
			} else {
				((una - start) * mtu).min(segment.total_bytes())
			};
		}

		self.arm_retransmit(cx, node, handle);
		self.wake_tp(cx, node, handle);
	}

	/// `recvDataPacket` (spec.md §4.6 "Receive path"): called by the switch classifier once a
	/// data packet's destination TP has been resolved locally.
	pub fn transport_recv_data_packet(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>, packet: Packet) {
		self.sync_clock(cx);
		let ooo_threshold = self.config.psn_ooo_threshold;

		let (psn, size, cc_field) = {
			let mut reader = packet.reader();
			reader.split::<DatalinkPacketHeader>();
			reader.split::<Ipv4Header>();
			reader.split::<UdpHeader>();
			let net = reader.split::<NetworkHeader>();
			let cc_field = net.caqm();
			let tp_hdr = reader.split::<TransportHeader>();
			(u32::from(tp_hdr.psn()), packet.len() as u32, cc_field)
		};

		let controller = self.nodes[node].controller.as_mut().expect("tp lives on an endpoint");
		let tp = &mut controller.tps[handle];

		if psn < tp.psn_recv_nxt {
			debug!("TP {} duplicate PSN {psn}, re-emitting cumulative ACK", tp.tpn);
			enqueue_cumulative_ack(tp, tp.psn_recv_nxt, tp.psn_recv_nxt);
			self.wake_tp(cx, node, handle);
			return;
		}

		if psn - tp.psn_recv_nxt >= ooo_threshold as u32 {
			warn!("TP {} dropping out-of-window PSN {psn} (recvNxt={})", tp.tpn, tp.psn_recv_nxt);
			return;
		}

		let k = (psn - tp.psn_recv_nxt) as usize;

		if tp.recv_bitmap.test(k) {
			debug!("TP {} duplicate PSN {psn}, re-emitting cumulative ACK", tp.tpn);
			enqueue_cumulative_ack(tp, tp.psn_recv_nxt, tp.psn_recv_nxt);
			self.wake_tp(cx, node, handle);
			return;
		}

		if let Some(field) = cc_field {
			tp.congestion_control.recver_record_packet_data(psn, size, field);
		}

		tp.recv_bitmap.set(k);

		let advance = tp.recv_bitmap.leading_run();

		if advance == 0 {
			return;
		}

		let old_nxt = tp.psn_recv_nxt;
		tp.psn_recv_nxt += advance as u32;
		tp.recv_bitmap.shift(advance);

		enqueue_cumulative_ack(tp, old_nxt, tp.psn_recv_nxt);
		self.wake_tp(cx, node, handle);
	}

	/// `recvTpAck` (spec.md §4.6 "ACK receive").
	pub fn transport_recv_ack(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>, packet: Packet) {
		self.sync_clock(cx);
		let now = self.now;
		let max_attempts = self.config.max_retrans_attempts;

		let (psn, tail) = {
			let mut reader = packet.reader();
			reader.split::<DatalinkPacketHeader>();
			reader.split::<Ipv4Header>();
			reader.split::<UdpHeader>();
			reader.split::<NetworkHeader>();
			let tp_hdr = reader.split::<TransportHeader>();
			let cetph = reader.split::<Cetph>();
			(u32::from(tp_hdr.psn()), cetph.tail())
		};

		let controller = self.nodes[node].controller.as_mut().expect("tp lives on an endpoint");
		let tp = &mut controller.tps[handle];

		let outcome = tp.congestion_control.sender_recv_ack(psn, tail, now);
		tp.psn_snd_una = tp.psn_snd_una.max(psn + 1);

		let mut finished = Vec::new();

		while let Some(segment) = tp.outstanding.front() {
			if segment.is_complete(tp.psn_snd_una) {
				let segment = tp.outstanding.pop_front().unwrap();
				finished.push((segment.task_id, segment.wqe_id, segment.last_packet));
			} else {
				break;
			}
		}

		tp.rto = tp.initial_rto;
		tp.attempts_left = max_attempts;
		tp.retrans_armed = !tp.outstanding.is_empty();

		if tp.retrans_armed {
			self.arm_retransmit(cx, node, handle);
		}

		if let Some(reset_deadline) = outcome.reset_deadline {
			self.arm_cc_reset(cx, node, handle, reset_deadline);
		}

		self.wake_tp(cx, node, handle);

		for (task_id, wqe_id, last_packet) in finished {
			self.urma_segment_acked(cx, node, handle, wqe_id, last_packet, task_id);
		}
	}

	fn arm_cc_reset(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>, after: Duration) {
		let actor = cx.access_actor().clone();

		cx.after(after, move |s| {
			actor.apply(s, move |this, _cx| {
				if let Some(controller) = this.nodes[node].controller.as_mut() {
					controller.tps[handle].congestion_control.force_slow_start();
				}
			})
		});
	}

	/// Wakes the port this TP is registered with so the allocator re-pulls from it, and gives the
	/// jetty layer a chance to fill any outstanding-list room that just freed up (spec.md §4.11
	/// "Per-TP scheduling").
	fn wake_tp(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>) {
		let port = self.nodes[node].controller.as_ref().unwrap().tps[handle].src_port;
		self.trigger_allocator(cx, node, port);
		self.urma_schedule_wqe_segment(cx, node, handle);
	}
}

fn enqueue_cumulative_ack(tp: &mut TransportChannel, start: u32, end: u32) {
	tp.ack_queue.push_back(PendingAck { psn_start: start, psn_end: end });
}

fn build_data_packet(tp: &TransportChannel, psn: u32, msn: u32, body: &[u8], last_packet: bool, cc_field: Option<CaqmField>, flow: FlowTag) -> Packet {
	let cap = DL_LEN + IPV4_LEN + UDP_LEN + NETWORK_LEN + TP_LEN + body.len();

	Packet::build(cap, flow, |cursor| {
		let (dl, cursor) = cursor.split::<DatalinkPacketHeader>();
		*dl = DatalinkPacketHeader::new(CONFIG_IPV4, tp.use_shortest_paths, tp.use_packet_spray, u4::new(tp.vl), u4::new(0), false, false);

		let src_ip = node_port_to_addr(tp.src_node.raw() as u32, tp.src_port as u8);
		let dst_ip = node_port_to_addr(tp.dst_node.raw() as u32, tp.dst_port as u8);
		let after_ip = (UDP_LEN + NETWORK_LEN + TP_LEN + body.len()) as u16;

		let (ip, cursor) = cursor.split::<Ipv4Header>();
		*ip = Ipv4Header::new(src_ip, dst_ip, after_ip, tp.priority);

		let after_udp = (NETWORK_LEN + TP_LEN + body.len()) as u16;
		let (udp, cursor) = cursor.split::<UdpHeader>();
		*udp = UdpHeader::new(tp.src_port, tp.dst_port, after_udp);

		let (net, cursor) = cursor.split::<NetworkHeader>();
		*net = NetworkHeader::new(headers::network::CcMode::Caqm, u13::new(0), u25::new(0));

		if let Some(field) = cc_field {
			net.set_caqm(field);
		}

		let (tph, cursor) = cursor.split::<TransportHeader>();
		*tph = TransportHeader::new(last_packet, OPCODE_RELIABLE_TA, u24::new(tp.tpn), u24::new(tp.dst_tpn), last_packet, u24::new(psn), u24::new(msn));

		cursor.push(body);
	})
}

fn build_ack_packet(tp: &mut TransportChannel, ack: PendingAck) -> Packet {
	let tail = tp.congestion_control.recver_gen_ack_cetph_header(ack.psn_start, ack.psn_end).unwrap_or(CetphTail::new(false, false, 0, 0));

	let cap = DL_LEN + IPV4_LEN + UDP_LEN + NETWORK_LEN + TP_LEN + CETPH_LEN;

	Packet::build(cap, FlowTag { task_id: 0, flow_size: 0 }, |cursor| {
		let (dl, cursor) = cursor.split::<DatalinkPacketHeader>();
		*dl = DatalinkPacketHeader::new(CONFIG_IPV4, tp.use_shortest_paths, false, u4::new(tp.vl), u4::new(0), true, false);

		let src_ip = node_port_to_addr(tp.src_node.raw() as u32, tp.src_port as u8);
		let dst_ip = node_port_to_addr(tp.dst_node.raw() as u32, tp.dst_port as u8);
		let after_ip = (UDP_LEN + NETWORK_LEN + TP_LEN + CETPH_LEN) as u16;

		let (ip, cursor) = cursor.split::<Ipv4Header>();
		*ip = Ipv4Header::new(src_ip, dst_ip, after_ip, tp.priority);

		let after_udp = (NETWORK_LEN + TP_LEN + CETPH_LEN) as u16;
		let (udp, cursor) = cursor.split::<UdpHeader>();
		*udp = UdpHeader::new(tp.src_port, tp.dst_port, after_udp);

		let (net, cursor) = cursor.split::<NetworkHeader>();
		*net = NetworkHeader::new(headers::network::CcMode::Caqm, u13::new(0), u25::new(0));

		let (tph, cursor) = cursor.split::<TransportHeader>();
		*tph = TransportHeader::new(true, OPCODE_ACK, u24::new(tp.dst_tpn), u24::new(tp.tpn), false, u24::new(ack.psn_end.saturating_sub(1)), u24::new(0));

		let (ce, _cursor) = cursor.split::<Cetph>();
		*ce = Cetph::new(ack.psn_start, tail);
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_tp(src: NodeHandle, dst: NodeHandle) -> TransportChannel {
		TransportChannel::new(
			1,
			2,
			src,
			0,
			dst,
			0,
			0,
			0,
			1024,
			2048,
			Duration::from_nanos(25_600),
			7,
			1,
			64,
			CongestionControl::None,
			true,
			false,
		)
	}

	#[test]
	fn segment_completion_uses_una_invariant() {
		let segment = OutstandingSegment { wqe_id: 0, task_id: 0, msn: 0, psn_start: 10, psn_count: 5, payload: vec![0; 64], sent_bytes: 0, last_packet: true };
		assert!(!segment.is_complete(14));
		assert!(segment.is_complete(15));
	}

	#[test]
	fn peek_reports_ack_before_data() {
		let mut reg = collections::slab::Registry::new();
		let a = reg.insert(());
		let mut tp = test_tp(a, a);
		tp.outstanding.push_back(OutstandingSegment { wqe_id: 0, task_id: 0, msn: 0, psn_start: 0, psn_count: 1, payload: vec![0; 64], sent_bytes: 0, last_packet: true });
		assert!(tp.peek_next_packet_size().is_some());

		tp.ack_queue.push_back(PendingAck { psn_start: 0, psn_end: 1 });
		assert_eq!(tp.peek_next_packet_size(), Some(ack_packet_bytes()));
	}

	#[test]
	fn next_chunk_len_caps_at_mtu() {
		let mut reg = collections::slab::Registry::new();
		let a = reg.insert(());
		let tp = test_tp(a, a);
		let segment = OutstandingSegment { wqe_id: 0, task_id: 0, msn: 0, psn_start: 0, psn_count: 2, payload: vec![0; 2000], sent_bytes: 0, last_packet: true };
		assert_eq!(tp.next_chunk_len(&segment), 1024);
	}
}

//! The URMA transaction layer: jetties, WQE segmentation, and ROI ordering (spec.md §4.11).
//!
//! Grounded on `transport.rs`'s `OutstandingSegment`/`scheduling_in_progress` shape — a jetty does
//! not send anything itself, it only carves a WQE into segments and hands each one to
//! [`crate::Simulation::transport_push_segment`] the same way a hand-rolled TP client would. Segment
//! completion is signalled by the TP's own cumulative-ACK path (`transport.rs`'s
//! `transport_recv_ack` already calls `urma_segment_acked` once per finished `OutstandingSegment`),
//! so this module needs no response opcode or wire state of its own (spec.md §9 open question (b)).

use std::collections::VecDeque;

use collections::map::HashMap;
use collections::slab::Handle;
use headers::transaction::{CompactTransactionHeader, OrderType};
use stakker::CX;

use crate::node::NodeHandle;
use crate::transport::{OutstandingSegment, TransportChannel};
use crate::Simulation;

/// Transaction opcode for a WQE data segment. Every segment after the first rides the compact
/// transaction header (spec.md §9 open question (b): ordering never needs to be wire-visible,
/// since only the sending jetty enforces it), so there is no distinct full/compact pair here.
const TA_OPCODE_WRITE: u8 = 0x01;

/// One MTU-alignment-sized slice of a WQE, queued until its turn comes to be handed to a TP
/// (spec.md §4.11 "segments it into `UbWqeSegment`s at MTU alignment").
struct WqeSegment {
	task_id: u64,
	order_type: OrderType,
	payload: Vec<u8>,
}

/// A per-endpoint send queue bound to one or more transport channels (spec.md §3 "Jetty"). Several
/// jetties may share a TP; `urma_schedule_wqe_segment` round-robins fairly among them.
pub struct Jetty {
	pub id: u32,
	pub tps: Vec<Handle<TransportChannel>>,
	pending_segments: VecDeque<WqeSegment>,
	/// FIFO of RELAX/STRONG wqe ids (== task ids) awaiting completion, oldest first (spec.md §4.11
	/// "Ordering (ROI)"). A segment whose `order_type == None` may jump ahead of a blocked RELAX/
	/// STRONG head; §8's ROI property only constrains RELAX/STRONG relative to each other.
	order_fifo: VecDeque<u64>,
	/// `wqe_id -> segments not yet acked`, so a WQE split into several segments only finishes once
	/// every one of them has cleared.
	remaining_segments: HashMap<u64, u32>,
	next_tassn: u16,
}

impl Jetty {
	fn new(id: u32, tps: Vec<Handle<TransportChannel>>) -> Self {
		Self { id, tps, pending_segments: VecDeque::new(), order_fifo: VecDeque::new(), remaining_segments: HashMap::default(), next_tassn: 0 }
	}

	fn take_ready_segment(&mut self) -> Option<WqeSegment> {
		let idx = self.pending_segments.iter().position(|s| match s.order_type {
			OrderType::None => true,
			_ => self.order_fifo.front() == Some(&s.task_id),
		})?;

		self.pending_segments.remove(idx)
	}
}

impl Simulation {
	/// Creates a jetty on `node` bound to `tps`, returning its handle for the caller (today, only
	/// the configuration loader) to register against a destination in `Controller::jetty_by_dst`.
	pub fn create_jetty(&mut self, node: NodeHandle, id: u32, tps: Vec<Handle<TransportChannel>>) -> Handle<Jetty> {
		let controller = self.nodes[node].controller.as_mut().expect("jetty requires an endpoint controller");
		controller.jetties.insert(Jetty::new(id, tps))
	}

	/// `pushWqeToJetty` (spec.md §4.11): segments `total_bytes` at `wqe_segment_max_bytes`
	/// alignment, queues every segment on the jetty, and kicks scheduling on every TP it is bound
	/// to.
	pub fn push_wqe_to_jetty(&mut self, cx: CX![], node: NodeHandle, jetty: Handle<Jetty>, task_id: u64, total_bytes: u32, order_type: OrderType) {
		self.sync_clock(cx);
		let max_bytes = self.config.wqe_segment_max_bytes;
		let num_segments = total_bytes.div_ceil(max_bytes).max(1);

		let tps = {
			let controller = self.nodes[node].controller.as_mut().unwrap();
			let j = &mut controller.jetties[jetty];

			j.remaining_segments.insert(task_id, num_segments);

			if order_type != OrderType::None {
				j.order_fifo.push_back(task_id);
			}

			let mut remaining = total_bytes;

			for _ in 0..num_segments {
				let size = remaining.min(max_bytes);
				remaining -= size;

				let tassn = j.next_tassn;
				j.next_tassn = j.next_tassn.wrapping_add(1);

				let header = CompactTransactionHeader::new(TA_OPCODE_WRITE, tassn);
				let header_bytes: &[u8] = utils::bytes::as_slice(&header);
				let mut payload = header_bytes.to_vec();
				payload.resize(payload.len() + size as usize, 0);

				j.pending_segments.push_back(WqeSegment { task_id, order_type, payload });
			}

			j.tps.clone()
		};

		for tp in tps {
			self.urma_schedule_wqe_segment(cx, node, tp);
		}
	}

	/// `scheduleWqeSegment` (spec.md §4.11 "Per-TP scheduling"): round-robins among the jetties
	/// sharing `handle`, picks the first one with a ready segment, and stamps PSN/MSN before
	/// handing it to the TP.
	pub fn urma_schedule_wqe_segment(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>) {
		self.sync_clock(cx);

		let blocked = {
			let controller = self.nodes[node].controller.as_ref().unwrap();
			let tp = &controller.tps[handle];
			tp.scheduling_in_progress || !tp.has_room()
		};

		if blocked {
			return;
		}

		self.nodes[node].controller.as_mut().unwrap().tps[handle].scheduling_in_progress = true;

		let picked = {
			let controller = self.nodes[node].controller.as_mut().unwrap();
			let candidates: Vec<Handle<Jetty>> = controller.jetties.iter().filter(|(_, j)| j.tps.contains(&handle)).map(|(h, _)| h).collect();

			if candidates.is_empty() {
				None
			} else {
				let cursor = controller.tps[handle].rr_cursor;
				let mut found = None;

				for i in 0..candidates.len() {
					let jetty_handle = candidates[(cursor + i) % candidates.len()];

					if let Some(segment) = controller.jetties[jetty_handle].take_ready_segment() {
						found = Some((segment, (cursor + i + 1) % candidates.len()));
						break;
					}
				}

				found
			}
		};

		self.nodes[node].controller.as_mut().unwrap().tps[handle].scheduling_in_progress = false;

		let Some((segment, next_cursor)) = picked else { return };

		let (psn_start, msn, mtu) = {
			let tp = &mut self.nodes[node].controller.as_mut().unwrap().tps[handle];
			tp.rr_cursor = next_cursor;
			(tp.tp_psn_cnt, tp.next_msn(), tp.mtu)
		};

		let psn_count = (segment.payload.len() as u32).div_ceil(mtu).max(1);

		self.transport_push_segment(
			cx,
			node,
			handle,
			OutstandingSegment { wqe_id: segment.task_id, task_id: segment.task_id, msn, psn_start, psn_count, payload: segment.payload, sent_bytes: 0, last_packet: true },
		);
	}

	/// `urmaSegmentAcked` (spec.md §4.11): called from `transport.rs`'s ACK-receive path once a
	/// segment's PSN range has cumulatively cleared. Finishes the owning task once every segment of
	/// its WQE has cleared, then gives the TP a chance to schedule its next segment.
	pub fn urma_segment_acked(&mut self, cx: CX![], node: NodeHandle, handle: Handle<TransportChannel>, wqe_id: u64, _last_packet: bool, task_id: u64) {
		self.sync_clock(cx);

		let finished = {
			let controller = self.nodes[node].controller.as_mut().unwrap();
			let mut finished = false;

			for (_, jetty) in controller.jetties.iter_mut() {
				if let Some(count) = jetty.remaining_segments.get_mut(&wqe_id) {
					*count -= 1;

					if *count == 0 {
						jetty.remaining_segments.remove(&wqe_id);
						jetty.order_fifo.retain(|&id| id != wqe_id);
						finished = true;
					}

					break;
				}
			}

			finished
		};

		if finished {
			self.on_task_finished(cx, task_id);
		}

		self.urma_schedule_wqe_segment(cx, node, handle);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_jetty() -> Jetty {
		Jetty::new(1, Vec::new())
	}

	#[test]
	fn unordered_segment_skips_blocked_strong_head() {
		let mut jetty = test_jetty();
		jetty.order_fifo.push_back(1);
		jetty.pending_segments.push_back(WqeSegment { task_id: 1, order_type: OrderType::Strong, payload: vec![0; 4] });
		jetty.pending_segments.push_back(WqeSegment { task_id: 2, order_type: OrderType::None, payload: vec![0; 4] });

		// wqe 1 hasn't been pushed to the front of another jetty's fifo, but it's already at the
		// front of this one, so it is itself ready; the unordered segment 2 is ready regardless.
		let first = jetty.take_ready_segment().unwrap();
		assert_eq!(first.task_id, 1);
	}

	#[test]
	fn strong_segment_waits_behind_an_earlier_unfinished_wqe() {
		let mut jetty = test_jetty();
		jetty.order_fifo.push_back(1);
		jetty.order_fifo.push_back(2);
		jetty.pending_segments.push_back(WqeSegment { task_id: 2, order_type: OrderType::Strong, payload: vec![0; 4] });
		jetty.pending_segments.push_back(WqeSegment { task_id: 3, order_type: OrderType::None, payload: vec![0; 4] });

		let first = jetty.take_ready_segment().unwrap();
		assert_eq!(first.task_id, 3, "unordered segment 3 is ready even though strong wqe 2 is blocked behind 1");
		assert!(jetty.take_ready_segment().is_none(), "wqe 2 still isn't at the front of order_fifo");
	}
}

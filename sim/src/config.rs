//! Resolved simulation parameters (spec.md §6's attribute store, after typed lookup).
//!
//! Grounded on `wireguard::tunnel::timers::Timers`' constant-bag idiom: plain fields with
//! spec-given defaults, populated once at load time from `ub-sim-cli`'s `KvStore` and then read
//! by value everywhere else in the crate (see `voq.rs`'s `self.config.vl_num`).

use std::time::Duration;

use crate::congestion::caqm::CaqmParams;
use crate::flow::cbfc::CbfcConfig;
use crate::flow::pfc::PfcConfig;

/// Which end-to-end congestion control algorithm is wired up (`UB_CC_ALGO`). Only `Caqm` is
/// simulated; `Ldcp`/`Dcqcn` are declared plug-in slots (spec.md §1 Non-goal).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CcAlgo {
	Caqm,
	Ldcp,
	Dcqcn,
}

/// Which link-local flow control engine every port runs (spec.md §4.8/§4.9 are alternatives,
/// not simultaneous).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowControlAlgo {
	Cbfc,
	Pfc,
	None,
}

pub struct SimConfig {
	/// `UB_VL_NUM`: number of virtual lanes in `[1, 16]`.
	pub vl_num: usize,
	/// `UB_PRIORITY_NUM`.
	pub priority_num: usize,
	/// Allocator-to-egress handoff delay (spec.md §4.3), typically 10 ns.
	pub allocation_time: Duration,
	/// Maximum payload bytes per data packet.
	pub mtu: u32,
	/// `UB_CC_ENABLED`.
	pub cc_enabled: bool,
	pub cc_algo: CcAlgo,
	pub caqm: CaqmParams,
	pub flow_control_algo: FlowControlAlgo,
	pub cbfc: CbfcConfig,
	pub pfc: PfcConfig,
	/// Per-`(port, vl)` ingress admission buffer, default 2 MiB (spec.md §4.2).
	pub queue_buffer_size: u32,
	/// Initial retransmission timeout (spec.md §4.6), default 25,600 ns.
	pub initial_rto: Duration,
	/// Hard attempt cap before a TP is aborted, default 7.
	pub max_retrans_attempts: u32,
	/// Left-shift applied to `rto` on every timeout, default 1.
	pub retrans_exponent_factor: u32,
	/// Width of a TP's `recvPsnBitset`, default 2048.
	pub psn_ooo_threshold: usize,
	/// Width of a jetty's out-of-order-ACK bitmap, default 2048.
	pub tassn_ooo_threshold: usize,
	/// Per-TP in-flight segment cap (bounds how many WQE segments may be outstanding at once).
	pub tp_inflight_cap: usize,
	/// Number of LDST threads per endpoint instance, default 48.
	pub ldst_threads: usize,
	/// Default exponent for `64 * 2^length` LDST packet sizing.
	pub ldst_req_length: u8,
	/// MTU-aligned upper bound on a single URMA WQE segment's byte length (spec.md §4.11
	/// "segments it into `UbWqeSegment`s at MTU alignment"); each segment becomes one TP
	/// `OutstandingSegment`, itself carved into MTU-sized wire packets by the TP.
	pub wqe_segment_max_bytes: u32,
	/// Per-LDST-thread in-flight request cap (bounds how many data packets a thread may have
	/// outstanding before it stops pumping its store/load queue).
	pub ldst_inflight_cap: u32,
	pub use_shortest_path: bool,
	pub use_packet_spray: bool,
	pub record_pkt_trace: bool,
	pub trace_enable: bool,
	pub parse_trace_enable: bool,
	pub fault_enable: bool,
}

impl Default for SimConfig {
	fn default() -> Self {
		Self {
			vl_num: 8,
			priority_num: 8,
			allocation_time: Duration::from_nanos(10),
			mtu: 1024,
			cc_enabled: false,
			cc_algo: CcAlgo::Caqm,
			caqm: CaqmParams::default(),
			flow_control_algo: FlowControlAlgo::Cbfc,
			cbfc: CbfcConfig::default(),
			pfc: PfcConfig { hi: 200_000, lo: 50_000 },
			queue_buffer_size: crate::queue::DEFAULT_BUFFER_SIZE,
			initial_rto: Duration::from_nanos(25_600),
			max_retrans_attempts: 7,
			retrans_exponent_factor: 1,
			psn_ooo_threshold: 2048,
			tassn_ooo_threshold: 2048,
			tp_inflight_cap: 64,
			ldst_threads: 48,
			ldst_req_length: 4,
			wqe_segment_max_bytes: 16 * 1024,
			ldst_inflight_cap: 64,
			use_shortest_path: true,
			use_packet_spray: false,
			record_pkt_trace: false,
			trace_enable: false,
			parse_trace_enable: false,
			fault_enable: false,
		}
	}
}

//! Node, port, and link types (spec.md §3 "Node"/"Port"/"Link").
//!
//! Grounded on `wireguard::tunnel::Peer`'s plain-owned-state shape: nodes, ports, and links are
//! data owned by the top-level `Simulation` actor, addressed by [`Handle`], not actors
//! themselves — only `Simulation` schedules events (§9's ownership-graph notes: "a
//! reimplementation should express these with strong single-owner links down the tree and weak
//! back-references... upward").

use std::collections::VecDeque;
use std::time::Duration;

use collections::slab::{Handle, Registry};

use crate::congestion::SwitchCongestionControl;
use crate::flow::FlowControl;
use crate::ldst::LdstInstance;
use crate::packet::Packet;
use crate::queue::QueueManager;
use crate::routing::RoutingTable;
use crate::transport::TransportChannel;
use crate::urma::Jetty;
use crate::voq::{Allocator, VoqFabric};

pub type NodeHandle = Handle<Node>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
	Endpoint,
	Switch,
}

/// A port's transmit-side finite state machine (spec.md §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortState {
	Ready,
	Busy,
	Allocating,
}

/// A duplex wire between exactly two ports (spec.md §3 "Link"). Stored on the transmitting side
/// only; the peer port is addressed by handle + index, never by a shared owning pointer.
#[derive(Clone, Copy)]
pub struct Link {
	pub peer_node: NodeHandle,
	pub peer_port: u16,
	pub delay: Duration,
	/// Cleared for the duration of a `Shutdown` fault window (spec.md §6 `fault.csv`).
	pub up: bool,
}

pub struct Port {
	pub index: u16,
	/// Line rate in bits per second.
	pub rate: u64,
	pub interframe_gap: Duration,
	pub state: PortState,
	pub egress: VecDeque<Packet>,
	pub allocator: Allocator,
	pub flow_control: FlowControl,
	/// Switch-side CAQM counters for packets forwarded out of this port (spec.md §4.7
	/// "Switch"); inert on endpoint ports, since `on_forward` is only ever called by
	/// `Simulation::forward`.
	pub switch_cc: SwitchCongestionControl,
	pub link: Option<Link>,
}

impl Port {
	pub fn new(index: u16, rate: u64, interframe_gap: Duration, flow_control: FlowControl, switch_cc: SwitchCongestionControl) -> Self {
		Self {
			index,
			rate,
			interframe_gap,
			state: PortState::Ready,
			egress: VecDeque::new(),
			allocator: Allocator::default(),
			flow_control,
			switch_cc,
			link: None,
		}
	}
}

/// The classifier/forwarder every switch node owns (spec.md §4.5).
pub struct Switch {
	pub voq: VoqFabric,
	pub routing: RoutingTable,
}

/// The TP/jetty/LDST owner every endpoint node owns (spec.md §3 "one controller... that owns TP
/// channels and the URMA/LDST functions").
pub struct Controller {
	pub tps: Registry<TransportChannel>,
	pub tp_by_tpn: collections::map::HashMap<u32, Handle<TransportChannel>>,
	pub jetties: Registry<Jetty>,
	/// Which jetty carries URMA traffic bound for a given `(dstNodeId, priority)` (spec.md §4.11);
	/// populated once per jetty at configuration-load time, consulted by `dispatch_traffic`.
	pub jetty_by_dst: collections::map::HashMap<(u32, u8), Handle<Jetty>>,
	pub ldst: Option<LdstInstance>,
}

impl Controller {
	pub fn new() -> Self {
		Self { tps: Registry::new(), tp_by_tpn: Default::default(), jetties: Registry::new(), jetty_by_dst: Default::default(), ldst: None }
	}
}

impl Default for Controller {
	fn default() -> Self {
		Self::new()
	}
}

pub struct Node {
	pub id: u32,
	pub kind: NodeKind,
	pub ports: Vec<Port>,
	pub switch: Option<Switch>,
	pub controller: Option<Controller>,
	pub queue_manager: QueueManager,
	/// Optional extra per-hop forwarding delay from `node.csv`'s `forwardDelay` column.
	pub forward_delay: Duration,
}

impl Node {
	pub fn new_endpoint(id: u32, port_count: usize, vl_num: usize, buffer_size: u32) -> Self {
		Self {
			id,
			kind: NodeKind::Endpoint,
			ports: Vec::with_capacity(port_count),
			switch: None,
			controller: Some(Controller::new()),
			queue_manager: QueueManager::new(port_count, vl_num, buffer_size),
			forward_delay: Duration::ZERO,
		}
	}

	pub fn new_switch(id: u32, port_count: usize, vl_num: usize, buffer_size: u32) -> Self {
		Self {
			id,
			kind: NodeKind::Switch,
			ports: Vec::with_capacity(port_count),
			switch: Some(Switch { voq: VoqFabric::new(port_count, vl_num, port_count), routing: RoutingTable::new() }),
			controller: None,
			queue_manager: QueueManager::new(port_count, vl_num, buffer_size),
			forward_delay: Duration::ZERO,
		}
	}
}

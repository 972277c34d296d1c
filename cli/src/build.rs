//! Turns a [`LoadedConfig`] into a fully wired [`sim::Simulation`]: nodes, links, routing tables,
//! transport channels (+ their auto-bound jetties), LDST instances, the fault injector, and the
//! traffic task graph.
//!
//! Grounded on `sim::node`/`sim::voq`/`sim::transport`'s own constructors — this module is purely
//! plumbing that calls them in the right order, the way a `main.rs` would if the teacher had one
//! (see `DESIGN.md`).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use collections::map::HashMap as FastMap;
use sim::config::{CcAlgo, FlowControlAlgo, SimConfig};
use sim::congestion::caqm::CaqmSwitchPort;
use sim::congestion::{CongestionControl, SwitchCongestionControl};
use sim::fault::{Fault, FaultInjector, FaultKind};
use sim::flow::cbfc::{Cbfc, CbfcConfig};
use sim::flow::pfc::{Pfc, PfcConfig};
use sim::flow::FlowControl;
use sim::node::{Link, Node, NodeHandle, Port};
use sim::traffic::{OpType, TaskScheduler, TrafficRecord};
use sim::transport::TransportChannel;
use sim::Simulation;
use stakker::CX;

use crate::config::{FaultRow, KvStore, LoadedConfig};

/// Translates the attribute store into [`SimConfig`] (spec.md §6 "Attribute configuration").
/// Anything the store doesn't mention keeps `SimConfig::default()`'s value.
pub fn build_config(attrs: &KvStore) -> Result<SimConfig> {
	let mut config = SimConfig::default();

	config.vl_num = attrs.get_u32("UB_VL_NUM", config.vl_num as u32)? as usize;
	config.priority_num = attrs.get_u32("UB_PRIORITY_NUM", config.priority_num as u32)? as usize;
	config.mtu = attrs.get_u32("UB_MTU", config.mtu)?;
	config.cc_enabled = attrs.get_bool("UB_CC_ENABLED", config.cc_enabled)?;
	config.record_pkt_trace = attrs.get_bool("UB_RECORD_PKT_TRACE", config.record_pkt_trace)?;
	config.trace_enable = attrs.get_bool("UB_TRACE_ENABLE", config.trace_enable)?;
	config.parse_trace_enable = attrs.get_bool("UB_PARSE_TRACE_ENABLE", config.parse_trace_enable)?;
	config.fault_enable = attrs.get_bool("UB_FAULT_ENABLE", config.fault_enable)?;
	config.use_shortest_path = attrs.get_bool("UB_USE_SHORTEST_PATH", config.use_shortest_path)?;
	config.use_packet_spray = attrs.get_bool("UB_USE_PACKET_SPRAY", config.use_packet_spray)?;

	config.cc_algo = match attrs.get_str("UB_CC_ALGO") {
		None => config.cc_algo,
		Some("CAQM") => CcAlgo::Caqm,
		Some("LDCP") => CcAlgo::Ldcp,
		Some("DCQCN") => CcAlgo::Dcqcn,
		Some(other) => bail!("UB_CC_ALGO={other} is not one of CAQM, LDCP, DCQCN"),
	};

	config.flow_control_algo = match attrs.get_str("UB_FLOW_CONTROL") {
		None => config.flow_control_algo,
		Some("CBFC") => FlowControlAlgo::Cbfc,
		Some("PFC") => FlowControlAlgo::Pfc,
		Some("NONE") => FlowControlAlgo::None,
		Some(other) => bail!("UB_FLOW_CONTROL={other} is not one of CBFC, PFC, NONE"),
	};

	config.caqm.alpha = attrs.get_f64("UbCaqm::UbCaqmAlpha", config.caqm.alpha)?;
	config.caqm.beta = attrs.get_f64("UbCaqm::UbCaqmBeta", config.caqm.beta)?;
	config.caqm.gamma = attrs.get_f64("UbCaqm::UbCaqmGamma", config.caqm.gamma)?;
	config.caqm.lambda = attrs.get_f64("UbCaqm::UbCaqmLambda", config.caqm.lambda)?;
	config.caqm.qt = attrs.get_u32("UbCaqm::UbCaqmQt", config.caqm.qt)?;
	config.caqm.mtu = config.mtu;

	config.queue_buffer_size = attrs.get_u32("UbPort::CbfcInitCreditCell", config.queue_buffer_size)?;
	config.ldst_threads = attrs.get_u32("UB_LDST_THREADS", config.ldst_threads as u32)? as usize;
	config.ldst_inflight_cap = attrs.get_u32("UB_LDST_INFLIGHT_CAP", config.ldst_inflight_cap)?;

	Ok(config)
}

/// Default inter-frame gap applied to every port; spec.md §6 names no attribute for it, so it is
/// only overridable through `UB_INTERFRAME_GAP_NS`.
fn interframe_gap(attrs: &KvStore) -> Result<Duration> {
	Ok(Duration::from_nanos(attrs.get_u64("UB_INTERFRAME_GAP_NS", 0)?))
}

fn new_flow_control(config: &SimConfig) -> FlowControl {
	match config.flow_control_algo {
		FlowControlAlgo::Cbfc => FlowControl::Cbfc(Cbfc::new(CbfcConfig {
			flit_len: config.cbfc.flit_len,
			flits_per_cell: config.cbfc.flits_per_cell,
			grain: config.cbfc.grain,
			init_credit: config.cbfc.init_credit,
		})),
		FlowControlAlgo::Pfc => FlowControl::Pfc(Pfc::new(PfcConfig { hi: config.pfc.hi, lo: config.pfc.lo })),
		FlowControlAlgo::None => FlowControl::None,
	}
}

fn new_switch_cc(config: &SimConfig) -> SwitchCongestionControl {
	match (config.cc_enabled, config.cc_algo) {
		(true, CcAlgo::Caqm) => SwitchCongestionControl::Caqm(CaqmSwitchPort::default()),
		(true, _) => SwitchCongestionControl::Reserved,
		(false, _) => SwitchCongestionControl::None,
	}
}

fn new_congestion_control(config: &SimConfig) -> CongestionControl {
	match (config.cc_enabled, config.cc_algo) {
		(true, CcAlgo::Caqm) => CongestionControl::Caqm(sim::congestion::caqm::Caqm::new(config.caqm)),
		(true, _) => CongestionControl::Reserved,
		(false, _) => CongestionControl::None,
	}
}

fn new_port(index: u16, config: &SimConfig, gap: Duration) -> Port {
	Port::new(index, 1, gap, new_flow_control(config), new_switch_cc(config))
}

/// Populates `sim` from `loaded` and kicks off the run (traffic dispatch + CAQM periodic
/// updates). Called once, from inside the top-level actor's `apply` closure in `main.rs`.
pub fn populate(sim: &mut Simulation, cx: CX![], loaded: &LoadedConfig) -> Result<()> {
	let gap = interframe_gap(&loaded.attrs)?;

	create_nodes(sim, loaded, gap)?;
	wire_topology(sim, loaded)?;
	register_switch_voq_sources(sim, loaded);
	install_routing(sim, loaded)?;
	create_ldst_instances(sim, loaded);
	create_transport_channels(sim, loaded)?;
	install_fault_injector(sim, loaded)?;
	install_traffic(sim, loaded)?;

	sim.start_traffic(cx);
	sim.arm_caqm_periodic(cx);

	Ok(())
}

fn create_nodes(sim: &mut Simulation, loaded: &LoadedConfig, gap: Duration) -> Result<()> {
	for row in &loaded.nodes {
		for id in row.expand()? {
			let mut node = if row.is_switch {
				Node::new_switch(id, row.port_count, sim.config.vl_num, sim.config.queue_buffer_size)
			} else {
				Node::new_endpoint(id, row.port_count, sim.config.vl_num, sim.config.queue_buffer_size)
			};

			node.forward_delay = Duration::from_nanos(row.forward_delay_ns);

			for p in 0..row.port_count as u16 {
				node.ports.push(new_port(p, &sim.config, gap));
			}

			let handle = sim.nodes.insert(node);
			sim.node_by_id.insert(id, handle);
		}
	}

	Ok(())
}

fn wire_topology(sim: &mut Simulation, loaded: &LoadedConfig) -> Result<()> {
	for row in &loaded.topology {
		let a = sim.node_handle(row.node_a);
		let b = sim.node_handle(row.node_b);
		let delay = Duration::from_nanos(row.delay_ns);

		{
			let port = port_mut(sim, a, row.port_a)?;
			port.rate = row.bandwidth_bps;
			port.link = Some(Link { peer_node: b, peer_port: row.port_b, delay, up: true });
		}

		{
			let port = port_mut(sim, b, row.port_b)?;
			port.rate = row.bandwidth_bps;
			port.link = Some(Link { peer_node: a, peer_port: row.port_a, delay, up: true });
		}
	}

	Ok(())
}

fn port_mut(sim: &mut Simulation, node: NodeHandle, port: u16) -> Result<&mut Port> {
	sim.nodes[node].ports.get_mut(port as usize).ok_or_else(|| anyhow!("port {port} out of range for node"))
}

/// Registers every `(outPort, vl)` allocator with one `Voq{inPort}` ingress source per physical
/// input port on a switch (spec.md §3: "only switches consume" the VOQ fabric). The VOQ's own
/// `peek_source` already walks VLs internally to find the lowest-numbered one with data for a
/// given input port, so which `vl` bucket a source is registered under only selects which
/// allocator queue arbitrates it against the node's other ingress ports.
fn register_switch_voq_sources(sim: &mut Simulation, loaded: &LoadedConfig) {
	for row in &loaded.nodes {
		if !row.is_switch {
			continue;
		}

		let Ok(ids) = row.expand() else { continue };
		let vl_num = sim.config.vl_num;

		for id in ids {
			let node = sim.node_handle(id);
			let port_count = sim.nodes[node].ports.len();

			for out_port in 0..port_count as u16 {
				for vl in 0..vl_num as u8 {
					for in_port in 0..port_count as u16 {
						sim.nodes[node].ports[out_port as usize].allocator.register(vl, sim::voq::IngressSource::Voq { in_port });
					}
				}
			}
		}
	}
}

fn install_routing(sim: &mut Simulation, loaded: &LoadedConfig) -> Result<()> {
	for row in &loaded.routing {
		let node = sim.node_handle(row.node_id);
		let _ = row.dest_port;

		let switch = sim.nodes[node].switch.as_mut().with_context(|| format!("routing_table.csv targets node {} which is not a SWITCH", row.node_id))?;

		switch.routing.insert(row.dest_ip, &row.ports, &row.metrics);
	}

	Ok(())
}

fn create_ldst_instances(sim: &mut Simulation, loaded: &LoadedConfig) {
	let threads = sim.config.ldst_threads;
	let cap = sim.config.ldst_inflight_cap;

	for row in &loaded.nodes {
		if row.is_switch {
			continue;
		}

		let Ok(ids) = row.expand() else { continue };

		for id in ids {
			let node = sim.node_handle(id);
			sim.create_ldst_instance(node, threads, cap);
		}
	}
}

/// Creates two `TransportChannel`s per `transport_channel.csv` row (one per endpoint) and a
/// jetty bound 1:1 to each, registered into `Controller::jetty_by_dst` under `(peerNodeId,
/// priority)` — the auto-binding resolution `DESIGN.md` records for spec.md §9's jetty/TP
/// cardinality open question.
fn create_transport_channels(sim: &mut Simulation, loaded: &LoadedConfig) -> Result<()> {
	let mut next_jetty_id: u32 = 0;

	for row in &loaded.transport_channels {
		let node1 = sim.node_handle(row.node1);
		let node2 = sim.node_handle(row.node2);
		let vl = row.priority % sim.config.vl_num as u8;

		let tp1 = make_tp(sim, row.tpn1, row.tpn2, node1, row.port1, node2, row.port2, row.priority, vl);
		let tp2 = make_tp(sim, row.tpn2, row.tpn1, node2, row.port2, node1, row.port1, row.priority, vl);

		bind_tp(sim, node1, row.port1, row.tpn1, vl, tp1);
		bind_tp(sim, node2, row.port2, row.tpn2, vl, tp2);

		let jetty1 = sim.create_jetty(node1, next_jetty_id, vec![tp1]);
		next_jetty_id += 1;
		let jetty2 = sim.create_jetty(node2, next_jetty_id, vec![tp2]);
		next_jetty_id += 1;

		sim.nodes[node1].controller.as_mut().unwrap().jetty_by_dst.insert((row.node2, row.priority), jetty1);
		sim.nodes[node2].controller.as_mut().unwrap().jetty_by_dst.insert((row.node1, row.priority), jetty2);
	}

	Ok(())
}

#[allow(clippy::too_many_arguments)]
fn make_tp(sim: &Simulation, tpn: u32, dst_tpn: u32, src_node: NodeHandle, src_port: u16, dst_node: NodeHandle, dst_port: u16, priority: u8, vl: u8) -> TransportChannel {
	let config = &sim.config;

	TransportChannel::new(
		tpn,
		dst_tpn,
		src_node,
		src_port,
		dst_node,
		dst_port,
		priority,
		vl,
		config.mtu,
		config.psn_ooo_threshold,
		config.initial_rto,
		config.max_retrans_attempts,
		config.retrans_exponent_factor,
		config.tp_inflight_cap,
		new_congestion_control(config),
		config.use_shortest_path,
		config.use_packet_spray,
	)
}

fn bind_tp(sim: &mut Simulation, node: NodeHandle, port: u16, tpn: u32, vl: u8, tp: TransportChannel) {
	let handle = {
		let controller = sim.nodes[node].controller.as_mut().expect("transport_channel.csv targets a SWITCH node");
		let handle = controller.tps.insert(tp);
		controller.tp_by_tpn.insert(tpn, handle);
		handle
	};

	sim.nodes[node].ports[port as usize].allocator.register(vl, sim::voq::IngressSource::Transport(handle));
}

fn install_fault_injector(sim: &mut Simulation, loaded: &LoadedConfig) -> Result<()> {
	if !sim.config.fault_enable {
		return Ok(());
	}

	let faults = loaded
		.faults
		.iter()
		.map(|row| match *row {
			FaultRow::Drop { task_id, pct } => Fault { task_id, kind: FaultKind::Drop { pct } },
			FaultRow::Delay { task_id, ns } => Fault { task_id, kind: FaultKind::Delay { ns } },
			FaultRow::Congestion { task_id, node, port, rate } => Fault { task_id, kind: FaultKind::Congestion { node, port, rate } },
			FaultRow::Shutdown { task_id, from_ns, to_ns } => Fault { task_id, kind: FaultKind::Shutdown { from_ns, to_ns } },
			FaultRow::LowerRate { task_id, node, port, rate } => Fault { task_id, kind: FaultKind::LowerRate { node, port, rate } },
			FaultRow::Error { task_id, pct } => Fault { task_id, kind: FaultKind::Error { pct } },
		})
		.collect();

	sim.fault = FaultInjector::new(faults);

	Ok(())
}

/// Translates `traffic.csv`'s `opType`/`phaseId`/dep-list columns (spec.md §6) into
/// `TaskScheduler`'s task-id dependency DAG (the `ub-app.cc` supplemental feature, `DESIGN.md`).
fn install_traffic(sim: &mut Simulation, loaded: &LoadedConfig) -> Result<()> {
	let mut phase_tasks: FastMap<u64, Vec<u64>> = FastMap::default();

	for row in &loaded.traffic {
		if let Some(phase) = row.phase_id {
			phase_tasks.entry(phase).or_default().push(row.task_id);
		}
	}

	let mut records = Vec::with_capacity(loaded.traffic.len());

	for row in &loaded.traffic {
		let op = match row.op.as_str() {
			"URMA_WRITE" => OpType::UrmaWrite,
			"MEM_STORE" => OpType::MemStore,
			"MEM_LOAD" => OpType::MemLoad,
			other => bail!("traffic.csv: unrecognized opType {other:?}"),
		};

		let record = TrafficRecord {
			task_id: row.task_id,
			src_node: row.src_node,
			dst_node: row.dst_node,
			data_size: row.data_size,
			op,
			priority: row.priority,
			delay: Duration::from_nanos(row.delay_ns),
			phase_id: row.phase_id,
		};

		let mut deps = Vec::new();

		for phase in &row.dep_phase_ids {
			deps.extend(phase_tasks.get(phase).cloned().unwrap_or_default());
		}

		records.push((record, deps));
	}

	sim.tasks = TaskScheduler::default();
	sim.tasks.load(records);

	Ok(())
}

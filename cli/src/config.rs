//! Configuration loading: the attribute key-value store plus the CSV schemas of spec.md §6.
//!
//! Grounded on `dawsh2-AlphaPulse`'s `serde`-based config loaders for the general shape (typed
//! rows, fail-fast with `anyhow::Context` on every row), generalized to CSV's flexible-width rows
//! since several schemas here carry parallel space-separated lists (`"p1 p2 ..."`) rather than a
//! fixed column count `#[derive(Deserialize)]` handles cleanly — those rows are read positionally
//! with `csv::StringRecord` instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// `UB_CC_ALGO`, `UB_VL_NUM`, etc. (spec.md §6 "Attribute configuration"): a flat key-value file
/// loaded before any CSV, consulted by typed accessors everywhere a numeric or boolean toggle is
/// needed.
#[derive(Default)]
pub struct KvStore {
	values: HashMap<String, String>,
}

impl KvStore {
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).with_context(|| format!("reading attribute file {}", path.display()))?;
		let mut values = HashMap::new();

		for (lineno, line) in text.lines().enumerate() {
			let line = line.trim();

			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			let (key, value) = line
				.split_once('=')
				.or_else(|| line.split_once(char::is_whitespace))
				.with_context(|| format!("{}:{}: expected KEY=VALUE or KEY VALUE", path.display(), lineno + 1))?;

			values.insert(key.trim().to_string(), value.trim().to_string());
		}

		Ok(Self { values })
	}

	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.values.get(key).map(String::as_str)
	}

	pub fn get_u32(&self, key: &str, default: u32) -> Result<u32> {
		self.get_str(key).map(|v| v.parse().with_context(|| format!("{key}={v} is not a u32"))).transpose().map(|v| v.unwrap_or(default))
	}

	pub fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
		self.get_str(key).map(|v| v.parse().with_context(|| format!("{key}={v} is not a u64"))).transpose().map(|v| v.unwrap_or(default))
	}

	pub fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
		self.get_str(key).map(|v| v.parse().with_context(|| format!("{key}={v} is not an f64"))).transpose().map(|v| v.unwrap_or(default))
	}

	pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
		match self.get_str(key) {
			None => Ok(default),
			Some("1") | Some("true") | Some("TRUE") | Some("on") => Ok(true),
			Some("0") | Some("false") | Some("FALSE") | Some("off") => Ok(false),
			Some(other) => bail!("{key}={other} is not a recognized boolean"),
		}
	}
}

/// One `node.csv` row. `id_spec` carries either a single id (`"7"`) or an inclusive range
/// (`"0-9"`) before [`expand`](NodeRow::expand) splits it into concrete ids.
pub struct NodeRow {
	pub id_spec: String,
	pub is_switch: bool,
	pub port_count: usize,
	pub forward_delay_ns: u64,
}

impl NodeRow {
	pub fn expand(&self) -> Result<Vec<u32>> {
		match self.id_spec.split_once('-') {
			Some((lo, hi)) => {
				let lo: u32 = lo.trim().parse().with_context(|| format!("bad node range start {lo:?}"))?;
				let hi: u32 = hi.trim().parse().with_context(|| format!("bad node range end {hi:?}"))?;
				Ok((lo..=hi).collect())
			}
			None => Ok(vec![self.id_spec.trim().parse().with_context(|| format!("bad node id {:?}", self.id_spec))?]),
		}
	}
}

pub struct TopologyRow {
	pub node_a: u32,
	pub port_a: u16,
	pub node_b: u32,
	pub port_b: u16,
	pub bandwidth_bps: u64,
	pub delay_ns: u64,
}

/// One `routing_table.csv` row. `dest_port` is carried for schema fidelity but unused: a route
/// decision here is keyed only by destination address (see `sim::routing::RoutingTable`), with
/// port/priority folding into the packet-spray hash at forward time instead of the table lookup.
pub struct RoutingRow {
	pub node_id: u32,
	pub dest_ip: u32,
	pub dest_port: u16,
	pub ports: Vec<u16>,
	pub metrics: Vec<u32>,
}

/// One `transport_channel.csv` row; `metric` is carried for schema fidelity but unused by TP
/// setup itself (TP selection isn't cost-routed — only the VOQ/switch layer consults metrics).
pub struct TransportChannelRow {
	pub node1: u32,
	pub port1: u16,
	pub tpn1: u32,
	pub node2: u32,
	pub port2: u16,
	pub tpn2: u32,
	pub priority: u8,
	pub metric: u32,
}

pub struct TrafficRow {
	pub task_id: u64,
	pub src_node: u32,
	pub dst_node: u32,
	pub data_size: u64,
	pub op: String,
	pub priority: u8,
	pub delay_ns: u64,
	pub phase_id: Option<u64>,
	pub dep_phase_ids: Vec<u64>,
}

pub enum FaultRow {
	Drop { task_id: u64, pct: f64 },
	Delay { task_id: u64, ns: u64 },
	Congestion { task_id: u64, node: u32, port: u16, rate: u64 },
	Shutdown { task_id: u64, from_ns: u64, to_ns: u64 },
	LowerRate { task_id: u64, node: u32, port: u16, rate: u64 },
	Error { task_id: u64, pct: f64 },
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
	csv::ReaderBuilder::new().has_headers(true).flexible(true).from_path(path).with_context(|| format!("opening {}", path.display()))
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize, path: &Path) -> Result<&'a str> {
	record.get(idx).with_context(|| format!("{}: row {:?} is missing column {idx}", path.display(), record))
}

fn parse_list<T: std::str::FromStr>(s: &str) -> Result<Vec<T>>
where
	T::Err: std::fmt::Display,
{
	s.split_whitespace().map(|tok| tok.parse::<T>().map_err(|e| anyhow::anyhow!("{tok:?}: {e}"))).collect()
}

pub fn load_nodes(path: &Path) -> Result<Vec<NodeRow>> {
	let mut out = Vec::new();

	for record in reader(path)?.records() {
		let record = record?;
		let kind = field(&record, 1, path)?;

		out.push(NodeRow {
			id_spec: field(&record, 0, path)?.to_string(),
			is_switch: kind.eq_ignore_ascii_case("SWITCH"),
			port_count: field(&record, 2, path)?.parse().context("portCount")?,
			forward_delay_ns: record.get(3).map(str::parse).transpose().context("forwardDelay")?.unwrap_or(0),
		});
	}

	Ok(out)
}

pub fn load_topology(path: &Path) -> Result<Vec<TopologyRow>> {
	let mut out = Vec::new();

	for record in reader(path)?.records() {
		let record = record?;

		out.push(TopologyRow {
			node_a: field(&record, 0, path)?.parse().context("nodeA")?,
			port_a: field(&record, 1, path)?.parse().context("portA")?,
			node_b: field(&record, 2, path)?.parse().context("nodeB")?,
			port_b: field(&record, 3, path)?.parse().context("portB")?,
			bandwidth_bps: field(&record, 4, path)?.parse().context("bandwidth")?,
			delay_ns: field(&record, 5, path)?.parse().context("delay")?,
		});
	}

	Ok(out)
}

pub fn load_routing(path: &Path) -> Result<Vec<RoutingRow>> {
	let mut out = Vec::new();

	for record in reader(path)?.records() {
		let record = record?;

		out.push(RoutingRow {
			node_id: field(&record, 0, path)?.parse().context("nodeId")?,
			dest_ip: field(&record, 1, path)?.parse().context("destIpAsInt")?,
			dest_port: field(&record, 2, path)?.parse().context("destPort")?,
			ports: parse_list(field(&record, 3, path)?).context("routing port list")?,
			metrics: parse_list(field(&record, 4, path)?).context("routing metric list")?,
		});
	}

	Ok(out)
}

pub fn load_transport_channels(path: &Path) -> Result<Vec<TransportChannelRow>> {
	let mut out = Vec::new();

	for record in reader(path)?.records() {
		let record = record?;

		out.push(TransportChannelRow {
			node1: field(&record, 0, path)?.parse().context("node1")?,
			port1: field(&record, 1, path)?.parse().context("port1")?,
			tpn1: field(&record, 2, path)?.parse().context("tpn1")?,
			node2: field(&record, 3, path)?.parse().context("node2")?,
			port2: field(&record, 4, path)?.parse().context("port2")?,
			tpn2: field(&record, 5, path)?.parse().context("tpn2")?,
			priority: field(&record, 6, path)?.parse().context("priority")?,
			metric: field(&record, 7, path)?.parse().context("metric")?,
		});
	}

	Ok(out)
}

pub fn load_traffic(path: &Path) -> Result<Vec<TrafficRow>> {
	let mut out = Vec::new();

	for record in reader(path)?.records() {
		let record = record?;

		let phase_id: Option<u64> = match field(&record, 7, path)?.trim() {
			"" => None,
			s => Some(s.parse().context("phaseId")?),
		};

		let dep_phase_ids = match record.get(8) {
			Some(s) if !s.trim().is_empty() => parse_list(s).context("traffic dep list")?,
			_ => Vec::new(),
		};

		out.push(TrafficRow {
			task_id: field(&record, 0, path)?.parse().context("taskId")?,
			src_node: field(&record, 1, path)?.parse().context("srcNode")?,
			dst_node: field(&record, 2, path)?.parse().context("dstNode")?,
			data_size: field(&record, 3, path)?.parse().context("dataSize")?,
			op: field(&record, 4, path)?.to_string(),
			priority: field(&record, 5, path)?.parse().context("priority")?,
			delay_ns: field(&record, 6, path)?.parse().context("delay")?,
			phase_id,
			dep_phase_ids,
		});
	}

	Ok(out)
}

pub fn load_faults(path: &Path) -> Result<Vec<FaultRow>> {
	let mut out = Vec::new();

	for record in reader(path)?.records() {
		let record = record?;
		let task_id: u64 = field(&record, 0, path)?.parse().context("taskId")?;
		let kind = field(&record, 1, path)?.to_ascii_uppercase();

		let row = match kind.as_str() {
			"DROP" => FaultRow::Drop { task_id, pct: field(&record, 2, path)?.parse().context("dropPct")? },
			"DELAY" => FaultRow::Delay { task_id, ns: field(&record, 3, path)?.parse().context("delayNs")? },
			"CONGESTION" | "LOWER_RATE" => {
				let triple: Vec<&str> = field(&record, 4, path)?.split_whitespace().collect();

				if triple.len() != 3 {
					bail!("{}: fault row {task_id} needs a \"node port rate\" triple", path.display());
				}

				let node = triple[0].parse().context("fault node")?;
				let port = triple[1].parse().context("fault port")?;
				let rate = triple[2].parse().context("fault rate")?;

				if kind == "CONGESTION" {
					FaultRow::Congestion { task_id, node, port, rate }
				} else {
					FaultRow::LowerRate { task_id, node, port, rate }
				}
			}
			"SHUTDOWN" => {
				let range = field(&record, 5, path)?;
				let (from, to) = range.split_once('-').with_context(|| format!("shutdownRange {range:?} is not \"from-to\""))?;

				FaultRow::Shutdown { task_id, from_ns: from.trim().parse().context("shutdown from")?, to_ns: to.trim().parse().context("shutdown to")? }
			}
			"ERROR" => FaultRow::Error { task_id, pct: field(&record, 6, path)?.parse().context("errorPct")? },
			other => bail!("{}: unrecognized faultType {other:?}", path.display()),
		};

		out.push(row);
	}

	Ok(out)
}

/// Everything loaded from the configuration directory before a [`sim::Simulation`] is built.
pub struct LoadedConfig {
	pub attrs: KvStore,
	pub nodes: Vec<NodeRow>,
	pub topology: Vec<TopologyRow>,
	pub routing: Vec<RoutingRow>,
	pub transport_channels: Vec<TransportChannelRow>,
	pub traffic: Vec<TrafficRow>,
	pub faults: Vec<FaultRow>,
}

impl LoadedConfig {
	/// Reads every schema from `dir` (spec.md §6): the attribute file first, then the CSVs,
	/// matching "attribute store before CSVs". `fault.csv` is optional.
	pub fn load(dir: &Path) -> Result<Self> {
		let at = |name: &str| -> PathBuf { dir.join(name) };

		let fault_path = at("fault.csv");
		let faults = if fault_path.exists() { load_faults(&fault_path)? } else { Vec::new() };

		Ok(Self {
			attrs: KvStore::load(&at("attributes.txt"))?,
			nodes: load_nodes(&at("node.csv"))?,
			topology: load_topology(&at("topology.csv"))?,
			routing: load_routing(&at("routing_table.csv"))?,
			transport_channels: load_transport_channels(&at("transport_channel.csv"))?,
			traffic: load_traffic(&at("traffic.csv"))?,
			faults,
		})
	}
}

//! Per-node routing table and forwarding-key hash (spec.md §3, §4.5).
//!
//! Grounded on `collections::map::Map`'s flat keyed-storage idiom, swapped from its fixed-size
//! hashbrown table to `collections::map::HashMap` (ahash) since the destination-IP keyspace here
//! is sparse and only known at configuration-load time.

use collections::map::HashMap;

/// The routing-key tuple hashed to pick an output port (spec.md §4.5).
#[derive(Clone, Copy)]
pub struct RouteKey {
	pub src_ip: u32,
	pub dst_ip: u32,
	pub src_port: u16,
	pub dst_port: u16,
	pub priority: u8,
}

struct Entry {
	shortest: Vec<u16>,
	non_shortest: Vec<u16>,
}

pub struct RouteDecision {
	pub out_port: u16,
	/// Whether the chosen port actually belongs to the shortest-path set (spec.md §4.5: when
	/// `useShortestPath` is false and a non-shortest port is picked, the caller must rewrite the
	/// datalink header's routing-policy bit to "shortest" before forwarding).
	pub took_shortest: bool,
}

#[derive(Default)]
pub struct RoutingTable {
	entries: HashMap<u32, Entry>,
	/// Diagnostic counter: how many times a forwarded packet arrived over a port outside the
	/// shortest set (a supplemental feature from the original's routing-process diagnostics,
	/// not part of the wire protocol).
	pub non_shortest_hops: u64,
}

impl RoutingTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs one `routing_table.csv` row: `dstIp` maps to the ports in `metrics`, split into
	/// the shortest set (the ports sharing the smallest metric) and the rest.
	pub fn insert(&mut self, dst_ip: u32, ports: &[u16], metrics: &[u32]) {
		assert_eq!(ports.len(), metrics.len(), "routing_table.csv row has mismatched port/metric counts");

		let min = metrics.iter().copied().min().unwrap_or(0);

		let mut shortest = Vec::new();
		let mut non_shortest = Vec::new();

		for (&port, &metric) in ports.iter().zip(metrics) {
			if metric == min {
				shortest.push(port);
			} else {
				non_shortest.push(port);
			}
		}

		self.entries.insert(dst_ip, Entry { shortest, non_shortest });
	}

	/// Chooses an output port for `key`, excluding `in_port` to prevent trivial reflection
	/// (spec.md §4.5). Returns `None` when the destination has no routing-table entry — the
	/// caller treats this as the "route not found" fatal condition of spec.md §7.
	pub fn get_out_port(&mut self, key: RouteKey, in_port: u16, use_shortest_path: bool, use_packet_spray: bool) -> Option<RouteDecision> {
		let entry = self.entries.get(&key.dst_ip)?;

		let candidates: Vec<u16> = if use_shortest_path {
			entry.shortest.iter().copied().filter(|&p| p != in_port).collect()
		} else {
			entry.shortest.iter().chain(&entry.non_shortest).copied().filter(|&p| p != in_port).collect()
		};

		if candidates.is_empty() {
			return None;
		}

		let hash = route_hash(key, use_packet_spray);
		let out_port = candidates[(hash as usize) % candidates.len()];
		let took_shortest = entry.shortest.contains(&out_port);

		if !took_shortest {
			self.non_shortest_hops += 1;
		}

		Some(RouteDecision { out_port, took_shortest })
	}
}

/// An FNV-1a 64-bit hash of the routing key, salted per-packet (packet-spray) or per-flow.
fn route_hash(key: RouteKey, use_packet_spray: bool) -> u64 {
	const OFFSET: u64 = 0xcbf29ce484222325;
	const PRIME: u64 = 0x100000001b3;

	let (sport, dport) = if use_packet_spray { (key.src_port, key.dst_port) } else { (0, 0) };

	let mut hash = OFFSET;

	for byte in key
		.src_ip
		.to_be_bytes()
		.into_iter()
		.chain(key.dst_ip.to_be_bytes())
		.chain(sport.to_be_bytes())
		.chain(dport.to_be_bytes())
		.chain([key.priority])
	{
		hash ^= byte as u64;
		hash = hash.wrapping_mul(PRIME);
	}

	hash
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(sport: u16, dport: u16) -> RouteKey {
		RouteKey { src_ip: 0x0a000101, dst_ip: 0x0a000201, src_port: sport, dst_port: dport, priority: 0 }
	}

	#[test]
	fn shortest_only_excludes_non_shortest() {
		let mut rt = RoutingTable::new();
		rt.insert(0x0a000201, &[1, 2, 3], &[1, 1, 2]);

		for _ in 0..20 {
			let decision = rt.get_out_port(key(10, 20), 0, true, true).unwrap();
			assert_ne!(decision.out_port, 3);
			assert!(decision.took_shortest);
		}
	}

	#[test]
	fn input_port_is_never_chosen() {
		let mut rt = RoutingTable::new();
		rt.insert(0x0a000201, &[1, 2], &[1, 1]);

		for _ in 0..20 {
			let decision = rt.get_out_port(key(10, 20), 1, false, true).unwrap();
			assert_eq!(decision.out_port, 2);
		}
	}

	#[test]
	fn per_flow_hash_ignores_ports() {
		let mut rt = RoutingTable::new();
		rt.insert(0x0a000201, &[1, 2, 3, 4], &[1, 1, 1, 1]);

		let a = rt.get_out_port(key(10, 20), 0, true, false).unwrap().out_port;
		let b = rt.get_out_port(key(99, 88), 0, true, false).unwrap().out_port;
		assert_eq!(a, b);
	}

	#[test]
	fn missing_destination_returns_none() {
		let mut rt = RoutingTable::new();
		assert!(rt.get_out_port(key(1, 1), 0, true, true).is_none());
	}
}

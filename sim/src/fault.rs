//! Fault injection (spec.md §3's "run an optional fault-injection callback", §6's `fault.csv`).
//!
//! Grounded on the original `ub-fault.cc`/`.h` (see `original_source/`), which the distillation
//! names only through the `fault.csv` schema without pinning dispatch. Modeled here as a small
//! capability enum in the style §9 asks for ("tagged variants... preferred over deep
//! hierarchies") rather than a trait object, since the fault set is closed and known up front.

use rand::Rng;

/// One row of `fault.csv`, keyed by the task id it applies to.
#[derive(Clone, Debug)]
pub struct Fault {
	pub task_id: u64,
	pub kind: FaultKind,
}

#[derive(Clone, Debug)]
pub enum FaultKind {
	/// Drop a percentage of packets outright.
	Drop { pct: f64 },
	/// Delay transmission by a fixed number of nanoseconds.
	Delay { ns: u64 },
	/// Synthetic congestion: throttle the named `(node, port)` to `rate` bps.
	Congestion { node: u32, port: u16, rate: u64 },
	/// Shut the link down for the given range of virtual time, in nanoseconds.
	Shutdown { from_ns: u64, to_ns: u64 },
	/// Persistently lower a port's line rate.
	LowerRate { node: u32, port: u16, rate: u64 },
	/// Corrupt a percentage of packets (sets the transport header's error bit).
	Error { pct: f64 },
}

/// The outcome of running a fault check before a port transmits a packet (spec.md §4.4 step 1).
pub enum FaultOutcome {
	/// Transmit normally.
	Pass,
	/// Drop the packet; the port should schedule `TransmitComplete` after zero time.
	Drop,
	/// Delay the transmission by the given extra duration.
	Delay(std::time::Duration),
	/// Mark the packet as erroneous but still send it.
	Corrupt,
}

#[derive(Default)]
pub struct FaultInjector {
	faults: Vec<Fault>,
}

impl FaultInjector {
	pub fn new(faults: Vec<Fault>) -> Self {
		Self { faults }
	}

	pub fn is_empty(&self) -> bool {
		self.faults.is_empty()
	}

	/// Checks whether any fault targeting `task_id` fires for this transmission attempt.
	pub fn check(&self, task_id: u64, node: u32, port: u16, rng: &mut impl Rng) -> FaultOutcome {
		for fault in &self.faults {
			if fault.task_id != task_id {
				continue;
			}

			match fault.kind {
				FaultKind::Drop { pct } if rng.gen_bool(pct) => return FaultOutcome::Drop,
				FaultKind::Delay { ns } => return FaultOutcome::Delay(std::time::Duration::from_nanos(ns)),
				FaultKind::Error { pct } if rng.gen_bool(pct) => return FaultOutcome::Corrupt,
				FaultKind::Shutdown { .. } => return FaultOutcome::Drop,
				FaultKind::Congestion { node: n, port: p, .. } | FaultKind::LowerRate { node: n, port: p, .. } if n == node && p == port => {
					// Rate-affecting faults are applied by the port reading `effective_rate`
					// rather than by dropping here; fall through to Pass.
				}
				_ => {}
			}
		}

		FaultOutcome::Pass
	}

	/// The effective line rate for `(node, port)`, after any `Congestion`/`LowerRate` faults.
	pub fn effective_rate(&self, node: u32, port: u16, base: u64) -> u64 {
		self.faults
			.iter()
			.filter_map(|f| match f.kind {
				FaultKind::Congestion { node: n, port: p, rate } | FaultKind::LowerRate { node: n, port: p, rate } if n == node && p == port => {
					Some(rate)
				}
				_ => None,
			})
			.min()
			.unwrap_or(base)
	}
}

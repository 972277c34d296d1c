//! The HBM memory-bank interface (spec.md §1: "interface only").
//!
//! Grounded on the original `hbm-bank.h`'s shape: a request queue with a processing delay and a
//! completion callback. Only the interface is implemented here, plus a no-op implementation —
//! the internal DRAM timing model is explicitly out of scope.

use std::time::Duration;

/// A single memory-bank access request.
pub struct BankRequest {
	pub addr: u64,
	pub length: u32,
	pub is_write: bool,
}

/// The capability a memory-bank model exposes to the LDST pipeline. `enqueue` returns the
/// duration after which `on_complete` fires for that request; callers are expected to schedule
/// the callback themselves via the runtime kernel, since `MemoryBank` implementations do no
/// scheduling of their own.
pub trait MemoryBank {
	fn enqueue(&mut self, request: BankRequest) -> Duration;
}

/// A memory bank with a fixed, zero processing delay — used whenever a simulation run doesn't
/// configure a real bank model.
#[derive(Default)]
pub struct NullBank;

impl MemoryBank for NullBank {
	fn enqueue(&mut self, _request: BankRequest) -> Duration {
		Duration::ZERO
	}
}

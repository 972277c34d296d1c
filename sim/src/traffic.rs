//! Traffic-record loading and phase-dependency resolution (spec.md §6 `traffic.csv`).
//!
//! Supplemental feature grounded on the original `ub-app.cc`: the distillation names
//! `traffic.csv`'s `phaseId`/`"dep1 dep2 ..."` columns but only as schema, so this module
//! translates phase dependencies into a task-id dependency DAG and holds a record back until
//! every dependency's finish callback has fired, the way `UbApp` gates a traffic record's start.

use collections::map::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpType {
	UrmaWrite,
	MemStore,
	MemLoad,
}

#[derive(Clone, Debug)]
pub struct TrafficRecord {
	pub task_id: u64,
	pub src_node: u32,
	pub dst_node: u32,
	pub data_size: u64,
	pub op: OpType,
	pub priority: u8,
	pub delay: std::time::Duration,
	pub phase_id: Option<u64>,
}

/// Holds traffic records whose dependencies (translated from `phaseId` to task id at load time)
/// haven't all finished yet.
#[derive(Default)]
pub struct TaskScheduler {
	/// Records not yet dispatched, keyed by task id.
	pending: HashMap<u64, TrafficRecord>,
	/// `task_id -> ids of tasks that must finish before it may start`.
	deps: HashMap<u64, Vec<u64>>,
	/// `task_id -> ids of tasks waiting on it`.
	dependents: HashMap<u64, Vec<u64>>,
	finished: std::collections::HashSet<u64>,
}

impl TaskScheduler {
	/// Loads `traffic.csv`'s rows. `dep_task_ids` is the `"dep1 dep2 ..."` column already
	/// resolved from phase ids to task ids by the caller (the config loader knows the
	/// phase-id -> task-id mapping; this module only tracks the resulting graph).
	pub fn load(&mut self, records: Vec<(TrafficRecord, Vec<u64>)>) {
		for (record, deps) in records {
			let task_id = record.task_id;

			for &dep in &deps {
				self.dependents.entry(dep).or_default().push(task_id);
			}

			self.deps.insert(task_id, deps);
			self.pending.insert(task_id, record);
		}
	}

	/// Drains every record with no unmet dependency, for the initial dispatch at run start.
	pub fn drain_ready(&mut self) -> Vec<TrafficRecord> {
		let ready_ids: Vec<u64> =
			self.pending.keys().copied().filter(|id| self.deps.get(id).map_or(true, |d| d.is_empty())).collect();

		ready_ids.into_iter().filter_map(|id| self.pending.remove(&id)).collect()
	}

	/// Marks `task_id` finished and returns every now-ready dependent record.
	pub fn resolve(&mut self, task_id: u64) -> Vec<TrafficRecord> {
		self.finished.insert(task_id);

		let Some(dependents) = self.dependents.remove(&task_id) else { return Vec::new() };
		let mut ready = Vec::new();

		for dependent in dependents {
			if let Some(deps) = self.deps.get_mut(&dependent) {
				deps.retain(|d| !self.finished.contains(d));

				if deps.is_empty() {
					if let Some(record) = self.pending.remove(&dependent) {
						ready.push(record);
					}
				}
			}
		}

		ready
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	fn record(id: u64) -> TrafficRecord {
		TrafficRecord { task_id: id, src_node: 0, dst_node: 1, data_size: 100, op: OpType::UrmaWrite, priority: 0, delay: Duration::ZERO, phase_id: None }
	}

	#[test]
	fn independent_records_are_immediately_ready() {
		let mut sched = TaskScheduler::default();
		sched.load(vec![(record(0), vec![]), (record(1), vec![])]);

		let ready = sched.drain_ready();
		assert_eq!(ready.len(), 2);
	}

	#[test]
	fn dependent_record_waits_for_dependency() {
		let mut sched = TaskScheduler::default();
		sched.load(vec![(record(0), vec![]), (record(1), vec![0])]);

		let ready = sched.drain_ready();
		assert_eq!(ready.len(), 1);
		assert_eq!(ready[0].task_id, 0);

		let unblocked = sched.resolve(0);
		assert_eq!(unblocked.len(), 1);
		assert_eq!(unblocked[0].task_id, 1);
	}
}

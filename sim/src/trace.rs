//! Line-oriented trace emission into `runlog/` (spec.md §6).
//!
//! Grounded on `runtime::logger::Logger`'s plain `io::Write` sink idiom, minus the ANSI
//! coloring: trace lines are meant to be grepped/parsed by post-run analysis (`UB_PARSE_TRACE_ENABLE`),
//! not read on a terminal. One [`TraceWriter`] instance lives on [`crate::Simulation`] and is
//! shared by every subsystem that emits packet- or task-level events.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::packet::TraceTag;

/// A sink for one category of trace line. Absent (`None`) when its toggle
/// (`UB_TRACE_ENABLE`/`UB_RECORD_PKT_TRACE`/`UB_PARSE_TRACE_ENABLE`) is off, matching §6's
/// "Traces are written... under a `runlog/` directory" only when asked for.
pub struct TraceWriter {
	events: Option<BufWriter<File>>,
	packets: Option<BufWriter<File>>,
}

impl TraceWriter {
	pub fn disabled() -> Self {
		Self { events: None, packets: None }
	}

	/// Opens `runlog/events.log` and, if `record_pkt_trace`, `runlog/packet_trace.log` under
	/// `root`, creating the directory if needed.
	pub fn open(root: &Path, trace_enable: bool, record_pkt_trace: bool) -> std::io::Result<Self> {
		let dir = root.join("runlog");
		std::fs::create_dir_all(&dir)?;

		let events = trace_enable.then(|| File::create(dir.join("events.log")).map(BufWriter::new)).transpose()?;
		let packets = record_pkt_trace.then(|| File::create(dir.join("packet_trace.log")).map(BufWriter::new)).transpose()?;

		Ok(Self { events, packets })
	}

	pub fn event(&mut self, now: Duration, line: std::fmt::Arguments) {
		if let Some(w) = &mut self.events {
			let _ = writeln!(w, "{now:?} {line}");
		}
	}

	/// Drains a completed packet's hop-by-hop trace tag (spec.md §9 "Per-packet tags").
	pub fn packet_hops(&mut self, task_id: u64, tag: &TraceTag) {
		let Some(w) = &mut self.packets else { return };

		for hop in &tag.hops {
			let _ = writeln!(
				w,
				"task={task_id} node={} in_port={:?} in_time={:?} out_port={:?} out_time={:?}",
				hop.node, hop.in_port, hop.in_time, hop.out_port, hop.out_time
			);
		}
	}

	pub fn flush(&mut self) {
		if let Some(w) = &mut self.events {
			let _ = w.flush();
		}

		if let Some(w) = &mut self.packets {
			let _ = w.flush();
		}
	}
}

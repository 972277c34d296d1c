//! Process entry point (spec.md §1's "CLI and logging" / "configuration file parsing", both
//! named as externally-defined): parses arguments, loads the configuration directory, builds and
//! runs one [`sim::Simulation`] to completion.

mod build;
mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stakker::{actor, ret_nop};

use crate::config::LoadedConfig;

/// Runs a Unified Bus fabric simulation from a directory of CSV configuration files.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Directory containing node.csv, topology.csv, routing_table.csv, transport_channel.csv,
	/// traffic.csv, an attributes.txt attribute file, and an optional fault.csv.
	config_dir: PathBuf,

	/// RNG seed for CAQM marking and fault sampling (spec.md §5 "reproducible given the same
	/// configuration and seed").
	#[arg(long, default_value_t = 1)]
	seed: u64,

	/// Stop advancing virtual time past this many nanoseconds, even if events remain scheduled.
	#[arg(long)]
	deadline_ns: Option<u64>,
}

fn main() -> Result<()> {
	let args = Args::parse();

	runtime::logger::Logger::new().install();

	let loaded = LoadedConfig::load(&args.config_dir).with_context(|| format!("loading configuration from {}", args.config_dir.display()))?;
	let sim_config = build::build_config(&loaded.attrs).context("translating attribute store into simulation parameters")?;

	let trace_enable = sim_config.trace_enable;
	let record_pkt_trace = sim_config.record_pkt_trace;

	let mut stakker = runtime::init();
	let core = &mut stakker;
	let sim = actor!(core, sim::Simulation::init(sim_config, args.seed), ret_nop!());

	if trace_enable || record_pkt_trace {
		let trace = sim::trace::TraceWriter::open(&args.config_dir, trace_enable, record_pkt_trace).context("opening runlog/ trace files")?;
		sim.apply(&mut stakker, move |this, _cx| this.trace = trace);
	}

	let mut build_err = None;

	sim.apply(&mut stakker, |this, cx| {
		if let Err(err) = build::populate(this, cx, &loaded) {
			build_err = Some(err);
		}
	});

	if let Some(err) = build_err {
		return Err(err).context("wiring simulation topology");
	}

	let deadline = args.deadline_ns.map(Duration::from_nanos);
	let elapsed = runtime::run_until(&mut stakker, deadline);

	sim.apply(&mut stakker, |this, _cx| this.trace.flush());

	log::info!("Run finished after {elapsed:?} of virtual time");

	Ok(())
}

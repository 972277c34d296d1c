//! The discrete-event kernel the rest of the workspace runs on.
//!
//! Grounded on `runtime::rt`'s `Stakker`-driven event loop, but transformed from a live-network
//! loop (which polls real file descriptors and sleeps in wall-clock real time between events)
//! into an offline one: there is no I/O to poll, so time is advanced straight to the next
//! scheduled event instead of to `Instant::now()`. This is what turns `stakker` — already a
//! single-threaded, cooperative, callback-based actor/timer runtime — into the "discrete-event
//! simulator kernel" the specification treats as an external, already-available collaborator.

use std::time::{Duration, Instant};

use stakker::Stakker;

pub mod logger;

/// Initializes a `Stakker` instance anchored at virtual time zero.
pub fn init() -> Stakker {
	Stakker::new(Instant::now())
}

/// Runs the simulation to completion: repeatedly jumps virtual time to the next scheduled
/// event and executes it, until no actor has more work queued and no timer remains armed.
/// Returns the virtual duration the simulation ran for.
pub fn run_to_completion(stakker: &mut Stakker) -> Duration {
	run_until(stakker, None)
}

/// Like [`run_to_completion`], but stops advancing virtual time past `deadline` (measured from
/// the call to [`init`]), even if events remain scheduled beyond it. Used by scenario tests that
/// want to observe mid-run state.
pub fn run_until(stakker: &mut Stakker, deadline: Option<Duration>) -> Duration {
	let start = Instant::now();
	let mut t = start;

	// Run once at t=0 to let `init` deferrals settle before the first wait.
	stakker.run(t, false);

	while stakker.not_shutdown() {
		let Some(wait) = stakker.next_wait(t) else { break };

		let elapsed = t - start;

		if let Some(deadline) = deadline {
			if elapsed >= deadline {
				break;
			}
		}

		t += wait;
		stakker.run(t, false);
	}

	let elapsed = t - start;
	logger::log_stats(elapsed);
	elapsed
}

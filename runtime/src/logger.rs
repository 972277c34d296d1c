use std::time::{Duration, Instant};

use log::Level;
use nu_ansi_term::ansi::RESET;
use nu_ansi_term::{Color, Style};

/// Styled exactly on `runtime::logger::Logger`, except the timestamp is wall-clock-since-process-start
/// rather than `SystemTime::now()` — this simulator has no notion of a real calendar time, only a
/// virtual clock that the `Stakker` kernel advances on its own schedule.
pub struct Logger {
	start: Instant,
}

impl Logger {
	pub fn new() -> Self {
		Self { start: Instant::now() }
	}

	pub fn install(self) {
		log::set_boxed_logger(Box::new(self)).expect("logger already installed");
		log::set_max_level(log::LevelFilter::Trace);
	}
}

impl Default for Logger {
	fn default() -> Self {
		Self::new()
	}
}

impl log::Log for Logger {
	fn enabled(&self, _: &log::Metadata) -> bool {
		true
	}

	fn log(&self, record: &log::Record) {
		let elapsed = self.start.elapsed();

		let dim = Style::new().dimmed().prefix();

		eprintln!(
			"{dim}{:>12.3?}{RESET} {}{:5}{RESET} {}{}{RESET}{dim}:{RESET} {}",
			elapsed,
			match record.level() {
				Level::Trace => Color::Purple,
				Level::Debug => Color::Blue,
				Level::Info => Color::Green,
				Level::Warn => Color::Yellow,
				Level::Error => Color::Red,
			}
			.bold()
			.prefix(),
			record.level(),
			Style::new().bold().prefix(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}

/// Logs a summary when a run ends. The original logged polled-socket statistics here; this
/// simulator instead reports the virtual duration the run covered, which is the equivalent
/// "how much work got done" figure for an offline run.
pub fn log_stats(elapsed: Duration) {
	log::info!("Simulation complete at virtual time {elapsed:.3?}");
}

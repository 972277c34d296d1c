//! CAQM: the end-to-end window congestion control loop (spec.md §4.7).

use std::time::Duration;

use bilge::prelude::*;
use collections::map::HashMap;
use headers::network::{CaqmField, CetphTail};
use rand::Rng;

use crate::congestion::AckOutcome;

#[derive(Clone, Copy)]
pub struct CaqmParams {
	pub mtu: u32,
	pub alpha: f64,
	pub beta: f64,
	pub gamma: f64,
	pub lambda: f64,
	pub theta: u32,
	pub qt: u32,
	pub cc_unit: u32,
	pub mark_prob: f64,
	pub init_cwnd: u32,
	pub cc_update_period: Duration,
}

impl Default for CaqmParams {
	fn default() -> Self {
		let mtu = 1024;

		Self {
			mtu,
			alpha: 0.5,
			beta: 0.5,
			gamma: 0.5,
			lambda: 0.5,
			theta: 10,
			qt: 10 * mtu,
			cc_unit: 32,
			mark_prob: 0.1,
			init_cwnd: 10 * mtu,
			cc_update_period: Duration::from_nanos(500),
		}
	}
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CcState {
	SlowStart,
	CongestionAvoidance,
}

struct SentRecord {
	time: Duration,
	hint: u8,
	i: bool,
}

/// The sender-side half of one TP's CAQM state.
pub struct Caqm {
	params: CaqmParams,
	cwnd: f64,
	carry: f64,
	state: CcState,
	sent: HashMap<u32, SentRecord>,
	outstanding: u32,

	// Receiver-side per-PSN samples, keyed by PSN, cleared once folded into an ACK.
	recv: HashMap<u32, (u32, CaqmField)>,
}

impl Caqm {
	pub fn new(params: CaqmParams) -> Self {
		Self {
			cwnd: params.init_cwnd as f64,
			carry: 0.0,
			state: CcState::SlowStart,
			sent: HashMap::default(),
			outstanding: 0,
			recv: HashMap::default(),
			params,
		}
	}

	pub fn rest_cwnd(&self) -> u32 {
		(self.cwnd as u32).saturating_sub(self.outstanding)
	}

	/// Sender-side hook (spec.md §4.6 step 4 / §4.7 "On packet send"). Returns the network
	/// header's CC field to stamp on the outgoing packet.
	pub fn on_send(&mut self, psn: u32, size: u32, now: Duration) -> CaqmField {
		self.outstanding += size;

		let (hint, i) = if self.state == CcState::SlowStart || self.cwnd < self.params.mtu as f64 {
			((self.params.mtu / self.params.cc_unit).min(255) as u8, true)
		} else {
			self.carry += self.params.alpha / self.cwnd * self.params.mtu as f64;

			if self.carry >= 1.0 {
				let hint = self.carry.floor();
				self.carry -= hint;
				((hint as u32).min(255) as u8, true)
			} else {
				(0, false)
			}
		};

		self.sent.insert(psn, SentRecord { time: now, hint, i });

		CaqmField::new(false, true, false, i, hint)
	}

	/// Sender-side hook for a received cumulative ACK carrying a CETPH tail.
	pub fn on_ack(&mut self, psn: u32, tail: CetphTail, now: Duration) -> AckOutcome {
		let rtt = self.sent.remove(&psn).map(|record| now.saturating_sub(record.time));
		self.outstanding = self.outstanding.saturating_sub(self.params.mtu);

		let c_e = tail.c();
		let i_e = tail.i();

		let mut reset_deadline = None;

		if c_e > 0 || !i_e {
			self.state = CcState::CongestionAvoidance;

			if let Some(rtt) = rtt {
				reset_deadline = Some(rtt * self.params.theta);
			}
		}

		if i_e {
			self.cwnd += tail.hint() as f64;
		}

		if c_e >= 1 {
			let mtu = self.params.mtu as f64;

			if self.cwnd > mtu {
				self.cwnd = (self.cwnd - c_e as f64 * self.params.beta * mtu).max(mtu / 2.0);
			} else {
				self.cwnd = (self.cwnd / 2.0).max(self.params.gamma * mtu);
			}
		} else {
			self.cwnd = self.cwnd.max(self.params.mtu as f64);
		}

		AckOutcome { rtt, reset_deadline }
	}

	/// Invoked by the sender's state-reset timer if no further congestion signal arrived.
	pub fn force_slow_start(&mut self) {
		self.state = CcState::SlowStart;
	}

	/// Receiver-side hook: records a data packet's congestion sample (spec.md §4.7 "Receiver").
	pub fn receiver_record(&mut self, psn: u32, size: u32, field: CaqmField) {
		self.recv.insert(psn, (size, field));
	}

	/// Receiver-side hook: folds every recorded sample in `[psn_start, psn_end)` into one CETPH
	/// tail, clearing those samples.
	pub fn receiver_build_ack(&mut self, psn_start: u32, psn_end: u32) -> CetphTail {
		let mut data_byte_recvd: u32 = 0;
		let mut ce: u8 = 0;
		let mut ie = false;
		let mut hint_e: u16 = 0;

		for psn in psn_start..psn_end {
			let Some((size, field)) = self.recv.remove(&psn) else { continue };

			data_byte_recvd = data_byte_recvd.wrapping_add(size);

			if field.c() {
				ce = ce.saturating_add(1);
			} else if field.i() {
				ie = true;
				hint_e = hint_e.saturating_add(field.hint() as u16);
			}
		}

		if data_byte_recvd as u64 > (u32::MAX as f64 * 0.9) as u64 {
			data_byte_recvd = data_byte_recvd.wrapping_sub(1u32 << 31);
		}

		CetphTail::new(false, ie, ce, hint_e)
	}
}

/// The switch-side per-output-port CAQM state (spec.md §4.7 "Switch").
pub struct CaqmSwitchPort {
	cc: f64,
	tx_size: u32,
	dc: f64,
	credit_allocated: f64,
}

impl Default for CaqmSwitchPort {
	fn default() -> Self {
		Self { cc: 0.0, tx_size: 0, dc: 0.0, credit_allocated: 0.0 }
	}
}

impl CaqmSwitchPort {
	/// Called every `ccUpdatePeriod` (spec.md §4.7).
	pub fn periodic_update(&mut self, period: Duration, rate: u64, qt: u32, egress_queue_bytes: u32, lambda: f64) {
		let period_bytes = period.as_secs_f64() * rate as f64 / 8.0;

		self.cc = lambda * (period_bytes - self.tx_size as f64 + qt as f64 - egress_queue_bytes as f64 - self.credit_allocated);
		self.tx_size = 0;
		self.dc = 0.0;
		self.credit_allocated = 0.0;
	}

	/// Called for every forwarded data packet (non-IPv4-payload packets don't reach here).
	pub fn on_forward(&mut self, field: &mut CaqmField, mtu: u32, beta: f64, mark_prob: f64, rng: &mut impl Rng) {
		let mtu_beta = beta * mtu as f64;
		let hint_i = if field.i() { field.hint() as f64 } else { 0.0 };

		if field.c() {
			self.cc += mtu_beta;
			self.credit_allocated -= mtu_beta;
			return;
		}

		if self.cc >= hint_i {
			self.cc -= hint_i;
			self.credit_allocated += hint_i;
		} else if self.cc >= 0.0 {
			if rng.gen_bool(mark_prob) {
				field.set_c(true);
				field.set_i(false);
				self.dc += mtu_beta;
			} else if self.dc >= hint_i {
				self.dc -= hint_i;
			} else {
				field.set_i(false);
			}
		} else {
			field.set_c(true);
			field.set_i(false);
			self.cc += mtu_beta;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn slow_start_always_marks_full_hint() {
		let mut caqm = Caqm::new(CaqmParams::default());
		let field = caqm.on_send(0, 1024, Duration::ZERO);

		assert!(field.i());
		assert!(!field.c());
		assert_eq!(field.hint(), 32);
	}

	#[test]
	fn congestion_signal_shrinks_cwnd() {
		let mut caqm = Caqm::new(CaqmParams::default());
		caqm.on_send(0, 1024, Duration::ZERO);

		let tail = CetphTail::new(false, false, 2, 0);
		let before = caqm.cwnd;
		caqm.on_ack(0, tail, Duration::from_micros(1));

		assert!(caqm.cwnd < before);
		assert_eq!(caqm.state as u8, CcState::CongestionAvoidance as u8);
	}
}

//! Rate governor (§4.B): two independent, deterministic admission caps.
//!
//! Deliberately not a classic token bucket — no burst credit, no smoothing
//! window. Each cap tracks only `last_issue`; the next admission time is
//! `last_issue + (cost of one probe) / rate`. This is what makes total scan
//! wall-clock predictable from `probes / rate` (§4.B, §8 property 7).

use std::time::{Duration, Instant};

use crate::sys::PROBE_PACKET_BYTES;

const DEFAULT_BANDWIDTH_BPS: u64 = 250_000;

/// A single deterministic cap: "you may not issue again until `last + cost`".
#[derive(Clone, Copy, Debug)]
struct Cap {
    /// Nanoseconds of delay charged per probe admitted; `None` means
    /// unlimited (packet-rate cap with no `-P` given).
    cost_per_probe: Option<Duration>,
    last_issue: Option<Instant>,
}

impl Cap {
    fn unlimited() -> Cap {
        Cap { cost_per_probe: None, last_issue: None }
    }

    fn with_cost(cost: Duration) -> Cap {
        Cap { cost_per_probe: Some(cost), last_issue: None }
    }

    fn allowed_at(&self) -> Option<Instant> {
        match (self.cost_per_probe, self.last_issue) {
            (Some(cost), Some(last)) => Some(last + cost),
            _ => None,
        }
    }

    fn record_issue(&mut self, now: Instant) {
        if self.cost_per_probe.is_some() {
            self.last_issue = Some(now);
        }
    }
}

/// Admits probes subject to a bandwidth cap (bits/sec) and a packet-rate cap
/// (probes/sec), both keyed to the monotonic clock (§3 "Rate state").
pub struct RateGovernor {
    bandwidth: Cap,
    packet_rate: Cap,
}

impl RateGovernor {
    /// `bandwidth_bps == 0` or `packet_rate_pps == Some(0)` is rejected by
    /// the CLI layer as a configuration error (§7); this constructor assumes
    /// already-validated inputs.
    pub fn new(bandwidth_bps: u64, packet_rate_pps: Option<u64>) -> RateGovernor {
        let packet_bits = PROBE_PACKET_BYTES * 8;
        let bandwidth_cost = Duration::from_secs_f64(packet_bits as f64 / bandwidth_bps as f64);

        let packet_rate = match packet_rate_pps {
            Some(pps) if pps > 0 => Cap::with_cost(Duration::from_secs_f64(1.0 / pps as f64)),
            _ => Cap::unlimited(),
        };

        RateGovernor {
            bandwidth: Cap::with_cost(bandwidth_cost),
            packet_rate,
        }
    }

    pub fn unbounded() -> RateGovernor {
        RateGovernor::new(DEFAULT_BANDWIDTH_BPS, None)
    }

    /// The earliest instant at which the next probe may be admitted. `None`
    /// if admission is allowed right now.
    pub fn admit_at(&self) -> Option<Instant> {
        match (self.bandwidth.allowed_at(), self.packet_rate.allowed_at()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// True if a probe may be admitted at `now` without waiting.
    pub fn can_admit(&self, now: Instant) -> bool {
        self.admit_at().map_or(true, |at| now >= at)
    }

    /// Record that a probe was admitted at `now`, regardless of how its
    /// `connect` subsequently resolves (§9: a fast `open` still consumed
    /// bandwidth on the wire, so admission-time accounting always applies).
    pub fn record_issue(&mut self, now: Instant) {
        self.bandwidth.record_issue(now);
        self.packet_rate.record_issue(now);
    }
}

impl Default for RateGovernor {
    fn default() -> RateGovernor {
        RateGovernor::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_packet_rate_never_blocks_admission() {
        let gov = RateGovernor::new(1_000_000_000, None);
        assert!(gov.can_admit(Instant::now()));
    }

    #[test]
    fn bandwidth_cap_delays_the_next_probe() {
        let mut gov = RateGovernor::new(8 * 74, None); // 1 probe/sec at 74-byte packets
        let t0 = Instant::now();
        assert!(gov.can_admit(t0));
        gov.record_issue(t0);

        // Immediately after issuing, admission should not be allowed again.
        assert!(!gov.can_admit(t0));
        let at = gov.admit_at().unwrap();
        assert!(at > t0);
        assert!(gov.can_admit(at));
    }

    #[test]
    fn effective_admission_is_max_of_both_caps() {
        // Bandwidth cap allows ~1000 probes/sec; packet-rate caps at 1/sec.
        let mut gov = RateGovernor::new(100_000_000, Some(1));
        let t0 = Instant::now();
        gov.record_issue(t0);
        let at = gov.admit_at().unwrap();
        assert!(at >= t0 + Duration::from_millis(990));
    }

    #[test]
    fn no_burst_credit_is_accumulated_while_idle() {
        let mut gov = RateGovernor::new(8 * 74, None);
        let t0 = Instant::now();
        gov.record_issue(t0);
        // Wait far longer than one interval, then issue twice back to back.
        let much_later = t0 + Duration::from_secs(10);
        assert!(gov.can_admit(much_later));
        gov.record_issue(much_later);
        // The next admission is exactly one interval after the *last* issue,
        // not reduced by the idle time that preceded it.
        let at = gov.admit_at().unwrap();
        assert!(at >= much_later + Duration::from_millis(900));
    }
}

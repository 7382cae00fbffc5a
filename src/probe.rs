//! Core data model (§3): the probe tuple, its lifecycle states, and the
//! verdicts the engine ultimately emits.

use std::fmt;
use std::net::Ipv4Addr;

/// One attempt to connect to one `(ip, port)`.
///
/// Two probes are equivalent when `(ip, port)` match regardless of `attempt`
/// (§3); `PartialEq`/`Hash` are deliberately *not* derived on the full tuple
/// anywhere dedup matters — see [`crate::sink::VerdictSink`] and
/// [`crate::blocklist`] callers, which key on `(ip, port)` explicitly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Probe {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub attempt: u32,
}

impl Probe {
    pub fn first(ip: Ipv4Addr, port: u16) -> Probe {
        Probe { ip, port, attempt: 0 }
    }

    /// The probe to retry with, consuming one unit of the retry budget.
    pub fn retry(&self) -> Probe {
        Probe { ip: self.ip, port: self.port, attempt: self.attempt + 1 }
    }

    pub fn endpoint(&self) -> (Ipv4Addr, u16) {
        (self.ip, self.port)
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (attempt {})", self.ip, self.port, self.attempt)
    }
}

/// What happened to a single `connect` attempt, before it is turned into a
/// [`Verdict`] (possibly after consuming a retry).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Handshake completed.
    Connected,
    /// Peer actively refused (RST / ECONNREFUSED-equivalent).
    Refused,
    /// Host or network unreachable — terminal, but not proof of an open or
    /// closed port.
    Unreachable,
    /// No signal arrived before the RTT deadline.
    TimedOut,
    /// An error/hang-up readiness event whose `SO_ERROR` value isn't one of
    /// the recognised refused/unreachable codes (§4.D step 4: "with other →
    /// retryable filtered"). Shares `TimedOut`'s retry budget.
    Other,
}

/// The three outcomes §3 allows the engine to ever emit for an `(ip, port)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Open,
    Closed,
    Filtered,
}

impl Verdict {
    pub fn from_outcome(outcome: ProbeOutcome, retries_exhausted: bool, closed_detectable: bool) -> Option<Verdict> {
        match outcome {
            ProbeOutcome::Connected => Some(Verdict::Open),
            ProbeOutcome::Refused => {
                // §3 invariant: on platforms where refused is indistinguishable
                // from timeout, `closed` must never be produced.
                Some(if closed_detectable { Verdict::Closed } else { Verdict::Filtered })
            }
            ProbeOutcome::Unreachable => Some(Verdict::Filtered),
            ProbeOutcome::TimedOut | ProbeOutcome::Other => {
                if retries_exhausted {
                    Some(Verdict::Filtered)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Open => "open",
            Verdict::Closed => "closed",
            Verdict::Filtered => "filtered",
        };
        f.write_str(s)
    }
}

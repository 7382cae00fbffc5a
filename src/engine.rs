//! Probe engine (§4.D): the core admission/issue/wait/classify/retry loop
//! that owns every other component and drives the scan to completion.

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::blocklist::Blocklist;
use crate::clock::{Clock, MonotonicClock};
use crate::config::ScanConfig;
use crate::error::{ScanError, ScanResult};
use crate::multiplexer::Multiplexer;
use crate::probe::{Probe, ProbeOutcome, Verdict};
use crate::rate_governor::RateGovernor;
use crate::sink::{Reporter, VerdictSink};
use crate::sys::socket::{ConnectAttempt, ConnectSocket};
use crate::sys::{self};
use crate::target_stream::{HostRanges, TargetStream};
use crate::token::Token;
use std::os::unix::io::AsRawFd;

/// A socket that has been registered with the multiplexer, still awaiting a
/// verdict (§3 "In-flight record").
struct InFlightRecord {
    probe: Probe,
    socket: ConnectSocket,
    deadline: Instant,
}

/// Running totals surfaced once the scan completes, for the `-d` summary
/// line and for anything embedding the engine as a library.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanStats {
    pub open: u64,
    pub closed: u64,
    pub filtered: u64,
    pub probes_issued: u64,
}

/// Orchestrates every other component (§2 control flow). Generic over the
/// clock so tests can drive rate pacing and RTT deadlines deterministically;
/// `Engine::new` wires up the real, monotonic one.
pub struct Engine<C: Clock = MonotonicClock> {
    target_stream: TargetStream,
    blocklist: Blocklist,
    governor: RateGovernor,
    multiplexer: Multiplexer,
    sink: VerdictSink,
    clock: C,
    in_flight: Slab<InFlightRecord>,
    max_sockets: usize,
    retries: u32,
    rtt: Duration,
    /// This platform's readiness backends always distinguish a refused
    /// connection from a bare timeout via `SO_ERROR`, so `closed` is always
    /// producible here (§3, §8 property 12 only bites platforms that can't).
    closed_detectable: bool,
    stats: ScanStats,
}

impl Engine<MonotonicClock> {
    pub fn new(config: &ScanConfig, reporter: Box<dyn Reporter>) -> ScanResult<Engine<MonotonicClock>> {
        Engine::with_clock(config, reporter, MonotonicClock)
    }
}

impl<C: Clock> Engine<C> {
    pub fn with_clock(config: &ScanConfig, reporter: Box<dyn Reporter>, clock: C) -> ScanResult<Engine<C>> {
        config.validate()?;

        let hosts = HostRanges::new(config.hosts.clone());
        let target_stream = TargetStream::new(hosts, config.ports.clone());
        let blocklist = Blocklist::from_addrs(config.blocklist.iter().copied());
        let governor = RateGovernor::new(config.bandwidth_bps, config.packet_rate_pps);
        let multiplexer = Multiplexer::new(config.backend)?;
        let sink = VerdictSink::new(reporter, config.report_closed);
        let max_sockets = config.max_sockets.unwrap_or_else(sys::default_max_sockets);

        Ok(Engine {
            target_stream,
            blocklist,
            governor,
            multiplexer,
            sink,
            clock,
            in_flight: Slab::new(),
            max_sockets,
            retries: config.retries,
            rtt: config.rtt,
            closed_detectable: true,
            stats: ScanStats::default(),
        })
    }

    pub fn total_forward_probes(&self) -> u64 {
        self.target_stream.total_forward_probes()
    }

    /// Run the scan to completion (§4.D step 6: "until target stream
    /// exhausted AND in-flight empty AND retry queue empty").
    pub fn run(&mut self) -> ScanResult<ScanStats> {
        loop {
            self.admit_loop()?;

            if self.target_stream.is_exhausted() && self.in_flight.is_empty() {
                break;
            }

            let wait_for = self.compute_wait_for();
            let events = self.multiplexer.wait(wait_for)?.to_vec();

            for event in events {
                self.handle_event(event.token().0);
            }

            self.handle_timeouts();
        }

        Ok(self.stats)
    }

    /// §4.D step 1: admit probes while the pool has room and the governor
    /// allows it.
    fn admit_loop(&mut self) -> ScanResult<()> {
        loop {
            if self.in_flight.len() >= self.max_sockets {
                return Ok(());
            }

            let now = self.clock.now();
            if !self.governor.can_admit(now) {
                // Must service I/O before issuing more (§4.D "Tie-break").
                return Ok(());
            }

            let low_water = self.low_water_mark();
            let probe = match self.target_stream.next(self.in_flight.len(), low_water) {
                Some(probe) => probe,
                None => return Ok(()),
            };

            if self.blocklist.is_blocked(probe.ip) {
                // No verdict, no network activity (§4.G) — and no rate
                // token consumed, since nothing was issued.
                continue;
            }

            self.issue(probe, now)?;
        }
    }

    fn issue(&mut self, probe: Probe, now: Instant) -> ScanResult<()> {
        let addr = SocketAddrV4::new(probe.ip, probe.port);

        match ConnectSocket::connect(addr) {
            Ok(ConnectAttempt::Completed(_socket)) => {
                self.governor.record_issue(now);
                self.stats.probes_issued += 1;
                self.complete(probe, ProbeOutcome::Connected);
            }
            Ok(ConnectAttempt::Refused) => {
                self.governor.record_issue(now);
                self.stats.probes_issued += 1;
                self.complete(probe, ProbeOutcome::Refused);
            }
            Ok(ConnectAttempt::Unreachable) => {
                self.governor.record_issue(now);
                self.stats.probes_issued += 1;
                self.complete(probe, ProbeOutcome::Unreachable);
            }
            Ok(ConnectAttempt::Pending(socket)) => {
                self.governor.record_issue(now);
                self.stats.probes_issued += 1;
                let fd = socket.as_raw_fd();
                let deadline = now + self.rtt;
                let key = self.in_flight.insert(InFlightRecord { probe, socket, deadline });
                if let Err(e) = self.multiplexer.register(fd, Token(key)) {
                    log::warn!("failed to register {probe} with the multiplexer: {e}");
                    self.in_flight.remove(key);
                    self.target_stream.push_retry(probe);
                }
            }
            Err(e) => self.handle_connect_error(probe, e)?,
        }

        Ok(())
    }

    /// §7 "Resource-exhaustion errors" and "Per-probe fatal errors".
    fn handle_connect_error(&mut self, probe: Probe, err: std::io::Error) -> ScanResult<()> {
        match err.raw_os_error() {
            Some(libc::EMFILE) | Some(libc::ENFILE) => {
                log::warn!("descriptor limit reached opening a socket for {probe} ({err}); shrinking socket pool");
                self.max_sockets = self.max_sockets.saturating_sub(1).max(1);
                // The connect attempt never actually happened, so this
                // doesn't consume part of the retry budget.
                self.target_stream.push_retry(probe);
                Ok(())
            }
            Some(libc::EACCES) | Some(libc::EPERM) => Err(ScanError::Fatal {
                addr: probe.ip,
                reason: err.to_string(),
            }),
            _ => {
                log::debug!("{probe} failed before connect completed: {err}");
                self.stats.probes_issued += 1;
                self.complete(probe, ProbeOutcome::Other);
                Ok(())
            }
        }
    }

    /// §4.D step 4. The multiplexer only ever arms writable/error/hup
    /// interest, so every event reaching here is one of those three; `SO_ERROR`
    /// is the authoritative source regardless of which flag fired (§9).
    fn handle_event(&mut self, key: usize) {
        let Some(record) = self.in_flight.try_remove(key) else {
            return;
        };

        let _ = self.multiplexer.deregister(record.socket.as_raw_fd());

        match record.socket.take_error() {
            Ok(None) => self.complete(record.probe, ProbeOutcome::Connected),
            Ok(Some(err)) | Err(err) => self.classify_socket_error(record.probe, err),
        }
    }

    fn classify_socket_error(&mut self, probe: Probe, err: std::io::Error) {
        let outcome = match err.raw_os_error() {
            Some(libc::ECONNREFUSED) => ProbeOutcome::Refused,
            Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH) => ProbeOutcome::Unreachable,
            _ => ProbeOutcome::Other,
        };
        self.complete(probe, outcome);
    }

    /// §4.D step 5.
    fn handle_timeouts(&mut self) {
        let now = self.clock.now();
        let expired: Vec<usize> = self
            .in_flight
            .iter()
            .filter(|(_, record)| record.deadline <= now)
            .map(|(key, _)| key)
            .collect();

        for key in expired {
            let record = self.in_flight.remove(key);
            let _ = self.multiplexer.deregister(record.socket.as_raw_fd());
            self.complete(record.probe, ProbeOutcome::TimedOut);
        }
    }

    /// Turn an outcome into a verdict (consuming the retry budget if the
    /// outcome is retryable) and either emit it or requeue the probe.
    fn complete(&mut self, probe: Probe, outcome: ProbeOutcome) {
        let retries_exhausted = probe.attempt >= self.retries;

        match Verdict::from_outcome(outcome, retries_exhausted, self.closed_detectable) {
            Some(verdict) => {
                match verdict {
                    Verdict::Open => self.stats.open += 1,
                    Verdict::Closed => self.stats.closed += 1,
                    Verdict::Filtered => self.stats.filtered += 1,
                }
                self.sink.accept(probe.ip, probe.port, verdict);
            }
            None => self.target_stream.push_retry(probe.retry()),
        }
    }

    /// §4.D step 2: `min(next admission delay, earliest deadline - now)`.
    fn compute_wait_for(&self) -> Option<Duration> {
        let now = self.clock.now();

        let admit_delay = self.governor.admit_at().map(|at| at.saturating_duration_since(now));
        let deadline_delay = self
            .in_flight
            .iter()
            .map(|(_, record)| record.deadline)
            .min()
            .map(|d| d.saturating_duration_since(now));

        match (admit_delay, deadline_delay) {
            (Some(a), Some(d)) => Some(a.min(d)),
            (Some(a), None) => Some(a),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        }
    }

    fn low_water_mark(&self) -> usize {
        (self.max_sockets / 4).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::BackendKind;
    use crate::sink::CollectingReporter;
    use std::cell::RefCell;
    use std::net::{Ipv4Addr, TcpListener};
    use std::rc::Rc;

    struct SharedReporter(Rc<RefCell<Vec<(Ipv4Addr, u16, Verdict)>>>);

    impl Reporter for SharedReporter {
        fn report(&mut self, ip: Ipv4Addr, port: u16, verdict: Verdict) {
            self.0.borrow_mut().push((ip, port, verdict));
        }
    }

    fn loopback_config(port: u16, retries: u32) -> ScanConfig {
        let addr = u32::from(Ipv4Addr::LOCALHOST);
        ScanConfig {
            hosts: vec![(addr, addr)],
            ports: vec![port],
            bandwidth_bps: crate::config::DEFAULT_BANDWIDTH_BPS,
            packet_rate_pps: None,
            rtt: Duration::from_millis(200),
            max_sockets: Some(16),
            retries,
            backend: BackendKind::Auto,
            report_closed: true,
            blocklist: Vec::new(),
            verbose: false,
        }
    }

    #[test]
    fn open_port_on_loopback_is_reported_open() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = loopback_config(port, 0);
        let handle = Rc::new(RefCell::new(Vec::new()));
        let reporter = Box::new(SharedReporter(handle.clone()));
        let mut engine = Engine::new(&config, reporter).unwrap();
        let stats = engine.run().unwrap();

        assert_eq!(stats.open, 1);
        assert_eq!(handle.borrow().as_slice(), &[(Ipv4Addr::LOCALHOST, port, Verdict::Open)]);
        drop(listener);
    }

    #[test]
    fn closed_port_on_loopback_is_reported_closed() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = loopback_config(port, 0);
        let handle = Rc::new(RefCell::new(Vec::new()));
        let reporter = Box::new(SharedReporter(handle.clone()));
        let mut engine = Engine::new(&config, reporter).unwrap();
        let stats = engine.run().unwrap();

        assert_eq!(stats.closed, 1);
        assert_eq!(handle.borrow().as_slice(), &[(Ipv4Addr::LOCALHOST, port, Verdict::Closed)]);
    }

    #[test]
    fn unbound_port_times_out_to_filtered_after_exhausting_retries() {
        // The kernel answers loopback connects to an unbound port instantly
        // (refused), so this mostly exercises `closed`/`filtered` collapse
        // rather than a real RTT timeout; it still confirms the engine
        // settles on exactly one verdict without hanging.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = loopback_config(port, 1);
        let reporter = Box::new(CollectingReporter::default());
        let mut engine = Engine::new(&config, reporter).unwrap();
        let stats = engine.run().unwrap();

        assert_eq!(stats.open + stats.closed + stats.filtered, 1);
    }

    #[test]
    fn blocklisted_target_never_produces_a_verdict() {
        let mut config = loopback_config(80, 0);
        config.blocklist = vec![Ipv4Addr::LOCALHOST];

        let reporter = Box::new(CollectingReporter::default());
        let mut engine = Engine::new(&config, reporter).unwrap();
        let stats = engine.run().unwrap();

        assert_eq!(stats.open + stats.closed + stats.filtered, 0);
    }
}

//! Target stream (§4.A): a lazy, restartable, port-major cross product of
//! hosts × ports, plus a bounded retry FIFO.
//!
//! Hosts are kept as a small list of inclusive `u32` ranges rather than an
//! enumerated `Vec<Ipv4Addr>` (§3 "Target stream state": the cross product
//! must never be materialised). A CIDR block or `a.b.c.d-w.x.y.z` range
//! collapses to one `(start, end)` pair regardless of how many addresses it
//! spans, so restarting the host cursor for the next port is `O(1)`.

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;

use crate::probe::Probe;

/// An immutable, shareable list of inclusive IPv4 address ranges.
#[derive(Clone, Debug)]
pub struct HostRanges {
    ranges: Rc<[(u32, u32)]>,
}

impl HostRanges {
    pub fn new(ranges: Vec<(u32, u32)>) -> HostRanges {
        HostRanges { ranges: ranges.into() }
    }

    pub fn from_addrs(addrs: impl IntoIterator<Item = Ipv4Addr>) -> HostRanges {
        HostRanges::new(addrs.into_iter().map(|a| (u32::from(a), u32::from(a))).collect())
    }

    /// Total number of addresses covered, for progress reporting (§4.A:
    /// "its length must be computable up front ... but must not be
    /// materialised as a list").
    pub fn total(&self) -> u64 {
        self.ranges.iter().map(|&(s, e)| u64::from(e) - u64::from(s) + 1).sum()
    }

    fn cursor(&self) -> HostCursor {
        HostCursor {
            ranges: self.ranges.clone(),
            segment: 0,
            next: self.ranges.first().map(|&(s, _)| s),
        }
    }
}

/// A restartable walk over a [`HostRanges`]. Cheap to recreate: holds only
/// the shared range list and a `(segment, value)` position.
struct HostCursor {
    ranges: Rc<[(u32, u32)]>,
    segment: usize,
    next: Option<u32>,
}

impl Iterator for HostCursor {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        loop {
            let (_, end) = *self.ranges.get(self.segment)?;
            let value = self.next?;
            let addr = Ipv4Addr::from(value);

            if value >= end {
                self.segment += 1;
                self.next = self.ranges.get(self.segment).map(|&(s, _)| s);
            } else {
                self.next = Some(value + 1);
            }

            return Some(addr);
        }
    }
}

/// Lazy, restartable, port-major sequence of probes with a retry FIFO
/// (§4.A, §3 "Target stream state").
pub struct TargetStream {
    hosts: HostRanges,
    ports: Rc<[u16]>,
    port_index: usize,
    host_cursor: HostCursor,
    retry_queue: VecDeque<Probe>,
}

impl TargetStream {
    pub fn new(hosts: HostRanges, ports: Vec<u16>) -> TargetStream {
        let ports: Rc<[u16]> = ports.into();
        let host_cursor = hosts.cursor();
        TargetStream {
            hosts,
            ports,
            port_index: 0,
            host_cursor,
            retry_queue: VecDeque::new(),
        }
    }

    /// Total probes the forward cursor will ever produce (excludes retries,
    /// which are a function of runtime timeouts, not input size).
    pub fn total_forward_probes(&self) -> u64 {
        self.hosts.total() * self.ports.len() as u64
    }

    fn forward_exhausted(&self) -> bool {
        self.port_index >= self.ports.len()
    }

    fn next_forward(&mut self) -> Option<Probe> {
        loop {
            if self.forward_exhausted() {
                return None;
            }

            match self.host_cursor.next() {
                Some(ip) => {
                    let port = self.ports[self.port_index];
                    return Some(Probe::first(ip, port));
                }
                None => {
                    self.port_index += 1;
                    self.host_cursor = self.hosts.cursor();
                }
            }
        }
    }

    /// Pull the next probe to admit. Retries are drained ahead of the
    /// forward cursor only once the forward cursor is exhausted, or the
    /// caller reports the in-flight set has dropped below `low_water_mark`
    /// (§4.A) — this prevents retry starvation without letting retries
    /// jump the port-major order under normal load (§8 property 6, "modulo
    /// retries").
    pub fn next(&mut self, in_flight: usize, low_water_mark: usize) -> Option<Probe> {
        let retries_due = self.forward_exhausted() || in_flight < low_water_mark;

        if retries_due {
            if let Some(probe) = self.retry_queue.pop_front() {
                return Some(probe);
            }
        }

        self.next_forward()
    }

    pub fn push_retry(&mut self, probe: Probe) {
        self.retry_queue.push_back(probe);
    }

    /// True once nothing more will ever come out of `next`.
    pub fn is_exhausted(&self) -> bool {
        self.forward_exhausted() && self.retry_queue.is_empty()
    }

    pub fn retry_queue_len(&self) -> usize {
        self.retry_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(hosts: Vec<(u8, u8, u8, u8)>, ports: Vec<u16>) -> TargetStream {
        let ranges = hosts
            .into_iter()
            .map(|(a, b, c, d)| {
                let v = u32::from(Ipv4Addr::new(a, b, c, d));
                (v, v)
            })
            .collect();
        TargetStream::new(HostRanges::new(ranges), ports)
    }

    #[test]
    fn traversal_is_port_major() {
        let mut s = stream(
            vec![(10, 0, 0, 1), (10, 0, 0, 2)],
            vec![22, 80],
        );

        let mut seen = Vec::new();
        while let Some(p) = s.next(usize::MAX, 0) {
            seen.push((p.ip, p.port));
        }

        assert_eq!(
            seen,
            vec![
                (Ipv4Addr::new(10, 0, 0, 1), 22),
                (Ipv4Addr::new(10, 0, 0, 2), 22),
                (Ipv4Addr::new(10, 0, 0, 1), 80),
                (Ipv4Addr::new(10, 0, 0, 2), 80),
            ]
        );
    }

    #[test]
    fn retries_wait_for_forward_exhaustion_or_low_water_mark() {
        let mut s = stream(vec![(10, 0, 0, 1), (10, 0, 0, 2)], vec![80]);
        let first = s.next(usize::MAX, 0).unwrap();
        s.push_retry(first.retry());

        // Forward cursor isn't exhausted and in-flight is above the mark:
        // the retry must not jump ahead of the second host.
        let next = s.next(10, 2).unwrap();
        assert_eq!(next.ip, Ipv4Addr::new(10, 0, 0, 2));

        // Now forward is exhausted; the retry comes out next.
        let next = s.next(10, 2).unwrap();
        assert_eq!(next, first.retry());
        assert!(s.is_exhausted());
    }

    #[test]
    fn low_water_mark_releases_retries_early() {
        let mut s = stream(vec![(10, 0, 0, 1), (10, 0, 0, 2), (10, 0, 0, 3)], vec![80]);
        let first = s.next(usize::MAX, 0).unwrap();
        s.push_retry(first.retry());

        // in_flight (1) below low_water_mark (5): retry releases immediately
        // even though the forward cursor still has hosts left.
        let next = s.next(1, 5).unwrap();
        assert_eq!(next, first.retry());
    }

    #[test]
    fn total_forward_probes_is_hosts_times_ports_without_enumerating() {
        let ranges = HostRanges::new(vec![(0, 1_000_000)]);
        let s = TargetStream::new(ranges, vec![80, 443, 8080]);
        assert_eq!(s.total_forward_probes(), 1_000_001 * 3);
    }
}

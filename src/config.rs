//! Scan configuration (§4.J): the record the CLI populates and the engine
//! consumes. Holds no scanning logic of its own — just validated, typed
//! fields plus the defaults from §6's flag table.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{ScanError, ScanResult};
use crate::multiplexer::BackendKind;

pub const DEFAULT_BANDWIDTH_BPS: u64 = 250_000;
pub const DEFAULT_RTT: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRIES: u32 = 2;

/// A fully validated scan request (§6 "CLI surface").
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub hosts: Vec<(u32, u32)>,
    pub ports: Vec<u16>,
    pub bandwidth_bps: u64,
    pub packet_rate_pps: Option<u64>,
    pub rtt: Duration,
    pub max_sockets: Option<usize>,
    pub retries: u32,
    pub backend: BackendKind,
    pub report_closed: bool,
    pub blocklist: Vec<Ipv4Addr>,
    pub verbose: bool,
}

impl ScanConfig {
    /// Reject combinations that §7 says must be caught before any probe is
    /// issued, rather than trusted to surface naturally downstream.
    pub fn validate(&self) -> ScanResult<()> {
        if self.hosts.is_empty() {
            return Err(ScanError::Config("no targets given".into()));
        }

        if self.ports.is_empty() {
            return Err(ScanError::Config("no ports given".into()));
        }

        if self.bandwidth_bps == 0 {
            return Err(ScanError::Config("bandwidth cap must be greater than zero".into()));
        }

        if self.packet_rate_pps == Some(0) {
            return Err(ScanError::Config("packet-rate cap must be greater than zero, or omitted".into()));
        }

        if self.rtt.is_zero() {
            return Err(ScanError::Config("RTT must be greater than zero".into()));
        }

        if self.max_sockets == Some(0) {
            return Err(ScanError::Config("max sockets must be greater than zero".into()));
        }

        Ok(())
    }
}

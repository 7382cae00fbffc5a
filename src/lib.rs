//! A single-threaded, event-driven nonblocking-connect TCP port scanner,
//! intended to run from an unprivileged host against potentially millions of
//! target endpoints.
//!
//! The engine never opens a raw socket and never spawns a thread: it issues
//! ordinary nonblocking `connect`s, multiplexes their completion with
//! `epoll` (falling back to `poll` where `epoll` isn't available), and
//! classifies each outcome into one of `open`, `closed`, `filtered` within a
//! bounded round-trip budget.
//!
//! ```no_run
//! use pivotscan::config::ScanConfig;
//! use pivotscan::engine::Engine;
//! use pivotscan::multiplexer::BackendKind;
//! use pivotscan::sink::StdoutReporter;
//!
//! let config = ScanConfig {
//!     hosts: vec![(u32::from(std::net::Ipv4Addr::LOCALHOST), u32::from(std::net::Ipv4Addr::LOCALHOST))],
//!     ports: vec![22, 80, 443],
//!     bandwidth_bps: 250_000,
//!     packet_rate_pps: None,
//!     rtt: std::time::Duration::from_millis(500),
//!     max_sockets: None,
//!     retries: 2,
//!     backend: BackendKind::Auto,
//!     report_closed: false,
//!     blocklist: Vec::new(),
//!     verbose: false,
//! };
//!
//! let mut engine = Engine::new(&config, Box::new(StdoutReporter)).unwrap();
//! engine.run().unwrap();
//! ```

#[macro_use]
extern crate log;

pub(crate) mod sys;

pub mod blocklist;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod multiplexer;
pub mod probe;
pub mod rate_governor;
pub mod ready;
pub mod sink;
pub mod target_stream;
pub mod targets;
mod token;

pub use ready::Ready;
pub use token::Token;

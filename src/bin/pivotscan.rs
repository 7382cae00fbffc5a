//! CLI entry point (§4.J, §6). Parses arguments into a `ScanConfig`, installs
//! the logger, runs the engine, and maps the result to a process exit code.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info};

use pivotscan::config::ScanConfig;
use pivotscan::engine::Engine;
use pivotscan::error::{ScanError, ScanResult};
use pivotscan::sink::StdoutReporter;
use pivotscan::targets::{parse_blocklist, parse_bandwidth, parse_host_expr, parse_host_file, parse_port_expr};

/// Single-threaded, nonblocking-connect TCP port scanner for unprivileged
/// pivot hosts.
#[derive(Parser, Debug)]
#[command(name = "pivotscan", version)]
struct Args {
    /// Targets: comma-separated single IPs, CIDR blocks, and hyphenated
    /// ranges (e.g. `10.0.0.1,10.0.1.0/24,10.0.2.1-10.0.2.50`).
    targets: Option<String>,

    /// Read targets from FILE instead of (or in addition to) positional
    /// targets, one expression per line.
    #[arg(short = 'f', long = "target-file", value_name = "FILE")]
    target_file: Option<PathBuf>,

    /// Port list: `N`, `N-M`, `all`, or a comma-separated combination.
    #[arg(short = 'p', long = "ports", default_value = "1-65535")]
    ports: String,

    /// Bandwidth cap in bits/sec; accepts `k`/`m` suffixes.
    #[arg(short = 'b', long = "bandwidth", default_value = "250000")]
    bandwidth: String,

    /// Packet-rate cap in probes/sec; default unlimited.
    #[arg(short = 'P', long = "packet-rate")]
    packet_rate: Option<u64>,

    /// Per-probe deadline in seconds.
    #[arg(short = 'R', long = "rtt", default_value_t = 0.5)]
    rtt: f64,

    /// Override the socket pool cap; default auto-detected from the
    /// descriptor limit.
    #[arg(short = 'm', long = "max-sockets")]
    max_sockets: Option<usize>,

    /// Max retries per probe (timeouts only).
    #[arg(short = 'r', long = "retries", default_value_t = 2)]
    retries: u32,

    /// Readiness backend: `auto`, `epoll`, or `poll`.
    #[arg(short = 't', long = "poll-type", default_value = "auto")]
    poll_type: String,

    /// Emit `closed` verdicts (ignored where unsupported by the platform).
    #[arg(short = 'c', long = "closed")]
    report_closed: bool,

    /// Comma-separated list of IPs to exclude from scanning.
    #[arg(short = 'B', long = "blocklist")]
    blocklist: Option<String>,

    /// Verbose diagnostic output (raises the log filter to `debug`).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

fn build_config(args: &Args) -> ScanResult<ScanConfig> {
    let mut hosts = Vec::new();

    if let Some(expr) = &args.targets {
        hosts.extend(parse_host_expr(expr)?);
    }

    if let Some(path) = &args.target_file {
        hosts.extend(parse_host_file(path)?);
    }

    if hosts.is_empty() {
        return Err(ScanError::Config("no targets given (pass a target list or -f FILE)".into()));
    }

    let backend = args
        .poll_type
        .parse()
        .map_err(ScanError::Config)?;

    let ports = parse_port_expr(&args.ports)?;
    let bandwidth_bps = parse_bandwidth(&args.bandwidth)?;
    let blocklist: Vec<Ipv4Addr> = match &args.blocklist {
        Some(expr) => parse_blocklist(expr)?,
        None => Vec::new(),
    };

    Ok(ScanConfig {
        hosts,
        ports,
        bandwidth_bps,
        packet_rate_pps: args.packet_rate,
        rtt: Duration::from_secs_f64(args.rtt),
        max_sockets: args.max_sockets,
        retries: args.retries,
        backend,
        report_closed: args.report_closed,
        blocklist,
        verbose: args.debug,
    })
}

fn run() -> ScanResult<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = build_config(&args)?;
    config.validate()?;

    let total_hosts: u64 = config.hosts.iter().map(|&(s, e)| u64::from(e) - u64::from(s) + 1).sum();
    debug!(
        "starting scan: {} forward probes across {} port(s)",
        total_hosts * config.ports.len() as u64,
        config.ports.len()
    );

    let mut engine = Engine::new(&config, Box::new(StdoutReporter))?;
    let stats = engine.run()?;

    info!(
        "scan complete: {} open, {} closed, {} filtered, {} probes issued",
        stats.open, stats.closed, stats.filtered, stats.probes_issued
    );

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

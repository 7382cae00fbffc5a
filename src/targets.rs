//! Target expression parser (§4.I, ambient — not part of the core engine,
//! but a real implementation so the binary runs end to end).
//!
//! Turns CIDR blocks, hyphenated ranges, single addresses and port-list
//! syntax into the `(start, end)` ranges and `Vec<u16>` that
//! [`crate::target_stream::TargetStream`] consumes. CIDR bounds are computed
//! with `ipnet` rather than enumerated, matching §3's requirement that a
//! `/8` doesn't cost anything proportional to its size to represent.

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use ipnet::Ipv4Net;

use crate::error::{ScanError, ScanResult};

/// Parse a comma-separated combination of single IPs, CIDR blocks
/// (`a.b.c.d/n`), and hyphenated ranges (`a.b.c.d-w.x.y.z`) into inclusive
/// `u32` address ranges.
pub fn parse_host_expr(expr: &str) -> ScanResult<Vec<(u32, u32)>> {
    let mut ranges = Vec::new();

    for part in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        ranges.push(parse_host_segment(part)?);
    }

    if ranges.is_empty() {
        return Err(ScanError::Config("empty target expression".into()));
    }

    Ok(ranges)
}

fn parse_host_segment(part: &str) -> ScanResult<(u32, u32)> {
    if let Some((lo, hi)) = part.split_once('-') {
        let lo: Ipv4Addr = lo
            .trim()
            .parse()
            .map_err(|_| ScanError::Config(format!("invalid range start '{lo}'")))?;
        let hi: Ipv4Addr = hi
            .trim()
            .parse()
            .map_err(|_| ScanError::Config(format!("invalid range end '{hi}'")))?;
        let (lo, hi) = (u32::from(lo), u32::from(hi));

        if lo > hi {
            return Err(ScanError::Config(format!("range '{part}' has start after end")));
        }

        return Ok((lo, hi));
    }

    if part.contains('/') {
        let net: Ipv4Net = part
            .parse()
            .map_err(|_| ScanError::Config(format!("invalid CIDR block '{part}'")))?;
        return Ok((u32::from(net.network()), u32::from(net.broadcast())));
    }

    let addr: Ipv4Addr = part
        .parse()
        .map_err(|_| ScanError::Config(format!("invalid target '{part}'")))?;
    Ok((u32::from(addr), u32::from(addr)))
}

/// Read newline-separated host expressions from a file (the `-f FILE` flag,
/// §6), each line handled exactly as [`parse_host_expr`] would.
pub fn parse_host_file(path: &Path) -> ScanResult<Vec<(u32, u32)>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ScanError::Config(format!("reading target file '{}': {e}", path.display())))?;

    let mut ranges = Vec::new();
    for line in contents.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')) {
        ranges.extend(parse_host_expr(line)?);
    }

    if ranges.is_empty() {
        return Err(ScanError::Config(format!("target file '{}' contained no targets", path.display())));
    }

    Ok(ranges)
}

/// Parse a port expression: `N`, `N-M`, `all`, or a comma-separated
/// combination (§6, §8 property 10: `all` resolves to `1..=65535`).
pub fn parse_port_expr(expr: &str) -> ScanResult<Vec<u16>> {
    if expr.trim().eq_ignore_ascii_case("all") {
        return Ok((1..=65535u16).collect());
    }

    let mut ports = Vec::new();

    for part in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((lo, hi)) = part.split_once('-') {
            let lo = parse_port_number(lo)?;
            let hi = parse_port_number(hi)?;
            if lo > hi {
                return Err(ScanError::Config(format!("port range '{part}' has start after end")));
            }
            ports.extend(lo..=hi);
        } else {
            ports.push(parse_port_number(part)?);
        }
    }

    if ports.is_empty() {
        return Err(ScanError::Config("empty port expression".into()));
    }

    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

fn parse_port_number(s: &str) -> ScanResult<u16> {
    let n: u32 = s.trim().parse().map_err(|_| ScanError::Config(format!("invalid port '{s}'")))?;
    if n == 0 || n > 65535 {
        return Err(ScanError::Config(format!("port '{s}' out of range 1..=65535")));
    }
    Ok(n as u16)
}

/// Parse a bandwidth expression accepting `k`/`m` suffixes (§6 `-b`).
pub fn parse_bandwidth(expr: &str) -> ScanResult<u64> {
    parse_rate_with_suffix(expr, "bandwidth")
}

fn parse_rate_with_suffix(expr: &str, field: &str) -> ScanResult<u64> {
    let trimmed = expr.trim();
    let (digits, mult) = match trimmed.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&trimmed[..trimmed.len() - 1], 1_000),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&trimmed[..trimmed.len() - 1], 1_000_000),
        _ => (trimmed, 1),
    };

    let base: u64 = digits
        .parse()
        .map_err(|_| ScanError::Config(format!("invalid {field} '{expr}'")))?;

    base.checked_mul(mult)
        .ok_or_else(|| ScanError::Config(format!("{field} '{expr}' overflows")))
}

/// Parse the comma-separated blocklist IP list (`-B`, §6).
pub fn parse_blocklist(expr: &str) -> ScanResult<Vec<Ipv4Addr>> {
    expr.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| ScanError::Config(format!("invalid blocklist entry '{s}'"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// A host file in a throwaway path under the system temp directory,
    /// removed again on drop.
    struct ScratchFile {
        path: std::path::PathBuf,
    }

    impl ScratchFile {
        fn with_contents(contents: &str) -> ScratchFile {
            use std::sync::atomic::{AtomicU32, Ordering};
            static COUNTER: AtomicU32 = AtomicU32::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!("pivotscan-test-{}-{n}", std::process::id()));
            fs::write(&path, contents).unwrap();
            ScratchFile { path }
        }
    }

    impl Drop for ScratchFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    #[test]
    fn host_file_parses_one_expression_per_line_and_skips_comments() {
        let file = ScratchFile::with_contents("10.0.0.1\n# a comment\n\n10.0.1.0/30\n");
        let ranges = parse_host_file(&file.path).unwrap();
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn empty_host_file_is_a_config_error() {
        let file = ScratchFile::with_contents("\n# nothing but comments\n");
        assert!(parse_host_file(&file.path).is_err());
    }

    #[test]
    fn single_host_is_a_degenerate_range() {
        let ranges = parse_host_expr("10.0.0.1").unwrap();
        assert_eq!(ranges, vec![(u32::from(Ipv4Addr::new(10, 0, 0, 1)), u32::from(Ipv4Addr::new(10, 0, 0, 1)))]);
    }

    #[test]
    fn cidr_slash_30_is_exactly_four_addresses() {
        let ranges = parse_host_expr("10.0.0.0/30").unwrap();
        assert_eq!(ranges.len(), 1);
        let (start, end) = ranges[0];
        assert_eq!(end - start + 1, 4);
    }

    #[test]
    fn hyphenated_range_is_inclusive() {
        let ranges = parse_host_expr("10.0.0.1-10.0.0.3").unwrap();
        let (start, end) = ranges[0];
        assert_eq!(end - start + 1, 3);
    }

    #[test]
    fn comma_combination_parses_each_segment() {
        let ranges = parse_host_expr("10.0.0.1,10.0.0.0/30").unwrap();
        assert_eq!(ranges.len(), 2);
    }

    #[test]
    fn range_with_start_after_end_is_a_config_error() {
        assert!(parse_host_expr("10.0.0.5-10.0.0.1").is_err());
    }

    #[test]
    fn port_all_resolves_to_full_range() {
        let ports = parse_port_expr("all").unwrap();
        assert_eq!(ports.first(), Some(&1));
        assert_eq!(ports.last(), Some(&65535));
        assert_eq!(ports.len(), 65535);
    }

    #[test]
    fn port_list_dedups_and_sorts() {
        let ports = parse_port_expr("443,80,80,22").unwrap();
        assert_eq!(ports, vec![22, 80, 443]);
    }

    #[test]
    fn port_range_expands_inclusive() {
        let ports = parse_port_expr("20-22").unwrap();
        assert_eq!(ports, vec![20, 21, 22]);
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(parse_port_expr("0").is_err());
    }

    #[test]
    fn bandwidth_suffixes_are_recognized() {
        assert_eq!(parse_bandwidth("250000").unwrap(), 250_000);
        assert_eq!(parse_bandwidth("1k").unwrap(), 1_000);
        assert_eq!(parse_bandwidth("1m").unwrap(), 1_000_000);
    }

    #[test]
    fn blocklist_parses_comma_separated_ips() {
        let ips = parse_blocklist("10.0.0.0,10.0.0.255").unwrap();
        assert_eq!(ips, vec![Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 255)]);
    }
}

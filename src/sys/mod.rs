//! Platform shim (§4.H): syscall wrappers, the two readiness backends, and
//! the per-platform constants the rate governor and socket pool need.
//!
//! Everything above this module talks to `Backend` (see [`crate::multiplexer`])
//! and the free functions here; no `cfg(target_os = ...)` branch should ever
//! need to appear outside `sys`.

macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod epoll;
pub mod poll;
pub mod socket;

/// Bytes on the wire for a single SYN probe, used by the rate governor's
/// bandwidth cap (§3 "Rate state"). Linux's stack emits an Ethernet/IP/TCP
/// SYN of roughly this size; pick the platform-faithful constant here so the
/// governor above never needs a `cfg`.
#[cfg(target_os = "linux")]
pub const PROBE_PACKET_BYTES: u64 = 74;

#[cfg(not(target_os = "linux"))]
pub const PROBE_PACKET_BYTES: u64 = 66;

/// Reserve a handful of descriptors for stdio, the multiplexer's own fd, and
/// whatever the reporter opens, then clamp to a sane ceiling so a single
/// scan process doesn't starve the rest of the host.
const RESERVED_DESCRIPTORS: u64 = 16;
const DEFAULT_SOCKET_CEILING: u64 = 10_000;

/// Compute the default socket pool cap `M` (§3 "Socket pool capacity").
pub fn default_max_sockets() -> usize {
    let limit = raw_fd_limit().unwrap_or(1024);
    let usable = limit.saturating_sub(RESERVED_DESCRIPTORS);
    usable.min(DEFAULT_SOCKET_CEILING).max(1) as usize
}

fn raw_fd_limit() -> std::io::Result<u64> {
    let mut rlim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    syscall!(getrlimit(libc::RLIMIT_NOFILE, &mut rlim))?;
    Ok(rlim.rlim_cur as u64)
}

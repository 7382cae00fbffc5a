//! Nonblocking-connect socket primitives (§4.H, §4.D step 1).
//!
//! Deliberately narrower than a general socket wrapper: this crate only ever
//! opens a socket to run exactly one `connect` attempt through to a verdict,
//! so there is no read/write/listen surface here, just creation, the
//! three-way outcome of an immediate `connect`, and `SO_ERROR` retrieval for
//! sockets that went to the multiplexer.

use std::io;
use std::mem;
use std::net::SocketAddrV4;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use libc::{c_int, c_void, sockaddr_in, socklen_t};

/// A socket with a `connect(2)` in flight (or already resolved).
///
/// Closed on drop so every exit path — verdict emitted, retry, engine
/// shutdown — releases the descriptor without the engine needing to
/// remember to do so explicitly.
#[derive(Debug)]
pub struct ConnectSocket(RawFd);

/// Outcome of issuing a nonblocking `connect` immediately, before the socket
/// ever reaches the multiplexer (§4.D step 1).
pub enum ConnectAttempt {
    /// The handshake completed synchronously (loopback, or a listener that
    /// answers inside the same syscall). Rate-token accounting still applies
    /// (§9, "Open questions").
    Completed(ConnectSocket),
    /// `connect` is in progress; register with the multiplexer and wait.
    Pending(ConnectSocket),
    /// The peer actively refused (RST) before `connect` even returned.
    Refused,
    /// Host or network unreachable, discovered synchronously.
    Unreachable,
}

impl ConnectSocket {
    /// Create a nonblocking IPv4 TCP socket and issue `connect` toward `addr`.
    pub fn connect(addr: SocketAddrV4) -> io::Result<ConnectAttempt> {
        let fd = new_nonblocking_stream_socket()?;
        let socket = ConnectSocket(fd);

        let sin = sockaddr_in_from(addr);
        let res = unsafe {
            libc::connect(
                fd,
                &sin as *const sockaddr_in as *const libc::sockaddr,
                mem::size_of::<sockaddr_in>() as socklen_t,
            )
        };

        if res == 0 {
            return Ok(ConnectAttempt::Completed(socket));
        }

        match io::Error::last_os_error().raw_os_error() {
            Some(libc::EINPROGRESS) => Ok(ConnectAttempt::Pending(socket)),
            Some(libc::ECONNREFUSED) => Ok(ConnectAttempt::Refused),
            Some(libc::ENETUNREACH) | Some(libc::EHOSTUNREACH) => Ok(ConnectAttempt::Unreachable),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// Read the pending error for a socket the multiplexer reported
    /// writable/error/hup on (§4.D step 4: "SO_ERROR-equivalent read as
    /// authoritative").
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut raw: c_int = 0;
        let mut len = mem::size_of::<c_int>() as socklen_t;

        syscall!(getsockopt(
            self.0,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut raw as *mut c_int as *mut c_void,
            &mut len
        ))?;

        if raw == 0 {
            Ok(None)
        } else {
            Ok(Some(io::Error::from_raw_os_error(raw)))
        }
    }
}

impl AsRawFd for ConnectSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl FromRawFd for ConnectSocket {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        ConnectSocket(fd)
    }
}

impl IntoRawFd for ConnectSocket {
    fn into_raw_fd(self) -> RawFd {
        let fd = self.0;
        mem::forget(self);
        fd
    }
}

impl Drop for ConnectSocket {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.0);
        }
    }
}

fn sockaddr_in_from(addr: SocketAddrV4) -> sockaddr_in {
    // SAFETY: all-zero is a valid bit pattern for sockaddr_in; every field is
    // filled in below before the struct is used.
    let mut sin: sockaddr_in = unsafe { mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr.s_addr = u32::from_ne_bytes(addr.ip().octets());
    sin
}

#[cfg(target_os = "linux")]
fn new_nonblocking_stream_socket() -> io::Result<RawFd> {
    match syscall!(socket(
        libc::AF_INET,
        libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        0
    )) {
        Ok(fd) => Ok(fd),
        // Older kernels (or sandboxes) may reject the combined flags; fall
        // back to setting them individually.
        Err(ref e) if e.raw_os_error() == Some(libc::EINVAL) => new_nonblocking_stream_socket_fallback(),
        Err(e) => Err(e),
    }
}

#[cfg(not(target_os = "linux"))]
fn new_nonblocking_stream_socket() -> io::Result<RawFd> {
    new_nonblocking_stream_socket_fallback()
}

fn new_nonblocking_stream_socket_fallback() -> io::Result<RawFd> {
    let fd = syscall!(socket(libc::AF_INET, libc::SOCK_STREAM, 0))?;
    set_cloexec(fd)?;
    set_nonblocking(fd)?;
    Ok(fd)
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFD))?;
    syscall!(fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC))?;
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let mut nonblocking: c_int = 1;
    syscall!(ioctl(fd, libc::FIONBIO, &mut nonblocking)).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[test]
    fn connects_to_loopback_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };

        match ConnectSocket::connect(addr).unwrap() {
            ConnectAttempt::Completed(_) | ConnectAttempt::Pending(_) => {}
            _ => panic!("expected a live listener to accept or go pending"),
        }
    }

    #[test]
    fn refused_on_closed_port() {
        // Bind then drop to reserve a port nothing is listening on.
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };
        drop(listener);

        // Give the kernel a moment to tear down the listening socket; on
        // loopback a RST typically arrives synchronously either way.
        match ConnectSocket::connect(addr).unwrap() {
            ConnectAttempt::Refused => {}
            ConnectAttempt::Pending(sock) => {
                // Some kernels surface the refusal asynchronously instead;
                // confirm it shows up as SO_ERROR shortly after.
                std::thread::sleep(std::time::Duration::from_millis(50));
                let err = sock.take_error().unwrap();
                assert!(err.is_some());
            }
            other => panic!("unexpected outcome for closed port: {:?}", other.debug_tag()),
        }
    }

    impl ConnectAttempt {
        fn debug_tag(&self) -> &'static str {
            match self {
                ConnectAttempt::Completed(_) => "Completed",
                ConnectAttempt::Pending(_) => "Pending",
                ConnectAttempt::Refused => "Refused",
                ConnectAttempt::Unreachable => "Unreachable",
            }
        }
    }
}

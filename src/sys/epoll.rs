//! Linux `epoll` backend (§4.C "a level-triggered scalable backend").
//!
//! Direct descendant of the teacher library's own epoll wrapper: `epoll_create1`
//! at construction, `epoll_ctl` for (de)registration, `epoll_wait` for the
//! blocking wait. Kept level-triggered throughout — no `EPOLLET`.

use std::cmp;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP};

use crate::multiplexer::{Backend, Event};
use crate::{Ready, Token};

pub struct EpollBackend {
    epfd: RawFd,
    raw_events: Vec<libc::epoll_event>,
}

impl EpollBackend {
    pub fn new() -> io::Result<EpollBackend> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;

        Ok(EpollBackend {
            epfd,
            raw_events: Vec::with_capacity(1024),
        })
    }
}

impl Backend for EpollBackend {
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        let mut info = libc::epoll_event {
            events: (EPOLLOUT | EPOLLRDHUP) as u32,
            u64: token.0 as u64,
        };

        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut info))?;
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let mut info = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut info))?;
        Ok(())
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|to| cmp::min(to.as_millis(), libc::c_int::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        if self.raw_events.capacity() == 0 {
            self.raw_events.reserve(1024);
        }
        // SAFETY: epoll_wait only writes into the first `cnt` slots, and we
        // set the length to exactly that afterward.
        unsafe { self.raw_events.set_len(self.raw_events.capacity()) };

        let cnt = match syscall!(epoll_wait(
            self.epfd,
            self.raw_events.as_mut_ptr(),
            self.raw_events.capacity() as i32,
            timeout_ms
        )) {
            Ok(cnt) => cnt,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => 0,
            Err(e) => return Err(e),
        };

        for raw in &self.raw_events[..cnt as usize] {
            let mut readiness = Ready::empty();
            let flags = raw.events as i32;

            if flags & EPOLLIN != 0 {
                readiness.insert(Ready::readable());
            }
            if flags & EPOLLOUT != 0 {
                readiness.insert(Ready::writable());
            }
            if flags & EPOLLERR != 0 {
                readiness.insert(Ready::error());
            }
            if flags & (EPOLLHUP | EPOLLRDHUP) != 0 {
                readiness.insert(Ready::hup());
            }

            events.push(Event::new(Token(raw.u64 as usize), readiness));
        }

        Ok(())
    }
}

impl AsRawFd for EpollBackend {
    fn as_raw_fd(&self) -> RawFd {
        self.epfd
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::close(self.epfd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};
    use std::os::unix::io::AsRawFd as _;

    use crate::sys::socket::{ConnectAttempt, ConnectSocket};

    #[test]
    fn reports_writable_on_loopback_connect() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(a) => a,
            _ => unreachable!(),
        };

        let mut backend = EpollBackend::new().unwrap();

        let socket = match ConnectSocket::connect(addr).unwrap() {
            ConnectAttempt::Pending(s) => s,
            ConnectAttempt::Completed(s) => s,
            _ => panic!("expected loopback connect to proceed"),
        };

        backend.register(socket.as_raw_fd(), Token(7)).unwrap();

        let mut events = Vec::new();
        backend.wait(&mut events, Some(Duration::from_secs(2))).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token(), Token(7));
        assert!(events[0].readiness().is_writable());
    }
}

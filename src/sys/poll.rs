//! Portable `poll(2)` fallback backend (§4.C "a portable poll backend as
//! fallback"). Used when `epoll_create1` isn't available, or when `-t poll`
//! is requested explicitly. `O(n)` in the number of registered sockets per
//! wait, same as every other `poll`-based implementation; `auto` prefers
//! epoll for exactly this reason.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{c_int, POLLERR, POLLHUP, POLLIN, POLLOUT};

use crate::multiplexer::{Backend, Event};
use crate::{Ready, Token};

pub struct PollBackend {
    fds: Vec<libc::pollfd>,
    tokens: Vec<Token>,
}

impl PollBackend {
    pub fn new() -> PollBackend {
        PollBackend {
            fds: Vec::new(),
            tokens: Vec::new(),
        }
    }

    fn index_of(&self, fd: RawFd) -> Option<usize> {
        self.fds.iter().position(|p| p.fd == fd)
    }
}

impl Backend for PollBackend {
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        if self.index_of(fd).is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "fd already registered"));
        }

        self.fds.push(libc::pollfd {
            fd,
            events: POLLOUT,
            revents: 0,
        });
        self.tokens.push(token);

        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        match self.index_of(fd) {
            Some(idx) => {
                self.fds.swap_remove(idx);
                self.tokens.swap_remove(idx);
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "fd not registered")),
        }
    }

    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms: c_int = timeout
            .map(|to| to.as_millis().min(c_int::MAX as u128) as c_int)
            .unwrap_or(-1);

        if self.fds.is_empty() {
            // `poll` with an empty set still sleeps for `timeout`, which is
            // exactly the behaviour the engine wants while rate-limited with
            // nothing in flight.
            let rc = unsafe { libc::poll(std::ptr::null_mut(), 0, timeout_ms) };
            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
            return Ok(());
        }

        let rc = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms) };

        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for (pfd, token) in self.fds.iter_mut().zip(self.tokens.iter()) {
            if pfd.revents == 0 {
                continue;
            }

            let mut readiness = Ready::empty();
            if pfd.revents & POLLIN != 0 {
                readiness.insert(Ready::readable());
            }
            if pfd.revents & POLLOUT != 0 {
                readiness.insert(Ready::writable());
            }
            if pfd.revents & POLLERR != 0 {
                readiness.insert(Ready::error());
            }
            if pfd.revents & POLLHUP != 0 {
                readiness.insert(Ready::hup());
            }

            if !readiness.is_empty() {
                events.push(Event::new(*token, readiness));
            }

            pfd.revents = 0;
        }

        Ok(())
    }
}

//! Socket pool & readiness multiplexer (§4.C).
//!
//! The multiplexer borrows raw descriptors; it never owns a socket. The
//! engine is the only thing that closes one. Two backends exist —
//! [`sys::epoll::EpollBackend`] on Linux and [`sys::poll::PollBackend`]
//! everywhere a scalable backend isn't present — behind the uniform
//! [`Backend`] trait so nothing above this module branches on platform.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::sys::epoll::EpollBackend;
use crate::sys::poll::PollBackend;
use crate::{Ready, Token};

/// A single readiness notification: which socket, and what happened to it.
#[derive(Copy, Clone, Debug)]
pub struct Event {
    token: Token,
    readiness: Ready,
}

impl Event {
    pub(crate) fn new(token: Token, readiness: Ready) -> Event {
        Event { token, readiness }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn readiness(&self) -> Ready {
        self.readiness
    }
}

/// Capability set a readiness backend must provide (§4.H).
///
/// Every registration is implicitly interested in writable, error and hang-up
/// readiness — the only three the engine ever needs (§4.D step 4) — and is
/// level-triggered, so a writable event the engine doesn't consume is
/// redelivered on the next `wait`.
pub trait Backend {
    fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()>;
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;
    fn wait(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()>;
}

/// Backend selector, mirroring the `-t` flag (§6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    Epoll,
    Poll,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BackendKind::Auto),
            "epoll" => Ok(BackendKind::Epoll),
            "poll" => Ok(BackendKind::Poll),
            other => Err(format!("unknown poll type '{other}' (expected auto, epoll, or poll)")),
        }
    }
}

/// Owns the chosen backend and the reusable events buffer.
pub struct Multiplexer {
    backend: Box<dyn Backend>,
    events: Vec<Event>,
}

impl Multiplexer {
    pub fn new(kind: BackendKind) -> io::Result<Multiplexer> {
        let backend: Box<dyn Backend> = match kind {
            BackendKind::Epoll => Box::new(EpollBackend::new()?),
            BackendKind::Poll => Box::new(PollBackend::new()),
            BackendKind::Auto => match EpollBackend::new() {
                Ok(epoll) => {
                    log::debug!("multiplexer: using epoll backend");
                    Box::new(epoll)
                }
                Err(e) => {
                    log::debug!("multiplexer: epoll unavailable ({e}), falling back to poll");
                    Box::new(PollBackend::new())
                }
            },
        };

        Ok(Multiplexer {
            backend,
            events: Vec::with_capacity(1024),
        })
    }

    pub fn register(&mut self, fd: RawFd, token: Token) -> io::Result<()> {
        self.backend.register(fd, token)
    }

    pub fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.backend.deregister(fd)
    }

    /// Block for up to `timeout` (`None` = forever) and return the events
    /// observed. The returned slice is reused across calls.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<&[Event]> {
        self.events.clear();
        self.backend.wait(&mut self.events, timeout)?;
        Ok(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_flag_values() {
        assert_eq!("auto".parse::<BackendKind>().unwrap(), BackendKind::Auto);
        assert_eq!("epoll".parse::<BackendKind>().unwrap(), BackendKind::Epoll);
        assert_eq!("poll".parse::<BackendKind>().unwrap(), BackendKind::Poll);
        assert!("bogus".parse::<BackendKind>().is_err());
    }
}

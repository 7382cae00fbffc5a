//! Error taxonomy (§7, §4.L).
//!
//! The syscall boundary (`sys`) keeps returning plain `io::Result` — that's
//! the teacher library's own idiom, and it's the right one where the caller
//! always has enough context to classify the failure into a [`Verdict`]
//! without propagating anything. `ScanError` is the type that crosses the
//! engine/CLI boundary: configuration problems and unrecoverable platform
//! errors, which per §7 are the only two classes allowed to reach the user
//! as something other than a verdict line.

use std::net::Ipv4Addr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Bad CIDR, bad port list, inconsistent flags — reported once, before
    /// any probe is issued. Maps to exit code 1 (§6).
    #[error("configuration error: {0}")]
    Config(String),

    /// An address that is fatal to `connect` to on this platform (network or
    /// broadcast address) was reached with no matching `-B` entry. Maps to
    /// exit code 2 (§6, §7).
    #[error("fatal runtime error probing {addr}: {reason}")]
    Fatal { addr: Ipv4Addr, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Process exit code for this error (§6 "Exit codes").
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Config(_) => 1,
            ScanError::Fatal { .. } => 2,
            ScanError::Io(_) => 2,
        }
    }
}

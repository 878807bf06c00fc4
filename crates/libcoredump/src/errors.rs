//! Error taxonomy for both dump strategies.

use std::io;
use std::process::ExitStatus;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

/// Unified result type across the library.
pub type DumpResult<T> = Result<T, DumpError>;

/// Error cases
#[derive(Debug, Error)]
pub enum DumpError {
    /// The process could not be duplicated. No duplicate exists.
    #[error("failed to duplicate process: {0}")]
    Fork(#[source] Errno),

    /// SIGABRT could not be delivered to the duplicate; it was not reaped.
    #[error("failed to deliver SIGABRT to duplicate {pid}: {source}")]
    Signal { pid: Pid, source: Errno },

    /// The duplicate was signalled but could not be reaped.
    #[error("failed to reap duplicate {pid}: {source}")]
    Reap { pid: Pid, source: Errno },

    /// The snapshot utility could not be launched or its output read.
    #[error("failed to run {utility} against {pid}: {source}")]
    Spawn {
        pid: Pid,
        utility: String,
        source: io::Error,
    },

    /// The snapshot utility ran and exited unsuccessfully.
    #[error("{utility} failed for {pid}: {status}")]
    Utility {
        pid: Pid,
        utility: String,
        status: ExitStatus,
        output: String,
    },

    #[error("core dumps are disabled: RLIMIT_CORE soft limit is zero")]
    CoreDisabled,

    #[error("system call failed: {0}")]
    SysCall(#[from] Errno),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DumpError {
    /// The process id the failed attempt targeted, when one was known.
    pub fn pid(&self) -> Option<Pid> {
        match self {
            DumpError::Signal { pid, .. }
            | DumpError::Reap { pid, .. }
            | DumpError::Spawn { pid, .. }
            | DumpError::Utility { pid, .. } => Some(*pid),
            DumpError::Fork(_)
            | DumpError::CoreDisabled
            | DumpError::SysCall(_)
            | DumpError::Io(_) => None,
        }
    }

    /// Captured output of the snapshot utility, if the failure produced any.
    pub fn output(&self) -> Option<&str> {
        match self {
            DumpError::Utility { output, .. } => Some(output),
            _ => None,
        }
    }
}

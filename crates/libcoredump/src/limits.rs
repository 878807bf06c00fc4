//! Probing the preconditions the kernel needs before it writes a core.
//!
//! Neither dumper consults these; a zero limit makes the kernel skip the core
//! silently. Callers wanting a detectable failure check first.

use std::fmt;
use std::fs;

use nix::sys::resource::{self, RLIM_INFINITY, Resource, rlim_t};

use crate::errors::{DumpError, DumpResult};

const CORE_PATTERN: &str = "/proc/sys/kernel/core_pattern";

/// Soft and hard `RLIMIT_CORE` values, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreLimit {
    pub soft: rlim_t,
    pub hard: rlim_t,
}

impl CoreLimit {
    pub fn allows_core(&self) -> bool {
        self.soft != 0
    }
}

impl fmt::Display for CoreLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: rlim_t| {
            if v == RLIM_INFINITY {
                "unlimited".to_string()
            } else {
                v.to_string()
            }
        };
        write!(f, "soft={} hard={}", show(self.soft), show(self.hard))
    }
}

pub fn core_limit() -> DumpResult<CoreLimit> {
    let (soft, hard) = resource::getrlimit(Resource::RLIMIT_CORE)?;
    Ok(CoreLimit { soft, hard })
}

/// Fail with [`DumpError::CoreDisabled`] when no core could be written.
pub fn ensure_core_dumps_enabled() -> DumpResult<CoreLimit> {
    let limit = core_limit()?;
    if !limit.allows_core() {
        return Err(DumpError::CoreDisabled);
    }
    Ok(limit)
}

/// Lift the soft limit to the hard limit, the most an unprivileged process
/// may do. Duplicates created afterwards inherit it.
pub fn raise_core_limit() -> DumpResult<CoreLimit> {
    let limit = core_limit()?;
    if limit.hard == 0 {
        return Err(DumpError::CoreDisabled);
    }
    if limit.soft != limit.hard {
        resource::setrlimit(Resource::RLIMIT_CORE, limit.hard, limit.hard)?;
    }
    Ok(CoreLimit {
        soft: limit.hard,
        hard: limit.hard,
    })
}

/// The kernel's core file naming template, or pipe target when it starts
/// with `|`.
pub fn core_pattern() -> DumpResult<String> {
    Ok(fs::read_to_string(CORE_PATTERN)?.trim_end().to_string())
}

//! Core dumps of a running process.
//!
//! [`SelfDumper`] captures only the calling thread by forking a duplicate and
//! aborting it. [`AllDumper`] captures every thread by running `gcore` against
//! the current process. Core generation needs a non-zero `RLIMIT_CORE`; see
//! [`limits`].

pub mod all_dump;
pub mod dump_log;
pub mod errors;
pub mod limits;
pub mod self_dump;

pub use all_dump::{AllDump, AllDumper, dump_all, dump_all_to};
pub use errors::{DumpError, DumpResult};
pub use self_dump::{ProcessOps, SelfDump, SelfDumper, SystemOps, dump_self};

/// Exposes the crate version for CLI reporting.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

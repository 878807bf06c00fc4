//! Whole-process dumps through an external snapshot utility (`gcore`).

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{self, Read};
use std::process::{Command, Stdio};

use nix::fcntl::OFlag;
use nix::unistd::{self, Pid};

use crate::dump_log::{self, Record, error_field};
use crate::errors::{DumpError, DumpResult};

/// Utility looked up on `PATH` unless overridden.
pub const DEFAULT_UTILITY: &str = "gcore";

/// Outcome of a successful whole-process dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllDump {
    /// Always the calling process.
    pub pid: Pid,
    /// Combined stdout and stderr of the utility.
    pub output: String,
}

/// Runs the snapshot utility against the current process, all threads
/// included. The process is neither forked nor terminated.
#[derive(Debug, Clone)]
pub struct AllDumper {
    utility: OsString,
}

impl Default for AllDumper {
    fn default() -> Self {
        Self::new()
    }
}

impl AllDumper {
    pub fn new() -> Self {
        Self::with_utility(DEFAULT_UTILITY)
    }

    /// Use another executable taking `[-o PREFIX] PID`.
    pub fn with_utility(utility: impl AsRef<OsStr>) -> Self {
        Self {
            utility: utility.as_ref().to_owned(),
        }
    }

    pub fn utility(&self) -> &OsStr {
        &self.utility
    }

    /// Dump with the utility's default core file naming.
    pub fn dump(&self) -> DumpResult<AllDump> {
        self.dump_with(None)
    }

    /// Dump to a core file named from `prefix`.
    pub fn dump_to(&self, prefix: &str) -> DumpResult<AllDump> {
        self.dump_with(Some(prefix))
    }

    fn dump_with(&self, prefix: Option<&str>) -> DumpResult<AllDump> {
        let pid = Pid::this();
        let result = self.run(prefix, pid);

        let mut record = Record::new("gcore");
        if let Some(prefix) = prefix {
            record = record.with("prefix", prefix);
        }
        let out = match &result {
            Ok(dump) => dump.output.as_str(),
            Err(err) => err.output().unwrap_or_default(),
        };
        dump_log::emit(
            record
                .with("pid", pid)
                .with("out", out)
                .with("err", error_field(&result)),
        );

        result
    }

    pub(crate) fn command(&self, prefix: Option<&str>, pid: Pid) -> Command {
        let mut cmd = Command::new(&self.utility);
        if let Some(prefix) = prefix {
            cmd.arg("-o").arg(prefix);
        }
        cmd.arg(pid.to_string());
        cmd
    }

    fn run(&self, prefix: Option<&str>, pid: Pid) -> DumpResult<AllDump> {
        let spawn_err = |source: io::Error| DumpError::Spawn {
            pid,
            utility: self.utility.to_string_lossy().into_owned(),
            source,
        };

        // stdout and stderr share one pipe so their interleaving survives.
        // Both ends are close-on-exec; only the utility's dup'd stdio holds
        // the write end, so EOF arrives when the utility exits.
        let (reader, writer) =
            unistd::pipe2(OFlag::O_CLOEXEC).map_err(|errno| spawn_err(errno.into()))?;
        let stderr = writer.try_clone().map_err(spawn_err)?;

        let mut cmd = self.command(prefix, pid);
        cmd.stdin(Stdio::null()).stdout(writer).stderr(stderr);
        let mut child = cmd.spawn().map_err(spawn_err)?;
        // Our copies of the write end must close before EOF can arrive.
        drop(cmd);

        let mut raw = Vec::new();
        let read = File::from(reader).read_to_end(&mut raw);
        let status = child.wait().map_err(spawn_err)?;
        read.map_err(spawn_err)?;

        let output = String::from_utf8_lossy(&raw).into_owned();
        if !status.success() {
            return Err(DumpError::Utility {
                pid,
                utility: self.utility.to_string_lossy().into_owned(),
                status,
                output,
            });
        }
        Ok(AllDump { pid, output })
    }
}

/// Dump all threads with `gcore` and its default naming.
pub fn dump_all() -> DumpResult<AllDump> {
    AllDumper::new().dump()
}

/// Dump all threads with `gcore -o prefix`.
pub fn dump_all_to(prefix: &str) -> DumpResult<AllDump> {
    AllDumper::new().dump_to(prefix)
}

//! Single-thread dumps via fork and SIGABRT.
//!
//! The calling process is duplicated; the duplicate holds only the calling
//! thread and parks in `pause(2)`. The original sends it SIGABRT, whose default
//! disposition makes the kernel write a core for the duplicate, then reaps it.
//! The original process and its other threads are never touched.

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use crate::dump_log::{self, Record, error_field};
use crate::errors::{DumpError, DumpResult};

/// The OS primitives behind a self dump. Replaceable for fault injection.
pub trait ProcessOps {
    /// Duplicate the calling process.
    fn fork(&self) -> nix::Result<ForkResult>;

    /// Park the duplicate until a signal terminates it.
    ///
    /// Runs in a freshly forked child of a possibly multi-threaded process,
    /// so only async-signal-safe calls are allowed here.
    fn suspend(&self) -> !;

    /// Deliver SIGABRT to `pid`.
    fn abort(&self, pid: Pid) -> nix::Result<()>;

    /// Block until `pid` has terminated and collect its status.
    fn reap(&self, pid: Pid) -> nix::Result<WaitStatus>;
}

/// The live primitives from `nix`.
///
/// SIGABRT is blocked in the calling thread across `fork`, so the duplicate
/// starts with it blocked. A SIGABRT sent before `suspend` has restored the
/// default disposition stays pending, even when the host ignores it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOps;

fn abort_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGABRT);
    set
}

impl ProcessOps for SystemOps {
    fn fork(&self) -> nix::Result<ForkResult> {
        let mut previous = SigSet::empty();
        signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&abort_set()), Some(&mut previous))?;

        // SAFETY: the child path only runs `suspend`, which restricts itself
        // to async-signal-safe calls.
        let forked = unsafe { unistd::fork() };

        if !matches!(forked, Ok(ForkResult::Child)) {
            // Cannot fail with a valid `how`; a child may already exist.
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);
        }
        forked
    }

    fn suspend(&self) -> ! {
        // Disposition first, then unblock: a pending SIGABRT lands on SIG_DFL.
        // SAFETY: installing SIG_DFL runs no Rust code in signal context.
        let _ = unsafe { signal::signal(Signal::SIGABRT, SigHandler::SigDfl) };
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&abort_set()), None);
        loop {
            unistd::pause();
        }
    }

    fn abort(&self, pid: Pid) -> nix::Result<()> {
        signal::kill(pid, Signal::SIGABRT)
    }

    fn reap(&self, pid: Pid) -> nix::Result<WaitStatus> {
        // A handler installed without SA_RESTART interrupts the wait; resume it.
        loop {
            match wait::waitpid(pid, None) {
                Err(Errno::EINTR) => continue,
                other => return other,
            }
        }
    }
}

/// Outcome of a successful self dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfDump {
    /// Id of the duplicate, which no longer exists.
    pub pid: Pid,
    /// Status the duplicate was reaped with.
    pub status: WaitStatus,
}

impl SelfDump {
    /// Whether the kernel reports having written a core for the duplicate.
    ///
    /// `false` usually means a zero `RLIMIT_CORE` or a core pattern that
    /// discards dumps. It does not make the dump call fail.
    pub fn core_dumped(&self) -> bool {
        matches!(self.status, WaitStatus::Signaled(_, Signal::SIGABRT, true))
    }
}

/// Dumps the calling thread into a core file owned by a short-lived duplicate.
#[derive(Debug, Default)]
pub struct SelfDumper<O = SystemOps> {
    ops: O,
}

impl SelfDumper {
    pub fn new() -> Self {
        Self { ops: SystemOps }
    }
}

impl<O: ProcessOps> SelfDumper<O> {
    pub fn with_ops(ops: O) -> Self {
        Self { ops }
    }

    /// Fork, abort the duplicate, reap it.
    ///
    /// A signal delivery failure returns at once without reaping. Every
    /// attempt is reported to the dump log once.
    pub fn dump(&self) -> DumpResult<SelfDump> {
        let result = self.run();

        let pid = match &result {
            Ok(dump) => Some(dump.pid),
            Err(err) => err.pid(),
        };
        dump_log::emit(
            Record::new("dump")
                .with("pid", pid.map_or(-1, Pid::as_raw))
                .with("err", error_field(&result)),
        );

        result
    }

    fn run(&self) -> DumpResult<SelfDump> {
        match self.ops.fork().map_err(DumpError::Fork)? {
            ForkResult::Child => self.ops.suspend(),
            ForkResult::Parent { child } => {
                self.ops
                    .abort(child)
                    .map_err(|source| DumpError::Signal { pid: child, source })?;
                let status = self
                    .ops
                    .reap(child)
                    .map_err(|source| DumpError::Reap { pid: child, source })?;
                Ok(SelfDump { pid: child, status })
            }
        }
    }
}

/// Dump the calling thread with the live primitives.
pub fn dump_self() -> DumpResult<SelfDump> {
    SelfDumper::new().dump()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump_log::capture;
    use std::cell::RefCell;

    const FAKE_CHILD: i32 = 31337;

    #[derive(Default)]
    struct ScriptedOps {
        fork_error: Option<Errno>,
        abort_error: Option<Errno>,
        reap_error: Option<Errno>,
        calls: RefCell<Vec<&'static str>>,
    }

    impl ProcessOps for ScriptedOps {
        fn fork(&self) -> nix::Result<ForkResult> {
            self.calls.borrow_mut().push("fork");
            match self.fork_error {
                Some(errno) => Err(errno),
                None => Ok(ForkResult::Parent {
                    child: Pid::from_raw(FAKE_CHILD),
                }),
            }
        }

        fn suspend(&self) -> ! {
            unreachable!("the parent path must never suspend");
        }

        fn abort(&self, pid: Pid) -> nix::Result<()> {
            assert_eq!(pid.as_raw(), FAKE_CHILD);
            self.calls.borrow_mut().push("abort");
            self.abort_error.map_or(Ok(()), Err)
        }

        fn reap(&self, pid: Pid) -> nix::Result<WaitStatus> {
            assert_eq!(pid.as_raw(), FAKE_CHILD);
            self.calls.borrow_mut().push("reap");
            match self.reap_error {
                Some(errno) => Err(errno),
                None => Ok(WaitStatus::Signaled(pid, Signal::SIGABRT, true)),
            }
        }
    }

    #[test]
    fn success_runs_fork_abort_reap_in_order() {
        let captured = capture::start();
        let dumper = SelfDumper::with_ops(ScriptedOps::default());
        let dump = dumper.dump().unwrap();
        assert_eq!(dump.pid.as_raw(), FAKE_CHILD);
        assert!(dump.core_dumped());
        assert_eq!(*dumper.ops.calls.borrow(), ["fork", "abort", "reap"]);

        let records = captured.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].msg, "dump");
        assert_eq!(records[0].get("pid"), Some("31337"));
        assert_eq!(records[0].get("err"), Some(""));
    }

    #[test]
    fn signal_failure_skips_reaping() {
        let captured = capture::start();
        let dumper = SelfDumper::with_ops(ScriptedOps {
            abort_error: Some(Errno::ESRCH),
            ..Default::default()
        });
        let err = dumper.dump().unwrap_err();
        assert!(matches!(
            err,
            DumpError::Signal {
                source: Errno::ESRCH,
                ..
            }
        ));
        assert_eq!(err.pid(), Some(Pid::from_raw(FAKE_CHILD)));
        assert_eq!(*dumper.ops.calls.borrow(), ["fork", "abort"]);

        let records = captured.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("pid"), Some("31337"));
        assert_eq!(records[0].get("err"), Some(err.to_string().as_str()));
    }

    #[test]
    fn reap_failure_is_distinct_from_signal_failure() {
        let captured = capture::start();
        let dumper = SelfDumper::with_ops(ScriptedOps {
            reap_error: Some(Errno::ECHILD),
            ..Default::default()
        });
        let err = dumper.dump().unwrap_err();
        assert!(matches!(
            err,
            DumpError::Reap {
                source: Errno::ECHILD,
                ..
            }
        ));
        assert_eq!(err.pid(), Some(Pid::from_raw(FAKE_CHILD)));
        assert_eq!(*dumper.ops.calls.borrow(), ["fork", "abort", "reap"]);

        let records = captured.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("pid"), Some("31337"));
        assert!(records[0].get("err").unwrap().contains("reap"));
    }

    #[test]
    fn fork_failure_stops_before_signalling() {
        let captured = capture::start();
        let dumper = SelfDumper::with_ops(ScriptedOps {
            fork_error: Some(Errno::EAGAIN),
            ..Default::default()
        });
        let err = dumper.dump().unwrap_err();
        assert!(matches!(err, DumpError::Fork(Errno::EAGAIN)));
        assert_eq!(err.pid(), None);
        assert_eq!(*dumper.ops.calls.borrow(), ["fork"]);

        let records = captured.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("pid"), Some("-1"));
        assert!(records[0].get("err").unwrap().contains("duplicate"));
    }

    #[test]
    fn core_dumped_needs_the_kernel_flag() {
        let pid = Pid::from_raw(FAKE_CHILD);
        let without_core = SelfDump {
            pid,
            status: WaitStatus::Signaled(pid, Signal::SIGABRT, false),
        };
        assert!(!without_core.core_dumped());
        let exited = SelfDump {
            pid,
            status: WaitStatus::Exited(pid, 0),
        };
        assert!(!exited.core_dumped());
    }
}

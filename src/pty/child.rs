//! Child process handle
//!
//! Tracks the spawned process until it has been reaped. The first `waitpid`
//! that reports termination is recorded, and every later query answers from
//! the record, so the pid is never waited on twice.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

use super::{PtyError, PtyResult};
use crate::status::ChildStatus;

/// A spawned child process owned by the relay
#[derive(Debug)]
pub struct Child {
    pid: Pid,
    /// Set once the child has been reaped
    status: Option<ChildStatus>,
}

impl Child {
    pub(crate) fn new(pid: Pid) -> Self {
        Self { pid, status: None }
    }

    /// Get the child process ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Check whether the child has terminated (non-blocking)
    pub fn try_wait(&mut self) -> PtyResult<Option<ChildStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }

        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => Ok(self.record(ChildStatus::from_wait_status(status))),
            Err(Errno::EINTR) => Ok(None),
            Err(e) => Err(PtyError::Wait(e)),
        }
    }

    /// Wait for the child to terminate (blocking)
    pub fn wait(&mut self) -> PtyResult<ChildStatus> {
        loop {
            if let Some(status) = self.status {
                return Ok(status);
            }

            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.record(ChildStatus::from_wait_status(status));
                },
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PtyError::Wait(e)),
            }
        }
    }

    fn record(&mut self, status: Option<ChildStatus>) -> Option<ChildStatus> {
        if let Some(status) = status {
            tracing::debug!(pid = self.pid.as_raw(), %status, "child reaped");
            self.status = Some(status);
        }
        status
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        // Try to reap the child process
        if self.status.is_none() {
            let _ = waitpid(self.pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

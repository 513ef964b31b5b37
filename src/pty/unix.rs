//! Unix PTY implementation
//!
//! Implements PTY creation and child process management using POSIX APIs.

use std::ffi::{CStr, CString};
use std::os::fd::{BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::io::{AsRawFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::poll::{poll, PollFd, PollFlags};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{dup2, fork, read, setsid, write, ForkResult, Pid};

use super::{Child, PtyError, PtyResult, WindowSize};
use crate::command::Command;

/// Exit status of a child whose program could not be found
const EXIT_NOT_FOUND: i32 = 127;
/// Exit status of a child whose program exists but could not be executed
const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Outcome of a single read from the PTY master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterRead {
    /// This many bytes were placed at the start of the buffer
    Data(usize),
    /// Nothing to read right now
    Pending,
    /// Every slave descriptor is closed and the buffer is empty
    Closed,
}

/// A pseudoterminal with a spawned child process
pub struct Pty {
    /// The PTY master file descriptor
    master: PtyMaster,
    /// The process attached to the slave side
    child: Child,
}

impl Pty {
    /// Spawn `command` on a new PTY with the given window size
    ///
    /// The slave side is handed to the child as its controlling terminal and
    /// its stdin, stdout and stderr. The parent keeps only the master, set to
    /// non-blocking mode.
    pub fn spawn(command: &Command, size: WindowSize) -> PtyResult<Self> {
        // Open PTY master
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::OpenMaster)?;
        grantpt(&master).map_err(PtyError::GrantPty)?;
        unlockpt(&master).map_err(PtyError::UnlockPty)?;

        let slave_name = slave_name(&master)?;
        let slave_fd = open(
            slave_name.as_str(),
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(PtyError::OpenSlave)?;
        // SAFETY: open just returned this descriptor and nothing else owns it
        let slave = unsafe { OwnedFd::from_raw_fd(slave_fd) };

        set_window_size(master.as_raw_fd(), size)?;
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(PtyError::SetFlags)?;
        set_nonblocking(master.as_raw_fd())?;

        // Pointer arrays for execve, built before the fork
        let argv = exec_array(command.argv());
        let envp = exec_array(command.env());

        // SAFETY: the child only makes async-signal-safe calls before exec or _exit
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => {
                drop(master);
                exec_child(command.program(), command.name(), &argv, &envp, slave)
            },
            ForkResult::Parent { child } => {
                drop(slave);
                tracing::debug!(
                    pid = child.as_raw(),
                    program = ?command.program(),
                    cols = size.cols,
                    rows = size.rows,
                    "spawned child on pty {}",
                    slave_name
                );
                Ok(Pty {
                    master,
                    child: Child::new(child),
                })
            },
        }
    }

    /// Get the raw file descriptor of the PTY master
    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Get the child process ID
    pub fn child_pid(&self) -> Pid {
        self.child.pid()
    }

    /// Get a mutable reference to the child handle
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Wait up to `timeout_ms` for the master to become readable
    ///
    /// Hang-up and error conditions count as readable so the next `read`
    /// observes them. An interrupted poll reports "not ready".
    pub fn poll_read(&self, timeout_ms: i32) -> PtyResult<bool> {
        // SAFETY: The master fd is valid for the lifetime of this Pty
        let borrowed_fd = unsafe { BorrowedFd::borrow_raw(self.master.as_raw_fd()) };
        let mut fds = [PollFd::new(&borrowed_fd, PollFlags::POLLIN)];
        let n = match poll(&mut fds, timeout_ms) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(false),
            Err(e) => return Err(PtyError::Poll(e)),
        };
        Ok(n > 0
            && fds[0].revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            }))
    }

    /// Read from the PTY master (non-blocking)
    ///
    /// `EIO` is how Linux reports that the last slave descriptor was closed,
    /// so it maps to [`MasterRead::Closed`] like a zero-length read does.
    pub fn read(&self, buf: &mut [u8]) -> PtyResult<MasterRead> {
        match read(self.master.as_raw_fd(), buf) {
            Ok(0) => Ok(MasterRead::Closed),
            Ok(n) => Ok(MasterRead::Data(n)),
            // EAGAIN and EWOULDBLOCK are the same value on Linux
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(MasterRead::Pending),
            Err(Errno::EIO) => Ok(MasterRead::Closed),
            Err(e) => Err(PtyError::Read(e)),
        }
    }

    /// Close the master and hand back the child for the final reap
    pub fn close(self) -> Child {
        let Pty { master, child } = self;
        drop(master);
        child
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    nix::pty::ptsname_r(master).map_err(PtyError::PtsName)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    // SAFETY: ptsname is not thread-safe; its static buffer is copied into
    // the returned String before anything else can call it on this thread
    unsafe { nix::pty::ptsname(master) }.map_err(PtyError::PtsName)
}

/// Null-terminated array of pointers into `strings`
fn exec_array(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn set_nonblocking(fd: RawFd) -> PtyResult<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(PtyError::SetFlags)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(PtyError::SetFlags)?;
    Ok(())
}

/// Set up the forked child and exec the command. Never returns.
///
/// Runs between `fork` and `exec` in a possibly multi-threaded parent, so it
/// must not allocate, lock or log.
fn exec_child(
    program: &CStr,
    name: &CStr,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
    slave: OwnedFd,
) -> ! {
    // Create new session, dropping any inherited controlling terminal
    if setsid().is_err() {
        child_fail(name, b"failed to create session", 1);
    }

    let slave_fd = slave.as_raw_fd();

    // The slave was opened with O_NOCTTY, so claim it explicitly
    // SAFETY: TIOCSCTTY is a valid ioctl for setting controlling terminal
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
    }

    // Duplicate slave to stdin/stdout/stderr; dup2 clears FD_CLOEXEC on the copies
    for target in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
        if dup2(slave_fd, target).is_err() {
            child_fail(name, b"failed to attach terminal", 1);
        }
    }

    // Close original slave fd if it's not one of the standard fds
    if slave_fd > STDERR_FILENO {
        drop(slave);
    } else {
        let _ = slave.into_raw_fd();
    }

    // Ignored dispositions and the blocked mask survive exec
    for sig in Signal::iterator() {
        // SAFETY: restoring the default disposition installs no handler
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }
    let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);

    // SAFETY: both arrays point into live CStrings and end with a null pointer
    unsafe {
        libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }

    match Errno::last() {
        Errno::ENOENT | Errno::ENOTDIR => child_fail(name, b"command not found", EXIT_NOT_FOUND),
        Errno::EACCES => child_fail(name, b"permission denied", EXIT_NOT_EXECUTABLE),
        _ => child_fail(name, b"cannot execute", EXIT_NOT_EXECUTABLE),
    }
}

/// Report a setup failure on the child's stderr and exit without unwinding
fn child_fail(name: &CStr, reason: &[u8], code: i32) -> ! {
    let _ = write(STDERR_FILENO, b"pty-relay: ");
    let _ = write(STDERR_FILENO, name.to_bytes());
    let _ = write(STDERR_FILENO, b": ");
    let _ = write(STDERR_FILENO, reason);
    let _ = write(STDERR_FILENO, b"\n");
    // SAFETY: _exit skips atexit handlers and stdio buffers inherited from the parent
    unsafe { libc::_exit(code) }
}

/// Set the window size on a PTY file descriptor
fn set_window_size(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    let winsize = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: size.pixel_width,
        ws_ypixel: size.pixel_height,
    };

    // SAFETY: TIOCSWINSZ is a valid ioctl for setting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) };

    if result < 0 {
        Err(PtyError::SetWinsize(Errno::last()))
    } else {
        Ok(())
    }
}

/// Get the window size from a terminal file descriptor
pub fn get_window_size(fd: RawFd) -> PtyResult<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ is a valid ioctl for getting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };

    if result < 0 {
        Err(PtyError::GetWinsize(Errno::last()))
    } else {
        Ok(WindowSize {
            rows: winsize.ws_row,
            cols: winsize.ws_col,
            pixel_width: winsize.ws_xpixel,
            pixel_height: winsize.ws_ypixel,
        })
    }
}

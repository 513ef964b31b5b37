//! Terminal relay
//!
//! Runs a command on a PTY and copies everything it prints to an output
//! sink until the child is gone. The loop moves through three phases:
//!
//! - `Running`: the child is alive; poll the master with a bounded timeout,
//!   forward whatever is readable, then check (without blocking) whether the
//!   child has terminated.
//! - `Draining`: the child has been reaped; keep reading until one poll
//!   timeout passes with nothing to read, so output written just before exit
//!   is not lost.
//! - `Terminated`: the master is closed and the child's status is returned.
//!
//! A read error on the master ends the stream. It is logged, never escalated.

use std::io::{self, Write};
use std::time::Duration;

use crate::command::Command;
use crate::error::RelayResult;
use crate::pty::{MasterRead, Pty, PtyResult, WindowSize};
use crate::status::ChildStatus;

/// Default bound on each wait for master readability
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default maximum bytes moved per read
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Tunables for the relay loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub poll_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl RelaySettings {
    fn poll_timeout_ms(&self) -> i32 {
        i32::try_from(self.poll_timeout.as_millis()).unwrap_or(i32::MAX)
    }
}

/// Where the relay is in the child's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Draining,
    Terminated,
}

/// Result of a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub status: ChildStatus,
    /// Bytes read from the master, including any the sink refused
    pub bytes_relayed: u64,
}

impl RelayOutcome {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Result of one poll-and-read step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Bytes were forwarded
    Forwarded,
    /// Nothing became readable within the timeout
    Idle,
    /// The master reached end-of-stream
    Closed,
}

/// Runs commands on a PTY and relays their output
#[derive(Debug, Clone, Default)]
pub struct Relay {
    settings: RelaySettings,
}

impl Relay {
    pub fn new(settings: RelaySettings) -> Self {
        Self { settings }
    }

    /// Spawn `command` on a PTY of `size` and relay its output into `sink`
    pub fn run<W: Write>(
        &self,
        command: &Command,
        size: WindowSize,
        sink: &mut W,
    ) -> RelayResult<RelayOutcome> {
        let pty = Pty::spawn(command, size)?;
        self.relay(pty, sink)
    }

    /// Relay an already spawned PTY until its child is gone
    pub fn relay<W: Write>(&self, mut pty: Pty, sink: &mut W) -> RelayResult<RelayOutcome> {
        let mut buf = vec![0u8; self.settings.chunk_size];
        let mut out = Output::new(sink);
        let mut phase = Phase::Running;

        while phase != Phase::Terminated {
            phase = match phase {
                Phase::Running => match self.step(&pty, &mut buf, &mut out)? {
                    Step::Closed => Phase::Terminated,
                    Step::Forwarded | Step::Idle => {
                        if pty.child_mut().try_wait()?.is_some() {
                            Phase::Draining
                        } else {
                            Phase::Running
                        }
                    },
                },
                Phase::Draining => match self.step(&pty, &mut buf, &mut out)? {
                    Step::Forwarded => Phase::Draining,
                    Step::Idle | Step::Closed => Phase::Terminated,
                },
                Phase::Terminated => Phase::Terminated,
            };
            tracing::trace!(?phase, "relay step");
        }

        let bytes_relayed = out.relayed;
        let mut child = pty.close();
        let status = child.wait()?;
        tracing::debug!(
            pid = child.pid().as_raw(),
            %status,
            bytes_relayed,
            "relay finished"
        );

        Ok(RelayOutcome {
            status,
            bytes_relayed,
        })
    }

    fn step<W: Write>(
        &self,
        pty: &Pty,
        buf: &mut [u8],
        out: &mut Output<'_, W>,
    ) -> RelayResult<Step> {
        if !pty.poll_read(self.settings.poll_timeout_ms())? {
            return Ok(Step::Idle);
        }

        let step = read_step(pty.read(buf));
        if let Some(n) = step.forwarded {
            out.forward(&buf[..n]);
        }
        Ok(step.step)
    }
}

/// What a single master read means for the loop
#[derive(Debug, PartialEq, Eq)]
struct ReadStep {
    step: Step,
    /// Length of the data at the start of the buffer, if any
    forwarded: Option<usize>,
}

/// Map a master read to a loop step; read errors end the stream
fn read_step(read: PtyResult<MasterRead>) -> ReadStep {
    let (step, forwarded) = match read {
        Ok(MasterRead::Data(n)) => (Step::Forwarded, Some(n)),
        Ok(MasterRead::Pending) => (Step::Idle, None),
        Ok(MasterRead::Closed) => {
            tracing::debug!("pty master closed");
            (Step::Closed, None)
        },
        Err(e) => {
            tracing::debug!("treating pty read error as end of stream: {}", e);
            (Step::Closed, None)
        },
    };
    ReadStep { step, forwarded }
}

/// Output sink that survives write failures
///
/// Once the sink fails, later chunks are read and discarded so the child
/// never blocks on a full terminal buffer.
struct Output<'a, W: Write> {
    sink: &'a mut W,
    broken: bool,
    relayed: u64,
}

impl<'a, W: Write> Output<'a, W> {
    fn new(sink: &'a mut W) -> Self {
        Self {
            sink,
            broken: false,
            relayed: 0,
        }
    }

    fn forward(&mut self, data: &[u8]) {
        self.relayed += data.len() as u64;
        tracing::trace!(bytes = data.len(), "forwarding chunk");

        if self.broken {
            return;
        }
        if let Err(e) = self.write_chunk(data) {
            tracing::warn!("output closed, discarding further child output: {}", e);
            self.broken = true;
        }
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.sink.write_all(data)?;
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyError;
    use nix::errno::Errno;

    fn run(args: &[&str]) -> (RelayOutcome, Vec<u8>) {
        let command = Command::from_args(args).expect("Failed to build command");
        let mut output = Vec::new();
        let outcome = Relay::default()
            .run(&command, WindowSize::default(), &mut output)
            .expect("Relay failed");
        (outcome, output)
    }

    /// A sink that accepts `limit` bytes and then fails
    struct FailingSink {
        accepted: Vec<u8>,
        limit: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accepted.len() >= self.limit {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let n = buf.len().min(self.limit - self.accepted.len());
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = RelaySettings::default();
        assert_eq!(settings.poll_timeout, Duration::from_millis(100));
        assert_eq!(settings.chunk_size, 4096);
        assert_eq!(settings.poll_timeout_ms(), 100);
    }

    #[test]
    fn test_read_step_mapping() {
        assert_eq!(
            read_step(Ok(MasterRead::Data(7))),
            ReadStep {
                step: Step::Forwarded,
                forwarded: Some(7)
            }
        );
        assert_eq!(read_step(Ok(MasterRead::Pending)).step, Step::Idle);
        assert_eq!(read_step(Ok(MasterRead::Closed)).step, Step::Closed);
    }

    #[test]
    fn test_read_error_ends_stream() {
        let step = read_step(Err(PtyError::Read(Errno::EBADF)));
        assert_eq!(step.step, Step::Closed);
        assert_eq!(step.forwarded, None);
    }

    #[test]
    fn test_relay_output_and_success() {
        let (outcome, output) = run(&["printf", "hello"]);
        assert_eq!(output, b"hello");
        assert_eq!(outcome.status, ChildStatus::Exited(0));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.bytes_relayed, 5);
    }

    #[test]
    fn test_relay_exit_code() {
        let (outcome, output) = run(&["sh", "-c", "printf fail; exit 3"]);
        assert_eq!(output, b"fail");
        assert_eq!(outcome.exit_code(), 3);
    }

    #[test]
    fn test_relay_signal_maps_to_one() {
        let (outcome, _) = run(&["sh", "-c", "kill -KILL $$"]);
        assert!(matches!(outcome.status, ChildStatus::Signaled(_)));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn test_relay_multi_chunk_output() {
        let (outcome, output) = run(&["sh", "-c", "head -c 20000 /dev/zero | tr '\\0' x"]);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(output.len(), 20000);
        assert!(output.iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_relay_small_chunks() {
        let command = Command::from_args(["printf", "abcdefghij"]).expect("Failed to build");
        let relay = Relay::new(RelaySettings {
            poll_timeout: Duration::from_millis(20),
            chunk_size: 3,
        });
        let mut output = Vec::new();
        let outcome = relay
            .run(&command, WindowSize::default(), &mut output)
            .expect("Relay failed");
        assert_eq!(output, b"abcdefghij");
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_relay_stderr_is_relayed() {
        let (outcome, output) = run(&["sh", "-c", "printf out; printf err >&2; exit 4"]);
        assert_eq!(output, b"outerr");
        assert_eq!(outcome.exit_code(), 4);
    }

    #[test]
    fn test_relay_missing_program() {
        let (outcome, output) = run(&["pty-relay-no-such-program", "arg"]);
        assert_eq!(outcome.exit_code(), 127);
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("pty-relay-no-such-program"), "Unexpected output: {}", text);
    }

    #[test]
    fn test_relay_keeps_draining_after_sink_failure() {
        let command = Command::from_args(["sh", "-c", "head -c 50000 /dev/zero | tr '\\0' y; exit 6"])
            .expect("Failed to build");
        let mut sink = FailingSink {
            accepted: Vec::new(),
            limit: 100,
        };
        let outcome = Relay::default()
            .run(&command, WindowSize::default(), &mut sink)
            .expect("Relay failed");

        assert_eq!(outcome.exit_code(), 6);
        assert_eq!(sink.accepted.len(), 100);
        assert_eq!(outcome.bytes_relayed, 50000);
    }
}

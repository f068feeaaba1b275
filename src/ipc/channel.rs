use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{KettleError, Result};

/// Which end of the conversation a process holds once bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Writes requests, reads responses.
    Caller,
    /// Reads requests, writes responses.
    Callee,
}

/// Two unidirectional pipes created before a fork.
///
/// Pipe A carries caller -> callee traffic, pipe B carries callee -> caller
/// traffic. After the fork each process calls [`PipePair::bind`] exactly once
/// with its role, which keeps the two ends it owns and closes the rest.
pub struct PipePair {
    a_read: OwnedFd,
    a_write: OwnedFd,
    b_read: OwnedFd,
    b_write: OwnedFd,
}

impl PipePair {
    pub fn new() -> Result<Self> {
        // Commands spawned by the worker must never inherit channel ends.
        // Forked executors still do; see `Channel::raw_fds`.
        let (a_read, a_write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
        let (b_read, b_write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;

        Ok(Self {
            a_read,
            a_write,
            b_read,
            b_write,
        })
    }

    /// Keep the ends owned by `role` and close the others immediately.
    ///
    /// An unused write end left open in this process keeps the peer's reader
    /// from ever observing end-of-stream when the real writer exits.
    pub fn bind(self, role: Role) -> Channel {
        let (reader, writer, unused) = match role {
            Role::Caller => (self.b_read, self.a_write, [self.a_read, self.b_write]),
            Role::Callee => (self.a_read, self.b_write, [self.b_read, self.a_write]),
        };
        drop(unused);

        Channel {
            reader: BufReader::new(File::from(reader)),
            writer: File::from(writer),
        }
    }
}

/// One bound end of a [`PipePair`].
///
/// Every value is encoded as a single line of JSON. The encoder escapes
/// control characters inside strings, so a newline can only appear as the
/// frame terminator and each `send` arrives as exactly one `receive`.
pub struct Channel {
    reader: BufReader<File>,
    writer: File,
}

impl Channel {
    /// The descriptors behind this end. A process forked while holding the
    /// channel closes these so that only the real owner keeps the peer from
    /// seeing end-of-stream.
    pub fn raw_fds(&self) -> [RawFd; 2] {
        [self.reader.get_ref().as_raw_fd(), self.writer.as_raw_fd()]
    }

    /// Serialize `value` and write it as one frame.
    pub fn send<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut frame = serde_json::to_vec(value)?;
        frame.push(b'\n');
        self.writer.write_all(&frame).map_err(closed_or_io)?;
        self.writer.flush().map_err(closed_or_io)
    }

    /// Block until one complete frame is available.
    ///
    /// Returns `Ok(None)` once the peer's writer is gone and no frame is
    /// pending. A frame cut short by end-of-stream counts as closed too.
    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).map_err(closed_or_io)?;
        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') {
            tracing::warn!(
                bytes = line.len(),
                "discarding truncated frame; peer closed mid-write"
            );
            return Ok(None);
        }

        serde_json::from_str(line.trim_end())
            .map(Some)
            .map_err(|e| KettleError::Protocol {
                reason: format!("malformed frame: {}", e),
            })
    }

    /// Like [`Channel::receive`], but fails with [`KettleError::Timeout`]
    /// when no frame starts arriving before `timeout` elapses.
    ///
    /// Polls in growing slices so a slow peer is logged while we wait.
    pub fn receive_timeout<T: DeserializeOwned>(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<T>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut slice = Duration::from_millis(50);

        while self.reader.buffer().is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(KettleError::Timeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            if self.poll_readable(slice.min(remaining))? {
                break;
            }
            tracing::trace!(
                waited_ms = started.elapsed().as_millis() as u64,
                "still waiting for peer"
            );
            slice = (slice * 2).min(Duration::from_secs(1));
        }

        self.receive()
    }

    fn poll_readable(&self, wait: Duration) -> Result<bool> {
        let millis = u32::try_from(wait.as_millis()).unwrap_or(u32::MAX);
        let timeout = PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX);
        let mut fds = [PollFd::new(self.reader.get_ref().as_fd(), PollFlags::POLLIN)];

        match poll(&mut fds, timeout) {
            Ok(0) => Ok(false),
            // POLLIN or POLLHUP: either way the next read will not block
            Ok(_) => Ok(true),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn closed_or_io(e: io::Error) -> KettleError {
    match e.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => KettleError::ChannelClosed,
        _ => KettleError::Io(e),
    }
}

use std::time::Duration;

use nix::unistd::Pid;

use crate::config::Config;
use crate::error::{KettleError, Result};
use crate::ipc::channel::{Channel, PipePair, Role};
use crate::ipc::{EnvironmentReport, Request, Response};
use crate::process::{self, ChildExit, Forked};
use crate::worker;

/// Supervisor-side view of the worker's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Spawning,
    EnvironmentLoading,
    Ready,
    Executing,
    Exited,
}

/// A forked worker and the caller end of its channel.
///
/// Dropping a `WorkerProcess` that was not shut down kills and reaps it.
pub struct WorkerProcess {
    pid: Pid,
    channel: Option<Channel>,
    state: WorkerState,
    reaped: bool,
}

impl WorkerProcess {
    pub fn spawn(config: &Config) -> Result<Self> {
        Self::spawn_with(|channel| worker::serve(channel, config.clone()))
    }

    /// Fork a child that runs `body` on the callee end of a fresh channel.
    pub fn spawn_with<F>(body: F) -> Result<Self>
    where
        F: FnOnce(Channel) -> i32,
    {
        let pipes = PipePair::new()?;
        match process::fork()? {
            Forked::Child => process::run_child(|| body(pipes.bind(Role::Callee))),
            Forked::Parent(pid) => {
                tracing::debug!(%pid, "worker spawned");
                Ok(Self {
                    pid,
                    channel: Some(pipes.bind(Role::Caller)),
                    state: WorkerState::Spawning,
                    reaped: false,
                })
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Ask the worker to load its environment, optionally bounded by `timeout`.
    pub fn load_environment(&mut self, timeout: Option<Duration>) -> Result<EnvironmentReport> {
        let channel = self.channel.as_mut().ok_or(KettleError::ChannelClosed)?;
        self.state = WorkerState::EnvironmentLoading;
        channel.send(&Request::LoadEnvironment)?;

        let response = match timeout {
            Some(limit) => channel.receive_timeout(limit).map_err(|e| match e {
                KettleError::Timeout { .. } => KettleError::LoadTimeout {
                    timeout_secs: limit.as_secs(),
                },
                other => other,
            })?,
            None => channel.receive()?,
        };

        match response {
            Some(Response::Environment(report)) => {
                self.state = WorkerState::Ready;
                Ok(report)
            }
            Some(Response::Failure { message, backtrace }) => {
                self.state = WorkerState::Ready;
                Ok(EnvironmentReport::failed(message, backtrace, 0.0))
            }
            Some(other) => Err(KettleError::Protocol {
                reason: format!("unexpected reply to load-environment: {:?}", other),
            }),
            None => {
                self.state = WorkerState::Exited;
                Err(KettleError::ChannelClosed)
            }
        }
    }

    /// One request/response round trip.
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        let channel = self.channel.as_mut().ok_or(KettleError::ChannelClosed)?;
        tracing::trace!(action = request.action(), pid = %self.pid, "calling worker");
        self.state = WorkerState::Executing;

        if let Err(e) = channel.send(request) {
            if matches!(e, KettleError::ChannelClosed) {
                self.state = WorkerState::Exited;
            }
            return Err(e);
        }
        match channel.receive::<Response>() {
            Ok(Some(response)) => {
                self.state = WorkerState::Ready;
                Ok(response)
            }
            Ok(None) => {
                self.state = WorkerState::Exited;
                Err(KettleError::ChannelClosed)
            }
            Err(e) => {
                self.state = WorkerState::Ready;
                Err(e)
            }
        }
    }

    /// Send `stop` (best effort), close the channel and reap the process.
    pub fn shutdown(mut self) -> Result<ChildExit> {
        if let Some(mut channel) = self.channel.take() {
            match channel.send(&Request::Stop) {
                Ok(()) => {
                    if let Err(e) = channel.receive::<Response>() {
                        tracing::debug!("no stop acknowledgement: {}", e);
                    }
                }
                Err(e) => tracing::debug!("worker already gone: {}", e),
            }
        }
        let exit = process::wait_for(self.pid);
        self.finish();
        exit
    }

    /// Kill without asking, for a worker that stopped answering.
    pub fn kill(mut self) -> Result<ChildExit> {
        self.channel = None;
        let exit = process::kill_and_reap(self.pid);
        self.finish();
        exit
    }

    fn finish(&mut self) {
        self.reaped = true;
        self.state = WorkerState::Exited;
        tracing::debug!(pid = %self.pid, "worker reaped");
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        self.channel = None;
        if let Err(e) = process::kill_and_reap(self.pid) {
            tracing::warn!(pid = %self.pid, "could not reap worker: {}", e);
        }
    }
}

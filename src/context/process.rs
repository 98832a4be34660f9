//! Distributed execution in a separate OS process.
//!
//! The orchestrator binds one report listener for the whole sweep. For every run it spawns this program in
//! restricted-worker mode:
//!
//! ```text
//! <program> worker --grant <capabilities> --report <host:port> [-- <filter>]
//! ```
//!
//! and accepts exactly one connection before anything else is spawned, so acceptance order always matches spawn
//! order. Connections left in the backlog by earlier runs are discarded before each spawn and after a run that
//! never connected. The worker narrows its capabilities, connects back and streams protocol lines.
//!
//! Waiting for the connection counts against the run's deadline; a worker that misses it is killed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;

use permatrix_core::CapabilitySet;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::{ContextError, ExecutionContext, ExitOutcome, MessageStream, RunHandle};

/// Subcommand that selects restricted-worker mode.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Spawns one restricted worker process per run.
pub struct ProcessContext {
    listener: TcpListener,
    /// Non-blocking handle on the same socket, used to empty the accept queue without waiting on the reactor.
    backlog: std::net::TcpListener,
    addr: SocketAddr,
    program: PathBuf,
}

enum Rendezvous {
    Connected(std::io::Result<(tokio::net::TcpStream, SocketAddr)>),
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
}

impl ProcessContext {
    /// Open the report listener on `addr` (port `0` picks a free port).
    ///
    /// ## Errors
    ///
    /// Returns [`ContextError::Bind`] if the address cannot be bound; no run could report without it.
    pub async fn bind(addr: &str, program: PathBuf) -> Result<Self, ContextError> {
        let bind_error = |source| ContextError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        // `into_std` leaves the socket non-blocking, and so does its clone.
        let std_listener = listener.into_std().map_err(bind_error)?;
        let backlog = std_listener.try_clone().map_err(bind_error)?;
        let listener = TcpListener::from_std(std_listener).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        tracing::info!(addr = %addr, "report listener bound");

        Ok(Self {
            listener,
            backlog,
            addr,
            program,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn command(&self, capabilities: &CapabilitySet, filter: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(WORKER_SUBCOMMAND)
            .arg("--grant")
            .arg(capabilities.format())
            .arg("--report")
            .arg(self.addr.to_string());
        if let Some(filter) = filter {
            cmd.arg("--").arg(filter);
        }

        // stdout carries nothing we read; stderr is inherited so panics and logs stay visible.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    /// Drop every connection already queued on the listener, without waiting for new ones.
    ///
    /// Only the worker spawned for the current run may be accepted; anything else in the backlog belongs to a run
    /// that has already been decided.
    fn drain_backlog(&self) {
        loop {
            match self.backlog.accept() {
                Ok((stream, peer)) => {
                    tracing::warn!(peer = %peer, "discarding reporter connection from an earlier run");
                    drop(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(error = %e, "accept failed while draining the backlog");
                    break;
                }
            }
        }
    }
}

impl ExecutionContext for ProcessContext {
    fn name(&self) -> &'static str {
        "process"
    }

    #[tracing::instrument(skip_all, fields(capabilities = %capabilities))]
    async fn start(
        &mut self,
        capabilities: &CapabilitySet,
        filter: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<RunHandle, ContextError> {
        self.drain_backlog();

        let mut child = self.command(capabilities, filter).spawn().map_err(|source| ContextError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        tracing::debug!(pid = child.id(), "restricted worker spawned");

        // Accept first: a worker that reported everything and exited still has its connection queued.
        let rendezvous = tokio::select! {
            biased;
            accepted = self.listener.accept() => Rendezvous::Connected(accepted),
            status = child.wait() => Rendezvous::Exited(status),
            _ = sleep_until(deadline) => Rendezvous::TimedOut,
        };

        match rendezvous {
            Rendezvous::Connected(Ok((stream, peer))) => {
                tracing::debug!(peer = %peer, "reporter connected");
                Ok(RunHandle::new(MessageStream::from_reader(stream), Box::pin(wait_for_exit(child))))
            }
            Rendezvous::Connected(Err(e)) => {
                let _ = child.kill().await;
                Err(ContextError::Accept(e))
            }
            Rendezvous::Exited(status) => {
                let outcome = match status {
                    Ok(status) => ExitOutcome::from_status(status),
                    Err(e) => ExitOutcome::abnormal(None, format!("failed to wait for worker: {e}")),
                };
                tracing::warn!(?outcome, "worker exited before connecting");
                self.drain_backlog();
                Ok(RunHandle::new(MessageStream::empty(), outcome.ready()))
            }
            Rendezvous::TimedOut => {
                let _ = child.kill().await;
                let outcome = ExitOutcome::timed_out(format!(
                    "worker did not connect to {} before the deadline and was killed",
                    self.addr
                ));
                tracing::warn!(?outcome, "worker never connected");
                self.drain_backlog();
                Ok(RunHandle::new(MessageStream::empty(), outcome.ready()))
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_exit(mut child: Child) -> ExitOutcome {
    match child.wait().await {
        Ok(status) => ExitOutcome::from_status(status),
        Err(e) => ExitOutcome::abnormal(None, format!("failed to wait for worker: {e}")),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_command_line() {
        let ctx = ProcessContext::bind("127.0.0.1:0", PathBuf::from("permatrix")).await.unwrap();
        let caps: CapabilitySet = "read,network".parse().unwrap();
        let cmd = ctx.command(&caps, Some("-odd"));

        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "worker".to_string(),
                "--grant".to_string(),
                "network,read".to_string(),
                "--report".to_string(),
                ctx.local_addr().to_string(),
                "--".to_string(),
                "-odd".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_bind_failure_is_a_setup_error() {
        let result = ProcessContext::bind("definitely not an address", PathBuf::from("permatrix")).await;
        assert!(matches!(result, Err(ContextError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let mut ctx = ProcessContext::bind("127.0.0.1:0", PathBuf::from("/nonexistent/permatrix-worker"))
            .await
            .unwrap();
        let result = ctx.start(&CapabilitySet::none(), None, None).await;
        assert!(matches!(result, Err(ContextError::Spawn { .. })));
    }
}

//! Ownership of a spawned child.
//!
//! The child is moved into a watch task that either observes an unexpected
//! exit or performs shutdown when asked through [`ProcessHandle::terminate`].
//! Nothing else touches the `Child`, so exit detection and termination never
//! race over it.

use std::process::ExitStatus;
use std::sync::Weak;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::oneshot;
use toolrelay_core::{AppEvent, ErrorKind, SupervisorError};
use tracing::{info, warn};

use super::slot::ServerSlot;
use crate::shutdown::{ShutdownOutcome, shutdown_child};

struct StopRequest {
    grace: Duration,
    reply: oneshot::Sender<std::io::Result<ShutdownOutcome>>,
}

/// Handle to a live child owned by its watch task.
pub(crate) struct ProcessHandle {
    pid: Option<u32>,
    stop_tx: oneshot::Sender<StopRequest>,
}

impl ProcessHandle {
    /// Hand `child` to a watch task reporting into `slot`.
    pub(crate) fn watch(server_name: String, mut child: Child, slot: Weak<ServerSlot>) -> Self {
        let pid = child.id();
        let (stop_tx, stop_rx) = oneshot::channel::<StopRequest>();

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    report_exit(&server_name, pid, status, &slot);
                }
                request = stop_rx => {
                    match request {
                        Ok(StopRequest { grace, reply }) => {
                            let _ = reply.send(shutdown_child(&mut child, grace).await);
                        }
                        // Handle dropped without a stop: don't leave the child behind.
                        Err(_) => {
                            if let Err(e) = shutdown_child(&mut child, Duration::from_secs(5)).await {
                                warn!(server_name = %server_name, error = %e, "Failed to reap orphaned server process");
                            }
                        }
                    }
                }
            }
        });

        Self { pid, stop_tx }
    }

    pub(crate) const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the watch task is still holding a running child.
    pub(crate) fn is_alive(&self) -> bool {
        !self.stop_tx.is_closed()
    }

    /// Terminate the child: SIGTERM, wait `grace`, then kill.
    ///
    /// A child that already exited is reported as
    /// [`ShutdownOutcome::AlreadyExited`]-like success (`Ok(None)`).
    pub(crate) async fn terminate(
        self,
        grace: Duration,
    ) -> Result<Option<ShutdownOutcome>, SupervisorError> {
        let (reply, response) = oneshot::channel();
        if self.stop_tx.send(StopRequest { grace, reply }).is_err() {
            return Ok(None);
        }
        // Allow for the grace period plus the forced kill and reap.
        let budget = grace + Duration::from_secs(5);
        match tokio::time::timeout(budget, response).await {
            Ok(Ok(Ok(outcome))) => Ok(Some(outcome)),
            Ok(Ok(Err(e))) => Err(SupervisorError::TerminationFailure(e.to_string())),
            // Watch task saw the exit first.
            Ok(Err(_)) => Ok(None),
            Err(_) => Err(SupervisorError::TerminationFailure(format!(
                "process did not exit within {}s",
                budget.as_secs()
            ))),
        }
    }
}

fn report_exit(
    server_name: &str,
    pid: Option<u32>,
    status: std::io::Result<ExitStatus>,
    slot: &Weak<ServerSlot>,
) {
    let Some(slot) = slot.upgrade() else {
        return;
    };

    let (clean, description) = match &status {
        Ok(s) if s.success() => (true, "exited".to_string()),
        Ok(s) => (false, format!("exited unexpectedly ({s})")),
        Err(e) => (false, format!("could not be waited on: {e}")),
    };

    let updated = slot.publish_if(
        |record| record.pid == pid && record.pid.is_some() && record.status.is_live(),
        |record| {
            if clean {
                record.stopped(Some(format!("Server {description}")))
            } else {
                record.errored(format!("Server {description}"))
            }
        },
    );
    if !updated {
        return;
    }

    if clean {
        info!(server_name, pid = ?pid, "Server process exited");
        slot.emit(AppEvent::server_stopped(server_name));
    } else {
        warn!(server_name, pid = ?pid, %description, "Server process exited unexpectedly");
        slot.emit(AppEvent::server_error(
            server_name,
            ErrorKind::SpawnFailure,
            format!("Server {description}"),
        ));
    }
}

//! Graceful termination of a `tokio::process::Child` with SIGTERM → SIGKILL escalation.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How a child ended up terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited within the grace period after SIGTERM.
    Graceful(ExitStatus),
    /// Still alive after the grace period; killed.
    Killed(ExitStatus),
    /// Had already exited before the request.
    AlreadyExited(ExitStatus),
}

impl ShutdownOutcome {
    pub const fn was_forced(&self) -> bool {
        matches!(self, Self::Killed(_))
    }
}

/// Terminate a child, escalating to a forced kill after `grace`.
///
/// # Platform behavior
/// - Unix: SIGTERM via `nix`, then SIGKILL via `Child::kill`
/// - Other: `Child::kill` immediately
///
/// The child is always reaped before this returns `Ok`.
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<ShutdownOutcome> {
    if let Some(status) = child.try_wait()? {
        return Ok(ShutdownOutcome::AlreadyExited(status));
    }

    #[cfg(unix)]
    {
        shutdown_unix(child, grace).await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await.map(ShutdownOutcome::Killed)
    }
}

#[cfg(unix)]
async fn shutdown_unix(child: &mut Child, grace: Duration) -> io::Result<ShutdownOutcome> {
    let Some(pid) = child.id() else {
        // Already reaped by someone else.
        return child.wait().await.map(ShutdownOutcome::AlreadyExited);
    };
    let pid = i32::try_from(pid).map_err(io::Error::other)?;

    if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await.map(ShutdownOutcome::AlreadyExited);
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = tokio::time::timeout(grace, child.wait()).await {
        return result.map(ShutdownOutcome::Graceful);
    }

    child.kill().await?;
    child.wait().await.map(ShutdownOutcome::Killed)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn sigterm_stops_cooperative_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let outcome = shutdown_child(&mut child, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(outcome, ShutdownOutcome::Graceful(_)));
    }

    #[tokio::test]
    async fn escalates_when_sigterm_ignored() {
        let mut child = Command::new("sh")
            .args(["-c", "trap '' TERM; echo ready; while :; do sleep 1; done"])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();

        // Wait until the trap is installed.
        let mut stdout = tokio::io::BufReader::new(child.stdout.take().unwrap());
        let mut line = String::new();
        tokio::io::AsyncBufReadExt::read_line(&mut stdout, &mut line)
            .await
            .unwrap();

        let outcome = shutdown_child(&mut child, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(outcome.was_forced());
    }

    #[tokio::test]
    async fn already_exited_is_not_an_error() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();
        let outcome = shutdown_child(&mut child, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(matches!(outcome, ShutdownOutcome::AlreadyExited(_)));
    }
}

//! Child reaping.
//!
//! Every session ends by reaping its program. A program that is still running
//! gets SIGHUP, the signal a terminal hangup delivers, and is killed if it has
//! not exited within the hangup grace period.

use std::time::Duration;

use termgate_pty::{ExitStatus, PtyChild, PtySignal};

/// Upper bound on waiting for a child after SIGKILL.
pub const KILL_WAIT: Duration = Duration::from_secs(5);

/// How a child was reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The child had already exited.
    AlreadyExited(ExitStatus),
    /// The child exited after SIGHUP.
    HungUp(ExitStatus),
    /// The child ignored SIGHUP and was killed.
    Killed(ExitStatus),
    /// The child could not be waited for.
    Lost,
}

impl ReapOutcome {
    /// The child's exit status, if it was collected.
    #[must_use]
    pub const fn status(&self) -> Option<ExitStatus> {
        match self {
            Self::AlreadyExited(s) | Self::HungUp(s) | Self::Killed(s) => Some(*s),
            Self::Lost => None,
        }
    }
}

/// Make sure `child` has exited and collect its status.
///
/// Sends SIGHUP to a running child, waits up to `hangup_grace`, then sends
/// SIGKILL and waits again.
pub async fn reap<K>(child: &mut K, hangup_grace: Duration) -> ReapOutcome
where
    K: PtyChild + ?Sized,
{
    match child.try_wait() {
        Ok(Some(status)) => return ReapOutcome::AlreadyExited(status),
        Ok(None) => {}
        Err(e) => tracing::debug!(pid = child.pid(), error = %e, "try_wait failed"),
    }

    if let Err(e) = child.signal(PtySignal::Hangup) {
        if !e.is_closed() {
            tracing::debug!(pid = child.pid(), error = %e, "failed to send SIGHUP");
        }
    }

    match tokio::time::timeout(hangup_grace, child.wait()).await {
        Ok(Ok(status)) => return ReapOutcome::HungUp(status),
        Ok(Err(e)) => {
            tracing::warn!(pid = child.pid(), error = %e, "wait failed");
            return ReapOutcome::Lost;
        }
        Err(_) => {
            tracing::debug!(pid = child.pid(), "child ignored SIGHUP, killing");
        }
    }

    if let Err(e) = child.kill() {
        if !e.is_closed() {
            tracing::warn!(pid = child.pid(), error = %e, "failed to send SIGKILL");
        }
    }

    match tokio::time::timeout(KILL_WAIT, child.wait()).await {
        Ok(Ok(status)) => ReapOutcome::Killed(status),
        Ok(Err(e)) => {
            tracing::warn!(pid = child.pid(), error = %e, "wait after SIGKILL failed");
            ReapOutcome::Lost
        }
        Err(_) => {
            tracing::warn!(pid = child.pid(), "child survived SIGKILL");
            ReapOutcome::Lost
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeChild;

    const SIGHUP: i32 = 1;
    const SIGKILL: i32 = 9;

    #[tokio::test]
    async fn exited_child_is_not_signalled() {
        let mut child = FakeChild::new();
        child.exit(ExitStatus::Exited(0));

        let outcome = reap(&mut child, Duration::from_millis(50)).await;
        assert_eq!(outcome, ReapOutcome::AlreadyExited(ExitStatus::Exited(0)));
        assert!(child.signals().is_empty());
    }

    #[tokio::test]
    async fn running_child_gets_hangup() {
        let mut child = FakeChild::new().exit_on(PtySignal::Hangup);

        let outcome = reap(&mut child, Duration::from_secs(5)).await;
        assert_eq!(outcome, ReapOutcome::HungUp(ExitStatus::Signaled(SIGHUP)));
        assert_eq!(child.signals(), vec![PtySignal::Hangup]);
    }

    #[tokio::test]
    async fn stubborn_child_is_killed() {
        let mut child = FakeChild::new().exit_on(PtySignal::Kill);

        let outcome = reap(&mut child, Duration::from_millis(20)).await;
        assert_eq!(outcome, ReapOutcome::Killed(ExitStatus::Signaled(SIGKILL)));
        assert_eq!(child.signals(), vec![PtySignal::Hangup, PtySignal::Kill]);
        assert_eq!(outcome.status().map(|s| s.shell_code()), Some(137));
    }
}

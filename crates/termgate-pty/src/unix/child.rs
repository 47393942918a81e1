//! Unix child process management for PTY.
//!
//! This module launches a child bound to a PTY slave and provides the handle
//! used to wait for, signal and reap it.

use std::future::Future;
use std::io;
use std::os::unix::io::OwnedFd;
use std::pin::Pin;
use std::process::Stdio;

use rustix::process::{Pid, Signal, kill_process};
use tokio::process::{Child as TokioChild, Command};

use crate::config::{LaunchConfig, PtySignal};
use crate::error::{PtyError, Result, errno_to_io};
use crate::traits::{ExitStatus, PtyChild};

/// Unix child process handle.
///
/// Owns the tokio child. The child is killed if the handle is dropped
/// before it has been reaped.
pub struct UnixPtyChild {
    child: TokioChild,
    pid: u32,
    exit_status: Option<ExitStatus>,
}

impl std::fmt::Debug for UnixPtyChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixPtyChild")
            .field("pid", &self.pid)
            .field("exit_status", &self.exit_status)
            .finish()
    }
}

impl UnixPtyChild {
    /// Wrap a spawned tokio child.
    ///
    /// # Errors
    ///
    /// Returns [`PtyError::NotRunning`] if the child has already been polled
    /// to completion and no longer has a pid.
    pub fn new(child: TokioChild) -> Result<Self> {
        let pid = child.id().ok_or(PtyError::NotRunning)?;
        Ok(Self {
            child,
            pid,
            exit_status: None,
        })
    }

    /// Get the process ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Check if the process has not been reaped yet.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.exit_status.is_none()
    }

    /// Wait for the child process to exit.
    ///
    /// Cancel safe: dropping the future before completion leaves the child
    /// waitable.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let status = ExitStatus::from(self.child.wait().await.map_err(PtyError::Wait)?);
        self.exit_status = Some(status);
        tracing::debug!(pid = self.pid, %status, "child reaped");
        Ok(status)
    }

    /// Try to get the exit status without blocking.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.exit_status {
            return Ok(Some(status));
        }

        match self.child.try_wait().map_err(PtyError::Wait)? {
            Some(status) => {
                let status = ExitStatus::from(status);
                self.exit_status = Some(status);
                tracing::debug!(pid = self.pid, %status, "child reaped");
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Send a signal to the child process.
    ///
    /// Fails with [`PtyError::NotRunning`] once the child has been reaped, so
    /// a recycled pid is never signalled.
    pub fn signal(&self, signal: PtySignal) -> Result<()> {
        if !self.is_running() {
            return Err(PtyError::NotRunning);
        }

        let pid = Pid::from_raw(self.pid as i32).ok_or_else(|| {
            PtyError::Signal(io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))
        })?;

        let sig = Signal::from_named_raw(signal.as_unix_signal()).ok_or_else(|| {
            PtyError::Signal(io::Error::new(io::ErrorKind::InvalidInput, "invalid signal"))
        })?;

        tracing::debug!(pid = self.pid, %signal, "signalling child");
        kill_process(pid, sig).map_err(|e| PtyError::Signal(errno_to_io(e)))
    }

    /// Kill the child process (SIGKILL).
    pub fn kill(&mut self) -> Result<()> {
        self.signal(PtySignal::Kill)
    }
}

impl PtyChild for UnixPtyChild {
    fn pid(&self) -> u32 {
        Self::pid(self)
    }

    fn is_running(&self) -> bool {
        Self::is_running(self)
    }

    fn wait(&mut self) -> Pin<Box<dyn Future<Output = Result<ExitStatus>> + Send + '_>> {
        Box::pin(Self::wait(self))
    }

    fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Self::try_wait(self)
    }

    fn signal(&self, signal: PtySignal) -> Result<()> {
        Self::signal(self, signal)
    }

    fn kill(&mut self) -> Result<()> {
        Self::kill(self)
    }
}

/// Launch a child process on a PTY slave.
///
/// The child's stdin, stdout and stderr are the slave; before exec it starts
/// a new session and takes the slave as its controlling terminal. The
/// caller's `slave` descriptor is consumed and closed once the child has
/// been spawned, so end-of-stream on the master tracks the child alone.
///
/// # Errors
///
/// Returns [`PtyError::Launch`] if the program cannot be started.
pub fn launch(config: &LaunchConfig, slave: OwnedFd) -> Result<UnixPtyChild> {
    let program = config.program_name();
    let launch_err = |source: io::Error| PtyError::Launch {
        program: program.clone(),
        source,
    };

    let stdin = slave.try_clone().map_err(launch_err)?;
    let stdout = slave.try_clone().map_err(launch_err)?;
    let stderr = slave;

    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args);
    cmd.env_clear();
    cmd.envs(config.effective_env());
    cmd.stdin(Stdio::from(stdin));
    cmd.stdout(Stdio::from(stdout));
    cmd.stderr(Stdio::from(stderr));
    cmd.kill_on_drop(true);

    if let Some(ref dir) = config.working_directory {
        cmd.current_dir(dir);
    }

    // SAFETY: setsid and ioctl are async-signal-safe. By the time the hook
    // runs, fd 0 is the slave.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }

            if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(())
        });
    }

    let child = cmd.spawn().map_err(launch_err)?;
    // `cmd` holds the last copies of the slave; release them now.
    drop(cmd);

    let child = UnixPtyChild::new(child)?;
    tracing::debug!(pid = child.pid(), program = %program, "launched child on PTY");
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowSize;
    use crate::unix::PtyPair;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn launch_missing_program() {
        let pair = PtyPair::allocate(WindowSize::default()).unwrap();
        let (_master, slave) = pair.into_parts();

        let config = LaunchConfig::new("/nonexistent/termgate-test-binary");
        let err = launch(&config, slave).unwrap_err();
        match err {
            PtyError::Launch { program, source } => {
                assert_eq!(program, "/nonexistent/termgate-test-binary");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wait_caches_status() {
        let (_master, slave) = PtyPair::allocate(WindowSize::default()).unwrap().into_parts();
        let config = LaunchConfig::builder("/bin/sh").args(["-c", "exit 7"]).build();

        let mut child = launch(&config, slave).unwrap();
        assert!(child.is_running());

        let status = child.wait().await.unwrap();
        assert_eq!(status, ExitStatus::Exited(7));
        assert!(!child.is_running());
        assert_eq!(child.try_wait().unwrap(), Some(ExitStatus::Exited(7)));
        assert_eq!(child.wait().await.unwrap(), ExitStatus::Exited(7));
        assert!(matches!(
            child.signal(PtySignal::Hangup),
            Err(PtyError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn child_has_controlling_terminal() {
        let (mut master, slave) = PtyPair::allocate(WindowSize::default()).unwrap().into_parts();
        let config = LaunchConfig::builder("/bin/sh")
            .args(["-c", "test -t 0 && tty >/dev/null && echo CTTY_OK"])
            .build();

        let mut child = launch(&config, slave).unwrap();

        let mut output = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match master.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
            }
        }

        assert!(String::from_utf8_lossy(&output).contains("CTTY_OK"));
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn signal_terminates_child() {
        let (_master, slave) = PtyPair::allocate(WindowSize::default()).unwrap().into_parts();
        let config = LaunchConfig::builder("/bin/sh").args(["-c", "exec sleep 30"]).build();

        let mut child = launch(&config, slave).unwrap();
        child.signal(PtySignal::Terminate).unwrap();

        let status = child.wait().await.unwrap();
        assert_eq!(status, ExitStatus::Signaled(libc::SIGTERM));
    }
}

//! Small process-related helpers shared across the workspace.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
pub use terminate::{Termination, terminate_gracefully};

#[cfg(feature = "tokio")]
mod terminate {
    use std::io;
    use std::process::ExitStatus;
    use std::time::Duration;

    use tokio::process::Child;
    use tracing::{debug, warn};

    /// How a child process ended after [`terminate_gracefully`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Termination {
        /// The process had already exited before any signal was sent.
        AlreadyExited(ExitStatus),
        /// The process exited within the grace period after the polite request.
        Graceful(ExitStatus),
        /// The grace period elapsed and the process was killed.
        Killed(ExitStatus),
    }

    impl Termination {
        pub fn status(&self) -> ExitStatus {
            match self {
                Self::AlreadyExited(s) | Self::Graceful(s) | Self::Killed(s) => *s,
            }
        }
    }

    /// Ask a child to exit (SIGTERM on unix), wait up to `grace`, then kill it.
    ///
    /// The child is always reaped before this returns `Ok`.
    pub async fn terminate_gracefully(child: &mut Child, grace: Duration) -> io::Result<Termination> {
        if let Some(status) = child.try_wait()? {
            return Ok(Termination::AlreadyExited(status));
        }

        request_exit(child)?;

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "Process exited after termination request");
                Ok(Termination::Graceful(status))
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Process did not exit within grace period, killing"
                );
                child.start_kill()?;
                let status = child.wait().await?;
                Ok(Termination::Killed(status))
            }
        }
    }

    #[cfg(unix)]
    fn request_exit(child: &mut Child) -> io::Result<()> {
        let Some(pid) = child.id() else {
            return Ok(());
        };
        // SAFETY: plain syscall on a pid we own and have not yet reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            // ESRCH: exited between try_wait and kill, the wait below reaps it.
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn request_exit(child: &mut Child) -> io::Result<()> {
        child.start_kill()
    }

}

//! Platform-specific process spawning and termination.
//!
//! The platform differences are narrowed to [`SpawnOptions`]: a new
//! process group (POSIX) so the whole tree can be signalled as a unit,
//! and detached-no-console (Windows).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use fleetmind_core::CoreError;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// How a server process should be isolated from the parent.
#[derive(Debug, Clone, Copy)]
pub struct SpawnOptions {
    /// Start in a new session / process group (POSIX).
    pub new_session: bool,
    /// Detach from the console (Windows).
    pub no_console: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            new_session: cfg!(unix),
            no_console: cfg!(windows),
        }
    }
}

/// A spawned server process.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    pid: u32,
}

/// Spawn the runtime server process.
pub fn spawn_server(binary: &Path, options: SpawnOptions) -> Result<ServerProcess, CoreError> {
    let mut command = Command::new(binary);
    command
        .arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(false);

    #[cfg(unix)]
    if options.new_session {
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        let mut flags = CREATE_NEW_PROCESS_GROUP;
        if options.no_console {
            flags |= DETACHED_PROCESS;
        }
        command.creation_flags(flags);
    }

    let child = command.spawn().map_err(|e| CoreError::SpawnError {
        stderr: e.to_string(),
    })?;

    let pid = child.id().unwrap_or(0);
    tracing::info!(target: "fleetmind::llm", pid, "started runtime server process");

    Ok(ServerProcess { child, pid })
}

impl ServerProcess {
    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Terminate the process tree: graceful signal first, then a forced
    /// kill once the grace period expires. Returns whatever stderr the
    /// process left behind.
    pub async fn shutdown(mut self, grace: Duration) -> String {
        self.send_terminate();

        if tokio::time::timeout(grace, self.child.wait()).await.is_err() {
            tracing::warn!(target: "fleetmind::llm", pid = self.pid, "grace period expired, killing process group");
            self.send_kill();
            let _ = self.child.wait().await;
        }

        self.collect_stderr().await
    }

    /// Send the graceful termination signal to the whole group.
    fn send_terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if self.pid > 0 {
                let _ = killpg(Pid::from_raw(self.pid as i32), Signal::SIGTERM);
                return;
            }
        }
        let _ = self.child.start_kill();
    }

    /// Forcibly kill the whole group.
    fn send_kill(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if self.pid > 0 {
                let _ = killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL);
                return;
            }
        }
        let _ = self.child.start_kill();
    }

    /// Read whatever the dead process wrote to stderr.
    async fn collect_stderr(&mut self) -> String {
        let mut buffer = String::new();
        if let Some(mut stderr) = self.child.stderr.take() {
            let read = tokio::time::timeout(
                Duration::from_millis(250),
                stderr.read_to_string(&mut buffer),
            );
            let _ = read.await;
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_match_platform() {
        let options = SpawnOptions::default();
        if cfg!(unix) {
            assert!(options.new_session);
            assert!(!options.no_console);
        } else {
            assert!(options.no_console);
        }
    }

    #[test]
    fn test_spawn_missing_binary_is_spawn_error() {
        let result = spawn_server(Path::new("/nonexistent/fleetmind-runtime"), SpawnOptions::default());
        match result {
            Err(CoreError::SpawnError { stderr }) => assert!(!stderr.is_empty()),
            other => panic!("expected SpawnError, got {other:?}"),
        }
    }
}

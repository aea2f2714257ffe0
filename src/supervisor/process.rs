//! External proxy process boundary

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Result, TetherError};

/// A running proxy process owned by the supervisor
#[async_trait]
pub trait ManagedProcess: Send {
    /// OS process id, if known
    fn id(&self) -> Option<u32>;

    /// Wait for exit; returns the exit code when there is one
    async fn wait(&mut self) -> Result<Option<i32>>;

    /// Terminate the process; killing an already-exited process is not an error
    async fn kill(&mut self) -> Result<()>;
}

/// Starts proxy processes for a configuration file
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, config_path: &Path) -> Result<Box<dyn ManagedProcess>>;
}

/// Launches `<program> -c <config> -u`
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    quiet: bool,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            quiet: false,
        }
    }

    /// Discard the child's stdout/stderr instead of inheriting them
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    fn command(&self, config_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(config_path)
            .arg("-u")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        cmd
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, config_path: &Path) -> Result<Box<dyn ManagedProcess>> {
        let child = self.command(config_path).spawn().map_err(|e| {
            TetherError::Spawn(format!("{}: {}", self.program.display(), e))
        })?;

        debug!(pid = ?child.id(), "Spawned {}", self.program.display());
        Ok(Box::new(ChildProcess { child }))
    }
}

/// `tokio::process::Child` behind the `ManagedProcess` interface
pub struct ChildProcess {
    child: Child,
}

#[async_trait]
impl ManagedProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(TetherError::Io(e)),
        }
    }
}

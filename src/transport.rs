//! The seam between the engine and whatever actually talks to remote hosts.
//!
//! The engine only ever sees these traits. `session::SshTransport` is the
//! production implementation; tests plug in in-memory ones.

use async_trait::async_trait;

use crate::config::Credentials;
use crate::error::RolloutError;
use crate::step::FilePair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives command output line by line while the command runs.
///
/// Sinks only display output. Whether stderr content fails a step is
/// decided from the returned [`CommandOutcome`] once the command is done.
pub trait OutputSink: Send + Sync {
    fn line(&self, stream: OutputStream, line: &str);
}

/// What a finished remote command left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the remote side did not report a status, e.g. killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutcome {
    pub fn wrote_stderr(&self) -> bool {
        !self.stderr.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: String,
    pub cwd: Option<String>,
    pub env: Vec<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ElevatedRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<String>,
    /// Written to the process's stdin before anything else.
    pub stdin: String,
    pub pty: bool,
}

impl std::fmt::Debug for ElevatedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevatedRequest")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .field("stdin", &"<redacted>")
            .field("pty", &self.pty)
            .finish()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn Connection>, RolloutError>;
}

/// A live connection to one host, owned by one host session.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn execute(
        &self,
        request: &ExecRequest,
        sink: &dyn OutputSink,
    ) -> Result<CommandOutcome, RolloutError>;

    async fn execute_elevated(
        &self,
        request: &ElevatedRequest,
        sink: &dyn OutputSink,
    ) -> Result<CommandOutcome, RolloutError>;

    /// Uploads every pair with at most `concurrency` transfers in flight.
    async fn upload_files(
        &self,
        files: &[FilePair],
        concurrency: usize,
    ) -> Result<bool, RolloutError>;

    /// Recursively uploads `local` to `remote`.
    async fn upload_directory(
        &self,
        local: &str,
        remote: &str,
        concurrency: usize,
    ) -> Result<bool, RolloutError>;

    /// Shuts the connection down. Called once, after the host's last step.
    async fn close(self: Box<Self>) -> Result<(), RolloutError>;
}

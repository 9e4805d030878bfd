//! Turns one step into one transport call for one host.

use crate::config::Credentials;
use crate::error::RolloutError;
use crate::host::Host;
use crate::logger::Logger;
use crate::result::StepResult;
use crate::step::{substitute, CommandStep, DirectoryStep, FilePair, FileStep, Step};
use crate::transport::{Connection, ElevatedRequest, ExecRequest, OutputSink, OutputStream};

/// Forwards command output to the logger while the command runs.
struct StepOutput<'a> {
    label: &'a str,
    logger: &'a dyn Logger,
    show_output: bool,
}

impl OutputSink for StepOutput<'_> {
    fn line(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => {
                if self.show_output {
                    self.logger.output(&format!("{} {}", self.label, line));
                }
            }
            OutputStream::Stderr => self.logger.error(&format!("{} {}", self.label, line)),
        }
    }
}

pub struct Dispatcher<'a> {
    connection: &'a dyn Connection,
    host: &'a Host,
    /// Host name as printed in log lines.
    label: &'a str,
    logger: &'a dyn Logger,
    credentials: &'a Credentials,
    /// Parallel file transfers within one upload step.
    concurrency: usize,
    show_output: bool,
}

impl<'a> Dispatcher<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: &'a dyn Connection,
        host: &'a Host,
        label: &'a str,
        logger: &'a dyn Logger,
        credentials: &'a Credentials,
        concurrency: usize,
        show_output: bool,
    ) -> Self {
        Self {
            connection,
            host,
            label,
            logger,
            credentials,
            concurrency,
            show_output,
        }
    }

    /// Runs `step`, the `position`-th step of the run.
    ///
    /// `Err(RolloutError::InvalidStep)` means the step had nothing to do and
    /// the host may carry on. Any other error should stop the host.
    pub async fn dispatch(&self, position: usize, step: &Step) -> Result<StepResult, RolloutError> {
        match step {
            Step::Command(step) => self.run_command(step).await,
            Step::Files(step) => self.put_files(step).await,
            Step::Directory(step) => self.put_directory(step).await,
            Step::Invalid => Err(RolloutError::InvalidStep { position }),
        }
    }

    async fn run_command(&self, step: &CommandStep) -> Result<StepResult, RolloutError> {
        let command = substitute(&step.command, self.host.index);
        self.logger
            .info(&format!("{} === run '{}' ===", self.label, command));
        let sink = StepOutput {
            label: self.label,
            logger: self.logger,
            show_output: self.show_output,
        };

        let outcome = if step.with_root {
            // Plain whitespace split: quoted arguments are not preserved.
            let request = ElevatedRequest {
                program: "sudo".to_string(),
                args: command.split_whitespace().map(str::to_string).collect(),
                cwd: step.cwd.clone(),
                env: step.env.clone(),
                stdin: format!("{}\n", self.credentials.password),
                pty: true,
            };
            self.connection.execute_elevated(&request, &sink).await?
        } else {
            let request = ExecRequest {
                command: command.clone(),
                cwd: step.cwd.clone(),
                env: step.env.clone(),
            };
            self.connection.execute(&request, &sink).await?
        };

        // Exit codes are not checked; only stderr content can fail a step.
        if step.catch_err && outcome.wrote_stderr() {
            return Err(RolloutError::StepExecution {
                host: self.host.address.clone(),
                message: outcome.stderr.join("\n"),
            });
        }

        Ok(StepResult::Command {
            name: step.name.clone().unwrap_or(command),
            success: true,
            remote: self.host.address.clone(),
        })
    }

    /// `success` is what the transport reports for the whole batch, so a
    /// remote write that fails shows up as `false` rather than `true`.
    async fn put_files(&self, step: &FileStep) -> Result<StepResult, RolloutError> {
        let files: Vec<FilePair> = step
            .files
            .iter()
            .map(|pair| pair.substitute(self.host.index))
            .collect();
        self.logger.info(&format!(
            "{} === upload {} file(s) ===",
            self.label,
            files.len()
        ));
        let success = self
            .connection
            .upload_files(&files, self.concurrency)
            .await?;
        Ok(StepResult::File {
            remote: self.host.address.clone(),
            success,
            files,
        })
    }

    async fn put_directory(&self, step: &DirectoryStep) -> Result<StepResult, RolloutError> {
        let local = substitute(&step.local, self.host.index);
        let remote = substitute(&step.remote, self.host.index);
        self.logger.info(&format!(
            "{} === upload directory '{}' to '{}' ===",
            self.label, local, remote
        ));
        let success = self
            .connection
            .upload_directory(&local, &remote, self.concurrency)
            .await?;
        Ok(StepResult::Directory {
            remote: self.host.address.clone(),
            success,
        })
    }
}
